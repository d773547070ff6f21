//! The estimation oracle interface.
//!
//! The weighted-least-squares estimation solve is an external collaborator:
//! expensive, blocking, and opaque. The heuristic controller only depends on
//! the [`EstimationOracle`] trait and the immutable [`EstimateResult`] it
//! returns. Process-spawning, file writing and output parsing belong to
//! adapters behind this trait, never to the controller.
//!
//! Contract for implementors:
//! - every measurement id present in the supplied knowledge has a matching
//!   entry in `measurement_results`;
//! - non-convergence is reported as `success = false`, never as an `Err`
//!   (an `Err` means the solve could not be attempted at all).

use std::collections::HashMap;

use sediag_core::{BranchId, BusId, SediagResult};
use serde::{Deserialize, Serialize};

use crate::knowledge::{Knowledge, MeasurementId, PresumedStatus};

/// Internal search strategy of the oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SolverMode {
    /// Exact resolution of the underlying mixed-integer estimation problem.
    Exact,
    /// Heuristic internal search, cheaper on wide suspect regions.
    Heuristic,
}

/// Per-call solve budget and strategy.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SolveOptions {
    /// Maximum wall-clock solving time, in seconds.
    pub max_solve_seconds: u64,
    /// Maximum number of branch-status changes the oracle may make.
    pub max_topology_changes: usize,
    /// Solver-mode selector.
    pub mode: SolverMode,
}

impl Default for SolveOptions {
    fn default() -> Self {
        Self {
            max_solve_seconds: 120,
            max_topology_changes: 5,
            mode: SolverMode::Exact,
        }
    }
}

impl SolveOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_max_solve_seconds(mut self, seconds: u64) -> Self {
        self.max_solve_seconds = seconds;
        self
    }

    pub fn with_max_topology_changes(mut self, changes: usize) -> Self {
        self.max_topology_changes = changes;
        self
    }

    pub fn with_mode(mut self, mode: SolverMode) -> Self {
        self.mode = mode;
        self
    }
}

/// Estimated open/closed status the oracle settled on for a branch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BranchStatus {
    Closed,
    Opened,
}

impl BranchStatus {
    /// The presumed status matching this estimate.
    pub fn as_presumed(self) -> PresumedStatus {
        match self {
            BranchStatus::Closed => PresumedStatus::Closed,
            BranchStatus::Opened => PresumedStatus::Opened,
        }
    }
}

/// Estimated state at one bus.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BusStateEstimate {
    pub bus: BusId,
    /// Voltage magnitude, per-unit.
    pub voltage_pu: f64,
    /// Voltage angle, radians.
    pub angle_rad: f64,
}

/// Presumed and estimated status of one branch after a solve.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BranchStatusEstimate {
    pub branch: BranchId,
    pub presumed: PresumedStatus,
    pub estimated: BranchStatus,
}

impl BranchStatusEstimate {
    /// Whether the oracle changed this branch relative to its presumption.
    pub fn changed(&self) -> bool {
        self.estimated.as_presumed() != self.presumed
    }
}

/// Estimate and raw residual for one measurement.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MeasurementEstimate {
    pub estimate: f64,
    pub residual: f64,
}

/// Immutable output of one oracle call.
///
/// Created fresh by each call, never mutated; a superseded result is
/// dropped, not patched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EstimateResult {
    /// Did the estimation solve converge?
    pub success: bool,
    pub bus_states: HashMap<BusId, BusStateEstimate>,
    pub branch_statuses: HashMap<BranchId, BranchStatusEstimate>,
    pub measurement_results: HashMap<MeasurementId, MeasurementEstimate>,
    /// Solver diagnostics (iteration counts, timings) as key/value pairs.
    pub run_indicators: HashMap<String, String>,
}

impl EstimateResult {
    /// An empty non-converged result (useful for failure paths in adapters).
    pub fn failed() -> Self {
        Self {
            success: false,
            bus_states: HashMap::new(),
            branch_statuses: HashMap::new(),
            measurement_results: HashMap::new(),
            run_indicators: HashMap::new(),
        }
    }

    pub fn branch_status(&self, branch: BranchId) -> Option<&BranchStatusEstimate> {
        self.branch_statuses.get(&branch)
    }

    /// Branches whose estimated status differs from the presumed one.
    pub fn changed_branches(&self) -> Vec<BranchId> {
        let mut changed: Vec<BranchId> = self
            .branch_statuses
            .values()
            .filter(|e| e.changed())
            .map(|e| e.branch)
            .collect();
        changed.sort();
        changed
    }

    /// The warm-start point corresponding to this estimate.
    pub fn starting_point(&self) -> HashMap<BusId, (f64, f64)> {
        self.bus_states
            .values()
            .map(|s| (s.bus, (s.voltage_pu, s.angle_rad)))
            .collect()
    }
}

/// The external estimation solve, behind a trait so the controller never
/// sees how estimates are produced.
pub trait EstimationOracle {
    /// Run one estimation solve for the given knowledge, blocking until the
    /// solver returns or its time budget expires.
    fn solve(&mut self, knowledge: &Knowledge, options: &SolveOptions)
        -> SediagResult<EstimateResult>;
}
