//! Shared fixtures for unit and integration tests.
//!
//! Provides a small meshed network, a builder for oracle outputs, and two
//! oracle stand-ins (scripted and closure-backed) so controller behavior can
//! be tested without a real estimation solver.

use std::collections::VecDeque;

use sediag_core::{Branch, BranchId, Bus, BusId, Network, SediagError, SediagResult};

use crate::controller::{DiagnosisEvent, DiagnosisObserver};
use crate::knowledge::{
    Knowledge, Measurement, MeasurementId, MeasurementKind, PresumedStatus,
};
use crate::oracle::{
    BranchStatus, BranchStatusEstimate, BusStateEstimate, EstimateResult, EstimationOracle,
    MeasurementEstimate, SolveOptions,
};

/// A five-bus meshed test network.
///
/// ```text
///        1 ---- 2
///        |    / |
///        |   /  |
///        3 ---- 4 ---- 5
/// ```
///
/// Branches: 1:(1-2), 2:(1-3), 3:(2-3), 4:(2-4), 5:(3-4), 6:(4-5).
pub fn five_bus_network() -> Network {
    let mut network = Network::new();
    let nodes: Vec<_> = (1..=5)
        .map(|i| network.add_bus(Bus::new(BusId::new(i), format!("Bus {i}"), 138.0)))
        .collect();
    for (id, from, to) in [
        (1, 1, 2),
        (2, 1, 3),
        (3, 2, 3),
        (4, 2, 4),
        (5, 3, 4),
        (6, 4, 5),
    ] {
        network.add_branch(
            nodes[from - 1],
            nodes[to - 1],
            Branch::new(
                BranchId::new(id),
                format!("Line {from}-{to}"),
                BusId::new(from),
                BusId::new(to),
            ),
        );
    }
    network
}

/// Knowledge over [`five_bus_network`] with one active-flow measurement per
/// branch, measurement id matching the branch id (value 10.0, variance 1.0).
pub fn per_branch_flow_knowledge(network: &Network) -> Knowledge {
    let mut knowledge = Knowledge::new(network, BusId::new(1)).expect("slack bus exists");
    for branch in network.branches() {
        knowledge
            .add_measurement(
                network,
                Measurement::branch_flow(
                    MeasurementId::new(branch.id.value()),
                    MeasurementKind::BranchFlowActive,
                    branch.id,
                    branch.from_bus,
                    branch.to_bus,
                    10.0,
                    1.0,
                )
                .expect("valid measurement"),
            )
            .expect("fixture measurement is valid");
    }
    knowledge
}

/// Observer that records every event for later assertions.
#[derive(Default)]
pub struct RecordingObserver {
    pub events: Vec<DiagnosisEvent>,
}

impl DiagnosisObserver for RecordingObserver {
    fn on_event(&mut self, event: &DiagnosisEvent) {
        self.events.push(event.clone());
    }
}

/// Builder for hand-crafted oracle outputs.
pub struct EstimateBuilder {
    result: EstimateResult,
}

impl EstimateBuilder {
    pub fn converged() -> Self {
        let mut result = EstimateResult::failed();
        result.success = true;
        Self { result }
    }

    pub fn diverged() -> Self {
        Self {
            result: EstimateResult::failed(),
        }
    }

    /// Flat state (1.0 p.u., 0 rad) at every bus of the network.
    pub fn flat_states(mut self, network: &Network) -> Self {
        for bus in network.buses() {
            self.result.bus_states.insert(
                bus.id,
                BusStateEstimate {
                    bus: bus.id,
                    voltage_pu: 1.0,
                    angle_rad: 0.0,
                },
            );
        }
        self
    }

    /// Branch statuses exactly matching the knowledge's presumed statuses
    /// (the oracle changed nothing).
    pub fn statuses_as_presumed(mut self, knowledge: &Knowledge) -> Self {
        for (branch, entry) in knowledge.suspect_branches() {
            self.result.branch_statuses.insert(
                branch,
                BranchStatusEstimate {
                    branch,
                    presumed: entry.presumed,
                    estimated: match entry.presumed {
                        PresumedStatus::Closed => BranchStatus::Closed,
                        PresumedStatus::Opened => BranchStatus::Opened,
                    },
                },
            );
        }
        self
    }

    /// Override one branch with an estimated status that differs from (or
    /// matches) its presumption.
    pub fn branch_status(
        mut self,
        branch: BranchId,
        presumed: PresumedStatus,
        estimated: BranchStatus,
    ) -> Self {
        self.result.branch_statuses.insert(
            branch,
            BranchStatusEstimate {
                branch,
                presumed,
                estimated,
            },
        );
        self
    }

    pub fn measurement(mut self, id: usize, estimate: f64, residual: f64) -> Self {
        self.result
            .measurement_results
            .insert(MeasurementId::new(id), MeasurementEstimate { estimate, residual });
        self
    }

    /// Entries for every measurement in the knowledge, each with the given
    /// residual (estimate = measured value minus residual).
    pub fn uniform_residuals(mut self, knowledge: &Knowledge, residual: f64) -> Self {
        for m in knowledge.measurements() {
            self.result.measurement_results.insert(
                m.id,
                MeasurementEstimate {
                    estimate: m.value - residual,
                    residual,
                },
            );
        }
        self
    }

    pub fn indicator(mut self, key: &str, value: &str) -> Self {
        self.result
            .run_indicators
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn build(self) -> EstimateResult {
        self.result
    }
}

/// Oracle that replays a fixed sequence of results, one per `solve` call.
///
/// Each call also records a snapshot of the knowledge it was given, so tests
/// can assert what hypothesis each trial actually submitted.
pub struct ScriptedOracle {
    script: VecDeque<EstimateResult>,
    pub calls: Vec<Knowledge>,
}

impl ScriptedOracle {
    pub fn new(script: Vec<EstimateResult>) -> Self {
        Self {
            script: script.into(),
            calls: Vec::new(),
        }
    }

    pub fn call_count(&self) -> usize {
        self.calls.len()
    }
}

impl EstimationOracle for ScriptedOracle {
    fn solve(
        &mut self,
        knowledge: &Knowledge,
        _options: &SolveOptions,
    ) -> SediagResult<EstimateResult> {
        self.calls.push(knowledge.clone());
        self.script
            .pop_front()
            .ok_or_else(|| SediagError::Solver("scripted oracle exhausted".into()))
    }
}

/// Oracle backed by a closure, for tests that need to inspect the submitted
/// knowledge before choosing a reply.
pub struct FnOracle<F>
where
    F: FnMut(&Knowledge, &SolveOptions) -> SediagResult<EstimateResult>,
{
    f: F,
}

impl<F> FnOracle<F>
where
    F: FnMut(&Knowledge, &SolveOptions) -> SediagResult<EstimateResult>,
{
    pub fn new(f: F) -> Self {
        Self { f }
    }
}

impl<F> EstimationOracle for FnOracle<F>
where
    F: FnMut(&Knowledge, &SolveOptions) -> SediagResult<EstimateResult>,
{
    fn solve(
        &mut self,
        knowledge: &Knowledge,
        options: &SolveOptions,
    ) -> SediagResult<EstimateResult> {
        (self.f)(knowledge, options)
    }
}
