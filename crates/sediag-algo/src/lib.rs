//! # sediag-algo: Heuristic State-Estimation Diagnosis
//!
//! Iterative bad-data and topology-error diagnosis on top of an external
//! state-estimation solver. The engine repeatedly obtains an estimate and
//! per-measurement residuals from the solver, ranks normalized residuals,
//! classifies the largest anomaly as a likely measurement error or topology
//! error using a residual-decay statistic, proposes a correction, and
//! accepts or rejects it based on objective-value and local-residual checks.
//!
//! ## Modules
//!
//! - [`knowledge`]: the hypothesis under test (measurements, suspect
//!   branches, slack bus, warm start), with validated mutations and JSON
//!   persistence
//! - [`oracle`]: the [`EstimationOracle`] trait hiding the external solver,
//!   plus its immutable result types
//! - [`residual`]: normalized residuals, ranking, objective, decay index
//! - [`neighborhood`]: suspect-region construction from network topology
//! - [`policy`]: every tunable threshold and budget of a run
//! - [`controller`]: the diagnosis state machine and [`diagnose`] entry
//!   point
//! - [`test_utils`]: shared fixtures, scripted oracles, recording observer
//!
//! ## Example
//!
//! ```rust,no_run
//! use sediag_algo::*;
//! use sediag_algo::test_utils::{five_bus_network, ScriptedOracle};
//! use sediag_core::BusId;
//!
//! # fn main() -> sediag_core::SediagResult<()> {
//! let network = five_bus_network();
//! let knowledge = Knowledge::new(&network, BusId::new(1))?;
//! let mut oracle = ScriptedOracle::new(vec![]);
//!
//! let outcome = diagnose(&network, knowledge, &DiagnosisPolicy::default(), &mut oracle)?;
//! println!("converged: {}", outcome.converged);
//! # Ok(())
//! # }
//! ```

pub mod controller;
pub mod knowledge;
pub mod neighborhood;
pub mod oracle;
pub mod policy;
pub mod residual;
pub mod test_utils;

pub use controller::{
    diagnose, diagnose_with_observer, strategy_order, ControllerState, DiagnosisEvent,
    DiagnosisObserver, DiagnosisOutcome, NoopObserver, TrialStrategy,
};
pub use knowledge::{
    Knowledge, Measurement, MeasurementId, MeasurementKind, MeasurementLocation, PresumedStatus,
    StartingPoint, SuspectBranch,
};
pub use oracle::{
    BranchStatus, BranchStatusEstimate, BusStateEstimate, EstimateResult, EstimationOracle,
    MeasurementEstimate, SolveOptions, SolverMode,
};
pub use policy::DiagnosisPolicy;
