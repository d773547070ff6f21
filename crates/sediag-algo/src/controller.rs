//! The heuristic diagnosis controller.
//!
//! Drives the whole search as an explicit state machine. Each outer
//! iteration ranks normalized residuals, classifies the largest anomaly via
//! the decay index, and tries up to four correction strategies in an order
//! chosen by that classification. A trial runs against a disposable clone of
//! the accepted knowledge, so rejection costs nothing but the solve.
//!
//! The controller is single-threaded and synchronous: exactly one blocking
//! oracle call per state-machine step, no overlap between trials, since each
//! trial's hypothesis depends on the previous outcome. The only mutable
//! state crossing call boundaries is the one accepted knowledge instance,
//! exclusively owned here for the duration of a run.
//!
//! Heuristic non-convergence is an outcome, not an error: `diagnose` always
//! returns the best accepted state with an explicit `converged` flag.

use std::collections::{HashMap, HashSet};

use sediag_core::{BranchId, BusId, Network, SediagError, SediagResult};
use tracing::{debug, info};

use crate::knowledge::{Knowledge, MeasurementId, MeasurementLocation, PresumedStatus};
use crate::neighborhood::{branch_terminals, disjointify, extend_region, suspect_region};
use crate::oracle::{EstimateResult, EstimationOracle, SolveOptions, SolverMode};
use crate::policy::DiagnosisPolicy;
use crate::residual::{decay_index, normalized_residuals, objective_value, rank_descending};

/// Floating slack applied to the expected-objective-drop acceptance check.
const DROP_TOLERANCE: f64 = 1e-9;

/// Named states of the controller state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    OpenScreen,
    Classify,
    TryMeasurementFix,
    TryTopologyFix,
    TryMeasurementFixNoLocalCheck,
    TryTopologyFixExtended,
    Accept,
    Converged,
    GaveUp,
}

/// The four correction strategies a classification can schedule.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrialStrategy {
    /// Remove the flagged measurement; accept on expected objective drop
    /// and a clean local neighborhood.
    MeasurementFix,
    /// Let the oracle revisit branch statuses in the suspect region.
    TopologyFix,
    /// Measurement removal without the local-neighborhood check.
    MeasurementFixNoLocalCheck,
    /// Topology fix over the one-hop extension ring around the region.
    TopologyFixExtended,
}

impl TrialStrategy {
    fn state(self) -> ControllerState {
        match self {
            TrialStrategy::MeasurementFix => ControllerState::TryMeasurementFix,
            TrialStrategy::TopologyFix => ControllerState::TryTopologyFix,
            TrialStrategy::MeasurementFixNoLocalCheck => {
                ControllerState::TryMeasurementFixNoLocalCheck
            }
            TrialStrategy::TopologyFixExtended => ControllerState::TryTopologyFixExtended,
        }
    }
}

/// Strategy ordering for one classified anomaly.
///
/// A high decay index means the anomaly is locally isolated, so measurement
/// removal is tried before topology search; a low index inverts the
/// ordering. The infinite sentinel (too few residuals to fit) lands on the
/// measurement-first path, the safer default since removing one datum is
/// reversible.
pub fn strategy_order(decay: f64, threshold: f64) -> [TrialStrategy; 4] {
    if decay > threshold {
        [
            TrialStrategy::MeasurementFix,
            TrialStrategy::TopologyFix,
            TrialStrategy::MeasurementFixNoLocalCheck,
            TrialStrategy::TopologyFixExtended,
        ]
    } else {
        [
            TrialStrategy::TopologyFix,
            TrialStrategy::MeasurementFix,
            TrialStrategy::TopologyFixExtended,
            TrialStrategy::MeasurementFixNoLocalCheck,
        ]
    }
}

/// Structured progress events, emitted on every state transition.
#[derive(Debug, Clone, PartialEq)]
pub enum DiagnosisEvent {
    StateEntered(ControllerState),
    ScreenCompleted {
        regions: usize,
    },
    BaselineSolved {
        objective: f64,
    },
    Classified {
        measurement: MeasurementId,
        lnr: f64,
        decay_index: f64,
    },
    TrialStarted {
        strategy: TrialStrategy,
        iteration: usize,
    },
    TrialRejected {
        strategy: TrialStrategy,
    },
    TrialAccepted {
        strategy: TrialStrategy,
        objective_before: f64,
        objective_after: f64,
    },
    Finished {
        converged: bool,
        iterations: usize,
    },
}

/// Observability hook invoked by the controller; decoupled from any output
/// format.
pub trait DiagnosisObserver {
    fn on_event(&mut self, event: &DiagnosisEvent);
}

/// Observer that discards every event.
pub struct NoopObserver;

impl DiagnosisObserver for NoopObserver {
    fn on_event(&mut self, _event: &DiagnosisEvent) {}
}

/// Final state of a diagnosis run.
#[derive(Debug, Clone)]
pub struct DiagnosisOutcome {
    /// Last accepted hypothesis.
    pub knowledge: Knowledge,
    /// Estimate matching the accepted hypothesis.
    pub estimate: EstimateResult,
    /// Whether the largest normalized residual fell under the threshold.
    pub converged: bool,
    /// Trial solves consumed (the baseline solve is not counted).
    pub iterations_used: usize,
}

/// Run a full diagnosis with no observer attached.
pub fn diagnose<O: EstimationOracle>(
    network: &Network,
    knowledge: Knowledge,
    policy: &DiagnosisPolicy,
    oracle: &mut O,
) -> SediagResult<DiagnosisOutcome> {
    diagnose_with_observer(network, knowledge, policy, oracle, &mut NoopObserver)
}

/// Run a full diagnosis, reporting state transitions to `observer`.
///
/// The baseline solve failing to converge is a hard error; after it, solve
/// non-convergence only rejects the trial at hand. The run performs at most
/// `policy.effective_max_iterations(..)` trial solves and always returns a
/// best-effort outcome with an explicit convergence flag.
pub fn diagnose_with_observer<O: EstimationOracle>(
    network: &Network,
    knowledge: Knowledge,
    policy: &DiagnosisPolicy,
    oracle: &mut O,
    observer: &mut dyn DiagnosisObserver,
) -> SediagResult<DiagnosisOutcome> {
    Controller {
        network,
        policy,
        oracle,
        observer,
        iterations_used: 0,
        max_iterations: 0,
    }
    .run(knowledge)
}

/// Accepted hypothesis plus the derived quantities the next classification
/// needs.
struct Accepted {
    knowledge: Knowledge,
    estimate: EstimateResult,
    residuals: HashMap<MeasurementId, f64>,
    objective: f64,
}

struct Controller<'a, O: EstimationOracle> {
    network: &'a Network,
    policy: &'a DiagnosisPolicy,
    oracle: &'a mut O,
    observer: &'a mut dyn DiagnosisObserver,
    iterations_used: usize,
    max_iterations: usize,
}

impl<O: EstimationOracle> Controller<'_, O> {
    fn emit(&mut self, event: DiagnosisEvent) {
        self.observer.on_event(&event);
    }

    fn enter(&mut self, state: ControllerState) {
        self.emit(DiagnosisEvent::StateEntered(state));
    }

    fn run(mut self, knowledge: Knowledge) -> SediagResult<DiagnosisOutcome> {
        let mut region_count = 0;
        if self.policy.screen_first {
            self.enter(ControllerState::OpenScreen);
            region_count = self.screen(&knowledge)?;
            debug!(regions = region_count, "topology screening completed");
            self.emit(DiagnosisEvent::ScreenCompleted {
                regions: region_count,
            });
        }
        self.max_iterations = self.policy.effective_max_iterations(region_count);

        // Baseline solve of the initial hypothesis. Unlike trial solves,
        // non-convergence here is a hard failure: there is nothing to fall
        // back to.
        let options = SolveOptions::new()
            .with_max_solve_seconds(self.policy.topology_trial_seconds)
            .with_max_topology_changes(0)
            .with_mode(SolverMode::Exact);
        let estimate = self.oracle.solve(&knowledge, &options)?;
        if !estimate.success {
            return Err(SediagError::Solver(
                "baseline estimation solve did not converge".into(),
            ));
        }
        let residuals = normalized_residuals(&knowledge, &estimate)?;
        let objective = objective_value(&residuals);
        info!(objective, "baseline estimation solved");
        self.emit(DiagnosisEvent::BaselineSolved { objective });
        let mut accepted = Accepted {
            knowledge,
            estimate,
            residuals,
            objective,
        };

        loop {
            self.enter(ControllerState::Classify);
            let ranked = rank_descending(&accepted.residuals);
            let (target, lnr) = match ranked.first() {
                Some(&(id, value)) if value > self.policy.lnr_threshold => (id, value),
                _ => break,
            };
            let decay = decay_index(
                target,
                &accepted.residuals,
                &accepted.knowledge,
                self.network,
                self.policy.decay_top_k,
                self.policy.decay_noise_floor,
            )?;
            info!(%target, lnr, decay, "largest normalized residual classified");
            self.emit(DiagnosisEvent::Classified {
                measurement: target,
                lnr,
                decay_index: decay,
            });

            let mut accepted_this_round = false;
            for strategy in strategy_order(decay, self.policy.decay_index_threshold) {
                if self.iterations_used >= self.max_iterations {
                    return self.finish(accepted, false);
                }
                self.iterations_used += 1;
                self.enter(strategy.state());
                self.emit(DiagnosisEvent::TrialStarted {
                    strategy,
                    iteration: self.iterations_used,
                });
                let trial = match strategy {
                    TrialStrategy::MeasurementFix => {
                        self.try_measurement_fix(&accepted, target, lnr, true)?
                    }
                    TrialStrategy::MeasurementFixNoLocalCheck => {
                        self.try_measurement_fix(&accepted, target, lnr, false)?
                    }
                    TrialStrategy::TopologyFix => {
                        self.try_topology_fix(&accepted, target, false)?
                    }
                    TrialStrategy::TopologyFixExtended => {
                        self.try_topology_fix(&accepted, target, true)?
                    }
                };
                match trial {
                    Some(next) => {
                        self.enter(ControllerState::Accept);
                        info!(
                            ?strategy,
                            objective_before = accepted.objective,
                            objective_after = next.objective,
                            "trial accepted"
                        );
                        self.emit(DiagnosisEvent::TrialAccepted {
                            strategy,
                            objective_before: accepted.objective,
                            objective_after: next.objective,
                        });
                        accepted = next;
                        accepted_this_round = true;
                        break;
                    }
                    None => {
                        debug!(?strategy, "trial rejected");
                        self.emit(DiagnosisEvent::TrialRejected { strategy });
                    }
                }
            }
            if !accepted_this_round {
                return self.finish(accepted, false);
            }
        }

        self.finish(accepted, true)
    }

    fn finish(
        mut self,
        accepted: Accepted,
        converged: bool,
    ) -> SediagResult<DiagnosisOutcome> {
        self.enter(if converged {
            ControllerState::Converged
        } else {
            ControllerState::GaveUp
        });
        info!(converged, iterations = self.iterations_used, "diagnosis finished");
        self.emit(DiagnosisEvent::Finished {
            converged,
            iterations: self.iterations_used,
        });
        Ok(DiagnosisOutcome {
            knowledge: accepted.knowledge,
            estimate: accepted.estimate,
            converged,
            iterations_used: self.iterations_used,
        })
    }

    /// Single wide heuristic solve with every branch suspected; the changed
    /// branches seed disjoint suspect regions whose count scales the
    /// iteration budget. A non-converging screen is ignored.
    fn screen(&mut self, knowledge: &Knowledge) -> SediagResult<usize> {
        let mut wide = knowledge.clone();
        for branch in self.network.branches() {
            let presumed = wide
                .suspect_branch(branch.id)
                .map(|s| s.presumed)
                .unwrap_or(PresumedStatus::Closed);
            wide.set_suspect_branch(branch.id, true, presumed)?;
        }
        let options = SolveOptions::new()
            .with_max_solve_seconds(self.policy.topology_trial_seconds)
            .with_max_topology_changes(self.policy.screen_topology_changes)
            .with_mode(SolverMode::Heuristic);
        let estimate = self.oracle.solve(&wide, &options)?;
        if !estimate.success {
            return Ok(0);
        }
        let mut regions = Vec::new();
        for branch in estimate.changed_branches() {
            let (from_bus, to_bus) = self.network.terminal_buses(branch)?;
            let location = MeasurementLocation::Branch {
                branch,
                from_bus,
                to_bus,
            };
            regions.push(suspect_region(&location, self.network)?);
        }
        Ok(disjointify(regions, self.policy.max_disjoint_regions).len())
    }

    fn try_measurement_fix(
        &mut self,
        accepted: &Accepted,
        target: MeasurementId,
        lnr: f64,
        local_check: bool,
    ) -> SediagResult<Option<Accepted>> {
        let mut knowledge = accepted.knowledge.clone();
        let removed = knowledge.remove_measurement(target)?;
        let options = SolveOptions::new()
            .with_max_solve_seconds(self.policy.measurement_trial_seconds)
            .with_max_topology_changes(0)
            .with_mode(SolverMode::Exact);
        let estimate = self.oracle.solve(&knowledge, &options)?;
        if !estimate.success {
            return Ok(None);
        }
        let residuals = normalized_residuals(&knowledge, &estimate)?;
        let objective = objective_value(&residuals);

        // Removing one bad datum must buy at least its squared normalized
        // residual off the objective.
        let required_drop = self.policy.expected_drop_factor * lnr * lnr;
        let drop = accepted.objective - objective;
        if !(objective < accepted.objective && drop + DROP_TOLERANCE >= required_drop) {
            return Ok(None);
        }
        if local_check {
            let buses: HashSet<BusId> = removed.touched_buses().into_iter().collect();
            if !self.local_residuals_ok(&knowledge, &residuals, &buses) {
                return Ok(None);
            }
        }
        Ok(Some(self.accept(knowledge, estimate, residuals, objective)?))
    }

    fn try_topology_fix(
        &mut self,
        accepted: &Accepted,
        target: MeasurementId,
        extended: bool,
    ) -> SediagResult<Option<Accepted>> {
        let measurement = accepted.knowledge.measurement(target).ok_or_else(|| {
            SediagError::Validation(format!("{target} is not in the measurement set"))
        })?;
        // The extended variant suspects only the one-hop ring around the
        // inner region: those branches were already searched by the failed
        // narrow trial, and re-suspecting them would dilute the fixed
        // topology-change budget.
        let inner = suspect_region(&measurement.location, self.network)?;
        let region = if extended {
            extend_region(&inner, self.network)?
        } else {
            inner.clone()
        };

        // Region branches become suspects with presumption flipped from the
        // last estimated status; everything else is pinned at its last
        // estimated status.
        let mut knowledge = accepted.knowledge.clone();
        for branch in self.network.branches() {
            let current = knowledge
                .suspect_branch(branch.id)
                .map(|s| s.presumed)
                .unwrap_or(PresumedStatus::Closed);
            let last_estimated = accepted
                .estimate
                .branch_status(branch.id)
                .map(|s| s.estimated.as_presumed())
                .unwrap_or(current);
            if region.contains(&branch.id) {
                knowledge.set_suspect_branch(branch.id, true, last_estimated.flipped())?;
            } else {
                knowledge.set_suspect_branch(branch.id, false, last_estimated)?;
            }
        }

        let options = SolveOptions::new()
            .with_max_solve_seconds(self.policy.topology_trial_seconds)
            .with_max_topology_changes(self.policy.max_topology_changes)
            .with_mode(SolverMode::Exact);
        let estimate = self.oracle.solve(&knowledge, &options)?;
        if !estimate.success {
            return Ok(None);
        }
        let residuals = normalized_residuals(&knowledge, &estimate)?;
        let objective = objective_value(&residuals);
        if objective >= accepted.objective {
            return Ok(None);
        }
        // The local check is always evaluated against the inner region,
        // whichever set of branches was suspected.
        let buses = branch_terminals(&inner, self.network)?;
        if !self.region_residuals_ok(&knowledge, &residuals, &inner, &buses) {
            return Ok(None);
        }
        Ok(Some(self.accept(knowledge, estimate, residuals, objective)?))
    }

    /// No residual among measurements touching `buses` may exceed the
    /// secondary local threshold.
    fn local_residuals_ok(
        &self,
        knowledge: &Knowledge,
        residuals: &HashMap<MeasurementId, f64>,
        buses: &HashSet<BusId>,
    ) -> bool {
        knowledge
            .measurements()
            .filter(|m| m.touched_buses().iter().any(|b| buses.contains(b)))
            .all(|m| {
                residuals
                    .get(&m.id)
                    .map_or(true, |v| *v <= self.policy.local_residual_threshold)
            })
    }

    /// Acceptance gate for topology trials: branch-flow measurements count
    /// only when the measured branch is in the region; bus measurements
    /// count when located on one of its bounding buses.
    fn region_residuals_ok(
        &self,
        knowledge: &Knowledge,
        residuals: &HashMap<MeasurementId, f64>,
        region: &HashSet<BranchId>,
        buses: &HashSet<BusId>,
    ) -> bool {
        knowledge
            .measurements()
            .filter(|m| match m.location {
                MeasurementLocation::Branch { branch, .. } => region.contains(&branch),
                MeasurementLocation::Bus(bus) => buses.contains(&bus),
            })
            .all(|m| {
                residuals
                    .get(&m.id)
                    .map_or(true, |v| *v <= self.policy.local_residual_threshold)
            })
    }

    /// Promote a trial to the accepted state: consolidate the oracle's
    /// estimated branch statuses into presumptions, clear suspicions, and
    /// record the state vector to warm-start the next solve.
    fn accept(
        &self,
        mut knowledge: Knowledge,
        estimate: EstimateResult,
        residuals: HashMap<MeasurementId, f64>,
        objective: f64,
    ) -> SediagResult<Accepted> {
        for status in estimate.branch_statuses.values() {
            knowledge.set_suspect_branch(status.branch, false, status.estimated.as_presumed())?;
        }
        knowledge.set_starting_point(estimate.starting_point());
        Ok(Accepted {
            knowledge,
            estimate,
            residuals,
            objective,
        })
    }
}
