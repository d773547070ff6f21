//! End-to-end diagnosis scenarios on a five-bus network, driven by oracles
//! that simulate a ground truth instead of replaying canned results.

use sediag_algo::test_utils::{five_bus_network, EstimateBuilder, FnOracle, RecordingObserver};
use sediag_algo::{
    diagnose, diagnose_with_observer, BranchStatus, DiagnosisEvent, DiagnosisPolicy, Knowledge,
    Measurement, MeasurementId, MeasurementKind, PresumedStatus, TrialStrategy,
};
use sediag_core::{BranchId, BusId, Network};

fn flow_knowledge(network: &Network, values: &[(usize, f64)]) -> Knowledge {
    let mut knowledge = Knowledge::new(network, BusId::new(1)).unwrap();
    for (id, value) in values {
        let branch = network.branch(BranchId::new(*id)).unwrap();
        knowledge
            .add_measurement(
                network,
                Measurement::branch_flow(
                    MeasurementId::new(*id),
                    MeasurementKind::BranchFlowActive,
                    branch.id,
                    branch.from_bus,
                    branch.to_bus,
                    *value,
                    1.0,
                )
                .unwrap(),
            )
            .unwrap();
    }
    knowledge
}

fn all_flows(network: &Network) -> Knowledge {
    flow_knowledge(network, &[(1, 10.0), (2, 10.0), (3, 10.0), (4, 10.0), (5, 10.0), (6, 10.0)])
}

#[test]
fn gross_measurement_error_is_removed() {
    let network = five_bus_network();
    // Measurement 1 is biased by twenty standard deviations.
    let knowledge = flow_knowledge(
        &network,
        &[(1, 30.0), (2, 10.0), (3, 10.0), (4, 10.0), (5, 10.0), (6, 10.0)],
    );

    let mut oracle = FnOracle::new(|knowledge: &Knowledge, _opts: &_| {
        let bad_present = knowledge.measurement(MeasurementId::new(1)).is_some();
        let mut builder = EstimateBuilder::converged()
            .flat_states(&network)
            .statuses_as_presumed(knowledge);
        for m in knowledge.measurements() {
            let residual = if m.id == MeasurementId::new(1) {
                20.0
            } else if bad_present {
                1.0
            } else {
                0.5
            };
            builder = builder.measurement(m.id.value(), m.value - residual, residual);
        }
        Ok(builder.build())
    });

    let mut observer = RecordingObserver::default();
    let outcome = diagnose_with_observer(
        &network,
        knowledge,
        &DiagnosisPolicy::default(),
        &mut oracle,
        &mut observer,
    )
    .unwrap();

    assert!(outcome.converged);
    assert_eq!(outcome.iterations_used, 1);
    assert!(outcome.knowledge.measurement(MeasurementId::new(1)).is_none());

    // Final largest normalized residual is under the detection threshold.
    let lnr = outcome
        .estimate
        .measurement_results
        .values()
        .map(|e| e.residual.abs())
        .fold(0.0, f64::max);
    assert!(lnr <= 3.0);

    // Monotonic acceptance: the one accepted trial dropped the objective by
    // at least the removed measurement's squared normalized residual.
    let accepted: Vec<_> = observer
        .events
        .iter()
        .filter_map(|e| match e {
            DiagnosisEvent::TrialAccepted {
                strategy,
                objective_before,
                objective_after,
            } => Some((*strategy, *objective_before, *objective_after)),
            _ => None,
        })
        .collect();
    assert_eq!(accepted.len(), 1);
    let (strategy, before, after) = accepted[0];
    assert_eq!(strategy, TrialStrategy::MeasurementFix);
    assert!(after < before);
    assert!(before - after >= 20.0 * 20.0 - 1e-6);
}

#[test]
fn wrongly_presumed_closed_line_is_opened() {
    let network = five_bus_network();
    let knowledge = all_flows(&network);
    let open_branch = BranchId::new(6);

    // Branch 6 is actually open. While the hypothesis neither presumes it
    // open nor lets the solver revisit it, residuals all over its
    // neighborhood stay large and flat.
    let mut oracle = FnOracle::new(|knowledge: &Knowledge, _opts: &_| {
        let entry = knowledge.suspect_branch(open_branch).unwrap();
        let model_right = entry.suspected || entry.presumed == PresumedStatus::Opened;

        let mut builder = EstimateBuilder::converged().flat_states(&network);
        for (branch, s) in knowledge.suspect_branches() {
            let estimated = if branch == open_branch && model_right {
                BranchStatus::Opened
            } else {
                BranchStatus::Closed
            };
            builder = builder.branch_status(branch, s.presumed, estimated);
        }
        for m in knowledge.measurements() {
            let residual = if model_right {
                0.5
            } else {
                match m.id.value() {
                    6 => 8.0,
                    5 => 7.6,
                    4 => 7.5,
                    3 => 2.0,
                    2 => 1.5,
                    _ => 1.2,
                }
            };
            builder = builder.measurement(m.id.value(), m.value - residual, residual);
        }
        Ok(builder.build())
    });

    let outcome = diagnose(&network, knowledge, &DiagnosisPolicy::default(), &mut oracle).unwrap();

    assert!(outcome.converged);
    assert_eq!(outcome.iterations_used, 1);
    assert_eq!(outcome.knowledge.measurement_count(), 6);

    let fixed = outcome.knowledge.suspect_branch(open_branch).unwrap();
    assert_eq!(fixed.presumed, PresumedStatus::Opened);
    assert!(!fixed.suspected);
    for (branch, entry) in outcome.knowledge.suspect_branches() {
        if branch != open_branch {
            assert_eq!(entry.presumed, PresumedStatus::Closed);
            assert!(!entry.suspected);
        }
    }
}

#[test]
fn combined_bad_datum_and_open_line_takes_two_rounds() {
    let network = five_bus_network();
    let knowledge = flow_knowledge(
        &network,
        &[(1, 30.0), (2, 10.0), (3, 10.0), (4, 10.0), (5, 10.0), (6, 10.0)],
    );
    let open_branch = BranchId::new(6);

    let mut oracle = FnOracle::new(|knowledge: &Knowledge, _opts: &_| {
        let bad_present = knowledge.measurement(MeasurementId::new(1)).is_some();
        let entry = knowledge.suspect_branch(open_branch).unwrap();
        let model_right = entry.suspected || entry.presumed == PresumedStatus::Opened;

        let mut builder = EstimateBuilder::converged().flat_states(&network);
        for (branch, s) in knowledge.suspect_branches() {
            let estimated = if branch == open_branch && model_right {
                BranchStatus::Opened
            } else {
                BranchStatus::Closed
            };
            builder = builder.branch_status(branch, s.presumed, estimated);
        }
        for m in knowledge.measurements() {
            let residual = if m.id == MeasurementId::new(1) {
                20.0
            } else if !model_right {
                match m.id.value() {
                    6 => 8.0,
                    5 => 7.6,
                    4 => 7.5,
                    3 => 7.2,
                    _ => 7.0,
                }
            } else if bad_present {
                1.0
            } else {
                0.5
            };
            builder = builder.measurement(m.id.value(), m.value - residual, residual);
        }
        Ok(builder.build())
    });

    let mut observer = RecordingObserver::default();
    let outcome = diagnose_with_observer(
        &network,
        knowledge,
        &DiagnosisPolicy::default(),
        &mut oracle,
        &mut observer,
    )
    .unwrap();

    assert!(outcome.converged);
    assert!(outcome.knowledge.measurement(MeasurementId::new(1)).is_none());
    assert_eq!(
        outcome.knowledge.suspect_branch(open_branch).unwrap().presumed,
        PresumedStatus::Opened
    );

    // Every accepted trial strictly decreased the objective.
    let mut accepted_count = 0;
    for event in &observer.events {
        if let DiagnosisEvent::TrialAccepted {
            objective_before,
            objective_after,
            ..
        } = event
        {
            assert!(objective_after < objective_before);
            accepted_count += 1;
        }
    }
    assert_eq!(accepted_count, 2);
}

#[test]
fn persisted_knowledge_replays_to_the_same_outcome() {
    let network = five_bus_network();
    let knowledge = flow_knowledge(
        &network,
        &[(1, 30.0), (2, 10.0), (3, 10.0), (4, 10.0), (5, 10.0), (6, 10.0)],
    );

    let mut buffer = Vec::new();
    knowledge.to_json_writer(&mut buffer).unwrap();
    let restored = Knowledge::from_json_reader(buffer.as_slice()).unwrap();

    let make_oracle = || {
        FnOracle::new(|knowledge: &Knowledge, _opts: &_| {
            let bad_present = knowledge.measurement(MeasurementId::new(1)).is_some();
            let mut builder = EstimateBuilder::converged().statuses_as_presumed(knowledge);
            for m in knowledge.measurements() {
                let residual = if m.id == MeasurementId::new(1) {
                    20.0
                } else if bad_present {
                    1.0
                } else {
                    0.5
                };
                builder = builder.measurement(m.id.value(), m.value - residual, residual);
            }
            Ok(builder.build())
        })
    };

    let policy = DiagnosisPolicy::default();
    let first = diagnose(&network, knowledge, &policy, &mut make_oracle()).unwrap();
    let second = diagnose(&network, restored, &policy, &mut make_oracle()).unwrap();

    assert_eq!(first.converged, second.converged);
    assert_eq!(first.iterations_used, second.iterations_used);
    assert_eq!(first.knowledge.measurement_count(), second.knowledge.measurement_count());
}
