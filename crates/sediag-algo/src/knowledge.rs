//! The knowledge store: the mutable hypothesis under test.
//!
//! A [`Knowledge`] aggregates the measurement set, a suspicion flag and
//! presumed open/closed status for every branch, the slack (angle reference)
//! bus, and an optional warm-start state vector. The heuristic controller
//! owns exactly one accepted instance per run and clones it before every
//! trial, so a rejected trial never touches the accepted hypothesis.
//!
//! All mutations are validated and all-or-nothing: an invalid measurement or
//! an unknown branch id is rejected without corrupting the store.

use std::collections::HashMap;
use std::io::{Read, Write};

use sediag_core::{BranchId, BusId, Network, SediagError, SediagResult};
use serde::{Deserialize, Serialize};

/// Unique measurement identifier (≥ 1, unique across all kinds).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MeasurementId(usize);

impl MeasurementId {
    #[inline]
    pub fn new(value: usize) -> Self {
        MeasurementId(value)
    }
    #[inline]
    pub fn value(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for MeasurementId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Measurement#{}", self.0)
    }
}

/// The five supported measurement kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeasurementKind {
    /// Active power flow on a branch, seen from its `from_bus` side (MW)
    BranchFlowActive,
    /// Reactive power flow on a branch, seen from its `from_bus` side (Mvar)
    BranchFlowReactive,
    /// Net active power injected at a bus (MW)
    BusInjectionActive,
    /// Net reactive power injected at a bus (Mvar)
    BusInjectionReactive,
    /// Voltage magnitude at a bus (kV)
    BusVoltageMagnitude,
}

impl MeasurementKind {
    /// Whether this kind lives on a branch (vs. on a bus).
    pub fn is_branch_kind(&self) -> bool {
        matches!(
            self,
            MeasurementKind::BranchFlowActive | MeasurementKind::BranchFlowReactive
        )
    }
}

/// Where a measurement is taken.
///
/// Branch measurements record the branch and both terminal buses; the
/// ordering of `from_bus`/`to_bus` identifies the metering side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MeasurementLocation {
    Branch {
        branch: BranchId,
        from_bus: BusId,
        to_bus: BusId,
    },
    Bus(BusId),
}

/// A single telemetered value with its assumed variance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measurement {
    pub id: MeasurementId,
    pub kind: MeasurementKind,
    pub location: MeasurementLocation,
    pub value: f64,
    pub variance: f64,
}

impl Measurement {
    /// Construct a branch-flow measurement (active or reactive).
    pub fn branch_flow(
        id: MeasurementId,
        kind: MeasurementKind,
        branch: BranchId,
        from_bus: BusId,
        to_bus: BusId,
        value: f64,
        variance: f64,
    ) -> SediagResult<Self> {
        if !kind.is_branch_kind() {
            return Err(SediagError::Validation(format!(
                "{kind:?} is not a branch measurement kind"
            )));
        }
        let m = Measurement {
            id,
            kind,
            location: MeasurementLocation::Branch {
                branch,
                from_bus,
                to_bus,
            },
            value,
            variance,
        };
        m.validate_fields()?;
        Ok(m)
    }

    /// Construct a bus measurement (injection or voltage magnitude).
    pub fn at_bus(
        id: MeasurementId,
        kind: MeasurementKind,
        bus: BusId,
        value: f64,
        variance: f64,
    ) -> SediagResult<Self> {
        if kind.is_branch_kind() {
            return Err(SediagError::Validation(format!(
                "{kind:?} is not a bus measurement kind"
            )));
        }
        let m = Measurement {
            id,
            kind,
            location: MeasurementLocation::Bus(bus),
            value,
            variance,
        };
        m.validate_fields()?;
        Ok(m)
    }

    fn validate_fields(&self) -> SediagResult<()> {
        if self.id.value() < 1 {
            return Err(SediagError::Validation(
                "measurement id must be a positive integer".into(),
            ));
        }
        if !self.variance.is_finite() || self.variance < 0.0 {
            return Err(SediagError::Validation(format!(
                "measurement variance must be non-negative, got {}",
                self.variance
            )));
        }
        if !self.value.is_finite() {
            return Err(SediagError::Validation(
                "measurement value must be finite".into(),
            ));
        }
        if self.kind == MeasurementKind::BusVoltageMagnitude && self.value < 0.0 {
            return Err(SediagError::Validation(
                "voltage magnitude measurement value must be non-negative".into(),
            ));
        }
        if let MeasurementLocation::Branch { from_bus, to_bus, .. } = self.location {
            if from_bus == to_bus {
                return Err(SediagError::Validation(
                    "branch measurement terminal buses must differ".into(),
                ));
            }
        }
        Ok(())
    }

    /// The buses a measurement touches directly (terminals for a branch
    /// measurement, the single bus otherwise).
    pub fn touched_buses(&self) -> Vec<BusId> {
        match self.location {
            MeasurementLocation::Branch { from_bus, to_bus, .. } => vec![from_bus, to_bus],
            MeasurementLocation::Bus(bus) => vec![bus],
        }
    }
}

/// Presumed open/closed status of a branch, as assumed by the estimator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PresumedStatus {
    Closed,
    Opened,
}

impl PresumedStatus {
    pub fn flipped(self) -> Self {
        match self {
            PresumedStatus::Closed => PresumedStatus::Opened,
            PresumedStatus::Opened => PresumedStatus::Closed,
        }
    }
}

/// Per-branch suspicion entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SuspectBranch {
    /// Whether the oracle may change this branch's status in the next solve.
    pub suspected: bool,
    /// The status the estimator presumes when the branch is not suspected.
    pub presumed: PresumedStatus,
}

impl Default for SuspectBranch {
    fn default() -> Self {
        Self {
            suspected: false,
            presumed: PresumedStatus::Closed,
        }
    }
}

/// Per-bus warm-start point (voltage magnitude p.u., angle rad).
pub type StartingPoint = HashMap<BusId, (f64, f64)>;

/// The full hypothesis under test: measurements, suspect-branch table,
/// slack bus, and an optional state-vector starting point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Knowledge {
    measurements: HashMap<MeasurementId, Measurement>,
    suspect_branches: HashMap<BranchId, SuspectBranch>,
    slack_bus: BusId,
    starting_point: Option<StartingPoint>,
}

impl Knowledge {
    /// Create a knowledge store for a network: no measurements yet, every
    /// branch not-suspected and presumed closed.
    pub fn new(network: &Network, slack_bus: BusId) -> SediagResult<Self> {
        if !network.has_bus(slack_bus) {
            return Err(SediagError::Validation(format!(
                "slack bus {slack_bus} does not exist in the network"
            )));
        }
        let suspect_branches = network
            .branches()
            .iter()
            .map(|b| (b.id, SuspectBranch::default()))
            .collect();
        Ok(Self {
            measurements: HashMap::new(),
            suspect_branches,
            slack_bus,
            starting_point: None,
        })
    }

    pub fn slack_bus(&self) -> BusId {
        self.slack_bus
    }

    pub fn measurement_count(&self) -> usize {
        self.measurements.len()
    }

    pub fn measurement(&self, id: MeasurementId) -> Option<&Measurement> {
        self.measurements.get(&id)
    }

    pub fn measurements(&self) -> impl Iterator<Item = &Measurement> {
        self.measurements.values()
    }

    pub fn suspect_branch(&self, branch: BranchId) -> Option<&SuspectBranch> {
        self.suspect_branches.get(&branch)
    }

    pub fn suspect_branches(&self) -> impl Iterator<Item = (BranchId, &SuspectBranch)> {
        self.suspect_branches.iter().map(|(id, s)| (*id, s))
    }

    pub fn starting_point(&self) -> Option<&StartingPoint> {
        self.starting_point.as_ref()
    }

    /// Add a validated measurement. All checks pass before any mutation.
    ///
    /// Rejected: duplicate ids, unknown bus/branch ids, terminal buses that
    /// are not the branch's actual terminals, a second measurement of the
    /// same kind at the same (location, side).
    pub fn add_measurement(
        &mut self,
        network: &Network,
        measurement: Measurement,
    ) -> SediagResult<()> {
        measurement.validate_fields()?;
        if self.measurements.contains_key(&measurement.id) {
            return Err(SediagError::Validation(format!(
                "{} already exists in the measurement set",
                measurement.id
            )));
        }
        match measurement.location {
            MeasurementLocation::Branch {
                branch,
                from_bus,
                to_bus,
            } => {
                if !measurement.kind.is_branch_kind() {
                    return Err(SediagError::Validation(format!(
                        "{:?} cannot be located on a branch",
                        measurement.kind
                    )));
                }
                let (t1, t2) = network.terminal_buses(branch).map_err(|_| {
                    SediagError::Validation(format!("{branch} does not exist in the network"))
                })?;
                let terminals_match = (from_bus == t1 && to_bus == t2)
                    || (from_bus == t2 && to_bus == t1);
                if !terminals_match {
                    return Err(SediagError::Validation(format!(
                        "({from_bus}, {to_bus}) are not the terminals of {branch}"
                    )));
                }
            }
            MeasurementLocation::Bus(bus) => {
                if measurement.kind.is_branch_kind() {
                    return Err(SediagError::Validation(format!(
                        "{:?} cannot be located on a bus",
                        measurement.kind
                    )));
                }
                if !network.has_bus(bus) {
                    return Err(SediagError::unknown_bus(bus));
                }
            }
        }
        // One measurement of a given kind per (location, side).
        let duplicate = self.measurements.values().any(|m| {
            m.kind == measurement.kind && m.location == measurement.location
        });
        if duplicate {
            return Err(SediagError::Validation(format!(
                "a {:?} measurement already exists at this location",
                measurement.kind
            )));
        }
        self.measurements.insert(measurement.id, measurement);
        Ok(())
    }

    /// Remove a measurement. Fails if the id is absent, leaving the store
    /// unchanged.
    pub fn remove_measurement(&mut self, id: MeasurementId) -> SediagResult<Measurement> {
        self.measurements.remove(&id).ok_or_else(|| {
            SediagError::Validation(format!("{id} is not in the measurement set"))
        })
    }

    /// Set the suspicion flag and presumed status of one branch.
    pub fn set_suspect_branch(
        &mut self,
        branch: BranchId,
        suspected: bool,
        presumed: PresumedStatus,
    ) -> SediagResult<()> {
        let entry = self.suspect_branches.get_mut(&branch).ok_or_else(|| {
            SediagError::Validation(format!("{branch} does not exist in the network"))
        })?;
        *entry = SuspectBranch { suspected, presumed };
        Ok(())
    }

    /// Record a per-bus warm start for the next oracle call.
    pub fn set_starting_point(&mut self, point: StartingPoint) {
        self.starting_point = Some(point);
    }

    pub fn clear_starting_point(&mut self) {
        self.starting_point = None;
    }

    /// Serialize the knowledge for later replay of a diagnosis run.
    pub fn to_json_writer<W: Write>(&self, writer: W) -> SediagResult<()> {
        serde_json::to_writer_pretty(writer, self)?;
        Ok(())
    }

    /// Restore a knowledge previously saved with [`Knowledge::to_json_writer`].
    pub fn from_json_reader<R: Read>(reader: R) -> SediagResult<Self> {
        Ok(serde_json::from_reader(reader)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::five_bus_network;

    fn pf(id: usize, branch: usize, from: usize, to: usize, value: f64) -> Measurement {
        Measurement::branch_flow(
            MeasurementId::new(id),
            MeasurementKind::BranchFlowActive,
            BranchId::new(branch),
            BusId::new(from),
            BusId::new(to),
            value,
            4.0,
        )
        .unwrap()
    }

    #[test]
    fn test_new_knowledge_defaults() {
        let network = five_bus_network();
        let knowledge = Knowledge::new(&network, BusId::new(1)).unwrap();
        assert_eq!(knowledge.measurement_count(), 0);
        assert_eq!(knowledge.suspect_branches().count(), network.branch_count());
        for (_, entry) in knowledge.suspect_branches() {
            assert!(!entry.suspected);
            assert_eq!(entry.presumed, PresumedStatus::Closed);
        }
    }

    #[test]
    fn test_new_knowledge_rejects_unknown_slack() {
        let network = five_bus_network();
        assert!(Knowledge::new(&network, BusId::new(99)).is_err());
    }

    #[test]
    fn test_add_measurement() {
        let network = five_bus_network();
        let mut knowledge = Knowledge::new(&network, BusId::new(1)).unwrap();
        knowledge.add_measurement(&network, pf(1, 1, 1, 2, 35.0)).unwrap();
        assert_eq!(knowledge.measurement_count(), 1);
        assert_eq!(
            knowledge.measurement(MeasurementId::new(1)).unwrap().value,
            35.0
        );
    }

    #[test]
    fn test_add_rejects_duplicate_id() {
        let network = five_bus_network();
        let mut knowledge = Knowledge::new(&network, BusId::new(1)).unwrap();
        knowledge.add_measurement(&network, pf(1, 1, 1, 2, 35.0)).unwrap();
        let err = knowledge
            .add_measurement(&network, pf(1, 2, 1, 3, 12.0))
            .unwrap_err();
        assert!(matches!(err, SediagError::Validation(_)));
        assert_eq!(knowledge.measurement_count(), 1);
    }

    #[test]
    fn test_add_rejects_duplicate_location_and_side() {
        let network = five_bus_network();
        let mut knowledge = Knowledge::new(&network, BusId::new(1)).unwrap();
        knowledge.add_measurement(&network, pf(1, 1, 1, 2, 35.0)).unwrap();
        // Same branch, same side, same kind.
        assert!(knowledge
            .add_measurement(&network, pf(2, 1, 1, 2, 34.0))
            .is_err());
        // Same branch, other side is allowed.
        knowledge.add_measurement(&network, pf(3, 1, 2, 1, -34.5)).unwrap();
        // Different kind at the same location is allowed.
        let qf = Measurement::branch_flow(
            MeasurementId::new(4),
            MeasurementKind::BranchFlowReactive,
            BranchId::new(1),
            BusId::new(1),
            BusId::new(2),
            5.0,
            1.0,
        )
        .unwrap();
        knowledge.add_measurement(&network, qf).unwrap();
    }

    #[test]
    fn test_add_rejects_wrong_terminals() {
        let network = five_bus_network();
        let mut knowledge = Knowledge::new(&network, BusId::new(1)).unwrap();
        // Branch 1 connects buses 1 and 2, not 1 and 4.
        let err = knowledge
            .add_measurement(&network, pf(1, 1, 1, 4, 35.0))
            .unwrap_err();
        assert!(err.to_string().contains("terminals"));
    }

    #[test]
    fn test_add_rejects_negative_variance() {
        let m = Measurement::at_bus(
            MeasurementId::new(1),
            MeasurementKind::BusInjectionActive,
            BusId::new(1),
            10.0,
            -1.0,
        );
        assert!(m.is_err());
    }

    #[test]
    fn test_add_rejects_zero_id() {
        let m = Measurement::at_bus(
            MeasurementId::new(0),
            MeasurementKind::BusVoltageMagnitude,
            BusId::new(1),
            140.0,
            0.5,
        );
        assert!(m.is_err());
    }

    #[test]
    fn test_negative_voltage_magnitude_rejected() {
        let m = Measurement::at_bus(
            MeasurementId::new(1),
            MeasurementKind::BusVoltageMagnitude,
            BusId::new(1),
            -140.0,
            0.5,
        );
        assert!(m.is_err());
    }

    #[test]
    fn test_remove_absent_measurement_fails_and_preserves_state() {
        let network = five_bus_network();
        let mut knowledge = Knowledge::new(&network, BusId::new(1)).unwrap();
        knowledge.add_measurement(&network, pf(1, 1, 1, 2, 35.0)).unwrap();

        let before = knowledge.clone();
        let err = knowledge.remove_measurement(MeasurementId::new(7)).unwrap_err();
        assert!(matches!(err, SediagError::Validation(_)));
        assert_eq!(knowledge.measurement_count(), before.measurement_count());

        // Retrying with a valid id succeeds.
        knowledge.remove_measurement(MeasurementId::new(1)).unwrap();
        assert_eq!(knowledge.measurement_count(), 0);
    }

    #[test]
    fn test_set_suspect_branch() {
        let network = five_bus_network();
        let mut knowledge = Knowledge::new(&network, BusId::new(1)).unwrap();
        knowledge
            .set_suspect_branch(BranchId::new(3), true, PresumedStatus::Opened)
            .unwrap();
        let entry = knowledge.suspect_branch(BranchId::new(3)).unwrap();
        assert!(entry.suspected);
        assert_eq!(entry.presumed, PresumedStatus::Opened);

        assert!(knowledge
            .set_suspect_branch(BranchId::new(42), false, PresumedStatus::Closed)
            .is_err());
    }

    #[test]
    fn test_snapshot_isolation() {
        let network = five_bus_network();
        let mut accepted = Knowledge::new(&network, BusId::new(1)).unwrap();
        accepted.add_measurement(&network, pf(1, 1, 1, 2, 35.0)).unwrap();

        let mut trial = accepted.clone();
        trial.remove_measurement(MeasurementId::new(1)).unwrap();
        trial
            .set_suspect_branch(BranchId::new(1), true, PresumedStatus::Opened)
            .unwrap();

        // Rejecting the trial (dropping it) leaves the accepted state intact.
        assert_eq!(accepted.measurement_count(), 1);
        assert!(!accepted.suspect_branch(BranchId::new(1)).unwrap().suspected);
    }

    #[test]
    fn test_json_round_trip() {
        let network = five_bus_network();
        let mut knowledge = Knowledge::new(&network, BusId::new(1)).unwrap();
        knowledge.add_measurement(&network, pf(1, 1, 1, 2, 35.0)).unwrap();
        knowledge
            .set_suspect_branch(BranchId::new(2), true, PresumedStatus::Opened)
            .unwrap();
        knowledge.set_starting_point(HashMap::from([(BusId::new(1), (1.01, 0.0))]));

        let mut buffer = Vec::new();
        knowledge.to_json_writer(&mut buffer).unwrap();
        let restored = Knowledge::from_json_reader(buffer.as_slice()).unwrap();

        assert_eq!(restored.measurement_count(), 1);
        assert_eq!(restored.slack_bus(), BusId::new(1));
        assert_eq!(
            restored.suspect_branch(BranchId::new(2)).unwrap().presumed,
            PresumedStatus::Opened
        );
        assert!(restored.starting_point().is_some());
    }

    #[test]
    fn test_json_file_round_trip() {
        let network = five_bus_network();
        let mut knowledge = Knowledge::new(&network, BusId::new(2)).unwrap();
        knowledge.add_measurement(&network, pf(1, 1, 1, 2, 35.0)).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("knowledge.json");
        knowledge
            .to_json_writer(std::fs::File::create(&path).unwrap())
            .unwrap();
        let restored =
            Knowledge::from_json_reader(std::fs::File::open(&path).unwrap()).unwrap();
        assert_eq!(restored.slack_bus(), BusId::new(2));
        assert_eq!(restored.measurement_count(), 1);
    }
}
