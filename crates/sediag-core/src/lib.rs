//! # sediag-core: Power Network Model for State-Estimation Diagnosis
//!
//! Provides the network container and topology queries consumed by the
//! diagnosis engine in `sediag-algo`.
//!
//! ## Design
//!
//! Networks are modeled as **undirected multigraphs** where nodes are buses
//! and edges are branches (lines and transformers alike, since the diagnosis
//! engine only cares about connectivity and open/closed status):
//!
//! - Fast topological queries (terminal buses, incident branches)
//! - Type-safe element access with newtype IDs
//! - Support for parallel branches between the same pair of buses
//!
//! ## Quick Start
//!
//! ```rust
//! use sediag_core::*;
//!
//! let mut network = Network::new();
//! let b1 = network.add_bus(Bus::new(BusId::new(1), "Bus 1", 138.0));
//! let b2 = network.add_bus(Bus::new(BusId::new(2), "Bus 2", 138.0));
//! network.add_branch(b1, b2, Branch::new(BranchId::new(1), "Line 1-2", BusId::new(1), BusId::new(2)));
//!
//! let (from, to) = network.terminal_buses(BranchId::new(1)).unwrap();
//! assert_eq!((from, to), (BusId::new(1), BusId::new(2)));
//! ```
//!
//! ## ID System
//!
//! Every element has a unique ID (newtype wrapper around `usize`). IDs keep
//! bus and branch references type-safe and survive serialization round-trips.
//!
//! The state-estimation knowledge (measurements, suspect branches) and the
//! diagnosis heuristics live in `sediag-algo`; this crate only carries what
//! both the engine and any importer need to agree on.

use std::collections::HashSet;

use petgraph::graph::{EdgeIndex, NodeIndex};
use petgraph::visit::EdgeRef;
use petgraph::{Graph, Undirected};
use serde::{Deserialize, Serialize};

pub mod error;
pub mod units;

pub use error::{SediagError, SediagResult};
pub use units::{Kilovolts, PerUnit, Radians};

// Newtype wrappers for IDs for type safety
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BusId(usize);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BranchId(usize);

impl BusId {
    #[inline]
    pub fn new(value: usize) -> Self {
        BusId(value)
    }
    #[inline]
    pub fn value(&self) -> usize {
        self.0
    }
}

impl BranchId {
    #[inline]
    pub fn new(value: usize) -> Self {
        BranchId(value)
    }
    #[inline]
    pub fn value(&self) -> usize {
        self.0
    }
}

impl std::fmt::Display for BusId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Bus#{}", self.0)
    }
}

impl std::fmt::Display for BranchId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Branch#{}", self.0)
    }
}

/// A bus (electrical node) with its last known operating point.
#[derive(Debug, Clone)]
pub struct Bus {
    pub id: BusId,
    pub name: String,
    /// Base voltage in kilovolts (for per-unit conversions)
    pub base_kv: Kilovolts,
    /// Voltage magnitude in per-unit
    pub voltage_pu: PerUnit,
    /// Voltage angle in radians
    pub angle_rad: Radians,
}

impl Bus {
    pub fn new(id: BusId, name: impl Into<String>, base_kv: f64) -> Self {
        Self {
            id,
            name: name.into(),
            base_kv: Kilovolts(base_kv),
            voltage_pu: PerUnit(1.0),
            angle_rad: Radians(0.0),
        }
    }
}

/// A branch (transmission line or two-winding transformer).
///
/// The diagnosis engine treats both uniformly: what matters is which buses a
/// branch connects and whether it is actually in service.
#[derive(Debug, Clone)]
pub struct Branch {
    pub id: BranchId,
    pub name: String,
    pub from_bus: BusId,
    pub to_bus: BusId,
    /// Actual operational status (true = closed / in service).
    ///
    /// The diagnosis engine never reads this directly; it works from
    /// presumed statuses in its knowledge store. Kept here so test fixtures
    /// can describe ground truth.
    pub status: bool,
}

impl Branch {
    pub fn new(id: BranchId, name: impl Into<String>, from_bus: BusId, to_bus: BusId) -> Self {
        Self {
            id,
            name: name.into(),
            from_bus,
            to_bus,
            status: true,
        }
    }

    pub fn opened(mut self) -> Self {
        self.status = false;
        self
    }
}

/// Node payload of the network graph.
#[derive(Debug, Clone)]
pub enum Node {
    Bus(Bus),
}

/// Edge payload of the network graph.
#[derive(Debug, Clone)]
pub enum Edge {
    Branch(Branch),
}

/// The core power network graph.
#[derive(Debug, Default)]
pub struct Network {
    pub graph: Graph<Node, Edge, Undirected>,
}

impl Network {
    pub fn new() -> Self {
        Self {
            graph: Graph::new_undirected(),
        }
    }

    /// Add a bus node and return its graph index.
    pub fn add_bus(&mut self, bus: Bus) -> NodeIndex {
        self.graph.add_node(Node::Bus(bus))
    }

    /// Add a branch edge between two bus nodes and return its graph index.
    pub fn add_branch(&mut self, from: NodeIndex, to: NodeIndex, branch: Branch) -> EdgeIndex {
        self.graph.add_edge(from, to, Edge::Branch(branch))
    }

    /// Get all buses as a vector.
    pub fn buses(&self) -> Vec<&Bus> {
        self.graph
            .node_weights()
            .map(|n| match n {
                Node::Bus(b) => b,
            })
            .collect()
    }

    /// Get all branches as a vector.
    pub fn branches(&self) -> Vec<&Branch> {
        self.graph
            .edge_weights()
            .map(|e| match e {
                Edge::Branch(b) => b,
            })
            .collect()
    }

    pub fn bus_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn branch_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Look up a bus by id.
    pub fn bus(&self, id: BusId) -> Option<&Bus> {
        self.graph.node_weights().find_map(|n| match n {
            Node::Bus(b) if b.id == id => Some(b),
            _ => None,
        })
    }

    /// Look up a branch by id.
    pub fn branch(&self, id: BranchId) -> Option<&Branch> {
        self.graph.edge_weights().find_map(|e| match e {
            Edge::Branch(b) if b.id == id => Some(b),
            _ => None,
        })
    }

    /// Whether a bus id exists in the network.
    pub fn has_bus(&self, id: BusId) -> bool {
        self.bus(id).is_some()
    }

    /// Whether a branch id exists in the network.
    pub fn has_branch(&self, id: BranchId) -> bool {
        self.branch(id).is_some()
    }

    /// Terminal buses of a branch, in (from, to) order.
    pub fn terminal_buses(&self, id: BranchId) -> SediagResult<(BusId, BusId)> {
        self.branch(id)
            .map(|b| (b.from_bus, b.to_bus))
            .ok_or_else(|| SediagError::Network(format!("unknown branch {id}")))
    }

    /// All branches incident to a bus.
    pub fn incident_branches(&self, id: BusId) -> HashSet<BranchId> {
        self.graph
            .edge_references()
            .filter_map(|e| {
                let Edge::Branch(b) = e.weight();
                if b.from_bus == id || b.to_bus == id {
                    Some(b.id)
                } else {
                    None
                }
            })
            .collect()
    }

    /// Buses reachable from `id` through exactly one branch.
    pub fn neighbor_buses(&self, id: BusId) -> HashSet<BusId> {
        let mut neighbors = HashSet::new();
        for e in self.graph.edge_weights() {
            let Edge::Branch(b) = e;
            if b.from_bus == id {
                neighbors.insert(b.to_bus);
            } else if b.to_bus == id {
                neighbors.insert(b.from_bus);
            }
        }
        neighbors
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn three_bus_network() -> Network {
        let mut network = Network::new();
        let b1 = network.add_bus(Bus::new(BusId::new(1), "Bus 1", 138.0));
        let b2 = network.add_bus(Bus::new(BusId::new(2), "Bus 2", 138.0));
        let b3 = network.add_bus(Bus::new(BusId::new(3), "Bus 3", 138.0));
        network.add_branch(
            b1,
            b2,
            Branch::new(BranchId::new(1), "Line 1-2", BusId::new(1), BusId::new(2)),
        );
        network.add_branch(
            b2,
            b3,
            Branch::new(BranchId::new(2), "Line 2-3", BusId::new(2), BusId::new(3)),
        );
        network
    }

    #[test]
    fn test_network_creation() {
        let network = three_bus_network();
        assert_eq!(network.bus_count(), 3);
        assert_eq!(network.branch_count(), 2);
        assert_eq!(network.bus(BusId::new(2)).unwrap().name, "Bus 2");
    }

    #[test]
    fn test_terminal_buses() {
        let network = three_bus_network();
        let (from, to) = network.terminal_buses(BranchId::new(2)).unwrap();
        assert_eq!(from, BusId::new(2));
        assert_eq!(to, BusId::new(3));
    }

    #[test]
    fn test_terminal_buses_unknown_branch() {
        let network = three_bus_network();
        assert!(network.terminal_buses(BranchId::new(99)).is_err());
    }

    #[test]
    fn test_incident_branches() {
        let network = three_bus_network();
        let incident = network.incident_branches(BusId::new(2));
        assert_eq!(incident.len(), 2);
        assert!(incident.contains(&BranchId::new(1)));
        assert!(incident.contains(&BranchId::new(2)));
        assert_eq!(network.incident_branches(BusId::new(1)).len(), 1);
    }

    #[test]
    fn test_neighbor_buses() {
        let network = three_bus_network();
        let neighbors = network.neighbor_buses(BusId::new(2));
        assert_eq!(
            neighbors,
            HashSet::from([BusId::new(1), BusId::new(3)])
        );
    }

    #[test]
    fn test_parallel_branches() {
        let mut network = Network::new();
        let b1 = network.add_bus(Bus::new(BusId::new(1), "Bus 1", 63.0));
        let b2 = network.add_bus(Bus::new(BusId::new(2), "Bus 2", 63.0));
        network.add_branch(
            b1,
            b2,
            Branch::new(BranchId::new(1), "Line 1-2 a", BusId::new(1), BusId::new(2)),
        );
        network.add_branch(
            b1,
            b2,
            Branch::new(BranchId::new(2), "Line 1-2 b", BusId::new(1), BusId::new(2)),
        );

        assert_eq!(network.incident_branches(BusId::new(1)).len(), 2);
        assert_eq!(network.neighbor_buses(BusId::new(1)).len(), 1);
    }

    #[test]
    fn test_opened_branch_keeps_topology() {
        // An out-of-service branch still exists topologically: the engine
        // reasons about presumed statuses, not the graph structure.
        let mut network = Network::new();
        let b1 = network.add_bus(Bus::new(BusId::new(1), "Bus 1", 225.0));
        let b2 = network.add_bus(Bus::new(BusId::new(2), "Bus 2", 225.0));
        network.add_branch(
            b1,
            b2,
            Branch::new(BranchId::new(1), "Line 1-2", BusId::new(1), BusId::new(2)).opened(),
        );

        assert!(!network.branch(BranchId::new(1)).unwrap().status);
        assert_eq!(network.incident_branches(BusId::new(2)).len(), 1);
    }
}
