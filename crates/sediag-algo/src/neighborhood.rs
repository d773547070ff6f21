//! Suspect-region construction around a flagged measurement.
//!
//! A suspect region is the set of branches whose open/closed status the
//! oracle is allowed to revisit in one trial solve. Regions are built from
//! pure topology queries on the network and carry no electrical modeling.

use std::collections::HashSet;

use sediag_core::{BranchId, BusId, Network, SediagResult};

use crate::knowledge::MeasurementLocation;

/// Branches whose status could explain an anomaly at the given location.
///
/// For a branch-flow measurement: the branch itself plus every branch
/// sharing one of its terminal buses. For a bus measurement: every branch
/// incident to that bus, plus every branch incident to the buses those
/// branches reach.
pub fn suspect_region(
    location: &MeasurementLocation,
    network: &Network,
) -> SediagResult<HashSet<BranchId>> {
    match *location {
        MeasurementLocation::Branch {
            branch,
            from_bus,
            to_bus,
        } => {
            let mut region = network.incident_branches(from_bus);
            region.extend(network.incident_branches(to_bus));
            region.insert(branch);
            Ok(region)
        }
        MeasurementLocation::Bus(bus) => {
            let first_hop = network.incident_branches(bus);
            let mut region = first_hop.clone();
            for neighbor in branch_terminals(&first_hop, network)? {
                region.extend(network.incident_branches(neighbor));
            }
            Ok(region)
        }
    }
}

/// One further hop of adjacency expansion around a region, excluding the
/// region itself. Used when the narrower region fails to explain the
/// anomaly.
pub fn extend_region(
    region: &HashSet<BranchId>,
    network: &Network,
) -> SediagResult<HashSet<BranchId>> {
    let mut extended = HashSet::new();
    for bus in branch_terminals(region, network)? {
        extended.extend(network.incident_branches(bus));
    }
    Ok(extended.difference(region).copied().collect())
}

/// All terminal buses of a set of branches.
pub fn branch_terminals(
    region: &HashSet<BranchId>,
    network: &Network,
) -> SediagResult<HashSet<BusId>> {
    let mut buses = HashSet::new();
    for branch in region {
        let (from, to) = network.terminal_buses(*branch)?;
        buses.insert(from);
        buses.insert(to);
    }
    Ok(buses)
}

/// Merge overlapping regions into mutually disjoint sets.
///
/// Any two regions sharing a branch are unioned, repeatedly, until all
/// pairwise intersections are empty. If more than `max_regions` disjoint
/// sets remain, the two smallest are merged until the bound holds. The
/// result is sorted by smallest branch id for reproducibility.
pub fn disjointify(
    regions: Vec<HashSet<BranchId>>,
    max_regions: usize,
) -> Vec<HashSet<BranchId>> {
    let mut merged: Vec<HashSet<BranchId>> = Vec::new();
    for region in regions.into_iter().filter(|r| !r.is_empty()) {
        let mut current = region;
        loop {
            match merged.iter().position(|r| !r.is_disjoint(&current)) {
                Some(pos) => {
                    let overlapping = merged.swap_remove(pos);
                    current.extend(overlapping);
                }
                None => break,
            }
        }
        merged.push(current);
    }

    while merged.len() > max_regions.max(1) {
        merged.sort_by_key(|r| r.len());
        let smallest = merged.remove(0);
        merged[0].extend(smallest);
    }

    merged.sort_by_key(|r| r.iter().min().copied());
    merged
}
