//! One complete route computation: all SPF runs, disaggregation and the RIB

use crate::disaggregation::{fallen_leaves, negative_next_hops, transitive_negatives};
use crate::spf::{compute_spf, LocalAdjacency, SpfDirection, SpfTree};
use crate::table::{Rib, RibInputs};
use rift_topology::{NeighborDirection, TieDatabase};
use rift_wire::{IpPrefix, SystemId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::info;

/// What a route computation needs to know about the computing node
#[derive(Debug, Clone, Copy)]
pub struct RoutingContext<'a> {
    /// Computing node
    pub system_id: SystemId,
    /// Whether the node is a leaf
    pub leaf: bool,
    /// Whether the node is top of fabric
    pub top_of_fabric: bool,
    /// Own three-way adjacencies
    pub adjacencies: &'a [LocalAdjacency],
}

/// Result of a route computation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteComputation {
    /// South SPF tree
    pub south: SpfTree,
    /// North SPF tree
    pub north: SpfTree,
    /// East-west SPF tree, computed on top-of-fabric nodes with peers
    pub east_west: Option<SpfTree>,
    /// Fallen leaves found by the east-west run
    pub fallen_leaves: BTreeSet<IpPrefix>,
    /// Prefixes this node has to negatively disaggregate
    pub negative_disaggregation: BTreeSet<IpPrefix>,
    /// The new RIB
    pub rib: Rib,
}

/// Run every SPF and build the RIB. The result is complete or not produced
/// at all; callers swap it in as a whole.
pub fn compute_routes(db: &TieDatabase, ctx: RoutingContext<'_>) -> RouteComputation {
    let south = compute_spf(db, ctx.system_id, ctx.adjacencies, SpfDirection::South);
    let north = compute_spf(db, ctx.system_id, ctx.adjacencies, SpfDirection::North);

    let peers: BTreeSet<SystemId> = ctx
        .adjacencies
        .iter()
        .filter(|adjacency| adjacency.direction == NeighborDirection::EastWest)
        .map(|adjacency| adjacency.neighbor)
        .collect();
    let east_west = (ctx.top_of_fabric && !peers.is_empty()).then(|| {
        compute_spf(db, ctx.system_id, ctx.adjacencies, SpfDirection::EastWest)
    });
    let fallen = east_west
        .as_ref()
        .map(|east_west| fallen_leaves(&south, east_west, &peers))
        .unwrap_or_default();

    let negative_hops = negative_next_hops(db, ctx.adjacencies);
    let mut negative_disaggregation = fallen.clone();
    if !ctx.leaf {
        negative_disaggregation.extend(transitive_negatives(&north, &negative_hops));
    }

    let rib = Rib::build(RibInputs {
        south: &south,
        north: &north,
        east_west: east_west.as_ref(),
        fallen_leaves: &fallen,
        negative_hops: &negative_hops,
    });

    info!(
        component = "rift-spf",
        "SPF for {}: south {} prefixes, north {} prefixes, {} fallen leaves, {} routes",
        ctx.system_id,
        south.prefixes.len(),
        north.prefixes.len(),
        fallen.len(),
        rib.len()
    );

    RouteComputation {
        south,
        north,
        east_west,
        fallen_leaves: fallen,
        negative_disaggregation,
        rib,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::next_hop::NextHop;
    use crate::spf::tests::{adjacency, node, prefix};
    use crate::table::RouteOwner;
    use rift_wire::{TieDirection, TieType, INFINITE_DISTANCE};

    #[test]
    fn test_leaf_follows_default_route() {
        let mut db = TieDatabase::default();
        node(&mut db, 1, 0, &[(10, 1, 1), (11, 1, 1)]);
        node(&mut db, 10, 1, &[(1, 0, 1)]);
        node(&mut db, 11, 1, &[(1, 0, 1)]);
        prefix(&mut db, TieDirection::South, 10, TieType::Prefix, &[("0.0.0.0/0", 1)]);
        prefix(&mut db, TieDirection::South, 11, TieType::Prefix, &[("0.0.0.0/0", 1)]);
        let adjacencies = vec![
            adjacency(10, "if-10", NeighborDirection::North),
            adjacency(11, "if-11", NeighborDirection::North),
        ];

        let result = compute_routes(
            &db,
            RoutingContext {
                system_id: 1,
                leaf: true,
                top_of_fabric: false,
                adjacencies: &adjacencies,
            },
        );
        assert!(result.east_west.is_none());
        let route = result.rib.lookup("192.0.2.1".parse().unwrap()).unwrap();
        assert_eq!(route.owner, RouteOwner::NorthSpf);
        assert_eq!(route.next_hops.len(), 2);
    }

    #[test]
    fn test_spine_passes_negative_disaggregation_on() {
        let mut db = TieDatabase::default();
        node(&mut db, 10, 1, &[(100, 24, 1), (101, 24, 1)]);
        node(&mut db, 100, 24, &[(10, 1, 1)]);
        node(&mut db, 101, 24, &[(10, 1, 1)]);
        for tof in [100, 101] {
            prefix(&mut db, TieDirection::South, tof, TieType::Prefix, &[("0.0.0.0/0", 1)]);
            prefix(
                &mut db,
                TieDirection::South,
                tof,
                TieType::NegativeDisaggregationPrefix,
                &[("10.0.2.0/24", INFINITE_DISTANCE)],
            );
        }
        let adjacencies = vec![
            adjacency(100, "if-100", NeighborDirection::North),
            adjacency(101, "if-101", NeighborDirection::North),
        ];

        let result = compute_routes(
            &db,
            RoutingContext {
                system_id: 10,
                leaf: false,
                top_of_fabric: false,
                adjacencies: &adjacencies,
            },
        );
        let prefix: IpPrefix = "10.0.2.0/24".parse().unwrap();
        assert_eq!(result.negative_disaggregation, BTreeSet::from([prefix]));
        let route = result.rib.get(&prefix).unwrap();
        assert!(route.negative);
        assert_eq!(route.cost, INFINITE_DISTANCE);
        assert_eq!(result.north.prefixes[&prefix].cost, INFINITE_DISTANCE);
        assert!(result
            .rib
            .get(&IpPrefix::default_v4())
            .unwrap()
            .next_hops
            .contains(&NextHop::new("if-100", 100)));

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["rib"]["routes"]["10.0.2.0/24"]["negative"], true);
        assert_eq!(json["north"]["direction"], "North");
    }
}
