//! Negative disaggregation.
//!
//! A top-of-fabric node that reaches a prefix only through its east-west
//! peers has a fallen leaf and advertises the prefix south with an infinite
//! metric. Nodes below stop using the advertising neighbor for that prefix,
//! and a node whose every default-route next hop advertises it passes the
//! negative disaggregation further south.

use crate::next_hop::NextHop;
use crate::spf::{LocalAdjacency, SpfTree};
use rift_topology::{NeighborDirection, TieDatabase};
use rift_wire::{IpPrefix, SystemId, TieDirection, TieType};
use std::collections::{BTreeMap, BTreeSet};

/// Prefixes reachable in the east-west tree but not in the south tree.
/// Prefixes originated by the east-west peers themselves are skipped.
pub fn fallen_leaves(
    south: &SpfTree,
    east_west: &SpfTree,
    peers: &BTreeSet<SystemId>,
) -> BTreeSet<IpPrefix> {
    east_west
        .prefixes
        .iter()
        .filter(|(prefix, vertex)| {
            vertex.is_reachable()
                && !south.reaches(prefix)
                && !vertex.predecessors.is_subset(peers)
        })
        .map(|(prefix, _)| *prefix)
        .collect()
}

/// Next hops through north neighbors that negatively disaggregate each
/// prefix. Only the neighbors' own negative disaggregation TIEs count.
pub fn negative_next_hops(
    db: &TieDatabase,
    adjacencies: &[LocalAdjacency],
) -> BTreeMap<IpPrefix, BTreeSet<NextHop>> {
    let mut negative: BTreeMap<IpPrefix, BTreeSet<NextHop>> = BTreeMap::new();
    for adjacency in adjacencies
        .iter()
        .filter(|adjacency| adjacency.direction == NeighborDirection::North)
    {
        let ties = db.of_type(
            TieDirection::South,
            adjacency.neighbor,
            TieType::NegativeDisaggregationPrefix,
        );
        for element in ties.filter_map(|tie| tie.packet.element.as_prefixes()) {
            for prefix in element.prefixes.keys() {
                negative
                    .entry(*prefix)
                    .or_default()
                    .insert(adjacency.next_hop());
            }
        }
    }
    negative
}

/// Prefixes for which every next hop of the covering north route is a
/// negative next hop
pub fn transitive_negatives(
    north: &SpfTree,
    negative_hops: &BTreeMap<IpPrefix, BTreeSet<NextHop>>,
) -> BTreeSet<IpPrefix> {
    negative_hops
        .iter()
        .filter(|(prefix, negative)| {
            covering_hops(north, prefix)
                .map_or(false, |hops| !hops.is_empty() && hops.is_subset(negative))
        })
        .map(|(prefix, _)| *prefix)
        .collect()
}

fn covering_hops<'a>(north: &'a SpfTree, prefix: &IpPrefix) -> Option<&'a BTreeSet<NextHop>> {
    north
        .prefixes
        .iter()
        .filter(|(candidate, vertex)| {
            vertex.is_reachable()
                && candidate.prefix_len() < prefix.prefix_len()
                && candidate.covers(prefix)
        })
        .max_by_key(|(candidate, _)| candidate.prefix_len())
        .map(|(_, vertex)| &vertex.next_hops)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spf::tests::{adjacency, node, prefix};
    use crate::spf::{compute_spf, SpfDirection};

    // ToF 100 with spine 10 south (lost leaf 2) and east-west peer 101
    // whose spine 11 still reaches leaf 2
    fn fallen_view() -> (TieDatabase, Vec<LocalAdjacency>) {
        let mut db = TieDatabase::default();
        node(&mut db, 100, 24, &[(10, 1, 1), (101, 24, 1)]);
        node(&mut db, 101, 24, &[(11, 1, 1), (100, 24, 1)]);
        node(&mut db, 10, 1, &[(1, 0, 1), (100, 24, 1)]);
        node(&mut db, 11, 1, &[(1, 0, 1), (2, 0, 1), (101, 24, 1)]);
        node(&mut db, 1, 0, &[(10, 1, 1), (11, 1, 1)]);
        node(&mut db, 2, 0, &[(11, 1, 1)]);
        prefix(&mut db, TieDirection::North, 1, TieType::Prefix, &[("10.0.1.0/24", 1)]);
        prefix(&mut db, TieDirection::North, 2, TieType::Prefix, &[("10.0.2.0/24", 1)]);
        prefix(&mut db, TieDirection::North, 101, TieType::Prefix, &[("10.9.9.9/32", 1)]);
        let adjacencies = vec![
            adjacency(10, "if-10", NeighborDirection::South),
            adjacency(101, "if-101", NeighborDirection::EastWest),
        ];
        (db, adjacencies)
    }

    #[test]
    fn test_fallen_leaves() {
        let (db, adjacencies) = fallen_view();
        let south = compute_spf(&db, 100, &adjacencies, SpfDirection::South);
        let east_west = compute_spf(&db, 100, &adjacencies, SpfDirection::EastWest);

        assert!(!south.nodes.contains_key(&2));
        let leaf = &east_west.prefixes[&"10.0.2.0/24".parse().unwrap()];
        assert_eq!(leaf.cost, 4);
        assert_eq!(leaf.next_hops, BTreeSet::from([NextHop::new("if-101", 101)]));

        let fallen = fallen_leaves(&south, &east_west, &BTreeSet::from([101]));
        assert_eq!(fallen, BTreeSet::from(["10.0.2.0/24".parse().unwrap()]));
    }

    #[test]
    fn test_negative_next_hops_from_north_neighbors_only() {
        let mut db = TieDatabase::default();
        let negative = [("10.0.2.0/24", rift_wire::INFINITE_DISTANCE)];
        prefix(&mut db, TieDirection::South, 100, TieType::NegativeDisaggregationPrefix, &negative);
        prefix(&mut db, TieDirection::South, 200, TieType::NegativeDisaggregationPrefix, &negative);
        let adjacencies = vec![
            adjacency(100, "if-100", NeighborDirection::North),
            adjacency(101, "if-101", NeighborDirection::North),
            adjacency(1, "if-1", NeighborDirection::South),
        ];

        let hops = negative_next_hops(&db, &adjacencies);
        assert_eq!(hops.len(), 1);
        assert_eq!(
            hops[&"10.0.2.0/24".parse().unwrap()],
            BTreeSet::from([NextHop::new("if-100", 100)])
        );
    }

    #[test]
    fn test_transitive_negatives() {
        let mut north = SpfTree::new(SpfDirection::North);
        north.prefixes.insert(
            IpPrefix::default_v4(),
            crate::spf::SpfVertex {
                cost: 2,
                predecessors: BTreeSet::from([100, 101]),
                next_hops: BTreeSet::from([NextHop::new("if-100", 100), NextHop::new("if-101", 101)]),
            },
        );
        let partial = BTreeMap::from([(
            "10.0.2.0/24".parse().unwrap(),
            BTreeSet::from([NextHop::new("if-100", 100)]),
        )]);
        assert!(transitive_negatives(&north, &partial).is_empty());

        let all = BTreeMap::from([(
            "10.0.2.0/24".parse().unwrap(),
            BTreeSet::from([NextHop::new("if-100", 100), NextHop::new("if-101", 101)]),
        )]);
        assert_eq!(transitive_negatives(&north, &all).len(), 1);
    }
}
