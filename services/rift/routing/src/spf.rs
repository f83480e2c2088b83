//! Shortest path first computation over the TIE database.
//!
//! Each run is a Dijkstra over node vertices (edges from Node TIEs) and
//! prefix vertices (attached to their originators by prefix-family TIEs).
//! Equal-cost paths are merged: a vertex keeps one cost together with the
//! union of every predecessor and direct next hop reaching it at that cost.

use crate::next_hop::{HopSet, NextHop};
use rift_topology::{NeighborDirection, TieDatabase};
use rift_wire::{
    IpPrefix, NodeTieElement, SystemId, TieDirection, TieType, INFINITE_DISTANCE,
};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet, BinaryHeap};
use std::fmt;
use std::net::IpAddr;
use tracing::debug;

/// Which tree an SPF run computes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum SpfDirection {
    /// Reachability towards the leaves
    South,
    /// Default-route reachability towards the top of the fabric
    North,
    /// South reachability through same-level peers
    EastWest,
}

impl SpfDirection {
    /// Whether an own adjacency in `direction` is a first hop of this run
    pub fn first_hop(&self, direction: NeighborDirection) -> bool {
        match self {
            SpfDirection::South => direction == NeighborDirection::South,
            SpfDirection::North => direction == NeighborDirection::North,
            SpfDirection::EastWest => direction != NeighborDirection::North,
        }
    }

    fn goes_south(&self) -> bool {
        !matches!(self, SpfDirection::North)
    }

    // Node TIE direction consulted first when walking away from a vertex
    fn node_tie_direction(&self) -> TieDirection {
        if self.goes_south() {
            TieDirection::North
        } else {
            TieDirection::South
        }
    }

    fn prefix_sources(&self) -> (TieDirection, &'static [TieType]) {
        if self.goes_south() {
            (
                TieDirection::North,
                &[TieType::Prefix, TieType::TransitivePrefix],
            )
        } else {
            (
                TieDirection::South,
                &[
                    TieType::Prefix,
                    TieType::PositiveDisaggregationPrefix,
                    TieType::NegativeDisaggregationPrefix,
                ],
            )
        }
    }
}

impl fmt::Display for SpfDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SpfDirection::South => write!(f, "South"),
            SpfDirection::North => write!(f, "North"),
            SpfDirection::EastWest => write!(f, "East-West"),
        }
    }
}

/// An own three-way adjacency as seen by SPF
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LocalAdjacency {
    /// Neighbor system ID
    pub neighbor: SystemId,
    /// Local interface name
    pub interface: String,
    /// Neighbor address, when known
    pub address: Option<IpAddr>,
    /// Direction of the neighbor
    pub direction: NeighborDirection,
    /// Link cost
    pub cost: u32,
}

impl LocalAdjacency {
    /// The next hop through this adjacency
    pub fn next_hop(&self) -> NextHop {
        NextHop::new(self.interface.clone(), self.neighbor).with_address(self.address)
    }
}

/// A vertex of an SPF tree
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpfVertex {
    /// Best known cost
    pub cost: u32,
    /// Every predecessor reaching the vertex at `cost`
    pub predecessors: BTreeSet<SystemId>,
    /// Every direct next hop reaching the vertex at `cost`
    pub next_hops: BTreeSet<NextHop>,
}

impl SpfVertex {
    fn root() -> Self {
        Self {
            cost: 0,
            predecessors: BTreeSet::new(),
            next_hops: BTreeSet::new(),
        }
    }

    /// Whether the vertex can be forwarded to
    pub fn is_reachable(&self) -> bool {
        self.cost < INFINITE_DISTANCE && !self.next_hops.is_empty()
    }

    /// The next hops with their cost
    pub fn hop_set(&self) -> HopSet {
        HopSet {
            hops: self.next_hops.clone(),
            cost: self.cost,
        }
    }

    // Equal-cost paths join the vertex, a cheaper one replaces it. Returns
    // whether the cost went down and the vertex has to be (re)queued.
    fn merge(
        &mut self,
        cost: u32,
        predecessor: SystemId,
        next_hops: &BTreeSet<NextHop>,
    ) -> bool {
        if cost > self.cost {
            return false;
        }
        let lowered = cost < self.cost;
        if lowered {
            self.predecessors.clear();
        }
        self.predecessors.insert(predecessor);

        let mut hops = HopSet {
            hops: std::mem::take(&mut self.next_hops),
            cost: self.cost,
        };
        hops.offer(cost, next_hops.iter().cloned());
        self.cost = hops.cost;
        self.next_hops = hops.hops;
        lowered
    }
}

/// Result of one SPF run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpfTree {
    /// Direction of the run
    pub direction: SpfDirection,
    /// Node vertices, the computing node included at cost 0
    pub nodes: BTreeMap<SystemId, SpfVertex>,
    /// Prefix vertices
    pub prefixes: BTreeMap<IpPrefix, SpfVertex>,
}

impl SpfTree {
    /// Empty tree
    pub fn new(direction: SpfDirection) -> Self {
        Self {
            direction,
            nodes: BTreeMap::new(),
            prefixes: BTreeMap::new(),
        }
    }

    /// Whether `prefix` is reachable in this tree
    pub fn reaches(&self, prefix: &IpPrefix) -> bool {
        self.prefixes
            .get(prefix)
            .map_or(false, SpfVertex::is_reachable)
    }
}

/// Compute the tree rooted at `system_id` in `direction`
pub fn compute_spf(
    db: &TieDatabase,
    system_id: SystemId,
    adjacencies: &[LocalAdjacency],
    direction: SpfDirection,
) -> SpfTree {
    let mut tree = SpfTree::new(direction);
    let mut done: BTreeSet<SystemId> = BTreeSet::new();
    let mut candidates = BinaryHeap::new();

    tree.nodes.insert(system_id, SpfVertex::root());
    candidates.push(Reverse((0u32, system_id)));

    // Prefix vertices are leaves of the tree and never queued
    while let Some(Reverse((cost, node))) = candidates.pop() {
        if !done.insert(node) {
            continue;
        }

        if node == system_id {
            for adjacency in adjacencies
                .iter()
                .filter(|adjacency| direction.first_hop(adjacency.direction))
            {
                let hops = BTreeSet::from([adjacency.next_hop()]);
                let cost = cost.saturating_add(adjacency.cost.max(1));
                relax_node(&mut tree, &mut candidates, adjacency.neighbor, cost, node, &hops);
            }
            continue;
        }

        let hops = match tree.nodes.get(&node) {
            Some(vertex) => vertex.next_hops.clone(),
            None => continue,
        };
        for (neighbor, link_cost) in edges(db, node, direction) {
            let cost = cost.saturating_add(link_cost.max(1));
            relax_node(&mut tree, &mut candidates, neighbor, cost, node, &hops);
        }
        for (prefix, metric) in prefixes(db, node, direction) {
            let cost = cost.saturating_add(metric).min(INFINITE_DISTANCE);
            let vertex = tree.prefixes.entry(prefix).or_insert_with(|| SpfVertex {
                cost: u32::MAX,
                predecessors: BTreeSet::new(),
                next_hops: BTreeSet::new(),
            });
            vertex.merge(cost, node, &hops);
        }
    }

    debug!(
        component = "rift-spf",
        "{} SPF from {}: {} nodes, {} prefixes",
        direction,
        system_id,
        tree.nodes.len(),
        tree.prefixes.len()
    );
    tree
}

fn relax_node(
    tree: &mut SpfTree,
    candidates: &mut BinaryHeap<Reverse<(u32, SystemId)>>,
    node: SystemId,
    cost: u32,
    predecessor: SystemId,
    hops: &BTreeSet<NextHop>,
) {
    let vertex = tree.nodes.entry(node).or_insert_with(|| SpfVertex {
        cost: u32::MAX,
        predecessors: BTreeSet::new(),
        next_hops: BTreeSet::new(),
    });
    if vertex.merge(cost, predecessor, hops) {
        candidates.push(Reverse((cost, node)));
    }
}

/// Node elements of `system_id`, preferring `preferred` and falling back to
/// the other direction when the preferred one has none
fn node_elements(
    db: &TieDatabase,
    system_id: SystemId,
    preferred: TieDirection,
) -> Vec<&NodeTieElement> {
    let elements = node_elements_in(db, system_id, preferred);
    if !elements.is_empty() {
        return elements;
    }
    let fallback = match preferred {
        TieDirection::North => TieDirection::South,
        TieDirection::South => TieDirection::North,
    };
    node_elements_in(db, system_id, fallback)
}

fn node_elements_in(
    db: &TieDatabase,
    system_id: SystemId,
    direction: TieDirection,
) -> Vec<&NodeTieElement> {
    db.of_type(direction, system_id, TieType::Node)
        .filter_map(|tie| tie.packet.element.as_node())
        .collect()
}

// Neighbors one level further in the direction of the run, bidirectionally
// confirmed by the neighbor's own node TIE
fn edges(db: &TieDatabase, node: SystemId, direction: SpfDirection) -> Vec<(SystemId, u32)> {
    let tie_direction = direction.node_tie_direction();
    let mut edges = Vec::new();
    for element in node_elements(db, node, tie_direction) {
        for (neighbor, attributes) in &element.neighbors {
            let onward = if direction.goes_south() {
                attributes.level < element.level
            } else {
                attributes.level > element.level
            };
            if !onward {
                continue;
            }
            let confirmed = node_elements(db, *neighbor, tie_direction)
                .iter()
                .any(|back| back.neighbors.contains_key(&node));
            if confirmed {
                edges.push((*neighbor, attributes.cost));
            }
        }
    }
    edges
}

fn prefixes(db: &TieDatabase, node: SystemId, direction: SpfDirection) -> Vec<(IpPrefix, u32)> {
    let (tie_direction, types) = direction.prefix_sources();
    types
        .iter()
        .flat_map(|tie_type| db.of_type(tie_direction, node, *tie_type))
        .filter_map(|tie| tie.packet.element.as_prefixes())
        .flat_map(|element| {
            element
                .prefixes
                .iter()
                .map(|(prefix, attributes)| (*prefix, attributes.metric))
        })
        .collect()
}
