//! Flooding scope.
//!
//! South TIEs travel to south and east-west neighbors, North TIEs to north
//! neighbors. Top-of-fabric nodes additionally exchange North TIEs over their
//! east-west links so that every plane learns the southern topology of the
//! others.

use rift_wire::{Level, TieDirection, TieId};
use serde::Serialize;
use std::cmp::Ordering;
use std::fmt;

/// Position of a neighbor relative to this node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum NeighborDirection {
    /// Neighbor at a lower level
    South,
    /// Neighbor at a higher level
    North,
    /// Neighbor at the same level
    EastWest,
}

impl NeighborDirection {
    /// Direction of a neighbor at `neighbor` as seen from `local`
    pub fn from_levels(local: Level, neighbor: Level) -> Self {
        match neighbor.cmp(&local) {
            Ordering::Less => NeighborDirection::South,
            Ordering::Greater => NeighborDirection::North,
            Ordering::Equal => NeighborDirection::EastWest,
        }
    }

    /// The same adjacency seen from the neighbor
    pub fn reverse(&self) -> Self {
        match self {
            NeighborDirection::South => NeighborDirection::North,
            NeighborDirection::North => NeighborDirection::South,
            NeighborDirection::EastWest => NeighborDirection::EastWest,
        }
    }
}

impl fmt::Display for NeighborDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            NeighborDirection::South => write!(f, "South"),
            NeighborDirection::North => write!(f, "North"),
            NeighborDirection::EastWest => write!(f, "East-West"),
        }
    }
}

/// Flooding rules for one adjacency
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct FloodScope {
    /// Where the neighbor is
    pub direction: NeighborDirection,
    /// This node is top of fabric
    pub local_tof: bool,
    /// The neighbor is top of fabric
    pub neighbor_tof: bool,
}

impl FloodScope {
    /// Scope for a neighbor at `direction`
    pub fn new(direction: NeighborDirection, local_tof: bool, neighbor_tof: bool) -> Self {
        Self {
            direction,
            local_tof,
            neighbor_tof,
        }
    }

    /// Whether this node may flood `tie_id` to the neighbor
    pub fn may_send(&self, tie_id: &TieId) -> bool {
        allowed(tie_id.direction, self.direction, self.local_tof && self.neighbor_tof)
    }

    /// Whether the neighbor may flood `tie_id` to this node
    pub fn may_receive(&self, tie_id: &TieId) -> bool {
        allowed(
            tie_id.direction,
            self.direction.reverse(),
            self.local_tof && self.neighbor_tof,
        )
    }

    /// Whether `tie_id` is summarized in TIDEs on this adjacency
    pub fn summarizes(&self, tie_id: &TieId) -> bool {
        self.may_send(tie_id) || self.may_receive(tie_id)
    }
}

fn allowed(tie: TieDirection, towards: NeighborDirection, tof_pair: bool) -> bool {
    match (tie, towards) {
        (TieDirection::South, NeighborDirection::South | NeighborDirection::EastWest) => true,
        (TieDirection::North, NeighborDirection::North) => true,
        (TieDirection::North, NeighborDirection::EastWest) => tof_pair,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rift_wire::TieType;

    fn id(direction: TieDirection) -> TieId {
        TieId::new(direction, 7, TieType::Node, 1)
    }

    #[test]
    fn test_direction_from_levels() {
        assert_eq!(NeighborDirection::from_levels(1, 0), NeighborDirection::South);
        assert_eq!(NeighborDirection::from_levels(1, 2), NeighborDirection::North);
        assert_eq!(NeighborDirection::from_levels(2, 2), NeighborDirection::EastWest);
    }

    #[test]
    fn test_south_ties_go_down_and_across() {
        let south = FloodScope::new(NeighborDirection::South, false, false);
        let north = FloodScope::new(NeighborDirection::North, false, false);
        let east_west = FloodScope::new(NeighborDirection::EastWest, false, false);

        assert!(south.may_send(&id(TieDirection::South)));
        assert!(!south.may_send(&id(TieDirection::North)));
        assert!(north.may_send(&id(TieDirection::North)));
        assert!(!north.may_send(&id(TieDirection::South)));
        assert!(east_west.may_send(&id(TieDirection::South)));
        assert!(!east_west.may_send(&id(TieDirection::North)));

        assert!(south.may_receive(&id(TieDirection::North)));
        assert!(north.may_receive(&id(TieDirection::South)));
    }

    #[test]
    fn test_tof_exchange_north_ties() {
        let tof_pair = FloodScope::new(NeighborDirection::EastWest, true, true);
        assert!(tof_pair.may_send(&id(TieDirection::North)));
        assert!(tof_pair.may_receive(&id(TieDirection::North)));

        let half = FloodScope::new(NeighborDirection::EastWest, true, false);
        assert!(!half.may_send(&id(TieDirection::North)));
    }

    #[test]
    fn test_summary_covers_both_directions() {
        let north = FloodScope::new(NeighborDirection::North, false, false);
        assert!(north.summarizes(&id(TieDirection::North)));
        assert!(north.summarizes(&id(TieDirection::South)));
    }
}
