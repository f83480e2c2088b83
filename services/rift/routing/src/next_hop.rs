//! Next hop definitions and utilities

use rift_wire::SystemId;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::net::IpAddr;

/// A direct next hop: the local interface and the neighbor behind it
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct NextHop {
    /// Local interface name
    pub interface: String,
    /// Neighbor address on that interface, when known
    pub address: Option<IpAddr>,
    /// Neighbor system ID
    pub neighbor: SystemId,
}

impl NextHop {
    /// Create a new next hop
    pub fn new(interface: impl Into<String>, neighbor: SystemId) -> Self {
        Self {
            interface: interface.into(),
            address: None,
            neighbor,
        }
    }

    /// Set the neighbor address
    pub fn with_address(mut self, address: Option<IpAddr>) -> Self {
        self.address = address;
        self
    }
}

impl fmt::Display for NextHop {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.address {
            Some(address) => write!(f, "{} {}", self.interface, address),
            None => write!(f, "{}", self.interface),
        }
    }
}

/// A set of equal-cost next hops
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HopSet {
    /// Next hops sharing the cost
    pub hops: BTreeSet<NextHop>,
    /// The cost of these hops
    pub cost: u32,
}

impl HopSet {
    /// Offer hops at `cost`: a lower cost replaces the set, an equal cost
    /// joins it, a higher cost is ignored. Returns whether the set changed.
    pub fn offer(&mut self, cost: u32, hops: impl IntoIterator<Item = NextHop>) -> bool {
        if cost < self.cost {
            self.cost = cost;
            self.hops = hops.into_iter().collect();
            true
        } else if cost == self.cost {
            let before = self.hops.len();
            self.hops.extend(hops);
            self.hops.len() != before
        } else {
            false
        }
    }

    /// Remove every hop present in `other`
    pub fn without(&self, other: &BTreeSet<NextHop>) -> HopSet {
        HopSet {
            hops: self.hops.difference(other).cloned().collect(),
            cost: self.cost,
        }
    }

    /// Check if the set is empty
    pub fn is_empty(&self) -> bool {
        self.hops.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hops(set: &HopSet) -> Vec<SystemId> {
        set.hops.iter().map(|hop| hop.neighbor).collect()
    }

    #[test]
    fn test_next_hop_creation() {
        let hop = NextHop::new("if1", 1001);
        assert_eq!(hop.neighbor, 1001);
        assert_eq!(hop.address, None);
        assert_eq!(hop.to_string(), "if1");

        let address: IpAddr = "10.0.0.2".parse().unwrap();
        let hop = NextHop::new("if2", 2002).with_address(Some(address));
        assert_eq!(hop.to_string(), "if2 10.0.0.2");
    }

    #[test]
    fn test_hop_set_offer() {
        let mut set = HopSet {
            hops: BTreeSet::from([NextHop::new("if1", 1)]),
            cost: 10,
        };

        assert!(set.offer(10, [NextHop::new("if2", 2)]));
        assert_eq!(hops(&set), vec![1, 2]);
        assert!(!set.offer(10, [NextHop::new("if2", 2)]));

        assert!(!set.offer(15, [NextHop::new("if3", 3)]));
        assert_eq!(hops(&set), vec![1, 2]);

        assert!(set.offer(5, [NextHop::new("if4", 4)]));
        assert_eq!(set.cost, 5);
        assert_eq!(hops(&set), vec![4]);
    }

    #[test]
    fn test_hop_set_without() {
        let set = HopSet {
            hops: BTreeSet::from([NextHop::new("if1", 1), NextHop::new("if2", 2)]),
            cost: 3,
        };
        let negative = BTreeSet::from([NextHop::new("if1", 1)]);
        let left = set.without(&negative);
        assert_eq!(hops(&left), vec![2]);
        assert_eq!(left.cost, 3);
        assert!(set.without(&set.hops).is_empty());
    }
}
