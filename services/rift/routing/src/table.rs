//! Routing information base built from SPF results

use crate::next_hop::{HopSet, NextHop};
use crate::spf::SpfTree;
use rift_wire::{IpPrefix, INFINITE_DISTANCE};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::net::IpAddr;
use tracing::debug;

/// SPF run a route comes from
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum RouteOwner {
    /// South or east-west SPF
    SouthSpf,
    /// North SPF
    NorthSpf,
}

impl fmt::Display for RouteOwner {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RouteOwner::SouthSpf => write!(f, "South SPF"),
            RouteOwner::NorthSpf => write!(f, "North SPF"),
        }
    }
}

/// One RIB entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Route {
    /// Destination prefix
    pub prefix: IpPrefix,
    /// SPF run the route comes from
    pub owner: RouteOwner,
    /// Cost of the route
    pub cost: u32,
    /// Equal-cost next hops
    pub next_hops: BTreeSet<NextHop>,
    /// Negatively disaggregated with no next hop left
    pub negative: bool,
}

impl Route {
    fn from_hops(prefix: IpPrefix, owner: RouteOwner, hops: HopSet) -> Self {
        Self {
            prefix,
            owner,
            cost: hops.cost,
            next_hops: hops.hops,
            negative: false,
        }
    }

    fn unreachable(prefix: IpPrefix) -> Self {
        Self {
            prefix,
            owner: RouteOwner::NorthSpf,
            cost: INFINITE_DISTANCE,
            next_hops: BTreeSet::new(),
            negative: true,
        }
    }

    /// Whether traffic to the prefix can be forwarded
    pub fn is_reachable(&self) -> bool {
        !self.negative && !self.next_hops.is_empty()
    }
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negative {
            return write!(f, "{} [{}] Negative", self.prefix, self.owner);
        }
        let hops: Vec<String> = self.next_hops.iter().map(ToString::to_string).collect();
        write!(
            f,
            "{} [{}] cost {} via {}",
            self.prefix,
            self.owner,
            self.cost,
            hops.join(", ")
        )
    }
}

/// Inputs of a RIB build
#[derive(Debug, Clone, Copy)]
pub struct RibInputs<'a> {
    /// South SPF tree
    pub south: &'a SpfTree,
    /// North SPF tree
    pub north: &'a SpfTree,
    /// East-west SPF tree, when computed
    pub east_west: Option<&'a SpfTree>,
    /// Prefixes installed through the east-west tree
    pub fallen_leaves: &'a BTreeSet<IpPrefix>,
    /// Next hops negatively disaggregating each prefix
    pub negative_hops: &'a BTreeMap<IpPrefix, BTreeSet<NextHop>>,
}

/// Routing information base
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rib {
    routes: BTreeMap<IpPrefix, Route>,
}

impl Rib {
    /// Create an empty RIB
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a complete RIB. South SPF routes win over north SPF routes for
    /// the same prefix; fallen leaves are routed through the east-west tree;
    /// a negatively disaggregated prefix without a south route gets the
    /// covering route's next hops minus the negative ones.
    pub fn build(inputs: RibInputs<'_>) -> Self {
        let mut routes = BTreeMap::new();

        let reachable = |tree: &SpfTree| -> Vec<(IpPrefix, HopSet)> {
            tree.prefixes
                .iter()
                .filter(|(_, vertex)| vertex.is_reachable())
                .map(|(prefix, vertex)| (*prefix, vertex.hop_set()))
                .collect()
        };

        for (prefix, hops) in reachable(inputs.north) {
            routes.insert(prefix, Route::from_hops(prefix, RouteOwner::NorthSpf, hops));
        }
        for (prefix, hops) in reachable(inputs.south) {
            routes.insert(prefix, Route::from_hops(prefix, RouteOwner::SouthSpf, hops));
        }
        if let Some(east_west) = inputs.east_west {
            for (prefix, hops) in reachable(east_west) {
                if inputs.fallen_leaves.contains(&prefix) && !inputs.south.reaches(&prefix) {
                    routes.insert(prefix, Route::from_hops(prefix, RouteOwner::SouthSpf, hops));
                }
            }
        }

        let mut rib = Rib { routes };
        // Covering prefixes sort before the prefixes they cover, so nested
        // negative entries see the already adjusted covering route
        for (prefix, negative) in inputs.negative_hops {
            let base = match rib.routes.get(prefix) {
                Some(route) if route.owner == RouteOwner::SouthSpf => continue,
                Some(route) if route.is_reachable() => Some(route),
                _ => rib.covering(prefix),
            };
            let route = match base {
                Some(base) => {
                    let hops = HopSet {
                        hops: base.next_hops.clone(),
                        cost: base.cost,
                    }
                    .without(negative);
                    if hops.is_empty() {
                        Route::unreachable(*prefix)
                    } else {
                        Route::from_hops(*prefix, RouteOwner::NorthSpf, hops)
                    }
                }
                None => Route::unreachable(*prefix),
            };
            debug!(component = "rift-spf", "Negative disaggregation: {}", route);
            rib.routes.insert(*prefix, route);
        }
        rib
    }

    /// Route for exactly `prefix`
    pub fn get(&self, prefix: &IpPrefix) -> Option<&Route> {
        self.routes.get(prefix)
    }

    /// Longest prefix match for `address`
    pub fn lookup(&self, address: IpAddr) -> Option<&Route> {
        self.routes
            .values()
            .filter(|route| route.prefix.contains(address))
            .max_by_key(|route| route.prefix.prefix_len())
    }

    /// Most specific reachable route strictly covering `prefix`
    pub fn covering(&self, prefix: &IpPrefix) -> Option<&Route> {
        self.routes
            .values()
            .filter(|route| {
                route.is_reachable()
                    && route.prefix.prefix_len() < prefix.prefix_len()
                    && route.prefix.covers(prefix)
            })
            .max_by_key(|route| route.prefix.prefix_len())
    }

    /// All routes in prefix order
    pub fn iter(&self) -> impl Iterator<Item = &Route> {
        self.routes.values()
    }

    /// Number of routes
    pub fn len(&self) -> usize {
        self.routes.len()
    }

    /// Whether the RIB is empty
    pub fn is_empty(&self) -> bool {
        self.routes.is_empty()
    }
}
