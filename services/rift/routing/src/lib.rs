//! Shortest path first computation, negative disaggregation and the RIB for RIFT.
//!
//! This crate turns the TIE database into routes: south, north and
//! east-west SPF trees with equal-cost multipath, fallen-leaf detection and
//! negative disaggregation, and a routing information base that is rebuilt
//! wholesale on every computation.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod disaggregation;
pub mod next_hop;
pub mod router;
pub mod spf;
pub mod table;

pub use disaggregation::{fallen_leaves, negative_next_hops, transitive_negatives};
pub use next_hop::{HopSet, NextHop};
pub use router::{compute_routes, RouteComputation, RoutingContext};
pub use spf::{compute_spf, LocalAdjacency, SpfDirection, SpfTree, SpfVertex};
pub use table::{Rib, RibInputs, Route, RouteOwner};
