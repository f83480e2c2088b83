//! TIE database, origination and flooding for RIFT.
//!
//! This crate provides the link-state side of the protocol: the per-node
//! database with its dominance and aging rules, the bookkeeping of the
//! node's own TIEs, the flooding scope rules and the per-neighbor flooding
//! state that keeps databases synchronized through TIDEs and TIREs.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod database;
pub mod flooding;
pub mod originate;
pub mod scope;

pub use database::{
    dominance, AgingReport, DatabaseStats, Freshness, StoredTie, TieDatabase,
    DEFAULT_PURGE_GRACE_SECS,
};
pub use flooding::{build_tides, FloodPeer, FloodSnapshot, FloodWork, MAX_TIDE_HEADERS};
pub use originate::{
    node_element, prefix_element, Origination, Originator, NEGATIVE_DISAGGREGATION_TIE_NR,
    NODE_TIE_NR, PREFIX_TIE_NR,
};
pub use scope::{FloodScope, NeighborDirection};
