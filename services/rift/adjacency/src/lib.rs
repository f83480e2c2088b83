//! Adjacency formation and level derivation for RIFT.
//!
//! This crate provides:
//! - [`LieAdjacency`]: the per-interface LIE state machine (ONE_WAY, TWO_WAY,
//!   THREE_WAY) with the LIE acceptance policy and nonce reflection checks
//! - [`Ztp`]: the per-node zero touch provisioning machine deriving the node
//!   level from the offers its neighbors make
//! - [`Offer`]: the record of one neighbor's offered level
//!
//! Both machines are sans-IO: they consume events and return effects for the
//! owning node to carry out (send a LIE, restart a timer, start flooding).

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod lie;
pub mod offer;
pub mod ztp;

// Re-export main types
pub use lie::{
    LieAction, LieAdjacency, LieEffect, LieEvent, LieMachine, LieRule, LieState, LieVerdict,
    LinkConfig,
    Neighbor, NodeView, ReceivedLie,
};
pub use offer::{Offer, RemovedReason, SentOffer};
pub use ztp::{LevelConfig, Ztp, ZtpAction, ZtpEffect, ZtpEvent, ZtpMachine, ZtpState};
