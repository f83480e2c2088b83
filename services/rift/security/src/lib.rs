//! Packet authentication for RIFT.
//!
//! This crate provides:
//! - Keyed fingerprints over message parts (`sha-*` and `hmac-sha-*`)
//! - Key tables and the interface-over-node key selection rule
//! - Interface nonces and the reflection window used against replays
//! - Outer and origin envelope verification with named counters
//!
//! Verification is fail-closed: every rejection maps to exactly one
//! [`AuthCounter`] and the caller drops the packet.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod counters;
pub mod error;
pub mod key;
pub mod nonce;
pub mod verify;

// Re-export main types
pub use counters::{AuthCounter, AuthCounters};
pub use error::SecurityError;
pub use key::{Algorithm, Key, KeySelection, KeyStore};
pub use nonce::NonceState;
pub use verify::{origin_envelope, seal, verify_nonce, verify_origin, verify_outer, Layer};
