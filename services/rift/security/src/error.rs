//! Security error types.

use rift_wire::{KeyId, WireError};
use thiserror::Error;

/// Errors raised while configuring keys or sealing outgoing packets
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecurityError {
    /// Key id is not present in the key table
    #[error("unknown key id {0}")]
    UnknownKey(KeyId),

    /// Algorithm name is not recognised
    #[error("unknown algorithm {0:?}")]
    UnknownAlgorithm(String),

    /// Key id 0 is reserved for "no key"
    #[error("key id 0 is reserved")]
    ReservedKeyId,

    /// Secret cannot be used with the algorithm
    #[error("invalid secret for key {0}")]
    InvalidSecret(KeyId),

    /// Envelope framing failed
    #[error("wire error: {0}")]
    Wire(#[from] WireError),
}
