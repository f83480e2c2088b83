//! Wire protocol error types.

use thiserror::Error;

/// Wire protocol errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    /// Incomplete envelope (packet shorter than its declared fields)
    #[error("incomplete envelope")]
    Incomplete,

    /// Envelope does not start with the RIFT magic
    #[error("bad envelope magic: {0:#06x}")]
    BadMagic(u16),

    /// Unsupported protocol major version
    #[error("major version unsupported: {0}")]
    Version(u8),

    /// Size limit exceeded
    #[error("size limit exceeded: {0}")]
    Size(usize),

    /// Reserved bits nonzero
    #[error("reserved bits nonzero")]
    Reserved,

    /// Fingerprint is not a whole number of 32-bit words or is too long
    #[error("invalid fingerprint length: {0}")]
    FingerprintLength(usize),

    /// Key ID does not fit into its envelope field
    #[error("key id out of range: {0}")]
    KeyIdRange(u32),

    /// Prefix text or length is invalid
    #[error("invalid prefix: {0}")]
    Prefix(String),
}
