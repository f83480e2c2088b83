//! Interface nonces.
//!
//! Each interface advertises a local nonce in every envelope and reflects the
//! last nonce it received from the neighbor. A reflection is valid while it
//! trails the current local nonce by at most
//! [`MAXIMUM_VALID_NONCE_DELTA`] refreshes.

use rift_wire::{MAXIMUM_VALID_NONCE_DELTA, UNDEFINED_NONCE};
use serde::Serialize;

/// Nonce bookkeeping for one interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NonceState {
    local: u16,
    remote: u16,
}

impl NonceState {
    /// Start from a seed; 0 is skipped
    pub fn new(seed: u16) -> Self {
        Self {
            local: if seed == UNDEFINED_NONCE { 1 } else { seed },
            remote: UNDEFINED_NONCE,
        }
    }

    /// Current local nonce
    pub fn local(&self) -> u16 {
        self.local
    }

    /// Last nonce received from the neighbor
    pub fn remote(&self) -> u16 {
        self.remote
    }

    /// Advance the local nonce, never taking the undefined value
    pub fn refresh(&mut self) {
        self.local = self.local.wrapping_add(1);
        if self.local == UNDEFINED_NONCE {
            self.local = 1;
        }
    }

    /// Remember the neighbor's nonce from an accepted packet
    pub fn record_remote(&mut self, nonce: u16) {
        self.remote = nonce;
    }

    /// Forget the neighbor's nonce
    pub fn clear_remote(&mut self) {
        self.remote = UNDEFINED_NONCE;
    }

    /// Whether a reflected nonce is within the valid window
    pub fn is_valid_reflection(&self, reflected: u16) -> bool {
        if reflected == UNDEFINED_NONCE {
            return false;
        }
        self.local.wrapping_sub(reflected) <= MAXIMUM_VALID_NONCE_DELTA
    }
}
