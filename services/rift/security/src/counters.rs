//! Authentication counters.

use serde::{Serialize, Serializer};
use std::collections::BTreeMap;
use std::fmt;

/// Outcome of one authentication check; every variant is a distinct counter
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum AuthCounter {
    /// Accepted with no outer fingerprint
    EmptyOuterFingerprintAccepts,
    /// Accepted with a verified outer fingerprint
    NonEmptyOuterFingerprintAccepts,
    /// Accepted with no origin fingerprint
    EmptyOriginFingerprintAccepts,
    /// Accepted with a verified origin fingerprint
    NonEmptyOriginFingerprintAccepts,
    /// Datagram did not start with a security envelope
    MissingOuterSecurityEnvelope,
    /// Outer key id 0 while an active key is in effect
    ZeroOuterKeyIdNotAccepted,
    /// Outer key id neither active nor accepted
    NonZeroOuterKeyIdNotAccepted,
    /// Outer fingerprint does not verify
    IncorrectOuterFingerprint,
    /// Outer fingerprint presence or size does not fit the key id
    InconsistentOuterKeyIdAndFingerprint,
    /// TIE without an origin envelope
    MissingOriginSecurityEnvelope,
    /// Origin key id 0 while an active origin key is in effect
    ZeroOriginKeyIdNotAccepted,
    /// Origin key id neither active nor accepted
    NonZeroOriginKeyIdNotAccepted,
    /// Origin fingerprint does not verify
    IncorrectOriginFingerprint,
    /// Origin fingerprint presence or size does not fit the key id
    InconsistentOriginKeyIdAndFingerprint,
    /// Reflected nonce is outside the valid window
    ReflectedNonceOutOfSync,
}

impl AuthCounter {
    /// Every counter in display order
    pub const ALL: [AuthCounter; 15] = [
        AuthCounter::EmptyOuterFingerprintAccepts,
        AuthCounter::NonEmptyOuterFingerprintAccepts,
        AuthCounter::EmptyOriginFingerprintAccepts,
        AuthCounter::NonEmptyOriginFingerprintAccepts,
        AuthCounter::MissingOuterSecurityEnvelope,
        AuthCounter::ZeroOuterKeyIdNotAccepted,
        AuthCounter::NonZeroOuterKeyIdNotAccepted,
        AuthCounter::IncorrectOuterFingerprint,
        AuthCounter::InconsistentOuterKeyIdAndFingerprint,
        AuthCounter::MissingOriginSecurityEnvelope,
        AuthCounter::ZeroOriginKeyIdNotAccepted,
        AuthCounter::NonZeroOriginKeyIdNotAccepted,
        AuthCounter::IncorrectOriginFingerprint,
        AuthCounter::InconsistentOriginKeyIdAndFingerprint,
        AuthCounter::ReflectedNonceOutOfSync,
    ];

    /// Counter name
    pub fn name(&self) -> &'static str {
        match self {
            AuthCounter::EmptyOuterFingerprintAccepts => "empty_outer_fingerprint_accepts",
            AuthCounter::NonEmptyOuterFingerprintAccepts => "non_empty_outer_fingerprint_accepts",
            AuthCounter::EmptyOriginFingerprintAccepts => "empty_origin_fingerprint_accepts",
            AuthCounter::NonEmptyOriginFingerprintAccepts => {
                "non_empty_origin_fingerprint_accepts"
            }
            AuthCounter::MissingOuterSecurityEnvelope => "missing_outer_security_envelope",
            AuthCounter::ZeroOuterKeyIdNotAccepted => "zero_outer_key_id_not_accepted",
            AuthCounter::NonZeroOuterKeyIdNotAccepted => "non_zero_outer_key_id_not_accepted",
            AuthCounter::IncorrectOuterFingerprint => "incorrect_outer_fingerprint",
            AuthCounter::InconsistentOuterKeyIdAndFingerprint => {
                "inconsistent_outer_key_id_and_fingerprint"
            }
            AuthCounter::MissingOriginSecurityEnvelope => "missing_origin_security_envelope",
            AuthCounter::ZeroOriginKeyIdNotAccepted => "zero_origin_key_id_not_accepted",
            AuthCounter::NonZeroOriginKeyIdNotAccepted => "non_zero_origin_key_id_not_accepted",
            AuthCounter::IncorrectOriginFingerprint => "incorrect_origin_fingerprint",
            AuthCounter::InconsistentOriginKeyIdAndFingerprint => {
                "inconsistent_origin_key_id_and_fingerprint"
            }
            AuthCounter::ReflectedNonceOutOfSync => "reflected_nonce_out_of_sync",
        }
    }

    /// Whether this counter records an acceptance
    pub fn is_accept(&self) -> bool {
        matches!(
            self,
            AuthCounter::EmptyOuterFingerprintAccepts
                | AuthCounter::NonEmptyOuterFingerprintAccepts
                | AuthCounter::EmptyOriginFingerprintAccepts
                | AuthCounter::NonEmptyOriginFingerprintAccepts
        )
    }
}

impl fmt::Display for AuthCounter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Authentication counter set, kept per interface and per node
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthCounters {
    counts: BTreeMap<AuthCounter, u64>,
}

impl AuthCounters {
    /// Create a zeroed counter set
    pub fn new() -> Self {
        Self::default()
    }

    /// Increment one counter
    pub fn increment(&mut self, counter: AuthCounter) {
        *self.counts.entry(counter).or_insert(0) += 1;
    }

    /// Current value of one counter
    pub fn get(&self, counter: AuthCounter) -> u64 {
        self.counts.get(&counter).copied().unwrap_or(0)
    }

    /// Sum of all rejection counters
    pub fn rejections(&self) -> u64 {
        self.counts
            .iter()
            .filter(|(counter, _)| !counter.is_accept())
            .map(|(_, count)| count)
            .sum()
    }

    /// Add another counter set into this one
    pub fn merge(&mut self, other: &AuthCounters) {
        for (counter, count) in &other.counts {
            *self.counts.entry(*counter).or_insert(0) += count;
        }
    }
}

// Serialized as a name -> value map with every counter present.
impl Serialize for AuthCounters {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_map(
            AuthCounter::ALL
                .iter()
                .map(|counter| (counter.name(), self.get(*counter))),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_increment_and_rejections() {
        let mut counters = AuthCounters::new();
        counters.increment(AuthCounter::EmptyOuterFingerprintAccepts);
        counters.increment(AuthCounter::IncorrectOuterFingerprint);
        counters.increment(AuthCounter::IncorrectOuterFingerprint);

        assert_eq!(counters.get(AuthCounter::IncorrectOuterFingerprint), 2);
        assert_eq!(counters.get(AuthCounter::ReflectedNonceOutOfSync), 0);
        assert_eq!(counters.rejections(), 2);
    }

    #[test]
    fn test_serializes_all_names() {
        let mut counters = AuthCounters::new();
        counters.increment(AuthCounter::ReflectedNonceOutOfSync);
        let json = serde_json::to_value(&counters).unwrap();
        assert_eq!(json["reflected_nonce_out_of_sync"], 1);
        assert_eq!(json["incorrect_origin_fingerprint"], 0);
        assert_eq!(json.as_object().unwrap().len(), AuthCounter::ALL.len());
    }
}
