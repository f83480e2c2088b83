//! Keys, fingerprints and key selection.

use crate::SecurityError;
use hmac::digest::KeyInit;
use hmac::{Hmac, Mac};
use rift_wire::{KeyId, UNDEFINED_KEY_ID};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha224, Sha256, Sha384, Sha512};
use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

/// Fingerprint algorithm
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum Algorithm {
    /// SHA-224 over secret and message
    Sha224,
    /// SHA-256 over secret and message
    Sha256,
    /// SHA-384 over secret and message
    Sha384,
    /// SHA-512 over secret and message
    Sha512,
    /// HMAC-SHA-224
    HmacSha224,
    /// HMAC-SHA-256
    HmacSha256,
    /// HMAC-SHA-384
    HmacSha384,
    /// HMAC-SHA-512
    HmacSha512,
}

impl Algorithm {
    /// Configuration name of the algorithm
    pub fn name(&self) -> &'static str {
        match self {
            Algorithm::Sha224 => "sha-224",
            Algorithm::Sha256 => "sha-256",
            Algorithm::Sha384 => "sha-384",
            Algorithm::Sha512 => "sha-512",
            Algorithm::HmacSha224 => "hmac-sha-224",
            Algorithm::HmacSha256 => "hmac-sha-256",
            Algorithm::HmacSha384 => "hmac-sha-384",
            Algorithm::HmacSha512 => "hmac-sha-512",
        }
    }

    /// Length in bytes of a fingerprint produced with this algorithm
    pub fn fingerprint_len(&self) -> usize {
        let digest_len = match self {
            Algorithm::Sha224 | Algorithm::HmacSha224 => 28,
            Algorithm::Sha256 | Algorithm::HmacSha256 => 32,
            Algorithm::Sha384 | Algorithm::HmacSha384 => 48,
            Algorithm::Sha512 | Algorithm::HmacSha512 => 64,
        };
        padded_len(digest_len)
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Algorithm {
    type Err = SecurityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "sha-224" => Ok(Algorithm::Sha224),
            "sha-256" => Ok(Algorithm::Sha256),
            "sha-384" => Ok(Algorithm::Sha384),
            "sha-512" => Ok(Algorithm::Sha512),
            "hmac-sha-224" => Ok(Algorithm::HmacSha224),
            "hmac-sha-256" => Ok(Algorithm::HmacSha256),
            "hmac-sha-384" => Ok(Algorithm::HmacSha384),
            "hmac-sha-512" => Ok(Algorithm::HmacSha512),
            _ => Err(SecurityError::UnknownAlgorithm(s.to_string())),
        }
    }
}

impl TryFrom<String> for Algorithm {
    type Error = SecurityError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<Algorithm> for String {
    fn from(value: Algorithm) -> Self {
        value.name().to_string()
    }
}

/// A security key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    /// Key id, never 0
    pub id: KeyId,
    /// Fingerprint algorithm
    pub algorithm: Algorithm,
    /// Shared secret
    pub secret: String,
}

impl Key {
    /// Create a key
    pub fn new(id: KeyId, algorithm: Algorithm, secret: impl Into<String>) -> Self {
        Self {
            id,
            algorithm,
            secret: secret.into(),
        }
    }

    /// Fingerprint over the concatenation of `parts`, zero padded to a
    /// multiple of 4 bytes
    pub fn fingerprint(&self, parts: &[&[u8]]) -> Result<Vec<u8>, SecurityError> {
        let secret = self.secret.as_bytes();
        let mut fingerprint = match self.algorithm {
            Algorithm::Sha224 => plain_digest::<Sha224>(secret, parts),
            Algorithm::Sha256 => plain_digest::<Sha256>(secret, parts),
            Algorithm::Sha384 => plain_digest::<Sha384>(secret, parts),
            Algorithm::Sha512 => plain_digest::<Sha512>(secret, parts),
            Algorithm::HmacSha224 => keyed_digest::<Hmac<Sha224>>(self.id, secret, parts)?,
            Algorithm::HmacSha256 => keyed_digest::<Hmac<Sha256>>(self.id, secret, parts)?,
            Algorithm::HmacSha384 => keyed_digest::<Hmac<Sha384>>(self.id, secret, parts)?,
            Algorithm::HmacSha512 => keyed_digest::<Hmac<Sha512>>(self.id, secret, parts)?,
        };
        fingerprint.resize(padded_len(fingerprint.len()), 0);
        Ok(fingerprint)
    }
}

fn padded_len(len: usize) -> usize {
    (len + 3) & !3
}

fn plain_digest<D: Digest>(secret: &[u8], parts: &[&[u8]]) -> Vec<u8> {
    let mut hasher = D::new();
    hasher.update(secret);
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().to_vec()
}

fn keyed_digest<M: Mac + KeyInit>(
    key_id: KeyId,
    secret: &[u8],
    parts: &[&[u8]],
) -> Result<Vec<u8>, SecurityError> {
    let mut mac =
        <M as KeyInit>::new_from_slice(secret).map_err(|_| SecurityError::InvalidSecret(key_id))?;
    for part in parts {
        mac.update(part);
    }
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Table of configured keys
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyStore {
    keys: BTreeMap<KeyId, Key>,
}

impl KeyStore {
    /// Create an empty key table
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a key, replacing any key with the same id
    pub fn insert(&mut self, key: Key) -> Result<(), SecurityError> {
        if key.id == UNDEFINED_KEY_ID {
            return Err(SecurityError::ReservedKeyId);
        }
        self.keys.insert(key.id, key);
        Ok(())
    }

    /// Look up a key
    pub fn get(&self, id: KeyId) -> Option<&Key> {
        self.keys.get(&id)
    }

    /// Whether a key id is configured
    pub fn contains(&self, id: KeyId) -> bool {
        self.keys.contains_key(&id)
    }

    /// Iterate over configured keys in id order
    pub fn iter(&self) -> impl Iterator<Item = &Key> {
        self.keys.values()
    }
}

impl FromIterator<Key> for KeyStore {
    fn from_iter<I: IntoIterator<Item = Key>>(iter: I) -> Self {
        Self {
            keys: iter
                .into_iter()
                .filter(|key| key.id != UNDEFINED_KEY_ID)
                .map(|key| (key.id, key))
                .collect(),
        }
    }
}

/// Active key and accepted keys for one envelope layer
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeySelection {
    /// Key used to sign outgoing packets
    pub active_key: Option<KeyId>,
    /// Additional keys accepted on received packets
    pub accept_keys: BTreeSet<KeyId>,
}

impl KeySelection {
    /// Selection with an active key and no extra accepted keys
    pub fn active(key_id: KeyId) -> Self {
        Self {
            active_key: Some(key_id),
            accept_keys: BTreeSet::new(),
        }
    }

    /// Whether nothing is configured at this scope
    pub fn is_unset(&self) -> bool {
        self.active_key.is_none() && self.accept_keys.is_empty()
    }

    /// The interface selection overrides the node selection when it
    /// configures anything at all
    pub fn effective<'a>(interface: &'a KeySelection, node: &'a KeySelection) -> &'a KeySelection {
        if interface.is_unset() {
            node
        } else {
            interface
        }
    }

    /// Whether a received non-zero key id is acceptable
    pub fn accepts(&self, key_id: KeyId) -> bool {
        self.active_key == Some(key_id) || self.accept_keys.contains(&key_id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_algorithm_names() {
        for name in [
            "sha-224",
            "sha-256",
            "sha-384",
            "sha-512",
            "hmac-sha-224",
            "hmac-sha-256",
            "hmac-sha-384",
            "hmac-sha-512",
        ] {
            let algorithm: Algorithm = name.parse().unwrap();
            assert_eq!(algorithm.name(), name);
        }
        assert!("md5".parse::<Algorithm>().is_err());
    }

    #[test]
    fn test_fingerprint_lengths_are_word_aligned() {
        let key = Key::new(1, Algorithm::Sha224, "secret");
        let fingerprint = key.fingerprint(&[b"hello"]).unwrap();
        assert_eq!(fingerprint.len(), 28);
        assert_eq!(fingerprint.len(), Algorithm::Sha224.fingerprint_len());

        let key = Key::new(2, Algorithm::HmacSha512, "secret");
        assert_eq!(key.fingerprint(&[b"hello"]).unwrap().len(), 64);
    }

    #[test]
    fn test_fingerprint_covers_parts_in_order() {
        let key = Key::new(1, Algorithm::HmacSha256, "secret");
        let joined = key.fingerprint(&[b"ab", b"cd"]).unwrap();
        let single = key.fingerprint(&[b"abcd"]).unwrap();
        let swapped = key.fingerprint(&[b"cd", b"ab"]).unwrap();
        assert_eq!(joined, single);
        assert_ne!(joined, swapped);
    }

    #[test]
    fn test_fingerprint_depends_on_secret() {
        let a = Key::new(1, Algorithm::Sha256, "one");
        let b = Key::new(1, Algorithm::Sha256, "two");
        assert_ne!(
            a.fingerprint(&[b"payload"]).unwrap(),
            b.fingerprint(&[b"payload"]).unwrap()
        );
    }

    #[test]
    fn test_key_store_rejects_zero_id() {
        let mut store = KeyStore::new();
        assert_eq!(
            store.insert(Key::new(0, Algorithm::Sha256, "x")),
            Err(SecurityError::ReservedKeyId)
        );
        store.insert(Key::new(5, Algorithm::Sha256, "x")).unwrap();
        assert!(store.contains(5));
    }

    #[test]
    fn test_interface_selection_overrides_node() {
        let node = KeySelection::active(1);
        let unset = KeySelection::default();
        let interface = KeySelection::active(2);

        assert_eq!(KeySelection::effective(&unset, &node).active_key, Some(1));
        assert_eq!(KeySelection::effective(&interface, &node).active_key, Some(2));
    }

    #[test]
    fn test_accepts_active_and_accept_set() {
        let mut selection = KeySelection::active(1);
        selection.accept_keys.insert(3);
        assert!(selection.accepts(1));
        assert!(selection.accepts(3));
        assert!(!selection.accepts(2));
    }

    #[test]
    fn test_key_deserializes_algorithm_name() {
        let key: Key =
            serde_json::from_str(r#"{"id":7,"algorithm":"hmac-sha-256","secret":"s"}"#).unwrap();
        assert_eq!(key.algorithm, Algorithm::HmacSha256);
    }
}
