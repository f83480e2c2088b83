//! Envelope sealing and verification.
//!
//! Verification results are counters: `Ok` carries the acceptance counter and
//! `Err` the single rejection counter that explains why the packet must be
//! dropped.

use crate::{AuthCounter, KeySelection, KeyStore, NonceState, SecurityError};
use bytes::Bytes;
use rift_wire::{Envelope, EnvelopeBuilder, KeyId, OriginEnvelope, UNDEFINED_KEY_ID, UNDEFINED_NONCE};
use tracing::debug;

/// Envelope layer being checked
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Layer {
    /// Outer envelope, authenticating the direct neighbor
    Outer,
    /// Origin envelope, authenticating the TIE originator
    Origin,
}

impl Layer {
    fn empty_accept(self) -> AuthCounter {
        match self {
            Layer::Outer => AuthCounter::EmptyOuterFingerprintAccepts,
            Layer::Origin => AuthCounter::EmptyOriginFingerprintAccepts,
        }
    }

    fn non_empty_accept(self) -> AuthCounter {
        match self {
            Layer::Outer => AuthCounter::NonEmptyOuterFingerprintAccepts,
            Layer::Origin => AuthCounter::NonEmptyOriginFingerprintAccepts,
        }
    }

    fn zero_key_id(self) -> AuthCounter {
        match self {
            Layer::Outer => AuthCounter::ZeroOuterKeyIdNotAccepted,
            Layer::Origin => AuthCounter::ZeroOriginKeyIdNotAccepted,
        }
    }

    fn non_zero_key_id(self) -> AuthCounter {
        match self {
            Layer::Outer => AuthCounter::NonZeroOuterKeyIdNotAccepted,
            Layer::Origin => AuthCounter::NonZeroOriginKeyIdNotAccepted,
        }
    }

    fn incorrect(self) -> AuthCounter {
        match self {
            Layer::Outer => AuthCounter::IncorrectOuterFingerprint,
            Layer::Origin => AuthCounter::IncorrectOriginFingerprint,
        }
    }

    fn inconsistent(self) -> AuthCounter {
        match self {
            Layer::Outer => AuthCounter::InconsistentOuterKeyIdAndFingerprint,
            Layer::Origin => AuthCounter::InconsistentOriginKeyIdAndFingerprint,
        }
    }
}

fn check(
    layer: Layer,
    keys: &KeyStore,
    selection: &KeySelection,
    key_id: KeyId,
    fingerprint: &[u8],
    parts: &[&[u8]],
) -> Result<AuthCounter, AuthCounter> {
    if key_id == UNDEFINED_KEY_ID {
        if selection.active_key.is_some() {
            return Err(layer.zero_key_id());
        }
        if !fingerprint.is_empty() {
            return Err(layer.inconsistent());
        }
        return Ok(layer.empty_accept());
    }

    if !selection.accepts(key_id) {
        return Err(layer.non_zero_key_id());
    }
    let key = keys.get(key_id).ok_or_else(|| layer.non_zero_key_id())?;
    if fingerprint.len() != key.algorithm.fingerprint_len() {
        return Err(layer.inconsistent());
    }
    let expected = key.fingerprint(parts).map_err(|_| layer.incorrect())?;
    if expected != fingerprint {
        return Err(layer.incorrect());
    }
    Ok(layer.non_empty_accept())
}

/// Verify the outer fingerprint of a received envelope
pub fn verify_outer(
    keys: &KeyStore,
    selection: &KeySelection,
    envelope: &Envelope,
) -> Result<AuthCounter, AuthCounter> {
    let result = check(
        Layer::Outer,
        keys,
        selection,
        envelope.outer_key_id,
        &envelope.outer_fingerprint,
        &[envelope.signed_part().as_ref()],
    );
    if let Err(counter) = result {
        debug!("Outer envelope rejected: {}", counter);
    }
    result
}

/// Verify the origin fingerprint of a received TIE against its encoding
pub fn verify_origin(
    keys: &KeyStore,
    selection: &KeySelection,
    envelope: &Envelope,
    tie_bytes: &[u8],
) -> Result<AuthCounter, AuthCounter> {
    let origin = envelope
        .origin
        .as_ref()
        .ok_or(AuthCounter::MissingOriginSecurityEnvelope)?;
    let result = check(
        Layer::Origin,
        keys,
        selection,
        origin.key_id,
        &origin.fingerprint,
        &[tie_bytes],
    );
    if let Err(counter) = result {
        debug!("Origin envelope rejected: {}", counter);
    }
    result
}

/// Check the nonce the neighbor reflected back to us
pub fn verify_nonce(nonce: &NonceState, envelope: &Envelope) -> Result<(), AuthCounter> {
    if envelope.nonce_remote == UNDEFINED_NONCE || nonce.is_valid_reflection(envelope.nonce_remote)
    {
        Ok(())
    } else {
        debug!(
            "Reflected nonce {} out of sync with local nonce {}",
            envelope.nonce_remote,
            nonce.local()
        );
        Err(AuthCounter::ReflectedNonceOutOfSync)
    }
}

/// Finish an outgoing envelope, signing it with the active key if any
pub fn seal(
    keys: &KeyStore,
    selection: &KeySelection,
    builder: EnvelopeBuilder,
) -> Result<Bytes, SecurityError> {
    match selection.active_key {
        None => Ok(builder.finish(UNDEFINED_KEY_ID, &[])?),
        Some(key_id) => {
            let key = keys.get(key_id).ok_or(SecurityError::UnknownKey(key_id))?;
            let signed = builder.signed_part()?;
            let fingerprint = key.fingerprint(&[signed.as_ref()])?;
            Ok(builder.finish(key_id, &fingerprint)?)
        }
    }
}

/// Origin envelope for a TIE this node originates
pub fn origin_envelope(
    keys: &KeyStore,
    selection: &KeySelection,
    tie_bytes: &[u8],
) -> Result<OriginEnvelope, SecurityError> {
    match selection.active_key {
        None => Ok(OriginEnvelope::empty()),
        Some(key_id) => {
            let key = keys.get(key_id).ok_or(SecurityError::UnknownKey(key_id))?;
            Ok(OriginEnvelope {
                key_id,
                fingerprint: Bytes::from(key.fingerprint(&[tie_bytes])?),
            })
        }
    }
}
