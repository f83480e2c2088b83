//! Security envelope framing.
//!
//! The envelope precedes every serialized packet. It carries the outer
//! fingerprint (authenticating the packet to the directly connected sender),
//! the nonce pair used for replay protection, the remaining lifetime of a TIE,
//! and for TIEs the origin envelope that authenticates the TIE's originator.
//!
//! This module only frames bytes. Fingerprints are computed by the caller over
//! [`EnvelopeBuilder::signed_part`] and checked against
//! [`Envelope::signed_part`].

use crate::constants::PROTOCOL_MAJOR_VERSION;
use crate::ids::KeyId;
use crate::WireError;
use bytes::{Buf, BufMut, Bytes, BytesMut};

/// First two bytes of every envelope
pub const ENVELOPE_MAGIC: u16 = 0xA1F7;

/// Remaining lifetime value for packets that are not TIEs
pub const NOT_A_TIE_LIFETIME: u32 = u32::MAX;

/// Fixed part up to and including the outer fingerprint length
const OUTER_FIXED_SIZE: usize = 8;
/// Nonces and remaining lifetime
const NONCE_LIFETIME_SIZE: usize = 8;
/// Origin key id (u24) and fingerprint length
const ORIGIN_FIXED_SIZE: usize = 4;
/// Largest fingerprint expressible in 8-bit words-of-four
const MAX_FINGERPRINT_SIZE: usize = u8::MAX as usize * 4;
/// Largest origin key id (24 bits)
const MAX_ORIGIN_KEY_ID: KeyId = 0x00FF_FFFF;

/// Origin security envelope of a TIE
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct OriginEnvelope {
    /// Origin key id (24 bits, 0 = none)
    pub key_id: KeyId,
    /// Fingerprint over the encoded TIE packet
    pub fingerprint: Bytes,
}

impl OriginEnvelope {
    /// Origin envelope without a key
    pub fn empty() -> Self {
        Self::default()
    }
}

/// Decoded security envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Envelope {
    /// Sender's packet number
    pub packet_number: u16,
    /// Protocol major version
    pub major_version: u8,
    /// Outer key id (8 bits, 0 = none)
    pub outer_key_id: KeyId,
    /// Outer fingerprint
    pub outer_fingerprint: Bytes,
    /// Sender's current nonce
    pub nonce_local: u16,
    /// Sender's reflection of our nonce
    pub nonce_remote: u16,
    /// Remaining lifetime of the carried TIE, [`NOT_A_TIE_LIFETIME`] otherwise
    pub remaining_lifetime: u32,
    /// Origin envelope, present on TIEs
    pub origin: Option<OriginEnvelope>,
    /// Serialized protocol packet
    pub payload: Bytes,
    signed: Bytes,
}

impl Envelope {
    /// Decode an envelope from a received datagram
    pub fn decode(mut buf: Bytes) -> Result<Self, WireError> {
        if buf.len() < OUTER_FIXED_SIZE {
            return Err(WireError::Incomplete);
        }

        let magic = buf.get_u16();
        if magic != ENVELOPE_MAGIC {
            return Err(WireError::BadMagic(magic));
        }

        let packet_number = buf.get_u16();
        let reserved = buf.get_u8();
        if reserved != 0 {
            return Err(WireError::Reserved);
        }
        let major_version = buf.get_u8();
        if major_version != PROTOCOL_MAJOR_VERSION {
            return Err(WireError::Version(major_version));
        }
        let outer_key_id = buf.get_u8() as KeyId;
        let outer_len = buf.get_u8() as usize * 4;
        if buf.len() < outer_len {
            return Err(WireError::Incomplete);
        }
        let outer_fingerprint = buf.split_to(outer_len);

        // Everything after the outer fingerprint is covered by it.
        let signed = buf.clone();

        if buf.len() < NONCE_LIFETIME_SIZE {
            return Err(WireError::Incomplete);
        }
        let nonce_local = buf.get_u16();
        let nonce_remote = buf.get_u16();
        let remaining_lifetime = buf.get_u32();

        let origin = if remaining_lifetime != NOT_A_TIE_LIFETIME {
            if buf.len() < ORIGIN_FIXED_SIZE {
                return Err(WireError::Incomplete);
            }
            let key_id = buf.get_uint(3) as KeyId;
            let origin_len = buf.get_u8() as usize * 4;
            if buf.len() < origin_len {
                return Err(WireError::Incomplete);
            }
            Some(OriginEnvelope {
                key_id,
                fingerprint: buf.split_to(origin_len),
            })
        } else {
            None
        };

        Ok(Self {
            packet_number,
            major_version,
            outer_key_id,
            outer_fingerprint,
            nonce_local,
            nonce_remote,
            remaining_lifetime,
            origin,
            payload: buf,
            signed,
        })
    }

    /// Bytes covered by the outer fingerprint
    pub fn signed_part(&self) -> &Bytes {
        &self.signed
    }

    /// Whether the envelope carries a TIE
    pub fn is_tie(&self) -> bool {
        self.origin.is_some()
    }
}

/// Builder for an outgoing envelope
#[derive(Debug, Clone)]
pub struct EnvelopeBuilder {
    packet_number: u16,
    nonce_local: u16,
    nonce_remote: u16,
    remaining_lifetime: u32,
    origin: Option<OriginEnvelope>,
    payload: Bytes,
}

impl EnvelopeBuilder {
    /// Start an envelope around an encoded packet
    pub fn new(packet_number: u16, payload: Bytes) -> Self {
        Self {
            packet_number,
            nonce_local: 0,
            nonce_remote: 0,
            remaining_lifetime: NOT_A_TIE_LIFETIME,
            origin: None,
            payload,
        }
    }

    /// Set the local and reflected nonces
    pub fn nonces(mut self, local: u16, remote: u16) -> Self {
        self.nonce_local = local;
        self.nonce_remote = remote;
        self
    }

    /// Mark the payload as a TIE with the given remaining lifetime
    pub fn tie(mut self, remaining_lifetime: u32, origin: OriginEnvelope) -> Self {
        self.remaining_lifetime = remaining_lifetime;
        self.origin = Some(origin);
        self
    }

    /// Bytes the outer fingerprint must cover
    pub fn signed_part(&self) -> Result<Bytes, WireError> {
        let origin_len = self
            .origin
            .as_ref()
            .map(|o| ORIGIN_FIXED_SIZE + o.fingerprint.len())
            .unwrap_or(0);
        let mut buf = BytesMut::with_capacity(NONCE_LIFETIME_SIZE + origin_len + self.payload.len());
        buf.put_u16(self.nonce_local);
        buf.put_u16(self.nonce_remote);
        buf.put_u32(self.remaining_lifetime);
        if let Some(origin) = &self.origin {
            if origin.key_id > MAX_ORIGIN_KEY_ID {
                return Err(WireError::KeyIdRange(origin.key_id));
            }
            put_fingerprint_len(&mut buf, &origin.fingerprint, |buf| {
                buf.put_uint(origin.key_id as u64, 3)
            })?;
            buf.put_slice(&origin.fingerprint);
        }
        buf.put_slice(&self.payload);
        Ok(buf.freeze())
    }

    /// Produce the final datagram with the given outer key and fingerprint
    pub fn finish(self, outer_key_id: KeyId, outer_fingerprint: &[u8]) -> Result<Bytes, WireError> {
        if outer_key_id > u8::MAX as KeyId {
            return Err(WireError::KeyIdRange(outer_key_id));
        }
        let signed = self.signed_part()?;
        let mut buf = BytesMut::with_capacity(OUTER_FIXED_SIZE + outer_fingerprint.len() + signed.len());
        buf.put_u16(ENVELOPE_MAGIC);
        buf.put_u16(self.packet_number);
        buf.put_u8(0);
        buf.put_u8(PROTOCOL_MAJOR_VERSION);
        put_fingerprint_len(&mut buf, outer_fingerprint, |buf| {
            buf.put_u8(outer_key_id as u8)
        })?;
        buf.put_slice(outer_fingerprint);
        buf.put_slice(&signed);
        Ok(buf.freeze())
    }
}

fn put_fingerprint_len(
    buf: &mut BytesMut,
    fingerprint: &[u8],
    put_key: impl FnOnce(&mut BytesMut),
) -> Result<(), WireError> {
    if fingerprint.len() % 4 != 0 || fingerprint.len() > MAX_FINGERPRINT_SIZE {
        return Err(WireError::FingerprintLength(fingerprint.len()));
    }
    put_key(buf);
    buf.put_u8((fingerprint.len() / 4) as u8);
    Ok(())
}
