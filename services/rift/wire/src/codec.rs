//! CBOR encoding and decoding of protocol packets.
//!
//! Decoding also performs the semantic checks a well-formed packet must pass
//! before any state machine sees it: a legal sender, TIE elements matching the
//! type in their TIE ID, and ordered TIDE ranges.

use crate::constants::ILLEGAL_SYSTEM_ID;
use crate::ids::TieType;
use crate::packet::{PacketContent, ProtocolPacket, TiePacket};
use bytes::Bytes;
use thiserror::Error;

/// Codec errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CodecError {
    /// Wire protocol error
    #[error("wire error: {0}")]
    Wire(#[from] crate::WireError),
    /// CBOR encoding failed
    #[error("packet encoding failed: {0}")]
    Encode(String),
    /// CBOR decoding failed
    #[error("packet decoding failed: {0}")]
    Decode(String),
    /// Sender system ID is the illegal value
    #[error("illegal sender system id")]
    IllegalSender,
    /// TIE element does not match the type in its TIE ID
    #[error("tie element {found} does not match tie type {expected}")]
    ElementMismatch {
        /// Type from the TIE ID
        expected: TieType,
        /// Type of the carried element
        found: TieType,
    },
    /// TIDE start range is after its end range
    #[error("tide range is inverted")]
    InvertedRange,
}

/// Encode a protocol packet to CBOR
pub fn encode_packet(packet: &ProtocolPacket) -> Result<Bytes, CodecError> {
    let mut buf = Vec::new();
    ciborium::into_writer(packet, &mut buf).map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(Bytes::from(buf))
}

/// Encode a TIE packet on its own; this is what origin fingerprints cover
pub fn encode_tie(tie: &TiePacket) -> Result<Bytes, CodecError> {
    let mut buf = Vec::new();
    ciborium::into_writer(tie, &mut buf).map_err(|e| CodecError::Encode(e.to_string()))?;
    Ok(Bytes::from(buf))
}

/// Decode and validate a protocol packet
pub fn decode_packet(raw: &[u8]) -> Result<ProtocolPacket, CodecError> {
    let packet: ProtocolPacket =
        ciborium::from_reader(raw).map_err(|e| CodecError::Decode(e.to_string()))?;
    validate(&packet)?;
    Ok(packet)
}

fn validate(packet: &ProtocolPacket) -> Result<(), CodecError> {
    if packet.header.sender == ILLEGAL_SYSTEM_ID {
        return Err(CodecError::IllegalSender);
    }

    match &packet.content {
        PacketContent::Tie(tie) => {
            let expected = tie.header.tie_id.tie_type;
            let found = tie.element.tie_type();
            if expected != found {
                return Err(CodecError::ElementMismatch { expected, found });
            }
        }
        PacketContent::Tide(tide) => {
            if tide.start_range > tide.end_range {
                return Err(CodecError::InvertedRange);
            }
        }
        PacketContent::Lie(_) | PacketContent::Tire(_) => {}
    }

    Ok(())
}
