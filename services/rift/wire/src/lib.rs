//! Packet model, encoding/decoding and security envelope framing for RIFT.
//!
//! This crate provides the wire-level view of the protocol: identifiers and
//! their total order, the immutable packet value types (LIE, TIE, TIDE, TIRE),
//! the CBOR codec for serialized packets, and the security envelope that
//! carries fingerprints, nonces and the remaining TIE lifetime.
//!
//! ## Wire Format
//!
//! ```text
//! +----------------------------+-------------------------------------+
//! | magic (0xA1F7)      u16    | packet number                u16    |
//! +----------------------------+-------------------------------------+
//! | reserved u8 | major u8     | outer key id u8 | fp len u8 (words)|
//! +----------------------------+-------------------------------------+
//! | outer fingerprint (fp len * 4 bytes)                             |
//! +----------------------------+-------------------------------------+
//! | nonce local         u16    | nonce remote                 u16    |
//! +----------------------------+-------------------------------------+
//! | remaining TIE lifetime u32 (all ones when not a TIE)             |
//! +------------------------------------------------------------------+
//! | TIE only: origin key id u24 | fp len u8 | origin fingerprint     |
//! +------------------------------------------------------------------+
//! | serialized protocol packet (CBOR)                                |
//! +------------------------------------------------------------------+
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod codec;
pub mod constants;
pub mod envelope;
pub mod error;
pub mod ids;
pub mod packet;

// Re-export main types
pub use codec::{decode_packet, encode_packet, encode_tie, CodecError};
pub use constants::*;
pub use envelope::{
    Envelope, EnvelopeBuilder, OriginEnvelope, ENVELOPE_MAGIC, NOT_A_TIE_LIFETIME,
};
pub use error::WireError;
pub use ids::{IpPrefix, KeyId, Level, LinkId, SystemId, TieDirection, TieId, TieType};
pub use packet::{
    KeyValueTieElement, LieNeighbor, LiePacket, LinkIdPair, NodeCapabilities,
    NodeNeighborsTieElement, NodeTieElement, PacketContent, PacketHeader, PrefixAttributes,
    PrefixTieElement, ProtocolPacket, TidePacket, TieElement, TieHeader, TieHeaderWithLifetime,
    TiePacket, TirePacket,
};
