//! Protocol constants shared by every layer.

use crate::ids::{KeyId, Level, SystemId};

/// Protocol major version; packets with a different major version are dropped
pub const PROTOCOL_MAJOR_VERSION: u8 = 7;
/// Protocol minor version; skew is tolerated
pub const PROTOCOL_MINOR_VERSION: u16 = 0;

/// Level of a leaf node
pub const LEAF_LEVEL: Level = 0;
/// Level of a top-of-fabric node that derives its level automatically
pub const TOP_OF_FABRIC_LEVEL: Level = 24;

/// Well-known LIE discovery port
pub const DEFAULT_LIE_UDP_PORT: u16 = 914;
/// Default port for TIE/TIDE/TIRE exchange
pub const DEFAULT_TIE_UDP_FLOOD_PORT: u16 = 915;
/// Default link MTU
pub const DEFAULT_MTU_SIZE: u32 = 1400;

/// Default LIE holdtime in seconds
pub const DEFAULT_LIE_HOLDTIME: u16 = 3;
/// Default ZTP hold-down in seconds
pub const DEFAULT_ZTP_HOLDTIME: u16 = 1;

/// Default TIE lifetime in seconds (one week)
pub const DEFAULT_LIFETIME: u32 = 604_800;
/// Lifetime used when flushing a TIE
pub const PURGE_LIFETIME: u32 = 300;

/// Default link cost
pub const DEFAULT_DISTANCE: u32 = 1;
/// Distance that marks a prefix as unreachable
pub const INFINITE_DISTANCE: u32 = 0x7FFF_FFFF;
/// Default link bandwidth in Mbit/s
pub const DEFAULT_BANDWIDTH: u32 = 100;

/// Nonce value meaning "not yet known"
pub const UNDEFINED_NONCE: u16 = 0;
/// How far behind the current local nonce a reflected nonce may lag
pub const MAXIMUM_VALID_NONCE_DELTA: u16 = 5;

/// System ID that is never valid on the wire
pub const ILLEGAL_SYSTEM_ID: SystemId = 0;
/// Key ID meaning "no key"
pub const UNDEFINED_KEY_ID: KeyId = 0;
