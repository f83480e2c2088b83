//! Identifiers and their ordering.
//!
//! The total order of [`TieId`] is part of the protocol: TIDEs describe the
//! database as ranges of TIE IDs and both ends of a synchronization must agree
//! on what lies inside a range.

use crate::WireError;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use std::str::FromStr;

/// 64-bit node identifier
pub type SystemId = u64;
/// Link identifier, local to the node that allocates it
pub type LinkId = u32;
/// Hierarchical level (0 = leaf, 24 = top of fabric)
pub type Level = u8;
/// Security key identifier (0 = no key)
pub type KeyId = u32;

/// Flooding direction of a TIE
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TieDirection {
    /// Flooded towards lower levels
    South,
    /// Flooded towards higher levels
    North,
}

impl fmt::Display for TieDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TieDirection::South => write!(f, "South"),
            TieDirection::North => write!(f, "North"),
        }
    }
}

/// Type of the element carried by a TIE
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum TieType {
    /// Node adjacencies and attributes
    Node,
    /// Prefixes originated by the node
    Prefix,
    /// Prefixes learned and re-advertised transitively
    TransitivePrefix,
    /// More specific prefixes advertised to steer traffic
    PositiveDisaggregationPrefix,
    /// Prefixes this node can no longer reach south
    NegativeDisaggregationPrefix,
    /// Policy-guided prefixes
    PolicyGuidedPrefix,
    /// Opaque key/value store
    KeyValue,
}

impl fmt::Display for TieType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TieType::Node => "Node",
            TieType::Prefix => "Prefix",
            TieType::TransitivePrefix => "TransitivePrefix",
            TieType::PositiveDisaggregationPrefix => "PositiveDisaggregationPrefix",
            TieType::NegativeDisaggregationPrefix => "NegativeDisaggregationPrefix",
            TieType::PolicyGuidedPrefix => "PolicyGuidedPrefix",
            TieType::KeyValue => "KeyValue",
        };
        write!(f, "{}", name)
    }
}

impl TieType {
    /// Whether the element of this type carries prefixes
    pub fn is_prefix_family(&self) -> bool {
        !matches!(self, TieType::Node | TieType::KeyValue)
    }

    fn successor(&self) -> Option<TieType> {
        let next = match self {
            TieType::Node => TieType::Prefix,
            TieType::Prefix => TieType::TransitivePrefix,
            TieType::TransitivePrefix => TieType::PositiveDisaggregationPrefix,
            TieType::PositiveDisaggregationPrefix => TieType::NegativeDisaggregationPrefix,
            TieType::NegativeDisaggregationPrefix => TieType::PolicyGuidedPrefix,
            TieType::PolicyGuidedPrefix => TieType::KeyValue,
            TieType::KeyValue => return None,
        };
        Some(next)
    }
}

/// TIE identifier, totally ordered by (direction, originator, type, number)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TieId {
    /// Flooding direction
    pub direction: TieDirection,
    /// Originating node
    pub originator: SystemId,
    /// Element type
    pub tie_type: TieType,
    /// Number distinguishing TIEs of the same type from one originator
    pub tie_nr: u32,
}

impl TieId {
    /// Smallest possible TIE ID
    pub const MIN: TieId = TieId {
        direction: TieDirection::South,
        originator: 0,
        tie_type: TieType::Node,
        tie_nr: 0,
    };

    /// Largest possible TIE ID
    pub const MAX: TieId = TieId {
        direction: TieDirection::North,
        originator: SystemId::MAX,
        tie_type: TieType::KeyValue,
        tie_nr: u32::MAX,
    };

    /// Create a new TIE ID
    pub fn new(direction: TieDirection, originator: SystemId, tie_type: TieType, tie_nr: u32) -> Self {
        Self {
            direction,
            originator,
            tie_type,
            tie_nr,
        }
    }

    /// Smallest TIE ID greater than this one, `None` for [`TieId::MAX`]
    pub fn successor(&self) -> Option<TieId> {
        if self.tie_nr < u32::MAX {
            return Some(TieId {
                tie_nr: self.tie_nr + 1,
                ..*self
            });
        }
        if let Some(tie_type) = self.tie_type.successor() {
            return Some(TieId {
                tie_type,
                tie_nr: 0,
                ..*self
            });
        }
        if self.originator < SystemId::MAX {
            return Some(TieId {
                originator: self.originator + 1,
                ..TieId::MIN
            });
        }
        match self.direction {
            TieDirection::South => Some(TieId {
                direction: TieDirection::North,
                ..TieId::MIN
            }),
            TieDirection::North => None,
        }
    }
}

impl fmt::Display for TieId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}/{}/{}/{}",
            self.direction, self.originator, self.tie_type, self.tie_nr
        )
    }
}

/// IPv4 or IPv6 prefix with host bits cleared
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct IpPrefix {
    address: IpAddr,
    prefix_len: u8,
}

impl IpPrefix {
    /// Create a prefix, clearing any host bits
    pub fn new(address: IpAddr, prefix_len: u8) -> Result<Self, WireError> {
        let address = match address {
            IpAddr::V4(v4) => {
                if prefix_len > 32 {
                    return Err(WireError::Prefix(format!("{}/{}", address, prefix_len)));
                }
                let mask = if prefix_len == 0 {
                    0
                } else {
                    u32::MAX << (32 - prefix_len as u32)
                };
                IpAddr::V4(Ipv4Addr::from(u32::from(v4) & mask))
            }
            IpAddr::V6(v6) => {
                if prefix_len > 128 {
                    return Err(WireError::Prefix(format!("{}/{}", address, prefix_len)));
                }
                let mask = if prefix_len == 0 {
                    0
                } else {
                    u128::MAX << (128 - prefix_len as u32)
                };
                IpAddr::V6(Ipv6Addr::from(u128::from(v6) & mask))
            }
        };
        Ok(Self {
            address,
            prefix_len,
        })
    }

    /// IPv4 default route 0.0.0.0/0
    pub fn default_v4() -> Self {
        Self {
            address: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            prefix_len: 0,
        }
    }

    /// IPv6 default route ::/0
    pub fn default_v6() -> Self {
        Self {
            address: IpAddr::V6(Ipv6Addr::UNSPECIFIED),
            prefix_len: 0,
        }
    }

    /// Network address
    pub fn address(&self) -> IpAddr {
        self.address
    }

    /// Prefix length in bits
    pub fn prefix_len(&self) -> u8 {
        self.prefix_len
    }

    /// Whether this is a default route
    pub fn is_default(&self) -> bool {
        self.prefix_len == 0
    }

    /// Whether this is an IPv4 prefix
    pub fn is_v4(&self) -> bool {
        self.address.is_ipv4()
    }

    /// Whether `addr` falls inside this prefix
    pub fn contains(&self, addr: IpAddr) -> bool {
        match IpPrefix::new(addr, self.prefix_len) {
            Ok(masked) => masked.address == self.address,
            Err(_) => false,
        }
    }

    /// Whether `other` is equal to or more specific than this prefix
    pub fn covers(&self, other: &IpPrefix) -> bool {
        other.prefix_len >= self.prefix_len && self.contains(other.address)
    }
}

impl fmt::Display for IpPrefix {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.address, self.prefix_len)
    }
}

impl FromStr for IpPrefix {
    type Err = WireError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (addr, len) = match s.split_once('/') {
            Some((addr, len)) => (addr, Some(len)),
            None => (s, None),
        };
        let address: IpAddr = addr
            .trim()
            .parse()
            .map_err(|_| WireError::Prefix(s.to_string()))?;
        let prefix_len = match len {
            Some(len) => len
                .trim()
                .parse::<u8>()
                .map_err(|_| WireError::Prefix(s.to_string()))?,
            None if address.is_ipv4() => 32,
            None => 128,
        };
        IpPrefix::new(address, prefix_len)
    }
}

// Prefixes travel as text so they can key maps in both CBOR and JSON.
impl Serialize for IpPrefix {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for IpPrefix {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let text = String::deserialize(deserializer)?;
        text.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tie_id_total_order() {
        let south_node = TieId::new(TieDirection::South, 5, TieType::Node, 1);
        let south_prefix = TieId::new(TieDirection::South, 5, TieType::Prefix, 1);
        let south_other = TieId::new(TieDirection::South, 6, TieType::Node, 1);
        let north_node = TieId::new(TieDirection::North, 1, TieType::Node, 1);

        assert!(TieId::MIN < south_node);
        assert!(south_node < south_prefix);
        assert!(south_prefix < south_other);
        assert!(south_other < north_node);
        assert!(north_node < TieId::MAX);
    }

    #[test]
    fn test_tie_id_successor() {
        let id = TieId::new(TieDirection::South, 5, TieType::Node, 1);
        assert_eq!(
            id.successor(),
            Some(TieId::new(TieDirection::South, 5, TieType::Node, 2))
        );

        let last_nr = TieId::new(TieDirection::South, 5, TieType::KeyValue, u32::MAX);
        assert_eq!(
            last_nr.successor(),
            Some(TieId::new(TieDirection::South, 6, TieType::Node, 0))
        );

        let last_south = TieId {
            direction: TieDirection::South,
            ..TieId::MAX
        };
        assert_eq!(
            last_south.successor(),
            Some(TieId {
                direction: TieDirection::North,
                ..TieId::MIN
            })
        );
        assert_eq!(TieId::MAX.successor(), None);
    }

    #[test]
    fn test_prefix_masks_host_bits() {
        let prefix: IpPrefix = "10.1.2.3/16".parse().unwrap();
        assert_eq!(prefix.to_string(), "10.1.0.0/16");
        assert!(prefix.contains("10.1.200.7".parse().unwrap()));
        assert!(!prefix.contains("10.2.0.1".parse().unwrap()));
    }

    #[test]
    fn test_prefix_without_length_is_host_route() {
        let prefix: IpPrefix = "2001:db8::1".parse().unwrap();
        assert_eq!(prefix.prefix_len(), 128);
        let v4: IpPrefix = "1.2.3.4".parse().unwrap();
        assert_eq!(v4.prefix_len(), 32);
    }

    #[test]
    fn test_prefix_rejects_bad_length() {
        assert!("10.0.0.0/33".parse::<IpPrefix>().is_err());
        assert!("not-a-prefix".parse::<IpPrefix>().is_err());
    }

    #[test]
    fn test_default_covers_everything() {
        let default = IpPrefix::default_v4();
        let specific: IpPrefix = "192.168.0.0/24".parse().unwrap();
        assert!(default.is_default());
        assert!(default.covers(&specific));
        assert!(!specific.covers(&default));
    }

    #[test]
    fn test_prefix_serializes_as_text() {
        let prefix: IpPrefix = "172.16.0.0/12".parse().unwrap();
        let json = serde_json::to_string(&prefix).unwrap();
        assert_eq!(json, "\"172.16.0.0/12\"");
        let back: IpPrefix = serde_json::from_str(&json).unwrap();
        assert_eq!(back, prefix);
    }
}
