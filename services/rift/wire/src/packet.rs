//! Protocol packet model.
//!
//! Every packet is an immutable value produced once at decode time. Producers
//! build new values rather than patching decoded ones; the few `with_*`
//! helpers return modified copies.

use crate::constants::{
    DEFAULT_BANDWIDTH, DEFAULT_LIE_HOLDTIME, DEFAULT_MTU_SIZE, DEFAULT_TIE_UDP_FLOOD_PORT,
    PROTOCOL_MAJOR_VERSION, PROTOCOL_MINOR_VERSION,
};
use crate::ids::{IpPrefix, Level, LinkId, SystemId, TieId, TieType};
use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Common header of every protocol packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PacketHeader {
    /// Protocol major version
    pub major_version: u8,
    /// Protocol minor version
    pub minor_version: u16,
    /// System ID of the sending node
    pub sender: SystemId,
    /// Level of the sending node, `None` while undefined
    pub level: Option<Level>,
}

impl PacketHeader {
    /// Header for a packet sent by this implementation
    pub fn new(sender: SystemId, level: Option<Level>) -> Self {
        Self {
            major_version: PROTOCOL_MAJOR_VERSION,
            minor_version: PROTOCOL_MINOR_VERSION,
            sender,
            level,
        }
    }
}

bitflags! {
    /// Node capability flags advertised in LIEs and Node TIEs
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
    pub struct NodeCapabilities: u8 {
        /// Node supports flood reduction
        const FLOOD_REDUCTION = 1 << 0;
        /// Node will only ever be a leaf
        const LEAF_ONLY = 1 << 1;
        /// Node supports leaf-to-leaf adjacencies
        const LEAF_TO_LEAF = 1 << 2;
        /// Node is a top-of-fabric node
        const TOP_OF_FABRIC = 1 << 3;
    }
}

/// Neighbor reflected in a LIE
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LieNeighbor {
    /// System ID of the neighbor being reflected
    pub originator: SystemId,
    /// Link ID the neighbor advertised for this link
    pub remote_id: LinkId,
}

/// Link Information Element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LiePacket {
    /// Name of the sending interface
    pub name: String,
    /// Link ID allocated by the sender
    pub local_id: LinkId,
    /// UDP port on which the sender receives flooding packets
    pub flood_port: u16,
    /// MTU of the link
    pub link_mtu_size: u32,
    /// Bandwidth of the link in Mbit/s
    pub link_bandwidth: u32,
    /// Reflected neighbor, once one has been heard
    pub neighbor: Option<LieNeighbor>,
    /// PoD of the sender (0 = undefined)
    pub pod: u32,
    /// Sender capabilities
    pub capabilities: NodeCapabilities,
    /// Holdtime in seconds the receiver should apply
    pub holdtime: u16,
    /// The level offered in this LIE must not be used for ZTP
    pub not_a_ztp_offer: bool,
    /// Receiver is not selected as a flood repeater
    pub you_are_not_flood_repeater: bool,
    /// Optional label for the link
    pub label: Option<u32>,
}

impl LiePacket {
    /// LIE with default link parameters
    pub fn new(name: impl Into<String>, local_id: LinkId) -> Self {
        Self {
            name: name.into(),
            local_id,
            flood_port: DEFAULT_TIE_UDP_FLOOD_PORT,
            link_mtu_size: DEFAULT_MTU_SIZE,
            link_bandwidth: DEFAULT_BANDWIDTH,
            neighbor: None,
            pod: 0,
            capabilities: NodeCapabilities::empty(),
            holdtime: DEFAULT_LIE_HOLDTIME,
            not_a_ztp_offer: false,
            you_are_not_flood_repeater: false,
            label: None,
        }
    }
}

/// Pair of link IDs identifying one parallel link between two nodes
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct LinkIdPair {
    /// Link ID on the originating node
    pub local_id: LinkId,
    /// Link ID on the neighbor
    pub remote_id: LinkId,
}

/// One neighbor in a Node TIE
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeNeighborsTieElement {
    /// Level of the neighbor
    pub level: Level,
    /// Cost towards the neighbor
    pub cost: u32,
    /// Parallel links to the neighbor
    pub link_ids: BTreeSet<LinkIdPair>,
    /// Total bandwidth towards the neighbor
    pub bandwidth: u32,
}

/// Node TIE element
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct NodeTieElement {
    /// Level of the originator
    pub level: Level,
    /// Three-way neighbors keyed by system ID
    pub neighbors: BTreeMap<SystemId, NodeNeighborsTieElement>,
    /// Originator capabilities
    pub capabilities: NodeCapabilities,
    /// Optional node name
    pub name: Option<String>,
    /// PoD of the originator
    pub pod: u32,
}

/// Attributes of one advertised prefix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixAttributes {
    /// Distance to the prefix
    pub metric: u32,
    /// Route tags
    pub tags: BTreeSet<u64>,
}

impl PrefixAttributes {
    /// Attributes with the given metric and no tags
    pub fn with_metric(metric: u32) -> Self {
        Self {
            metric,
            tags: BTreeSet::new(),
        }
    }
}

/// Prefix-family TIE element
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct PrefixTieElement {
    /// Advertised prefixes
    pub prefixes: BTreeMap<IpPrefix, PrefixAttributes>,
}

/// Key/value TIE element
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct KeyValueTieElement {
    /// Opaque values keyed by a numeric key
    pub keyvalues: BTreeMap<u32, Vec<u8>>,
}

/// Content of a TIE; the variant must agree with the TIE ID's type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum TieElement {
    /// Node element
    Node(NodeTieElement),
    /// Prefix element
    Prefix(PrefixTieElement),
    /// Transitive prefix element
    TransitivePrefix(PrefixTieElement),
    /// Positive disaggregation element
    PositiveDisaggregationPrefix(PrefixTieElement),
    /// Negative disaggregation element
    NegativeDisaggregationPrefix(PrefixTieElement),
    /// Policy-guided prefix element
    PolicyGuidedPrefix(PrefixTieElement),
    /// Key/value element
    KeyValue(KeyValueTieElement),
}

impl TieElement {
    /// TIE type this element belongs to
    pub fn tie_type(&self) -> TieType {
        match self {
            TieElement::Node(_) => TieType::Node,
            TieElement::Prefix(_) => TieType::Prefix,
            TieElement::TransitivePrefix(_) => TieType::TransitivePrefix,
            TieElement::PositiveDisaggregationPrefix(_) => TieType::PositiveDisaggregationPrefix,
            TieElement::NegativeDisaggregationPrefix(_) => TieType::NegativeDisaggregationPrefix,
            TieElement::PolicyGuidedPrefix(_) => TieType::PolicyGuidedPrefix,
            TieElement::KeyValue(_) => TieType::KeyValue,
        }
    }

    /// Empty element of the given type, used when flushing a TIE
    pub fn empty(tie_type: TieType) -> Self {
        match tie_type {
            TieType::Node => TieElement::Node(NodeTieElement::default()),
            TieType::Prefix => TieElement::Prefix(PrefixTieElement::default()),
            TieType::TransitivePrefix => TieElement::TransitivePrefix(PrefixTieElement::default()),
            TieType::PositiveDisaggregationPrefix => {
                TieElement::PositiveDisaggregationPrefix(PrefixTieElement::default())
            }
            TieType::NegativeDisaggregationPrefix => {
                TieElement::NegativeDisaggregationPrefix(PrefixTieElement::default())
            }
            TieType::PolicyGuidedPrefix => {
                TieElement::PolicyGuidedPrefix(PrefixTieElement::default())
            }
            TieType::KeyValue => TieElement::KeyValue(KeyValueTieElement::default()),
        }
    }

    /// Node element, if this is one
    pub fn as_node(&self) -> Option<&NodeTieElement> {
        match self {
            TieElement::Node(node) => Some(node),
            _ => None,
        }
    }

    /// Prefix element, for every prefix-family variant
    pub fn as_prefixes(&self) -> Option<&PrefixTieElement> {
        match self {
            TieElement::Prefix(p)
            | TieElement::TransitivePrefix(p)
            | TieElement::PositiveDisaggregationPrefix(p)
            | TieElement::NegativeDisaggregationPrefix(p)
            | TieElement::PolicyGuidedPrefix(p) => Some(p),
            _ => None,
        }
    }
}

/// TIE header as carried inside a TIE packet
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TieHeader {
    /// TIE identifier
    pub tie_id: TieId,
    /// Sequence number, higher is newer
    pub seq_nr: u64,
    /// Origination timestamp (seconds since the epoch)
    pub origination_time: Option<u64>,
    /// Lifetime the TIE was originated with
    pub origination_lifetime: Option<u32>,
}

impl TieHeader {
    /// Header without origination timestamps
    pub fn new(tie_id: TieId, seq_nr: u64) -> Self {
        Self {
            tie_id,
            seq_nr,
            origination_time: None,
            origination_lifetime: None,
        }
    }
}

/// TIE header together with its current remaining lifetime, as listed in
/// TIDEs and TIREs
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct TieHeaderWithLifetime {
    /// TIE header
    pub header: TieHeader,
    /// Remaining lifetime in seconds
    pub remaining_lifetime: u32,
}

impl TieHeaderWithLifetime {
    /// Identifier of the described TIE
    pub fn tie_id(&self) -> TieId {
        self.header.tie_id
    }
}

/// Topology Information Element
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TiePacket {
    /// TIE header
    pub header: TieHeader,
    /// TIE content
    pub element: TieElement,
}

/// TIE Description Element: summary of a range of the database
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TidePacket {
    /// First TIE ID covered (inclusive)
    pub start_range: TieId,
    /// Last TIE ID covered (inclusive)
    pub end_range: TieId,
    /// Headers of every TIE in the range, sorted by TIE ID
    pub headers: Vec<TieHeaderWithLifetime>,
}

/// TIE Request Element: requests and acknowledgements
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TirePacket {
    /// Requested or acknowledged headers
    pub headers: BTreeSet<TieHeaderWithLifetime>,
}

/// Packet content
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PacketContent {
    /// Link Information Element
    Lie(LiePacket),
    /// Topology Information Element
    Tie(TiePacket),
    /// TIE Description Element
    Tide(TidePacket),
    /// TIE Request Element
    Tire(TirePacket),
}

impl PacketContent {
    /// Short name used in logs and counters
    pub fn kind(&self) -> &'static str {
        match self {
            PacketContent::Lie(_) => "lie",
            PacketContent::Tie(_) => "tie",
            PacketContent::Tide(_) => "tide",
            PacketContent::Tire(_) => "tire",
        }
    }
}

/// A complete protocol packet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolPacket {
    /// Packet header
    pub header: PacketHeader,
    /// Packet content
    pub content: PacketContent,
}

impl ProtocolPacket {
    /// Wrap content with a header
    pub fn new(header: PacketHeader, content: PacketContent) -> Self {
        Self { header, content }
    }
}
