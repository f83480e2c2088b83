//! Per-interface state held by a node

use crate::config::InterfaceConfig;
use rift_adjacency::{LieAdjacency, LieState, LinkConfig, Neighbor};
use rift_security::{AuthCounter, AuthCounters, KeySelection};
use rift_topology::FloodPeer;
use rift_wire::LinkId;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::net::SocketAddr;

/// Socket a datagram belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Port {
    /// LIE discovery
    Lie,
    /// TIE, TIDE and TIRE exchange
    Flood,
}

impl fmt::Display for Port {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Port::Lie => write!(f, "lie"),
            Port::Flood => write!(f, "flood"),
        }
    }
}

/// Packet counters of one interface
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PacketCounters {
    /// Accepted packets by kind
    pub received: BTreeMap<&'static str, u64>,
    /// Sent packets by kind
    pub sent: BTreeMap<&'static str, u64>,
    /// Datagrams that failed to decode
    pub decode_errors: u64,
    /// Flooding packets dropped because the adjacency is not three-way
    pub dropped_no_adjacency: u64,
    /// Flooding packets whose sender is not the neighbor of the interface
    pub dropped_wrong_sender: u64,
}

impl PacketCounters {
    pub(crate) fn count_received(&mut self, kind: &'static str) {
        *self.received.entry(kind).or_default() += 1;
    }

    pub(crate) fn count_sent(&mut self, kind: &'static str) {
        *self.sent.entry(kind).or_default() += 1;
    }
}

/// One interface: its LIE machine, flooding state, keys and counters
#[derive(Debug)]
pub struct Interface {
    config: InterfaceConfig,
    keys: KeySelection,
    pub(crate) lie: LieAdjacency,
    pub(crate) flood: Option<FloodPeer>,
    pub(crate) counters: PacketCounters,
    pub(crate) auth: AuthCounters,
    packet_number: u16,
}

impl Interface {
    pub(crate) fn new(
        index: usize,
        config: InterfaceConfig,
        node_keys: &KeySelection,
        holdtime: u16,
        nonce_seed: u16,
    ) -> Self {
        let local_id = config.local_id.unwrap_or(index as LinkId + 1);
        let mut link = LinkConfig::new(config.name.clone(), local_id);
        link.mtu = config.mtu;
        link.flood_port = config.flood_port;
        link.holdtime = holdtime;
        let keys = KeySelection::effective(&config.keys(), node_keys).clone();
        Self {
            config,
            keys,
            lie: LieAdjacency::new(link, nonce_seed),
            flood: None,
            counters: PacketCounters::default(),
            auth: AuthCounters::new(),
            packet_number: 0,
        }
    }

    /// Interface name
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Interface configuration
    pub fn config(&self) -> &InterfaceConfig {
        &self.config
    }

    /// Outer key selection in effect on this interface
    pub fn keys(&self) -> &KeySelection {
        &self.keys
    }

    /// LIE state
    pub fn state(&self) -> LieState {
        self.lie.state()
    }

    /// The LIE machine
    pub fn adjacency(&self) -> &LieAdjacency {
        &self.lie
    }

    /// Neighbor of a three-way adjacency
    pub fn three_way_neighbor(&self) -> Option<&Neighbor> {
        match self.lie.state() {
            LieState::ThreeWay => self.lie.neighbor(),
            _ => None,
        }
    }

    /// Flooding state, present while the adjacency is three-way
    pub fn flooding(&self) -> Option<&FloodPeer> {
        self.flood.as_ref()
    }

    /// Packet counters
    pub fn counters(&self) -> &PacketCounters {
        &self.counters
    }

    /// Authentication counters
    pub fn auth_counters(&self) -> &AuthCounters {
        &self.auth
    }

    pub(crate) fn count_auth(&mut self, counter: AuthCounter) {
        self.auth.increment(counter);
    }

    pub(crate) fn next_packet_number(&mut self) -> u16 {
        self.packet_number = self.packet_number.wrapping_add(1);
        self.packet_number
    }

    /// Where datagrams for `port` go. Flooding needs the neighbor address.
    pub(crate) fn destination(&self, port: Port) -> Option<SocketAddr> {
        match port {
            Port::Lie => Some(SocketAddr::new(
                self.config.lie_address,
                self.config.tx_lie_port,
            )),
            Port::Flood => self.lie.neighbor().and_then(|neighbor| {
                neighbor
                    .address
                    .map(|address| SocketAddr::new(address, neighbor.flood_port))
            }),
        }
    }
}
