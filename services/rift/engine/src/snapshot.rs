//! Read-only introspection views of a node, serializable for dumps

use crate::interface::{Interface, PacketCounters};
use crate::node::Node;
use rift_adjacency::{LieState, LieVerdict, Neighbor, Offer, SentOffer, ZtpState};
use rift_fsm::HistoryRecord;
use rift_routing::RouteComputation;
use rift_security::{Algorithm, AuthCounters, KeySelection, NonceState};
use rift_topology::{DatabaseStats, FloodSnapshot};
use rift_wire::{KeyId, Level, LinkId, SystemId, TieHeaderWithLifetime};
use serde::Serialize;

/// A configured key without its secret
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct KeySummary {
    /// Key id
    pub id: KeyId,
    /// Fingerprint algorithm
    pub algorithm: Algorithm,
}

/// One interface
#[derive(Debug, Clone, Serialize)]
pub struct InterfaceSnapshot {
    /// Interface name
    pub name: String,
    /// Local link ID
    pub local_id: LinkId,
    /// LIE state
    pub state: LieState,
    /// Current neighbor
    pub neighbor: Option<Neighbor>,
    /// Verdict on the last received LIE
    pub verdict: Option<LieVerdict>,
    /// Level offered in the last sent LIE
    pub sent_offer: Option<SentOffer>,
    /// Offer received on this interface, as ZTP holds it
    pub received_offer: Option<Offer>,
    /// LIE machine history, every event
    pub history_verbose: Vec<HistoryRecord>,
    /// LIE machine history, routine events left out
    pub history_summary: Vec<HistoryRecord>,
    /// Nonces
    pub nonce: NonceState,
    /// Packet counters
    pub packets: PacketCounters,
    /// Authentication counters
    pub auth_counters: AuthCounters,
    /// Flooding state while three-way
    pub flooding: Option<FloodSnapshot>,
    /// Outer keys in effect
    pub keys: KeySelection,
}

impl InterfaceSnapshot {
    fn capture(node: &Node, interface: &Interface) -> Self {
        let adjacency = interface.adjacency();
        Self {
            name: interface.name().to_string(),
            local_id: adjacency.link().local_id,
            state: interface.state(),
            neighbor: adjacency.neighbor().cloned(),
            verdict: adjacency.verdict(),
            sent_offer: adjacency.sent_offer(),
            received_offer: node.ztp().offer(interface.name()).cloned(),
            history_verbose: adjacency.verbose_history().cloned().collect(),
            history_summary: adjacency.summary_history().cloned().collect(),
            nonce: adjacency.nonce().clone(),
            packets: interface.counters().clone(),
            auth_counters: interface.auth_counters().clone(),
            flooding: interface.flooding().map(|peer| peer.snapshot()),
            keys: interface.keys().clone(),
        }
    }
}

/// Whole-node view: level derivation, interfaces, database and routes
#[derive(Debug, Clone, Serialize)]
pub struct NodeSnapshot {
    /// Node name
    pub name: String,
    /// System ID
    pub system_id: SystemId,
    /// Current level
    pub level: Option<Level>,
    /// Highest available level
    pub hal: Option<Level>,
    /// Highest adjacency three-way
    pub hat: Option<Level>,
    /// Whether the node is a leaf
    pub leaf: bool,
    /// Whether the node is top of fabric
    pub top_of_fabric: bool,
    /// ZTP state
    pub ztp_state: ZtpState,
    /// ZTP history, every event
    pub ztp_history_verbose: Vec<HistoryRecord>,
    /// ZTP history, routine events left out
    pub ztp_history_summary: Vec<HistoryRecord>,
    /// Offers held by ZTP
    pub offers: Vec<Offer>,
    /// Interfaces
    pub interfaces: Vec<InterfaceSnapshot>,
    /// Authentication counters of all interfaces
    pub auth_counters: AuthCounters,
    /// Configured keys
    pub keys: Vec<KeySummary>,
    /// Database headers in TIE ID order
    pub database: Vec<TieHeaderWithLifetime>,
    /// Database statistics
    pub database_stats: DatabaseStats,
    /// Last route computation
    pub routes: Option<RouteComputation>,
    /// Completed SPF runs
    pub spf_runs: u64,
}

impl NodeSnapshot {
    /// Capture the current state of `node`
    pub fn capture(node: &Node) -> Self {
        let ztp = node.ztp();
        let interfaces: Vec<InterfaceSnapshot> = node
            .interfaces()
            .iter()
            .map(|interface| InterfaceSnapshot::capture(node, interface))
            .collect();
        let mut auth_counters = AuthCounters::new();
        for interface in node.interfaces() {
            auth_counters.merge(interface.auth_counters());
        }

        Self {
            name: node.name().to_string(),
            system_id: node.system_id(),
            level: ztp.level(),
            hal: ztp.hal(),
            hat: ztp.hat(),
            leaf: ztp.is_leaf(),
            top_of_fabric: ztp.is_top_of_fabric(),
            ztp_state: ztp.state(),
            ztp_history_verbose: ztp.verbose_history().cloned().collect(),
            ztp_history_summary: ztp.summary_history().cloned().collect(),
            offers: ztp.offers().cloned().collect(),
            interfaces,
            auth_counters,
            keys: node
                .key_store()
                .iter()
                .map(|key| KeySummary {
                    id: key.id,
                    algorithm: key.algorithm,
                })
                .collect(),
            database: node.database().headers().collect(),
            database_stats: node.database().stats(),
            routes: node.routes().cloned(),
            spf_runs: node.spf_runs(),
        }
    }

    /// Interface by name
    pub fn interface(&self, name: &str) -> Option<&InterfaceSnapshot> {
        self.interfaces.iter().find(|interface| interface.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{InterfaceConfig, NodeConfig};
    use rift_security::Key;
    use std::time::Instant;

    #[test]
    fn test_snapshot_of_started_node() {
        let mut config = NodeConfig::new("leaf-1", 7);
        config.level = Some(0);
        config.keys.push(Key::new(3, Algorithm::HmacSha256, "secret-value"));
        config.active_key = Some(3);
        config.interfaces.push(InterfaceConfig::new("if1"));
        let mut node = Node::new(config).unwrap();
        node.start(Instant::now());

        let snapshot = node.snapshot();
        assert_eq!(snapshot.level, Some(0));
        assert!(snapshot.leaf);
        assert!(!snapshot.top_of_fabric);
        assert_eq!(snapshot.keys, vec![KeySummary { id: 3, algorithm: Algorithm::HmacSha256 }]);
        let interface = snapshot.interface("if1").unwrap();
        assert_eq!(interface.state, LieState::OneWay);
        assert_eq!(interface.keys.active_key, Some(3));
        assert!(interface.sent_offer.is_some());
        assert!(!interface.history_verbose.is_empty());
        assert!(!snapshot.database.is_empty());

        let json = serde_json::to_string(&snapshot).unwrap();
        assert!(!json.contains("secret-value"));
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["name"], "leaf-1");
        assert!(value["interfaces"][0]["packets"]["sent"]["lie"].as_u64().unwrap() >= 1);
    }
}
