//! Node configuration model.
//!
//! These types are deserialized from the topology file by the binary and
//! validated before a [`crate::Node`] is built from them.

use rift_adjacency::LevelConfig;
use rift_security::{Key, KeySelection, KeyStore, SecurityError};
use rift_wire::{
    IpPrefix, KeyId, Level, LinkId, NodeCapabilities, SystemId, DEFAULT_LIE_HOLDTIME,
    DEFAULT_LIE_UDP_PORT, DEFAULT_MTU_SIZE, DEFAULT_TIE_UDP_FLOOD_PORT, DEFAULT_ZTP_HOLDTIME,
    ILLEGAL_SYSTEM_ID, TOP_OF_FABRIC_LEVEL,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashSet};
use std::net::{IpAddr, Ipv4Addr};
use thiserror::Error;

/// Default link-local multicast group for LIEs
pub const DEFAULT_LIE_MCAST_ADDRESS: IpAddr = IpAddr::V4(Ipv4Addr::new(224, 0, 0, 120));

/// Configuration errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// Node has no interfaces
    #[error("node {0} has no interfaces")]
    NoInterfaces(String),
    /// Two interfaces share a name
    #[error("duplicate interface name {0}")]
    DuplicateInterface(String),
    /// A key id is referenced but not defined
    #[error("{scope} references unknown key id {key_id}")]
    UnknownKey {
        /// Where the key was referenced
        scope: String,
        /// The missing key id
        key_id: KeyId,
    },
    /// Configured level above top of fabric
    #[error("level {0} is above top of fabric")]
    LevelOutOfRange(Level),
    /// Both leaf-only and top-of-fabric
    #[error("node cannot be both leaf-only and top-of-fabric")]
    LeafOnlyTopOfFabric,
    /// System id 0
    #[error("system id 0 is illegal")]
    IllegalSystemId,
    /// A timer that must tick has a zero interval
    #[error("timer {0} must not be zero")]
    ZeroInterval(&'static str),
    /// Key table could not be built
    #[error("key table: {0}")]
    Security(#[from] SecurityError),
}

/// Protocol timers, in milliseconds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// Interval between LIEs
    pub lie_interval: u64,
    /// Holdtime advertised in LIEs
    pub holdtime: u64,
    /// Interval between TIDEs
    pub tide_interval: u64,
    /// Interval between flooding queue services
    pub flood_service_interval: u64,
    /// Retransmission of unacknowledged TIEs and unanswered requests
    pub retransmit_interval: u64,
    /// ZTP hold-down before a level decrease is adopted
    pub ztp_holddown: u64,
    /// Delay between a topology change and the SPF run
    pub spf_delay: u64,
    /// Interval between nonce refreshes
    pub nonce_refresh: u64,
    /// How long tombstones are kept after expiry
    pub purge_grace: u64,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            lie_interval: 1_000,
            holdtime: DEFAULT_LIE_HOLDTIME as u64 * 1_000,
            tide_interval: 2_000,
            flood_service_interval: 200,
            retransmit_interval: 1_000,
            ztp_holddown: DEFAULT_ZTP_HOLDTIME as u64 * 1_000,
            spf_delay: 500,
            nonce_refresh: 60_000,
            purge_grace: 60_000,
        }
    }
}

impl TimerConfig {
    /// Holdtime in whole seconds as carried in LIEs
    pub fn holdtime_secs(&self) -> u16 {
        (self.holdtime / 1_000).clamp(1, u16::MAX as u64) as u16
    }

    /// Purge grace in whole seconds
    pub fn purge_grace_secs(&self) -> u32 {
        (self.purge_grace / 1_000).min(u32::MAX as u64) as u32
    }

    fn validate(&self) -> Result<(), ConfigError> {
        for (name, value) in [
            ("lie_interval", self.lie_interval),
            ("holdtime", self.holdtime),
            ("tide_interval", self.tide_interval),
            ("flood_service_interval", self.flood_service_interval),
            ("nonce_refresh", self.nonce_refresh),
        ] {
            if value == 0 {
                return Err(ConfigError::ZeroInterval(name));
            }
        }
        Ok(())
    }
}

/// An advertised prefix
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixConfig {
    /// The prefix
    pub prefix: IpPrefix,
    /// Metric, default 1
    #[serde(default = "default_metric")]
    pub metric: u32,
}

fn default_metric() -> u32 {
    1
}

fn default_mtu() -> u32 {
    DEFAULT_MTU_SIZE
}

fn default_lie_port() -> u16 {
    DEFAULT_LIE_UDP_PORT
}

fn default_flood_port() -> u16 {
    DEFAULT_TIE_UDP_FLOOD_PORT
}

fn default_lie_address() -> IpAddr {
    DEFAULT_LIE_MCAST_ADDRESS
}

/// One interface of a node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceConfig {
    /// Interface name
    pub name: String,
    /// Link cost
    #[serde(default = "default_metric")]
    pub metric: u32,
    /// Link MTU
    #[serde(default = "default_mtu")]
    pub mtu: u32,
    /// Local link id, defaults to the interface position plus one
    #[serde(default)]
    pub local_id: Option<LinkId>,
    /// Interface active key, overrides the node key selection
    #[serde(default)]
    pub active_key: Option<KeyId>,
    /// Interface accept keys
    #[serde(default)]
    pub accept_keys: BTreeSet<KeyId>,
    /// Local address to bind the sockets to
    #[serde(default)]
    pub bind_address: Option<IpAddr>,
    /// Destination of sent LIEs
    #[serde(default = "default_lie_address")]
    pub lie_address: IpAddr,
    /// Port LIEs are received on
    #[serde(default = "default_lie_port")]
    pub rx_lie_port: u16,
    /// Port LIEs are sent to
    #[serde(default = "default_lie_port")]
    pub tx_lie_port: u16,
    /// Port flooding packets are received on, advertised in LIEs
    #[serde(default = "default_flood_port")]
    pub flood_port: u16,
}

impl InterfaceConfig {
    /// Interface with default settings
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            metric: default_metric(),
            mtu: DEFAULT_MTU_SIZE,
            local_id: None,
            active_key: None,
            accept_keys: BTreeSet::new(),
            bind_address: None,
            lie_address: DEFAULT_LIE_MCAST_ADDRESS,
            rx_lie_port: DEFAULT_LIE_UDP_PORT,
            tx_lie_port: DEFAULT_LIE_UDP_PORT,
            flood_port: DEFAULT_TIE_UDP_FLOOD_PORT,
        }
    }

    /// Outer key selection configured on this interface
    pub fn keys(&self) -> KeySelection {
        KeySelection {
            active_key: self.active_key,
            accept_keys: self.accept_keys.clone(),
        }
    }
}

/// One node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Node name
    pub name: String,
    /// System id, never 0
    pub system_id: SystemId,
    /// Configured level; derived through ZTP when absent
    #[serde(default)]
    pub level: Option<Level>,
    /// Node is always a leaf
    #[serde(default)]
    pub leaf_only: bool,
    /// Node is top of fabric
    #[serde(default)]
    pub top_of_fabric: bool,
    /// PoD of the node, 0 for none
    #[serde(default)]
    pub pod: u32,
    /// IPv4 prefixes advertised north
    #[serde(default)]
    pub v4_prefixes: Vec<PrefixConfig>,
    /// IPv6 prefixes advertised north
    #[serde(default)]
    pub v6_prefixes: Vec<PrefixConfig>,
    /// Key table
    #[serde(default)]
    pub keys: Vec<Key>,
    /// Node active outer key
    #[serde(default)]
    pub active_key: Option<KeyId>,
    /// Node accept outer keys
    #[serde(default)]
    pub accept_keys: BTreeSet<KeyId>,
    /// Active origin key
    #[serde(default)]
    pub active_origin_key: Option<KeyId>,
    /// Accepted origin keys
    #[serde(default)]
    pub accept_origin_keys: BTreeSet<KeyId>,
    /// Protocol timers
    #[serde(default)]
    pub timers: TimerConfig,
    /// Interfaces
    #[serde(default)]
    pub interfaces: Vec<InterfaceConfig>,
}

impl NodeConfig {
    /// Node with default settings and no interfaces
    pub fn new(name: impl Into<String>, system_id: SystemId) -> Self {
        Self {
            name: name.into(),
            system_id,
            level: None,
            leaf_only: false,
            top_of_fabric: false,
            pod: 0,
            v4_prefixes: Vec::new(),
            v6_prefixes: Vec::new(),
            keys: Vec::new(),
            active_key: None,
            accept_keys: BTreeSet::new(),
            active_origin_key: None,
            accept_origin_keys: BTreeSet::new(),
            timers: TimerConfig::default(),
            interfaces: Vec::new(),
        }
    }

    /// Check the configuration for consistency
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.system_id == ILLEGAL_SYSTEM_ID {
            return Err(ConfigError::IllegalSystemId);
        }
        if self.interfaces.is_empty() {
            return Err(ConfigError::NoInterfaces(self.name.clone()));
        }
        if let Some(level) = self.level {
            if level > TOP_OF_FABRIC_LEVEL {
                return Err(ConfigError::LevelOutOfRange(level));
            }
        }
        if self.leaf_only && self.top_of_fabric {
            return Err(ConfigError::LeafOnlyTopOfFabric);
        }

        let mut names = HashSet::new();
        for interface in &self.interfaces {
            if !names.insert(interface.name.as_str()) {
                return Err(ConfigError::DuplicateInterface(interface.name.clone()));
            }
        }

        let known: HashSet<KeyId> = self.keys.iter().map(|key| key.id).collect();
        let check = |scope: &str, ids: &mut dyn Iterator<Item = KeyId>| {
            for key_id in ids {
                if !known.contains(&key_id) {
                    return Err(ConfigError::UnknownKey {
                        scope: scope.to_string(),
                        key_id,
                    });
                }
            }
            Ok(())
        };
        let node_scope = format!("node {}", self.name);
        check(
            &node_scope,
            &mut self.active_key.into_iter().chain(self.accept_keys.iter().copied()),
        )?;
        check(
            &node_scope,
            &mut self
                .active_origin_key
                .into_iter()
                .chain(self.accept_origin_keys.iter().copied()),
        )?;
        for interface in &self.interfaces {
            check(
                &format!("interface {}", interface.name),
                &mut interface
                    .active_key
                    .into_iter()
                    .chain(interface.accept_keys.iter().copied()),
            )?;
        }

        self.timers.validate()
    }

    /// Level configuration for ZTP
    pub fn level_config(&self) -> LevelConfig {
        LevelConfig {
            configured: self.level,
            leaf_only: self.leaf_only,
            top_of_fabric: self.top_of_fabric,
        }
    }

    /// Capabilities advertised in LIEs and node TIEs
    pub fn capabilities(&self) -> NodeCapabilities {
        let mut capabilities = NodeCapabilities::empty();
        if self.leaf_only {
            capabilities |= NodeCapabilities::LEAF_ONLY;
        }
        if self.top_of_fabric {
            capabilities |= NodeCapabilities::TOP_OF_FABRIC;
        }
        capabilities
    }

    /// Node scoped outer key selection
    pub fn keys(&self) -> KeySelection {
        KeySelection {
            active_key: self.active_key,
            accept_keys: self.accept_keys.clone(),
        }
    }

    /// Origin key selection
    pub fn origin_keys(&self) -> KeySelection {
        KeySelection {
            active_key: self.active_origin_key,
            accept_keys: self.accept_origin_keys.clone(),
        }
    }

    /// Build the key table
    pub fn key_store(&self) -> Result<KeyStore, ConfigError> {
        let mut store = KeyStore::new();
        for key in &self.keys {
            store.insert(key.clone())?;
        }
        Ok(store)
    }

    /// Prefixes advertised north with their metrics
    pub fn prefixes(&self) -> impl Iterator<Item = (IpPrefix, u32)> + '_ {
        self.v4_prefixes
            .iter()
            .chain(self.v6_prefixes.iter())
            .map(|prefix| (prefix.prefix, prefix.metric))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rift_security::Algorithm;

    fn node() -> NodeConfig {
        let mut config = NodeConfig::new("node1", 1);
        config.interfaces.push(InterfaceConfig::new("if1"));
        config
    }

    #[test]
    fn test_valid_config() {
        assert_eq!(node().validate(), Ok(()));
    }

    #[test]
    fn test_validation_failures() {
        let mut config = node();
        config.system_id = 0;
        assert_eq!(config.validate(), Err(ConfigError::IllegalSystemId));

        let mut config = node();
        config.interfaces.clear();
        assert_eq!(
            config.validate(),
            Err(ConfigError::NoInterfaces("node1".to_string()))
        );

        let mut config = node();
        config.interfaces.push(InterfaceConfig::new("if1"));
        assert_eq!(
            config.validate(),
            Err(ConfigError::DuplicateInterface("if1".to_string()))
        );

        let mut config = node();
        config.level = Some(25);
        assert_eq!(config.validate(), Err(ConfigError::LevelOutOfRange(25)));

        let mut config = node();
        config.leaf_only = true;
        config.top_of_fabric = true;
        assert_eq!(config.validate(), Err(ConfigError::LeafOnlyTopOfFabric));

        let mut config = node();
        config.timers.lie_interval = 0;
        assert_eq!(
            config.validate(),
            Err(ConfigError::ZeroInterval("lie_interval"))
        );
    }

    #[test]
    fn test_unknown_keys_rejected() {
        let mut config = node();
        config.keys.push(Key::new(1, Algorithm::HmacSha256, "secret"));
        config.active_key = Some(1);
        assert_eq!(config.validate(), Ok(()));

        config.interfaces[0].accept_keys.insert(2);
        assert_eq!(
            config.validate(),
            Err(ConfigError::UnknownKey {
                scope: "interface if1".to_string(),
                key_id: 2,
            })
        );

        let mut config = node();
        config.active_origin_key = Some(9);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::UnknownKey { key_id: 9, .. })
        ));
    }

    #[test]
    fn test_deserialize_with_defaults() {
        let yaml = r#"
name: spine-1
system_id: 101
top_of_fabric: false
v4_prefixes:
  - prefix: 10.0.0.1/32
keys:
  - id: 5
    algorithm: hmac-sha-256
    secret: s3cret
active_key: 5
timers:
  lie_interval: 500
interfaces:
  - name: if1
    metric: 10
  - name: if2
"#;
        let config: NodeConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.validate(), Ok(()));
        assert_eq!(config.level, None);
        assert_eq!(config.interfaces[0].metric, 10);
        assert_eq!(config.interfaces[1].metric, 1);
        assert_eq!(config.interfaces[1].mtu, DEFAULT_MTU_SIZE);
        assert_eq!(config.interfaces[1].lie_address, DEFAULT_LIE_MCAST_ADDRESS);
        assert_eq!(config.timers.lie_interval, 500);
        assert_eq!(config.timers.tide_interval, 2_000);
        assert_eq!(config.v4_prefixes[0].metric, 1);
        assert_eq!(config.keys[0].algorithm, Algorithm::HmacSha256);
        assert!(config.key_store().unwrap().contains(5));
        assert_eq!(config.keys().active_key, Some(5));
    }

    #[test]
    fn test_capabilities_and_level_config() {
        let mut config = node();
        config.top_of_fabric = true;
        assert!(config.capabilities().contains(NodeCapabilities::TOP_OF_FABRIC));
        assert!(config.level_config().top_of_fabric);
        assert_eq!(config.timers.holdtime_secs(), 3);
    }
}
