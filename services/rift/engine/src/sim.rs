//! In-memory fabric for development and testing.
//!
//! A [`Fabric`] holds several nodes joined by point-to-point links and
//! drives them on a virtual clock: datagrams are delivered between the
//! outboxes and receive paths of linked interfaces, timers fire when the
//! clock reaches them. Nothing touches a socket or the wall clock, so runs
//! are deterministic.

use crate::config::{ConfigError, NodeConfig};
use crate::interface::Port;
use crate::node::Node;
use bytes::Bytes;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use std::net::{IpAddr, Ipv4Addr};
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

const MAX_DELIVERY_ROUNDS: usize = 10_000;

/// Fabric errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SimError {
    /// No node with that name
    #[error("unknown node {0}")]
    UnknownNode(String),
    /// The node has no interface with that name
    #[error("node {node} has no interface {interface}")]
    UnknownInterface {
        /// Node name
        node: String,
        /// Interface name
        interface: String,
    },
    /// Interface already cabled
    #[error("interface {node}:{interface} is already linked")]
    AlreadyLinked {
        /// Node name
        node: String,
        /// Interface name
        interface: String,
    },
    /// Two nodes share a name
    #[error("duplicate node {0}")]
    DuplicateNode(String),
    /// Node configuration rejected
    #[error("invalid node configuration: {0}")]
    Config(#[from] ConfigError),
}

/// A datagram on its way across a link
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Transit {
    /// Sending node
    pub from: String,
    /// Sending interface
    pub interface: String,
    /// Receiving node
    pub to: String,
    /// Socket the datagram belongs to
    pub port: Port,
}

/// Rewrites or drops datagrams in flight. Returning `None` drops it.
pub type Tamper = Box<dyn FnMut(&Transit, Bytes) -> Option<Bytes>>;

/// Delivery statistics
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FabricStats {
    /// Datagrams handed to a receiving node
    pub delivered: u64,
    /// Datagrams lost on a down or missing link
    pub lost: u64,
    /// Datagrams dropped by the tamper hook
    pub tampered: u64,
}

type Endpoint = (usize, usize);

#[derive(Debug, Clone, Copy)]
struct Link {
    peer: Endpoint,
    up: bool,
}

/// Nodes, links and a virtual clock
pub struct Fabric {
    now: Instant,
    started: bool,
    nodes: Vec<Node>,
    names: BTreeMap<String, usize>,
    links: HashMap<Endpoint, Link>,
    tamper: Option<Tamper>,
    stats: FabricStats,
}

impl fmt::Debug for Fabric {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Fabric")
            .field("nodes", &self.names.keys().collect::<Vec<_>>())
            .field("links", &self.links.len())
            .field("started", &self.started)
            .field("stats", &self.stats)
            .finish()
    }
}

impl Default for Fabric {
    fn default() -> Self {
        Self::new()
    }
}

impl Fabric {
    /// Empty fabric with the clock at the current instant
    pub fn new() -> Self {
        Self {
            now: Instant::now(),
            started: false,
            nodes: Vec::new(),
            names: BTreeMap::new(),
            links: HashMap::new(),
            tamper: None,
            stats: FabricStats::default(),
        }
    }

    /// Current virtual time
    pub fn now(&self) -> Instant {
        self.now
    }

    /// Delivery statistics
    pub fn stats(&self) -> FabricStats {
        self.stats
    }

    /// Add a node. Nodes added after [`Fabric::start`] start right away.
    pub fn add_node(&mut self, config: NodeConfig) -> Result<(), SimError> {
        if self.names.contains_key(&config.name) {
            return Err(SimError::DuplicateNode(config.name));
        }
        let mut node = Node::new(config)?;
        if self.started {
            node.start(self.now);
        }
        self.names.insert(node.name().to_string(), self.nodes.len());
        self.nodes.push(node);
        Ok(())
    }

    /// Cable `a:a_interface` to `b:b_interface`
    pub fn link(
        &mut self,
        a: &str,
        a_interface: &str,
        b: &str,
        b_interface: &str,
    ) -> Result<(), SimError> {
        let a_end = self.endpoint(a, a_interface)?;
        let b_end = self.endpoint(b, b_interface)?;
        for ((node, interface), end) in [((a, a_interface), a_end), ((b, b_interface), b_end)] {
            if self.links.contains_key(&end) {
                return Err(SimError::AlreadyLinked {
                    node: node.to_string(),
                    interface: interface.to_string(),
                });
            }
        }
        self.links.insert(a_end, Link { peer: b_end, up: true });
        self.links.insert(b_end, Link { peer: a_end, up: true });
        Ok(())
    }

    /// Take the link on `node:interface` down in both directions
    pub fn fail_link(&mut self, node: &str, interface: &str) -> Result<(), SimError> {
        self.set_link_up(node, interface, false)
    }

    /// Bring the link on `node:interface` back up
    pub fn restore_link(&mut self, node: &str, interface: &str) -> Result<(), SimError> {
        self.set_link_up(node, interface, true)
    }

    fn set_link_up(&mut self, node: &str, interface: &str, up: bool) -> Result<(), SimError> {
        let end = self.endpoint(node, interface)?;
        let peer = match self.links.get_mut(&end) {
            Some(link) => {
                link.up = up;
                link.peer
            }
            None => return Ok(()),
        };
        if let Some(link) = self.links.get_mut(&peer) {
            link.up = up;
        }
        debug!(
            component = "rift-sim",
            "Link {}:{} {}",
            node,
            interface,
            if up { "up" } else { "down" }
        );
        Ok(())
    }

    /// Install a hook that sees every datagram before delivery
    pub fn set_tamper(&mut self, tamper: Tamper) {
        self.tamper = Some(tamper);
    }

    /// Remove the tamper hook
    pub fn clear_tamper(&mut self) {
        self.tamper = None;
    }

    /// Node by name
    pub fn node(&self, name: &str) -> Option<&Node> {
        self.names.get(name).map(|&index| &self.nodes[index])
    }

    /// All nodes in insertion order
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.nodes.iter()
    }

    /// Start every node
    pub fn start(&mut self) {
        self.started = true;
        for node in &mut self.nodes {
            node.start(self.now);
        }
        self.deliver();
    }

    /// Stop one node; its neighbors notice through holdtime expiry
    pub fn stop_node(&mut self, name: &str) -> Result<(), SimError> {
        let index = self.index(name)?;
        self.nodes[index].stop();
        Ok(())
    }

    /// Advance the clock by `duration`, firing timers and delivering
    /// datagrams as they become due
    pub fn run_for(&mut self, duration: Duration) {
        let deadline = self.now + duration;
        self.deliver();
        loop {
            let next = self.nodes.iter().filter_map(Node::next_expiry).min();
            let due = match next {
                Some(due) if due <= deadline => due,
                _ => break,
            };
            self.now = self.now.max(due);
            for node in &mut self.nodes {
                if node.timers_expired(self.now) {
                    node.on_timers(self.now);
                }
            }
            self.deliver();
        }
        self.now = deadline;
    }

    fn index(&self, name: &str) -> Result<usize, SimError> {
        self.names
            .get(name)
            .copied()
            .ok_or_else(|| SimError::UnknownNode(name.to_string()))
    }

    fn endpoint(&self, node: &str, interface: &str) -> Result<Endpoint, SimError> {
        let index = self.index(node)?;
        let interface_index = self.nodes[index].interface_index(interface).ok_or_else(|| {
            SimError::UnknownInterface {
                node: node.to_string(),
                interface: interface.to_string(),
            }
        })?;
        Ok((index, interface_index))
    }

    // Every node is reachable at one synthetic address on all its links
    fn address(index: usize) -> IpAddr {
        IpAddr::V4(Ipv4Addr::from(0x0AFF_0000u32 + index as u32 + 1))
    }

    // Move datagrams between outboxes until every outbox stays empty
    fn deliver(&mut self) {
        for _ in 0..MAX_DELIVERY_ROUNDS {
            let mut in_flight = Vec::new();
            for (index, node) in self.nodes.iter_mut().enumerate() {
                in_flight.extend(node.drain_outbox().into_iter().map(|out| (index, out)));
            }
            if in_flight.is_empty() {
                return;
            }

            for (from, out) in in_flight {
                let link = match self.links.get(&(from, out.interface)) {
                    Some(link) if link.up => *link,
                    _ => {
                        self.stats.lost += 1;
                        continue;
                    }
                };
                let (to, to_interface) = link.peer;
                let datagram = match self.tamper.as_mut() {
                    Some(tamper) => {
                        let transit = Transit {
                            from: self.nodes[from].name().to_string(),
                            interface: self.nodes[from].interfaces()[out.interface]
                                .name()
                                .to_string(),
                            to: self.nodes[to].name().to_string(),
                            port: out.port,
                        };
                        match tamper(&transit, out.datagram) {
                            Some(datagram) => datagram,
                            None => {
                                self.stats.tampered += 1;
                                continue;
                            }
                        }
                    }
                    None => out.datagram,
                };
                self.stats.delivered += 1;
                self.nodes[to].receive(to_interface, datagram, Some(Self::address(from)), self.now);
            }
        }
        warn!(
            component = "rift-sim",
            "Fabric still busy after {} delivery rounds", MAX_DELIVERY_ROUNDS
        );
    }
}
