//! RIFT node orchestration.
//!
//! This crate ties the protocol crates together into a running node:
//! - [`config`]: node and interface configuration with validation
//! - [`Node`]: one RIFT node driving its LIE, ZTP and flooding machines,
//!   the TIE database and route computation from received datagrams and
//!   timer expiries
//! - [`NodeSnapshot`]: serializable introspection of a node
//! - [`Fabric`]: an in-memory fabric on a virtual clock for tests and demos
//!
//! The node is sans-IO. The binary owns the sockets and the clock; it feeds
//! datagrams to [`Node::receive`], calls [`Node::on_timers`] when the next
//! expiry is reached and sends what [`Node::drain_outbox`] returns.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod interface;
pub mod node;
pub mod sim;
pub mod snapshot;

#[cfg(test)]
mod scenarios;

// Re-export main types
pub use config::{ConfigError, InterfaceConfig, NodeConfig, PrefixConfig, TimerConfig};
pub use interface::{Interface, PacketCounters, Port};
pub use node::{Node, Outgoing, TimerHandle};
pub use sim::{Fabric, FabricStats, SimError, Tamper, Transit};
pub use snapshot::{InterfaceSnapshot, KeySummary, NodeSnapshot};
