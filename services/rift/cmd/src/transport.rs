//! UDP sockets for the nodes of this process.
//!
//! Every interface gets two sockets: one on its LIE receive port, joined to
//! the LIE multicast group when the LIE address is multicast, and one on its
//! flooding port. A reader task per socket forwards datagrams into a single
//! channel consumed by the event loop.

use anyhow::{Context, Result};
use bytes::Bytes;
use rift_engine::{InterfaceConfig, Node, Outgoing, Port};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

const RECV_BUFFER_SIZE: usize = 65_535;

/// A datagram read from one of the sockets
#[derive(Debug)]
pub struct Inbound {
    /// Index of the receiving node
    pub node: usize,
    /// Index of the receiving interface
    pub interface: usize,
    /// Socket it arrived on
    pub port: Port,
    /// Sender
    pub source: SocketAddr,
    /// Datagram contents
    pub datagram: Bytes,
}

struct InterfaceSockets {
    lie: Arc<UdpSocket>,
    flood: Arc<UdpSocket>,
}

/// Sockets of all nodes plus their reader tasks
pub struct Transport {
    sockets: Vec<Vec<InterfaceSockets>>,
    readers: Vec<JoinHandle<()>>,
}

impl Transport {
    /// Bind the sockets of every interface and spawn their readers
    pub async fn bind(nodes: &[Node], inbound: mpsc::Sender<Inbound>) -> Result<Self> {
        let mut sockets = Vec::with_capacity(nodes.len());
        let mut readers = Vec::new();

        for (node_index, node) in nodes.iter().enumerate() {
            let mut node_sockets = Vec::with_capacity(node.interfaces().len());
            for (interface_index, interface) in node.interfaces().iter().enumerate() {
                let config = interface.config();
                let lie = Arc::new(bind_lie_socket(config).await.with_context(|| {
                    format!("Failed to bind LIE socket for {}:{}", node.name(), config.name)
                })?);
                let flood_address = SocketAddr::new(local_address(config), config.flood_port);
                let flood = Arc::new(UdpSocket::bind(flood_address).await.with_context(|| {
                    format!(
                        "Failed to bind flooding socket {} for {}:{}",
                        flood_address,
                        node.name(),
                        config.name
                    )
                })?);
                info!(
                    "Interface {}:{} listening for LIEs on {} and flooding on {}",
                    node.name(),
                    config.name,
                    lie.local_addr()?,
                    flood.local_addr()?
                );

                for (socket, port) in [(lie.clone(), Port::Lie), (flood.clone(), Port::Flood)] {
                    readers.push(tokio::spawn(read_loop(
                        socket,
                        node_index,
                        interface_index,
                        port,
                        inbound.clone(),
                    )));
                }
                node_sockets.push(InterfaceSockets { lie, flood });
            }
            sockets.push(node_sockets);
        }

        Ok(Self { sockets, readers })
    }

    /// Send one datagram from a node's outbox
    pub async fn send(&self, node: usize, outgoing: &Outgoing) -> Result<()> {
        let destination = match outgoing.destination {
            Some(destination) => destination,
            None => {
                debug!(
                    "Dropping {} datagram on interface {} without a destination",
                    outgoing.port, outgoing.interface
                );
                return Ok(());
            }
        };
        let sockets = self
            .sockets
            .get(node)
            .and_then(|interfaces| interfaces.get(outgoing.interface))
            .context("Outgoing datagram for an unknown interface")?;
        let socket = match outgoing.port {
            Port::Lie => &sockets.lie,
            Port::Flood => &sockets.flood,
        };
        socket
            .send_to(&outgoing.datagram, destination)
            .await
            .with_context(|| format!("Failed to send {} datagram to {}", outgoing.port, destination))?;
        Ok(())
    }

    /// Stop the reader tasks
    pub async fn shutdown(self) {
        for reader in &self.readers {
            reader.abort();
        }
        futures::future::join_all(self.readers).await;
    }
}

fn local_address(config: &InterfaceConfig) -> IpAddr {
    config.bind_address.unwrap_or(match config.lie_address {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    })
}

async fn bind_lie_socket(config: &InterfaceConfig) -> Result<UdpSocket> {
    match config.lie_address {
        IpAddr::V4(group) if group.is_multicast() => {
            let socket =
                UdpSocket::bind(SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), config.rx_lie_port))
                    .await?;
            let interface = match config.bind_address {
                Some(IpAddr::V4(address)) => address,
                _ => Ipv4Addr::UNSPECIFIED,
            };
            socket.join_multicast_v4(group, interface)?;
            socket.set_multicast_loop_v4(true)?;
            Ok(socket)
        }
        IpAddr::V6(group) if group.is_multicast() => {
            let socket =
                UdpSocket::bind(SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), config.rx_lie_port))
                    .await?;
            socket.join_multicast_v6(&group, 0)?;
            socket.set_multicast_loop_v6(true)?;
            Ok(socket)
        }
        _ => Ok(UdpSocket::bind(SocketAddr::new(local_address(config), config.rx_lie_port)).await?),
    }
}

async fn read_loop(
    socket: Arc<UdpSocket>,
    node: usize,
    interface: usize,
    port: Port,
    inbound: mpsc::Sender<Inbound>,
) {
    let mut buffer = vec![0u8; RECV_BUFFER_SIZE];
    loop {
        match socket.recv_from(&mut buffer).await {
            Ok((length, source)) => {
                let datagram = Bytes::copy_from_slice(&buffer[..length]);
                let message = Inbound {
                    node,
                    interface,
                    port,
                    source,
                    datagram,
                };
                if inbound.send(message).await.is_err() {
                    break;
                }
            }
            Err(error) => {
                warn!("Receive error on {} socket: {}", port, error);
            }
        }
    }
}
