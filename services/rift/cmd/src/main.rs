//! RIFT routing node binary.
//!
//! Runs the nodes of a topology file, either over UDP sockets on the wall
//! clock or, with `--simulate`, over the in-memory fabric on a virtual clock.
//! The state of every node can be dumped as JSON on exit.

use anyhow::{Context, Result};
use clap::Parser;
use rift_engine::{Fabric, Node, NodeSnapshot};
use std::path::PathBuf;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

mod config;
mod logging;
mod transport;

use config::{LinkConfig, TopologyConfig};
use logging::RiftLogFormatter;
use transport::{Inbound, Transport};

const INBOUND_QUEUE_DEPTH: usize = 1024;
const IDLE_WAKEUP: Duration = Duration::from_secs(1);
const DEFAULT_SIMULATION_TIME: Duration = Duration::from_secs(60);

/// RIFT routing node for Clos fabrics
#[derive(Parser, Debug)]
#[command(name = "rift", version, about = "RIFT routing node for Clos fabrics")]
struct Args {
    /// Topology file path
    #[arg(long, short, default_value = "rift.yaml")]
    config: PathBuf,

    /// Log filter, overrides the topology file and RIFT_LOG_LEVEL
    #[arg(long)]
    log_level: Option<String>,

    /// Run only these nodes (repeatable)
    #[arg(long = "node")]
    nodes: Vec<String>,

    /// Stop after this long, e.g. 30s
    #[arg(long)]
    run_for: Option<humantime::Duration>,

    /// Run the topology on the in-memory fabric instead of UDP sockets
    #[arg(long)]
    simulate: bool,

    /// Write the state of every node as JSON to this file on exit
    #[arg(long)]
    dump_state: Option<PathBuf>,
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut topology = TopologyConfig::load_from_file(&args.config)?;
    topology.select(&args.nodes)?;
    let log_level = args.log_level.clone().unwrap_or_else(|| topology.log_level.clone());

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&log_level).context("Invalid log filter")?)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .event_format(RiftLogFormatter::new("rift"))
        .init();

    info!("Starting RIFT v{}", env!("CARGO_PKG_VERSION"));
    info!(
        "Loaded topology from {:?}: {} node(s), {} link(s)",
        args.config,
        topology.nodes.len(),
        topology.links.len()
    );

    let snapshots = if args.simulate {
        run_simulation(&topology, args.run_for.map(Into::into))?
    } else {
        run_sockets(&topology, args.run_for.map(Into::into)).await?
    };

    for snapshot in &snapshots {
        log_summary(snapshot);
    }
    if let Some(path) = &args.dump_state {
        let json = serde_json::to_string_pretty(&snapshots)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write state dump {:?}", path))?;
        info!("State of {} node(s) written to {:?}", snapshots.len(), path);
    }

    info!("RIFT stopped");
    Ok(())
}

fn run_simulation(topology: &TopologyConfig, run_for: Option<Duration>) -> Result<Vec<NodeSnapshot>> {
    let mut fabric = Fabric::new();
    for node in &topology.nodes {
        fabric.add_node(node.clone())?;
    }
    for link in &topology.links {
        let (a, a_interface) = LinkConfig::endpoint(&link.a)?;
        let (b, b_interface) = LinkConfig::endpoint(&link.b)?;
        fabric.link(a, a_interface, b, b_interface)?;
    }

    let duration = run_for.unwrap_or(DEFAULT_SIMULATION_TIME);
    info!("Simulating {} of fabric time", humantime::format_duration(duration));
    fabric.start();
    fabric.run_for(duration);

    let stats = fabric.stats();
    info!(
        "Simulation finished: {} datagrams delivered, {} lost, {} tampered",
        stats.delivered, stats.lost, stats.tampered
    );
    Ok(fabric.nodes().map(Node::snapshot).collect())
}

async fn run_sockets(topology: &TopologyConfig, run_for: Option<Duration>) -> Result<Vec<NodeSnapshot>> {
    let mut nodes = topology
        .nodes
        .iter()
        .map(|config| Node::new(config.clone()))
        .collect::<Result<Vec<_>, _>>()?;

    let (inbound_tx, mut inbound_rx) = mpsc::channel::<Inbound>(INBOUND_QUEUE_DEPTH);
    let transport = Transport::bind(&nodes, inbound_tx).await?;

    let mut sigterm = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
        .map_err(|e| anyhow::anyhow!("Failed to install SIGTERM handler: {}", e))?;
    let mut sigint = tokio::signal::unix::signal(tokio::signal::unix::SignalKind::interrupt())
        .map_err(|e| anyhow::anyhow!("Failed to install SIGINT handler: {}", e))?;
    let deadline = run_for.map(|duration| tokio::time::Instant::now() + duration);

    let now = Instant::now();
    for node in &mut nodes {
        node.start(now);
        info!("Node {} started", node.name());
    }
    flush(&transport, &mut nodes).await;

    loop {
        let sleep_for = nodes
            .iter()
            .filter_map(Node::next_expiry)
            .min()
            .map_or(IDLE_WAKEUP, |expiry| expiry.saturating_duration_since(Instant::now()));

        tokio::select! {
            Some(inbound) = inbound_rx.recv() => {
                debug!(
                    "Received {} datagram of {} bytes from {}",
                    inbound.port,
                    inbound.datagram.len(),
                    inbound.source
                );
                if let Some(node) = nodes.get_mut(inbound.node) {
                    node.receive(
                        inbound.interface,
                        inbound.datagram,
                        Some(inbound.source.ip()),
                        Instant::now(),
                    );
                }
            }

            _ = tokio::time::sleep(sleep_for) => {
                let now = Instant::now();
                for node in &mut nodes {
                    if node.timers_expired(now) {
                        node.on_timers(now);
                    }
                }
            }

            _ = async {
                match deadline {
                    Some(deadline) => tokio::time::sleep_until(deadline).await,
                    None => std::future::pending().await,
                }
            } => {
                info!("Run time elapsed, shutting down");
                break;
            }

            _ = sigterm.recv() => {
                info!("Received SIGTERM, shutting down");
                break;
            }

            _ = sigint.recv() => {
                info!("Received SIGINT, shutting down");
                break;
            }
        }

        flush(&transport, &mut nodes).await;
    }

    let snapshots: Vec<NodeSnapshot> = nodes.iter().map(Node::snapshot).collect();
    for node in &mut nodes {
        node.stop();
    }
    transport.shutdown().await;
    Ok(snapshots)
}

async fn flush(transport: &Transport, nodes: &mut [Node]) {
    for (index, node) in nodes.iter_mut().enumerate() {
        for outgoing in node.drain_outbox() {
            if let Err(error) = transport.send(index, &outgoing).await {
                warn!("Node {}: {:#}", node.name(), error);
            }
        }
    }
}

fn log_summary(snapshot: &NodeSnapshot) {
    let level = snapshot
        .level
        .map_or_else(|| "undefined".to_string(), |level| level.to_string());
    let three_way = snapshot
        .interfaces
        .iter()
        .filter(|interface| interface.neighbor.is_some())
        .count();
    let routes = snapshot
        .routes
        .as_ref()
        .map_or(0, |routes| routes.rib.len());
    info!(
        "Node {} level {}: {}/{} interfaces with a neighbor, {} TIEs, {} routes after {} SPF runs",
        snapshot.name,
        level,
        three_way,
        snapshot.interfaces.len(),
        snapshot.database.len(),
        routes,
        snapshot.spf_runs
    );
}
