//! A RIFT node.
//!
//! The node owns its interfaces, the ZTP machine, the TIE database and a
//! timer scheduler. It performs no I/O: received datagrams are handed to
//! [`Node::receive`], expired timers are run by [`Node::on_timers`] and the
//! datagrams to send are collected with [`Node::drain_outbox`]. All state
//! changes happen inside these calls, on the caller's thread.

use crate::config::{ConfigError, NodeConfig, TimerConfig};
use crate::interface::{Interface, Port};
use crate::snapshot::NodeSnapshot;
use bytes::Bytes;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rift_adjacency::{LieEffect, LieEvent, Neighbor, NodeView, ReceivedLie, Ztp, ZtpEffect, ZtpEvent};
use rift_fsm::{Scheduler, Timer};
use rift_routing::{compute_routes, LocalAdjacency, Rib, RouteComputation, RoutingContext};
use rift_security::{
    origin_envelope, seal, verify_nonce, verify_origin, verify_outer, AuthCounter, KeySelection,
    KeyStore,
};
use rift_topology::{
    node_element, prefix_element, FloodPeer, FloodScope, Freshness, NeighborDirection, Origination,
    Originator, StoredTie, TieDatabase, NEGATIVE_DISAGGREGATION_TIE_NR, NODE_TIE_NR, PREFIX_TIE_NR,
};
use rift_wire::{
    decode_packet, encode_packet, encode_tie, Envelope, EnvelopeBuilder, IpPrefix, Level,
    LinkIdPair, NodeCapabilities, NodeNeighborsTieElement, OriginEnvelope, PacketContent,
    PacketHeader, ProtocolPacket, SystemId, TieDirection, TieElement, TieHeaderWithLifetime,
    TieId, TiePacket, TieType, WireError, DEFAULT_DISTANCE, INFINITE_DISTANCE,
    TOP_OF_FABRIC_LEVEL,
};
use std::collections::{BTreeMap, BTreeSet};
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

const TIE_AGING_INTERVAL: Duration = Duration::from_secs(1);

/// Timers owned by a node. Interface timers carry the interface index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TimerHandle {
    /// Periodic LIE transmission
    LieSend(usize),
    /// Neighbor holdtime
    HoldTime(usize),
    /// Local nonce refresh
    NonceRefresh(usize),
    /// Flooding queue service
    FloodService(usize),
    /// Periodic TIDE transmission
    TideSend(usize),
    /// ZTP hold-down
    ZtpHoldDown,
    /// Database aging, once a second
    TieAging,
    /// Delayed SPF run
    SpfDelay,
}

// Timers of one interface
#[derive(Debug)]
struct InterfaceTimers {
    lie_send: Timer<TimerHandle>,
    hold_time: Timer<TimerHandle>,
    nonce_refresh: Timer<TimerHandle>,
    flood_service: Timer<TimerHandle>,
    tide_send: Timer<TimerHandle>,
}

// Every timer a node owns, with the configured intervals
#[derive(Debug)]
struct NodeTimers {
    interfaces: Vec<InterfaceTimers>,
    ztp_holddown: Timer<TimerHandle>,
    tie_aging: Timer<TimerHandle>,
    spf_delay: Timer<TimerHandle>,
}

impl NodeTimers {
    fn new(config: &TimerConfig, interfaces: usize) -> Self {
        let ms = Duration::from_millis;
        Self {
            interfaces: (0..interfaces)
                .map(|index| InterfaceTimers {
                    lie_send: Timer::periodic(TimerHandle::LieSend(index), ms(config.lie_interval)),
                    hold_time: Timer::one_shot(TimerHandle::HoldTime(index), ms(config.holdtime)),
                    nonce_refresh: Timer::periodic(
                        TimerHandle::NonceRefresh(index),
                        ms(config.nonce_refresh),
                    ),
                    flood_service: Timer::periodic(
                        TimerHandle::FloodService(index),
                        ms(config.flood_service_interval),
                    ),
                    tide_send: Timer::periodic(TimerHandle::TideSend(index), ms(config.tide_interval)),
                })
                .collect(),
            ztp_holddown: Timer::one_shot(TimerHandle::ZtpHoldDown, ms(config.ztp_holddown)),
            tie_aging: Timer::periodic(TimerHandle::TieAging, TIE_AGING_INTERVAL),
            spf_delay: Timer::one_shot(TimerHandle::SpfDelay, ms(config.spf_delay)),
        }
    }
}

/// A datagram ready to be sent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Outgoing {
    /// Index of the sending interface
    pub interface: usize,
    /// Socket the datagram belongs to
    pub port: Port,
    /// Destination, when known. Flooding packets need a neighbor address.
    pub destination: Option<SocketAddr>,
    /// The sealed datagram
    pub datagram: Bytes,
}

/// One RIFT node
#[derive(Debug)]
pub struct Node {
    config: NodeConfig,
    keys: KeyStore,
    origin_keys: KeySelection,
    ztp: Ztp,
    interfaces: Vec<Interface>,
    db: TieDatabase,
    originator: Originator,
    scheduler: Scheduler<TimerHandle>,
    timers: NodeTimers,
    routes: Option<RouteComputation>,
    spf_runs: u64,
    topology_changed: bool,
    outbox: Vec<Outgoing>,
    running: bool,
}

impl Node {
    /// Build a node from a validated configuration
    pub fn new(config: NodeConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let keys = config.key_store()?;
        let node_keys = config.keys();
        let holdtime = config.timers.holdtime_secs();
        let mut rng = StdRng::seed_from_u64(config.system_id);
        let interfaces = config
            .interfaces
            .iter()
            .cloned()
            .enumerate()
            .map(|(index, interface)| {
                Interface::new(index, interface, &node_keys, holdtime, rng.gen_range(1..=u16::MAX))
            })
            .collect();

        Ok(Self {
            keys,
            origin_keys: config.origin_keys(),
            ztp: Ztp::new(config.level_config()),
            interfaces,
            db: TieDatabase::new(config.timers.purge_grace_secs()),
            originator: Originator::new(config.system_id),
            scheduler: Scheduler::new(),
            timers: NodeTimers::new(&config.timers, config.interfaces.len()),
            routes: None,
            spf_runs: 0,
            topology_changed: false,
            outbox: Vec::new(),
            running: false,
            config,
        })
    }

    /// Node name
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// System ID
    pub fn system_id(&self) -> SystemId {
        self.config.system_id
    }

    /// Configuration the node was built from
    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    /// Current level
    pub fn level(&self) -> Option<Level> {
        self.ztp.level()
    }

    /// The ZTP machine
    pub fn ztp(&self) -> &Ztp {
        &self.ztp
    }

    /// Key table
    pub fn key_store(&self) -> &KeyStore {
        &self.keys
    }

    /// Origin key selection
    pub fn origin_keys(&self) -> &KeySelection {
        &self.origin_keys
    }

    /// Interfaces in configuration order
    pub fn interfaces(&self) -> &[Interface] {
        &self.interfaces
    }

    /// Interface by name
    pub fn interface(&self, name: &str) -> Option<&Interface> {
        self.interfaces.iter().find(|interface| interface.name() == name)
    }

    /// Index of an interface by name
    pub fn interface_index(&self, name: &str) -> Option<usize> {
        self.interfaces.iter().position(|interface| interface.name() == name)
    }

    /// TIE database
    pub fn database(&self) -> &TieDatabase {
        &self.db
    }

    /// Result of the last route computation
    pub fn routes(&self) -> Option<&RouteComputation> {
        self.routes.as_ref()
    }

    /// Current RIB
    pub fn rib(&self) -> Option<&Rib> {
        self.routes.as_ref().map(|routes| &routes.rib)
    }

    /// Number of completed SPF runs
    pub fn spf_runs(&self) -> u64 {
        self.spf_runs
    }

    /// Whether the node has been started and not stopped
    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Earliest pending timer
    pub fn next_expiry(&self) -> Option<Instant> {
        self.scheduler.next_expiry()
    }

    /// Whether any timer has expired at `now`
    pub fn timers_expired(&self, now: Instant) -> bool {
        self.scheduler.expired_timers_pending(now)
    }

    /// Introspection view of the node
    pub fn snapshot(&self) -> NodeSnapshot {
        NodeSnapshot::capture(self)
    }

    /// Take every datagram queued for sending
    pub fn drain_outbox(&mut self) -> Vec<Outgoing> {
        std::mem::take(&mut self.outbox)
    }

    /// Derive the first level, send the first LIEs and start the timers
    pub fn start(&mut self, now: Instant) {
        if self.running {
            return;
        }
        self.running = true;
        info!(
            component = "rift-node",
            "Starting node {} (system id {}) with {} interfaces",
            self.config.name,
            self.config.system_id,
            self.interfaces.len()
        );

        for effect in self.ztp.start() {
            self.apply_ztp_effect(effect, now);
        }

        for index in 0..self.interfaces.len() {
            let view = self.view(index);
            for effect in self.interfaces[index].lie.start(&view) {
                self.apply_lie_effect(index, effect, now);
            }
            let timers = &self.timers.interfaces[index];
            timers.lie_send.start(&mut self.scheduler, now);
            timers.nonce_refresh.start(&mut self.scheduler, now);
        }
        self.timers.tie_aging.start(&mut self.scheduler, now);

        self.topology_changed = true;
        self.settle(now);
    }

    /// Stop every timer and drop flooding state and queued datagrams
    pub fn stop(&mut self) {
        if !self.running {
            return;
        }
        info!(component = "rift-node", "Stopping node {}", self.config.name);
        self.scheduler.stop_all_timers();
        for interface in &mut self.interfaces {
            interface.flood = None;
        }
        self.outbox.clear();
        self.running = false;
    }

    /// Handle a datagram received on interface `index` from `source`
    pub fn receive(&mut self, index: usize, datagram: Bytes, source: Option<IpAddr>, now: Instant) {
        if !self.running {
            return;
        }
        if index >= self.interfaces.len() {
            warn!(
                component = "rift-node",
                "Node {} received a datagram on unknown interface {}", self.config.name, index
            );
            return;
        }
        if let Some((envelope, packet)) = self.open(index, datagram) {
            self.dispatch(index, envelope, packet, source, now);
        }
        self.settle(now);
    }

    /// Run every expired timer. Returns the time until the next expiry.
    pub fn on_timers(&mut self, now: Instant) -> Option<Duration> {
        if self.running {
            let mut fired = Vec::new();
            self.scheduler
                .trigger_all_expired_timers(now, |handle| fired.push(handle));
            for handle in fired {
                self.fire(handle, now);
            }
            self.settle(now);
        }
        self.scheduler
            .next_expiry()
            .map(|expiry| expiry.saturating_duration_since(now))
    }

    fn view(&self, index: usize) -> NodeView {
        NodeView {
            system_id: self.config.system_id,
            level: self.ztp.level(),
            leaf: self.ztp.is_leaf(),
            hat: self.ztp.hat(),
            pod: self.config.pod,
            capabilities: self.capabilities(),
            not_a_ztp_offer: self.ztp.not_a_ztp_offer(self.interfaces[index].name()),
        }
    }

    fn capabilities(&self) -> NodeCapabilities {
        let mut capabilities = self.config.capabilities();
        if self.ztp.is_top_of_fabric() {
            capabilities |= NodeCapabilities::TOP_OF_FABRIC;
        }
        capabilities
    }

    // Run the LIE and ZTP machines until neither has queued work
    fn settle(&mut self, now: Instant) {
        loop {
            let mut quiet = true;
            for index in 0..self.interfaces.len() {
                let view = self.view(index);
                let effects = self.interfaces[index].lie.process(&view);
                quiet &= effects.is_empty();
                for effect in effects {
                    self.apply_lie_effect(index, effect, now);
                }
            }
            let effects = self.ztp.process();
            quiet &= effects.is_empty();
            for effect in effects {
                self.apply_ztp_effect(effect, now);
            }
            if quiet {
                break;
            }
        }

        if self.topology_changed {
            self.topology_changed = false;
            self.reoriginate(now);
        }
    }

    fn apply_lie_effect(&mut self, index: usize, effect: LieEffect, now: Instant) {
        match effect {
            LieEffect::SendLie(lie) => self.send(index, Port::Lie, PacketContent::Lie(lie), None),
            LieEffect::OfferToZtp(offer) => self.ztp.push_event(ZtpEvent::NeighborOffer(offer)),
            LieEffect::RestartHoldTimer(holdtime) => {
                let timer = &mut self.timers.interfaces[index].hold_time;
                timer.set_interval(holdtime);
                timer.start(&mut self.scheduler, now);
            }
            LieEffect::AdjacencyUp(neighbor) => self.start_flooding(index, &neighbor, now),
            LieEffect::AdjacencyDown(system_id) => self.stop_flooding(index, system_id, now),
        }
    }

    fn apply_ztp_effect(&mut self, effect: ZtpEffect, now: Instant) {
        match effect {
            ZtpEffect::LevelChanged(level) => {
                info!(
                    component = "rift-ztp",
                    "Node {} level now {}",
                    self.config.name,
                    level.map_or_else(|| "undefined".to_string(), |level| level.to_string())
                );
                for interface in &mut self.interfaces {
                    interface.lie.push_event(LieEvent::LevelChanged);
                }
                self.rescope_flooding();
                self.topology_changed = true;
                self.request_spf(now);
            }
            ZtpEffect::HatChanged(_) => {
                for interface in &mut self.interfaces {
                    interface.lie.push_event(LieEvent::HatChanged);
                }
            }
            ZtpEffect::StartHoldDownTimer => self.timers.ztp_holddown.start(&mut self.scheduler, now),
            ZtpEffect::StopHoldDownTimer => self.timers.ztp_holddown.stop(&mut self.scheduler),
        }
    }

    fn fire(&mut self, handle: TimerHandle, now: Instant) {
        match handle {
            TimerHandle::LieSend(index) => self.interfaces[index].lie.push_event(LieEvent::TimerTick),
            TimerHandle::HoldTime(index) => {
                debug!(
                    component = "rift-lie",
                    "Interface {} holdtime expired",
                    self.interfaces[index].name()
                );
                self.interfaces[index]
                    .lie
                    .push_event(LieEvent::HoldTimeExpired);
            }
            TimerHandle::NonceRefresh(index) => self.interfaces[index].lie.nonce_mut().refresh(),
            TimerHandle::FloodService(index) => self.service_flooding(index, now),
            TimerHandle::TideSend(index) => self.send_tides(index),
            TimerHandle::ZtpHoldDown => self.ztp.push_event(ZtpEvent::HoldDownExpired),
            TimerHandle::TieAging => self.age_database(now),
            TimerHandle::SpfDelay => self.run_spf(now),
        }
    }

    fn request_spf(&mut self, now: Instant) {
        if !self.timers.spf_delay.is_running(&self.scheduler) {
            self.timers.spf_delay.start(&mut self.scheduler, now);
        }
    }

    // Receive path

    fn open(&mut self, index: usize, datagram: Bytes) -> Option<(Envelope, ProtocolPacket)> {
        let interface = &mut self.interfaces[index];
        let envelope = match Envelope::decode(datagram) {
            Ok(envelope) => envelope,
            Err(error @ (WireError::BadMagic(_) | WireError::Incomplete)) => {
                debug!(component = "rift-node", "Interface {}: {}", interface.name(), error);
                interface.count_auth(AuthCounter::MissingOuterSecurityEnvelope);
                return None;
            }
            Err(error) => {
                debug!(component = "rift-node", "Interface {}: {}", interface.name(), error);
                interface.counters.decode_errors += 1;
                return None;
            }
        };

        match verify_outer(&self.keys, interface.keys(), &envelope) {
            Ok(counter) => interface.count_auth(counter),
            Err(counter) => {
                warn!(
                    component = "rift-node",
                    "Interface {} dropped packet: {}",
                    interface.name(),
                    counter
                );
                interface.count_auth(counter);
                return None;
            }
        }

        let packet = match decode_packet(&envelope.payload) {
            Ok(packet) => packet,
            Err(error) => {
                debug!(
                    component = "rift-node",
                    "Interface {} undecodable packet: {}",
                    interface.name(),
                    error
                );
                interface.counters.decode_errors += 1;
                return None;
            }
        };

        if let Err(counter) = verify_nonce(interface.lie.nonce(), &envelope) {
            interface.count_auth(counter);
            return None;
        }

        interface.counters.count_received(packet.content.kind());
        Some((envelope, packet))
    }

    fn dispatch(
        &mut self,
        index: usize,
        envelope: Envelope,
        packet: ProtocolPacket,
        source: Option<IpAddr>,
        now: Instant,
    ) {
        let ProtocolPacket { header, content } = packet;
        if let PacketContent::Lie(lie) = content {
            self.interfaces[index].lie.receive(ReceivedLie {
                header,
                lie,
                nonce_local: envelope.nonce_local,
                nonce_remote: envelope.nonce_remote,
                address: source,
            });
            return;
        }

        let interface = &mut self.interfaces[index];
        let neighbor = interface
            .three_way_neighbor()
            .map(|neighbor| neighbor.system_id)
            .filter(|_| interface.flood.is_some());
        let neighbor = match neighbor {
            Some(neighbor) => neighbor,
            None => {
                debug!(
                    component = "rift-flood",
                    "Interface {} dropped {} without three-way adjacency",
                    interface.name(),
                    content.kind()
                );
                interface.counters.dropped_no_adjacency += 1;
                return;
            }
        };
        if header.sender != neighbor {
            debug!(
                component = "rift-flood",
                "Interface {} dropped {} from {}, neighbor is {}",
                interface.name(),
                content.kind(),
                header.sender,
                neighbor
            );
            interface.counters.dropped_wrong_sender += 1;
            return;
        }

        match content {
            PacketContent::Tie(tie) => self.receive_tie(index, &envelope, tie, now),
            PacketContent::Tide(tide) => {
                if let Some(peer) = self.interfaces[index].flood.as_mut() {
                    peer.process_tide(&self.db, &tide);
                }
            }
            PacketContent::Tire(tire) => {
                if let Some(peer) = self.interfaces[index].flood.as_mut() {
                    peer.process_tire(&self.db, &tire);
                }
            }
            PacketContent::Lie(_) => {}
        }
    }

    fn receive_tie(&mut self, index: usize, envelope: &Envelope, tie: TiePacket, now: Instant) {
        let tie_bytes = match encode_tie(&tie) {
            Ok(bytes) => bytes,
            Err(error) => {
                warn!(component = "rift-flood", "Cannot encode received TIE: {}", error);
                return;
            }
        };
        let origin = match verify_origin(&self.keys, &self.origin_keys, envelope, &tie_bytes) {
            Ok(counter) => {
                self.interfaces[index].count_auth(counter);
                envelope.origin.clone().unwrap_or_else(OriginEnvelope::empty)
            }
            Err(counter) => {
                warn!(
                    component = "rift-flood",
                    "Interface {} dropped TIE {}: {}",
                    self.interfaces[index].name(),
                    tie.header.tie_id,
                    counter
                );
                self.interfaces[index].count_auth(counter);
                return;
            }
        };

        let header = TieHeaderWithLifetime {
            header: tie.header,
            remaining_lifetime: envelope.remaining_lifetime,
        };
        let tie_id = header.tie_id();
        let in_scope = self.interfaces[index]
            .flood
            .as_ref()
            .map_or(false, |peer| peer.scope().may_receive(&tie_id));
        if !in_scope {
            debug!(
                component = "rift-flood",
                "Interface {} ignored TIE {} outside flooding scope",
                self.interfaces[index].name(),
                tie_id
            );
            return;
        }

        if tie_id.originator == self.config.system_id {
            let freshness = self.db.compare(&header);
            if let Some(peer) = self.interfaces[index].flood.as_mut() {
                peer.tie_received(header, freshness);
            }
            if freshness == Freshness::Newer {
                let origination = self.originator.received_own(&self.db, &header);
                self.store_own(origination, now);
            }
            return;
        }

        let freshness = self
            .db
            .store(StoredTie::new(tie, tie_bytes, origin, header.remaining_lifetime));
        if let Some(peer) = self.interfaces[index].flood.as_mut() {
            peer.tie_received(header, freshness);
        }
        if freshness == Freshness::Newer {
            for (other, interface) in self.interfaces.iter_mut().enumerate() {
                if other == index {
                    continue;
                }
                if let Some(peer) = interface.flood.as_mut() {
                    peer.queue(tie_id);
                }
            }
            self.request_spf(now);
        }
    }

    // Send path

    fn send(
        &mut self,
        index: usize,
        port: Port,
        content: PacketContent,
        tie: Option<(u32, OriginEnvelope)>,
    ) {
        let kind = content.kind();
        let packet = ProtocolPacket::new(
            PacketHeader::new(self.config.system_id, self.ztp.level()),
            content,
        );
        let payload = match encode_packet(&packet) {
            Ok(payload) => payload,
            Err(error) => {
                warn!(component = "rift-node", "Cannot encode {}: {}", kind, error);
                return;
            }
        };

        let interface = &mut self.interfaces[index];
        let (local, remote) = (interface.lie.nonce().local(), interface.lie.nonce().remote());
        let mut builder =
            EnvelopeBuilder::new(interface.next_packet_number(), payload).nonces(local, remote);
        if let Some((remaining_lifetime, origin)) = tie {
            builder = builder.tie(remaining_lifetime, origin);
        }
        let datagram = match seal(&self.keys, interface.keys(), builder) {
            Ok(datagram) => datagram,
            Err(error) => {
                warn!(
                    component = "rift-node",
                    "Interface {} cannot seal {}: {}",
                    interface.name(),
                    kind,
                    error
                );
                return;
            }
        };
        interface.counters.count_sent(kind);
        self.outbox.push(Outgoing {
            interface: index,
            port,
            destination: interface.destination(port),
            datagram,
        });
    }

    fn send_tides(&mut self, index: usize) {
        let tides = match &self.interfaces[index].flood {
            Some(peer) => peer.tides(&self.db),
            None => return,
        };
        for tide in tides {
            self.send(index, Port::Flood, PacketContent::Tide(tide), None);
        }
    }

    fn service_flooding(&mut self, index: usize, now: Instant) {
        let retransmit = Duration::from_millis(self.config.timers.retransmit_interval);
        let work = match self.interfaces[index].flood.as_mut() {
            Some(peer) => peer.service(&self.db, now, retransmit),
            None => return,
        };
        for tie_id in work.ties {
            let (packet, remaining_lifetime, origin) = match self.db.get(&tie_id) {
                Some(stored) => (
                    stored.packet.clone(),
                    stored.remaining_lifetime,
                    stored.origin.clone(),
                ),
                None => continue,
            };
            self.send(
                index,
                Port::Flood,
                PacketContent::Tie(packet),
                Some((remaining_lifetime, origin)),
            );
        }
        if let Some(tire) = work.tire {
            self.send(index, Port::Flood, PacketContent::Tire(tire), None);
        }
    }

    // Flooding adjacencies

    fn flood_scope(&self, neighbor: &Neighbor) -> Option<FloodScope> {
        let level = self.ztp.level()?;
        let neighbor_level = neighbor.level?;
        let neighbor_tof = neighbor
            .capabilities
            .contains(NodeCapabilities::TOP_OF_FABRIC)
            || neighbor_level == TOP_OF_FABRIC_LEVEL;
        Some(FloodScope::new(
            NeighborDirection::from_levels(level, neighbor_level),
            self.ztp.is_top_of_fabric(),
            neighbor_tof,
        ))
    }

    fn start_flooding(&mut self, index: usize, neighbor: &Neighbor, now: Instant) {
        let scope = match self.flood_scope(neighbor) {
            Some(scope) => scope,
            None => {
                warn!(
                    component = "rift-flood",
                    "Interface {} three-way without levels, not flooding",
                    self.interfaces[index].name()
                );
                return;
            }
        };
        info!(
            component = "rift-flood",
            "Interface {} flooding with {} ({})",
            self.interfaces[index].name(),
            neighbor.system_id,
            scope.direction
        );
        let mut peer = FloodPeer::new(neighbor.system_id, scope);
        peer.queue_all(&self.db);
        self.interfaces[index].flood = Some(peer);

        let timers = &self.timers.interfaces[index];
        timers.flood_service.start(&mut self.scheduler, now);
        timers.tide_send.start(&mut self.scheduler, now);
        self.send_tides(index);

        self.topology_changed = true;
        self.request_spf(now);
    }

    fn stop_flooding(&mut self, index: usize, system_id: SystemId, now: Instant) {
        if self.interfaces[index].flood.take().is_some() {
            info!(
                component = "rift-flood",
                "Interface {} stopped flooding with {}",
                self.interfaces[index].name(),
                system_id
            );
        }
        let timers = &self.timers.interfaces[index];
        timers.flood_service.stop(&mut self.scheduler);
        timers.tide_send.stop(&mut self.scheduler);
        self.topology_changed = true;
        self.request_spf(now);
    }

    // A level change moves neighbors between north, south and east-west
    fn rescope_flooding(&mut self) {
        for index in 0..self.interfaces.len() {
            let interface = &self.interfaces[index];
            let (neighbor, current, scope) = match (&interface.flood, interface.lie.neighbor()) {
                (Some(peer), Some(neighbor)) => {
                    (peer.neighbor(), peer.scope(), self.flood_scope(neighbor))
                }
                _ => continue,
            };
            if let Some(scope) = scope.filter(|scope| *scope != current) {
                let mut peer = FloodPeer::new(neighbor, scope);
                peer.queue_all(&self.db);
                self.interfaces[index].flood = Some(peer);
            }
        }
    }

    // Database maintenance and origination

    fn age_database(&mut self, now: Instant) {
        let report = self.db.age(TIE_AGING_INTERVAL.as_secs() as u32);
        if !report.is_empty() {
            for tie_id in &report.expired {
                for interface in &mut self.interfaces {
                    if let Some(peer) = interface.flood.as_mut() {
                        peer.queue(*tie_id);
                    }
                }
            }
            self.request_spf(now);
        }
        for origination in self.originator.refresh_due(&self.db) {
            self.store_own(origination, now);
        }
    }

    fn store_own(&mut self, origination: Origination, now: Instant) {
        let Origination {
            packet,
            remaining_lifetime,
        } = origination;
        let tie_id = packet.header.tie_id;
        let encoded = match encode_tie(&packet) {
            Ok(encoded) => encoded,
            Err(error) => {
                warn!(component = "rift-flood", "Cannot encode own TIE {}: {}", tie_id, error);
                return;
            }
        };
        let origin = match origin_envelope(&self.keys, &self.origin_keys, &encoded) {
            Ok(origin) => origin,
            Err(error) => {
                warn!(component = "rift-flood", "Cannot sign own TIE {}: {}", tie_id, error);
                return;
            }
        };
        debug!(
            component = "rift-flood",
            "Originated {} seq {}", tie_id, packet.header.seq_nr
        );
        self.db
            .store(StoredTie::new(packet, encoded, origin, remaining_lifetime));
        for interface in &mut self.interfaces {
            if let Some(peer) = interface.flood.as_mut() {
                peer.queue(tie_id);
            }
        }
        self.request_spf(now);
    }

    fn advertise(&mut self, tie_id: TieId, element: Option<TieElement>, now: Instant) {
        let origination = match element {
            Some(element) => self.originator.originate(&self.db, tie_id, element),
            None => self.originator.withdraw(&self.db, tie_id),
        };
        if let Some(origination) = origination {
            self.store_own(origination, now);
        }
    }

    fn reoriginate(&mut self, now: Instant) {
        let node_south = self
            .originator
            .tie_id(TieDirection::South, TieType::Node, NODE_TIE_NR);
        let node_north = self
            .originator
            .tie_id(TieDirection::North, TieType::Node, NODE_TIE_NR);
        let prefix_north = self
            .originator
            .tie_id(TieDirection::North, TieType::Prefix, PREFIX_TIE_NR);
        let prefix_south = self
            .originator
            .tie_id(TieDirection::South, TieType::Prefix, PREFIX_TIE_NR);
        let negative_south = self.originator.tie_id(
            TieDirection::South,
            TieType::NegativeDisaggregationPrefix,
            NEGATIVE_DISAGGREGATION_TIE_NR,
        );

        let level = match self.ztp.level() {
            Some(level) => level,
            None => {
                for tie_id in [node_south, node_north, prefix_north, prefix_south, negative_south] {
                    self.advertise(tie_id, None, now);
                }
                return;
            }
        };

        let node = node_element(
            level,
            self.node_neighbors(),
            self.capabilities(),
            Some(self.config.name.clone()),
            self.config.pod,
        );
        self.advertise(node_south, Some(node.clone()), now);
        self.advertise(node_north, Some(node), now);

        let prefixes: Vec<(IpPrefix, u32)> = self.config.prefixes().collect();
        let north_prefixes =
            (!prefixes.is_empty()).then(|| TieElement::Prefix(prefix_element(prefixes)));
        self.advertise(prefix_north, north_prefixes, now);

        let has_north = self
            .interfaces
            .iter()
            .filter_map(Interface::three_way_neighbor)
            .any(|neighbor| neighbor.level.map_or(false, |remote| remote > level));
        let originate_default = !self.ztp.is_leaf() && (has_north || self.ztp.is_top_of_fabric());
        let default_routes = originate_default.then(|| {
            TieElement::Prefix(prefix_element([
                (IpPrefix::default_v4(), DEFAULT_DISTANCE),
                (IpPrefix::default_v6(), DEFAULT_DISTANCE),
            ]))
        });
        self.advertise(prefix_south, default_routes, now);

        let negative: BTreeSet<IpPrefix> = self
            .routes
            .as_ref()
            .map(|routes| routes.negative_disaggregation.clone())
            .unwrap_or_default();
        if !negative.is_empty() && !self.originator.originates(&negative_south) {
            info!(
                component = "rift-spf",
                "Node {} negatively disaggregating {} prefixes",
                self.config.name,
                negative.len()
            );
        }
        let negative_prefixes = (!negative.is_empty()).then(|| {
            TieElement::NegativeDisaggregationPrefix(prefix_element(
                negative
                    .into_iter()
                    .map(|prefix| (prefix, INFINITE_DISTANCE)),
            ))
        });
        self.advertise(negative_south, negative_prefixes, now);
    }

    // Three-way neighbors; parallel links to one neighbor are aggregated
    fn node_neighbors(&self) -> BTreeMap<SystemId, NodeNeighborsTieElement> {
        let mut neighbors: BTreeMap<SystemId, NodeNeighborsTieElement> = BTreeMap::new();
        for interface in &self.interfaces {
            let neighbor = match interface.three_way_neighbor() {
                Some(neighbor) => neighbor,
                None => continue,
            };
            let level = match neighbor.level {
                Some(level) => level,
                None => continue,
            };
            let link = interface.adjacency().link();
            let link_id = LinkIdPair {
                local_id: link.local_id,
                remote_id: neighbor.local_id,
            };
            let cost = interface.config().metric;
            neighbors
                .entry(neighbor.system_id)
                .and_modify(|entry| {
                    entry.cost = entry.cost.min(cost);
                    entry.link_ids.insert(link_id);
                    entry.bandwidth = entry.bandwidth.saturating_add(link.bandwidth);
                })
                .or_insert_with(|| NodeNeighborsTieElement {
                    level,
                    cost,
                    link_ids: BTreeSet::from([link_id]),
                    bandwidth: link.bandwidth,
                });
        }
        neighbors
    }

    fn local_adjacencies(&self) -> Vec<LocalAdjacency> {
        let level = match self.ztp.level() {
            Some(level) => level,
            None => return Vec::new(),
        };
        self.interfaces
            .iter()
            .filter_map(|interface| {
                let neighbor = interface.three_way_neighbor()?;
                let neighbor_level = neighbor.level?;
                Some(LocalAdjacency {
                    neighbor: neighbor.system_id,
                    interface: interface.name().to_string(),
                    address: neighbor.address,
                    direction: NeighborDirection::from_levels(level, neighbor_level),
                    cost: interface.config().metric,
                })
            })
            .collect()
    }

    fn run_spf(&mut self, now: Instant) {
        let adjacencies = self.local_adjacencies();
        let computation = compute_routes(
            &self.db,
            RoutingContext {
                system_id: self.config.system_id,
                leaf: self.ztp.is_leaf(),
                top_of_fabric: self.ztp.is_top_of_fabric(),
                adjacencies: &adjacencies,
            },
        );
        if self
            .routes
            .as_ref()
            .map_or(true, |current| current.rib != computation.rib)
        {
            info!(
                component = "rift-spf",
                "Node {} RIB changed, {} routes",
                self.config.name,
                computation.rib.len()
            );
        }
        self.routes = Some(computation);
        self.spf_runs += 1;
        self.reoriginate(now);
    }
}
