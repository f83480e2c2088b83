//! LIE finite state machine.
//!
//! One [`LieAdjacency`] runs per interface. It owns the interface nonce, the
//! neighbor learned from received LIEs and the LIE state machine. Received
//! LIEs are checked against the acceptance policy; accepted ones detect new or
//! changed neighbors and validate the reflection that moves the adjacency to
//! THREE_WAY. The offer carried by every LIE is handed to ZTP whether or not
//! the LIE is accepted.

use crate::offer::{Offer, RemovedReason, SentOffer};
use rift_fsm::{Fsm, HistoryRecord, StateMachine, Transition};
use rift_security::NonceState;
use rift_wire::{
    Level, LieNeighbor, LiePacket, LinkId, NodeCapabilities, PacketHeader, SystemId,
    DEFAULT_BANDWIDTH, DEFAULT_LIE_HOLDTIME, DEFAULT_MTU_SIZE, DEFAULT_TIE_UDP_FLOOD_PORT,
    LEAF_LEVEL, PROTOCOL_MAJOR_VERSION, UNDEFINED_NONCE,
};
use serde::Serialize;
use std::fmt;
use std::net::IpAddr;
use std::time::Duration;
use tracing::{debug, info};

/// Adjacency state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LieState {
    /// No neighbor, or the neighbor is not acceptable
    OneWay,
    /// Neighbor heard, reflection not yet seen
    TwoWay,
    /// Neighbor reflects us: adjacency is up
    ThreeWay,
}

impl fmt::Display for LieState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            LieState::OneWay => "ONE_WAY",
            LieState::TwoWay => "TWO_WAY",
            LieState::ThreeWay => "THREE_WAY",
        };
        f.write_str(text)
    }
}

/// A LIE received on the interface, with the envelope fields it needs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedLie {
    /// Packet header
    pub header: PacketHeader,
    /// LIE content
    pub lie: LiePacket,
    /// Sender's nonce
    pub nonce_local: u16,
    /// Sender's reflection of our nonce
    pub nonce_remote: u16,
    /// Source address, when known
    pub address: Option<IpAddr>,
}

/// LIE state machine events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LieEvent {
    /// Periodic LIE transmission
    TimerTick,
    /// This node's level changed
    LevelChanged,
    /// Highest available level changed
    HalChanged,
    /// Highest adjacent three-way level changed
    HatChanged,
    /// A LIE was received
    LieReceived(Box<ReceivedLie>),
    /// First acceptable LIE from a neighbor
    NewNeighbor,
    /// The neighbor reflects this node with a valid nonce
    ValidReflection,
    /// The neighbor stopped reflecting this node
    NeighborDroppedReflection,
    /// The neighbor's level changed
    NeighborChangedLevel,
    /// The neighbor's address changed
    NeighborChangedAddress,
    /// The neighbor's link parameters changed
    NeighborChangedMinorFields,
    /// The received LIE is not acceptable
    UnacceptableHeader,
    /// Link MTUs differ
    MtuMismatch,
    /// No LIE within the holdtime
    HoldTimeExpired,
    /// More than one neighbor on the link
    MultipleNeighbors,
    /// Send a LIE now
    SendLie,
}

/// LIE state machine actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LieAction {
    /// Send a LIE
    SendLie,
    /// Run the acceptance policy and neighbor checks on a received LIE
    ProcessLie,
    /// Take the new node level into account
    UpdateLevel,
    /// Mark the neighbor's offer as expired
    ExpireOffer,
    /// Forget the neighbor
    CleanupNeighbor,
    /// Start flooding to the neighbor
    StartFlooding,
    /// Stop flooding to the neighbor
    StopFlooding,
}

/// LIE transition table
#[derive(Debug)]
pub struct LieMachine;

impl StateMachine for LieMachine {
    type State = LieState;
    type Event = LieEvent;
    type Action = LieAction;

    const NAME: &'static str = "lie";

    fn transition(state: LieState, event: &LieEvent) -> Option<Transition<LieState, LieAction>> {
        use LieAction as A;
        use LieEvent as E;
        use LieState as S;

        let transition = match (state, event) {
            (_, E::TimerTick) | (_, E::SendLie) => Transition::stay(&[A::SendLie]),
            (_, E::LevelChanged) => Transition::stay(&[A::UpdateLevel, A::SendLie]),
            (_, E::HalChanged) | (_, E::HatChanged) => Transition::stay(&[]),
            (_, E::LieReceived(_)) => Transition::stay(&[A::ProcessLie]),
            (_, E::HoldTimeExpired) => Transition::to(S::OneWay, &[A::ExpireOffer]),
            (S::OneWay, E::NewNeighbor) => Transition::to(S::TwoWay, &[A::SendLie]),
            (S::TwoWay, E::ValidReflection) => Transition::to(S::ThreeWay, &[]),
            (S::ThreeWay, E::NeighborDroppedReflection) => Transition::to(S::TwoWay, &[]),
            (
                S::TwoWay | S::ThreeWay,
                E::NeighborChangedLevel
                | E::NeighborChangedAddress
                | E::NeighborChangedMinorFields
                | E::UnacceptableHeader
                | E::MtuMismatch
                | E::MultipleNeighbors,
            ) => Transition::to(S::OneWay, &[]),
            _ => return None,
        };
        Some(transition)
    }

    fn entry_actions(state: LieState) -> &'static [LieAction] {
        match state {
            LieState::OneWay => &[LieAction::CleanupNeighbor, LieAction::SendLie],
            LieState::TwoWay => &[],
            LieState::ThreeWay => &[LieAction::StartFlooding],
        }
    }

    fn exit_actions(state: LieState) -> &'static [LieAction] {
        match state {
            LieState::ThreeWay => &[LieAction::StopFlooding],
            _ => &[],
        }
    }

    fn is_routine(event: &LieEvent) -> bool {
        matches!(
            event,
            LieEvent::TimerTick
                | LieEvent::SendLie
                | LieEvent::LieReceived(_)
                | LieEvent::HalChanged
                | LieEvent::HatChanged
        )
    }
}

/// Rule that decided whether a received LIE is acceptable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LieRule {
    /// Major version differs
    DifferentVersion,
    /// The LIE is our own
    SameSystemId,
    /// Link MTUs differ
    MtuMismatch,
    /// Neighbor level undefined
    RemoteLevelUndefined,
    /// Our level undefined
    LocalLevelUndefined,
    /// Both nodes are in different defined PoDs
    PodMismatch,
    /// We are not a leaf and the neighbor is
    LocalNonLeafRemoteLeaf,
    /// We are a leaf and the neighbor is at or above our HAT
    LocalLeafHatNotGreater,
    /// Levels differ by at most one
    LevelsAdjacent,
    /// None of the acceptance rules matched
    LevelMismatch,
}

impl fmt::Display for LieRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            LieRule::DifferentVersion => "Different protocol version",
            LieRule::SameSystemId => "Remote system ID is same as local",
            LieRule::MtuMismatch => "MTU mismatch",
            LieRule::RemoteLevelUndefined => "Remote level is undefined",
            LieRule::LocalLevelUndefined => "My level is undefined",
            LieRule::PodMismatch => "PoD mismatch",
            LieRule::LocalNonLeafRemoteLeaf => "This node is not leaf and neighbor is leaf",
            LieRule::LocalLeafHatNotGreater => {
                "This node is leaf and HAT not greater than remote level"
            }
            LieRule::LevelsAdjacent => "Neighbor is at most one level away",
            LieRule::LevelMismatch => "Level mismatch",
        };
        f.write_str(text)
    }
}

/// Outcome of the acceptance policy for the last received LIE
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LieVerdict {
    /// Accepted under the given rule
    Accept(LieRule),
    /// Rejected under the given rule
    Reject(LieRule),
}

impl LieVerdict {
    /// Whether the LIE was accepted
    pub fn is_accept(&self) -> bool {
        matches!(self, LieVerdict::Accept(_))
    }

    /// Deciding rule
    pub fn rule(&self) -> LieRule {
        match self {
            LieVerdict::Accept(rule) | LieVerdict::Reject(rule) => *rule,
        }
    }
}

impl Serialize for LieVerdict {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let outcome = if self.is_accept() { "Accepted" } else { "Rejected" };
        serializer.collect_str(&format_args!("{}: {}", outcome, self.rule()))
    }
}

/// Neighbor learned from accepted LIEs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Neighbor {
    /// Neighbor system ID
    pub system_id: SystemId,
    /// Neighbor interface name
    pub name: String,
    /// Link ID the neighbor allocated
    pub local_id: LinkId,
    /// Neighbor level
    pub level: Option<Level>,
    /// Neighbor address
    pub address: Option<IpAddr>,
    /// Port the neighbor receives flooding on
    pub flood_port: u16,
    /// Neighbor link MTU
    pub link_mtu_size: u32,
    /// Neighbor link bandwidth
    pub bandwidth: u32,
    /// Neighbor PoD
    pub pod: u32,
    /// Holdtime the neighbor asks for
    pub holdtime: u16,
    /// Neighbor capabilities
    pub capabilities: NodeCapabilities,
}

impl Neighbor {
    fn from_received(received: &ReceivedLie) -> Self {
        let lie = &received.lie;
        Self {
            system_id: received.header.sender,
            name: lie.name.clone(),
            local_id: lie.local_id,
            level: received.header.level,
            address: received.address,
            flood_port: lie.flood_port,
            link_mtu_size: lie.link_mtu_size,
            bandwidth: lie.link_bandwidth,
            pod: lie.pod,
            holdtime: lie.holdtime,
            capabilities: lie.capabilities,
        }
    }

    fn change_event(&self, other: &Neighbor) -> Option<LieEvent> {
        if self.system_id != other.system_id {
            Some(LieEvent::MultipleNeighbors)
        } else if self.level != other.level {
            Some(LieEvent::NeighborChangedLevel)
        } else if self.address != other.address {
            Some(LieEvent::NeighborChangedAddress)
        } else if self.name != other.name
            || self.local_id != other.local_id
            || self.flood_port != other.flood_port
            || self.link_mtu_size != other.link_mtu_size
            || self.pod != other.pod
        {
            Some(LieEvent::NeighborChangedMinorFields)
        } else {
            None
        }
    }

    /// Whether the neighbor is a leaf
    pub fn is_leaf(&self) -> bool {
        self.level == Some(LEAF_LEVEL) || self.capabilities.contains(NodeCapabilities::LEAF_ONLY)
    }
}

/// Static parameters of the link
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LinkConfig {
    /// Interface name
    pub name: String,
    /// Link ID allocated by this node
    pub local_id: LinkId,
    /// Link MTU
    pub mtu: u32,
    /// Port this node receives flooding on
    pub flood_port: u16,
    /// Holdtime advertised to the neighbor in seconds
    pub holdtime: u16,
    /// Link bandwidth in Mbit/s
    pub bandwidth: u32,
}

impl LinkConfig {
    /// Link with default parameters
    pub fn new(name: impl Into<String>, local_id: LinkId) -> Self {
        Self {
            name: name.into(),
            local_id,
            mtu: DEFAULT_MTU_SIZE,
            flood_port: DEFAULT_TIE_UDP_FLOOD_PORT,
            holdtime: DEFAULT_LIE_HOLDTIME,
            bandwidth: DEFAULT_BANDWIDTH,
        }
    }
}

/// Node state the LIE machine reads while processing
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeView {
    /// Our system ID
    pub system_id: SystemId,
    /// Our level
    pub level: Option<Level>,
    /// Whether we are a leaf
    pub leaf: bool,
    /// Our highest adjacent three-way level
    pub hat: Option<Level>,
    /// Our PoD
    pub pod: u32,
    /// Our capabilities
    pub capabilities: NodeCapabilities,
    /// Whether our LIEs on this interface must carry the not-a-ZTP-offer flag
    pub not_a_ztp_offer: bool,
}

/// Effects for the owning node to carry out
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LieEffect {
    /// Transmit this LIE
    SendLie(LiePacket),
    /// Give the neighbor's offer to ZTP
    OfferToZtp(Offer),
    /// Restart the hold timer with the neighbor's holdtime
    RestartHoldTimer(Duration),
    /// The adjacency reached THREE_WAY
    AdjacencyUp(Neighbor),
    /// The adjacency left THREE_WAY
    AdjacencyDown(SystemId),
}

/// LIE state machine of one interface
#[derive(Debug)]
pub struct LieAdjacency {
    link: LinkConfig,
    fsm: Fsm<LieMachine>,
    neighbor: Option<Neighbor>,
    nonce: NonceState,
    last_offer: Option<Offer>,
    sent_offer: Option<SentOffer>,
    verdict: Option<LieVerdict>,
}

impl LieAdjacency {
    /// Create the machine in ONE_WAY
    pub fn new(link: LinkConfig, nonce_seed: u16) -> Self {
        Self {
            link,
            fsm: Fsm::new(LieState::OneWay),
            neighbor: None,
            nonce: NonceState::new(nonce_seed),
            last_offer: None,
            sent_offer: None,
            verdict: None,
        }
    }

    /// Send the first LIE
    pub fn start(&mut self, view: &NodeView) -> Vec<LieEffect> {
        self.fsm.push_event(LieEvent::SendLie);
        self.process(view)
    }

    /// Link parameters
    pub fn link(&self) -> &LinkConfig {
        &self.link
    }

    /// Current state
    pub fn state(&self) -> LieState {
        self.fsm.state()
    }

    /// Current neighbor
    pub fn neighbor(&self) -> Option<&Neighbor> {
        self.neighbor.as_ref()
    }

    /// Interface nonce
    pub fn nonce(&self) -> &NonceState {
        &self.nonce
    }

    /// Interface nonce, for refreshes and for recording the neighbor's nonce
    pub fn nonce_mut(&mut self) -> &mut NonceState {
        &mut self.nonce
    }

    /// Last offer this interface sent
    pub fn sent_offer(&self) -> Option<SentOffer> {
        self.sent_offer
    }

    /// Outcome of the acceptance policy for the last received LIE
    pub fn verdict(&self) -> Option<LieVerdict> {
        self.verdict
    }

    /// Verbose transition history
    pub fn verbose_history(&self) -> impl Iterator<Item = &HistoryRecord> {
        self.fsm.verbose_history()
    }

    /// Summary transition history
    pub fn summary_history(&self) -> impl Iterator<Item = &HistoryRecord> {
        self.fsm.summary_history()
    }

    /// Queue an event
    pub fn push_event(&mut self, event: LieEvent) {
        self.fsm.push_event(event);
    }

    /// Queue a received LIE
    pub fn receive(&mut self, received: ReceivedLie) {
        self.fsm.push_event(LieEvent::LieReceived(Box::new(received)));
    }

    /// Process every queued event
    pub fn process(&mut self, view: &NodeView) -> Vec<LieEffect> {
        let mut effects = Vec::new();
        while let Some(step) = self.fsm.next_step() {
            if step.from != step.to {
                info!(
                    "Interface {} adjacency {} -> {}",
                    self.link.name, step.from, step.to
                );
            }
            for action in &step.actions {
                self.run(*action, &step.event, view, &mut effects);
            }
        }
        effects
    }

    fn run(
        &mut self,
        action: LieAction,
        event: &LieEvent,
        view: &NodeView,
        effects: &mut Vec<LieEffect>,
    ) {
        match action {
            LieAction::SendLie => effects.push(LieEffect::SendLie(self.build_lie(view))),
            LieAction::ProcessLie => {
                if let LieEvent::LieReceived(received) = event {
                    self.process_lie(received, view, effects);
                }
            }
            LieAction::UpdateLevel => {
                debug!("Interface {} level now {:?}", self.link.name, view.level);
            }
            LieAction::ExpireOffer => {
                if let Some(mut offer) = self.last_offer.take() {
                    offer.remove(RemovedReason::HoldTimeExpired);
                    effects.push(LieEffect::OfferToZtp(offer));
                }
            }
            LieAction::CleanupNeighbor => {
                self.neighbor = None;
                self.nonce.clear_remote();
            }
            LieAction::StartFlooding => {
                if let Some(neighbor) = &self.neighbor {
                    effects.push(LieEffect::AdjacencyUp(neighbor.clone()));
                }
                self.refresh_offer_state(effects);
            }
            LieAction::StopFlooding => {
                if let Some(neighbor) = &self.neighbor {
                    effects.push(LieEffect::AdjacencyDown(neighbor.system_id));
                }
                self.refresh_offer_state(effects);
            }
        }
    }

    fn build_lie(&mut self, view: &NodeView) -> LiePacket {
        self.sent_offer = Some(SentOffer {
            level: view.level,
            not_a_ztp_offer: view.not_a_ztp_offer,
        });
        LiePacket {
            name: self.link.name.clone(),
            local_id: self.link.local_id,
            flood_port: self.link.flood_port,
            link_mtu_size: self.link.mtu,
            link_bandwidth: self.link.bandwidth,
            neighbor: self.neighbor.as_ref().map(|neighbor| LieNeighbor {
                originator: neighbor.system_id,
                remote_id: neighbor.local_id,
            }),
            pod: view.pod,
            capabilities: view.capabilities,
            holdtime: self.link.holdtime,
            not_a_ztp_offer: view.not_a_ztp_offer,
            you_are_not_flood_repeater: false,
            label: None,
        }
    }

    fn refresh_offer_state(&mut self, effects: &mut Vec<LieEffect>) {
        let state = self.fsm.state();
        if let Some(offer) = self.last_offer.as_mut() {
            if offer.state != state {
                offer.state = state;
                effects.push(LieEffect::OfferToZtp(offer.clone()));
            }
        }
    }

    fn process_lie(&mut self, received: &ReceivedLie, view: &NodeView, effects: &mut Vec<LieEffect>) {
        let header = &received.header;
        if header.major_version != PROTOCOL_MAJOR_VERSION {
            self.reject(LieRule::DifferentVersion, LieEvent::UnacceptableHeader);
            return;
        }
        if header.sender == view.system_id {
            self.reject(LieRule::SameSystemId, LieEvent::UnacceptableHeader);
            return;
        }

        self.nonce.record_remote(received.nonce_local);
        effects.push(LieEffect::RestartHoldTimer(Duration::from_secs(
            received.lie.holdtime as u64,
        )));

        let offer = Offer::new(
            self.link.name.clone(),
            header.sender,
            header.level,
            received.lie.not_a_ztp_offer,
            self.fsm.state(),
        );
        self.last_offer = Some(offer.clone());
        effects.push(LieEffect::OfferToZtp(offer));

        match acceptance(view, received, self.link.mtu) {
            LieVerdict::Reject(LieRule::MtuMismatch) => {
                self.reject(LieRule::MtuMismatch, LieEvent::MtuMismatch);
                return;
            }
            LieVerdict::Reject(rule) => {
                self.reject(rule, LieEvent::UnacceptableHeader);
                return;
            }
            accepted => self.verdict = Some(accepted),
        }

        let new_neighbor = Neighbor::from_received(received);
        match &self.neighbor {
            None => {
                debug!(
                    "Interface {} new neighbor {}",
                    self.link.name, new_neighbor.system_id
                );
                self.neighbor = Some(new_neighbor);
                self.fsm.push_event(LieEvent::NewNeighbor);
                return;
            }
            Some(current) => {
                if let Some(change) = current.change_event(&new_neighbor) {
                    debug!("Interface {} neighbor change: {:?}", self.link.name, change);
                    self.fsm.push_event(change);
                    return;
                }
                self.neighbor = Some(new_neighbor);
            }
        }

        self.check_three_way(received, view);
    }

    fn reject(&mut self, rule: LieRule, event: LieEvent) {
        debug!("Interface {} rejected LIE: {}", self.link.name, rule);
        self.verdict = Some(LieVerdict::Reject(rule));
        self.fsm.push_event(event);
    }

    fn check_three_way(&mut self, received: &ReceivedLie, view: &NodeView) {
        let state = self.fsm.state();
        if state == LieState::OneWay {
            return;
        }
        match &received.lie.neighbor {
            None => {
                if state == LieState::ThreeWay {
                    self.fsm.push_event(LieEvent::NeighborDroppedReflection);
                }
            }
            Some(reflected)
                if reflected.originator == view.system_id
                    && reflected.remote_id == self.link.local_id =>
            {
                let nonce_ok = received.nonce_remote != UNDEFINED_NONCE
                    && self.nonce.is_valid_reflection(received.nonce_remote);
                if !nonce_ok {
                    debug!(
                        "Interface {} reflection without valid nonce {}",
                        self.link.name, received.nonce_remote
                    );
                } else if state == LieState::TwoWay {
                    self.fsm.push_event(LieEvent::ValidReflection);
                }
            }
            Some(_) => self.fsm.push_event(LieEvent::MultipleNeighbors),
        }
    }
}

fn acceptance(view: &NodeView, received: &ReceivedLie, mtu: u32) -> LieVerdict {
    let lie = &received.lie;
    if lie.link_mtu_size != mtu {
        return LieVerdict::Reject(LieRule::MtuMismatch);
    }
    let remote_level = match received.header.level {
        Some(level) => level,
        None => return LieVerdict::Reject(LieRule::RemoteLevelUndefined),
    };
    let local_level = match view.level {
        Some(level) => level,
        None => return LieVerdict::Reject(LieRule::LocalLevelUndefined),
    };
    let remote_leaf =
        remote_level == LEAF_LEVEL || lie.capabilities.contains(NodeCapabilities::LEAF_ONLY);
    if !view.leaf && !remote_leaf && view.pod != 0 && lie.pod != 0 && view.pod != lie.pod {
        return LieVerdict::Reject(LieRule::PodMismatch);
    }
    if !view.leaf && remote_leaf {
        return LieVerdict::Accept(LieRule::LocalNonLeafRemoteLeaf);
    }
    if view.leaf && view.hat.map_or(true, |hat| remote_level >= hat) {
        return LieVerdict::Accept(LieRule::LocalLeafHatNotGreater);
    }
    if local_level.abs_diff(remote_level) <= 1 {
        return LieVerdict::Accept(LieRule::LevelsAdjacent);
    }
    LieVerdict::Reject(LieRule::LevelMismatch)
}
