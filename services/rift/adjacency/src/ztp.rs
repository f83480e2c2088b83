//! Zero touch provisioning.
//!
//! Derives the node level from the offers received on all interfaces. The
//! Highest Available Level (HAL) is the highest valid offered level; the
//! Highest Adjacency Three-way level (HAT) only counts offers whose adjacency
//! is in THREE_WAY. A configured level, the leaf-only flag and the
//! top-of-fabric flag take precedence over derivation. A derived level
//! follows HAL upwards at once; a HAL decrease first waits out a hold-down.

use crate::lie::LieState;
use crate::offer::Offer;
use rift_fsm::{Fsm, HistoryRecord, StateMachine, Transition};
use rift_wire::{Level, LEAF_LEVEL, TOP_OF_FABRIC_LEVEL};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use tracing::{debug, info};

/// Level settings from configuration
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LevelConfig {
    /// Hard-configured level
    pub configured: Option<Level>,
    /// The node is a leaf whatever its neighbors offer
    pub leaf_only: bool,
    /// The node is top of fabric
    pub top_of_fabric: bool,
}

impl LevelConfig {
    /// Hard-configured level
    pub fn level(level: Level) -> Self {
        Self {
            configured: Some(level),
            ..Self::default()
        }
    }

    /// Whether the level is derived from offers
    pub fn is_derived(&self) -> bool {
        self.configured.is_none() && !self.leaf_only && !self.top_of_fabric
    }
}

/// ZTP state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum ZtpState {
    /// Recomputing the level
    ComputeBestOffer,
    /// Level settled, interfaces informed
    UpdatingClients,
    /// Waiting before adopting a lower level
    HoldingDown,
}

impl fmt::Display for ZtpState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ZtpState::ComputeBestOffer => "COMPUTE_BEST_OFFER",
            ZtpState::UpdatingClients => "UPDATING_CLIENTS",
            ZtpState::HoldingDown => "HOLDING_DOWN",
        };
        f.write_str(text)
    }
}

/// ZTP events
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZtpEvent {
    /// Level configuration changed
    ChangeLocalConfiguredLevel(LevelConfig),
    /// An interface received or expired an offer
    NeighborOffer(Offer),
    /// HAL went up
    HalIncreased,
    /// HAL went down while the level is derived
    HalDecreased,
    /// HAT changed
    HatChanged,
    /// The offers changed without moving HAL
    OffersChanged,
    /// Level computation finished
    ComputationDone,
    /// Hold-down timer fired
    HoldDownExpired,
}

/// ZTP actions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZtpAction {
    /// Store the new level configuration
    StoreConfig,
    /// Store the offer and recompute HAL and HAT
    UpdateOffer,
    /// Compute the level
    LevelCompute,
    /// Tell every LIE machine about a new level
    UpdateAllLieFsms,
    /// Start the hold-down timer
    StartHoldDownTimer,
    /// Stop the hold-down timer
    StopHoldDownTimer,
}

/// ZTP transition table
#[derive(Debug)]
pub struct ZtpMachine;

impl StateMachine for ZtpMachine {
    type State = ZtpState;
    type Event = ZtpEvent;
    type Action = ZtpAction;

    const NAME: &'static str = "ztp";

    fn transition(state: ZtpState, event: &ZtpEvent) -> Option<Transition<ZtpState, ZtpAction>> {
        use ZtpAction as A;
        use ZtpEvent as E;
        use ZtpState as S;

        let transition = match (state, event) {
            (_, E::NeighborOffer(_)) => Transition::stay(&[A::UpdateOffer]),

            (S::ComputeBestOffer, E::ChangeLocalConfiguredLevel(_)) => {
                Transition::stay(&[A::StoreConfig, A::LevelCompute])
            }
            (S::ComputeBestOffer, E::HalIncreased | E::HatChanged | E::OffersChanged) => {
                Transition::stay(&[A::LevelCompute])
            }
            (S::ComputeBestOffer, E::HalDecreased) => Transition::to(S::HoldingDown, &[]),
            (S::ComputeBestOffer, E::ComputationDone) => Transition::to(S::UpdatingClients, &[]),

            (S::UpdatingClients, E::ChangeLocalConfiguredLevel(_)) => {
                Transition::to(S::ComputeBestOffer, &[A::StoreConfig])
            }
            (S::UpdatingClients, E::HalIncreased | E::HatChanged | E::OffersChanged) => {
                Transition::to(S::ComputeBestOffer, &[])
            }
            (S::UpdatingClients, E::HalDecreased) => Transition::to(S::HoldingDown, &[]),

            (S::HoldingDown, E::ChangeLocalConfiguredLevel(_)) => {
                Transition::to(S::ComputeBestOffer, &[A::StoreConfig])
            }
            (S::HoldingDown, E::HalIncreased | E::HoldDownExpired) => {
                Transition::to(S::ComputeBestOffer, &[])
            }
            (
                S::HoldingDown,
                E::HatChanged | E::OffersChanged | E::HalDecreased | E::ComputationDone,
            ) => Transition::stay(&[]),

            _ => return None,
        };
        Some(transition)
    }

    fn entry_actions(state: ZtpState) -> &'static [ZtpAction] {
        match state {
            ZtpState::ComputeBestOffer => &[ZtpAction::StopHoldDownTimer, ZtpAction::LevelCompute],
            ZtpState::UpdatingClients => &[ZtpAction::UpdateAllLieFsms],
            ZtpState::HoldingDown => &[ZtpAction::StartHoldDownTimer],
        }
    }

    fn is_routine(event: &ZtpEvent) -> bool {
        matches!(event, ZtpEvent::NeighborOffer(_))
    }
}

/// Effects for the owning node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ZtpEffect {
    /// The node level changed; every interface re-sends its LIE
    LevelChanged(Option<Level>),
    /// HAT changed; leaf acceptance depends on it
    HatChanged(Option<Level>),
    /// Start the hold-down timer
    StartHoldDownTimer,
    /// Stop the hold-down timer
    StopHoldDownTimer,
}

/// Per-node ZTP machine
#[derive(Debug)]
pub struct Ztp {
    config: LevelConfig,
    fsm: Fsm<ZtpMachine>,
    offers: BTreeMap<String, Offer>,
    level: Option<Level>,
    advertised: Option<Level>,
    hal: Option<Level>,
    hat: Option<Level>,
}

impl Ztp {
    /// Create the machine; [`Ztp::start`] computes the first level
    pub fn new(config: LevelConfig) -> Self {
        Self {
            config,
            fsm: Fsm::new(ZtpState::ComputeBestOffer),
            offers: BTreeMap::new(),
            level: None,
            advertised: None,
            hal: None,
            hat: None,
        }
    }

    /// Compute the initial level
    pub fn start(&mut self) -> Vec<ZtpEffect> {
        self.fsm
            .push_event(ZtpEvent::ChangeLocalConfiguredLevel(self.config));
        self.process()
    }

    /// Queue an event
    pub fn push_event(&mut self, event: ZtpEvent) {
        self.fsm.push_event(event);
    }

    /// Process every queued event
    pub fn process(&mut self) -> Vec<ZtpEffect> {
        let mut effects = Vec::new();
        while let Some(step) = self.fsm.next_step() {
            if step.from != step.to {
                debug!("ZTP {} -> {}", step.from, step.to);
            }
            for action in &step.actions {
                self.run(*action, &step.event, &mut effects);
            }
        }
        effects
    }

    fn run(&mut self, action: ZtpAction, event: &ZtpEvent, effects: &mut Vec<ZtpEffect>) {
        match action {
            ZtpAction::StoreConfig => {
                if let ZtpEvent::ChangeLocalConfiguredLevel(config) = event {
                    self.config = *config;
                }
            }
            ZtpAction::UpdateOffer => {
                if let ZtpEvent::NeighborOffer(offer) = event {
                    self.update_offer(offer.clone(), effects);
                }
            }
            ZtpAction::LevelCompute => {
                self.level = self.compute_level();
                self.fsm.push_event(ZtpEvent::ComputationDone);
            }
            ZtpAction::UpdateAllLieFsms => {
                if self.level != self.advertised {
                    info!(
                        "Level changed from {} to {}",
                        display_level(self.advertised),
                        display_level(self.level)
                    );
                    self.advertised = self.level;
                    effects.push(ZtpEffect::LevelChanged(self.level));
                }
            }
            ZtpAction::StartHoldDownTimer => effects.push(ZtpEffect::StartHoldDownTimer),
            ZtpAction::StopHoldDownTimer => effects.push(ZtpEffect::StopHoldDownTimer),
        }
    }

    fn update_offer(&mut self, offer: Offer, effects: &mut Vec<ZtpEffect>) {
        let changed = self
            .offers
            .get(&offer.interface)
            .map_or(true, |previous| !same_offer(previous, &offer));
        self.offers.insert(offer.interface.clone(), offer);
        if !changed {
            return;
        }

        let (old_hal, old_hat) = (self.hal, self.hat);
        self.recompute_best();

        if self.hal > old_hal {
            self.fsm.push_event(ZtpEvent::HalIncreased);
        } else if self.hal < old_hal && self.config.is_derived() {
            self.fsm.push_event(ZtpEvent::HalDecreased);
        } else {
            self.fsm.push_event(ZtpEvent::OffersChanged);
        }
        if self.hat != old_hat {
            self.fsm.push_event(ZtpEvent::HatChanged);
            effects.push(ZtpEffect::HatChanged(self.hat));
        }
    }

    fn recompute_best(&mut self) {
        let best = self.offers.values().filter_map(Offer::rank).max();
        let best_3way = self
            .offers
            .values()
            .filter(|offer| offer.state == LieState::ThreeWay)
            .filter_map(Offer::rank)
            .max();
        for offer in self.offers.values_mut() {
            let rank = offer.rank();
            offer.best = rank.is_some() && rank == best;
            offer.best_3way =
                rank.is_some() && offer.state == LieState::ThreeWay && rank == best_3way;
        }
        self.hal = best.map(|(level, _)| level);
        self.hat = best_3way.map(|(level, _)| level);
    }

    fn compute_level(&self) -> Option<Level> {
        if let Some(level) = self.config.configured {
            Some(level)
        } else if self.config.leaf_only {
            Some(LEAF_LEVEL)
        } else if self.config.top_of_fabric {
            Some(TOP_OF_FABRIC_LEVEL)
        } else {
            self.hal.map(|hal| hal.saturating_sub(1))
        }
    }

    /// Current level
    pub fn level(&self) -> Option<Level> {
        self.level
    }

    /// Highest available level
    pub fn hal(&self) -> Option<Level> {
        self.hal
    }

    /// Highest adjacency three-way level
    pub fn hat(&self) -> Option<Level> {
        self.hat
    }

    /// Level configuration
    pub fn config(&self) -> LevelConfig {
        self.config
    }

    /// Whether this node is a leaf
    pub fn is_leaf(&self) -> bool {
        self.config.leaf_only || self.level == Some(LEAF_LEVEL)
    }

    /// Whether this node is top of fabric
    pub fn is_top_of_fabric(&self) -> bool {
        self.config.top_of_fabric || self.level == Some(TOP_OF_FABRIC_LEVEL)
    }

    /// Received offers by interface
    pub fn offers(&self) -> impl Iterator<Item = &Offer> {
        self.offers.values()
    }

    /// Offer received on an interface
    pub fn offer(&self, interface: &str) -> Option<&Offer> {
        self.offers.get(interface)
    }

    /// Whether LIEs on `interface` must flag themselves as not a ZTP offer:
    /// the level is derived from the best offer, received on that interface
    pub fn not_a_ztp_offer(&self, interface: &str) -> bool {
        self.config.is_derived()
            && self
                .offers
                .get(interface)
                .map_or(false, |offer| offer.best)
    }

    /// Current state
    pub fn state(&self) -> ZtpState {
        self.fsm.state()
    }

    /// Verbose transition history
    pub fn verbose_history(&self) -> impl Iterator<Item = &HistoryRecord> {
        self.fsm.verbose_history()
    }

    /// Summary transition history
    pub fn summary_history(&self) -> impl Iterator<Item = &HistoryRecord> {
        self.fsm.summary_history()
    }
}

fn same_offer(a: &Offer, b: &Offer) -> bool {
    a.system_id == b.system_id
        && a.level == b.level
        && a.not_a_ztp_offer == b.not_a_ztp_offer
        && a.state == b.state
        && a.removed_reason == b.removed_reason
}

fn display_level(level: Option<Level>) -> String {
    match level {
        Some(level) => level.to_string(),
        None => "undefined".to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offer::RemovedReason;

    fn offer(interface: &str, system_id: u64, level: Option<Level>, state: LieState) -> Offer {
        Offer::new(interface, system_id, level, false, state)
    }

    fn started(config: LevelConfig) -> Ztp {
        let mut ztp = Ztp::new(config);
        let _ = ztp.start();
        ztp
    }

    #[test]
    fn test_configured_level_wins() {
        let mut ztp = started(LevelConfig::level(2));
        assert_eq!(ztp.level(), Some(2));
        assert_eq!(ztp.state(), ZtpState::UpdatingClients);

        ztp.push_event(ZtpEvent::NeighborOffer(offer("if1", 5, Some(7), LieState::OneWay)));
        let _ = ztp.process();
        assert_eq!(ztp.level(), Some(2));
        assert_eq!(ztp.hal(), Some(7));
        assert_eq!(ztp.hat(), None);
    }

    #[test]
    fn test_derived_level_follows_hal_up() {
        let mut ztp = started(LevelConfig::default());
        assert_eq!(ztp.level(), None);

        ztp.push_event(ZtpEvent::NeighborOffer(offer("if1", 5, Some(2), LieState::TwoWay)));
        let effects = ztp.process();
        assert_eq!(ztp.level(), Some(1));
        assert!(effects.contains(&ZtpEffect::LevelChanged(Some(1))));

        ztp.push_event(ZtpEvent::NeighborOffer(offer("if2", 6, Some(5), LieState::TwoWay)));
        let _ = ztp.process();
        assert_eq!(ztp.level(), Some(4));
        assert!(ztp.offer("if2").unwrap().best);
        assert!(!ztp.offer("if1").unwrap().best);
        assert!(ztp.not_a_ztp_offer("if2"));
        assert!(!ztp.not_a_ztp_offer("if1"));
    }

    #[test]
    fn test_hal_decrease_holds_down() {
        let mut ztp = started(LevelConfig::default());
        ztp.push_event(ZtpEvent::NeighborOffer(offer("if1", 5, Some(3), LieState::ThreeWay)));
        let _ = ztp.process();
        assert_eq!(ztp.level(), Some(2));

        let mut expired = offer("if1", 5, Some(3), LieState::OneWay);
        expired.remove(RemovedReason::HoldTimeExpired);
        ztp.push_event(ZtpEvent::NeighborOffer(expired));
        let effects = ztp.process();
        assert_eq!(ztp.state(), ZtpState::HoldingDown);
        assert!(effects.contains(&ZtpEffect::StartHoldDownTimer));
        assert_eq!(ztp.level(), Some(2));

        ztp.push_event(ZtpEvent::HoldDownExpired);
        let effects = ztp.process();
        assert_eq!(ztp.level(), None);
        assert!(effects.contains(&ZtpEffect::LevelChanged(None)));
        assert_eq!(ztp.state(), ZtpState::UpdatingClients);
    }

    #[test]
    fn test_hal_increase_ends_hold_down() {
        let mut ztp = started(LevelConfig::default());
        ztp.push_event(ZtpEvent::NeighborOffer(offer("if1", 5, Some(3), LieState::TwoWay)));
        ztp.push_event(ZtpEvent::NeighborOffer(offer("if1", 5, Some(2), LieState::TwoWay)));
        let _ = ztp.process();
        assert_eq!(ztp.state(), ZtpState::HoldingDown);

        ztp.push_event(ZtpEvent::NeighborOffer(offer("if2", 7, Some(4), LieState::TwoWay)));
        let _ = ztp.process();
        assert_eq!(ztp.level(), Some(3));
        assert_eq!(ztp.state(), ZtpState::UpdatingClients);
    }

    #[test]
    fn test_hat_counts_three_way_only() {
        let mut ztp = started(LevelConfig::level(0));
        ztp.push_event(ZtpEvent::NeighborOffer(offer("if1", 5, Some(3), LieState::OneWay)));
        ztp.push_event(ZtpEvent::NeighborOffer(offer("if2", 6, Some(1), LieState::ThreeWay)));
        let effects = ztp.process();
        assert_eq!(ztp.hal(), Some(3));
        assert_eq!(ztp.hat(), Some(1));
        assert!(effects.contains(&ZtpEffect::HatChanged(Some(1))));
        assert!(ztp.offer("if2").unwrap().best_3way);
        assert!(!ztp.offer("if1").unwrap().best_3way);
        assert!(ztp.is_leaf());
        assert!(!ztp.not_a_ztp_offer("if1"));
    }

    #[test]
    fn test_leaf_offers_do_not_count() {
        let mut ztp = started(LevelConfig::default());
        ztp.push_event(ZtpEvent::NeighborOffer(offer("if1", 5, Some(0), LieState::ThreeWay)));
        let _ = ztp.process();
        assert_eq!(ztp.hal(), None);
        assert_eq!(ztp.level(), None);
        assert!(!ztp.offer("if1").unwrap().best);
    }

    #[test]
    fn test_flags_set_level() {
        let tof = started(LevelConfig {
            top_of_fabric: true,
            ..LevelConfig::default()
        });
        assert_eq!(tof.level(), Some(TOP_OF_FABRIC_LEVEL));
        assert!(tof.is_top_of_fabric());

        let leaf = started(LevelConfig {
            leaf_only: true,
            ..LevelConfig::default()
        });
        assert_eq!(leaf.level(), Some(LEAF_LEVEL));
    }

    #[test]
    fn test_repeated_offer_is_quiet() {
        let mut ztp = started(LevelConfig::default());
        ztp.push_event(ZtpEvent::NeighborOffer(offer("if1", 5, Some(3), LieState::TwoWay)));
        let _ = ztp.process();
        let before = ztp.summary_history().count();
        for _ in 0..5 {
            ztp.push_event(ZtpEvent::NeighborOffer(offer("if1", 5, Some(3), LieState::TwoWay)));
            assert!(ztp.process().is_empty());
        }
        assert_eq!(ztp.summary_history().count(), before);
    }
}
