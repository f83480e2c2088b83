//! Level offers made by neighbors.

use crate::lie::LieState;
use rift_wire::{Level, SystemId, LEAF_LEVEL};
use serde::Serialize;
use std::fmt;

/// Why an offer does not count towards level derivation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RemovedReason {
    /// The neighbor does not know its own level
    LevelUndefined,
    /// The neighbor is a leaf
    LevelIsLeaf,
    /// The neighbor asked not to be used for ZTP
    NotAZtpOffer,
    /// No LIE was heard within the holdtime
    HoldTimeExpired,
}

impl fmt::Display for RemovedReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            RemovedReason::LevelUndefined => "Level is undefined",
            RemovedReason::LevelIsLeaf => "Level is leaf",
            RemovedReason::NotAZtpOffer => "Not a ZTP offer flag set",
            RemovedReason::HoldTimeExpired => "Hold-time expired",
        };
        f.write_str(text)
    }
}

/// A level offered by the neighbor on one interface
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Offer {
    /// Interface the offer was received on
    pub interface: String,
    /// Offering neighbor
    pub system_id: SystemId,
    /// Offered level
    pub level: Option<Level>,
    /// The neighbor flagged the offer as not usable for ZTP
    pub not_a_ztp_offer: bool,
    /// LIE state of the interface when the offer was made
    pub state: LieState,
    /// Best offer of the node
    pub best: bool,
    /// Best offer among three-way adjacencies
    pub best_3way: bool,
    /// Excluded from level derivation
    pub removed: bool,
    /// Reason for exclusion
    #[serde(serialize_with = "serialize_reason")]
    pub removed_reason: Option<RemovedReason>,
}

fn serialize_reason<S: serde::Serializer>(
    reason: &Option<RemovedReason>,
    serializer: S,
) -> Result<S::Ok, S::Error> {
    match reason {
        Some(reason) => serializer.collect_str(reason),
        None => serializer.serialize_none(),
    }
}

impl Offer {
    /// Offer from a received LIE, with the removal rules applied
    pub fn new(
        interface: impl Into<String>,
        system_id: SystemId,
        level: Option<Level>,
        not_a_ztp_offer: bool,
        state: LieState,
    ) -> Self {
        let mut offer = Self {
            interface: interface.into(),
            system_id,
            level,
            not_a_ztp_offer,
            state,
            best: false,
            best_3way: false,
            removed: false,
            removed_reason: None,
        };
        if let Some(reason) = offer.removal_reason() {
            offer.remove(reason);
        }
        offer
    }

    fn removal_reason(&self) -> Option<RemovedReason> {
        match self.level {
            None => Some(RemovedReason::LevelUndefined),
            Some(_) if self.not_a_ztp_offer => Some(RemovedReason::NotAZtpOffer),
            Some(LEAF_LEVEL) => Some(RemovedReason::LevelIsLeaf),
            Some(_) => None,
        }
    }

    /// Mark the offer as removed
    pub fn remove(&mut self, reason: RemovedReason) {
        self.removed = true;
        self.removed_reason = Some(reason);
        self.best = false;
        self.best_3way = false;
    }

    /// Offered level if this offer is a valid offered level
    pub fn valid_level(&self) -> Option<Level> {
        if self.removed {
            None
        } else {
            self.level
        }
    }

    /// Ordering key for best offer selection: level, then system ID
    pub(crate) fn rank(&self) -> Option<(Level, SystemId)> {
        self.valid_level().map(|level| (level, self.system_id))
    }
}

/// What this node last offered on an interface
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SentOffer {
    /// Advertised level
    pub level: Option<Level>,
    /// Advertised not-a-ZTP-offer flag
    pub not_a_ztp_offer: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_removal_rules() {
        let undefined = Offer::new("if1", 2, None, false, LieState::OneWay);
        assert_eq!(undefined.removed_reason, Some(RemovedReason::LevelUndefined));

        let leaf = Offer::new("if1", 2, Some(0), false, LieState::ThreeWay);
        assert_eq!(leaf.removed_reason, Some(RemovedReason::LevelIsLeaf));
        assert_eq!(leaf.valid_level(), None);

        let flagged = Offer::new("if1", 2, Some(3), true, LieState::TwoWay);
        assert_eq!(flagged.removed_reason, Some(RemovedReason::NotAZtpOffer));

        let valid = Offer::new("if1", 2, Some(3), false, LieState::OneWay);
        assert!(!valid.removed);
        assert_eq!(valid.valid_level(), Some(3));
    }

    #[test]
    fn test_reason_text() {
        assert_eq!(RemovedReason::LevelIsLeaf.to_string(), "Level is leaf");
        assert_eq!(
            RemovedReason::HoldTimeExpired.to_string(),
            "Hold-time expired"
        );
        assert_eq!(
            RemovedReason::NotAZtpOffer.to_string(),
            "Not a ZTP offer flag set"
        );
    }

    #[test]
    fn test_offer_serializes_reason_text() {
        let offer = Offer::new("if1", 9, Some(0), false, LieState::ThreeWay);
        let json = serde_json::to_value(&offer).unwrap();
        assert_eq!(json["removed_reason"], "Level is leaf");
        assert_eq!(json["removed"], true);
    }

    #[test]
    fn test_rank_prefers_level_then_system_id() {
        let a = Offer::new("if1", 5, Some(2), false, LieState::OneWay);
        let b = Offer::new("if2", 9, Some(2), false, LieState::OneWay);
        let c = Offer::new("if3", 1, Some(3), false, LieState::OneWay);
        assert!(b.rank() > a.rank());
        assert!(c.rank() > b.rank());
    }
}
