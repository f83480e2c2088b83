//! TIE database.
//!
//! An ordered map from [`TieId`] to the stored TIE. Replacement obeys the
//! dominance rule: a higher sequence number wins; at equal sequence number an
//! expired copy wins over a live one, and between live copies the longer
//! remaining lifetime wins once the lifetimes differ by more than
//! [`LIFETIME_DIFF_TO_IGNORE`]; anything else is the same TIE. Expired
//! TIEs stay in the database as tombstones (still summarized and flooded,
//! ignored by SPF) until the purge grace interval has passed.

use bytes::Bytes;
use rift_wire::{
    OriginEnvelope, SystemId, TieDirection, TieHeader, TieHeaderWithLifetime, TieId, TiePacket,
    TieType,
};
use serde::Serialize;
use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use tracing::{debug, info};

/// Default time a tombstone is kept after its lifetime ran out, in seconds
pub const DEFAULT_PURGE_GRACE_SECS: u32 = 60;
/// Remaining lifetimes closer than this, in seconds, do not order live copies
pub const LIFETIME_DIFF_TO_IGNORE: u32 = 300;

/// Freshness of a received TIE header compared with the local copy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum Freshness {
    /// Received copy dominates, or there is no local copy
    Newer,
    /// Same TIE
    Same,
    /// Local copy dominates
    Older,
}

/// Compare two `(seq_nr, remaining_lifetime)` pairs under the dominance rule
pub fn dominance(a_seq: u64, a_lifetime: u32, b_seq: u64, b_lifetime: u32) -> Ordering {
    match a_seq.cmp(&b_seq) {
        Ordering::Equal => match (a_lifetime == 0, b_lifetime == 0) {
            (true, false) => Ordering::Greater,
            (false, true) => Ordering::Less,
            (false, false) if a_lifetime.abs_diff(b_lifetime) > LIFETIME_DIFF_TO_IGNORE => {
                a_lifetime.cmp(&b_lifetime)
            }
            _ => Ordering::Equal,
        },
        unequal => unequal,
    }
}

/// A TIE as held in the database
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredTie {
    /// Decoded TIE
    pub packet: TiePacket,
    /// Encoded TIE exactly as covered by the origin fingerprint
    pub encoded: Bytes,
    /// Origin envelope received with, or computed for, the TIE
    pub origin: OriginEnvelope,
    /// Remaining lifetime in seconds
    pub remaining_lifetime: u32,
    /// Seconds spent as a tombstone
    expired_for: u32,
}

impl StoredTie {
    /// Wrap a TIE for storing
    pub fn new(packet: TiePacket, encoded: Bytes, origin: OriginEnvelope, remaining_lifetime: u32) -> Self {
        Self {
            packet,
            encoded,
            origin,
            remaining_lifetime,
            expired_for: 0,
        }
    }

    /// TIE ID
    pub fn tie_id(&self) -> TieId {
        self.packet.header.tie_id
    }

    /// Sequence number
    pub fn seq_nr(&self) -> u64 {
        self.packet.header.seq_nr
    }

    /// TIE header
    pub fn header(&self) -> TieHeader {
        self.packet.header
    }

    /// Header with the current remaining lifetime, as summarized in TIDEs
    pub fn header_with_lifetime(&self) -> TieHeaderWithLifetime {
        TieHeaderWithLifetime {
            header: self.packet.header,
            remaining_lifetime: self.remaining_lifetime,
        }
    }

    /// Whether the lifetime ran out
    pub fn is_expired(&self) -> bool {
        self.remaining_lifetime == 0
    }
}

/// TIEs that changed state during one aging pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgingReport {
    /// TIEs whose lifetime just ran out
    pub expired: Vec<TieId>,
    /// Tombstones removed from the database
    pub purged: Vec<TieId>,
}

impl AgingReport {
    /// Whether nothing changed
    pub fn is_empty(&self) -> bool {
        self.expired.is_empty() && self.purged.is_empty()
    }
}

/// Database statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DatabaseStats {
    /// TIEs held, tombstones included
    pub total_ties: usize,
    /// Tombstones held
    pub tombstones: usize,
    /// Successful stores since creation
    pub stores: u64,
}

/// Link-state database of one node
#[derive(Debug)]
pub struct TieDatabase {
    ties: BTreeMap<TieId, StoredTie>,
    purge_grace: u32,
    stores: u64,
}

impl Default for TieDatabase {
    fn default() -> Self {
        Self::new(DEFAULT_PURGE_GRACE_SECS)
    }
}

impl TieDatabase {
    /// Create an empty database
    pub fn new(purge_grace: u32) -> Self {
        Self {
            ties: BTreeMap::new(),
            purge_grace,
            stores: 0,
        }
    }

    /// Compare a received header with the local copy
    pub fn compare(&self, received: &TieHeaderWithLifetime) -> Freshness {
        match self.ties.get(&received.tie_id()) {
            None => Freshness::Newer,
            Some(local) => match dominance(
                received.header.seq_nr,
                received.remaining_lifetime,
                local.seq_nr(),
                local.remaining_lifetime,
            ) {
                Ordering::Greater => Freshness::Newer,
                Ordering::Equal => Freshness::Same,
                Ordering::Less => Freshness::Older,
            },
        }
    }

    /// Store a TIE if it dominates the local copy. Returns the freshness of
    /// the offered TIE; only [`Freshness::Newer`] changed the database.
    pub fn store(&mut self, tie: StoredTie) -> Freshness {
        let freshness = self.compare(&tie.header_with_lifetime());
        if freshness == Freshness::Newer {
            debug!(
                "Storing TIE {} seq {} lifetime {}",
                tie.tie_id(),
                tie.seq_nr(),
                tie.remaining_lifetime
            );
            self.ties.insert(tie.tie_id(), tie);
            self.stores += 1;
        }
        freshness
    }

    /// Local copy of a TIE
    pub fn get(&self, tie_id: &TieId) -> Option<&StoredTie> {
        self.ties.get(tie_id)
    }

    /// Local copy of a TIE, live copies only
    pub fn get_live(&self, tie_id: &TieId) -> Option<&StoredTie> {
        self.ties.get(tie_id).filter(|tie| !tie.is_expired())
    }

    /// Remove a TIE regardless of dominance
    pub fn remove(&mut self, tie_id: &TieId) -> Option<StoredTie> {
        self.ties.remove(tie_id)
    }

    /// All TIEs in TIE ID order
    pub fn iter(&self) -> impl Iterator<Item = &StoredTie> {
        self.ties.values()
    }

    /// TIEs within an inclusive TIE ID range
    pub fn range(&self, range: RangeInclusive<TieId>) -> impl Iterator<Item = &StoredTie> {
        self.ties.range(range).map(|(_, tie)| tie)
    }

    /// Live TIEs of one originator in one direction
    pub fn originated_by(
        &self,
        direction: TieDirection,
        originator: SystemId,
    ) -> impl Iterator<Item = &StoredTie> {
        let start = TieId::new(direction, originator, TieType::Node, 0);
        let end = TieId::new(direction, originator, TieType::KeyValue, u32::MAX);
        self.range(start..=end).filter(|tie| !tie.is_expired())
    }

    /// Live TIEs of one type from one originator in one direction
    pub fn of_type(
        &self,
        direction: TieDirection,
        originator: SystemId,
        tie_type: TieType,
    ) -> impl Iterator<Item = &StoredTie> {
        let start = TieId::new(direction, originator, tie_type, 0);
        let end = TieId::new(direction, originator, tie_type, u32::MAX);
        self.range(start..=end).filter(|tie| !tie.is_expired())
    }

    /// Originators with at least one live TIE in `direction`
    pub fn originators(&self, direction: TieDirection) -> Vec<SystemId> {
        let mut originators: Vec<SystemId> = self
            .ties
            .values()
            .filter(|tie| tie.tie_id().direction == direction && !tie.is_expired())
            .map(|tie| tie.tie_id().originator)
            .collect();
        originators.dedup();
        originators
    }

    /// Headers of every TIE, tombstones included
    pub fn headers(&self) -> impl Iterator<Item = TieHeaderWithLifetime> + '_ {
        self.ties.values().map(StoredTie::header_with_lifetime)
    }

    /// Count down every remaining lifetime by `seconds`, turn TIEs reaching
    /// zero into tombstones and drop tombstones older than the purge grace
    pub fn age(&mut self, seconds: u32) -> AgingReport {
        let mut report = AgingReport::default();
        for (tie_id, tie) in self.ties.iter_mut() {
            if tie.is_expired() {
                tie.expired_for = tie.expired_for.saturating_add(seconds);
                if tie.expired_for >= self.purge_grace {
                    report.purged.push(*tie_id);
                }
            } else {
                tie.remaining_lifetime = tie.remaining_lifetime.saturating_sub(seconds);
                if tie.is_expired() {
                    report.expired.push(*tie_id);
                }
            }
        }
        for tie_id in &report.purged {
            self.ties.remove(tie_id);
        }
        if !report.is_empty() {
            info!(
                "TIE aging: {} expired, {} purged",
                report.expired.len(),
                report.purged.len()
            );
        }
        report
    }

    /// Number of TIEs held
    pub fn len(&self) -> usize {
        self.ties.len()
    }

    /// Whether the database is empty
    pub fn is_empty(&self) -> bool {
        self.ties.is_empty()
    }

    /// Database statistics
    pub fn stats(&self) -> DatabaseStats {
        DatabaseStats {
            total_ties: self.ties.len(),
            tombstones: self.ties.values().filter(|tie| tie.is_expired()).count(),
            stores: self.stores,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rift_wire::{TieElement, TieHeader};

    fn tie(originator: SystemId, seq: u64, lifetime: u32) -> StoredTie {
        let tie_id = TieId::new(TieDirection::North, originator, TieType::Node, 1);
        let packet = TiePacket {
            header: TieHeader::new(tie_id, seq),
            element: TieElement::empty(TieType::Node),
        };
        StoredTie::new(packet, Bytes::new(), OriginEnvelope::empty(), lifetime)
    }

    #[test]
    fn test_store_keeps_dominant_copy() {
        let mut db = TieDatabase::default();
        assert_eq!(db.store(tie(1, 5, 100)), Freshness::Newer);
        assert_eq!(db.store(tie(1, 4, 100)), Freshness::Older);
        assert_eq!(db.store(tie(1, 5, 50)), Freshness::Same);
        assert_eq!(db.get(&tie(1, 0, 0).tie_id()).unwrap().remaining_lifetime, 100);

        assert_eq!(db.store(tie(1, 5, 0)), Freshness::Newer);
        assert!(db.get(&tie(1, 0, 0).tie_id()).unwrap().is_expired());
        assert_eq!(db.stats().stores, 2);
    }

    #[test]
    fn test_equal_seq_longer_lifetime_wins_past_threshold() {
        assert_eq!(dominance(3, 1000, 3, 700), Ordering::Equal);
        assert_eq!(dominance(3, 1001, 3, 700), Ordering::Greater);
        assert_eq!(dominance(3, 100, 3, 401), Ordering::Less);
        // Expired still wins over any live copy
        assert_eq!(dominance(3, 0, 3, 3600), Ordering::Greater);
        assert_eq!(dominance(3, 0, 3, 0), Ordering::Equal);
        assert_eq!(dominance(4, 1, 3, 3600), Ordering::Greater);

        let mut db = TieDatabase::default();
        db.store(tie(1, 5, 100));
        assert_eq!(db.store(tie(1, 5, 350)), Freshness::Same);
        assert_eq!(db.store(tie(1, 5, 3600)), Freshness::Newer);
        assert_eq!(db.store(tie(1, 5, 100)), Freshness::Older);
        assert_eq!(db.get(&tie(1, 0, 0).tie_id()).unwrap().remaining_lifetime, 3600);
    }

    #[test]
    fn test_aging_makes_tombstones_then_purges() {
        let mut db = TieDatabase::new(10);
        db.store(tie(1, 1, 3));
        db.store(tie(2, 1, 100));

        let report = db.age(3);
        assert_eq!(report.expired, vec![tie(1, 0, 0).tie_id()]);
        assert!(report.purged.is_empty());
        assert_eq!(db.stats().tombstones, 1);
        assert!(db.get_live(&tie(1, 0, 0).tie_id()).is_none());
        assert_eq!(db.headers().count(), 2);

        let report = db.age(10);
        assert_eq!(report.purged, vec![tie(1, 0, 0).tie_id()]);
        assert_eq!(db.len(), 1);
    }

    #[test]
    fn test_range_queries() {
        let mut db = TieDatabase::default();
        db.store(tie(1, 1, 100));
        db.store(tie(2, 1, 100));
        db.store(tie(3, 1, 0));

        assert_eq!(db.originated_by(TieDirection::North, 2).count(), 1);
        assert_eq!(db.originated_by(TieDirection::South, 2).count(), 0);
        assert_eq!(db.originators(TieDirection::North), vec![1, 2]);
        assert_eq!(db.of_type(TieDirection::North, 1, TieType::Node).count(), 1);
        assert_eq!(db.of_type(TieDirection::North, 1, TieType::Prefix).count(), 0);
    }

    #[test]
    fn test_compare_unknown_is_newer() {
        let db = TieDatabase::default();
        assert_eq!(db.compare(&tie(9, 1, 1).header_with_lifetime()), Freshness::Newer);
    }

    proptest! {
        #[test]
        fn test_store_order_does_not_matter(
            versions in proptest::collection::vec((1u64..6, prop_oneof![Just(0u32), 1u32..1000]), 1..12),
            seed in any::<u64>(),
        ) {
            let mut forward = TieDatabase::default();
            for (seq, lifetime) in &versions {
                forward.store(tie(1, *seq, *lifetime));
            }

            let mut shuffled = versions.clone();
            let len = shuffled.len();
            let mut state = seed;
            for i in (1..len).rev() {
                state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
                let j = (state >> 33) as usize % (i + 1);
                shuffled.swap(i, j);
            }
            let mut backward = TieDatabase::default();
            for (seq, lifetime) in &shuffled {
                backward.store(tie(1, *seq, *lifetime));
            }

            let id = tie(1, 0, 0).tie_id();
            let a = forward.get(&id).unwrap();
            let b = backward.get(&id).unwrap();
            prop_assert_eq!(a.seq_nr(), b.seq_nr());
            prop_assert_eq!(a.is_expired(), b.is_expired());

            let max_seq = versions.iter().map(|(seq, _)| *seq).max().unwrap();
            let max_expired = versions.iter().any(|(seq, lifetime)| *seq == max_seq && *lifetime == 0);
            prop_assert_eq!(a.seq_nr(), max_seq);
            prop_assert_eq!(a.is_expired(), max_expired);
        }
    }
}
