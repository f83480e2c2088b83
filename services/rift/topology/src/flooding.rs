//! Per-neighbor flooding state and TIDE/TIRE synchronization.
//!
//! Each THREE_WAY adjacency has a [`FloodPeer`] holding four sets:
//! - `ties_tx`: TIEs to send at the next service run
//! - `ties_rtx`: TIEs sent and not yet acknowledged
//! - `ties_req`: TIEs to request from the neighbor
//! - `ties_ack`: received TIEs to acknowledge
//!
//! The owner calls [`FloodPeer::service`] on the flood-service timer and sends
//! the TIEs and TIRE it returns.

use crate::database::{Freshness, TieDatabase};
use crate::scope::FloodScope;
use rift_wire::{SystemId, TidePacket, TieHeader, TieHeaderWithLifetime, TieId, TirePacket};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::time::{Duration, Instant};
use tracing::debug;

/// Maximum number of headers in one TIDE packet
pub const MAX_TIDE_HEADERS: usize = 32;

#[derive(Debug, Clone, Copy)]
struct Request {
    header: TieHeaderWithLifetime,
    sent_at: Option<Instant>,
}

/// Work produced by one service run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FloodWork {
    /// TIEs to send, read from the database at send time
    pub ties: Vec<TieId>,
    /// Requests and acknowledgements
    pub tire: Option<TirePacket>,
}

/// Introspection view of a flooding peer
#[derive(Debug, Clone, Serialize)]
pub struct FloodSnapshot {
    /// Neighbor system ID
    pub neighbor: SystemId,
    /// Flooding scope
    pub scope: FloodScope,
    /// Queued for transmission
    pub ties_tx: Vec<TieId>,
    /// Awaiting acknowledgement
    pub ties_rtx: Vec<TieId>,
    /// Requested from the neighbor
    pub ties_req: Vec<TieId>,
    /// Pending acknowledgements
    pub ties_ack: Vec<TieId>,
}

/// Flooding state towards one neighbor
#[derive(Debug)]
pub struct FloodPeer {
    neighbor: SystemId,
    scope: FloodScope,
    ties_tx: BTreeSet<TieId>,
    ties_rtx: BTreeMap<TieId, Instant>,
    ties_req: BTreeMap<TieId, Request>,
    ties_ack: BTreeMap<TieId, TieHeaderWithLifetime>,
}

impl FloodPeer {
    /// Start flooding to `neighbor`
    pub fn new(neighbor: SystemId, scope: FloodScope) -> Self {
        Self {
            neighbor,
            scope,
            ties_tx: BTreeSet::new(),
            ties_rtx: BTreeMap::new(),
            ties_req: BTreeMap::new(),
            ties_ack: BTreeMap::new(),
        }
    }

    /// Neighbor system ID
    pub fn neighbor(&self) -> SystemId {
        self.neighbor
    }

    /// Flooding scope
    pub fn scope(&self) -> FloodScope {
        self.scope
    }

    /// Queue every TIE of the database this neighbor should have
    pub fn queue_all(&mut self, db: &TieDatabase) {
        let ids: Vec<TieId> = db
            .iter()
            .filter(|tie| !tie.is_expired())
            .map(|tie| tie.tie_id())
            .collect();
        for tie_id in ids {
            self.queue(tie_id);
        }
    }

    /// Queue a TIE for transmission if the scope allows it
    pub fn queue(&mut self, tie_id: TieId) -> bool {
        if !self.scope.may_send(&tie_id) {
            return false;
        }
        self.ties_req.remove(&tie_id);
        self.ties_ack.remove(&tie_id);
        self.ties_tx.insert(tie_id)
    }

    /// Record a TIE received from this neighbor with the outcome of storing it
    pub fn tie_received(&mut self, header: TieHeaderWithLifetime, freshness: Freshness) {
        let tie_id = header.tie_id();
        self.ties_req.remove(&tie_id);
        match freshness {
            Freshness::Newer | Freshness::Same => {
                self.ties_tx.remove(&tie_id);
                self.ties_rtx.remove(&tie_id);
                self.ties_ack.insert(tie_id, header);
            }
            Freshness::Older => {
                self.queue(tie_id);
            }
        }
    }

    /// Compare a TIDE from the neighbor with the database
    pub fn process_tide(&mut self, db: &TieDatabase, tide: &TidePacket) {
        let mut listed = BTreeSet::new();
        for header in &tide.headers {
            let tie_id = header.tie_id();
            listed.insert(tie_id);
            match db.compare(header) {
                Freshness::Newer => {
                    if self.scope.may_receive(&tie_id) {
                        self.request(db, tie_id);
                    }
                }
                Freshness::Older => {
                    self.queue(tie_id);
                }
                Freshness::Same => {
                    self.ties_tx.remove(&tie_id);
                    self.ties_rtx.remove(&tie_id);
                }
            }
        }

        let missing: Vec<TieId> = db
            .range(tide.start_range..=tide.end_range)
            .filter(|tie| !tie.is_expired() && !listed.contains(&tie.tie_id()))
            .map(|tie| tie.tie_id())
            .collect();
        for tie_id in missing {
            self.queue(tie_id);
        }
    }

    /// Process a TIRE from the neighbor: requests and acknowledgements
    pub fn process_tire(&mut self, db: &TieDatabase, tire: &TirePacket) {
        for header in &tire.headers {
            let tie_id = header.tie_id();
            match db.compare(header) {
                Freshness::Older => {
                    self.queue(tie_id);
                }
                Freshness::Same => {
                    self.ties_tx.remove(&tie_id);
                    self.ties_rtx.remove(&tie_id);
                }
                Freshness::Newer => {
                    if header.header.seq_nr > 0 && self.scope.may_receive(&tie_id) {
                        self.request(db, tie_id);
                    }
                }
            }
        }
    }

    fn request(&mut self, db: &TieDatabase, tie_id: TieId) {
        let header = db
            .get(&tie_id)
            .map(|tie| tie.header_with_lifetime())
            .unwrap_or(TieHeaderWithLifetime {
                header: TieHeader::new(tie_id, 0),
                remaining_lifetime: 0,
            });
        self.ties_tx.remove(&tie_id);
        match self.ties_req.get_mut(&tie_id) {
            Some(request) if request.header == header => {}
            Some(request) => *request = Request { header, sent_at: None },
            None => {
                self.ties_req.insert(tie_id, Request { header, sent_at: None });
            }
        }
    }

    /// Collect the TIEs and the TIRE to send now. Unacknowledged TIEs are
    /// retransmitted after `retransmit`; requests are repeated as often.
    pub fn service(&mut self, db: &TieDatabase, now: Instant, retransmit: Duration) -> FloodWork {
        let mut work = FloodWork::default();

        for tie_id in std::mem::take(&mut self.ties_tx) {
            if db.get(&tie_id).is_some() {
                work.ties.push(tie_id);
                self.ties_rtx.insert(tie_id, now);
            }
        }

        self.ties_rtx.retain(|tie_id, _| db.get(tie_id).is_some());
        for (tie_id, sent_at) in self.ties_rtx.iter_mut() {
            if now.saturating_duration_since(*sent_at) >= retransmit && !work.ties.contains(tie_id)
            {
                work.ties.push(*tie_id);
                *sent_at = now;
            }
        }

        let mut headers = BTreeSet::new();
        for request in self.ties_req.values_mut() {
            let due = request
                .sent_at
                .map_or(true, |sent_at| now.saturating_duration_since(sent_at) >= retransmit);
            if due {
                headers.insert(request.header);
                request.sent_at = Some(now);
            }
        }
        headers.extend(std::mem::take(&mut self.ties_ack).into_values());
        if !headers.is_empty() {
            work.tire = Some(TirePacket { headers });
        }

        if !work.ties.is_empty() || work.tire.is_some() {
            debug!(
                "Flooding to {}: {} TIEs, {} TIRE headers",
                self.neighbor,
                work.ties.len(),
                work.tire.as_ref().map_or(0, |tire| tire.headers.len())
            );
        }
        work
    }

    /// TIDEs describing the database for this neighbor
    pub fn tides(&self, db: &TieDatabase) -> Vec<TidePacket> {
        let headers: Vec<TieHeaderWithLifetime> = db
            .iter()
            .filter(|tie| self.scope.summarizes(&tie.tie_id()))
            .map(|tie| tie.header_with_lifetime())
            .collect();
        build_tides(&headers)
    }

    /// Whether nothing is pending towards the neighbor
    pub fn is_idle(&self) -> bool {
        self.ties_tx.is_empty()
            && self.ties_rtx.is_empty()
            && self.ties_req.is_empty()
            && self.ties_ack.is_empty()
    }

    /// Introspection view
    pub fn snapshot(&self) -> FloodSnapshot {
        FloodSnapshot {
            neighbor: self.neighbor,
            scope: self.scope,
            ties_tx: self.ties_tx.iter().copied().collect(),
            ties_rtx: self.ties_rtx.keys().copied().collect(),
            ties_req: self.ties_req.keys().copied().collect(),
            ties_ack: self.ties_ack.keys().copied().collect(),
        }
    }
}

/// Split sorted headers into TIDEs of at most [`MAX_TIDE_HEADERS`] headers
/// whose ranges together cover the whole TIE ID space
pub fn build_tides(headers: &[TieHeaderWithLifetime]) -> Vec<TidePacket> {
    if headers.is_empty() {
        return vec![TidePacket {
            start_range: TieId::MIN,
            end_range: TieId::MAX,
            headers: Vec::new(),
        }];
    }

    let chunks: Vec<&[TieHeaderWithLifetime]> = headers.chunks(MAX_TIDE_HEADERS).collect();
    let mut tides = Vec::with_capacity(chunks.len());
    let mut start = TieId::MIN;
    for (index, chunk) in chunks.iter().enumerate() {
        let end = match chunk.last() {
            Some(last) if index + 1 < chunks.len() => last.tie_id(),
            _ => TieId::MAX,
        };
        tides.push(TidePacket {
            start_range: start,
            end_range: end,
            headers: chunk.to_vec(),
        });
        start = end.successor().unwrap_or(TieId::MAX);
    }
    tides
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::StoredTie;
    use crate::scope::NeighborDirection;
    use bytes::Bytes;
    use rift_wire::{OriginEnvelope, TieDirection, TieElement, TiePacket, TieType};

    fn stored(direction: TieDirection, originator: SystemId, seq: u64) -> StoredTie {
        let tie_id = TieId::new(direction, originator, TieType::Node, 1);
        StoredTie::new(
            TiePacket {
                header: TieHeader::new(tie_id, seq),
                element: TieElement::empty(TieType::Node),
            },
            Bytes::new(),
            OriginEnvelope::empty(),
            1000,
        )
    }

    fn south_peer() -> FloodPeer {
        FloodPeer::new(9, FloodScope::new(NeighborDirection::South, false, false))
    }

    #[test]
    fn test_tide_requests_missing_and_sends_newer() {
        let mut db = TieDatabase::default();
        db.store(stored(TieDirection::South, 1, 5));
        db.store(stored(TieDirection::South, 2, 1));

        let mut peer = south_peer();
        let tide = TidePacket {
            start_range: TieId::MIN,
            end_range: TieId::MAX,
            headers: vec![
                stored(TieDirection::South, 1, 3).header_with_lifetime(),
                stored(TieDirection::North, 3, 2).header_with_lifetime(),
            ],
        };
        peer.process_tide(&db, &tide);

        let now = Instant::now();
        let work = peer.service(&db, now, Duration::from_secs(1));
        assert_eq!(
            work.ties,
            vec![
                stored(TieDirection::South, 1, 0).tie_id(),
                stored(TieDirection::South, 2, 0).tie_id()
            ]
        );
        let tire = work.tire.unwrap();
        let requested: Vec<_> = tire.headers.iter().collect();
        assert_eq!(requested.len(), 1);
        assert_eq!(requested[0].header.seq_nr, 0);
        assert_eq!(requested[0].tie_id().direction, TieDirection::North);
    }

    #[test]
    fn test_tire_acknowledges_and_stops_retransmission() {
        let mut db = TieDatabase::default();
        let tie = stored(TieDirection::South, 1, 5);
        db.store(tie.clone());

        let mut peer = south_peer();
        assert!(peer.queue(tie.tie_id()));
        let start = Instant::now();
        let retransmit = Duration::from_secs(2);
        assert_eq!(peer.service(&db, start, retransmit).ties.len(), 1);
        assert!(peer
            .service(&db, start + Duration::from_secs(1), retransmit)
            .ties
            .is_empty());
        assert_eq!(
            peer.service(&db, start + Duration::from_secs(2), retransmit).ties,
            vec![tie.tie_id()]
        );

        let ack = TirePacket {
            headers: [tie.header_with_lifetime()].into_iter().collect(),
        };
        peer.process_tire(&db, &ack);
        assert!(peer
            .service(&db, start + Duration::from_secs(10), retransmit)
            .ties
            .is_empty());
        assert!(peer.is_idle());
    }

    #[test]
    fn test_received_tie_is_acknowledged() {
        let mut peer = south_peer();
        let header = stored(TieDirection::North, 4, 2).header_with_lifetime();
        peer.tie_received(header, Freshness::Newer);
        let work = peer.service(&TieDatabase::default(), Instant::now(), Duration::from_secs(1));
        assert!(work.tire.unwrap().headers.contains(&header));
    }

    #[test]
    fn test_scope_blocks_north_ties_to_south() {
        let mut peer = south_peer();
        assert!(!peer.queue(stored(TieDirection::North, 1, 1).tie_id()));
        assert!(peer.queue(stored(TieDirection::South, 1, 1).tie_id()));
    }

    #[test]
    fn test_tides_cover_whole_space() {
        let headers: Vec<_> = (1..=70)
            .map(|originator| stored(TieDirection::South, originator, 1).header_with_lifetime())
            .collect();
        let tides = build_tides(&headers);
        assert_eq!(tides.len(), 3);
        assert_eq!(tides[0].start_range, TieId::MIN);
        assert_eq!(tides[0].headers.len(), MAX_TIDE_HEADERS);
        assert_eq!(tides[2].end_range, TieId::MAX);
        for pair in tides.windows(2) {
            assert_eq!(pair[0].end_range.successor(), Some(pair[1].start_range));
        }

        let empty = build_tides(&[]);
        assert_eq!(empty.len(), 1);
        assert!(empty[0].headers.is_empty());
    }

    #[test]
    fn test_peers_synchronize() {
        let mut db_a = TieDatabase::default();
        let mut db_b = TieDatabase::default();
        for originator in 1..=40 {
            db_a.store(stored(TieDirection::South, originator, 1));
        }
        db_b.store(stored(TieDirection::North, 7, 4));

        // a is north of b
        let mut a = FloodPeer::new(2, FloodScope::new(NeighborDirection::South, false, false));
        let mut b = FloodPeer::new(1, FloodScope::new(NeighborDirection::North, false, false));
        let now = Instant::now();
        let retransmit = Duration::from_secs(5);

        for tide in a.tides(&db_a) {
            b.process_tide(&db_b, &tide);
        }
        for tide in b.tides(&db_b) {
            a.process_tide(&db_a, &tide);
        }

        for _ in 0..3 {
            let work_a = a.service(&db_a, now, retransmit);
            for tie_id in work_a.ties {
                let tie = db_a.get(&tie_id).unwrap().clone();
                let header = tie.header_with_lifetime();
                let freshness = db_b.store(tie);
                b.tie_received(header, freshness);
            }
            if let Some(tire) = work_a.tire {
                b.process_tire(&db_b, &tire);
            }
            let work_b = b.service(&db_b, now, retransmit);
            for tie_id in work_b.ties {
                let tie = db_b.get(&tie_id).unwrap().clone();
                let header = tie.header_with_lifetime();
                let freshness = db_a.store(tie);
                a.tie_received(header, freshness);
            }
            if let Some(tire) = work_b.tire {
                a.process_tire(&db_a, &tire);
            }
        }

        let headers_a: Vec<_> = db_a.headers().map(|h| h.header).collect();
        let headers_b: Vec<_> = db_b.headers().map(|h| h.header).collect();
        assert_eq!(headers_a, headers_b);
        assert_eq!(db_a.get(&stored(TieDirection::North, 7, 0).tie_id()).unwrap().seq_nr(), 4);
        assert_eq!(db_b.len(), 41);
    }
}
