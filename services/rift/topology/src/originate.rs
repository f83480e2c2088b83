//! Origination of this node's own TIEs.
//!
//! The [`Originator`] remembers what the node currently wants to advertise
//! and hands out a new TIE whenever that content changes, when the database
//! copy is due for a refresh, or when a stale copy of an own TIE comes back
//! from the network with a higher sequence number.

use crate::database::TieDatabase;
use rift_wire::{
    IpPrefix, Level, NodeCapabilities, NodeNeighborsTieElement, NodeTieElement, PrefixAttributes,
    PrefixTieElement, SystemId, TieDirection, TieElement, TieHeader, TieHeaderWithLifetime,
    TieId, TiePacket, TieType, DEFAULT_LIFETIME, PURGE_LIFETIME,
};
use std::collections::BTreeMap;
use tracing::{debug, info};

/// TIE number of the node TIE
pub const NODE_TIE_NR: u32 = 1;
/// TIE number of the prefix TIE
pub const PREFIX_TIE_NR: u32 = 2;
/// TIE number of the negative disaggregation TIE
pub const NEGATIVE_DISAGGREGATION_TIE_NR: u32 = 3;

/// A freshly originated TIE and the lifetime to store it with
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origination {
    /// The TIE
    pub packet: TiePacket,
    /// Initial remaining lifetime
    pub remaining_lifetime: u32,
}

/// Bookkeeping of own TIEs
#[derive(Debug)]
pub struct Originator {
    system_id: SystemId,
    lifetime: u32,
    wanted: BTreeMap<TieId, TieElement>,
    last_seq: BTreeMap<TieId, u64>,
}

impl Originator {
    /// Originator for `system_id` using the default lifetime
    pub fn new(system_id: SystemId) -> Self {
        Self::with_lifetime(system_id, DEFAULT_LIFETIME)
    }

    /// Originator with a custom TIE lifetime
    pub fn with_lifetime(system_id: SystemId, lifetime: u32) -> Self {
        Self {
            system_id,
            lifetime,
            wanted: BTreeMap::new(),
            last_seq: BTreeMap::new(),
        }
    }

    /// TIE ID of an own TIE
    pub fn tie_id(&self, direction: TieDirection, tie_type: TieType, tie_nr: u32) -> TieId {
        TieId::new(direction, self.system_id, tie_type, tie_nr)
    }

    /// Whether this node currently originates `tie_id`
    pub fn originates(&self, tie_id: &TieId) -> bool {
        self.wanted.contains_key(tie_id)
    }

    /// Advertise `element` under `tie_id`. Returns a new TIE unless the
    /// database already holds a live copy with the same content.
    pub fn originate(
        &mut self,
        db: &TieDatabase,
        tie_id: TieId,
        element: TieElement,
    ) -> Option<Origination> {
        let current = db
            .get_live(&tie_id)
            .map_or(false, |tie| tie.packet.element == element);
        if current && self.wanted.get(&tie_id) == Some(&element) {
            return None;
        }
        self.wanted.insert(tie_id, element.clone());
        Some(self.next(db, tie_id, element, self.lifetime, 0))
    }

    /// Stop advertising `tie_id`, flushing it when the database has a copy
    pub fn withdraw(&mut self, db: &TieDatabase, tie_id: TieId) -> Option<Origination> {
        let wanted = self.wanted.remove(&tie_id).is_some();
        let live = db.get_live(&tie_id).is_some();
        if !wanted && !live {
            return None;
        }
        info!("Flushing own TIE {}", tie_id);
        Some(self.next(
            db,
            tie_id,
            TieElement::empty(tie_id.tie_type),
            PURGE_LIFETIME,
            0,
        ))
    }

    /// Own TIEs whose database copy is missing or past half of its lifetime
    pub fn refresh_due(&mut self, db: &TieDatabase) -> Vec<Origination> {
        let due: Vec<(TieId, TieElement)> = self
            .wanted
            .iter()
            .filter(|(tie_id, _)| {
                db.get_live(tie_id)
                    .map_or(true, |tie| tie.remaining_lifetime < self.lifetime / 2)
            })
            .map(|(tie_id, element)| (*tie_id, element.clone()))
            .collect();
        due.into_iter()
            .map(|(tie_id, element)| {
                debug!("Refreshing own TIE {}", tie_id);
                self.next(db, tie_id, element, self.lifetime, 0)
            })
            .collect()
    }

    /// React to a received copy of an own TIE that is newer than the local
    /// one: re-originate above it, or flush it when no longer advertised
    pub fn received_own(
        &mut self,
        db: &TieDatabase,
        received: &TieHeaderWithLifetime,
    ) -> Origination {
        let tie_id = received.tie_id();
        let floor = received.header.seq_nr;
        match self.wanted.get(&tie_id).cloned() {
            Some(element) => {
                info!(
                    "Received own TIE {} with seq {}, re-originating",
                    tie_id, floor
                );
                self.next(db, tie_id, element, self.lifetime, floor)
            }
            None => {
                info!("Received stale own TIE {}, flushing", tie_id);
                self.next(
                    db,
                    tie_id,
                    TieElement::empty(tie_id.tie_type),
                    PURGE_LIFETIME,
                    floor,
                )
            }
        }
    }

    fn next(
        &mut self,
        db: &TieDatabase,
        tie_id: TieId,
        element: TieElement,
        remaining_lifetime: u32,
        floor: u64,
    ) -> Origination {
        let last = self.last_seq.get(&tie_id).copied().unwrap_or(0);
        let stored = db.get(&tie_id).map_or(0, |tie| tie.seq_nr());
        let seq_nr = last.max(stored).max(floor) + 1;
        self.last_seq.insert(tie_id, seq_nr);
        Origination {
            packet: TiePacket {
                header: TieHeader {
                    origination_lifetime: Some(self.lifetime),
                    ..TieHeader::new(tie_id, seq_nr)
                },
                element,
            },
            remaining_lifetime,
        }
    }
}

/// Node element listing the given three-way neighbors
pub fn node_element(
    level: Level,
    neighbors: BTreeMap<SystemId, NodeNeighborsTieElement>,
    capabilities: NodeCapabilities,
    name: Option<String>,
    pod: u32,
) -> TieElement {
    TieElement::Node(NodeTieElement {
        level,
        neighbors,
        capabilities,
        name,
        pod,
    })
}

/// Prefix element from `(prefix, metric)` pairs
pub fn prefix_element(prefixes: impl IntoIterator<Item = (IpPrefix, u32)>) -> PrefixTieElement {
    PrefixTieElement {
        prefixes: prefixes
            .into_iter()
            .map(|(prefix, metric)| (prefix, PrefixAttributes::with_metric(metric)))
            .collect(),
    }
}
