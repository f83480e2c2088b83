//! Multi-node behavior on the in-memory fabric

use crate::config::{InterfaceConfig, NodeConfig, PrefixConfig};
use crate::sim::{Fabric, Transit};
use bytes::Bytes;
use rift_adjacency::{LieRule, LieState, LieVerdict, RemovedReason};
use rift_routing::RouteOwner;
use rift_security::{Algorithm, AuthCounter, Key};
use rift_topology::{NEGATIVE_DISAGGREGATION_TIE_NR, NODE_TIE_NR, PREFIX_TIE_NR};
use rift_wire::{IpPrefix, Level, SystemId, TieDirection, TieId, TieType, INFINITE_DISTANCE};
use std::collections::BTreeSet;
use std::time::Duration;

fn node(name: &str, system_id: SystemId, level: Option<Level>, peers: &[&str]) -> NodeConfig {
    let mut config = NodeConfig::new(name, system_id);
    config.level = level;
    for peer in peers {
        config.interfaces.push(InterfaceConfig::new(format!("if-{}", peer)));
    }
    config
}

fn with_prefix(mut config: NodeConfig, prefix: &str) -> NodeConfig {
    config.v4_prefixes.push(PrefixConfig {
        prefix: prefix.parse().unwrap(),
        metric: 1,
    });
    config
}

fn connect(fabric: &mut Fabric, a: &str, b: &str) {
    fabric
        .link(a, &format!("if-{}", b), b, &format!("if-{}", a))
        .unwrap();
}

fn pair(a: NodeConfig, b: NodeConfig) -> Fabric {
    let mut fabric = Fabric::new();
    let (a_name, b_name) = (a.name.clone(), b.name.clone());
    fabric.add_node(a).unwrap();
    fabric.add_node(b).unwrap();
    connect(&mut fabric, &a_name, &b_name);
    fabric.start();
    fabric
}

fn state(fabric: &Fabric, name: &str, interface: &str) -> LieState {
    fabric
        .node(name)
        .unwrap()
        .interface(interface)
        .unwrap()
        .state()
}

fn hop_neighbors(fabric: &Fabric, name: &str, prefix: &IpPrefix) -> BTreeSet<SystemId> {
    let route = fabric
        .node(name)
        .unwrap()
        .rib()
        .unwrap()
        .get(prefix)
        .unwrap();
    route.next_hops.iter().map(|hop| hop.neighbor).collect()
}

fn keyed(mut config: NodeConfig, secret: &str) -> NodeConfig {
    config.keys.push(Key::new(1, Algorithm::HmacSha256, secret));
    config.active_key = Some(1);
    config
}

#[test]
fn test_spine_and_leaf_reach_three_way() {
    let mut fabric = pair(
        node("node1", 1, Some(2), &["node2"]),
        node("node2", 2, Some(0), &["node1"]),
    );
    fabric.run_for(Duration::from_secs(5));

    assert_eq!(state(&fabric, "node1", "if-node2"), LieState::ThreeWay);
    assert_eq!(state(&fabric, "node2", "if-node1"), LieState::ThreeWay);

    let node1 = fabric.node("node1").unwrap();
    let offer = node1.ztp().offer("if-node2").unwrap();
    assert!(offer.removed);
    assert_eq!(offer.removed_reason, Some(RemovedReason::LevelIsLeaf));
    assert_eq!(node1.level(), Some(2));

    let node2 = fabric.node("node2").unwrap();
    let offer = node2.ztp().offer("if-node1").unwrap();
    assert!(offer.best);
    assert!(offer.best_3way);
    assert_eq!(offer.level, Some(2));
    assert_eq!(node2.level(), Some(0));
    assert_eq!(node2.ztp().hat(), Some(2));

    let snapshot = node2.snapshot();
    let json = serde_json::to_value(&snapshot).unwrap();
    assert_eq!(json["interfaces"][0]["received_offer"]["best_3way"], true);
}

#[test]
fn test_levels_too_far_apart_stay_one_way() {
    let mut fabric = pair(
        node("node1", 1, Some(3), &["node2"]),
        node("node2", 2, Some(1), &["node1"]),
    );
    fabric.run_for(Duration::from_secs(5));

    for (name, interface) in [("node1", "if-node2"), ("node2", "if-node1")] {
        let node = fabric.node(name).unwrap();
        let adjacency = node.interface(interface).unwrap().adjacency();
        assert_eq!(adjacency.state(), LieState::OneWay);
        assert_eq!(
            adjacency.verdict(),
            Some(LieVerdict::Reject(LieRule::LevelMismatch))
        );
        let json = serde_json::to_value(node.snapshot()).unwrap();
        assert_eq!(json["interfaces"][0]["verdict"], "Rejected: Level mismatch");
        assert!(node.interface(interface).unwrap().flooding().is_none());
    }

    let node1 = fabric.node("node1").unwrap().ztp();
    assert_eq!(node1.hal(), Some(1));
    assert_eq!(node1.hat(), None);
    assert_eq!(node1.level(), Some(3));
    let node2 = fabric.node("node2").unwrap().ztp();
    assert_eq!(node2.hal(), Some(3));
    assert_eq!(node2.level(), Some(1));
}

#[test]
fn test_level_derived_from_top_of_fabric() {
    let mut tof = node("tof", 100, None, &["spine"]);
    tof.top_of_fabric = true;
    let mut fabric = pair(tof, node("spine", 10, None, &["tof"]));
    fabric.run_for(Duration::from_secs(8));

    let tof = fabric.node("tof").unwrap();
    let spine = fabric.node("spine").unwrap();
    assert_eq!(tof.level(), Some(24));
    assert_eq!(spine.level(), Some(23));
    assert_eq!(spine.ztp().hal(), Some(24));
    assert_eq!(state(&fabric, "spine", "if-tof"), LieState::ThreeWay);
    assert_eq!(state(&fabric, "tof", "if-spine"), LieState::ThreeWay);

    // The spine's level comes from this interface, so it must not be
    // offered back
    assert!(spine.ztp().not_a_ztp_offer("if-tof"));
    let offer = tof.ztp().offer("if-spine").unwrap();
    assert_eq!(offer.removed_reason, Some(RemovedReason::NotAZtpOffer));
}

#[test]
fn test_mismatched_secrets_never_form_adjacency() {
    let mut fabric = pair(
        keyed(node("node1", 1, Some(1), &["node2"]), "alpha"),
        keyed(node("node2", 2, Some(1), &["node1"]), "beta"),
    );
    fabric.run_for(Duration::from_secs(5));

    for (name, interface) in [("node1", "if-node2"), ("node2", "if-node1")] {
        let node = fabric.node(name).unwrap();
        let interface = node.interface(interface).unwrap();
        assert_eq!(interface.state(), LieState::OneWay);
        assert!(interface.adjacency().neighbor().is_none());
        assert!(
            interface
                .auth_counters()
                .get(AuthCounter::IncorrectOuterFingerprint)
                >= 3
        );
        assert!(node.snapshot().auth_counters.rejections() >= 3);
        assert!(node.ztp().offer(interface.name()).is_none());
    }
}

#[test]
fn test_tampered_packets_rejected_until_clean() {
    let mut fabric = pair(
        keyed(node("node1", 1, Some(1), &["node2"]), "alpha"),
        keyed(node("node2", 2, Some(1), &["node1"]), "alpha"),
    );
    fabric.set_tamper(Box::new(|_: &Transit, datagram: Bytes| {
        let mut bytes = datagram.to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xff;
        Some(Bytes::from(bytes))
    }));
    fabric.run_for(Duration::from_secs(4));

    let node1 = fabric.node("node1").unwrap();
    assert_eq!(state(&fabric, "node1", "if-node2"), LieState::OneWay);
    assert!(
        node1
            .interface("if-node2")
            .unwrap()
            .auth_counters()
            .get(AuthCounter::IncorrectOuterFingerprint)
            > 0
    );
    assert!(fabric.stats().delivered > 0);

    fabric.clear_tamper();
    fabric.run_for(Duration::from_secs(4));
    assert_eq!(state(&fabric, "node1", "if-node2"), LieState::ThreeWay);
    assert_eq!(state(&fabric, "node2", "if-node1"), LieState::ThreeWay);
    let accepts = fabric
        .node("node2")
        .unwrap()
        .interface("if-node1")
        .unwrap()
        .auth_counters()
        .get(AuthCounter::NonEmptyOuterFingerprintAccepts);
    assert!(accepts > 0);
}

#[test]
fn test_dropped_lies_expire_holdtime() {
    let mut fabric = pair(
        node("node1", 1, Some(2), &["node2"]),
        node("node2", 2, Some(0), &["node1"]),
    );
    fabric.run_for(Duration::from_secs(5));
    assert!(fabric
        .node("node2")
        .unwrap()
        .interface("if-node1")
        .unwrap()
        .flooding()
        .is_some());

    fabric.fail_link("node1", "if-node2").unwrap();
    fabric.run_for(Duration::from_secs(5));

    let node2 = fabric.node("node2").unwrap();
    let interface = node2.interface("if-node1").unwrap();
    assert_eq!(interface.state(), LieState::OneWay);
    assert!(interface.flooding().is_none());
    assert!(interface.adjacency().neighbor().is_none());
    let offer = node2.ztp().offer("if-node1").unwrap();
    assert!(offer.removed);
    assert_eq!(offer.removed_reason, Some(RemovedReason::HoldTimeExpired));
    assert_eq!(node2.ztp().hat(), None);

    let json = serde_json::to_value(node2.snapshot()).unwrap();
    assert_eq!(
        json["interfaces"][0]["received_offer"]["removed_reason"],
        "Hold-time expired"
    );

    fabric.restore_link("node1", "if-node2").unwrap();
    fabric.run_for(Duration::from_secs(5));
    assert_eq!(state(&fabric, "node2", "if-node1"), LieState::ThreeWay);
}

#[test]
fn test_stopped_node_expires_neighbor_holdtime() {
    let mut fabric = pair(
        node("node1", 1, Some(1), &["node2"]),
        node("node2", 2, Some(0), &["node1"]),
    );
    fabric.run_for(Duration::from_secs(5));
    assert_eq!(state(&fabric, "node2", "if-node1"), LieState::ThreeWay);

    fabric.stop_node("node1").unwrap();
    assert!(fabric.stop_node("node9").is_err());
    assert!(!fabric.node("node1").unwrap().is_running());
    assert_eq!(fabric.node("node1").unwrap().next_expiry(), None);

    // Still three-way until the holdtime runs out
    fabric.run_for(Duration::from_secs(1));
    assert_eq!(state(&fabric, "node2", "if-node1"), LieState::ThreeWay);

    fabric.run_for(Duration::from_secs(4));
    let node2 = fabric.node("node2").unwrap();
    let interface = node2.interface("if-node1").unwrap();
    assert_eq!(interface.state(), LieState::OneWay);
    assert!(interface.flooding().is_none());
    assert_eq!(
        node2.ztp().offer("if-node1").unwrap().removed_reason,
        Some(RemovedReason::HoldTimeExpired)
    );
}

#[test]
fn test_two_nodes_flood_and_route() {
    let mut tof = node("tof", 100, None, &["leaf"]);
    tof.top_of_fabric = true;
    let leaf = with_prefix(node("leaf", 1, Some(0), &["tof"]), "10.0.2.0/24");
    let mut fabric = pair(tof, leaf);
    fabric.run_for(Duration::from_secs(10));

    let tof = fabric.node("tof").unwrap();
    let leaf = fabric.node("leaf").unwrap();

    let leaf_prefixes = TieId::new(TieDirection::North, 1, TieType::Prefix, PREFIX_TIE_NR);
    let stored = tof.database().get_live(&leaf_prefixes).unwrap();
    assert_eq!(
        stored.packet,
        leaf.database().get_live(&leaf_prefixes).unwrap().packet
    );
    let tof_defaults = TieId::new(TieDirection::South, 100, TieType::Prefix, PREFIX_TIE_NR);
    assert!(leaf.database().get_live(&tof_defaults).is_some());
    // North TIEs of the top of fabric never flow south
    let tof_node_north = TieId::new(TieDirection::North, 100, TieType::Node, NODE_TIE_NR);
    assert!(tof.database().get_live(&tof_node_north).is_some());
    assert!(leaf.database().get_live(&tof_node_north).is_none());

    let prefix: IpPrefix = "10.0.2.0/24".parse().unwrap();
    let route = tof.rib().unwrap().get(&prefix).unwrap();
    assert_eq!(route.owner, RouteOwner::SouthSpf);
    assert_eq!(route.cost, 2);
    assert_eq!(hop_neighbors(&fabric, "tof", &prefix), BTreeSet::from([1]));

    let default = leaf.rib().unwrap().lookup("192.0.2.1".parse().unwrap()).unwrap();
    assert_eq!(default.owner, RouteOwner::NorthSpf);
    assert!(default.prefix.is_default());
    assert_eq!(default.next_hops.iter().next().unwrap().neighbor, 100);

    assert!(tof.spf_runs() > 0);
    assert_eq!(tof.interfaces()[0].counters().dropped_wrong_sender, 0);
    assert!(tof.interfaces()[0].counters().received["tie"] >= 2);
}

// Two planes of two top-of-fabric nodes each, east-west links between the
// planes, two PoDs of one leaf and two spines
const TOFS: [(&str, SystemId); 4] = [
    ("tof-a1", 101),
    ("tof-a2", 102),
    ("tof-b1", 103),
    ("tof-b2", 104),
];
const SPINES: [(&str, SystemId, [&str; 2], &str); 4] = [
    ("spine-1-a", 11, ["tof-a1", "tof-a2"], "leaf-1"),
    ("spine-2-a", 12, ["tof-a1", "tof-a2"], "leaf-2"),
    ("spine-1-b", 13, ["tof-b1", "tof-b2"], "leaf-1"),
    ("spine-2-b", 14, ["tof-b1", "tof-b2"], "leaf-2"),
];
const EAST_WEST: [(&str, &str); 2] = [("tof-a1", "tof-b1"), ("tof-a2", "tof-b2")];

fn multi_plane_fabric() -> Fabric {
    let mut fabric = Fabric::new();
    for (name, system_id) in TOFS {
        let mut peers: Vec<&str> = SPINES
            .iter()
            .filter(|(_, _, tofs, _)| tofs.contains(&name))
            .map(|(spine, _, _, _)| *spine)
            .collect();
        for (a, b) in EAST_WEST {
            if a == name {
                peers.push(b);
            } else if b == name {
                peers.push(a);
            }
        }
        let mut config = node(name, system_id, Some(2), &peers);
        config.top_of_fabric = true;
        fabric.add_node(config).unwrap();
    }
    for (name, system_id, tofs, leaf) in SPINES {
        let peers = [tofs[0], tofs[1], leaf];
        fabric
            .add_node(node(name, system_id, Some(1), &peers))
            .unwrap();
    }
    fabric
        .add_node(with_prefix(
            node("leaf-1", 1, Some(0), &["spine-1-a", "spine-1-b"]),
            "10.0.1.0/24",
        ))
        .unwrap();
    fabric
        .add_node(with_prefix(
            node("leaf-2", 2, Some(0), &["spine-2-a", "spine-2-b"]),
            "10.0.2.0/24",
        ))
        .unwrap();

    for (spine, _, tofs, leaf) in SPINES {
        for tof in tofs {
            connect(&mut fabric, spine, tof);
        }
        connect(&mut fabric, spine, leaf);
    }
    for (a, b) in EAST_WEST {
        connect(&mut fabric, a, b);
    }
    fabric.start();
    fabric
}

fn negative_prefixes(fabric: &Fabric, name: &str, system_id: SystemId) -> Vec<(IpPrefix, u32)> {
    let tie_id = TieId::new(
        TieDirection::South,
        system_id,
        TieType::NegativeDisaggregationPrefix,
        NEGATIVE_DISAGGREGATION_TIE_NR,
    );
    fabric
        .node(name)
        .unwrap()
        .database()
        .get_live(&tie_id)
        .and_then(|tie| tie.packet.element.as_prefixes())
        .map(|element| {
            element
                .prefixes
                .iter()
                .map(|(prefix, attributes)| (*prefix, attributes.metric))
                .collect()
        })
        .unwrap_or_default()
}

#[test]
fn test_multi_plane_negative_disaggregation() {
    let leaf_1: IpPrefix = "10.0.1.0/24".parse().unwrap();
    let leaf_1_host = "10.0.1.1".parse().unwrap();
    let mut fabric = multi_plane_fabric();
    fabric.run_for(Duration::from_secs(20));

    // Every adjacency is up and the leaves balance over both spines
    for (spine, _, tofs, leaf) in SPINES {
        for peer in tofs.iter().chain([&leaf]) {
            assert_eq!(
                state(&fabric, spine, &format!("if-{}", peer)),
                LieState::ThreeWay,
                "{} towards {}",
                spine,
                peer
            );
        }
    }
    assert_eq!(state(&fabric, "tof-a1", "if-tof-b1"), LieState::ThreeWay);
    let default = IpPrefix::default_v4();
    assert_eq!(hop_neighbors(&fabric, "leaf-1", &default), BTreeSet::from([11, 13]));
    assert_eq!(hop_neighbors(&fabric, "leaf-2", &default), BTreeSet::from([12, 14]));

    let routes = fabric.node("tof-a1").unwrap().routes().unwrap();
    assert_eq!(routes.south.prefixes[&leaf_1].cost, 3);
    assert!(routes.fallen_leaves.is_empty());
    assert!(routes.negative_disaggregation.is_empty());
    assert_eq!(hop_neighbors(&fabric, "tof-a1", &leaf_1), BTreeSet::from([11]));

    // Plane a loses its only path down to leaf-1
    fabric.fail_link("spine-1-a", "if-tof-a1").unwrap();
    fabric.fail_link("spine-1-a", "if-tof-a2").unwrap();
    fabric.run_for(Duration::from_secs(20));

    let tof_a1 = fabric.node("tof-a1").unwrap();
    let routes = tof_a1.routes().unwrap();
    assert!(!routes.south.reaches(&leaf_1));
    let east_west = routes.east_west.as_ref().unwrap();
    assert_eq!(east_west.prefixes[&leaf_1].cost, 4);
    assert_eq!(routes.fallen_leaves, BTreeSet::from([leaf_1]));
    let route = tof_a1.rib().unwrap().get(&leaf_1).unwrap();
    assert_eq!(route.owner, RouteOwner::SouthSpf);
    assert_eq!(hop_neighbors(&fabric, "tof-a1", &leaf_1), BTreeSet::from([103]));

    for (name, system_id) in [("tof-a1", 101), ("tof-a2", 102)] {
        assert_eq!(
            negative_prefixes(&fabric, name, system_id),
            vec![(leaf_1, INFINITE_DISTANCE)]
        );
    }
    // Plane b still reaches leaf-1 and stays quiet
    assert!(negative_prefixes(&fabric, "tof-b1", 103).is_empty());

    // spine-2-a hears the negative from both of its parents
    let spine = fabric.node("spine-2-a").unwrap();
    let route = spine.rib().unwrap().get(&leaf_1).unwrap();
    assert!(route.negative);
    assert!(!route.is_reachable());
    assert_eq!(
        negative_prefixes(&fabric, "spine-2-a", 12),
        vec![(leaf_1, INFINITE_DISTANCE)]
    );

    // leaf-2 steers leaf-1 traffic to the spine of plane b
    let leaf = fabric.node("leaf-2").unwrap();
    let routes = leaf.routes().unwrap();
    assert_eq!(routes.north.prefixes[&leaf_1].cost, INFINITE_DISTANCE);
    assert!(routes.negative_disaggregation.is_empty());
    let route = leaf.rib().unwrap().lookup(leaf_1_host).unwrap();
    assert_eq!(route.prefix, leaf_1);
    assert!(!route.negative);
    assert_eq!(hop_neighbors(&fabric, "leaf-2", &leaf_1), BTreeSet::from([14]));
    assert!(negative_prefixes(&fabric, "spine-2-b", 14).is_empty());

    // Repair: the negative disaggregation is withdrawn everywhere
    fabric.restore_link("spine-1-a", "if-tof-a1").unwrap();
    fabric.restore_link("spine-1-a", "if-tof-a2").unwrap();
    fabric.run_for(Duration::from_secs(20));

    let routes = fabric.node("tof-a1").unwrap().routes().unwrap();
    assert!(routes.south.reaches(&leaf_1));
    assert!(routes.fallen_leaves.is_empty());
    assert!(negative_prefixes(&fabric, "tof-a1", 101).is_empty());
    assert!(negative_prefixes(&fabric, "spine-2-a", 12).is_empty());
    assert!(fabric
        .node("spine-2-a")
        .unwrap()
        .rib()
        .unwrap()
        .get(&leaf_1)
        .is_none());
    let route = fabric
        .node("leaf-2")
        .unwrap()
        .rib()
        .unwrap()
        .lookup(leaf_1_host)
        .unwrap();
    assert!(route.prefix.is_default());
    assert_eq!(hop_neighbors(&fabric, "leaf-2", &default), BTreeSet::from([12, 14]));
}
