//! Integration tests for inventory pattern resolution: set operators,
//! glob/regex atoms, strict mode, and resolution determinism.

use converge::error::Error;
use converge::inventory::{GroupBuilder, Host, Inventory};
use pretty_assertions::assert_eq;
use proptest::prelude::*;

fn web_staging_inventory() -> Inventory {
    let mut inv = Inventory::new();
    inv.add_host(Host::new("w1")).unwrap();
    inv.add_host(Host::new("w2")).unwrap();
    inv.add_group(GroupBuilder::new("web").hosts(["w1", "w2"]).build())
        .unwrap();
    inv.add_group(GroupBuilder::new("staging").hosts(["w2"]).build())
        .unwrap();
    inv
}

#[test]
fn exclusion_pattern_from_two_groups() {
    // web={w1,w2}, staging={w2}: "web:!staging" resolves to {w1}.
    let inv = web_staging_inventory();
    assert_eq!(inv.resolve_pattern("web:!staging").unwrap(), vec!["w1"]);
}

#[test]
fn intersection_pattern_from_two_groups() {
    // web={w1,w2,w3}, prod={w2,w3}: "web:&prod" resolves to {w2,w3}.
    let mut inv = Inventory::new();
    for h in ["w1", "w2", "w3"] {
        inv.add_host(Host::new(h)).unwrap();
    }
    inv.add_group(GroupBuilder::new("web").hosts(["w1", "w2", "w3"]).build())
        .unwrap();
    inv.add_group(GroupBuilder::new("prod").hosts(["w2", "w3"]).build())
        .unwrap();

    assert_eq!(inv.resolve_pattern("web:&prod").unwrap(), vec!["w2", "w3"]);
}

#[test]
fn union_keeps_inventory_order_not_pattern_order() {
    let mut inv = Inventory::new();
    for h in ["a1", "b1", "c1"] {
        inv.add_host(Host::new(h)).unwrap();
    }
    inv.add_group(GroupBuilder::new("first").hosts(["a1"]).build())
        .unwrap();
    inv.add_group(GroupBuilder::new("last").hosts(["c1"]).build())
        .unwrap();

    // "last" is named first in the pattern, but resolution order is
    // inventory insertion order.
    assert_eq!(inv.resolve_pattern("last:first").unwrap(), vec!["a1", "c1"]);
}

#[test]
fn chained_operators_evaluate_left_to_right() {
    let mut inv = Inventory::new();
    for h in ["w1", "w2", "w3", "d1"] {
        inv.add_host(Host::new(h)).unwrap();
    }
    inv.add_group(GroupBuilder::new("web").hosts(["w1", "w2", "w3"]).build())
        .unwrap();
    inv.add_group(GroupBuilder::new("db").hosts(["d1"]).build())
        .unwrap();
    inv.add_group(GroupBuilder::new("staging").hosts(["w2"]).build())
        .unwrap();

    assert_eq!(
        inv.resolve_pattern("web:db:!staging").unwrap(),
        vec!["w1", "w3", "d1"]
    );
}

#[test]
fn glob_atom_matches_hosts_and_groups() {
    let mut inv = Inventory::new();
    for h in ["web1", "web2", "db1"] {
        inv.add_host(Host::new(h)).unwrap();
    }
    inv.add_group(GroupBuilder::new("webservers").hosts(["db1"]).build())
        .unwrap();

    // "web*" matches the web1/web2 hosts and the webservers group, whose
    // member db1 is pulled in through the group match.
    assert_eq!(
        inv.resolve_pattern("web*").unwrap(),
        vec!["web1", "web2", "db1"]
    );
}

#[test]
fn regex_atom() {
    let mut inv = Inventory::new();
    for h in ["node01", "node02", "edge01"] {
        inv.add_host(Host::new(h)).unwrap();
    }
    assert_eq!(
        inv.resolve_pattern("~node\\d+").unwrap(),
        vec!["node01", "node02"]
    );
}

#[test]
fn child_groups_resolve_transitively() {
    let mut inv = Inventory::new();
    inv.add_group(GroupBuilder::new("web").hosts(["w1"]).build())
        .unwrap();
    inv.add_group(GroupBuilder::new("db").hosts(["d1"]).build())
        .unwrap();
    inv.add_group(
        GroupBuilder::new("prod")
            .child("web")
            .child("db")
            .build(),
    )
    .unwrap();

    assert_eq!(inv.resolve_pattern("prod").unwrap(), vec!["w1", "d1"]);
}

#[test]
fn strict_mode_rejects_unknown_atoms() {
    let mut inv = web_staging_inventory();
    inv.set_strict(true);

    let err = inv.resolve_pattern("web:!missing").unwrap_err();
    assert!(matches!(err, Error::UnknownGroup(atom) if atom == "missing"));
}

#[test]
fn lenient_mode_treats_unknown_atoms_as_empty() {
    let inv = web_staging_inventory();
    assert_eq!(
        inv.resolve_pattern("web:!missing").unwrap(),
        vec!["w1", "w2"]
    );
    assert!(inv.resolve_pattern("missing").unwrap().is_empty());
}

#[test]
fn all_matches_every_host() {
    let inv = web_staging_inventory();
    assert_eq!(inv.resolve_pattern("all").unwrap(), vec!["w1", "w2"]);
}

proptest! {
    /// Resolving any pattern twice against an unchanged inventory yields
    /// identical ordered host lists.
    #[test]
    fn resolution_is_deterministic(
        host_count in 1usize..12,
        memberships in proptest::collection::vec(any::<u8>(), 1..12),
        pattern_groups in proptest::collection::vec(0u8..3, 1..4),
    ) {
        let mut inv = Inventory::new();
        let hosts: Vec<String> = (0..host_count).map(|i| format!("h{}", i)).collect();
        for host in &hosts {
            inv.add_host(Host::new(host)).unwrap();
        }
        // Three groups with membership derived from the bit pattern.
        for (g, bit) in [("g0", 0u8), ("g1", 1), ("g2", 2)] {
            let members: Vec<String> = hosts
                .iter()
                .enumerate()
                .filter(|(i, _)| memberships.get(*i).map(|m| m & (1 << bit) != 0).unwrap_or(false))
                .map(|(_, h)| h.clone())
                .collect();
            inv.add_group(GroupBuilder::new(g).hosts(members).build()).unwrap();
        }

        let pattern = pattern_groups
            .iter()
            .map(|g| format!("g{}", g))
            .collect::<Vec<_>>()
            .join(":");

        let first = inv.resolve_pattern(&pattern).unwrap();
        let second = inv.resolve_pattern(&pattern).unwrap();
        prop_assert_eq!(first, second);
    }

    /// Exclusion never yields hosts from the excluded set; intersection
    /// only yields hosts present in both groups.
    #[test]
    fn operators_respect_set_semantics(members_a in 0u16..256, members_b in 0u16..256) {
        let mut inv = Inventory::new();
        let hosts: Vec<String> = (0..8).map(|i| format!("h{}", i)).collect();
        for host in &hosts {
            inv.add_host(Host::new(host)).unwrap();
        }
        let pick = |mask: u16| -> Vec<String> {
            hosts
                .iter()
                .enumerate()
                .filter(|(i, _)| mask & (1 << i) != 0)
                .map(|(_, h)| h.clone())
                .collect()
        };
        let a = pick(members_a);
        let b = pick(members_b);
        inv.add_group(GroupBuilder::new("a").hosts(a.clone()).build()).unwrap();
        inv.add_group(GroupBuilder::new("b").hosts(b.clone()).build()).unwrap();

        let excluded = inv.resolve_pattern("a:!b").unwrap();
        prop_assert!(excluded.iter().all(|h| a.contains(h) && !b.contains(h)));

        let intersected = inv.resolve_pattern("a:&b").unwrap();
        prop_assert!(intersected.iter().all(|h| a.contains(h) && b.contains(h)));
    }
}
