//! End-to-end coverage of bridge selection (spec §8, scenarios 1-3) and
//! the selection-idempotence invariant, driven through
//! [`BridgeRegistry`] + [`BridgeSelector`] the way a host's allocate
//! path would.

mod common;

use std::time::Instant;

use bridge_cascade::prelude::*;
use bridge_cascade::selection::ConferenceBridges;
use common::telemetry;

fn registry_with(bridges: &[(&str, &str, f64, &str)]) -> (BridgeRegistry, Instant) {
    let clock = std::sync::Arc::new(SystemClock);
    let registry = BridgeRegistry::new(
        bridge_cascade::config::BridgeConfig::default(),
        bridge_cascade::config::IceFailureConfig::default(),
        clock.clone(),
    );
    let now = clock.now();
    for (address, region, stress, relay_id) in bridges {
        let mut snapshot = telemetry(region, relay_id, "1");
        snapshot.stress_level = Some(*stress);
        registry.upsert(address, Some(&snapshot), false);
    }
    (registry, now)
}

#[test]
fn single_bridge_steady_state_is_picked_directly() {
    let (registry, now) = registry_with(&[("b1", "r", 0.1, "r1")]);
    let selector = BridgeSelector::new(
        &bridge_cascade::config::SelectionConfig::default(),
        &bridge_cascade::config::OctoConfig::default(),
        None,
    );
    let fleet = registry.snapshot();
    let conference = ConferenceBridges::new();
    let participant = ParticipantProperties {
        region: Some("r".to_string()),
        visitor: false,
    };
    let metrics = MetricsRegistry::new();
    let chosen = selector
        .select(&fleet, &conference, &participant, None, &metrics, now)
        .expect("a single operational bridge must be selectable");
    assert_eq!(chosen.address(), "b1");
}

#[test]
fn region_preference_wins_over_lower_stress_out_of_region() {
    let (registry, now) = registry_with(&[("b1", "x", 0.1, "r1"), ("b2", "r", 0.8, "r2")]);
    let selector = BridgeSelector::new(
        &bridge_cascade::config::SelectionConfig::default(),
        &bridge_cascade::config::OctoConfig::default(),
        None,
    );
    let fleet = registry.snapshot();
    let conference = ConferenceBridges::new();
    let participant = ParticipantProperties {
        region: Some("r".to_string()),
        visitor: false,
    };
    let metrics = MetricsRegistry::new();
    let chosen = selector
        .select(&fleet, &conference, &participant, None, &metrics, now)
        .unwrap();
    assert_eq!(chosen.address(), "b2", "in-region bridge wins even at higher load");
}

#[test]
fn overloaded_in_region_bridge_falls_back_out_of_region() {
    let (registry, now) = registry_with(&[("b1", "x", 0.2, "r1"), ("b2", "r", 1.1, "r2")]);
    let selector = BridgeSelector::new(
        &bridge_cascade::config::SelectionConfig::default(),
        &bridge_cascade::config::OctoConfig::default(),
        None,
    );
    let fleet = registry.snapshot();
    let conference = ConferenceBridges::new();
    let participant = ParticipantProperties {
        region: Some("r".to_string()),
        visitor: false,
    };
    let metrics = MetricsRegistry::new();
    let chosen = selector
        .select(&fleet, &conference, &participant, None, &metrics, now)
        .unwrap();
    assert_eq!(chosen.address(), "b1", "overloaded in-region bridge must be skipped");
}

#[test]
fn selection_is_idempotent_on_an_unchanged_fleet() {
    let (registry, now) = registry_with(&[("b1", "r", 0.4, "r1"), ("b2", "r", 0.4, "r2")]);
    let selector = BridgeSelector::new(
        &bridge_cascade::config::SelectionConfig::default(),
        &bridge_cascade::config::OctoConfig::default(),
        None,
    );
    let metrics = MetricsRegistry::new();
    let conference = ConferenceBridges::new();
    let participant = ParticipantProperties {
        region: Some("r".to_string()),
        visitor: false,
    };

    let fleet = registry.snapshot();
    let first = selector
        .select(&fleet, &conference, &participant, None, &metrics, now)
        .unwrap()
        .address()
        .to_string();
    for _ in 0..5 {
        let fleet = registry.snapshot();
        let again = selector
            .select(&fleet, &conference, &participant, None, &metrics, now)
            .unwrap();
        assert_eq!(again.address(), first, "stress tie must break the same way every time");
    }
}
