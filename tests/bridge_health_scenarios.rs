//! End-to-end coverage of sticky bridge-failure behavior (spec §8,
//! scenario 6) and the `endpointRemoved` clamp boundary, driven through
//! [`BridgeRegistry`] and [`ConferenceSessionManager::allocate`] rather
//! than the unit-level `Bridge::operational` gate alone.

mod common;

use std::sync::Arc;
use std::time::Duration;

use bridge_cascade::cascade::topology::SingleMeshTopologyStrategy;
use bridge_cascade::clock::TestClock;
use bridge_cascade::prelude::*;
use common::{manager, telemetry, FakeTransport};
use serial_test::serial;

fn harness() -> (ConferenceSessionManager, Arc<BridgeRegistry>, Arc<TestClock>) {
    let clock = Arc::new(TestClock::new());
    let config = CoreConfig::default();
    let registry = Arc::new(BridgeRegistry::new(config.bridge.clone(), config.ice_failure_detection.clone(), clock.clone()));
    let mgr = manager(
        config,
        Box::new(SingleMeshTopologyStrategy),
        Arc::new(FakeTransport::new()),
        registry.clone(),
        clock.clone(),
    );
    (mgr, registry, clock)
}

#[tokio::test]
#[serial]
async fn sticky_failure_blocks_selection_until_reset_threshold_elapses() {
    let (mgr, registry, clock) = harness();
    registry.upsert("b1", Some(&telemetry("r", "r1", "1")), false);

    mgr.allocate("p1", &ParticipantProperties { region: Some("r".into()), visitor: false })
        .await
        .expect("b1 is healthy at t0");
    mgr.remove_participant("p1").await.unwrap();

    registry.health_failed("b1");
    assert!(!registry.get("b1").unwrap().operational(clock.now()));

    // Re-asserting the raw flag true must not defeat the sticky gate
    // inside the reset window.
    registry.get("b1").unwrap().set_operational(true, clock.now());
    let err = mgr
        .allocate("p2", &ParticipantProperties { region: Some("r".into()), visitor: false })
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::SelectionUnavailable(_)), "b1 must stay unselectable inside the reset window");

    clock.advance(Duration::from_secs(59));
    let err = mgr
        .allocate("p3", &ParticipantProperties { region: Some("r".into()), visitor: false })
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::SelectionUnavailable(_)), "still inside [t0, t0+failureResetThreshold)");

    clock.advance(Duration::from_secs(2));
    mgr.allocate("p4", &ParticipantProperties { region: Some("r".into()), visitor: false })
        .await
        .expect("b1 must be eligible again once failureResetThreshold has elapsed");
}

#[tokio::test]
#[serial]
async fn endpoint_removed_clamps_at_zero_and_recovers() {
    let (_mgr, registry, clock) = harness();
    let bridge = registry.upsert("b1", Some(&telemetry("r", "r1", "1")), false);
    assert_eq!(bridge.endpoint_count(), 0);

    bridge.endpoint_removed(5);
    assert_eq!(bridge.endpoint_count(), 0, "underflow must clamp to zero, not wrap");

    bridge.endpoint_added(clock.now());
    assert_eq!(bridge.endpoint_count(), 1, "a later endpointAdded must work normally after the clamp");
}
