//! `BridgeRegistry` (spec §4.B): discovers/adds/removes bridges, routes
//! health-check outcomes, emits lifecycle events.
//!
//! Grounded on `agent/registry.rs`'s `AgentRegistry`, generalized to the
//! concurrent `DashMap`-backed shape `orchestrator/core.rs` uses for
//! `available_agents` — bridges are read far more often (every
//! selection) than written (telemetry pushes, health callbacks), so a
//! lock-free-read map is the right structure, matching spec §5's
//! "BridgeRegistry map is mutated under its own lock and may be read
//! lock-free for snapshot purposes".

use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::Instant;

use dashmap::DashMap;
use tracing::{info, warn};

use crate::bridge::model::{Bridge, TelemetrySnapshot};
use crate::clock::Clock;
use crate::config::{BridgeConfig, IceFailureConfig};
use crate::events::{EventBus, RegistryEvent};

/// Tracks every known bridge. At most one `Bridge` per address; a
/// removed bridge is never resurrected — a reconnect creates a fresh
/// instance (spec §3 invariants).
pub struct BridgeRegistry {
    bridges: DashMap<String, Arc<Bridge>>,
    events: EventBus<RegistryEvent>,
    bridge_config: BridgeConfig,
    ice_config: IceFailureConfig,
    clock: Arc<dyn Clock>,
    lost_bridges: AtomicU64,
}

impl BridgeRegistry {
    pub fn new(bridge_config: BridgeConfig, ice_config: IceFailureConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            bridges: DashMap::new(),
            events: EventBus::new(),
            bridge_config,
            ice_config,
            clock,
            lost_bridges: AtomicU64::new(0),
        }
    }

    pub fn events(&self) -> &EventBus<RegistryEvent> {
        &self.events
    }

    /// Number of bridges removed while not in graceful shutdown (spec
    /// §4.B `remove`).
    pub fn lost_bridges(&self) -> u64 {
        self.lost_bridges.load(AtomicOrdering::Relaxed)
    }

    pub fn get(&self, address: &str) -> Option<Arc<Bridge>> {
        self.bridges.get(address).map(|b| b.clone())
    }

    /// A sorted-by-fitness, filtered-copy snapshot of every known
    /// bridge (spec §5 "snapshots are sorted and filtered copies").
    pub fn snapshot(&self) -> Vec<Arc<Bridge>> {
        let now = self.clock.now();
        let mut all: Vec<Arc<Bridge>> = self.bridges.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.compare_to(b, now).then_with(|| a.address().cmp(b.address())));
        all
    }

    /// Create-or-merge a bridge from a telemetry push (spec §4.B
    /// `upsert`).
    pub fn upsert(&self, address: &str, telemetry: Option<&TelemetrySnapshot>, use_presence_for_health: bool) -> Arc<Bridge> {
        let now = self.clock.now();
        if let Some(existing) = self.bridges.get(address) {
            let bridge = existing.clone();
            drop(existing);
            let was_shutting_down = bridge.is_shutting_down();
            if let Some(snapshot) = telemetry {
                bridge.set_telemetry(snapshot, now, use_presence_for_health);
            }
            if !was_shutting_down && bridge.is_shutting_down() {
                self.events.publish(RegistryEvent::BridgeShuttingDown {
                    address: address.to_string(),
                });
            }
            return bridge;
        }

        let bridge = Arc::new(Bridge::new(address, &self.bridge_config, &self.ice_config));
        if let Some(snapshot) = telemetry {
            bridge.set_telemetry(snapshot, now, use_presence_for_health);
        }
        self.bridges.insert(address.to_string(), bridge.clone());
        info!(%address, "bridge added to registry");
        self.events.publish(RegistryEvent::BridgeAdded {
            address: address.to_string(),
        });
        bridge
    }

    /// Remove a bridge permanently. A reconnect of the same address
    /// later creates a brand new `Bridge` instance (spec §3).
    pub fn remove(&self, address: &str) {
        if let Some((_, bridge)) = self.bridges.remove(address) {
            let was_graceful = bridge.in_graceful_shutdown();
            bridge.mark_removed();
            if !was_graceful {
                self.lost_bridges.fetch_add(1, AtomicOrdering::Relaxed);
            }
            info!(%address, "bridge removed from registry");
            self.events.publish(RegistryEvent::BridgeRemoved {
                address: address.to_string(),
            });
        }
    }

    /// A health check against this bridge passed.
    pub fn health_passed(&self, address: &str) {
        if let Some(bridge) = self.get(address) {
            bridge.set_operational(true, self.clock.now());
        }
    }

    /// A health check against this bridge failed explicitly. Unlike a
    /// timeout, this triggers conference-level eviction (spec §4.B):
    /// the distinction matters because timeouts during intermittent
    /// network partitions must not cause mass conference migration.
    pub fn health_failed(&self, address: &str) {
        if let Some(bridge) = self.get(address) {
            bridge.set_operational(false, self.clock.now());
            warn!(%address, "bridge failed health check");
            self.events.publish(RegistryEvent::BridgeFailedHealthCheck {
                address: address.to_string(),
            });
        }
    }

    /// A health check against this bridge timed out. Marks
    /// non-operational but does **not** publish an eviction event.
    pub fn health_timed_out(&self, address: &str) {
        if let Some(bridge) = self.get(address) {
            bridge.set_operational(false, self.clock.now());
            warn!(%address, "bridge health check timed out (no eviction)");
        }
    }

    pub fn now(&self) -> Instant {
        self.clock.now()
    }
}
