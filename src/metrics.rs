//! Process-wide metric registry (spec §9: "bridge metrics are
//! process-wide counters keyed by bridge address... metric slots must
//! be released to prevent unbounded label cardinality").
//!
//! Grounded on `monitoring/mod.rs`'s collector/registry split and on
//! the teacher's general preference for `DashMap` as the concurrent
//! map of choice. No external exporter is wired up here — metrics
//! export is explicitly out of scope (spec §1) — this registry is the
//! seam a host would plug a real exporter into.

use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;

#[derive(Default)]
struct BridgeMetricSlot {
    endpoints: AtomicI64,
    failing_ice: AtomicI64,
    restart_requests: AtomicU64,
}

/// Per-bridge gauges/counters, released on `unregister` so removed
/// bridges don't leak label cardinality.
#[derive(Clone, Default)]
pub struct MetricsRegistry {
    bridges: Arc<DashMap<String, BridgeMetricSlot>>,
    /// Named counters not scoped to a single bridge, e.g. per-strategy
    /// selection outcome histograms (spec §4.D "records histogram
    /// counters for telemetry").
    counters: Arc<DashMap<String, AtomicU64>>,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, address: &str) {
        self.bridges
            .entry(address.to_string())
            .or_insert_with(BridgeMetricSlot::default);
    }

    pub fn unregister(&self, address: &str) {
        self.bridges.remove(address);
    }

    pub fn set_endpoints(&self, address: &str, value: i64) {
        if let Some(slot) = self.bridges.get(address) {
            slot.endpoints.store(value, Ordering::Relaxed);
        }
    }

    pub fn set_failing_ice(&self, address: &str, failing: bool) {
        if let Some(slot) = self.bridges.get(address) {
            slot.failing_ice.store(failing as i64, Ordering::Relaxed);
        }
    }

    pub fn incr_restart_requests(&self, address: &str) {
        if let Some(slot) = self.bridges.get(address) {
            slot.restart_requests.fetch_add(1, Ordering::Relaxed);
        }
    }

    pub fn endpoints(&self, address: &str) -> Option<i64> {
        self.bridges
            .get(address)
            .map(|s| s.endpoints.load(Ordering::Relaxed))
    }

    pub fn bridge_count(&self) -> usize {
        self.bridges.len()
    }

    /// Increment a named, bridge-independent counter (e.g.
    /// `"selection.single.chosen"`).
    pub fn incr_counter(&self, name: &str) {
        self.counters
            .entry(name.to_string())
            .or_insert_with(|| AtomicU64::new(0))
            .fetch_add(1, Ordering::Relaxed);
    }

    pub fn counter(&self, name: &str) -> u64 {
        self.counters
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }
}
