//! `Bridge`: per-bridge state object (spec §3, §4.A).

use std::cmp::Ordering;
use std::time::{Duration, Instant};

use parking_lot::RwLock;
use serde::Deserialize;
use tracing::{error, warn};

use crate::bridge::rate::RateTracker;
use crate::config::{BridgeConfig, IceFailureConfig};

/// A telemetry push from a bridge (spec §6.2). Every field is optional:
/// `setTelemetry` only overwrites state for keys that are present.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TelemetrySnapshot {
    pub stress_level: Option<f64>,
    pub average_participant_stress: Option<f64>,
    pub shutdown_in_progress: Option<bool>,
    pub shutting_down: Option<bool>,
    pub drain: Option<bool>,
    pub version: Option<String>,
    pub release: Option<String>,
    pub region: Option<String>,
    pub relay_id: Option<String>,
    pub healthy: Option<bool>,
}

/// Runtime constants a `Bridge` needs to compute its derived metrics.
/// Captured once at construction from [`BridgeConfig`]/[`IceFailureConfig`]
/// rather than re-read from a shared config on every call.
#[derive(Debug, Clone, Copy)]
struct BridgeTunables {
    stress_threshold: f64,
    failure_reset_threshold: Duration,
    ice_failure_timeout: Duration,
    ice_min_endpoints: u32,
    ice_failure_ratio: f64,
}

struct BridgeState {
    region: Option<String>,
    relay_id: Option<String>,
    version: Option<String>,
    release_id: Option<String>,
    stress_level: f64,
    average_participant_stress: f64,
    operational: bool,
    in_graceful_shutdown: bool,
    shutting_down: bool,
    draining: bool,
    healthy: bool,
    removed: bool,
    endpoints: u32,
    new_endpoint_rate: RateTracker,
    restart_rate: RateTracker,
    last_ice_failure_instant: Option<Instant>,
    last_failure_instant: Option<Instant>,
    last_presence_received: Option<Instant>,
}

/// Per-bridge state: load telemetry, lifecycle flags, rate counters,
/// derived fitness (spec §3/§4.A).
///
/// Identity is the opaque `address`; the core never inspects its format.
pub struct Bridge {
    address: String,
    tunables: BridgeTunables,
    state: RwLock<BridgeState>,
}

impl Bridge {
    pub fn new(
        address: impl Into<String>,
        bridge_config: &BridgeConfig,
        ice_config: &IceFailureConfig,
    ) -> Self {
        Self {
            address: address.into(),
            tunables: BridgeTunables {
                stress_threshold: bridge_config.stress_threshold,
                failure_reset_threshold: bridge_config.failure_reset_threshold,
                ice_failure_timeout: ice_config.timeout,
                ice_min_endpoints: ice_config.min_endpoints,
                ice_failure_ratio: ice_config.threshold,
            },
            state: RwLock::new(BridgeState {
                region: None,
                relay_id: None,
                version: None,
                release_id: None,
                stress_level: 0.0,
                average_participant_stress: bridge_config.average_participant_stress,
                operational: true,
                in_graceful_shutdown: false,
                shutting_down: false,
                draining: false,
                healthy: true,
                removed: false,
                endpoints: 0,
                new_endpoint_rate: RateTracker::new(bridge_config.participant_rampup_interval),
                restart_rate: RateTracker::new(ice_config.interval),
                last_ice_failure_instant: None,
                last_failure_instant: None,
                last_presence_received: None,
            }),
        }
    }

    pub fn address(&self) -> &str {
        &self.address
    }

    pub fn region(&self) -> Option<String> {
        self.state.read().region.clone()
    }

    pub fn relay_id(&self) -> Option<String> {
        self.state.read().relay_id.clone()
    }

    /// Absence means "cannot participate in multi-bridge conferences".
    pub fn can_cascade(&self) -> bool {
        self.relay_id().is_some()
    }

    pub fn version(&self) -> Option<String> {
        self.state.read().version.clone()
    }

    pub fn release_id(&self) -> Option<String> {
        self.state.read().release_id.clone()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.state.read().shutting_down
    }

    pub fn in_graceful_shutdown(&self) -> bool {
        self.state.read().in_graceful_shutdown
    }

    pub fn is_draining(&self) -> bool {
        self.state.read().draining
    }

    pub fn is_healthy_flag(&self) -> bool {
        self.state.read().healthy
    }

    pub fn is_removed(&self) -> bool {
        self.state.read().removed
    }

    pub fn endpoint_count(&self) -> u32 {
        self.state.read().endpoints
    }

    pub fn last_presence_received(&self) -> Option<Instant> {
        self.state.read().last_presence_received
    }

    /// The sticky-failure operational reader (spec §3, §8): if the last
    /// recorded failure is within `failureResetThreshold`, this returns
    /// `false` regardless of the stored flag, even if something has
    /// since re-asserted it `true`.
    pub fn operational(&self, now: Instant) -> bool {
        let state = self.state.read();
        if let Some(last_failure) = state.last_failure_instant {
            if now.saturating_duration_since(last_failure) < self.tunables.failure_reset_threshold
            {
                return false;
            }
        }
        state.operational
    }

    /// Set the raw operational flag. Setting it to `false` records a
    /// failure instant that the sticky gate in [`Bridge::operational`]
    /// will honor for `failureResetThreshold` regardless of later
    /// `set_operational(true, ..)` calls.
    pub fn set_operational(&self, value: bool, now: Instant) {
        let mut state = self.state.write();
        state.operational = value;
        if !value {
            state.last_failure_instant = Some(now);
        }
    }

    /// Set the graceful-shutdown flag directly, outside of a telemetry
    /// merge (spec §7: a `GracefulShutdown` response classifies the
    /// bridge as shutting down even absent a fresh telemetry push).
    pub fn set_graceful_shutdown(&self, value: bool) {
        self.state.write().in_graceful_shutdown = value;
    }

    /// Merge a telemetry snapshot: present keys overwrite, absent keys
    /// leave state unchanged (spec §4.A).
    pub fn set_telemetry(
        &self,
        snapshot: &TelemetrySnapshot,
        now: Instant,
        use_presence_for_health: bool,
    ) {
        let mut state = self.state.write();
        if let Some(v) = snapshot.stress_level {
            state.stress_level = v;
        }
        if let Some(v) = snapshot.average_participant_stress {
            state.average_participant_stress = v;
        }
        if let Some(v) = snapshot.shutdown_in_progress {
            state.in_graceful_shutdown = v;
        }
        if let Some(v) = snapshot.shutting_down {
            state.shutting_down = v;
        }
        if let Some(v) = snapshot.drain {
            state.draining = v;
        }
        if let Some(v) = &snapshot.version {
            state.version = Some(v.clone());
        }
        if let Some(v) = &snapshot.release {
            state.release_id = Some(v.clone());
        }
        if let Some(v) = &snapshot.region {
            state.region = Some(v.clone());
        }
        if let Some(v) = &snapshot.relay_id {
            state.relay_id = Some(v.clone());
        }
        if let Some(v) = snapshot.healthy {
            state.healthy = v;
        } else if use_presence_for_health {
            warn!(
                address = %self.address,
                "telemetry snapshot missing health field while presence-based health is enabled; \
                 leaving healthy flag unchanged"
            );
        }
        state.last_presence_received = Some(now);
    }

    /// A local endpoint was added to this bridge.
    pub fn endpoint_added(&self, now: Instant) {
        let mut state = self.state.write();
        state.endpoints += 1;
        state.new_endpoint_rate.record(now);
    }

    /// `n` local endpoints were removed. Clamps at zero and logs on
    /// underflow rather than panicking or wrapping.
    pub fn endpoint_removed(&self, n: u32) {
        let mut state = self.state.write();
        match state.endpoints.checked_sub(n) {
            Some(v) => state.endpoints = v,
            None => {
                error!(
                    address = %self.address,
                    current = state.endpoints,
                    removed = n,
                    "endpoint_removed underflow; clamping to zero"
                );
                state.endpoints = 0;
            }
        }
    }

    /// Record an endpoint-requested-ICE-restart event (spec §4.A,
    /// §4.H). May flip `lastIceFailureInstant` if the restart ratio
    /// threshold is exceeded.
    pub fn endpoint_requested_restart(&self, now: Instant) {
        let mut state = self.state.write();
        state.restart_rate.record(now);
        let endpoints = state.endpoints;
        let accumulated = state.restart_rate.accumulated(now);
        if endpoints >= self.tunables.ice_min_endpoints
            && (accumulated as f64) > (endpoints as f64) * self.tunables.ice_failure_ratio
        {
            state.last_ice_failure_instant = Some(now);
        }
    }

    /// Restart requests still inside the ICE-failure detection window,
    /// for the metrics refresh timer (spec §4.I).
    pub fn restart_request_count(&self, now: Instant) -> u32 {
        self.state.write().restart_rate.accumulated(now)
    }

    /// Whether this bridge's ICE is currently considered failing
    /// (spec §3).
    pub fn failing_ice(&self, now: Instant) -> bool {
        let state = self.state.read();
        match state.last_ice_failure_instant {
            Some(t) => now.saturating_duration_since(t) < self.tunables.ice_failure_timeout,
            None => false,
        }
    }

    /// `correctedStress` (spec §3): reported stress, adjusted for
    /// in-flight new arrivals and for a failing-ICE penalty.
    pub fn corrected_stress(&self, now: Instant) -> f64 {
        let base = {
            let mut state = self.state.write();
            let new_rate = state.new_endpoint_rate.accumulated(now) as f64;
            state.stress_level + new_rate.max(0.0) * state.average_participant_stress
        };
        if self.failing_ice(now) {
            base.max(self.tunables.stress_threshold + 0.01)
        } else {
            base
        }
    }

    pub fn is_overloaded(&self, now: Instant) -> bool {
        self.corrected_stress(now) >= self.tunables.stress_threshold
    }

    /// Priority tier for the ordering in spec §3: operational-and-not-
    /// graceful = 1, operational-and-graceful = 2, non-operational = 3.
    pub fn priority_tier(&self, now: Instant) -> u8 {
        if !self.operational(now) {
            3
        } else if self.in_graceful_shutdown() {
            2
        } else {
            1
        }
    }

    /// Total ordering key for "fitness to accept new load" (spec §3):
    /// tier ascending, then `correctedStress` ascending. Not consistent
    /// with equality — two distinct bridges may compare equal.
    pub fn order_key(&self, now: Instant) -> BridgeOrderKey {
        BridgeOrderKey {
            tier: self.priority_tier(now),
            corrected_stress: self.corrected_stress(now),
        }
    }

    /// `compareTo` (spec §4.A), expressed in Rust as a method returning
    /// [`Ordering`] rather than implementing `std::cmp::Ord` directly,
    /// since the order depends on a point in time rather than being a
    /// pure function of two values.
    pub fn compare_to(&self, other: &Bridge, now: Instant) -> Ordering {
        self.order_key(now).cmp(&other.order_key(now))
    }

    /// Idempotent: marks the bridge removed, disabling future metric
    /// emission for this instance (spec §4.A, §9).
    pub fn mark_removed(&self) {
        self.state.write().removed = true;
    }
}

impl std::fmt::Debug for Bridge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("Bridge")
            .field("address", &self.address)
            .field("region", &state.region)
            .field("relay_id", &state.relay_id)
            .field("version", &state.version)
            .field("stress_level", &state.stress_level)
            .field("operational_raw", &state.operational)
            .field("in_graceful_shutdown", &state.in_graceful_shutdown)
            .field("shutting_down", &state.shutting_down)
            .field("draining", &state.draining)
            .field("removed", &state.removed)
            .field("endpoints", &state.endpoints)
            .finish()
    }
}

/// Ordering key produced by [`Bridge::order_key`]. Deterministic even
/// for `NaN` stress values via `f64::total_cmp`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BridgeOrderKey {
    tier: u8,
    corrected_stress: f64,
}

impl Eq for BridgeOrderKey {}

impl PartialOrd for BridgeOrderKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for BridgeOrderKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.tier
            .cmp(&other.tier)
            .then_with(|| self.corrected_stress.total_cmp(&other.corrected_stress))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BridgeConfig, IceFailureConfig};

    fn bridge(addr: &str) -> Bridge {
        Bridge::new(addr, &BridgeConfig::default(), &IceFailureConfig::default())
    }

    #[test]
    fn telemetry_merge_only_writes_present_keys() {
        let b = bridge("b1");
        let now = Instant::now();
        b.set_telemetry(
            &TelemetrySnapshot {
                region: Some("us-east".into()),
                stress_level: Some(0.4),
                ..Default::default()
            },
            now,
            false,
        );
        assert_eq!(b.region().as_deref(), Some("us-east"));
        assert_eq!(b.corrected_stress(now), 0.4);

        // Partial update: region unset in snapshot must not clear it.
        b.set_telemetry(
            &TelemetrySnapshot {
                stress_level: Some(0.9),
                ..Default::default()
            },
            now,
            false,
        );
        assert_eq!(b.region().as_deref(), Some("us-east"));
        assert_eq!(b.corrected_stress(now), 0.9);
    }

    #[test]
    fn endpoint_removed_clamps_at_zero() {
        let b = bridge("b1");
        let now = Instant::now();
        b.endpoint_added(now);
        b.endpoint_removed(5);
        assert_eq!(b.endpoint_count(), 0);
        b.endpoint_added(now);
        assert_eq!(b.endpoint_count(), 1);
    }

    #[test]
    fn sticky_operational_blocks_reassertion() {
        let b = bridge("b1");
        let t0 = Instant::now();
        b.set_operational(false, t0);
        b.set_operational(true, t0); // re-asserted true immediately after
        assert!(!b.operational(t0), "sticky gate must still read false");

        let past_threshold = t0 + Duration::from_secs(61);
        assert!(
            b.operational(past_threshold),
            "after failureResetThreshold the stored value should show through"
        );
    }

    #[test]
    fn failing_ice_pushes_corrected_stress_above_threshold() {
        let cfg = IceFailureConfig {
            min_endpoints: 1,
            threshold: 0.1,
            ..IceFailureConfig::default()
        };
        let b = Bridge::new("b1", &BridgeConfig::default(), &cfg);
        let now = Instant::now();
        b.endpoint_added(now);
        b.endpoint_requested_restart(now);
        assert!(b.failing_ice(now));
        assert!(b.is_overloaded(now));
    }

    #[test]
    fn restart_request_count_tracks_window() {
        let b = bridge("b1");
        let now = Instant::now();
        b.endpoint_requested_restart(now);
        b.endpoint_requested_restart(now);
        assert_eq!(b.restart_request_count(now), 2);
    }

    #[test]
    fn ordering_tiers_then_stress() {
        let healthy_low = bridge("low");
        let healthy_high = bridge("high");
        let graceful = bridge("graceful");
        let down = bridge("down");
        let now = Instant::now();
        healthy_high.set_telemetry(
            &TelemetrySnapshot {
                stress_level: Some(0.9),
                ..Default::default()
            },
            now,
            false,
        );
        graceful.set_telemetry(
            &TelemetrySnapshot {
                shutdown_in_progress: Some(true),
                ..Default::default()
            },
            now,
            false,
        );
        down.set_operational(false, now);

        let mut bridges = vec![&down, &graceful, &healthy_high, &healthy_low];
        bridges.sort_by(|a, b| a.compare_to(b, now));
        let order: Vec<&str> = bridges.iter().map(|b| b.address()).collect();
        assert_eq!(order, vec!["low", "high", "graceful", "down"]);
    }
}
