//! Failing-ICE detection policy (spec §4.H).
//!
//! This is documented as its own component because it is a *policy*
//! layered on top of [`crate::bridge::model::Bridge`]'s mechanism
//! (`endpointRequestedRestart` / `failingIce`), not a separate
//! mechanism of its own — the same split the teacher draws between
//! `agent/availability.rs` (policy) and `agent/registry.rs`
//! (mechanism).

use crate::bridge::model::Bridge;
use crate::config::IceFailureConfig;
use std::time::Instant;

/// Feeds per-endpoint restart-requested events into a bridge, applying
/// the detector's enable/disable policy.
pub struct BridgeFailureDetector {
    enabled: bool,
}

impl BridgeFailureDetector {
    pub fn new(config: &IceFailureConfig) -> Self {
        Self {
            enabled: config.enabled,
        }
    }

    /// Record that an endpoint on `bridge` requested an ICE restart.
    /// A no-op when the detector is disabled — the bridge's own restart
    /// counters are still a useful operational signal even when the
    /// feedback into `correctedStress` is turned off, so the event is
    /// simply dropped rather than tracked-but-ignored.
    pub fn endpoint_requested_restart(&self, bridge: &Bridge, now: Instant) {
        if !self.enabled {
            return;
        }
        bridge.endpoint_requested_restart(now);
    }
}
