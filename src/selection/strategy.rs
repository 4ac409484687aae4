//! `SelectionStrategy` family and the primitive predicates shared by
//! every variant (spec §4.D).
//!
//! Per spec §9's design note, the strategy family is expressed as a
//! closed set of variants dispatched through a small trait rather than
//! a class hierarchy — mirroring the teacher's `routing/engine.rs`
//! style of a handful of named strategies chosen by configuration.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use crate::bridge::Bridge;
use crate::metrics::MetricsRegistry;
use crate::selection::{equivalent_regions, is_overloaded_for_conference};

/// A participant's properties relevant to bridge selection (spec §3).
#[derive(Debug, Clone, Default)]
pub struct ParticipantProperties {
    pub region: Option<String>,
    pub visitor: bool,
}

/// Per-conference-per-bridge record (spec §3). Identity is the bridge
/// address.
#[derive(Debug, Clone, Copy, Default)]
pub struct ConferenceBridgeProperties {
    pub participant_count: u32,
    pub visitor: bool,
}

/// Bridges currently in the conference, keyed by address.
pub type ConferenceBridges = HashMap<String, ConferenceBridgeProperties>;

/// Shared context every primitive predicate and strategy needs.
pub struct SelectionContext<'a> {
    pub sorted_fleet: &'a [Arc<Bridge>],
    pub conference_bridges: &'a ConferenceBridges,
    pub region_groups: &'a HashMap<String, Vec<String>>,
    pub max_bridge_participants: Option<u32>,
    pub now: Instant,
}

impl<'a> SelectionContext<'a> {
    fn acceptable_regions(&self, participant: &ParticipantProperties) -> Option<Vec<String>> {
        participant
            .region
            .as_deref()
            .map(|r| equivalent_regions(r, self.region_groups))
    }

    fn in_region(&self, bridge: &Arc<Bridge>, regions: &[String]) -> bool {
        match bridge.region() {
            Some(r) => regions.iter().any(|candidate| candidate == &r),
            None => false,
        }
    }

    fn in_conference(&self, bridge: &Arc<Bridge>) -> bool {
        self.conference_bridges.contains_key(bridge.address())
    }

    fn overloaded(&self, bridge: &Arc<Bridge>) -> bool {
        is_overloaded_for_conference(bridge, self.conference_bridges, self.max_bridge_participants, self.now)
    }

    /// First bridge, not overloaded, whose region is in `participant`'s
    /// equivalence set.
    pub fn not_loaded_in_region_group(&self, participant: &ParticipantProperties) -> Option<Arc<Bridge>> {
        let regions = self.acceptable_regions(participant)?;
        self.sorted_fleet
            .iter()
            .find(|b| !self.overloaded(b) && self.in_region(b, &regions))
            .cloned()
    }

    /// As above, further restricted to bridges already in the
    /// conference.
    pub fn not_loaded_already_in_conference_in_region_group(
        &self,
        participant: &ParticipantProperties,
    ) -> Option<Arc<Bridge>> {
        let regions = self.acceptable_regions(participant)?;
        self.sorted_fleet
            .iter()
            .find(|b| !self.overloaded(b) && self.in_region(b, &regions) && self.in_conference(b))
            .cloned()
    }

    /// Ignore overload; bridges already in the conference, in region.
    pub fn least_loaded_already_in_conference_in_region_group(
        &self,
        participant: &ParticipantProperties,
    ) -> Option<Arc<Bridge>> {
        let regions = self.acceptable_regions(participant)?;
        self.sorted_fleet
            .iter()
            .find(|b| self.in_region(b, &regions) && self.in_conference(b))
            .cloned()
    }

    /// Ignore overload; restricted to region only.
    pub fn least_loaded_in_region_group(&self, participant: &ParticipantProperties) -> Option<Arc<Bridge>> {
        let regions = self.acceptable_regions(participant)?;
        self.sorted_fleet
            .iter()
            .find(|b| self.in_region(b, &regions))
            .cloned()
    }

    /// Not overloaded, already in the conference, no region
    /// restriction.
    pub fn not_loaded_already_in_conference(&self) -> Option<Arc<Bridge>> {
        self.sorted_fleet
            .iter()
            .find(|b| !self.overloaded(b) && self.in_conference(b))
            .cloned()
    }

    /// Not overloaded, no restriction.
    pub fn not_loaded(&self) -> Option<Arc<Bridge>> {
        self.sorted_fleet.iter().find(|b| !self.overloaded(b)).cloned()
    }

    /// The globally least-loaded bridge, ignoring overload and region.
    pub fn least_loaded(&self) -> Option<Arc<Bridge>> {
        self.sorted_fleet.first().cloned()
    }
}

/// A strategy is a pure decision function over the current fleet,
/// conference state and participant properties; it also records
/// histogram-style counters for telemetry (spec §4.D).
pub trait SelectionStrategy: Send + Sync {
    /// Human-readable name used as the metrics counter prefix.
    fn name(&self) -> &'static str;

    /// Choose a bridge, or `None` if none is suitable.
    fn select(
        &self,
        ctx: &SelectionContext<'_>,
        participant: &ParticipantProperties,
        metrics: &MetricsRegistry,
    ) -> Option<Arc<Bridge>>;

    /// Record the outcome of a selection as a histogram-style counter
    /// (spec §4.D). Strategies call this from `select` rather than
    /// re-implementing the bookkeeping themselves.
    fn record_outcome(&self, metrics: &MetricsRegistry, outcome: &str) {
        metrics.incr_counter(&format!("selection.{}.{}", self.name(), outcome));
    }
}
