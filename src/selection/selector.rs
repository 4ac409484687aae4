//! `BridgeSelector` (spec §4.C): the entry point a conference manager
//! calls to pick a bridge for a joining participant.

use std::sync::Arc;
use std::time::Instant;

use tracing::debug;

use crate::bridge::Bridge;
use crate::config::{OctoConfig, SelectionConfig, SelectionStrategyKind};
use crate::error::{CoreError, Result};
use crate::metrics::MetricsRegistry;
use crate::selection::class_split::ClassSplitStrategy;
use crate::selection::region::RegionBasedStrategy;
use crate::selection::single::SingleBridgeStrategy;
use crate::selection::split::SplitStrategy;
use crate::selection::strategy::{ConferenceBridges, ParticipantProperties, SelectionContext, SelectionStrategy};

fn build_strategy(kind: SelectionStrategyKind, config: &SelectionConfig) -> Box<dyn SelectionStrategy> {
    match kind {
        SelectionStrategyKind::Single => Box::new(SingleBridgeStrategy),
        SelectionStrategyKind::Split => Box::new(SplitStrategy),
        SelectionStrategyKind::Region => Box::new(RegionBasedStrategy),
        SelectionStrategyKind::ClassSplit => Box::new(ClassSplitStrategy::new(
            build_strategy(config.participant_selection_strategy, config),
            build_strategy(config.visitor_selection_strategy, config),
        )),
    }
}

/// Picks a bridge for a joining participant from a pre-sorted fleet
/// snapshot and the caller's description of the conference's current
/// bridges (spec §4.C).
///
/// The selector owns the configured [`SelectionStrategy`] and the
/// version-matching / not-draining / not-shutting-down filter pipeline
/// that runs ahead of it; it does not own the fleet or the conference
/// state, both supplied per call by the caller.
pub struct BridgeSelector {
    strategy: Box<dyn SelectionStrategy>,
    octo: OctoConfig,
    region_groups: std::collections::HashMap<String, Vec<String>>,
    max_bridge_participants: Option<u32>,
}

impl BridgeSelector {
    pub fn new(selection: &SelectionConfig, octo: &OctoConfig, max_bridge_participants: Option<u32>) -> Self {
        Self {
            strategy: build_strategy(selection.selection_strategy, selection),
            octo: octo.clone(),
            region_groups: selection.region_groups.clone(),
            max_bridge_participants,
        }
    }

    /// Select a bridge for `participant` joining a conference whose
    /// current bridges are `conference_bridges`, with `fleet` already
    /// filtered to the candidates worth considering (e.g. cascade
    /// capacity, caller-specific exclusions).
    ///
    /// `required_version` is the caller's own version constraint, if
    /// any. Per spec §4.C step 1: if `conference_bridges` is non-empty,
    /// the conference's already-pinned version (derived from its
    /// existing bridges) wins; a caller-supplied version that disagrees
    /// with it fails selection outright. Only when the conference has
    /// no bridges yet does the caller-supplied version become the
    /// constraint.
    ///
    /// Implements the spec §4.C filter pipeline ahead of the configured
    /// strategy: operational required; not shutting down required;
    /// version match required unless mixed versions are allowed; then
    /// prefer not-draining and prefer not-in-graceful-shutdown among the
    /// survivors (these last two are preferences, not hard filters — a
    /// conference already on a draining bridge is never stranded).
    ///
    /// If the conference already has exactly one bridge and multi-bridge
    /// is disabled, that bridge is returned directly without consulting
    /// the strategy (spec §4.C, "octo disabled" special case).
    pub fn select(
        &self,
        fleet: &[Arc<Bridge>],
        conference_bridges: &ConferenceBridges,
        participant: &ParticipantProperties,
        required_version: Option<&str>,
        metrics: &MetricsRegistry,
        now: Instant,
    ) -> Result<Arc<Bridge>> {
        let required_version = self.resolve_required_version(fleet, conference_bridges, required_version)?;

        if !self.octo.enabled && !conference_bridges.is_empty() {
            let address = conference_bridges
                .keys()
                .next()
                .expect("non-empty map has a key");
            return fleet
                .iter()
                .find(|b| b.address() == address)
                .cloned()
                .ok_or_else(|| CoreError::selection_unavailable(format!("existing bridge {address} not in fleet")));
        }

        let mut eligible: Vec<Arc<Bridge>> = fleet
            .iter()
            .filter(|b| b.operational(now))
            .filter(|b| !b.is_shutting_down())
            .filter(|b| match (&required_version, self.octo.allow_mixed_versions) {
                (_, true) => true,
                (None, false) => true,
                (Some(v), false) => b.version().as_deref() == Some(v.as_str()),
            })
            .cloned()
            .collect();

        if eligible.is_empty() {
            debug!("no operational, version-matched bridge candidates remain");
            return Err(CoreError::selection_unavailable("no eligible bridge candidates"));
        }

        // Preferences, applied in order, each only narrowing the set
        // when doing so would not empty it.
        prefer(&mut eligible, |b| !b.is_draining());
        prefer(&mut eligible, |b| !b.in_graceful_shutdown());

        let ctx = SelectionContext {
            sorted_fleet: &eligible,
            conference_bridges,
            region_groups: &self.region_groups,
            max_bridge_participants: self.max_bridge_participants,
            now,
        };

        self.strategy
            .select(&ctx, participant, metrics)
            .ok_or_else(|| CoreError::selection_unavailable("strategy returned no candidate"))
    }

    /// Reconcile the conference's already-pinned version (if any)
    /// against the caller-supplied `required_version` (spec §4.C step
    /// 1). A non-empty conference's pinned version always wins; if the
    /// caller also supplied one and it disagrees, selection fails
    /// rather than silently overriding either side.
    fn resolve_required_version(
        &self,
        fleet: &[Arc<Bridge>],
        conference_bridges: &ConferenceBridges,
        required_version: Option<&str>,
    ) -> Result<Option<String>> {
        if conference_bridges.is_empty() {
            return Ok(required_version.map(|v| v.to_string()));
        }

        let pinned = self.conference_pinned_version(fleet, conference_bridges);
        if let (Some(pinned), Some(caller)) = (&pinned, required_version) {
            if pinned != caller {
                return Err(CoreError::selection_unavailable(format!(
                    "required version {caller} does not match conference-pinned version {pinned}"
                )));
            }
        }
        Ok(pinned)
    }

    /// The version every bridge in the conference must already share,
    /// if any — `None` if the conference has no bridges yet, or if its
    /// existing bridges already disagree (a pre-existing mismatch is
    /// left alone rather than treated as a fresh constraint).
    fn conference_pinned_version(&self, fleet: &[Arc<Bridge>], conference_bridges: &ConferenceBridges) -> Option<String> {
        let mut versions = conference_bridges
            .keys()
            .filter_map(|addr| fleet.iter().find(|b| b.address() == addr))
            .filter_map(|b| b.version());
        let first = versions.next()?;
        if versions.all(|v| v == first) {
            Some(first)
        } else {
            None
        }
    }
}

/// Narrow `bridges` to those matching `pred`, unless doing so would
/// empty the list.
fn prefer(bridges: &mut Vec<Arc<Bridge>>, pred: impl Fn(&Arc<Bridge>) -> bool) {
    let narrowed: Vec<Arc<Bridge>> = bridges.iter().filter(|b| pred(b)).cloned().collect();
    if !narrowed.is_empty() {
        *bridges = narrowed;
    }
}
