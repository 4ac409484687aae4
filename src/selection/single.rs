//! Single-bridge strategy (spec §4.D): never splits a conference
//! across bridges.

use std::sync::Arc;

use crate::bridge::Bridge;
use crate::metrics::MetricsRegistry;
use crate::selection::strategy::{ParticipantProperties, SelectionContext, SelectionStrategy};

#[derive(Debug, Default)]
pub struct SingleBridgeStrategy;

impl SelectionStrategy for SingleBridgeStrategy {
    fn name(&self) -> &'static str {
        "single"
    }

    fn select(
        &self,
        ctx: &SelectionContext<'_>,
        participant: &ParticipantProperties,
        metrics: &MetricsRegistry,
    ) -> Option<Arc<Bridge>> {
        if ctx.conference_bridges.is_empty() {
            let chosen = ctx
                .least_loaded_in_region_group(participant)
                .or_else(|| ctx.least_loaded());
            self.record_outcome(metrics, if chosen.is_some() { "pre_select" } else { "no_candidate" });
            return chosen;
        }

        if ctx.conference_bridges.len() == 1 {
            let address = ctx.conference_bridges.keys().next().expect("len checked above");
            let existing = ctx.sorted_fleet.iter().find(|b| b.address() == address).cloned();
            let chosen = existing.filter(|b| b.operational(ctx.now));
            self.record_outcome(metrics, if chosen.is_some() { "reuse" } else { "existing_not_operational" });
            return chosen;
        }

        // A conference with more than one bridge should never happen
        // under a single-bridge policy; refuse rather than split.
        self.record_outcome(metrics, "refused_multi_bridge_conference");
        None
    }
}
