//! Region-based strategy (spec §4.D): the production default. A
//! cascade of the primitive predicates, returning the first non-null
//! result.

use std::sync::Arc;

use crate::bridge::Bridge;
use crate::metrics::MetricsRegistry;
use crate::selection::strategy::{ParticipantProperties, SelectionContext, SelectionStrategy};

#[derive(Debug, Default)]
pub struct RegionBasedStrategy;

impl SelectionStrategy for RegionBasedStrategy {
    fn name(&self) -> &'static str {
        "region"
    }

    fn select(
        &self,
        ctx: &SelectionContext<'_>,
        participant: &ParticipantProperties,
        metrics: &MetricsRegistry,
    ) -> Option<Arc<Bridge>> {
        // Ordering resolves an ambiguity between spec §4.D's prose list
        // of primitives and its own worked scenarios (§8 #2/#3): a
        // bridge that is merely "least loaded in region" but overloaded
        // must lose to any non-overloaded bridge anywhere before the
        // overload-ignoring region fallback is tried. See DESIGN.md.
        let steps: [(&str, fn(&SelectionContext<'_>, &ParticipantProperties) -> Option<Arc<Bridge>>); 7] = [
            (
                "not_loaded_already_in_conference_in_region_group",
                |c, p| c.not_loaded_already_in_conference_in_region_group(p),
            ),
            ("not_loaded_in_region_group", |c, p| c.not_loaded_in_region_group(p)),
            (
                "least_loaded_already_in_conference_in_region_group",
                |c, p| c.least_loaded_already_in_conference_in_region_group(p),
            ),
            ("not_loaded_already_in_conference", |c, _| c.not_loaded_already_in_conference()),
            ("not_loaded", |c, _| c.not_loaded()),
            ("least_loaded_in_region_group", |c, p| c.least_loaded_in_region_group(p)),
            ("least_loaded", |c, _| c.least_loaded()),
        ];

        for (outcome, step) in steps {
            if let Some(bridge) = step(ctx, participant) {
                self.record_outcome(metrics, outcome);
                return Some(bridge);
            }
        }
        self.record_outcome(metrics, "no_candidate");
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::TelemetrySnapshot;
    use crate::config::{BridgeConfig, IceFailureConfig};
    use std::collections::HashMap;
    use std::time::Instant;

    fn bridge_with_stress(addr: &str, region: &str, stress: f64) -> Arc<Bridge> {
        let b = Bridge::new(addr, &BridgeConfig::default(), &IceFailureConfig::default());
        let now = Instant::now();
        b.set_telemetry(
            &TelemetrySnapshot {
                region: Some(region.to_string()),
                stress_level: Some(stress),
                ..Default::default()
            },
            now,
            false,
        );
        Arc::new(b)
    }

    fn sorted(fleet: Vec<Arc<Bridge>>, now: Instant) -> Vec<Arc<Bridge>> {
        let mut f = fleet;
        f.sort_by(|a, b| a.compare_to(b, now));
        f
    }

    #[test]
    fn region_preference_over_lower_global_load() {
        // Scenario 2 (spec §8): B1 lightly loaded out-of-region, B2
        // heavier but in-region and not overloaded — pick B2.
        let now = Instant::now();
        let b1 = bridge_with_stress("b1", "x", 0.1);
        let b2 = bridge_with_stress("b2", "r", 0.8);
        let fleet = sorted(vec![b1, b2], now);
        let region_groups = HashMap::new();
        let conf = HashMap::new();
        let ctx = SelectionContext {
            sorted_fleet: &fleet,
            conference_bridges: &conf,
            region_groups: &region_groups,
            max_bridge_participants: None,
            now,
        };
        let strategy = RegionBasedStrategy;
        let metrics = MetricsRegistry::new();
        let participant = ParticipantProperties {
            region: Some("r".to_string()),
            visitor: false,
        };
        assert_eq!(
            strategy.select(&ctx, &participant, &metrics).unwrap().address(),
            "b2"
        );
    }

    #[test]
    fn overloaded_in_region_falls_back_to_least_loaded() {
        // Scenario 3 (spec §8): B2 in-region but overloaded (1.1 >=
        // threshold 1.0) — fall back to B1.
        let now = Instant::now();
        let b1 = bridge_with_stress("b1", "x", 0.2);
        let b2 = bridge_with_stress("b2", "r", 1.1);
        let fleet = sorted(vec![b1, b2], now);
        let region_groups = HashMap::new();
        let conf = HashMap::new();
        let ctx = SelectionContext {
            sorted_fleet: &fleet,
            conference_bridges: &conf,
            region_groups: &region_groups,
            max_bridge_participants: None,
            now,
        };
        let strategy = RegionBasedStrategy;
        let metrics = MetricsRegistry::new();
        let participant = ParticipantProperties {
            region: Some("r".to_string()),
            visitor: false,
        };
        assert_eq!(
            strategy.select(&ctx, &participant, &metrics).unwrap().address(),
            "b1"
        );
    }
}
