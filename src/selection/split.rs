//! Split strategy (spec §4.D): designed for testing; prefers spreading
//! participants across bridges rather than concentrating them. Forces
//! multi-bridge (octo) on.

use std::sync::Arc;

use crate::bridge::Bridge;
use crate::metrics::MetricsRegistry;
use crate::selection::strategy::{ParticipantProperties, SelectionContext, SelectionStrategy};

#[derive(Debug, Default)]
pub struct SplitStrategy;

impl SelectionStrategy for SplitStrategy {
    fn name(&self) -> &'static str {
        "split"
    }

    fn select(
        &self,
        ctx: &SelectionContext<'_>,
        _participant: &ParticipantProperties,
        metrics: &MetricsRegistry,
    ) -> Option<Arc<Bridge>> {
        if let Some(not_in_conference) = ctx
            .sorted_fleet
            .iter()
            .find(|b| !ctx.conference_bridges.contains_key(b.address()))
        {
            self.record_outcome(metrics, "new_bridge");
            return Some(not_in_conference.clone());
        }

        let fewest = ctx
            .conference_bridges
            .iter()
            .min_by_key(|(_, props)| props.participant_count)
            .map(|(address, _)| address.clone());

        let chosen = fewest.and_then(|address| {
            ctx.sorted_fleet.iter().find(|b| b.address() == address).cloned()
        });
        self.record_outcome(metrics, if chosen.is_some() { "fewest_participants" } else { "no_candidate" });
        chosen
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BridgeConfig, IceFailureConfig};
    use crate::selection::strategy::ConferenceBridgeProperties;
    use std::collections::HashMap;
    use std::time::Instant;

    fn bridge(addr: &str) -> Arc<Bridge> {
        Arc::new(Bridge::new(addr, &BridgeConfig::default(), &IceFailureConfig::default()))
    }

    #[test]
    fn prefers_bridge_not_yet_in_conference() {
        let b1 = bridge("b1");
        let b2 = bridge("b2");
        let fleet = vec![b1.clone(), b2.clone()];
        let mut conf = HashMap::new();
        conf.insert(
            "b1".to_string(),
            ConferenceBridgeProperties {
                participant_count: 3,
                visitor: false,
            },
        );
        let region_groups = HashMap::new();
        let ctx = SelectionContext {
            sorted_fleet: &fleet,
            conference_bridges: &conf,
            region_groups: &region_groups,
            max_bridge_participants: None,
            now: Instant::now(),
        };
        let strategy = SplitStrategy;
        let metrics = MetricsRegistry::new();
        assert_eq!(
            strategy
                .select(&ctx, &ParticipantProperties::default(), &metrics)
                .unwrap()
                .address(),
            "b2"
        );
    }

    #[test]
    fn picks_fewest_participants_when_all_bridges_in_conference() {
        let b1 = bridge("b1");
        let b2 = bridge("b2");
        let fleet = vec![b1.clone(), b2.clone()];
        let mut conf = HashMap::new();
        conf.insert(
            "b1".to_string(),
            ConferenceBridgeProperties {
                participant_count: 5,
                visitor: false,
            },
        );
        conf.insert(
            "b2".to_string(),
            ConferenceBridgeProperties {
                participant_count: 2,
                visitor: false,
            },
        );
        let region_groups = HashMap::new();
        let ctx = SelectionContext {
            sorted_fleet: &fleet,
            conference_bridges: &conf,
            region_groups: &region_groups,
            max_bridge_participants: None,
            now: Instant::now(),
        };
        let strategy = SplitStrategy;
        let metrics = MetricsRegistry::new();
        assert_eq!(
            strategy
                .select(&ctx, &ParticipantProperties::default(), &metrics)
                .unwrap()
                .address(),
            "b2"
        );
    }
}
