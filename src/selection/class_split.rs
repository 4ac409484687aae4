//! Class-split strategy (spec §4.D): dispatches to one of two
//! independent sub-strategies based on whether the joining participant
//! is a visitor.

use std::sync::Arc;

use crate::bridge::Bridge;
use crate::metrics::MetricsRegistry;
use crate::selection::strategy::{ParticipantProperties, SelectionContext, SelectionStrategy};

/// Splits bridge selection by participant class. Participants and
/// visitors are routed through independently configured strategies so
/// a deployment can, for example, keep visitors off the region-based
/// cascade entirely.
pub struct ClassSplitStrategy {
    participant_strategy: Box<dyn SelectionStrategy>,
    visitor_strategy: Box<dyn SelectionStrategy>,
}

impl ClassSplitStrategy {
    pub fn new(
        participant_strategy: Box<dyn SelectionStrategy>,
        visitor_strategy: Box<dyn SelectionStrategy>,
    ) -> Self {
        Self {
            participant_strategy,
            visitor_strategy,
        }
    }

    fn inner(&self, participant: &ParticipantProperties) -> &dyn SelectionStrategy {
        if participant.visitor {
            self.visitor_strategy.as_ref()
        } else {
            self.participant_strategy.as_ref()
        }
    }
}

impl SelectionStrategy for ClassSplitStrategy {
    fn name(&self) -> &'static str {
        "class_split"
    }

    fn select(
        &self,
        ctx: &SelectionContext<'_>,
        participant: &ParticipantProperties,
        metrics: &MetricsRegistry,
    ) -> Option<Arc<Bridge>> {
        self.inner(participant).select(ctx, participant, metrics)
    }

    fn record_outcome(&self, _metrics: &MetricsRegistry, _outcome: &str) {
        // Delegated strategies record their own outcomes under their
        // own names; this strategy has no histogram of its own.
    }
}
