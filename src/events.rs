//! Event plumbing for the bridge registry (§4.B) and conference-level
//! events (§7 "Propagation policy").
//!
//! Grounded on the teacher's `BridgeEvent` consumption in
//! `orchestrator/handler.rs`: a small `enum` of event payloads fanned
//! out over an unbounded `tokio::sync::mpsc` channel to whatever
//! listener the host registers.

use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::debug;

/// Events published by [`crate::bridge::registry::BridgeRegistry`].
#[derive(Debug, Clone)]
pub enum RegistryEvent {
    BridgeAdded { address: String },
    BridgeRemoved { address: String },
    BridgeShuttingDown { address: String },
    BridgeFailedHealthCheck { address: String },
}

/// Events published by a [`crate::conference::manager::ConferenceSessionManager`].
#[derive(Debug, Clone)]
pub enum ConferenceEvent {
    BridgeSelectionFailed {
        conference_id: String,
        participant_id: String,
    },
    BridgeSelectionSucceeded {
        conference_id: String,
        participant_id: String,
        bridge_address: String,
    },
    BridgeCountChanged {
        conference_id: String,
        bridge_count: usize,
    },
    BridgeRemoved {
        conference_id: String,
        bridge_address: String,
    },
    EndpointRemoved {
        conference_id: String,
        participant_id: String,
    },
}

/// A fan-out sink for events of type `E`. Asynchronous and ordered per
/// listener (spec §5 "Event emissions... are asynchronous and ordered
/// per listener"): each listener gets its own channel, so one slow
/// listener cannot back-pressure another.
#[derive(Clone)]
pub struct EventBus<E: Clone + Send + 'static> {
    listeners: Arc<parking_lot::RwLock<Vec<mpsc::UnboundedSender<E>>>>,
}

impl<E: Clone + Send + 'static> Default for EventBus<E> {
    fn default() -> Self {
        Self {
            listeners: Arc::new(parking_lot::RwLock::new(Vec::new())),
        }
    }
}

impl<E: Clone + Send + std::fmt::Debug + 'static> EventBus<E> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new listener; returns the receiving half of its
    /// channel.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<E> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.listeners.write().push(tx);
        rx
    }

    /// Publish an event to every currently-registered listener. Dead
    /// listeners (receiver dropped) are pruned.
    pub fn publish(&self, event: E) {
        let mut listeners = self.listeners.write();
        listeners.retain(|tx| {
            let ok = tx.send(event.clone()).is_ok();
            if !ok {
                debug!(?event, "dropping dead event listener");
            }
            ok
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn published_events_reach_all_subscribers() {
        let bus: EventBus<RegistryEvent> = EventBus::new();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        bus.publish(RegistryEvent::BridgeAdded {
            address: "b1".into(),
        });
        assert!(matches!(
            rx1.recv().await,
            Some(RegistryEvent::BridgeAdded { .. })
        ));
        assert!(matches!(
            rx2.recv().await,
            Some(RegistryEvent::BridgeAdded { .. })
        ));
    }
}
