//! Shared harness for the scenario/integration suites: a fake
//! `BridgeControlTransport` and the `ConferenceSessionManager` wiring
//! every scenario file needs, factored out so each file only describes
//! its own scenario.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bridge_cascade::clock::TestClock;
use bridge_cascade::prelude::*;
use bridge_cascade::transport::RequestDescriptor;

/// Records every request it receives and, when armed, fails the next
/// one with a caller-chosen [`CoreError`].
pub struct FakeTransport {
    calls: AtomicUsize,
    fail_next_with: std::sync::Mutex<Option<CoreError>>,
    recorded: std::sync::Mutex<Vec<(String, RequestDescriptor)>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_next_with: std::sync::Mutex::new(None),
            recorded: std::sync::Mutex::new(Vec::new()),
        }
    }

    pub fn fail_next_with(&self, err: CoreError) {
        *self.fail_next_with.lock().unwrap() = Some(err);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::Relaxed)
    }

    pub fn recorded(&self) -> Vec<(String, RequestDescriptor)> {
        self.recorded.lock().unwrap().clone()
    }
}

impl Default for FakeTransport {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl BridgeControlTransport for FakeTransport {
    async fn send_request(
        &self,
        bridge_address: &str,
        request: RequestDescriptor,
    ) -> Result<serde_json::Value> {
        self.calls.fetch_add(1, Ordering::Relaxed);
        self.recorded.lock().unwrap().push((bridge_address.to_string(), request));
        if let Some(err) = self.fail_next_with.lock().unwrap().take() {
            return Err(err);
        }
        Ok(serde_json::json!({}))
    }
}

pub fn manager(
    config: CoreConfig,
    topology: Box<dyn TopologyStrategy>,
    transport: Arc<FakeTransport>,
    registry: Arc<BridgeRegistry>,
    clock: Arc<TestClock>,
) -> ConferenceSessionManager {
    ConferenceSessionManager::new(
        "conf-scenario",
        &config,
        registry,
        topology,
        transport,
        clock,
        MetricsRegistry::new(),
    )
}

pub fn telemetry(region: &str, relay_id: &str, version: &str) -> TelemetrySnapshot {
    TelemetrySnapshot {
        region: Some(region.to_string()),
        relay_id: Some(relay_id.to_string()),
        version: Some(version.to_string()),
        ..Default::default()
    }
}
