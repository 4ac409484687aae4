//! `LifecycleTimers` (spec §4.I): the four periodic sweeps — metrics
//! refresh, load redistribution, single-participant timeout, presence
//! staleness — run as independent `tokio::time::interval`-driven
//! background tasks.
//!
//! Grounded on `engine.rs`'s `start_cleanup_task`: a `tokio::spawn` loop
//! ticking a `tokio::time::interval`, storing the `JoinHandle` so the
//! task can be stopped later. Each sweep here reads the injected
//! [`Clock`] for its own business-logic timestamps rather than calling
//! `Instant::now()` directly, so the staleness/idle-duration arithmetic
//! can be driven deterministically in tests; only the tick cadence
//! itself rides on tokio's own timer.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::bridge::registry::BridgeRegistry;
use crate::clock::Clock;
use crate::config::{HealthCheckConfig, LoadRedistributionConfig, SingleParticipantTimeoutConfig};
use crate::conference::manager::ConferenceSessionManager;
use crate::metrics::MetricsRegistry;

/// A host-owned directory of live conferences, consulted by the load
/// redistribution and single-participant-timeout sweeps. `timers.rs`
/// has no conference registry of its own — conference lifecycle is the
/// host's responsibility (spec §4.G names `ConferenceSessionManager` as
/// one-per-conference, not a singleton the core owns).
#[async_trait::async_trait]
pub trait ConferenceDirectory: Send + Sync {
    /// Every conference currently live.
    async fn conferences(&self) -> Vec<Arc<ConferenceSessionManager>>;

    /// Called once a conference has been emptied by the
    /// single-participant-timeout sweep, so the host can release its
    /// own bookkeeping (spec §4.I "evict that participant and dispose
    /// the conference").
    async fn dispose(&self, conference_id: &str);
}

/// Owns the four periodic sweeps and their `JoinHandle`s. Dropping (or
/// calling [`LifecycleTimers::shutdown`]) stops every running sweep.
pub struct LifecycleTimers {
    registry: Arc<BridgeRegistry>,
    metrics: MetricsRegistry,
    clock: Arc<dyn Clock>,
    directory: Arc<dyn ConferenceDirectory>,
    load_redistribution: LoadRedistributionConfig,
    health_checks: HealthCheckConfig,
    single_participant: SingleParticipantTimeoutConfig,
    /// Per-conference "became single-participant at" timestamps, read
    /// with the injected clock rather than tokio's.
    single_participant_since: Mutex<HashMap<String, Instant>>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl LifecycleTimers {
    pub fn new(
        registry: Arc<BridgeRegistry>,
        metrics: MetricsRegistry,
        clock: Arc<dyn Clock>,
        directory: Arc<dyn ConferenceDirectory>,
        load_redistribution: LoadRedistributionConfig,
        health_checks: HealthCheckConfig,
        single_participant: SingleParticipantTimeoutConfig,
    ) -> Arc<Self> {
        Arc::new(Self {
            registry,
            metrics,
            clock,
            directory,
            load_redistribution,
            health_checks,
            single_participant,
            single_participant_since: Mutex::new(HashMap::new()),
            handles: Mutex::new(Vec::new()),
        })
    }

    /// Start every enabled sweep. Safe to call once; calling again
    /// would duplicate tasks, so the core does not call it internally —
    /// the host decides when its timers start running.
    pub async fn start(self: &Arc<Self>, metrics_refresh_interval: std::time::Duration) {
        self.spawn_metrics_refresh(metrics_refresh_interval);
        if self.load_redistribution.enabled {
            self.spawn_load_redistribution();
        }
        if self.single_participant.enabled {
            self.spawn_single_participant_timeout();
        }
        if self.health_checks.use_presence {
            self.spawn_presence_staleness();
        }
    }

    /// Abort every running sweep task.
    pub async fn shutdown(&self) {
        let mut handles = self.handles.lock().await;
        for handle in handles.drain(..) {
            handle.abort();
        }
    }

    fn spawn_metrics_refresh(self: &Arc<Self>, interval: std::time::Duration) {
        let this = self.clone();
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                this.refresh_metrics();
            }
        });
        self.push_handle(handle);
    }

    /// One metrics-refresh pass (spec §4.I "for each bridge, emit
    /// endpoints gauge, failing-ice flag, restart-requests counter").
    fn refresh_metrics(&self) {
        let now = self.clock.now();
        for bridge in self.registry.snapshot() {
            self.metrics.register(bridge.address());
            self.metrics.set_endpoints(bridge.address(), bridge.endpoint_count() as i64);
            self.metrics.set_failing_ice(bridge.address(), bridge.failing_ice(now));
            let restarts = bridge.restart_request_count(now);
            for _ in 0..restarts {
                self.metrics.incr_restart_requests(bridge.address());
            }
        }
    }

    fn spawn_load_redistribution(self: &Arc<Self>) {
        let this = self.clone();
        let interval = self.load_redistribution.interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                this.redistribute_load().await;
            }
        });
        self.push_handle(handle);
    }

    /// One load-redistribution pass (spec §4.I): for each overloaded
    /// bridge, move up to `endpoints` participants off it by calling
    /// `removeParticipant`; the caller is expected to re-invite them
    /// through `allocate` on its own schedule.
    async fn redistribute_load(&self) {
        let now = self.clock.now();
        let overloaded: Vec<Arc<crate::bridge::Bridge>> = self
            .registry
            .snapshot()
            .into_iter()
            .filter(|b| b.corrected_stress(now) >= self.load_redistribution.stress_threshold)
            .collect();
        if overloaded.is_empty() {
            return;
        }

        for bridge in overloaded {
            let mut moved = 0u32;
            for conference in self.directory.conferences().await {
                if moved >= self.load_redistribution.endpoints {
                    break;
                }
                let candidates = conference.participants_on_bridge(bridge.address()).await;
                for participant_id in candidates {
                    if moved >= self.load_redistribution.endpoints {
                        break;
                    }
                    if let Err(e) = conference.remove_participant(&participant_id).await {
                        warn!(
                            bridge = %bridge.address(),
                            participant = %participant_id,
                            error = %e,
                            "load redistribution eviction failed"
                        );
                        continue;
                    }
                    moved += 1;
                }
            }
            if moved > 0 {
                info!(bridge = %bridge.address(), moved, "redistributed load off overloaded bridge");
            }
        }
    }

    fn spawn_single_participant_timeout(self: &Arc<Self>) {
        let this = self.clone();
        let interval = self.single_participant.interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                this.sweep_single_participant_timeouts().await;
            }
        });
        self.push_handle(handle);
    }

    /// One single-participant-timeout pass (spec §4.I): a conference
    /// sitting at exactly one participant for longer than `timeout` has
    /// that participant evicted and the conference disposed.
    async fn sweep_single_participant_timeouts(&self) {
        let now = self.clock.now();
        let conferences = self.directory.conferences().await;
        let mut since = self.single_participant_since.lock().await;

        let live_ids: std::collections::HashSet<String> =
            conferences.iter().map(|c| c.conference_id().to_string()).collect();
        since.retain(|id, _| live_ids.contains(id));

        for conference in conferences {
            let conference_id = conference.conference_id().to_string();
            match conference.sole_participant().await {
                Some(participant_id) => {
                    let started_at = *since.entry(conference_id.clone()).or_insert(now);
                    if now.saturating_duration_since(started_at) >= self.single_participant.timeout {
                        info!(
                            conference_id = %conference_id,
                            participant_id = %participant_id,
                            "evicting sole participant after single-participant timeout"
                        );
                        if let Err(e) = conference.remove_participant(&participant_id).await {
                            warn!(conference_id = %conference_id, error = %e, "single-participant eviction failed");
                            continue;
                        }
                        since.remove(&conference_id);
                        self.directory.dispose(&conference_id).await;
                    }
                }
                None => {
                    since.remove(&conference_id);
                }
            }
        }
    }

    fn spawn_presence_staleness(self: &Arc<Self>) {
        let this = self.clone();
        let interval = self.health_checks.interval;
        let handle = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                this.sweep_presence_staleness();
            }
        });
        self.push_handle(handle);
    }

    /// One presence-staleness pass (spec §4.I): a bridge that has not
    /// pushed telemetry within `presenceTimeout` is marked unhealthy,
    /// but only while presence-based health is the configured policy.
    fn sweep_presence_staleness(&self) {
        let now = self.clock.now();
        for bridge in self.registry.snapshot() {
            let stale = match bridge.last_presence_received() {
                Some(t) => now.saturating_duration_since(t) > self.health_checks.presence_timeout,
                None => false,
            };
            if stale {
                warn!(address = %bridge.address(), "presence stale; marking unhealthy");
                self.registry.health_timed_out(bridge.address());
            }
        }
    }

    fn push_handle(&self, handle: JoinHandle<()>) {
        // `try_lock` would race a concurrent `shutdown`; these are only
        // called from `start`, well before any shutdown could run, so a
        // blocking lock here never contends.
        if let Ok(mut handles) = self.handles.try_lock() {
            handles.push(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{BridgeConfig, IceFailureConfig};
    use crate::bridge::TelemetrySnapshot;
    use crate::clock::TestClock;
    use std::time::Duration;

    struct EmptyDirectory;

    #[async_trait::async_trait]
    impl ConferenceDirectory for EmptyDirectory {
        async fn conferences(&self) -> Vec<Arc<ConferenceSessionManager>> {
            Vec::new()
        }
        async fn dispose(&self, _conference_id: &str) {}
    }

    fn registry_with(clock: Arc<TestClock>) -> Arc<BridgeRegistry> {
        Arc::new(BridgeRegistry::new(BridgeConfig::default(), IceFailureConfig::default(), clock))
    }

    #[tokio::test]
    async fn metrics_refresh_populates_gauges_for_every_bridge() {
        let clock = Arc::new(TestClock::new());
        let registry = registry_with(clock.clone());
        registry.upsert("b1", None, false);
        registry.get("b1").unwrap().endpoint_added(clock.now());

        let metrics = MetricsRegistry::new();
        let timers = LifecycleTimers::new(
            registry,
            metrics.clone(),
            clock,
            Arc::new(EmptyDirectory),
            LoadRedistributionConfig::default(),
            HealthCheckConfig::default(),
            SingleParticipantTimeoutConfig::default(),
        );
        timers.refresh_metrics();
        assert_eq!(metrics.endpoints("b1"), Some(1));
    }

    #[tokio::test]
    async fn presence_staleness_marks_bridge_unhealthy_after_timeout() {
        let clock = Arc::new(TestClock::new());
        let registry = registry_with(clock.clone());
        registry.upsert(
            "b1",
            Some(&TelemetrySnapshot::default()),
            true,
        );

        let health_checks = HealthCheckConfig {
            use_presence: true,
            presence_timeout: Duration::from_secs(20),
            ..HealthCheckConfig::default()
        };
        let timers = LifecycleTimers::new(
            registry.clone(),
            MetricsRegistry::new(),
            clock.clone(),
            Arc::new(EmptyDirectory),
            LoadRedistributionConfig::default(),
            health_checks,
            SingleParticipantTimeoutConfig::default(),
        );

        clock.advance(Duration::from_secs(21));
        timers.sweep_presence_staleness();
        assert!(!registry.get("b1").unwrap().operational(clock.now()));
    }

    #[tokio::test]
    async fn presence_staleness_is_a_noop_when_not_yet_stale() {
        let clock = Arc::new(TestClock::new());
        let registry = registry_with(clock.clone());
        registry.upsert("b1", Some(&TelemetrySnapshot::default()), true);

        let health_checks = HealthCheckConfig {
            use_presence: true,
            presence_timeout: Duration::from_secs(20),
            ..HealthCheckConfig::default()
        };
        let timers = LifecycleTimers::new(
            registry.clone(),
            MetricsRegistry::new(),
            clock.clone(),
            Arc::new(EmptyDirectory),
            LoadRedistributionConfig::default(),
            health_checks,
            SingleParticipantTimeoutConfig::default(),
        );

        clock.advance(Duration::from_secs(5));
        timers.sweep_presence_staleness();
        assert!(registry.get("b1").unwrap().operational(clock.now()));
    }
}
