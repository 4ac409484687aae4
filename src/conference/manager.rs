//! `ConferenceSessionManager` (spec §4.G): owns one conference's
//! cascade, per-bridge sessions and participant index behind a single
//! coarse-grained mutex, and drives the lock/release/await/reacquire
//! pattern around external bridge requests (spec §5).
//!
//! Grounded on `orchestrator/core.rs`'s `CallCenterEngine`, which owns
//! its shared mutable state behind `Arc<RwLock<_>>`/`Arc<Mutex<_>>`, and
//! on `orchestrator/calls.rs`'s stage-then-release-then-await-then-
//! reacquire pattern around session-core calls.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering as AtomicOrdering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::bridge::rate::RateTracker;
use crate::bridge::registry::BridgeRegistry;
use crate::cascade::topology::{ConnectDecision, NodeClassifier, TopologyStrategy};
use crate::cascade::{Cascade, LinkRequest};
use crate::clock::Clock;
use crate::config::CoreConfig;
use crate::conference::session::{BridgeSession, SessionState};
use crate::error::{CoreError, Result};
use crate::events::{ConferenceEvent, EventBus};
use crate::metrics::MetricsRegistry;
use crate::selection::{BridgeSelector, ConferenceBridgeProperties, ConferenceBridges, ParticipantProperties};
use crate::transport::{BridgeControlTransport, RequestDescriptor};

/// The outcome of a successful [`ConferenceSessionManager::allocate`]:
/// which bridge the participant landed on.
#[derive(Debug, Clone)]
pub struct Allocation {
    pub bridge_address: String,
    pub relay_id: Option<String>,
}

/// Per-participant restart-request throttle (spec §7: "at most 3 in any
/// 60s window, with ≥10s gaps"). One instance per participant, consulted
/// by the host before re-invoking `allocate` after an ICE restart
/// request. Reuses [`RateTracker`]'s windowed-counter shape rather than
/// re-implementing it.
pub struct RestartRateLimiter {
    window: RateTracker,
    min_gap: Duration,
    max_per_window: u32,
    last_attempt: Option<Instant>,
}

impl RestartRateLimiter {
    pub fn new() -> Self {
        Self {
            window: RateTracker::new(Duration::from_secs(60)),
            min_gap: Duration::from_secs(10),
            max_per_window: 3,
            last_attempt: None,
        }
    }

    /// Whether another restart-triggered `allocate` call is permitted
    /// right now. Does not itself record the attempt — call
    /// [`RestartRateLimiter::record`] once the caller commits to it.
    pub fn allow(&mut self, now: Instant) -> bool {
        if let Some(last) = self.last_attempt {
            if now.saturating_duration_since(last) < self.min_gap {
                return false;
            }
        }
        self.window.accumulated(now) < self.max_per_window
    }

    pub fn record(&mut self, now: Instant) {
        self.window.record(now);
        self.last_attempt = Some(now);
    }
}

impl Default for RestartRateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

/// Conference-scoped state guarded by the single conference mutex (spec
/// §5: "a coarse-grained per-conference lock... all structural
/// mutations... are serialized by one conference-level mutex").
struct ConferenceState {
    cascade: Cascade,
    sessions: HashMap<Option<String>, BridgeSession>,
    participant_to_session: HashMap<String, Option<String>>,
}

impl ConferenceState {
    fn new() -> Self {
        Self {
            cascade: Cascade::new(),
            sessions: HashMap::new(),
            participant_to_session: HashMap::new(),
        }
    }

    fn bridges_view(&self) -> ConferenceBridges {
        let mut view = ConferenceBridges::new();
        for session in self.sessions.values() {
            if !session.is_active() {
                continue;
            }
            view.insert(
                session.address().to_string(),
                ConferenceBridgeProperties {
                    participant_count: session.participant_count() as u32,
                    visitor: session.is_visitor(),
                },
            );
        }
        view
    }

    fn session_by_address(&self, address: &str) -> Option<&Option<String>> {
        self.sessions
            .iter()
            .find(|(_, s)| s.address() == address)
            .map(|(relay_id, _)| relay_id)
    }
}

/// Reads bridge classification off the live session map /
/// [`BridgeRegistry`] pair for [`TopologyStrategy`] consumption. Holds a
/// reference to the sessions map directly (not the whole
/// `ConferenceState`) so it can coexist with a concurrent mutable borrow
/// of `state.cascade` — the two fields are disjoint.
struct ConferenceClassifier<'a> {
    sessions: &'a HashMap<Option<String>, BridgeSession>,
    registry: &'a BridgeRegistry,
    now: Instant,
}

impl NodeClassifier for ConferenceClassifier<'_> {
    fn is_visitor(&self, relay_id: &Option<String>) -> bool {
        self.sessions.get(relay_id).map(|s| s.is_visitor()).unwrap_or(false)
    }

    fn region(&self, relay_id: &Option<String>) -> Option<String> {
        let address = self.sessions.get(relay_id)?.address();
        self.registry.get(address)?.region()
    }

    fn is_overloaded(&self, relay_id: &Option<String>) -> bool {
        self.sessions
            .get(relay_id)
            .and_then(|s| self.registry.get(s.address()))
            .map(|b| b.is_overloaded(self.now))
            .unwrap_or(false)
    }
}

/// Owns one conference's cascade, bridge sessions and participant
/// index; the single entry point a host calls into per conference
/// (spec §4.G).
pub struct ConferenceSessionManager {
    conference_id: String,
    state: Mutex<ConferenceState>,
    registry: Arc<BridgeRegistry>,
    selector: BridgeSelector,
    topology: Box<dyn TopologyStrategy>,
    transport: Arc<dyn BridgeControlTransport>,
    clock: Arc<dyn Clock>,
    events: EventBus<ConferenceEvent>,
    metrics: MetricsRegistry,
    max_bridge_participants: Option<u32>,
}

impl ConferenceSessionManager {
    pub fn new(
        conference_id: impl Into<String>,
        config: &CoreConfig,
        registry: Arc<BridgeRegistry>,
        topology: Box<dyn TopologyStrategy>,
        transport: Arc<dyn BridgeControlTransport>,
        clock: Arc<dyn Clock>,
        metrics: MetricsRegistry,
    ) -> Self {
        Self {
            conference_id: conference_id.into(),
            state: Mutex::new(ConferenceState::new()),
            registry,
            selector: BridgeSelector::new(&config.selection, &config.octo, config.bridge.max_bridge_participants),
            topology,
            transport,
            clock,
            events: EventBus::new(),
            metrics,
            max_bridge_participants: config.bridge.max_bridge_participants,
        }
    }

    pub fn events(&self) -> &EventBus<ConferenceEvent> {
        &self.events
    }

    pub fn conference_id(&self) -> &str {
        &self.conference_id
    }

    async fn bridge_count(&self) -> usize {
        self.state.lock().await.sessions.values().filter(|s| s.is_active()).count()
    }

    /// Every participant currently allocated on `address`, for the load
    /// redistribution sweep (spec §4.I "pick candidates by load, call
    /// `removeParticipant` for each").
    pub async fn participants_on_bridge(&self, address: &str) -> Vec<String> {
        let state = self.state.lock().await;
        let Some(relay_id) = state.session_by_address(address).cloned() else {
            return Vec::new();
        };
        state
            .participant_to_session
            .iter()
            .filter(|(_, r)| **r == relay_id)
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Total participants across every bridge in this conference, for
    /// the single-participant-timeout sweep (spec §4.I).
    pub async fn total_participant_count(&self) -> usize {
        self.state.lock().await.participant_to_session.len()
    }

    /// The conference's sole participant, if it has exactly one.
    pub async fn sole_participant(&self) -> Option<String> {
        let state = self.state.lock().await;
        if state.participant_to_session.len() == 1 {
            state.participant_to_session.keys().next().cloned()
        } else {
            None
        }
    }

    /// Select a bridge and splice session/cascade bookkeeping, issue the
    /// external allocate request, then reacquire the lock to finalize —
    /// the §5 lock/release/await/reacquire pattern (spec §4.G
    /// `allocate`).
    pub async fn allocate(&self, participant_id: &str, participant: &ParticipantProperties) -> Result<Allocation> {
        let now = self.clock.now();
        let fleet = self.registry.snapshot();

        let (bridge_address, newly_created, relay_id, splice_requests) = {
            let mut state = self.state.lock().await;

            if state.participant_to_session.contains_key(participant_id) {
                return Err(CoreError::invalid_input(format!(
                    "participant {participant_id} already allocated"
                )));
            }

            let conference_bridges = state.bridges_view();
            let chosen = match self
                .selector
                .select(&fleet, &conference_bridges, participant, None, &self.metrics, now)
            {
                Ok(b) => b,
                Err(e) => {
                    self.events.publish(ConferenceEvent::BridgeSelectionFailed {
                        conference_id: self.conference_id.clone(),
                        participant_id: participant_id.to_string(),
                    });
                    return Err(e);
                }
            };

            if !conference_bridges.is_empty() && !conference_bridges.contains_key(chosen.address()) {
                let existing_has_relay = conference_bridges
                    .keys()
                    .filter_map(|addr| state.session_by_address(addr))
                    .any(|relay| relay.is_some());
                if !chosen.can_cascade() || !existing_has_relay {
                    error!(
                        conference_id = %self.conference_id,
                        bridge = %chosen.address(),
                        "selector chose a second bridge without relay capability; treating as selection failure"
                    );
                    self.events.publish(ConferenceEvent::BridgeSelectionFailed {
                        conference_id: self.conference_id.clone(),
                        participant_id: participant_id.to_string(),
                    });
                    return Err(CoreError::selection_unavailable(
                        "cannot extend conference to a relay-incapable bridge",
                    ));
                }
            }

            let existing_relay_id = state.session_by_address(chosen.address()).cloned();
            let newly_created = existing_relay_id.is_none();
            let relay_id = chosen.relay_id();

            if newly_created {
                state.sessions.insert(
                    relay_id.clone(),
                    BridgeSession::new(chosen.address(), relay_id.clone(), participant.visitor),
                );
            }

            let followup_requests = if newly_created {
                self.splice_into_cascade(&mut state, &relay_id)
            } else if !participant.visitor {
                // The session already existed: no new cascade edge to
                // wire, but every other node already reachable from it
                // needs to learn about this new (non-visitor)
                // participant so it can relay audio/video to it (spec
                // §4.G `allocate` step 4, else-branch).
                self.broadcast_new_remote_participant(&state, &relay_id, participant_id)
            } else {
                Vec::new()
            };

            (chosen.address().to_string(), newly_created, relay_id, followup_requests)
        };

        let primary = RequestDescriptor::AllocateEndpoint {
            endpoint_id: participant_id.to_string(),
            create: true,
            expire: false,
            sources: Vec::new(),
            sctp: None,
            capabilities: Vec::new(),
        };

        let primary_result = self.transport.send_request(&bridge_address, primary).await;
        for req in followup_requests {
            // Relay wiring / remote-participant fan-out is best-effort
            // from the allocate caller's point of view: a failure here
            // does not fail the participant's own allocation, but is
            // logged loudly since it leaves the cascade edge (or a
            // peer's view of this participant) out of sync.
            if let Err(e) = self.transport.send_request(&req.address, req.descriptor).await {
                warn!(conference_id = %self.conference_id, error = %e, "relay wiring request failed");
            }
        }

        if let Err(e) = &primary_result {
            // §7 error-classification side effects: a failed allocate
            // must leave the bridge in a state that keeps a retry from
            // landing back on it.
            match e {
                CoreError::TimeoutNoResponse(_) | CoreError::BridgeServiceUnavailable(_) => {
                    if let Some(bridge) = self.registry.get(&bridge_address) {
                        bridge.set_operational(false, now);
                    }
                }
                CoreError::GracefulShutdown(_) => {
                    if let Some(bridge) = self.registry.get(&bridge_address) {
                        bridge.set_graceful_shutdown(true);
                    }
                }
                _ => {}
            }
        }

        let mut state = self.state.lock().await;

        if primary_result.is_err() && newly_created {
            state.sessions.remove(&relay_id);
        }
        let response = primary_result?;
        let _ = response;

        if !state.sessions.contains_key(&relay_id) {
            return Err(CoreError::session_gone(bridge_address));
        }
        if state.participant_to_session.contains_key(participant_id) {
            return Err(CoreError::participant_gone(participant_id.to_string()));
        }

        let session = state.sessions.get_mut(&relay_id).expect("checked above");
        session.add_participant(participant_id);
        if newly_created {
            session.transition(SessionState::Allocated);
        }
        session.transition(SessionState::Active);
        state.participant_to_session.insert(participant_id.to_string(), relay_id.clone());

        self.events.publish(ConferenceEvent::BridgeSelectionSucceeded {
            conference_id: self.conference_id.clone(),
            participant_id: participant_id.to_string(),
            bridge_address: bridge_address.clone(),
        });
        if newly_created {
            self.events.publish(ConferenceEvent::BridgeCountChanged {
                conference_id: self.conference_id.clone(),
                bridge_count: state.sessions.values().filter(|s| s.is_active()).count(),
            });
        }

        Ok(Allocation {
            bridge_address,
            relay_id,
        })
    }

    /// Every other node already reachable from `relay_id`, each told via
    /// `updateRemoteParticipant(..., create=true)` about a freshly
    /// joined non-visitor participant so its own relay gains a mirrored
    /// endpoint entry (spec §4.G `allocate` step 4, §4.E `getPathsFrom`).
    fn broadcast_new_remote_participant(
        &self,
        state: &ConferenceState,
        relay_id: &Option<String>,
        participant_id: &str,
    ) -> Vec<PendingRequest> {
        let mut out = Vec::new();
        state.cascade.paths_from(relay_id, |node, parent| {
            if parent.is_none() {
                return; // the root is relay_id itself, not an "other" node
            }
            let Some(session) = state.sessions.get(node) else { return };
            if !session.is_active() {
                return;
            }
            out.push(PendingRequest {
                address: session.address().to_string(),
                descriptor: RequestDescriptor::UpdateRemoteParticipant {
                    peer_relay_id: relay_id.clone().unwrap_or_default(),
                    participant_id: participant_id.to_string(),
                    sources: Vec::new(),
                    create: true,
                },
            });
        });
        out
    }

    /// Ask the topology strategy where `relay_id` attaches, splice it
    /// into the cascade, and translate the new edge(s) into paired
    /// `createRelay` requests (spec §4.G step 4, §4.E `addNodeToMesh`).
    fn splice_into_cascade(&self, state: &mut ConferenceState, relay_id: &Option<String>) -> Vec<PendingRequest> {
        let is_visitor = state
            .sessions
            .get(relay_id)
            .map(|s| s.is_visitor())
            .unwrap_or(false);

        if state.cascade.is_empty() {
            state.cascade.add_node_to_mesh(relay_id.clone(), "0", None).ok();
            return Vec::new();
        }

        let classifier = ConferenceClassifier {
            sessions: &state.sessions,
            registry: &self.registry,
            now: self.clock.now(),
        };
        let ConnectDecision { existing_node, mesh_id } =
            self.topology.connect_node(&state.cascade, relay_id, is_visitor, &classifier);

        let Some(anchor) = existing_node else {
            return Vec::new();
        };

        if let Err(e) = state.cascade.add_node_to_mesh(relay_id.clone(), &mesh_id, Some(&anchor)) {
            error!(conference_id = %self.conference_id, error = %e, "failed to splice node into cascade");
            return Vec::new();
        }

        let anchor_address = state
            .sessions
            .get(&anchor)
            .map(|s| s.address().to_string())
            .unwrap_or_default();
        let new_address = state
            .sessions
            .get(relay_id)
            .map(|s| s.address().to_string())
            .unwrap_or_default();

        vec![
            PendingRequest {
                address: anchor_address.clone(),
                descriptor: RequestDescriptor::CreateRelay {
                    peer_relay_id: relay_id.clone().unwrap_or_default(),
                    participants: Vec::new(),
                    initiator: true,
                    mesh_id: mesh_id.clone(),
                },
            },
            PendingRequest {
                address: new_address,
                descriptor: RequestDescriptor::CreateRelay {
                    peer_relay_id: anchor.clone().unwrap_or_default(),
                    participants: Vec::new(),
                    initiator: false,
                    mesh_id,
                },
            },
        ]
    }

    /// Remove a participant. If it was the session's last, tear the
    /// session down and repair the cascade; otherwise expire just this
    /// endpoint, and for non-visitor participants, expire its relayed
    /// mirror on every other reachable session (spec §4.G
    /// `removeParticipant`).
    pub async fn remove_participant(&self, participant_id: &str) -> Result<()> {
        let requests = {
            let mut state = self.state.lock().await;
            let Some(relay_id) = state.participant_to_session.remove(participant_id) else {
                return Err(CoreError::not_found(format!("participant {participant_id} not found")));
            };

            let Some(session) = state.sessions.get_mut(&relay_id) else {
                return Ok(());
            };
            let is_visitor = session.is_visitor();
            let was_last = session.remove_participant(participant_id);
            let owner_address = session.address().to_string();

            if was_last {
                let (_, mut requests) = self.tear_down_session_locked(&mut state, &relay_id);
                requests.push(PendingRequest {
                    address: owner_address,
                    descriptor: RequestDescriptor::ExpireEndpoint {
                        endpoint_id: participant_id.to_string(),
                    },
                });
                requests
            } else {
                let mut requests = vec![PendingRequest {
                    address: owner_address,
                    descriptor: RequestDescriptor::ExpireEndpoint {
                        endpoint_id: participant_id.to_string(),
                    },
                }];
                if !is_visitor {
                    requests.extend(self.broadcast_expire_remote_participant(&state, &relay_id, participant_id));
                }
                requests
            }
        };

        for req in requests {
            if let Err(e) = self.transport.send_request(&req.address, req.descriptor).await {
                warn!(conference_id = %self.conference_id, error = %e, "participant removal request failed");
            }
        }
        self.events.publish(ConferenceEvent::EndpointRemoved {
            conference_id: self.conference_id.clone(),
            participant_id: participant_id.to_string(),
        });
        Ok(())
    }

    /// Every other session already reachable from `relay_id`, each told
    /// to drop its relayed mirror of `participant_id` (spec §4.G
    /// `removeParticipant`, non-last-participant branch).
    fn broadcast_expire_remote_participant(
        &self,
        state: &ConferenceState,
        relay_id: &Option<String>,
        participant_id: &str,
    ) -> Vec<PendingRequest> {
        let mut out = Vec::new();
        state.cascade.paths_from(relay_id, |node, parent| {
            if parent.is_none() {
                return;
            }
            let Some(session) = state.sessions.get(node) else { return };
            if !session.is_active() {
                return;
            }
            out.push(PendingRequest {
                address: session.address().to_string(),
                descriptor: RequestDescriptor::ExpireRemoteParticipants {
                    ids: vec![participant_id.to_string()],
                    peer_relay_id: relay_id.clone().unwrap_or_default(),
                },
            });
        });
        out
    }

    /// Forcibly remove a bridge's session from this conference (spec
    /// §4.G `removeBridge`): same removal mechanics as
    /// [`ConferenceSessionManager::remove_participant`]'s
    /// last-participant path, triggered externally rather than by
    /// participant departure. Returns the participants stranded by the
    /// removal, so the host can re-invite them (spec §6
    /// `conference.removeBridge(bridgeAddress) -> list<participantId>`).
    pub async fn remove_bridge(&self, bridge_address: &str) -> Result<Vec<String>> {
        let (stranded, requests) = {
            let mut state = self.state.lock().await;
            let Some(relay_id) = state.session_by_address(bridge_address).cloned() else {
                return Err(CoreError::not_found(format!("bridge {bridge_address} not in conference")));
            };
            let stranded: Vec<String> = state
                .participant_to_session
                .iter()
                .filter(|(_, r)| **r == relay_id)
                .map(|(id, _)| id.clone())
                .collect();
            for id in &stranded {
                state.participant_to_session.remove(id);
            }
            let (_, requests) = self.tear_down_session_locked(&mut state, &relay_id);
            (stranded, requests)
        };

        for req in requests {
            if let Err(e) = self.transport.send_request(&req.address, req.descriptor).await {
                warn!(conference_id = %self.conference_id, error = %e, "bridge removal request failed");
            }
        }
        self.events.publish(ConferenceEvent::BridgeRemoved {
            conference_id: self.conference_id.clone(),
            bridge_address: bridge_address.to_string(),
        });
        Ok(stranded)
    }

    /// A session-level failure (transport error classified as fatal, or
    /// a health-check eviction cascading down): mark `Failed` and tear
    /// down without sending an expire request (spec §4.G
    /// `sessionFailed`).
    pub async fn session_failed(&self, relay_id: &Option<String>) {
        let requests = {
            let mut state = self.state.lock().await;
            if let Some(session) = state.sessions.get_mut(relay_id) {
                session.fail();
            }
            let (_, requests) = self.tear_down_session_locked(&mut state, relay_id);
            requests
        };
        for req in requests {
            if let Err(e) = self.transport.send_request(&req.address, req.descriptor).await {
                warn!(conference_id = %self.conference_id, error = %e, "session-failed teardown request failed");
            }
        }
    }

    /// A single endpoint failed independent of the rest of its session
    /// (spec §4.G `endpointFailed`): remove just that participant.
    pub async fn endpoint_failed(&self, participant_id: &str) -> Result<()> {
        self.remove_participant(participant_id).await
    }

    /// Forward an update to the owning session and, for non-visitor
    /// participants, mirror source changes to every other reachable
    /// session via its relay (spec §4.G `updateParticipant`).
    pub async fn update_participant(
        &self,
        participant_id: &str,
        transport_desc: Option<serde_json::Value>,
        sources: Option<Vec<String>>,
        initial_last_n: Option<i32>,
    ) -> Result<()> {
        let requests = {
            let state = self.state.lock().await;
            let Some(relay_id) = state.participant_to_session.get(participant_id).cloned() else {
                return Err(CoreError::not_found(format!("participant {participant_id} not found")));
            };
            let Some(session) = state.sessions.get(&relay_id) else {
                return Err(CoreError::session_gone(participant_id.to_string()));
            };

            let mut requests = vec![PendingRequest {
                address: session.address().to_string(),
                descriptor: RequestDescriptor::UpdateEndpoint {
                    endpoint_id: participant_id.to_string(),
                    transport: transport_desc,
                    sources: sources.clone(),
                    initial_last_n,
                },
            }];

            if !session.is_visitor() {
                if let Some(sources) = sources {
                    state.cascade.paths_from(&relay_id, |node, parent| {
                        if parent.is_none() {
                            return;
                        }
                        let Some(peer_session) = state.sessions.get(node) else { return };
                        if !peer_session.is_active() {
                            return;
                        }
                        requests.push(PendingRequest {
                            address: peer_session.address().to_string(),
                            descriptor: RequestDescriptor::UpdateRemoteParticipant {
                                peer_relay_id: relay_id.clone().unwrap_or_default(),
                                participant_id: participant_id.to_string(),
                                sources: sources.clone(),
                                create: false,
                            },
                        });
                    });
                }
            }
            requests
        };

        for req in requests {
            self.transport.send_request(&req.address, req.descriptor).await?;
        }
        Ok(())
    }

    /// Force-mute every listed participant's audio and/or video on its
    /// owning session (spec §6 `conference.mute`). Returns whether every
    /// owning session accepted the request.
    pub async fn mute(&self, participant_ids: &[String], audio: bool, video: bool) -> bool {
        let by_address: HashMap<String, Vec<String>> = {
            let state = self.state.lock().await;
            let mut grouped: HashMap<String, Vec<String>> = HashMap::new();
            for id in participant_ids {
                if let Some(relay_id) = state.participant_to_session.get(id) {
                    if let Some(session) = state.sessions.get(relay_id) {
                        grouped.entry(session.address().to_string()).or_default().push(id.clone());
                    }
                }
            }
            grouped
        };

        let mut all_ok = true;
        for (address, ids) in by_address {
            let ok = self
                .transport
                .send_request(&address, RequestDescriptor::MuteForce { ids, audio, video })
                .await
                .is_ok();
            all_ok &= ok;
        }
        all_ok
    }

    /// Tear down every session in this conference (spec §6
    /// `conference.expire`): the host calls this once it has decided the
    /// conference itself is going away, independent of any single
    /// participant or bridge departure.
    pub async fn expire(&self) {
        let relay_ids: Vec<Option<String>> = {
            let state = self.state.lock().await;
            state.sessions.keys().cloned().collect()
        };
        for relay_id in relay_ids {
            let requests = {
                let mut state = self.state.lock().await;
                let (_, requests) = self.tear_down_session_locked(&mut state, &relay_id);
                requests
            };
            for req in requests {
                if let Err(e) = self.transport.send_request(&req.address, req.descriptor).await {
                    warn!(conference_id = %self.conference_id, error = %e, "conference expire teardown request failed");
                }
            }
        }
        let mut state = self.state.lock().await;
        state.participant_to_session.clear();
    }

    /// Remove `relay_id`'s session from state and the cascade, repairing
    /// the cascade via the configured topology strategy when the
    /// removed node was bridging more than one mesh. Returns the
    /// session's bridge address (if it existed) and the pending
    /// notification requests to send *after* the caller releases the
    /// conference lock (spec §5: I/O must not happen while the mutex is
    /// held).
    fn tear_down_session_locked(
        &self,
        state: &mut ConferenceState,
        relay_id: &Option<String>,
    ) -> (Option<String>, Vec<PendingRequest>) {
        let Some(session) = state.sessions.remove(relay_id) else {
            return (None, Vec::new());
        };
        self.metrics.unregister(session.address());
        let address = session.address().to_string();

        let now = self.clock.now();
        let registry = &self.registry;
        let topology = self.topology.as_ref();
        let sessions_ref = &state.sessions;

        let mut removed_links = Vec::new();
        let mut repair_links: Vec<LinkRequest> = Vec::new();
        state.cascade.remove_node(
            relay_id,
            |peer, n| removed_links.push((peer.clone(), n.clone())),
            |cascade_after, partitions| {
                if partitions.len() <= 1 {
                    return Vec::new();
                }
                let classifier = ConferenceClassifier { sessions: sessions_ref, registry, now };
                let requests = topology.repair_mesh(cascade_after, partitions, &classifier);
                repair_links = requests.clone();
                requests
            },
        );

        let mut requests = Vec::new();
        for (peer, _) in &removed_links {
            if let Some(peer_session) = state.sessions.get(peer) {
                requests.push(PendingRequest {
                    address: peer_session.address().to_string(),
                    descriptor: RequestDescriptor::ExpireRelay {
                        peer_relay_id: relay_id.clone().unwrap_or_default(),
                    },
                });
            }
        }

        for link in &repair_links {
            let Some(addr_a) = state.sessions.get(&link.a).map(|s| s.address().to_string()) else { continue };
            let Some(addr_b) = state.sessions.get(&link.b).map(|s| s.address().to_string()) else { continue };
            requests.push(PendingRequest {
                address: addr_a,
                descriptor: RequestDescriptor::CreateRelay {
                    peer_relay_id: link.b.clone().unwrap_or_default(),
                    participants: Vec::new(),
                    initiator: true,
                    mesh_id: link.mesh_id.clone(),
                },
            });
            requests.push(PendingRequest {
                address: addr_b,
                descriptor: RequestDescriptor::CreateRelay {
                    peer_relay_id: link.a.clone().unwrap_or_default(),
                    participants: Vec::new(),
                    initiator: false,
                    mesh_id: link.mesh_id.clone(),
                },
            });
        }

        info!(conference_id = %self.conference_id, bridge = %address, "session torn down");
        (Some(address), requests)
    }

    /// Bridge-to-bridge transport handshake (spec §4.G
    /// `setRelayTransport`): deliver a transport description received
    /// on `relay_id`'s own bridge to its peer session named by
    /// `peer_relay_id`. A no-op if either session has since gone away.
    pub async fn set_relay_transport(
        &self,
        relay_id: &Option<String>,
        peer_relay_id: &Option<String>,
        transport: serde_json::Value,
    ) {
        let state = self.state.lock().await;
        if !state.sessions.contains_key(relay_id) {
            return;
        }
        let Some(peer) = state.sessions.get(peer_relay_id) else {
            return;
        };
        if !peer.is_active() {
            return;
        }
        let address = peer.address().to_string();
        drop(state);
        if let Err(e) = self
            .transport
            .send_request(
                &address,
                RequestDescriptor::UpdateEndpoint {
                    endpoint_id: peer_relay_id.clone().unwrap_or_default(),
                    transport: Some(transport),
                    sources: None,
                    initial_last_n: None,
                },
            )
            .await
        {
            warn!(conference_id = %self.conference_id, error = %e, "relay transport handshake failed");
        }
    }

    /// A debug-friendly, ordered snapshot of this conference's state
    /// (spec §6 `conference.debugState`).
    pub async fn debug_state(&self) -> serde_json::Value {
        let state = self.state.lock().await;
        let mut sessions = serde_json::Map::new();
        for (relay_id, session) in &state.sessions {
            sessions.insert(
                relay_id.clone().unwrap_or_else(|| "<none>".to_string()),
                serde_json::json!({
                    "address": session.address(),
                    "participant_count": session.participant_count(),
                    "visitor": session.is_visitor(),
                    "state": format!("{:?}", session.state()),
                }),
            );
        }

        let mut nodes = Vec::new();
        let mut edges = Vec::new();
        for id in state.cascade.node_ids() {
            nodes.push(id.clone().unwrap_or_else(|| "<none>".to_string()));
            if let Some(node) = state.cascade.node(id) {
                for (peer, link) in &node.links {
                    edges.push(serde_json::json!({
                        "from": id.clone().unwrap_or_else(|| "<none>".to_string()),
                        "to": peer.clone().unwrap_or_else(|| "<none>".to_string()),
                        "mesh_id": link.mesh_id,
                    }));
                }
            }
        }

        let mut participants = serde_json::Map::new();
        for (id, relay_id) in &state.participant_to_session {
            participants.insert(
                id.clone(),
                serde_json::Value::String(relay_id.clone().unwrap_or_else(|| "<none>".to_string())),
            );
        }

        let mut out = serde_json::Map::new();
        out.insert("conference_id".to_string(), serde_json::Value::String(self.conference_id.clone()));
        out.insert("sessions".to_string(), serde_json::Value::Object(sessions));
        out.insert(
            "cascade".to_string(),
            serde_json::json!({ "nodes": nodes, "edges": edges }),
        );
        out.insert("participants".to_string(), serde_json::Value::Object(participants));
        serde_json::Value::Object(out)
    }
}

struct PendingRequest {
    address: String,
    descriptor: RequestDescriptor,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bridge::TelemetrySnapshot;
    use crate::cascade::topology::SingleMeshTopologyStrategy;
    use crate::clock::TestClock;
    use crate::config::{BridgeConfig, IceFailureConfig};
    use async_trait::async_trait;
    use std::sync::atomic::AtomicUsize;

    struct FakeTransport {
        calls: AtomicUsize,
        fail_next: std::sync::atomic::AtomicBool,
        recorded: std::sync::Mutex<Vec<(String, RequestDescriptor)>>,
    }

    impl FakeTransport {
        fn new() -> Self {
            Self {
                calls: AtomicUsize::new(0),
                fail_next: std::sync::atomic::AtomicBool::new(false),
                recorded: std::sync::Mutex::new(Vec::new()),
            }
        }

        fn recorded(&self) -> Vec<(String, RequestDescriptor)> {
            self.recorded.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl BridgeControlTransport for FakeTransport {
        async fn send_request(
            &self,
            bridge_address: &str,
            request: RequestDescriptor,
        ) -> Result<serde_json::Value> {
            self.calls.fetch_add(1, AtomicOrdering::Relaxed);
            self.recorded.lock().unwrap().push((bridge_address.to_string(), request));
            if self.fail_next.load(AtomicOrdering::Relaxed) {
                return Err(CoreError::bridge_service_unavailable("boom"));
            }
            Ok(serde_json::json!({}))
        }
    }

    fn manager() -> (ConferenceSessionManager, Arc<BridgeRegistry>, Arc<TestClock>) {
        manager_with_topology(Box::new(SingleMeshTopologyStrategy))
    }

    fn manager_with_topology(
        topology: Box<dyn crate::cascade::topology::TopologyStrategy>,
    ) -> (ConferenceSessionManager, Arc<BridgeRegistry>, Arc<TestClock>) {
        let clock = Arc::new(TestClock::new());
        let registry = Arc::new(BridgeRegistry::new(
            BridgeConfig::default(),
            IceFailureConfig::default(),
            clock.clone(),
        ));
        let config = CoreConfig::default();
        let mgr = ConferenceSessionManager::new(
            "conf-1",
            &config,
            registry.clone(),
            topology,
            Arc::new(FakeTransport::new()),
            clock.clone(),
            MetricsRegistry::new(),
        );
        (mgr, registry, clock)
    }

    fn manager_with_transport(
        topology: Box<dyn crate::cascade::topology::TopologyStrategy>,
        transport: Arc<FakeTransport>,
    ) -> (ConferenceSessionManager, Arc<BridgeRegistry>, Arc<TestClock>) {
        let clock = Arc::new(TestClock::new());
        let registry = Arc::new(BridgeRegistry::new(
            BridgeConfig::default(),
            IceFailureConfig::default(),
            clock.clone(),
        ));
        let config = CoreConfig::default();
        let mgr = ConferenceSessionManager::new(
            "conf-1",
            &config,
            registry.clone(),
            topology,
            transport,
            clock.clone(),
            MetricsRegistry::new(),
        );
        (mgr, registry, clock)
    }

    #[tokio::test]
    async fn allocate_picks_sole_bridge_and_tracks_participant() {
        let (mgr, registry, _clock) = manager();
        registry.upsert(
            "b1",
            Some(&TelemetrySnapshot {
                region: Some("r".to_string()),
                ..Default::default()
            }),
            false,
        );

        let allocation = mgr
            .allocate("p1", &ParticipantProperties { region: Some("r".into()), visitor: false })
            .await
            .unwrap();
        assert_eq!(allocation.bridge_address, "b1");
        assert_eq!(mgr.bridge_count().await, 1);
    }

    #[tokio::test]
    async fn duplicate_participant_is_rejected() {
        let (mgr, registry, _clock) = manager();
        registry.upsert("b1", None, false);
        mgr.allocate("p1", &ParticipantProperties::default()).await.unwrap();
        let err = mgr.allocate("p1", &ParticipantProperties::default()).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn removing_last_participant_tears_down_session() {
        let (mgr, registry, _clock) = manager();
        registry.upsert("b1", None, false);
        mgr.allocate("p1", &ParticipantProperties::default()).await.unwrap();
        assert_eq!(mgr.bridge_count().await, 1);

        mgr.remove_participant("p1").await.unwrap();
        assert_eq!(mgr.bridge_count().await, 0);
    }

    #[tokio::test]
    async fn removing_non_last_participant_expires_endpoint_and_broadcasts() {
        let (mgr, registry, _clock) = manager();
        registry.upsert("b1", None, false);
        mgr.allocate("p1", &ParticipantProperties::default()).await.unwrap();
        mgr.allocate("p2", &ParticipantProperties::default()).await.unwrap();
        assert_eq!(mgr.bridge_count().await, 1, "both participants share one bridge");

        mgr.remove_participant("p1").await.unwrap();
        assert_eq!(mgr.bridge_count().await, 1, "session survives while p2 remains");
        assert_eq!(mgr.total_participant_count().await, 1);
    }

    #[tokio::test]
    async fn allocate_on_existing_session_broadcasts_new_remote_participant() {
        let transport = Arc::new(FakeTransport::new());
        let (mgr, registry, _clock) = manager_with_transport(Box::new(SingleMeshTopologyStrategy), transport.clone());
        registry.upsert("b1", None, false);
        mgr.allocate("p1", &ParticipantProperties::default()).await.unwrap();

        // splice in a second, already-linked session directly so the
        // region-based default strategy's reuse of "b1" for p2 has a
        // reachable peer to broadcast to.
        {
            let mut state = mgr.state.lock().await;
            let relay_id = state.session_by_address("b1").cloned().unwrap();
            let peer_relay = Some("peer".to_string());
            state.sessions.insert(
                peer_relay.clone(),
                BridgeSession::new("b2", peer_relay.clone(), false),
            );
            state.sessions.get_mut(&peer_relay).unwrap().transition(SessionState::Allocated);
            state.sessions.get_mut(&peer_relay).unwrap().transition(SessionState::Active);
            state.cascade.add_node_to_mesh(peer_relay, "0", Some(&relay_id)).unwrap();
        }

        mgr.allocate("p2", &ParticipantProperties { region: None, visitor: false })
            .await
            .unwrap();

        let recorded = transport.recorded();
        assert!(recorded.iter().any(|(addr, d)| addr == "b2"
            && matches!(d, RequestDescriptor::UpdateRemoteParticipant { participant_id, create, .. } if participant_id == "p2" && *create)));
    }

    #[tokio::test]
    async fn update_participant_forwards_to_owning_session_and_broadcasts() {
        let transport = Arc::new(FakeTransport::new());
        let (mgr, registry, clock) = manager_with_transport(Box::new(SingleMeshTopologyStrategy), transport.clone());
        registry.upsert("b1", None, false);
        mgr.allocate("p1", &ParticipantProperties::default()).await.unwrap();

        // splice a second, already-linked session directly into state so
        // there is a peer to broadcast to, without needing a real
        // selection pass to land a participant on it.
        {
            let mut state = mgr.state.lock().await;
            let relay_id = state.session_by_address("b1").cloned().unwrap();
            let peer_relay = Some("peer".to_string());
            state.sessions.insert(
                peer_relay.clone(),
                BridgeSession::new("b2", peer_relay.clone(), false),
            );
            state.sessions.get_mut(&peer_relay).unwrap().transition(SessionState::Allocated);
            state.sessions.get_mut(&peer_relay).unwrap().transition(SessionState::Active);
            state.cascade.add_node_to_mesh(peer_relay, "0", Some(&relay_id)).unwrap();
        }
        let _ = clock.now();

        mgr.update_participant("p1", None, Some(vec!["src-1".to_string()]), Some(2))
            .await
            .unwrap();

        let recorded = transport.recorded();
        assert!(recorded
            .iter()
            .any(|(addr, d)| addr == "b1" && matches!(d, RequestDescriptor::UpdateEndpoint { endpoint_id, .. } if endpoint_id == "p1")));
        assert!(recorded
            .iter()
            .any(|(addr, d)| addr == "b2" && matches!(d, RequestDescriptor::UpdateRemoteParticipant { participant_id, create, .. } if participant_id == "p1" && !create)));
    }

    #[tokio::test]
    async fn mute_groups_by_owning_bridge_and_reports_failure() {
        let transport = Arc::new(FakeTransport::new());
        let (mgr, registry, _clock) = manager_with_transport(Box::new(SingleMeshTopologyStrategy), transport.clone());
        registry.upsert("b1", None, false);
        mgr.allocate("p1", &ParticipantProperties::default()).await.unwrap();
        mgr.allocate("p2", &ParticipantProperties::default()).await.unwrap();

        let ok = mgr.mute(&["p1".to_string(), "p2".to_string()], true, false).await;
        assert!(ok);
        let recorded = transport.recorded();
        assert_eq!(
            recorded
                .iter()
                .filter(|(_, d)| matches!(d, RequestDescriptor::MuteForce { .. }))
                .count(),
            1,
            "both participants share a bridge, so one grouped MuteForce request is sent"
        );

        transport.fail_next.store(true, AtomicOrdering::Relaxed);
        let ok = mgr.mute(&["p1".to_string()], true, true).await;
        assert!(!ok);
    }

    #[tokio::test]
    async fn expire_tears_down_every_session() {
        let (mgr, registry, _clock) = manager();
        registry.upsert("b1", None, false);
        mgr.allocate("p1", &ParticipantProperties::default()).await.unwrap();
        assert_eq!(mgr.bridge_count().await, 1);

        mgr.expire().await;
        assert_eq!(mgr.bridge_count().await, 0);
        assert_eq!(mgr.total_participant_count().await, 0);
    }

    #[tokio::test]
    async fn tear_down_repairs_cascade_via_topology_strategy() {
        let (mgr, _registry, _clock) =
            manager_with_topology(Box::new(crate::cascade::topology::VisitorTopologyStrategy::new()));

        let core = Some("b1".to_string());
        let sat1 = Some("b2".to_string());
        let sat2 = Some("b3".to_string());

        {
            let mut state = mgr.state.lock().await;
            state.sessions.insert(core.clone(), BridgeSession::new("addr-b1", core.clone(), false));
            state.sessions.insert(sat1.clone(), BridgeSession::new("addr-b2", sat1.clone(), true));
            state.sessions.insert(sat2.clone(), BridgeSession::new("addr-b3", sat2.clone(), true));
            for relay in [&core, &sat1, &sat2] {
                state.sessions.get_mut(relay).unwrap().transition(SessionState::Allocated);
                state.sessions.get_mut(relay).unwrap().transition(SessionState::Active);
            }
            state.cascade.add_node_to_mesh(core.clone(), "0", None).unwrap();
            state.cascade.add_node_to_mesh(sat1.clone(), "1", Some(&core)).unwrap();
            state.cascade.add_node_to_mesh(sat2.clone(), "2", Some(&core)).unwrap();

            let (removed_address, requests) = mgr.tear_down_session_locked(&mut state, &core);
            assert_eq!(removed_address.as_deref(), Some("addr-b1"));

            let create_relay_pairs: Vec<(&str, &str)> = requests
                .iter()
                .filter_map(|r| match &r.descriptor {
                    RequestDescriptor::CreateRelay { .. } => Some((r.address.as_str(), "")),
                    _ => None,
                })
                .collect();
            assert_eq!(create_relay_pairs.len(), 2, "repair_mesh should splice sat1 and sat2 back together");
            let repaired_addresses: std::collections::HashSet<&str> =
                create_relay_pairs.iter().map(|(a, _)| *a).collect();
            assert!(repaired_addresses.contains("addr-b2"));
            assert!(repaired_addresses.contains("addr-b3"));

            let expire_relay_count = requests
                .iter()
                .filter(|r| matches!(r.descriptor, RequestDescriptor::ExpireRelay { .. }))
                .count();
            assert_eq!(expire_relay_count, 2, "both former neighbors of the removed core get an expireRelay");
        }
    }

    #[test]
    fn restart_rate_limiter_enforces_window_and_gap() {
        let clock = TestClock::new();
        let mut limiter = RestartRateLimiter::new();
        assert!(limiter.allow(clock.now()));
        limiter.record(clock.now());

        assert!(!limiter.allow(clock.now()), "min gap not yet elapsed");

        clock.advance(Duration::from_secs(10));
        assert!(limiter.allow(clock.now()));
        limiter.record(clock.now());

        clock.advance(Duration::from_secs(10));
        assert!(limiter.allow(clock.now()));
        limiter.record(clock.now());

        clock.advance(Duration::from_secs(10));
        assert!(!limiter.allow(clock.now()), "3 attempts already in the 60s window");

        clock.advance(Duration::from_secs(61));
        assert!(limiter.allow(clock.now()));
    }
}
