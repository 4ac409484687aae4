//! Consumed external interfaces (spec §6.1–6.3): the seams a host
//! implements to plug a real bridge-control transport, telemetry feed
//! and health checker into the core.
//!
//! Grounded on `orchestrator/handler.rs`'s `CallCenterCallHandler`,
//! which implements a session-core-defined trait as the boundary
//! between orchestration logic and the media/signaling layer — the same
//! shape, generalized to the three interfaces spec §6 names. `Clock`
//! (spec §6.4) lives in [`crate::clock`].

use async_trait::async_trait;

use crate::bridge::TelemetrySnapshot;
use crate::error::Result;

/// One outbound request the core may issue against a bridge (spec
/// §6.1). The core does not mandate a wire format; a host's
/// [`BridgeControlTransport`] impl is responsible for encoding this
/// descriptor and decoding the response.
#[derive(Debug, Clone)]
pub enum RequestDescriptor {
    AllocateEndpoint {
        endpoint_id: String,
        create: bool,
        expire: bool,
        sources: Vec<String>,
        sctp: Option<bool>,
        capabilities: Vec<String>,
    },
    UpdateEndpoint {
        endpoint_id: String,
        transport: Option<serde_json::Value>,
        sources: Option<Vec<String>>,
        initial_last_n: Option<i32>,
    },
    ExpireEndpoint {
        endpoint_id: String,
    },
    CreateRelay {
        peer_relay_id: String,
        participants: Vec<String>,
        initiator: bool,
        mesh_id: String,
    },
    ExpireRelay {
        peer_relay_id: String,
    },
    UpdateRemoteParticipant {
        peer_relay_id: String,
        participant_id: String,
        sources: Vec<String>,
        create: bool,
    },
    ExpireRemoteParticipants {
        ids: Vec<String>,
        peer_relay_id: String,
    },
    MuteForce {
        ids: Vec<String>,
        audio: bool,
        video: bool,
    },
}

/// Opaque response payload; the core inspects only what each call site
/// needs via the caller-supplied accessor, never the wire shape.
pub type TransportResponse = serde_json::Value;

/// Sends requests to bridges and awaits their responses (spec §6.1).
///
/// Implementations must translate their own transport errors into
/// [`crate::error::CoreError`] before returning — the core's error
/// taxonomy (§7) intentionally does not include a variant for
/// unclassified transport failures.
#[async_trait]
pub trait BridgeControlTransport: Send + Sync {
    async fn send_request(
        &self,
        bridge_address: &str,
        request: RequestDescriptor,
    ) -> Result<TransportResponse>;
}

/// An inbound stream of telemetry pushes (spec §6.2).
#[async_trait]
pub trait TelemetrySource: Send + Sync {
    /// Await the next `(bridge_address, snapshot)` push, or `None` if
    /// the source has permanently closed.
    async fn next_update(&mut self) -> Option<(String, TelemetrySnapshot)>;
}

/// The outcome of one health probe against a bridge (spec §4.B, §6.3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HealthOutcome {
    Passed,
    Failed,
    TimedOut,
}

/// Probes a bridge's health; the result is fed into
/// [`crate::bridge::registry::BridgeRegistry`]'s `health_passed` /
/// `health_failed` / `health_timed_out` (spec §6.3).
#[async_trait]
pub trait HealthChecker: Send + Sync {
    async fn check(&self, bridge_address: &str) -> HealthOutcome;
}
