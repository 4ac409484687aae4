//! Error taxonomy for the bridge selection and cascade core (spec §7).

use thiserror::Error;

/// Errors the core can surface to its host.
///
/// The core never leaks raw transport errors (§7 "Propagation policy") —
/// the host is expected to normalize whatever its transport layer threw
/// into one of these before the core sees it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// No candidate bridge could be selected for this participant.
    /// Non-retryable until the fleet changes.
    #[error("no bridge available for selection: {0}")]
    SelectionUnavailable(String),

    /// An external request did not complete within its bound. Retryable.
    #[error("request to bridge timed out: {0}")]
    TimeoutNoResponse(String),

    /// The core sent a request the bridge rejected syntactically.
    /// Not retryable — retrying repeats the same failure.
    #[error("bad request rejected by bridge: {0}")]
    BadRequest(String),

    /// The bridge reports no such conference. Retryable by eviction +
    /// re-invite.
    #[error("conference not found on bridge: {0}")]
    ConferenceNotFound(String),

    /// The bridge reports the conference already exists. Retryable by
    /// eviction + re-invite.
    #[error("conference already exists on bridge: {0}")]
    ConferenceAlreadyExists(String),

    /// The bridge declared graceful shutdown mid-request. Retryable on
    /// another bridge.
    #[error("bridge entered graceful shutdown: {0}")]
    GracefulShutdown(String),

    /// Transient bridge-side failure. Retryable.
    #[error("bridge service unavailable: {0}")]
    BridgeServiceUnavailable(String),

    /// Detected during post-wait re-verification: the session is gone.
    /// The caller has already been notified; drop silently.
    #[error("session no longer active: {0}")]
    SessionGone(String),

    /// Detected during post-wait re-verification: the participant is
    /// gone. Drop silently.
    #[error("participant no longer active: {0}")]
    ParticipantGone(String),

    /// Caller-supplied input failed validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Requested entity does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Anything else that does not fit the taxonomy above.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    pub fn selection_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::SelectionUnavailable(msg.into())
    }

    pub fn timeout<S: Into<String>>(msg: S) -> Self {
        Self::TimeoutNoResponse(msg.into())
    }

    pub fn bad_request<S: Into<String>>(msg: S) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn conference_not_found<S: Into<String>>(msg: S) -> Self {
        Self::ConferenceNotFound(msg.into())
    }

    pub fn conference_already_exists<S: Into<String>>(msg: S) -> Self {
        Self::ConferenceAlreadyExists(msg.into())
    }

    pub fn graceful_shutdown<S: Into<String>>(msg: S) -> Self {
        Self::GracefulShutdown(msg.into())
    }

    pub fn bridge_service_unavailable<S: Into<String>>(msg: S) -> Self {
        Self::BridgeServiceUnavailable(msg.into())
    }

    pub fn session_gone<S: Into<String>>(msg: S) -> Self {
        Self::SessionGone(msg.into())
    }

    pub fn participant_gone<S: Into<String>>(msg: S) -> Self {
        Self::ParticipantGone(msg.into())
    }

    pub fn invalid_input<S: Into<String>>(msg: S) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn not_found<S: Into<String>>(msg: S) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }

    /// Whether the host should retry `allocate` (on this or another
    /// bridge) after seeing this error. Per §7 retries are never
    /// automatic inside `allocate` — the host decides based on this.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::TimeoutNoResponse(_)
                | Self::ConferenceNotFound(_)
                | Self::ConferenceAlreadyExists(_)
                | Self::GracefulShutdown(_)
                | Self::BridgeServiceUnavailable(_)
        )
    }
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
