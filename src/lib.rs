//! Bridge selection and cascade (multi-bridge graph) core for a
//! conferencing signaling service.
//!
//! This crate decides which media bridge a joining participant lands
//! on, tracks the bridges active in a conference, and keeps the
//! multi-bridge relay graph (the "cascade") connected as bridges come
//! and go. It does not speak any bridge-control wire protocol, serve an
//! HTTP/XMPP surface, or persist anything — those are the host's job,
//! plugged in through the trait boundaries in [`transport`].
//!
//! ## Layout
//!
//! - [`bridge`] — per-bridge state, load/health model, the bridge
//!   registry.
//! - [`selection`] — the strategy family that picks a bridge for a
//!   joining participant.
//! - [`cascade`] — the multi-bridge relay graph and the topology
//!   strategies that decide how new bridges attach to it.
//! - [`conference`] — per-conference session state and the
//!   `ConferenceSessionManager` entry point hosts call into.
//! - [`timers`] — the periodic sweeps (metrics refresh, load
//!   redistribution, single-participant timeout, presence staleness).
//! - [`transport`], [`events`], [`metrics`], [`clock`] — the seams a
//!   host plugs its own transport, event sink, metrics exporter and
//!   clock into.
//! - [`config`], [`error`] — configuration and the error taxonomy.

pub mod bridge;
pub mod cascade;
pub mod clock;
pub mod conference;
pub mod config;
pub mod error;
pub mod events;
pub mod metrics;
pub mod selection;
pub mod timers;
pub mod transport;

/// Common imports for a host embedding this crate.
pub mod prelude {
    pub use crate::bridge::{Bridge, BridgeFailureDetector, BridgeRegistry, TelemetrySnapshot};
    pub use crate::cascade::{Cascade, CascadeInvariantError, TopologyStrategy};
    pub use crate::clock::{Clock, SystemClock};
    pub use crate::conference::{Allocation, ConferenceSessionManager, RestartRateLimiter};
    pub use crate::config::CoreConfig;
    pub use crate::error::{CoreError, Result};
    pub use crate::events::{ConferenceEvent, RegistryEvent};
    pub use crate::metrics::MetricsRegistry;
    pub use crate::selection::{BridgeSelector, ParticipantProperties, SelectionStrategy};
    pub use crate::timers::{ConferenceDirectory, LifecycleTimers};
    pub use crate::transport::{BridgeControlTransport, HealthChecker, RequestDescriptor, TelemetrySource};
}
