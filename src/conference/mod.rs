//! Conference-scoped session management (spec §4.G, §5).

pub mod manager;
pub mod session;

pub use manager::{Allocation, ConferenceSessionManager, RestartRateLimiter};
pub use session::{BridgeSession, SessionState};
