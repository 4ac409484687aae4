//! Bridge registry and health model (spec §4.A, §4.B, §4.H).

pub mod failure_detector;
pub mod model;
pub mod rate;
pub mod registry;

pub use failure_detector::BridgeFailureDetector;
pub use model::{Bridge, BridgeOrderKey, TelemetrySnapshot};
pub use registry::BridgeRegistry;
