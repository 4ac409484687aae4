//! Conference-scoped multi-bridge graph and the strategies that decide
//! how new bridges attach to it (spec §4.E, §4.F).

pub mod graph;
pub mod topology;

pub use graph::{Cascade, CascadeInvariantError, Link, LinkRequest, Node};
pub use topology::TopologyStrategy;
