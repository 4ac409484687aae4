//! `TopologyStrategy` family (spec §4.F): decides how a newly-allocated
//! bridge attaches to an in-progress cascade.
//!
//! Grounded on the same closed-variant-dispatch shape used by
//! [`crate::selection::strategy`]: a small trait with a couple of named
//! implementations chosen by configuration, rather than a class
//! hierarchy.

pub mod single_mesh;
pub mod visitor;

pub use single_mesh::SingleMeshTopologyStrategy;
pub use visitor::VisitorTopologyStrategy;

use std::collections::HashSet;

use crate::cascade::graph::{Cascade, LinkRequest};

/// Classifies cascade nodes by properties the cascade graph itself does
/// not track (visitor vs. participant class, region, load). Backed by
/// the conference's bridge registry/session map; kept as a trait so
/// [`crate::cascade`] stays free of any dependency on
/// [`crate::bridge`]/[`crate::conference`].
pub trait NodeClassifier {
    fn is_visitor(&self, relay_id: &Option<String>) -> bool;
    fn region(&self, relay_id: &Option<String>) -> Option<String>;
    fn is_overloaded(&self, relay_id: &Option<String>) -> bool;
}

/// The result of [`TopologyStrategy::connect_node`]: which existing
/// node to anchor to (if any — `None` only for the very first node) and
/// which mesh id the new link(s) belong to.
#[derive(Debug, Clone)]
pub struct ConnectDecision {
    pub existing_node: Option<Option<String>>,
    pub mesh_id: String,
}

pub trait TopologyStrategy: Send + Sync {
    /// Decide where `new_node` (marked `new_is_visitor`) should attach
    /// within `cascade` (spec §4.F `connectNode`).
    fn connect_node(
        &self,
        cascade: &Cascade,
        new_node: &Option<String>,
        new_is_visitor: bool,
        classifier: &dyn NodeClassifier,
    ) -> ConnectDecision;

    /// Propose new links to reconnect `partitions`, the connected
    /// components left behind after an articulation-point node was
    /// removed (spec §4.F `repairMesh`).
    fn repair_mesh(
        &self,
        cascade: &Cascade,
        partitions: &[HashSet<Option<String>>],
        classifier: &dyn NodeClassifier,
    ) -> Vec<LinkRequest>;
}
