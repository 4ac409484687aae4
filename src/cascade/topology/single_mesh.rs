//! Single-mesh topology (spec §4.F): every bridge joins one flat mesh
//! tagged `"0"`. The default for deployments without a visitor feature.

use std::collections::HashSet;

use crate::cascade::graph::{Cascade, LinkRequest};
use crate::cascade::topology::{ConnectDecision, NodeClassifier, TopologyStrategy};

#[derive(Debug, Default)]
pub struct SingleMeshTopologyStrategy;

const MESH_ID: &str = "0";

impl TopologyStrategy for SingleMeshTopologyStrategy {
    fn connect_node(
        &self,
        cascade: &Cascade,
        _new_node: &Option<String>,
        _new_is_visitor: bool,
        _classifier: &dyn NodeClassifier,
    ) -> ConnectDecision {
        ConnectDecision {
            existing_node: cascade.node_ids().next().cloned(),
            mesh_id: MESH_ID.to_string(),
        }
    }

    fn repair_mesh(
        &self,
        _cascade: &Cascade,
        partitions: &[HashSet<Option<String>>],
        _classifier: &dyn NodeClassifier,
    ) -> Vec<LinkRequest> {
        // A single flat mesh is a complete graph; removing one member
        // can never split the rest, so this path is unreachable absent
        // a cascade invariant violation elsewhere.
        unreachable!(
            "single-mesh cascade split into {} partitions; this violates the complete-graph invariant",
            partitions.len()
        );
    }
}
