//! Visitor topology (spec §4.F): participant-class bridges share one
//! core mesh; visitor-class bridges each get a fresh satellite mesh
//! anchored at the best available core-proximate node. Produces a
//! visitor-tree shape around a participant core.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use crate::cascade::graph::{Cascade, LinkRequest};
use crate::cascade::topology::{ConnectDecision, NodeClassifier, TopologyStrategy};

const CORE_MESH_ID: &str = "0";

#[derive(Debug, Default)]
pub struct VisitorTopologyStrategy {
    next_mesh_id: AtomicU64,
}

impl VisitorTopologyStrategy {
    pub fn new() -> Self {
        Self {
            next_mesh_id: AtomicU64::new(1),
        }
    }

    fn fresh_mesh_id(&self) -> String {
        self.next_mesh_id.fetch_add(1, Ordering::Relaxed).to_string()
    }

    /// Best anchor among `candidates`, per spec §4.F preference order:
    /// minimum cascade-distance from any non-visitor, then same-region
    /// non-overloaded, then same-region, then non-overloaded, then any.
    fn best_anchor(
        &self,
        cascade: &Cascade,
        candidates: &[Option<String>],
        region: Option<&str>,
        classifier: &dyn NodeClassifier,
    ) -> Option<Option<String>> {
        if candidates.is_empty() {
            return None;
        }

        let distance_to_core = |id: &Option<String>| -> u32 {
            cascade
                .distance_from(id, |n| !classifier.is_visitor(n))
                .unwrap_or(u32::MAX)
        };

        let min_distance = candidates.iter().map(distance_to_core).min().unwrap_or(u32::MAX);
        let closest: Vec<Option<String>> = candidates
            .iter()
            .filter(|id| distance_to_core(id) == min_distance)
            .cloned()
            .collect();
        if closest.len() == 1 {
            return Some(closest[0].clone());
        }

        let same_region_not_overloaded = closest
            .iter()
            .find(|id| region.is_some() && classifier.region(id).as_deref() == region && !classifier.is_overloaded(id))
            .cloned();
        if let Some(found) = same_region_not_overloaded {
            return Some(found);
        }

        let same_region = closest
            .iter()
            .find(|id| region.is_some() && classifier.region(id).as_deref() == region)
            .cloned();
        if let Some(found) = same_region {
            return Some(found);
        }

        let not_overloaded = closest.iter().find(|id| !classifier.is_overloaded(id)).cloned();
        if let Some(found) = not_overloaded {
            return Some(found);
        }

        closest.into_iter().next()
    }
}

impl TopologyStrategy for VisitorTopologyStrategy {
    fn connect_node(
        &self,
        cascade: &Cascade,
        new_node: &Option<String>,
        new_is_visitor: bool,
        classifier: &dyn NodeClassifier,
    ) -> ConnectDecision {
        if !new_is_visitor {
            return ConnectDecision {
                existing_node: cascade.node_ids().next().cloned(),
                mesh_id: CORE_MESH_ID.to_string(),
            };
        }

        let candidates: Vec<Option<String>> = cascade
            .node_ids()
            .filter(|id| id != &new_node)
            .cloned()
            .collect();
        let region = classifier.region(new_node);
        let anchor = self.best_anchor(cascade, &candidates, region.as_deref(), classifier);
        ConnectDecision {
            existing_node: anchor,
            mesh_id: self.fresh_mesh_id(),
        }
    }

    fn repair_mesh(
        &self,
        cascade: &Cascade,
        partitions: &[HashSet<Option<String>>],
        classifier: &dyn NodeClassifier,
    ) -> Vec<LinkRequest> {
        let core_index = partitions
            .iter()
            .position(|p| p.iter().any(|id| !classifier.is_visitor(id)))
            .unwrap_or(0);
        let core_members: Vec<Option<String>> = partitions[core_index].iter().cloned().collect();

        let mut requests = Vec::new();
        for (i, partition) in partitions.iter().enumerate() {
            if i == core_index {
                continue;
            }
            let Some(entry) = partition.iter().next() else { continue };
            let region = classifier.region(entry);
            if let Some(anchor) = self.best_anchor(cascade, &core_members, region.as_deref(), classifier) {
                requests.push(LinkRequest {
                    a: anchor,
                    b: entry.clone(),
                    mesh_id: self.fresh_mesh_id(),
                });
            }
        }
        requests
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    struct FakeClassifier {
        visitors: HashSet<Option<String>>,
        regions: HashMap<Option<String>, String>,
        overloaded: HashSet<Option<String>>,
    }

    impl NodeClassifier for FakeClassifier {
        fn is_visitor(&self, relay_id: &Option<String>) -> bool {
            self.visitors.contains(relay_id)
        }
        fn region(&self, relay_id: &Option<String>) -> Option<String> {
            self.regions.get(relay_id).cloned()
        }
        fn is_overloaded(&self, relay_id: &Option<String>) -> bool {
            self.overloaded.contains(relay_id)
        }
    }

    fn id(s: &str) -> Option<String> {
        Some(s.to_string())
    }

    #[test]
    fn participant_class_attaches_to_core_mesh() {
        let mut cascade = Cascade::new();
        cascade.add_node_to_mesh(id("core1"), CORE_MESH_ID, None).unwrap();
        let strategy = VisitorTopologyStrategy::new();
        let classifier = FakeClassifier {
            visitors: HashSet::new(),
            regions: HashMap::new(),
            overloaded: HashSet::new(),
        };
        let decision = strategy.connect_node(&cascade, &id("core2"), false, &classifier);
        assert_eq!(decision.mesh_id, CORE_MESH_ID);
        assert_eq!(decision.existing_node, Some(id("core1")));
    }

    #[test]
    fn visitor_class_gets_fresh_mesh_anchored_at_core() {
        let mut cascade = Cascade::new();
        cascade.add_node_to_mesh(id("core1"), CORE_MESH_ID, None).unwrap();
        let strategy = VisitorTopologyStrategy::new();
        let classifier = FakeClassifier {
            visitors: HashSet::new(),
            regions: HashMap::new(),
            overloaded: HashSet::new(),
        };
        let decision = strategy.connect_node(&cascade, &id("sat1"), true, &classifier);
        assert_eq!(decision.mesh_id, "1");
        assert_eq!(decision.existing_node, Some(id("core1")));

        let second = strategy.connect_node(&cascade, &id("sat2"), true, &classifier);
        assert_eq!(second.mesh_id, "2", "each visitor attachment gets its own fresh mesh id");
    }

    #[test]
    fn repair_mesh_anchors_non_core_partitions_at_core() {
        let mut cascade = Cascade::new();
        cascade.add_node_to_mesh(id("core1"), CORE_MESH_ID, None).unwrap();
        let strategy = VisitorTopologyStrategy::new();
        let mut visitors = HashSet::new();
        visitors.insert(id("sat1"));
        let classifier = FakeClassifier {
            visitors,
            regions: HashMap::new(),
            overloaded: HashSet::new(),
        };
        let mut core_partition = HashSet::new();
        core_partition.insert(id("core1"));
        let mut satellite_partition = HashSet::new();
        satellite_partition.insert(id("sat1"));
        let partitions = vec![core_partition, satellite_partition];

        let requests = strategy.repair_mesh(&cascade, &partitions, &classifier);
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].a, id("core1"));
        assert_eq!(requests[0].b, id("sat1"));
    }
}
