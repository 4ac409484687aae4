//! `Cascade`: a conference-scoped multi-bridge graph (spec §3, §4.E).
//!
//! No direct teacher analog exists (`call-engine`'s "bridge" is a 2/3-way
//! SIP bridge, not a media relay mesh); structured as a plain
//! `HashMap`-backed adjacency graph, matching the data model's own
//! description and the teacher's general preference for in-memory
//! `HashMap`/`DashMap` structures over a dedicated graph crate.

use std::collections::{HashMap, HashSet, VecDeque};

/// A link from one node to a peer, tagged with the mesh it belongs to.
/// `relay_id` mirrors the map key it is stored under (spec §3 invariant
/// 2) — kept as a field rather than derived so `validate` can check the
/// invariant rather than assume it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Link {
    pub relay_id: Option<String>,
    pub mesh_id: Option<String>,
}

/// One bridge's position in the cascade: its relay id and the set of
/// peers it is directly linked to.
#[derive(Debug, Clone, Default)]
pub struct Node {
    pub relay_id: Option<String>,
    pub links: HashMap<Option<String>, Link>,
}

impl Node {
    pub fn new(relay_id: Option<String>) -> Self {
        Self {
            relay_id,
            links: HashMap::new(),
        }
    }
}

/// A new link request produced by a topology strategy's `repair_mesh`
/// (spec §4.E `removeNode` step 4).
#[derive(Debug, Clone)]
pub struct LinkRequest {
    pub a: Option<String>,
    pub b: Option<String>,
    pub mesh_id: String,
}

/// Invariant violations reported by [`Cascade::validate`] (spec §3.1–3.7).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CascadeInvariantError {
    #[error("node {0:?} has a self-loop")]
    SelfLoop(Option<String>),
    #[error("link key {key:?} does not match link.relay_id {relay_id:?} on node {node:?}")]
    LinkKeyMismatch {
        node: Option<String>,
        key: Option<String>,
        relay_id: Option<String>,
    },
    #[error("link {from:?} -> {to:?} has no matching reverse link")]
    MissingReverseLink {
        from: Option<String>,
        to: Option<String>,
    },
    #[error("link {from:?} <-> {to:?} has mismatched mesh ids")]
    MeshIdMismatch {
        from: Option<String>,
        to: Option<String>,
    },
    #[error("mesh {mesh_id:?} is not a complete graph over its members")]
    IncompleteMesh { mesh_id: Option<String> },
    #[error("cascade is disconnected: {0:?} is unreachable from the root")]
    Disconnected(Option<String>),
    #[error("multiple distinct simple paths between {a:?} and {b:?} outside any shared mesh")]
    MultiplePaths {
        a: Option<String>,
        b: Option<String>,
    },
}

/// A conference-scoped graph of bridges connected for media relay
/// (spec §3 "Cascade", §4.E).
///
/// Operations are purely structural: `Cascade` has no knowledge of
/// selection, transport, or sessions — those live in
/// [`crate::conference`].
#[derive(Debug, Default, Clone)]
pub struct Cascade {
    sessions: HashMap<Option<String>, Node>,
}

impl Cascade {
    pub fn new() -> Self {
        Self {
            sessions: HashMap::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn contains(&self, relay_id: &Option<String>) -> bool {
        self.sessions.contains_key(relay_id)
    }

    pub fn node(&self, relay_id: &Option<String>) -> Option<&Node> {
        self.sessions.get(relay_id)
    }

    pub fn node_ids(&self) -> impl Iterator<Item = &Option<String>> {
        self.sessions.keys()
    }

    fn link(&mut self, a: Option<String>, b: Option<String>, mesh_id: Option<String>) {
        self.sessions
            .entry(a.clone())
            .or_insert_with(|| Node::new(a.clone()))
            .links
            .insert(
                b.clone(),
                Link {
                    relay_id: b.clone(),
                    mesh_id: mesh_id.clone(),
                },
            );
        self.sessions
            .entry(b.clone())
            .or_insert_with(|| Node::new(b.clone()))
            .links
            .insert(a.clone(), Link { relay_id: a, mesh_id });
    }

    /// Insert `new_node` into the cascade under `mesh_id`, anchored at
    /// `existing_node` where required (spec §4.E `addNodeToMesh`).
    ///
    /// - Empty cascade: `new_node` becomes the sole node; `mesh_id` is
    ///   ignored.
    /// - Single existing node: linked to `new_node` on `mesh_id`; if
    ///   `existing_node` is supplied it must name that sole node.
    /// - Otherwise, let `members` be the nodes already carrying a link
    ///   tagged `mesh_id`. If `members` is empty, `existing_node` is
    ///   required and must already be in the cascade; only that single
    ///   link is created (anchors a new mesh off an existing node). If
    ///   `members` is non-empty, `new_node` is linked to every member
    ///   (grows an existing full mesh) — `existing_node`, if supplied,
    ///   is not independently verified to be a member (spec §9 Open
    ///   Question, preserved as observed).
    pub fn add_node_to_mesh(
        &mut self,
        new_node: Option<String>,
        mesh_id: &str,
        existing_node: Option<&Option<String>>,
    ) -> Result<(), String> {
        if self.sessions.is_empty() {
            self.sessions
                .insert(new_node.clone(), Node::new(new_node));
            return Ok(());
        }

        if self.sessions.len() == 1 {
            let sole = self.sessions.keys().next().cloned().expect("len checked above");
            if let Some(existing) = existing_node {
                if existing != &sole {
                    return Err(format!(
                        "existing_node {existing:?} does not match the sole cascade member {sole:?}"
                    ));
                }
            }
            self.link(sole, new_node, Some(mesh_id.to_string()));
            return Ok(());
        }

        let members = self.mesh_members(mesh_id);
        if members.is_empty() {
            let anchor = existing_node
                .ok_or_else(|| "existing_node is required to anchor a new mesh".to_string())?
                .clone();
            if !self.sessions.contains_key(&anchor) {
                return Err(format!("existing_node {anchor:?} is not in the cascade"));
            }
            self.link(anchor, new_node, Some(mesh_id.to_string()));
        } else {
            for member in members {
                self.link(member, new_node.clone(), Some(mesh_id.to_string()));
            }
        }
        Ok(())
    }

    fn mesh_members(&self, mesh_id: &str) -> Vec<Option<String>> {
        self.sessions
            .iter()
            .filter(|(_, node)| node.links.values().any(|l| l.mesh_id.as_deref() == Some(mesh_id)))
            .map(|(id, _)| id.clone())
            .collect()
    }

    /// Remove `n` and repair any mesh it was bridging, calling
    /// `repair_fn` when `n` was an articulation point between more than
    /// one mesh (spec §4.E `removeNode`).
    ///
    /// `on_remove_link` is invoked once per peer, mirroring the
    /// `removeLinkTo(p, n)` hook so callers can expire per-bridge relay
    /// state; `repair_fn` receives the cascade (already missing `n`) and
    /// the set of now-disconnected partitions, returning the new links
    /// to apply.
    pub fn remove_node(
        &mut self,
        n: &Option<String>,
        mut on_remove_link: impl FnMut(&Option<String>, &Option<String>),
        repair_fn: impl FnOnce(&Cascade, &[HashSet<Option<String>>]) -> Vec<LinkRequest>,
    ) {
        let Some(node) = self.sessions.remove(n) else {
            return;
        };

        let mut mesh_ids: HashSet<Option<String>> = HashSet::new();
        for (peer, link) in &node.links {
            if let Some(peer_node) = self.sessions.get_mut(peer) {
                peer_node.links.remove(n);
            }
            on_remove_link(peer, n);
            mesh_ids.insert(link.mesh_id.clone());
        }

        if mesh_ids.len() > 1 {
            let partitions = self.partitions_behind_removed(&node);
            let requests = repair_fn(self, &partitions);
            for req in requests {
                self.link(req.a, req.b, Some(req.mesh_id));
            }
        }
    }

    /// The connected components reachable from each of `removed`'s
    /// former peers, in the graph with `removed` already gone.
    fn partitions_behind_removed(&self, removed: &Node) -> Vec<HashSet<Option<String>>> {
        let mut seen: HashSet<Option<String>> = HashSet::new();
        let mut partitions = Vec::new();
        for peer in removed.links.keys() {
            if seen.contains(peer) || !self.sessions.contains_key(peer) {
                continue;
            }
            let component = self.connected_component(peer);
            seen.extend(component.iter().cloned());
            partitions.push(component);
        }
        partitions
    }

    fn connected_component(&self, start: &Option<String>) -> HashSet<Option<String>> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::new();
        queue.push_back(start.clone());
        visited.insert(start.clone());
        while let Some(current) = queue.pop_front() {
            if let Some(node) = self.sessions.get(&current) {
                for peer in node.links.keys() {
                    if visited.insert(peer.clone()) {
                        queue.push_back(peer.clone());
                    }
                }
            }
        }
        visited
    }

    /// Nodes reachable from `toward`, entering from `from`, treating
    /// same-mesh peers of the entry link as co-reachable (spec §4.E
    /// `getNodesBehind`): a DFS from `toward` that only crosses links
    /// whose `mesh_id` differs from the entry link's `mesh_id`.
    pub fn nodes_behind(&self, from: &Option<String>, toward: &Option<String>) -> HashSet<Option<String>> {
        let entry_mesh = self
            .sessions
            .get(from)
            .and_then(|n| n.links.get(toward))
            .and_then(|l| l.mesh_id.clone());

        let mut visited = HashSet::new();
        let mut stack = vec![toward.clone()];
        visited.insert(toward.clone());
        while let Some(current) = stack.pop() {
            let Some(node) = self.sessions.get(&current) else { continue };
            for (peer, link) in &node.links {
                if peer == from && current == *toward {
                    continue;
                }
                if link.mesh_id == entry_mesh {
                    continue;
                }
                if visited.insert(peer.clone()) {
                    stack.push(peer.clone());
                }
            }
        }
        visited
    }

    /// First DFS-discovered hop-distance from `start` to a node
    /// satisfying `predicate`; not guaranteed shortest across multiple
    /// mesh-spanning paths (spec §4.E `getDistanceFrom`, §9). `None` if
    /// no reachable node satisfies `predicate`.
    pub fn distance_from(&self, start: &Option<String>, predicate: impl Fn(&Option<String>) -> bool) -> Option<u32> {
        let mut visited = HashSet::new();
        visited.insert(start.clone());
        let mut stack = vec![(start.clone(), 0u32)];
        while let Some((current, depth)) = stack.pop() {
            if predicate(&current) {
                return Some(depth);
            }
            if let Some(node) = self.sessions.get(&current) {
                for peer in node.links.keys() {
                    if visited.insert(peer.clone()) {
                        stack.push((peer.clone(), depth + 1));
                    }
                }
            }
        }
        None
    }

    /// Visit every node reachable from `root` exactly once, calling
    /// `cb(node, parent)` with `parent = None` for the root (spec §4.E
    /// `getPathsFrom`).
    pub fn paths_from(&self, root: &Option<String>, mut cb: impl FnMut(&Option<String>, Option<&Option<String>>)) {
        if !self.sessions.contains_key(root) {
            return;
        }
        let mut visited = HashSet::new();
        visited.insert(root.clone());
        let mut queue = VecDeque::new();
        queue.push_back((root.clone(), None::<Option<String>>));
        while let Some((current, parent)) = queue.pop_front() {
            cb(&current, parent.as_ref());
            if let Some(node) = self.sessions.get(&current) {
                for peer in node.links.keys() {
                    if visited.insert(peer.clone()) {
                        queue.push_back((peer.clone(), Some(current.clone())));
                    }
                }
            }
        }
    }

    /// Check every invariant in spec §3.1–§3.7 via a single DFS with a
    /// visited set; redundant paths are only tolerated when fully
    /// contained in one validated mesh.
    pub fn validate(&self) -> Result<(), CascadeInvariantError> {
        for (id, node) in &self.sessions {
            for (key, link) in &node.links {
                if key == id {
                    return Err(CascadeInvariantError::SelfLoop(id.clone()));
                }
                if &link.relay_id != key {
                    return Err(CascadeInvariantError::LinkKeyMismatch {
                        node: id.clone(),
                        key: key.clone(),
                        relay_id: link.relay_id.clone(),
                    });
                }
                let Some(peer) = self.sessions.get(key) else {
                    return Err(CascadeInvariantError::MissingReverseLink {
                        from: id.clone(),
                        to: key.clone(),
                    });
                };
                let Some(reverse) = peer.links.get(id) else {
                    return Err(CascadeInvariantError::MissingReverseLink {
                        from: id.clone(),
                        to: key.clone(),
                    });
                };
                if reverse.mesh_id != link.mesh_id {
                    return Err(CascadeInvariantError::MeshIdMismatch {
                        from: id.clone(),
                        to: key.clone(),
                    });
                }
            }
        }

        let mesh_ids: HashSet<Option<String>> = self
            .sessions
            .values()
            .flat_map(|n| n.links.values().map(|l| l.mesh_id.clone()))
            .collect();
        for mesh_id in mesh_ids.iter().flatten() {
            let members = self.mesh_members(mesh_id);
            for a in &members {
                for b in &members {
                    if a == b {
                        continue;
                    }
                    let linked = self
                        .sessions
                        .get(a)
                        .map(|n| n.links.contains_key(b))
                        .unwrap_or(false);
                    if !linked {
                        return Err(CascadeInvariantError::IncompleteMesh {
                            mesh_id: Some(mesh_id.clone()),
                        });
                    }
                }
            }
        }

        if let Some(root) = self.sessions.keys().next() {
            let reachable = self.connected_component(root);
            for id in self.sessions.keys() {
                if !reachable.contains(id) {
                    return Err(CascadeInvariantError::Disconnected(id.clone()));
                }
            }
        }

        self.validate_treeness()
    }

    /// Invariant 7: between any two nodes, exactly one simple path, or
    /// the redundant paths are confined to one validated mesh. Checked
    /// by counting non-mesh-internal edges against a spanning-tree
    /// bound: collapsing each mesh to a single node, the remainder must
    /// form a tree (edges = nodes - 1, connected).
    fn validate_treeness(&self) -> Result<(), CascadeInvariantError> {
        let mesh_of_link = |from: &Option<String>, to: &Option<String>| -> Option<String> {
            self.sessions
                .get(from)
                .and_then(|n| n.links.get(to))
                .and_then(|l| l.mesh_id.clone())
        };

        let mut collapsed_edges: HashSet<(Option<String>, Option<String>)> = HashSet::new();
        for (id, node) in &self.sessions {
            for peer in node.links.keys() {
                let mesh = mesh_of_link(id, peer);
                let same_mesh_as_peer_group = mesh
                    .as_ref()
                    .map(|m| {
                        let members = self.mesh_members(m);
                        members.contains(id) && members.contains(peer)
                    })
                    .unwrap_or(false);
                if same_mesh_as_peer_group {
                    continue;
                }
                let key = if id <= peer {
                    (id.clone(), peer.clone())
                } else {
                    (peer.clone(), id.clone())
                };
                collapsed_edges.insert(key);
            }
        }

        let mesh_representatives: HashMap<Option<String>, Option<String>> = {
            let mut map = HashMap::new();
            let meshes: HashSet<Option<String>> = self
                .sessions
                .values()
                .flat_map(|n| n.links.values().map(|l| l.mesh_id.clone()))
                .collect();
            for mesh_id in meshes.into_iter().flatten() {
                let members = self.mesh_members(&mesh_id);
                if let Some(rep) = members.first() {
                    for m in &members {
                        map.insert(m.clone(), rep.clone());
                    }
                }
            }
            map
        };
        let collapse = |id: &Option<String>| mesh_representatives.get(id).cloned().unwrap_or_else(|| id.clone());

        let mut collapsed_nodes: HashSet<Option<String>> = HashSet::new();
        let mut tree_edges: HashSet<(Option<String>, Option<String>)> = HashSet::new();
        for id in self.sessions.keys() {
            collapsed_nodes.insert(collapse(id));
        }
        for (a, b) in &collapsed_edges {
            let ca = collapse(a);
            let cb = collapse(b);
            if ca == cb {
                continue;
            }
            let key = if ca <= cb { (ca, cb) } else { (cb, ca) };
            tree_edges.insert(key);
        }

        if collapsed_nodes.len() > 1 && tree_edges.len() != collapsed_nodes.len() - 1 {
            return Err(CascadeInvariantError::MultiplePaths { a: None, b: None });
        }
        Ok(())
    }
}
