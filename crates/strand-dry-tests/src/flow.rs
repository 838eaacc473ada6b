// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Scriptable [`DataflowHost`] that records what the router asked of it.

use std::collections::BTreeMap;

use strand_core::{
    make_graph_id, make_node_id, CommitKind, DataflowHost, EntityRef, GraphId, GraphOwner,
    NodeId, NodeInfo, References, StreamId,
};

#[derive(Debug)]
struct FakeGraph {
    owner: GraphOwner,
    nodes: Vec<NodeInfo>,
    solving: bool,
}

/// Graphs, nodes and a log of invalidations and recompute requests.
///
/// Graphs are built with [`FakeFlow::add_graph`] and
/// [`FakeFlow::add_cluster`]; node labels map to ids through
/// [`make_node_id`], so tests can refer to nodes by label.
#[derive(Debug, Default)]
pub struct FakeFlow {
    graphs: BTreeMap<GraphId, FakeGraph>,
    invalidations: Vec<(GraphId, NodeId)>,
    recomputes: Vec<(GraphId, CommitKind)>,
}

impl FakeFlow {
    /// Flow with no graphs.
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a top-level graph with solving enabled.
    pub fn add_graph(&mut self, label: &str) -> GraphId {
        let graph = make_graph_id(label);
        self.graphs.insert(
            graph,
            FakeGraph {
                owner: GraphOwner::Root,
                nodes: Vec::new(),
                solving: true,
            },
        );
        graph
    }

    /// Adds a cluster node labelled `node` to `parent` and a body graph
    /// labelled `body` owned by it.
    pub fn add_cluster(&mut self, parent: GraphId, node: &str, body: &str) -> (NodeId, GraphId) {
        let node = self.add_node(parent, node, References::None);
        let body = make_graph_id(body);
        self.graphs.insert(
            body,
            FakeGraph {
                owner: GraphOwner::Cluster {
                    graph: parent,
                    node,
                },
                nodes: Vec::new(),
                solving: true,
            },
        );
        (node, body)
    }

    /// Adds a node to `graph`. Unknown graphs are ignored.
    pub fn add_node(&mut self, graph: GraphId, label: &str, references: References) -> NodeId {
        let id = make_node_id(label);
        if let Some(g) = self.graphs.get_mut(&graph) {
            g.nodes.push(NodeInfo::new(id, references));
        }
        id
    }

    /// Adds a node whose loaded references are `refs`.
    pub fn add_referencing_node(&mut self, graph: GraphId, label: &str, refs: &[EntityRef]) -> NodeId {
        self.add_node(graph, label, References::Loaded(refs.to_vec()))
    }

    fn node_mut(&mut self, graph: GraphId, node: NodeId) -> Option<&mut NodeInfo> {
        self.graphs
            .get_mut(&graph)?
            .nodes
            .iter_mut()
            .find(|n| n.id == node)
    }

    /// Replaces a node's reference state.
    pub fn set_references(&mut self, graph: GraphId, node: NodeId, references: References) {
        if let Some(n) = self.node_mut(graph, node) {
            n.references = references;
        }
    }

    /// Locks or unlocks a node.
    pub fn set_locked(&mut self, graph: GraphId, node: NodeId, locked: bool) {
        if let Some(n) = self.node_mut(graph, node) {
            n.locked = locked;
        }
    }

    /// Cuts `graph` off its owner, as closing its definition would.
    pub fn detach(&mut self, graph: GraphId) {
        if let Some(g) = self.graphs.get_mut(&graph) {
            g.owner = GraphOwner::Detached;
        }
    }

    /// Stream id of `slot` on `node`, if the node's graph is attached.
    pub fn stream_id(&self, graph: GraphId, node: NodeId, slot: &str) -> Option<StreamId> {
        StreamId::resolve(self, graph, node, slot)
    }

    /// Every invalidation so far, in order.
    pub fn invalidations(&self) -> &[(GraphId, NodeId)] {
        &self.invalidations
    }

    /// Every recompute request so far, in order.
    pub fn recomputes(&self) -> &[(GraphId, CommitKind)] {
        &self.recomputes
    }

    /// Clears both logs.
    pub fn clear_log(&mut self) {
        self.invalidations.clear();
        self.recomputes.clear();
    }
}

impl DataflowHost for FakeFlow {
    fn graphs(&self) -> Vec<GraphId> {
        self.graphs.keys().copied().collect()
    }

    fn nodes(&self, graph: GraphId) -> Vec<NodeInfo> {
        self.graphs
            .get(&graph)
            .map(|g| g.nodes.clone())
            .unwrap_or_default()
    }

    fn invalidate(&mut self, graph: GraphId, node: NodeId) {
        self.invalidations.push((graph, node));
    }

    fn request_recompute(&mut self, graph: GraphId, kind: CommitKind) {
        self.recomputes.push((graph, kind));
    }

    fn is_solving_enabled(&self, graph: GraphId) -> bool {
        self.graphs.get(&graph).is_some_and(|g| g.solving)
    }

    fn set_solving_enabled(&mut self, graph: GraphId, enabled: bool) {
        if let Some(g) = self.graphs.get_mut(&graph) {
            g.solving = enabled;
        }
    }

    fn owner_of(&self, graph: GraphId) -> GraphOwner {
        self.graphs
            .get(&graph)
            .map_or(GraphOwner::Detached, |g| g.owner)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn cluster_bodies_resolve_through_their_owner() {
        let mut flow = FakeFlow::new();
        let root = flow.add_graph("root");
        let (_, body) = flow.add_cluster(root, "cluster", "body");
        let node = flow.add_node(body, "wall", References::None);

        let id = flow.stream_id(body, node, "Out").unwrap();
        assert_eq!(id.path.len(), 4);

        flow.detach(root);
        assert!(flow.stream_id(body, node, "Out").is_none());
    }

    #[test]
    fn solving_toggles_per_graph() {
        let mut flow = FakeFlow::new();
        let a = flow.add_graph("a");
        let b = flow.add_graph("b");
        flow.set_solving_enabled(a, false);
        assert!(!flow.is_solving_enabled(a));
        assert!(flow.is_solving_enabled(b));
        assert!(!flow.is_solving_enabled(make_graph_id("missing")));
    }
}
