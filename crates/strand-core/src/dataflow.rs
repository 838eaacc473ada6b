// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Dataflow-side collaborator boundary.

use std::fmt;

use crate::document::{CommitKind, DocumentChange};
use crate::ident::{make_object_id, EntityRef, ObjectId};

/// Identifier of a dataflow graph (a definition or a nested cluster body).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct GraphId(pub ObjectId);

impl fmt::Display for GraphId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "graph:{}", self.0)
    }
}

/// Identifier of one node instance inside a graph.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct NodeId(pub ObjectId);

impl fmt::Display for NodeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "node:{}", self.0)
    }
}

/// Label-derived graph id.
pub fn make_graph_id(label: &str) -> GraphId {
    GraphId(make_object_id(&format!("graph/{label}")))
}

/// Label-derived node id.
pub fn make_node_id(label: &str) -> NodeId {
    NodeId(make_object_id(&format!("node/{label}")))
}

/// Who owns a graph.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum GraphOwner {
    /// Top-level definition.
    Root,
    /// Body of a cluster node living in another graph.
    Cluster {
        /// Graph the cluster node lives in.
        graph: GraphId,
        /// The cluster node itself.
        node: NodeId,
    },
    /// The graph lost its owner (closed, being deleted).
    Detached,
}

/// What a node knows about the persisted entities it references.
#[derive(Clone, Debug, PartialEq, Eq, Default)]
pub enum References {
    /// The node never references persisted entities.
    #[default]
    None,
    /// Its data flows in from upstream wires; upstream nodes own the reaction.
    Remote,
    /// It references entities but has nothing loaded yet.
    Blank,
    /// Currently loaded references.
    Loaded(Vec<EntityRef>),
}

/// Per-node state the router needs.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct NodeInfo {
    /// Node id.
    pub id: NodeId,
    /// Locked (disabled) nodes never react.
    pub locked: bool,
    /// Reference state.
    pub references: References,
}

impl NodeInfo {
    /// Unlocked node with the given references.
    #[must_use]
    pub fn new(id: NodeId, references: References) -> Self {
        Self {
            id,
            locked: false,
            references,
        }
    }
}

/// Default invalidation rule: a loaded reference into `change.document` was
/// deleted or modified. Added ids alone never invalidate.
#[must_use]
pub fn references_touched(node: &NodeInfo, change: &DocumentChange) -> bool {
    match &node.references {
        References::Loaded(refs) => refs
            .iter()
            .any(|r| r.document == change.document && change.touches(r.id)),
        References::None | References::Remote | References::Blank => false,
    }
}

/// The visual programming environment hosting the graphs.
pub trait DataflowHost {
    /// Every open graph, nested cluster bodies included.
    fn graphs(&self) -> Vec<GraphId>;

    /// Nodes of `graph`.
    fn nodes(&self, graph: GraphId) -> Vec<NodeInfo>;

    /// Asks a node whether `change` makes its output obsolete.
    ///
    /// Nodes with custom reactions override this; the default is
    /// [`references_touched`].
    fn requires_invalidation(&self, graph: GraphId, node: &NodeInfo, change: &DocumentChange) -> bool {
        let _ = graph;
        references_touched(node, change)
    }

    /// Marks a node stale so the next solution recomputes it.
    fn invalidate(&mut self, graph: GraphId, node: NodeId);

    /// Schedules a new solution of `graph`.
    fn request_recompute(&mut self, graph: GraphId, kind: CommitKind);

    /// Whether `graph` is currently permitted to solve.
    fn is_solving_enabled(&self, graph: GraphId) -> bool;

    /// Permits or forbids solving `graph`.
    fn set_solving_enabled(&mut self, graph: GraphId, enabled: bool);

    /// Ownership link used to resolve identity paths.
    fn owner_of(&self, graph: GraphId) -> GraphOwner;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ident::{DocumentId, EntityId};

    #[test]
    fn only_deleted_or_modified_loaded_references_touch() {
        let doc = DocumentId(1);
        let node = NodeInfo::new(
            make_node_id("n"),
            References::Loaded(vec![EntityRef::new(doc, EntityId(5))]),
        );

        let mut change = DocumentChange::new(doc, CommitKind::Committed);
        change.added.insert(EntityId(5));
        assert!(!references_touched(&node, &change));

        change.modified.insert(EntityId(5));
        assert!(references_touched(&node, &change));

        let mut other_doc = DocumentChange::new(DocumentId(2), CommitKind::Committed);
        other_doc.deleted.insert(EntityId(5));
        assert!(!references_touched(&node, &other_doc));
    }

    #[test]
    fn blank_and_remote_nodes_never_touch() {
        let doc = DocumentId(1);
        let mut change = DocumentChange::new(doc, CommitKind::Committed);
        change.deleted.insert(EntityId(1));
        for refs in [References::None, References::Remote, References::Blank] {
            assert!(!references_touched(&NodeInfo::new(make_node_id("n"), refs), &change));
        }
    }
}
