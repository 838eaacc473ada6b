// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Identity paths and stream ids.

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::dataflow::{DataflowHost, GraphId, GraphOwner, NodeId};
use crate::ident::ObjectId;

/// Ordered identity chain of a dataflow slot ("authority").
///
/// Built from the consuming node up to the root graph, alternating
/// `(node-instance id, owning-graph id)`. Equality is ordered and
/// length-sensitive; two paths holding the same ids in a different order
/// are different namespaces.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdentityPath(Vec<ObjectId>);

impl IdentityPath {
    /// Wraps an explicit id chain.
    #[must_use]
    pub fn new(ids: Vec<ObjectId>) -> Self {
        Self(ids)
    }

    /// Resolves the path of `node` inside `graph` by walking cluster owners.
    ///
    /// Returns `None` when the chain is broken (a detached graph) or loops.
    pub fn resolve<F>(flow: &F, graph: GraphId, node: NodeId) -> Option<Self>
    where
        F: DataflowHost + ?Sized,
    {
        let mut ids = Vec::new();
        let mut seen = BTreeSet::new();
        let (mut graph, mut node) = (graph, node);
        loop {
            if !seen.insert(graph) {
                return None;
            }
            ids.push(node.0);
            ids.push(graph.0);
            match flow.owner_of(graph) {
                GraphOwner::Root => return Some(Self(ids)),
                GraphOwner::Cluster {
                    graph: parent,
                    node: cluster,
                } => {
                    graph = parent;
                    node = cluster;
                }
                GraphOwner::Detached => return None,
            }
        }
    }

    /// Borrow the ids.
    #[must_use]
    pub fn as_slice(&self) -> &[ObjectId] {
        &self.0
    }

    /// Number of ids in the chain.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Returns `true` for the empty chain.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl fmt::Display for IdentityPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, id) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str("/")?;
            }
            write!(f, "{id}")?;
        }
        Ok(())
    }
}

/// Identity path plus slot name: the namespace of one stream.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct StreamId {
    /// Owning slot's identity path.
    pub path: IdentityPath,
    /// Output/role name.
    pub slot: String,
}

impl StreamId {
    /// Constructs a stream id.
    pub fn new(path: IdentityPath, slot: impl Into<String>) -> Self {
        Self {
            path,
            slot: slot.into(),
        }
    }

    /// Resolves the stream id of `slot` on `node`.
    pub fn resolve<F>(flow: &F, graph: GraphId, node: NodeId, slot: &str) -> Option<Self>
    where
        F: DataflowHost + ?Sized,
    {
        IdentityPath::resolve(flow, graph, node).map(|path| Self::new(path, slot))
    }
}

impl fmt::Display for StreamId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{}", self.path, self.slot)
    }
}
