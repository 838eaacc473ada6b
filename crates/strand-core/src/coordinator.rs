// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Transaction group coordination.
//!
//! Each outermost recomputation cycle is bracketed in one host transaction
//! group per editable document, so everything the cycle did becomes a
//! single undo step. Nested cycles push a frame keyed by their graph and
//! never open a second group on a document an outer frame already covers.

use std::collections::BTreeSet;

use thiserror::Error;
use tracing::{debug, warn};

use crate::dataflow::GraphId;
use crate::document::{DocumentHost, GroupId, HostError};
use crate::ident::DocumentId;

/// Coordinator state machine.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum CoordinatorState {
    /// No cycle in progress.
    #[default]
    Idle,
    /// Groups are being opened.
    Opening,
    /// Producers run inside the open groups.
    Active,
    /// Groups are being merged.
    Assimilating,
}

/// Errors from misuse of the cycle bracket.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CoordinatorError {
    /// `end_cycle` was called for a graph that is not the innermost frame.
    #[error("cycle for {found} ended while {expected} is innermost")]
    NotInnermost {
        /// Innermost frame's graph.
        expected: GraphId,
        /// Graph passed to `end_cycle`.
        found: GraphId,
    },
    /// `end_cycle` was called with no cycle in progress.
    #[error("no cycle in progress for {0}")]
    NoActiveCycle(GraphId),
}

/// Outcome of closing one cycle's groups.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct AssimilationReport {
    /// Documents whose group merged, in closing order.
    pub merged: Vec<DocumentId>,
    /// Documents whose group could not be merged, with the host's reason.
    pub failed: Vec<(DocumentId, HostError)>,
}

impl AssimilationReport {
    /// Number of groups closed, successfully or not.
    #[must_use]
    pub fn closed(&self) -> usize {
        self.merged.len() + self.failed.len()
    }
}

#[derive(Debug)]
struct Frame {
    graph: GraphId,
    groups: Vec<(DocumentId, GroupId)>,
}

/// Stack of per-cycle group frames.
#[derive(Debug, Default)]
pub struct GroupCoordinator {
    frames: Vec<Frame>,
    state: CoordinatorState,
}

impl GroupCoordinator {
    /// Idle coordinator.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> CoordinatorState {
        self.state
    }

    /// Nesting depth.
    #[must_use]
    pub fn depth(&self) -> usize {
        self.frames.len()
    }

    /// Documents covered by any open frame.
    #[must_use]
    pub fn covered(&self) -> BTreeSet<DocumentId> {
        self.frames
            .iter()
            .flat_map(|f| f.groups.iter().map(|(doc, _)| *doc))
            .collect()
    }

    /// Opens a frame for `graph`, beginning a group named `name` on every
    /// eligible document. Returns the documents a group was opened on.
    ///
    /// Eligible: not linked, not read-only, not already modified by
    /// something else, and not covered by an enclosing frame. A document
    /// whose group cannot be started is logged and left out.
    pub fn begin_cycle<H>(&mut self, host: &mut H, graph: GraphId, name: &str) -> Vec<DocumentId>
    where
        H: DocumentHost + ?Sized,
    {
        self.state = CoordinatorState::Opening;
        let covered = self.covered();
        let mut groups = Vec::new();
        for document in host.document_ids() {
            if covered.contains(&document) {
                continue;
            }
            let Some(doc) = host.document_mut(document) else {
                continue;
            };
            if doc.is_linked() || doc.is_read_only() || doc.is_modified() {
                continue;
            }
            match doc.begin_group(name) {
                Ok(group) => groups.push((document, group)),
                Err(err) => warn!(%document, %err, "could not start transaction group"),
            }
        }
        let opened: Vec<DocumentId> = groups.iter().map(|(doc, _)| *doc).collect();
        debug!(%graph, depth = self.frames.len() + 1, groups = opened.len(), "cycle groups opened");
        self.frames.push(Frame { graph, groups });
        self.state = CoordinatorState::Active;
        opened
    }

    /// Closes the innermost frame, merging its groups in reverse order.
    ///
    /// Merge failures are logged and reported; every remaining group is
    /// still closed and nothing is rolled back.
    ///
    /// # Errors
    /// [`CoordinatorError`] if `graph` does not own the innermost frame.
    pub fn end_cycle<H>(&mut self, host: &mut H, graph: GraphId) -> Result<AssimilationReport, CoordinatorError>
    where
        H: DocumentHost + ?Sized,
    {
        match self.frames.last() {
            None => return Err(CoordinatorError::NoActiveCycle(graph)),
            Some(frame) if frame.graph != graph => {
                return Err(CoordinatorError::NotInnermost {
                    expected: frame.graph,
                    found: graph,
                })
            }
            Some(_) => {}
        }
        let Some(frame) = self.frames.pop() else {
            return Err(CoordinatorError::NoActiveCycle(graph));
        };

        self.state = CoordinatorState::Assimilating;
        let mut report = AssimilationReport::default();
        for (document, group) in frame.groups.into_iter().rev() {
            let result = host
                .document_mut(document)
                .ok_or(HostError::UnknownDocument(document))
                .and_then(|doc| doc.assimilate_group(group));
            match result {
                Ok(()) => report.merged.push(document),
                Err(err) => {
                    warn!(%document, %group, %err, "transaction group merge failed");
                    report.failed.push((document, err));
                }
            }
        }
        self.state = if self.frames.is_empty() {
            CoordinatorState::Idle
        } else {
            CoordinatorState::Active
        };
        debug!(%graph, merged = report.merged.len(), failed = report.failed.len(), "cycle groups closed");
        Ok(report)
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::dataflow::make_graph_id;
    use crate::memory::{EntitySpec, MemoryHost};

    #[test]
    fn opens_only_on_editable_unmodified_documents() {
        let mut host = MemoryHost::new();
        let a = host.add_document("A");
        let _linked = host.add_linked_document("B");
        let busy = host.add_document("C");
        host.doc_mut(busy).unwrap().set_modified(true);

        let mut coordinator = GroupCoordinator::new();
        let g = make_graph_id("g");
        assert_eq!(coordinator.begin_cycle(&mut host, g, "Solve"), vec![a]);
        assert_eq!(coordinator.state(), CoordinatorState::Active);

        host.doc_mut(a).unwrap().create(EntitySpec::default()).unwrap();
        host.doc_mut(a).unwrap().create(EntitySpec::default()).unwrap();

        let report = coordinator.end_cycle(&mut host, g).unwrap();
        assert_eq!(report.merged, vec![a]);
        assert_eq!(coordinator.state(), CoordinatorState::Idle);
        assert_eq!(host.doc(a).unwrap().undo_log(), &["Solve".to_owned()]);
    }

    #[test]
    fn nested_cycles_reuse_outer_groups() {
        let mut host = MemoryHost::new();
        let a = host.add_document("A");
        let outer = make_graph_id("outer");
        let inner = make_graph_id("inner");
        let mut coordinator = GroupCoordinator::new();
        coordinator.begin_cycle(&mut host, outer, "Solve");
        assert!(coordinator.begin_cycle(&mut host, inner, "Solve").is_empty());

        assert_eq!(
            coordinator.end_cycle(&mut host, outer),
            Err(CoordinatorError::NotInnermost {
                expected: inner,
                found: outer
            })
        );
        assert_eq!(coordinator.end_cycle(&mut host, inner).unwrap().closed(), 0);
        assert_eq!(coordinator.end_cycle(&mut host, outer).unwrap().merged, vec![a]);
        assert_eq!(host.doc(a).unwrap().group_stats().begun, 1);
        assert_eq!(
            coordinator.end_cycle(&mut host, outer),
            Err(CoordinatorError::NoActiveCycle(outer))
        );
    }

    #[test]
    fn merge_failures_are_reported_and_others_still_close() {
        let mut host = MemoryHost::new();
        let a = host.add_document("A");
        let b = host.add_document("B");
        let g = make_graph_id("g");
        let mut coordinator = GroupCoordinator::new();
        coordinator.begin_cycle(&mut host, g, "Solve");
        host.doc_mut(b).unwrap().reject_merges(Some("locked"));

        let report = coordinator.end_cycle(&mut host, g).unwrap();
        assert_eq!(report.merged, vec![a]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(report.failed[0].0, b);
        assert_eq!(host.doc(a).unwrap().open_groups(), 0);
        assert_eq!(host.doc(b).unwrap().open_groups(), 0);
    }
}
