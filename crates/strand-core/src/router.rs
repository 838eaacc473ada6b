// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Change reaction routing.
//!
//! The router turns host change notifications into node invalidations and
//! recompute requests. Each graph is either [`GraphPhase::Idle`] or
//! [`GraphPhase::Recomputing`]; one pending queue holds events that could
//! not be applied yet.
//!
//! - Idle and permitted to solve: the event is flushed immediately (nodes
//!   invalidated, one recompute per distinct graph).
//! - Recomputing: the change is a side effect of the running cycle. The
//!   event waits for that graph's next cycle start, where its nodes are
//!   invalidated without scheduling another recompute.
//! - Idle but not permitted to solve: the event waits for [`ChangeRouter::on_idle`].

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, trace, warn};

use crate::dataflow::{DataflowHost, GraphId, NodeId, References};
use crate::document::{CommitKind, DocumentChange};
use crate::ident::DocumentId;

/// Per-graph phase.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub enum GraphPhase {
    /// No cycle is running on the graph.
    Idle,
    /// A cycle is running; nested cycles only deepen it.
    Recomputing,
}

/// Invalidation batch tied to one commit, one document and one graph.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChangeEvent {
    /// Commit kind that produced the change.
    pub kind: CommitKind,
    /// Changed document.
    pub document: DocumentId,
    /// Graph owning `nodes`.
    pub graph: GraphId,
    /// Nodes to invalidate; never empty.
    pub nodes: Vec<NodeId>,
}

#[derive(Debug)]
struct Pending {
    event: ChangeEvent,
    self_caused: bool,
}

/// What one router call did.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RouterReport {
    /// Nodes marked stale.
    pub invalidated: Vec<(GraphId, NodeId)>,
    /// Graphs a recompute was requested for.
    pub recomputed: Vec<GraphId>,
    /// Events left in the pending queue by this call.
    pub deferred: usize,
}

impl RouterReport {
    /// Folds `other` into `self`.
    pub fn absorb(&mut self, other: Self) {
        self.invalidated.extend(other.invalidated);
        for graph in other.recomputed {
            if !self.recomputed.contains(&graph) {
                self.recomputed.push(graph);
            }
        }
        self.deferred += other.deferred;
    }

    /// Returns `true` if the call had no visible effect.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.invalidated.is_empty() && self.recomputed.is_empty() && self.deferred == 0
    }
}

/// Decides which nodes a document change invalidates and when to recompute.
#[derive(Debug)]
pub struct ChangeRouter {
    depth: BTreeMap<GraphId, u32>,
    pending: Vec<Pending>,
    suspended: Option<BTreeMap<GraphId, bool>>,
    flush_on_idle: bool,
}

impl Default for ChangeRouter {
    fn default() -> Self {
        Self::new(true)
    }
}

impl ChangeRouter {
    /// Creates a router. With `flush_on_idle` off, events held back because
    /// solving was not permitted are only applied at the graph's next cycle.
    #[must_use]
    pub fn new(flush_on_idle: bool) -> Self {
        Self {
            depth: BTreeMap::new(),
            pending: Vec::new(),
            suspended: None,
            flush_on_idle,
        }
    }

    /// Phase of `graph`.
    #[must_use]
    pub fn phase(&self, graph: GraphId) -> GraphPhase {
        if self.depth.contains_key(&graph) {
            GraphPhase::Recomputing
        } else {
            GraphPhase::Idle
        }
    }

    /// Number of queued events.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Returns `true` while [`ChangeRouter::suspend_solving`] is in effect.
    #[must_use]
    pub fn is_suspended(&self) -> bool {
        self.suspended.is_some()
    }

    /// Routes one change batch.
    pub fn on_document_changed<F>(&mut self, flow: &mut F, change: &DocumentChange) -> RouterReport
    where
        F: DataflowHost + ?Sized,
    {
        if change.is_empty() {
            return RouterReport::default();
        }

        for graph in flow.graphs() {
            let nodes: Vec<NodeId> = flow
                .nodes(graph)
                .into_iter()
                .filter(|node| {
                    !node.locked && !matches!(node.references, References::Remote | References::Blank)
                })
                .filter(|node| flow.requires_invalidation(graph, node, change))
                .map(|node| node.id)
                .collect();
            if nodes.is_empty() {
                continue;
            }
            let self_caused = self.phase(graph) == GraphPhase::Recomputing;
            trace!(%graph, document = %change.document, nodes = nodes.len(), self_caused, "change event queued");
            self.pending.push(Pending {
                event: ChangeEvent {
                    kind: change.kind,
                    document: change.document,
                    graph,
                    nodes,
                },
                self_caused,
            });
        }

        self.flush(flow)
    }

    /// Enters a cycle on `graph`.
    ///
    /// On the Idle to Recomputing transition every queued event of `graph`
    /// is drained: its nodes are invalidated, no recompute is requested.
    pub fn begin_cycle<F>(&mut self, flow: &mut F, graph: GraphId) -> RouterReport
    where
        F: DataflowHost + ?Sized,
    {
        let depth = self.depth.entry(graph).or_insert(0);
        *depth += 1;
        if *depth > 1 {
            return RouterReport {
                deferred: self.pending.len(),
                ..RouterReport::default()
            };
        }

        let mut report = RouterReport::default();
        let (drained, kept): (Vec<Pending>, Vec<Pending>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|p| p.event.graph == graph);
        self.pending = kept;
        for pending in drained {
            for node in pending.event.nodes {
                flow.invalidate(graph, node);
                report.invalidated.push((graph, node));
            }
        }
        report.deferred = self.pending.len();
        if !report.invalidated.is_empty() {
            debug!(%graph, invalidated = report.invalidated.len(), "drained deferred invalidations");
        }
        report
    }

    /// Leaves a cycle on `graph`.
    pub fn end_cycle(&mut self, graph: GraphId) {
        match self.depth.get_mut(&graph) {
            Some(depth) if *depth > 1 => *depth -= 1,
            Some(_) => {
                self.depth.remove(&graph);
            }
            None => warn!(%graph, "end_cycle without matching begin_cycle"),
        }
    }

    /// Idle tick: applies events that were held back only because solving
    /// was not permitted. Events of graphs that are no longer open are dropped.
    pub fn on_idle<F>(&mut self, flow: &mut F) -> RouterReport
    where
        F: DataflowHost + ?Sized,
    {
        if !self.flush_on_idle {
            self.drop_closed(&*flow);
            return RouterReport {
                deferred: self.pending.len(),
                ..RouterReport::default()
            };
        }
        self.flush(flow)
    }

    /// Forbids solving on every graph, remembering each prior state.
    ///
    /// Used while the host opens a document. Nested calls are ignored.
    pub fn suspend_solving<F>(&mut self, flow: &mut F)
    where
        F: DataflowHost + ?Sized,
    {
        if self.suspended.is_some() {
            return;
        }
        let mut remembered = BTreeMap::new();
        for graph in flow.graphs() {
            remembered.insert(graph, flow.is_solving_enabled(graph));
            flow.set_solving_enabled(graph, false);
        }
        debug!(graphs = remembered.len(), "solving suspended");
        self.suspended = Some(remembered);
    }

    /// Restores the states saved by [`ChangeRouter::suspend_solving`] and
    /// requests a recompute of every graph that was permitted to solve.
    pub fn resume_solving<F>(&mut self, flow: &mut F) -> RouterReport
    where
        F: DataflowHost + ?Sized,
    {
        let Some(remembered) = self.suspended.take() else {
            return RouterReport::default();
        };
        for (graph, enabled) in &remembered {
            flow.set_solving_enabled(*graph, *enabled);
        }
        let mut report = self.flush(flow);
        for (graph, enabled) in remembered {
            if enabled && self.phase(graph) == GraphPhase::Idle && !report.recomputed.contains(&graph) {
                flow.request_recompute(graph, CommitKind::Committed);
                report.recomputed.push(graph);
            }
        }
        debug!(recomputed = report.recomputed.len(), "solving resumed");
        report
    }

    fn ready<F>(&self, flow: &F, pending: &Pending) -> bool
    where
        F: DataflowHost + ?Sized,
    {
        !pending.self_caused
            && self.suspended.is_none()
            && self.phase(pending.event.graph) == GraphPhase::Idle
            && flow.is_solving_enabled(pending.event.graph)
    }

    fn drop_closed<F>(&mut self, flow: &F)
    where
        F: DataflowHost + ?Sized,
    {
        if self.pending.is_empty() {
            return;
        }
        let open: BTreeSet<GraphId> = flow.graphs().into_iter().collect();
        let before = self.pending.len();
        self.pending.retain(|p| open.contains(&p.event.graph));
        let dropped = before - self.pending.len();
        if dropped > 0 {
            debug!(dropped, "discarded change events of closed graphs");
        }
    }

    fn flush<F>(&mut self, flow: &mut F) -> RouterReport
    where
        F: DataflowHost + ?Sized,
    {
        self.drop_closed(&*flow);
        let (ready, kept): (Vec<Pending>, Vec<Pending>) = std::mem::take(&mut self.pending)
            .into_iter()
            .partition(|p| self.ready(&*flow, p));
        self.pending = kept;

        let mut report = RouterReport {
            deferred: self.pending.len(),
            ..RouterReport::default()
        };
        let mut kinds: BTreeMap<GraphId, CommitKind> = BTreeMap::new();
        let mut order: Vec<GraphId> = Vec::new();
        let mut seen = BTreeSet::new();
        for pending in ready {
            let ChangeEvent {
                kind, graph, nodes, ..
            } = pending.event;
            for node in nodes {
                flow.invalidate(graph, node);
                report.invalidated.push((graph, node));
            }
            kinds.entry(graph).or_insert(kind);
            if seen.insert(graph) {
                order.push(graph);
            }
        }
        for graph in order {
            let kind = kinds.get(&graph).copied().unwrap_or_default();
            flow.request_recompute(graph, kind);
            report.recomputed.push(graph);
        }
        if !report.recomputed.is_empty() {
            debug!(
                graphs = report.recomputed.len(),
                invalidated = report.invalidated.len(),
                "flushed change events"
            );
        }
        report
    }
}

#[cfg(test)]
mod tests {
    use std::cell::Cell;

    use super::*;
    use crate::dataflow::{make_graph_id, make_node_id, references_touched, GraphOwner, NodeInfo};
    use crate::ident::{EntityId, EntityRef};

    #[derive(Default)]
    struct Flow {
        graph: Option<GraphId>,
        nodes: Vec<NodeInfo>,
        enabled: bool,
        invalidated: Vec<NodeId>,
        recomputes: Vec<(GraphId, CommitKind)>,
    }

    impl DataflowHost for Flow {
        fn graphs(&self) -> Vec<GraphId> {
            self.graph.into_iter().collect()
        }
        fn nodes(&self, _graph: GraphId) -> Vec<NodeInfo> {
            self.nodes.clone()
        }
        fn invalidate(&mut self, _graph: GraphId, node: NodeId) {
            self.invalidated.push(node);
        }
        fn request_recompute(&mut self, graph: GraphId, kind: CommitKind) {
            self.recomputes.push((graph, kind));
        }
        fn is_solving_enabled(&self, _graph: GraphId) -> bool {
            self.enabled
        }
        fn set_solving_enabled(&mut self, _graph: GraphId, enabled: bool) {
            self.enabled = enabled;
        }
        fn owner_of(&self, _graph: GraphId) -> GraphOwner {
            GraphOwner::Root
        }
    }

    const DOC: DocumentId = DocumentId(1);

    fn flow() -> (Flow, GraphId, NodeId) {
        let graph = make_graph_id("g");
        let node = make_node_id("x");
        let flow = Flow {
            graph: Some(graph),
            nodes: vec![
                NodeInfo::new(node, References::Loaded(vec![EntityRef::new(DOC, EntityId(5))])),
                NodeInfo::new(make_node_id("blank"), References::Blank),
            ],
            enabled: true,
            ..Flow::default()
        };
        (flow, graph, node)
    }

    fn modified(id: u64, kind: CommitKind) -> DocumentChange {
        let mut change = DocumentChange::new(DOC, kind);
        change.modified.insert(EntityId(id));
        change
    }

    #[test]
    fn external_change_flushes_immediately() {
        let (mut flow, graph, node) = flow();
        let mut router = ChangeRouter::default();
        let report = router.on_document_changed(&mut flow, &modified(5, CommitKind::Undone));
        assert_eq!(report.invalidated, vec![(graph, node)]);
        assert_eq!(flow.recomputes, vec![(graph, CommitKind::Undone)]);
        assert_eq!(router.pending(), 0);
    }

    #[test]
    fn unrelated_or_empty_changes_do_nothing() {
        let (mut flow, _, _) = flow();
        let mut router = ChangeRouter::default();
        assert!(router
            .on_document_changed(&mut flow, &modified(6, CommitKind::Committed))
            .is_empty());
        assert!(router
            .on_document_changed(&mut flow, &DocumentChange::new(DOC, CommitKind::Committed))
            .is_empty());
        assert!(flow.recomputes.is_empty());
    }

    #[test]
    fn self_change_defers_to_next_cycle_start() {
        let (mut flow, graph, node) = flow();
        let mut router = ChangeRouter::default();
        router.begin_cycle(&mut flow, graph);
        let report = router.on_document_changed(&mut flow, &modified(5, CommitKind::Committed));
        assert_eq!(report.deferred, 1);
        assert!(flow.invalidated.is_empty());
        router.end_cycle(graph);

        assert!(router.on_idle(&mut flow).recomputed.is_empty());
        assert!(flow.recomputes.is_empty());

        let report = router.begin_cycle(&mut flow, graph);
        assert_eq!(report.invalidated, vec![(graph, node)]);
        assert!(flow.recomputes.is_empty());
        router.end_cycle(graph);
    }

    #[test]
    fn nested_cycles_only_drain_on_first_entry() {
        let (mut flow, graph, _) = flow();
        let mut router = ChangeRouter::default();
        router.begin_cycle(&mut flow, graph);
        router.on_document_changed(&mut flow, &modified(5, CommitKind::Committed));
        assert!(router.begin_cycle(&mut flow, graph).invalidated.is_empty());
        router.end_cycle(graph);
        assert_eq!(router.phase(graph), GraphPhase::Recomputing);
        router.end_cycle(graph);
        assert_eq!(router.phase(graph), GraphPhase::Idle);
        assert_eq!(router.pending(), 1);
    }

    #[test]
    fn disabled_solving_waits_for_idle() {
        let (mut flow, graph, _) = flow();
        flow.enabled = false;
        let mut router = ChangeRouter::default();
        router.on_document_changed(&mut flow, &modified(5, CommitKind::Committed));
        assert_eq!(router.pending(), 1);
        assert_eq!(router.on_idle(&mut flow).deferred, 1);
        flow.enabled = true;
        let report = router.on_idle(&mut flow);
        assert_eq!(report.recomputed, vec![graph]);
        assert_eq!(router.pending(), 0);
    }

    #[test]
    fn suspend_and_resume_restore_state() {
        let (mut flow, graph, _) = flow();
        let mut router = ChangeRouter::default();
        router.suspend_solving(&mut flow);
        assert!(!flow.enabled);
        router.on_document_changed(&mut flow, &modified(5, CommitKind::Committed));
        assert_eq!(router.pending(), 1);
        let report = router.resume_solving(&mut flow);
        assert!(flow.enabled);
        assert_eq!(report.recomputed, vec![graph]);
        assert_eq!(flow.recomputes.len(), 1);
        assert_eq!(router.pending(), 0);
    }

    #[test]
    fn events_of_closed_graphs_are_dropped() {
        let (mut flow, _, _) = flow();
        flow.enabled = false;
        let mut router = ChangeRouter::default();
        router.on_document_changed(&mut flow, &modified(5, CommitKind::Committed));
        assert_eq!(router.pending(), 1);

        flow.graph = None;
        let report = router.on_idle(&mut flow);
        assert_eq!(report.deferred, 0);
        assert_eq!(router.pending(), 0);
        assert!(flow.invalidated.is_empty());

        let mut waiting = ChangeRouter::new(false);
        flow.graph = Some(make_graph_id("g"));
        waiting.on_document_changed(&mut flow, &modified(5, CommitKind::Committed));
        flow.graph = None;
        assert_eq!(waiting.on_idle(&mut flow).deferred, 0);
        assert_eq!(waiting.pending(), 0);
    }

    /// Tracks entities by id without loading references, reacting to any
    /// addition in the document it watches.
    struct AdditionWatcher {
        inner: Flow,
        watcher: NodeId,
        asked: Cell<usize>,
    }

    impl DataflowHost for AdditionWatcher {
        fn graphs(&self) -> Vec<GraphId> {
            self.inner.graphs()
        }
        fn nodes(&self, graph: GraphId) -> Vec<NodeInfo> {
            self.inner.nodes(graph)
        }
        fn requires_invalidation(&self, _graph: GraphId, node: &NodeInfo, change: &DocumentChange) -> bool {
            if node.id != self.watcher {
                return references_touched(node, change);
            }
            self.asked.set(self.asked.get() + 1);
            !change.added.is_empty()
        }
        fn invalidate(&mut self, graph: GraphId, node: NodeId) {
            self.inner.invalidate(graph, node);
        }
        fn request_recompute(&mut self, graph: GraphId, kind: CommitKind) {
            self.inner.request_recompute(graph, kind);
        }
        fn is_solving_enabled(&self, graph: GraphId) -> bool {
            self.inner.is_solving_enabled(graph)
        }
        fn set_solving_enabled(&mut self, graph: GraphId, enabled: bool) {
            self.inner.set_solving_enabled(graph, enabled);
        }
        fn owner_of(&self, graph: GraphId) -> GraphOwner {
            self.inner.owner_of(graph)
        }
    }

    #[test]
    fn custom_reactions_see_nodes_without_loaded_references() {
        let (mut inner, graph, _) = flow();
        let watcher = make_node_id("watcher");
        inner.nodes.push(NodeInfo::new(watcher, References::None));
        inner
            .nodes
            .push(NodeInfo::new(make_node_id("remote"), References::Remote));
        let mut flow = AdditionWatcher {
            inner,
            watcher,
            asked: Cell::new(0),
        };
        let mut router = ChangeRouter::default();

        let mut added = DocumentChange::new(DOC, CommitKind::Committed);
        added.added.insert(EntityId(40));
        let report = router.on_document_changed(&mut flow, &added);
        assert_eq!(flow.asked.get(), 1);
        assert_eq!(report.invalidated, vec![(graph, watcher)]);
        assert_eq!(flow.inner.recomputes, vec![(graph, CommitKind::Committed)]);

        let report = router.on_document_changed(&mut flow, &modified(40, CommitKind::Committed));
        assert_eq!(flow.asked.get(), 2);
        assert!(report.is_empty());
    }

    #[test]
    fn default_reaction_ignores_nodes_without_references() {
        let (mut flow, graph, node) = flow();
        flow.nodes.push(NodeInfo::new(make_node_id("plain"), References::None));
        let mut router = ChangeRouter::default();
        let mut change = modified(5, CommitKind::Committed);
        change.added.insert(EntityId(41));
        let report = router.on_document_changed(&mut flow, &change);
        assert_eq!(report.invalidated, vec![(graph, node)]);
    }
}
