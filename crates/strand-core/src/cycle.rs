// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Recomputation cycles.
//!
//! A [`Session`] owns the router and the group coordinator for one host
//! session. [`Session::run_cycle`] brackets a full evaluation of one graph:
//! deferred invalidations are drained, groups are opened, producers run
//! against a [`CycleContext`], every stream they opened is disposed, and the
//! groups are merged. The context replaces any process-wide registry of open
//! streams; it lives exactly as long as the cycle.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, instrument, warn};

use crate::coordinator::{AssimilationReport, CoordinatorError, GroupCoordinator};
use crate::dataflow::{DataflowHost, GraphId, NodeId};
use crate::document::{CategoryId, DocumentHost, HostError};
use crate::filter::StreamMode;
use crate::ident::{DocumentId, EntityId, EntityRef};
use crate::path::StreamId;
use crate::registry::StreamRegistry;
use crate::router::{ChangeRouter, RouterReport};
use crate::stream::{DisposeReport, StreamError};

/// How a producing node relates to the entities it made on earlier cycles.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingMode {
    /// The node does not create entities.
    NotApplicable,
    /// Every cycle appends new entities; nothing is tracked.
    Disabled,
    /// Every cycle creates a new entity; the previous one is deleted.
    Supersede,
    /// The previous entity is handed back for reuse when possible.
    #[default]
    Reconstruct,
}

/// Session-wide settings.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionConfig {
    /// Name given to every cycle's transaction group (the undo entry).
    pub group_name: String,
    /// Stream mode used by [`CycleContext::open_default`].
    pub default_mode: StreamMode,
    /// Tracking mode used by [`CycleContext::reconstruct_default`].
    pub tracking: TrackingMode,
    /// Whether idle ticks apply events held back while solving was not permitted.
    pub flush_on_idle: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            group_name: "Strand".to_owned(),
            default_mode: StreamMode::empty(),
            tracking: TrackingMode::Reconstruct,
            flush_on_idle: true,
        }
    }
}

/// Cooperative cancellation flag, checked between producers.
#[derive(Clone, Debug, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Fresh, not cancelled.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    /// Returns `true` once [`CancelToken::cancel`] was called on any clone.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Errors a producer can report.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProduceError {
    /// Stream misuse or host failure inside a stream.
    #[error(transparent)]
    Stream(#[from] StreamError),
    /// Host failure outside of streams.
    #[error(transparent)]
    Host(#[from] HostError),
    /// The stream was never opened in this cycle.
    #[error("stream {0} is not open in this cycle")]
    NotOpen(StreamId),
    /// The stream is already open in this cycle under another scope.
    #[error("stream {id} is already open with mode {open:?}, category {open_category:?}")]
    ScopeMismatch {
        /// Stream id.
        id: StreamId,
        /// Mode it was first opened with.
        open: StreamMode,
        /// Category it was first opened with.
        open_category: Option<CategoryId>,
    },
    /// The node has no identity path (its graph is detached).
    #[error("{0} has no identity path")]
    Detached(NodeId),
    /// Domain-specific failure.
    #[error("{0}")]
    Failed(String),
}

/// A producing node, run once per cycle against host `H`.
pub trait Producer<H>
where
    H: DocumentHost + ?Sized,
{
    /// Name used in logs and reports.
    fn name(&self) -> &str;

    /// Runs the node.
    ///
    /// # Errors
    /// Any error is recorded in the cycle report; the cycle continues.
    fn produce(&mut self, cx: &mut CycleContext<'_, H>) -> Result<(), ProduceError>;
}

/// Everything a producer may touch during one cycle.
pub struct CycleContext<'a, H>
where
    H: DocumentHost + ?Sized,
{
    documents: &'a mut H,
    flow: &'a dyn DataflowHost,
    graph: GraphId,
    config: &'a SessionConfig,
    registries: &'a mut BTreeMap<StreamId, StreamRegistry>,
}

impl<'a, H> CycleContext<'a, H>
where
    H: DocumentHost + ?Sized,
{
    /// Assembles a context. [`Session::run_cycle`] does this per producer.
    pub fn new(
        documents: &'a mut H,
        flow: &'a dyn DataflowHost,
        graph: GraphId,
        config: &'a SessionConfig,
        registries: &'a mut BTreeMap<StreamId, StreamRegistry>,
    ) -> Self {
        Self {
            documents,
            flow,
            graph,
            config,
            registries,
        }
    }

    /// Graph being recomputed.
    #[must_use]
    pub fn graph(&self) -> GraphId {
        self.graph
    }

    /// Session settings.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        self.config
    }

    /// Open documents.
    #[must_use]
    pub fn documents(&self) -> &H {
        &*self.documents
    }

    /// Open documents, mutably.
    pub fn documents_mut(&mut self) -> &mut H {
        &mut *self.documents
    }

    /// Stream id of `slot` on `node` in the cycle's graph.
    ///
    /// # Errors
    /// [`ProduceError::Detached`] when the identity path cannot be resolved.
    pub fn stream_id(&self, node: NodeId, slot: &str) -> Result<StreamId, ProduceError> {
        StreamId::resolve(self.flow, self.graph, node, slot).ok_or(ProduceError::Detached(node))
    }

    /// Opens `id` on the documents `mode` selects. Opening an id twice in a
    /// cycle with the same scope returns the registry opened first.
    ///
    /// # Errors
    /// Forwards [`StreamRegistry::open`] failures.
    /// [`ProduceError::ScopeMismatch`] when `id` is already open with a
    /// different mode or category.
    pub fn open(
        &mut self,
        id: &StreamId,
        mode: StreamMode,
        category: Option<CategoryId>,
    ) -> Result<&StreamRegistry, ProduceError> {
        if let Some(open) = self.registries.get(id) {
            if open.mode() != mode || open.category() != category {
                return Err(ProduceError::ScopeMismatch {
                    id: id.clone(),
                    open: open.mode(),
                    open_category: open.category(),
                });
            }
        } else {
            let registry = StreamRegistry::open(&mut *self.documents, id.clone(), mode, category)?;
            self.registries.insert(id.clone(), registry);
        }
        self.registries
            .get(id)
            .ok_or_else(|| ProduceError::NotOpen(id.clone()))
    }

    /// [`CycleContext::open`] with the session's default mode.
    ///
    /// # Errors
    /// Forwards [`StreamRegistry::open`] failures.
    pub fn open_default(
        &mut self,
        id: &StreamId,
        category: Option<CategoryId>,
    ) -> Result<&StreamRegistry, ProduceError> {
        self.open(id, self.config.default_mode, category)
    }

    /// Reads the next position of `id` on `document`.
    ///
    /// # Errors
    /// [`ProduceError::NotOpen`] or stream errors.
    pub fn read(&mut self, id: &StreamId, document: DocumentId) -> Result<Option<EntityId>, ProduceError> {
        let registry = self
            .registries
            .get_mut(id)
            .ok_or_else(|| ProduceError::NotOpen(id.clone()))?;
        Ok(registry.read(&*self.documents, document)?)
    }

    /// Writes `entity` at the current position of `id` on `document`.
    ///
    /// # Errors
    /// [`ProduceError::NotOpen`] or stream errors.
    pub fn write(
        &mut self,
        id: &StreamId,
        document: DocumentId,
        entity: Option<EntityId>,
    ) -> Result<(), ProduceError> {
        let registry = self
            .registries
            .get_mut(id)
            .ok_or_else(|| ProduceError::NotOpen(id.clone()))?;
        let entity = entity.map(|e| EntityRef::new(document, e));
        Ok(registry.write(&mut *self.documents, document, entity)?)
    }

    /// Read, build, write back: the usual shape of a producing node.
    ///
    /// `f` receives the host and a reuse candidate and returns the entity of
    /// `document` to keep at this position. The candidate is the previous
    /// entity under [`TrackingMode::Reconstruct`] and `None` otherwise.
    /// Under [`TrackingMode::Disabled`] and [`TrackingMode::NotApplicable`]
    /// the stream is left untouched. When `f` fails the previous entity is
    /// written back so it is not collected, and the error is returned.
    ///
    /// # Errors
    /// Whatever `f` returns, [`ProduceError::NotOpen`], or stream errors.
    pub fn reconstruct<F>(
        &mut self,
        id: &StreamId,
        document: DocumentId,
        mode: TrackingMode,
        f: F,
    ) -> Result<Option<EntityId>, ProduceError>
    where
        F: FnOnce(&mut H, Option<EntityId>) -> Result<Option<EntityId>, ProduceError>,
    {
        if matches!(mode, TrackingMode::Disabled | TrackingMode::NotApplicable) {
            return f(&mut *self.documents, None);
        }

        let previous = self.read(id, document)?;
        let candidate = match mode {
            TrackingMode::Reconstruct => previous,
            _ => None,
        };
        match f(&mut *self.documents, candidate) {
            Ok(entity) => {
                self.write(id, document, entity)?;
                Ok(entity)
            }
            Err(err) => {
                debug!(stream = %id, %document, %err, "producer failed; keeping previous entity");
                self.write(id, document, previous)?;
                Err(err)
            }
        }
    }

    /// [`CycleContext::reconstruct`] with the session's tracking mode.
    ///
    /// # Errors
    /// As [`CycleContext::reconstruct`].
    pub fn reconstruct_default<F>(
        &mut self,
        id: &StreamId,
        document: DocumentId,
        f: F,
    ) -> Result<Option<EntityId>, ProduceError>
    where
        F: FnOnce(&mut H, Option<EntityId>) -> Result<Option<EntityId>, ProduceError>,
    {
        self.reconstruct(id, document, self.config.tracking, f)
    }
}

/// How a cycle ended.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum CycleOutcome {
    /// Every producer ran.
    #[default]
    Completed,
    /// The cancel token stopped the producer loop.
    Cancelled,
}

/// Everything one cycle did.
#[derive(Clone, Debug, Default)]
pub struct CycleReport {
    /// How the cycle ended.
    pub outcome: CycleOutcome,
    /// Producers that ran.
    pub ran: usize,
    /// Documents a transaction group was opened on.
    pub opened: Vec<DocumentId>,
    /// One report per disposed stream.
    pub disposed: Vec<DisposeReport>,
    /// Group merge results.
    pub assimilation: AssimilationReport,
    /// Producer failures, by producer name.
    pub producer_errors: Vec<(String, ProduceError)>,
    /// Router activity during the cycle.
    pub router: RouterReport,
}

impl CycleReport {
    /// Entities deleted by every stream of the cycle.
    #[must_use]
    pub fn deleted(&self) -> usize {
        self.disposed.iter().map(DisposeReport::total_deleted).sum()
    }
}

/// Router, coordinator and settings for one host session.
#[derive(Debug)]
pub struct Session {
    config: SessionConfig,
    router: ChangeRouter,
    coordinator: GroupCoordinator,
}

impl Default for Session {
    fn default() -> Self {
        Self::new(SessionConfig::default())
    }
}

impl Session {
    /// Creates a session.
    #[must_use]
    pub fn new(config: SessionConfig) -> Self {
        Self {
            router: ChangeRouter::new(config.flush_on_idle),
            coordinator: GroupCoordinator::new(),
            config,
        }
    }

    /// Settings.
    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// Change router.
    #[must_use]
    pub fn router(&self) -> &ChangeRouter {
        &self.router
    }

    /// Group coordinator.
    #[must_use]
    pub fn coordinator(&self) -> &GroupCoordinator {
        &self.coordinator
    }

    /// Feeds pending host notifications to the router.
    pub fn pump<H>(&mut self, documents: &mut H, flow: &mut dyn DataflowHost) -> RouterReport
    where
        H: DocumentHost + ?Sized,
    {
        let mut report = RouterReport::default();
        for change in documents.drain_changes() {
            report.absorb(self.router.on_document_changed(flow, &change));
        }
        report
    }

    /// Host idle tick.
    pub fn on_idle<H>(&mut self, documents: &mut H, flow: &mut dyn DataflowHost) -> RouterReport
    where
        H: DocumentHost + ?Sized,
    {
        let mut report = self.pump(documents, flow);
        report.absorb(self.router.on_idle(flow));
        report
    }

    /// Forbids solving while the host opens a document.
    pub fn suspend_solving(&mut self, flow: &mut dyn DataflowHost) {
        self.router.suspend_solving(flow);
    }

    /// Restores solving after [`Session::suspend_solving`].
    pub fn resume_solving(&mut self, flow: &mut dyn DataflowHost) -> RouterReport {
        self.router.resume_solving(flow)
    }

    /// Enters a cycle on `graph` without running producers.
    ///
    /// Pairs with [`Session::end_cycle`]; nested pairs are allowed as long as
    /// they close innermost first.
    pub fn begin_cycle<H>(
        &mut self,
        documents: &mut H,
        flow: &mut dyn DataflowHost,
        graph: GraphId,
    ) -> (RouterReport, Vec<DocumentId>)
    where
        H: DocumentHost + ?Sized,
    {
        let mut router = self.pump(documents, flow);
        router.absorb(self.router.begin_cycle(flow, graph));
        let opened = self
            .coordinator
            .begin_cycle(documents, graph, &self.config.group_name);
        (router, opened)
    }

    /// Leaves a cycle on `graph`, merging its groups.
    ///
    /// The router leaves the cycle even when the coordinator rejects the call.
    ///
    /// # Errors
    /// [`CoordinatorError`] when `graph` is not the innermost cycle.
    pub fn end_cycle<H>(
        &mut self,
        documents: &mut H,
        flow: &mut dyn DataflowHost,
        graph: GraphId,
    ) -> (RouterReport, Result<AssimilationReport, CoordinatorError>)
    where
        H: DocumentHost + ?Sized,
    {
        let assimilation = self.coordinator.end_cycle(documents, graph);
        let router = self.pump(documents, flow);
        self.router.end_cycle(graph);
        (router, assimilation)
    }

    /// Runs one full cycle of `graph`.
    ///
    /// Cancellation is checked before each producer; a cancelled cycle still
    /// disposes its streams and merges its groups. Producer errors are
    /// recorded and the next producer runs.
    ///
    /// # Errors
    /// [`CoordinatorError`] when the cycle bracket is misnested.
    #[instrument(skip(self, documents, flow, producers, cancel), fields(producers = producers.len()))]
    pub fn run_cycle<H>(
        &mut self,
        documents: &mut H,
        flow: &mut dyn DataflowHost,
        graph: GraphId,
        producers: &mut [&mut dyn Producer<H>],
        cancel: &CancelToken,
    ) -> Result<CycleReport, CoordinatorError>
    where
        H: DocumentHost + ?Sized,
    {
        let mut report = CycleReport::default();
        let (router, opened) = self.begin_cycle(documents, flow, graph);
        report.router = router;
        report.opened = opened;

        let mut registries = BTreeMap::new();
        for producer in producers.iter_mut() {
            if cancel.is_cancelled() {
                info!(ran = report.ran, "cycle cancelled");
                report.outcome = CycleOutcome::Cancelled;
                break;
            }
            let result = {
                let mut cx = CycleContext::new(&mut *documents, &*flow, graph, &self.config, &mut registries);
                producer.produce(&mut cx)
            };
            report.ran += 1;
            if let Err(err) = result {
                warn!(producer = producer.name(), %err, "producer failed");
                report.producer_errors.push((producer.name().to_owned(), err));
            }
            let pumped = self.pump(documents, flow);
            report.router.absorb(pumped);
        }

        for registry in registries.into_values() {
            report.disposed.extend(registry.dispose(&mut *documents));
        }

        let (router, assimilation) = self.end_cycle(documents, flow, graph);
        report.router.absorb(router);
        report.assimilation = assimilation?;
        debug!(
            deleted = report.deleted(),
            merged = report.assimilation.merged.len(),
            errors = report.producer_errors.len(),
            "cycle finished"
        );
        Ok(report)
    }
}
