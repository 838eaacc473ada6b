// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! strand-core: identity-tracked entity streams for dataflow graphs embedded
//! in a document host.
//!
//! A dataflow graph may be recomputed in full whenever an input changes.
//! The host it writes into holds persisted, identity-based entities. This
//! crate keeps the two in step: streams reuse the entities a slot created
//! on the previous cycle and collect the ones it no longer produces, the
//! router reacts to document changes made by anyone, and the coordinator
//! folds each cycle into one undo step per document.
#![forbid(unsafe_code)]
#![deny(missing_docs, rust_2018_idioms, unused_must_use)]
#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    clippy::cargo,
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::panic,
    clippy::todo,
    clippy::unimplemented,
    clippy::dbg_macro,
    clippy::print_stdout,
    clippy::print_stderr
)]
#![allow(
    clippy::must_use_candidate,
    clippy::return_self_not_must_use,
    clippy::missing_const_for_fn,
    clippy::redundant_pub_crate,
    clippy::module_name_repetitions,
    clippy::use_self
)]

mod attachment;
mod coordinator;
mod cycle;
mod dataflow;
mod document;
mod filter;
mod ident;
/// In-memory reference host.
pub mod memory;
mod path;
mod registry;
mod router;
mod stream;
/// Identity tag persistence helpers (`tag::read`, `tag::write`, ...).
pub mod tag;

/// Attachment atoms and codec boundaries.
pub use attachment::{AtomPayload, Codec, CodecError};
/// Transaction group coordination.
pub use coordinator::{AssimilationReport, CoordinatorError, CoordinatorState, GroupCoordinator};
/// Cycle context and session.
pub use cycle::{
    CancelToken, CycleContext, CycleOutcome, CycleReport, ProduceError, Producer, Session,
    SessionConfig, TrackingMode,
};
/// Dataflow collaborator boundary.
pub use dataflow::{
    make_graph_id, make_node_id, references_touched, DataflowHost, GraphId, GraphOwner, NodeId,
    NodeInfo, References,
};
/// Document collaborator boundary.
pub use document::{
    delete_best_effort, with_scope, CategoryId, CommitKind, Document, DocumentChange,
    DocumentHost, EntityInfo, GroupId, HostError, ScopeId, WorksetId,
};
/// Stream scoping.
pub use filter::{EntityPredicate, StreamFilter, StreamMode};
/// Identifiers.
pub use ident::{
    make_object_id, make_type_id, make_unique_id, DocumentId, EntityId, EntityRef, Hash, ObjectId,
    TypeId, UniqueId,
};
/// Identity paths and stream ids.
pub use path::{IdentityPath, StreamId};
/// Multi-document stream fan-out.
pub use registry::StreamRegistry;
/// Change reaction routing.
pub use router::{ChangeEvent, ChangeRouter, GraphPhase, RouterReport};
/// Streams.
pub use stream::{DisposeReport, Stream, StreamError};
/// Identity tags.
pub use tag::{IdentityTag, IdentityTagCodec, TrustedTag};
