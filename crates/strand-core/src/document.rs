// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Document-side collaborator boundary.
//!
//! Strand never owns persisted state. Everything it knows about entities,
//! attached tags and atomic modifications goes through [`Document`]; the set
//! of open documents and the stream of change notifications go through
//! [`DocumentHost`].

use std::collections::BTreeSet;
use std::fmt;

use thiserror::Error;

use crate::attachment::AtomPayload;
use crate::ident::{DocumentId, EntityId, EntityRef, TypeId, UniqueId};

/// Category of an entity (walls, floors, ...), host-numbered.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct CategoryId(pub i64);

/// Ownership partition ("workset") of an entity.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct WorksetId(pub u32);

/// Snapshot of the facets of one entity that Strand reasons about.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EntityInfo {
    /// Host id.
    pub id: EntityId,
    /// Current unique id; changes when the entity is a copy.
    pub unique_id: UniqueId,
    /// Category, if the entity has one.
    pub category: Option<CategoryId>,
    /// View that owns the entity (view-specific annotations).
    pub owner_view: Option<EntityId>,
    /// Design option the entity belongs to.
    pub design_option: Option<EntityId>,
    /// Workset the entity belongs to.
    pub workset: Option<WorksetId>,
}

/// Handle of an open atomic modification (host transaction).
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ScopeId(pub u64);

/// Handle of an open transaction group.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct GroupId(pub u64);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "group#{}", self.0)
    }
}

/// Errors reported by a host document.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    /// The document handle is not open.
    #[error("document {0} is not open")]
    UnknownDocument(DocumentId),
    /// The entity does not exist (or no longer exists).
    #[error("entity {0} not found")]
    UnknownEntity(EntityRef),
    /// The document is linked or read-only.
    #[error("document {0} is not editable")]
    NotEditable(DocumentId),
    /// The scope handle is not the innermost open scope.
    #[error("atomic modification {0:?} is not open")]
    UnknownScope(ScopeId),
    /// The group handle is not the innermost open group.
    #[error("transaction {0} is not active")]
    UnknownGroup(GroupId),
    /// The host refused to merge a group.
    #[error("merge rejected: {0}")]
    MergeRejected(String),
    /// Anything else the host reports.
    #[error("host failure: {0}")]
    Other(String),
}

/// Kind of host-level commit that produced a [`DocumentChange`].
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug, Default)]
pub enum CommitKind {
    /// A regular transaction commit.
    #[default]
    Committed,
    /// The user undid a transaction.
    Undone,
    /// The user redid a transaction.
    Redone,
}

/// One batch of mutations, delivered per host-level commit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DocumentChange {
    /// Document the ids belong to.
    pub document: DocumentId,
    /// Entities created by the commit.
    pub added: BTreeSet<EntityId>,
    /// Entities deleted by the commit.
    pub deleted: BTreeSet<EntityId>,
    /// Entities modified by the commit.
    pub modified: BTreeSet<EntityId>,
    /// Commit kind.
    pub kind: CommitKind,
}

impl DocumentChange {
    /// Empty change batch for `document`.
    #[must_use]
    pub fn new(document: DocumentId, kind: CommitKind) -> Self {
        Self {
            document,
            added: BTreeSet::new(),
            deleted: BTreeSet::new(),
            modified: BTreeSet::new(),
            kind,
        }
    }

    /// Returns `true` when no id set carries anything.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.deleted.is_empty() && self.modified.is_empty()
    }

    /// Returns `true` if `id` was deleted or modified by this batch.
    #[must_use]
    pub fn touches(&self, id: EntityId) -> bool {
        self.deleted.contains(&id) || self.modified.contains(&id)
    }
}

/// A mutable, persisted container of entities.
///
/// Mutating calls made while no scope is open are committed on their own,
/// exactly as if wrapped in a single-operation scope.
pub trait Document {
    /// Per-session handle.
    fn id(&self) -> DocumentId;

    /// Human-readable title, used for logs and group names.
    fn title(&self) -> &str;

    /// Linked documents are references to other files and never hold output.
    fn is_linked(&self) -> bool;

    /// Read-only documents reject every mutation.
    fn is_read_only(&self) -> bool;

    /// Returns `true` while something else holds uncommitted modifications.
    fn is_modified(&self) -> bool;

    /// Facets of entity `id`, or `None` if it is not (or no longer) valid.
    fn entity(&self, id: EntityId) -> Option<EntityInfo>;

    /// Returns `true` if `id` refers to a live entity.
    fn is_valid(&self, id: EntityId) -> bool {
        self.entity(id).is_some()
    }

    /// Ids of every entity carrying an attachment of type `type_id`.
    fn entities_with_attachment(&self, type_id: TypeId) -> Vec<EntityId>;

    /// Attachment of type `type_id` on entity `id`.
    fn attachment(&self, id: EntityId, type_id: TypeId) -> Option<AtomPayload>;

    /// Attaches (or replaces) `payload` on entity `id`.
    fn set_attachment(&mut self, id: EntityId, payload: AtomPayload) -> Result<(), HostError>;

    /// Removes the attachment of type `type_id`; returns whether one existed.
    fn remove_attachment(&mut self, id: EntityId, type_id: TypeId) -> Result<bool, HostError>;

    /// Deletes entities, returning the ids that were actually removed.
    ///
    /// Ids that are already invalid are skipped without error.
    fn delete(&mut self, ids: &[EntityId]) -> Result<Vec<EntityId>, HostError>;

    /// Opens an atomic modification.
    fn begin_scope(&mut self, name: &str) -> Result<ScopeId, HostError>;

    /// Commits the innermost atomic modification.
    fn commit_scope(&mut self, scope: ScopeId) -> Result<(), HostError>;

    /// Rolls back the innermost atomic modification.
    fn rollback_scope(&mut self, scope: ScopeId) -> Result<(), HostError>;

    /// Opens a transaction group; commits inside it merge into one undo step.
    fn begin_group(&mut self, name: &str) -> Result<GroupId, HostError>;

    /// Closes the innermost group by merging its commits into one.
    fn assimilate_group(&mut self, group: GroupId) -> Result<(), HostError>;

    /// Active graphical view.
    fn active_view(&self) -> Option<EntityId>;

    /// Active design option.
    fn active_design_option(&self) -> Option<EntityId>;

    /// Active workset (only for workshared documents).
    fn active_workset(&self) -> Option<WorksetId>;
}

/// The set of open documents plus their notification source.
pub trait DocumentHost {
    /// Handles of every open document, in a stable order.
    fn document_ids(&self) -> Vec<DocumentId>;

    /// The document the user is working on.
    fn active_document(&self) -> Option<DocumentId>;

    /// Borrow an open document.
    fn document(&self, id: DocumentId) -> Option<&dyn Document>;

    /// Mutably borrow an open document.
    fn document_mut(&mut self, id: DocumentId) -> Option<&mut dyn Document>;

    /// Takes every change batch committed since the previous call.
    fn drain_changes(&mut self) -> Vec<DocumentChange>;
}

/// Runs `f` inside one atomic modification on `doc`.
///
/// The scope is committed when `f` succeeds and rolled back otherwise.
pub fn with_scope<D, T, F>(doc: &mut D, name: &str, f: F) -> Result<T, HostError>
where
    D: Document + ?Sized,
    F: FnOnce(&mut D) -> Result<T, HostError>,
{
    let scope = doc.begin_scope(name)?;
    match f(doc) {
        Ok(value) => {
            doc.commit_scope(scope)?;
            Ok(value)
        }
        Err(err) => {
            if let Err(rollback) = doc.rollback_scope(scope) {
                tracing::warn!(document = %doc.id(), %rollback, "rollback failed");
            }
            Err(err)
        }
    }
}

/// Deletes `ids` inside their own atomic modification, skipping invalid ones.
///
/// Failures are logged and swallowed; the returned list holds what was
/// actually removed.
pub fn delete_best_effort<D>(doc: &mut D, ids: &[EntityId], reason: &str) -> Vec<EntityId>
where
    D: Document + ?Sized,
{
    let live: Vec<EntityId> = ids.iter().copied().filter(|id| doc.is_valid(*id)).collect();
    if live.is_empty() {
        return Vec::new();
    }
    match with_scope(doc, reason, |d| d.delete(&live)) {
        Ok(deleted) => deleted,
        Err(err) => {
            tracing::warn!(document = %doc.id(), %err, count = live.len(), reason, "delete failed");
            Vec::new()
        }
    }
}
