// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! In-memory reference implementation of the document collaborators.
//!
//! [`MemoryDocument`] models just enough of a BIM host to exercise every
//! Strand contract: entities with scoping facets and typed attachments,
//! atomic scopes with rollback, transaction groups that collapse their
//! commits into one undo entry, and one [`DocumentChange`] per outermost
//! commit. [`MemoryHost`] holds a set of documents and forwards their
//! notifications.

use std::collections::BTreeMap;

use crate::attachment::AtomPayload;
use crate::document::{
    CategoryId, CommitKind, Document, DocumentChange, DocumentHost, EntityInfo, GroupId,
    HostError, ScopeId, WorksetId,
};
use crate::ident::{make_object_id, make_unique_id, DocumentId, EntityId, EntityRef, ObjectId, TypeId, UniqueId};

/// Facets of an entity to create.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EntitySpec {
    /// Category.
    pub category: Option<CategoryId>,
    /// Owner view.
    pub owner_view: Option<EntityId>,
    /// Design option.
    pub design_option: Option<EntityId>,
    /// Workset.
    pub workset: Option<WorksetId>,
}

impl EntitySpec {
    /// Spec with only a category.
    #[must_use]
    pub fn category(category: CategoryId) -> Self {
        Self {
            category: Some(category),
            ..Self::default()
        }
    }
}

#[derive(Clone, Debug)]
struct StoredEntity {
    spec: EntitySpec,
    generation: u32,
    revision: u64,
    attachments: BTreeMap<TypeId, AtomPayload>,
}

#[derive(Debug)]
struct OpenScope {
    id: ScopeId,
    name: String,
    entities: BTreeMap<EntityId, StoredEntity>,
    pending: DocumentChange,
}

#[derive(Debug)]
struct OpenGroup {
    id: GroupId,
    name: String,
    undo_mark: usize,
}

/// Counters describing how groups were used on a document.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct GroupStats {
    /// Groups opened.
    pub begun: usize,
    /// Groups merged successfully.
    pub assimilated: usize,
    /// Groups whose merge was rejected.
    pub rejected: usize,
}

/// One in-memory document.
#[derive(Debug)]
pub struct MemoryDocument {
    id: DocumentId,
    title: String,
    seed: ObjectId,
    linked: bool,
    read_only: bool,
    modified_elsewhere: bool,
    active_view: Option<EntityId>,
    active_design_option: Option<EntityId>,
    active_workset: Option<WorksetId>,
    next_entity: u64,
    next_handle: u64,
    entities: BTreeMap<EntityId, StoredEntity>,
    scopes: Vec<OpenScope>,
    groups: Vec<OpenGroup>,
    pending: DocumentChange,
    outbox: Vec<DocumentChange>,
    undo: Vec<String>,
    stats: GroupStats,
    reject_merges: Option<String>,
    reject_attachments: Option<String>,
}

impl MemoryDocument {
    /// Empty editable document.
    pub fn new(id: DocumentId, title: impl Into<String>) -> Self {
        let title = title.into();
        Self {
            id,
            seed: make_object_id(&format!("{}/{title}", id.0)),
            title,
            linked: false,
            read_only: false,
            modified_elsewhere: false,
            active_view: None,
            active_design_option: None,
            active_workset: None,
            next_entity: 1,
            next_handle: 1,
            entities: BTreeMap::new(),
            scopes: Vec::new(),
            groups: Vec::new(),
            pending: DocumentChange::new(id, CommitKind::Committed),
            outbox: Vec::new(),
            undo: Vec::new(),
            stats: GroupStats::default(),
            reject_merges: None,
            reject_attachments: None,
        }
    }

    /// Marks the document as a linked reference.
    pub fn set_linked(&mut self, linked: bool) {
        self.linked = linked;
    }

    /// Marks the document read-only.
    pub fn set_read_only(&mut self, read_only: bool) {
        self.read_only = read_only;
    }

    /// Simulates uncommitted modifications held by another command.
    pub fn set_modified(&mut self, modified: bool) {
        self.modified_elsewhere = modified;
    }

    /// Sets the active graphical view.
    pub fn set_active_view(&mut self, view: Option<EntityId>) {
        self.active_view = view;
    }

    /// Sets the active design option.
    pub fn set_active_design_option(&mut self, option: Option<EntityId>) {
        self.active_design_option = option;
    }

    /// Sets the active workset.
    pub fn set_active_workset(&mut self, workset: Option<WorksetId>) {
        self.active_workset = workset;
    }

    /// Makes every following group merge fail with `reason` (`None` heals).
    pub fn reject_merges(&mut self, reason: Option<&str>) {
        self.reject_merges = reason.map(str::to_owned);
    }

    /// Makes every following attachment write fail with `reason` (`None` heals).
    pub fn reject_attachments(&mut self, reason: Option<&str>) {
        self.reject_attachments = reason.map(str::to_owned);
    }

    /// Creates an entity.
    ///
    /// # Errors
    /// [`HostError::NotEditable`] on linked or read-only documents.
    pub fn create(&mut self, spec: EntitySpec) -> Result<EntityId, HostError> {
        self.ensure_editable()?;
        let id = self.allocate(spec, BTreeMap::new());
        self.autocommit("Create");
        Ok(id)
    }

    /// Copies an entity, attachments included, under a fresh unique id.
    ///
    /// # Errors
    /// [`HostError::UnknownEntity`] if `source` is not live.
    pub fn duplicate(&mut self, source: EntityId) -> Result<EntityId, HostError> {
        self.ensure_editable()?;
        let stored = self.stored(source)?.clone();
        let id = self.allocate(stored.spec, stored.attachments);
        self.autocommit("Duplicate");
        Ok(id)
    }

    /// Changes the entity's payload the way an interactive edit would.
    ///
    /// # Errors
    /// [`HostError::UnknownEntity`] if `id` is not live.
    pub fn modify(&mut self, id: EntityId) -> Result<(), HostError> {
        self.ensure_editable()?;
        self.stored_mut(id)?.revision += 1;
        self.record_modified(id);
        self.autocommit("Modify");
        Ok(())
    }

    /// Hands the entity a new unique id, as a host does when it re-keys an
    /// element (e.g. pasted into another project and back).
    ///
    /// # Errors
    /// [`HostError::UnknownEntity`] if `id` is not live.
    pub fn reissue_unique_id(&mut self, id: EntityId) -> Result<UniqueId, HostError> {
        self.ensure_editable()?;
        let stored = self.stored_mut(id)?;
        stored.generation += 1;
        let generation = stored.generation;
        self.record_modified(id);
        self.autocommit("Rekey");
        Ok(make_unique_id(&self.seed, id, generation))
    }

    /// Payload revision of `id` (bumped by [`MemoryDocument::modify`]).
    #[must_use]
    pub fn revision(&self, id: EntityId) -> Option<u64> {
        self.entities.get(&id).map(|e| e.revision)
    }

    /// Live entity ids in ascending order.
    #[must_use]
    pub fn entity_ids(&self) -> Vec<EntityId> {
        self.entities.keys().copied().collect()
    }

    /// Number of live entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entities.len()
    }

    /// Returns `true` when the document holds no entities.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entities.is_empty()
    }

    /// Names of the entries on the undo stack, oldest first.
    #[must_use]
    pub fn undo_log(&self) -> &[String] {
        &self.undo
    }

    /// Group usage counters.
    #[must_use]
    pub fn group_stats(&self) -> GroupStats {
        self.stats
    }

    /// Number of currently open groups.
    #[must_use]
    pub fn open_groups(&self) -> usize {
        self.groups.len()
    }

    /// Takes the change batches committed since the last call.
    pub fn take_changes(&mut self) -> Vec<DocumentChange> {
        std::mem::take(&mut self.outbox)
    }

    fn ensure_editable(&self) -> Result<(), HostError> {
        if self.linked || self.read_only {
            return Err(HostError::NotEditable(self.id));
        }
        Ok(())
    }

    fn stored(&self, id: EntityId) -> Result<&StoredEntity, HostError> {
        self.entities
            .get(&id)
            .ok_or(HostError::UnknownEntity(EntityRef::new(self.id, id)))
    }

    fn stored_mut(&mut self, id: EntityId) -> Result<&mut StoredEntity, HostError> {
        let doc = self.id;
        self.entities
            .get_mut(&id)
            .ok_or(HostError::UnknownEntity(EntityRef::new(doc, id)))
    }

    fn allocate(&mut self, spec: EntitySpec, attachments: BTreeMap<TypeId, AtomPayload>) -> EntityId {
        let id = EntityId(self.next_entity);
        self.next_entity += 1;
        self.entities.insert(
            id,
            StoredEntity {
                spec,
                generation: 0,
                revision: 0,
                attachments,
            },
        );
        self.pending.added.insert(id);
        id
    }

    fn handle(&mut self) -> u64 {
        let h = self.next_handle;
        self.next_handle += 1;
        h
    }

    fn record_modified(&mut self, id: EntityId) {
        if !self.pending.added.contains(&id) {
            self.pending.modified.insert(id);
        }
    }

    fn record_deleted(&mut self, id: EntityId) {
        if !self.pending.added.remove(&id) {
            self.pending.modified.remove(&id);
            self.pending.deleted.insert(id);
        }
    }

    fn autocommit(&mut self, name: &str) {
        if self.scopes.is_empty() {
            self.finish_commit(name);
        }
    }

    fn finish_commit(&mut self, name: &str) {
        let change = std::mem::replace(
            &mut self.pending,
            DocumentChange::new(self.id, CommitKind::Committed),
        );
        if !change.is_empty() {
            self.undo.push(name.to_owned());
            self.outbox.push(change);
        }
    }
}

impl Document for MemoryDocument {
    fn id(&self) -> DocumentId {
        self.id
    }

    fn title(&self) -> &str {
        &self.title
    }

    fn is_linked(&self) -> bool {
        self.linked
    }

    fn is_read_only(&self) -> bool {
        self.read_only
    }

    fn is_modified(&self) -> bool {
        self.modified_elsewhere || !self.scopes.is_empty()
    }

    fn entity(&self, id: EntityId) -> Option<EntityInfo> {
        let stored = self.entities.get(&id)?;
        Some(EntityInfo {
            id,
            unique_id: make_unique_id(&self.seed, id, stored.generation),
            category: stored.spec.category,
            owner_view: stored.spec.owner_view,
            design_option: stored.spec.design_option,
            workset: stored.spec.workset,
        })
    }

    fn entities_with_attachment(&self, type_id: TypeId) -> Vec<EntityId> {
        self.entities
            .iter()
            .filter(|(_, e)| e.attachments.contains_key(&type_id))
            .map(|(id, _)| *id)
            .collect()
    }

    fn attachment(&self, id: EntityId, type_id: TypeId) -> Option<AtomPayload> {
        self.entities.get(&id)?.attachments.get(&type_id).cloned()
    }

    fn set_attachment(&mut self, id: EntityId, payload: AtomPayload) -> Result<(), HostError> {
        self.ensure_editable()?;
        if let Some(reason) = &self.reject_attachments {
            return Err(HostError::Other(reason.clone()));
        }
        let stored = self.stored_mut(id)?;
        if stored.attachments.get(&payload.type_id) == Some(&payload) {
            return Ok(());
        }
        stored.attachments.insert(payload.type_id, payload);
        self.record_modified(id);
        self.autocommit("Set attachment");
        Ok(())
    }

    fn remove_attachment(&mut self, id: EntityId, type_id: TypeId) -> Result<bool, HostError> {
        self.ensure_editable()?;
        let removed = self.stored_mut(id)?.attachments.remove(&type_id).is_some();
        if removed {
            self.record_modified(id);
            self.autocommit("Remove attachment");
        }
        Ok(removed)
    }

    fn delete(&mut self, ids: &[EntityId]) -> Result<Vec<EntityId>, HostError> {
        self.ensure_editable()?;
        let mut removed = Vec::new();
        for id in ids {
            if self.entities.remove(id).is_some() {
                self.record_deleted(*id);
                removed.push(*id);
            }
        }
        self.autocommit("Delete");
        Ok(removed)
    }

    fn begin_scope(&mut self, name: &str) -> Result<ScopeId, HostError> {
        self.ensure_editable()?;
        let id = ScopeId(self.handle());
        self.scopes.push(OpenScope {
            id,
            name: name.to_owned(),
            entities: self.entities.clone(),
            pending: self.pending.clone(),
        });
        Ok(id)
    }

    fn commit_scope(&mut self, scope: ScopeId) -> Result<(), HostError> {
        match self.scopes.last() {
            Some(open) if open.id == scope => {}
            _ => return Err(HostError::UnknownScope(scope)),
        }
        if let Some(open) = self.scopes.pop() {
            if self.scopes.is_empty() {
                self.finish_commit(&open.name);
            }
        }
        Ok(())
    }

    fn rollback_scope(&mut self, scope: ScopeId) -> Result<(), HostError> {
        match self.scopes.last() {
            Some(open) if open.id == scope => {}
            _ => return Err(HostError::UnknownScope(scope)),
        }
        if let Some(open) = self.scopes.pop() {
            self.entities = open.entities;
            self.pending = open.pending;
        }
        Ok(())
    }

    fn begin_group(&mut self, name: &str) -> Result<GroupId, HostError> {
        self.ensure_editable()?;
        if !self.scopes.is_empty() {
            return Err(HostError::Other(format!(
                "cannot start group '{name}' inside an open transaction"
            )));
        }
        let id = GroupId(self.handle());
        self.groups.push(OpenGroup {
            id,
            name: name.to_owned(),
            undo_mark: self.undo.len(),
        });
        self.stats.begun += 1;
        Ok(id)
    }

    fn assimilate_group(&mut self, group: GroupId) -> Result<(), HostError> {
        match self.groups.last() {
            Some(open) if open.id == group => {}
            _ => return Err(HostError::UnknownGroup(group)),
        }
        if !self.scopes.is_empty() {
            return Err(HostError::Other("transaction still open".to_owned()));
        }
        let Some(open) = self.groups.pop() else {
            return Err(HostError::UnknownGroup(group));
        };
        if let Some(reason) = &self.reject_merges {
            self.stats.rejected += 1;
            return Err(HostError::MergeRejected(reason.clone()));
        }
        if self.undo.len() > open.undo_mark {
            self.undo.truncate(open.undo_mark);
            self.undo.push(open.name);
        }
        self.stats.assimilated += 1;
        Ok(())
    }

    fn active_view(&self) -> Option<EntityId> {
        self.active_view
    }

    fn active_design_option(&self) -> Option<EntityId> {
        self.active_design_option
    }

    fn active_workset(&self) -> Option<WorksetId> {
        self.active_workset
    }
}

/// A session's worth of open documents.
#[derive(Debug, Default)]
pub struct MemoryHost {
    documents: BTreeMap<DocumentId, MemoryDocument>,
    active: Option<DocumentId>,
    injected: Vec<DocumentChange>,
    next_id: u32,
}

impl MemoryHost {
    /// Host with no documents open.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Opens an editable document. The first one opened becomes active.
    pub fn add_document(&mut self, title: &str) -> DocumentId {
        self.next_id += 1;
        let id = DocumentId(self.next_id);
        self.documents.insert(id, MemoryDocument::new(id, title));
        if self.active.is_none() {
            self.active = Some(id);
        }
        id
    }

    /// Opens a linked reference document.
    pub fn add_linked_document(&mut self, title: &str) -> DocumentId {
        let id = self.add_document(title);
        if let Some(doc) = self.documents.get_mut(&id) {
            doc.set_linked(true);
        }
        id
    }

    /// Closes a document; pending notifications of it are dropped.
    pub fn close_document(&mut self, id: DocumentId) -> Option<MemoryDocument> {
        if self.active == Some(id) {
            self.active = None;
        }
        self.documents.remove(&id)
    }

    /// Makes `id` the active document.
    pub fn set_active(&mut self, id: DocumentId) {
        self.active = Some(id);
    }

    /// Borrow a concrete document.
    #[must_use]
    pub fn doc(&self, id: DocumentId) -> Option<&MemoryDocument> {
        self.documents.get(&id)
    }

    /// Mutably borrow a concrete document.
    pub fn doc_mut(&mut self, id: DocumentId) -> Option<&mut MemoryDocument> {
        self.documents.get_mut(&id)
    }

    /// Queues a raw notification (undo/redo batches, foreign hosts).
    pub fn inject(&mut self, change: DocumentChange) {
        self.injected.push(change);
    }
}

impl DocumentHost for MemoryHost {
    fn document_ids(&self) -> Vec<DocumentId> {
        self.documents.keys().copied().collect()
    }

    fn active_document(&self) -> Option<DocumentId> {
        self.active
    }

    fn document(&self, id: DocumentId) -> Option<&dyn Document> {
        self.documents.get(&id).map(|d| d as &dyn Document)
    }

    fn document_mut(&mut self, id: DocumentId) -> Option<&mut dyn Document> {
        self.documents.get_mut(&id).map(|d| d as &mut dyn Document)
    }

    fn drain_changes(&mut self) -> Vec<DocumentChange> {
        let mut changes: Vec<DocumentChange> = self
            .documents
            .values_mut()
            .flat_map(MemoryDocument::take_changes)
            .collect();
        changes.append(&mut self.injected);
        changes
    }
}
