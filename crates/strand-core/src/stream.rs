// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Position-addressed entity streams.
//!
//! A [`Stream`] gives one dataflow slot stable ownership of a sub-sequence
//! of entities in one document. It is rebuilt from trusted identity tags at
//! cycle start, walked forward by the producer with [`Stream::read`] and
//! [`Stream::write`], and collects every tracked entity the producer did not
//! re-claim when [`Stream::dispose`] runs at cycle end.
//!
//! Cursor rules:
//! - `read` always advances by one position.
//! - `write` after a `read` targets the position just read; any other
//!   `write` advances first.
//! - A failed `write` leaves the cursor where it was.

use std::collections::{BTreeMap, BTreeSet};

use thiserror::Error;
use tracing::{debug, warn};

use crate::document::{delete_best_effort, Document, HostError};
use crate::filter::StreamFilter;
use crate::ident::{DocumentId, EntityId, EntityRef};
use crate::path::StreamId;
use crate::tag;

/// Errors reported by stream operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    /// The written entity lives in another document.
    #[error("entity {entity} does not belong to stream document {stream}")]
    ForeignDocument {
        /// Document the stream is bound to.
        stream: DocumentId,
        /// Offending entity.
        entity: EntityRef,
    },
    /// The written entity does not pass the stream filter.
    #[error("entity {0} does not pass the stream filter")]
    FilterRejected(EntityRef),
    /// The written entity is not (or no longer) valid.
    #[error("entity {0} is not valid")]
    UnknownEntity(EntityRef),
    /// The stream was handed a different document than the one it was opened on.
    #[error("stream is bound to {expected} but was given {found}")]
    DocumentMismatch {
        /// Document the stream is bound to.
        expected: DocumentId,
        /// Document passed in.
        found: DocumentId,
    },
    /// The cursor cannot advance past `u32::MAX`.
    #[error("stream position overflow")]
    PositionOverflow,
    /// Streams need an identity path to scope their tags.
    #[error("stream id has an empty identity path")]
    EmptyIdentityPath,
    /// A registry holds no stream for the document.
    #[error("no stream open for {0}")]
    NotOpen(DocumentId),
    /// The host failed.
    #[error(transparent)]
    Host(#[from] HostError),
}

/// What closing a stream did to its document.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DisposeReport {
    /// Document the stream was bound to.
    pub document: Option<DocumentId>,
    /// Entities deleted as orphans at close.
    pub deleted: Vec<EntityId>,
    /// Entities deleted earlier because a write replaced them.
    pub replaced: Vec<EntityId>,
    /// Entities deleted at open because their tags conflicted.
    pub purged: Vec<EntityId>,
    /// Entities written during the stream's lifetime and still valid, in position order.
    pub survivors: Vec<EntityId>,
}

impl DisposeReport {
    /// Every deletion the stream performed.
    #[must_use]
    pub fn total_deleted(&self) -> usize {
        self.deleted.len() + self.replaced.len() + self.purged.len()
    }
}

/// Ordered, position-addressed view over the entities one slot owns in one document.
#[derive(Debug)]
pub struct Stream {
    document: DocumentId,
    id: StreamId,
    filter: StreamFilter,
    tracked: BTreeMap<u32, EntityId>,
    position: Option<u32>,
    step_on_write: bool,
    current: Option<EntityId>,
    written: BTreeMap<u32, Option<EntityId>>,
    claimed: BTreeSet<EntityId>,
    replaced: Vec<EntityId>,
    purged: Vec<EntityId>,
}

impl Stream {
    /// Opens the stream `id` on `doc`.
    ///
    /// Tracked entities are those carrying a trusted tag for `id` that pass
    /// `filter`. When two of them claim the same index the whole set is
    /// deleted inside its own atomic modification and the stream starts
    /// empty.
    ///
    /// # Errors
    /// [`StreamError::EmptyIdentityPath`] if `id` has no path.
    pub fn open<D>(doc: &mut D, id: StreamId, filter: StreamFilter) -> Result<Self, StreamError>
    where
        D: Document + ?Sized,
    {
        if id.path.is_empty() {
            return Err(StreamError::EmptyIdentityPath);
        }
        let candidates: Vec<(EntityId, u32)> = tag::scan(&*doc, &filter)
            .into_iter()
            .filter(|(_, t)| t.belongs_to(&id))
            .map(|(e, t)| (e, t.index))
            .collect();

        let mut tracked = BTreeMap::new();
        let mut conflict = false;
        for (entity, index) in &candidates {
            if tracked.insert(*index, *entity).is_some() {
                conflict = true;
            }
        }

        let mut purged = Vec::new();
        if conflict {
            let ids: Vec<EntityId> = candidates.iter().map(|(e, _)| *e).collect();
            warn!(
                document = %doc.id(),
                stream = %id,
                count = ids.len(),
                "conflicting identity tags; discarding tracked set"
            );
            tracked.clear();
            purged = delete_best_effort(doc, &ids, "Purge conflicting tracked entities");
        }
        debug!(document = %doc.id(), stream = %id, tracked = tracked.len(), "stream opened");

        Ok(Self {
            document: doc.id(),
            id,
            filter,
            tracked,
            position: None,
            step_on_write: true,
            current: None,
            written: BTreeMap::new(),
            claimed: BTreeSet::new(),
            replaced: Vec::new(),
            purged,
        })
    }

    /// Document the stream is bound to.
    #[must_use]
    pub fn document(&self) -> DocumentId {
        self.document
    }

    /// Stream id.
    #[must_use]
    pub fn id(&self) -> &StreamId {
        &self.id
    }

    /// Filter applied at open and on every write.
    #[must_use]
    pub fn filter(&self) -> &StreamFilter {
        &self.filter
    }

    /// Tracked length: last tracked index + 1, or 0.
    #[must_use]
    pub fn len(&self) -> usize {
        self.tracked
            .last_key_value()
            .map_or(0, |(index, _)| *index as usize + 1)
    }

    /// Returns `true` when nothing was tracked at open.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tracked.is_empty()
    }

    /// Current cursor position; `None` before the first read or write.
    #[must_use]
    pub fn position(&self) -> Option<u32> {
        self.position
    }

    /// Entities tracked at open, in index order.
    pub fn tracked(&self) -> impl Iterator<Item = (u32, EntityId)> + '_ {
        self.tracked.iter().map(|(index, entity)| (*index, *entity))
    }

    /// Tracked positions beyond the cursor.
    #[must_use]
    pub fn remaining(&self) -> usize {
        match self.position {
            None => self.tracked.len(),
            Some(p) => self.tracked.range(p.saturating_add(1)..).count(),
        }
    }

    /// Returns `true` once the cursor has passed the last tracked position.
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.remaining() == 0
    }

    /// Advances the cursor and returns the previously written entity there.
    ///
    /// Vacant positions, entities deleted in the meantime and positions past
    /// the end all read as `None`.
    ///
    /// # Errors
    /// [`StreamError::DocumentMismatch`] or [`StreamError::PositionOverflow`].
    pub fn read<D>(&mut self, doc: &D) -> Result<Option<EntityId>, StreamError>
    where
        D: Document + ?Sized,
    {
        self.ensure_document(doc.id())?;
        self.advance()?;
        self.step_on_write = false;
        Ok(self.current.filter(|e| doc.is_valid(*e)))
    }

    /// Assigns `entity` to the current position.
    ///
    /// A different, still-valid entity previously tracked at that position
    /// is deleted right away unless it was written elsewhere in this
    /// stream's lifetime. An entity tracked at a later position is not
    /// protected: swapping two positions deletes the first one written over.
    /// A written entity gets its tag refreshed with the position.
    ///
    /// # Errors
    /// Argument errors ([`StreamError::ForeignDocument`],
    /// [`StreamError::FilterRejected`], [`StreamError::UnknownEntity`]) and
    /// [`StreamError::Host`] when the tag cannot be written all leave the
    /// cursor, the claims and the previous entity untouched.
    pub fn write<D>(&mut self, doc: &mut D, entity: Option<EntityRef>) -> Result<(), StreamError>
    where
        D: Document + ?Sized,
    {
        self.ensure_document(doc.id())?;
        let entity = match entity {
            Some(r) => Some(self.admit(&*doc, r)?),
            None => None,
        };

        let (position, previous) = if self.step_on_write {
            let next = self.next_position()?;
            (next, self.tracked.get(&next).copied())
        } else {
            let position = self.position.ok_or(StreamError::PositionOverflow)?;
            (position, self.current)
        };

        if let Some(e) = entity {
            tag::write(doc, e, &self.id, position)?;
        }

        if let Some(previous) = previous {
            if Some(previous) != entity && !self.claimed.contains(&previous) && doc.is_valid(previous) {
                let deleted = delete_best_effort(doc, &[previous], "Replace tracked entity");
                self.replaced.extend(deleted);
            }
        }

        self.position = Some(position);
        self.current = entity;
        self.step_on_write = true;
        self.written.insert(position, entity);
        if let Some(e) = entity {
            self.claimed.insert(e);
        }
        Ok(())
    }

    /// Closes the stream, deleting every tracked entity not re-claimed.
    pub fn dispose<D>(mut self, doc: &mut D) -> DisposeReport
    where
        D: Document + ?Sized,
    {
        self.collect(doc)
    }

    /// Rewinds, forgets every claim, then collects: every still-valid
    /// tracked entity is deleted and the stream is left empty.
    pub fn clear<D>(&mut self, doc: &mut D) -> DisposeReport
    where
        D: Document + ?Sized,
    {
        self.position = None;
        self.step_on_write = true;
        self.current = None;
        self.written.clear();
        self.claimed.clear();
        let report = self.collect(doc);
        self.tracked.clear();
        report
    }

    fn collect<D>(&mut self, doc: &mut D) -> DisposeReport
    where
        D: Document + ?Sized,
    {
        let mut report = DisposeReport {
            document: Some(self.document),
            replaced: std::mem::take(&mut self.replaced),
            purged: std::mem::take(&mut self.purged),
            ..DisposeReport::default()
        };
        if doc.id() != self.document {
            warn!(stream = %self.id, expected = %self.document, found = %doc.id(), "dispose on foreign document skipped");
            return report;
        }

        let excess: Vec<EntityId> = self
            .tracked
            .iter()
            .filter(|(index, entity)| {
                !self.written.contains_key(*index) && !self.claimed.contains(*entity)
            })
            .map(|(_, entity)| *entity)
            .filter(|entity| doc.is_valid(*entity))
            .collect();
        report.deleted = delete_best_effort(doc, &excess, "Collect orphaned entities");
        report.survivors = self
            .written
            .values()
            .flatten()
            .copied()
            .filter(|e| doc.is_valid(*e))
            .collect();

        debug!(
            document = %self.document,
            stream = %self.id,
            deleted = report.deleted.len(),
            survivors = report.survivors.len(),
            "stream disposed"
        );
        report
    }

    fn ensure_document(&self, found: DocumentId) -> Result<(), StreamError> {
        if found == self.document {
            Ok(())
        } else {
            Err(StreamError::DocumentMismatch {
                expected: self.document,
                found,
            })
        }
    }

    fn admit<D>(&self, doc: &D, entity: EntityRef) -> Result<EntityId, StreamError>
    where
        D: Document + ?Sized,
    {
        if entity.document != self.document {
            return Err(StreamError::ForeignDocument {
                stream: self.document,
                entity,
            });
        }
        let info = doc.entity(entity.id).ok_or(StreamError::UnknownEntity(entity))?;
        if !self.filter.passes(&info) {
            return Err(StreamError::FilterRejected(entity));
        }
        Ok(entity.id)
    }

    fn next_position(&self) -> Result<u32, StreamError> {
        match self.position {
            None => Ok(0),
            Some(p) => p.checked_add(1).ok_or(StreamError::PositionOverflow),
        }
    }

    fn advance(&mut self) -> Result<(), StreamError> {
        let next = self.next_position()?;
        self.position = Some(next);
        self.current = self.tracked.get(&next).copied();
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::expect_used, clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::document::CategoryId;
    use crate::ident::make_object_id;
    use crate::memory::{EntitySpec, MemoryDocument};
    use crate::path::IdentityPath;

    fn sid() -> StreamId {
        StreamId::new(
            IdentityPath::new(vec![make_object_id("n1"), make_object_id("g1")]),
            "Out",
        )
    }

    fn doc() -> MemoryDocument {
        MemoryDocument::new(DocumentId(1), "model")
    }

    fn at(id: EntityId) -> EntityRef {
        EntityRef::new(DocumentId(1), id)
    }

    #[test]
    fn walkthrough_three_cycles() {
        let mut doc = doc();

        let mut s = Stream::open(&mut doc, sid(), StreamFilter::unfiltered()).unwrap();
        assert!(s.is_empty());
        let e1 = doc.create(EntitySpec::default()).unwrap();
        s.write(&mut doc, Some(at(e1))).unwrap();
        let report = s.dispose(&mut doc);
        assert_eq!(report.total_deleted(), 0);
        assert_eq!(report.survivors, vec![e1]);

        let mut s = Stream::open(&mut doc, sid(), StreamFilter::unfiltered()).unwrap();
        assert_eq!(s.read(&doc).unwrap(), Some(e1));
        s.write(&mut doc, Some(at(e1))).unwrap();
        assert_eq!(s.position(), Some(0));
        let report = s.dispose(&mut doc);
        assert_eq!(report.total_deleted(), 0);
        assert!(doc.is_valid(e1));

        let mut s = Stream::open(&mut doc, sid(), StreamFilter::unfiltered()).unwrap();
        s.write(&mut doc, None).unwrap();
        let report = s.dispose(&mut doc);
        assert_eq!(report.replaced, vec![e1]);
        assert!(!doc.is_valid(e1));

        let s = Stream::open(&mut doc, sid(), StreamFilter::unfiltered()).unwrap();
        assert!(s.is_empty());
    }

    #[test]
    fn read_past_end_is_exhausted_and_vacant() {
        let mut doc = doc();
        let mut s = Stream::open(&mut doc, sid(), StreamFilter::unfiltered()).unwrap();
        let a = doc.create(EntitySpec::default()).unwrap();
        s.write(&mut doc, Some(at(a))).unwrap();
        s.dispose(&mut doc);

        let mut s = Stream::open(&mut doc, sid(), StreamFilter::unfiltered()).unwrap();
        assert_eq!(s.len(), 1);
        assert!(!s.is_exhausted());
        assert_eq!(s.read(&doc).unwrap(), Some(a));
        assert!(s.is_exhausted());
        assert_eq!(s.read(&doc).unwrap(), None);
        assert_eq!(s.position(), Some(1));
    }

    #[test]
    fn rejected_write_keeps_cursor() {
        let mut doc = doc();
        let wall = CategoryId(1);
        let mut s = Stream::open(
            &mut doc,
            sid(),
            StreamFilter::unfiltered().with_category(wall),
        )
        .unwrap();
        let floor = doc.create(EntitySpec::category(CategoryId(2))).unwrap();
        assert_eq!(
            s.write(&mut doc, Some(at(floor))),
            Err(StreamError::FilterRejected(at(floor)))
        );
        let foreign = EntityRef::new(DocumentId(9), EntityId(1));
        assert!(matches!(
            s.write(&mut doc, Some(foreign)),
            Err(StreamError::ForeignDocument { .. })
        ));
        assert_eq!(s.position(), None);

        let ok = doc.create(EntitySpec::category(wall)).unwrap();
        s.write(&mut doc, Some(at(ok))).unwrap();
        assert_eq!(s.position(), Some(0));
    }

    #[test]
    fn read_without_write_is_collected() {
        let mut doc = doc();
        let mut s = Stream::open(&mut doc, sid(), StreamFilter::unfiltered()).unwrap();
        let a = doc.create(EntitySpec::default()).unwrap();
        let b = doc.create(EntitySpec::default()).unwrap();
        s.write(&mut doc, Some(at(a))).unwrap();
        s.write(&mut doc, Some(at(b))).unwrap();
        s.dispose(&mut doc);

        let mut s = Stream::open(&mut doc, sid(), StreamFilter::unfiltered()).unwrap();
        assert_eq!(s.read(&doc).unwrap(), Some(a));
        s.write(&mut doc, Some(at(a))).unwrap();
        assert_eq!(s.read(&doc).unwrap(), Some(b));
        let report = s.dispose(&mut doc);
        assert_eq!(report.deleted, vec![b]);
        assert_eq!(report.survivors, vec![a]);
    }

    #[test]
    fn entity_moved_to_an_earlier_position_survives() {
        let mut doc = doc();
        let mut s = Stream::open(&mut doc, sid(), StreamFilter::unfiltered()).unwrap();
        let a = doc.create(EntitySpec::default()).unwrap();
        let b = doc.create(EntitySpec::default()).unwrap();
        s.write(&mut doc, Some(at(a))).unwrap();
        s.write(&mut doc, Some(at(b))).unwrap();
        s.dispose(&mut doc);

        // b moves to position 0, nothing at position 1.
        let mut s = Stream::open(&mut doc, sid(), StreamFilter::unfiltered()).unwrap();
        s.write(&mut doc, Some(at(b))).unwrap();
        s.write(&mut doc, None).unwrap();
        let report = s.dispose(&mut doc);
        assert_eq!(report.replaced, vec![a]);
        assert!(report.deleted.is_empty());
        assert!(doc.is_valid(b));
        assert_eq!(tag::read(&doc, b).unwrap().tag().index, 0);
    }

    #[test]
    fn swapping_positions_deletes_the_first_entity_written_over() {
        let mut doc = doc();
        let mut s = Stream::open(&mut doc, sid(), StreamFilter::unfiltered()).unwrap();
        let a = doc.create(EntitySpec::default()).unwrap();
        let b = doc.create(EntitySpec::default()).unwrap();
        s.write(&mut doc, Some(at(a))).unwrap();
        s.write(&mut doc, Some(at(b))).unwrap();
        s.dispose(&mut doc);

        let mut s = Stream::open(&mut doc, sid(), StreamFilter::unfiltered()).unwrap();
        assert_eq!(s.read(&doc).unwrap(), Some(a));
        s.write(&mut doc, Some(at(b))).unwrap();
        assert!(!doc.is_valid(a));
        assert_eq!(s.read(&doc).unwrap(), Some(b));
        assert_eq!(
            s.write(&mut doc, Some(at(a))),
            Err(StreamError::UnknownEntity(at(a)))
        );
        assert_eq!(s.position(), Some(1));
        s.write(&mut doc, None).unwrap();

        let report = s.dispose(&mut doc);
        assert_eq!(report.replaced, vec![a]);
        assert!(report.deleted.is_empty());
        assert_eq!(report.survivors, vec![b]);
        assert_eq!(tag::read(&doc, b).unwrap().tag().index, 0);
    }

    #[test]
    fn entity_moved_to_a_later_position_is_deleted_when_vacated() {
        let mut doc = doc();
        let mut s = Stream::open(&mut doc, sid(), StreamFilter::unfiltered()).unwrap();
        let a = doc.create(EntitySpec::default()).unwrap();
        s.write(&mut doc, Some(at(a))).unwrap();
        s.dispose(&mut doc);

        let mut s = Stream::open(&mut doc, sid(), StreamFilter::unfiltered()).unwrap();
        s.write(&mut doc, None).unwrap();
        assert!(matches!(
            s.write(&mut doc, Some(at(a))),
            Err(StreamError::UnknownEntity(_))
        ));
        assert_eq!(s.position(), Some(0));
        let report = s.dispose(&mut doc);
        assert_eq!(report.replaced, vec![a]);
        assert!(report.survivors.is_empty());
    }

    #[test]
    fn failed_tag_write_leaves_the_stream_untouched() {
        let mut doc = doc();
        let mut s = Stream::open(&mut doc, sid(), StreamFilter::unfiltered()).unwrap();
        let a = doc.create(EntitySpec::default()).unwrap();
        s.write(&mut doc, Some(at(a))).unwrap();
        s.dispose(&mut doc);

        let mut s = Stream::open(&mut doc, sid(), StreamFilter::unfiltered()).unwrap();
        let b = doc.create(EntitySpec::default()).unwrap();
        doc.reject_attachments(Some("storage full"));
        assert!(matches!(
            s.write(&mut doc, Some(at(b))),
            Err(StreamError::Host(HostError::Other(_)))
        ));
        assert_eq!(s.position(), None);
        assert!(doc.is_valid(a));

        doc.reject_attachments(None);
        s.write(&mut doc, Some(at(a))).unwrap();
        assert_eq!(s.position(), Some(0));
        s.write(&mut doc, Some(at(b))).unwrap();
        let report = s.dispose(&mut doc);
        assert_eq!(report.total_deleted(), 0);
        assert_eq!(report.survivors, vec![a, b]);
        assert!(tag::read(&doc, b).is_some());
    }

    #[test]
    fn failed_tag_write_does_not_claim_the_entity() {
        let mut doc = doc();
        let mut s = Stream::open(&mut doc, sid(), StreamFilter::unfiltered()).unwrap();
        let a = doc.create(EntitySpec::default()).unwrap();
        s.write(&mut doc, Some(at(a))).unwrap();
        s.dispose(&mut doc);

        let mut s = Stream::open(&mut doc, sid(), StreamFilter::unfiltered()).unwrap();
        let untagged = doc.create(EntitySpec::default()).unwrap();
        assert_eq!(s.read(&doc).unwrap(), Some(a));
        doc.reject_attachments(Some("storage full"));
        assert!(s.write(&mut doc, Some(at(untagged))).is_err());
        doc.reject_attachments(None);

        let report = s.dispose(&mut doc);
        assert_eq!(report.deleted, vec![a]);
        assert!(report.survivors.is_empty());
        assert!(tag::read(&doc, untagged).is_none());
    }

    #[test]
    fn clear_collects_everything() {
        let mut doc = doc();
        let mut s = Stream::open(&mut doc, sid(), StreamFilter::unfiltered()).unwrap();
        for _ in 0..3 {
            let e = doc.create(EntitySpec::default()).unwrap();
            s.write(&mut doc, Some(at(e))).unwrap();
        }
        s.dispose(&mut doc);

        let mut s = Stream::open(&mut doc, sid(), StreamFilter::unfiltered()).unwrap();
        assert_eq!(s.read(&doc).unwrap().map(|e| doc.is_valid(e)), Some(true));
        let report = s.clear(&mut doc);
        assert_eq!(report.deleted.len(), 3);
        assert!(s.is_empty());
        assert!(doc.is_empty());
    }

    #[test]
    fn empty_path_is_rejected() {
        let mut doc = doc();
        let id = StreamId::new(IdentityPath::default(), "Out");
        assert!(matches!(
            Stream::open(&mut doc, id, StreamFilter::unfiltered()),
            Err(StreamError::EmptyIdentityPath)
        ));
    }
}
