// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Fan-out of one stream request across every relevant open document.

use std::collections::BTreeMap;

use tracing::debug;

use crate::document::{CategoryId, DocumentHost, HostError};
use crate::filter::{StreamFilter, StreamMode};
use crate::ident::{DocumentId, EntityId, EntityRef};
use crate::path::StreamId;
use crate::stream::{DisposeReport, Stream, StreamError};

/// One [`Stream`] per relevant document, all sharing a [`StreamId`].
///
/// Documents are `[active]` under [`StreamMode::CURRENT_DOCUMENT`] and every
/// open document otherwise. Linked and read-only documents never get a
/// stream since they cannot hold output.
#[derive(Debug)]
pub struct StreamRegistry {
    id: StreamId,
    mode: StreamMode,
    category: Option<CategoryId>,
    streams: BTreeMap<DocumentId, Stream>,
}

impl StreamRegistry {
    /// Opens `id` on every document `mode` selects, restricted to `category`.
    ///
    /// # Errors
    /// Forwards the first [`Stream::open`] failure.
    pub fn open<H>(
        host: &mut H,
        id: StreamId,
        mode: StreamMode,
        category: Option<CategoryId>,
    ) -> Result<Self, StreamError>
    where
        H: DocumentHost + ?Sized,
    {
        let base = StreamFilter {
            category,
            ..StreamFilter::default()
        };
        Self::open_filtered(host, id, mode, &base)
    }

    /// Like [`StreamRegistry::open`], starting from an explicit base filter.
    ///
    /// The base filter's category and predicate are kept; the mode flags
    /// fill in view, design option and workset per document.
    ///
    /// # Errors
    /// Forwards the first [`Stream::open`] failure.
    pub fn open_filtered<H>(
        host: &mut H,
        id: StreamId,
        mode: StreamMode,
        base: &StreamFilter,
    ) -> Result<Self, StreamError>
    where
        H: DocumentHost + ?Sized,
    {
        let documents = if mode.contains(StreamMode::CURRENT_DOCUMENT) {
            host.active_document().into_iter().collect()
        } else {
            host.document_ids()
        };

        let mut streams = BTreeMap::new();
        for document in documents {
            let Some(doc) = host.document_mut(document) else {
                continue;
            };
            if doc.is_linked() || doc.is_read_only() {
                debug!(%document, stream = %id, "skipping non-editable document");
                continue;
            }
            let mut filter = StreamFilter::for_mode(&*doc, mode, base.category);
            filter.predicate.clone_from(&base.predicate);
            let stream = Stream::open(doc, id.clone(), filter)?;
            streams.insert(document, stream);
        }
        Ok(Self {
            id,
            mode,
            category: base.category,
            streams,
        })
    }

    /// Shared stream id.
    #[must_use]
    pub fn id(&self) -> &StreamId {
        &self.id
    }

    /// Scoping flags the registry was opened with.
    #[must_use]
    pub fn mode(&self) -> StreamMode {
        self.mode
    }

    /// Category restriction the registry was opened with.
    #[must_use]
    pub fn category(&self) -> Option<CategoryId> {
        self.category
    }

    /// Stream for `document`.
    #[must_use]
    pub fn get(&self, document: DocumentId) -> Option<&Stream> {
        self.streams.get(&document)
    }

    /// Mutable stream for `document`.
    pub fn get_mut(&mut self, document: DocumentId) -> Option<&mut Stream> {
        self.streams.get_mut(&document)
    }

    /// Returns `true` if a stream is open on `document`.
    #[must_use]
    pub fn contains(&self, document: DocumentId) -> bool {
        self.streams.contains_key(&document)
    }

    /// Number of documents covered.
    #[must_use]
    pub fn len(&self) -> usize {
        self.streams.len()
    }

    /// Returns `true` when no document qualified.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.streams.is_empty()
    }

    /// Covered documents in ascending order.
    pub fn documents(&self) -> impl Iterator<Item = DocumentId> + '_ {
        self.streams.keys().copied()
    }

    /// `(document, stream)` pairs in document order.
    pub fn iter(&self) -> impl Iterator<Item = (DocumentId, &Stream)> + '_ {
        self.streams.iter().map(|(d, s)| (*d, s))
    }

    /// Reads the next position of the stream on `document`.
    ///
    /// # Errors
    /// [`StreamError::NotOpen`] if `document` is not covered, or the
    /// stream's own read errors.
    pub fn read<H>(&mut self, host: &H, document: DocumentId) -> Result<Option<EntityId>, StreamError>
    where
        H: DocumentHost + ?Sized,
    {
        let stream = self
            .streams
            .get_mut(&document)
            .ok_or(StreamError::NotOpen(document))?;
        let doc = host
            .document(document)
            .ok_or(HostError::UnknownDocument(document))?;
        stream.read(doc)
    }

    /// Writes `entity` at the current position of the stream on `document`.
    ///
    /// # Errors
    /// [`StreamError::NotOpen`] if `document` is not covered, or the
    /// stream's own write errors.
    pub fn write<H>(
        &mut self,
        host: &mut H,
        document: DocumentId,
        entity: Option<EntityRef>,
    ) -> Result<(), StreamError>
    where
        H: DocumentHost + ?Sized,
    {
        let stream = self
            .streams
            .get_mut(&document)
            .ok_or(StreamError::NotOpen(document))?;
        let doc = host
            .document_mut(document)
            .ok_or(HostError::UnknownDocument(document))?;
        stream.write(doc, entity)
    }

    /// Disposes every stream, collecting orphans per document.
    ///
    /// Streams whose document has been closed in the meantime are dropped
    /// without collection.
    pub fn dispose<H>(self, host: &mut H) -> Vec<DisposeReport>
    where
        H: DocumentHost + ?Sized,
    {
        let mut reports = Vec::with_capacity(self.streams.len());
        for (document, stream) in self.streams {
            match host.document_mut(document) {
                Some(doc) => reports.push(stream.dispose(doc)),
                None => debug!(%document, stream = %self.id, "document closed before dispose"),
            }
        }
        reports
    }
}
