// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Identity tags: the only artifact Strand persists.
//!
//! An [`IdentityTag`] rides on one entity through the host's attachment
//! mechanism and records which stream slot produced the entity and at which
//! position. Hosts copy attachments when entities are duplicated, so a tag
//! is only trusted once [`IdentityTag::verify`] confirms its owner id still
//! matches the entity carrying it.

use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::attachment::{AtomPayload, Codec, CodecError};
use crate::document::{Document, HostError};
use crate::filter::StreamFilter;
use crate::ident::{make_type_id, EntityId, EntityRef, TypeId, UniqueId};
use crate::path::{IdentityPath, StreamId};

/// Schema label of the identity tag attachment.
pub const IDENTITY_TAG_SCHEMA: &str = "strand/identity-tag/v1";

/// Persisted tracking record attached to one entity.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityTag {
    /// Unique id of the entity the tag was written for.
    pub owner: UniqueId,
    /// Identity path of the owning slot.
    pub path: IdentityPath,
    /// Slot name.
    pub slot: String,
    /// Position within the stream.
    pub index: u32,
    /// Reserved.
    pub flags: u32,
}

impl IdentityTag {
    /// Trust check: the tag must have been written for this very entity.
    #[must_use]
    pub fn verify(self, unique_id: &UniqueId) -> Option<TrustedTag> {
        (self.owner == *unique_id).then_some(TrustedTag(self))
    }

    /// Returns `true` if the tag belongs to stream `id`.
    #[must_use]
    pub fn belongs_to(&self, id: &StreamId) -> bool {
        self.slot == id.slot && self.path == id.path
    }
}

/// An [`IdentityTag`] whose owner id matched its entity at read time.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrustedTag(IdentityTag);

impl TrustedTag {
    /// Borrow the verified record.
    #[must_use]
    pub fn tag(&self) -> &IdentityTag {
        &self.0
    }

    /// Unwrap the verified record.
    #[must_use]
    pub fn into_inner(self) -> IdentityTag {
        self.0
    }
}

/// CBOR codec for [`IdentityTag`].
pub struct IdentityTagCodec;

impl Codec<IdentityTag> for IdentityTagCodec {
    fn type_id() -> TypeId {
        make_type_id(IDENTITY_TAG_SCHEMA)
    }

    fn encode_canon(value: &IdentityTag) -> Result<Bytes, CodecError> {
        let mut out = Vec::new();
        ciborium::into_writer(value, &mut out).map_err(|e| CodecError::Encode(e.to_string()))?;
        Ok(Bytes::from(out))
    }

    fn decode_strict(bytes: &Bytes) -> Result<IdentityTag, CodecError> {
        ciborium::from_reader(bytes.as_ref()).map_err(|_| CodecError::InvalidBytes)
    }
}

fn raw<D>(doc: &D, entity: EntityId) -> Option<IdentityTag>
where
    D: Document + ?Sized,
{
    let payload = doc.attachment(entity, IdentityTagCodec::type_id())?;
    match payload.decode_with::<IdentityTagCodec, IdentityTag>() {
        Ok(tag) => Some(tag),
        Err(err) => {
            tracing::debug!(document = %doc.id(), %entity, %err, "ignoring undecodable identity tag");
            None
        }
    }
}

/// Reads and verifies the tag on `entity`.
pub fn read<D>(doc: &D, entity: EntityId) -> Option<TrustedTag>
where
    D: Document + ?Sized,
{
    let info = doc.entity(entity)?;
    raw(doc, entity)?.verify(&info.unique_id)
}

/// Returns `true` if `entity` carries a trusted tag.
pub fn is_tracked<D>(doc: &D, entity: EntityId) -> bool
where
    D: Document + ?Sized,
{
    read(doc, entity).is_some()
}

/// Writes (or refreshes) the tag of `entity` for stream `id` at `index`.
///
/// The owner id is always reset to the entity's current unique id; reserved
/// flags survive only from a trusted previous tag.
pub fn write<D>(doc: &mut D, entity: EntityId, id: &StreamId, index: u32) -> Result<(), HostError>
where
    D: Document + ?Sized,
{
    let info = doc
        .entity(entity)
        .ok_or_else(|| HostError::UnknownEntity(EntityRef::new(doc.id(), entity)))?;
    let flags = read(&*doc, entity).map_or(0, |t| t.tag().flags);
    let tag = IdentityTag {
        owner: info.unique_id,
        path: id.path.clone(),
        slot: id.slot.clone(),
        index,
        flags,
    };
    let payload = AtomPayload::encode_with::<IdentityTagCodec, IdentityTag>(&tag)
        .map_err(|e| HostError::Other(e.to_string()))?;
    doc.set_attachment(entity, payload)
}

/// Removes any tag (trusted or not) from `entity`.
pub fn remove<D>(doc: &mut D, entity: EntityId) -> Result<bool, HostError>
where
    D: Document + ?Sized,
{
    doc.remove_attachment(entity, IdentityTagCodec::type_id())
}

/// Every trusted tag in `doc` whose entity passes `filter`, in entity id order.
pub fn scan<D>(doc: &D, filter: &StreamFilter) -> Vec<(EntityId, IdentityTag)>
where
    D: Document + ?Sized,
{
    let mut ids = doc.entities_with_attachment(IdentityTagCodec::type_id());
    ids.sort_unstable();
    ids.into_iter()
        .filter_map(|id| {
            let info = doc.entity(id)?;
            if !filter.passes(&info) {
                return None;
            }
            let trusted = raw(doc, id)?.verify(&info.unique_id)?;
            Some((id, trusted.into_inner()))
        })
        .collect()
}

/// Entities in `doc` tracked by any slot under `path`, regardless of slot name.
pub fn tracked_by_path<D>(doc: &D, path: &IdentityPath, filter: &StreamFilter) -> Vec<EntityId>
where
    D: Document + ?Sized,
{
    scan(doc, filter)
        .into_iter()
        .filter(|(_, tag)| tag.path == *path)
        .map(|(id, _)| id)
        .collect()
}
