// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Stream ids and pre-tagged entities for memory documents.

use strand_core::memory::{EntitySpec, MemoryDocument};
use strand_core::{make_object_id, tag, EntityId, HostError, IdentityPath, StreamFilter, StreamId};

/// Stream id built from labelled path segments, without a dataflow host.
pub fn stream_id(segments: &[&str], slot: &str) -> StreamId {
    let path = segments.iter().map(|s| make_object_id(s)).collect();
    StreamId::new(IdentityPath::new(path), slot)
}

/// Creates `count` entities in `doc` tagged for `id` at positions `0..count`,
/// as a previous cycle would have left them.
pub fn seed_tracked(
    doc: &mut MemoryDocument,
    id: &StreamId,
    count: u32,
    spec: &EntitySpec,
) -> Result<Vec<EntityId>, HostError> {
    (0..count)
        .map(|index| {
            let entity = doc.create(spec.clone())?;
            tag::write(doc, entity, id, index)?;
            Ok(entity)
        })
        .collect()
}

/// Seeds two trusted entities claiming position 0 and one at position 1.
/// Opening `id` afterwards must discard all three.
pub fn seed_conflict(doc: &mut MemoryDocument, id: &StreamId) -> Result<Vec<EntityId>, HostError> {
    let mut seeded = seed_tracked(doc, id, 2, &EntitySpec::default())?;
    let clash = doc.create(EntitySpec::default())?;
    tag::write(doc, clash, id, 0)?;
    seeded.push(clash);
    Ok(seeded)
}

/// `(index, entity)` of every trusted tag of `id` in `doc`, by index.
pub fn tracked_positions(doc: &MemoryDocument, id: &StreamId) -> Vec<(u32, EntityId)> {
    let mut positions: Vec<(u32, EntityId)> = tag::scan(doc, &StreamFilter::unfiltered())
        .into_iter()
        .filter(|(_, t)| t.belongs_to(id))
        .map(|(entity, t)| (t.index, entity))
        .collect();
    positions.sort_unstable();
    positions
}
