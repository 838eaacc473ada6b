// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Identifier and hashing utilities.
use std::fmt;

use blake3::Hasher;
use serde::{Deserialize, Serialize};

/// Canonical 256-bit hash backing opaque identifiers.
pub type Hash = [u8; 32];

/// Opaque identifier used inside identity paths.
///
/// Node instances and graphs are both addressed by `ObjectId`. Hosts that
/// already carry GUID-like ids can wrap them with [`ObjectId::from_bytes`];
/// everything else derives ids from labels via [`make_object_id`].
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ObjectId(pub Hash);

impl ObjectId {
    /// Wraps raw bytes (e.g. a host GUID widened to 32 bytes).
    #[must_use]
    pub const fn from_bytes(bytes: Hash) -> Self {
        Self(bytes)
    }

    /// Returns the canonical byte representation of this id.
    #[must_use]
    pub fn as_bytes(&self) -> &Hash {
        &self.0
    }

    /// First eight bytes, hex encoded. Used for log fields.
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..8])
    }
}

impl fmt::Debug for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ObjectId({})", self.short())
    }
}

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.short())
    }
}

/// Strongly typed identifier for the schema of an attachment payload.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct TypeId(pub Hash);

/// Per-session handle of an open document.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct DocumentId(pub u32);

impl fmt::Display for DocumentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "doc#{}", self.0)
    }
}

/// Host-assigned entity id, unique within its document and stable across edits.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct EntityId(pub u64);

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Host-assigned unique id string of an entity.
///
/// Unlike [`EntityId`], a copy of an entity never shares its `UniqueId`,
/// which is what makes identity tags verifiable.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UniqueId(String);

impl UniqueId {
    /// Wraps a host unique id.
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    /// Borrow the raw string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UniqueId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Document-qualified entity reference.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct EntityRef {
    /// Owning document.
    pub document: DocumentId,
    /// Entity within `document`.
    pub id: EntityId,
}

impl EntityRef {
    /// Constructs a reference.
    #[must_use]
    pub const fn new(document: DocumentId, id: EntityId) -> Self {
        Self { document, id }
    }
}

impl fmt::Display for EntityRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.document, self.id)
    }
}

/// Produces a stable, domain‑separated object identifier (prefix `b"object:"`) using BLAKE3.
pub fn make_object_id(label: &str) -> ObjectId {
    let mut hasher = Hasher::new();
    hasher.update(b"object:");
    hasher.update(label.as_bytes());
    ObjectId(hasher.finalize().into())
}

/// Produces a stable, domain‑separated type identifier (prefix `b"type:"`) using BLAKE3.
pub fn make_type_id(label: &str) -> TypeId {
    let mut hasher = Hasher::new();
    hasher.update(b"type:");
    hasher.update(label.as_bytes());
    TypeId(hasher.finalize().into())
}

/// Derives a unique id for entity `id` of the document identified by `seed`.
///
/// `generation` distinguishes ids handed out by the same document for the
/// same numeric entity id (hosts never reuse them, but the in-memory host
/// bumps it on duplicate).
pub fn make_unique_id(seed: &ObjectId, id: EntityId, generation: u32) -> UniqueId {
    let mut hasher = Hasher::new();
    hasher.update(b"entity:");
    hasher.update(seed.as_bytes());
    hasher.update(&id.0.to_le_bytes());
    hasher.update(&generation.to_le_bytes());
    let digest: Hash = hasher.finalize().into();
    UniqueId(format!("{}-{:08x}", hex::encode(&digest[..16]), id.0))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn domain_separation_prevents_cross_type_collisions() {
        let lbl = "foo";
        assert_ne!(make_object_id(lbl).0, make_type_id(lbl).0);
    }

    #[test]
    fn unique_ids_differ_per_document_and_entity() {
        let a = make_object_id("doc-a");
        let b = make_object_id("doc-b");
        let id = EntityId(7);
        assert_ne!(make_unique_id(&a, id, 0), make_unique_id(&b, id, 0));
        assert_ne!(make_unique_id(&a, id, 0), make_unique_id(&a, EntityId(8), 0));
        assert_ne!(make_unique_id(&a, id, 0), make_unique_id(&a, id, 1));
        assert_eq!(make_unique_id(&a, id, 0), make_unique_id(&a, id, 0));
    }
}
