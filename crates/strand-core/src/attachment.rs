// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Typed attachment payloads and codec boundaries.
//!
//! Hosts expose some way of hanging extra data off a persisted entity
//! (extensible storage, user data, xattrs). Strand sees that mechanism as a
//! map `TypeId -> bytes` per entity: an [`AtomPayload`]. The `TypeId` is part
//! of the payload so that "same bytes, different meaning" never decodes
//! silently as the wrong record.

use bytes::Bytes;
use thiserror::Error;

use crate::ident::TypeId;

/// Typed, opaque payload attached to an entity.
///
/// Laws / invariants:
/// - `type_id` names the schema of `bytes`; one entity carries at most one
///   payload per `type_id`.
/// - `bytes` are opaque to the host.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AtomPayload {
    /// Type identifier describing how to interpret `bytes`.
    pub type_id: TypeId,
    /// Opaque payload bytes.
    pub bytes: Bytes,
}

impl AtomPayload {
    /// Constructs a new typed atom payload.
    #[must_use]
    pub fn new(type_id: TypeId, bytes: Bytes) -> Self {
        Self { type_id, bytes }
    }

    /// Encodes `value` with codec `C`.
    ///
    /// # Errors
    /// Forwards the codec's encode error.
    pub fn encode_with<C, T>(value: &T) -> Result<Self, CodecError>
    where
        C: Codec<T>,
    {
        Ok(Self::new(C::type_id(), C::encode_canon(value)?))
    }

    /// Attempts to decode the payload as `T` using codec `C`.
    ///
    /// # Errors
    /// Returns [`CodecError::TypeMismatch`] when the `type_id` does not match
    /// `C::type_id()`, or forwards the codec's strict decode error.
    pub fn decode_with<C, T>(&self) -> Result<T, CodecError>
    where
        C: Codec<T>,
    {
        let expected = C::type_id();
        if self.type_id != expected {
            return Err(CodecError::TypeMismatch {
                expected,
                found: self.type_id,
            });
        }
        C::decode_strict(&self.bytes)
    }
}

/// Error returned by payload encoding and strict decoding.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// The payload `type_id` did not match the codec's expected type id.
    #[error("payload type mismatch: expected {expected:?}, found {found:?}")]
    TypeMismatch {
        /// Expected type identifier.
        expected: TypeId,
        /// Found type identifier.
        found: TypeId,
    },
    /// The byte content was invalid for the expected type.
    #[error("invalid payload bytes")]
    InvalidBytes,
    /// The value could not be encoded.
    #[error("encode failed: {0}")]
    Encode(String),
}

/// Canonical codec for a typed payload `T`.
///
/// Contract:
/// - `encode_canon` must produce a stable byte representation.
/// - `decode_strict` must either return the unique decoded `T` or a
///   [`CodecError`]; it must not consult ambient state.
pub trait Codec<T> {
    /// Type id stored next to the bytes.
    fn type_id() -> TypeId;

    /// Encodes `value` into its canonical byte representation.
    ///
    /// # Errors
    /// Returns [`CodecError::Encode`] when the value cannot be represented.
    fn encode_canon(value: &T) -> Result<Bytes, CodecError>;

    /// Decodes bytes strictly into `T`.
    ///
    /// # Errors
    /// Returns an error if `bytes` is not a valid canonical encoding of `T`.
    fn decode_strict(bytes: &Bytes) -> Result<T, CodecError>;
}
