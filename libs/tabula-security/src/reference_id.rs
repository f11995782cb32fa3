//! External row identity.
//!
//! A [`ReferenceId`] is the only identifier that crosses the engine boundary.
//! Internal auto-increment keys stay inside the storage layer; every foreign
//! reference is translated to and from this type on the way in and out.

use std::fmt;
use std::str::FromStr;

use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use uuid::Uuid;

/// Width of the binary form.
pub const REFERENCE_ID_LEN: usize = 16;

/// The all-zero identifier, meaning "absent".
pub const NULL_REFERENCE_ID: ReferenceId = ReferenceId([0; REFERENCE_ID_LEN]);

/// Reference id parse/decode failures.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ReferenceIdError {
    #[error("invalid reference id length: expected exactly {expected} bytes, got {actual}")]
    Length { expected: usize, actual: usize },

    #[error("invalid reference id '{value}': {reason}")]
    Parse { value: String, reason: String },
}

/// 128-bit opaque identifier, rendered as a canonical UUID string.
///
/// Equality and ordering are byte-wise, so the type is usable as a map key
/// for in-memory caches as well as a persisted column value.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct ReferenceId([u8; REFERENCE_ID_LEN]);

impl ReferenceId {
    pub const NULL: Self = NULL_REFERENCE_ID;

    /// Generate a fresh random identifier.
    #[must_use]
    pub fn new_v4() -> Self {
        Self(*Uuid::new_v4().as_bytes())
    }

    #[must_use]
    pub const fn from_array(bytes: [u8; REFERENCE_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Decode the binary form.
    ///
    /// # Errors
    /// Returns [`ReferenceIdError::Length`] unless `data` is exactly 16 bytes.
    pub fn from_bytes(data: &[u8]) -> Result<Self, ReferenceIdError> {
        let bytes: [u8; REFERENCE_ID_LEN] =
            data.try_into().map_err(|_| ReferenceIdError::Length {
                expected: REFERENCE_ID_LEN,
                actual: data.len(),
            })?;
        Ok(Self(bytes))
    }

    /// Parse the textual form. Surrounding double or single quotes are stripped.
    ///
    /// # Errors
    /// Returns [`ReferenceIdError::Parse`] if the text is not a UUID.
    pub fn parse(text: &str) -> Result<Self, ReferenceIdError> {
        let trimmed = strip_quotes(text.trim());
        Uuid::parse_str(trimmed)
            .map(Self::from)
            .map_err(|e| ReferenceIdError::Parse {
                value: text.to_owned(),
                reason: e.to_string(),
            })
    }

    /// Convert anything that may carry an identifier, degrading to
    /// [`NULL_REFERENCE_ID`] when it cannot be interpreted.
    ///
    /// This is the read-site conversion: an unparseable value means "absent".
    /// Write paths must use [`IntoReferenceId::try_reference_id`] instead.
    #[must_use]
    pub fn lenient<T: IntoReferenceId + ?Sized>(value: &T) -> Self {
        match value.try_reference_id() {
            Ok(id) => id,
            Err(e) => {
                tracing::warn!(error = %e, "unparseable reference id treated as absent");
                Self::NULL
            }
        }
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; REFERENCE_ID_LEN] {
        &self.0
    }

    #[must_use]
    pub fn to_vec(self) -> Vec<u8> {
        self.0.to_vec()
    }

    #[must_use]
    pub fn is_null(self) -> bool {
        self == Self::NULL
    }

    #[must_use]
    pub fn as_uuid(self) -> Uuid {
        Uuid::from_bytes(self.0)
    }
}

fn strip_quotes(s: &str) -> &str {
    if s.len() >= 2
        && ((s.starts_with('"') && s.ends_with('"')) || (s.starts_with('\'') && s.ends_with('\'')))
    {
        &s[1..s.len() - 1]
    } else {
        s
    }
}

impl From<Uuid> for ReferenceId {
    fn from(u: Uuid) -> Self {
        Self(*u.as_bytes())
    }
}

impl From<ReferenceId> for Uuid {
    fn from(r: ReferenceId) -> Self {
        r.as_uuid()
    }
}

impl FromStr for ReferenceId {
    type Err = ReferenceIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for ReferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_uuid().hyphenated())
    }
}

impl fmt::Debug for ReferenceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ReferenceId({self})")
    }
}

impl Serialize for ReferenceId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for ReferenceId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct ReferenceIdVisitor;

        impl Visitor<'_> for ReferenceIdVisitor {
            type Value = ReferenceId;

            fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str("a UUID string or 16 raw bytes")
            }

            fn visit_str<E: de::Error>(self, v: &str) -> Result<Self::Value, E> {
                ReferenceId::parse(v).map_err(E::custom)
            }

            fn visit_bytes<E: de::Error>(self, v: &[u8]) -> Result<Self::Value, E> {
                ReferenceId::from_bytes(v).map_err(E::custom)
            }
        }

        deserializer.deserialize_str(ReferenceIdVisitor)
    }
}

/// Values that may carry a reference id.
///
/// Covers the shapes identifiers arrive in: raw bytes from a driver,
/// strings from clients, already-typed ids, and optional wrappers.
pub trait IntoReferenceId {
    /// Strict conversion.
    ///
    /// # Errors
    /// Returns [`ReferenceIdError`] when the value cannot be interpreted.
    fn try_reference_id(&self) -> Result<ReferenceId, ReferenceIdError>;
}

impl IntoReferenceId for ReferenceId {
    fn try_reference_id(&self) -> Result<ReferenceId, ReferenceIdError> {
        Ok(*self)
    }
}

impl IntoReferenceId for Uuid {
    fn try_reference_id(&self) -> Result<ReferenceId, ReferenceIdError> {
        Ok(ReferenceId::from(*self))
    }
}

impl IntoReferenceId for str {
    fn try_reference_id(&self) -> Result<ReferenceId, ReferenceIdError> {
        if self == "<nil>" {
            return Ok(ReferenceId::NULL);
        }
        ReferenceId::parse(self)
    }
}

impl IntoReferenceId for String {
    fn try_reference_id(&self) -> Result<ReferenceId, ReferenceIdError> {
        self.as_str().try_reference_id()
    }
}

impl IntoReferenceId for [u8] {
    fn try_reference_id(&self) -> Result<ReferenceId, ReferenceIdError> {
        ReferenceId::from_bytes(self)
    }
}

impl IntoReferenceId for Vec<u8> {
    fn try_reference_id(&self) -> Result<ReferenceId, ReferenceIdError> {
        self.as_slice().try_reference_id()
    }
}

impl<T: IntoReferenceId> IntoReferenceId for Option<T> {
    fn try_reference_id(&self) -> Result<ReferenceId, ReferenceIdError> {
        match self {
            Some(v) => v.try_reference_id(),
            None => Ok(ReferenceId::NULL),
        }
    }
}
