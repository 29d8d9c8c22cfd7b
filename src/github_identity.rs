//! Composite resource identifiers.
//!
//! Unique responsibility: encode and decode the string keys that address a
//! remote GitHub object.
//!
//! Two shapes exist:
//! - a numeric ID rendered as a decimal string (`"123456"`),
//! - a multi-part ID joined with `:` (`"octo-org:hello-world"`).
//!
//! Encoding rejects parts that contain the separator instead of escaping them,
//! so that `decode(encode(parts))` always returns the original parts.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Separator between the parts of a composite identifier.
pub const SEPARATOR: char = ':';

/// Identifier of a remote object, assigned once at creation.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResourceIdentity(String);

impl ResourceIdentity {
    /// Wrap an already-encoded identifier (e.g. one read back from state).
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Join `parts` with [`SEPARATOR`].
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError`] if no parts are given, or if any part is
    /// empty or contains the separator.
    pub fn encode<S: AsRef<str>>(parts: &[S]) -> Result<Self, IdentityError> {
        if parts.is_empty() {
            return Err(IdentityError::NoParts);
        }

        let mut out = String::new();
        for (index, part) in parts.iter().enumerate() {
            let part = part.as_ref();
            if part.is_empty() {
                return Err(IdentityError::EmptyPart { index });
            }
            if part.contains(SEPARATOR) {
                return Err(IdentityError::SeparatorInPart {
                    index,
                    part: part.to_string(),
                });
            }
            if index > 0 {
                out.push(SEPARATOR);
            }
            out.push_str(part);
        }

        Ok(Self(out))
    }

    /// Shorthand for a two-part `"a:b"` identifier.
    ///
    /// # Errors
    ///
    /// Same as [`ResourceIdentity::encode`].
    pub fn two_part(a: &str, b: &str) -> Result<Self, IdentityError> {
        Self::encode(&[a, b])
    }

    /// Split into exactly `expected_parts` segments.
    ///
    /// Splitting stops after `expected_parts - 1` separators, so only the last
    /// segment may itself contain `:`.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError`] if fewer segments than expected are present
    /// or any segment is empty.
    pub fn decode(&self, expected_parts: usize) -> Result<Vec<&str>, IdentityError> {
        if expected_parts == 0 {
            return Err(IdentityError::NoParts);
        }

        let parts: Vec<&str> = self.0.splitn(expected_parts, SEPARATOR).collect();
        if parts.len() < expected_parts {
            return Err(IdentityError::Malformed {
                id: self.0.clone(),
                expected: expected_parts,
                found: parts.len(),
            });
        }
        if let Some(index) = parts.iter().position(|p| p.is_empty()) {
            return Err(IdentityError::EmptyPart { index });
        }

        Ok(parts)
    }

    /// Decode a two-part identifier into `(a, b)`.
    ///
    /// # Errors
    ///
    /// Same as [`ResourceIdentity::decode`].
    pub fn parse_two_part(&self) -> Result<(&str, &str), IdentityError> {
        match self.decode(2)?.as_slice() {
            [a, b] => Ok((*a, *b)),
            _ => Err(IdentityError::Malformed {
                id: self.0.clone(),
                expected: 2,
                found: 0,
            }),
        }
    }

    /// Render a numeric ID.
    #[must_use]
    pub fn from_numeric(id: i64) -> Self {
        Self(id.to_string())
    }

    /// Parse back a numeric ID.
    ///
    /// # Errors
    ///
    /// Returns [`IdentityError::NotNumeric`] if the identifier is not a
    /// decimal `i64`.
    pub fn as_numeric(&self) -> Result<i64, IdentityError> {
        self.0.parse::<i64>().map_err(|_| IdentityError::NotNumeric {
            id: self.0.clone(),
        })
    }

    /// String form of the identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ResourceIdentity").field(&self.0).finish()
    }
}

impl fmt::Display for ResourceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Malformed composite identifier.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IdentityError {
    /// Asked to encode or decode zero parts.
    #[error("identifier must have at least one part")]
    NoParts,
    /// A part is empty.
    #[error("identifier part {index} is empty")]
    EmptyPart {
        /// Position of the empty part.
        index: usize,
    },
    /// A part contains the separator and cannot round-trip.
    #[error("identifier part {index} ({part:?}) contains the separator ':'")]
    SeparatorInPart {
        /// Position of the offending part.
        index: usize,
        /// The offending part.
        part: String,
    },
    /// Fewer segments than expected.
    #[error("unexpected format of ID ({id:?}), expected {expected} parts, found {found}")]
    Malformed {
        /// The raw identifier.
        id: String,
        /// Number of parts expected.
        expected: usize,
        /// Number of parts found.
        found: usize,
    },
    /// Not a decimal integer.
    #[error("unexpected ID format ({id:?}), expected a numerical ID")]
    NotNumeric {
        /// The raw identifier.
        id: String,
    },
}
