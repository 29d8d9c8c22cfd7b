//! Conditional-read cache primitives.
//!
//! GitHub answers a `GET` carrying `If-None-Match: <etag>` with `304 Not
//! Modified` when the object has not changed since that ETag was issued. The
//! reconciler stores the last ETag next to the observed attributes and replays
//! it on the next read, skipping the state write entirely on a 304.

use std::fmt;

use reqwest::header::{ETAG, HeaderMap};
use serde::{Deserialize, Serialize};

/// Opaque validation token (an HTTP ETag, weak or strong, kept verbatim).
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ValidationToken(String);

impl ValidationToken {
    /// Wrap a raw token.
    #[must_use]
    pub fn new(raw: impl Into<String>) -> Self {
        Self(raw.into())
    }

    /// Raw token, suitable for an `If-None-Match` header.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for ValidationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ValidationToken").field(&self.0).finish()
    }
}

impl fmt::Display for ValidationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// Extract the `ETag` response header.
#[must_use]
pub fn extract_etag(headers: &HeaderMap) -> Option<ValidationToken> {
    headers
        .get(ETAG)
        .and_then(|v| v.to_str().ok())
        .filter(|v| !v.is_empty())
        .map(ValidationToken::new)
}

/// Result of a conditional read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConditionalRead<T> {
    /// The server confirmed the cached copy is still current (HTTP 304).
    NotModified,
    /// Fresh data, with the token to present next time (if the server sent one).
    Fetched {
        /// The fetched data.
        data: T,
        /// Validation token for the next conditional read.
        token: Option<ValidationToken>,
    },
}

impl<T> ConditionalRead<T> {
    /// True on a 304.
    #[inline]
    pub const fn is_not_modified(&self) -> bool {
        matches!(self, Self::NotModified)
    }

    /// Transform the payload, keeping the token.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> ConditionalRead<U> {
        match self {
            Self::NotModified => ConditionalRead::NotModified,
            Self::Fetched { data, token } => ConditionalRead::Fetched {
                data: f(data),
                token,
            },
        }
    }

    /// Fallible version of [`ConditionalRead::map`].
    ///
    /// # Errors
    ///
    /// Propagates the error returned by `f`.
    pub fn try_map<U, E>(self, f: impl FnOnce(T) -> Result<U, E>) -> Result<ConditionalRead<U>, E> {
        match self {
            Self::NotModified => Ok(ConditionalRead::NotModified),
            Self::Fetched { data, token } => Ok(ConditionalRead::Fetched {
                data: f(data)?,
                token,
            }),
        }
    }
}

/// Whether a read may be answered with `NotModified`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Replay the stored token, if any.
    Conditional,
    /// Always fetch the full object (a forced refresh).
    Fresh,
}

impl ReadMode {
    /// Token to send for this mode, given the one on record.
    #[must_use]
    pub fn token<'a>(self, stored: Option<&'a ValidationToken>) -> Option<&'a ValidationToken> {
        match self {
            Self::Conditional => stored,
            Self::Fresh => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use reqwest::header::HeaderValue;

    #[test]
    fn etag_extraction() {
        let mut headers = HeaderMap::new();
        assert_eq!(extract_etag(&headers), None);

        headers.insert(ETAG, HeaderValue::from_static("W/\"abc123\""));
        assert_eq!(extract_etag(&headers), Some(ValidationToken::new("W/\"abc123\"")));

        headers.insert(ETAG, HeaderValue::from_static(""));
        assert_eq!(extract_etag(&headers), None);
    }

    #[test]
    fn conditional_read_mapping() {
        let fetched = ConditionalRead::Fetched {
            data: 2,
            token: Some(ValidationToken::new("\"t\"")),
        };
        assert_eq!(
            fetched.map(|n| n * 10),
            ConditionalRead::Fetched {
                data: 20,
                token: Some(ValidationToken::new("\"t\"")),
            }
        );

        let not_modified: ConditionalRead<i32> = ConditionalRead::NotModified;
        assert!(not_modified.is_not_modified());
        let mapped: Result<ConditionalRead<i32>, &str> = not_modified.try_map(|_| Err("never called"));
        assert_eq!(mapped, Ok(ConditionalRead::NotModified));
    }

    #[test]
    fn fresh_reads_never_send_a_token() {
        let stored = ValidationToken::new("\"v1\"");
        assert_eq!(ReadMode::Conditional.token(Some(&stored)), Some(&stored));
        assert_eq!(ReadMode::Fresh.token(Some(&stored)), None);
        assert_eq!(ReadMode::Conditional.token(None), None);
    }
}
