//! Remote adapter contract.
//!
//! Unique responsibility: define the small capability surface every managed
//! resource kind exposes to the reconciler.
//!
//! A kind implements four primitives (conditional get, mutate, delete and,
//! when GitHub applies a change asynchronously, status polling). The
//! reconciler is generic over this trait, so a new kind is one impl rather
//! than a new set of create/read/update/delete functions.

use async_trait::async_trait;
use reqwest::StatusCode;
use thiserror::Error;

use crate::github_cache::{ConditionalRead, ValidationToken};
use crate::github_identity::{IdentityError, ResourceIdentity};
use crate::github_state::{Attributes, DesiredState};

/// What a remote read returned: the object's identity and its attributes.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteSnapshot {
    /// Identity of the object.
    pub identity: ResourceIdentity,
    /// Remote attributes, including server-computed ones.
    pub attributes: Attributes,
}

/// Which mutation to perform.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MutateOp<'a> {
    /// Create a new object.
    Create,
    /// Update the object with the given identity in place.
    Update(&'a ResourceIdentity),
}

/// Handle to a change GitHub accepted but has not applied yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollHandle {
    /// Object the change applies to.
    pub identity: ResourceIdentity,
    /// Remote-assigned run/operation ID.
    pub operation_id: String,
    /// URL of the run, if GitHub returned one.
    pub url: Option<String>,
}

/// Result of a mutation.
#[derive(Debug, Clone, PartialEq)]
pub enum MutateOutcome {
    /// Change applied; the snapshot is the object as it now stands.
    Applied(RemoteSnapshot),
    /// Change accepted for asynchronous processing (HTTP 202).
    AcceptedAsync(PollHandle),
}

/// Status of an asynchronous remote operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollStatus {
    /// Queued, waiting or requested.
    Pending,
    /// Running.
    InProgress,
    /// Finished successfully.
    Succeeded,
    /// Finished with a failure.
    Failed,
    /// Cancelled before finishing.
    Cancelled,
    /// Timed out on the remote side.
    TimedOut,
}

impl PollStatus {
    /// True once the operation can no longer change status.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending | Self::InProgress)
    }

    /// True for the single successful terminal status.
    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(self, Self::Succeeded)
    }
}

/// Error returned by a remote primitive.
#[derive(Debug, Error)]
pub enum RemoteError {
    /// The object does not exist (HTTP 404).
    #[error("not found: {0}")]
    NotFound(String),
    /// Unsuccessful API response.
    #[error("github api error: status={status}, body={body}")]
    Api {
        /// HTTP status code.
        status: StatusCode,
        /// Response body.
        body: String,
    },
    /// HTTP transport error.
    #[error("http error: {0}")]
    Http(#[source] reqwest::Error),
    /// Response body could not be decoded.
    #[error("json decode error: {reason}")]
    Json {
        /// Decoder message.
        reason: String,
        /// The response body.
        body: String,
    },
    /// Desired attributes rejected before any request was sent.
    #[error("invalid desired state: {0}")]
    InvalidDesired(String),
    /// Malformed identifier, detected before any request was sent.
    #[error(transparent)]
    Identity(#[from] IdentityError),
    /// The kind does not support the requested primitive.
    #[error("operation not supported: {0}")]
    Unsupported(&'static str),
}

impl RemoteError {
    /// True for [`RemoteError::NotFound`].
    #[must_use]
    pub const fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// True for errors raised locally, before contacting GitHub.
    #[must_use]
    pub const fn is_local(&self) -> bool {
        matches!(self, Self::InvalidDesired(_) | Self::Identity(_))
    }
}

/// Capabilities of a managed resource kind.
#[async_trait]
pub trait RemoteResource: Send + Sync {
    /// Stable kind name, e.g. `"github_organization_webhook"`. Namespaces state records.
    fn kind(&self) -> &'static str;

    /// Whether the kind can be changed in place. Kinds whose attributes are all
    /// force-new return `false`.
    fn supports_update(&self) -> bool {
        true
    }

    /// Read the object, replaying `token` when given.
    ///
    /// # Errors
    ///
    /// [`RemoteError::NotFound`] if the object no longer exists.
    async fn get(
        &self,
        identity: &ResourceIdentity,
        token: Option<&ValidationToken>,
    ) -> Result<ConditionalRead<RemoteSnapshot>, RemoteError>;

    /// Create or update the object.
    ///
    /// # Errors
    ///
    /// [`RemoteError::InvalidDesired`] for attributes rejected locally, any
    /// other variant for remote failures.
    async fn mutate(&self, op: MutateOp<'_>, desired: &DesiredState) -> Result<MutateOutcome, RemoteError>;

    /// Status of an accepted asynchronous change.
    ///
    /// # Errors
    ///
    /// [`RemoteError::Unsupported`] for kinds that never answer with
    /// [`MutateOutcome::AcceptedAsync`].
    async fn poll_status(&self, handle: &PollHandle) -> Result<PollStatus, RemoteError> {
        let _ = handle;
        Err(RemoteError::Unsupported("poll_status"))
    }

    /// Delete the object.
    ///
    /// # Errors
    ///
    /// [`RemoteError::NotFound`] if it was already gone.
    async fn delete(&self, identity: &ResourceIdentity) -> Result<(), RemoteError>;

    /// Copy write-only values GitHub does not echo back (e.g. secrets) from
    /// `known` into `fresh`. Default: nothing to carry.
    fn carry_forward(&self, known: &Attributes, fresh: &mut Attributes) {
        let _ = (known, fresh);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses() {
        assert!(!PollStatus::Pending.is_terminal());
        assert!(!PollStatus::InProgress.is_terminal());
        for s in [
            PollStatus::Succeeded,
            PollStatus::Failed,
            PollStatus::Cancelled,
            PollStatus::TimedOut,
        ] {
            assert!(s.is_terminal(), "{s:?}");
        }
        assert!(PollStatus::Succeeded.is_success());
        assert!(!PollStatus::Failed.is_success());
    }

    #[test]
    fn error_classification() {
        assert!(RemoteError::NotFound("/x".into()).is_not_found());
        assert!(RemoteError::InvalidDesired("events".into()).is_local());
        assert!(RemoteError::from(IdentityError::NoParts).is_local());
        assert!(
            !RemoteError::Api {
                status: StatusCode::BAD_GATEWAY,
                body: String::new(),
            }
            .is_local()
        );
    }
}
