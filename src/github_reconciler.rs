//! Reconciler.
//!
//! Presents synchronous create/read/update/delete over GitHub objects that
//! are eventually consistent and sometimes change asynchronously.
//!
//! Per object: `Absent -> Creating -> Live -> (Updating | PollingConvergence)
//! -> Live -> Deleting -> Absent`.
//!
//! - Create/Update that GitHub accepts asynchronously are polled to a terminal
//!   status (see `github_poll`), then read back.
//! - Read replays the stored ETag; a 304 leaves the state store untouched, a
//!   404 clears the record and is reported as [`ReadOutcome::Gone`].
//! - Delete of an object that is already gone succeeds.
//!
//! The reconciler holds no client and no state: every call takes the
//! resource handle and the state store explicitly. Callers serialize
//! operations on the same identity; distinct identities may be reconciled
//! concurrently.

use thiserror::Error;
use tokio::time::Instant;

use crate::github_cache::{ConditionalRead, ReadMode, ValidationToken};
use crate::github_identity::{IdentityError, ResourceIdentity};
use crate::github_poll::{PollError, PollPolicy, poll_until_converged};
use crate::github_remote::{MutateOp, MutateOutcome, PollHandle, PollStatus, RemoteError, RemoteResource, RemoteSnapshot};
use crate::github_state::{Attributes, DesiredState, ObservedState, StateStore, StateStoreError, now_unix_ms};

/// Result of [`Reconciler::read`].
#[derive(Debug, Clone, PartialEq)]
pub enum ReadOutcome {
    /// Fresh attributes were fetched and stored.
    Refreshed(ObservedState),
    /// GitHub answered 304; the stored record (if any) is still current.
    Unchanged(Option<ObservedState>),
    /// The object was deleted out-of-band; its record has been cleared.
    Gone,
}

impl ReadOutcome {
    /// Observed state after the read, if the object still exists.
    #[must_use]
    pub fn observed(&self) -> Option<&ObservedState> {
        match self {
            Self::Refreshed(state) | Self::Unchanged(Some(state)) => Some(state),
            Self::Unchanged(None) | Self::Gone => None,
        }
    }
}

/// Error type for reconciler operations.
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Malformed identifier. Never sent to GitHub.
    #[error("invalid identity: {0}")]
    InvalidIdentity(#[from] IdentityError),
    /// Desired attributes rejected locally. Never sent to GitHub.
    #[error("invalid desired state for {kind}: {reason}")]
    InvalidDesired {
        /// Resource kind.
        kind: &'static str,
        /// Why the attributes were rejected.
        reason: String,
    },
    /// Reading the object failed for a reason other than "not found".
    #[error("reading {kind} {identity} failed: {source}")]
    RemoteReadFailed {
        /// Resource kind.
        kind: &'static str,
        /// Object identity.
        identity: ResourceIdentity,
        /// Underlying error.
        #[source]
        source: RemoteError,
    },
    /// Creating or updating the object failed.
    #[error("writing {kind} failed: {source}")]
    RemoteWriteFailed {
        /// Resource kind.
        kind: &'static str,
        /// Object identity, when known (always for updates).
        identity: Option<ResourceIdentity>,
        /// Underlying error.
        #[source]
        source: RemoteError,
    },
    /// Deleting the object failed for a reason other than "not found".
    #[error("deleting {kind} {identity} failed: {source}")]
    RemoteDeleteFailed {
        /// Resource kind.
        kind: &'static str,
        /// Object identity.
        identity: ResourceIdentity,
        /// Underlying error.
        #[source]
        source: RemoteError,
    },
    /// The asynchronous operation reached a failed terminal status.
    #[error("{kind} {identity}: operation {operation_id} ended with status {status:?}")]
    ConvergenceFailed {
        /// Resource kind.
        kind: &'static str,
        /// Object identity.
        identity: ResourceIdentity,
        /// Remote operation ID.
        operation_id: String,
        /// Terminal status.
        status: PollStatus,
    },
    /// The asynchronous operation was still pending when the budget ran out.
    #[error("{kind} {identity}: operation {operation_id} still pending after {attempts} polls")]
    ConvergenceTimeout {
        /// Resource kind.
        kind: &'static str,
        /// Object identity.
        identity: ResourceIdentity,
        /// Remote operation ID.
        operation_id: String,
        /// Polls issued.
        attempts: u32,
    },
    /// The kind cannot be changed in place.
    #[error("{kind} does not support in-place updates")]
    UpdateNotSupported {
        /// Resource kind.
        kind: &'static str,
    },
    /// The state store failed.
    #[error("state store error: {0}")]
    State(#[from] StateStoreError),
}

/// Generic reconciler over any [`RemoteResource`].
#[derive(Debug, Clone, Default)]
pub struct Reconciler {
    policy: PollPolicy,
}

impl Reconciler {
    /// Reconciler with the given convergence poll policy.
    #[must_use]
    pub const fn new(policy: PollPolicy) -> Self {
        Self { policy }
    }

    /// Current poll policy.
    #[must_use]
    pub const fn policy(&self) -> &PollPolicy {
        &self.policy
    }

    /// Create the object described by `desired`.
    ///
    /// # Errors
    ///
    /// See [`ReconcileError`]. On error, no record is written.
    pub async fn create<R, S>(&self, resource: &R, store: &S, desired: &DesiredState) -> Result<ObservedState, ReconcileError>
    where
        R: RemoteResource + ?Sized,
        S: StateStore + ?Sized,
    {
        self.create_until(resource, store, desired, None).await
    }

    /// [`Reconciler::create`] with a caller deadline for convergence polling.
    ///
    /// # Errors
    ///
    /// See [`ReconcileError`]. On error, no record is written.
    pub async fn create_until<R, S>(
        &self,
        resource: &R,
        store: &S,
        desired: &DesiredState,
        deadline: Option<Instant>,
    ) -> Result<ObservedState, ReconcileError>
    where
        R: RemoteResource + ?Sized,
        S: StateStore + ?Sized,
    {
        let kind = resource.kind();
        let outcome = resource
            .mutate(MutateOp::Create, desired)
            .await
            .map_err(|e| write_error(kind, None, e))?;

        let observed = match outcome {
            MutateOutcome::Applied(snapshot) => {
                let mut attributes = snapshot.attributes;
                resource.carry_forward(desired.attributes(), &mut attributes);
                observed_state(kind, snapshot.identity, None, attributes)
            }
            MutateOutcome::AcceptedAsync(handle) => {
                self.converge(resource, &handle, deadline).await?;
                self.fetch(resource, &handle.identity, desired.attributes()).await?
            }
        };

        store.save(&observed)?;
        tracing::info!(kind, identity = %observed.identity, "created");
        Ok(observed)
    }

    /// Refresh the record of `identity` from GitHub.
    ///
    /// # Errors
    ///
    /// [`ReconcileError::RemoteReadFailed`] for anything but "not modified"
    /// or "not found".
    pub async fn read<R, S>(&self, resource: &R, store: &S, identity: &ResourceIdentity) -> Result<ReadOutcome, ReconcileError>
    where
        R: RemoteResource + ?Sized,
        S: StateStore + ?Sized,
    {
        self.read_with(resource, store, identity, ReadMode::Conditional).await
    }

    /// Like [`Reconciler::read`], but never replays the stored token.
    ///
    /// # Errors
    ///
    /// Same as [`Reconciler::read`].
    pub async fn refresh<R, S>(&self, resource: &R, store: &S, identity: &ResourceIdentity) -> Result<ReadOutcome, ReconcileError>
    where
        R: RemoteResource + ?Sized,
        S: StateStore + ?Sized,
    {
        self.read_with(resource, store, identity, ReadMode::Fresh).await
    }

    /// Update the object in place. Its identity is never changed.
    ///
    /// # Errors
    ///
    /// See [`ReconcileError`].
    pub async fn update<R, S>(
        &self,
        resource: &R,
        store: &S,
        identity: &ResourceIdentity,
        desired: &DesiredState,
    ) -> Result<ObservedState, ReconcileError>
    where
        R: RemoteResource + ?Sized,
        S: StateStore + ?Sized,
    {
        self.update_until(resource, store, identity, desired, None).await
    }

    /// [`Reconciler::update`] with a caller deadline for convergence polling.
    ///
    /// # Errors
    ///
    /// See [`ReconcileError`].
    pub async fn update_until<R, S>(
        &self,
        resource: &R,
        store: &S,
        identity: &ResourceIdentity,
        desired: &DesiredState,
        deadline: Option<Instant>,
    ) -> Result<ObservedState, ReconcileError>
    where
        R: RemoteResource + ?Sized,
        S: StateStore + ?Sized,
    {
        let kind = resource.kind();
        if !resource.supports_update() {
            return Err(ReconcileError::UpdateNotSupported { kind });
        }

        let outcome = resource
            .mutate(MutateOp::Update(identity), desired)
            .await
            .map_err(|e| write_error(kind, Some(identity), e))?;

        if let MutateOutcome::AcceptedAsync(handle) = outcome {
            self.converge(resource, &handle, deadline).await?;
        }

        // Re-read under the stored identity so update and read agree on computed fields.
        let observed = self.fetch(resource, identity, desired.attributes()).await?;
        store.save(&observed)?;
        tracing::info!(kind, %identity, "updated");
        Ok(observed)
    }

    /// Delete the object. Deleting an object that is already gone succeeds.
    ///
    /// # Errors
    ///
    /// [`ReconcileError::RemoteDeleteFailed`] for anything but "not found".
    pub async fn delete<R, S>(&self, resource: &R, store: &S, identity: &ResourceIdentity) -> Result<(), ReconcileError>
    where
        R: RemoteResource + ?Sized,
        S: StateStore + ?Sized,
    {
        let kind = resource.kind();
        match resource.delete(identity).await {
            Ok(()) => tracing::info!(kind, %identity, "deleted"),
            Err(e) if e.is_not_found() => {
                tracing::debug!(kind, %identity, "already deleted");
            }
            Err(RemoteError::Identity(e)) => return Err(ReconcileError::InvalidIdentity(e)),
            Err(source) => {
                return Err(ReconcileError::RemoteDeleteFailed {
                    kind,
                    identity: identity.clone(),
                    source,
                });
            }
        }

        store.clear(kind, identity)?;
        Ok(())
    }

    async fn read_with<R, S>(
        &self,
        resource: &R,
        store: &S,
        identity: &ResourceIdentity,
        mode: ReadMode,
    ) -> Result<ReadOutcome, ReconcileError>
    where
        R: RemoteResource + ?Sized,
        S: StateStore + ?Sized,
    {
        let kind = resource.kind();
        let prior = store.load(kind, identity)?;
        let token = mode.token(prior.as_ref().and_then(|p| p.token.as_ref()));

        match resource.get(identity, token).await {
            Ok(ConditionalRead::NotModified) => Ok(ReadOutcome::Unchanged(prior)),
            Ok(ConditionalRead::Fetched { data, token: etag }) => {
                let RemoteSnapshot { mut attributes, .. } = data;
                if let Some(known) = prior.as_ref().map(|p| &p.attributes) {
                    resource.carry_forward(known, &mut attributes);
                }
                let observed = observed_state(kind, identity.clone(), etag, attributes);
                store.save(&observed)?;
                Ok(ReadOutcome::Refreshed(observed))
            }
            Err(e) if e.is_not_found() => {
                tracing::info!(
                    kind,
                    %identity,
                    "removing from state because it no longer exists in GitHub"
                );
                store.clear(kind, identity)?;
                Ok(ReadOutcome::Gone)
            }
            Err(RemoteError::Identity(e)) => Err(ReconcileError::InvalidIdentity(e)),
            Err(source) => Err(ReconcileError::RemoteReadFailed {
                kind,
                identity: identity.clone(),
                source,
            }),
        }
    }

    /// Unconditional read right after a mutation; nothing is stored here.
    async fn fetch<R>(
        &self,
        resource: &R,
        identity: &ResourceIdentity,
        known: &Attributes,
    ) -> Result<ObservedState, ReconcileError>
    where
        R: RemoteResource + ?Sized,
    {
        let kind = resource.kind();
        let read = resource
            .get(identity, None)
            .await
            .map_err(|source| ReconcileError::RemoteReadFailed {
                kind,
                identity: identity.clone(),
                source,
            })?;

        match read {
            ConditionalRead::Fetched { data, token } => {
                let mut attributes = data.attributes;
                resource.carry_forward(known, &mut attributes);
                Ok(observed_state(kind, identity.clone(), token, attributes))
            }
            ConditionalRead::NotModified => Err(ReconcileError::RemoteReadFailed {
                kind,
                identity: identity.clone(),
                source: RemoteError::Unsupported("304 on an unconditional read"),
            }),
        }
    }

    async fn converge<R>(&self, resource: &R, handle: &PollHandle, deadline: Option<Instant>) -> Result<(), ReconcileError>
    where
        R: RemoteResource + ?Sized,
    {
        let kind = resource.kind();
        tracing::info!(
            kind,
            identity = %handle.identity,
            operation = %handle.operation_id,
            "change accepted, waiting for it to converge"
        );

        match poll_until_converged(resource, handle, &self.policy, deadline).await {
            Ok(_) => Ok(()),
            Err(PollError::Failed { status, .. }) => Err(ReconcileError::ConvergenceFailed {
                kind,
                identity: handle.identity.clone(),
                operation_id: handle.operation_id.clone(),
                status,
            }),
            Err(PollError::Timeout { attempts, .. }) => Err(ReconcileError::ConvergenceTimeout {
                kind,
                identity: handle.identity.clone(),
                operation_id: handle.operation_id.clone(),
                attempts,
            }),
            Err(PollError::Remote(source)) => Err(ReconcileError::RemoteReadFailed {
                kind,
                identity: handle.identity.clone(),
                source,
            }),
        }
    }
}

fn observed_state(
    kind: &str,
    identity: ResourceIdentity,
    token: Option<ValidationToken>,
    attributes: Attributes,
) -> ObservedState {
    ObservedState {
        kind: kind.to_string(),
        identity,
        token,
        attributes,
        observed_at_ms: now_unix_ms(),
    }
}

fn write_error(kind: &'static str, identity: Option<&ResourceIdentity>, err: RemoteError) -> ReconcileError {
    match err {
        RemoteError::InvalidDesired(reason) => ReconcileError::InvalidDesired { kind, reason },
        RemoteError::Identity(e) => ReconcileError::InvalidIdentity(e),
        source => ReconcileError::RemoteWriteFailed {
            kind,
            identity: identity.cloned(),
            source,
        },
    }
}
