//! GH Reconciler - declarative GitHub resource reconciliation library.
//!
//! Keeps a set of GitHub objects in line with a desired description:
//! - **Identity**: opaque and composite (`owner:repo`) resource identifiers
//! - **Client**: GitHub REST calls with retries, `ETag` conditional reads and
//!   `202 Accepted` detection
//! - **Reconciler**: create/read/update/delete over any [`RemoteResource`],
//!   with convergence polling for changes GitHub applies asynchronously
//! - **State Management**: persist the last observed attributes per object
//! - **Resource kinds**: organization webhooks, SSH signing keys,
//!   code-scanning default setup, plus release asset downloads
//!
//! ## Quick Start
//!
//! All configuration is loaded from environment variables. Create a `.env` file:
//!
//! ```text
//! GITHUB_TOKEN=ghp_your_token_here
//! GITHUB_OWNER=your-org
//! GITHUB_WEBHOOK_URL=https://hooks.example.com/github
//! GITHUB_WEBHOOK_EVENTS=push,pull_request
//! ```
//!
//! Then reconcile an organization webhook:
//!
//! ```ignore
//! use gh_reconciler::{GitHubClient, GitHubClientConfig, JsonFileStateStore, OrganizationWebhook, Reconciler, WebhookSpec};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let client = GitHubClient::new(GitHubClientConfig::from_env()?)?;
//!     let store = JsonFileStateStore::new(JsonFileStateStore::default_path());
//!     let hooks = OrganizationWebhook::new(client);
//!
//!     let observed = Reconciler::default()
//!         .create(&hooks, &store, &WebhookSpec::from_env()?.to_desired())
//!         .await?;
//!     println!("Webhook {} created", observed.identity);
//!
//!     Ok(())
//! }
//! ```

// ============================================================================
// Strict linting - Dangerous or non-idiomatic practices are forbidden
// ============================================================================

#![deny(warnings)]                    // All warnings are treated as errors
#![deny(unsafe_code)]                 // Unsafe code is forbidden
#![deny(missing_docs)]                // All public items must be documented
#![deny(dead_code)]                   // Unused code is forbidden
#![deny(non_camel_case_types)]        // Types must follow CamelCase convention

// Additional strictness - Leave nothing unchecked
#![deny(unused_imports)]              // Unused imports are forbidden
#![deny(unused_variables)]            // Unused variables are forbidden
#![deny(unused_must_use)]             // Must handle Result and Option explicitly
#![deny(non_snake_case)]              // Variables and functions must be snake_case
#![deny(non_upper_case_globals)]      // Constants must be UPPER_CASE
#![deny(nonstandard_style)]           // Non-standard code style is forbidden
#![forbid(unsafe_op_in_unsafe_fn)]    // Unsafe ops in unsafe fns are forbidden

// Clippy for strict discipline
#![deny(clippy::all)]                 // All standard Clippy lints
#![deny(clippy::pedantic)]            // Very strict Clippy lints
#![deny(clippy::nursery)]             // Experimental lints
#![deny(clippy::unwrap_used)]         // unwrap() is forbidden
#![deny(clippy::expect_used)]         // expect() is forbidden
#![deny(clippy::panic)]               // panic!() is forbidden
#![deny(clippy::print_stdout)]        // println!() is forbidden in production
#![deny(clippy::todo)]                // TODO is forbidden
#![deny(clippy::unimplemented)]       // unimplemented!() is forbidden
#![deny(clippy::missing_const_for_fn)] // Force const when possible
#![deny(clippy::unwrap_in_result)]    // unwrap() in Result is forbidden
#![deny(clippy::module_inception)]    // Module with same name as crate is forbidden
#![deny(clippy::redundant_clone)]     // Useless clones are forbidden
#![deny(clippy::shadow_unrelated)]    // Shadowing unrelated variables is forbidden
#![deny(clippy::too_many_arguments)]  // Limit function arguments
#![deny(clippy::cognitive_complexity)] // Limit cognitive complexity

// Safety and robustness lints
#![deny(overflowing_literals)]        // Overflowing literals are forbidden
#![deny(arithmetic_overflow)]         // Arithmetic overflow is forbidden

// Unit tests may unwrap.
#![cfg_attr(test, allow(clippy::unwrap_used, clippy::expect_used, clippy::panic))]

// ============================================================================
// Modules
// ============================================================================

/// Resource identifiers and the composite `a:b` encoding.
pub mod github_identity;

/// Environment-driven configuration helpers.
pub mod github_config;

/// `ETag` validation tokens and conditional read results.
pub mod github_cache;

/// GitHub REST client.
///
/// Use this module for authenticated calls with retries and status mapping.
pub mod github_client;

/// Contract every managed resource kind implements.
pub mod github_remote;

/// Desired/observed state and state persistence.
///
/// Use this module to persist the last observed attributes of each object.
pub mod github_state;

/// Convergence polling for asynchronous changes.
pub mod github_poll;

/// Generic create/read/update/delete over any resource kind.
pub mod github_reconciler;

/// Organization webhooks.
pub mod github_webhook;

/// SSH signing keys of the authenticated user.
pub mod github_signing_key;

/// Code-scanning default setup of a repository.
pub mod github_code_scanning;

/// Release asset downloads.
pub mod github_release_asset;

// ============================================================================
// Re-exports for convenience
// ============================================================================

pub use github_cache::{ConditionalRead, ValidationToken};
pub use github_client::{GitHubClient, GitHubClientConfig};
pub use github_code_scanning::{CodeScanningDefaultSetup, CodeScanningSpec};
pub use github_identity::{IdentityError, ResourceIdentity};
pub use github_poll::PollPolicy;
pub use github_reconciler::{ReadOutcome, ReconcileError, Reconciler};
pub use github_release_asset::{ReleaseAsset, fetch_release_asset};
pub use github_remote::{MutateOp, MutateOutcome, PollHandle, PollStatus, RemoteError, RemoteResource, RemoteSnapshot};
pub use github_signing_key::{SigningKeySpec, SshSigningKey};
pub use github_state::{DesiredState, JsonFileStateStore, MemoryStateStore, ObservedState, StateStore};
pub use github_webhook::{OrganizationWebhook, WebhookConfiguration, WebhookSpec};
