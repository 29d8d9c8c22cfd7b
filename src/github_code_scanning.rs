//! Code-scanning default setup of a repository.
//!
//! Identity is `owner:repository`. Enabling default setup makes GitHub
//! answer `202 Accepted` with the ID of the `CodeQL` setup workflow run; the
//! change is only in effect once that run completes, so the run is what gets
//! polled. When the answer names no run, the setup's `state` is polled until
//! it reaches the requested value.
//!
//! Deleting the resource switches default setup back to `not-configured`.

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::github_cache::{ConditionalRead, ValidationToken};
use crate::github_client::{GitHubClient, Sent};
use crate::github_identity::ResourceIdentity;
use crate::github_remote::{
    MutateOp, MutateOutcome, PollHandle, PollStatus, RemoteError, RemoteResource, RemoteSnapshot,
};
use crate::github_state::{Attributes, DesiredState};

/// Kind name of code-scanning default setups.
pub const KIND: &str = "github_repository_code_scanning";

const STATES: &[&str] = &["configured", "not-configured"];
const QUERY_SUITES: &[&str] = &["default", "extended"];

/// Operation ID prefix of a poll that watches the setup state instead of a run.
const STATE_OPERATION: &str = "state=";

/// Desired attributes of a code-scanning default setup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeScanningSpec {
    /// Repository owner.
    pub owner: String,

    /// Repository name.
    pub repository: String,

    /// `configured` or `not-configured`.
    pub state: String,

    /// `default` or `extended`; GitHub picks when absent.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_suite: Option<String>,

    /// Wait for the setup workflow run to finish.
    #[serde(default = "default_wait")]
    pub wait: bool,
}

const fn default_wait() -> bool {
    true
}

impl CodeScanningSpec {
    /// Attribute form, as handed to the reconciler.
    #[must_use]
    pub fn to_desired(&self) -> DesiredState {
        let mut attributes = Attributes::new();
        attributes.insert("owner".into(), Value::String(self.owner.clone()));
        attributes.insert("repository".into(), Value::String(self.repository.clone()));
        attributes.insert("state".into(), Value::String(self.state.clone()));
        if let Some(suite) = &self.query_suite {
            attributes.insert("query_suite".into(), Value::String(suite.clone()));
        }
        attributes.insert("wait".into(), Value::Bool(self.wait));
        DesiredState::new(attributes)
    }

    fn validate(&self) -> Result<(), RemoteError> {
        if !STATES.contains(&self.state.as_str()) {
            return Err(RemoteError::InvalidDesired(format!(
                "state must be one of {STATES:?}, got {:?}",
                self.state
            )));
        }
        if let Some(suite) = &self.query_suite
            && !QUERY_SUITES.contains(&suite.as_str())
        {
            return Err(RemoteError::InvalidDesired(format!(
                "query_suite must be one of {QUERY_SUITES:?}, got {suite:?}"
            )));
        }
        Ok(())
    }

    fn request_body(&self) -> Value {
        let mut body = json!({ "state": self.state });
        if let Some(suite) = &self.query_suite {
            body["query_suite"] = Value::String(suite.clone());
        }
        body
    }
}

/// Body of the `202 Accepted` answer.
#[derive(Debug, Deserialize)]
struct SetupRun {
    #[serde(default)]
    run_id: Option<i64>,
    #[serde(default)]
    run_url: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DefaultSetup {
    #[serde(default)]
    state: Option<String>,
    #[serde(default)]
    query_suite: Option<String>,
    #[serde(default)]
    languages: Vec<String>,
    #[serde(default)]
    updated_at: Option<String>,
}

impl DefaultSetup {
    fn into_snapshot(self, identity: &ResourceIdentity, owner: &str, repository: &str) -> RemoteSnapshot {
        let mut attributes = Attributes::new();
        attributes.insert("owner".into(), Value::String(owner.to_string()));
        attributes.insert("repository".into(), Value::String(repository.to_string()));
        attributes.insert("state".into(), json!(self.state.unwrap_or_default()));
        attributes.insert("query_suite".into(), json!(self.query_suite.unwrap_or_default()));
        attributes.insert("languages".into(), json!(self.languages));
        attributes.insert("updated_at".into(), json!(self.updated_at.unwrap_or_default()));
        RemoteSnapshot {
            identity: identity.clone(),
            attributes,
        }
    }
}

#[derive(Debug, Deserialize)]
struct WorkflowRun {
    #[serde(default)]
    status: Option<String>,
    #[serde(default)]
    conclusion: Option<String>,
}

/// Map a workflow run's `status`/`conclusion` pair to a [`PollStatus`].
///
/// Unrecognized non-completed statuses count as in progress; the attempt
/// budget bounds them.
fn run_status(status: Option<&str>, conclusion: Option<&str>) -> PollStatus {
    match status.unwrap_or_default() {
        "queued" | "waiting" | "requested" | "pending" => PollStatus::Pending,
        "completed" => match conclusion.unwrap_or_default() {
            "success" | "neutral" | "skipped" => PollStatus::Succeeded,
            "cancelled" => PollStatus::Cancelled,
            "timed_out" => PollStatus::TimedOut,
            _ => PollStatus::Failed,
        },
        // Some runs report the outcome directly in `status`.
        "success" => PollStatus::Succeeded,
        "failure" => PollStatus::Failed,
        "cancelled" => PollStatus::Cancelled,
        "timed_out" | "timed out" => PollStatus::TimedOut,
        _ => PollStatus::InProgress,
    }
}

/// Code-scanning default setup resource handle.
#[derive(Debug, Clone)]
pub struct CodeScanningDefaultSetup {
    client: GitHubClient,
}

impl CodeScanningDefaultSetup {
    /// Handle bound to `client`.
    #[must_use]
    pub const fn new(client: GitHubClient) -> Self {
        Self { client }
    }

    async fn fetch_setup(
        &self,
        identity: &ResourceIdentity,
        token: Option<&ValidationToken>,
    ) -> Result<ConditionalRead<RemoteSnapshot>, RemoteError> {
        let (owner, repository) = identity.parse_two_part()?;
        let path = setup_path(owner, repository);
        let read: ConditionalRead<DefaultSetup> = self.client.get_conditional(&path, token).await?;
        Ok(read.map(|setup| setup.into_snapshot(identity, owner, repository)))
    }

    async fn applied(&self, identity: &ResourceIdentity) -> Result<MutateOutcome, RemoteError> {
        match self.fetch_setup(identity, None).await? {
            ConditionalRead::Fetched { data, .. } => Ok(MutateOutcome::Applied(data)),
            ConditionalRead::NotModified => Err(RemoteError::Unsupported("304 on an unconditional read")),
        }
    }
}

fn setup_path(owner: &str, repository: &str) -> String {
    format!("/repos/{owner}/{repository}/code-scanning/default-setup")
}

#[async_trait]
impl RemoteResource for CodeScanningDefaultSetup {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn get(
        &self,
        identity: &ResourceIdentity,
        token: Option<&ValidationToken>,
    ) -> Result<ConditionalRead<RemoteSnapshot>, RemoteError> {
        self.fetch_setup(identity, token).await
    }

    async fn mutate(&self, op: MutateOp<'_>, desired: &DesiredState) -> Result<MutateOutcome, RemoteError> {
        let spec: CodeScanningSpec = desired.decode().map_err(RemoteError::InvalidDesired)?;
        spec.validate()?;

        let identity = match op {
            MutateOp::Create => ResourceIdentity::two_part(&spec.owner, &spec.repository)?,
            MutateOp::Update(identity) => {
                let (owner, repository) = identity.parse_two_part()?;
                if owner != spec.owner || repository != spec.repository {
                    return Err(RemoteError::InvalidDesired(format!(
                        "owner and repository cannot change in place ({identity} -> {}:{})",
                        spec.owner, spec.repository
                    )));
                }
                identity.clone()
            }
        };

        let path = setup_path(&spec.owner, &spec.repository);
        let sent = self
            .client
            .send_json::<_, Option<SetupRun>>(Method::PATCH, &path, &spec.request_body())
            .await?;

        match sent {
            Sent::Accepted(accepted) if spec.wait => {
                let (operation_id, url) = accepted
                    .and_then(|run| run.run_id.map(|id| (id, run.run_url)))
                    .map_or_else(
                        || (format!("{STATE_OPERATION}{}", spec.state), None),
                        |(run_id, url)| (run_id.to_string(), url),
                    );
                Ok(MutateOutcome::AcceptedAsync(PollHandle {
                    identity,
                    operation_id,
                    url,
                }))
            }
            Sent::Accepted(_) | Sent::Applied { .. } => self.applied(&identity).await,
        }
    }

    async fn poll_status(&self, handle: &PollHandle) -> Result<PollStatus, RemoteError> {
        let (owner, repository) = handle.identity.parse_two_part()?;
        if let Some(target) = handle.operation_id.strip_prefix(STATE_OPERATION) {
            let setup: DefaultSetup = self.client.get_json(&setup_path(owner, repository)).await?;
            return Ok(if setup.state.as_deref() == Some(target) {
                PollStatus::Succeeded
            } else {
                PollStatus::InProgress
            });
        }
        let path = format!("/repos/{owner}/{repository}/actions/runs/{}", handle.operation_id);
        let run: WorkflowRun = self.client.get_json(&path).await?;
        Ok(run_status(run.status.as_deref(), run.conclusion.as_deref()))
    }

    async fn delete(&self, identity: &ResourceIdentity) -> Result<(), RemoteError> {
        let (owner, repository) = identity.parse_two_part()?;
        let body = json!({ "state": "not-configured" });
        self.client
            .send_json::<_, Value>(Method::PATCH, &setup_path(owner, repository), &body)
            .await
            .map(drop)
    }

    fn carry_forward(&self, known: &Attributes, fresh: &mut Attributes) {
        // `wait` only exists locally.
        let wait = known.get("wait").cloned().unwrap_or(Value::Bool(true));
        fresh.insert("wait".into(), wait);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec() -> CodeScanningSpec {
        CodeScanningSpec {
            owner: "octo".into(),
            repository: "hello".into(),
            state: "configured".into(),
            query_suite: Some("extended".into()),
            wait: true,
        }
    }

    #[test]
    fn run_status_mapping() {
        assert_eq!(run_status(Some("queued"), None), PollStatus::Pending);
        assert_eq!(run_status(Some("waiting"), None), PollStatus::Pending);
        assert_eq!(run_status(Some("in_progress"), None), PollStatus::InProgress);
        assert_eq!(run_status(Some("completed"), Some("success")), PollStatus::Succeeded);
        assert_eq!(run_status(Some("completed"), Some("failure")), PollStatus::Failed);
        assert_eq!(run_status(Some("completed"), Some("cancelled")), PollStatus::Cancelled);
        assert_eq!(run_status(Some("completed"), Some("timed_out")), PollStatus::TimedOut);
        assert_eq!(run_status(Some("timed out"), None), PollStatus::TimedOut);
        assert_eq!(run_status(None, None), PollStatus::InProgress);
    }

    #[test]
    fn validation_rejects_unknown_values() {
        assert!(spec().validate().is_ok());

        let mut s = spec();
        s.state = "enabled".into();
        assert!(matches!(s.validate(), Err(RemoteError::InvalidDesired(_))));

        let mut s = spec();
        s.query_suite = Some("everything".into());
        assert!(matches!(s.validate(), Err(RemoteError::InvalidDesired(_))));
    }

    #[test]
    fn accepted_body_without_run_id_decodes() {
        let run: SetupRun = serde_json::from_value(json!({})).unwrap();
        assert!(run.run_id.is_none());

        let run: SetupRun = serde_json::from_value(json!({"run_id": 7, "run_url": "https://x"})).unwrap();
        assert_eq!(run.run_id, Some(7));
    }

    #[test]
    fn desired_defaults_wait_to_true() {
        let desired = DesiredState::from_json(json!({
            "owner": "octo",
            "repository": "hello",
            "state": "not-configured"
        }))
        .unwrap();
        let s: CodeScanningSpec = desired.decode().unwrap();
        assert!(s.wait);
        assert_eq!(s.request_body(), json!({ "state": "not-configured" }));
    }
}
