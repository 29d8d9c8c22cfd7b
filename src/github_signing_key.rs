//! SSH signing keys of the authenticated user.
//!
//! Identity is the numeric key ID. Every attribute is force-new: GitHub has
//! no endpoint to edit a signing key, so [`SshSigningKey`] reports
//! `supports_update() == false` and a changed key means delete + create.

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::github_cache::{ConditionalRead, ValidationToken};
use crate::github_client::{GitHubClient, Sent};
use crate::github_identity::ResourceIdentity;
use crate::github_remote::{MutateOp, MutateOutcome, RemoteError, RemoteResource, RemoteSnapshot};
use crate::github_state::{Attributes, DesiredState};

/// Kind name of SSH signing keys.
pub const KIND: &str = "github_user_ssh_signing_key";

/// Desired attributes of a signing key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningKeySpec {
    /// Descriptive name.
    pub title: String,
    /// Public key, e.g. `ssh-ed25519 AAAA...`.
    pub key: String,
}

impl SigningKeySpec {
    /// Attribute form, with surrounding whitespace trimmed from the key.
    #[must_use]
    pub fn to_desired(&self) -> DesiredState {
        let mut attributes = Attributes::new();
        attributes.insert("title".into(), Value::String(self.title.clone()));
        attributes.insert("key".into(), Value::String(self.key.trim().to_string()));
        DesiredState::new(attributes)
    }
}

#[derive(Debug, Deserialize)]
struct Key {
    id: i64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    key: String,
    #[serde(default)]
    created_at: Option<String>,
}

impl Key {
    fn into_snapshot(self) -> RemoteSnapshot {
        let mut attributes = Attributes::new();
        attributes.insert("id".into(), json!(self.id));
        attributes.insert("title".into(), Value::String(self.title));
        attributes.insert("key".into(), Value::String(self.key));
        if let Some(created_at) = self.created_at {
            attributes.insert("created_at".into(), Value::String(created_at));
        }
        RemoteSnapshot {
            identity: ResourceIdentity::from_numeric(self.id),
            attributes,
        }
    }
}

/// SSH signing key resource handle.
#[derive(Debug, Clone)]
pub struct SshSigningKey {
    client: GitHubClient,
}

impl SshSigningKey {
    /// Handle bound to `client`.
    #[must_use]
    pub const fn new(client: GitHubClient) -> Self {
        Self { client }
    }
}

fn key_path(identity: &ResourceIdentity) -> Result<String, RemoteError> {
    Ok(format!("/user/ssh_signing_keys/{}", identity.as_numeric()?))
}

#[async_trait]
impl RemoteResource for SshSigningKey {
    fn kind(&self) -> &'static str {
        KIND
    }

    fn supports_update(&self) -> bool {
        false
    }

    async fn get(
        &self,
        identity: &ResourceIdentity,
        token: Option<&ValidationToken>,
    ) -> Result<ConditionalRead<RemoteSnapshot>, RemoteError> {
        let read: ConditionalRead<Key> = self.client.get_conditional(&key_path(identity)?, token).await?;
        Ok(read.map(Key::into_snapshot))
    }

    async fn mutate(&self, op: MutateOp<'_>, desired: &DesiredState) -> Result<MutateOutcome, RemoteError> {
        if let MutateOp::Update(_) = op {
            return Err(RemoteError::Unsupported("update of an ssh signing key"));
        }

        let spec: SigningKeySpec = desired.decode().map_err(RemoteError::InvalidDesired)?;
        let key = spec.key.trim();
        if spec.title.trim().is_empty() {
            return Err(RemoteError::InvalidDesired("title must not be empty".into()));
        }
        if key.is_empty() {
            return Err(RemoteError::InvalidDesired("key must not be empty".into()));
        }

        let body = json!({ "title": spec.title, "key": key });
        match self.client.send_json::<_, Key>(Method::POST, "/user/ssh_signing_keys", &body).await? {
            Sent::Applied { data, .. } | Sent::Accepted(data) => Ok(MutateOutcome::Applied(data.into_snapshot())),
        }
    }

    async fn delete(&self, identity: &ResourceIdentity) -> Result<(), RemoteError> {
        self.client.delete(&key_path(identity)?).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::github_identity::IdentityError;

    #[test]
    fn desired_trims_key() {
        let spec = SigningKeySpec {
            title: "laptop".into(),
            key: "  ssh-ed25519 AAAAC3Nza\n".into(),
        };
        let desired = spec.to_desired();
        assert_eq!(desired.attributes()["key"], "ssh-ed25519 AAAAC3Nza");
    }

    #[test]
    fn non_numeric_identity_is_rejected() {
        let err = key_path(&ResourceIdentity::new("abc")).unwrap_err();
        assert!(matches!(err, RemoteError::Identity(IdentityError::NotNumeric { .. })));
        assert_eq!(key_path(&ResourceIdentity::from_numeric(7)).unwrap(), "/user/ssh_signing_keys/7");
    }
}
