//! Organization webhooks.
//!
//! Identity is the numeric hook ID; the organization comes from the client's
//! configured owner. GitHub never echoes the webhook secret back (it answers
//! `********`), so the known secret is carried forward from the desired input
//! or the previous record.

use async_trait::async_trait;
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

use crate::github_cache::{ConditionalRead, ValidationToken};
use crate::github_client::{GitHubClient, Sent};
use crate::github_config::{self, ConfigError};
use crate::github_identity::ResourceIdentity;
use crate::github_remote::{MutateOp, MutateOutcome, RemoteError, RemoteResource, RemoteSnapshot};
use crate::github_state::{Attributes, DesiredState};

/// Kind name of organization webhooks.
pub const KIND: &str = "github_organization_webhook";

/// Content types GitHub accepts for webhook payloads.
const CONTENT_TYPES: &[&str] = &["json", "form"];

/// Delivery settings of a webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookConfiguration {
    /// Payload URL.
    pub url: String,

    /// `json` or `form`.
    #[serde(default = "default_content_type")]
    pub content_type: String,

    /// Skip TLS verification on delivery.
    #[serde(default)]
    pub insecure_ssl: bool,

    /// HMAC secret for payload signatures.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secret: Option<String>,
}

/// Desired attributes of an organization webhook.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookSpec {
    /// Events that trigger a delivery. Treated as a set.
    pub events: Vec<String>,

    /// Whether deliveries are sent.
    #[serde(default = "default_active")]
    pub active: bool,

    /// Delivery settings.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub configuration: Option<WebhookConfiguration>,
}

fn default_content_type() -> String {
    "json".to_string()
}

const fn default_active() -> bool {
    true
}

impl WebhookSpec {
    /// Load a webhook definition from environment variables.
    ///
    /// Env:
    /// - `GITHUB_WEBHOOK_URL` (required)
    /// - `GITHUB_WEBHOOK_EVENTS` (comma-separated, default: `push`)
    /// - `GITHUB_WEBHOOK_ACTIVE` (default: true)
    /// - `GITHUB_WEBHOOK_CONTENT_TYPE` (default: `json`)
    /// - `GITHUB_WEBHOOK_INSECURE_SSL` (default: false)
    /// - `GITHUB_WEBHOOK_SECRET` (optional)
    ///
    /// # Errors
    ///
    /// Returns an error if `GITHUB_WEBHOOK_URL` is missing.
    pub fn from_env() -> Result<Self, ConfigError> {
        github_config::load_dotenv();

        Ok(Self {
            events: github_config::split_csv_env("GITHUB_WEBHOOK_EVENTS", "push"),
            active: github_config::parse_bool_env("GITHUB_WEBHOOK_ACTIVE", true),
            configuration: Some(WebhookConfiguration {
                url: github_config::must_env("GITHUB_WEBHOOK_URL")?,
                content_type: github_config::string_env("GITHUB_WEBHOOK_CONTENT_TYPE", "json"),
                insecure_ssl: github_config::parse_bool_env("GITHUB_WEBHOOK_INSECURE_SSL", false),
                secret: github_config::opt_env("GITHUB_WEBHOOK_SECRET"),
            }),
        })
    }

    /// Attribute form, as handed to the reconciler.
    #[must_use]
    pub fn to_desired(&self) -> DesiredState {
        let mut attributes = Attributes::new();
        attributes.insert("events".into(), json!(normalize_events(&self.events)));
        attributes.insert("active".into(), Value::Bool(self.active));
        if let Some(cfg) = &self.configuration {
            attributes.insert("configuration".into(), json!(cfg));
        }
        DesiredState::new(attributes)
    }

    fn validate(&self) -> Result<(), RemoteError> {
        if self.events.iter().all(|e| e.trim().is_empty()) {
            return Err(RemoteError::InvalidDesired("events must not be empty".into()));
        }
        if let Some(cfg) = &self.configuration {
            if cfg.url.trim().is_empty() {
                return Err(RemoteError::InvalidDesired("configuration.url must not be empty".into()));
            }
            if !CONTENT_TYPES.contains(&cfg.content_type.as_str()) {
                return Err(RemoteError::InvalidDesired(format!(
                    "configuration.content_type must be one of {CONTENT_TYPES:?}, got {:?}",
                    cfg.content_type
                )));
            }
        }
        Ok(())
    }

    fn request_body(&self) -> Value {
        let mut body = json!({
            "name": "web",
            "active": self.active,
            "events": normalize_events(&self.events),
        });
        if let Some(cfg) = &self.configuration {
            let mut config = json!({
                "url": cfg.url,
                "content_type": cfg.content_type,
                "insecure_ssl": if cfg.insecure_ssl { "1" } else { "0" },
            });
            if let Some(secret) = &cfg.secret {
                config["secret"] = Value::String(secret.clone());
            }
            body["config"] = config;
        }
        body
    }
}

/// Sorted, deduplicated, blank entries dropped.
fn normalize_events(events: &[String]) -> Vec<String> {
    let mut out: Vec<String> = events
        .iter()
        .map(|e| e.trim().to_string())
        .filter(|e| !e.is_empty())
        .collect();
    out.sort();
    out.dedup();
    out
}

#[derive(Debug, Deserialize)]
struct Hook {
    id: i64,
    #[serde(default)]
    url: String,
    #[serde(default)]
    active: bool,
    #[serde(default)]
    events: Vec<String>,
    #[serde(default)]
    config: HookConfig,
}

#[derive(Debug, Default, Deserialize)]
struct HookConfig {
    url: Option<String>,
    content_type: Option<String>,
    insecure_ssl: Option<Value>,
    secret: Option<String>,
}

/// GitHub reports `insecure_ssl` as `"0"`/`"1"`, occasionally as a number.
fn insecure_ssl_flag(raw: Option<&Value>) -> bool {
    match raw {
        Some(Value::String(s)) => s == "1",
        Some(Value::Number(n)) => n.as_i64() == Some(1),
        Some(Value::Bool(b)) => *b,
        _ => false,
    }
}

impl Hook {
    fn into_snapshot(self) -> RemoteSnapshot {
        let mut attributes = Attributes::new();
        attributes.insert("id".into(), json!(self.id));
        attributes.insert("url".into(), Value::String(self.url));
        attributes.insert("active".into(), Value::Bool(self.active));
        attributes.insert("events".into(), json!(normalize_events(&self.events)));

        if let Some(url) = self.config.url {
            let mut cfg = json!({
                "url": url,
                "content_type": self.config.content_type.unwrap_or_else(default_content_type),
                "insecure_ssl": insecure_ssl_flag(self.config.insecure_ssl.as_ref()),
            });
            if let Some(masked) = self.config.secret {
                cfg["secret"] = Value::String(masked);
            }
            attributes.insert("configuration".into(), cfg);
        }

        RemoteSnapshot {
            identity: ResourceIdentity::from_numeric(self.id),
            attributes,
        }
    }
}

/// Organization webhook resource handle.
#[derive(Debug, Clone)]
pub struct OrganizationWebhook {
    client: GitHubClient,
}

impl OrganizationWebhook {
    /// Handle bound to `client`; the client must carry an owner.
    #[must_use]
    pub const fn new(client: GitHubClient) -> Self {
        Self { client }
    }

    fn org(&self) -> Result<&str, RemoteError> {
        self.client
            .owner()
            .ok_or_else(|| RemoteError::InvalidDesired("organization webhooks require an owner (GITHUB_OWNER)".into()))
    }

    fn hook_path(&self, identity: &ResourceIdentity) -> Result<String, RemoteError> {
        let id = identity.as_numeric()?;
        Ok(format!("/orgs/{}/hooks/{id}", self.org()?))
    }
}

#[async_trait]
impl RemoteResource for OrganizationWebhook {
    fn kind(&self) -> &'static str {
        KIND
    }

    async fn get(
        &self,
        identity: &ResourceIdentity,
        token: Option<&ValidationToken>,
    ) -> Result<ConditionalRead<RemoteSnapshot>, RemoteError> {
        let path = self.hook_path(identity)?;
        let read: ConditionalRead<Hook> = self.client.get_conditional(&path, token).await?;
        Ok(read.map(Hook::into_snapshot))
    }

    async fn mutate(&self, op: MutateOp<'_>, desired: &DesiredState) -> Result<MutateOutcome, RemoteError> {
        let spec: WebhookSpec = desired.decode().map_err(RemoteError::InvalidDesired)?;
        spec.validate()?;

        let (method, path) = match op {
            MutateOp::Create => (Method::POST, format!("/orgs/{}/hooks", self.org()?)),
            MutateOp::Update(identity) => (Method::PATCH, self.hook_path(identity)?),
        };

        match self.client.send_json::<_, Hook>(method, &path, &spec.request_body()).await? {
            Sent::Applied { data, .. } | Sent::Accepted(data) => Ok(MutateOutcome::Applied(data.into_snapshot())),
        }
    }

    async fn delete(&self, identity: &ResourceIdentity) -> Result<(), RemoteError> {
        let path = self.hook_path(identity)?;
        self.client.delete(&path).await
    }

    fn carry_forward(&self, known: &Attributes, fresh: &mut Attributes) {
        let Some(secret) = known
            .get("configuration")
            .and_then(|c| c.get("secret"))
            .and_then(Value::as_str)
        else {
            return;
        };

        if let Some(Value::Object(cfg)) = fresh.get_mut("configuration")
            && cfg.contains_key("secret")
        {
            cfg.insert("secret".into(), Value::String(secret.to_string()));
        }
    }
}
