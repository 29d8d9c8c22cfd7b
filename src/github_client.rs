//! GitHub REST client.
//!
//! Unique responsibility: perform authenticated HTTP calls against the GitHub
//! REST API and map status codes onto the signals the reconciler cares about.
//!
//! API conventions:
//! - Base URL <https://api.github.com> (overridable for GHES or tests)
//! - Header: Authorization: Bearer <token>
//! - Header: Accept: application/vnd.github+json
//!
//! Status mapping:
//! - `304` on a conditional GET -> [`ConditionalRead::NotModified`]
//! - `202` on a mutation -> [`Sent::Accepted`] (change applied out-of-band)
//! - `404` -> [`RemoteError::NotFound`]
//! - transient statuses (408/425/429/5xx) and connect/timeout errors are
//!   retried with capped exponential backoff before giving up
//!
//! All configuration is loaded from environment variables.

use std::time::Duration;

use reqwest::header::{ACCEPT, IF_NONE_MATCH};
use reqwest::{Method, RequestBuilder, Response, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::github_cache::{ConditionalRead, ValidationToken, extract_etag};
use crate::github_config::{self, ConfigError};
use crate::github_remote::RemoteError;

const DEFAULT_BASE_URL: &str = "https://api.github.com";
const GITHUB_JSON: &str = "application/vnd.github+json";
const OCTET_STREAM: &str = "application/octet-stream";
const API_VERSION: &str = "2022-11-28";

/// Configuration for the GitHub REST client.
#[derive(Clone, Debug)]
pub struct GitHubClientConfig {
    /// Bearer token for authentication.
    /// Env: `GITHUB_TOKEN` (required)
    pub token: String,

    /// REST API base URL.
    /// Env: `GITHUB_BASE_URL` (default: "<https://api.github.com>")
    pub base_url: String,

    /// Organization or user that owns managed resources.
    /// Env: `GITHUB_OWNER` (optional)
    pub owner: Option<String>,

    /// HTTP request timeout in milliseconds.
    /// Env: `GITHUB_HTTP_TIMEOUT_MS` (default: 30000)
    pub timeout_ms: u64,

    /// Maximum number of retry attempts for transient failures.
    /// Env: `GITHUB_HTTP_RETRY_MAX` (default: 3)
    pub retry_max: u32,

    /// Initial backoff between retries in milliseconds.
    /// Env: `GITHUB_HTTP_RETRY_BACKOFF_MS` (default: 500)
    pub retry_backoff_ms: u64,

    /// User agent for HTTP requests.
    /// Env: `GITHUB_USER_AGENT` (default: "gh-reconciler/0.1")
    pub user_agent: String,
}

impl GitHubClientConfig {
    /// Configuration with defaults for everything but the token and base URL.
    #[must_use]
    pub fn new(token: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            base_url: base_url.into(),
            owner: None,
            timeout_ms: 30_000,
            retry_max: 3,
            retry_backoff_ms: 500,
            user_agent: "gh-reconciler/0.1".to_string(),
        }
    }

    /// Set the owning organization or user.
    #[must_use]
    pub fn with_owner(mut self, owner: impl Into<String>) -> Self {
        self.owner = Some(owner.into());
        self
    }

    /// Override the transport retry budget.
    #[must_use]
    pub const fn with_retry(mut self, retry_max: u32, retry_backoff_ms: u64) -> Self {
        self.retry_max = retry_max;
        self.retry_backoff_ms = retry_backoff_ms;
        self
    }

    /// Load configuration from environment variables.
    ///
    /// In local dev, this will also attempt to load `.env` from the current directory.
    ///
    /// # Errors
    ///
    /// Returns an error if required environment variables are missing or invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        github_config::load_dotenv();

        Ok(Self {
            token: github_config::must_env("GITHUB_TOKEN")?,
            base_url: github_config::string_env("GITHUB_BASE_URL", DEFAULT_BASE_URL),
            owner: github_config::opt_env("GITHUB_OWNER"),
            timeout_ms: github_config::parse_u64_env("GITHUB_HTTP_TIMEOUT_MS", 30_000)?,
            retry_max: github_config::parse_u32_env("GITHUB_HTTP_RETRY_MAX", 3)?,
            retry_backoff_ms: github_config::parse_u64_env("GITHUB_HTTP_RETRY_BACKOFF_MS", 500)?,
            user_agent: github_config::string_env("GITHUB_USER_AGENT", "gh-reconciler/0.1"),
        })
    }

    fn url(&self, path: &str) -> String {
        if path.starts_with("http://") || path.starts_with("https://") {
            return path.to_string();
        }
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }
}

/// Outcome of a mutating request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Sent<T> {
    /// The change is applied; `data` is the resulting object.
    Applied {
        /// Response body.
        data: T,
        /// `ETag` of the response, if any.
        token: Option<ValidationToken>,
    },
    /// `202 Accepted`: the change will be applied asynchronously.
    Accepted(T),
}

/// Client for the GitHub REST API.
///
/// Cheap to share by reference; create one per process and pass it to every
/// resource handle.
#[derive(Debug, Clone)]
pub struct GitHubClient {
    cfg: GitHubClientConfig,
    http: reqwest::Client,
}

impl GitHubClient {
    /// Create a new GitHub client.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be built.
    pub fn new(cfg: GitHubClientConfig) -> Result<Self, RemoteError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .user_agent(cfg.user_agent.clone())
            .build()
            .map_err(RemoteError::Http)?;

        Ok(Self { cfg, http })
    }

    /// Get a reference to the current configuration.
    #[must_use]
    pub const fn config(&self) -> &GitHubClientConfig {
        &self.cfg
    }

    /// Owning organization or user, if configured.
    #[must_use]
    pub fn owner(&self) -> Option<&str> {
        self.cfg.owner.as_deref()
    }

    /// GET a JSON document, replaying `token` as `If-None-Match` when given.
    ///
    /// # Errors
    ///
    /// [`RemoteError::NotFound`] on 404, [`RemoteError::Api`] on any other
    /// unsuccessful status, transport and decoding errors otherwise.
    pub async fn get_conditional<T: DeserializeOwned>(
        &self,
        path: &str,
        token: Option<&ValidationToken>,
    ) -> Result<ConditionalRead<T>, RemoteError> {
        let url = self.cfg.url(path);
        let resp = self
            .send_with_retry(|| {
                let req = self.request(Method::GET, &url, GITHUB_JSON);
                match token {
                    Some(t) => req.header(IF_NONE_MATCH, t.as_str()),
                    None => req,
                }
            })
            .await?;

        let status = resp.status();
        if status == StatusCode::NOT_MODIFIED {
            return Ok(ConditionalRead::NotModified);
        }

        let etag = extract_etag(resp.headers());
        let data = decode_body(resp, path).await?;
        Ok(ConditionalRead::Fetched { data, token: etag })
    }

    /// GET a JSON document unconditionally.
    ///
    /// # Errors
    ///
    /// Same as [`GitHubClient::get_conditional`].
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, RemoteError> {
        match self.get_conditional(path, None).await? {
            ConditionalRead::Fetched { data, .. } => Ok(data),
            // Only reachable if a server answers 304 without If-None-Match.
            ConditionalRead::NotModified => Err(RemoteError::Api {
                status: StatusCode::NOT_MODIFIED,
                body: String::new(),
            }),
        }
    }

    /// Send a JSON body with `method` (POST/PATCH/PUT).
    ///
    /// # Errors
    ///
    /// [`RemoteError::NotFound`] on 404, [`RemoteError::Api`] on any other
    /// unsuccessful status, transport and decoding errors otherwise.
    pub async fn send_json<B, T>(&self, method: Method, path: &str, body: &B) -> Result<Sent<T>, RemoteError>
    where
        B: Serialize + ?Sized,
        T: DeserializeOwned,
    {
        let url = self.cfg.url(path);
        let resp = self
            .send_with_retry(|| self.request(method.clone(), &url, GITHUB_JSON).json(body))
            .await?;

        if resp.status() == StatusCode::ACCEPTED {
            return Ok(Sent::Accepted(decode_body(resp, path).await?));
        }

        let token = extract_etag(resp.headers());
        let data = decode_body(resp, path).await?;
        Ok(Sent::Applied { data, token })
    }

    /// DELETE an object.
    ///
    /// # Errors
    ///
    /// [`RemoteError::NotFound`] if the object is already gone.
    pub async fn delete(&self, path: &str) -> Result<(), RemoteError> {
        let url = self.cfg.url(path);
        let resp = self
            .send_with_retry(|| self.request(Method::DELETE, &url, GITHUB_JSON))
            .await?;
        check_status(resp, path).await.map(drop)
    }

    /// Download raw bytes (`Accept: application/octet-stream`).
    ///
    /// # Errors
    ///
    /// [`RemoteError::NotFound`] on 404, [`RemoteError::Api`] on any other
    /// unsuccessful status.
    pub async fn get_bytes(&self, path: &str) -> Result<Vec<u8>, RemoteError> {
        let url = self.cfg.url(path);
        let resp = self
            .send_with_retry(|| self.request(Method::GET, &url, OCTET_STREAM))
            .await?;
        let resp = check_status(resp, path).await?;
        let bytes = resp.bytes().await.map_err(RemoteError::Http)?;
        Ok(bytes.to_vec())
    }

    fn request(&self, method: Method, url: &str, accept: &'static str) -> RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(&self.cfg.token)
            .header(ACCEPT, accept)
            .header("X-GitHub-Api-Version", API_VERSION)
    }

    /// Send the request built by `build`, retrying transient failures.
    ///
    /// Returns the last response even when unsuccessful; status mapping is
    /// left to the caller.
    async fn send_with_retry<F>(&self, build: F) -> Result<Response, RemoteError>
    where
        F: Fn() -> RequestBuilder,
    {
        let mut attempt: u32 = 0;
        let mut backoff = Duration::from_millis(self.cfg.retry_backoff_ms);

        loop {
            attempt = attempt.saturating_add(1);

            match build().send().await {
                Ok(resp) => {
                    let status = resp.status();
                    if attempt <= self.cfg.retry_max && is_retryable_status(status) {
                        tracing::warn!(
                            url = %resp.url(),
                            %status,
                            attempt,
                            ?backoff,
                            "transient GitHub API status, retrying"
                        );
                        tokio::time::sleep(backoff).await;
                        backoff = next_backoff(backoff);
                        continue;
                    }
                    return Ok(resp);
                }
                Err(e) => {
                    if attempt <= self.cfg.retry_max && is_retryable_reqwest(&e) {
                        tracing::warn!(error = %e, attempt, ?backoff, "GitHub API request failed, retrying");
                        tokio::time::sleep(backoff).await;
                        backoff = next_backoff(backoff);
                        continue;
                    }
                    return Err(RemoteError::Http(e));
                }
            }
        }
    }
}

async fn check_status(resp: Response, path: &str) -> Result<Response, RemoteError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    if status == StatusCode::NOT_FOUND {
        return Err(RemoteError::NotFound(path.to_string()));
    }
    let body = resp.text().await.unwrap_or_default();
    Err(RemoteError::Api { status, body })
}

async fn decode_body<T: DeserializeOwned>(resp: Response, path: &str) -> Result<T, RemoteError> {
    let resp = check_status(resp, path).await?;
    let body = resp.text().await.map_err(RemoteError::Http)?;
    let text = if body.trim().is_empty() { "null" } else { body.as_str() };
    serde_json::from_str(text).map_err(|e| RemoteError::Json {
        reason: e.to_string(),
        body,
    })
}

#[inline]
const fn is_retryable_status(status: StatusCode) -> bool {
    matches!(status.as_u16(), 408 | 425 | 429 | 500 | 502 | 503 | 504)
}

#[inline]
fn is_retryable_reqwest(e: &reqwest::Error) -> bool {
    e.is_timeout() || e.is_connect()
}

#[inline]
fn next_backoff(current: Duration) -> Duration {
    let next = current.saturating_mul(2);
    next.min(Duration::from_secs(10))
}
