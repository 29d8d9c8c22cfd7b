//! Release assets (read-only).
//!
//! Metadata and content of a single asset. GitHub serves the content from
//! the same path as the metadata when asked for `application/octet-stream`,
//! usually via a redirect to a storage host.

use serde::Deserialize;

use crate::github_client::GitHubClient;
use crate::github_identity::ResourceIdentity;
use crate::github_remote::RemoteError;

/// A release asset with its downloaded content.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ReleaseAsset {
    /// Numeric asset ID.
    pub id: i64,
    /// API URL of the asset.
    #[serde(default)]
    pub url: String,
    /// `GraphQL` node ID.
    #[serde(default)]
    pub node_id: String,
    /// File name.
    #[serde(default)]
    pub name: String,
    /// Short description shown instead of the name.
    #[serde(default)]
    pub label: Option<String>,
    /// MIME type.
    #[serde(default)]
    pub content_type: String,
    /// Size in bytes, as reported by GitHub.
    #[serde(default)]
    pub size: u64,
    /// Creation timestamp (RFC 3339).
    #[serde(default)]
    pub created_at: Option<String>,
    /// Last update timestamp (RFC 3339).
    #[serde(default)]
    pub updated_at: Option<String>,
    /// Public download URL.
    #[serde(default)]
    pub browser_download_url: String,
    /// Downloaded content.
    #[serde(skip)]
    pub body: Vec<u8>,
}

impl ReleaseAsset {
    /// Identity of the asset.
    #[must_use]
    pub fn identity(&self) -> ResourceIdentity {
        ResourceIdentity::from_numeric(self.id)
    }

    /// Content decoded as UTF-8, invalid sequences replaced.
    #[must_use]
    pub fn body_text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Fetch metadata and content of asset `asset_id` of `owner/repository`.
///
/// # Errors
///
/// [`RemoteError::NotFound`] if the asset does not exist, any other
/// [`RemoteError`] if either request fails.
pub async fn fetch_release_asset(
    client: &GitHubClient,
    owner: &str,
    repository: &str,
    asset_id: i64,
) -> Result<ReleaseAsset, RemoteError> {
    // Validates both parts before anything is sent.
    ResourceIdentity::two_part(owner, repository)?;

    let path = format!("/repos/{owner}/{repository}/releases/assets/{asset_id}");
    let mut asset: ReleaseAsset = client.get_json(&path).await?;
    asset.body = client.get_bytes(&path).await?;

    tracing::debug!(owner, repository, asset_id, bytes = asset.body.len(), "downloaded release asset");
    Ok(asset)
}
