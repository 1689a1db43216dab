//! GCP authentication and project discovery
//!
//! Supports:
//! - A static token from `GCP_ACCESS_TOKEN` (local runs, emulators)
//! - Metadata server (Workload Identity) for GKE/GCE

use crate::constants::METADATA_SERVER_URL;
use anyhow::{anyhow, Context, Result};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, info};
use zeroize::Zeroizing;

/// OAuth2 access token response from the GCP metadata server
///
/// Endpoint: `instance/service-accounts/default/token`
#[derive(Deserialize)]
pub struct TokenResponse {
    pub access_token: String,
    #[serde(default)]
    pub expires_in: u64,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"***")
            .field("expires_in", &self.expires_in)
            .finish()
    }
}

/// Source of API credentials and project facts
#[derive(Debug, Clone)]
pub struct MetadataServer {
    base_url: String,
    http_client: Client,
}

impl MetadataServer {
    /// # Errors
    /// Returns an error if the HTTP client cannot be built
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(Duration::from_secs(5))
            .build()
            .context("Failed to create metadata HTTP client")?;
        Ok(Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            http_client,
        })
    }

    /// Client for the well-known GCE/GKE metadata endpoint
    ///
    /// # Errors
    /// Returns an error if the HTTP client cannot be built
    pub fn default_endpoint() -> Result<Self> {
        Self::new(METADATA_SERVER_URL)
    }

    async fn get(&self, path: &str) -> Result<reqwest::Response> {
        let url = format!("{}/{}", self.base_url, path);
        let response = self
            .http_client
            .get(&url)
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .with_context(|| format!("Metadata server not available at {url}"))?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            debug!("Metadata server returned status {}: {}", status, body);
            return Err(anyhow!("Metadata server returned HTTP {status} for {path}"));
        }
        Ok(response)
    }

    /// Access token of the attached service account
    ///
    /// # Errors
    /// Returns an error if the metadata server cannot be reached or answers
    /// with something other than a token
    pub async fn access_token(&self) -> Result<Zeroizing<String>> {
        let token: TokenResponse = self
            .get("instance/service-accounts/default/token")
            .await?
            .json()
            .await
            .context("Failed to parse token response from metadata server")?;
        info!(
            expires_in = token.expires_in,
            "Retrieved access token from metadata server (Workload Identity)"
        );
        Ok(Zeroizing::new(token.access_token))
    }

    /// Project the workload runs in
    ///
    /// # Errors
    /// Returns an error if the metadata server cannot be reached
    pub async fn project_id(&self) -> Result<String> {
        let project = self
            .get("project/project-id")
            .await?
            .text()
            .await
            .context("Failed to read project id from metadata server")?;
        let project = project.trim().to_string();
        if project.is_empty() {
            return Err(anyhow!("Metadata server returned an empty project id"));
        }
        Ok(project)
    }
}

/// Pick the bearer token: the configured one, else the metadata server's
///
/// # Errors
/// Returns an error when no token is configured and the metadata server fails
pub async fn resolve_access_token(
    configured: Option<&str>,
    metadata: &MetadataServer,
) -> Result<Zeroizing<String>> {
    if let Some(token) = configured {
        debug!("Using access token from GCP_ACCESS_TOKEN");
        return Ok(Zeroizing::new(token.to_string()));
    }
    metadata.access_token().await.context(
        "Failed to get access token. Run with Workload Identity enabled or set GCP_ACCESS_TOKEN",
    )
}

/// Pick the project: the configured one, else the metadata server's
///
/// # Errors
/// Returns an error when no project is configured and the metadata server fails
pub async fn resolve_project_id(configured: Option<&str>, metadata: &MetadataServer) -> Result<String> {
    if let Some(project) = configured {
        return Ok(project.to_string());
    }
    let project = metadata
        .project_id()
        .await
        .context("PROJECT_ID is not set and the metadata server did not provide one")?;
    info!(project = %project, "Resolved project from metadata server");
    Ok(project)
}
