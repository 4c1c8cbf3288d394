//! Client for the mesh network's management API.
//!
//! Only one call is needed: minting a single-use setup key that a peer
//! presents when it registers.

use std::time::Duration;

use async_trait::async_trait;
use fleet_core::types::MeshSettings;
use fleet_core::{FleetError, Result};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Lifetime of an issued setup key.
pub const SETUP_KEY_TTL_SECS: u64 = 24 * 60 * 60;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);

/// Source of one-off setup keys for peer registration.
#[async_trait]
pub trait SetupKeyIssuer: Send + Sync {
    async fn issue_one_off_key(&self, settings: &MeshSettings, name: &str) -> Result<String>;
}

#[derive(Debug, Serialize)]
struct CreateSetupKey<'a> {
    name: &'a str,
    #[serde(rename = "type")]
    key_type: &'a str,
    expires_in: u64,
    auto_groups: Vec<String>,
    usage_limit: u32,
    ephemeral: bool,
}

#[derive(Debug, Deserialize)]
struct SetupKeyResponse {
    #[serde(default)]
    key: String,
}

/// [`SetupKeyIssuer`] backed by the NetBird management REST API.
#[derive(Clone)]
pub struct NetbirdApi {
    http: reqwest::Client,
}

impl Default for NetbirdApi {
    fn default() -> Self {
        Self::new()
    }
}

impl NetbirdApi {
    pub fn new() -> Self {
        let http = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_else(|_| reqwest::Client::new());
        Self { http }
    }
}

fn api_err(msg: impl std::fmt::Display) -> FleetError {
    FleetError::Transport(format!("mesh management API: {msg}"))
}

#[async_trait]
impl SetupKeyIssuer for NetbirdApi {
    async fn issue_one_off_key(&self, settings: &MeshSettings, name: &str) -> Result<String> {
        let url = format!(
            "{}/api/setup-keys",
            settings.management_url.trim().trim_end_matches('/')
        );
        let body = CreateSetupKey {
            name,
            key_type: "one-off",
            expires_in: SETUP_KEY_TTL_SECS,
            auto_groups: Vec::new(),
            usage_limit: 1,
            ephemeral: false,
        };
        debug!(%url, name, "requesting one-off setup key");

        let resp = self
            .http
            .post(&url)
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Token {}", settings.access_token.trim()),
            )
            .json(&body)
            .send()
            .await
            .map_err(api_err)?;

        let status = resp.status();
        if !status.is_success() {
            let text = resp.text().await.unwrap_or_default();
            warn!(%url, %status, "setup key request rejected");
            return Err(api_err(format!("{status}: {}", text.trim())));
        }

        let created: SetupKeyResponse = resp.json().await.map_err(api_err)?;
        if created.key.trim().is_empty() {
            return Err(api_err("response carried no setup key"));
        }
        Ok(created.key)
    }
}
