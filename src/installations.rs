//! Installation and token cache
//!
//! One source of truth for which App installations belong to which account
//! and for the short-lived installation tokens minted against them. The
//! OAuth callback flow and the installation webhook events both write here.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::error::ServiceError;
use crate::github::GitHubAppClient;

/// Tokens are refreshed this long before their server-side expiry.
const REFRESH_MARGIN_SECS: i64 = 60;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstallationRecord {
    pub id: u64,
    pub account_login: String,
    pub repository_selection: Option<String>,
    #[serde(default)]
    pub repository_count: u64,
}

#[derive(Debug, Clone)]
struct CachedToken {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Default)]
pub struct InstallationCache {
    tokens: RwLock<HashMap<u64, CachedToken>>,
    installations: RwLock<HashMap<String, Vec<InstallationRecord>>>,
}

impl InstallationCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Token for an installation: cached while fresh, otherwise exchanged
    /// through the App credentials and re-cached with the server-provided
    /// expiry. A stale token is never returned.
    pub async fn installation_token(
        &self,
        github: &GitHubAppClient,
        installation_id: u64,
    ) -> Result<String, ServiceError> {
        if let Some(token) = self.fresh_token(installation_id) {
            return Ok(token);
        }

        let (token, expires_at) = github.create_installation_token(installation_id).await?;
        self.insert_token(installation_id, token.clone(), expires_at);
        Ok(token)
    }

    fn fresh_token(&self, installation_id: u64) -> Option<String> {
        let tokens = self.tokens.read();
        let cached = tokens.get(&installation_id)?;
        let cutoff = Utc::now() + Duration::seconds(REFRESH_MARGIN_SECS);
        (cached.expires_at > cutoff).then(|| cached.token.clone())
    }

    fn insert_token(&self, installation_id: u64, token: String, expires_at: DateTime<Utc>) {
        debug!(
            "Caching installation token for {} until {}",
            installation_id, expires_at
        );
        self.tokens
            .write()
            .insert(installation_id, CachedToken { token, expires_at });
    }

    /// Replace the installation set for a login (OAuth callback path).
    pub fn record_installations(&self, login: &str, records: Vec<InstallationRecord>) {
        info!("Recording {} installations for {}", records.len(), login);
        self.installations
            .write()
            .insert(login.to_string(), records);
    }

    /// Merge a single installation (webhook path). An existing record with
    /// the same id is replaced.
    pub fn add_installation(&self, record: InstallationRecord) {
        let mut installations = self.installations.write();
        let entries = installations
            .entry(record.account_login.clone())
            .or_default();
        entries.retain(|r| r.id != record.id);
        entries.push(record);
    }

    /// Drop an installation and its cached token.
    pub fn remove_installation(&self, login: &str, installation_id: u64) {
        self.tokens.write().remove(&installation_id);

        let mut installations = self.installations.write();
        if let Some(entries) = installations.get_mut(login) {
            entries.retain(|r| r.id != installation_id);
            if entries.is_empty() {
                installations.remove(login);
            }
        }
        info!("Removed installation {} for {}", installation_id, login);
    }

    pub fn installations_for(&self, login: &str) -> Option<Vec<InstallationRecord>> {
        self.installations.read().get(login).cloned()
    }
}
