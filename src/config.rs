//! Configuration management
//!
//! Non-secret settings live in config.toml (an embedded default is compiled
//! in); secrets and deploy-specific values come from environment variables:
//! - WEBHOOK_SECRET
//! - GITHUB_APP_ID, GITHUB_PRIVATE_KEY, GITHUB_CLIENT_ID, GITHUB_CLIENT_SECRET
//! - CUSTODY_API_KEY
//! - FRONTEND_URL, PORT

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

const DEFAULT_CONFIG: &str = include_str!("../config.toml");

const DEFAULT_FRONTEND_URL: &str = "http://localhost:3000";

/// Main configuration structure matching config.toml
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub solana: SolanaConfig,
    pub custody: CustodyConfig,
    pub rewards: RewardsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SolanaConfig {
    pub rpc_url: String,
    pub commitment: String,
    /// Cluster tag used in explorer links
    pub cluster: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustodyConfig {
    pub base_url: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewardsConfig {
    /// Lamports paid per reward point
    pub lamports_per_point: u64,
}

impl Config {
    /// Load from config.toml or use defaults
    pub fn load() -> Result<Self> {
        Self::load_from("config.toml")
    }

    /// Load from specific path
    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();

        if path.exists() {
            let content = std::fs::read_to_string(path).context("Failed to read config file")?;
            toml::from_str(&content).context("Failed to parse config file")
        } else {
            toml::from_str(DEFAULT_CONFIG).context("Failed to parse default config")
        }
    }

    /// Listen port (PORT env var takes precedence)
    pub fn port(&self) -> u16 {
        std::env::var("PORT")
            .ok()
            .and_then(|p| p.parse().ok())
            .unwrap_or(self.server.port)
    }
}

/// GitHub App credentials, environment-only.
#[derive(Debug, Clone)]
pub struct GitHubCredentials {
    pub app_id: String,
    /// PEM-encoded RSA private key of the App
    pub private_key_pem: String,
    pub client_id: String,
    pub client_secret: String,
}

impl GitHubCredentials {
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            app_id: require_env("GITHUB_APP_ID")?,
            private_key_pem: require_env("GITHUB_PRIVATE_KEY")?,
            client_id: require_env("GITHUB_CLIENT_ID")?,
            client_secret: require_env("GITHUB_CLIENT_SECRET")?,
        })
    }
}

fn require_env(name: &'static str) -> Result<String> {
    std::env::var(name).with_context(|| format!("{} environment variable is required", name))
}

/// Webhook shared secret. `None` when unset or empty; the webhook endpoint
/// fails closed in that case.
pub fn webhook_secret() -> Option<String> {
    std::env::var("WEBHOOK_SECRET")
        .ok()
        .filter(|s| !s.is_empty())
}

pub fn frontend_url() -> String {
    std::env::var("FRONTEND_URL").unwrap_or_else(|_| DEFAULT_FRONTEND_URL.to_string())
}

pub fn custody_api_key() -> Option<String> {
    std::env::var("CUSTODY_API_KEY").ok().filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_parses() {
        let config: Config = toml::from_str(DEFAULT_CONFIG).unwrap();
        assert_eq!(config.rewards.lamports_per_point, 100_000);
        assert_eq!(config.solana.cluster, "devnet");
        assert!(config.solana.rpc_url.starts_with("https://"));
    }

    #[test]
    fn test_missing_file_falls_back_to_default() {
        let config = Config::load_from("/nonexistent/config.toml").unwrap();
        assert_eq!(config.server.port, 3000);
    }
}
