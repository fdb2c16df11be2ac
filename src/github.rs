//! GitHub API client for the App integration
//!
//! Covers the three credential flavours the service needs:
//! - app JWT (RS256, signed with the App's private key) for app-level calls
//! - installation tokens minted from the app JWT
//! - user OAuth tokens from the callback code exchange

use chrono::{DateTime, Utc};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::ServiceError;
use crate::installations::InstallationRecord;

/// Bound on every GitHub API call
const REQUEST_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(30);

const GITHUB_API_BASE: &str = "https://api.github.com";
const GITHUB_AUTHORIZE_URL: &str = "https://github.com/login/oauth/authorize";
const GITHUB_OAUTH_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const USER_AGENT: &str = "merge-rewards/0.1.0";

pub struct GitHubAppClient {
    client: reqwest::Client,
    app_id: String,
    private_key_pem: String,
    client_id: String,
    client_secret: String,
}

#[derive(Serialize)]
struct AppJwtClaims {
    iat: i64,
    exp: i64,
    iss: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GitHubUser {
    pub id: u64,
    pub login: String,
    pub name: Option<String>,
    pub avatar_url: Option<String>,
}

/// Repository as listed for an installation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositorySummary {
    pub name: String,
    pub full_name: String,
    pub private: bool,
    pub description: Option<String>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct InstallationTokenResponse {
    token: String,
    expires_at: DateTime<Utc>,
}

#[derive(Deserialize)]
#[serde(untagged)]
enum OAuthTokenResponse {
    Success {
        access_token: String,
    },
    Error {
        error: String,
        error_description: Option<String>,
    },
}

#[derive(Deserialize)]
struct UserInstallationsResponse {
    installations: Vec<InstallationPayload>,
}

#[derive(Deserialize)]
struct InstallationPayload {
    id: u64,
    app_id: u64,
    account: AccountPayload,
    repository_selection: Option<String>,
}

#[derive(Deserialize)]
struct AccountPayload {
    login: String,
}

impl From<InstallationPayload> for InstallationRecord {
    fn from(payload: InstallationPayload) -> Self {
        InstallationRecord {
            id: payload.id,
            account_login: payload.account.login,
            repository_selection: payload.repository_selection,
            repository_count: 0,
        }
    }
}

#[derive(Deserialize)]
struct InstallationRepositoriesResponse {
    repositories: Vec<RepositorySummary>,
}

impl GitHubAppClient {
    pub fn new(
        app_id: impl Into<String>,
        private_key_pem: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        let client = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("reqwest client construction cannot fail with static options");

        Self {
            client,
            app_id: app_id.into(),
            private_key_pem: private_key_pem.into(),
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    /// OAuth authorize URL the connect endpoint redirects users to.
    pub fn authorize_url(&self) -> String {
        format!(
            "{}?client_id={}&scope=user:email,read:org",
            GITHUB_AUTHORIZE_URL, self.client_id
        )
    }

    fn build_request(&self, builder: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        builder
            .header("User-Agent", USER_AGENT)
            .header("Accept", "application/vnd.github+json")
            .header("X-GitHub-Api-Version", "2022-11-28")
    }

    /// Short-lived app JWT: 10 minute window, issued 60s in the past to
    /// absorb clock drift against GitHub.
    fn app_jwt(&self) -> Result<String, ServiceError> {
        let key = EncodingKey::from_rsa_pem(self.private_key_pem.as_bytes()).map_err(|e| {
            ServiceError::TokenExchangeFailed(format!("invalid App private key: {}", e))
        })?;

        let now = Utc::now().timestamp();
        let claims = AppJwtClaims {
            iat: now - 60,
            exp: now + 10 * 60,
            iss: self.app_id.clone(),
        };

        encode(&Header::new(Algorithm::RS256), &claims, &key)
            .map_err(|e| ServiceError::TokenExchangeFailed(e.to_string()))
    }

    /// Mint an installation token from the app JWT.
    pub async fn create_installation_token(
        &self,
        installation_id: u64,
    ) -> Result<(String, DateTime<Utc>), ServiceError> {
        let jwt = self.app_jwt()?;
        let url = format!(
            "{}/app/installations/{}/access_tokens",
            GITHUB_API_BASE, installation_id
        );

        let response = self
            .build_request(self.client.post(&url))
            .bearer_auth(jwt)
            .send()
            .await
            .map_err(|e| ServiceError::TokenExchangeFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ServiceError::TokenExchangeFailed(format!(
                "installation {} token exchange returned {}",
                installation_id,
                response.status()
            )));
        }

        let token: InstallationTokenResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::TokenExchangeFailed(e.to_string()))?;

        debug!(
            "Minted installation token for {} (expires {})",
            installation_id, token.expires_at
        );
        Ok((token.token, token.expires_at))
    }

    /// Exchange an OAuth callback code for a user access token.
    pub async fn exchange_oauth_code(&self, code: &str) -> Result<String, ServiceError> {
        let response = self
            .client
            .post(GITHUB_OAUTH_TOKEN_URL)
            .header("Accept", "application/json")
            .json(&serde_json::json!({
                "client_id": self.client_id,
                "client_secret": self.client_secret,
                "code": code,
            }))
            .send()
            .await
            .map_err(|e| ServiceError::Upstream(e.to_string()))?;

        let token: OAuthTokenResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Upstream(e.to_string()))?;

        match token {
            OAuthTokenResponse::Success { access_token } => Ok(access_token),
            OAuthTokenResponse::Error {
                error,
                error_description,
            } => Err(ServiceError::Upstream(format!(
                "{}: {}",
                error,
                error_description.unwrap_or_default()
            ))),
        }
    }

    /// Fetch the user a token belongs to.
    pub async fn authenticated_user(&self, user_token: &str) -> Result<GitHubUser, ServiceError> {
        let response = self
            .build_request(self.client.get(format!("{}/user", GITHUB_API_BASE)))
            .bearer_auth(user_token)
            .send()
            .await
            .map_err(|e| ServiceError::Upstream(e.to_string()))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ServiceError::UpstreamAuthExpired);
        }
        if !response.status().is_success() {
            return Err(ServiceError::Upstream(format!(
                "user fetch returned {}",
                response.status()
            )));
        }

        response
            .json()
            .await
            .map_err(|e| ServiceError::Upstream(e.to_string()))
    }

    /// List this App's installations visible to the user.
    ///
    /// The user-scoped endpoint needs the token to carry the right scopes;
    /// when it fails we fall back to listing the App's own installations
    /// and keeping the ones owned by `username`.
    pub async fn user_installations(
        &self,
        user_token: &str,
        username: &str,
    ) -> Result<Vec<InstallationRecord>, ServiceError> {
        match self.user_scoped_installations(user_token).await {
            Ok(installations) => Ok(installations),
            Err(e) => {
                warn!(
                    "User installation listing failed ({}), falling back to app endpoint",
                    e
                );
                self.app_installations_for(username).await
            }
        }
    }

    async fn user_scoped_installations(
        &self,
        user_token: &str,
    ) -> Result<Vec<InstallationRecord>, ServiceError> {
        let response = self
            .build_request(
                self.client
                    .get(format!("{}/user/installations", GITHUB_API_BASE)),
            )
            .bearer_auth(user_token)
            .send()
            .await
            .map_err(|e| ServiceError::Upstream(e.to_string()))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ServiceError::UpstreamAuthExpired);
        }
        if !response.status().is_success() {
            return Err(ServiceError::Upstream(format!(
                "installation listing returned {}",
                response.status()
            )));
        }

        let listing: UserInstallationsResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Upstream(e.to_string()))?;

        let installations: Vec<InstallationRecord> = listing
            .installations
            .into_iter()
            .filter(|i| i.app_id.to_string() == self.app_id)
            .map(InstallationRecord::from)
            .collect();

        info!("Found {} app installations for user", installations.len());
        Ok(installations)
    }

    async fn app_installations_for(
        &self,
        username: &str,
    ) -> Result<Vec<InstallationRecord>, ServiceError> {
        let jwt = self.app_jwt()?;
        let response = self
            .build_request(
                self.client
                    .get(format!("{}/app/installations", GITHUB_API_BASE)),
            )
            .bearer_auth(jwt)
            .send()
            .await
            .map_err(|e| ServiceError::Upstream(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ServiceError::Upstream(format!(
                "app installation listing returned {}",
                response.status()
            )));
        }

        let installations: Vec<InstallationPayload> = response
            .json()
            .await
            .map_err(|e| ServiceError::Upstream(e.to_string()))?;

        Ok(installations
            .into_iter()
            .filter(|i| i.account.login.eq_ignore_ascii_case(username))
            .map(InstallationRecord::from)
            .collect())
    }

    /// Repositories accessible to an installation token.
    pub async fn installation_repositories(
        &self,
        installation_token: &str,
    ) -> Result<Vec<RepositorySummary>, ServiceError> {
        let response = self
            .build_request(
                self.client
                    .get(format!("{}/installation/repositories", GITHUB_API_BASE)),
            )
            .bearer_auth(installation_token)
            .send()
            .await
            .map_err(|e| ServiceError::Upstream(e.to_string()))?;

        if response.status() == reqwest::StatusCode::UNAUTHORIZED {
            return Err(ServiceError::UpstreamAuthExpired);
        }
        if !response.status().is_success() {
            return Err(ServiceError::Upstream(format!(
                "repository listing returned {}",
                response.status()
            )));
        }

        let listing: InstallationRepositoriesResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::Upstream(e.to_string()))?;
        Ok(listing.repositories)
    }

    /// Post a comment on an issue or pull request.
    pub async fn post_issue_comment(
        &self,
        installation_token: &str,
        repo_full_name: &str,
        issue_number: u64,
        body: &str,
    ) -> Result<(), ServiceError> {
        let url = format!(
            "{}/repos/{}/issues/{}/comments",
            GITHUB_API_BASE, repo_full_name, issue_number
        );

        let response = self
            .build_request(self.client.post(&url))
            .bearer_auth(installation_token)
            .json(&serde_json::json!({ "body": body }))
            .send()
            .await
            .map_err(|e| ServiceError::Upstream(e.to_string()))?;

        if !response.status().is_success() {
            return Err(ServiceError::Upstream(format!(
                "comment on {}#{} returned {}",
                repo_full_name,
                issue_number,
                response.status()
            )));
        }

        Ok(())
    }
}
