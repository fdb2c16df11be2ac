//! Merge Rewards HTTP server
//!
//! Webhook intake plus the OAuth, wallet and contributor endpoints. The
//! webhook handler verifies the delivery signature against the raw body,
//! classifies the event, and spawns the reward pipeline for merged PRs so
//! the response to GitHub returns immediately.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;
use tower_http::cors::CorsLayer;
use tracing::{debug, error, info, warn};

use crate::error::ServiceError;
use crate::events::{self, DomainEvent};
use crate::github::GitHubAppClient;
use crate::installations::InstallationCache;
use crate::ledger::{FaucetReceipt, RepositoryWallet, WalletLedger};
use crate::orchestrator::RewardOrchestrator;
use crate::signature;

pub struct AppState {
    pub github: Arc<GitHubAppClient>,
    pub installations: Arc<InstallationCache>,
    pub ledger: WalletLedger,
    pub orchestrator: Arc<RewardOrchestrator>,
    pub webhook_secret: Option<String>,
    pub frontend_url: String,
    pub started_at: std::time::Instant,
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(status_handler))
        .route("/webhook", post(webhook_handler))
        .route("/github/connect", get(connect_handler))
        .route("/github/callback", get(callback_handler))
        .route("/github/repos/:username", get(list_repos_handler))
        .route("/wallet/create/:repo_full_name", post(create_wallet_handler))
        .route("/wallet/fund/:repo_full_name", post(fund_wallet_handler))
        .route("/wallet/:repo_full_name", get(get_wallet_handler))
        .route("/contributor/register", post(register_contributor_handler))
        .route("/contributor/:username", get(get_contributor_handler))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

async fn status_handler(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(json!({
        "status": "OK",
        "message": "Merge Rewards server",
        "timestamp": Utc::now().to_rfc3339(),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "version": env!("CARGO_PKG_VERSION"),
        "wallets_created": state.ledger.wallet_count(),
        "contributors_registered": state.ledger.contributor_count(),
        "rewards": state.orchestrator.rewards_config(),
    }))
}

// ============================================================================
// POST /webhook
// ============================================================================

async fn webhook_handler(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let Some(secret) = state.webhook_secret.as_deref().filter(|s| !s.is_empty()) else {
        error!("WEBHOOK_SECRET is not configured; rejecting delivery");
        return ServiceError::ConfigMissing("WEBHOOK_SECRET").into_response();
    };

    let signature_header = headers
        .get("x-hub-signature-256")
        .and_then(|v| v.to_str().ok());
    if !signature::verify(&body, signature_header, secret) {
        warn!("Rejected webhook delivery: invalid signature");
        return ServiceError::SignatureInvalid.into_response();
    }

    let event_type = headers
        .get("x-github-event")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    let event = match events::classify(event_type, &body) {
        Ok(event) => event,
        Err(e) => {
            warn!("Webhook processing error: {}", e);
            return e.into_response();
        }
    };

    match event {
        DomainEvent::Ping => {
            info!("Webhook ping received");
            (StatusCode::OK, Json(json!({ "message": "pong" }))).into_response()
        }
        DomainEvent::PullRequestMerged(pr) => {
            let orchestrator = state.orchestrator.clone();
            tokio::spawn(async move {
                let outcome = orchestrator.process(&pr).await;
                info!(
                    "Reward pipeline for {}#{} finished: {}",
                    pr.repository,
                    pr.number,
                    outcome.label()
                );
            });
            ok_response()
        }
        DomainEvent::PullRequestOpened { repository, number } => {
            debug!("PR #{} opened in {}", number, repository);
            ok_response()
        }
        DomainEvent::PullRequestSynchronized { repository, number } => {
            debug!("PR #{} synchronized in {}", number, repository);
            ok_response()
        }
        DomainEvent::InstallationCreated(record) => {
            info!(
                "GitHub App installed on {} ({} repositories)",
                record.account_login, record.repository_count
            );
            state.installations.add_installation(record);
            ok_response()
        }
        DomainEvent::InstallationDeleted {
            installation_id,
            account_login,
        } => {
            info!("GitHub App uninstalled from {}", account_login);
            state
                .installations
                .remove_installation(&account_login, installation_id);
            ok_response()
        }
        DomainEvent::InstallationRepositoriesChanged {
            installation_id,
            added,
            removed,
        } => {
            info!(
                "Installation {} repositories changed: +{} -{}",
                installation_id,
                added.len(),
                removed.len()
            );
            ok_response()
        }
        DomainEvent::Unrecognized { event } => {
            debug!("Ignoring {} event", event);
            ok_response()
        }
    }
}

fn ok_response() -> Response {
    (StatusCode::OK, "OK").into_response()
}

// ============================================================================
// GET /github/connect and /github/callback
// ============================================================================

async fn connect_handler(State(state): State<Arc<AppState>>) -> Redirect {
    Redirect::to(&state.github.authorize_url())
}

#[derive(Debug, Deserialize)]
struct CallbackQuery {
    code: Option<String>,
}

async fn callback_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<CallbackQuery>,
) -> Response {
    let Some(code) = query.code else {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "error": "Missing authorization code" })),
        )
            .into_response();
    };

    match connect_user(&state, &code).await {
        Ok(username) => {
            let url = format!(
                "{}/githubmanager/?username={}",
                state.frontend_url,
                urlencoding::encode(&username)
            );
            Redirect::to(&url).into_response()
        }
        Err(e) => {
            error!("OAuth flow failed: {}", e);
            e.into_response()
        }
    }
}

async fn connect_user(state: &AppState, code: &str) -> Result<String, ServiceError> {
    let token = state.github.exchange_oauth_code(code).await?;
    let user = state.github.authenticated_user(&token).await?;
    info!("User connected: {}", user.login);

    let installations = state.github.user_installations(&token, &user.login).await?;
    state
        .installations
        .record_installations(&user.login, installations);
    Ok(user.login)
}

// ============================================================================
// GET /github/repos/:username
// ============================================================================

#[derive(Debug, Serialize)]
struct RepoListing {
    name: String,
    full_name: String,
    private: bool,
    description: Option<String>,
    updated_at: Option<DateTime<Utc>>,
    installation_id: u64,
    wallet: Option<RepositoryWallet>,
}

async fn list_repos_handler(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> Result<Json<Vec<RepoListing>>, ServiceError> {
    let installations = state
        .installations
        .installations_for(&username)
        .filter(|list| !list.is_empty())
        .ok_or(ServiceError::NoInstallationsFound)?;

    let mut listings = Vec::new();
    for installation in installations {
        let token = state
            .installations
            .installation_token(&state.github, installation.id)
            .await?;
        let repos = state.github.installation_repositories(&token).await?;

        for repo in repos {
            let wallet = state.ledger.wallet(&repo.full_name);
            listings.push(RepoListing {
                name: repo.name,
                full_name: repo.full_name,
                private: repo.private,
                description: repo.description,
                updated_at: repo.updated_at,
                installation_id: installation.id,
                wallet,
            });
        }
    }

    Ok(Json(listings))
}

// ============================================================================
// Wallet endpoints
// ============================================================================

async fn create_wallet_handler(
    State(state): State<Arc<AppState>>,
    Path(repo_full_name): Path<String>,
) -> Result<Json<RepositoryWallet>, ServiceError> {
    let wallet = state.ledger.create_wallet(&repo_full_name).await?;
    Ok(Json(wallet))
}

async fn get_wallet_handler(
    State(state): State<Arc<AppState>>,
    Path(repo_full_name): Path<String>,
) -> Result<Json<RepositoryWallet>, ServiceError> {
    let cached = state
        .ledger
        .wallet(&repo_full_name)
        .ok_or(ServiceError::WalletNotFound)?;

    // serve the cached record when the chain is unreachable
    match state.ledger.refresh_balance(&repo_full_name).await {
        Ok(Some(wallet)) => Ok(Json(wallet)),
        Ok(None) => Err(ServiceError::WalletNotFound),
        Err(e) => {
            warn!("Balance refresh for {} failed: {}", repo_full_name, e);
            Ok(Json(cached))
        }
    }
}

async fn fund_wallet_handler(
    State(state): State<Arc<AppState>>,
    Path(repo_full_name): Path<String>,
) -> Result<Json<FaucetReceipt>, ServiceError> {
    let receipt = state.ledger.fund_from_faucet(&repo_full_name).await?;
    Ok(Json(receipt))
}

// ============================================================================
// Contributor endpoints
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterContributorRequest {
    username: String,
    payout_address: String,
}

async fn register_contributor_handler(
    State(state): State<Arc<AppState>>,
    Json(request): Json<RegisterContributorRequest>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    state
        .ledger
        .register_contributor(&request.username, &request.payout_address)?;

    Ok(Json(json!({
        "message": "Payout address registered successfully",
        "username": request.username,
        "payoutAddress": request.payout_address,
    })))
}

async fn get_contributor_handler(
    State(state): State<Arc<AppState>>,
    Path(username): Path<String>,
) -> Result<Json<serde_json::Value>, ServiceError> {
    let address = state
        .ledger
        .contributor_address(&username)
        .ok_or(ServiceError::ContributorNotRegistered)?;

    Ok(Json(json!({
        "username": username,
        "payoutAddress": address,
    })))
}

// ============================================================================
// Server startup
// ============================================================================

/// Run the server
pub async fn run_server(host: &str, port: u16, state: Arc<AppState>) -> anyhow::Result<()> {
    let app = create_router(state);
    let addr = format!("{}:{}", host, port);

    info!("Starting Merge Rewards server on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
