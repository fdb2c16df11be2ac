//! Merge Rewards Server
//!
//! Pays SOL to contributors for merged pull requests

use std::sync::Arc;
use std::time::Duration;

use merge_rewards::config::{self, Config, GitHubCredentials};
use merge_rewards::server::AppState;
use merge_rewards::solana::{CustodyClient, SolanaGateway};
use merge_rewards::{GitHubAppClient, InstallationCache, RewardOrchestrator, WalletLedger};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const BALANCE_REFRESH_INTERVAL_SECS: u64 = 300; // 5 minutes

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting Merge Rewards Server");

    let config = Config::load()?;
    let credentials = GitHubCredentials::from_env()?;

    let webhook_secret = config::webhook_secret();
    if webhook_secret.is_none() {
        warn!("WEBHOOK_SECRET is not set; webhook deliveries will be rejected");
    }

    let github = Arc::new(GitHubAppClient::new(
        credentials.app_id,
        credentials.private_key_pem,
        credentials.client_id,
        credentials.client_secret,
    ));

    let custody = CustodyClient::new(config.custody.base_url.clone(), config::custody_api_key());
    let chain = Arc::new(SolanaGateway::new(
        &config.solana.rpc_url,
        &config.solana.commitment,
        custody,
    ));
    info!(
        "Solana integration enabled ({}, {})",
        config.solana.cluster, config.solana.rpc_url
    );

    let ledger = WalletLedger::new(chain, config.solana.cluster.clone());
    let installations = Arc::new(InstallationCache::new());
    let orchestrator = Arc::new(RewardOrchestrator::new(
        ledger.clone(),
        github.clone(),
        installations.clone(),
        config.rewards.lamports_per_point,
    ));

    // Periodic balance refresh keeps cached wallet balances close to the
    // chain even when faucet settlement polls miss.
    let refresh_ledger = ledger.clone();
    tokio::spawn(async move {
        let mut interval =
            tokio::time::interval(Duration::from_secs(BALANCE_REFRESH_INTERVAL_SECS));
        interval.tick().await;
        loop {
            interval.tick().await;
            refresh_all_balances(&refresh_ledger).await;
        }
    });
    info!(
        "Background balance refresh started (every {} seconds)",
        BALANCE_REFRESH_INTERVAL_SECS
    );

    let host = config.server.host.clone();
    let port = config.port();

    let state = Arc::new(AppState {
        github,
        installations,
        ledger,
        orchestrator,
        webhook_secret,
        frontend_url: config::frontend_url(),
        started_at: std::time::Instant::now(),
    });

    merge_rewards::server::run_server(&host, port, state).await?;

    Ok(())
}

/// Refresh every wallet's cached balance from the chain.
async fn refresh_all_balances(ledger: &WalletLedger) {
    let wallets = ledger.all_wallets();
    if wallets.is_empty() {
        return;
    }

    let refreshes = wallets
        .iter()
        .map(|wallet| ledger.refresh_balance(&wallet.repository));
    for (wallet, result) in wallets.iter().zip(futures::future::join_all(refreshes).await) {
        if let Err(e) = result {
            error!("Balance refresh for {} failed: {}", wallet.repository, e);
        }
    }
}
