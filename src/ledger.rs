//! Wallet ledger
//!
//! In-memory registry of per-repository custodial wallets and contributor
//! payout addresses. All chain traffic goes through the injected
//! [`ChainGateway`]; all maps live behind locks owned by this component and
//! are only mutated through the operations below.
//!
//! Wallet creation and payout issuance for the same repository are
//! serialized through a per-repository async mutex, so the check-then-insert
//! in `create_wallet` and the stat updates in `send_reward` cannot race.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::error::ServiceError;
use crate::solana::{self, ChainGateway};

/// Post-faucet settlement polling: attempts and starting delay (doubled
/// after every miss). Faucet credits are not synchronous on devnet.
const SETTLEMENT_ATTEMPTS: u32 = 5;
const SETTLEMENT_INITIAL_DELAY: Duration = Duration::from_secs(2);

/// Custodial wallet owned by a repository. Amounts are lamports.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RepositoryWallet {
    pub address: String,
    pub repository: String,
    pub created_at: DateTime<Utc>,
    pub balance: u64,
    pub transaction_count: u64,
    pub total_rewards_distributed: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FaucetReceipt {
    pub signature: String,
    pub explorer_url: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PayoutReceipt {
    pub signature: String,
    pub amount_lamports: u64,
    pub recipient: String,
    pub explorer_url: String,
}

/// Cloneable handle to the shared ledger state.
#[derive(Clone)]
pub struct WalletLedger {
    inner: Arc<Shared>,
}

struct Shared {
    chain: Arc<dyn ChainGateway>,
    cluster: String,
    wallets: RwLock<HashMap<String, RepositoryWallet>>,
    contributors: RwLock<HashMap<String, String>>,
    repo_locks: Mutex<HashMap<String, Arc<AsyncMutex<()>>>>,
}

impl WalletLedger {
    pub fn new(chain: Arc<dyn ChainGateway>, cluster: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(Shared {
                chain,
                cluster: cluster.into(),
                wallets: RwLock::new(HashMap::new()),
                contributors: RwLock::new(HashMap::new()),
                repo_locks: Mutex::new(HashMap::new()),
            }),
        }
    }

    fn repo_lock(&self, repo: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.inner.repo_locks.lock();
        locks.entry(repo.to_string()).or_default().clone()
    }

    // ========================================================================
    // Repository wallets
    // ========================================================================

    /// Create the custodial wallet for a repository. At most one wallet per
    /// repository; a second call fails with `WalletAlreadyExists` and leaves
    /// the first record untouched.
    ///
    /// Initial faucet funding runs in the background and is best-effort:
    /// its failure is logged, never unwound into the created wallet.
    pub async fn create_wallet(&self, repo: &str) -> Result<RepositoryWallet, ServiceError> {
        let lock = self.repo_lock(repo);
        let _guard = lock.lock().await;

        if self.inner.wallets.read().contains_key(repo) {
            return Err(ServiceError::WalletAlreadyExists);
        }

        let address = self.inner.chain.create_account().await?;
        let wallet = RepositoryWallet {
            address,
            repository: repo.to_string(),
            created_at: Utc::now(),
            balance: 0,
            transaction_count: 0,
            total_rewards_distributed: 0,
            last_updated: None,
        };

        self.inner
            .wallets
            .write()
            .insert(repo.to_string(), wallet.clone());
        info!("Created wallet {} for {}", wallet.address, repo);

        let ledger = self.clone();
        let repo = repo.to_string();
        tokio::spawn(async move {
            if let Err(e) = ledger.fund_from_faucet(&repo).await {
                warn!("Initial faucet funding for {} failed: {}", repo, e);
            }
        });

        Ok(wallet)
    }

    pub fn wallet(&self, repo: &str) -> Option<RepositoryWallet> {
        self.inner.wallets.read().get(repo).cloned()
    }

    /// Overwrite the cached balance with the chain's current value.
    /// An absent wallet is `Ok(None)`, not an error.
    pub async fn refresh_balance(
        &self,
        repo: &str,
    ) -> Result<Option<RepositoryWallet>, ServiceError> {
        let Some(address) = self.wallet(repo).map(|w| w.address) else {
            return Ok(None);
        };

        let balance = self.inner.chain.balance(&address).await?;

        let mut wallets = self.inner.wallets.write();
        let Some(wallet) = wallets.get_mut(repo) else {
            return Ok(None);
        };
        wallet.balance = balance;
        wallet.last_updated = Some(Utc::now());
        Ok(Some(wallet.clone()))
    }

    /// Request faucet funds for an existing wallet. The receipt is returned
    /// as soon as the faucet accepts the request; the balance lands later
    /// and is picked up by the settlement poll.
    pub async fn fund_from_faucet(&self, repo: &str) -> Result<FaucetReceipt, ServiceError> {
        let wallet = self.wallet(repo).ok_or(ServiceError::WalletNotFound)?;

        let signature = self.inner.chain.request_faucet(&wallet.address).await?;
        info!("Requested faucet funds for {}: {}", repo, signature);

        self.spawn_balance_settlement(repo.to_string(), wallet.balance);

        Ok(FaucetReceipt {
            explorer_url: solana::explorer_url(&signature, &self.inner.cluster),
            signature,
            message: "Faucet request successful".to_string(),
        })
    }

    fn spawn_balance_settlement(&self, repo: String, balance_before: u64) {
        let ledger = self.clone();
        tokio::spawn(async move {
            let mut delay = SETTLEMENT_INITIAL_DELAY;
            for attempt in 1..=SETTLEMENT_ATTEMPTS {
                tokio::time::sleep(delay).await;
                match ledger.refresh_balance(&repo).await {
                    Ok(Some(wallet)) if wallet.balance > balance_before => {
                        debug!("Faucet funds for {} landed after {} polls", repo, attempt);
                        return;
                    }
                    Ok(Some(_)) => {}
                    // wallet removed in the meantime
                    Ok(None) => return,
                    Err(e) => warn!("Balance poll for {} failed: {}", repo, e),
                }
                delay *= 2;
            }
            warn!(
                "Faucet funds for {} did not land within {} polls",
                repo, SETTLEMENT_ATTEMPTS
            );
        });
    }

    pub fn remove_wallet(&self, repo: &str) -> bool {
        self.inner.wallets.write().remove(repo).is_some()
    }

    pub fn wallet_count(&self) -> usize {
        self.inner.wallets.read().len()
    }

    pub fn all_wallets(&self) -> Vec<RepositoryWallet> {
        self.inner.wallets.read().values().cloned().collect()
    }

    // ========================================================================
    // Contributors
    // ========================================================================

    /// Register (or overwrite) a contributor's payout address.
    pub fn register_contributor(
        &self,
        username: &str,
        payout_address: &str,
    ) -> Result<(), ServiceError> {
        if !solana::is_valid_address(payout_address) {
            return Err(ServiceError::InvalidPayoutAddress);
        }

        self.inner
            .contributors
            .write()
            .insert(username.to_string(), payout_address.to_string());
        info!("Registered payout address for {}: {}", username, payout_address);
        Ok(())
    }

    pub fn contributor_address(&self, username: &str) -> Option<String> {
        self.inner.contributors.read().get(username).cloned()
    }

    pub fn remove_contributor(&self, username: &str) -> bool {
        self.inner.contributors.write().remove(username).is_some()
    }

    pub fn contributor_count(&self) -> usize {
        self.inner.contributors.read().len()
    }

    // ========================================================================
    // Payouts
    // ========================================================================

    /// Pay a contributor from a repository wallet. The caller resolves both
    /// the wallet and the recipient address before calling; this method does
    /// not look either up.
    ///
    /// On success the source wallet's `transaction_count` and
    /// `total_rewards_distributed` are bumped and its balance refreshed.
    pub async fn send_reward(
        &self,
        from: &RepositoryWallet,
        to_address: &str,
        lamports: u64,
    ) -> Result<PayoutReceipt, ServiceError> {
        let lock = self.repo_lock(&from.repository);
        let _guard = lock.lock().await;

        let signature = self
            .inner
            .chain
            .transfer(&from.address, to_address, lamports)
            .await?;

        {
            let mut wallets = self.inner.wallets.write();
            if let Some(wallet) = wallets.get_mut(&from.repository) {
                wallet.transaction_count += 1;
                wallet.total_rewards_distributed += lamports;
            }
        }

        if let Err(e) = self.refresh_balance(&from.repository).await {
            warn!(
                "Balance refresh after payout for {} failed: {}",
                from.repository, e
            );
        }

        info!(
            "Sent {} lamports from {} to {}: {}",
            lamports, from.repository, to_address, signature
        );

        Ok(PayoutReceipt {
            explorer_url: solana::explorer_url(&signature, &self.inner.cluster),
            signature,
            amount_lamports: lamports,
            recipient: to_address.to_string(),
        })
    }
}
