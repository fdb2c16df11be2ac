//! Reward orchestrator
//!
//! Drives a merged pull request through policy, wallet resolution and
//! payout, and records the terminal outcome. Payout failures are logged
//! outcomes, not crashes; nothing here is retried.

use std::sync::Arc;

use serde::Serialize;
use tracing::{error, info, warn};

use crate::error::ServiceError;
use crate::events::PullRequestSummary;
use crate::github::GitHubAppClient;
use crate::installations::InstallationCache;
use crate::ledger::{PayoutReceipt, WalletLedger};
use crate::policy::{self, RewardDecision};

/// Terminal state of one merged-PR delivery.
#[derive(Debug)]
pub enum RewardOutcome {
    /// Decision said no; a normal outcome, not an error.
    Ineligible { decision: RewardDecision },
    /// Eligible, but the repository has no wallet.
    MissingWallet { repository: String },
    /// Eligible, but the contributor has no registered payout address.
    MissingContributor { author: String },
    Sent { receipt: PayoutReceipt, points: u64 },
    /// The payout call failed; logged, not retried.
    Failed { error: ServiceError },
}

impl RewardOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Ineligible { .. } => "ineligible",
            Self::MissingWallet { .. } => "missing_wallet",
            Self::MissingContributor { .. } => "missing_contributor",
            Self::Sent { .. } => "sent",
            Self::Failed { .. } => "failed",
        }
    }
}

#[derive(Debug, Serialize)]
pub struct RewardsConfigSnapshot {
    pub lamports_per_point: u64,
}

pub struct RewardOrchestrator {
    ledger: WalletLedger,
    github: Arc<GitHubAppClient>,
    installations: Arc<InstallationCache>,
    lamports_per_point: u64,
}

impl RewardOrchestrator {
    pub fn new(
        ledger: WalletLedger,
        github: Arc<GitHubAppClient>,
        installations: Arc<InstallationCache>,
        lamports_per_point: u64,
    ) -> Self {
        Self {
            ledger,
            github,
            installations,
            lamports_per_point,
        }
    }

    pub fn rewards_config(&self) -> RewardsConfigSnapshot {
        RewardsConfigSnapshot {
            lamports_per_point: self.lamports_per_point,
        }
    }

    /// Run the reward pipeline for one merged pull request.
    pub async fn process(&self, pr: &PullRequestSummary) -> RewardOutcome {
        info!(
            "PR #{} merged in {} by {} (+{} -{}, {} files)",
            pr.number, pr.repository, pr.author, pr.additions, pr.deletions, pr.files_changed
        );

        let decision = policy::evaluate(pr.additions, pr.files_changed);
        if !decision.qualifies {
            info!(
                "PR #{} in {} below reward thresholds (additions: {}, files: {})",
                pr.number, pr.repository, decision.meets_additions, decision.meets_files
            );
            return RewardOutcome::Ineligible { decision };
        }

        let Some(wallet) = self.ledger.wallet(&pr.repository) else {
            warn!("{} has no wallet; reward for PR #{} skipped", pr.repository, pr.number);
            let outcome = RewardOutcome::MissingWallet {
                repository: pr.repository.clone(),
            };
            self.acknowledge(pr, &outcome).await;
            return outcome;
        };

        let Some(address) = self.ledger.contributor_address(&pr.author) else {
            warn!(
                "{} has no registered payout address; reward for PR #{} skipped",
                pr.author, pr.number
            );
            let outcome = RewardOutcome::MissingContributor {
                author: pr.author.clone(),
            };
            self.acknowledge(pr, &outcome).await;
            return outcome;
        };

        let lamports = policy::points_to_lamports(decision.points, self.lamports_per_point);
        info!(
            "Paying {} lamports ({} points) to {} for {}#{}",
            lamports, decision.points, pr.author, pr.repository, pr.number
        );

        let outcome = match self.ledger.send_reward(&wallet, &address, lamports).await {
            Ok(receipt) => RewardOutcome::Sent {
                receipt,
                points: decision.points,
            },
            Err(error) => {
                error!(
                    "Payout of {} lamports to {} for {}#{} failed: {}",
                    lamports, pr.author, pr.repository, pr.number, error
                );
                RewardOutcome::Failed { error }
            }
        };

        self.acknowledge(pr, &outcome).await;
        outcome
    }

    /// Post a thank-you comment on the PR. Best-effort: failures are logged
    /// and never change the outcome.
    async fn acknowledge(&self, pr: &PullRequestSummary, outcome: &RewardOutcome) {
        let Some(installation_id) = pr.installation_id else {
            return;
        };
        let Some(body) = comment_body(pr, outcome) else {
            return;
        };

        let token = match self
            .installations
            .installation_token(&self.github, installation_id)
            .await
        {
            Ok(token) => token,
            Err(e) => {
                warn!(
                    "No installation token for acknowledgement on {}#{}: {}",
                    pr.repository, pr.number, e
                );
                return;
            }
        };

        if let Err(e) = self
            .github
            .post_issue_comment(&token, &pr.repository, pr.number, &body)
            .await
        {
            warn!(
                "Acknowledgement comment on {}#{} failed: {}",
                pr.repository, pr.number, e
            );
        }
    }
}

fn comment_body(pr: &PullRequestSummary, outcome: &RewardOutcome) -> Option<String> {
    match outcome {
        RewardOutcome::Sent { receipt, points } => Some(format!(
            "Thanks @{}! This merge earned {} points — {} SOL is on its way.\n\n[View transaction]({})",
            pr.author,
            points,
            receipt.amount_lamports as f64 / 1e9,
            receipt.explorer_url
        )),
        RewardOutcome::MissingContributor { .. } => Some(format!(
            "Thanks @{}! This merge qualifies for a SOL reward — register a payout address to receive it.",
            pr.author
        )),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::solana::mock::{FailureMode, MockChain};

    const CONTRIBUTOR_ADDRESS: &str = "532AY6h9d5qEHBYenLTq51yF994kUFcGMdmQ4x9bGinu";

    struct Harness {
        orchestrator: RewardOrchestrator,
        ledger: WalletLedger,
        chain: Arc<MockChain>,
    }

    fn harness() -> Harness {
        let chain = Arc::new(MockChain::new());
        let ledger = WalletLedger::new(chain.clone(), "devnet");
        let github = Arc::new(GitHubAppClient::new("1", "not-a-key", "id", "secret"));
        let installations = Arc::new(InstallationCache::new());
        let orchestrator =
            RewardOrchestrator::new(ledger.clone(), github, installations, 100_000);
        Harness {
            orchestrator,
            ledger,
            chain,
        }
    }

    fn merged_pr(additions: u64, files_changed: u64) -> PullRequestSummary {
        PullRequestSummary {
            repository: "acme/widgets".to_string(),
            author: "octocat".to_string(),
            additions,
            deletions: 3,
            files_changed,
            number: 42,
            title: "Add frobnicator".to_string(),
            installation_id: None,
        }
    }

    #[tokio::test]
    async fn test_eligible_pr_is_paid() {
        let h = harness();
        let wallet = h.ledger.create_wallet("acme/widgets").await.unwrap();
        h.chain.set_balance(&wallet.address, 1_000_000_000);
        h.ledger
            .register_contributor("octocat", CONTRIBUTOR_ADDRESS)
            .unwrap();

        let outcome = h.orchestrator.process(&merged_pr(50, 5)).await;
        match outcome {
            RewardOutcome::Sent { receipt, points } => {
                // 100 + 50*2 + 5*10 points at 100_000 lamports/point
                assert_eq!(points, 250);
                assert_eq!(receipt.amount_lamports, 25_000_000);
                assert_eq!(receipt.recipient, CONTRIBUTOR_ADDRESS);
            }
            other => panic!("expected Sent, got {:?}", other.label()),
        }

        let updated = h.ledger.wallet("acme/widgets").unwrap();
        assert_eq!(updated.transaction_count, 1);
        assert_eq!(updated.total_rewards_distributed, 25_000_000);
        assert_eq!(h.chain.transfer_count(), 1);
    }

    #[tokio::test]
    async fn test_ineligible_pr_is_not_paid() {
        let h = harness();
        let wallet = h.ledger.create_wallet("acme/widgets").await.unwrap();
        h.chain.set_balance(&wallet.address, 1_000_000_000);
        h.ledger
            .register_contributor("octocat", CONTRIBUTOR_ADDRESS)
            .unwrap();

        let outcome = h.orchestrator.process(&merged_pr(19, 5)).await;
        assert!(matches!(outcome, RewardOutcome::Ineligible { .. }));
        assert_eq!(h.chain.transfer_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_wallet() {
        let h = harness();
        h.ledger
            .register_contributor("octocat", CONTRIBUTOR_ADDRESS)
            .unwrap();

        let outcome = h.orchestrator.process(&merged_pr(50, 5)).await;
        assert!(matches!(outcome, RewardOutcome::MissingWallet { .. }));
        assert_eq!(h.chain.transfer_count(), 0);
    }

    #[tokio::test]
    async fn test_missing_contributor_leaves_wallet_untouched() {
        let h = harness();
        let wallet = h.ledger.create_wallet("acme/widgets").await.unwrap();
        h.chain.set_balance(&wallet.address, 1_000_000_000);

        let outcome = h.orchestrator.process(&merged_pr(50, 5)).await;
        assert!(matches!(outcome, RewardOutcome::MissingContributor { .. }));

        assert_eq!(h.chain.transfer_count(), 0);
        let unchanged = h.ledger.wallet("acme/widgets").unwrap();
        assert_eq!(unchanged.transaction_count, 0);
        assert_eq!(unchanged.total_rewards_distributed, 0);
    }

    #[tokio::test]
    async fn test_payout_failure_is_terminal_not_fatal() {
        let h = harness();
        let wallet = h.ledger.create_wallet("acme/widgets").await.unwrap();
        h.chain.set_balance(&wallet.address, 1_000_000_000);
        h.ledger
            .register_contributor("octocat", CONTRIBUTOR_ADDRESS)
            .unwrap();
        h.chain.fail_transfers_with(FailureMode::Rejected);

        let outcome = h.orchestrator.process(&merged_pr(50, 5)).await;
        match outcome {
            RewardOutcome::Failed { error } => {
                assert!(matches!(error, ServiceError::TransactionRejected(_)));
            }
            other => panic!("expected Failed, got {:?}", other.label()),
        }

        let unchanged = h.ledger.wallet("acme/widgets").unwrap();
        assert_eq!(unchanged.transaction_count, 0);
    }
}
