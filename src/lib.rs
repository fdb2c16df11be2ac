//! Merge Rewards - Pay SOL to contributors for merged pull requests
//!
//! A GitHub App integration wired to a Solana payout flow: repositories
//! that install the App get a custodial devnet wallet, and contributors who
//! merge qualifying pull requests receive a SOL transfer from it.
//!
//! # How it works
//!
//! 1. A repository owner connects via GitHub OAuth and creates a wallet for
//!    their repository (faucet-funded on devnet)
//! 2. Contributors register a Solana payout address
//! 3. GitHub delivers webhook events; each delivery is verified against the
//!    shared secret before anything is parsed
//! 4. Merged pull requests are scored (base + additions + files, capped);
//!    merges with at least 20 additions across 2 files qualify
//! 5. Qualifying merges trigger a custodially signed transfer from the
//!    repository wallet to the contributor
//!
//! All wallet and installation state is held in memory and lost on restart;
//! durability is a caller concern behind the same interfaces.

pub mod config;
pub mod error;
pub mod events;
pub mod github;
pub mod installations;
pub mod ledger;
pub mod orchestrator;
pub mod policy;
pub mod server;
pub mod signature;
pub mod solana;

pub use error::ServiceError;
pub use events::{classify, DomainEvent, PullRequestSummary};
pub use github::GitHubAppClient;
pub use installations::{InstallationCache, InstallationRecord};
pub use ledger::{RepositoryWallet, WalletLedger};
pub use orchestrator::{RewardOrchestrator, RewardOutcome};
pub use policy::{evaluate, points_to_lamports, RewardDecision};
pub use solana::{ChainGateway, CustodyClient, SolanaGateway};
