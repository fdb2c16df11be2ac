//! Solana gateway: RPC connection plus the custodial signing provider
//!
//! Repository wallets are custodial — the provider holds the keys and
//! exposes account creation, faucet funding and transaction signing as
//! opaque HTTP operations keyed by address. This module builds the unsigned
//! transfer, hands it to the provider for signing, and submits the signed
//! bytes through the RPC connection.
//!
//! Everything the rest of the crate needs is behind [`ChainGateway`], so
//! tests run against an in-memory chain instead of devnet.

use std::str::FromStr;
use std::time::Duration;

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use serde::Deserialize;
use serde_json::json;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_sdk::commitment_config::CommitmentConfig;
use solana_sdk::message::Message;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::system_instruction;
use solana_sdk::transaction::Transaction;
use tracing::{debug, info};
use uuid::Uuid;

use crate::error::ServiceError;

/// Bound on every RPC and custody HTTP call
pub const CHAIN_CALL_TIMEOUT: Duration = Duration::from_secs(30);

/// External chain operations used by the wallet ledger.
#[async_trait]
pub trait ChainGateway: Send + Sync {
    /// Create a new custodial account, returning its address.
    async fn create_account(&self) -> Result<String, ServiceError>;

    /// Request faucet funds for an address, returning the transaction
    /// signature. Balance propagation is not synchronous.
    async fn request_faucet(&self, address: &str) -> Result<String, ServiceError>;

    /// Current balance in lamports.
    async fn balance(&self, address: &str) -> Result<u64, ServiceError>;

    /// Transfer lamports between addresses and wait for confirmation.
    async fn transfer(&self, from: &str, to: &str, lamports: u64)
        -> Result<String, ServiceError>;
}

/// Whether a string parses as a Solana address.
pub fn is_valid_address(address: &str) -> bool {
    Pubkey::from_str(address).is_ok()
}

/// Explorer link for a transaction signature.
pub fn explorer_url(signature: &str, cluster: &str) -> String {
    format!("https://explorer.solana.com/tx/{}?cluster={}", signature, cluster)
}

fn parse_address(address: &str) -> Result<Pubkey, ServiceError> {
    Pubkey::from_str(address).map_err(|_| ServiceError::InvalidPayoutAddress)
}

// ============================================================================
// Custody provider HTTP client
// ============================================================================

#[derive(Debug, Clone)]
pub struct CustodyClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Deserialize)]
struct AccountResponse {
    address: String,
}

#[derive(Deserialize)]
struct FaucetResponse {
    signature: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct SignResponse {
    signed_transaction: String,
}

impl CustodyClient {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(CHAIN_CALL_TIMEOUT)
            .build()
            .expect("reqwest client construction cannot fail with static options");

        Self {
            client,
            base_url: base_url.into(),
            api_key,
        }
    }

    /// Mutating custody calls carry a fresh idempotency key so a retried
    /// request cannot double-spend.
    fn post(&self, path: &str) -> reqwest::RequestBuilder {
        let mut req = self
            .client
            .post(format!("{}{}", self.base_url, path))
            .header("X-Idempotency-Key", Uuid::new_v4().to_string());

        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        req
    }

    pub async fn create_account(&self) -> Result<String, ServiceError> {
        let response = self
            .post("/solana/accounts")
            .json(&json!({}))
            .send()
            .await
            .map_err(custody_error)?;

        if !response.status().is_success() {
            return Err(ServiceError::Custody(format!(
                "account creation returned {}",
                response.status()
            )));
        }

        let account: AccountResponse = response.json().await.map_err(custody_error)?;
        info!("Created custodial Solana account {}", account.address);
        Ok(account.address)
    }

    pub async fn request_faucet(&self, address: &str) -> Result<String, ServiceError> {
        let response = self
            .post("/solana/faucet")
            .json(&json!({ "address": address, "token": "sol" }))
            .send()
            .await
            .map_err(custody_error)?;

        if !response.status().is_success() {
            return Err(ServiceError::Custody(format!(
                "faucet request returned {}",
                response.status()
            )));
        }

        let receipt: FaucetResponse = response.json().await.map_err(custody_error)?;
        Ok(receipt.signature)
    }

    pub async fn sign_transaction(
        &self,
        address: &str,
        transaction_base64: &str,
    ) -> Result<String, ServiceError> {
        let response = self
            .post(&format!("/solana/accounts/{}/sign", address))
            .json(&json!({ "transaction": transaction_base64 }))
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ServiceError::ChainTimeout
                } else {
                    ServiceError::SigningFailed(e.to_string())
                }
            })?;

        if !response.status().is_success() {
            return Err(ServiceError::SigningFailed(format!(
                "signing returned {}",
                response.status()
            )));
        }

        let signed: SignResponse = response
            .json()
            .await
            .map_err(|e| ServiceError::SigningFailed(e.to_string()))?;
        Ok(signed.signed_transaction)
    }
}

fn custody_error(e: reqwest::Error) -> ServiceError {
    if e.is_timeout() {
        ServiceError::ChainTimeout
    } else {
        ServiceError::Custody(e.to_string())
    }
}

// ============================================================================
// Live gateway
// ============================================================================

pub struct SolanaGateway {
    rpc: RpcClient,
    custody: CustodyClient,
}

impl SolanaGateway {
    pub fn new(rpc_url: &str, commitment: &str, custody: CustodyClient) -> Self {
        let commitment =
            CommitmentConfig::from_str(commitment).unwrap_or(CommitmentConfig::confirmed());
        let rpc = RpcClient::new_with_timeout_and_commitment(
            rpc_url.to_string(),
            CHAIN_CALL_TIMEOUT,
            commitment,
        );

        Self { rpc, custody }
    }
}

fn rpc_error(e: solana_client::client_error::ClientError) -> ServiceError {
    ServiceError::RpcUnavailable(e.to_string())
}

#[async_trait]
impl ChainGateway for SolanaGateway {
    async fn create_account(&self) -> Result<String, ServiceError> {
        self.custody.create_account().await
    }

    async fn request_faucet(&self, address: &str) -> Result<String, ServiceError> {
        self.custody.request_faucet(address).await
    }

    async fn balance(&self, address: &str) -> Result<u64, ServiceError> {
        let key = parse_address(address)?;
        self.rpc.get_balance(&key).await.map_err(rpc_error)
    }

    async fn transfer(
        &self,
        from: &str,
        to: &str,
        lamports: u64,
    ) -> Result<String, ServiceError> {
        let from_key = parse_address(from)?;
        let to_key = parse_address(to)?;

        let available = self.rpc.get_balance(&from_key).await.map_err(rpc_error)?;
        if available < lamports {
            return Err(ServiceError::InsufficientFunds {
                needed: lamports,
                available,
            });
        }

        let blockhash = self.rpc.get_latest_blockhash().await.map_err(rpc_error)?;
        let instruction = system_instruction::transfer(&from_key, &to_key, lamports);
        let message = Message::new_with_blockhash(&[instruction], Some(&from_key), &blockhash);
        let unsigned = Transaction::new_unsigned(message);

        let wire = bincode::serialize(&unsigned)
            .map_err(|e| ServiceError::SigningFailed(e.to_string()))?;
        debug!("Sending {} byte transfer to custody for signing", wire.len());

        let signed_base64 = self
            .custody
            .sign_transaction(from, &BASE64.encode(&wire))
            .await?;

        let signed_bytes = BASE64
            .decode(signed_base64.as_bytes())
            .map_err(|e| ServiceError::SigningFailed(e.to_string()))?;
        let signed: Transaction = bincode::deserialize(&signed_bytes)
            .map_err(|e| ServiceError::SigningFailed(e.to_string()))?;

        let signature = self
            .rpc
            .send_and_confirm_transaction(&signed)
            .await
            .map_err(|e| ServiceError::TransactionRejected(e.to_string()))?;

        info!(
            "Transferred {} lamports from {} to {}: {}",
            lamports, from, to, signature
        );
        Ok(signature.to_string())
    }
}

// ============================================================================
// In-memory chain for tests
// ============================================================================


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_validation() {
        // system program id and a devnet account, both well-formed base58
        assert!(is_valid_address("11111111111111111111111111111111"));
        assert!(is_valid_address("532AY6h9d5qEHBYenLTq51yF994kUFcGMdmQ4x9bGinu"));

        assert!(!is_valid_address(""));
        assert!(!is_valid_address("not_a_valid_address"));
        assert!(!is_valid_address("0x52908400098527886E0F7030069857D2E4169EE7"));
    }

    #[test]
    fn test_explorer_url() {
        assert_eq!(
            explorer_url("abc123", "devnet"),
            "https://explorer.solana.com/tx/abc123?cluster=devnet"
        );
    }
}
