//! Error taxonomy for the reward pipeline
//!
//! Every failure path maps to an HTTP status and a structured
//! `{"error": ...}` payload.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("invalid webhook signature")]
    SignatureInvalid,

    #[error("server configuration error: {0} is not set")]
    ConfigMissing(&'static str),

    #[error("invalid JSON payload")]
    MalformedPayload(#[source] serde_json::Error),

    #[error("GitHub connection expired, please reconnect")]
    UpstreamAuthExpired,

    #[error("no GitHub App installations found for this user")]
    NoInstallationsFound,

    #[error("wallet already exists for this repository")]
    WalletAlreadyExists,

    #[error("wallet not found for this repository")]
    WalletNotFound,

    #[error("invalid Solana address")]
    InvalidPayoutAddress,

    #[error("contributor not registered")]
    ContributorNotRegistered,

    #[error("insufficient funds: need {needed} lamports, have {available}")]
    InsufficientFunds { needed: u64, available: u64 },

    #[error("custody provider failed to sign transaction: {0}")]
    SigningFailed(String),

    #[error("transaction rejected by the ledger: {0}")]
    TransactionRejected(String),

    #[error("installation token exchange failed: {0}")]
    TokenExchangeFailed(String),

    #[error("custody provider error: {0}")]
    Custody(String),

    #[error("Solana RPC unavailable: {0}")]
    RpcUnavailable(String),

    #[error("ledger call timed out")]
    ChainTimeout,

    #[error("GitHub API error: {0}")]
    Upstream(String),
}

impl ServiceError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::SignatureInvalid | Self::UpstreamAuthExpired => StatusCode::UNAUTHORIZED,
            Self::MalformedPayload(_)
            | Self::InvalidPayoutAddress
            | Self::InsufficientFunds { .. } => StatusCode::BAD_REQUEST,
            Self::NoInstallationsFound
            | Self::WalletNotFound
            | Self::ContributorNotRegistered => StatusCode::NOT_FOUND,
            Self::WalletAlreadyExists => StatusCode::CONFLICT,
            Self::SigningFailed(_)
            | Self::TransactionRejected(_)
            | Self::TokenExchangeFailed(_)
            | Self::Custody(_)
            | Self::RpcUnavailable(_)
            | Self::Upstream(_) => StatusCode::BAD_GATEWAY,
            Self::ChainTimeout => StatusCode::GATEWAY_TIMEOUT,
            Self::ConfigMissing(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ServiceError {
    fn into_response(self) -> Response {
        let status = self.status();
        (status, Json(json!({ "error": self.to_string() }))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ServiceError::SignatureInvalid.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ServiceError::WalletNotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ServiceError::WalletAlreadyExists.status(), StatusCode::CONFLICT);
        assert_eq!(ServiceError::InvalidPayoutAddress.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            ServiceError::ConfigMissing("WEBHOOK_SECRET").status(),
            StatusCode::INTERNAL_SERVER_ERROR
        );
        assert_eq!(ServiceError::ChainTimeout.status(), StatusCode::GATEWAY_TIMEOUT);
    }
}
