use crate::ledger::LedgerError;
use crate::models::{Amount, SettlementRecord};
use axum::{http::StatusCode, response::{IntoResponse, Response}, Json};
use paillier::PaillierError;
use serde::Serialize;
use thiserror::Error;

/// Every way a purchase session can end without reaching `Settled`.
#[derive(Debug, Error)]
pub enum ExchangeError {
    #[error("insufficient funds: {required} required, {available} available")]
    InsufficientFunds { required: Amount, available: Amount },

    #[error("quorum not met: {received} valid responses, {required} required")]
    QuorumNotMet { required: usize, received: usize },

    #[error("no matching records")]
    NoRecords,

    /// Another session, possibly in another process, holds this requestor's lease.
    #[error("requestor {0} already has a session running")]
    RequestorBusy(String),

    /// A transfer failed mid-settlement. `settlements` lists every planned payment with its status.
    #[error("transfer to {provider} failed: {reason}")]
    LedgerTransfer {
        provider: String,
        reason: String,
        settlements: Vec<SettlementRecord>,
    },

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("crypto error: {0}")]
    Crypto(#[from] PaillierError),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("protocol violation: {0}")]
    Protocol(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ExchangeError {
    /// Stable machine-readable code for error reports.
    pub fn code(&self) -> &'static str {
        match self {
            ExchangeError::InsufficientFunds { .. } => "insufficient_funds",
            ExchangeError::QuorumNotMet { .. } => "quorum_not_met",
            ExchangeError::NoRecords => "no_records",
            ExchangeError::RequestorBusy(_) => "requestor_busy",
            ExchangeError::LedgerTransfer { .. } => "ledger_transfer",
            ExchangeError::Ledger(_) => "ledger",
            ExchangeError::Crypto(PaillierError::Range) => "range",
            ExchangeError::Crypto(PaillierError::NoInverse) => "no_inverse",
            ExchangeError::Crypto(PaillierError::KeyGen) => "key_gen",
            ExchangeError::Crypto(_) => "crypto",
            ExchangeError::Config(_) => "config",
            ExchangeError::Protocol(_) => "protocol",
            ExchangeError::Internal(_) => "internal",
        }
    }

    /// Payments already known for the session, confirmed or still outstanding.
    pub fn settlements(&self) -> &[SettlementRecord] {
        match self {
            ExchangeError::LedgerTransfer { settlements, .. } => settlements,
            _ => &[],
        }
    }
}

/// Errors surfaced by the provider HTTP endpoint.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("internal error")]
    Internal,
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, msg) = match &self {
            ApiError::BadRequest(m) => (StatusCode::BAD_REQUEST, m.clone()),
            ApiError::NotFound(m) => (StatusCode::NOT_FOUND, m.clone()),
            ApiError::Internal => (StatusCode::INTERNAL_SERVER_ERROR, "internal error".to_string()),
        };

        (status, Json(ErrorBody { error: msg })).into_response()
    }
}
