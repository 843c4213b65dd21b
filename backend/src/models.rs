use crate::errors::ExchangeError;
use chrono::{DateTime, Utc};
use num_bigint::BigUint;
use paillier::{Ciphertext, PublicKey};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Token amount in the ledger's smallest unit.
pub type Amount = u128;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
    /// Providers return their own statistic in the clear.
    #[default]
    Plain,
    /// Providers return an encrypted (sum, count) under the session's public key.
    Encrypted,
}

/// One provider as known to the requestor: where to query it and where to pay it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderEndpoint {
    pub name: String,
    pub url: String,
    pub account: String,
}

// --- Provider wire format ---

#[derive(Debug, Serialize, Deserialize)]
pub struct PlainQueryParams {
    pub condition: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PlainQueryResponse {
    pub avg_age: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EncryptedQueryRequest {
    pub condition: String,

    /// Public modulus of the requesting session, as a decimal string.
    #[serde(with = "paillier::wire::decimal")]
    pub n: BigUint,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct EncryptedQueryResponse {
    pub enc_sum: Ciphertext,
    pub enc_count: Ciphertext,
}

// --- Session values ---

#[derive(Debug, Clone)]
pub enum QueryRequest {
    Plain { condition: String },
    Encrypted { condition: String, public_key: PublicKey },
}

impl QueryRequest {
    pub fn condition(&self) -> &str {
        match self {
            QueryRequest::Plain { condition } | QueryRequest::Encrypted { condition, .. } => condition,
        }
    }

    pub fn mode(&self) -> QueryMode {
        match self {
            QueryRequest::Plain { .. } => QueryMode::Plain,
            QueryRequest::Encrypted { .. } => QueryMode::Encrypted,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum ProviderResponse {
    Statistic(f64),
    Encrypted { sum: Ciphertext, count: Ciphertext },
}

/// A validated response together with the provider that sent it.
#[derive(Debug, Clone)]
pub struct Contribution {
    pub provider: ProviderEndpoint,
    pub response: ProviderResponse,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AggregationResult {
    pub combined: f64,
    pub noisy: f64,
    pub sources: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SettlementStatus {
    Pending,
    Confirmed,
}

/// One payment to one provider for one session.
///
/// `reference` is the idempotency key the ledger deduplicates on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SettlementRecord {
    pub provider: String,
    pub account: String,
    pub amount: Amount,
    pub reference: String,
    pub status: SettlementStatus,
    pub tx_id: Option<Uuid>,
    pub confirmed_at: Option<DateTime<Utc>>,
}

impl SettlementRecord {
    pub fn pending(provider: &ProviderEndpoint, amount: Amount, reference: String) -> Self {
        Self {
            provider: provider.name.clone(),
            account: provider.account.clone(),
            amount,
            reference,
            status: SettlementStatus::Pending,
            tx_id: None,
            confirmed_at: None,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        self.status == SettlementStatus::Confirmed
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Balances {
    pub requestor: Amount,
    pub providers: BTreeMap<String, Amount>,
}

/// Structured result of a settled session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionReport {
    pub session_id: Uuid,
    pub requestor: String,
    pub condition: String,
    pub mode: QueryMode,
    pub combined_statistic: f64,
    pub noisy_statistic: f64,
    pub sources: usize,
    pub settlements: Vec<SettlementRecord>,

    /// Observed after settlement; `None` if the ledger could not be read back.
    pub balances: Option<Balances>,
}

/// Structured result of an aborted session.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorReport {
    pub session_id: Uuid,
    pub requestor: String,
    pub condition: String,
    pub error: String,
    pub message: String,

    /// Payments made or still owed for this session. Empty unless settlement had started.
    pub settlements: Vec<SettlementRecord>,
}

impl ErrorReport {
    pub fn new(session_id: Uuid, requestor: &str, condition: &str, err: &ExchangeError) -> Self {
        Self {
            session_id,
            requestor: requestor.to_string(),
            condition: condition.to_string(),
            error: err.code().to_string(),
            message: err.to_string(),
            settlements: err.settlements().to_vec(),
        }
    }

    pub fn pending_settlements(&self) -> impl Iterator<Item = &SettlementRecord> {
        self.settlements.iter().filter(|s| !s.is_confirmed())
    }
}
