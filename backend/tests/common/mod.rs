#![allow(dead_code)]

use async_trait::async_trait;
use exchange::ledger::{InMemoryLedger, Ledger, LedgerError, Receipt};
use exchange::models::{Amount, ProviderEndpoint, ProviderResponse, QueryRequest, SettlementRecord};
use exchange::provider::{ProviderClient, ProviderError};
use rand::rngs::OsRng;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub type CallLog = Arc<Mutex<Vec<String>>>;

pub fn endpoint(name: &str) -> ProviderEndpoint {
    ProviderEndpoint {
        name: name.to_string(),
        url: format!("http://{name}.invalid"),
        account: format!("acct-{name}"),
    }
}

pub fn calls(log: &CallLog) -> Vec<String> {
    log.lock().unwrap().clone()
}

/// In-memory ledger that logs every call and can be told to fail transfers to one account.
pub struct RecordingLedger {
    pub inner: InMemoryLedger,
    pub log: CallLog,
    fail_account: Mutex<Option<String>>,
}

impl RecordingLedger {
    pub fn new(balances: &[(&str, Amount)], log: CallLog) -> Self {
        Self {
            inner: InMemoryLedger::with_balances(balances.iter().map(|(h, a)| (*h, *a))),
            log,
            fail_account: Mutex::new(None),
        }
    }

    pub fn fail_transfers_to(&self, account: Option<&str>) {
        *self.fail_account.lock().unwrap() = account.map(str::to_string);
    }

    pub fn transfer_count(&self) -> usize {
        self.inner.transfers().len()
    }
}

#[async_trait]
impl Ledger for RecordingLedger {
    async fn balance(&self, holder: &str) -> Result<Amount, LedgerError> {
        self.log.lock().unwrap().push(format!("balance:{holder}"));
        self.inner.balance(holder).await
    }

    async fn transfer(&self, from: &str, to: &str, amount: Amount, reference: &str) -> Result<Receipt, LedgerError> {
        self.log.lock().unwrap().push(format!("transfer:{to}"));
        if self.fail_account.lock().unwrap().as_deref() == Some(to) {
            return Err(LedgerError::Backend("ledger unavailable".to_string()));
        }
        self.inner.transfer(from, to, amount, reference).await
    }

    async fn record_plan(&self, session_id: Uuid, records: &[SettlementRecord]) -> Result<(), LedgerError> {
        self.log.lock().unwrap().push("plan".to_string());
        self.inner.record_plan(session_id, records).await
    }

    async fn planned(&self, session_id: Uuid) -> Result<Vec<SettlementRecord>, LedgerError> {
        self.inner.planned(session_id).await
    }

    async fn receipt(&self, reference: &str) -> Result<Option<Receipt>, LedgerError> {
        self.inner.receipt(reference).await
    }
}

/// Wraps a ledger and never completes a transfer to `account`, like a confirmation that never arrives.
pub struct StallingLedger<L> {
    pub inner: L,
    account: String,
}

impl<L: Ledger> StallingLedger<L> {
    pub fn new(inner: L, account: &str) -> Self {
        Self {
            inner,
            account: account.to_string(),
        }
    }
}

#[async_trait]
impl<L: Ledger> Ledger for StallingLedger<L> {
    async fn balance(&self, holder: &str) -> Result<Amount, LedgerError> {
        self.inner.balance(holder).await
    }

    async fn transfer(&self, from: &str, to: &str, amount: Amount, reference: &str) -> Result<Receipt, LedgerError> {
        if to == self.account {
            std::future::pending::<()>().await;
        }
        self.inner.transfer(from, to, amount, reference).await
    }

    async fn record_plan(&self, session_id: Uuid, records: &[SettlementRecord]) -> Result<(), LedgerError> {
        self.inner.record_plan(session_id, records).await
    }

    async fn planned(&self, session_id: Uuid) -> Result<Vec<SettlementRecord>, LedgerError> {
        self.inner.planned(session_id).await
    }

    async fn receipt(&self, reference: &str) -> Result<Option<Receipt>, LedgerError> {
        self.inner.receipt(reference).await
    }
}

/// Ledger whose every call fails.
pub struct BrokenLedger;

#[async_trait]
impl Ledger for BrokenLedger {
    async fn balance(&self, _: &str) -> Result<Amount, LedgerError> {
        Err(LedgerError::Backend("ledger unavailable".to_string()))
    }

    async fn transfer(&self, _: &str, _: &str, _: Amount, _: &str) -> Result<Receipt, LedgerError> {
        Err(LedgerError::Backend("ledger unavailable".to_string()))
    }

    async fn record_plan(&self, _: Uuid, _: &[SettlementRecord]) -> Result<(), LedgerError> {
        Err(LedgerError::Backend("ledger unavailable".to_string()))
    }

    async fn planned(&self, _: Uuid) -> Result<Vec<SettlementRecord>, LedgerError> {
        Err(LedgerError::Backend("ledger unavailable".to_string()))
    }

    async fn receipt(&self, _: &str) -> Result<Option<Receipt>, LedgerError> {
        Err(LedgerError::Backend("ledger unavailable".to_string()))
    }
}

#[derive(Clone)]
pub enum Reply {
    /// Plain-mode average.
    Average(f64),
    /// Matching records; answered in either mode.
    Records { sum: u64, count: u64 },
    Fail,
    Slow(Duration, Box<Reply>),
}

/// Provider double answering from a fixed script.
pub struct StubProvider {
    replies: HashMap<String, Reply>,
    pub log: CallLog,
}

impl StubProvider {
    pub fn new(replies: &[(&str, Reply)], log: CallLog) -> Self {
        Self {
            replies: replies.iter().map(|(n, r)| (n.to_string(), r.clone())).collect(),
            log,
        }
    }
}

fn answer(reply: &Reply, request: &QueryRequest) -> Result<ProviderResponse, ProviderError> {
    match (reply, request) {
        (Reply::Average(v), QueryRequest::Plain { .. }) => Ok(ProviderResponse::Statistic(*v)),
        (Reply::Average(_), QueryRequest::Encrypted { .. }) => Err(ProviderError::Status(400)),
        (Reply::Records { sum, count }, QueryRequest::Plain { .. }) => {
            if *count == 0 {
                Err(ProviderError::Status(404))
            } else {
                Ok(ProviderResponse::Statistic(*sum as f64 / *count as f64))
            }
        }
        (Reply::Records { sum, count }, QueryRequest::Encrypted { public_key, .. }) => {
            Ok(ProviderResponse::Encrypted {
                sum: public_key.encrypt_u64(*sum, &mut OsRng).unwrap(),
                count: public_key.encrypt_u64(*count, &mut OsRng).unwrap(),
            })
        }
        (Reply::Fail, _) => Err(ProviderError::Status(500)),
        (Reply::Slow(..), _) => unreachable!("handled by the caller"),
    }
}

#[async_trait]
impl ProviderClient for StubProvider {
    async fn query(&self, provider: &ProviderEndpoint, request: &QueryRequest) -> Result<ProviderResponse, ProviderError> {
        self.log.lock().unwrap().push(format!("query:{}", provider.name));

        let mut reply = self.replies.get(&provider.name).cloned().unwrap_or(Reply::Fail);
        while let Reply::Slow(delay, inner) = reply {
            tokio::time::sleep(delay).await;
            reply = *inner;
        }
        answer(&reply, request)
    }
}
