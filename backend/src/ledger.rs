//! Ledger interface used for balance checks and settlement.
//!
//! A transfer is only reported once it is confirmed, and confirmed transfers are final.
//! Each transfer carries a caller-chosen reference; replaying a confirmed reference with the
//! same parameters returns the original receipt instead of paying twice.
//!
//! Before the first transfer of a session its full payment plan is recorded, so the payments
//! still owed can be recovered even if the session is dropped mid-settlement.

use crate::models::{Amount, SettlementRecord, SettlementStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum LedgerError {
    #[error("{holder} holds {available}, cannot transfer {requested}")]
    InsufficientBalance {
        holder: String,
        available: Amount,
        requested: Amount,
    },

    #[error("reference {0} already used for a different transfer")]
    ReferenceConflict(String),

    #[error("ledger backend: {0}")]
    Backend(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Receipt {
    pub tx_id: Uuid,
    pub reference: String,
    pub confirmed_at: DateTime<Utc>,
}

#[async_trait]
pub trait Ledger: Send + Sync {
    async fn balance(&self, holder: &str) -> Result<Amount, LedgerError>;

    /// Move `amount` from `from` to `to`, returning once the transfer is confirmed.
    async fn transfer(
        &self,
        from: &str,
        to: &str,
        amount: Amount,
        reference: &str,
    ) -> Result<Receipt, LedgerError>;

    /// Record the payments `session_id` is about to make. The first plan recorded for a session wins.
    async fn record_plan(&self, session_id: Uuid, records: &[SettlementRecord]) -> Result<(), LedgerError>;

    /// The recorded plan of `session_id`, in payment order, every record pending.
    async fn planned(&self, session_id: Uuid) -> Result<Vec<SettlementRecord>, LedgerError>;

    /// Receipt of the confirmed transfer made under `reference`, if any.
    async fn receipt(&self, reference: &str) -> Result<Option<Receipt>, LedgerError>;
}

#[derive(Debug, Clone)]
struct TransferEntry {
    from: String,
    to: String,
    amount: Amount,
    receipt: Receipt,
}

#[derive(Debug, Default)]
struct Book {
    balances: HashMap<String, Amount>,
    transfers: HashMap<String, TransferEntry>,
    order: Vec<String>,
    plans: HashMap<Uuid, Vec<SettlementRecord>>,
}

/// Process-local ledger for tests and demos.
#[derive(Debug, Default)]
pub struct InMemoryLedger {
    book: Mutex<Book>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balances<I, S>(balances: I) -> Self
    where
        I: IntoIterator<Item = (S, Amount)>,
        S: Into<String>,
    {
        let ledger = Self::new();
        {
            let mut book = ledger.book();
            for (holder, amount) in balances {
                book.balances.insert(holder.into(), amount);
            }
        }
        ledger
    }

    fn book(&self) -> MutexGuard<'_, Book> {
        self.book.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn credit(&self, holder: &str, amount: Amount) {
        let mut book = self.book();
        let balance = book.balances.entry(holder.to_string()).or_default();
        *balance = balance.saturating_add(amount);
    }

    /// Confirmed transfers as `(reference, from, to, amount)`, oldest first.
    pub fn transfers(&self) -> Vec<(String, String, String, Amount)> {
        let book = self.book();
        book.order
            .iter()
            .filter_map(|r| book.transfers.get(r))
            .map(|t| (t.receipt.reference.clone(), t.from.clone(), t.to.clone(), t.amount))
            .collect()
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    async fn balance(&self, holder: &str) -> Result<Amount, LedgerError> {
        Ok(self.book().balances.get(holder).copied().unwrap_or(0))
    }

    async fn transfer(
        &self,
        from: &str,
        to: &str,
        amount: Amount,
        reference: &str,
    ) -> Result<Receipt, LedgerError> {
        let mut book = self.book();

        if let Some(existing) = book.transfers.get(reference) {
            if existing.from == from && existing.to == to && existing.amount == amount {
                return Ok(existing.receipt.clone());
            }
            return Err(LedgerError::ReferenceConflict(reference.to_string()));
        }

        let available = book.balances.get(from).copied().unwrap_or(0);
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                holder: from.to_string(),
                available,
                requested: amount,
            });
        }

        let credited = book
            .balances
            .get(to)
            .copied()
            .unwrap_or(0)
            .checked_add(amount)
            .ok_or_else(|| LedgerError::Backend(format!("balance overflow for {to}")))?;

        book.balances.insert(from.to_string(), available - amount);
        // Self-transfers net to zero.
        let credited = if from == to { available } else { credited };
        book.balances.insert(to.to_string(), credited);

        let receipt = Receipt {
            tx_id: Uuid::new_v4(),
            reference: reference.to_string(),
            confirmed_at: Utc::now(),
        };
        book.transfers.insert(
            reference.to_string(),
            TransferEntry {
                from: from.to_string(),
                to: to.to_string(),
                amount,
                receipt: receipt.clone(),
            },
        );
        book.order.push(reference.to_string());

        Ok(receipt)
    }

    async fn record_plan(&self, session_id: Uuid, records: &[SettlementRecord]) -> Result<(), LedgerError> {
        self.book().plans.entry(session_id).or_insert_with(|| {
            records
                .iter()
                .map(|r| SettlementRecord {
                    status: SettlementStatus::Pending,
                    tx_id: None,
                    confirmed_at: None,
                    ..r.clone()
                })
                .collect()
        });
        Ok(())
    }

    async fn planned(&self, session_id: Uuid) -> Result<Vec<SettlementRecord>, LedgerError> {
        Ok(self.book().plans.get(&session_id).cloned().unwrap_or_default())
    }

    async fn receipt(&self, reference: &str) -> Result<Option<Receipt>, LedgerError> {
        Ok(self.book().transfers.get(reference).map(|t| t.receipt.clone()))
    }
}
