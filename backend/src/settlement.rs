use crate::errors::ExchangeError;
use crate::ledger::{Ledger, LedgerError};
use crate::models::{Amount, ProviderEndpoint, SettlementRecord, SettlementStatus};
use tracing::{info, warn};
use uuid::Uuid;

/// Idempotency key for paying `provider` within `session_id`.
pub fn reference(session_id: Uuid, provider: &str) -> String {
    format!("{session_id}:{provider}")
}

/// One pending payment per contributing provider, in contribution order.
pub fn plan(session_id: Uuid, payees: &[ProviderEndpoint], price: Amount) -> Vec<SettlementRecord> {
    payees
        .iter()
        .map(|p| SettlementRecord::pending(p, price, reference(session_id, &p.name)))
        .collect()
}

#[derive(Debug)]
pub struct SettlementFailure {
    pub provider: String,
    pub reason: String,
    /// Every planned payment; the failed one and those after it remain pending.
    pub settlements: Vec<SettlementRecord>,
}

impl From<SettlementFailure> for ExchangeError {
    fn from(failure: SettlementFailure) -> Self {
        ExchangeError::LedgerTransfer {
            provider: failure.provider,
            reason: failure.reason,
            settlements: failure.settlements,
        }
    }
}

/// Pay each pending record in order, waiting for confirmation before starting the next.
///
/// Stops at the first failed transfer. Already confirmed records are left alone.
pub async fn settle(
    ledger: &dyn Ledger,
    from: &str,
    mut records: Vec<SettlementRecord>,
) -> Result<Vec<SettlementRecord>, SettlementFailure> {
    for i in 0..records.len() {
        if records[i].is_confirmed() {
            continue;
        }

        let record = &records[i];
        match ledger
            .transfer(from, &record.account, record.amount, &record.reference)
            .await
        {
            Ok(receipt) => {
                info!(
                    provider = %record.provider,
                    amount = %record.amount,
                    tx_id = %receipt.tx_id,
                    "payment confirmed"
                );
                let record = &mut records[i];
                record.status = SettlementStatus::Confirmed;
                record.tx_id = Some(receipt.tx_id);
                record.confirmed_at = Some(receipt.confirmed_at);
            }
            Err(e) => {
                let provider = record.provider.clone();
                warn!(%provider, error = %e, "payment failed");
                return Err(SettlementFailure {
                    provider,
                    reason: e.to_string(),
                    settlements: records,
                });
            }
        }
    }

    Ok(records)
}

/// Finish an interrupted settlement.
///
/// Every record is replayed under its reference, so payments the ledger already confirmed come
/// back with their original receipt and only the missing ones move funds.
pub async fn reconcile(
    ledger: &dyn Ledger,
    from: &str,
    mut records: Vec<SettlementRecord>,
) -> Result<Vec<SettlementRecord>, SettlementFailure> {
    for record in &mut records {
        record.status = SettlementStatus::Pending;
    }
    settle(ledger, from, records).await
}

/// The recorded plan of `session_id` with each record's status taken from the ledger.
///
/// Empty when the session never reached settlement.
pub async fn progress(ledger: &dyn Ledger, session_id: Uuid) -> Result<Vec<SettlementRecord>, LedgerError> {
    let mut records = ledger.planned(session_id).await?;
    for record in &mut records {
        if let Some(receipt) = ledger.receipt(&record.reference).await? {
            record.status = SettlementStatus::Confirmed;
            record.tx_id = Some(receipt.tx_id);
            record.confirmed_at = Some(receipt.confirmed_at);
        }
    }
    Ok(records)
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reconciliation {
    /// No plan was recorded: the session stopped before any provider was owed.
    NothingPlanned,
    /// Every planned payment was already confirmed.
    AlreadySettled(Vec<SettlementRecord>),
    /// The outstanding payments went through.
    Completed(Vec<SettlementRecord>),
}

impl Reconciliation {
    pub fn settlements(&self) -> &[SettlementRecord] {
        match self {
            Reconciliation::NothingPlanned => &[],
            Reconciliation::AlreadySettled(records) | Reconciliation::Completed(records) => records,
        }
    }
}

/// Pay whatever `session_id` still owes, working from the plan recorded in the ledger.
pub async fn reconcile_session(
    ledger: &dyn Ledger,
    session_id: Uuid,
    from: &str,
) -> Result<Reconciliation, ExchangeError> {
    let records = progress(ledger, session_id).await?;

    if records.is_empty() {
        info!(%session_id, "no settlement plan recorded");
        return Ok(Reconciliation::NothingPlanned);
    }
    let outstanding = records.iter().filter(|r| !r.is_confirmed()).count();
    if outstanding == 0 {
        info!(%session_id, "no outstanding payments");
        return Ok(Reconciliation::AlreadySettled(records));
    }

    info!(%session_id, outstanding, "reconciling session");
    let settled = reconcile(ledger, from, records).await?;
    Ok(Reconciliation::Completed(settled))
}
