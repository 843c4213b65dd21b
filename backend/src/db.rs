use crate::errors::ExchangeError;
use crate::ledger::{Ledger, LedgerError, Receipt};
use crate::models::{Amount, SettlementRecord, SettlementStatus};
use crate::state::RequestorLeases;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{sqlite::SqlitePoolOptions, Pool, Row, Sqlite, SqliteConnection};
use std::time::Duration;
use uuid::Uuid;

pub type Db = Pool<Sqlite>;

pub async fn connect(db_url: &str) -> Result<Db, ExchangeError> {
    SqlitePoolOptions::new()
        .max_connections(5)
        .connect(db_url)
        .await
        .map_err(|e| ExchangeError::Internal(format!("database connect: {e}")))
}

pub async fn init_schema(db: &Db) -> Result<(), ExchangeError> {
    // Amounts are stored as decimal TEXT; SQLite integers stop at i64.
    sqlx::query(
        r#"
CREATE TABLE IF NOT EXISTS accounts (
  holder TEXT PRIMARY KEY,
  balance TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS transfers (
  reference TEXT PRIMARY KEY,
  tx_id TEXT NOT NULL,
  from_holder TEXT NOT NULL,
  to_holder TEXT NOT NULL,
  amount TEXT NOT NULL,
  confirmed_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS settlement_plans (
  reference TEXT PRIMARY KEY,
  session_id TEXT NOT NULL,
  position INTEGER NOT NULL,
  provider TEXT NOT NULL,
  account TEXT NOT NULL,
  amount TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS settlement_plans_session ON settlement_plans (session_id, position);

-- expires_at is unix milliseconds.
CREATE TABLE IF NOT EXISTS requestor_leases (
  requestor TEXT PRIMARY KEY,
  session_id TEXT NOT NULL,
  expires_at INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS sessions (
  id TEXT PRIMARY KEY,
  created_at TEXT NOT NULL,
  updated_at TEXT NOT NULL,
  requestor TEXT NOT NULL,
  condition TEXT NOT NULL,
  status TEXT NOT NULL,
  report_json TEXT
);
"#,
    )
    .execute(db)
    .await
    .map_err(|e| ExchangeError::Internal(format!("schema: {e}")))?;

    Ok(())
}

fn backend(e: sqlx::Error) -> LedgerError {
    LedgerError::Backend(e.to_string())
}

fn parse_amount(raw: &str) -> Result<Amount, LedgerError> {
    raw.parse::<Amount>()
        .map_err(|_| LedgerError::Backend(format!("corrupt amount '{raw}'")))
}

fn parse_tx_id(raw: &str) -> Result<Uuid, LedgerError> {
    Uuid::parse_str(raw).map_err(|_| LedgerError::Backend(format!("corrupt tx id '{raw}'")))
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, LedgerError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|_| LedgerError::Backend(format!("corrupt timestamp '{raw}'")))
}

async fn read_balance(conn: &mut SqliteConnection, holder: &str) -> Result<Amount, LedgerError> {
    let row = sqlx::query(r#"SELECT balance FROM accounts WHERE holder = ?"#)
        .bind(holder)
        .fetch_optional(&mut *conn)
        .await
        .map_err(backend)?;

    match row {
        Some(row) => parse_amount(&row.get::<String, _>(0)),
        None => Ok(0),
    }
}

async fn write_balance(conn: &mut SqliteConnection, holder: &str, balance: Amount) -> Result<(), LedgerError> {
    sqlx::query(
        r#"INSERT INTO accounts (holder, balance) VALUES (?, ?)
           ON CONFLICT(holder) DO UPDATE SET balance = excluded.balance"#,
    )
    .bind(holder)
    .bind(balance.to_string())
    .execute(&mut *conn)
    .await
    .map_err(backend)?;
    Ok(())
}

/// Token ledger persisted in SQLite.
#[derive(Clone)]
pub struct SqliteLedger {
    db: Db,
}

impl SqliteLedger {
    pub fn new(db: Db) -> Self {
        Self { db }
    }

    pub fn db(&self) -> &Db {
        &self.db
    }

    /// Mint `amount` into `holder`'s account. Returns the new balance.
    pub async fn credit(&self, holder: &str, amount: Amount) -> Result<Amount, LedgerError> {
        let mut tx = self.db.begin().await.map_err(backend)?;

        let balance = read_balance(&mut tx, holder)
            .await?
            .checked_add(amount)
            .ok_or_else(|| LedgerError::Backend(format!("balance overflow for {holder}")))?;
        write_balance(&mut tx, holder, balance).await?;

        tx.commit().await.map_err(backend)?;
        Ok(balance)
    }

    pub async fn balances(&self) -> Result<Vec<(String, Amount)>, LedgerError> {
        let rows = sqlx::query(r#"SELECT holder, balance FROM accounts ORDER BY holder"#)
            .fetch_all(&self.db)
            .await
            .map_err(backend)?;

        rows.iter()
            .map(|row| Ok((row.get::<String, _>(0), parse_amount(&row.get::<String, _>(1))?)))
            .collect()
    }

    async fn apply_transfer(
        conn: &mut SqliteConnection,
        from: &str,
        to: &str,
        amount: Amount,
        reference: &str,
    ) -> Result<Receipt, LedgerError> {
        let existing = sqlx::query(
            r#"SELECT tx_id, from_holder, to_holder, amount, confirmed_at
               FROM transfers WHERE reference = ?"#,
        )
        .bind(reference)
        .fetch_optional(&mut *conn)
        .await
        .map_err(backend)?;

        if let Some(row) = existing {
            let same = row.get::<String, _>(1) == from
                && row.get::<String, _>(2) == to
                && parse_amount(&row.get::<String, _>(3))? == amount;
            if !same {
                return Err(LedgerError::ReferenceConflict(reference.to_string()));
            }
            return Ok(Receipt {
                tx_id: parse_tx_id(&row.get::<String, _>(0))?,
                reference: reference.to_string(),
                confirmed_at: parse_timestamp(&row.get::<String, _>(4))?,
            });
        }

        let available = read_balance(conn, from).await?;
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                holder: from.to_string(),
                available,
                requested: amount,
            });
        }
        write_balance(conn, from, available - amount).await?;

        let credited = read_balance(conn, to)
            .await?
            .checked_add(amount)
            .ok_or_else(|| LedgerError::Backend(format!("balance overflow for {to}")))?;
        write_balance(conn, to, credited).await?;

        let receipt = Receipt {
            tx_id: Uuid::new_v4(),
            reference: reference.to_string(),
            confirmed_at: Utc::now(),
        };

        sqlx::query(
            r#"INSERT INTO transfers (reference, tx_id, from_holder, to_holder, amount, confirmed_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
        )
        .bind(reference)
        .bind(receipt.tx_id.to_string())
        .bind(from)
        .bind(to)
        .bind(amount.to_string())
        .bind(receipt.confirmed_at.to_rfc3339())
        .execute(&mut *conn)
        .await
        .map_err(backend)?;

        Ok(receipt)
    }
}

#[async_trait]
impl Ledger for SqliteLedger {
    async fn balance(&self, holder: &str) -> Result<Amount, LedgerError> {
        let mut conn = self.db.acquire().await.map_err(backend)?;
        read_balance(&mut conn, holder).await
    }

    async fn transfer(
        &self,
        from: &str,
        to: &str,
        amount: Amount,
        reference: &str,
    ) -> Result<Receipt, LedgerError> {
        let mut tx = self.db.begin().await.map_err(backend)?;

        // Dropping `tx` on the error path rolls the transaction back.
        let receipt = Self::apply_transfer(&mut tx, from, to, amount, reference).await?;
        tx.commit().await.map_err(backend)?;

        Ok(receipt)
    }

    async fn record_plan(&self, session_id: Uuid, records: &[SettlementRecord]) -> Result<(), LedgerError> {
        let mut tx = self.db.begin().await.map_err(backend)?;

        for (position, record) in records.iter().enumerate() {
            sqlx::query(
                r#"INSERT OR IGNORE INTO settlement_plans (reference, session_id, position, provider, account, amount)
                   VALUES (?, ?, ?, ?, ?, ?)"#,
            )
            .bind(&record.reference)
            .bind(session_id.to_string())
            .bind(position as i64)
            .bind(&record.provider)
            .bind(&record.account)
            .bind(record.amount.to_string())
            .execute(&mut *tx)
            .await
            .map_err(backend)?;
        }

        tx.commit().await.map_err(backend)?;
        Ok(())
    }

    async fn planned(&self, session_id: Uuid) -> Result<Vec<SettlementRecord>, LedgerError> {
        let rows = sqlx::query(
            r#"SELECT reference, provider, account, amount
               FROM settlement_plans WHERE session_id = ? ORDER BY position"#,
        )
        .bind(session_id.to_string())
        .fetch_all(&self.db)
        .await
        .map_err(backend)?;

        rows.iter()
            .map(|row| {
                Ok(SettlementRecord {
                    reference: row.get(0),
                    provider: row.get(1),
                    account: row.get(2),
                    amount: parse_amount(&row.get::<String, _>(3))?,
                    status: SettlementStatus::Pending,
                    tx_id: None,
                    confirmed_at: None,
                })
            })
            .collect()
    }

    async fn receipt(&self, reference: &str) -> Result<Option<Receipt>, LedgerError> {
        let row = sqlx::query(r#"SELECT tx_id, confirmed_at FROM transfers WHERE reference = ?"#)
            .bind(reference)
            .fetch_optional(&self.db)
            .await
            .map_err(backend)?;

        row.map(|row| {
            Ok(Receipt {
                tx_id: parse_tx_id(&row.get::<String, _>(0))?,
                reference: reference.to_string(),
                confirmed_at: parse_timestamp(&row.get::<String, _>(1))?,
            })
        })
        .transpose()
    }
}

/// Leases live in the ledger database, so processes sharing it also share the reservation.
#[async_trait]
impl RequestorLeases for SqliteLedger {
    async fn acquire(&self, requestor: &str, session_id: Uuid, ttl: Duration) -> Result<bool, LedgerError> {
        let now = Utc::now().timestamp_millis();
        let ttl = i64::try_from(ttl.as_millis()).unwrap_or(i64::MAX);

        // A single statement: either the row is new, or the previous lease has expired.
        let result = sqlx::query(
            r#"INSERT INTO requestor_leases (requestor, session_id, expires_at) VALUES (?, ?, ?)
               ON CONFLICT(requestor) DO UPDATE
               SET session_id = excluded.session_id, expires_at = excluded.expires_at
               WHERE requestor_leases.expires_at < ?"#,
        )
        .bind(requestor)
        .bind(session_id.to_string())
        .bind(now.saturating_add(ttl))
        .bind(now)
        .execute(&self.db)
        .await
        .map_err(backend)?;

        Ok(result.rows_affected() == 1)
    }

    async fn release(&self, requestor: &str, session_id: Uuid) -> Result<(), LedgerError> {
        sqlx::query(r#"DELETE FROM requestor_leases WHERE requestor = ? AND session_id = ?"#)
            .bind(requestor)
            .bind(session_id.to_string())
            .execute(&self.db)
            .await
            .map_err(backend)?;
        Ok(())
    }
}

// --- Session journal ---

pub async fn insert_session(
    db: &Db,
    session_id: Uuid,
    requestor: &str,
    condition: &str,
) -> Result<(), ExchangeError> {
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        r#"INSERT INTO sessions (id, created_at, updated_at, requestor, condition, status)
           VALUES (?, ?, ?, ?, ?, 'running')"#,
    )
    .bind(session_id.to_string())
    .bind(&now)
    .bind(&now)
    .bind(requestor)
    .bind(condition)
    .execute(db)
    .await
    .map_err(|e| ExchangeError::Internal(format!("journal insert: {e}")))?;

    Ok(())
}

pub async fn finish_session(
    db: &Db,
    session_id: Uuid,
    status: &str,
    report_json: &str,
) -> Result<(), ExchangeError> {
    sqlx::query(r#"UPDATE sessions SET status = ?, report_json = ?, updated_at = ? WHERE id = ?"#)
        .bind(status)
        .bind(report_json)
        .bind(Utc::now().to_rfc3339())
        .bind(session_id.to_string())
        .execute(db)
        .await
        .map_err(|e| ExchangeError::Internal(format!("journal update: {e}")))?;
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionEntry {
    pub requestor: String,
    pub condition: String,
    pub status: String,
    pub report_json: Option<String>,
}

pub async fn get_session(db: &Db, session_id: Uuid) -> Result<Option<SessionEntry>, ExchangeError> {
    let row = sqlx::query(r#"SELECT requestor, condition, status, report_json FROM sessions WHERE id = ?"#)
        .bind(session_id.to_string())
        .fetch_optional(db)
        .await
        .map_err(|e| ExchangeError::Internal(format!("journal read: {e}")))?;

    Ok(row.map(|row| SessionEntry {
        requestor: row.get(0),
        condition: row.get(1),
        status: row.get(2),
        report_json: row.get(3),
    }))
}
