use async_trait::async_trait;
use chrono::DateTime;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::sync::{Arc, Mutex};
use tokio::task;

use crate::error::PipelineError;
use crate::models::{StoredTransaction, TransactionRecord};

const INIT_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS transactions (
  hash             TEXT PRIMARY KEY,
  to_address       TEXT NOT NULL,
  from_address     TEXT NOT NULL,
  input_data       TEXT NOT NULL,
  event_timestamp  TEXT NOT NULL, -- RFC3339, block time
  nonce            INTEGER NOT NULL,
  gas_price        TEXT NOT NULL, -- decimal wei
  gas_limit        INTEGER NOT NULL,
  value            TEXT NOT NULL, -- decimal wei
  base_fee_per_gas TEXT NOT NULL,
  stored_at        TEXT NOT NULL DEFAULT (datetime('now'))
);

CREATE INDEX IF NOT EXISTS idx_transactions_to ON transactions (LOWER(to_address));
"#;

/// Connect to SQLite (with WAL mode for performance)
pub fn connect(path: &str) -> rusqlite::Result<Connection> {
    let conn = Connection::open(path)?;
    conn.pragma_update(None, "journal_mode", "WAL")?;
    Ok(conn)
}

/// Create the transactions table if it is missing
pub fn run_migrations(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(INIT_SQL)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    /// A row with this hash already existed; nothing changed.
    Duplicate,
}

/// Insert a transaction, doing nothing if the hash is already stored.
/// Hashes are keyed in lowercase so `0xAB..` and `0xab..` are one row.
pub fn insert_transaction(conn: &Connection, record: &TransactionRecord) -> rusqlite::Result<InsertOutcome> {
    let hash = record.hash.to_ascii_lowercase();
    let event_timestamp = record
        .event_time()
        .map(|t| t.to_rfc3339())
        .unwrap_or_else(|| record.block_timestamp.to_string());

    let changed = conn.execute(
        r#"
        INSERT INTO transactions (
            hash, to_address, from_address, input_data, event_timestamp,
            nonce, gas_price, gas_limit, value, base_fee_per_gas
        )
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
        ON CONFLICT(hash) DO NOTHING
        "#,
        params![
            hash,
            record.to,
            record.from,
            record.input_data,
            event_timestamp,
            record.nonce as i64,
            record.gas_price,
            record.gas_limit as i64,
            record.value,
            record.base_fee_per_gas,
        ],
    )?;

    Ok(if changed == 0 {
        InsertOutcome::Duplicate
    } else {
        InsertOutcome::Inserted
    })
}

const SELECT_COLUMNS: &str = "hash, to_address, from_address, input_data, event_timestamp, \
     nonce, gas_price, gas_limit, value, base_fee_per_gas, stored_at";

fn row_to_stored(r: &Row<'_>) -> rusqlite::Result<StoredTransaction> {
    let event_timestamp: String = r.get(4)?;
    let block_timestamp = DateTime::parse_from_rfc3339(&event_timestamp)
        .map(|t| t.timestamp())
        .or_else(|_| event_timestamp.parse::<i64>())
        .unwrap_or(0);

    Ok(StoredTransaction {
        record: TransactionRecord {
            hash: r.get(0)?,
            to: r.get(1)?,
            from: r.get(2)?,
            input_data: r.get(3)?,
            block_timestamp,
            nonce: r.get::<_, i64>(5)? as u64,
            gas_price: r.get(6)?,
            gas_limit: r.get::<_, i64>(7)? as u64,
            value: r.get(8)?,
            base_fee_per_gas: r.get(9)?,
        },
        stored_at: r.get(10)?,
    })
}

pub fn get_transaction(conn: &Connection, hash: &str) -> rusqlite::Result<Option<StoredTransaction>> {
    conn.query_row(
        &format!("SELECT {SELECT_COLUMNS} FROM transactions WHERE LOWER(hash) = LOWER(?1)"),
        [hash],
        row_to_stored,
    )
    .optional()
}

/// Most recently stored rows, optionally only those sent to `to`
pub fn recent_transactions(
    conn: &Connection,
    to: Option<&str>,
    limit: u32,
) -> rusqlite::Result<Vec<StoredTransaction>> {
    let mut stmt = conn.prepare(&format!(
        "SELECT {SELECT_COLUMNS} FROM transactions
         WHERE (?1 IS NULL OR LOWER(to_address) = LOWER(?1))
         ORDER BY stored_at DESC, rowid DESC
         LIMIT ?2"
    ))?;

    let rows = stmt.query_map(params![to, limit as i64], row_to_stored)?;
    rows.collect()
}

pub fn count_transactions(conn: &Connection) -> rusqlite::Result<i64> {
    conn.query_row("SELECT COUNT(*) FROM transactions", [], |r| r.get(0))
}

/// Idempotent sink used by the storage consumer.
#[async_trait]
pub trait TransactionStore: Send + Sync {
    async fn insert_ignore(&self, record: &TransactionRecord) -> Result<InsertOutcome, PipelineError>;
}

/// SQLite-backed store sharing one connection with the query API.
#[derive(Clone)]
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteStore {
    pub fn new(conn: Arc<Mutex<Connection>>) -> Self {
        Self { conn }
    }
}

#[async_trait]
impl TransactionStore for SqliteStore {
    async fn insert_ignore(&self, record: &TransactionRecord) -> Result<InsertOutcome, PipelineError> {
        let conn = Arc::clone(&self.conn);
        let record = record.clone();
        task::spawn_blocking(move || {
            let db = conn
                .lock()
                .map_err(|_| PipelineError::Storage("connection mutex poisoned".into()))?;
            Ok(insert_transaction(&db, &record)?)
        })
        .await
        .map_err(|e| PipelineError::Storage(e.to_string()))?
    }
}
