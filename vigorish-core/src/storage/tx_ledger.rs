use crate::error::Result;
use crate::storage::Storage;
use chrono::{DateTime, Utc};
use rusqlite::params;
use serde::{Deserialize, Serialize};

/// Result of a conditional insert against a uniqueness constraint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    Inserted,
    Conflict,
}

impl InsertOutcome {
    pub fn inserted(self) -> bool {
        matches!(self, InsertOutcome::Inserted)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedTx {
    pub signature: String,
    pub amount: u64,
    pub round_id: Option<String>,
    pub house_bet_id: Option<String>,
    pub recorded_at: DateTime<Utc>,
}

/// Append-only ledger of chain transaction signatures the system has
/// already acted on. Rows are never updated or deleted.
pub struct TxLedger<'a> {
    storage: &'a Storage,
}

impl<'a> TxLedger<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    /// Record a signature if it has never been seen. `Conflict` means some
    /// other caller already recorded it and this one must not act on it.
    pub async fn record(
        &self,
        signature: &str,
        amount: u64,
        round_id: Option<&str>,
        house_bet_id: Option<&str>,
    ) -> Result<InsertOutcome> {
        let conn = self.storage.get_connection().await;

        conn.execute(
            "INSERT OR IGNORE INTO processed_txs
             (signature, amount, round_id, house_bet_id, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                signature,
                amount as i64,
                round_id,
                house_bet_id,
                Utc::now().timestamp(),
            ],
        )?;

        if conn.changes() == 0 {
            return Ok(InsertOutcome::Conflict);
        }

        Ok(InsertOutcome::Inserted)
    }

    pub async fn contains(&self, signature: &str) -> Result<bool> {
        let conn = self.storage.get_connection().await;

        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM processed_txs WHERE signature = ?1",
            params![signature],
            |row| row.get(0),
        )?;

        Ok(count > 0)
    }

    pub async fn recent(&self, limit: usize) -> Result<Vec<ProcessedTx>> {
        let conn = self.storage.get_connection().await;

        let mut stmt = conn.prepare(
            "SELECT signature, amount, round_id, house_bet_id, recorded_at
             FROM processed_txs ORDER BY recorded_at DESC LIMIT ?1",
        )?;

        let tx_iter = stmt.query_map(params![limit as i64], |row| {
            let amount: i64 = row.get(1)?;
            Ok(ProcessedTx {
                signature: row.get(0)?,
                amount: amount as u64,
                round_id: row.get(2)?,
                house_bet_id: row.get(3)?,
                recorded_at: DateTime::from_timestamp(row.get(4)?, 0).unwrap_or_else(Utc::now),
            })
        })?;

        let mut txs = Vec::new();
        for tx in tx_iter {
            txs.push(tx?);
        }

        Ok(txs)
    }
}
