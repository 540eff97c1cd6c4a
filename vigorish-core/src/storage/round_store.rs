use crate::error::{CoreError, Result};
use crate::storage::{InsertOutcome, Storage};
use crate::types::RoundStatus;
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoundRecord {
    pub id: String,
    pub game_id: String,
    pub chat_id: String,
    pub status: RoundStatus,
    pub escrow_address: String,
    pub encrypted_key: Vec<u8>,
    pub total_pot: u64,
    pub fee_tx: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WagerRecord {
    pub id: String,
    pub round_id: String,
    pub user_id: String,
    pub team_pick: String,
    pub payout_address: String,
    pub amount: u64,
    pub deposit_tx: Option<String>,
    pub paid_out: bool,
    pub payout_tx: Option<String>,
    pub created_at: DateTime<Utc>,
}

pub struct RoundStore<'a> {
    storage: &'a Storage,
}

const ROUND_COLUMNS: &str = "id, game_id, chat_id, status, escrow_address, encrypted_key, \
     total_pot, fee_tx, expires_at, created_at, settled_at";

const WAGER_COLUMNS: &str = "id, round_id, user_id, team_pick, payout_address, amount, \
     deposit_tx, paid_out, payout_tx, created_at";

fn map_round(row: &rusqlite::Row<'_>) -> rusqlite::Result<RoundRecord> {
    let status_str: String = row.get(3)?;
    let status = RoundStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(3, "status".to_string(), rusqlite::types::Type::Text)
    })?;

    let total_pot: i64 = row.get(6)?;
    let settled_at: Option<i64> = row.get(10)?;

    Ok(RoundRecord {
        id: row.get(0)?,
        game_id: row.get(1)?,
        chat_id: row.get(2)?,
        status,
        escrow_address: row.get(4)?,
        encrypted_key: row.get(5)?,
        total_pot: total_pot as u64,
        fee_tx: row.get(7)?,
        expires_at: DateTime::from_timestamp(row.get(8)?, 0).unwrap_or_else(Utc::now),
        created_at: DateTime::from_timestamp(row.get(9)?, 0).unwrap_or_else(Utc::now),
        settled_at: settled_at.and_then(|t| DateTime::from_timestamp(t, 0)),
    })
}

fn map_wager(row: &rusqlite::Row<'_>) -> rusqlite::Result<WagerRecord> {
    let amount: i64 = row.get(5)?;

    Ok(WagerRecord {
        id: row.get(0)?,
        round_id: row.get(1)?,
        user_id: row.get(2)?,
        team_pick: row.get(3)?,
        payout_address: row.get(4)?,
        amount: amount as u64,
        deposit_tx: row.get(6)?,
        paid_out: row.get(7)?,
        payout_tx: row.get(8)?,
        created_at: DateTime::from_timestamp(row.get(9)?, 0).unwrap_or_else(Utc::now),
    })
}

impl<'a> RoundStore<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    pub async fn create_round(&self, round: &RoundRecord) -> Result<()> {
        let conn = self.storage.get_connection().await;

        conn.execute(
            "INSERT INTO rounds
             (id, game_id, chat_id, status, escrow_address, encrypted_key,
              total_pot, fee_tx, expires_at, created_at, settled_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            params![
                round.id,
                round.game_id,
                round.chat_id,
                round.status.as_str(),
                round.escrow_address,
                round.encrypted_key,
                round.total_pot as i64,
                round.fee_tx,
                round.expires_at.timestamp(),
                round.created_at.timestamp(),
                round.settled_at.map(|t| t.timestamp()),
            ],
        )?;

        Ok(())
    }

    pub async fn round(&self, round_id: &str) -> Result<RoundRecord> {
        let conn = self.storage.get_connection().await;

        let round = conn
            .query_row(
                &format!("SELECT {} FROM rounds WHERE id = ?1", ROUND_COLUMNS),
                params![round_id],
                map_round,
            )
            .optional()?;

        round.ok_or_else(|| CoreError::RoundNotFound {
            id: round_id.to_string(),
        })
    }

    /// The OPEN round for a game in a chat, if one exists. At most one is
    /// kept OPEN per (game, chat) by the placement flow.
    pub async fn open_round_for(
        &self,
        game_id: &str,
        chat_id: &str,
    ) -> Result<Option<RoundRecord>> {
        let conn = self.storage.get_connection().await;

        let round = conn
            .query_row(
                &format!(
                    "SELECT {} FROM rounds
                     WHERE game_id = ?1 AND chat_id = ?2 AND status = 'OPEN'
                     ORDER BY created_at ASC LIMIT 1",
                    ROUND_COLUMNS
                ),
                params![game_id, chat_id],
                map_round,
            )
            .optional()?;

        Ok(round)
    }

    pub async fn round_by_escrow(&self, address: &str) -> Result<Option<RoundRecord>> {
        let conn = self.storage.get_connection().await;

        let round = conn
            .query_row(
                &format!(
                    "SELECT {} FROM rounds WHERE escrow_address = ?1",
                    ROUND_COLUMNS
                ),
                params![address],
                map_round,
            )
            .optional()?;

        Ok(round)
    }

    pub async fn rounds_with_status(&self, status: RoundStatus) -> Result<Vec<RoundRecord>> {
        let conn = self.storage.get_connection().await;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM rounds WHERE status = ?1 ORDER BY created_at ASC",
            ROUND_COLUMNS
        ))?;

        let round_iter = stmt.query_map(params![status.as_str()], map_round)?;

        let mut rounds = Vec::new();
        for round in round_iter {
            rounds.push(round?);
        }

        Ok(rounds)
    }

    pub async fn set_round_status(&self, round_id: &str, status: RoundStatus) -> Result<()> {
        let conn = self.storage.get_connection().await;

        conn.execute(
            "UPDATE rounds SET status = ?1 WHERE id = ?2",
            params![status.as_str(), round_id],
        )?;

        Ok(())
    }

    /// Terminal transition: set the final status and stamp settled_at.
    pub async fn close_round(&self, round_id: &str, status: RoundStatus) -> Result<()> {
        let conn = self.storage.get_connection().await;

        conn.execute(
            "UPDATE rounds SET status = ?1, settled_at = ?2 WHERE id = ?3",
            params![status.as_str(), Utc::now().timestamp(), round_id],
        )?;

        Ok(())
    }

    /// Insert a wager slot. `Conflict` means the user already has a wager
    /// in this round.
    pub async fn insert_wager(&self, wager: &WagerRecord) -> Result<InsertOutcome> {
        let conn = self.storage.get_connection().await;

        conn.execute(
            "INSERT OR IGNORE INTO wagers
             (id, round_id, user_id, team_pick, payout_address, amount,
              deposit_tx, paid_out, payout_tx, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            params![
                wager.id,
                wager.round_id,
                wager.user_id,
                wager.team_pick,
                wager.payout_address,
                wager.amount as i64,
                wager.deposit_tx,
                wager.paid_out,
                wager.payout_tx,
                wager.created_at.timestamp(),
            ],
        )?;

        if conn.changes() == 0 {
            return Ok(InsertOutcome::Conflict);
        }

        Ok(InsertOutcome::Inserted)
    }

    pub async fn wagers_for_round(&self, round_id: &str) -> Result<Vec<WagerRecord>> {
        let conn = self.storage.get_connection().await;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM wagers WHERE round_id = ?1 ORDER BY created_at ASC, id ASC",
            WAGER_COLUMNS
        ))?;

        let wager_iter = stmt.query_map(params![round_id], map_wager)?;

        let mut wagers = Vec::new();
        for wager in wager_iter {
            wagers.push(wager?);
        }

        Ok(wagers)
    }

    /// The next wager slot waiting for a deposit, oldest first.
    pub async fn oldest_pending_wager(&self, round_id: &str) -> Result<Option<WagerRecord>> {
        let conn = self.storage.get_connection().await;

        let wager = conn
            .query_row(
                &format!(
                    "SELECT {} FROM wagers
                     WHERE round_id = ?1 AND amount = 0 AND deposit_tx IS NULL
                     ORDER BY created_at ASC, id ASC LIMIT 1",
                    WAGER_COLUMNS
                ),
                params![round_id],
                map_wager,
            )
            .optional()?;

        Ok(wager)
    }

    /// Commit one observed deposit in a single transaction: record the
    /// signature, credit the wager slot (when one is attributed) and grow
    /// the round pot. `Conflict` means the signature was already recorded
    /// and nothing was written.
    pub async fn apply_deposit(
        &self,
        round_id: &str,
        wager_id: Option<&str>,
        signature: &str,
        amount: u64,
    ) -> Result<InsertOutcome> {
        let mut conn = self.storage.get_connection().await;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT OR IGNORE INTO processed_txs
             (signature, amount, round_id, house_bet_id, recorded_at)
             VALUES (?1, ?2, ?3, NULL, ?4)",
            params![signature, amount as i64, round_id, Utc::now().timestamp()],
        )?;

        if tx.changes() == 0 {
            // Dropping the transaction rolls back; the ignored insert wrote nothing
            return Ok(InsertOutcome::Conflict);
        }

        if let Some(wager_id) = wager_id {
            tx.execute(
                "UPDATE wagers SET amount = ?1, deposit_tx = ?2 WHERE id = ?3",
                params![amount as i64, signature, wager_id],
            )?;
        }

        tx.execute(
            "UPDATE rounds SET total_pot = total_pot + ?1 WHERE id = ?2",
            params![amount as i64, round_id],
        )?;

        tx.commit()?;
        Ok(InsertOutcome::Inserted)
    }

    /// Flag a wager as handled. `payout_tx` is None when the payout was
    /// skipped (too small to transfer) rather than sent.
    pub async fn mark_wager_paid(&self, wager_id: &str, payout_tx: Option<&str>) -> Result<()> {
        let conn = self.storage.get_connection().await;

        conn.execute(
            "UPDATE wagers SET paid_out = 1, payout_tx = ?1 WHERE id = ?2",
            params![payout_tx, wager_id],
        )?;

        Ok(())
    }

    /// Record the treasury fee transfer so a retried settlement pass does
    /// not charge it again.
    pub async fn record_fee(&self, round_id: &str, fee_tx: &str) -> Result<()> {
        let conn = self.storage.get_connection().await;

        conn.execute(
            "UPDATE rounds SET fee_tx = ?1 WHERE id = ?2",
            params![fee_tx, round_id],
        )?;

        Ok(())
    }
}
