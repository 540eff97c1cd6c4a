use crate::error::{CoreError, Result};
use crate::storage::{InsertOutcome, Storage};
use crate::types::{BetResult, BetStatus, BetType};
use chrono::{DateTime, Utc};
use rusqlite::{params, OptionalExtension};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HouseBetRecord {
    pub id: String,
    pub game_id: String,
    pub chat_id: String,
    pub user_id: String,
    pub bet_type: BetType,
    /// Picked team for MONEYLINE/SPREAD; unused for totals.
    pub pick: Option<String>,
    pub odds: i64,
    /// Point line for SPREAD and totals; unused for MONEYLINE.
    pub line: Option<f64>,
    pub amount: u64,
    pub potential_win: u64,
    pub status: BetStatus,
    pub result: Option<BetResult>,
    pub escrow_address: String,
    pub encrypted_key: Vec<u8>,
    pub payout_address: String,
    pub deposit_tx: Option<String>,
    pub payout_tx: Option<String>,
    pub created_at: DateTime<Utc>,
    pub settled_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TreasuryShortfall {
    pub id: String,
    pub house_bet_id: String,
    pub amount: u64,
    pub created_at: DateTime<Utc>,
    pub resolved: bool,
}

pub struct HouseStore<'a> {
    storage: &'a Storage,
}

const BET_COLUMNS: &str = "id, game_id, chat_id, user_id, bet_type, pick, odds, line, amount, \
     potential_win, status, result, escrow_address, encrypted_key, payout_address, \
     deposit_tx, payout_tx, created_at, settled_at";

fn map_bet(row: &rusqlite::Row<'_>) -> rusqlite::Result<HouseBetRecord> {
    let bet_type_str: String = row.get(4)?;
    let bet_type = BetType::parse(&bet_type_str).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(4, "bet_type".to_string(), rusqlite::types::Type::Text)
    })?;

    let status_str: String = row.get(10)?;
    let status = BetStatus::parse(&status_str).ok_or_else(|| {
        rusqlite::Error::InvalidColumnType(10, "status".to_string(), rusqlite::types::Type::Text)
    })?;

    let result_str: Option<String> = row.get(11)?;
    let result = match result_str {
        Some(s) => Some(BetResult::parse(&s).ok_or_else(|| {
            rusqlite::Error::InvalidColumnType(
                11,
                "result".to_string(),
                rusqlite::types::Type::Text,
            )
        })?),
        None => None,
    };

    let amount: i64 = row.get(8)?;
    let potential_win: i64 = row.get(9)?;
    let settled_at: Option<i64> = row.get(18)?;

    Ok(HouseBetRecord {
        id: row.get(0)?,
        game_id: row.get(1)?,
        chat_id: row.get(2)?,
        user_id: row.get(3)?,
        bet_type,
        pick: row.get(5)?,
        odds: row.get(6)?,
        line: row.get(7)?,
        amount: amount as u64,
        potential_win: potential_win as u64,
        status,
        result,
        escrow_address: row.get(12)?,
        encrypted_key: row.get(13)?,
        payout_address: row.get(14)?,
        deposit_tx: row.get(15)?,
        payout_tx: row.get(16)?,
        created_at: DateTime::from_timestamp(row.get(17)?, 0).unwrap_or_else(Utc::now),
        settled_at: settled_at.and_then(|t| DateTime::from_timestamp(t, 0)),
    })
}

impl<'a> HouseStore<'a> {
    pub fn new(storage: &'a Storage) -> Self {
        Self { storage }
    }

    pub async fn create_bet(&self, bet: &HouseBetRecord) -> Result<()> {
        let conn = self.storage.get_connection().await;

        conn.execute(
            "INSERT INTO house_bets
             (id, game_id, chat_id, user_id, bet_type, pick, odds, line, amount,
              potential_win, status, result, escrow_address, encrypted_key,
              payout_address, deposit_tx, payout_tx, created_at, settled_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14,
                     ?15, ?16, ?17, ?18, ?19)",
            params![
                bet.id,
                bet.game_id,
                bet.chat_id,
                bet.user_id,
                bet.bet_type.as_str(),
                bet.pick,
                bet.odds,
                bet.line,
                bet.amount as i64,
                bet.potential_win as i64,
                bet.status.as_str(),
                bet.result.map(|r| r.as_str()),
                bet.escrow_address,
                bet.encrypted_key,
                bet.payout_address,
                bet.deposit_tx,
                bet.payout_tx,
                bet.created_at.timestamp(),
                bet.settled_at.map(|t| t.timestamp()),
            ],
        )?;

        Ok(())
    }

    pub async fn bet(&self, bet_id: &str) -> Result<HouseBetRecord> {
        let conn = self.storage.get_connection().await;

        let bet = conn
            .query_row(
                &format!("SELECT {} FROM house_bets WHERE id = ?1", BET_COLUMNS),
                params![bet_id],
                map_bet,
            )
            .optional()?;

        bet.ok_or_else(|| CoreError::BetNotFound {
            id: bet_id.to_string(),
        })
    }

    pub async fn bets_with_status(&self, status: BetStatus) -> Result<Vec<HouseBetRecord>> {
        let conn = self.storage.get_connection().await;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM house_bets WHERE status = ?1 ORDER BY created_at ASC, id ASC",
            BET_COLUMNS
        ))?;

        let bet_iter = stmt.query_map(params![status.as_str()], map_bet)?;

        let mut bets = Vec::new();
        for bet in bet_iter {
            bets.push(bet?);
        }

        Ok(bets)
    }

    /// Flip PENDING to ACTIVE on the strength of one observed deposit,
    /// recording its signature in the same transaction. `Conflict` means
    /// the signature was already recorded and nothing was written.
    pub async fn activate_with_deposit(
        &self,
        bet_id: &str,
        signature: &str,
        amount: u64,
    ) -> Result<InsertOutcome> {
        let mut conn = self.storage.get_connection().await;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT OR IGNORE INTO processed_txs
             (signature, amount, round_id, house_bet_id, recorded_at)
             VALUES (?1, ?2, NULL, ?3, ?4)",
            params![signature, amount as i64, bet_id, Utc::now().timestamp()],
        )?;

        if tx.changes() == 0 {
            return Ok(InsertOutcome::Conflict);
        }

        tx.execute(
            "UPDATE house_bets SET status = 'ACTIVE', deposit_tx = ?1
             WHERE id = ?2 AND status = 'PENDING'",
            params![signature, bet_id],
        )?;

        tx.commit()?;
        Ok(InsertOutcome::Inserted)
    }

    pub async fn mark_settled(
        &self,
        bet_id: &str,
        result: BetResult,
        payout_tx: Option<&str>,
    ) -> Result<()> {
        let conn = self.storage.get_connection().await;

        conn.execute(
            "UPDATE house_bets SET status = 'SETTLED', result = ?1, payout_tx = ?2,
             settled_at = ?3 WHERE id = ?4",
            params![
                result.as_str(),
                payout_tx,
                Utc::now().timestamp(),
                bet_id
            ],
        )?;

        Ok(())
    }

    /// Cancel a bet that never received its deposit. Returns false if the
    /// bet had already left PENDING.
    pub async fn cancel_pending_bet(&self, bet_id: &str) -> Result<bool> {
        let conn = self.storage.get_connection().await;

        conn.execute(
            "UPDATE house_bets SET status = 'CANCELLED' WHERE id = ?1 AND status = 'PENDING'",
            params![bet_id],
        )?;

        Ok(conn.changes() > 0)
    }

    pub async fn record_shortfall(&self, shortfall: &TreasuryShortfall) -> Result<()> {
        let conn = self.storage.get_connection().await;

        conn.execute(
            "INSERT INTO treasury_shortfalls (id, house_bet_id, amount, created_at, resolved)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                shortfall.id,
                shortfall.house_bet_id,
                shortfall.amount as i64,
                shortfall.created_at.timestamp(),
                shortfall.resolved,
            ],
        )?;

        Ok(())
    }

    pub async fn unresolved_shortfalls(&self) -> Result<Vec<TreasuryShortfall>> {
        let conn = self.storage.get_connection().await;

        let mut stmt = conn.prepare(
            "SELECT id, house_bet_id, amount, created_at, resolved
             FROM treasury_shortfalls WHERE resolved = 0 ORDER BY created_at ASC",
        )?;

        let shortfall_iter = stmt.query_map([], |row| {
            let amount: i64 = row.get(2)?;
            Ok(TreasuryShortfall {
                id: row.get(0)?,
                house_bet_id: row.get(1)?,
                amount: amount as u64,
                created_at: DateTime::from_timestamp(row.get(3)?, 0).unwrap_or_else(Utc::now),
                resolved: row.get(4)?,
            })
        })?;

        let mut shortfalls = Vec::new();
        for shortfall in shortfall_iter {
            shortfalls.push(shortfall?);
        }

        Ok(shortfalls)
    }

    pub async fn resolve_shortfall(&self, shortfall_id: &str) -> Result<()> {
        let conn = self.storage.get_connection().await;

        conn.execute(
            "UPDATE treasury_shortfalls SET resolved = 1 WHERE id = ?1",
            params![shortfall_id],
        )?;

        Ok(())
    }
}
