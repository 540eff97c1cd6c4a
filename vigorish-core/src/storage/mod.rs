pub mod house_store;
pub mod lock_store;
pub mod round_store;
pub mod tx_ledger;

pub use house_store::HouseStore;
pub use lock_store::{LockOutcome, LockStore};
pub use round_store::RoundStore;
pub use tx_ledger::{InsertOutcome, TxLedger};

use crate::error::{CoreError, Result};
use rusqlite::Connection;
use std::path::Path;
use tokio::sync::Mutex;

pub struct Storage {
    conn: Mutex<Connection>,
}

impl Storage {
    pub async fn new(db_path: &Path) -> Result<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CoreError::internal(format!("Failed to create directory: {}", e)))?;
        }

        let conn = Connection::open(db_path)?;
        let storage = Self {
            conn: Mutex::new(conn),
        };

        storage.init_schema().await?;
        Ok(storage)
    }

    async fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().await;

        // Advisory leases table
        conn.execute(
            "CREATE TABLE IF NOT EXISTS locks (
                resource TEXT PRIMARY KEY,
                holder TEXT NOT NULL,
                expires_at INTEGER NOT NULL
            )",
            [],
        )?;

        // Idempotency ledger, append-only
        conn.execute(
            "CREATE TABLE IF NOT EXISTS processed_txs (
                signature TEXT PRIMARY KEY,
                amount INTEGER NOT NULL,
                round_id TEXT,
                house_bet_id TEXT,
                recorded_at INTEGER NOT NULL
            )",
            [],
        )?;

        // Rounds table
        conn.execute(
            "CREATE TABLE IF NOT EXISTS rounds (
                id TEXT PRIMARY KEY,
                game_id TEXT NOT NULL,
                chat_id TEXT NOT NULL,
                status TEXT NOT NULL,
                escrow_address TEXT UNIQUE NOT NULL,
                encrypted_key BLOB NOT NULL,
                total_pot INTEGER NOT NULL DEFAULT 0,
                fee_tx TEXT,
                expires_at INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                settled_at INTEGER
            )",
            [],
        )?;

        // Wagers table
        conn.execute(
            "CREATE TABLE IF NOT EXISTS wagers (
                id TEXT PRIMARY KEY,
                round_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                team_pick TEXT NOT NULL,
                payout_address TEXT NOT NULL,
                amount INTEGER NOT NULL DEFAULT 0,
                deposit_tx TEXT,
                paid_out INTEGER NOT NULL DEFAULT 0,
                payout_tx TEXT,
                created_at INTEGER NOT NULL,
                FOREIGN KEY (round_id) REFERENCES rounds(id),
                UNIQUE (round_id, user_id)
            )",
            [],
        )?;

        // House bets table
        conn.execute(
            "CREATE TABLE IF NOT EXISTS house_bets (
                id TEXT PRIMARY KEY,
                game_id TEXT NOT NULL,
                chat_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                bet_type TEXT NOT NULL,
                pick TEXT,
                odds INTEGER NOT NULL,
                line REAL,
                amount INTEGER NOT NULL,
                potential_win INTEGER NOT NULL,
                status TEXT NOT NULL,
                result TEXT,
                escrow_address TEXT UNIQUE NOT NULL,
                encrypted_key BLOB NOT NULL,
                payout_address TEXT NOT NULL,
                deposit_tx TEXT,
                payout_tx TEXT,
                created_at INTEGER NOT NULL,
                settled_at INTEGER
            )",
            [],
        )?;

        // Unpaid obligations from pooled settlement
        conn.execute(
            "CREATE TABLE IF NOT EXISTS treasury_shortfalls (
                id TEXT PRIMARY KEY,
                house_bet_id TEXT NOT NULL,
                amount INTEGER NOT NULL,
                created_at INTEGER NOT NULL,
                resolved INTEGER NOT NULL DEFAULT 0,
                FOREIGN KEY (house_bet_id) REFERENCES house_bets(id)
            )",
            [],
        )?;

        Ok(())
    }

    pub async fn get_connection(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}
