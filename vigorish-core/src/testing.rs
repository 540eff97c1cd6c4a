//! In-memory fakes for the chain, game-provider and notifier capabilities.
//! Engine tests script balances, results and failures through these.

use crate::chain::ChainClient;
use crate::config::CoreConfig;
use crate::error::{CoreError, Result};
use crate::games::GameProvider;
use crate::notify::Notifier;
use crate::types::{BalanceChange, GameRecord, GameStatus, IncomingTransfer};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ed25519_dalek::SigningKey;
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use tokio::sync::mpsc;

#[derive(Debug, Clone)]
pub struct SentTransfer {
    pub from: String,
    pub to: String,
    pub amount: u64,
    pub signature: String,
}

#[derive(Default)]
struct ChainState {
    balances: HashMap<String, u64>,
    incoming: HashMap<String, Vec<IncomingTransfer>>,
    sent: Vec<SentTransfer>,
    failing_destinations: HashSet<String>,
    subscriptions: HashMap<u64, (String, mpsc::UnboundedSender<BalanceChange>)>,
    next_signature: u64,
    next_subscription: u64,
}

fn push_change(state: &ChainState, address: &str) {
    let balance = state.balances.get(address).copied().unwrap_or(0);
    for (subscribed, sender) in state.subscriptions.values() {
        if subscribed == address {
            let _ = sender.send(BalanceChange {
                address: address.to_string(),
                balance,
            });
        }
    }
}

#[derive(Default)]
pub struct FakeChain {
    state: Mutex<ChainState>,
}

impl FakeChain {
    pub fn new() -> Self {
        Self::default()
    }

    /// Simulate an external deposit landing on `address`.
    pub fn credit(&self, address: &str, amount: u64, signature: &str) {
        let mut state = self.state.lock();
        *state.balances.entry(address.to_string()).or_insert(0) += amount;
        state
            .incoming
            .entry(address.to_string())
            .or_default()
            .push(IncomingTransfer {
                signature: signature.to_string(),
                amount,
            });
        push_change(&state, address);
    }

    pub fn set_balance(&self, address: &str, amount: u64) {
        let mut state = self.state.lock();
        state.balances.insert(address.to_string(), amount);
        push_change(&state, address);
    }

    pub fn balance_of(&self, address: &str) -> u64 {
        self.state.lock().balances.get(address).copied().unwrap_or(0)
    }

    /// Every later send to `address` fails with a chain error.
    pub fn fail_sends_to(&self, address: &str) {
        self.state
            .lock()
            .failing_destinations
            .insert(address.to_string());
    }

    /// Undo `fail_sends_to`, letting retries through.
    pub fn restore_sends_to(&self, address: &str) {
        self.state.lock().failing_destinations.remove(address);
    }

    pub fn sent(&self) -> Vec<SentTransfer> {
        self.state.lock().sent.clone()
    }

    pub fn total_sent_to(&self, address: &str) -> u64 {
        self.state
            .lock()
            .sent
            .iter()
            .filter(|transfer| transfer.to == address)
            .map(|transfer| transfer.amount)
            .sum()
    }

    pub fn subscribed_addresses(&self) -> Vec<String> {
        self.state
            .lock()
            .subscriptions
            .values()
            .map(|(address, _)| address.clone())
            .collect()
    }
}

#[async_trait]
impl ChainClient for FakeChain {
    async fn balance(&self, address: &str) -> Result<u64> {
        Ok(self.balance_of(address))
    }

    async fn send(&self, from: &SigningKey, to: &str, amount: u64) -> Result<String> {
        let from_address = hex::encode(from.verifying_key().to_bytes());
        let mut state = self.state.lock();

        if state.failing_destinations.contains(to) {
            return Err(CoreError::chain(format!("injected send failure to {}", to)));
        }

        let available = state.balances.get(&from_address).copied().unwrap_or(0);
        if available < amount {
            return Err(CoreError::InsufficientFunds {
                need: amount,
                available,
            });
        }

        state.next_signature += 1;
        let signature = format!("sent-{}", state.next_signature);

        state.balances.insert(from_address.clone(), available - amount);
        *state.balances.entry(to.to_string()).or_insert(0) += amount;
        state
            .incoming
            .entry(to.to_string())
            .or_default()
            .push(IncomingTransfer {
                signature: signature.clone(),
                amount,
            });
        state.sent.push(SentTransfer {
            from: from_address.clone(),
            to: to.to_string(),
            amount,
            signature: signature.clone(),
        });

        push_change(&state, &from_address);
        push_change(&state, to);

        Ok(signature)
    }

    async fn recent_incoming(
        &self,
        address: &str,
        limit: usize,
    ) -> Result<Vec<IncomingTransfer>> {
        let state = self.state.lock();
        let mut transfers: Vec<_> = state
            .incoming
            .get(address)
            .map(|list| list.clone())
            .unwrap_or_default();
        transfers.reverse();
        transfers.truncate(limit);
        Ok(transfers)
    }

    async fn subscribe(
        &self,
        address: &str,
        events: mpsc::UnboundedSender<BalanceChange>,
    ) -> Result<u64> {
        let mut state = self.state.lock();
        state.next_subscription += 1;
        let id = state.next_subscription;
        state
            .subscriptions
            .insert(id, (address.to_string(), events));
        Ok(id)
    }

    async fn unsubscribe(&self, subscription_id: u64) -> Result<()> {
        self.state.lock().subscriptions.remove(&subscription_id);
        Ok(())
    }
}

#[derive(Default)]
pub struct FakeGames {
    games: Mutex<HashMap<String, GameRecord>>,
}

impl FakeGames {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, game: GameRecord) {
        self.games.lock().insert(game.id.clone(), game);
    }
}

#[async_trait]
impl GameProvider for FakeGames {
    async fn game(&self, game_id: &str) -> Result<GameRecord> {
        self.games
            .lock()
            .get(game_id)
            .cloned()
            .ok_or_else(|| CoreError::GameNotFound {
                id: game_id.to_string(),
            })
    }
}

#[derive(Default)]
pub struct FakeNotifier {
    messages: Mutex<Vec<(String, String)>>,
    failing: Mutex<bool>,
}

impl FakeNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn messages(&self) -> Vec<(String, String)> {
        self.messages.lock().clone()
    }

    pub fn fail_all(&self) {
        *self.failing.lock() = true;
    }
}

#[async_trait]
impl Notifier for FakeNotifier {
    async fn notify(&self, chat_id: &str, text: &str) -> Result<()> {
        if *self.failing.lock() {
            return Err(CoreError::notify("injected notify failure"));
        }
        self.messages
            .lock()
            .push((chat_id.to_string(), text.to_string()));
        Ok(())
    }
}

pub fn scheduled_game(id: &str, home: &str, away: &str, start_time: DateTime<Utc>) -> GameRecord {
    GameRecord {
        id: id.to_string(),
        status: GameStatus::Scheduled,
        start_time,
        home_team: home.to_string(),
        away_team: away.to_string(),
        home_score: None,
        away_score: None,
        winner: None,
    }
}

pub fn final_game(
    id: &str,
    home: &str,
    away: &str,
    home_score: i64,
    away_score: i64,
) -> GameRecord {
    let winner = match home_score.cmp(&away_score) {
        std::cmp::Ordering::Greater => Some(home.to_string()),
        std::cmp::Ordering::Less => Some(away.to_string()),
        std::cmp::Ordering::Equal => None,
    };

    GameRecord {
        id: id.to_string(),
        status: GameStatus::Final,
        start_time: Utc::now() - chrono::Duration::hours(3),
        home_team: home.to_string(),
        away_team: away.to_string(),
        home_score: Some(home_score),
        away_score: Some(away_score),
        winner,
    }
}

pub fn cancelled_game(id: &str, home: &str, away: &str) -> GameRecord {
    GameRecord {
        id: id.to_string(),
        status: GameStatus::Cancelled,
        start_time: Utc::now() - chrono::Duration::hours(1),
        home_team: home.to_string(),
        away_team: away.to_string(),
        home_score: None,
        away_score: None,
        winner: None,
    }
}

/// Config with rent, reserves and thresholds zeroed so test arithmetic is
/// exact.
pub fn test_config() -> CoreConfig {
    CoreConfig {
        treasury_address: "treasury".to_string(),
        key_passphrase: "test-passphrase".to_string(),
        min_wager: 10,
        max_wager: 1_000_000,
        fee_bps: 100,
        min_transfer: 1,
        tx_fee_reserve: 0,
        rent_reserve: 0,
        lock_ttl_secs: 60,
        deposit_poll_limit: 20,
        pending_bet_ttl_secs: 1_800,
        event_poll_secs: 1,
        ..CoreConfig::default()
    }
}
