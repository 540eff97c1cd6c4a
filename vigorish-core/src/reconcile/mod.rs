use crate::chain::ChainClient;
use crate::config::CoreConfig;
use crate::error::Result;
use crate::storage::{HouseStore, LockOutcome, LockStore, RoundStore, Storage, TxLedger};
use crate::types::{BetStatus, RoundStatus};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;

/// Attributes observed escrow deposits to wager slots and pending house
/// bets, exactly once per chain signature. Two triggers feed it: balance
/// subscriptions on OPEN rounds' escrows, and the periodic poll, both
/// funnelling into the same locked per-escrow routine.
pub struct DepositPipeline {
    storage: Arc<Storage>,
    chain: Arc<dyn ChainClient>,
    config: CoreConfig,
    subscriptions: Mutex<HashMap<String, u64>>,
    events_tx: Mutex<Option<mpsc::UnboundedSender<crate::types::BalanceChange>>>,
    drain_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

impl DepositPipeline {
    pub fn new(storage: Arc<Storage>, chain: Arc<dyn ChainClient>, config: CoreConfig) -> Self {
        Self {
            storage,
            chain,
            config,
            subscriptions: Mutex::new(HashMap::new()),
            events_tx: Mutex::new(None),
            drain_task: Mutex::new(None),
        }
    }

    /// Subscribe every OPEN round's escrow and start draining notifications.
    pub async fn start(self: &Arc<Self>) -> Result<()> {
        let (tx, mut rx) = mpsc::unbounded_channel();
        *self.events_tx.lock() = Some(tx);

        self.sync_subscriptions().await?;

        let pipeline = Arc::clone(self);
        let handle = tokio::spawn(async move {
            while let Some(change) = rx.recv().await {
                tracing::debug!(
                    "Balance change on {} (now {})",
                    change.address,
                    change.balance
                );
                if let Err(e) = pipeline.process_notification(&change.address).await {
                    tracing::warn!(
                        "Failed to process deposit notification for {}: {}",
                        change.address,
                        e
                    );
                }
            }
        });
        *self.drain_task.lock() = Some(handle);

        tracing::info!("Deposit pipeline started");
        Ok(())
    }

    /// Unsubscribe everything and stop the notification drain.
    pub async fn shutdown(&self) -> Result<()> {
        if let Some(handle) = self.drain_task.lock().take() {
            handle.abort();
        }
        *self.events_tx.lock() = None;

        let ids: Vec<u64> = self.subscriptions.lock().drain().map(|(_, id)| id).collect();
        for id in ids {
            self.chain.unsubscribe(id).await?;
        }

        tracing::info!("Deposit pipeline stopped");
        Ok(())
    }

    /// Bring the subscription registry in line with the current set of OPEN
    /// rounds: subscribe new escrows, drop escrows whose round moved on.
    pub async fn sync_subscriptions(&self) -> Result<()> {
        let events_tx = match self.events_tx.lock().clone() {
            Some(tx) => tx,
            None => return Ok(()),
        };

        let rounds = RoundStore::new(&self.storage);
        let open_addresses: HashSet<String> = rounds
            .rounds_with_status(RoundStatus::Open)
            .await?
            .into_iter()
            .map(|round| round.escrow_address)
            .collect();

        let current: Vec<(String, u64)> = self
            .subscriptions
            .lock()
            .iter()
            .map(|(address, id)| (address.clone(), *id))
            .collect();

        for (address, id) in current {
            if !open_addresses.contains(&address) {
                self.chain.unsubscribe(id).await?;
                self.subscriptions.lock().remove(&address);
            }
        }

        for address in open_addresses {
            let subscribed = self.subscriptions.lock().contains_key(&address);
            if !subscribed {
                let id = self.chain.subscribe(&address, events_tx.clone()).await?;
                self.subscriptions.lock().insert(address, id);
            }
        }

        Ok(())
    }

    /// Event-path entry: a balance change was reported for an escrow
    /// address. Returns how many deposits were credited.
    pub async fn process_notification(&self, address: &str) -> Result<usize> {
        let rounds = RoundStore::new(&self.storage);

        match rounds.round_by_escrow(address).await? {
            Some(round) => self.process_round_deposits(&round.id).await,
            None => {
                tracing::debug!("Balance change for unknown escrow {}", address);
                Ok(0)
            }
        }
    }

    /// Poll-path entry: scan every OPEN round and PENDING bet for
    /// signatures the ledger has not seen. One failing entity never stops
    /// the scan of its siblings.
    pub async fn poll_deposits(&self) -> Result<usize> {
        let rounds = RoundStore::new(&self.storage);
        let house = HouseStore::new(&self.storage);
        let mut credited = 0;

        for round in rounds.rounds_with_status(RoundStatus::Open).await? {
            match self.process_round_deposits(&round.id).await {
                Ok(count) => credited += count,
                Err(e) => tracing::warn!("Deposit scan failed for round {}: {}", round.id, e),
            }
        }

        for bet in house.bets_with_status(BetStatus::Pending).await? {
            match self.process_bet_deposits(&bet.id).await {
                Ok(count) => credited += count,
                Err(e) => tracing::warn!("Deposit scan failed for bet {}: {}", bet.id, e),
            }
        }

        Ok(credited)
    }

    /// Credit unseen deposits on one round's escrow. Runs under the escrow
    /// lock; skips silently when another worker holds it.
    pub async fn process_round_deposits(&self, round_id: &str) -> Result<usize> {
        let rounds = RoundStore::new(&self.storage);
        let locks = LockStore::new(&self.storage);
        let ledger = TxLedger::new(&self.storage);

        let escrow_address = rounds.round(round_id).await?.escrow_address;
        let resource = format!("escrow:{}", escrow_address);

        let outcome = locks
            .run_exclusive(&resource, self.config.lock_ttl_secs, || async {
                // Status must be fresh relative to the lock
                let round = rounds.round(round_id).await?;
                if round.status != RoundStatus::Open {
                    tracing::debug!(
                        "Round {} is {}, ignoring deposits",
                        round_id,
                        round.status.as_str()
                    );
                    return Ok(0);
                }

                let transfers = self
                    .chain
                    .recent_incoming(&round.escrow_address, self.config.deposit_poll_limit)
                    .await?;

                let mut credited = 0;
                for transfer in transfers {
                    if ledger.contains(&transfer.signature).await? {
                        continue;
                    }

                    // The pot may have grown within this pass
                    let round = rounds.round(round_id).await?;
                    let balance = self.chain.balance(&round.escrow_address).await?;
                    let unaccounted = balance
                        .saturating_sub(self.config.rent_reserve)
                        .saturating_sub(round.total_pot);

                    if unaccounted < self.config.min_wager {
                        tracing::warn!(
                            "Deposit {} on round {} leaves {} unaccounted, below minimum {}",
                            transfer.signature,
                            round_id,
                            unaccounted,
                            self.config.min_wager
                        );
                        ledger
                            .record(&transfer.signature, 0, Some(round_id), None)
                            .await?;
                        continue;
                    }

                    let amount = unaccounted.min(self.config.max_wager);
                    if amount < unaccounted {
                        tracing::warn!(
                            "Deposit {} on round {} capped at {} ({} stays in escrow)",
                            transfer.signature,
                            round_id,
                            amount,
                            unaccounted - amount
                        );
                    }

                    let slot = rounds.oldest_pending_wager(round_id).await?;
                    let wager_id = slot.as_ref().map(|wager| wager.id.as_str());
                    if wager_id.is_none() {
                        tracing::warn!(
                            "Unattributed deposit {} of {} on round {}, added to pot",
                            transfer.signature,
                            amount,
                            round_id
                        );
                    }

                    if rounds
                        .apply_deposit(round_id, wager_id, &transfer.signature, amount)
                        .await?
                        .inserted()
                    {
                        if let Some(wager) = slot {
                            tracing::info!(
                                "Credited {} to wager {} on round {} (tx {})",
                                amount,
                                wager.id,
                                round_id,
                                transfer.signature
                            );
                        }
                        credited += 1;
                    }
                }

                Ok(credited)
            })
            .await?;

        match outcome {
            LockOutcome::Completed(credited) => Ok(credited),
            LockOutcome::Skipped => Ok(0),
        }
    }

    /// Activate one PENDING house bet once its escrow holds the full stake.
    pub async fn process_bet_deposits(&self, bet_id: &str) -> Result<usize> {
        let house = HouseStore::new(&self.storage);
        let locks = LockStore::new(&self.storage);
        let ledger = TxLedger::new(&self.storage);

        let escrow_address = house.bet(bet_id).await?.escrow_address;
        let resource = format!("escrow:{}", escrow_address);

        let outcome = locks
            .run_exclusive(&resource, self.config.lock_ttl_secs, || async {
                let bet = house.bet(bet_id).await?;
                if bet.status != BetStatus::Pending {
                    tracing::debug!(
                        "Bet {} is {}, ignoring deposits",
                        bet_id,
                        bet.status.as_str()
                    );
                    return Ok(0);
                }

                let transfers = self
                    .chain
                    .recent_incoming(&bet.escrow_address, self.config.deposit_poll_limit)
                    .await?;

                for transfer in transfers {
                    if ledger.contains(&transfer.signature).await? {
                        continue;
                    }

                    let balance = self.chain.balance(&bet.escrow_address).await?;
                    let spendable = balance.saturating_sub(self.config.rent_reserve);
                    if spendable < bet.amount {
                        tracing::debug!(
                            "Bet {} still short after deposit {} ({} of {})",
                            bet_id,
                            transfer.signature,
                            spendable,
                            bet.amount
                        );
                        continue;
                    }

                    if house
                        .activate_with_deposit(bet_id, &transfer.signature, transfer.amount)
                        .await?
                        .inserted()
                    {
                        tracing::info!(
                            "Bet {} activated by deposit {} (stake {})",
                            bet_id,
                            transfer.signature,
                            bet.amount
                        );
                        return Ok(1);
                    }
                    return Ok(0);
                }

                Ok(0)
            })
            .await?;

        match outcome {
            LockOutcome::Completed(credited) => Ok(credited),
            LockOutcome::Skipped => Ok(0),
        }
    }
}
