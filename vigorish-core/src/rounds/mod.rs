use crate::config::CoreConfig;
use crate::error::{CoreError, Result};
use crate::escrow::EscrowService;
use crate::games::GameProvider;
use crate::notify::Notifier;
use crate::storage::round_store::{RoundRecord, WagerRecord};
use crate::storage::{LockStore, RoundStore, Storage};
use crate::types::{GameStatus, RoundStatus};
use chrono::Utc;
use std::sync::Arc;
use uuid::Uuid;

/// Outcome of a wager placement. `already_placed` means the user had a
/// pick in this round before the call and nothing changed.
#[derive(Debug, Clone)]
pub struct PlacedWager {
    pub round_id: String,
    pub wager_id: String,
    pub escrow_address: String,
    pub new_round: bool,
    pub already_placed: bool,
}

/// Pooled peer-vs-peer rounds: one escrow per (game, chat), wagers on
/// either team, winners split the pot in proportion to their stake.
pub struct RoundEngine {
    storage: Arc<Storage>,
    escrow: Arc<EscrowService>,
    games: Arc<dyn GameProvider>,
    notifier: Arc<dyn Notifier>,
    config: CoreConfig,
}

impl RoundEngine {
    pub fn new(
        storage: Arc<Storage>,
        escrow: Arc<EscrowService>,
        games: Arc<dyn GameProvider>,
        notifier: Arc<dyn Notifier>,
        config: CoreConfig,
    ) -> Self {
        Self {
            storage,
            escrow,
            games,
            notifier,
            config,
        }
    }

    /// Register a user's pick, creating the round and its escrow wallet on
    /// the first pick for a (game, chat). The wager starts at amount zero
    /// and is funded later by the deposit pipeline.
    pub async fn place_wager(
        &self,
        game_id: &str,
        chat_id: &str,
        user_id: &str,
        team_pick: &str,
        payout_address: &str,
    ) -> Result<PlacedWager> {
        let game = self.games.game(game_id).await?;

        if game.status != GameStatus::Scheduled || game.start_time <= Utc::now() {
            return Err(CoreError::invalid_state(format!(
                "Game {} is no longer open for wagers",
                game_id
            )));
        }
        if team_pick != game.home_team && team_pick != game.away_team {
            return Err(CoreError::invalid_state(format!(
                "Pick must be {} or {}",
                game.home_team, game.away_team
            )));
        }

        let rounds = RoundStore::new(&self.storage);

        let (round, new_round) = match rounds.open_round_for(game_id, chat_id).await? {
            Some(round) => (round, false),
            None => {
                let wallet = self.escrow.generate()?;
                let round = RoundRecord {
                    id: Uuid::new_v4().to_string(),
                    game_id: game_id.to_string(),
                    chat_id: chat_id.to_string(),
                    status: RoundStatus::Open,
                    escrow_address: wallet.address,
                    encrypted_key: wallet.encrypted_key,
                    total_pot: 0,
                    fee_tx: None,
                    expires_at: game.start_time,
                    created_at: Utc::now(),
                    settled_at: None,
                };
                rounds.create_round(&round).await?;
                tracing::info!(
                    "Opened round {} for game {} in chat {} (escrow {})",
                    round.id,
                    game_id,
                    chat_id,
                    round.escrow_address
                );
                (round, true)
            }
        };

        let wager = WagerRecord {
            id: Uuid::new_v4().to_string(),
            round_id: round.id.clone(),
            user_id: user_id.to_string(),
            team_pick: team_pick.to_string(),
            payout_address: payout_address.to_string(),
            amount: 0,
            deposit_tx: None,
            paid_out: false,
            payout_tx: None,
            created_at: Utc::now(),
        };

        if rounds.insert_wager(&wager).await?.inserted() {
            return Ok(PlacedWager {
                round_id: round.id,
                wager_id: wager.id,
                escrow_address: round.escrow_address,
                new_round,
                already_placed: false,
            });
        }

        // Unique (round, user) constraint fired: hand back the existing slot
        let existing = rounds
            .wagers_for_round(&round.id)
            .await?
            .into_iter()
            .find(|w| w.user_id == user_id)
            .ok_or_else(|| CoreError::internal("Wager conflict without an existing slot"))?;

        Ok(PlacedWager {
            round_id: round.id,
            wager_id: existing.id,
            escrow_address: round.escrow_address,
            new_round,
            already_placed: true,
        })
    }

    /// Move funded OPEN rounds whose game is under way to LOCKED so no
    /// further deposits are credited.
    pub async fn lock_started_rounds(&self) -> Result<usize> {
        let rounds = RoundStore::new(&self.storage);
        let now = Utc::now();
        let mut locked = 0;

        for round in rounds.rounds_with_status(RoundStatus::Open).await? {
            if round.expires_at > now || round.total_pot == 0 {
                continue;
            }
            rounds
                .set_round_status(&round.id, RoundStatus::Locked)
                .await?;
            tracing::info!(
                "Round {} locked for settlement (pot {})",
                round.id,
                round.total_pot
            );
            locked += 1;
        }

        Ok(locked)
    }

    /// Cancel OPEN rounds that reached game start without a single funded
    /// wager. Nothing to refund, nothing to settle.
    pub async fn expire_unfunded_rounds(&self) -> Result<usize> {
        let rounds = RoundStore::new(&self.storage);
        let now = Utc::now();
        let mut expired = 0;

        for round in rounds.rounds_with_status(RoundStatus::Open).await? {
            if round.expires_at > now || round.total_pot > 0 {
                continue;
            }
            rounds.close_round(&round.id, RoundStatus::Cancelled).await?;
            tracing::info!("Round {} expired with no deposits", round.id);
            expired += 1;
        }

        Ok(expired)
    }

    /// Settle or refund every round whose game has concluded. Returns the
    /// number of rounds that reached a terminal status this pass. One
    /// round's failure never stops its siblings.
    pub async fn settle_due_rounds(&self) -> Result<usize> {
        let rounds = RoundStore::new(&self.storage);
        let mut closed = 0;

        for round in rounds.rounds_with_status(RoundStatus::Locked).await? {
            let game = match self.games.game(&round.game_id).await {
                Ok(game) => game,
                Err(e) => {
                    tracing::warn!("Could not load game for round {}: {}", round.id, e);
                    continue;
                }
            };

            let outcome = match (game.status, game.winner.as_deref()) {
                (GameStatus::Final, Some(winner)) => self.settle_round(&round.id, winner).await,
                (GameStatus::Final, None) => self.refund_round(&round.id).await,
                (GameStatus::Cancelled, _) => self.refund_round(&round.id).await,
                _ => continue,
            };

            match outcome {
                Ok(true) => closed += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!("Settlement of round {} failed: {}", round.id, e),
            }
        }

        // A game can be called off while its round is still collecting
        // deposits; those rounds refund without ever locking.
        for round in rounds.rounds_with_status(RoundStatus::Open).await? {
            let game = match self.games.game(&round.game_id).await {
                Ok(game) => game,
                Err(e) => {
                    tracing::warn!("Could not load game for round {}: {}", round.id, e);
                    continue;
                }
            };

            let called_off = game.status == GameStatus::Cancelled
                || (game.status == GameStatus::Final && game.winner.is_none());
            if !called_off {
                continue;
            }

            match self.refund_round(&round.id).await {
                Ok(true) => closed += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!("Refund of round {} failed: {}", round.id, e),
            }
        }

        Ok(closed)
    }

    /// Pay the winning side its proportional share of the live escrow
    /// balance, house fee off the top. Returns true once the round is
    /// SETTLED; false leaves it LOCKED for the next pass.
    async fn settle_round(&self, round_id: &str, winner: &str) -> Result<bool> {
        let locks = LockStore::new(&self.storage);
        let resource = format!("round:{}", round_id);

        let outcome = locks
            .run_exclusive(&resource, self.config.lock_ttl_secs, || async {
                let rounds = RoundStore::new(&self.storage);
                let round = rounds.round(round_id).await?;
                if round.status != RoundStatus::Locked {
                    tracing::debug!(
                        "Round {} is {}, nothing to settle",
                        round_id,
                        round.status.as_str()
                    );
                    return Ok(false);
                }

                let spendable = self.escrow.spendable(&round.escrow_address).await?;
                if spendable == 0 {
                    rounds.close_round(round_id, RoundStatus::Settled).await?;
                    tracing::info!("Round {} settled with an empty escrow", round_id);
                    return Ok(true);
                }

                // House fee comes off the top, once. A recorded fee_tx from
                // an earlier partial pass means it was already taken.
                let fee = if round.fee_tx.is_some() {
                    0
                } else {
                    ((spendable as u128 * self.config.fee_bps as u128) / 10_000) as u64
                };
                if fee >= self.config.min_transfer {
                    match self
                        .escrow
                        .send(&round.encrypted_key, &self.config.treasury_address, fee)
                        .await
                    {
                        Ok(signature) => {
                            rounds.record_fee(round_id, &signature).await?;
                            tracing::info!(
                                "Round {} fee {} sent to treasury (tx {})",
                                round_id,
                                fee,
                                signature
                            );
                        }
                        Err(e) => {
                            tracing::warn!(
                                "Fee transfer for round {} failed, will retry: {}",
                                round_id,
                                e
                            );
                            return Ok(false);
                        }
                    }
                } else if fee > 0 {
                    tracing::debug!(
                        "Round {} fee {} below minimum transfer, left in escrow",
                        round_id,
                        fee
                    );
                }
                let pool = spendable - fee;

                let wagers = rounds.wagers_for_round(round_id).await?;
                let winners: Vec<&WagerRecord> = wagers
                    .iter()
                    .filter(|w| w.team_pick == winner && w.amount > 0)
                    .collect();

                if winners.is_empty() {
                    return self.forfeit_to_treasury(&rounds, &round, winner).await;
                }

                // Retries divide whatever is left among the still-unpaid
                // winners, so a prior pass's payouts are never repeated.
                let unpaid_total: u64 = winners
                    .iter()
                    .filter(|w| !w.paid_out)
                    .map(|w| w.amount)
                    .sum();
                if unpaid_total == 0 {
                    rounds.close_round(round_id, RoundStatus::Settled).await?;
                    tracing::info!("Round {} settled, all payouts already sent", round_id);
                    return Ok(true);
                }

                let mut paid = 0usize;
                let mut distributed = 0u64;
                let mut failures = 0usize;

                for wager in winners.iter().filter(|w| !w.paid_out) {
                    let payout =
                        ((wager.amount as u128 * pool as u128) / unpaid_total as u128) as u64;

                    if payout < self.config.min_transfer {
                        tracing::warn!(
                            "Payout {} for wager {} below minimum transfer, skipped",
                            payout,
                            wager.id
                        );
                        rounds.mark_wager_paid(&wager.id, None).await?;
                        continue;
                    }

                    match self
                        .escrow
                        .send(&round.encrypted_key, &wager.payout_address, payout)
                        .await
                    {
                        Ok(signature) => {
                            rounds.mark_wager_paid(&wager.id, Some(&signature)).await?;
                            tracing::info!(
                                "Paid {} to wager {} on round {} (tx {})",
                                payout,
                                wager.id,
                                round_id,
                                signature
                            );
                            paid += 1;
                            distributed += payout;
                        }
                        Err(e) => {
                            tracing::warn!(
                                "Payout of {} to wager {} failed: {}",
                                payout,
                                wager.id,
                                e
                            );
                            failures += 1;
                        }
                    }
                }

                if failures > 0 {
                    tracing::warn!(
                        "Round {} left locked, {} payouts failed and will be retried",
                        round_id,
                        failures
                    );
                    return Ok(false);
                }

                rounds.close_round(round_id, RoundStatus::Settled).await?;
                tracing::info!(
                    "Round {} settled: {} paid out across {} winning wagers",
                    round_id,
                    distributed,
                    paid
                );
                self.announce(
                    &round.chat_id,
                    &format!(
                        "Round settled: {} wins. Paid out {} across {} wagers.",
                        winner, distributed, paid
                    ),
                )
                .await;
                Ok(true)
            })
            .await?;

        Ok(outcome.completed().unwrap_or(false))
    }

    /// Nobody backed the winning team, so the pool is forfeit to the house.
    async fn forfeit_to_treasury(
        &self,
        rounds: &RoundStore<'_>,
        round: &RoundRecord,
        winner: &str,
    ) -> Result<bool> {
        let leftover = self.escrow.spendable(&round.escrow_address).await?;
        if leftover >= self.config.min_transfer {
            match self
                .escrow
                .send(
                    &round.encrypted_key,
                    &self.config.treasury_address,
                    leftover,
                )
                .await
            {
                Ok(signature) => {
                    tracing::info!(
                        "Round {} had no winning wagers, {} forfeited to treasury (tx {})",
                        round.id,
                        leftover,
                        signature
                    );
                }
                Err(e) => {
                    tracing::warn!(
                        "Forfeit transfer for round {} failed, will retry: {}",
                        round.id,
                        e
                    );
                    return Ok(false);
                }
            }
        }

        rounds.close_round(&round.id, RoundStatus::Settled).await?;
        self.announce(
            &round.chat_id,
            &format!(
                "Round settled: {} wins, but nobody backed them. The pot goes to the house.",
                winner
            ),
        )
        .await;
        Ok(true)
    }

    /// Return every funded, unpaid wager its original stake and cancel the
    /// round. Shares the per-round lease with settlement so the two can
    /// never interleave on one round.
    async fn refund_round(&self, round_id: &str) -> Result<bool> {
        let locks = LockStore::new(&self.storage);
        let resource = format!("round:{}", round_id);

        let outcome = locks
            .run_exclusive(&resource, self.config.lock_ttl_secs, || async {
                let rounds = RoundStore::new(&self.storage);
                let round = rounds.round(round_id).await?;
                if round.status != RoundStatus::Open && round.status != RoundStatus::Locked {
                    tracing::debug!(
                        "Round {} is {}, nothing to refund",
                        round_id,
                        round.status.as_str()
                    );
                    return Ok(false);
                }

                let mut failures = 0usize;
                let mut refunded = 0usize;

                for wager in rounds.wagers_for_round(round_id).await? {
                    if wager.amount == 0 || wager.paid_out {
                        continue;
                    }
                    if wager.amount < self.config.min_transfer {
                        tracing::warn!(
                            "Refund {} for wager {} below minimum transfer, skipped",
                            wager.amount,
                            wager.id
                        );
                        rounds.mark_wager_paid(&wager.id, None).await?;
                        continue;
                    }

                    match self
                        .escrow
                        .send(&round.encrypted_key, &wager.payout_address, wager.amount)
                        .await
                    {
                        Ok(signature) => {
                            rounds.mark_wager_paid(&wager.id, Some(&signature)).await?;
                            tracing::info!(
                                "Refunded {} to wager {} on round {} (tx {})",
                                wager.amount,
                                wager.id,
                                round_id,
                                signature
                            );
                            refunded += 1;
                        }
                        Err(e) => {
                            tracing::warn!(
                                "Refund of {} to wager {} failed: {}",
                                wager.amount,
                                wager.id,
                                e
                            );
                            failures += 1;
                        }
                    }
                }

                if failures > 0 {
                    tracing::warn!(
                        "Round {} refund incomplete, {} transfers failed and will be retried",
                        round_id,
                        failures
                    );
                    return Ok(false);
                }

                rounds.close_round(round_id, RoundStatus::Cancelled).await?;
                tracing::info!("Round {} cancelled, {} stakes refunded", round_id, refunded);
                if refunded > 0 {
                    self.announce(&round.chat_id, "Round cancelled. All stakes refunded.")
                        .await;
                }
                Ok(true)
            })
            .await?;

        Ok(outcome.completed().unwrap_or(false))
    }

    async fn announce(&self, chat_id: &str, text: &str) {
        if let Err(e) = self.notifier.notify(chat_id, text).await {
            tracing::warn!("Failed to notify chat {}: {}", chat_id, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{
        cancelled_game, final_game, scheduled_game, test_config, FakeChain, FakeGames,
        FakeNotifier,
    };
    use tempfile::tempdir;

    struct Fixture {
        storage: Arc<Storage>,
        chain: Arc<FakeChain>,
        games: Arc<FakeGames>,
        notifier: Arc<FakeNotifier>,
        engine: RoundEngine,
    }

    async fn fixture(dir: &tempfile::TempDir) -> Fixture {
        fixture_with_config(dir, test_config()).await
    }

    async fn fixture_with_config(dir: &tempfile::TempDir, config: CoreConfig) -> Fixture {
        let storage = Arc::new(Storage::new(&dir.path().join("test.db")).await.unwrap());
        let chain = Arc::new(FakeChain::new());
        let games = Arc::new(FakeGames::new());
        let notifier = Arc::new(FakeNotifier::new());
        let escrow = Arc::new(EscrowService::new(
            chain.clone(),
            &config.key_passphrase,
            config.rent_reserve,
        ));
        let engine = RoundEngine::new(
            storage.clone(),
            escrow,
            games.clone(),
            notifier.clone(),
            config,
        );

        Fixture {
            storage,
            chain,
            games,
            notifier,
            engine,
        }
    }

    fn funded_wager(round_id: &str, user_id: &str, pick: &str, amount: u64) -> WagerRecord {
        WagerRecord {
            id: format!("w-{}", user_id),
            round_id: round_id.to_string(),
            user_id: user_id.to_string(),
            team_pick: pick.to_string(),
            payout_address: format!("addr-{}", user_id),
            amount,
            deposit_tx: Some(format!("dep-{}", user_id)),
            paid_out: false,
            payout_tx: None,
            created_at: Utc::now(),
        }
    }

    /// A LOCKED round with a real escrow wallet, funded wagers and the
    /// matching balance sitting on the fake chain.
    async fn locked_round(fx: &Fixture, round_id: &str, wagers: &[WagerRecord]) -> RoundRecord {
        let escrow = EscrowService::new(fx.chain.clone(), "test-passphrase", 0);
        let wallet = escrow.generate().unwrap();
        let total: u64 = wagers.iter().map(|w| w.amount).sum();

        let round = RoundRecord {
            id: round_id.to_string(),
            game_id: "game-1".to_string(),
            chat_id: "chat-1".to_string(),
            status: RoundStatus::Locked,
            escrow_address: wallet.address.clone(),
            encrypted_key: wallet.encrypted_key,
            total_pot: total,
            fee_tx: None,
            expires_at: Utc::now() - chrono::Duration::hours(1),
            created_at: Utc::now() - chrono::Duration::hours(2),
            settled_at: None,
        };

        let rounds = RoundStore::new(&fx.storage);
        rounds.create_round(&round).await.unwrap();
        for wager in wagers {
            rounds.insert_wager(wager).await.unwrap();
        }
        if total > 0 {
            fx.chain.credit(&wallet.address, total, "funding");
        }
        round
    }

    #[tokio::test]
    async fn test_place_wager_opens_round_once_per_game_chat() {
        let dir = tempdir().unwrap();
        let fx = fixture(&dir).await;
        fx.games.insert(scheduled_game(
            "game-1",
            "HAWKS",
            "WOLVES",
            Utc::now() + chrono::Duration::hours(3),
        ));

        let first = fx
            .engine
            .place_wager("game-1", "chat-1", "alice", "HAWKS", "addr-alice")
            .await
            .unwrap();
        assert!(first.new_round);
        assert!(!first.already_placed);

        let second = fx
            .engine
            .place_wager("game-1", "chat-1", "bob", "WOLVES", "addr-bob")
            .await
            .unwrap();
        assert!(!second.new_round);
        assert_eq!(second.round_id, first.round_id);
        assert_eq!(second.escrow_address, first.escrow_address);

        // Same user again comes back with the original slot
        let again = fx
            .engine
            .place_wager("game-1", "chat-1", "alice", "WOLVES", "addr-alice")
            .await
            .unwrap();
        assert!(again.already_placed);
        assert_eq!(again.wager_id, first.wager_id);

        let rounds = RoundStore::new(&fx.storage);
        assert_eq!(
            rounds
                .wagers_for_round(&first.round_id)
                .await
                .unwrap()
                .len(),
            2
        );
    }

    #[tokio::test]
    async fn test_place_wager_rejects_bad_picks_and_started_games() {
        let dir = tempdir().unwrap();
        let fx = fixture(&dir).await;
        fx.games.insert(scheduled_game(
            "game-1",
            "HAWKS",
            "WOLVES",
            Utc::now() + chrono::Duration::hours(3),
        ));
        fx.games.insert(final_game("game-2", "HAWKS", "WOLVES", 1, 0));

        let bad_pick = fx
            .engine
            .place_wager("game-1", "chat-1", "alice", "BEARS", "addr-alice")
            .await;
        assert!(matches!(bad_pick, Err(CoreError::InvalidState(_))));

        let finished = fx
            .engine
            .place_wager("game-2", "chat-1", "alice", "HAWKS", "addr-alice")
            .await;
        assert!(matches!(finished, Err(CoreError::InvalidState(_))));

        assert!(matches!(
            fx.engine
                .place_wager("missing", "chat-1", "alice", "HAWKS", "addr-alice")
                .await,
            Err(CoreError::GameNotFound { .. })
        ));
    }

    #[tokio::test]
    async fn test_settlement_splits_pot_proportionally() {
        let dir = tempdir().unwrap();
        let fx = fixture(&dir).await;

        locked_round(
            &fx,
            "r1",
            &[
                funded_wager("r1", "alice", "HAWKS", 100),
                funded_wager("r1", "bob", "HAWKS", 200),
                funded_wager("r1", "carol", "WOLVES", 150),
            ],
        )
        .await;
        fx.games.insert(final_game("game-1", "HAWKS", "WOLVES", 98, 90));

        assert_eq!(fx.engine.settle_due_rounds().await.unwrap(), 1);

        // Pot 450 at 1%: fee 4, pool 446 split 148/297 across the 300 on HAWKS
        assert_eq!(fx.chain.total_sent_to("treasury"), 4);
        assert_eq!(fx.chain.balance_of("addr-alice"), 148);
        assert_eq!(fx.chain.balance_of("addr-bob"), 297);
        assert_eq!(fx.chain.balance_of("addr-carol"), 0);

        let rounds = RoundStore::new(&fx.storage);
        let round = rounds.round("r1").await.unwrap();
        assert_eq!(round.status, RoundStatus::Settled);
        assert!(round.fee_tx.is_some());
        assert!(round.settled_at.is_some());

        let wagers = rounds.wagers_for_round("r1").await.unwrap();
        let alice = wagers.iter().find(|w| w.user_id == "alice").unwrap();
        let carol = wagers.iter().find(|w| w.user_id == "carol").unwrap();
        assert!(alice.paid_out);
        assert!(alice.payout_tx.is_some());
        assert!(!carol.paid_out);

        assert_eq!(fx.notifier.messages().len(), 1);
        assert_eq!(fx.notifier.messages()[0].0, "chat-1");
    }

    #[tokio::test]
    async fn test_settlement_is_idempotent_once_settled() {
        let dir = tempdir().unwrap();
        let fx = fixture(&dir).await;

        locked_round(
            &fx,
            "r1",
            &[
                funded_wager("r1", "alice", "HAWKS", 100),
                funded_wager("r1", "carol", "WOLVES", 150),
            ],
        )
        .await;
        fx.games.insert(final_game("game-1", "HAWKS", "WOLVES", 98, 90));

        assert_eq!(fx.engine.settle_due_rounds().await.unwrap(), 1);
        let sent_after_first = fx.chain.sent().len();

        assert_eq!(fx.engine.settle_due_rounds().await.unwrap(), 0);
        assert_eq!(fx.chain.sent().len(), sent_after_first);
    }

    #[tokio::test]
    async fn test_failed_payout_leaves_round_locked_for_retry() {
        let dir = tempdir().unwrap();
        let fx = fixture(&dir).await;

        locked_round(
            &fx,
            "r1",
            &[
                funded_wager("r1", "alice", "HAWKS", 100),
                funded_wager("r1", "bob", "HAWKS", 200),
                funded_wager("r1", "carol", "WOLVES", 150),
            ],
        )
        .await;
        fx.games.insert(final_game("game-1", "HAWKS", "WOLVES", 98, 90));
        fx.chain.fail_sends_to("addr-bob");

        assert_eq!(fx.engine.settle_due_rounds().await.unwrap(), 0);

        let rounds = RoundStore::new(&fx.storage);
        let round = rounds.round("r1").await.unwrap();
        assert_eq!(round.status, RoundStatus::Locked);
        assert!(round.fee_tx.is_some());
        assert_eq!(fx.chain.balance_of("addr-alice"), 148);
        assert_eq!(fx.chain.balance_of("addr-bob"), 0);

        // Next pass repeats neither the fee nor alice's payout; bob gets
        // what is left in the escrow
        fx.chain.restore_sends_to("addr-bob");
        assert_eq!(fx.engine.settle_due_rounds().await.unwrap(), 1);

        assert_eq!(fx.chain.total_sent_to("treasury"), 4);
        assert_eq!(fx.chain.balance_of("addr-alice"), 148);
        assert_eq!(fx.chain.balance_of("addr-bob"), 298);
        assert_eq!(rounds.round("r1").await.unwrap().status, RoundStatus::Settled);
    }

    #[tokio::test]
    async fn test_unbacked_winner_forfeits_pot_to_treasury() {
        let dir = tempdir().unwrap();
        let fx = fixture(&dir).await;

        locked_round(&fx, "r1", &[funded_wager("r1", "carol", "WOLVES", 150)]).await;
        fx.games.insert(final_game("game-1", "HAWKS", "WOLVES", 98, 90));

        assert_eq!(fx.engine.settle_due_rounds().await.unwrap(), 1);

        // Fee 1 plus the forfeited 149 both land in the treasury
        assert_eq!(fx.chain.total_sent_to("treasury"), 150);
        assert_eq!(fx.chain.balance_of("addr-carol"), 0);

        let rounds = RoundStore::new(&fx.storage);
        assert_eq!(rounds.round("r1").await.unwrap().status, RoundStatus::Settled);
    }

    #[tokio::test]
    async fn test_cancelled_game_refunds_unpaid_stakes() {
        let dir = tempdir().unwrap();
        let fx = fixture(&dir).await;

        let mut already_paid = funded_wager("r1", "dave", "WOLVES", 50);
        already_paid.paid_out = true;
        already_paid.payout_tx = Some("earlier".to_string());

        locked_round(
            &fx,
            "r1",
            &[funded_wager("r1", "alice", "HAWKS", 100), already_paid],
        )
        .await;
        fx.games.insert(cancelled_game("game-1", "HAWKS", "WOLVES"));

        assert_eq!(fx.engine.settle_due_rounds().await.unwrap(), 1);

        assert_eq!(fx.chain.balance_of("addr-alice"), 100);
        assert_eq!(fx.chain.balance_of("addr-dave"), 0);

        let rounds = RoundStore::new(&fx.storage);
        assert_eq!(
            rounds.round("r1").await.unwrap().status,
            RoundStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_tied_game_refunds_stakes() {
        let dir = tempdir().unwrap();
        let fx = fixture(&dir).await;

        locked_round(
            &fx,
            "r1",
            &[
                funded_wager("r1", "alice", "HAWKS", 100),
                funded_wager("r1", "carol", "WOLVES", 150),
            ],
        )
        .await;
        fx.games
            .insert(final_game("game-1", "HAWKS", "WOLVES", 90, 90));

        assert_eq!(fx.engine.settle_due_rounds().await.unwrap(), 1);

        assert_eq!(fx.chain.balance_of("addr-alice"), 100);
        assert_eq!(fx.chain.balance_of("addr-carol"), 150);
        assert_eq!(fx.chain.total_sent_to("treasury"), 0);

        let rounds = RoundStore::new(&fx.storage);
        assert_eq!(
            rounds.round("r1").await.unwrap().status,
            RoundStatus::Cancelled
        );
    }

    #[tokio::test]
    async fn test_empty_escrow_settles_without_transfers() {
        let dir = tempdir().unwrap();
        let fx = fixture(&dir).await;

        let round = locked_round(&fx, "r1", &[]).await;
        fx.chain.set_balance(&round.escrow_address, 0);
        fx.games.insert(final_game("game-1", "HAWKS", "WOLVES", 98, 90));

        assert_eq!(fx.engine.settle_due_rounds().await.unwrap(), 1);
        assert!(fx.chain.sent().is_empty());

        let rounds = RoundStore::new(&fx.storage);
        assert_eq!(rounds.round("r1").await.unwrap().status, RoundStatus::Settled);
    }

    #[tokio::test]
    async fn test_dust_payout_is_flagged_not_paid() {
        let dir = tempdir().unwrap();
        let mut config = test_config();
        config.min_transfer = 50;
        let fx = fixture_with_config(&dir, config).await;

        locked_round(
            &fx,
            "r1",
            &[
                funded_wager("r1", "alice", "HAWKS", 10),
                funded_wager("r1", "bob", "HAWKS", 1_000),
            ],
        )
        .await;
        fx.games.insert(final_game("game-1", "HAWKS", "WOLVES", 98, 90));

        assert_eq!(fx.engine.settle_due_rounds().await.unwrap(), 1);

        // Fee 10 is under the transfer floor so the pool is 1000; alice's
        // share of 9 is too small to send and is written off
        assert_eq!(fx.chain.total_sent_to("treasury"), 0);
        assert_eq!(fx.chain.balance_of("addr-alice"), 0);
        assert_eq!(fx.chain.balance_of("addr-bob"), 990);

        let rounds = RoundStore::new(&fx.storage);
        let wagers = rounds.wagers_for_round("r1").await.unwrap();
        let alice = wagers.iter().find(|w| w.user_id == "alice").unwrap();
        assert!(alice.paid_out);
        assert!(alice.payout_tx.is_none());
        assert_eq!(rounds.round("r1").await.unwrap().status, RoundStatus::Settled);
    }

    #[tokio::test]
    async fn test_lock_and_expiry_transitions() {
        let dir = tempdir().unwrap();
        let fx = fixture(&dir).await;
        let rounds = RoundStore::new(&fx.storage);

        locked_round(
            &fx,
            "r-funded",
            &[funded_wager("r-funded", "alice", "HAWKS", 100)],
        )
        .await;
        rounds
            .set_round_status("r-funded", RoundStatus::Open)
            .await
            .unwrap();

        locked_round(&fx, "r-empty", &[]).await;
        rounds
            .set_round_status("r-empty", RoundStatus::Open)
            .await
            .unwrap();

        assert_eq!(fx.engine.lock_started_rounds().await.unwrap(), 1);
        assert_eq!(
            rounds.round("r-funded").await.unwrap().status,
            RoundStatus::Locked
        );
        assert_eq!(rounds.round("r-empty").await.unwrap().status, RoundStatus::Open);

        assert_eq!(fx.engine.expire_unfunded_rounds().await.unwrap(), 1);
        assert_eq!(
            rounds.round("r-empty").await.unwrap().status,
            RoundStatus::Cancelled
        );
    }
}
