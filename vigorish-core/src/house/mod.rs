pub mod grading;

use crate::config::CoreConfig;
use crate::error::{CoreError, Result};
use crate::escrow::EscrowService;
use crate::games::GameProvider;
use crate::notify::Notifier;
use crate::storage::house_store::{HouseBetRecord, TreasuryShortfall};
use crate::storage::{HouseStore, LockOutcome, LockStore, Storage};
use crate::types::{BetResult, BetStatus, BetType, GameRecord, GameStatus};
use chrono::Utc;
use std::collections::HashMap;
use std::sync::Arc;
use uuid::Uuid;

/// Everything a caller supplies to open a fixed-odds bet against the house.
#[derive(Debug, Clone)]
pub struct BetSlip {
    pub game_id: String,
    pub chat_id: String,
    pub user_id: String,
    pub bet_type: BetType,
    pub pick: Option<String>,
    pub odds: i64,
    pub line: Option<f64>,
    pub amount: u64,
    pub payout_address: String,
}

/// Fixed-odds bets against the house. Each bet holds its stake in its own
/// escrow wallet; at settlement a winner's profit is pooled out of the
/// wallets of bets that lost in the same batch.
pub struct HouseEngine {
    storage: Arc<Storage>,
    escrow: Arc<EscrowService>,
    games: Arc<dyn GameProvider>,
    notifier: Arc<dyn Notifier>,
    config: CoreConfig,
}

/// The batch settlement lease. One coarse lease covers the whole pass
/// because pooling reaches across every wallet in the batch.
const SETTLE_RESOURCE: &str = "house:settle";

fn describe(bet: &HouseBetRecord) -> String {
    let pick = bet.pick.as_deref().unwrap_or("?");
    match bet.bet_type {
        BetType::Moneyline => format!("{} ML ({:+})", pick, bet.odds),
        BetType::Spread => format!("{} {:+} ({:+})", pick, bet.line.unwrap_or(0.0), bet.odds),
        BetType::TotalOver => format!("Over {} ({:+})", bet.line.unwrap_or(0.0), bet.odds),
        BetType::TotalUnder => format!("Under {} ({:+})", bet.line.unwrap_or(0.0), bet.odds),
    }
}

impl HouseEngine {
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

    /// Open a PENDING bet with a fresh escrow wallet. The bet goes ACTIVE
    /// once the deposit pipeline sees the stake arrive.
    pub async fn place_bet(&self, slip: BetSlip) -> Result<HouseBetRecord> {
        let game = self.games.game(&slip.game_id).await?;

        if game.status != GameStatus::Scheduled || game.start_time <= Utc::now() {
            return Err(CoreError::invalid_state(format!(
                "Game {} is no longer open for bets",
                slip.game_id
            )));
        }
        if slip.amount < self.config.min_wager || slip.amount > self.config.max_wager {
            return Err(CoreError::invalid_state(format!(
                "Stake must be between {} and {}",
                self.config.min_wager, self.config.max_wager
            )));
        }
        let magnitude = slip.odds.unsigned_abs();
        if !(100..=100_000).contains(&magnitude) {
            return Err(CoreError::invalid_state(
                "Odds must be an American price of at least +100 or -100",
            ));
        }

        let (pick, line) = match slip.bet_type {
            BetType::Moneyline | BetType::Spread => {
                let pick = slip.pick.as_deref().ok_or_else(|| {
                    CoreError::invalid_state("This bet type needs a team pick")
                })?;
                if pick != game.home_team && pick != game.away_team {
                    return Err(CoreError::invalid_state(format!(
                        "Pick must be {} or {}",
                        game.home_team, game.away_team
                    )));
                }
                let line = match slip.bet_type {
                    BetType::Spread => Some(slip.line.ok_or_else(|| {
                        CoreError::invalid_state("A spread bet needs a line")
                    })?),
                    _ => None,
                };
                (Some(pick.to_string()), line)
            }
            BetType::TotalOver | BetType::TotalUnder => {
                let line = slip
                    .line
                    .ok_or_else(|| CoreError::invalid_state("A totals bet needs a line"))?;
                if line <= 0.0 {
                    return Err(CoreError::invalid_state("A totals line must be positive"));
                }
                (None, Some(line))
            }
        };

        let wallet = self.escrow.generate()?;
        let bet = HouseBetRecord {
            id: Uuid::new_v4().to_string(),
            game_id: slip.game_id,
            chat_id: slip.chat_id,
            user_id: slip.user_id,
            bet_type: slip.bet_type,
            pick,
            odds: slip.odds,
            line,
            amount: slip.amount,
            potential_win: grading::potential_win(slip.amount, slip.odds),
            status: BetStatus::Pending,
            result: None,
            escrow_address: wallet.address,
            encrypted_key: wallet.encrypted_key,
            payout_address: slip.payout_address,
            deposit_tx: None,
            payout_tx: None,
            created_at: Utc::now(),
            settled_at: None,
        };

        let house = HouseStore::new(&self.storage);
        house.create_bet(&bet).await?;
        tracing::info!(
            "Opened bet {}: {} for {} (escrow {})",
            bet.id,
            describe(&bet),
            bet.amount,
            bet.escrow_address
        );

        Ok(bet)
    }

    /// Settle every ACTIVE bet whose game has concluded, pooling winner
    /// payouts across the batch's loser wallets. Returns the number of
    /// bets settled this pass.
    pub async fn settle_due_bets(&self) -> Result<usize> {
        let locks = LockStore::new(&self.storage);

        let outcome = locks
            .run_exclusive(SETTLE_RESOURCE, self.config.lock_ttl_secs, || {
                self.settle_batch()
            })
            .await?;

        match outcome {
            LockOutcome::Completed(settled) => Ok(settled),
            LockOutcome::Skipped => Ok(0),
        }
    }

    async fn settle_batch(&self) -> Result<usize> {
        let house = HouseStore::new(&self.storage);
        let active = house.bets_with_status(BetStatus::Active).await?;
        if active.is_empty() {
            return Ok(0);
        }

        // One provider read per distinct game in the batch
        let mut games: HashMap<String, GameRecord> = HashMap::new();
        for bet in &active {
            if games.contains_key(&bet.game_id) {
                continue;
            }
            match self.games.game(&bet.game_id).await {
                Ok(game) => {
                    games.insert(bet.game_id.clone(), game);
                }
                Err(e) => tracing::warn!("Could not load game {}: {}", bet.game_id, e),
            }
        }

        let mut graded: Vec<(&HouseBetRecord, BetResult)> = Vec::new();
        for bet in &active {
            let Some(game) = games.get(&bet.game_id) else {
                continue;
            };
            let result = match game.status {
                GameStatus::Final => match grading::grade(bet, game) {
                    Some(result) => result,
                    None => {
                        tracing::warn!(
                            "Game {} is final but bet {} has no usable numbers yet",
                            game.id,
                            bet.id
                        );
                        continue;
                    }
                },
                // A called-off game returns every stake
                GameStatus::Cancelled => BetResult::Push,
                _ => continue,
            };
            graded.push((bet, result));
        }
        if graded.is_empty() {
            return Ok(0);
        }
        graded.sort_by(|a, b| a.0.id.cmp(&b.0.id));

        // Shared balance trackers: every draw in this pass decrements them
        // so the batch can never spend a wallet twice
        let mut balances: HashMap<String, u64> = HashMap::new();
        for (bet, _) in &graded {
            let spendable = self.escrow.spendable(&bet.escrow_address).await?;
            balances.insert(bet.id.clone(), spendable);
        }

        let losers: Vec<&HouseBetRecord> = graded
            .iter()
            .filter(|(_, result)| *result == BetResult::Loss)
            .map(|(bet, _)| *bet)
            .collect();

        let mut settled = 0;
        let mut stalled_payouts = 0;

        for (bet, result) in graded.iter().filter(|(_, r)| *r != BetResult::Loss) {
            match self
                .dispatch_payout(&house, bet, *result, &losers, &mut balances)
                .await
            {
                Ok(true) => settled += 1,
                Ok(false) => stalled_payouts += 1,
                Err(e) => {
                    tracing::warn!("Settlement of bet {} failed: {}", bet.id, e);
                    stalled_payouts += 1;
                }
            }
        }

        // Loser wallets are part of the pool; they stay ACTIVE until every
        // payout that may draw on them has gone through
        if stalled_payouts > 0 {
            tracing::warn!(
                "{} payouts stalled; leaving {} lost bets open for the retry pass",
                stalled_payouts,
                losers.len()
            );
            return Ok(settled);
        }

        for (bet, _) in graded.iter().filter(|(_, r)| *r == BetResult::Loss) {
            house.mark_settled(&bet.id, BetResult::Loss, None).await?;
            tracing::info!("Bet {} settled: LOSS", bet.id);
            self.announce(&bet.chat_id, &format!("Bet lost: {}.", describe(bet)))
                .await;
            settled += 1;
        }

        Ok(settled)
    }

    /// Pay one WIN or PUSH bet, drawing first on its own wallet and then
    /// on the batch's loser wallets in bet-id order. Returns false when
    /// nothing could be dispatched and the bet should stay ACTIVE.
    async fn dispatch_payout(
        &self,
        house: &HouseStore<'_>,
        bet: &HouseBetRecord,
        result: BetResult,
        losers: &[&HouseBetRecord],
        balances: &mut HashMap<String, u64>,
    ) -> Result<bool> {
        let needed = match result {
            BetResult::Win => bet.amount + bet.potential_win,
            BetResult::Push => bet.amount,
            BetResult::Loss => 0,
        };

        if needed < self.config.min_transfer {
            tracing::warn!(
                "Bet {} payout {} below minimum transfer, written off",
                bet.id,
                needed
            );
            house.mark_settled(&bet.id, result, None).await?;
            return Ok(true);
        }

        let mut remainder = needed;
        let mut refs: Vec<String> = Vec::new();
        let mut failed_sends = 0usize;

        let own = [bet];
        for source in own.iter().chain(losers.iter()) {
            if remainder == 0 {
                break;
            }

            let available = balances
                .get(&source.id)
                .copied()
                .unwrap_or(0)
                .saturating_sub(self.config.tx_fee_reserve);
            let draw = available.min(remainder);
            if draw == 0 {
                continue;
            }

            match self
                .escrow
                .send(&source.encrypted_key, &bet.payout_address, draw)
                .await
            {
                Ok(signature) => {
                    if let Some(balance) = balances.get_mut(&source.id) {
                        *balance -= draw;
                    }
                    remainder -= draw;
                    tracing::info!(
                        "Drew {} from escrow of bet {} toward payout of bet {} (tx {})",
                        draw,
                        source.id,
                        bet.id,
                        signature
                    );
                    refs.push(signature);
                }
                Err(e) => {
                    tracing::warn!(
                        "Draw of {} from escrow of bet {} failed: {}",
                        draw,
                        source.id,
                        e
                    );
                    failed_sends += 1;
                }
            }
        }

        if refs.is_empty() && failed_sends > 0 {
            // Nothing moved, so retrying the whole payout next pass is safe
            tracing::warn!("No funds dispatched for bet {}, will retry", bet.id);
            return Ok(false);
        }

        if remainder > 0 {
            house
                .record_shortfall(&TreasuryShortfall {
                    id: Uuid::new_v4().to_string(),
                    house_bet_id: bet.id.clone(),
                    amount: remainder,
                    created_at: Utc::now(),
                    resolved: false,
                })
                .await?;
            tracing::warn!(
                "Bet {} payout short by {} after exhausting the batch pool",
                bet.id,
                remainder
            );
        }

        let refs_joined = refs.join(",");
        let payout_tx = (!refs_joined.is_empty()).then_some(refs_joined.as_str());
        house.mark_settled(&bet.id, result, payout_tx).await?;

        let paid = needed - remainder;
        tracing::info!(
            "Bet {} settled: {} paid {} of {}",
            bet.id,
            result.as_str(),
            paid,
            needed
        );
        let text = match result {
            BetResult::Win => format!("Bet won: {}. Paid {}.", describe(bet), paid),
            _ => format!("Bet push: {}. Stake returned.", describe(bet)),
        };
        self.announce(&bet.chat_id, &text).await;

        Ok(true)
    }

    /// Cancel PENDING bets whose deposit never showed up inside the
    /// funding window, returning any partial deposit to the bettor.
    pub async fn expire_pending_bets(&self) -> Result<usize> {
        let house = HouseStore::new(&self.storage);
        let locks = LockStore::new(&self.storage);
        let cutoff = Utc::now() - chrono::Duration::seconds(self.config.pending_bet_ttl_secs);
        let mut expired = 0;

        for bet in house.bets_with_status(BetStatus::Pending).await? {
            if bet.created_at > cutoff {
                continue;
            }

            // Shares the escrow lease with the deposit pipeline so a
            // deposit being credited right now wins or loses cleanly
            let resource = format!("escrow:{}", bet.escrow_address);
            let outcome = locks
                .run_exclusive(&resource, self.config.lock_ttl_secs, || async {
                    if !house.cancel_pending_bet(&bet.id).await? {
                        return Ok(false);
                    }
                    tracing::info!("Bet {} expired with no deposit", bet.id);

                    let residue = self.escrow.spendable(&bet.escrow_address).await?;
                    if residue >= self.config.min_transfer {
                        match self
                            .escrow
                            .send(&bet.encrypted_key, &bet.payout_address, residue)
                            .await
                        {
                            Ok(signature) => tracing::info!(
                                "Returned {} left in expired bet {} (tx {})",
                                residue,
                                bet.id,
                                signature
                            ),
                            Err(e) => tracing::warn!(
                                "Could not return {} from expired bet {}: {}",
                                residue,
                                bet.id,
                                e
                            ),
                        }
                    }

                    self.announce(
                        &bet.chat_id,
                        &format!("Bet expired before funding arrived: {}.", describe(&bet)),
                    )
                    .await;
                    Ok(true)
                })
                .await?;

            if matches!(outcome, LockOutcome::Completed(true)) {
                expired += 1;
            }
        }

        Ok(expired)
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
        engine: HouseEngine,
    }

    async fn fixture(dir: &tempfile::TempDir) -> Fixture {
        let config = test_config();
        let storage = Arc::new(Storage::new(&dir.path().join("test.db")).await.unwrap());
        let chain = Arc::new(FakeChain::new());
        let games = Arc::new(FakeGames::new());
        let notifier = Arc::new(FakeNotifier::new());
        let escrow = Arc::new(EscrowService::new(
            chain.clone(),
            &config.key_passphrase,
            config.rent_reserve,
        ));
        let engine = HouseEngine::new(
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

    fn slip(bet_type: BetType, pick: Option<&str>, line: Option<f64>, amount: u64) -> BetSlip {
        BetSlip {
            game_id: "game-1".to_string(),
            chat_id: "chat-1".to_string(),
            user_id: "alice".to_string(),
            bet_type,
            pick: pick.map(str::to_string),
            odds: 150,
            line,
            amount,
            payout_address: "addr-alice".to_string(),
        }
    }

    /// An ACTIVE bet with a real escrow wallet holding `balance` on the
    /// fake chain.
    async fn active_bet(
        fx: &Fixture,
        id: &str,
        bet_type: BetType,
        pick: Option<&str>,
        line: Option<f64>,
        stake: u64,
        potential: u64,
        balance: u64,
    ) -> HouseBetRecord {
        let escrow = EscrowService::new(fx.chain.clone(), "test-passphrase", 0);
        let wallet = escrow.generate().unwrap();

        let bet = HouseBetRecord {
            id: id.to_string(),
            game_id: "game-1".to_string(),
            chat_id: "chat-1".to_string(),
            user_id: format!("user-{}", id),
            bet_type,
            pick: pick.map(str::to_string),
            odds: -110,
            line,
            amount: stake,
            potential_win: potential,
            status: BetStatus::Active,
            result: None,
            escrow_address: wallet.address.clone(),
            encrypted_key: wallet.encrypted_key,
            payout_address: format!("payout-{}", id),
            deposit_tx: Some(format!("dep-{}", id)),
            payout_tx: None,
            created_at: Utc::now() - chrono::Duration::hours(1),
            settled_at: None,
        };

        HouseStore::new(&fx.storage).create_bet(&bet).await.unwrap();
        if balance > 0 {
            fx.chain
                .credit(&wallet.address, balance, &format!("fund-{}", id));
        }
        bet
    }

    #[tokio::test]
    async fn test_place_bet_opens_pending_with_escrow() {
        let dir = tempdir().unwrap();
        let fx = fixture(&dir).await;
        fx.games.insert(scheduled_game(
            "game-1",
            "HAWKS",
            "WOLVES",
            Utc::now() + chrono::Duration::hours(3),
        ));

        let bet = fx
            .engine
            .place_bet(slip(BetType::Moneyline, Some("HAWKS"), None, 100))
            .await
            .unwrap();

        assert_eq!(bet.status, BetStatus::Pending);
        assert_eq!(bet.potential_win, 150);
        assert_eq!(bet.escrow_address.len(), 64);
        assert!(bet.line.is_none());

        let stored = HouseStore::new(&fx.storage).bet(&bet.id).await.unwrap();
        assert_eq!(stored.escrow_address, bet.escrow_address);
    }

    #[tokio::test]
    async fn test_place_bet_validates_slip() {
        let dir = tempdir().unwrap();
        let fx = fixture(&dir).await;
        fx.games.insert(scheduled_game(
            "game-1",
            "HAWKS",
            "WOLVES",
            Utc::now() + chrono::Duration::hours(3),
        ));
        fx.games.insert(final_game("game-2", "HAWKS", "WOLVES", 1, 0));

        let mut short_odds = slip(BetType::Moneyline, Some("HAWKS"), None, 100);
        short_odds.odds = 50;
        assert!(fx.engine.place_bet(short_odds).await.is_err());

        assert!(fx
            .engine
            .place_bet(slip(BetType::Moneyline, Some("HAWKS"), None, 5))
            .await
            .is_err());
        assert!(fx
            .engine
            .place_bet(slip(BetType::Moneyline, Some("HAWKS"), None, 2_000_000))
            .await
            .is_err());
        assert!(fx
            .engine
            .place_bet(slip(BetType::Moneyline, Some("BEARS"), None, 100))
            .await
            .is_err());
        assert!(fx
            .engine
            .place_bet(slip(BetType::Spread, Some("HAWKS"), None, 100))
            .await
            .is_err());
        assert!(fx
            .engine
            .place_bet(slip(BetType::TotalOver, None, None, 100))
            .await
            .is_err());

        let mut started = slip(BetType::Moneyline, Some("HAWKS"), None, 100);
        started.game_id = "game-2".to_string();
        assert!(fx.engine.place_bet(started).await.is_err());

        // A totals pick is ignored rather than rejected
        let totals = fx
            .engine
            .place_bet(slip(BetType::TotalOver, Some("HAWKS"), Some(220.5), 100))
            .await
            .unwrap();
        assert!(totals.pick.is_none());
    }

    #[tokio::test]
    async fn test_win_pooled_entirely_from_loser_wallet() {
        let dir = tempdir().unwrap();
        let fx = fixture(&dir).await;
        fx.games.insert(final_game("game-1", "HAWKS", "WOLVES", 98, 90));

        // Winner needs 150 but its own wallet is empty; the loser holds 200
        active_bet(&fx, "b-win", BetType::Moneyline, Some("HAWKS"), None, 100, 50, 0).await;
        let loser =
            active_bet(&fx, "b-loss", BetType::Moneyline, Some("WOLVES"), None, 200, 100, 200)
                .await;

        assert_eq!(fx.engine.settle_due_bets().await.unwrap(), 2);

        assert_eq!(fx.chain.balance_of("payout-b-win"), 150);
        assert_eq!(fx.chain.balance_of(&loser.escrow_address), 50);

        let house = HouseStore::new(&fx.storage);
        let win = house.bet("b-win").await.unwrap();
        let loss = house.bet("b-loss").await.unwrap();
        assert_eq!(win.status, BetStatus::Settled);
        assert_eq!(win.result, Some(BetResult::Win));
        assert!(win.payout_tx.is_some());
        assert_eq!(loss.status, BetStatus::Settled);
        assert_eq!(loss.result, Some(BetResult::Loss));
        assert!(house.unresolved_shortfalls().await.unwrap().is_empty());

        assert_eq!(fx.notifier.messages().len(), 2);
    }

    #[tokio::test]
    async fn test_win_draws_own_wallet_before_losers() {
        let dir = tempdir().unwrap();
        let fx = fixture(&dir).await;
        fx.games.insert(final_game("game-1", "HAWKS", "WOLVES", 98, 90));

        active_bet(&fx, "b-win", BetType::Moneyline, Some("HAWKS"), None, 100, 50, 100).await;
        let loser =
            active_bet(&fx, "b-loss", BetType::Moneyline, Some("WOLVES"), None, 200, 100, 200)
                .await;

        assert_eq!(fx.engine.settle_due_bets().await.unwrap(), 2);

        // 100 from its own wallet, the remaining 50 from the loser
        assert_eq!(fx.chain.balance_of("payout-b-win"), 150);
        assert_eq!(fx.chain.balance_of(&loser.escrow_address), 150);

        let win = HouseStore::new(&fx.storage).bet("b-win").await.unwrap();
        let refs = win.payout_tx.unwrap();
        assert_eq!(refs.split(',').count(), 2);
    }

    #[tokio::test]
    async fn test_uncovered_remainder_becomes_shortfall() {
        let dir = tempdir().unwrap();
        let fx = fixture(&dir).await;
        fx.games.insert(final_game("game-1", "HAWKS", "WOLVES", 98, 90));

        active_bet(&fx, "b-win", BetType::Moneyline, Some("HAWKS"), None, 100, 50, 0).await;
        active_bet(&fx, "b-loss", BetType::Moneyline, Some("WOLVES"), None, 200, 100, 60).await;

        assert_eq!(fx.engine.settle_due_bets().await.unwrap(), 2);

        assert_eq!(fx.chain.balance_of("payout-b-win"), 60);

        let house = HouseStore::new(&fx.storage);
        assert_eq!(
            house.bet("b-win").await.unwrap().status,
            BetStatus::Settled
        );

        let shortfalls = house.unresolved_shortfalls().await.unwrap();
        assert_eq!(shortfalls.len(), 1);
        assert_eq!(shortfalls[0].house_bet_id, "b-win");
        assert_eq!(shortfalls[0].amount, 90);
    }

    #[tokio::test]
    async fn test_multiple_winners_drain_losers_in_bet_id_order() {
        let dir = tempdir().unwrap();
        let fx = fixture(&dir).await;
        fx.games.insert(final_game("game-1", "HAWKS", "WOLVES", 98, 90));

        active_bet(&fx, "b-a", BetType::Moneyline, Some("HAWKS"), None, 60, 40, 0).await;
        active_bet(&fx, "b-b", BetType::Moneyline, Some("HAWKS"), None, 60, 40, 0).await;
        let loser =
            active_bet(&fx, "b-z", BetType::Moneyline, Some("WOLVES"), None, 200, 100, 150).await;

        assert_eq!(fx.engine.settle_due_bets().await.unwrap(), 3);

        // b-a drains the loser first; b-b gets what is left plus a marker
        // for the missing 50
        assert_eq!(fx.chain.balance_of("payout-b-a"), 100);
        assert_eq!(fx.chain.balance_of("payout-b-b"), 50);
        assert_eq!(fx.chain.balance_of(&loser.escrow_address), 0);

        let shortfalls = HouseStore::new(&fx.storage)
            .unresolved_shortfalls()
            .await
            .unwrap();
        assert_eq!(shortfalls.len(), 1);
        assert_eq!(shortfalls[0].house_bet_id, "b-b");
        assert_eq!(shortfalls[0].amount, 50);
    }

    #[tokio::test]
    async fn test_spread_loss_pays_nothing() {
        let dir = tempdir().unwrap();
        let fx = fixture(&dir).await;
        fx.games
            .insert(final_game("game-1", "HAWKS", "WOLVES", 110, 108));

        // Home -3.5 fails to cover a two-point win
        active_bet(
            &fx,
            "b1",
            BetType::Spread,
            Some("HAWKS"),
            Some(-3.5),
            100,
            90,
            100,
        )
        .await;

        assert_eq!(fx.engine.settle_due_bets().await.unwrap(), 1);

        assert_eq!(fx.chain.balance_of("payout-b1"), 0);
        let bet = HouseStore::new(&fx.storage).bet("b1").await.unwrap();
        assert_eq!(bet.status, BetStatus::Settled);
        assert_eq!(bet.result, Some(BetResult::Loss));
        assert!(bet.payout_tx.is_none());
    }

    #[tokio::test]
    async fn test_push_returns_stake_only() {
        let dir = tempdir().unwrap();
        let fx = fixture(&dir).await;
        fx.games
            .insert(final_game("game-1", "HAWKS", "WOLVES", 110, 108));

        // 110 - 2 lands exactly on 108
        active_bet(
            &fx,
            "b1",
            BetType::Spread,
            Some("HAWKS"),
            Some(-2.0),
            100,
            90,
            100,
        )
        .await;

        assert_eq!(fx.engine.settle_due_bets().await.unwrap(), 1);

        assert_eq!(fx.chain.balance_of("payout-b1"), 100);
        let bet = HouseStore::new(&fx.storage).bet("b1").await.unwrap();
        assert_eq!(bet.result, Some(BetResult::Push));
    }

    #[tokio::test]
    async fn test_cancelled_game_pushes_every_bet() {
        let dir = tempdir().unwrap();
        let fx = fixture(&dir).await;
        fx.games.insert(cancelled_game("game-1", "HAWKS", "WOLVES"));

        active_bet(&fx, "b1", BetType::Moneyline, Some("HAWKS"), None, 100, 150, 100).await;

        assert_eq!(fx.engine.settle_due_bets().await.unwrap(), 1);

        assert_eq!(fx.chain.balance_of("payout-b1"), 100);
        let bet = HouseStore::new(&fx.storage).bet("b1").await.unwrap();
        assert_eq!(bet.result, Some(BetResult::Push));
    }

    #[tokio::test]
    async fn test_final_game_without_scores_defers_grading() {
        let dir = tempdir().unwrap();
        let fx = fixture(&dir).await;

        let mut game = final_game("game-1", "HAWKS", "WOLVES", 0, 0);
        game.home_score = None;
        game.away_score = None;
        game.winner = None;
        fx.games.insert(game);

        active_bet(&fx, "b1", BetType::Moneyline, Some("HAWKS"), None, 100, 150, 100).await;

        assert_eq!(fx.engine.settle_due_bets().await.unwrap(), 0);
        assert!(fx.chain.sent().is_empty());
        assert_eq!(
            HouseStore::new(&fx.storage).bet("b1").await.unwrap().status,
            BetStatus::Active
        );
    }

    #[tokio::test]
    async fn test_failed_dispatch_keeps_batch_open_for_retry() {
        let dir = tempdir().unwrap();
        let fx = fixture(&dir).await;
        fx.games.insert(final_game("game-1", "HAWKS", "WOLVES", 98, 90));

        active_bet(&fx, "b-win", BetType::Moneyline, Some("HAWKS"), None, 100, 50, 100).await;
        let loser =
            active_bet(&fx, "b-loss", BetType::Moneyline, Some("WOLVES"), None, 200, 100, 200)
                .await;
        fx.chain.fail_sends_to("payout-b-win");

        // Nothing moved, so both bets stay ACTIVE
        assert_eq!(fx.engine.settle_due_bets().await.unwrap(), 0);
        let house = HouseStore::new(&fx.storage);
        assert_eq!(house.bet("b-win").await.unwrap().status, BetStatus::Active);
        assert_eq!(house.bet("b-loss").await.unwrap().status, BetStatus::Active);

        fx.chain.restore_sends_to("payout-b-win");
        assert_eq!(fx.engine.settle_due_bets().await.unwrap(), 2);

        assert_eq!(fx.chain.balance_of("payout-b-win"), 150);
        assert_eq!(fx.chain.balance_of(&loser.escrow_address), 150);
        assert_eq!(house.bet("b-win").await.unwrap().status, BetStatus::Settled);
        assert_eq!(house.bet("b-loss").await.unwrap().status, BetStatus::Settled);
        assert!(house.unresolved_shortfalls().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_dead_notifier_never_blocks_settlement() {
        let dir = tempdir().unwrap();
        let fx = fixture(&dir).await;
        fx.games.insert(final_game("game-1", "HAWKS", "WOLVES", 98, 90));
        fx.notifier.fail_all();

        active_bet(&fx, "b1", BetType::Moneyline, Some("HAWKS"), None, 100, 50, 150).await;

        assert_eq!(fx.engine.settle_due_bets().await.unwrap(), 1);

        assert_eq!(fx.chain.balance_of("payout-b1"), 150);
        assert_eq!(
            HouseStore::new(&fx.storage).bet("b1").await.unwrap().status,
            BetStatus::Settled
        );
        assert!(fx.notifier.messages().is_empty());
    }

    #[tokio::test]
    async fn test_settlement_skips_while_another_pass_holds_the_lease() {
        let dir = tempdir().unwrap();
        let fx = fixture(&dir).await;
        fx.games.insert(final_game("game-1", "HAWKS", "WOLVES", 98, 90));

        active_bet(&fx, "b1", BetType::Moneyline, Some("HAWKS"), None, 100, 50, 150).await;

        let locks = LockStore::new(&fx.storage);
        let holder = locks.try_acquire(SETTLE_RESOURCE, 60).await.unwrap().unwrap();

        assert_eq!(fx.engine.settle_due_bets().await.unwrap(), 0);
        assert!(fx.chain.sent().is_empty());

        locks.release(SETTLE_RESOURCE, &holder).await.unwrap();
        assert_eq!(fx.engine.settle_due_bets().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_expired_pending_bet_returns_partial_deposit() {
        let dir = tempdir().unwrap();
        let fx = fixture(&dir).await;

        let escrow = EscrowService::new(fx.chain.clone(), "test-passphrase", 0);
        let wallet = escrow.generate().unwrap();
        let bet = HouseBetRecord {
            id: "b1".to_string(),
            game_id: "game-1".to_string(),
            chat_id: "chat-1".to_string(),
            user_id: "alice".to_string(),
            bet_type: BetType::Moneyline,
            pick: Some("HAWKS".to_string()),
            odds: 150,
            line: None,
            amount: 100,
            potential_win: 150,
            status: BetStatus::Pending,
            result: None,
            escrow_address: wallet.address.clone(),
            encrypted_key: wallet.encrypted_key,
            payout_address: "addr-alice".to_string(),
            deposit_tx: None,
            payout_tx: None,
            created_at: Utc::now() - chrono::Duration::hours(2),
            settled_at: None,
        };
        HouseStore::new(&fx.storage).create_bet(&bet).await.unwrap();
        fx.chain.credit(&wallet.address, 40, "partial-1");

        assert_eq!(fx.engine.expire_pending_bets().await.unwrap(), 1);

        assert_eq!(fx.chain.balance_of("addr-alice"), 40);
        assert_eq!(fx.chain.balance_of(&wallet.address), 0);
        assert_eq!(
            HouseStore::new(&fx.storage).bet("b1").await.unwrap().status,
            BetStatus::Cancelled
        );
        assert_eq!(fx.notifier.messages().len(), 1);

        // Nothing pending remains for the next pass
        assert_eq!(fx.engine.expire_pending_bets().await.unwrap(), 0);
    }
}
