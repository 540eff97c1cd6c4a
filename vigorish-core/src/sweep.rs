use crate::config::CoreConfig;
use crate::error::Result;
use crate::escrow::EscrowService;
use crate::storage::{HouseStore, LockStore, RoundStore, Storage};
use crate::types::{BetStatus, RoundStatus};
use std::sync::Arc;

/// Moves leftover escrow balances into the treasury. Residue accumulates
/// from flagged dust payouts, floor remainders, deposits that arrive after
/// a round closes, and refunds that could not be delivered.
pub struct ResidueSweeper {
    storage: Arc<Storage>,
    escrow: Arc<EscrowService>,
    config: CoreConfig,
}

impl ResidueSweeper {
    pub fn new(storage: Arc<Storage>, escrow: Arc<EscrowService>, config: CoreConfig) -> Self {
        Self {
            storage,
            escrow,
            config,
        }
    }

    /// Drain every closed round and bet escrow that still holds at least
    /// the minimum transfer. Returns the total amount moved.
    pub async fn sweep(&self) -> Result<u64> {
        let mut total = self.sweep_rounds().await?;
        total += self.sweep_bets().await?;

        if total > 0 {
            tracing::info!("Swept {} of escrow residue into the treasury", total);
        }
        Ok(total)
    }

    async fn sweep_rounds(&self) -> Result<u64> {
        let rounds = RoundStore::new(&self.storage);
        let mut total = 0;

        for status in [RoundStatus::Settled, RoundStatus::Cancelled] {
            for round in rounds.rounds_with_status(status).await? {
                match self
                    .drain_wallet(&round.escrow_address, &round.encrypted_key)
                    .await
                {
                    Ok(Some(amount)) => {
                        tracing::info!("Swept {} left in round {}", amount, round.id);
                        total += amount;
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!("Sweep of round {} failed: {}", round.id, e),
                }
            }
        }
        Ok(total)
    }

    async fn sweep_bets(&self) -> Result<u64> {
        let house = HouseStore::new(&self.storage);
        let mut total = 0;

        for status in [BetStatus::Settled, BetStatus::Cancelled] {
            for bet in house.bets_with_status(status).await? {
                match self
                    .drain_wallet(&bet.escrow_address, &bet.encrypted_key)
                    .await
                {
                    Ok(Some(amount)) => {
                        tracing::info!("Swept {} left in bet {}", amount, bet.id);
                        total += amount;
                    }
                    Ok(None) => {}
                    Err(e) => tracing::warn!("Sweep of bet {} failed: {}", bet.id, e),
                }
            }
        }
        Ok(total)
    }

    /// Send a wallet's spendable balance to the treasury under the escrow
    /// lease. Returns `None` when the balance is below the minimum transfer
    /// or the lease is held elsewhere.
    async fn drain_wallet(&self, address: &str, encrypted_key: &[u8]) -> Result<Option<u64>> {
        let locks = LockStore::new(&self.storage);
        let resource = format!("escrow:{}", address);

        let outcome = locks
            .run_exclusive(&resource, self.config.lock_ttl_secs, || async {
                let spendable = self.escrow.spendable(address).await?;
                if spendable < self.config.min_transfer {
                    return Ok(None);
                }

                let signature = self
                    .escrow
                    .send(encrypted_key, &self.config.treasury_address, spendable)
                    .await?;
                tracing::debug!("Sweep transfer of {} from {} (tx {})", spendable, address, signature);
                Ok(Some(spendable))
            })
            .await?;

        Ok(outcome.completed().flatten())
    }
}
