use crate::error::{CoreError, Result};
use serde::{Deserialize, Serialize};

/// Tunables for the settlement core. Amounts are in the chain's base units.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Wallet-daemon JSON-RPC endpoint used for balance/send/history calls.
    pub rpc_url: String,
    /// Endpoint serving game records as JSON.
    pub games_url: String,
    /// Optional webhook receiving chat notifications.
    pub notify_url: Option<String>,
    /// Address receiving fees, unclaimed pots and swept residue.
    pub treasury_address: String,
    /// Passphrase sealing escrow secret keys at rest.
    pub key_passphrase: String,
    /// Smallest deposit attributable to a wager.
    pub min_wager: u64,
    /// Largest amount credited to a single wager; excess stays in escrow.
    pub max_wager: u64,
    /// House fee on P2P pots, in basis points.
    pub fee_bps: u64,
    /// Smallest viable outgoing transfer; payouts below this are skipped.
    pub min_transfer: u64,
    /// Amount a wallet keeps back to fund its own send.
    pub tx_fee_reserve: u64,
    /// Chain minimum balance locked in every escrow wallet.
    pub rent_reserve: u64,
    /// Lease duration for settlement/reconciliation critical sections.
    pub lock_ttl_secs: u64,
    /// Signatures fetched per escrow address on each poll.
    pub deposit_poll_limit: usize,
    /// Seconds a PENDING house bet may wait for its deposit.
    pub pending_bet_ttl_secs: i64,
    /// Interval for the chain client's balance-event polling.
    pub event_poll_secs: u64,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            rpc_url: "http://localhost:8899".to_string(),
            games_url: "http://localhost:9090/games".to_string(),
            notify_url: None,
            treasury_address: String::new(),
            key_passphrase: String::new(),
            min_wager: 10_000_000,
            max_wager: 5_000_000_000,
            fee_bps: 100,
            min_transfer: 1_000_000,
            tx_fee_reserve: 5_000,
            rent_reserve: 890_880,
            lock_ttl_secs: 120,
            deposit_poll_limit: 20,
            pending_bet_ttl_secs: 1_800,
            event_poll_secs: 10,
        }
    }
}

impl CoreConfig {
    pub fn validate(&self) -> Result<()> {
        if self.rpc_url.is_empty() {
            return Err(CoreError::config("RPC URL cannot be empty"));
        }

        if self.treasury_address.is_empty() {
            return Err(CoreError::config("Treasury address cannot be empty"));
        }

        if self.key_passphrase.is_empty() {
            return Err(CoreError::config("Key passphrase cannot be empty"));
        }

        if self.min_wager == 0 {
            return Err(CoreError::config("Minimum wager must be greater than 0"));
        }

        if self.max_wager < self.min_wager {
            return Err(CoreError::config(
                "Maximum wager must not be below the minimum wager",
            ));
        }

        if self.fee_bps > 10_000 {
            return Err(CoreError::config("Fee cannot exceed 10000 basis points"));
        }

        if self.lock_ttl_secs == 0 {
            return Err(CoreError::config("Lock TTL must be greater than 0"));
        }

        Ok(())
    }
}
