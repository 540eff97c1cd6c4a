pub mod rpc;

pub use rpc::RpcChainClient;

use crate::error::Result;
use crate::types::{BalanceChange, IncomingTransfer};
use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use tokio::sync::mpsc;

/// Chain access the settlement core depends on. Transaction construction
/// stays behind this trait; the core only ever asks for balances, transfer
/// listings and "send amount X to address A".
#[async_trait]
pub trait ChainClient: Send + Sync {
    /// Current balance of an address in base units.
    async fn balance(&self, address: &str) -> Result<u64>;

    /// Move `amount` from the signer's wallet to `to`, returning the
    /// transaction signature.
    async fn send(&self, from: &SigningKey, to: &str, amount: u64) -> Result<String>;

    /// Most recent incoming transfers to an address, newest first.
    async fn recent_incoming(&self, address: &str, limit: usize)
        -> Result<Vec<IncomingTransfer>>;

    /// Start pushing balance changes for `address` into `events`.
    /// Returns a subscription id for `unsubscribe`.
    async fn subscribe(
        &self,
        address: &str,
        events: mpsc::UnboundedSender<BalanceChange>,
    ) -> Result<u64>;

    async fn unsubscribe(&self, subscription_id: u64) -> Result<()>;
}
