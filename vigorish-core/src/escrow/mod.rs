pub mod encryption;

use crate::chain::ChainClient;
use crate::error::{CoreError, Result};
use crate::types::IncomingTransfer;
use ed25519_dalek::SigningKey;
use rand::rngs::OsRng;
use std::sync::Arc;

/// A freshly generated single-use wallet. The secret key only ever exists
/// sealed; the address is the hex-encoded public key.
#[derive(Debug, Clone)]
pub struct EscrowWallet {
    pub address: String,
    pub encrypted_key: Vec<u8>,
}

/// Custodial wallet operations for rounds and house bets. Keys are sealed
/// under the operator passphrase at generation and opened only for the
/// duration of a send.
pub struct EscrowService {
    chain: Arc<dyn ChainClient>,
    passphrase: String,
    rent_reserve: u64,
}

impl EscrowService {
    pub fn new(chain: Arc<dyn ChainClient>, passphrase: &str, rent_reserve: u64) -> Self {
        Self {
            chain,
            passphrase: passphrase.to_string(),
            rent_reserve,
        }
    }

    pub fn generate(&self) -> Result<EscrowWallet> {
        let signing_key = SigningKey::generate(&mut OsRng);
        let address = hex::encode(signing_key.verifying_key().to_bytes());
        let encrypted_key = encryption::seal_key(&signing_key.to_bytes(), &self.passphrase)?;

        Ok(EscrowWallet {
            address,
            encrypted_key,
        })
    }

    pub async fn balance(&self, address: &str) -> Result<u64> {
        self.chain.balance(address).await
    }

    /// What settlement may actually move: the live balance less the chain's
    /// rent reserve that must stay behind in the wallet.
    pub async fn spendable(&self, address: &str) -> Result<u64> {
        let balance = self.chain.balance(address).await?;
        Ok(balance.saturating_sub(self.rent_reserve))
    }

    pub async fn send(&self, encrypted_key: &[u8], to: &str, amount: u64) -> Result<String> {
        let secret = encryption::open_key(encrypted_key, &self.passphrase)?;
        let bytes: [u8; 32] = secret
            .as_slice()
            .try_into()
            .map_err(|_| CoreError::crypto("Escrow key has unexpected length"))?;
        let signing_key = SigningKey::from_bytes(&bytes);

        self.chain.send(&signing_key, to, amount).await
    }

    pub async fn recent_incoming(
        &self,
        address: &str,
        limit: usize,
    ) -> Result<Vec<IncomingTransfer>> {
        self.chain.recent_incoming(address, limit).await
    }
}
