//! Vigorish - Core settlement library for escrow-backed sports wagering
//!
//! This library manages pooled peer rounds and fixed-odds house bets, with
//! one escrow wallet per position, idempotent deposit crediting, and
//! lease-guarded settlement passes that are safe to retry.

pub mod chain;
pub mod config;
pub mod error;
pub mod escrow;
pub mod games;
pub mod house;
pub mod notify;
pub mod reconcile;
pub mod rounds;
pub mod storage;
pub mod sweep;
pub mod types;

#[cfg(test)]
pub mod testing;

pub use chain::{ChainClient, RpcChainClient};
pub use config::CoreConfig;
pub use error::{CoreError, Result};
pub use escrow::{EscrowService, EscrowWallet};
pub use games::{GameProvider, HttpGameProvider};
pub use house::{BetSlip, HouseEngine};
pub use notify::{Notifier, NullNotifier, WebhookNotifier};
pub use reconcile::DepositPipeline;
pub use rounds::{PlacedWager, RoundEngine};
pub use storage::Storage;
pub use sweep::ResidueSweeper;
pub use types::{
    BalanceChange, BetResult, BetStatus, BetType, GameRecord, GameStatus, IncomingTransfer,
    RoundStatus,
};

pub use chrono::{DateTime, Utc};
