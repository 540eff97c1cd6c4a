pub mod bet;
pub mod round;
pub mod run;
pub mod settle;

pub use bet::{handle_bet_command, BetCommands};
pub use round::{handle_round_command, RoundCommands};
pub use run::handle_run_command;
pub use settle::{handle_settle_command, SettleCommands};

use std::sync::Arc;
use vigorish_core::{
    CoreConfig, DepositPipeline, HouseEngine, ResidueSweeper, RoundEngine, Storage,
};

/// Everything a command handler needs, built once at startup.
pub struct Services {
    pub storage: Arc<Storage>,
    pub pipeline: Arc<DepositPipeline>,
    pub rounds: RoundEngine,
    pub house: HouseEngine,
    pub sweeper: ResidueSweeper,
    pub config: CoreConfig,
}
