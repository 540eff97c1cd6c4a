mod commands;
mod config;

use clap::{Parser, Subcommand};
use config::CliConfig;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use vigorish_core::{
    ChainClient, CoreError, DepositPipeline, EscrowService, GameProvider, HouseEngine,
    HttpGameProvider, Notifier, NullNotifier, ResidueSweeper, RoundEngine, RpcChainClient,
    Storage, WebhookNotifier,
};

#[derive(Parser)]
#[command(name = "vigorish")]
#[command(about = "Vigorish - escrow-backed wager settlement")]
#[command(version)]
struct Cli {
    /// Data directory for the settlement database
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Path to a JSON config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Pooled round commands
    #[command(subcommand)]
    Round(commands::RoundCommands),

    /// House bet commands
    #[command(subcommand)]
    Bet(commands::BetCommands),

    /// Settlement and treasury commands
    #[command(subcommand)]
    Settle(commands::SettleCommands),

    /// Run the settlement daemon
    Run,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(format!(
            "vigorish_core={},vigorish_cli={}",
            log_level, log_level
        )))
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let mut config = CliConfig::load(cli.config.as_deref()).await?;
    if let Some(data_dir) = cli.data_dir {
        config.data_dir = data_dir;
    }

    // Ensure data directory exists
    tokio::fs::create_dir_all(&config.data_dir).await?;

    let services = build_services(&config).await?;

    // Execute command
    let result = match cli.command {
        Commands::Round(cmd) => commands::handle_round_command(cmd, &services).await,
        Commands::Bet(cmd) => commands::handle_bet_command(cmd, &services).await,
        Commands::Settle(cmd) => commands::handle_settle_command(cmd, &services).await,
        Commands::Run => commands::handle_run_command(&services).await,
    };

    if let Err(e) = result {
        match e {
            CoreError::RoundNotFound { id } => {
                eprintln!("Error: Round '{}' not found", id);
                eprintln!("Use 'vigorish round list' to see known rounds");
            }
            CoreError::BetNotFound { id } => {
                eprintln!("Error: Bet '{}' not found", id);
                eprintln!("Use 'vigorish bet list' to see known bets");
            }
            CoreError::InsufficientFunds { need, available } => {
                eprintln!("Error: Insufficient funds");
                eprintln!("Need: {}, Available: {}", need, available);
            }
            CoreError::Config(msg) => {
                eprintln!("Configuration error: {}", msg);
            }
            _ => {
                eprintln!("Error: {}", e);
            }
        }
        std::process::exit(1);
    }

    Ok(())
}

async fn build_services(config: &CliConfig) -> vigorish_core::Result<commands::Services> {
    config.core.validate()?;

    let storage = Arc::new(Storage::new(&config.data_dir.join("vigorish.db")).await?);
    let chain: Arc<dyn ChainClient> = Arc::new(RpcChainClient::new(
        &config.core.rpc_url,
        config.core.event_poll_secs,
    ));
    let escrow = Arc::new(EscrowService::new(
        chain.clone(),
        &config.core.key_passphrase,
        config.core.rent_reserve,
    ));
    let games: Arc<dyn GameProvider> = Arc::new(HttpGameProvider::new(&config.core.games_url));
    let notifier: Arc<dyn Notifier> = match &config.core.notify_url {
        Some(url) => Arc::new(WebhookNotifier::new(url)),
        None => Arc::new(NullNotifier),
    };

    let pipeline = Arc::new(DepositPipeline::new(
        storage.clone(),
        chain,
        config.core.clone(),
    ));
    let rounds = RoundEngine::new(
        storage.clone(),
        escrow.clone(),
        games.clone(),
        notifier.clone(),
        config.core.clone(),
    );
    let house = HouseEngine::new(
        storage.clone(),
        escrow.clone(),
        games,
        notifier,
        config.core.clone(),
    );
    let sweeper = ResidueSweeper::new(storage.clone(), escrow, config.core.clone());

    Ok(commands::Services {
        storage,
        pipeline,
        rounds,
        house,
        sweeper,
        config: config.core.clone(),
    })
}
