use std::sync::Arc;
use tempfile::tempdir;
use vigorish_core::{
    ChainClient, CoreConfig, EscrowService, GameProvider, HttpGameProvider, Notifier,
    NullNotifier, RoundEngine, RpcChainClient, Storage,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    // Create temp dir
    let temp_dir = tempdir()?;
    println!("Using temporary directory: {:?}", temp_dir.path());

    let config = CoreConfig::default();
    println!("Wallet daemon: {}", config.rpc_url);
    println!("Games service: {}", config.games_url);

    let storage = Arc::new(Storage::new(&temp_dir.path().join("vigorish.db")).await?);

    let chain: Arc<dyn ChainClient> =
        Arc::new(RpcChainClient::new(&config.rpc_url, config.event_poll_secs));
    let escrow = Arc::new(EscrowService::new(
        chain.clone(),
        &config.key_passphrase,
        config.rent_reserve,
    ));

    // Key generation is local, no daemon needed
    println!("\nGenerating an escrow wallet...");
    let wallet = escrow.generate()?;
    println!("Escrow address: {}", wallet.address);

    let games: Arc<dyn GameProvider> = Arc::new(HttpGameProvider::new(&config.games_url));
    let notifier: Arc<dyn Notifier> = Arc::new(NullNotifier);
    let rounds = RoundEngine::new(storage, escrow, games, notifier, config);

    println!("\nPlacing a wager (requires the games service)...");
    let placed = rounds
        .place_wager("game-1", "chat-demo", "alice", "HAWKS", "demo-payout-address")
        .await?;

    println!("Wager placed!");
    println!("Round ID: {}", placed.round_id);
    println!("Wager ID: {}", placed.wager_id);
    println!("New round: {}", placed.new_round);
    println!("\nSend your stake to the round escrow:");
    println!("{}", placed.escrow_address);

    println!("\nExample completed successfully!");

    Ok(())
}
