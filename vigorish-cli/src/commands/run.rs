use crate::commands::Services;
use std::time::Duration;
use vigorish_core::Result;

/// Run the settlement daemon: the deposit pipeline plus a periodic pass
/// over expiries, settlement and sweeping. Stops on Ctrl-C.
pub async fn handle_run_command(services: &Services) -> Result<()> {
    services.pipeline.start().await?;
    println!("Settlement daemon running. Press Ctrl-C to stop.");

    let mut tick =
        tokio::time::interval(Duration::from_secs(services.config.event_poll_secs.max(1)));
    // A pass may outlast the tick; do not replay the backlog
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = tick.tick() => {
                if let Err(e) = run_pass(services).await {
                    tracing::warn!("Settlement pass failed: {}", e);
                }
            }
            _ = tokio::signal::ctrl_c() => break,
        }
    }

    println!();
    println!("Stopping...");
    services.pipeline.shutdown().await?;
    println!("Daemon stopped.");
    Ok(())
}

async fn run_pass(services: &Services) -> Result<()> {
    services.pipeline.sync_subscriptions().await?;
    services.pipeline.poll_deposits().await?;
    services.rounds.lock_started_rounds().await?;
    services.rounds.expire_unfunded_rounds().await?;
    services.rounds.settle_due_rounds().await?;
    services.house.settle_due_bets().await?;
    services.house.expire_pending_bets().await?;
    services.sweeper.sweep().await?;
    Ok(())
}
