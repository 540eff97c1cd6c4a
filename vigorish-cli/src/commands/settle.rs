use crate::commands::Services;
use clap::Subcommand;
use comfy_table::{presets::UTF8_FULL, Table};
use dialoguer::Confirm;
use vigorish_core::storage::HouseStore;
use vigorish_core::{CoreError, Result};

#[derive(Subcommand)]
pub enum SettleCommands {
    /// Run a single reconciliation and settlement pass
    Once,
    /// List unresolved treasury shortfalls
    Shortfalls,
    /// Mark a treasury shortfall as resolved
    Resolve {
        /// Shortfall identifier
        id: String,
        /// Skip confirmation prompt
        #[arg(short, long)]
        force: bool,
    },
}

pub async fn handle_settle_command(cmd: SettleCommands, services: &Services) -> Result<()> {
    match cmd {
        SettleCommands::Once => {
            println!("Running settlement pass...");

            let deposits = services.pipeline.poll_deposits().await?;
            let locked = services.rounds.lock_started_rounds().await?;
            let expired = services.rounds.expire_unfunded_rounds().await?;
            let rounds = services.rounds.settle_due_rounds().await?;
            let bets = services.house.settle_due_bets().await?;
            let lapsed = services.house.expire_pending_bets().await?;
            let swept = services.sweeper.sweep().await?;

            println!("  Deposits credited: {}", deposits);
            println!("  Rounds locked: {}", locked);
            println!("  Rounds expired unfunded: {}", expired);
            println!("  Rounds settled: {}", rounds);
            println!("  Bets settled: {}", bets);
            println!("  Bets expired unfunded: {}", lapsed);
            println!("  Residue swept: {}", swept);
        }

        SettleCommands::Shortfalls => {
            let shortfalls = HouseStore::new(&services.storage)
                .unresolved_shortfalls()
                .await?;

            if shortfalls.is_empty() {
                println!("No unresolved shortfalls.");
                return Ok(());
            }

            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_header(vec!["ID", "Bet", "Amount", "Recorded"]);

            for shortfall in shortfalls {
                table.add_row(vec![
                    shortfall.id.clone(),
                    shortfall.house_bet_id.clone(),
                    shortfall.amount.to_string(),
                    shortfall.created_at.format("%Y-%m-%d %H:%M UTC").to_string(),
                ]);
            }

            println!("{}", table);
            println!();
            println!("Settle each amount from the treasury, then mark it resolved with:");
            println!("  vigorish settle resolve <id>");
        }

        SettleCommands::Resolve { id, force } => {
            if !force {
                let confirm = Confirm::new()
                    .with_prompt(format!(
                        "Mark shortfall '{}' as resolved? The owed amount must already have been paid out manually.",
                        id
                    ))
                    .default(false)
                    .interact()
                    .map_err(|e| CoreError::internal(e.to_string()))?;

                if !confirm {
                    println!("Cancelled.");
                    return Ok(());
                }
            }

            HouseStore::new(&services.storage).resolve_shortfall(&id).await?;
            println!("Shortfall '{}' marked resolved.", id);
        }
    }

    Ok(())
}
