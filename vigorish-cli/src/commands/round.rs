use crate::commands::Services;
use clap::Subcommand;
use comfy_table::{presets::UTF8_FULL, Table};
use vigorish_core::storage::RoundStore;
use vigorish_core::{CoreError, Result, RoundStatus};

#[derive(Subcommand)]
pub enum RoundCommands {
    /// Place a wager in a game's pooled round
    Place {
        /// Game identifier
        game_id: String,
        /// Chat the round belongs to
        #[arg(short, long)]
        chat: String,
        /// User placing the wager
        #[arg(short, long)]
        user: String,
        /// Team the wager backs
        #[arg(short, long)]
        pick: String,
        /// Address receiving the payout
        #[arg(long)]
        payout: String,
    },
    /// List rounds
    List {
        /// Filter by status (open, locked, settled, cancelled)
        #[arg(short, long)]
        status: Option<String>,
    },
    /// Show a round and its wagers
    Show {
        /// Round identifier
        id: String,
    },
}

pub async fn handle_round_command(cmd: RoundCommands, services: &Services) -> Result<()> {
    match cmd {
        RoundCommands::Place {
            game_id,
            chat,
            user,
            pick,
            payout,
        } => {
            let placed = services
                .rounds
                .place_wager(&game_id, &chat, &user, &pick, &payout)
                .await?;

            if placed.already_placed {
                println!("You already hold a wager in round {}.", placed.round_id);
            } else if placed.new_round {
                println!("Opened round {} and placed your wager.", placed.round_id);
            } else {
                println!("Wager placed in round {}.", placed.round_id);
            }
            println!("  Wager ID: {}", placed.wager_id);
            println!();
            println!("Send your stake to the round escrow:");
            println!("  {}", placed.escrow_address);
        }

        RoundCommands::List { status } => {
            let store = RoundStore::new(&services.storage);
            let statuses = match status {
                Some(s) => vec![parse_round_status(&s)?],
                None => vec![
                    RoundStatus::Open,
                    RoundStatus::Locked,
                    RoundStatus::Settled,
                    RoundStatus::Cancelled,
                ],
            };

            let mut rounds = Vec::new();
            for status in statuses {
                rounds.extend(store.rounds_with_status(status).await?);
            }

            if rounds.is_empty() {
                println!("No rounds found.");
                return Ok(());
            }

            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_header(vec!["ID", "Game", "Chat", "Status", "Pot", "Expires"]);

            for round in rounds {
                table.add_row(vec![
                    round.id.clone(),
                    round.game_id.clone(),
                    round.chat_id.clone(),
                    round.status.as_str().to_string(),
                    round.total_pot.to_string(),
                    round.expires_at.format("%Y-%m-%d %H:%M UTC").to_string(),
                ]);
            }

            println!("{}", table);
        }

        RoundCommands::Show { id } => {
            let store = RoundStore::new(&services.storage);
            let round = store.round(&id).await?;
            let wagers = store.wagers_for_round(&id).await?;

            println!("Round Information:");
            println!("  ID: {}", round.id);
            println!("  Game: {}", round.game_id);
            println!("  Chat: {}", round.chat_id);
            println!("  Status: {}", round.status.as_str());
            println!("  Escrow: {}", round.escrow_address);
            println!("  Pot: {}", round.total_pot);
            if let Some(fee_tx) = &round.fee_tx {
                println!("  Fee tx: {}", fee_tx);
            }
            println!(
                "  Expires: {}",
                round.expires_at.format("%Y-%m-%d %H:%M UTC")
            );
            if let Some(settled_at) = round.settled_at {
                println!("  Settled: {}", settled_at.format("%Y-%m-%d %H:%M UTC"));
            }

            if wagers.is_empty() {
                println!();
                println!("No wagers yet.");
                return Ok(());
            }

            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_header(vec!["User", "Pick", "Amount", "Funded", "Payout"]);

            for wager in wagers {
                let funded = if wager.deposit_tx.is_some() { "yes" } else { "no" };
                let payout = if wager.paid_out {
                    wager.payout_tx.clone().unwrap_or_else(|| "skipped".to_string())
                } else {
                    "-".to_string()
                };
                table.add_row(vec![
                    wager.user_id.clone(),
                    wager.team_pick.clone(),
                    wager.amount.to_string(),
                    funded.to_string(),
                    payout,
                ]);
            }

            println!();
            println!("{}", table);
        }
    }

    Ok(())
}

fn parse_round_status(status: &str) -> Result<RoundStatus> {
    match status.to_lowercase().as_str() {
        "open" => Ok(RoundStatus::Open),
        "locked" => Ok(RoundStatus::Locked),
        "settled" => Ok(RoundStatus::Settled),
        "cancelled" => Ok(RoundStatus::Cancelled),
        _ => Err(CoreError::config(format!(
            "Invalid status: {}. Supported statuses: open, locked, settled, cancelled",
            status
        ))),
    }
}
