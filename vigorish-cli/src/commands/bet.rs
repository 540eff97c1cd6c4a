use crate::commands::Services;
use clap::Subcommand;
use comfy_table::{presets::UTF8_FULL, Table};
use vigorish_core::storage::HouseStore;
use vigorish_core::{BetSlip, BetStatus, BetType, CoreError, Result};

#[derive(Subcommand)]
pub enum BetCommands {
    /// Place a fixed-odds bet against the house
    Place {
        /// Game identifier
        game_id: String,
        /// Chat the bet belongs to
        #[arg(short, long)]
        chat: String,
        /// User placing the bet
        #[arg(short, long)]
        user: String,
        /// Bet type (moneyline, spread, over, under)
        #[arg(short = 't', long = "type")]
        bet_type: String,
        /// Team the bet backs (moneyline and spread)
        #[arg(short, long)]
        pick: Option<String>,
        /// Point line (spread and totals)
        #[arg(short, long)]
        line: Option<f64>,
        /// American odds, e.g. +150 or -110
        #[arg(short, long, allow_hyphen_values = true)]
        odds: i64,
        /// Stake in base units
        #[arg(short, long)]
        amount: u64,
        /// Address receiving the payout
        #[arg(long)]
        payout: String,
    },
    /// List house bets
    List {
        /// Filter by status (pending, active, settled, cancelled)
        #[arg(short, long)]
        status: Option<String>,
    },
    /// Show a house bet
    Show {
        /// Bet identifier
        id: String,
    },
}

pub async fn handle_bet_command(cmd: BetCommands, services: &Services) -> Result<()> {
    match cmd {
        BetCommands::Place {
            game_id,
            chat,
            user,
            bet_type,
            pick,
            line,
            odds,
            amount,
            payout,
        } => {
            let bet = services
                .house
                .place_bet(BetSlip {
                    game_id,
                    chat_id: chat,
                    user_id: user,
                    bet_type: parse_bet_type(&bet_type)?,
                    pick,
                    odds,
                    line,
                    amount,
                    payout_address: payout,
                })
                .await?;

            println!("Bet {} placed.", bet.id);
            println!("  Stake: {}", bet.amount);
            println!("  To win: {}", bet.potential_win);
            println!();
            println!("Send your stake to the bet escrow:");
            println!("  {}", bet.escrow_address);
        }

        BetCommands::List { status } => {
            let store = HouseStore::new(&services.storage);
            let statuses = match status {
                Some(s) => vec![parse_bet_status(&s)?],
                None => vec![
                    BetStatus::Pending,
                    BetStatus::Active,
                    BetStatus::Settled,
                    BetStatus::Cancelled,
                ],
            };

            let mut bets = Vec::new();
            for status in statuses {
                bets.extend(store.bets_with_status(status).await?);
            }

            if bets.is_empty() {
                println!("No bets found.");
                return Ok(());
            }

            let mut table = Table::new();
            table.load_preset(UTF8_FULL);
            table.set_header(vec![
                "ID", "Game", "User", "Type", "Pick", "Odds", "Stake", "Status", "Result",
            ]);

            for bet in bets {
                table.add_row(vec![
                    bet.id.clone(),
                    bet.game_id.clone(),
                    bet.user_id.clone(),
                    bet.bet_type.as_str().to_string(),
                    bet.pick.clone().unwrap_or_else(|| "-".to_string()),
                    format!("{:+}", bet.odds),
                    bet.amount.to_string(),
                    bet.status.as_str().to_string(),
                    bet.result
                        .map(|r| r.as_str().to_string())
                        .unwrap_or_else(|| "-".to_string()),
                ]);
            }

            println!("{}", table);
        }

        BetCommands::Show { id } => {
            let bet = HouseStore::new(&services.storage).bet(&id).await?;

            println!("Bet Information:");
            println!("  ID: {}", bet.id);
            println!("  Game: {}", bet.game_id);
            println!("  Chat: {}", bet.chat_id);
            println!("  User: {}", bet.user_id);
            println!("  Type: {}", bet.bet_type.as_str());
            if let Some(pick) = &bet.pick {
                println!("  Pick: {}", pick);
            }
            if let Some(line) = bet.line {
                println!("  Line: {:+}", line);
            }
            println!("  Odds: {:+}", bet.odds);
            println!("  Stake: {}", bet.amount);
            println!("  To win: {}", bet.potential_win);
            println!("  Status: {}", bet.status.as_str());
            if let Some(result) = bet.result {
                println!("  Result: {}", result.as_str());
            }
            println!();
            println!("Addresses:");
            println!("  Escrow: {}", bet.escrow_address);
            println!("  Payout: {}", bet.payout_address);
            if let Some(deposit_tx) = &bet.deposit_tx {
                println!("  Deposit tx: {}", deposit_tx);
            }
            if let Some(payout_tx) = &bet.payout_tx {
                println!("  Payout tx: {}", payout_tx);
            }
        }
    }

    Ok(())
}

fn parse_bet_type(bet_type: &str) -> Result<BetType> {
    match bet_type.to_lowercase().as_str() {
        "moneyline" | "ml" => Ok(BetType::Moneyline),
        "spread" => Ok(BetType::Spread),
        "over" => Ok(BetType::TotalOver),
        "under" => Ok(BetType::TotalUnder),
        _ => Err(CoreError::config(format!(
            "Invalid bet type: {}. Supported types: moneyline, spread, over, under",
            bet_type
        ))),
    }
}

fn parse_bet_status(status: &str) -> Result<BetStatus> {
    match status.to_lowercase().as_str() {
        "pending" => Ok(BetStatus::Pending),
        "active" => Ok(BetStatus::Active),
        "settled" => Ok(BetStatus::Settled),
        "cancelled" => Ok(BetStatus::Cancelled),
        _ => Err(CoreError::config(format!(
            "Invalid status: {}. Supported statuses: pending, active, settled, cancelled",
            status
        ))),
    }
}
