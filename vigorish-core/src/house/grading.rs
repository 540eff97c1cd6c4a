//! Bet-type-specific grading of a house bet against a finished game.

use crate::storage::house_store::HouseBetRecord;
use crate::types::{BetResult, BetType, GameRecord};

/// Profit on a winning stake at American odds, rounded down. Positive odds
/// quote profit per 100 staked, negative odds the stake per 100 of profit.
pub fn potential_win(stake: u64, odds: i64) -> u64 {
    if odds > 0 {
        ((stake as u128 * odds as u128) / 100) as u64
    } else if odds < 0 {
        ((stake as u128 * 100) / odds.unsigned_abs() as u128) as u64
    } else {
        0
    }
}

/// Grade one bet. None means the game's numbers are not usable yet and
/// grading is deferred to a later pass.
pub fn grade(bet: &HouseBetRecord, game: &GameRecord) -> Option<BetResult> {
    match bet.bet_type {
        BetType::Moneyline => grade_moneyline(bet, game),
        BetType::Spread => grade_spread(bet, game),
        BetType::TotalOver | BetType::TotalUnder => grade_total(bet, game),
    }
}

fn grade_moneyline(bet: &HouseBetRecord, game: &GameRecord) -> Option<BetResult> {
    if game.home_score.is_none() || game.away_score.is_none() {
        return None;
    }
    let pick = bet.pick.as_deref()?;

    Some(match game.winner.as_deref() {
        Some(winner) if winner == pick => BetResult::Win,
        Some(_) => BetResult::Loss,
        // Scores are in but level: a drawn game pushes
        None => BetResult::Push,
    })
}

/// The line is added to the picked side's score and the sum compared with
/// the opponent's raw score. Landing exactly on the line is a push.
fn grade_spread(bet: &HouseBetRecord, game: &GameRecord) -> Option<BetResult> {
    let pick = bet.pick.as_deref()?;
    let line = bet.line?;
    let picked_score = game.score_of(pick)?;
    let opponent = game.opponent_of(pick)?;
    let opponent_score = game.score_of(opponent)?;

    Some(compare(
        picked_score as f64 + line,
        opponent_score as f64,
    ))
}

fn grade_total(bet: &HouseBetRecord, game: &GameRecord) -> Option<BetResult> {
    let line = bet.line?;
    let combined = (game.home_score? + game.away_score?) as f64;

    Some(match bet.bet_type {
        BetType::TotalOver => compare(combined, line),
        _ => compare(line, combined),
    })
}

fn compare(ours: f64, theirs: f64) -> BetResult {
    if ours > theirs {
        BetResult::Win
    } else if ours < theirs {
        BetResult::Loss
    } else {
        BetResult::Push
    }
}
