use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum RoundStatus {
    Open,
    Locked,
    Settled,
    Cancelled,
}

impl RoundStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoundStatus::Open => "OPEN",
            RoundStatus::Locked => "LOCKED",
            RoundStatus::Settled => "SETTLED",
            RoundStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "OPEN" => Some(RoundStatus::Open),
            "LOCKED" => Some(RoundStatus::Locked),
            "SETTLED" => Some(RoundStatus::Settled),
            "CANCELLED" => Some(RoundStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BetStatus {
    Pending,
    Active,
    Settled,
    Cancelled,
}

impl BetStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BetStatus::Pending => "PENDING",
            BetStatus::Active => "ACTIVE",
            BetStatus::Settled => "SETTLED",
            BetStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "PENDING" => Some(BetStatus::Pending),
            "ACTIVE" => Some(BetStatus::Active),
            "SETTLED" => Some(BetStatus::Settled),
            "CANCELLED" => Some(BetStatus::Cancelled),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BetType {
    Moneyline,
    Spread,
    TotalOver,
    TotalUnder,
}

impl BetType {
    pub fn as_str(&self) -> &'static str {
        match self {
            BetType::Moneyline => "MONEYLINE",
            BetType::Spread => "SPREAD",
            BetType::TotalOver => "TOTAL_OVER",
            BetType::TotalUnder => "TOTAL_UNDER",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "MONEYLINE" => Some(BetType::Moneyline),
            "SPREAD" => Some(BetType::Spread),
            "TOTAL_OVER" => Some(BetType::TotalOver),
            "TOTAL_UNDER" => Some(BetType::TotalUnder),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BetResult {
    Win,
    Loss,
    Push,
}

impl BetResult {
    pub fn as_str(&self) -> &'static str {
        match self {
            BetResult::Win => "WIN",
            BetResult::Loss => "LOSS",
            BetResult::Push => "PUSH",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "WIN" => Some(BetResult::Win),
            "LOSS" => Some(BetResult::Loss),
            "PUSH" => Some(BetResult::Push),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GameStatus {
    Scheduled,
    InProgress,
    Final,
    Cancelled,
}

/// Read-only game record served by the external games/odds provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GameRecord {
    pub id: String,
    pub status: GameStatus,
    pub start_time: DateTime<Utc>,
    pub home_team: String,
    pub away_team: String,
    pub home_score: Option<i64>,
    pub away_score: Option<i64>,
    pub winner: Option<String>,
}

impl GameRecord {
    /// Score of the named team, if the team belongs to this game at all.
    pub fn score_of(&self, team: &str) -> Option<i64> {
        if team == self.home_team {
            self.home_score
        } else if team == self.away_team {
            self.away_score
        } else {
            None
        }
    }

    pub fn opponent_of(&self, team: &str) -> Option<&str> {
        if team == self.home_team {
            Some(&self.away_team)
        } else if team == self.away_team {
            Some(&self.home_team)
        } else {
            None
        }
    }
}

/// Balance-change notification delivered on the event path of the
/// deposit pipeline.
#[derive(Debug, Clone)]
pub struct BalanceChange {
    pub address: String,
    pub balance: u64,
}

/// One incoming transfer observed on an escrow address.
#[derive(Debug, Clone)]
pub struct IncomingTransfer {
    pub signature: String,
    pub amount: u64,
}
