//! Win/loss statistics and tiering over trade outcomes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::domain::simulator::{Outcome, TradeOutcome};

/// Approximate trading days per year used to annualize trade counts.
pub const TRADING_DAYS_PER_YEAR: f64 = 252.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Tier {
    S,
    A,
    B,
    C,
}

impl Tier {
    /// S needs avg R >= 0.30 and >= 50 trades a year, A needs 0.20 and 30,
    /// B needs avg R >= 0.10. Everything else is C.
    pub fn classify(avg_r: f64, annual_trades: f64) -> Self {
        if avg_r >= 0.30 && annual_trades >= 50.0 {
            Tier::S
        } else if avg_r >= 0.20 && annual_trades >= 30.0 {
            Tier::A
        } else if avg_r >= 0.10 {
            Tier::B
        } else {
            Tier::C
        }
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Tier::S => "S",
            Tier::A => "A",
            Tier::B => "B",
            Tier::C => "C",
        };
        write!(f, "{s}")
    }
}

impl FromStr for Tier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "S" => Ok(Tier::S),
            "A" => Ok(Tier::A),
            "B" => Ok(Tier::B),
            "C" => Ok(Tier::C),
            other => Err(format!("unknown tier `{other}` (expected S, A, B or C)")),
        }
    }
}

/// NO_TRADE outcomes are counted but never enter win rate or R statistics.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PerformanceSummary {
    pub trades: usize,
    pub wins: usize,
    pub losses: usize,
    pub no_trades: usize,
    pub win_rate: f64,
    pub avg_r: f64,
    pub total_r: f64,
    pub annual_trades: f64,
    pub tier: Tier,
}

impl PerformanceSummary {
    /// Summarize `outcomes` observed over `trading_days` trading days.
    pub fn from_outcomes<'a, I>(outcomes: I, trading_days: usize) -> Self
    where
        I: IntoIterator<Item = &'a TradeOutcome>,
    {
        let mut wins = 0;
        let mut losses = 0;
        let mut no_trades = 0;
        let mut total_r = 0.0;
        for outcome in outcomes {
            match outcome.outcome {
                Outcome::Win => wins += 1,
                Outcome::Loss => losses += 1,
                Outcome::NoTrade => {
                    no_trades += 1;
                    continue;
                }
            }
            total_r += outcome.r_multiple.unwrap_or(0.0);
        }

        let trades = wins + losses;
        let (win_rate, avg_r) = if trades > 0 {
            (wins as f64 / trades as f64, total_r / trades as f64)
        } else {
            (0.0, 0.0)
        };
        let annual_trades = if trading_days > 0 {
            trades as f64 * TRADING_DAYS_PER_YEAR / trading_days as f64
        } else {
            0.0
        };

        Self {
            trades,
            wins,
            losses,
            no_trades,
            win_rate,
            avg_r,
            total_r,
            annual_trades,
            tier: Tier::classify(avg_r, annual_trades),
        }
    }
}
