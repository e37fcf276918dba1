//! Breakout trade simulation.
//!
//! Walks the bars after an opening range through
//! `AwaitingBreakout -> InTrade -> {Win, Loss, NoTrade}`.
//!
//! Rules:
//! - Entry is the close of the first bar closing strictly outside the range.
//! - Stop is the opposite edge (FULL) or the midpoint (HALF).
//! - A bar whose range reaches both stop and target resolves as a LOSS.
//! - No resolution before the scan end is a NO_TRADE time exit; the trade is
//!   never force-closed at an arbitrary price.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::bar::Bar;
use crate::domain::error::OrbError;
use crate::domain::orb::OrbWindow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum StopMode {
    Full,
    Half,
}

impl fmt::Display for StopMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StopMode::Full => write!(f, "FULL"),
            StopMode::Half => write!(f, "HALF"),
        }
    }
}

impl FromStr for StopMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "FULL" => Ok(StopMode::Full),
            "HALF" => Ok(StopMode::Half),
            other => Err(format!("unknown stop mode `{other}` (expected FULL or HALF)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Direction {
    Up,
    Down,
    None,
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Up => write!(f, "UP"),
            Direction::Down => write!(f, "DOWN"),
            Direction::None => write!(f, "NONE"),
        }
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "UP" | "LONG" => Ok(Direction::Up),
            "DOWN" | "SHORT" => Ok(Direction::Down),
            "NONE" => Ok(Direction::None),
            other => Err(format!("unknown direction `{other}`")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Outcome {
    Win,
    Loss,
    NoTrade,
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Outcome::Win => write!(f, "WIN"),
            Outcome::Loss => write!(f, "LOSS"),
            Outcome::NoTrade => write!(f, "NO_TRADE"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NoTradeReason {
    OrbMissing,
    NoBreakout,
    RiskZero,
    TimeExit,
    Filtered,
}

#[derive(Debug, Clone, PartialEq)]
pub struct SimParams {
    pub risk_reward: f64,
    pub stop_mode: StopMode,
    pub scan_end: DateTime<Utc>,
    pub bar_minutes: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeOutcome {
    pub trading_day: NaiveDate,
    pub instrument: String,
    pub orb_time: String,
    pub direction: Direction,
    pub entry_price: Option<f64>,
    pub entry_timestamp: Option<DateTime<Utc>>,
    pub stop_price: Option<f64>,
    pub target_price: Option<f64>,
    pub risk: Option<f64>,
    pub outcome: Outcome,
    pub no_trade_reason: Option<NoTradeReason>,
    pub r_multiple: Option<f64>,
    pub mae: Option<f64>,
    pub mfe: Option<f64>,
    pub exit_timestamp: Option<DateTime<Utc>>,
    /// Instant from which this outcome is knowable.
    pub resolved_at: DateTime<Utc>,
    pub bar_gaps: u32,
}

impl TradeOutcome {
    fn empty(
        instrument: &str,
        orb_time: &str,
        trading_day: NaiveDate,
        reason: NoTradeReason,
        resolved_at: DateTime<Utc>,
    ) -> Self {
        Self {
            trading_day,
            instrument: instrument.to_string(),
            orb_time: orb_time.to_string(),
            direction: Direction::None,
            entry_price: None,
            entry_timestamp: None,
            stop_price: None,
            target_price: None,
            risk: None,
            outcome: Outcome::NoTrade,
            no_trade_reason: Some(reason),
            r_multiple: None,
            mae: None,
            mfe: None,
            exit_timestamp: None,
            resolved_at,
            bar_gaps: 0,
        }
    }

    fn no_trade(
        orb: &OrbWindow,
        reason: NoTradeReason,
        resolved_at: DateTime<Utc>,
        bar_gaps: u32,
    ) -> Self {
        let mut outcome = Self::empty(
            &orb.instrument,
            &orb.orb_time,
            orb.trading_day,
            reason,
            resolved_at,
        );
        outcome.bar_gaps = bar_gaps;
        outcome
    }

    /// Outcome for an opening range that could not be built. Never inferred
    /// from neighbouring days.
    pub fn orb_missing(
        instrument: &str,
        orb_time: &str,
        trading_day: NaiveDate,
        resolved_at: DateTime<Utc>,
    ) -> Self {
        Self::empty(
            instrument,
            orb_time,
            trading_day,
            NoTradeReason::OrbMissing,
            resolved_at,
        )
    }

    /// A trade declined by a setup filter. `decided_at` is the first instant
    /// at which the filter could be evaluated.
    pub fn filtered(orb: &OrbWindow, decided_at: DateTime<Utc>) -> Self {
        Self::no_trade(orb, NoTradeReason::Filtered, decided_at, 0)
    }

    pub fn is_resolved_trade(&self) -> bool {
        matches!(self.outcome, Outcome::Win | Outcome::Loss)
    }
}

fn breakout_direction(orb: &OrbWindow, close: f64) -> Direction {
    if close > orb.high {
        Direction::Up
    } else if close < orb.low {
        Direction::Down
    } else {
        Direction::None
    }
}

pub fn stop_for(orb: &OrbWindow, direction: Direction, mode: StopMode) -> f64 {
    match (mode, direction) {
        (StopMode::Half, _) => orb.midpoint,
        (StopMode::Full, Direction::Up) => orb.low,
        (StopMode::Full, _) => orb.high,
    }
}

/// A breakout fill: the close of the triggering bar.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Entry {
    pub direction: Direction,
    pub price: f64,
    pub timestamp: DateTime<Utc>,
}

/// Counts missing bars between consecutive timestamps.
struct GapTracker<'a> {
    orb: &'a OrbWindow,
    step: Duration,
    prev: DateTime<Utc>,
    count: u32,
}

impl<'a> GapTracker<'a> {
    fn new(orb: &'a OrbWindow, step: Duration, from: DateTime<Utc>) -> Self {
        Self {
            orb,
            step,
            prev: from,
            count: 0,
        }
    }

    fn observe(&mut self, ts: DateTime<Utc>) {
        if ts - self.prev > self.step {
            self.count += 1;
            tracing::debug!(
                instrument = %self.orb.instrument,
                orb_time = %self.orb.orb_time,
                trading_day = %self.orb.trading_day,
                from = %self.prev,
                to = %ts,
                "bar gap inside scan window"
            );
        }
        self.prev = ts;
    }
}

fn bar_step(params: &SimParams) -> Duration {
    Duration::minutes(i64::from(params.bar_minutes.max(1)))
}

/// Simulate the breakout trade for one opening range.
///
/// `bars` may cover more than the scan window; only bars in
/// `[orb.end, params.scan_end)` are read. Returns an error only for the
/// entry-at-boundary guardrail, which indicates a logic defect.
pub fn simulate(
    orb: &OrbWindow,
    bars: &[Bar],
    params: &SimParams,
) -> Result<TradeOutcome, OrbError> {
    let step = bar_step(params);
    let first = bars.partition_point(|b| b.timestamp < orb.end);
    let last = bars.partition_point(|b| b.timestamp < params.scan_end);
    let scan = if last > first { &bars[first..last] } else { &bars[0..0] };

    let mut gaps = GapTracker::new(orb, step, orb.end - step);
    for (i, bar) in scan.iter().enumerate() {
        gaps.observe(bar.timestamp);
        let direction = breakout_direction(orb, bar.close);
        if direction == Direction::None {
            continue;
        }
        if bar.close == orb.high || bar.close == orb.low {
            return Err(OrbError::EntryAtOrbBoundary {
                instrument: orb.instrument.clone(),
                orb_time: orb.orb_time.clone(),
                trading_day: orb.trading_day,
                entry_price: bar.close,
                orb_high: orb.high,
                orb_low: orb.low,
            });
        }
        let entry = Entry {
            direction,
            price: bar.close,
            timestamp: bar.timestamp,
        };
        let stop = stop_for(orb, direction, params.stop_mode);
        let mut outcome = resolve_trade(orb, entry, stop, &scan[i + 1..], params);
        outcome.bar_gaps += gaps.count;
        return Ok(outcome);
    }

    Ok(TradeOutcome::no_trade(
        orb,
        NoTradeReason::NoBreakout,
        params.scan_end,
        gaps.count,
    ))
}

/// Walk an open trade forward until stop, target, or the scan end.
///
/// Bars at or before the entry timestamp, and bars at or after the scan end,
/// are ignored. A zero risk (stop equal to entry) resolves NO_TRADE.
pub fn resolve_trade(
    orb: &OrbWindow,
    entry: Entry,
    stop: f64,
    bars: &[Bar],
    params: &SimParams,
) -> TradeOutcome {
    let step = bar_step(params);
    let mut outcome = TradeOutcome::no_trade(orb, NoTradeReason::TimeExit, params.scan_end, 0);
    outcome.direction = entry.direction;
    outcome.entry_price = Some(entry.price);
    outcome.entry_timestamp = Some(entry.timestamp);
    outcome.stop_price = Some(stop);

    let risk = (entry.price - stop).abs();
    if risk == 0.0 || !risk.is_finite() {
        outcome.no_trade_reason = Some(NoTradeReason::RiskZero);
        outcome.resolved_at = entry.timestamp + step;
        return outcome;
    }
    let long = entry.direction == Direction::Up;
    let target = if long {
        entry.price + risk * params.risk_reward
    } else {
        entry.price - risk * params.risk_reward
    };
    outcome.risk = Some(risk);
    outcome.target_price = Some(target);

    let mut gaps = GapTracker::new(orb, step, entry.timestamp);
    let mut mae = 0.0_f64;
    let mut mfe = 0.0_f64;

    for bar in bars {
        if bar.timestamp <= entry.timestamp {
            continue;
        }
        if bar.timestamp >= params.scan_end {
            break;
        }
        gaps.observe(bar.timestamp);

        let (adverse, favorable, stop_hit, target_hit) = if long {
            (
                (entry.price - bar.low) / risk,
                (bar.high - entry.price) / risk,
                bar.low <= stop,
                bar.high >= target,
            )
        } else {
            (
                (bar.high - entry.price) / risk,
                (entry.price - bar.low) / risk,
                bar.high >= stop,
                bar.low <= target,
            )
        };
        mae = mae.max(adverse);
        mfe = mfe.max(favorable);

        // Same-bar ambiguity resolves pessimistically: the stop fills first.
        let resolved = if stop_hit {
            Some((Outcome::Loss, -1.0))
        } else if target_hit {
            Some((Outcome::Win, params.risk_reward))
        } else {
            None
        };

        if let Some((result, r_multiple)) = resolved {
            outcome.outcome = result;
            outcome.no_trade_reason = None;
            outcome.r_multiple = Some(r_multiple);
            outcome.exit_timestamp = Some(bar.timestamp);
            outcome.resolved_at = bar.timestamp + step;
            outcome.mae = Some(mae);
            outcome.mfe = Some(mfe);
            outcome.bar_gaps = gaps.count;
            return outcome;
        }
    }

    tracing::debug!(
        instrument = %orb.instrument,
        orb_time = %orb.orb_time,
        trading_day = %orb.trading_day,
        "time exit before stop or target"
    );
    outcome.mae = Some(mae);
    outcome.mfe = Some(mfe);
    outcome.bar_gaps = gaps.count;
    outcome
}
