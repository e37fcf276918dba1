//! Validated setups: the production-facing trade configurations.

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::bar::Bar;
use crate::domain::config_sync::{SetupConfig, SetupKey};
use crate::domain::error::OrbError;
use crate::domain::orb::OrbWindow;
use crate::domain::performance::Tier;
use crate::domain::simulator::{simulate, Direction, SimParams, StopMode, TradeOutcome};

/// One promoted configuration. Several may share an `(instrument, orb_time)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidatedSetup {
    pub setup_id: String,
    pub instrument: String,
    pub orb_time: String,
    pub risk_reward: f64,
    pub stop_mode: StopMode,
    /// Maximum ORB size as a multiple of ATR.
    pub size_filter: Option<f64>,
    pub direction_filter: Option<Direction>,
    pub trades: Option<u64>,
    pub win_rate: f64,
    pub avg_r: f64,
    pub annual_trades: f64,
    pub tier: Tier,
    pub validated_date: NaiveDate,
    pub data_source: String,
    pub code_version: String,
    pub source_candidate_id: i64,
    pub promoted_by: String,
    pub promoted_at: DateTime<Utc>,
}

impl ValidatedSetup {
    pub fn key(&self) -> SetupKey {
        SetupKey::new(&self.instrument, &self.orb_time)
    }

    pub fn config(&self) -> SetupConfig {
        SetupConfig {
            setup_id: Some(self.setup_id.clone()),
            risk_reward: self.risk_reward,
            stop_mode: self.stop_mode,
            direction_filter: self.direction_filter,
            size_filter: self.size_filter,
        }
    }

    /// Reconstruct this setup's trade on one day.
    ///
    /// The size filter is decided at ORB end; a missing ATR cannot pass it.
    /// The direction filter is decided at the breakout bar: an opposite first
    /// breakout is filtered, never re-scanned for a later break.
    pub fn simulate(
        &self,
        orb: &OrbWindow,
        bars: &[Bar],
        atr: Option<f64>,
        scan_end: DateTime<Utc>,
        bar_minutes: u32,
    ) -> Result<TradeOutcome, OrbError> {
        if let Some(max_ratio) = self.size_filter {
            let passes = matches!(atr, Some(a) if a > 0.0 && orb.size / a <= max_ratio);
            if !passes {
                return Ok(TradeOutcome::filtered(orb, orb.end));
            }
        }

        let params = SimParams {
            risk_reward: self.risk_reward,
            stop_mode: self.stop_mode,
            scan_end,
            bar_minutes,
        };
        let outcome = simulate(orb, bars, &params)?;

        if let (Some(wanted), Some(entry_at)) = (self.direction_filter, outcome.entry_timestamp) {
            if outcome.direction != wanted {
                let decided = entry_at + Duration::minutes(i64::from(bar_minutes.max(1)));
                return Ok(TradeOutcome::filtered(orb, decided));
            }
        }
        Ok(outcome)
    }
}
