//! Daily feature rows.
//!
//! One row per (instrument, trading day). Every field is wrapped in
//! [`Tagged`], recording the earliest instant it may be consumed; derived
//! fields read their inputs through [`Tagged::read`] at the instant they are
//! decided, so an input consumed early fails loudly.
//!
//! Nothing here reads the wall clock, draws random numbers, or iterates an
//! unordered collection: rebuilding a day yields a byte-identical row.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::bar::{slice_window, validate_bars, Bar};
use crate::domain::costs::net_r;
use crate::domain::error::OrbError;
use crate::domain::instrument::InstrumentSpec;
use crate::domain::orb::{build_orb, OrbBuild};
use crate::domain::session::WindowKind;
use crate::domain::simulator::{simulate, TradeOutcome};

/// A value plus the instant from which it may be used.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Tagged<T> {
    pub value: T,
    pub available_from: DateTime<Utc>,
}

impl<T> Tagged<T> {
    pub fn new(value: T, available_from: DateTime<Utc>) -> Self {
        Self {
            value,
            available_from,
        }
    }

    /// Read the value for a decision made at `decision`.
    pub fn read(&self, field: &str, decision: DateTime<Utc>) -> Result<&T, OrbError> {
        if decision < self.available_from {
            return Err(OrbError::Lookahead {
                field: field.to_string(),
                available_from: self.available_from,
                decision,
            });
        }
        Ok(&self.value)
    }

    /// Derive a value that becomes available with this one.
    pub fn map<U>(&self, f: impl FnOnce(&T) -> U) -> Tagged<U> {
        Tagged::new(f(&self.value), self.available_from)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockStats {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub range: f64,
    pub bar_count: usize,
}

impl BlockStats {
    pub fn from_bars(bars: &[Bar]) -> Option<Self> {
        let first = bars.first()?;
        let last = bars.last()?;
        let high = bars.iter().map(|b| b.high).fold(f64::NEG_INFINITY, f64::max);
        let low = bars.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);
        Some(Self {
            open: first.open,
            high,
            low,
            close: last.close,
            range: high - low,
            bar_count: bars.len(),
        })
    }
}

/// Aggregate over a session or PRE block.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BlockAggregate {
    pub name: String,
    pub kind: WindowKind,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub stats: Option<BlockStats>,
}

/// Whole-trading-day summary used for volatility history.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DaySummary {
    pub trading_day: NaiveDate,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub bar_count: usize,
}

impl DaySummary {
    pub fn range(&self) -> f64 {
        self.high - self.low
    }

    fn true_range(&self, prev_close: Option<f64>) -> f64 {
        match prev_close {
            Some(pc) => {
                let hl = self.high - self.low;
                hl.max((self.high - pc).abs()).max((self.low - pc).abs())
            }
            None => self.range(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrbFeatures {
    pub orb_time: String,
    pub orb: Tagged<OrbBuild>,
    /// ORB size over ATR, decided at ORB end.
    pub size_atr: Tagged<Option<f64>>,
    /// Range of the PRE block ending at the ORB anchor.
    pub pre_range: Tagged<Option<f64>>,
    pub outcome: Tagged<TradeOutcome>,
    /// R after the configured execution costs; absent without a cost model.
    pub net_r: Tagged<Option<f64>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailyFeatureRow {
    pub instrument: String,
    pub trading_day: NaiveDate,
    pub day_start: DateTime<Utc>,
    pub day_end: DateTime<Utc>,
    pub atr: Tagged<Option<f64>>,
    pub prior_day_range: Tagged<Option<f64>>,
    pub blocks: Vec<Tagged<BlockAggregate>>,
    pub orbs: Vec<OrbFeatures>,
    pub day: Tagged<Option<DaySummary>>,
}

impl DailyFeatureRow {
    pub fn orb(&self, orb_time: &str) -> Option<&OrbFeatures> {
        self.orbs.iter().find(|o| o.orb_time == orb_time)
    }

    pub fn block(&self, name: &str) -> Option<&Tagged<BlockAggregate>> {
        self.blocks.iter().find(|b| b.value.name == name)
    }

    /// Stable serialization used for persistence and determinism checks.
    pub fn to_canonical_json(&self) -> Result<String, OrbError> {
        Ok(serde_json::to_string(self)?)
    }

    pub fn from_json(json: &str) -> Result<Self, OrbError> {
        Ok(serde_json::from_str(json)?)
    }
}

pub fn summarize_day(trading_day: NaiveDate, bars: &[Bar]) -> Option<DaySummary> {
    let stats = BlockStats::from_bars(bars)?;
    Some(DaySummary {
        trading_day,
        high: stats.high,
        low: stats.low,
        close: stats.close,
        bar_count: stats.bar_count,
    })
}

/// Simple average of the last `period` true ranges in `history` (ascending,
/// strictly before the day being assembled). `None` until `period` days exist.
pub fn average_true_range(history: &[DaySummary], period: usize) -> Option<f64> {
    if period == 0 || history.len() < period {
        return None;
    }
    let start = history.len() - period;
    let total: f64 = (start..history.len())
        .map(|i| {
            let prev_close = if i > 0 { Some(history[i - 1].close) } else { None };
            history[i].true_range(prev_close)
        })
        .sum();
    Some(total / period as f64)
}

/// Assemble the feature row for `trading_day`.
///
/// `day_bars` are the bars of that trading day; `history` holds summaries of
/// earlier trading days in ascending order. Integrity violations in
/// `day_bars` fail this day only; causality violations are fatal.
pub fn assemble_day(
    spec: &InstrumentSpec,
    trading_day: NaiveDate,
    day_bars: &[Bar],
    history: &[DaySummary],
) -> Result<DailyFeatureRow, OrbError> {
    let instrument = spec.instrument();
    validate_bars(instrument, day_bars)?;

    let calendar = &spec.calendar;
    let day_window = calendar.trading_day_window(trading_day);
    let bars = slice_window(day_bars, day_window.start, day_window.end);
    if bars.len() != day_bars.len() {
        let stray = day_bars
            .iter()
            .find(|b| !day_window.contains(b.timestamp))
            .map(|b| b.timestamp)
            .unwrap_or(day_window.start);
        return Err(OrbError::DataIntegrity {
            instrument: instrument.to_string(),
            at: stray,
            reason: format!("bar outside trading day {trading_day}"),
        });
    }

    let cutoff = history.partition_point(|h| h.trading_day < trading_day);
    let prior = &history[..cutoff];

    let atr = Tagged::new(average_true_range(prior, spec.atr_period), day_window.start);
    let prior_day_range = Tagged::new(prior.last().map(|h| h.range()), day_window.start);

    let blocks: Vec<Tagged<BlockAggregate>> = spec
        .windows
        .iter()
        .map(|w| {
            let uw = calendar.session_window(trading_day, w);
            let stats = BlockStats::from_bars(slice_window(bars, uw.start, uw.end));
            Tagged::new(
                BlockAggregate {
                    name: w.name.clone(),
                    kind: w.kind,
                    start: uw.start,
                    end: uw.end,
                    stats,
                },
                uw.end,
            )
        })
        .collect();

    let mut orbs = Vec::with_capacity(spec.orbs.len());
    for orb_spec in &spec.orbs {
        let built = build_orb(calendar, orb_spec, trading_day, bars);
        let window = orb_spec.window(calendar, trading_day);
        let scan_end = spec.scan_end_for(trading_day, orb_spec);
        let orb_ready = built.window().map_or(window.end, |w| w.end);
        let orb = Tagged::new(built, orb_ready);

        let pre_name = format!("PRE_{}", orb_spec.orb_time);
        let pre_block = blocks.iter().find(|b| {
            b.value.kind == WindowKind::PreBlock
                && (b.value.name == pre_name || b.value.end == window.start)
        });
        let pre_range = match pre_block {
            Some(block) => {
                let agg = block.read("pre_block", window.start)?;
                Tagged::new(agg.stats.as_ref().map(|s| s.range), block.available_from)
            }
            None => Tagged::new(None, window.start),
        };

        let outcome = match orb.read("orb", window.end)? {
            OrbBuild::Built(w) => simulate(w, bars, &spec.sim_params(scan_end))?,
            OrbBuild::Missing { .. } => {
                TradeOutcome::orb_missing(instrument, &orb_spec.orb_time, trading_day, window.end)
            }
        };

        let size_atr = {
            let atr_value = atr.read("atr", window.end)?;
            let orb_value = orb.read("orb", window.end)?;
            let ratio = match (orb_value.window(), atr_value) {
                (Some(w), Some(a)) if *a > 0.0 => Some(w.size / a),
                _ => None,
            };
            Tagged::new(ratio, window.end)
        };

        let resolved_at = outcome.resolved_at;
        let outcome = Tagged::new(outcome, resolved_at);
        let net = outcome.map(|o| net_r(o, spec.costs.as_ref()));

        orbs.push(OrbFeatures {
            orb_time: orb_spec.orb_time.clone(),
            orb,
            size_atr,
            pre_range,
            outcome,
            net_r: net,
        });
    }

    let day = Tagged::new(summarize_day(trading_day, bars), day_window.end);

    Ok(DailyFeatureRow {
        instrument: instrument.to_string(),
        trading_day,
        day_start: day_window.start,
        day_end: day_window.end,
        atr,
        prior_day_range,
        blocks,
        orbs,
        day,
    })
}
