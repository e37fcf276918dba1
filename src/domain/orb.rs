//! Opening-range construction.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::bar::{slice_window, Bar};
use crate::domain::session::{format_hhmm, InstrumentCalendar, UtcWindow};

/// Configured opening range: local anchor plus fixed duration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OrbSpec {
    pub orb_time: String,
    pub anchor: NaiveTime,
    pub duration_minutes: u32,
    pub min_bars: usize,
}

impl OrbSpec {
    pub fn new(anchor: NaiveTime, duration_minutes: u32, min_bars: usize) -> Self {
        Self {
            orb_time: format_hhmm(anchor),
            anchor,
            duration_minutes,
            min_bars: min_bars.max(1),
        }
    }

    pub fn window(&self, calendar: &InstrumentCalendar, trading_day: NaiveDate) -> UtcWindow {
        let end_local = self.anchor + chrono::Duration::minutes(i64::from(self.duration_minutes));
        calendar.resolve(trading_day, self.anchor, end_local)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrbWindow {
    pub instrument: String,
    pub orb_time: String,
    pub trading_day: NaiveDate,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
    pub duration_minutes: u32,
    pub high: f64,
    pub low: f64,
    pub midpoint: f64,
    pub size: f64,
    pub bar_count: usize,
}

impl OrbWindow {
    /// A zero-size range carries no directional information.
    pub fn is_degenerate(&self) -> bool {
        self.size == 0.0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrbBuild {
    Built(OrbWindow),
    Missing {
        instrument: String,
        orb_time: String,
        trading_day: NaiveDate,
        bars: usize,
        required: usize,
    },
}

impl OrbBuild {
    pub fn window(&self) -> Option<&OrbWindow> {
        match self {
            OrbBuild::Built(w) => Some(w),
            OrbBuild::Missing { .. } => None,
        }
    }

    pub fn is_missing(&self) -> bool {
        matches!(self, OrbBuild::Missing { .. })
    }
}

/// Build the opening range for `spec` on `trading_day` from time-ordered
/// `bars`. Only bars inside the ORB window are read.
pub fn build_orb(
    calendar: &InstrumentCalendar,
    spec: &OrbSpec,
    trading_day: NaiveDate,
    bars: &[Bar],
) -> OrbBuild {
    let window = spec.window(calendar, trading_day);
    let in_window = slice_window(bars, window.start, window.end);

    if in_window.len() < spec.min_bars {
        tracing::debug!(
            instrument = %calendar.instrument,
            orb_time = %spec.orb_time,
            %trading_day,
            bars = in_window.len(),
            "ORB window below minimum bar count"
        );
        return OrbBuild::Missing {
            instrument: calendar.instrument.clone(),
            orb_time: spec.orb_time.clone(),
            trading_day,
            bars: in_window.len(),
            required: spec.min_bars,
        };
    }

    let high = in_window
        .iter()
        .map(|b| b.high)
        .fold(f64::NEG_INFINITY, f64::max);
    let low = in_window.iter().map(|b| b.low).fold(f64::INFINITY, f64::min);

    OrbBuild::Built(OrbWindow {
        instrument: calendar.instrument.clone(),
        orb_time: spec.orb_time.clone(),
        trading_day,
        start: window.start,
        end: window.end,
        duration_minutes: spec.duration_minutes,
        high,
        low,
        midpoint: (high + low) / 2.0,
        size: high - low,
        bar_count: in_window.len(),
    })
}
