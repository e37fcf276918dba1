//! Minute bar representation and integrity checks.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::error::OrbError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bar {
    pub instrument: String,
    /// Bar open time. The bar's values are known one bar interval later.
    pub timestamp: DateTime<Utc>,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: i64,
}

/// Check that `bars` are strictly increasing in time, belong to `instrument`,
/// and are internally consistent.
pub fn validate_bars(instrument: &str, bars: &[Bar]) -> Result<(), OrbError> {
    let mut prev: Option<DateTime<Utc>> = None;
    for bar in bars {
        let fail = |reason: String| OrbError::DataIntegrity {
            instrument: instrument.to_string(),
            at: bar.timestamp,
            reason,
        };

        if bar.instrument != instrument {
            return Err(fail(format!("bar belongs to {}", bar.instrument)));
        }
        if let Some(p) = prev {
            if bar.timestamp == p {
                return Err(fail("duplicate timestamp".into()));
            }
            if bar.timestamp < p {
                return Err(fail(format!("out-of-order timestamp (previous {p})")));
            }
        }
        let prices = [bar.open, bar.high, bar.low, bar.close];
        if prices.iter().any(|p| !p.is_finite()) {
            return Err(fail("non-finite price".into()));
        }
        if bar.high < bar.low {
            return Err(fail(format!("high {} below low {}", bar.high, bar.low)));
        }
        if bar.open > bar.high || bar.open < bar.low || bar.close > bar.high || bar.close < bar.low
        {
            return Err(fail("open/close outside high-low range".into()));
        }
        if bar.volume < 0 {
            return Err(fail("negative volume".into()));
        }
        prev = Some(bar.timestamp);
    }
    Ok(())
}

/// Bars with `start <= timestamp < end`. Requires time-ordered input.
pub fn slice_window(bars: &[Bar], start: DateTime<Utc>, end: DateTime<Utc>) -> &[Bar] {
    let lo = bars.partition_point(|b| b.timestamp < start);
    let hi = bars.partition_point(|b| b.timestamp < end);
    if hi <= lo { &bars[0..0] } else { &bars[lo..hi] }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn bar_at(minute: u32, close: f64) -> Bar {
        Bar {
            instrument: "MGC".into(),
            timestamp: Utc.with_ymd_and_hms(2024, 1, 15, 0, minute, 0).unwrap(),
            open: close,
            high: close + 1.0,
            low: close - 1.0,
            close,
            volume: 10,
        }
    }

    #[test]
    fn accepts_ordered_bars() {
        let bars = vec![bar_at(0, 100.0), bar_at(1, 101.0), bar_at(5, 102.0)];
        assert!(validate_bars("MGC", &bars).is_ok());
    }

    #[test]
    fn rejects_duplicate_timestamp() {
        let bars = vec![bar_at(0, 100.0), bar_at(0, 101.0)];
        match validate_bars("MGC", &bars) {
            Err(OrbError::DataIntegrity { reason, .. }) => assert!(reason.contains("duplicate")),
            other => panic!("expected DataIntegrity, got {other:?}"),
        }
    }

    #[test]
    fn rejects_out_of_order() {
        let bars = vec![bar_at(2, 100.0), bar_at(1, 101.0)];
        match validate_bars("MGC", &bars) {
            Err(OrbError::DataIntegrity { reason, .. }) => {
                assert!(reason.contains("out-of-order"))
            }
            other => panic!("expected DataIntegrity, got {other:?}"),
        }
    }

    #[test]
    fn rejects_inverted_range() {
        let mut bar = bar_at(0, 100.0);
        bar.high = 98.0;
        assert!(validate_bars("MGC", &[bar]).is_err());
    }

    #[test]
    fn rejects_foreign_instrument() {
        let mut bar = bar_at(0, 100.0);
        bar.instrument = "MNQ".into();
        assert!(validate_bars("MGC", &[bar]).is_err());
    }

    #[test]
    fn slice_window_is_half_open() {
        let bars: Vec<Bar> = (0..10).map(|m| bar_at(m, 100.0)).collect();
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 0, 2, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 15, 0, 5, 0).unwrap();
        let slice = slice_window(&bars, start, end);
        assert_eq!(slice.len(), 3);
        assert_eq!(slice[0].timestamp, start);
        assert!(slice.iter().all(|b| b.timestamp < end));
    }

    #[test]
    fn slice_window_empty_when_inverted() {
        let bars: Vec<Bar> = (0..10).map(|m| bar_at(m, 100.0)).collect();
        let start = Utc.with_ymd_and_hms(2024, 1, 15, 0, 5, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2024, 1, 15, 0, 2, 0).unwrap();
        assert!(slice_window(&bars, start, end).is_empty());
    }
}
