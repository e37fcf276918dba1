#![allow(dead_code)]

use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, Duration, NaiveDate, TimeZone, Utc};
use serde_json::{json, Value};

pub use orbedge::domain::bar::Bar;
use orbedge::domain::candidate::{CandidateManifest, EdgeCandidate};
use orbedge::domain::error::OrbError;
use orbedge::domain::features::DailyFeatureRow;
use orbedge::domain::instrument::InstrumentSpec;
use orbedge::domain::orb::OrbSpec;
use orbedge::domain::session::{parse_hhmm, InstrumentCalendar};
use orbedge::domain::simulator::StopMode;
use orbedge::ports::bar_port::BarPort;
use orbedge::ports::feature_port::FeaturePort;

pub struct MockBarPort {
    pub data: HashMap<String, Vec<Bar>>,
    pub errors: HashMap<String, String>,
}

impl MockBarPort {
    pub fn new() -> Self {
        Self {
            data: HashMap::new(),
            errors: HashMap::new(),
        }
    }

    pub fn with_bars(mut self, instrument: &str, bars: Vec<Bar>) -> Self {
        self.data.entry(instrument.to_string()).or_default().extend(bars);
        self
    }

    pub fn with_error(mut self, instrument: &str, reason: &str) -> Self {
        self.errors.insert(instrument.to_string(), reason.to_string());
        self
    }
}

impl BarPort for MockBarPort {
    fn fetch_bars(
        &self,
        instrument: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, OrbError> {
        if let Some(reason) = self.errors.get(instrument) {
            return Err(OrbError::Database {
                reason: reason.clone(),
            });
        }
        Ok(self
            .data
            .get(instrument)
            .map(|bars| {
                bars.iter()
                    .filter(|b| b.timestamp >= start && b.timestamp < end)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

/// In-memory feature store. `fail_after` makes the n-th save onward fail,
/// simulating an interrupted batch.
pub struct MemoryFeatureStore {
    pub rows: RefCell<BTreeMap<(String, NaiveDate), String>>,
    pub saves: Cell<usize>,
    pub fail_after: Option<usize>,
}

impl MemoryFeatureStore {
    pub fn new() -> Self {
        Self {
            rows: RefCell::new(BTreeMap::new()),
            saves: Cell::new(0),
            fail_after: None,
        }
    }

    pub fn failing_after(saves: usize) -> Self {
        Self {
            fail_after: Some(saves),
            ..Self::new()
        }
    }

    pub fn json(&self) -> Vec<String> {
        self.rows.borrow().values().cloned().collect()
    }
}

impl FeaturePort for MemoryFeatureStore {
    fn save_feature_row(&self, row: &DailyFeatureRow) -> Result<(), OrbError> {
        if self.fail_after.is_some_and(|n| self.saves.get() >= n) {
            return Err(OrbError::Database {
                reason: "store went away".into(),
            });
        }
        self.saves.set(self.saves.get() + 1);
        self.rows.borrow_mut().insert(
            (row.instrument.clone(), row.trading_day),
            row.to_canonical_json()?,
        );
        Ok(())
    }

    fn has_feature_row(&self, instrument: &str, trading_day: NaiveDate) -> Result<bool, OrbError> {
        Ok(self
            .rows
            .borrow()
            .contains_key(&(instrument.to_string(), trading_day)))
    }

    fn load_feature_row(
        &self,
        instrument: &str,
        trading_day: NaiveDate,
    ) -> Result<Option<DailyFeatureRow>, OrbError> {
        self.rows
            .borrow()
            .get(&(instrument.to_string(), trading_day))
            .map(|json| DailyFeatureRow::from_json(json))
            .transpose()
    }

    fn feature_days(
        &self,
        instrument: &str,
        start: NaiveDate,
        end: NaiveDate,
    ) -> Result<Vec<NaiveDate>, OrbError> {
        Ok(self
            .rows
            .borrow()
            .keys()
            .filter(|(i, d)| i == instrument && *d >= start && *d <= end)
            .map(|(_, d)| *d)
            .collect())
    }
}

pub fn date(y: i32, m: u32, d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(y, m, d).unwrap()
}

pub fn utc(y: i32, mo: u32, d: u32, h: u32, mi: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(y, mo, d, h, mi, 0).unwrap()
}

pub fn make_bar(
    instrument: &str,
    timestamp: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
) -> Bar {
    Bar {
        instrument: instrument.to_string(),
        timestamp,
        open,
        high,
        low,
        close,
        volume: 100,
    }
}

/// Consecutive one-minute bars from `start`, one per `(open, high, low, close)`.
pub fn bars_from(
    instrument: &str,
    start: DateTime<Utc>,
    ohlc: &[(f64, f64, f64, f64)],
) -> Vec<Bar> {
    ohlc.iter()
        .enumerate()
        .map(|(i, &(o, h, l, c))| {
            make_bar(instrument, start + Duration::minutes(i as i64), o, h, l, c)
        })
        .collect()
}

/// MGC trades on a Brisbane clock (UTC+10, no DST) with a 09:00 day start.
pub fn mgc_calendar() -> InstrumentCalendar {
    InstrumentCalendar::new("MGC", chrono_tz::Australia::Brisbane, parse_hhmm("0900").unwrap())
}

/// 10:00 five-minute ORB, HALF stops at 1.5R, short ATR so history fills fast.
pub fn mgc_spec() -> InstrumentSpec {
    let mut spec = InstrumentSpec::new(
        mgc_calendar(),
        vec![OrbSpec::new(parse_hhmm("1000").unwrap(), 5, 1)],
    );
    spec.atr_period = 3;
    spec.risk_reward = 1.5;
    spec.stop_mode = StopMode::Half;
    spec
}

/// A 10:00-10:29 Brisbane session on `day` (00:00-00:29 UTC). The ORB is
/// `[base, base + 2.8]`, the 10:05 bar breaks out upward, and the trade
/// reaches a 1.5R target at 10:08.
pub fn winning_session(day: NaiveDate, base: f64) -> Vec<Bar> {
    let start = Utc
        .from_utc_datetime(&day.and_hms_opt(0, 0, 0).unwrap());
    let mut ohlc = vec![
        (base + 1.0, base + 2.0, base, base + 1.5),
        (base + 1.5, base + 2.8, base + 0.6, base + 2.6),
        (base + 2.6, base + 2.7, base + 1.2, base + 1.4),
        (base + 1.4, base + 2.1, base + 0.9, base + 1.7),
        (base + 1.7, base + 2.2, base + 1.5, base + 2.0),
        // breakout close, entry at base + 4.1
        (base + 2.0, base + 4.2, base + 1.9, base + 4.1),
        (base + 4.1, base + 5.0, base + 3.6, base + 4.8),
        (base + 4.8, base + 6.0, base + 4.4, base + 5.9),
        // HALF stop base + 1.4, risk 2.7, target base + 8.15
        (base + 5.9, base + 8.3, base + 5.5, base + 8.0),
    ];
    ohlc.extend((0..21).map(|_| (base + 8.0, base + 8.4, base + 7.6, base + 8.0)));
    bars_from("MGC", start, &ohlc)
}

pub fn full_manifest_value() -> Value {
    json!({
        "name": "MGC 1000 half 1.5R",
        "instrument": "MGC",
        "hypothesis_text": "10:00 opening range breakouts in gold follow through",
        "filter_spec": {"stop_mode": "HALF", "size_filter": 0.8},
        "test_config": {
            "backtest_start": "2023-01-01",
            "backtest_end": "2024-06-30",
            "walk_forward": {"train_months": 12, "test_months": 3}
        },
        "metrics": {
            "orb_time": "1000",
            "risk_reward": 1.5,
            "win_rate": 0.46,
            "avg_r": 0.15,
            "annual_trades": 160,
            "tier": "B",
            "trades": 240
        },
        "slippage_assumptions": {"slippage_ticks": 1, "commission_per_contract": 1.5},
        "code_version": "4f2a9c1",
        "data_version": "mgc-bars-2024-06-30"
    })
}

pub fn manifest_from(value: Value) -> CandidateManifest {
    serde_json::from_value(value).unwrap()
}

pub fn full_manifest() -> CandidateManifest {
    manifest_from(full_manifest_value())
}

/// Manifest with `risk_reward` and stop mode swapped in.
pub fn manifest_with(rr: f64, stop_mode: &str) -> CandidateManifest {
    let mut value = full_manifest_value();
    value["metrics"]["risk_reward"] = json!(rr);
    value["filter_spec"]["stop_mode"] = json!(stop_mode);
    manifest_from(value)
}

/// Remove a dotted path such as `metrics.avg_r` from a manifest value.
pub fn without_field(mut value: Value, path: &str) -> Value {
    match path.split_once('.') {
        Some((parent, child)) => {
            if let Some(obj) = value.get_mut(parent).and_then(Value::as_object_mut) {
                obj.remove(child);
            }
        }
        None => {
            if let Some(obj) = value.as_object_mut() {
                obj.remove(path);
            }
        }
    }
    value
}

pub fn review_time() -> DateTime<Utc> {
    utc(2024, 7, 1, 3, 0)
}

/// An in-memory APPROVED candidate.
pub fn approved_candidate(candidate_id: i64, manifest: CandidateManifest) -> EdgeCandidate {
    let mut candidate = EdgeCandidate::new(candidate_id, manifest, "research", review_time());
    candidate.submit(review_time()).unwrap();
    candidate.approve("reviewer", review_time()).unwrap();
    candidate
}
