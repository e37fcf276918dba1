//! CSV bar files.
//!
//! One file per instrument, `<INSTRUMENT>.csv`, with a header row
//! `timestamp,open,high,low,close,volume`. Timestamps are RFC 3339 or Unix
//! epoch seconds. Rows are
//! returned in file order; ordering problems surface in bar validation
//! instead of being sorted away here.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::Deserialize;

use crate::domain::bar::Bar;
use crate::domain::error::OrbError;
use crate::ports::bar_port::BarPort;

#[derive(Debug, Deserialize)]
struct CsvRow {
    timestamp: String,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: i64,
}

pub struct CsvAdapter {
    base_path: PathBuf,
}

impl CsvAdapter {
    pub fn new(base_path: PathBuf) -> Self {
        Self { base_path }
    }

    fn csv_path(&self, instrument: &str) -> PathBuf {
        self.base_path.join(format!("{instrument}.csv"))
    }

    /// Every bar in `path`, tagged with `instrument`.
    pub fn read_file(path: &Path, instrument: &str) -> Result<Vec<Bar>, OrbError> {
        let display = path.display().to_string();
        let content = fs::read_to_string(path).map_err(|e| OrbError::BarFile {
            path: display.clone(),
            line: 0,
            reason: e.to_string(),
        })?;

        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(content.as_bytes());
        let mut bars = Vec::new();

        for (i, result) in rdr.deserialize::<CsvRow>().enumerate() {
            let line = i as u64 + 2;
            let row = result.map_err(|e| OrbError::BarFile {
                path: display.clone(),
                line,
                reason: e.to_string(),
            })?;
            let timestamp = parse_timestamp(&row.timestamp).map_err(|reason| OrbError::BarFile {
                path: display.clone(),
                line,
                reason,
            })?;
            bars.push(Bar {
                instrument: instrument.to_string(),
                timestamp,
                open: row.open,
                high: row.high,
                low: row.low,
                close: row.close,
                volume: row.volume,
            });
        }

        Ok(bars)
    }
}

fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, String> {
    if let Ok(secs) = raw.parse::<i64>() {
        return DateTime::from_timestamp(secs, 0)
            .ok_or_else(|| format!("epoch seconds `{raw}` out of range"));
    }
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| format!("invalid timestamp `{raw}`: {e}"))
}

impl BarPort for CsvAdapter {
    fn fetch_bars(
        &self,
        instrument: &str,
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    ) -> Result<Vec<Bar>, OrbError> {
        let bars = Self::read_file(&self.csv_path(instrument), instrument)?;
        Ok(bars
            .into_iter()
            .filter(|b| b.timestamp >= start && b.timestamp < end)
            .collect())
    }
}
