//! Session/window resolution.
//!
//! Maps local wall-clock windows of an instrument's trading day onto UTC
//! query bounds. Every instrument carries an explicit IANA timezone; nothing
//! here consults the host timezone.
//!
//! A trading day `D` runs from `trading_day_start` on `D` to the same local
//! time on `D + 1`. Local times earlier than `trading_day_start` fall on the
//! next calendar date.

use std::collections::BTreeMap;
use std::fmt;

use chrono::offset::{LocalResult, Offset};
use chrono::{DateTime, Duration, NaiveDate, NaiveDateTime, NaiveTime, TimeZone, Timelike, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::domain::error::OrbError;

/// Parse a compact `HHMM` local time such as `0900` or `0030`.
pub fn parse_hhmm(value: &str) -> Result<NaiveTime, String> {
    let value = value.trim();
    if value.len() != 4 || !value.chars().all(|c| c.is_ascii_digit()) {
        return Err(format!("expected HHMM, got `{value}`"));
    }
    let hour: u32 = value[..2].parse().map_err(|_| format!("bad hour in `{value}`"))?;
    let minute: u32 = value[2..].parse().map_err(|_| format!("bad minute in `{value}`"))?;
    NaiveTime::from_hms_opt(hour, minute, 0).ok_or_else(|| format!("`{value}` is not a valid time"))
}

pub fn format_hhmm(time: NaiveTime) -> String {
    format!("{:02}{:02}", time.hour(), time.minute())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum WindowKind {
    Session,
    PreBlock,
}

/// A recurring daily local-time interval used for aggregates.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionWindow {
    pub instrument: String,
    pub name: String,
    pub kind: WindowKind,
    pub local_start: NaiveTime,
    pub local_end: NaiveTime,
}

impl SessionWindow {
    /// Parse `NAME:HHMM-HHMM`.
    pub fn parse(instrument: &str, kind: WindowKind, spec: &str) -> Result<Self, String> {
        let (name, times) = spec
            .split_once(':')
            .ok_or_else(|| format!("expected NAME:HHMM-HHMM, got `{spec}`"))?;
        let (start, end) = times
            .split_once('-')
            .ok_or_else(|| format!("expected HHMM-HHMM in `{spec}`"))?;
        let name = name.trim().to_uppercase();
        if name.is_empty() {
            return Err(format!("empty window name in `{spec}`"));
        }
        let local_start = parse_hhmm(start)?;
        let local_end = parse_hhmm(end)?;
        if local_start == local_end {
            return Err(format!("window `{name}` has zero length"));
        }
        Ok(Self {
            instrument: instrument.to_string(),
            name,
            kind,
            local_start,
            local_end,
        })
    }
}

/// Half-open UTC interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct UtcWindow {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl UtcWindow {
    pub fn contains(&self, ts: DateTime<Utc>) -> bool {
        ts >= self.start && ts < self.end
    }

    pub fn duration(&self) -> Duration {
        self.end - self.start
    }
}

impl fmt::Display for UtcWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}, {})", self.start.to_rfc3339(), self.end.to_rfc3339())
    }
}

/// Per-instrument timezone and trading-day boundary.
#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentCalendar {
    pub instrument: String,
    pub tz: Tz,
    pub trading_day_start: NaiveTime,
}

impl InstrumentCalendar {
    pub fn new(instrument: &str, tz: Tz, trading_day_start: NaiveTime) -> Self {
        Self {
            instrument: instrument.to_string(),
            tz,
            trading_day_start,
        }
    }

    /// Minutes from the trading-day start to `time`, in `[0, 1440)`.
    fn offset_minutes(&self, time: NaiveTime) -> i64 {
        let day = 24 * 60;
        let t = i64::from(time.hour() * 60 + time.minute());
        let s = i64::from(self.trading_day_start.hour() * 60 + self.trading_day_start.minute());
        (t - s).rem_euclid(day)
    }

    /// Calendar date on which `time` falls within trading day `trading_day`.
    pub fn local_date_for(&self, trading_day: NaiveDate, time: NaiveTime) -> NaiveDate {
        if time < self.trading_day_start {
            trading_day + Duration::days(1)
        } else {
            trading_day
        }
    }

    /// UTC instant of local `time` within `trading_day`.
    pub fn instant(&self, trading_day: NaiveDate, time: NaiveTime) -> DateTime<Utc> {
        let naive = self.local_date_for(trading_day, time).and_time(time);
        self.to_utc(naive)
    }

    /// Nonexistent local times (spring-forward) keep the pre-transition
    /// offset, which shifts them forward by the gap. Ambiguous local times
    /// (fall-back) take the earlier instant.
    fn to_utc(&self, naive: NaiveDateTime) -> DateTime<Utc> {
        match self.tz.from_local_datetime(&naive) {
            LocalResult::Single(t) => t.with_timezone(&Utc),
            LocalResult::Ambiguous(a, b) => a.min(b).with_timezone(&Utc),
            LocalResult::None => {
                let before = self.tz.offset_from_utc_datetime(&(naive - Duration::days(1)));
                let fixed = before.fix();
                let utc = naive - Duration::seconds(i64::from(fixed.local_minus_utc()));
                Utc.from_utc_datetime(&utc)
            }
        }
    }

    /// Resolve a local window of `trading_day` into UTC bounds. An end that
    /// does not come after the start in trading-day order rolls to the next
    /// calendar day.
    pub fn resolve(
        &self,
        trading_day: NaiveDate,
        local_start: NaiveTime,
        local_end: NaiveTime,
    ) -> UtcWindow {
        let start = self.instant(trading_day, local_start);
        let mut end_date = self.local_date_for(trading_day, local_end);
        if self.offset_minutes(local_end) <= self.offset_minutes(local_start) {
            end_date += Duration::days(1);
        }
        let end = self.to_utc(end_date.and_time(local_end));
        UtcWindow { start, end }
    }

    pub fn trading_day_window(&self, trading_day: NaiveDate) -> UtcWindow {
        self.resolve(trading_day, self.trading_day_start, self.trading_day_start)
    }

    /// Trading day to which a UTC instant belongs.
    pub fn trading_day_of(&self, ts: DateTime<Utc>) -> NaiveDate {
        let local = ts.with_timezone(&self.tz);
        let date = local.date_naive();
        if local.time() < self.trading_day_start {
            date - Duration::days(1)
        } else {
            date
        }
    }

    pub fn session_window(&self, trading_day: NaiveDate, window: &SessionWindow) -> UtcWindow {
        self.resolve(trading_day, window.local_start, window.local_end)
    }
}

/// Lookup of calendars by instrument.
#[derive(Debug, Clone, Default)]
pub struct SessionResolver {
    calendars: BTreeMap<String, InstrumentCalendar>,
}

impl SessionResolver {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_calendar(mut self, calendar: InstrumentCalendar) -> Self {
        self.calendars.insert(calendar.instrument.clone(), calendar);
        self
    }

    pub fn calendar(&self, instrument: &str) -> Result<&InstrumentCalendar, OrbError> {
        self.calendars
            .get(instrument)
            .ok_or_else(|| OrbError::Unconfigured {
                instrument: instrument.to_string(),
            })
    }

    pub fn resolve(
        &self,
        instrument: &str,
        trading_day: NaiveDate,
        local_start: NaiveTime,
        local_end: NaiveTime,
    ) -> Result<UtcWindow, OrbError> {
        Ok(self
            .calendar(instrument)?
            .resolve(trading_day, local_start, local_end))
    }
}
