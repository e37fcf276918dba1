//! Batch feature build across trading days.
//!
//! Days are independent given their own bars and the summaries of earlier
//! days, so they can be assembled in parallel. Results are always consumed
//! in trading-day order: a parallel build persists exactly what a sequential
//! one would.

use std::collections::BTreeMap;

use chrono::{Duration, NaiveDate};
use rayon::prelude::*;

use crate::domain::bar::{validate_bars, Bar};
use crate::domain::config_validation::BuildConfig;
use crate::domain::error::OrbError;
use crate::domain::features::{assemble_day, summarize_day, DailyFeatureRow, DaySummary};
use crate::domain::instrument::InstrumentSpec;
use crate::domain::orb::OrbBuild;
use crate::domain::performance::PerformanceSummary;
use crate::domain::session::InstrumentCalendar;
use crate::domain::setup::ValidatedSetup;
use crate::domain::simulator::TradeOutcome;
use crate::ports::bar_port::BarPort;
use crate::ports::feature_port::FeaturePort;

/// Bars grouped by trading day, input order kept within each day.
pub fn group_by_trading_day(
    calendar: &InstrumentCalendar,
    bars: &[Bar],
) -> BTreeMap<NaiveDate, Vec<Bar>> {
    let mut days: BTreeMap<NaiveDate, Vec<Bar>> = BTreeMap::new();
    for bar in bars {
        days.entry(calendar.trading_day_of(bar.timestamp))
            .or_default()
            .push(bar.clone());
    }
    days
}

/// Summaries of every day whose bars pass validation. A corrupt day has no
/// summary, so it never feeds volatility history.
pub fn day_summaries(instrument: &str, days: &BTreeMap<NaiveDate, Vec<Bar>>) -> Vec<DaySummary> {
    days.iter()
        .filter(|(_, bars)| validate_bars(instrument, bars).is_ok())
        .filter_map(|(day, bars)| summarize_day(*day, bars))
        .collect()
}

/// History visible to `trading_day`: summaries from the fixed lookback
/// window before it, independent of where a batch starts.
fn history_for<'a>(
    spec: &InstrumentSpec,
    summaries: &'a [DaySummary],
    trading_day: NaiveDate,
) -> &'a [DaySummary] {
    let from = trading_day - Duration::days(spec.history_lookback_days());
    let lo = summaries.partition_point(|s| s.trading_day < from);
    let hi = summaries.partition_point(|s| s.trading_day < trading_day);
    &summaries[lo..hi]
}

/// Assemble `targets` from grouped bars. Output order follows `targets`.
pub fn build_days(
    spec: &InstrumentSpec,
    days: &BTreeMap<NaiveDate, Vec<Bar>>,
    targets: &[NaiveDate],
    parallel: bool,
) -> Vec<(NaiveDate, Result<DailyFeatureRow, OrbError>)> {
    let summaries = day_summaries(spec.instrument(), days);
    let empty: Vec<Bar> = Vec::new();
    let one = |day: &NaiveDate| {
        let bars = days.get(day).unwrap_or(&empty);
        (*day, assemble_day(spec, *day, bars, history_for(spec, &summaries, *day)))
    };
    if parallel {
        targets.par_iter().map(one).collect()
    } else {
        targets.iter().map(one).collect()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DayFailure {
    pub trading_day: NaiveDate,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct BuildReport {
    pub instrument: String,
    pub built: Vec<NaiveDate>,
    /// Days already persisted and left untouched on resume.
    pub skipped: Vec<NaiveDate>,
    /// Days aborted by data-integrity errors.
    pub failed: Vec<DayFailure>,
}

/// Build and persist rows for one instrument over `[start, end]`.
///
/// Integrity errors abort only their day. Any other error halts the run;
/// rows persisted before it stay valid on their own.
pub fn build_instrument(
    spec: &InstrumentSpec,
    start: NaiveDate,
    end: NaiveDate,
    resume: bool,
    parallel: bool,
    bar_port: &dyn BarPort,
    store: &dyn FeaturePort,
) -> Result<BuildReport, OrbError> {
    let instrument = spec.instrument();
    let calendar = &spec.calendar;
    let fetch_from = calendar
        .trading_day_window(start - Duration::days(spec.history_lookback_days()))
        .start;
    let fetch_to = calendar.trading_day_window(end).end;
    let bars = bar_port.fetch_bars(instrument, fetch_from, fetch_to)?;
    let days = group_by_trading_day(calendar, &bars);

    let mut report = BuildReport {
        instrument: instrument.to_string(),
        built: Vec::new(),
        skipped: Vec::new(),
        failed: Vec::new(),
    };

    let mut targets = Vec::new();
    for day in days.range(start..=end).map(|(d, _)| *d) {
        if resume && store.has_feature_row(instrument, day)? {
            report.skipped.push(day);
        } else {
            targets.push(day);
        }
    }
    tracing::info!(
        instrument,
        %start,
        %end,
        bars = bars.len(),
        days = targets.len(),
        skipped = report.skipped.len(),
        parallel,
        "building feature rows"
    );

    for (day, result) in build_days(spec, &days, &targets, parallel) {
        match result {
            Ok(row) => {
                store.save_feature_row(&row)?;
                report.built.push(day);
            }
            Err(e) if !e.is_fatal() => {
                tracing::warn!(instrument, trading_day = %day, error = %e, "skipping day");
                report.failed.push(DayFailure {
                    trading_day: day,
                    reason: e.to_string(),
                });
            }
            Err(e) => {
                tracing::error!(instrument, trading_day = %day, error = %e, "halting build");
                return Err(e);
            }
        }
    }
    Ok(report)
}

pub fn run_build(
    config: &BuildConfig,
    bar_port: &dyn BarPort,
    store: &dyn FeaturePort,
) -> Result<Vec<BuildReport>, OrbError> {
    config
        .specs
        .iter()
        .map(|spec| {
            build_instrument(
                spec,
                config.start_date,
                config.end_date,
                config.resume,
                config.parallel,
                bar_port,
                store,
            )
        })
        .collect()
}

/// Re-run `setup` over persisted days in `[start, end]` using stored ORBs
/// and ATR plus the bar store, as a live engine would.
pub fn replay_setup(
    setup: &ValidatedSetup,
    spec: &InstrumentSpec,
    start: NaiveDate,
    end: NaiveDate,
    bar_port: &dyn BarPort,
    store: &dyn FeaturePort,
) -> Result<(Vec<TradeOutcome>, PerformanceSummary), OrbError> {
    let orb_spec = spec
        .orbs
        .iter()
        .find(|o| o.orb_time == setup.orb_time)
        .ok_or_else(|| OrbError::ConfigInvalid {
            section: format!("instrument.{}", spec.instrument()),
            key: "orb_times".into(),
            reason: format!("{} is not configured for setup {}", setup.orb_time, setup.setup_id),
        })?;

    let days = store.feature_days(spec.instrument(), start, end)?;
    let mut outcomes = Vec::with_capacity(days.len());
    for day in &days {
        let Some(row) = store.load_feature_row(spec.instrument(), *day)? else {
            continue;
        };
        let Some(features) = row.orb(&setup.orb_time) else {
            continue;
        };
        let outcome = match &features.orb.value {
            OrbBuild::Built(orb) => {
                let atr = *row.atr.read("atr", orb.end)?;
                let window = spec.calendar.trading_day_window(*day);
                let bars = bar_port.fetch_bars(spec.instrument(), window.start, window.end)?;
                let scan_end = spec.scan_end_for(*day, orb_spec);
                setup.simulate(orb, &bars, atr, scan_end, spec.bar_minutes)?
            }
            OrbBuild::Missing { .. } => features.outcome.value.clone(),
        };
        outcomes.push(outcome);
    }

    let summary = PerformanceSummary::from_outcomes(&outcomes, days.len());
    tracing::info!(
        setup_id = %setup.setup_id,
        trades = summary.trades,
        avg_r = summary.avg_r,
        "setup replayed"
    );
    Ok((outcomes, summary))
}
