//! Per-instrument build configuration.

use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use chrono_tz::Tz;

use crate::domain::config_validation::{parse_or, required, split_list};
use crate::domain::costs::CostModel;
use crate::domain::error::OrbError;
use crate::domain::orb::OrbSpec;
use crate::domain::session::{
    format_hhmm, parse_hhmm, InstrumentCalendar, SessionWindow, WindowKind,
};
use crate::domain::simulator::{SimParams, StopMode};
use crate::ports::config_port::ConfigPort;

/// Everything needed to turn one instrument's bars into feature rows.
#[derive(Debug, Clone)]
pub struct InstrumentSpec {
    pub calendar: InstrumentCalendar,
    pub orbs: Vec<OrbSpec>,
    /// Sessions and PRE blocks, in configuration order.
    pub windows: Vec<SessionWindow>,
    /// Local time at which open trades stop being scanned.
    pub scan_end: NaiveTime,
    pub atr_period: usize,
    pub bar_minutes: u32,
    pub risk_reward: f64,
    pub stop_mode: StopMode,
    pub costs: Option<CostModel>,
}

impl InstrumentSpec {
    /// Spec with the default build parameters and no sessions.
    pub fn new(calendar: InstrumentCalendar, orbs: Vec<OrbSpec>) -> Self {
        let scan_end = calendar.trading_day_start;
        Self {
            calendar,
            orbs,
            windows: Vec::new(),
            scan_end,
            atr_period: 20,
            bar_minutes: 1,
            risk_reward: 1.0,
            stop_mode: StopMode::Full,
            costs: None,
        }
    }

    pub fn instrument(&self) -> &str {
        &self.calendar.instrument
    }

    /// Read `[instrument.<code>]` and the optional `[costs.<code>]`.
    pub fn from_config(config: &dyn ConfigPort, code: &str) -> Result<Self, OrbError> {
        let code = code.trim().to_uppercase();
        let section = format!("instrument.{code}");
        let invalid = |key: &str, reason: String| OrbError::ConfigInvalid {
            section: section.clone(),
            key: key.to_string(),
            reason,
        };

        let tz_name = required(config, &section, "timezone")?;
        let tz: Tz = tz_name
            .parse()
            .map_err(|e| invalid("timezone", format!("unknown timezone `{tz_name}`: {e}")))?;

        let trading_day_start = local_time(config, &section, "trading_day_start", "0900")?;
        let calendar = InstrumentCalendar::new(&code, tz, trading_day_start);

        let orb_minutes: u32 = parse_or(config, &section, "orb_minutes", 5)?;
        if orb_minutes == 0 {
            return Err(invalid("orb_minutes", "must be positive".into()));
        }
        let min_bars: usize = parse_or(config, &section, "min_orb_bars", 1)?;

        let mut orbs: Vec<OrbSpec> = Vec::new();
        for raw in split_list(&required(config, &section, "orb_times")?) {
            let anchor = parse_hhmm(&raw).map_err(|e| invalid("orb_times", e))?;
            let spec = OrbSpec::new(anchor, orb_minutes, min_bars);
            if orbs.iter().any(|o| o.orb_time == spec.orb_time) {
                return Err(invalid("orb_times", format!("{} listed twice", spec.orb_time)));
            }
            orbs.push(spec);
        }
        if orbs.is_empty() {
            return Err(OrbError::ConfigMissing {
                section: section.clone(),
                key: "orb_times".into(),
            });
        }

        let mut windows: Vec<SessionWindow> = Vec::new();
        let lists = [("sessions", WindowKind::Session), ("pre_blocks", WindowKind::PreBlock)];
        for (key, kind) in lists {
            let Some(list) = config.get_string(&section, key) else {
                continue;
            };
            for raw in split_list(&list) {
                let window = SessionWindow::parse(&code, kind, &raw).map_err(|e| invalid(key, e))?;
                if windows.iter().any(|w| w.name == window.name) {
                    return Err(invalid(key, format!("window {} defined twice", window.name)));
                }
                windows.push(window);
            }
        }

        let scan_end = local_time(config, &section, "scan_end", &format_hhmm(trading_day_start))?;

        let atr_period: usize = parse_or(config, &section, "atr_period", 20)?;
        if atr_period == 0 {
            return Err(invalid("atr_period", "must be positive".into()));
        }
        let bar_minutes: u32 = parse_or(config, &section, "bar_minutes", 1)?;
        if bar_minutes == 0 {
            return Err(invalid("bar_minutes", "must be positive".into()));
        }
        let risk_reward: f64 = parse_or(config, &section, "risk_reward", 1.0)?;
        if risk_reward <= 0.0 || !risk_reward.is_finite() {
            return Err(invalid("risk_reward", "must be a positive number".into()));
        }
        let stop_mode: StopMode = parse_or(config, &section, "stop_mode", StopMode::Full)?;

        Ok(Self {
            costs: CostModel::from_config(config, &code)?,
            calendar,
            orbs,
            windows,
            scan_end,
            atr_period,
            bar_minutes,
            risk_reward,
            stop_mode,
        })
    }

    /// UTC scan end for trades off `orb`. Never past the trading-day end and
    /// never before the ORB closes.
    pub fn scan_end_for(&self, trading_day: NaiveDate, orb: &OrbSpec) -> DateTime<Utc> {
        let day_end = self.calendar.trading_day_window(trading_day).end;
        let orb_end = orb.window(&self.calendar, trading_day).end;
        let scan = self.calendar.resolve(trading_day, orb.anchor, self.scan_end).end;
        scan.min(day_end).max(orb_end)
    }

    pub fn sim_params(&self, scan_end: DateTime<Utc>) -> SimParams {
        SimParams {
            risk_reward: self.risk_reward,
            stop_mode: self.stop_mode,
            scan_end,
            bar_minutes: self.bar_minutes,
        }
    }

    /// Calendar days of earlier bars fetched ahead of a build range so the
    /// first day's ATR sees a full window regardless of where the range starts.
    pub fn history_lookback_days(&self) -> i64 {
        (self.atr_period as i64) * 2 + 10
    }
}

fn local_time(
    config: &dyn ConfigPort,
    section: &str,
    key: &str,
    default: &str,
) -> Result<NaiveTime, OrbError> {
    let raw = config
        .get_string(section, key)
        .filter(|s| !s.trim().is_empty())
        .unwrap_or_else(|| default.to_string());
    parse_hhmm(&raw).map_err(|reason| OrbError::ConfigInvalid {
        section: section.to_string(),
        key: key.to_string(),
        reason,
    })
}
