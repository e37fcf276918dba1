//! Reconciliation between the validated-setup store and a derived live view.
//!
//! Both sides are indexed `(instrument, orb_time) -> Vec<SetupConfig>`.
//! Several setups per key is normal, so matching is multiset matching over
//! the whole list; a second entry for a key is never folded into the first.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::domain::config_validation::split_list;
use crate::domain::error::OrbError;
use crate::domain::session::{format_hhmm, parse_hhmm};
use crate::domain::setup::ValidatedSetup;
use crate::domain::simulator::{Direction, StopMode};
use crate::ports::config_port::ConfigPort;

const RR_TOLERANCE: f64 = 1e-9;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SetupKey {
    pub instrument: String,
    pub orb_time: String,
}

impl SetupKey {
    pub fn new(instrument: &str, orb_time: &str) -> Self {
        Self {
            instrument: instrument.trim().to_uppercase(),
            orb_time: orb_time.trim().to_string(),
        }
    }
}

impl fmt::Display for SetupKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.instrument, self.orb_time)
    }
}

/// The trade-defining part of a setup as the live view sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SetupConfig {
    /// Present on store-derived entries; the live view does not carry ids.
    pub setup_id: Option<String>,
    pub risk_reward: f64,
    pub stop_mode: StopMode,
    pub direction_filter: Option<Direction>,
    pub size_filter: Option<f64>,
}

impl SetupConfig {
    /// Parse `RR:MODE[:DIR[:SIZE]]`, e.g. `1.5:HALF`, `1.5:HALF:UP` or
    /// `2.0:FULL:ANY:0.8`. `ANY` means no direction filter.
    pub fn parse(value: &str) -> Result<Self, String> {
        let fields: Vec<&str> = value.split(':').map(str::trim).collect();
        let (rr, mode, rest) = match fields.as_slice() {
            [rr, mode, rest @ ..] if rest.len() <= 2 => (*rr, *mode, rest),
            _ => return Err(format!("expected RR:MODE[:DIR[:SIZE]], got `{}`", value.trim())),
        };
        let risk_reward = positive(rr, "risk/reward")?;
        let direction_filter = match rest.first().map(|d| d.to_uppercase()) {
            None => None,
            Some(d) if d == "ANY" => None,
            Some(d) => match d.parse::<Direction>()? {
                Direction::None => return Err("direction filter must be UP, DOWN or ANY".into()),
                dir => Some(dir),
            },
        };
        let size_filter = rest.get(1).map(|s| positive(s, "size filter")).transpose()?;
        Ok(Self {
            setup_id: None,
            risk_reward,
            stop_mode: mode.parse()?,
            direction_filter,
            size_filter,
        })
    }

    /// Same risk/reward, stop mode and filters.
    pub fn same_trade(&self, other: &SetupConfig) -> bool {
        let sizes_match = match (self.size_filter, other.size_filter) {
            (None, None) => true,
            (Some(a), Some(b)) => (a - b).abs() < RR_TOLERANCE,
            _ => false,
        };
        self.stop_mode == other.stop_mode
            && (self.risk_reward - other.risk_reward).abs() < RR_TOLERANCE
            && self.direction_filter == other.direction_filter
            && sizes_match
    }
}

fn positive(raw: &str, what: &str) -> Result<f64, String> {
    let value: f64 = raw
        .parse()
        .map_err(|_| format!("`{raw}` is not a {what} number"))?;
    if value <= 0.0 || !value.is_finite() {
        return Err(format!("{what} must be positive, got {value}"));
    }
    Ok(value)
}

impl fmt::Display for SetupConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.risk_reward, self.stop_mode)?;
        match (self.direction_filter, self.size_filter) {
            (None, None) => {}
            (Some(dir), None) => write!(f, ":{dir}")?,
            (dir, Some(size)) => {
                let dir = dir.map_or_else(|| "ANY".to_string(), |d| d.to_string());
                write!(f, ":{dir}:{size}")?;
            }
        }
        if let Some(id) = &self.setup_id {
            write!(f, " ({id})")?;
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SetupIndex {
    entries: BTreeMap<SetupKey, Vec<SetupConfig>>,
}

impl SetupIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: SetupKey, config: SetupConfig) {
        self.entries.entry(key).or_default().push(config);
    }

    pub fn from_setups(setups: &[ValidatedSetup]) -> Self {
        let mut index = Self::new();
        for setup in setups {
            index.insert(setup.key(), setup.config());
        }
        index
    }

    /// Parse `[live.<CODE>]` for each instrument: keys are ORB times, values
    /// comma-separated [`SetupConfig::parse`] entries. A missing section is an
    /// empty view.
    pub fn from_config(config: &dyn ConfigPort, instruments: &[String]) -> Result<Self, OrbError> {
        let mut index = Self::new();
        for instrument in instruments {
            let section = format!("live.{}", instrument.trim().to_uppercase());
            for key in config.keys(&section) {
                let invalid = |reason: String| OrbError::ConfigInvalid {
                    section: section.clone(),
                    key: key.clone(),
                    reason,
                };
                let orb_time = parse_hhmm(&key).map(format_hhmm).map_err(&invalid)?;
                let value = config.get_string(&section, &key).unwrap_or_default();
                for raw in split_list(&value) {
                    let cfg = SetupConfig::parse(&raw).map_err(&invalid)?;
                    index.insert(SetupKey::new(instrument, &orb_time), cfg);
                }
            }
        }
        Ok(index)
    }

    pub fn get(&self, key: &SetupKey) -> &[SetupConfig] {
        self.entries.get(key).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn keys(&self) -> impl Iterator<Item = &SetupKey> {
        self.entries.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&SetupKey, &[SetupConfig])> {
        self.entries.iter().map(|(k, v)| (k, v.as_slice()))
    }

    /// Total configurations across all keys.
    pub fn len(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CountMismatch {
    pub key: SetupKey,
    pub store: usize,
    pub view: usize,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct SyncReport {
    pub matched: usize,
    /// Store rows with no counterpart in the view.
    pub missing_from_view: Vec<(SetupKey, SetupConfig)>,
    /// View entries with no store row behind them.
    pub unknown_in_view: Vec<(SetupKey, SetupConfig)>,
    pub count_mismatches: Vec<CountMismatch>,
}

impl SyncReport {
    pub fn is_clean(&self) -> bool {
        self.missing_from_view.is_empty()
            && self.unknown_in_view.is_empty()
            && self.count_mismatches.is_empty()
    }

    pub fn summary(&self) -> String {
        let mut parts = Vec::new();
        for (key, cfg) in &self.missing_from_view {
            parts.push(format!("{key} {cfg} missing from live view"));
        }
        for (key, cfg) in &self.unknown_in_view {
            parts.push(format!("{key} {cfg} has no validated setup"));
        }
        for m in &self.count_mismatches {
            parts.push(format!("{} has {} setups but {} live entries", m.key, m.store, m.view));
        }
        if parts.is_empty() {
            format!("{} setups in sync", self.matched)
        } else {
            parts.join("; ")
        }
    }
}

/// Bidirectional reconciliation of `store` against `view`.
pub fn reconcile(store: &SetupIndex, view: &SetupIndex) -> SyncReport {
    let mut report = SyncReport::default();
    let mut keys: Vec<&SetupKey> = store.keys().chain(view.keys()).collect();
    keys.sort();
    keys.dedup();

    for key in keys {
        let stored = store.get(key);
        let live = view.get(key);
        let mut used = vec![false; live.len()];

        for cfg in stored {
            let hit = live
                .iter()
                .enumerate()
                .position(|(i, v)| !used[i] && cfg.same_trade(v));
            match hit {
                Some(i) => {
                    used[i] = true;
                    report.matched += 1;
                }
                None => report.missing_from_view.push((key.clone(), cfg.clone())),
            }
        }
        for (i, v) in live.iter().enumerate() {
            if !used[i] {
                report.unknown_in_view.push((key.clone(), v.clone()));
            }
        }
        if stored.len() != live.len() {
            report.count_mismatches.push(CountMismatch {
                key: key.clone(),
                store: stored.len(),
                view: live.len(),
            });
        }
    }
    report
}

/// Fail with [`OrbError::ConfigDrift`] unless setup ids are unique and the
/// store and view agree.
pub fn verify_sync(setups: &[ValidatedSetup], view: &SetupIndex) -> Result<SyncReport, OrbError> {
    let mut seen = BTreeSet::new();
    let duplicates: Vec<&str> = setups
        .iter()
        .filter(|s| !seen.insert(s.setup_id.as_str()))
        .map(|s| s.setup_id.as_str())
        .collect();
    if !duplicates.is_empty() {
        return Err(OrbError::ConfigDrift {
            summary: format!("duplicate setup ids in store: {}", duplicates.join(", ")),
        });
    }
    let store = SetupIndex::from_setups(setups);
    let report = reconcile(&store, view);
    if !report.is_clean() {
        tracing::warn!(drift = %report.summary(), "validated setups and live view disagree");
        return Err(OrbError::ConfigDrift {
            summary: report.summary(),
        });
    }
    Ok(report)
}
