//! Edge candidates and their lifecycle.
//!
//! `DRAFT -> PENDING -> {APPROVED, REJECTED}`, `APPROVED -> PROMOTED`.
//! Every transition goes through [`CandidateStatus::transition`]; nothing
//! infers status from which audit timestamps happen to be set.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::domain::error::{LifecycleError, OrbError};
use crate::domain::performance::Tier;
use crate::domain::session::{format_hhmm, parse_hhmm};
use crate::domain::simulator::{Direction, StopMode};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum CandidateStatus {
    Draft,
    Pending,
    Approved,
    Rejected,
    Promoted,
}

impl CandidateStatus {
    pub fn can_transition(self, to: CandidateStatus) -> bool {
        use CandidateStatus::*;
        matches!(
            (self, to),
            (Draft, Pending) | (Pending, Approved) | (Pending, Rejected) | (Approved, Promoted)
        )
    }

    pub fn transition(self, to: CandidateStatus) -> Result<CandidateStatus, LifecycleError> {
        if self.can_transition(to) {
            Ok(to)
        } else {
            Err(LifecycleError::InvalidTransition { from: self, to })
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, CandidateStatus::Rejected | CandidateStatus::Promoted)
    }
}

impl fmt::Display for CandidateStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CandidateStatus::Draft => "DRAFT",
            CandidateStatus::Pending => "PENDING",
            CandidateStatus::Approved => "APPROVED",
            CandidateStatus::Rejected => "REJECTED",
            CandidateStatus::Promoted => "PROMOTED",
        };
        write!(f, "{s}")
    }
}

impl FromStr for CandidateStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "DRAFT" => Ok(CandidateStatus::Draft),
            "PENDING" => Ok(CandidateStatus::Pending),
            "APPROVED" => Ok(CandidateStatus::Approved),
            "REJECTED" => Ok(CandidateStatus::Rejected),
            "PROMOTED" => Ok(CandidateStatus::Promoted),
            other => Err(format!("unknown candidate status `{other}`")),
        }
    }
}

/// The research-side manifest. Every field is optional while drafting;
/// completeness is enforced at submission and again at promotion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CandidateManifest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub instrument: Option<String>,
    #[serde(default)]
    pub hypothesis_text: Option<String>,
    #[serde(default)]
    pub filter_spec: Option<Value>,
    #[serde(default)]
    pub test_config: Option<Value>,
    #[serde(default)]
    pub metrics: Option<Value>,
    #[serde(default)]
    pub slippage_assumptions: Option<Value>,
    #[serde(default)]
    pub code_version: Option<String>,
    #[serde(default)]
    pub data_version: Option<String>,
}

/// Manifest contents with every promotion-required field present and typed.
#[derive(Debug, Clone, PartialEq)]
pub struct PromotionFields {
    pub name: String,
    pub instrument: String,
    pub hypothesis_text: String,
    pub orb_time: String,
    pub risk_reward: f64,
    pub stop_mode: StopMode,
    pub size_filter: Option<f64>,
    pub direction_filter: Option<Direction>,
    pub backtest_start: NaiveDate,
    pub backtest_end: NaiveDate,
    pub trades: Option<u64>,
    pub win_rate: f64,
    pub avg_r: f64,
    pub annual_trades: f64,
    pub tier: Tier,
    pub slippage_assumptions: Value,
    pub code_version: String,
    pub data_version: String,
}

fn missing(field: &str) -> LifecycleError {
    LifecycleError::MissingField {
        field: field.to_string(),
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> LifecycleError {
    LifecycleError::InvalidField {
        field: field.to_string(),
        reason: reason.into(),
    }
}

fn text(value: &Option<String>, field: &str) -> Result<String, LifecycleError> {
    match value.as_deref().map(str::trim) {
        Some(s) if !s.is_empty() => Ok(s.to_string()),
        _ => Err(missing(field)),
    }
}

/// Non-null member `key` of the JSON object `root`, reported as `path`.
fn member<'a>(root: Option<&'a Value>, path: &str) -> Option<&'a Value> {
    let key = path.rsplit('.').next().unwrap_or(path);
    root?.get(key).filter(|v| !v.is_null())
}

fn member_str(root: Option<&Value>, path: &str) -> Result<String, LifecycleError> {
    match member(root, path) {
        None => Err(missing(path)),
        Some(Value::String(s)) if s.trim().is_empty() => Err(missing(path)),
        Some(Value::String(s)) => Ok(s.trim().to_string()),
        Some(other) => Err(invalid(path, format!("expected a string, got {other}"))),
    }
}

fn member_f64(root: Option<&Value>, path: &str) -> Result<f64, LifecycleError> {
    match member(root, path) {
        None => Err(missing(path)),
        Some(v) => v
            .as_f64()
            .filter(|n| n.is_finite())
            .ok_or_else(|| invalid(path, format!("expected a number, got {v}"))),
    }
}

fn member_date(root: Option<&Value>, path: &str) -> Result<NaiveDate, LifecycleError> {
    let raw = member_str(root, path)?;
    NaiveDate::parse_from_str(&raw, "%Y-%m-%d")
        .map_err(|_| invalid(path, format!("`{raw}` is not a YYYY-MM-DD date")))
}

impl CandidateManifest {
    pub fn from_json(json: &str) -> Result<Self, OrbError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Check every required field, failing on the first one that is absent,
    /// null, empty, or malformed. Nothing is ever defaulted.
    pub fn promotion_fields(&self) -> Result<PromotionFields, LifecycleError> {
        let instrument = text(&self.instrument, "instrument")?.to_uppercase();
        let name = text(&self.name, "name")?;
        let hypothesis_text = text(&self.hypothesis_text, "hypothesis_text")?;

        let filter = self.filter_spec.as_ref().filter(|v| !v.is_null());
        if filter.is_none() {
            return Err(missing("filter_spec"));
        }
        let stop_raw = member_str(filter, "filter_spec.stop_mode")?;
        let stop_mode: StopMode = stop_raw
            .parse()
            .map_err(|e: String| invalid("filter_spec.stop_mode", e))?;
        let size_filter = match member(filter, "filter_spec.size_filter") {
            None => None,
            Some(v) => Some(
                v.as_f64()
                    .filter(|n| n.is_finite() && *n > 0.0)
                    .ok_or_else(|| {
                        invalid("filter_spec.size_filter", "expected a positive number")
                    })?,
            ),
        };
        let direction_filter = match member(filter, "filter_spec.direction_filter") {
            None => None,
            Some(_) => {
                let raw = member_str(filter, "filter_spec.direction_filter")?;
                match raw.parse::<Direction>() {
                    Ok(Direction::None) | Err(_) => {
                        return Err(invalid(
                            "filter_spec.direction_filter",
                            format!("`{raw}` is not UP or DOWN"),
                        ));
                    }
                    Ok(d) => Some(d),
                }
            }
        };

        let test = self.test_config.as_ref().filter(|v| !v.is_null());
        if test.is_none() {
            return Err(missing("test_config"));
        }
        let backtest_start = member_date(test, "test_config.backtest_start")?;
        let backtest_end = member_date(test, "test_config.backtest_end")?;
        if backtest_start > backtest_end {
            return Err(invalid(
                "test_config.backtest_start",
                "backtest window starts after it ends",
            ));
        }

        let metrics = self.metrics.as_ref().filter(|v| !v.is_null());
        if metrics.is_none() {
            return Err(missing("metrics"));
        }
        let orb_raw = member_str(metrics, "metrics.orb_time")?;
        let orb_time = parse_hhmm(&orb_raw)
            .map(format_hhmm)
            .map_err(|e| invalid("metrics.orb_time", e))?;
        let risk_reward = member_f64(metrics, "metrics.risk_reward")?;
        if risk_reward <= 0.0 {
            return Err(invalid("metrics.risk_reward", "must be positive"));
        }
        let win_rate = member_f64(metrics, "metrics.win_rate")?;
        if !(0.0..=1.0).contains(&win_rate) {
            return Err(invalid("metrics.win_rate", "must be within [0, 1]"));
        }
        let avg_r = member_f64(metrics, "metrics.avg_r")?;
        let annual_trades = member_f64(metrics, "metrics.annual_trades")?;
        if annual_trades < 0.0 {
            return Err(invalid("metrics.annual_trades", "must not be negative"));
        }
        let tier_raw = member_str(metrics, "metrics.tier")?;
        let tier: Tier = tier_raw
            .parse()
            .map_err(|e: String| invalid("metrics.tier", e))?;
        let trades = match member(metrics, "metrics.trades") {
            None => None,
            Some(v) => Some(
                v.as_u64()
                    .ok_or_else(|| invalid("metrics.trades", "expected a whole number"))?,
            ),
        };

        let slippage_assumptions = match &self.slippage_assumptions {
            None | Some(Value::Null) => return Err(missing("slippage_assumptions")),
            Some(Value::Object(m)) if m.is_empty() => return Err(missing("slippage_assumptions")),
            Some(Value::Array(a)) if a.is_empty() => return Err(missing("slippage_assumptions")),
            Some(v @ (Value::Object(_) | Value::Array(_))) => v.clone(),
            Some(other) => {
                return Err(invalid(
                    "slippage_assumptions",
                    format!("expected an object, got {other}"),
                ));
            }
        };

        let code_version = text(&self.code_version, "code_version")?;
        let data_version = text(&self.data_version, "data_version")?;

        Ok(PromotionFields {
            name,
            instrument,
            hypothesis_text,
            orb_time,
            risk_reward,
            stop_mode,
            size_filter,
            direction_filter,
            backtest_start,
            backtest_end,
            trades,
            win_rate,
            avg_r,
            annual_trades,
            tier,
            slippage_assumptions,
            code_version,
            data_version,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EdgeCandidate {
    pub candidate_id: i64,
    pub manifest: CandidateManifest,
    pub status: CandidateStatus,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub submitted_at: Option<DateTime<Utc>>,
    /// Reviewer of the PENDING decision, whether approved or rejected.
    pub approved_by: Option<String>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejection_reason: Option<String>,
    pub promoted_setup_id: Option<String>,
    pub promoted_by: Option<String>,
    pub promoted_at: Option<DateTime<Utc>>,
}

fn actor(name: &str) -> Result<String, LifecycleError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(LifecycleError::MissingApprover);
    }
    Ok(name.to_string())
}

impl EdgeCandidate {
    pub fn new(
        candidate_id: i64,
        manifest: CandidateManifest,
        created_by: &str,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            candidate_id,
            manifest,
            status: CandidateStatus::Draft,
            created_by: created_by.to_string(),
            created_at: at,
            submitted_at: None,
            approved_by: None,
            approved_at: None,
            rejection_reason: None,
            promoted_setup_id: None,
            promoted_by: None,
            promoted_at: None,
        }
    }

    /// `DRAFT -> PENDING`. The manifest must already be complete.
    pub fn submit(&mut self, at: DateTime<Utc>) -> Result<(), LifecycleError> {
        let next = self.status.transition(CandidateStatus::Pending)?;
        self.manifest.promotion_fields()?;
        self.status = next;
        self.submitted_at = Some(at);
        Ok(())
    }

    pub fn approve(&mut self, approver: &str, at: DateTime<Utc>) -> Result<(), LifecycleError> {
        let next = self.status.transition(CandidateStatus::Approved)?;
        self.approved_by = Some(actor(approver)?);
        self.approved_at = Some(at);
        self.status = next;
        Ok(())
    }

    pub fn reject(
        &mut self,
        approver: &str,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<(), LifecycleError> {
        let next = self.status.transition(CandidateStatus::Rejected)?;
        self.approved_by = Some(actor(approver)?);
        self.approved_at = Some(at);
        let reason = reason.trim();
        self.rejection_reason = (!reason.is_empty()).then(|| reason.to_string());
        self.status = next;
        Ok(())
    }

    /// Preconditions for promotion, checked in order: not already promoted,
    /// status exactly APPROVED, complete manifest.
    pub fn check_promotable(&self) -> Result<PromotionFields, LifecycleError> {
        if let Some(setup_id) = &self.promoted_setup_id {
            return Err(LifecycleError::AlreadyPromoted {
                candidate_id: self.candidate_id,
                setup_id: setup_id.clone(),
            });
        }
        if self.status != CandidateStatus::Approved {
            return Err(LifecycleError::NotApproved {
                candidate_id: self.candidate_id,
                status: self.status,
            });
        }
        self.manifest.promotion_fields()
    }

    /// `APPROVED -> PROMOTED`, recording the new setup on the candidate.
    pub fn mark_promoted(
        &mut self,
        setup_id: &str,
        promoted_by: &str,
        at: DateTime<Utc>,
    ) -> Result<(), LifecycleError> {
        self.check_promotable()?;
        let next = self.status.transition(CandidateStatus::Promoted)?;
        self.promoted_by = Some(actor(promoted_by)?);
        self.promoted_setup_id = Some(setup_id.to_string());
        self.promoted_at = Some(at);
        self.status = next;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use serde_json::json;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn manifest() -> CandidateManifest {
        CandidateManifest::from_json(
            &json!({
                "name": "MGC 1000 half stop",
                "instrument": "MGC",
                "hypothesis_text": "10:00 breakouts follow through",
                "filter_spec": {"stop_mode": "HALF", "size_filter": 0.3},
                "test_config": {"backtest_start": "2023-01-01", "backtest_end": "2024-01-01"},
                "metrics": {"orb_time": "1000", "risk_reward": 1.5, "win_rate": 0.45,
                            "avg_r": 0.12, "annual_trades": 180, "tier": "B"},
                "slippage_assumptions": {"slippage_ticks": 1},
                "code_version": "abc123",
                "data_version": "bars-2024-06"
            })
            .to_string(),
        )
        .unwrap()
    }

    #[test]
    fn transition_table() {
        use CandidateStatus::*;
        assert!(Draft.can_transition(Pending));
        assert!(Pending.can_transition(Approved));
        assert!(Pending.can_transition(Rejected));
        assert!(Approved.can_transition(Promoted));
        assert!(!Draft.can_transition(Approved));
        assert!(!Rejected.can_transition(Pending));
        assert!(!Promoted.can_transition(Approved));
        assert!(!Approved.can_transition(Approved));
        assert!(Promoted.is_terminal());
    }

    #[test]
    fn status_round_trips_through_text() {
        for s in ["DRAFT", "PENDING", "APPROVED", "REJECTED", "PROMOTED"] {
            assert_eq!(s.parse::<CandidateStatus>().unwrap().to_string(), s);
        }
    }

    #[test]
    fn full_manifest_yields_typed_fields() {
        let fields = manifest().promotion_fields().unwrap();
        assert_eq!(fields.instrument, "MGC");
        assert_eq!(fields.orb_time, "1000");
        assert_eq!(fields.stop_mode, StopMode::Half);
        assert_eq!(fields.size_filter, Some(0.3));
        assert_eq!(fields.direction_filter, None);
        assert_eq!(fields.tier, Tier::B);
        assert_eq!(fields.trades, None);
    }

    #[test]
    fn submit_requires_complete_manifest() {
        let mut incomplete = manifest();
        incomplete.metrics = Some(json!({"orb_time": "1000"}));
        let mut c = EdgeCandidate::new(1, incomplete, "research", at());
        assert_eq!(
            c.submit(at()),
            Err(LifecycleError::MissingField {
                field: "metrics.risk_reward".into()
            })
        );
        assert_eq!(c.status, CandidateStatus::Draft);
    }

    #[test]
    fn approve_requires_approver() {
        let mut c = EdgeCandidate::new(1, manifest(), "research", at());
        c.submit(at()).unwrap();
        assert_eq!(c.approve("  ", at()), Err(LifecycleError::MissingApprover));
        assert_eq!(c.status, CandidateStatus::Pending);
        c.approve("josh", at()).unwrap();
        assert_eq!(c.status, CandidateStatus::Approved);
        assert_eq!(c.approved_by.as_deref(), Some("josh"));
        assert_eq!(c.approved_at, Some(at()));
    }

    #[test]
    fn reject_records_reason() {
        let mut c = EdgeCandidate::new(1, manifest(), "research", at());
        c.submit(at()).unwrap();
        c.reject("josh", "too few trades", at()).unwrap();
        assert_eq!(c.status, CandidateStatus::Rejected);
        assert_eq!(c.rejection_reason.as_deref(), Some("too few trades"));
        assert!(c.approve("josh", at()).is_err());
    }

    #[test]
    fn draft_cannot_skip_review() {
        let mut c = EdgeCandidate::new(1, manifest(), "research", at());
        assert_eq!(
            c.approve("josh", at()),
            Err(LifecycleError::InvalidTransition {
                from: CandidateStatus::Draft,
                to: CandidateStatus::Approved
            })
        );
    }

    #[test]
    fn promotion_is_one_way() {
        let mut c = EdgeCandidate::new(7, manifest(), "research", at());
        c.submit(at()).unwrap();
        c.approve("josh", at()).unwrap();
        c.mark_promoted("MGC_1000_RR1.5_HALF_C7", "josh", at()).unwrap();
        assert_eq!(c.status, CandidateStatus::Promoted);
        assert!(matches!(
            c.mark_promoted("again", "josh", at()),
            Err(LifecycleError::AlreadyPromoted { candidate_id: 7, .. })
        ));
    }

    #[test]
    fn invalid_values_are_rejected_not_defaulted() {
        let mut m = manifest();
        m.metrics = Some(json!({"orb_time": "1000", "risk_reward": 1.5, "win_rate": 1.4,
                                "avg_r": 0.1, "annual_trades": 10, "tier": "B"}));
        assert!(matches!(
            m.promotion_fields(),
            Err(LifecycleError::InvalidField { field, .. }) if field == "metrics.win_rate"
        ));

        let mut m = manifest();
        m.filter_spec = Some(json!({"stop_mode": "HALF", "direction_filter": "SIDEWAYS"}));
        assert!(matches!(
            m.promotion_fields(),
            Err(LifecycleError::InvalidField { field, .. })
                if field == "filter_spec.direction_filter"
        ));
    }

    #[test]
    fn empty_slippage_object_counts_as_missing() {
        let mut m = manifest();
        m.slippage_assumptions = Some(json!({}));
        assert_eq!(
            m.promotion_fields(),
            Err(LifecycleError::MissingField {
                field: "slippage_assumptions".into()
            })
        );
    }
}
