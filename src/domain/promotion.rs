//! Promotion of an approved candidate into a validated setup.
//!
//! The storage adapter runs [`promote`] inside one transaction together with
//! the setup insert and the candidate update; this module decides what gets
//! written.

use chrono::{DateTime, Utc};

use crate::domain::candidate::{EdgeCandidate, PromotionFields};
use crate::domain::error::LifecycleError;
use crate::domain::setup::ValidatedSetup;
use crate::domain::simulator::StopMode;

/// `{INSTRUMENT}_{ORB}_RR{rr}_{MODE}_C{candidate_id}`. The candidate id
/// suffix keeps ids unique when setups share every other attribute.
pub fn setup_id(
    instrument: &str,
    orb_time: &str,
    risk_reward: f64,
    stop_mode: StopMode,
    candidate_id: i64,
) -> String {
    format!("{instrument}_{orb_time}_RR{risk_reward}_{stop_mode}_C{candidate_id}")
}

fn build_setup(
    candidate_id: i64,
    fields: PromotionFields,
    actor: &str,
    at: DateTime<Utc>,
) -> ValidatedSetup {
    ValidatedSetup {
        setup_id: setup_id(
            &fields.instrument,
            &fields.orb_time,
            fields.risk_reward,
            fields.stop_mode,
            candidate_id,
        ),
        instrument: fields.instrument,
        orb_time: fields.orb_time,
        risk_reward: fields.risk_reward,
        stop_mode: fields.stop_mode,
        size_filter: fields.size_filter,
        direction_filter: fields.direction_filter,
        trades: fields.trades,
        win_rate: fields.win_rate,
        avg_r: fields.avg_r,
        annual_trades: fields.annual_trades,
        tier: fields.tier,
        validated_date: at.date_naive(),
        data_source: fields.data_version,
        code_version: fields.code_version,
        source_candidate_id: candidate_id,
        promoted_by: actor.to_string(),
        promoted_at: at,
    }
}

/// The setup that promoting `candidate` would create. Fails closed on any
/// unmet precondition without touching the candidate.
pub fn prepare_promotion(
    candidate: &EdgeCandidate,
    actor: &str,
    at: DateTime<Utc>,
) -> Result<ValidatedSetup, LifecycleError> {
    if actor.trim().is_empty() {
        return Err(LifecycleError::MissingApprover);
    }
    let fields = candidate.check_promotable()?;
    Ok(build_setup(candidate.candidate_id, fields, actor.trim(), at))
}

/// Promote `candidate` in memory, returning the new setup. On error the
/// candidate is left unchanged.
pub fn promote(
    candidate: &mut EdgeCandidate,
    actor: &str,
    at: DateTime<Utc>,
) -> Result<ValidatedSetup, LifecycleError> {
    let setup = prepare_promotion(candidate, actor, at)?;
    candidate.mark_promoted(&setup.setup_id, &setup.promoted_by, at)?;
    tracing::info!(
        candidate_id = candidate.candidate_id,
        setup_id = %setup.setup_id,
        actor = %setup.promoted_by,
        "candidate promoted"
    );
    Ok(setup)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::candidate::{CandidateManifest, CandidateStatus};
    use chrono::TimeZone;
    use serde_json::json;

    fn at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn approved(id: i64) -> EdgeCandidate {
        let manifest: CandidateManifest = serde_json::from_value(json!({
            "name": "MGC 1000 half",
            "instrument": "mgc",
            "hypothesis_text": "10:00 breakouts follow through",
            "filter_spec": {"stop_mode": "HALF", "direction_filter": "UP"},
            "test_config": {"backtest_start": "2023-01-01", "backtest_end": "2024-01-01"},
            "metrics": {"orb_time": "1000", "risk_reward": 1.5, "win_rate": 0.45,
                        "avg_r": 0.12, "annual_trades": 180, "tier": "B", "trades": 170},
            "slippage_assumptions": {"slippage_ticks": 1},
            "code_version": "abc123",
            "data_version": "bars-2024-06"
        }))
        .unwrap();
        let mut c = EdgeCandidate::new(id, manifest, "research", at());
        c.submit(at()).unwrap();
        c.approve("reviewer", at()).unwrap();
        c
    }

    #[test]
    fn setup_id_format() {
        assert_eq!(setup_id("MGC", "1000", 1.5, StopMode::Half, 3), "MGC_1000_RR1.5_HALF_C3");
        assert_eq!(setup_id("MGC", "0900", 2.0, StopMode::Full, 4), "MGC_0900_RR2_FULL_C4");
    }

    #[test]
    fn promotion_records_audit_on_both_sides() {
        let mut c = approved(3);
        let setup = promote(&mut c, "ops", at()).unwrap();
        assert_eq!(setup.setup_id, "MGC_1000_RR1.5_HALF_C3");
        assert_eq!(setup.instrument, "MGC");
        assert_eq!(setup.source_candidate_id, 3);
        assert_eq!(setup.promoted_by, "ops");
        assert_eq!(setup.trades, Some(170));
        assert_eq!(setup.data_source, "bars-2024-06");
        assert_eq!(c.status, CandidateStatus::Promoted);
        assert_eq!(c.promoted_setup_id.as_deref(), Some(setup.setup_id.as_str()));
        assert_eq!(c.promoted_by.as_deref(), Some("ops"));
        assert_eq!(c.promoted_at, Some(at()));
    }

    #[test]
    fn second_promotion_fails() {
        let mut c = approved(3);
        promote(&mut c, "ops", at()).unwrap();
        let before = c.clone();
        assert!(matches!(
            promote(&mut c, "ops", at()),
            Err(LifecycleError::AlreadyPromoted { .. })
        ));
        assert_eq!(c, before);
    }

    #[test]
    fn pending_candidate_cannot_be_promoted() {
        let mut c = approved(3);
        c.status = CandidateStatus::Pending;
        assert!(matches!(
            prepare_promotion(&c, "ops", at()),
            Err(LifecycleError::NotApproved { .. })
        ));
    }

    #[test]
    fn missing_field_aborts_without_mutation() {
        let mut c = approved(3);
        c.manifest.code_version = None;
        let before = c.clone();
        assert_eq!(
            promote(&mut c, "ops", at()),
            Err(LifecycleError::MissingField {
                field: "code_version".into()
            })
        );
        assert_eq!(c, before);
    }

    #[test]
    fn anonymous_actor_is_refused() {
        let c = approved(3);
        assert_eq!(
            prepare_promotion(&c, " ", at()),
            Err(LifecycleError::MissingApprover)
        );
    }
}
