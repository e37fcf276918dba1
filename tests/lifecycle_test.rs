//! Edge-candidate lifecycle, promotion and config sync.
//!
//! Tests cover:
//! - Promotion fails closed on every missing manifest field, naming it
//! - Promotion idempotence against the SQLite store
//! - Forward-only status transitions with an audit trail
//! - Several setups per (instrument, ORB time) survive indexing and sync
//! - Drift between the store and a [live.*] view read from an INI file
//! - Setup filters and duplicate setup ids take part in sync

mod common;

use common::*;
use orbedge::domain::candidate::{CandidateManifest, CandidateStatus};
use orbedge::domain::config_sync::{reconcile, verify_sync, SetupIndex, SetupKey};
use orbedge::domain::error::{LifecycleError, OrbError};
use orbedge::domain::promotion::prepare_promotion;

const REQUIRED_FIELDS: &[&str] = &[
    "instrument",
    "name",
    "hypothesis_text",
    "filter_spec",
    "filter_spec.stop_mode",
    "test_config",
    "test_config.backtest_start",
    "test_config.backtest_end",
    "metrics",
    "metrics.orb_time",
    "metrics.risk_reward",
    "metrics.win_rate",
    "metrics.avg_r",
    "metrics.annual_trades",
    "metrics.tier",
    "slippage_assumptions",
    "code_version",
    "data_version",
];

mod fail_closed {
    use super::*;

    #[test]
    fn complete_manifest_promotes() {
        let candidate = approved_candidate(1, full_manifest());
        let setup = prepare_promotion(&candidate, "ops", review_time()).unwrap();
        assert_eq!(setup.setup_id, "MGC_1000_RR1.5_HALF_C1");
        assert_eq!(setup.size_filter, Some(0.8));
    }

    #[test]
    fn each_missing_field_is_named() {
        for field in REQUIRED_FIELDS {
            let mut candidate = approved_candidate(1, full_manifest());
            candidate.manifest = manifest_from(without_field(full_manifest_value(), field));
            let before = candidate.clone();

            let err = prepare_promotion(&candidate, "ops", review_time()).unwrap_err();
            assert_eq!(
                err,
                LifecycleError::MissingField {
                    field: field.to_string()
                },
                "removing {field}"
            );
            assert_eq!(candidate, before);
        }
    }

    #[test]
    fn null_is_as_missing_as_absent() {
        let mut value = full_manifest_value();
        value["metrics"]["avg_r"] = serde_json::Value::Null;
        let mut candidate = approved_candidate(1, full_manifest());
        candidate.manifest = manifest_from(value);
        assert_eq!(
            prepare_promotion(&candidate, "ops", review_time()),
            Err(LifecycleError::MissingField {
                field: "metrics.avg_r".into()
            })
        );
    }

    #[test]
    fn incomplete_draft_cannot_be_submitted() {
        let mut candidate = orbedge::domain::candidate::EdgeCandidate::new(
            1,
            manifest_from(without_field(full_manifest_value(), "slippage_assumptions")),
            "research",
            review_time(),
        );
        assert!(candidate.submit(review_time()).is_err());
        assert_eq!(candidate.status, CandidateStatus::Draft);
    }
}

mod sync {
    use super::*;
    use orbedge::adapters::file_config_adapter::FileConfigAdapter;
    use orbedge::domain::setup::ValidatedSetup;
    use orbedge::domain::simulator::{Direction, StopMode};

    fn promoted(candidate_id: i64, manifest: CandidateManifest) -> ValidatedSetup {
        let candidate = approved_candidate(candidate_id, manifest);
        prepare_promotion(&candidate, "ops", review_time()).unwrap()
    }

    fn live_view(content: &str) -> SetupIndex {
        let config = FileConfigAdapter::from_string(content).unwrap();
        SetupIndex::from_config(&config, &["MGC".to_string()]).unwrap()
    }

    #[test]
    fn two_setups_on_one_orb_time_are_both_indexed() {
        let a = promoted(1, manifest_with(1.5, "HALF"));
        let b = promoted(2, manifest_with(2.0, "FULL"));
        assert_eq!(a.key(), b.key());

        let index = SetupIndex::from_setups(&[a.clone(), b.clone()]);
        let configs = index.get(&SetupKey::new("MGC", "1000"));
        assert_eq!(configs.len(), 2);
        assert_eq!(configs[0].setup_id.as_deref(), Some(a.setup_id.as_str()));
        assert_eq!(configs[1].setup_id.as_deref(), Some(b.setup_id.as_str()));
        assert_eq!(configs[1].stop_mode, StopMode::Full);

        let report = reconcile(&index, &index);
        assert!(report.is_clean());
        assert_eq!(report.matched, 2);
    }

    #[test]
    fn live_view_with_one_of_two_setups_is_drift() {
        let a = promoted(1, manifest_with(1.5, "HALF"));
        let b = promoted(2, manifest_with(2.0, "FULL"));
        let view = live_view("[live.MGC]\n1000 = 1.5:HALF:ANY:0.8\n");

        match verify_sync(&[a, b], &view) {
            Err(OrbError::ConfigDrift { summary }) => {
                assert!(summary.contains("2:FULL"), "{summary}");
                assert!(summary.contains("missing from live view"), "{summary}");
            }
            other => panic!("expected ConfigDrift, got {other:?}"),
        }
    }

    #[test]
    fn live_view_without_the_setup_filters_is_drift() {
        let mut value = full_manifest_value();
        value["filter_spec"]["direction_filter"] = serde_json::json!("UP");
        let setup = promoted(1, manifest_from(value));
        assert_eq!(setup.direction_filter, Some(Direction::Up));
        assert_eq!(setup.size_filter, Some(0.8));

        let unfiltered = live_view("[live.MGC]\n1000 = 1.5:HALF\n");
        assert!(matches!(
            verify_sync(&[setup.clone()], &unfiltered),
            Err(OrbError::ConfigDrift { .. })
        ));

        let other_size = live_view("[live.MGC]\n1000 = 1.5:HALF:UP:0.5\n");
        assert!(verify_sync(&[setup.clone()], &other_size).is_err());

        let mirrored = live_view("[live.MGC]\n1000 = 1.5:HALF:UP:0.8\n");
        assert_eq!(verify_sync(&[setup], &mirrored).unwrap().matched, 1);
    }

    #[test]
    fn duplicate_setup_ids_are_drift() {
        let setup = promoted(1, full_manifest());
        let view = live_view("[live.MGC]\n1000 = 1.5:HALF:ANY:0.8, 1.5:HALF:ANY:0.8\n");
        match verify_sync(&[setup.clone(), setup], &view) {
            Err(OrbError::ConfigDrift { summary }) => {
                assert!(summary.contains("duplicate setup ids"), "{summary}");
            }
            other => panic!("expected ConfigDrift, got {other:?}"),
        }
    }
}

#[cfg(feature = "sqlite")]
mod store {
    use super::*;
    use orbedge::adapters::file_config_adapter::FileConfigAdapter;
    use orbedge::adapters::sqlite_adapter::SqliteAdapter;
    use orbedge::ports::registry_port::RegistryPort;
    use std::io::Write;

    fn store() -> SqliteAdapter {
        let db = SqliteAdapter::in_memory().unwrap();
        db.initialize_schema().unwrap();
        db
    }

    fn created_in(db: &SqliteAdapter) -> i64 {
        db.create_candidate(&full_manifest(), "research", review_time())
            .unwrap()
            .candidate_id
    }

    fn approved_in(db: &SqliteAdapter, manifest: &CandidateManifest) -> i64 {
        let id = db.create_candidate(manifest, "research", review_time()).unwrap().candidate_id;
        db.submit(id, "research", review_time()).unwrap();
        db.approve(id, "reviewer", review_time()).unwrap();
        id
    }

    #[test]
    fn promoting_twice_succeeds_once() {
        let db = store();
        let id = approved_in(&db, &full_manifest());

        let setup = db.promote(id, "ops", review_time()).unwrap();
        let second = db.promote(id, "ops", review_time()).unwrap_err();
        assert!(matches!(
            second,
            OrbError::Lifecycle(LifecycleError::AlreadyPromoted { .. })
        ));

        let setups = db.validated_setups(None).unwrap();
        assert_eq!(setups.len(), 1);
        assert_eq!(setups[0], setup);

        let candidate = db.load_candidate(id).unwrap();
        assert_eq!(candidate.status, CandidateStatus::Promoted);
        assert_eq!(candidate.promoted_setup_id.as_deref(), Some(setup.setup_id.as_str()));
        assert_eq!(candidate.promoted_by.as_deref(), Some("ops"));
        assert_eq!(setup.source_candidate_id, id);
        assert_eq!(setup.promoted_by, "ops");
    }

    #[test]
    fn unapproved_candidate_writes_nothing() {
        let db = store();
        let id = created_in(&db);
        db.submit(id, "research", review_time()).unwrap();
        assert!(matches!(
            db.promote(id, "ops", review_time()),
            Err(OrbError::Lifecycle(LifecycleError::NotApproved { .. }))
        ));
        assert!(db.validated_setups(None).unwrap().is_empty());
        assert_eq!(db.load_candidate(id).unwrap().status, CandidateStatus::Pending);
    }

    #[test]
    fn rejected_candidate_is_terminal() {
        let db = store();
        let id = created_in(&db);
        db.submit(id, "research", review_time()).unwrap();
        let rejected = db.reject(id, "reviewer", "too few trades", review_time()).unwrap();
        assert_eq!(rejected.rejection_reason.as_deref(), Some("too few trades"));
        assert!(db.approve(id, "reviewer", review_time()).is_err());
        assert!(db.promote(id, "ops", review_time()).is_err());

        let trail = db.transitions(id).unwrap();
        let steps: Vec<(CandidateStatus, CandidateStatus)> =
            trail.iter().map(|t| (t.from, t.to)).collect();
        assert_eq!(
            steps,
            vec![
                (CandidateStatus::Draft, CandidateStatus::Pending),
                (CandidateStatus::Pending, CandidateStatus::Rejected),
            ]
        );
        assert_eq!(trail[1].actor, "reviewer");
    }

    #[test]
    fn approval_requires_an_approver() {
        let db = store();
        let id = created_in(&db);
        db.submit(id, "research", review_time()).unwrap();
        assert!(matches!(
            db.approve(id, "  ", review_time()),
            Err(OrbError::Lifecycle(LifecycleError::MissingApprover))
        ));
        assert_eq!(db.load_candidate(id).unwrap().status, CandidateStatus::Pending);
    }

    #[test]
    fn stored_setups_sync_with_live_file() {
        let db = store();
        for (rr, mode) in [(1.5, "HALF"), (2.0, "FULL")] {
            let id = approved_in(&db, &manifest_with(rr, mode));
            db.promote(id, "ops", review_time()).unwrap();
        }
        let setups = db.validated_setups(Some("mgc")).unwrap();
        assert_eq!(setups.len(), 2);

        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"[live.MGC]\n1000 = 2.0:FULL:ANY:0.8, 1.5:HALF:ANY:0.8\n").unwrap();
        file.flush().unwrap();
        let config = FileConfigAdapter::from_file(file.path()).unwrap();
        let view = SetupIndex::from_config(&config, &["MGC".to_string()]).unwrap();

        let report = verify_sync(&setups, &view).unwrap();
        assert_eq!(report.matched, 2);
    }
}
