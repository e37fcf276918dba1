//! Edge-candidate registry and validated-setup store.
//!
//! `promote` is the only operation that writes validated setups.

use chrono::{DateTime, Utc};

use crate::domain::candidate::{CandidateManifest, CandidateStatus, EdgeCandidate};
use crate::domain::error::OrbError;
use crate::domain::setup::ValidatedSetup;

pub trait RegistryPort {
    fn create_candidate(
        &self,
        manifest: &CandidateManifest,
        created_by: &str,
        at: DateTime<Utc>,
    ) -> Result<EdgeCandidate, OrbError>;

    fn load_candidate(&self, candidate_id: i64) -> Result<EdgeCandidate, OrbError>;

    fn list_candidates(
        &self,
        status: Option<CandidateStatus>,
    ) -> Result<Vec<EdgeCandidate>, OrbError>;

    /// Persist `candidate`'s new status and review fields, provided the stored
    /// status is still `prev`, and append an audit entry.
    fn record_transition(
        &self,
        prev: CandidateStatus,
        candidate: &EdgeCandidate,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<(), OrbError>;

    /// Promote an APPROVED candidate: insert its setup and mark the candidate
    /// in one transaction. Either both happen or neither does.
    fn promote(
        &self,
        candidate_id: i64,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<ValidatedSetup, OrbError>;

    /// All validated setups, optionally for one instrument, ordered by
    /// instrument, ORB time, and setup id.
    fn validated_setups(&self, instrument: Option<&str>) -> Result<Vec<ValidatedSetup>, OrbError>;

    fn submit(
        &self,
        candidate_id: i64,
        actor: &str,
        at: DateTime<Utc>,
    ) -> Result<EdgeCandidate, OrbError> {
        let mut candidate = self.load_candidate(candidate_id)?;
        let prev = candidate.status;
        candidate.submit(at)?;
        self.record_transition(prev, &candidate, actor, at)?;
        Ok(candidate)
    }

    fn approve(
        &self,
        candidate_id: i64,
        approver: &str,
        at: DateTime<Utc>,
    ) -> Result<EdgeCandidate, OrbError> {
        let mut candidate = self.load_candidate(candidate_id)?;
        let prev = candidate.status;
        candidate.approve(approver, at)?;
        self.record_transition(prev, &candidate, approver, at)?;
        Ok(candidate)
    }

    fn reject(
        &self,
        candidate_id: i64,
        approver: &str,
        reason: &str,
        at: DateTime<Utc>,
    ) -> Result<EdgeCandidate, OrbError> {
        let mut candidate = self.load_candidate(candidate_id)?;
        let prev = candidate.status;
        candidate.reject(approver, reason, at)?;
        self.record_transition(prev, &candidate, approver, at)?;
        Ok(candidate)
    }
}
