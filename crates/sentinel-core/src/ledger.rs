//! Mission ledger
//!
//! Append-only record of execution attempts. Every status change goes
//! through [`validate_transition`]; the allowed graph is
//!
//! ```text
//! queued -> executing -> completed
//!                     \-> failed
//! ```
//!
//! so every stored history is a prefix of one of the two full sequences.

use crate::error::{SentinelError, StoreError};
use crate::ports::SentinelStore;
use crate::types::{
    ActionSnapshot, ClientId, ExecutionStatus, MissionId, MissionLogEntry, PlanId,
    ResponsePlan, StatusTransition, ThreatDiscovery,
};
use chrono::{DateTime, Utc};
use std::sync::Arc;

/// Statuses reachable from `from` in one step
#[must_use]
pub fn allowed_transitions(from: ExecutionStatus) -> &'static [ExecutionStatus] {
    use crate::types::ExecutionStatus::{Completed, Executing, Failed, Queued};
    match from {
        Queued => &[Executing],
        Executing => &[Completed, Failed],
        Completed | Failed => &[],
    }
}

/// Validates a single status change
///
/// # Errors
/// - `SentinelError::IllegalTransition` if `to` is not reachable from `from`
pub fn validate_transition(
    mission_id: MissionId,
    from: ExecutionStatus,
    to: ExecutionStatus,
) -> Result<(), SentinelError> {
    if allowed_transitions(from).contains(&to) {
        Ok(())
    } else {
        Err(SentinelError::IllegalTransition {
            mission_id,
            from,
            to,
        })
    }
}

/// Whether `sequence` starts at queued and only takes allowed steps
#[must_use]
pub fn is_valid_history(sequence: &[ExecutionStatus]) -> bool {
    match sequence.first() {
        Some(ExecutionStatus::Queued) => sequence
            .windows(2)
            .all(|pair| allowed_transitions(pair[0]).contains(&pair[1])),
        _ => false,
    }
}

/// Checks the record-level invariants of one entry
///
/// # Errors
/// - `SentinelError::InvalidRequest` describing the first violation
pub fn check_entry(entry: &MissionLogEntry) -> Result<(), SentinelError> {
    let sequence = entry.status_sequence();
    if !is_valid_history(&sequence) {
        return Err(SentinelError::InvalidRequest(format!(
            "mission {} has invalid history {sequence:?}",
            entry.id
        )));
    }
    if sequence.last() != Some(&entry.status) {
        return Err(SentinelError::InvalidRequest(format!(
            "mission {} status {} disagrees with history",
            entry.id, entry.status
        )));
    }
    let completed = entry.status == ExecutionStatus::Completed;
    if completed != entry.effectiveness_score.is_some() {
        return Err(SentinelError::InvalidRequest(format!(
            "mission {} has effectiveness score {:?} in status {}",
            entry.id, entry.effectiveness_score, entry.status
        )));
    }
    if entry.status.is_terminal() != entry.completed_at.is_some() {
        return Err(SentinelError::InvalidRequest(format!(
            "mission {} completed_at does not match status {}",
            entry.id, entry.status
        )));
    }
    Ok(())
}

fn advance(
    entry: &mut MissionLogEntry,
    to: ExecutionStatus,
    at: DateTime<Utc>,
) -> Result<(), SentinelError> {
    validate_transition(entry.id, entry.status, to)?;
    entry.status = to;
    entry.history.push(StatusTransition { status: to, at });
    if to.is_terminal() {
        entry.completed_at = Some(at);
    }
    Ok(())
}

/// Mission ledger over a [`SentinelStore`]
pub struct MissionLedger {
    store: Arc<dyn SentinelStore>,
    excerpt_limit: usize,
}

impl MissionLedger {
    /// Create ledger
    #[must_use]
    pub fn new(store: Arc<dyn SentinelStore>, excerpt_limit: usize) -> Self {
        Self {
            store,
            excerpt_limit,
        }
    }

    /// Open a mission for an approved plan: queued, then executing
    ///
    /// The snapshot copies tier, actions, entity and a truncated excerpt so
    /// later edits to the plan or threat never alter the log.
    ///
    /// # Errors
    /// - `SentinelError::DuplicateExecution` if the plan already has an active mission
    /// - `SentinelError::PersistenceFailure` if the insert fails
    pub async fn open(
        &self,
        plan: &ResponsePlan,
        threat: &ThreatDiscovery,
        executed_by: &str,
    ) -> Result<MissionLogEntry, SentinelError> {
        let now = Utc::now();
        let mut entry = MissionLogEntry {
            id: MissionId::new(),
            plan_id: plan.id,
            client_id: threat.client_id,
            action_type: plan.tier.action_type(),
            details: ActionSnapshot {
                tier: plan.tier,
                actions: plan.actions.clone(),
                entity_name: threat.entity_name.clone(),
                threat_excerpt: threat.excerpt(self.excerpt_limit),
            },
            status: ExecutionStatus::Queued,
            history: vec![StatusTransition {
                status: ExecutionStatus::Queued,
                at: now,
            }],
            started_at: now,
            completed_at: None,
            result_summary: None,
            effectiveness_score: None,
            executed_by: executed_by.to_string(),
            attempts: 0,
            last_error: None,
        };
        advance(&mut entry, ExecutionStatus::Executing, now)?;

        self.store
            .insert_mission(entry.clone())
            .await
            .map_err(|err| match err {
                StoreError::ActiveMissionExists {
                    plan_id,
                    mission_id,
                } => SentinelError::DuplicateExecution {
                    plan_id,
                    mission_id,
                },
                other => SentinelError::PersistenceFailure(other),
            })?;

        tracing::info!(
            mission = %entry.id,
            plan = %plan.id,
            tier = %plan.tier,
            "mission executing"
        );
        Ok(entry)
    }

    /// Move an executing mission to completed with its outcome
    ///
    /// `attempts` is the number of completion writes tried, this one included.
    ///
    /// # Errors
    /// - `SentinelError::MissionNotFound` if the mission is unknown
    /// - `SentinelError::IllegalTransition` if it already reached a terminal state
    /// - `SentinelError::PersistenceFailure` if the write fails
    pub async fn complete(
        &self,
        mission_id: MissionId,
        summary: &str,
        effectiveness_score: f64,
        attempts: u32,
    ) -> Result<MissionLogEntry, SentinelError> {
        let mut entry = self.load(mission_id).await?;
        advance(&mut entry, ExecutionStatus::Completed, Utc::now())?;
        entry.attempts = attempts;
        entry.result_summary = Some(summary.to_string());
        entry.effectiveness_score = Some(effectiveness_score.clamp(0.0, 1.0));
        entry.last_error = None;
        self.write(&entry, ExecutionStatus::Executing).await?;
        Ok(entry)
    }

    /// Move an executing mission to failed
    ///
    /// # Errors
    /// Same as [`MissionLedger::complete`].
    pub async fn fail(
        &self,
        mission_id: MissionId,
        reason: &str,
    ) -> Result<MissionLogEntry, SentinelError> {
        self.finish_failed(mission_id, reason, None).await
    }

    /// Fail a mission whose completion writes were exhausted
    ///
    /// # Errors
    /// Same as [`MissionLedger::complete`].
    pub async fn abandon(
        &self,
        mission_id: MissionId,
        reason: &str,
        attempts: u32,
    ) -> Result<MissionLogEntry, SentinelError> {
        self.finish_failed(mission_id, reason, Some(attempts)).await
    }

    /// Fetch one mission
    ///
    /// # Errors
    /// - `SentinelError::MissionNotFound` if the mission is unknown
    pub async fn get(&self, mission_id: MissionId) -> Result<MissionLogEntry, SentinelError> {
        self.load(mission_id).await
    }

    /// Missions for a plan, oldest first
    ///
    /// # Errors
    /// - `SentinelError::PersistenceFailure` if the read fails
    pub async fn for_plan(&self, plan_id: PlanId) -> Result<Vec<MissionLogEntry>, SentinelError> {
        Ok(self.store.missions_for_plan(plan_id).await?)
    }

    /// Missions for a client, newest first
    ///
    /// # Errors
    /// - `SentinelError::PersistenceFailure` if the read fails
    pub async fn for_client(
        &self,
        client_id: ClientId,
    ) -> Result<Vec<MissionLogEntry>, SentinelError> {
        Ok(self.store.missions_for_client(client_id).await?)
    }

    /// Executing missions started before `cutoff`
    ///
    /// # Errors
    /// - `SentinelError::PersistenceFailure` if the read fails
    pub async fn stuck(
        &self,
        cutoff: DateTime<Utc>,
    ) -> Result<Vec<MissionLogEntry>, SentinelError> {
        let mut stuck: Vec<MissionLogEntry> = self
            .store
            .missions_with_status(ExecutionStatus::Executing)
            .await?
            .into_iter()
            .filter(|m| m.started_at < cutoff)
            .collect();
        stuck.sort_by_key(|m| m.started_at);
        Ok(stuck)
    }

    async fn finish_failed(
        &self,
        mission_id: MissionId,
        reason: &str,
        attempts: Option<u32>,
    ) -> Result<MissionLogEntry, SentinelError> {
        let mut entry = self.load(mission_id).await?;
        advance(&mut entry, ExecutionStatus::Failed, Utc::now())?;
        if let Some(attempts) = attempts {
            entry.attempts = attempts;
        }
        entry.result_summary = Some(reason.to_string());
        entry.effectiveness_score = None;
        entry.last_error = Some(reason.to_string());
        self.write(&entry, ExecutionStatus::Executing).await?;
        Ok(entry)
    }

    async fn load(&self, mission_id: MissionId) -> Result<MissionLogEntry, SentinelError> {
        self.store
            .get_mission(mission_id)
            .await?
            .ok_or(SentinelError::MissionNotFound(mission_id))
    }

    async fn write(
        &self,
        entry: &MissionLogEntry,
        expected: ExecutionStatus,
    ) -> Result<(), SentinelError> {
        self.store
            .update_mission(entry, expected)
            .await
            .map_err(|err| match err {
                StoreError::StaleWrite {
                    mission_id, actual, ..
                } => SentinelError::IllegalTransition {
                    mission_id,
                    from: actual,
                    to: entry.status,
                },
                other => SentinelError::PersistenceFailure(other),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use crate::types::{ClientId, Fingerprint, PlanId, Severity, ThreatId, Tier};
    use crate::types::ExecutionStatus::{Completed, Executing, Failed, Queued};

    fn fixtures() -> (ResponsePlan, ThreatDiscovery) {
        let threat = ThreatDiscovery {
            id: ThreatId::new(),
            client_id: ClientId::new(),
            entity_name: "Acme Corp".to_string(),
            platform: "Reddit".to_string(),
            content: "x".repeat(500),
            url: None,
            fingerprint: Fingerprint {
                platform: "reddit".to_string(),
                content_hash: "abc".to_string(),
            },
            discovered_at: Utc::now(),
            severity: Severity::High,
            resolved_at: None,
        };
        let plan = ResponsePlan {
            id: PlanId::new(),
            threat_id: threat.id,
            tier: Tier::Hard,
            actions: Vec::new(),
            approved_by: Some("ops1".to_string()),
            approved_at: Some(Utc::now()),
            created_at: Utc::now(),
        };
        (plan, threat)
    }

    #[test]
    fn transition_table() {
        assert!(validate_transition(MissionId::new(), Queued, Executing).is_ok());
        assert!(validate_transition(MissionId::new(), Executing, Completed).is_ok());
        assert!(validate_transition(MissionId::new(), Executing, Failed).is_ok());
        assert!(validate_transition(MissionId::new(), Queued, Completed).is_err());
        assert!(validate_transition(MissionId::new(), Completed, Failed).is_err());
        assert!(validate_transition(MissionId::new(), Failed, Executing).is_err());
    }

    #[test]
    fn history_prefixes() {
        assert!(is_valid_history(&[Queued]));
        assert!(is_valid_history(&[Queued, Executing]));
        assert!(is_valid_history(&[Queued, Executing, Completed]));
        assert!(is_valid_history(&[Queued, Executing, Failed]));
        assert!(!is_valid_history(&[]));
        assert!(!is_valid_history(&[Executing]));
        assert!(!is_valid_history(&[Queued, Executing, Completed, Failed]));
    }

    #[tokio::test]
    async fn open_snapshots_and_truncates() {
        let ledger = MissionLedger::new(Arc::new(MemoryStore::new()), 200);
        let (plan, threat) = fixtures();

        let entry = ledger.open(&plan, &threat, "ops1").await.unwrap();

        assert_eq!(entry.status_sequence(), vec![Queued, Executing]);
        assert_eq!(entry.action_type, "hard_response");
        assert_eq!(entry.details.threat_excerpt.len(), 200);
        assert!(check_entry(&entry).is_ok());
    }

    #[tokio::test]
    async fn complete_then_fail_is_rejected() {
        let ledger = MissionLedger::new(Arc::new(MemoryStore::new()), 200);
        let (plan, threat) = fixtures();
        let entry = ledger.open(&plan, &threat, "ops1").await.unwrap();

        let done = ledger.complete(entry.id, "done", 0.8, 1).await.unwrap();
        assert_eq!(done.status_sequence(), vec![Queued, Executing, Completed]);
        assert!(check_entry(&done).is_ok());

        let result = ledger.fail(entry.id, "late failure").await;
        assert!(matches!(
            result,
            Err(SentinelError::IllegalTransition { from: Completed, to: Failed, .. })
        ));
    }

    #[tokio::test]
    async fn failed_entry_has_no_score() {
        let ledger = MissionLedger::new(Arc::new(MemoryStore::new()), 200);
        let (plan, threat) = fixtures();
        let entry = ledger.open(&plan, &threat, "ops1").await.unwrap();

        let failed = ledger.fail(entry.id, "cancelled by operator").await.unwrap();
        assert_eq!(failed.effectiveness_score, None);
        assert!(check_entry(&failed).is_ok());
    }

    #[tokio::test]
    async fn second_open_for_same_plan_is_duplicate() {
        let ledger = MissionLedger::new(Arc::new(MemoryStore::new()), 200);
        let (plan, threat) = fixtures();
        let first = ledger.open(&plan, &threat, "ops1").await.unwrap();

        let result = ledger.open(&plan, &threat, "ops2").await;
        assert!(matches!(
            result,
            Err(SentinelError::DuplicateExecution { mission_id, .. }) if mission_id == first.id
        ));
    }
}
