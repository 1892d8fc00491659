//! Error types for Sentinel
//!
//! Provides error handling for:
//! - Intelligence feed outages
//! - Referential violations (missing client, threat, plan, mission)
//! - Store write failures and constraint conflicts
//! - Approval and mission state-machine violations

use crate::types::{ClientId, ExecutionStatus, MissionId, PlanId, ThreatId};

/// Main Sentinel error type
#[derive(Debug, thiserror::Error)]
pub enum SentinelError {
    /// Intelligence feed could not be reached
    #[error("intelligence unavailable: {0}")]
    IntelligenceUnavailable(#[source] FeedError),

    /// Client does not exist
    #[error("client not found: {0}")]
    ClientNotFound(ClientId),

    /// Threat does not exist
    #[error("threat not found: {0}")]
    ThreatNotFound(ThreatId),

    /// Plan does not exist
    #[error("response plan not found: {0}")]
    PlanNotFound(PlanId),

    /// Mission log entry does not exist
    #[error("mission not found: {0}")]
    MissionNotFound(MissionId),

    /// Store write or read failed
    #[error("persistence failure: {0}")]
    PersistenceFailure(#[from] StoreError),

    /// Plan is not approved and guardian auto-response does not cover it
    #[error("plan {0} is not approved and guardian auto-response does not apply")]
    UnapprovedExecution(PlanId),

    /// Plan already has a non-terminal mission
    #[error("plan {plan_id} already has active mission {mission_id}")]
    DuplicateExecution {
        /// Plan requested
        plan_id: PlanId,
        /// Mission still in flight
        mission_id: MissionId,
    },

    /// Mission status change not allowed
    #[error("illegal mission transition for {mission_id}: {from} -> {to}")]
    IllegalTransition {
        /// Mission affected
        mission_id: MissionId,
        /// Current status
        from: ExecutionStatus,
        /// Requested status
        to: ExecutionStatus,
    },

    /// Guardian auto-response needs a tier policy and none was configured
    #[error("no tier policy configured for guardian auto-response")]
    TierPolicyMissing,

    /// Completion worker is gone
    #[error("execution worker unavailable")]
    WorkerUnavailable,

    /// Malformed request
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}

impl SentinelError {
    /// Check if the caller may retry the same request
    #[inline]
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::IntelligenceUnavailable(_) | Self::WorkerUnavailable => true,
            Self::PersistenceFailure(e) => e.is_transient(),
            _ => false,
        }
    }

    /// Check if the error is a missing record
    #[inline]
    #[must_use]
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Self::ClientNotFound(_)
                | Self::ThreatNotFound(_)
                | Self::PlanNotFound(_)
                | Self::MissionNotFound(_)
        )
    }
}

/// Intelligence feed errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum FeedError {
    /// Feed endpoint unreachable
    #[error("feed unreachable: {0}")]
    Unreachable(String),

    /// Feed did not answer in time
    #[error("feed timed out after {after_ms}ms")]
    Timeout {
        /// Elapsed time
        after_ms: u64,
    },
}

/// Persistent store errors
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    /// Store could not be reached or the write was lost
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// One non-terminal mission per plan
    #[error("plan {plan_id} already has non-terminal mission {mission_id}")]
    ActiveMissionExists {
        /// Plan the insert targeted
        plan_id: PlanId,
        /// Existing mission
        mission_id: MissionId,
    },

    /// Conditional update lost a race
    #[error("stale write for mission {mission_id}: expected {expected}, found {actual}")]
    StaleWrite {
        /// Mission written
        mission_id: MissionId,
        /// Status the writer assumed
        expected: ExecutionStatus,
        /// Status actually stored
        actual: ExecutionStatus,
    },

    /// Row referenced by an update does not exist
    #[error("row not found: {0}")]
    NotFound(String),

    /// Row violates a table constraint
    #[error("constraint violated: {0}")]
    Constraint(String),
}

impl StoreError {
    /// Transient errors may succeed on retry
    #[inline]
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sentinel_error_display() {
        let err = SentinelError::InvalidRequest("empty entity list".to_string());
        assert!(err.to_string().contains("invalid request"));

        let err = SentinelError::IntelligenceUnavailable(FeedError::Unreachable("dns".into()));
        assert!(err.to_string().contains("intelligence unavailable"));
    }

    #[test]
    fn sentinel_error_is_retryable() {
        assert!(
            SentinelError::IntelligenceUnavailable(FeedError::Timeout { after_ms: 500 })
                .is_retryable()
        );
        assert!(SentinelError::PersistenceFailure(StoreError::Unavailable("down".into()))
            .is_retryable());
        assert!(!SentinelError::PersistenceFailure(StoreError::Constraint("x".into()))
            .is_retryable());
        assert!(!SentinelError::UnapprovedExecution(PlanId::new()).is_retryable());
    }

    #[test]
    fn not_found_classification() {
        assert!(SentinelError::PlanNotFound(PlanId::new()).is_not_found());
        assert!(SentinelError::ThreatNotFound(ThreatId::new()).is_not_found());
        assert!(!SentinelError::TierPolicyMissing.is_not_found());
    }

    #[test]
    fn store_error_converts() {
        let err: SentinelError = StoreError::Unavailable("timeout".into()).into();
        assert!(matches!(err, SentinelError::PersistenceFailure(_)));
    }
}
