//! Approval gate
//!
//! Records who approved a plan and when. The first approval wins; the store
//! performs the compare-and-set so concurrent approvers converge.

use crate::error::{SentinelError, StoreError};
use crate::ports::{OperatorEvent, OperatorNotifier, SentinelStore};
use crate::types::{ApprovalResult, PlanId};
use chrono::Utc;
use std::sync::Arc;

/// Approval gate
pub struct ApprovalGate {
    store: Arc<dyn SentinelStore>,
    notifier: Arc<dyn OperatorNotifier>,
}

impl ApprovalGate {
    /// Create approval gate
    #[must_use]
    pub fn new(store: Arc<dyn SentinelStore>, notifier: Arc<dyn OperatorNotifier>) -> Self {
        Self { store, notifier }
    }

    /// Approve a plan
    ///
    /// Re-approving returns the original metadata with
    /// `newly_approved == false`.
    ///
    /// # Errors
    /// - `SentinelError::InvalidRequest` if `approver` is blank
    /// - `SentinelError::PlanNotFound` if the plan is unknown
    /// - `SentinelError::PersistenceFailure` if the write fails
    pub async fn approve(
        &self,
        plan_id: PlanId,
        approver: &str,
    ) -> Result<ApprovalResult, SentinelError> {
        let approver = approver.trim();
        if approver.is_empty() {
            return Err(SentinelError::InvalidRequest(
                "approver cannot be empty".to_string(),
            ));
        }

        let approval = self
            .store
            .approve_plan(plan_id, approver, Utc::now())
            .await?
            .ok_or(SentinelError::PlanNotFound(plan_id))?;

        let plan = approval.plan;
        let (Some(approved_by), Some(approved_at)) = (plan.approved_by, plan.approved_at) else {
            return Err(StoreError::Constraint(format!(
                "plan {plan_id} stored without approval metadata"
            ))
            .into());
        };

        if approval.newly_approved {
            tracing::info!(
                plan = %plan_id,
                approver = %approved_by,
                tier = %plan.tier,
                "plan approved"
            );
            self.notifier.notify(OperatorEvent::PlanApproved {
                plan_id,
                approved_by: approved_by.clone(),
            });
        } else {
            tracing::debug!(plan = %plan_id, "plan already approved");
        }

        Ok(ApprovalResult {
            plan_id,
            approved_by,
            approved_at,
            newly_approved: approval.newly_approved,
        })
    }
}
