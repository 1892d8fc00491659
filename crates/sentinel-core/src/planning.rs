//! Response plan generation
//!
//! Turns a threat into three tiered plans. Action content is a static
//! table per tier; threat severity does not influence it.

use crate::error::{SentinelError, StoreError};
use crate::ports::SentinelStore;
use crate::types::{ActionKind, PlanId, PlannedAction, ResponsePlan, ThreatId, Tier};
use chrono::Utc;
use std::sync::Arc;

/// Ordered actions for a tier
#[must_use]
pub fn tier_actions(tier: Tier) -> &'static [ActionKind] {
    match tier {
        Tier::Soft => &[
            ActionKind::EscalateMonitoring,
            ActionKind::AmplifyPositiveContent,
            ActionKind::DirectEngagement,
        ],
        Tier::Hard => &[
            ActionKind::CounterNarrative,
            ActionKind::PlatformReport,
            ActionKind::InfluencerOutreach,
        ],
        Tier::Nuclear => &[
            ActionKind::LegalAction,
            ActionKind::MediaCampaign,
            ActionKind::ExecutiveEscalation,
        ],
    }
}

/// Outcome text recorded when a mission of this tier completes
#[must_use]
pub fn result_summary(tier: Tier) -> &'static str {
    match tier {
        Tier::Soft => {
            "Monitoring activated, positive content amplified, initial engagement completed"
        }
        Tier::Hard => {
            "Counter-narrative deployed, platform reports filed, influencer outreach initiated"
        }
        Tier::Nuclear => {
            "Legal proceedings initiated, media campaign launched, executive escalation completed"
        }
    }
}

/// Plan generator for threats
pub struct PlanGenerator {
    store: Arc<dyn SentinelStore>,
}

impl PlanGenerator {
    /// Create plan generator
    #[inline]
    #[must_use]
    pub fn new(store: Arc<dyn SentinelStore>) -> Self {
        Self { store }
    }

    /// Generate soft, hard and nuclear plans for a threat
    ///
    /// A threat that already has its plans gets them back unchanged, so a
    /// retried or concurrent call never produces a second batch.
    ///
    /// # Errors
    /// - `SentinelError::ThreatNotFound` if the threat is unknown
    /// - `SentinelError::PersistenceFailure` if the batch write fails or the
    ///   stored plan set is incomplete
    pub async fn generate_plans(
        &self,
        threat_id: ThreatId,
    ) -> Result<[ResponsePlan; 3], SentinelError> {
        if self.store.get_threat(threat_id).await?.is_none() {
            return Err(SentinelError::ThreatNotFound(threat_id));
        }

        let existing = self.store.plans_for_threat(threat_id).await?;
        if !existing.is_empty() {
            tracing::debug!(threat = %threat_id, "plans already generated");
            return into_tier_array(threat_id, existing);
        }

        let created_at = Utc::now();
        let plans = Tier::ALL.map(|tier| ResponsePlan {
            id: PlanId::new(),
            threat_id,
            tier,
            actions: tier_actions(tier)
                .iter()
                .copied()
                .map(PlannedAction::from)
                .collect(),
            approved_by: None,
            approved_at: None,
            created_at,
        });

        let stored = self
            .store
            .insert_plans_if_absent(threat_id, plans.to_vec())
            .await?;
        if stored.first().map(|p| p.id) == Some(plans[0].id) {
            tracing::info!(threat = %threat_id, "generated response plans");
        } else {
            tracing::debug!(threat = %threat_id, "plans generated concurrently");
        }
        into_tier_array(threat_id, stored)
    }

    /// Plans stored for a threat, in tier order
    ///
    /// # Errors
    /// - `SentinelError::PersistenceFailure` if the read fails
    pub async fn plans_for_threat(
        &self,
        threat_id: ThreatId,
    ) -> Result<Vec<ResponsePlan>, SentinelError> {
        let mut plans = self.store.plans_for_threat(threat_id).await?;
        plans.sort_by_key(|p| p.tier);
        Ok(plans)
    }
}

fn into_tier_array(
    threat_id: ThreatId,
    mut plans: Vec<ResponsePlan>,
) -> Result<[ResponsePlan; 3], SentinelError> {
    plans.sort_by_key(|p| p.tier);
    let tiers: Vec<Tier> = plans.iter().map(|p| p.tier).collect();
    if tiers != Tier::ALL {
        return Err(StoreError::Constraint(format!(
            "threat {threat_id} has plan tiers {tiers:?}"
        ))
        .into());
    }
    plans.try_into().map_err(|_| {
        StoreError::Constraint(format!("threat {threat_id} plan set is incomplete")).into()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_tier_has_three_actions() {
        for tier in Tier::ALL {
            assert_eq!(tier_actions(tier).len(), 3);
        }
    }

    #[test]
    fn hard_summary_mentions_counter_narrative() {
        assert!(result_summary(Tier::Hard).starts_with("Counter-narrative deployed"));
    }

    #[test]
    fn tier_tables_do_not_overlap() {
        for kind in tier_actions(Tier::Soft) {
            assert!(!tier_actions(Tier::Hard).contains(kind));
            assert!(!tier_actions(Tier::Nuclear).contains(kind));
        }
    }
}
