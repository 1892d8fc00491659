//! Guardian monitor
//!
//! Per-entity autonomous response. A client with guardian mode on gets its
//! covered entities swept on a schedule, and threats against them are
//! answered without a human approver. Tier selection is delegated to an
//! injected [`TierPolicy`].

use crate::discovery::{normalize_entity_names, DiscoveryCoordinator};
use crate::error::SentinelError;
use crate::execution::ExecutionEngine;
use crate::planning::PlanGenerator;
use crate::ports::{OperatorEvent, OperatorNotifier, SentinelStore};
use crate::types::{
    ClientId, DiscoveryResult, GuardianRegistryEntry, MissionLogEntry, Severity, ThreatDiscovery,
    ThreatId, Tier,
};
use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Picks the tier guardian mode executes for a threat
pub trait TierPolicy: Send + Sync {
    /// Tier to execute
    fn select(&self, threat: &ThreatDiscovery) -> Tier;
}

/// Tier chosen from the feed severity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityTierPolicy {
    /// Tier for low severity
    pub low: Tier,
    /// Tier for medium severity
    pub medium: Tier,
    /// Tier for high severity
    pub high: Tier,
    /// Tier for critical severity
    pub critical: Tier,
}

impl SeverityTierPolicy {
    /// Create policy from an explicit mapping
    #[must_use]
    pub fn new(low: Tier, medium: Tier, high: Tier, critical: Tier) -> Self {
        Self {
            low,
            medium,
            high,
            critical,
        }
    }
}

impl TierPolicy for SeverityTierPolicy {
    fn select(&self, threat: &ThreatDiscovery) -> Tier {
        match threat.severity {
            Severity::Low => self.low,
            Severity::Medium => self.medium,
            Severity::High => self.high,
            Severity::Critical => self.critical,
        }
    }
}

/// Policy that always picks the same tier
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FixedTierPolicy(pub Tier);

impl TierPolicy for FixedTierPolicy {
    fn select(&self, _threat: &ThreatDiscovery) -> Tier {
        self.0
    }
}

/// Whether guardian auto-response covers `entity` for the client
///
/// True iff the client flag is set and the entity's entry is active with
/// auto-response enabled. Unknown clients are not covered.
///
/// # Errors
/// - `SentinelError::PersistenceFailure` if a read fails
pub async fn auto_response_applies(
    store: &dyn SentinelStore,
    client_id: ClientId,
    entity: &str,
) -> Result<bool, SentinelError> {
    let Some(client) = store.get_client(client_id).await? else {
        return Ok(false);
    };
    if !client.guardian_mode_enabled {
        return Ok(false);
    }
    Ok(store
        .guardian_entries(client_id)
        .await?
        .iter()
        .any(|e| e.entity_name == entity && e.allows_auto_response()))
}

/// Outcome of one scheduled sweep
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SweepReport {
    /// Discovery run over the monitored entities
    pub discovery: DiscoveryResult,
    /// Missions started for covered threats
    pub missions: Vec<MissionLogEntry>,
    /// New threats guardian mode does not cover
    pub uncovered: Vec<ThreatId>,
    /// Covered threats whose response could not start
    pub failures: Vec<(ThreatId, String)>,
}

/// Guardian monitor
pub struct GuardianMonitor {
    store: Arc<dyn SentinelStore>,
    discovery: Arc<DiscoveryCoordinator>,
    planner: Arc<PlanGenerator>,
    engine: Arc<ExecutionEngine>,
    notifier: Arc<dyn OperatorNotifier>,
    system_approver: String,
    tier_policy: Option<Arc<dyn TierPolicy>>,
}

impl GuardianMonitor {
    /// Create monitor without a tier policy
    #[must_use]
    pub fn new(
        store: Arc<dyn SentinelStore>,
        discovery: Arc<DiscoveryCoordinator>,
        planner: Arc<PlanGenerator>,
        engine: Arc<ExecutionEngine>,
        notifier: Arc<dyn OperatorNotifier>,
        system_approver: impl Into<String>,
    ) -> Self {
        Self {
            store,
            discovery,
            planner,
            engine,
            notifier,
            system_approver: system_approver.into(),
            tier_policy: None,
        }
    }

    /// With tier policy
    #[must_use]
    pub fn with_tier_policy(mut self, policy: Arc<dyn TierPolicy>) -> Self {
        self.tier_policy = Some(policy);
        self
    }

    /// Enable guardian mode for the named entities
    ///
    /// Entries for other entities are left as they are.
    ///
    /// # Errors
    /// - `SentinelError::InvalidRequest` on an empty list or blank name
    /// - `SentinelError::ClientNotFound` if the client is unknown
    /// - `SentinelError::PersistenceFailure` if a write fails
    pub async fn enable_guardian(
        &self,
        client_id: ClientId,
        entity_names: &[String],
    ) -> Result<Vec<GuardianRegistryEntry>, SentinelError> {
        let names = normalize_entity_names(entity_names)?;
        if self.store.get_client(client_id).await?.is_none() {
            return Err(SentinelError::ClientNotFound(client_id));
        }

        // entries before the flag: a failed upsert leaves the client untouched
        let now = Utc::now();
        let entries = self
            .named_entries(client_id, &names, |entry| entry.activate(now))
            .await?;
        self.store.upsert_guardian_entries(entries.clone()).await?;
        if self.store.set_guardian_mode(client_id, true).await?.is_none() {
            return Err(SentinelError::ClientNotFound(client_id));
        }

        tracing::info!(client = %client_id, entities = ?names, "guardian mode enabled");
        self.notifier.notify(OperatorEvent::GuardianEnabled {
            client_id,
            entities: names,
        });
        Ok(entries)
    }

    /// Disable guardian mode for the named entities
    ///
    /// The client flag is cleared once no active entry remains.
    ///
    /// # Errors
    /// Same as [`GuardianMonitor::enable_guardian`].
    pub async fn disable_guardian(
        &self,
        client_id: ClientId,
        entity_names: &[String],
    ) -> Result<Vec<GuardianRegistryEntry>, SentinelError> {
        let names = normalize_entity_names(entity_names)?;
        if self.store.get_client(client_id).await?.is_none() {
            return Err(SentinelError::ClientNotFound(client_id));
        }

        let now = Utc::now();
        let entries = self
            .named_entries(client_id, &names, |entry| entry.deactivate(now))
            .await?;
        self.store.upsert_guardian_entries(entries.clone()).await?;

        let any_active = self
            .store
            .guardian_entries(client_id)
            .await?
            .iter()
            .any(GuardianRegistryEntry::allows_auto_response);
        if !any_active {
            self.store.set_guardian_mode(client_id, false).await?;
        }

        tracing::info!(
            client = %client_id,
            entities = ?names,
            any_active,
            "guardian mode disabled"
        );
        self.notifier.notify(OperatorEvent::GuardianDisabled {
            client_id,
            entities: names,
        });
        Ok(entries)
    }

    /// Guardian entries for a client, ordered by entity name
    ///
    /// # Errors
    /// - `SentinelError::ClientNotFound` if the client is unknown
    pub async fn get_guardian_status(
        &self,
        client_id: ClientId,
    ) -> Result<Vec<GuardianRegistryEntry>, SentinelError> {
        if self.store.get_client(client_id).await?.is_none() {
            return Err(SentinelError::ClientNotFound(client_id));
        }
        let mut entries = self.store.guardian_entries(client_id).await?;
        entries.sort_by(|a, b| a.entity_name.cmp(&b.entity_name));
        Ok(entries)
    }

    /// Respond to a threat without a human approver
    ///
    /// Returns `None` when guardian mode does not cover the threat's entity.
    ///
    /// # Errors
    /// - `SentinelError::ThreatNotFound` if the threat is unknown
    /// - `SentinelError::TierPolicyMissing` if the entity is covered but no policy is set
    /// - any error from plan generation or execution
    pub async fn auto_respond(
        &self,
        threat_id: ThreatId,
    ) -> Result<Option<MissionLogEntry>, SentinelError> {
        let threat = self.discovery.get_threat(threat_id).await?;
        if !auto_response_applies(self.store.as_ref(), threat.client_id, &threat.entity_name).await?
        {
            tracing::debug!(
                threat = %threat_id,
                entity = %threat.entity_name,
                "guardian does not cover entity"
            );
            return Ok(None);
        }
        let policy = self
            .tier_policy
            .as_ref()
            .ok_or(SentinelError::TierPolicyMissing)?;

        let tier = policy.select(&threat);
        let plans = self.planner.generate_plans(threat_id).await?;
        let plan = plans
            .iter()
            .find(|p| p.tier == tier)
            .ok_or_else(|| {
                SentinelError::InvalidRequest(format!("no {tier} plan for threat {threat_id}"))
            })?;

        tracing::info!(threat = %threat_id, %tier, "guardian auto-response");
        let entry = self.engine.execute(plan.id, &self.system_approver).await?;
        Ok(Some(entry))
    }

    /// Scheduled trigger: discover over monitored entities and auto-respond
    ///
    /// # Errors
    /// - `SentinelError::ClientNotFound` if the client is unknown
    /// - `SentinelError::InvalidRequest` if the client monitors no entities
    /// - `SentinelError::TierPolicyMissing` if a new threat is covered but no policy is set
    /// - any discovery error
    pub async fn sweep(&self, client_id: ClientId) -> Result<SweepReport, SentinelError> {
        let client = self
            .store
            .get_client(client_id)
            .await?
            .ok_or(SentinelError::ClientNotFound(client_id))?;

        let discovery = self
            .discovery
            .discover_threats(client_id, &client.monitored_entities)
            .await?;

        let mut report = SweepReport {
            discovery,
            missions: Vec::new(),
            uncovered: Vec::new(),
            failures: Vec::new(),
        };
        let created = report.discovery.created.clone();
        for threat_id in created {
            match self.auto_respond(threat_id).await {
                Ok(Some(entry)) => report.missions.push(entry),
                Ok(None) => report.uncovered.push(threat_id),
                Err(SentinelError::TierPolicyMissing) => {
                    return Err(SentinelError::TierPolicyMissing);
                }
                Err(err) => {
                    tracing::warn!(
                        threat = %threat_id,
                        error = %err,
                        "guardian auto-response failed"
                    );
                    report.failures.push((threat_id, err.to_string()));
                }
            }
        }

        tracing::info!(
            client = %client_id,
            discovered = report.discovery.count,
            missions = report.missions.len(),
            failures = report.failures.len(),
            "guardian sweep finished"
        );
        Ok(report)
    }

    async fn named_entries(
        &self,
        client_id: ClientId,
        names: &[String],
        mut apply: impl FnMut(&mut GuardianRegistryEntry),
    ) -> Result<Vec<GuardianRegistryEntry>, SentinelError> {
        let mut existing: HashMap<String, GuardianRegistryEntry> = self
            .store
            .guardian_entries(client_id)
            .await?
            .into_iter()
            .map(|e| (e.entity_name.clone(), e))
            .collect();

        Ok(names
            .iter()
            .map(|name| {
                let mut entry = existing
                    .remove(name)
                    .unwrap_or_else(|| GuardianRegistryEntry::inactive(client_id, name.as_str()));
                apply(&mut entry);
                entry
            })
            .collect())
    }
}
