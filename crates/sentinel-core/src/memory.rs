//! In-memory [`SentinelStore`]
//!
//! Each table is a concurrent map, so single-row writes are atomic per shard.
//! Batch inserts and the uniqueness checks (threat fingerprint, plan set,
//! active mission) take a store-wide lock so they are all-or-nothing with
//! respect to each other.

use crate::error::StoreError;
use crate::ports::{PlanApproval, SentinelStore};
use crate::types::{
    Client, ClientId, ExecutionStatus, Fingerprint, GuardianRegistryEntry, MissionId,
    MissionLogEntry, PlanId, ResponsePlan, ThreatDiscovery, ThreatId,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use parking_lot::Mutex;
use std::collections::HashSet;

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryStore {
    clients: DashMap<ClientId, Client>,
    threats: DashMap<ThreatId, ThreatDiscovery>,
    /// (client, fingerprint) → threat
    fingerprints: DashMap<(ClientId, Fingerprint), ThreatId>,
    plans: DashMap<PlanId, ResponsePlan>,
    missions: DashMap<MissionId, MissionLogEntry>,
    /// Plan → its single non-terminal mission
    active_by_plan: DashMap<PlanId, MissionId>,
    guardian: DashMap<(ClientId, String), GuardianRegistryEntry>,
    batch_lock: Mutex<()>,
}

impl MemoryStore {
    /// Create empty store
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Total mission rows
    #[must_use]
    pub fn mission_count(&self) -> usize {
        self.missions.len()
    }

    /// Total threat rows
    #[must_use]
    pub fn threat_count(&self) -> usize {
        self.threats.len()
    }

    /// Total plan rows
    #[must_use]
    pub fn plan_count(&self) -> usize {
        self.plans.len()
    }

    fn sorted_plans(&self, threat: ThreatId) -> Vec<ResponsePlan> {
        let mut plans: Vec<ResponsePlan> = self
            .plans
            .iter()
            .filter(|p| p.threat_id == threat)
            .map(|p| p.value().clone())
            .collect();
        plans.sort_by_key(|p| p.tier);
        plans
    }
}

#[async_trait]
impl SentinelStore for MemoryStore {
    async fn insert_client(&self, client: Client) -> Result<(), StoreError> {
        match self.clients.entry(client.id) {
            Entry::Occupied(_) => Err(StoreError::Constraint(format!(
                "client {} already exists",
                client.id
            ))),
            Entry::Vacant(slot) => {
                slot.insert(client);
                Ok(())
            }
        }
    }

    async fn get_client(&self, id: ClientId) -> Result<Option<Client>, StoreError> {
        Ok(self.clients.get(&id).map(|c| c.value().clone()))
    }

    async fn set_guardian_mode(
        &self,
        id: ClientId,
        enabled: bool,
    ) -> Result<Option<Client>, StoreError> {
        Ok(self.clients.get_mut(&id).map(|mut client| {
            client.guardian_mode_enabled = enabled;
            client.value().clone()
        }))
    }

    async fn threat_fingerprints(
        &self,
        client: ClientId,
    ) -> Result<HashSet<Fingerprint>, StoreError> {
        Ok(self
            .threats
            .iter()
            .filter(|t| t.client_id == client)
            .map(|t| t.fingerprint.clone())
            .collect())
    }

    async fn insert_threats(
        &self,
        threats: Vec<ThreatDiscovery>,
    ) -> Result<Vec<ThreatDiscovery>, StoreError> {
        let _guard = self.batch_lock.lock();
        if let Some(dup) = threats.iter().find(|t| self.threats.contains_key(&t.id)) {
            return Err(StoreError::Constraint(format!("threat {} already exists", dup.id)));
        }

        let mut seen = HashSet::new();
        let fresh: Vec<ThreatDiscovery> = threats
            .into_iter()
            .filter(|t| {
                let key = (t.client_id, t.fingerprint.clone());
                !self.fingerprints.contains_key(&key) && seen.insert(key)
            })
            .collect();
        for threat in &fresh {
            self.fingerprints
                .insert((threat.client_id, threat.fingerprint.clone()), threat.id);
            self.threats.insert(threat.id, threat.clone());
        }
        Ok(fresh)
    }

    async fn get_threat(&self, id: ThreatId) -> Result<Option<ThreatDiscovery>, StoreError> {
        Ok(self.threats.get(&id).map(|t| t.value().clone()))
    }

    async fn list_threats(&self, client: ClientId) -> Result<Vec<ThreatDiscovery>, StoreError> {
        let mut threats: Vec<ThreatDiscovery> = self
            .threats
            .iter()
            .filter(|t| t.client_id == client)
            .map(|t| t.value().clone())
            .collect();
        threats.sort_by(|a, b| b.discovered_at.cmp(&a.discovered_at).then(b.id.cmp(&a.id)));
        Ok(threats)
    }

    async fn resolve_threat(
        &self,
        id: ThreatId,
        at: DateTime<Utc>,
    ) -> Result<Option<ThreatDiscovery>, StoreError> {
        Ok(self.threats.get_mut(&id).map(|mut threat| {
            if threat.resolved_at.is_none() {
                threat.resolved_at = Some(at);
            }
            threat.value().clone()
        }))
    }

    async fn insert_plans_if_absent(
        &self,
        threat: ThreatId,
        mut plans: Vec<ResponsePlan>,
    ) -> Result<Vec<ResponsePlan>, StoreError> {
        if let Some(stray) = plans.iter().find(|p| p.threat_id != threat) {
            return Err(StoreError::Constraint(format!(
                "plan {} belongs to threat {}, not {threat}",
                stray.id, stray.threat_id
            )));
        }

        let _guard = self.batch_lock.lock();
        let existing = self.sorted_plans(threat);
        if !existing.is_empty() {
            return Ok(existing);
        }
        if let Some(dup) = plans.iter().find(|p| self.plans.contains_key(&p.id)) {
            return Err(StoreError::Constraint(format!("plan {} already exists", dup.id)));
        }
        for plan in &plans {
            self.plans.insert(plan.id, plan.clone());
        }
        plans.sort_by_key(|p| p.tier);
        Ok(plans)
    }

    async fn get_plan(&self, id: PlanId) -> Result<Option<ResponsePlan>, StoreError> {
        Ok(self.plans.get(&id).map(|p| p.value().clone()))
    }

    async fn plans_for_threat(&self, threat: ThreatId) -> Result<Vec<ResponsePlan>, StoreError> {
        Ok(self.sorted_plans(threat))
    }

    async fn approve_plan(
        &self,
        id: PlanId,
        approver: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<PlanApproval>, StoreError> {
        Ok(self.plans.get_mut(&id).map(|mut plan| {
            let newly_approved = plan.approved_at.is_none();
            if newly_approved {
                plan.approved_by = Some(approver.to_string());
                plan.approved_at = Some(at);
            }
            PlanApproval {
                plan: plan.value().clone(),
                newly_approved,
            }
        }))
    }

    async fn insert_mission(&self, entry: MissionLogEntry) -> Result<(), StoreError> {
        let _guard = self.batch_lock.lock();
        if self.missions.contains_key(&entry.id) {
            return Err(StoreError::Constraint(format!(
                "mission {} already exists",
                entry.id
            )));
        }
        if !entry.status.is_terminal() {
            match self.active_by_plan.entry(entry.plan_id) {
                Entry::Occupied(existing) => {
                    return Err(StoreError::ActiveMissionExists {
                        plan_id: entry.plan_id,
                        mission_id: *existing.get(),
                    });
                }
                Entry::Vacant(slot) => {
                    slot.insert(entry.id);
                }
            }
        }
        self.missions.insert(entry.id, entry);
        Ok(())
    }

    async fn update_mission(
        &self,
        entry: &MissionLogEntry,
        expected: ExecutionStatus,
    ) -> Result<(), StoreError> {
        let mut stored = self
            .missions
            .get_mut(&entry.id)
            .ok_or_else(|| StoreError::NotFound(format!("mission {}", entry.id)))?;
        if stored.status != expected {
            return Err(StoreError::StaleWrite {
                mission_id: entry.id,
                expected,
                actual: stored.status,
            });
        }
        *stored = entry.clone();
        if entry.status.is_terminal() {
            self.active_by_plan
                .remove_if(&entry.plan_id, |_, active| *active == entry.id);
        }
        Ok(())
    }

    async fn get_mission(&self, id: MissionId) -> Result<Option<MissionLogEntry>, StoreError> {
        Ok(self.missions.get(&id).map(|m| m.value().clone()))
    }

    async fn missions_for_plan(&self, plan: PlanId) -> Result<Vec<MissionLogEntry>, StoreError> {
        let mut missions: Vec<MissionLogEntry> = self
            .missions
            .iter()
            .filter(|m| m.plan_id == plan)
            .map(|m| m.value().clone())
            .collect();
        missions.sort_by_key(|m| (m.started_at, m.id));
        Ok(missions)
    }

    async fn missions_for_client(
        &self,
        client: ClientId,
    ) -> Result<Vec<MissionLogEntry>, StoreError> {
        let mut missions: Vec<MissionLogEntry> = self
            .missions
            .iter()
            .filter(|m| m.client_id == client)
            .map(|m| m.value().clone())
            .collect();
        missions.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        Ok(missions)
    }

    async fn missions_with_status(
        &self,
        status: ExecutionStatus,
    ) -> Result<Vec<MissionLogEntry>, StoreError> {
        Ok(self
            .missions
            .iter()
            .filter(|m| m.status == status)
            .map(|m| m.value().clone())
            .collect())
    }

    async fn guardian_entries(
        &self,
        client: ClientId,
    ) -> Result<Vec<GuardianRegistryEntry>, StoreError> {
        let mut entries: Vec<GuardianRegistryEntry> = self
            .guardian
            .iter()
            .filter(|e| e.client_id == client)
            .map(|e| e.value().clone())
            .collect();
        entries.sort_by(|a, b| a.entity_name.cmp(&b.entity_name));
        Ok(entries)
    }

    async fn upsert_guardian_entries(
        &self,
        entries: Vec<GuardianRegistryEntry>,
    ) -> Result<(), StoreError> {
        if let Some(bad) = entries.iter().find(|e| !e.is_consistent()) {
            return Err(StoreError::Constraint(format!(
                "guardian entry for '{}' enables auto-response while inactive",
                bad.entity_name
            )));
        }
        let _guard = self.batch_lock.lock();
        for entry in entries {
            self.guardian
                .insert((entry.client_id, entry.entity_name.clone()), entry);
        }
        Ok(())
    }
}
