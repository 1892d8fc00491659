//! Sentinel facade
//!
//! Wires the pipeline components over one store, feed and notifier:
//! - Discovery coordinator
//! - Plan generator
//! - Approval gate
//! - Execution engine
//! - Guardian monitor

use crate::approval::ApprovalGate;
use crate::config::SentinelConfig;
use crate::discovery::{normalize_entity_names, DiscoveryCoordinator};
use crate::error::SentinelError;
use crate::execution::ExecutionEngine;
use crate::guardian::{GuardianMonitor, SweepReport, TierPolicy};
use crate::planning::PlanGenerator;
use crate::ports::{IntelligenceFeed, OperatorNotifier, SentinelStore};
use crate::types::{
    ApprovalResult, Client, ClientId, DiscoveryResult, GuardianRegistryEntry, MissionId,
    MissionLogEntry, PlanId, ResponsePlan, ThreatDiscovery, ThreatId,
};
use std::sync::Arc;

/// Threat-response orchestrator
pub struct Sentinel {
    config: SentinelConfig,
    store: Arc<dyn SentinelStore>,
    discovery: Arc<DiscoveryCoordinator>,
    planner: Arc<PlanGenerator>,
    gate: Arc<ApprovalGate>,
    engine: Arc<ExecutionEngine>,
    guardian: GuardianMonitor,
}

impl Sentinel {
    /// Create orchestrator and start the completion worker
    ///
    /// # Errors
    /// - `SentinelError::Config` if the configuration is invalid
    ///
    /// # Panics
    /// Panics if called outside a tokio runtime.
    pub fn new(
        config: SentinelConfig,
        store: Arc<dyn SentinelStore>,
        feed: Arc<dyn IntelligenceFeed>,
        notifier: Arc<dyn OperatorNotifier>,
    ) -> Result<Self, SentinelError> {
        config.validate()?;

        let discovery = Arc::new(DiscoveryCoordinator::new(
            config.clone(),
            store.clone(),
            feed,
            notifier.clone(),
        ));
        let planner = Arc::new(PlanGenerator::new(store.clone()));
        let gate = Arc::new(ApprovalGate::new(store.clone(), notifier.clone()));
        let engine = Arc::new(ExecutionEngine::new(
            config.clone(),
            store.clone(),
            gate.clone(),
            notifier.clone(),
        ));
        let guardian = GuardianMonitor::new(
            store.clone(),
            discovery.clone(),
            planner.clone(),
            engine.clone(),
            notifier,
            config.system_approver.clone(),
        );

        tracing::info!(
            completion_delay_ms = config.completion_delay_ms,
            recency_window_hours = config.recency_window_hours,
            "sentinel started"
        );

        Ok(Self {
            config,
            store,
            discovery,
            planner,
            gate,
            engine,
            guardian,
        })
    }

    /// With guardian tier policy
    #[must_use]
    pub fn with_tier_policy(mut self, policy: Arc<dyn TierPolicy>) -> Self {
        self.guardian = self.guardian.with_tier_policy(policy);
        self
    }

    /// Register a client and its monitored entities
    ///
    /// # Errors
    /// - `SentinelError::InvalidRequest` on a blank name, no entities or a blank entity
    /// - `SentinelError::PersistenceFailure` if the write fails
    #[tracing::instrument(skip(self))]
    pub async fn register_client(
        &self,
        display_name: &str,
        entities: &[String],
    ) -> Result<Client, SentinelError> {
        let display_name = display_name.trim();
        if display_name.is_empty() {
            return Err(SentinelError::InvalidRequest(
                "client name cannot be empty".to_string(),
            ));
        }
        let client = Client::new(display_name, normalize_entity_names(entities)?);
        self.store.insert_client(client.clone()).await?;
        tracing::info!(client = %client.id, "client registered");
        Ok(client)
    }

    /// Fetch a client
    ///
    /// # Errors
    /// - `SentinelError::ClientNotFound` if the client is unknown
    pub async fn get_client(&self, client_id: ClientId) -> Result<Client, SentinelError> {
        self.store
            .get_client(client_id)
            .await?
            .ok_or(SentinelError::ClientNotFound(client_id))
    }

    /// See [`DiscoveryCoordinator::discover_threats`]
    ///
    /// # Errors
    /// As the delegate.
    #[tracing::instrument(skip(self))]
    pub async fn discover_threats(
        &self,
        client_id: ClientId,
        entity_names: &[String],
    ) -> Result<DiscoveryResult, SentinelError> {
        self.discovery.discover_threats(client_id, entity_names).await
    }

    /// See [`DiscoveryCoordinator::list_threats`]
    ///
    /// # Errors
    /// As the delegate.
    pub async fn list_threats(
        &self,
        client_id: ClientId,
    ) -> Result<Vec<ThreatDiscovery>, SentinelError> {
        self.discovery.list_threats(client_id).await
    }

    /// See [`DiscoveryCoordinator::resolve_threat`]
    ///
    /// # Errors
    /// As the delegate.
    #[tracing::instrument(skip(self))]
    pub async fn resolve_threat(
        &self,
        threat_id: ThreatId,
    ) -> Result<ThreatDiscovery, SentinelError> {
        self.discovery.resolve_threat(threat_id).await
    }

    /// See [`PlanGenerator::generate_plans`]
    ///
    /// # Errors
    /// As the delegate.
    #[tracing::instrument(skip(self))]
    pub async fn generate_plans(
        &self,
        threat_id: ThreatId,
    ) -> Result<[ResponsePlan; 3], SentinelError> {
        self.planner.generate_plans(threat_id).await
    }

    /// See [`PlanGenerator::plans_for_threat`]
    ///
    /// # Errors
    /// As the delegate.
    pub async fn plans_for_threat(
        &self,
        threat_id: ThreatId,
    ) -> Result<Vec<ResponsePlan>, SentinelError> {
        self.planner.plans_for_threat(threat_id).await
    }

    /// See [`ApprovalGate::approve`]
    ///
    /// # Errors
    /// As the delegate.
    #[tracing::instrument(skip(self))]
    pub async fn approve(
        &self,
        plan_id: PlanId,
        approver: &str,
    ) -> Result<ApprovalResult, SentinelError> {
        self.gate.approve(plan_id, approver).await
    }

    /// See [`ExecutionEngine::execute`]
    ///
    /// # Errors
    /// As the delegate.
    #[tracing::instrument(skip(self))]
    pub async fn execute(
        &self,
        plan_id: PlanId,
        approver: &str,
    ) -> Result<MissionLogEntry, SentinelError> {
        self.engine.execute(plan_id, approver).await
    }

    /// See [`ExecutionEngine::cancel`]
    ///
    /// # Errors
    /// As the delegate.
    #[tracing::instrument(skip(self))]
    pub async fn cancel_mission(
        &self,
        mission_id: MissionId,
    ) -> Result<MissionLogEntry, SentinelError> {
        self.engine.cancel(mission_id).await
    }

    /// See [`ExecutionEngine::get_mission`]
    ///
    /// # Errors
    /// As the delegate.
    pub async fn get_mission(
        &self,
        mission_id: MissionId,
    ) -> Result<MissionLogEntry, SentinelError> {
        self.engine.get_mission(mission_id).await
    }

    /// See [`GuardianMonitor::enable_guardian`]
    ///
    /// # Errors
    /// As the delegate.
    #[tracing::instrument(skip(self))]
    pub async fn enable_guardian(
        &self,
        client_id: ClientId,
        entity_names: &[String],
    ) -> Result<Vec<GuardianRegistryEntry>, SentinelError> {
        self.guardian.enable_guardian(client_id, entity_names).await
    }

    /// See [`GuardianMonitor::disable_guardian`]
    ///
    /// # Errors
    /// As the delegate.
    #[tracing::instrument(skip(self))]
    pub async fn disable_guardian(
        &self,
        client_id: ClientId,
        entity_names: &[String],
    ) -> Result<Vec<GuardianRegistryEntry>, SentinelError> {
        self.guardian.disable_guardian(client_id, entity_names).await
    }

    /// See [`GuardianMonitor::get_guardian_status`]
    ///
    /// # Errors
    /// As the delegate.
    pub async fn get_guardian_status(
        &self,
        client_id: ClientId,
    ) -> Result<Vec<GuardianRegistryEntry>, SentinelError> {
        self.guardian.get_guardian_status(client_id).await
    }

    /// See [`GuardianMonitor::sweep`]
    ///
    /// # Errors
    /// As the delegate.
    #[tracing::instrument(skip(self))]
    pub async fn guardian_sweep(&self, client_id: ClientId) -> Result<SweepReport, SentinelError> {
        self.guardian.sweep(client_id).await
    }

    /// Configuration in use
    #[inline]
    #[must_use]
    pub fn config(&self) -> &SentinelConfig {
        &self.config
    }

    /// Discovery coordinator
    #[inline]
    #[must_use]
    pub fn discovery(&self) -> &DiscoveryCoordinator {
        &self.discovery
    }

    /// Execution engine
    #[inline]
    #[must_use]
    pub fn engine(&self) -> &ExecutionEngine {
        &self.engine
    }

    /// Guardian monitor
    #[inline]
    #[must_use]
    pub fn guardian(&self) -> &GuardianMonitor {
        &self.guardian
    }
}
