//! External collaborator seams
//!
//! Sentinel never talks to a database, crawler or UI directly. Each of those
//! sits behind one of the traits here:
//! - [`IntelligenceFeed`]: read-only source of candidate threat records
//! - [`SentinelStore`]: sole write target for every record type
//! - [`OperatorNotifier`]: consumer of lifecycle events

use crate::error::{FeedError, StoreError};
use crate::types::{
    Client, ClientId, ExecutionStatus, Fingerprint, GuardianRegistryEntry, MissionId,
    MissionLogEntry, PlanId, ResponsePlan, Severity, ThreatDiscovery, ThreatId, Tier,
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tokio::sync::mpsc;

/// Query issued to the intelligence feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntelligenceQuery {
    /// Entity names to match
    pub entity_names: Vec<String>,
    /// Oldest record of interest
    pub since: DateTime<Utc>,
}

/// A raw record returned by the feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IntelligenceRecord {
    /// Record content
    pub content: String,
    /// Source platform
    pub platform: String,
    /// Source URL
    pub url: Option<String>,
    /// Feed severity
    pub severity: Severity,
    /// Entities the upstream extractor detected
    pub detected_entities: Vec<String>,
    /// Publication time
    pub published_at: DateTime<Utc>,
}

/// Read-only intelligence source
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait IntelligenceFeed: Send + Sync {
    /// Records detected for any of the named entities since `query.since`
    async fn query(&self, query: &IntelligenceQuery) -> Result<Vec<IntelligenceRecord>, FeedError>;
}

/// Result of the store-side approval compare-and-set
#[derive(Debug, Clone, PartialEq)]
pub struct PlanApproval {
    /// Plan after the write
    pub plan: ResponsePlan,
    /// False if approval metadata was already present
    pub newly_approved: bool,
}

/// Persistent store
///
/// Implementations must make every single-row write atomic, make
/// `insert_threats` / `insert_plans_if_absent` all-or-nothing, keep
/// `(client, fingerprint)` unique across threats, keep one plan set per
/// threat, and enforce at most one non-terminal mission per plan in
/// `insert_mission`.
#[async_trait]
pub trait SentinelStore: Send + Sync {
    /// Insert client
    async fn insert_client(&self, client: Client) -> Result<(), StoreError>;

    /// Fetch client
    async fn get_client(&self, id: ClientId) -> Result<Option<Client>, StoreError>;

    /// Set the guardian flag; `None` if the client is unknown
    async fn set_guardian_mode(
        &self,
        id: ClientId,
        enabled: bool,
    ) -> Result<Option<Client>, StoreError>;

    /// Fingerprints of every threat stored for the client
    async fn threat_fingerprints(&self, client: ClientId)
        -> Result<HashSet<Fingerprint>, StoreError>;

    /// Insert a batch of threats atomically
    ///
    /// Rows whose `(client, fingerprint)` is already stored, or repeated
    /// earlier in the batch, are skipped. Returns the rows actually written.
    async fn insert_threats(
        &self,
        threats: Vec<ThreatDiscovery>,
    ) -> Result<Vec<ThreatDiscovery>, StoreError>;

    /// Fetch threat
    async fn get_threat(&self, id: ThreatId) -> Result<Option<ThreatDiscovery>, StoreError>;

    /// Threats for a client, newest first
    async fn list_threats(&self, client: ClientId) -> Result<Vec<ThreatDiscovery>, StoreError>;

    /// Set the resolution marker if unset; `None` if the threat is unknown
    async fn resolve_threat(
        &self,
        id: ThreatId,
        at: DateTime<Utc>,
    ) -> Result<Option<ThreatDiscovery>, StoreError>;

    /// Insert a threat's plan set unless it already has one
    ///
    /// Returns the stored set in tier order: `plans` when written, otherwise
    /// the existing rows.
    async fn insert_plans_if_absent(
        &self,
        threat: ThreatId,
        plans: Vec<ResponsePlan>,
    ) -> Result<Vec<ResponsePlan>, StoreError>;

    /// Fetch plan
    async fn get_plan(&self, id: PlanId) -> Result<Option<ResponsePlan>, StoreError>;

    /// Plans for a threat, in tier order
    async fn plans_for_threat(&self, threat: ThreatId) -> Result<Vec<ResponsePlan>, StoreError>;

    /// Record approval if unset; `None` if the plan is unknown
    async fn approve_plan(
        &self,
        id: PlanId,
        approver: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<PlanApproval>, StoreError>;

    /// Insert a mission; rejects a second non-terminal mission for one plan
    async fn insert_mission(&self, entry: MissionLogEntry) -> Result<(), StoreError>;

    /// Replace a mission if its stored status still equals `expected`
    async fn update_mission(
        &self,
        entry: &MissionLogEntry,
        expected: ExecutionStatus,
    ) -> Result<(), StoreError>;

    /// Fetch mission
    async fn get_mission(&self, id: MissionId) -> Result<Option<MissionLogEntry>, StoreError>;

    /// Missions for a plan, oldest first
    async fn missions_for_plan(&self, plan: PlanId) -> Result<Vec<MissionLogEntry>, StoreError>;

    /// Missions for a client, newest first
    async fn missions_for_client(
        &self,
        client: ClientId,
    ) -> Result<Vec<MissionLogEntry>, StoreError>;

    /// Missions currently in `status`
    async fn missions_with_status(
        &self,
        status: ExecutionStatus,
    ) -> Result<Vec<MissionLogEntry>, StoreError>;

    /// Guardian entries for a client
    async fn guardian_entries(
        &self,
        client: ClientId,
    ) -> Result<Vec<GuardianRegistryEntry>, StoreError>;

    /// Insert or replace guardian entries keyed by (client, entity)
    async fn upsert_guardian_entries(
        &self,
        entries: Vec<GuardianRegistryEntry>,
    ) -> Result<(), StoreError>;
}

/// Events surfaced to operators
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum OperatorEvent {
    /// Discovery persisted new threats
    ThreatsDiscovered {
        /// Client
        client_id: ClientId,
        /// New threats
        count: usize,
    },
    /// A plan received approval metadata
    PlanApproved {
        /// Plan
        plan_id: PlanId,
        /// Recorded approver
        approved_by: String,
    },
    /// A mission started executing
    MissionStarted {
        /// Mission
        mission_id: MissionId,
        /// Tier
        tier: Tier,
    },
    /// A mission completed
    MissionCompleted {
        /// Mission
        mission_id: MissionId,
        /// Tier
        tier: Tier,
        /// Score recorded
        effectiveness_score: f64,
    },
    /// A mission failed
    MissionFailed {
        /// Mission
        mission_id: MissionId,
        /// Tier
        tier: Tier,
        /// Failure reason
        reason: String,
    },
    /// Guardian mode switched on for entities
    GuardianEnabled {
        /// Client
        client_id: ClientId,
        /// Entities covered
        entities: Vec<String>,
    },
    /// Guardian mode switched off for entities
    GuardianDisabled {
        /// Client
        client_id: ClientId,
        /// Entities released
        entities: Vec<String>,
    },
}

/// Operator surface
pub trait OperatorNotifier: Send + Sync {
    /// Deliver an event; must not block
    fn notify(&self, event: OperatorEvent);
}

/// Notifier that only logs
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingNotifier;

impl OperatorNotifier for TracingNotifier {
    fn notify(&self, event: OperatorEvent) {
        match &event {
            OperatorEvent::MissionFailed { mission_id, reason, .. } => {
                tracing::warn!(mission = %mission_id, reason = %reason, "mission failed");
            }
            other => match serde_json::to_string(other) {
                Ok(json) => tracing::info!(event = %json, "operator event"),
                Err(_) => tracing::info!(event = ?other, "operator event"),
            },
        }
    }
}

/// Notifier forwarding events into a channel
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    sender: mpsc::UnboundedSender<OperatorEvent>,
}

impl ChannelNotifier {
    /// Create notifier and the receiving end
    #[must_use]
    pub fn new() -> (Self, mpsc::UnboundedReceiver<OperatorEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl OperatorNotifier for ChannelNotifier {
    fn notify(&self, event: OperatorEvent) {
        if self.sender.send(event).is_err() {
            tracing::debug!("operator channel closed; event dropped");
        }
    }
}
