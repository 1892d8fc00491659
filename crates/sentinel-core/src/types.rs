//! Core types for Sentinel
//!
//! Defines the records that flow through the pipeline:
//! - Clients and their monitored entities
//! - Threat discoveries and their fingerprints
//! - Tiered response plans
//! - Mission log entries and their status history
//! - Guardian registry entries

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use ulid::Ulid;

macro_rules! define_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub Ulid);

        impl $name {
            /// Generate new identifier
            #[inline]
            #[must_use]
            pub fn new() -> Self {
                Self(Ulid::new())
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }
    };
}

define_id!(
    /// Unique client identifier (ULID for sortability)
    ClientId
);
define_id!(
    /// Unique threat discovery identifier
    ThreatId
);
define_id!(
    /// Unique response plan identifier
    PlanId
);
define_id!(
    /// Unique mission log entry identifier
    MissionId
);
define_id!(
    /// Unique guardian registry entry identifier
    GuardianEntryId
);

/// A client whose entities are monitored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Client {
    /// Client identifier
    pub id: ClientId,
    /// Display name
    pub display_name: String,
    /// Entity names matched literally against intelligence records
    pub monitored_entities: Vec<String>,
    /// Whether guardian mode is on for this client
    pub guardian_mode_enabled: bool,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl Client {
    /// Create new client with guardian mode off
    #[must_use]
    pub fn new(display_name: impl Into<String>, monitored_entities: Vec<String>) -> Self {
        Self {
            id: ClientId::new(),
            display_name: display_name.into(),
            monitored_entities,
            guardian_mode_enabled: false,
            created_at: Utc::now(),
        }
    }
}

/// Informational severity attached by the intelligence feed
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    /// Low
    Low,
    /// Medium
    Medium,
    /// High
    High,
    /// Critical
    Critical,
}

impl Severity {
    /// Lowercase label
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => Err(format!("unknown severity '{other}'")),
        }
    }
}

/// Deduplication key for discovered content
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Fingerprint {
    /// Normalized platform name
    pub platform: String,
    /// SHA-256 hex of the normalized content
    pub content_hash: String,
}

/// A reputational threat matched to one of a client's entities
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ThreatDiscovery {
    /// Threat identifier
    pub id: ThreatId,
    /// Owning client
    pub client_id: ClientId,
    /// Entity name the record matched
    pub entity_name: String,
    /// Source platform as reported by the feed
    pub platform: String,
    /// Content excerpt
    pub content: String,
    /// Source URL, if the feed had one
    pub url: Option<String>,
    /// Deduplication fingerprint
    pub fingerprint: Fingerprint,
    /// When the threat was persisted
    pub discovered_at: DateTime<Utc>,
    /// Feed severity (informational)
    pub severity: Severity,
    /// Resolution marker
    pub resolved_at: Option<DateTime<Utc>>,
}

impl ThreatDiscovery {
    /// Content truncated to at most `limit` characters
    #[must_use]
    pub fn excerpt(&self, limit: usize) -> String {
        self.content.chars().take(limit).collect()
    }

    /// Whether the threat has been marked resolved
    #[inline]
    #[must_use]
    pub fn is_resolved(&self) -> bool {
        self.resolved_at.is_some()
    }
}

/// Response escalation tier
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Tier {
    /// Low-impact monitoring and engagement
    Soft,
    /// Direct intervention and counter-narrative
    Hard,
    /// Full escalation with legal and media response
    Nuclear,
}

impl Tier {
    /// All tiers in escalation order
    pub const ALL: [Tier; 3] = [Tier::Soft, Tier::Hard, Tier::Nuclear];

    /// Lowercase label
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Tier::Soft => "soft",
            Tier::Hard => "hard",
            Tier::Nuclear => "nuclear",
        }
    }

    /// Mission log action-type label
    #[must_use]
    pub fn action_type(self) -> String {
        format!("{}_response", self.as_str())
    }
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Kind of a planned response action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Escalate monitoring of the entity
    EscalateMonitoring,
    /// Amplify positive content
    AmplifyPositiveContent,
    /// Low-key direct engagement
    DirectEngagement,
    /// Deploy counter-narrative
    CounterNarrative,
    /// File formal platform reports
    PlatformReport,
    /// Initiate influencer outreach
    InfluencerOutreach,
    /// Initiate legal process
    LegalAction,
    /// Launch media campaign
    MediaCampaign,
    /// Escalate to executives
    ExecutiveEscalation,
}

impl ActionKind {
    /// Human-readable description
    #[must_use]
    pub fn description(self) -> &'static str {
        match self {
            ActionKind::EscalateMonitoring => "Escalate monitoring",
            ActionKind::AmplifyPositiveContent => "Amplify positive content",
            ActionKind::DirectEngagement => "Low-key direct engagement",
            ActionKind::CounterNarrative => "Deploy counter-narrative",
            ActionKind::PlatformReport => "File formal platform reports",
            ActionKind::InfluencerOutreach => "Initiate influencer outreach",
            ActionKind::LegalAction => "Initiate legal process",
            ActionKind::MediaCampaign => "Launch media campaign",
            ActionKind::ExecutiveEscalation => "Escalate to executives",
        }
    }
}

/// One step of a response plan
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlannedAction {
    /// Action kind
    pub kind: ActionKind,
    /// Description shown to operators
    pub description: String,
}

impl From<ActionKind> for PlannedAction {
    fn from(kind: ActionKind) -> Self {
        Self {
            kind,
            description: kind.description().to_string(),
        }
    }
}

/// A tiered response plan for one threat
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResponsePlan {
    /// Plan identifier
    pub id: PlanId,
    /// Parent threat
    pub threat_id: ThreatId,
    /// Escalation tier
    pub tier: Tier,
    /// Ordered actions
    pub actions: Vec<PlannedAction>,
    /// Approver identity, once approved
    pub approved_by: Option<String>,
    /// Approval time, once approved
    pub approved_at: Option<DateTime<Utc>>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

impl ResponsePlan {
    /// Whether the plan carries approval metadata
    #[inline]
    #[must_use]
    pub fn is_approved(&self) -> bool {
        self.approved_at.is_some()
    }
}

/// Mission execution status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStatus {
    /// Accepted, not yet running
    Queued,
    /// Running; awaiting completion
    Executing,
    /// Finished with an outcome
    Completed,
    /// Finished without an outcome
    Failed,
}

impl ExecutionStatus {
    /// Terminal states admit no further transitions
    #[inline]
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Failed)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            ExecutionStatus::Queued => "queued",
            ExecutionStatus::Executing => "executing",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        };
        f.write_str(label)
    }
}

/// A recorded status change
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusTransition {
    /// New status
    pub status: ExecutionStatus,
    /// When it was entered
    pub at: DateTime<Utc>,
}

/// Plan details frozen at execution start
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionSnapshot {
    /// Tier executed
    pub tier: Tier,
    /// Actions as they were when execution began
    pub actions: Vec<PlannedAction>,
    /// Entity the threat concerned
    pub entity_name: String,
    /// Truncated threat content
    pub threat_excerpt: String,
}

/// One execution attempt and its outcome
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MissionLogEntry {
    /// Mission identifier
    pub id: MissionId,
    /// Plan executed
    pub plan_id: PlanId,
    /// Owning client
    pub client_id: ClientId,
    /// Label such as `hard_response`
    pub action_type: String,
    /// Immutable plan snapshot
    pub details: ActionSnapshot,
    /// Current status
    pub status: ExecutionStatus,
    /// Every status entered, in order
    pub history: Vec<StatusTransition>,
    /// When execution started
    pub started_at: DateTime<Utc>,
    /// When a terminal state was reached
    pub completed_at: Option<DateTime<Utc>>,
    /// Outcome text
    pub result_summary: Option<String>,
    /// Outcome score in `[0, 1]`; present iff completed
    pub effectiveness_score: Option<f64>,
    /// Identity that ran the plan
    pub executed_by: String,
    /// Completion write attempts made so far
    pub attempts: u32,
    /// Last completion error
    pub last_error: Option<String>,
}

impl MissionLogEntry {
    /// Statuses entered so far
    #[must_use]
    pub fn status_sequence(&self) -> Vec<ExecutionStatus> {
        self.history.iter().map(|t| t.status).collect()
    }

    /// Tier executed
    #[inline]
    #[must_use]
    pub fn tier(&self) -> Tier {
        self.details.tier
    }
}

/// Guardian registry status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GuardianStatus {
    /// Not monitored autonomously
    Inactive,
    /// Monitored autonomously
    Active,
}

/// Per-entity guardian setting
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GuardianRegistryEntry {
    /// Entry identifier
    pub id: GuardianEntryId,
    /// Owning client
    pub client_id: ClientId,
    /// Covered entity
    pub entity_name: String,
    /// Registry status
    pub status: GuardianStatus,
    /// Auto-response flag; only ever true while active
    pub auto_response_enabled: bool,
    /// Last change
    pub updated_at: DateTime<Utc>,
}

impl GuardianRegistryEntry {
    /// Create inactive entry
    #[must_use]
    pub fn inactive(client_id: ClientId, entity_name: impl Into<String>) -> Self {
        Self {
            id: GuardianEntryId::new(),
            client_id,
            entity_name: entity_name.into(),
            status: GuardianStatus::Inactive,
            auto_response_enabled: false,
            updated_at: Utc::now(),
        }
    }

    /// Turn on autonomous response
    pub fn activate(&mut self, at: DateTime<Utc>) {
        self.status = GuardianStatus::Active;
        self.auto_response_enabled = true;
        self.updated_at = at;
    }

    /// Turn off autonomous response
    pub fn deactivate(&mut self, at: DateTime<Utc>) {
        self.status = GuardianStatus::Inactive;
        self.auto_response_enabled = false;
        self.updated_at = at;
    }

    /// Active with auto-response on
    #[inline]
    #[must_use]
    pub fn allows_auto_response(&self) -> bool {
        self.status == GuardianStatus::Active && self.auto_response_enabled
    }

    /// Auto-response implies active
    #[inline]
    #[must_use]
    pub fn is_consistent(&self) -> bool {
        !self.auto_response_enabled || self.status == GuardianStatus::Active
    }
}

/// Outcome of one discovery run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveryResult {
    /// Client the run was for
    pub client_id: ClientId,
    /// Newly persisted threats, in feed order
    pub created: Vec<ThreatId>,
    /// Number of new threats
    pub count: usize,
    /// Records skipped as already known
    pub duplicates_skipped: usize,
}

/// Approval metadata returned by the gate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalResult {
    /// Plan approved
    pub plan_id: PlanId,
    /// Recorded approver (the first one)
    pub approved_by: String,
    /// Recorded approval time (the first one)
    pub approved_at: DateTime<Utc>,
    /// False when the plan was already approved
    pub newly_approved: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_generation() {
        let id1 = PlanId::new();
        let id2 = PlanId::new();
        assert_ne!(id1, id2);
    }

    #[test]
    fn severity_parse() {
        assert_eq!("High".parse::<Severity>().unwrap(), Severity::High);
        assert_eq!(" critical ".parse::<Severity>().unwrap(), Severity::Critical);
        assert!("severe".parse::<Severity>().is_err());
    }

    #[test]
    fn tier_order_and_labels() {
        assert!(Tier::Soft < Tier::Hard && Tier::Hard < Tier::Nuclear);
        assert_eq!(Tier::Hard.action_type(), "hard_response");
        assert_eq!(Tier::ALL.len(), 3);
    }

    #[test]
    fn excerpt_counts_chars() {
        let threat = ThreatDiscovery {
            id: ThreatId::new(),
            client_id: ClientId::new(),
            entity_name: "Acme Corp".to_string(),
            platform: "Reddit".to_string(),
            content: "é".repeat(300),
            url: None,
            fingerprint: Fingerprint {
                platform: "reddit".to_string(),
                content_hash: String::new(),
            },
            discovered_at: Utc::now(),
            severity: Severity::High,
            resolved_at: None,
        };
        assert_eq!(threat.excerpt(200).chars().count(), 200);
    }

    #[test]
    fn guardian_entry_activation() {
        let mut entry = GuardianRegistryEntry::inactive(ClientId::new(), "Acme Corp");
        assert!(!entry.allows_auto_response());

        entry.activate(Utc::now());
        assert!(entry.allows_auto_response());
        assert!(entry.is_consistent());

        entry.deactivate(Utc::now());
        assert_eq!(entry.status, GuardianStatus::Inactive);
        assert!(!entry.auto_response_enabled);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!ExecutionStatus::Queued.is_terminal());
        assert!(!ExecutionStatus::Executing.is_terminal());
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
    }
}
