//! Sentinel Core - threat-response orchestration
//!
//! Watches intelligence for a client's named entities and drives the
//! response pipeline:
//! - Discovers and deduplicates threats
//! - Generates soft, hard and nuclear response plans
//! - Gates execution on human approval
//! - Executes plans and records every attempt in the mission ledger
//! - Responds autonomously for entities under guardian mode
//!
//! # Example
//!
//! ```rust,ignore
//! use sentinel_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example(feed: Arc<dyn IntelligenceFeed>) -> Result<(), SentinelError> {
//! let sentinel = Sentinel::new(
//!     SentinelConfig::new(),
//!     Arc::new(MemoryStore::new()),
//!     feed,
//!     Arc::new(TracingNotifier),
//! )?;
//!
//! let client = sentinel.register_client("Acme", &["Acme Corp".to_string()]).await?;
//! let found = sentinel.discover_threats(client.id, &client.monitored_entities).await?;
//! for threat_id in found.created {
//!     let [_soft, hard, _nuclear] = sentinel.generate_plans(threat_id).await?;
//!     sentinel.approve(hard.id, "ops1").await?;
//!     sentinel.execute(hard.id, "ops1").await?;
//! }
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]

pub mod approval;
pub mod config;
pub mod discovery;
pub mod error;
pub mod execution;
pub mod guardian;
pub mod ledger;
pub mod memory;
pub mod planning;
pub mod ports;
pub mod sentinel;
pub mod telemetry;
pub mod types;

// Re-exports for convenience
pub use approval::ApprovalGate;
pub use config::{EffectivenessPolicy, RetryPolicy, SentinelConfig, DEFAULT_SYSTEM_APPROVER};
pub use discovery::{fingerprint, normalize_content, DiscoveryCoordinator};
pub use error::{FeedError, SentinelError, StoreError};
pub use execution::{
    DeadLetter, ExecutionEngine, CANCELLED_REASON, DEAD_LETTER_CAPACITY, TIMED_OUT_REASON,
};
pub use guardian::{
    auto_response_applies, FixedTierPolicy, GuardianMonitor, SeverityTierPolicy, SweepReport,
    TierPolicy,
};
pub use ledger::{allowed_transitions, is_valid_history, validate_transition, MissionLedger};
pub use memory::MemoryStore;
pub use planning::{result_summary, tier_actions, PlanGenerator};
pub use ports::{
    ChannelNotifier, IntelligenceFeed, IntelligenceQuery, IntelligenceRecord, OperatorEvent,
    OperatorNotifier, PlanApproval, SentinelStore, TracingNotifier,
};
pub use sentinel::Sentinel;
pub use types::{
    ActionKind, ActionSnapshot, ApprovalResult, Client, ClientId, DiscoveryResult,
    ExecutionStatus, Fingerprint, GuardianEntryId, GuardianRegistryEntry, GuardianStatus,
    MissionId, MissionLogEntry, PlanId, PlannedAction, ResponsePlan, Severity,
    StatusTransition, ThreatDiscovery, ThreatId, Tier,
};

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Sentinel Core
    pub use crate::{
        ClientId, ExecutionStatus, IntelligenceFeed, MemoryStore, MissionId, MissionLogEntry,
        PlanId, ResponsePlan, Sentinel, SentinelConfig, SentinelError, SentinelStore, ThreatId,
        Tier, TierPolicy, TracingNotifier,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
