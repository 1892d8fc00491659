//! Testing utilities for the Sentinel workspace
//!
//! Shared fixtures, a scripted intelligence feed and a fault-injecting
//! store wrapper.

#![allow(missing_docs)]
#![allow(clippy::missing_panics_doc)]

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use parking_lot::Mutex;
use sentinel_core::{
    ChannelNotifier, Client, ClientId, EffectivenessPolicy, ExecutionStatus, FeedError,
    Fingerprint, GuardianRegistryEntry, IntelligenceFeed, IntelligenceQuery, IntelligenceRecord,
    MemoryStore, MissionId, MissionLogEntry, OperatorEvent, PlanApproval, PlanId, ResponsePlan,
    RetryPolicy, Sentinel, SentinelConfig, SentinelStore, Severity, StoreError, ThreatDiscovery,
    ThreatId, TierPolicy,
};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

/// Entity monitored by the default test client
pub const ACME: &str = "Acme Corp";

/// Install a test-writer subscriber honoring `RUST_LOG`; safe to call repeatedly
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Configuration with millisecond delays
pub fn fast_config() -> SentinelConfig {
    SentinelConfig::new()
        .with_completion_delay(Duration::from_millis(10))
        .with_retry(RetryPolicy {
            max_attempts: 3,
            backoff_base_ms: 1,
            backoff_max_ms: 5,
        })
        .with_effectiveness(EffectivenessPolicy::default())
}

/// Record published now that mentions `entity`
pub fn record(entity: &str, content: &str) -> IntelligenceRecord {
    IntelligenceRecord {
        content: content.to_string(),
        platform: "Reddit".to_string(),
        url: Some("https://reddit.example/r/acme/1".to_string()),
        severity: Severity::High,
        detected_entities: vec![entity.to_string()],
        published_at: Utc::now(),
    }
}

/// Record published `hours` ago
pub fn record_aged(entity: &str, content: &str, hours: i64) -> IntelligenceRecord {
    IntelligenceRecord {
        published_at: Utc::now() - ChronoDuration::hours(hours),
        ..record(entity, content)
    }
}

/// Feed that serves records pushed by the test
#[derive(Debug, Default)]
pub struct ScriptedFeed {
    records: Mutex<Vec<IntelligenceRecord>>,
    queries: Mutex<Vec<IntelligenceQuery>>,
    unreachable: AtomicBool,
}

impl ScriptedFeed {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, record: IntelligenceRecord) {
        self.records.lock().push(record);
    }

    pub fn set_unreachable(&self, unreachable: bool) {
        self.unreachable.store(unreachable, Ordering::SeqCst);
    }

    /// Queries received so far
    pub fn queries(&self) -> Vec<IntelligenceQuery> {
        self.queries.lock().clone()
    }
}

#[async_trait]
impl IntelligenceFeed for ScriptedFeed {
    async fn query(&self, query: &IntelligenceQuery) -> Result<Vec<IntelligenceRecord>, FeedError> {
        self.queries.lock().push(query.clone());
        if self.unreachable.load(Ordering::SeqCst) {
            return Err(FeedError::Unreachable("scripted outage".to_string()));
        }
        // names are matched by the coordinator; only recency is applied here
        Ok(self
            .records
            .lock()
            .iter()
            .filter(|r| r.published_at >= query.since)
            .cloned()
            .collect())
    }
}

/// Store wrapper that fails selected operations on demand
#[derive(Debug, Default)]
pub struct FaultyStore {
    inner: MemoryStore,
    fail_insert_threats: AtomicBool,
    fail_insert_plans: AtomicBool,
    fail_insert_mission: AtomicBool,
    fail_guardian_upserts: AtomicBool,
    yield_on_reads: AtomicBool,
    fail_all_updates: AtomicBool,
    fail_next_updates: AtomicU32,
    update_calls: AtomicU32,
}

impl FaultyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inner(&self) -> &MemoryStore {
        &self.inner
    }

    pub fn fail_insert_threats(&self, fail: bool) {
        self.fail_insert_threats.store(fail, Ordering::SeqCst);
    }

    pub fn fail_insert_plans(&self, fail: bool) {
        self.fail_insert_plans.store(fail, Ordering::SeqCst);
    }

    pub fn fail_insert_mission(&self, fail: bool) {
        self.fail_insert_mission.store(fail, Ordering::SeqCst);
    }

    pub fn fail_guardian_upserts(&self, fail: bool) {
        self.fail_guardian_upserts.store(fail, Ordering::SeqCst);
    }

    /// Yield to the scheduler after lookup reads, like a networked store
    pub fn yield_on_reads(&self, enabled: bool) {
        self.yield_on_reads.store(enabled, Ordering::SeqCst);
    }

    /// Fail every mission update until turned off
    pub fn fail_all_updates(&self, fail: bool) {
        self.fail_all_updates.store(fail, Ordering::SeqCst);
    }

    /// Fail the next `n` mission updates
    pub fn fail_next_updates(&self, n: u32) {
        self.fail_next_updates.store(n, Ordering::SeqCst);
    }

    /// Mission updates attempted so far
    pub fn update_calls(&self) -> u32 {
        self.update_calls.load(Ordering::SeqCst)
    }

    async fn read_latency(&self) {
        if self.yield_on_reads.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
    }

    fn outage(what: &str) -> StoreError {
        StoreError::Unavailable(format!("injected {what} failure"))
    }
}

#[async_trait]
impl SentinelStore for FaultyStore {
    async fn insert_client(&self, client: Client) -> Result<(), StoreError> {
        self.inner.insert_client(client).await
    }

    async fn get_client(&self, id: ClientId) -> Result<Option<Client>, StoreError> {
        self.inner.get_client(id).await
    }

    async fn set_guardian_mode(
        &self,
        id: ClientId,
        enabled: bool,
    ) -> Result<Option<Client>, StoreError> {
        self.inner.set_guardian_mode(id, enabled).await
    }

    async fn threat_fingerprints(
        &self,
        client: ClientId,
    ) -> Result<HashSet<Fingerprint>, StoreError> {
        let rows = self.inner.threat_fingerprints(client).await;
        self.read_latency().await;
        rows
    }

    async fn insert_threats(
        &self,
        threats: Vec<ThreatDiscovery>,
    ) -> Result<Vec<ThreatDiscovery>, StoreError> {
        if self.fail_insert_threats.load(Ordering::SeqCst) {
            return Err(Self::outage("threat batch"));
        }
        self.inner.insert_threats(threats).await
    }

    async fn get_threat(&self, id: ThreatId) -> Result<Option<ThreatDiscovery>, StoreError> {
        self.inner.get_threat(id).await
    }

    async fn list_threats(&self, client: ClientId) -> Result<Vec<ThreatDiscovery>, StoreError> {
        self.inner.list_threats(client).await
    }

    async fn resolve_threat(
        &self,
        id: ThreatId,
        at: DateTime<Utc>,
    ) -> Result<Option<ThreatDiscovery>, StoreError> {
        self.inner.resolve_threat(id, at).await
    }

    async fn insert_plans_if_absent(
        &self,
        threat: ThreatId,
        plans: Vec<ResponsePlan>,
    ) -> Result<Vec<ResponsePlan>, StoreError> {
        if self.fail_insert_plans.load(Ordering::SeqCst) {
            return Err(Self::outage("plan batch"));
        }
        self.inner.insert_plans_if_absent(threat, plans).await
    }

    async fn get_plan(&self, id: PlanId) -> Result<Option<ResponsePlan>, StoreError> {
        let rows = self.inner.get_plan(id).await;
        self.read_latency().await;
        rows
    }

    async fn plans_for_threat(&self, threat: ThreatId) -> Result<Vec<ResponsePlan>, StoreError> {
        let rows = self.inner.plans_for_threat(threat).await;
        self.read_latency().await;
        rows
    }

    async fn approve_plan(
        &self,
        id: PlanId,
        approver: &str,
        at: DateTime<Utc>,
    ) -> Result<Option<PlanApproval>, StoreError> {
        self.inner.approve_plan(id, approver, at).await
    }

    async fn insert_mission(&self, entry: MissionLogEntry) -> Result<(), StoreError> {
        if self.fail_insert_mission.load(Ordering::SeqCst) {
            return Err(Self::outage("mission insert"));
        }
        self.inner.insert_mission(entry).await
    }

    async fn update_mission(
        &self,
        entry: &MissionLogEntry,
        expected: ExecutionStatus,
    ) -> Result<(), StoreError> {
        self.update_calls.fetch_add(1, Ordering::SeqCst);
        if self.fail_all_updates.load(Ordering::SeqCst) {
            return Err(Self::outage("mission update"));
        }
        let consumed = self
            .fail_next_updates
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if consumed {
            return Err(Self::outage("mission update"));
        }
        self.inner.update_mission(entry, expected).await
    }

    async fn get_mission(&self, id: MissionId) -> Result<Option<MissionLogEntry>, StoreError> {
        self.inner.get_mission(id).await
    }

    async fn missions_for_plan(&self, plan: PlanId) -> Result<Vec<MissionLogEntry>, StoreError> {
        self.inner.missions_for_plan(plan).await
    }

    async fn missions_for_client(
        &self,
        client: ClientId,
    ) -> Result<Vec<MissionLogEntry>, StoreError> {
        self.inner.missions_for_client(client).await
    }

    async fn missions_with_status(
        &self,
        status: ExecutionStatus,
    ) -> Result<Vec<MissionLogEntry>, StoreError> {
        self.inner.missions_with_status(status).await
    }

    async fn guardian_entries(
        &self,
        client: ClientId,
    ) -> Result<Vec<GuardianRegistryEntry>, StoreError> {
        self.inner.guardian_entries(client).await
    }

    async fn upsert_guardian_entries(
        &self,
        entries: Vec<GuardianRegistryEntry>,
    ) -> Result<(), StoreError> {
        if self.fail_guardian_upserts.load(Ordering::SeqCst) {
            return Err(Self::outage("guardian upsert"));
        }
        self.inner.upsert_guardian_entries(entries).await
    }
}

/// Sentinel wired to a scripted feed, a faulty store and a channel notifier
pub struct TestHarness {
    pub sentinel: Sentinel,
    pub store: Arc<FaultyStore>,
    pub feed: Arc<ScriptedFeed>,
    pub events: mpsc::UnboundedReceiver<OperatorEvent>,
    /// Client monitoring [`ACME`]
    pub client: Client,
}

impl TestHarness {
    pub async fn new() -> Self {
        Self::build(fast_config(), None).await
    }

    pub async fn with_config(config: SentinelConfig) -> Self {
        Self::build(config, None).await
    }

    pub async fn with_tier_policy(policy: Arc<dyn TierPolicy>) -> Self {
        Self::build(fast_config(), Some(policy)).await
    }

    pub async fn build(config: SentinelConfig, policy: Option<Arc<dyn TierPolicy>>) -> Self {
        init_test_tracing();
        let store = Arc::new(FaultyStore::new());
        let feed = Arc::new(ScriptedFeed::new());
        let (notifier, events) = ChannelNotifier::new();

        let mut sentinel =
            Sentinel::new(config, store.clone(), feed.clone(), Arc::new(notifier)).unwrap();
        if let Some(policy) = policy {
            sentinel = sentinel.with_tier_policy(policy);
        }
        let client = sentinel
            .register_client("Acme", &[ACME.to_string()])
            .await
            .unwrap();

        Self {
            sentinel,
            store,
            feed,
            events,
            client,
        }
    }

    /// Push a record for [`ACME`], run discovery and return the new threat
    pub async fn discover_one(&self, content: &str) -> ThreatId {
        self.feed.push(record(ACME, content));
        let result = self
            .sentinel
            .discover_threats(self.client.id, &[ACME.to_string()])
            .await
            .unwrap();
        assert_eq!(result.count, 1, "expected exactly one new threat");
        result.created[0]
    }

    /// Poll until the mission reaches a terminal state
    pub async fn wait_for_terminal(
        &self,
        mission_id: MissionId,
        timeout: Duration,
    ) -> MissionLogEntry {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let entry = self.sentinel.get_mission(mission_id).await.unwrap();
            if entry.status.is_terminal() {
                return entry;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "mission {mission_id} still {} after {timeout:?}",
                entry.status
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }

    /// Events received so far
    pub fn drain_events(&mut self) -> Vec<OperatorEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }
}
