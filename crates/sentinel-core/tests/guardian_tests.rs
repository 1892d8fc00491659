use pretty_assertions::assert_eq;
use sentinel_core::prelude::*;
use sentinel_core::{
    FixedTierPolicy, GuardianStatus, OperatorEvent, SeverityTierPolicy, DEFAULT_SYSTEM_APPROVER,
};
use sentinel_test_utils::{record, TestHarness, ACME};
use std::sync::Arc;
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

fn names(list: &[&str]) -> Vec<String> {
    list.iter().map(ToString::to_string).collect()
}

async fn harness_with_entities(policy: Option<Arc<dyn TierPolicy>>) -> TestHarness {
    let mut h = TestHarness::build(sentinel_test_utils::fast_config(), policy).await;
    h.client = h
        .sentinel
        .register_client("Acme Holdings", &names(&[ACME, "Jane Doe"]))
        .await
        .unwrap();
    h
}

#[tokio::test]
async fn test_enable_guardian_covers_only_named_entities() {
    let mut h = harness_with_entities(None).await;
    h.drain_events();

    let entries = h.sentinel.enable_guardian(h.client.id, &names(&[ACME])).await.unwrap();
    assert_eq!(entries.len(), 1);

    let status = h.sentinel.get_guardian_status(h.client.id).await.unwrap();
    assert_eq!(status.len(), 1);
    assert_eq!(status[0].entity_name, ACME);
    assert_eq!(status[0].status, GuardianStatus::Active);
    assert!(status[0].auto_response_enabled);

    let client = h.sentinel.get_client(h.client.id).await.unwrap();
    assert!(client.guardian_mode_enabled);

    assert_eq!(
        h.drain_events(),
        vec![OperatorEvent::GuardianEnabled {
            client_id: h.client.id,
            entities: names(&[ACME])
        }]
    );
}

#[tokio::test]
async fn test_enable_guardian_leaves_other_entries_untouched() {
    let h = harness_with_entities(None).await;
    h.sentinel
        .enable_guardian(h.client.id, &names(&["Jane Doe"]))
        .await
        .unwrap();
    let before = h.sentinel.get_guardian_status(h.client.id).await.unwrap();

    h.sentinel.enable_guardian(h.client.id, &names(&[ACME])).await.unwrap();

    let after = h.sentinel.get_guardian_status(h.client.id).await.unwrap();
    assert_eq!(after.len(), 2);
    let jane = after.iter().find(|e| e.entity_name == "Jane Doe").unwrap();
    assert_eq!(jane, &before[0]);
}

#[tokio::test]
async fn test_enable_guardian_validates_request() {
    let h = TestHarness::new().await;

    let empty = h.sentinel.enable_guardian(h.client.id, &[]).await;
    assert!(matches!(empty, Err(SentinelError::InvalidRequest(_))));

    let unknown = h.sentinel.enable_guardian(ClientId::new(), &names(&[ACME])).await;
    assert!(matches!(unknown, Err(SentinelError::ClientNotFound(_))));

    let status = h.sentinel.get_guardian_status(ClientId::new()).await;
    assert!(matches!(status, Err(SentinelError::ClientNotFound(_))));
}

#[tokio::test]
async fn test_failed_enable_leaves_guardian_flag_off() {
    let h = TestHarness::new().await;
    h.store.fail_guardian_upserts(true);

    let result = h.sentinel.enable_guardian(h.client.id, &names(&[ACME])).await;

    assert!(matches!(result, Err(SentinelError::PersistenceFailure(_))));
    assert!(!h.sentinel.get_client(h.client.id).await.unwrap().guardian_mode_enabled);
    assert!(h.sentinel.get_guardian_status(h.client.id).await.unwrap().is_empty());

    h.store.fail_guardian_upserts(false);
    h.sentinel.enable_guardian(h.client.id, &names(&[ACME])).await.unwrap();
    assert!(h.sentinel.get_client(h.client.id).await.unwrap().guardian_mode_enabled);
}

#[tokio::test]
async fn test_disable_guardian_clears_flag_when_nothing_active() {
    let h = harness_with_entities(None).await;
    h.sentinel
        .enable_guardian(h.client.id, &names(&[ACME, "Jane Doe"]))
        .await
        .unwrap();

    h.sentinel.disable_guardian(h.client.id, &names(&[ACME])).await.unwrap();
    assert!(h.sentinel.get_client(h.client.id).await.unwrap().guardian_mode_enabled);

    h.sentinel
        .disable_guardian(h.client.id, &names(&["Jane Doe"]))
        .await
        .unwrap();
    assert!(!h.sentinel.get_client(h.client.id).await.unwrap().guardian_mode_enabled);

    let status = h.sentinel.get_guardian_status(h.client.id).await.unwrap();
    assert!(status
        .iter()
        .all(|e| e.status == GuardianStatus::Inactive && !e.auto_response_enabled));
}

#[tokio::test]
async fn test_guardian_self_approves_unapproved_plan() {
    let h = TestHarness::new().await;
    h.sentinel.enable_guardian(h.client.id, &names(&[ACME])).await.unwrap();
    let threat_id = h.discover_one("Acme Corp is a scam").await;
    let [_, _, nuclear] = h.sentinel.generate_plans(threat_id).await.unwrap();

    let entry = h.sentinel.execute(nuclear.id, "ops1").await.unwrap();

    assert_eq!(entry.executed_by, DEFAULT_SYSTEM_APPROVER);
    let plan = h
        .sentinel
        .plans_for_threat(threat_id)
        .await
        .unwrap()
        .into_iter()
        .find(|p| p.id == nuclear.id)
        .unwrap();
    assert_eq!(plan.approved_by.as_deref(), Some(DEFAULT_SYSTEM_APPROVER));

    let done = h.wait_for_terminal(entry.id, WAIT).await;
    assert_eq!(done.effectiveness_score, Some(0.95));
}

#[tokio::test]
async fn test_guardian_does_not_cover_other_entities() {
    let h = harness_with_entities(None).await;
    h.sentinel
        .enable_guardian(h.client.id, &names(&["Jane Doe"]))
        .await
        .unwrap();
    let threat_id = h.discover_one("Acme Corp is a scam").await;
    let [soft, _, _] = h.sentinel.generate_plans(threat_id).await.unwrap();

    let result = h.sentinel.execute(soft.id, "ops1").await;

    assert!(matches!(result, Err(SentinelError::UnapprovedExecution(_))));
    assert_eq!(h.store.inner().mission_count(), 0);
}

#[tokio::test]
async fn test_auto_respond_requires_tier_policy() {
    let h = TestHarness::new().await;
    h.sentinel.enable_guardian(h.client.id, &names(&[ACME])).await.unwrap();
    let threat_id = h.discover_one("Acme Corp is a scam").await;

    let result = h.sentinel.guardian().auto_respond(threat_id).await;

    assert!(matches!(result, Err(SentinelError::TierPolicyMissing)));
    assert_eq!(h.store.inner().mission_count(), 0);
}

#[tokio::test]
async fn test_auto_respond_skips_uncovered_entity() {
    let h = TestHarness::with_tier_policy(Arc::new(FixedTierPolicy(Tier::Hard))).await;
    let threat_id = h.discover_one("Acme Corp is a scam").await;

    let result = h.sentinel.guardian().auto_respond(threat_id).await.unwrap();

    assert!(result.is_none());
    assert!(h.sentinel.plans_for_threat(threat_id).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_auto_respond_uses_policy_tier() {
    let policy = SeverityTierPolicy::new(Tier::Soft, Tier::Soft, Tier::Hard, Tier::Nuclear);
    let h = TestHarness::with_tier_policy(Arc::new(policy)).await;
    h.sentinel.enable_guardian(h.client.id, &names(&[ACME])).await.unwrap();
    // scripted records carry high severity
    let threat_id = h.discover_one("Acme Corp is a scam").await;

    let entry = h
        .sentinel
        .guardian()
        .auto_respond(threat_id)
        .await
        .unwrap()
        .unwrap();

    assert_eq!(entry.tier(), Tier::Hard);
    assert_eq!(entry.executed_by, DEFAULT_SYSTEM_APPROVER);
    let done = h.wait_for_terminal(entry.id, WAIT).await;
    assert_eq!(done.status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn test_sweep_discovers_and_responds() {
    let policy: Arc<dyn TierPolicy> = Arc::new(FixedTierPolicy(Tier::Soft));
    let h = harness_with_entities(Some(policy)).await;
    h.sentinel.enable_guardian(h.client.id, &names(&[ACME])).await.unwrap();
    h.feed.push(record(ACME, "Acme Corp is a scam"));
    h.feed.push(record("Jane Doe", "Jane Doe rumor"));

    let report = h.sentinel.guardian_sweep(h.client.id).await.unwrap();

    assert_eq!(report.discovery.count, 2);
    assert_eq!(report.missions.len(), 1);
    assert_eq!(report.uncovered.len(), 1);
    assert!(report.failures.is_empty());
    assert_eq!(report.missions[0].details.entity_name, ACME);

    // nothing new on the next sweep
    let again = h.sentinel.guardian_sweep(h.client.id).await.unwrap();
    assert_eq!(again.discovery.count, 0);
    assert!(again.missions.is_empty());
}

#[tokio::test]
async fn test_sweep_without_policy_fails_for_covered_threats() {
    let h = TestHarness::new().await;
    h.sentinel.enable_guardian(h.client.id, &names(&[ACME])).await.unwrap();
    h.feed.push(record(ACME, "Acme Corp is a scam"));

    let result = h.sentinel.guardian_sweep(h.client.id).await;

    assert!(matches!(result, Err(SentinelError::TierPolicyMissing)));
}
