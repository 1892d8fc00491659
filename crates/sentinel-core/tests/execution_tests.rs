use pretty_assertions::assert_eq;
use sentinel_core::prelude::*;
use sentinel_core::{
    result_summary, OperatorEvent, CANCELLED_REASON, TIMED_OUT_REASON,
};
use sentinel_test_utils::{fast_config, TestHarness};
use std::time::Duration;

const WAIT: Duration = Duration::from_secs(5);

async fn plans(h: &TestHarness, content: &str) -> [ResponsePlan; 3] {
    let threat_id = h.discover_one(content).await;
    h.sentinel.generate_plans(threat_id).await.unwrap()
}

async fn approved(h: &TestHarness, tier: Tier) -> ResponsePlan {
    let plans = plans(h, "Acme Corp is a scam").await;
    let plan = plans.into_iter().find(|p| p.tier == tier).unwrap();
    h.sentinel.approve(plan.id, "ops1").await.unwrap();
    plan
}

async fn wait_for_dead_letter(h: &TestHarness) {
    let deadline = tokio::time::Instant::now() + WAIT;
    while h.sentinel.engine().dead_letters().is_empty() || h.sentinel.engine().pending_count() > 0 {
        assert!(tokio::time::Instant::now() < deadline, "no dead letter recorded");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

#[tokio::test]
async fn test_execute_approved_plan_completes() {
    let mut h = TestHarness::new().await;
    let plan = approved(&h, Tier::Soft).await;
    h.drain_events();

    let started = h.sentinel.execute(plan.id, "ops1").await.unwrap();

    assert_eq!(started.status, ExecutionStatus::Executing);
    assert_eq!(
        started.status_sequence(),
        vec![ExecutionStatus::Queued, ExecutionStatus::Executing]
    );
    assert_eq!(started.executed_by, "ops1");
    assert_eq!(started.action_type, "soft_response");
    assert_eq!(started.effectiveness_score, None);

    let done = h.wait_for_terminal(started.id, WAIT).await;
    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_eq!(done.result_summary.as_deref(), Some(result_summary(Tier::Soft)));
    assert_eq!(done.effectiveness_score, Some(0.65));
    assert_eq!(done.attempts, 1);
    assert!(done.completed_at.is_some());

    assert_eq!(
        h.drain_events(),
        vec![
            OperatorEvent::MissionStarted {
                mission_id: started.id,
                tier: Tier::Soft
            },
            OperatorEvent::MissionCompleted {
                mission_id: started.id,
                tier: Tier::Soft,
                effectiveness_score: 0.65
            },
        ]
    );
}

#[tokio::test]
async fn test_unapproved_plan_is_refused_without_rows() {
    let h = TestHarness::new().await;
    let [_, hard, _] = plans(&h, "Acme Corp is a scam").await;

    let result = h.sentinel.execute(hard.id, "ops1").await;

    assert!(matches!(result, Err(SentinelError::UnapprovedExecution(id)) if id == hard.id));
    assert_eq!(h.store.inner().mission_count(), 0);
}

#[tokio::test]
async fn test_execute_validates_request() {
    let h = TestHarness::new().await;
    let plan = approved(&h, Tier::Hard).await;

    let blank = h.sentinel.execute(plan.id, " ").await;
    assert!(matches!(blank, Err(SentinelError::InvalidRequest(_))));

    let missing = h.sentinel.execute(PlanId::new(), "ops1").await;
    assert!(matches!(missing, Err(SentinelError::PlanNotFound(_))));
    assert_eq!(h.store.inner().mission_count(), 0);
}

#[tokio::test]
async fn test_snapshot_truncates_threat_content() {
    let h = TestHarness::new().await;
    let content = format!("Acme Corp {}", "x".repeat(490));
    let [soft, _, _] = plans(&h, &content).await;
    h.sentinel.approve(soft.id, "ops1").await.unwrap();

    let entry = h.sentinel.execute(soft.id, "ops1").await.unwrap();

    assert_eq!(entry.details.threat_excerpt.chars().count(), 200);
    assert!(content.starts_with(&entry.details.threat_excerpt));
    assert_eq!(entry.details.entity_name, "Acme Corp");
    assert_eq!(entry.details.actions, soft.actions);
    assert_eq!(entry.tier(), Tier::Soft);
}

#[tokio::test]
async fn test_same_plan_cannot_rerun_while_pending() {
    let config = fast_config().with_completion_delay(Duration::from_millis(200));
    let h = TestHarness::with_config(config).await;
    let plan = approved(&h, Tier::Hard).await;

    let first = h.sentinel.execute(plan.id, "ops1").await.unwrap();
    let second = h.sentinel.execute(plan.id, "ops2").await;

    assert!(matches!(
        second,
        Err(SentinelError::DuplicateExecution { mission_id, .. }) if mission_id == first.id
    ));

    h.wait_for_terminal(first.id, WAIT).await;
    let rerun = h.sentinel.execute(plan.id, "ops2").await.unwrap();
    assert_ne!(rerun.id, first.id);

    let history = h.sentinel.engine().missions_for_plan(plan.id).await.unwrap();
    assert_eq!(
        history.iter().map(|m| m.id).collect::<Vec<_>>(),
        vec![first.id, rerun.id]
    );
}

#[tokio::test]
async fn test_different_tiers_run_in_parallel() {
    let config = fast_config().with_completion_delay(Duration::from_millis(100));
    let h = TestHarness::with_config(config).await;
    let [soft, hard, _] = plans(&h, "Acme Corp is a scam").await;
    h.sentinel.approve(soft.id, "ops1").await.unwrap();
    h.sentinel.approve(hard.id, "ops1").await.unwrap();

    let a = h.sentinel.execute(soft.id, "ops1").await.unwrap();
    let b = h.sentinel.execute(hard.id, "ops1").await.unwrap();
    assert_eq!(h.sentinel.engine().pending_count(), 2);

    let a = h.wait_for_terminal(a.id, WAIT).await;
    let b = h.wait_for_terminal(b.id, WAIT).await;
    assert_eq!(a.effectiveness_score, Some(0.65));
    assert_eq!(b.effectiveness_score, Some(0.80));

    let by_client = h
        .sentinel
        .engine()
        .missions_for_client(h.client.id)
        .await
        .unwrap();
    assert_eq!(by_client.len(), 2);
}

#[tokio::test]
async fn test_initial_write_failure_enqueues_nothing() {
    let h = TestHarness::new().await;
    let plan = approved(&h, Tier::Hard).await;
    h.store.fail_insert_mission(true);

    let result = h.sentinel.execute(plan.id, "ops1").await;

    assert!(matches!(result, Err(SentinelError::PersistenceFailure(_))));
    assert_eq!(h.store.inner().mission_count(), 0);
    assert_eq!(h.sentinel.engine().pending_count(), 0);
}

#[tokio::test]
async fn test_transient_completion_failures_are_retried() {
    let h = TestHarness::new().await;
    let plan = approved(&h, Tier::Nuclear).await;
    h.store.fail_next_updates(2);

    let entry = h.sentinel.execute(plan.id, "ops1").await.unwrap();
    let done = h.wait_for_terminal(entry.id, WAIT).await;

    assert_eq!(done.status, ExecutionStatus::Completed);
    assert_eq!(done.effectiveness_score, Some(0.95));
    assert_eq!(done.attempts, 3);
    assert!(h.sentinel.engine().dead_letters().is_empty());
}

#[tokio::test]
async fn test_exhausted_retries_dead_letter_and_fail_mission() {
    let mut h = TestHarness::new().await;
    let plan = approved(&h, Tier::Hard).await;
    // three completion attempts fail; the failure write goes through
    h.store.fail_next_updates(3);

    let entry = h.sentinel.execute(plan.id, "ops1").await.unwrap();
    let done = h.wait_for_terminal(entry.id, WAIT).await;

    assert_eq!(done.status, ExecutionStatus::Failed);
    assert_eq!(done.effectiveness_score, None);
    assert_eq!(done.attempts, 3);
    assert!(done.last_error.as_deref().unwrap().contains("injected mission update failure"));

    wait_for_dead_letter(&h).await;
    let letters = h.sentinel.engine().dead_letters();
    assert_eq!(letters.len(), 1);
    assert_eq!(letters[0].mission_id, entry.id);
    assert_eq!(letters[0].attempts, 3);

    assert_eq!(h.sentinel.engine().drain_dead_letters(), letters);
    assert!(h.sentinel.engine().dead_letters().is_empty());

    let failed = h
        .drain_events()
        .into_iter()
        .filter(|e| matches!(e, OperatorEvent::MissionFailed { .. }))
        .count();
    assert_eq!(failed, 1);
}

#[tokio::test]
async fn test_lost_failure_write_is_recovered_by_sweep() {
    let h = TestHarness::new().await;
    let plan = approved(&h, Tier::Hard).await;
    h.store.fail_all_updates(true);

    let entry = h.sentinel.execute(plan.id, "ops1").await.unwrap();
    wait_for_dead_letter(&h).await;

    let stuck = h.sentinel.get_mission(entry.id).await.unwrap();
    assert_eq!(stuck.status, ExecutionStatus::Executing);

    h.store.fail_all_updates(false);
    let untouched = h
        .sentinel
        .engine()
        .sweep_stuck(Duration::from_secs(3600))
        .await
        .unwrap();
    assert!(untouched.is_empty());

    let swept = h.sentinel.engine().sweep_stuck(Duration::ZERO).await.unwrap();
    assert_eq!(swept.len(), 1);
    assert_eq!(swept[0].id, entry.id);
    assert_eq!(swept[0].status, ExecutionStatus::Failed);
    assert_eq!(swept[0].result_summary.as_deref(), Some(TIMED_OUT_REASON));

    // the plan is free again
    h.sentinel.execute(plan.id, "ops1").await.unwrap();
}

#[tokio::test]
async fn test_cancel_pending_mission() {
    let config = fast_config().with_completion_delay(Duration::from_millis(300));
    let h = TestHarness::with_config(config).await;
    let plan = approved(&h, Tier::Soft).await;
    let entry = h.sentinel.execute(plan.id, "ops1").await.unwrap();

    let cancelled = h.sentinel.cancel_mission(entry.id).await.unwrap();

    assert_eq!(cancelled.status, ExecutionStatus::Failed);
    assert_eq!(cancelled.result_summary.as_deref(), Some(CANCELLED_REASON));
    assert_eq!(cancelled.effectiveness_score, None);
    assert_eq!(h.sentinel.engine().pending_count(), 0);

    tokio::time::sleep(Duration::from_millis(400)).await;
    let later = h.sentinel.get_mission(entry.id).await.unwrap();
    assert_eq!(later.status, ExecutionStatus::Failed);
    assert_eq!(
        later.status_sequence(),
        vec![
            ExecutionStatus::Queued,
            ExecutionStatus::Executing,
            ExecutionStatus::Failed
        ]
    );

    let again = h.sentinel.cancel_mission(entry.id).await;
    assert!(matches!(again, Err(SentinelError::IllegalTransition { .. })));

    let missing = h.sentinel.cancel_mission(MissionId::new()).await;
    assert!(matches!(missing, Err(SentinelError::MissionNotFound(_))));
}

#[tokio::test]
async fn test_completed_mission_cannot_be_cancelled() {
    let h = TestHarness::new().await;
    let plan = approved(&h, Tier::Hard).await;
    let entry = h.sentinel.execute(plan.id, "ops1").await.unwrap();
    h.wait_for_terminal(entry.id, WAIT).await;

    let result = h.sentinel.cancel_mission(entry.id).await;

    assert!(matches!(
        result,
        Err(SentinelError::IllegalTransition {
            from: ExecutionStatus::Completed,
            to: ExecutionStatus::Failed,
            ..
        })
    ));
}
