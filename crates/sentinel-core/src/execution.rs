//! Execution engine
//!
//! Runs approved plans. `execute` writes the mission row and returns at
//! once; a background worker finishes the mission after the configured
//! delay.
//!
//! ```text
//! execute ──► ledger.open ──► queue ──► worker ──► spawn per task
//!                                                   │ sleep(delay)
//!                                                   │ ledger.complete (retry w/ backoff)
//!                                                   └ dead letter + ledger.abandon
//! ```

use crate::approval::ApprovalGate;
use crate::config::SentinelConfig;
use crate::error::SentinelError;
use crate::guardian::auto_response_applies;
use crate::ledger::MissionLedger;
use crate::planning::result_summary;
use crate::ports::{OperatorEvent, OperatorNotifier, SentinelStore};
use crate::types::{ClientId, MissionId, MissionLogEntry, PlanId, Tier};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Failure reason recorded on operator cancellation
pub const CANCELLED_REASON: &str = "cancelled by operator";

/// Failure reason recorded by the stuck-mission sweep
pub const TIMED_OUT_REASON: &str = "timed out";

/// Dead letters kept before the oldest are dropped
pub const DEAD_LETTER_CAPACITY: usize = 256;

/// Completion task that exhausted its retries
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    /// Plan executed
    pub plan_id: PlanId,
    /// Mission affected
    pub mission_id: MissionId,
    /// Tier
    pub tier: Tier,
    /// Completion writes tried
    pub attempts: u32,
    /// Error from the last attempt
    pub last_error: String,
    /// When the task was given up
    pub failed_at: DateTime<Utc>,
}

/// Bounded dead-letter list; the oldest entry goes first when full
#[derive(Debug)]
struct DeadLetterQueue {
    letters: Mutex<VecDeque<DeadLetter>>,
    capacity: usize,
}

impl DeadLetterQueue {
    fn new(capacity: usize) -> Self {
        Self {
            letters: Mutex::new(VecDeque::new()),
            capacity,
        }
    }

    fn push(&self, letter: DeadLetter) {
        let mut letters = self.letters.lock();
        if letters.len() == self.capacity {
            if let Some(dropped) = letters.pop_front() {
                tracing::warn!(mission = %dropped.mission_id, "dead letter dropped, queue full");
            }
        }
        letters.push_back(letter);
    }

    fn snapshot(&self) -> Vec<DeadLetter> {
        self.letters.lock().iter().cloned().collect()
    }

    fn drain(&self) -> Vec<DeadLetter> {
        self.letters.lock().drain(..).collect()
    }
}

#[derive(Debug)]
struct CompletionTask {
    plan_id: PlanId,
    mission_id: MissionId,
    tier: Tier,
    cancel: CancellationToken,
}

#[derive(Debug)]
struct PendingCompletion {
    mission_id: MissionId,
    cancel: CancellationToken,
}

/// State shared between the engine and its completion tasks
struct EngineShared {
    config: SentinelConfig,
    ledger: MissionLedger,
    notifier: Arc<dyn OperatorNotifier>,
    pending: DashMap<PlanId, PendingCompletion>,
    dead_letters: DeadLetterQueue,
}

impl EngineShared {
    fn release(&self, plan_id: PlanId, mission_id: MissionId) {
        self.pending
            .remove_if(&plan_id, |_, pending| pending.mission_id == mission_id);
    }

    fn cancel_pending(&self, plan_id: PlanId, mission_id: MissionId) {
        if let Some((_, pending)) = self
            .pending
            .remove_if(&plan_id, |_, pending| pending.mission_id == mission_id)
        {
            pending.cancel.cancel();
        }
    }

    fn notify_failed(&self, entry: &MissionLogEntry, reason: &str) {
        self.notifier.notify(OperatorEvent::MissionFailed {
            mission_id: entry.id,
            tier: entry.tier(),
            reason: reason.to_string(),
        });
    }
}

/// Execution engine
pub struct ExecutionEngine {
    shared: Arc<EngineShared>,
    store: Arc<dyn SentinelStore>,
    gate: Arc<ApprovalGate>,
    queue: mpsc::Sender<CompletionTask>,
    shutdown: CancellationToken,
}

impl ExecutionEngine {
    /// Create engine and start its completion worker
    ///
    /// # Panics
    /// Panics if called outside a tokio runtime.
    #[must_use]
    pub fn new(
        config: SentinelConfig,
        store: Arc<dyn SentinelStore>,
        gate: Arc<ApprovalGate>,
        notifier: Arc<dyn OperatorNotifier>,
    ) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity.max(1));
        let shutdown = CancellationToken::new();
        let shared = Arc::new(EngineShared {
            ledger: MissionLedger::new(store.clone(), config.excerpt_limit),
            config,
            notifier,
            pending: DashMap::new(),
            dead_letters: DeadLetterQueue::new(DEAD_LETTER_CAPACITY),
        });

        tokio::spawn(completion_worker(shared.clone(), rx, shutdown.clone()));

        Self {
            shared,
            store,
            gate,
            queue: tx,
            shutdown,
        }
    }

    /// Execute a plan
    ///
    /// An unapproved plan runs only when guardian auto-response covers the
    /// threat's entity; the engine then approves it as the configured system
    /// identity and records that identity as the executor.
    ///
    /// # Errors
    /// - `SentinelError::InvalidRequest` if `approver` is blank
    /// - `SentinelError::PlanNotFound` / `SentinelError::ThreatNotFound`
    /// - `SentinelError::UnapprovedExecution` before any row is written
    /// - `SentinelError::DuplicateExecution` if the plan has an active mission
    /// - `SentinelError::PersistenceFailure` if the mission row cannot be written
    /// - `SentinelError::WorkerUnavailable` if the completion worker stopped
    pub async fn execute(
        &self,
        plan_id: PlanId,
        approver: &str,
    ) -> Result<MissionLogEntry, SentinelError> {
        let approver = approver.trim();
        if approver.is_empty() {
            return Err(SentinelError::InvalidRequest(
                "approver cannot be empty".to_string(),
            ));
        }

        let plan = self
            .store
            .get_plan(plan_id)
            .await?
            .ok_or(SentinelError::PlanNotFound(plan_id))?;
        let threat = self
            .store
            .get_threat(plan.threat_id)
            .await?
            .ok_or(SentinelError::ThreatNotFound(plan.threat_id))?;

        let executed_by = if plan.is_approved() {
            approver.to_string()
        } else if auto_response_applies(self.store.as_ref(), threat.client_id, &threat.entity_name)
            .await?
        {
            let system = self.shared.config.system_approver.clone();
            self.gate.approve(plan_id, &system).await?;
            tracing::info!(
                plan = %plan_id,
                entity = %threat.entity_name,
                "guardian self-approved plan"
            );
            system
        } else {
            tracing::warn!(plan = %plan_id, tier = %plan.tier, "refusing unapproved execution");
            return Err(SentinelError::UnapprovedExecution(plan_id));
        };

        let entry = self.shared.ledger.open(&plan, &threat, &executed_by).await?;

        let cancel = self.shutdown.child_token();
        self.shared.pending.insert(
            plan_id,
            PendingCompletion {
                mission_id: entry.id,
                cancel: cancel.clone(),
            },
        );
        self.shared.notifier.notify(OperatorEvent::MissionStarted {
            mission_id: entry.id,
            tier: plan.tier,
        });

        let task = CompletionTask {
            plan_id,
            mission_id: entry.id,
            tier: plan.tier,
            cancel,
        };
        if self.queue.send(task).await.is_err() {
            self.shared.release(plan_id, entry.id);
            let reason = SentinelError::WorkerUnavailable.to_string();
            match self.shared.ledger.fail(entry.id, &reason).await {
                Ok(failed) => self.shared.notify_failed(&failed, &reason),
                Err(err) => {
                    tracing::error!(
                        mission = %entry.id,
                        error = %err,
                        "could not fail orphaned mission"
                    );
                }
            }
            return Err(SentinelError::WorkerUnavailable);
        }

        Ok(entry)
    }

    /// Cancel a pending completion and mark the mission failed
    ///
    /// # Errors
    /// - `SentinelError::MissionNotFound` if the mission is unknown
    /// - `SentinelError::IllegalTransition` if the mission already finished
    pub async fn cancel(&self, mission_id: MissionId) -> Result<MissionLogEntry, SentinelError> {
        let entry = self.shared.ledger.fail(mission_id, CANCELLED_REASON).await?;
        self.shared.cancel_pending(entry.plan_id, mission_id);
        self.shared.notify_failed(&entry, CANCELLED_REASON);
        tracing::info!(mission = %mission_id, "mission cancelled");
        Ok(entry)
    }

    /// Fail executing missions started more than `max_age` ago
    ///
    /// Recovers rows whose completion task was lost, e.g. when the final
    /// failure write itself failed.
    ///
    /// # Errors
    /// - `SentinelError::InvalidRequest` if `max_age` does not fit a timestamp offset
    /// - `SentinelError::PersistenceFailure` if a read or write fails
    pub async fn sweep_stuck(
        &self,
        max_age: Duration,
    ) -> Result<Vec<MissionLogEntry>, SentinelError> {
        let max_age = chrono::Duration::from_std(max_age)
            .map_err(|e| SentinelError::InvalidRequest(format!("max_age out of range: {e}")))?;
        let cutoff = Utc::now() - max_age;

        let mut swept = Vec::new();
        for stuck in self.shared.ledger.stuck(cutoff).await? {
            match self.shared.ledger.fail(stuck.id, TIMED_OUT_REASON).await {
                Ok(entry) => {
                    self.shared.cancel_pending(entry.plan_id, entry.id);
                    self.shared.notify_failed(&entry, TIMED_OUT_REASON);
                    swept.push(entry);
                }
                // finished between the read and the write
                Err(SentinelError::IllegalTransition { .. }) => {}
                Err(err) => return Err(err),
            }
        }
        if !swept.is_empty() {
            tracing::warn!(count = swept.len(), "swept stuck missions");
        }
        Ok(swept)
    }

    /// Completion tasks given up after exhausting retries, oldest first
    ///
    /// At most [`DEAD_LETTER_CAPACITY`] are kept.
    #[must_use]
    pub fn dead_letters(&self) -> Vec<DeadLetter> {
        self.shared.dead_letters.snapshot()
    }

    /// Take every dead letter, leaving the list empty
    pub fn drain_dead_letters(&self) -> Vec<DeadLetter> {
        self.shared.dead_letters.drain()
    }

    /// Number of completions still pending
    #[inline]
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.shared.pending.len()
    }

    /// Fetch one mission
    ///
    /// # Errors
    /// - `SentinelError::MissionNotFound` if the mission is unknown
    pub async fn get_mission(
        &self,
        mission_id: MissionId,
    ) -> Result<MissionLogEntry, SentinelError> {
        self.shared.ledger.get(mission_id).await
    }

    /// Missions for a plan, oldest first
    ///
    /// # Errors
    /// - `SentinelError::PersistenceFailure` if the read fails
    pub async fn missions_for_plan(
        &self,
        plan_id: PlanId,
    ) -> Result<Vec<MissionLogEntry>, SentinelError> {
        self.shared.ledger.for_plan(plan_id).await
    }

    /// Missions for a client, newest first
    ///
    /// # Errors
    /// - `SentinelError::PersistenceFailure` if the read fails
    pub async fn missions_for_client(
        &self,
        client_id: ClientId,
    ) -> Result<Vec<MissionLogEntry>, SentinelError> {
        self.shared.ledger.for_client(client_id).await
    }

    /// Stop the worker and abandon pending completions
    ///
    /// Abandoned missions stay executing until swept.
    pub fn shutdown(&self) {
        self.shutdown.cancel();
    }
}

/// Completion worker loop (runs in a separate tokio task)
async fn completion_worker(
    shared: Arc<EngineShared>,
    mut rx: mpsc::Receiver<CompletionTask>,
    shutdown: CancellationToken,
) {
    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            task = rx.recv() => match task {
                Some(task) => {
                    tokio::spawn(run_completion(shared.clone(), task));
                }
                None => break,
            },
        }
    }
    tracing::debug!("completion worker stopped");
}

async fn run_completion(shared: Arc<EngineShared>, task: CompletionTask) {
    tokio::select! {
        () = task.cancel.cancelled() => {
            tracing::debug!(
                mission = %task.mission_id,
                "completion cancelled before delay elapsed"
            );
            shared.release(task.plan_id, task.mission_id);
            return;
        }
        () = tokio::time::sleep(shared.config.completion_delay()) => {}
    }

    let retry = shared.config.retry;
    let score = shared.config.effectiveness.score(task.tier);
    let summary = result_summary(task.tier);

    let mut attempt = 0;
    loop {
        attempt += 1;
        match shared
            .ledger
            .complete(task.mission_id, summary, score, attempt)
            .await
        {
            Ok(entry) => {
                tracing::info!(
                    mission = %entry.id,
                    tier = %task.tier,
                    attempt,
                    "mission completed"
                );
                shared.notifier.notify(OperatorEvent::MissionCompleted {
                    mission_id: entry.id,
                    tier: task.tier,
                    effectiveness_score: entry.effectiveness_score.unwrap_or(score),
                });
                break;
            }
            Err(SentinelError::IllegalTransition { from, .. }) => {
                tracing::debug!(
                    mission = %task.mission_id,
                    status = %from,
                    "mission already finished"
                );
                break;
            }
            Err(err) if attempt < retry.max_attempts => {
                let delay = retry.backoff_delay(attempt);
                tracing::warn!(
                    mission = %task.mission_id,
                    attempt,
                    delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                    error = %err,
                    "completion write failed; retrying"
                );
                tokio::select! {
                    () = task.cancel.cancelled() => break,
                    () = tokio::time::sleep(delay) => {}
                }
            }
            Err(err) => {
                give_up(&shared, &task, attempt, &err).await;
                break;
            }
        }
    }

    shared.release(task.plan_id, task.mission_id);
}

async fn give_up(shared: &EngineShared, task: &CompletionTask, attempts: u32, err: &SentinelError) {
    let last_error = err.to_string();
    tracing::error!(
        mission = %task.mission_id,
        attempts,
        error = %last_error,
        "completion dead-lettered"
    );
    shared.dead_letters.push(DeadLetter {
        plan_id: task.plan_id,
        mission_id: task.mission_id,
        tier: task.tier,
        attempts,
        last_error: last_error.clone(),
        failed_at: Utc::now(),
    });

    match shared
        .ledger
        .abandon(task.mission_id, &last_error, attempts)
        .await
    {
        Ok(entry) => shared.notify_failed(&entry, &last_error),
        Err(fail_err) => {
            tracing::error!(
                mission = %task.mission_id,
                error = %fail_err,
                "could not mark mission failed; left executing for the sweep"
            );
        }
    }
}
