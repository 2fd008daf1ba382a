//! WorkerPool - タスク実行ループ
//!
//! # フロー (run_once 一回分)
//! 1. QueueSelector の順で `claim_one` (lease 付きで active へ)
//! 2. task_type から handler を引く (無ければ即 archived)
//! 3. handler を spawn し、lease の期限で打ち切る (panic / timeout は失敗扱い)
//! 4. Decider で Decision を決め、lease を持っている場合だけ commit
//!
//! store の lock は claim / commit の中で完結し、handler 実行中は持たない。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::builder::Engine;
use super::queue_select::QueueSelector;
use super::{loop_backoff, sleep_or_shutdown};
use crate::domain::{Decider, Decision, Outcome, TaskId, WorkerId};
use crate::error::{Result, SpindleError};
use crate::ports::Clock;
use crate::queue::{Claim, QueueStore, TaskRecord, TaskState, mutation};
use crate::typed::{HandlerRegistry, TaskContext};

pub const UNKNOWN_TASK_TYPE: &str = "unknown task type";
pub const DEADLINE_EXCEEDED: &str = "deadline exceeded";

/// What one `run_once` did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// Nothing was claimable.
    Idle,
    Completed(TaskId),
    Retried(TaskId),
    Archived(TaskId),
    /// The lease was reclaimed while the handler ran; the result was dropped.
    LeaseLost(TaskId),
}

/// One executor: claims, runs and commits under its own `WorkerId`.
#[derive(Clone)]
pub struct Executor {
    worker: WorkerId,
    store: Arc<dyn QueueStore>,
    clock: Arc<dyn Clock>,
    registry: Arc<HandlerRegistry>,
    decider: Arc<dyn Decider>,
    selector: Arc<QueueSelector>,
    default_timeout: Duration,
}

impl Executor {
    pub(crate) fn new(engine: &Engine, worker: WorkerId, selector: Arc<QueueSelector>) -> Self {
        Self {
            worker,
            store: Arc::clone(&engine.store),
            clock: Arc::clone(&engine.clock),
            registry: Arc::clone(&engine.registry),
            decider: Arc::clone(&engine.decider),
            selector,
            default_timeout: engine.config.default_timeout(),
        }
    }

    pub fn worker_id(&self) -> WorkerId {
        self.worker
    }

    /// Claim at most one task, run it, commit the result.
    pub async fn run_once(&self) -> Result<Step> {
        let now = self.clock.now();
        for queue in self.selector.order() {
            match self
                .store
                .claim_one(queue, self.worker, self.default_timeout, now)
                .await?
            {
                Claim::Claimed(record) => return self.process(record).await,
                Claim::Empty => continue,
            }
        }
        Ok(Step::Idle)
    }

    async fn process(&self, record: TaskRecord) -> Result<Step> {
        let deadline = record
            .lease
            .map(|lease| lease.expires_at)
            .unwrap_or_else(|| crate::queue::shift(self.clock.now(), self.default_timeout));

        tracing::debug!(
            task_id = %record.id,
            task_type = %record.task_type,
            queue = %record.queue,
            worker = %self.worker,
            retry_count = record.retry_count,
            "claimed task"
        );

        let outcome = self.execute(&record, deadline).await;
        self.commit(record, outcome).await
    }

    async fn execute(&self, record: &TaskRecord, deadline: DateTime<Utc>) -> Outcome {
        let Some(handler) = self.registry.get(&record.task_type) else {
            return Outcome::unrecoverable(UNKNOWN_TASK_TYPE);
        };

        let ctx = TaskContext::for_attempt(record, deadline);
        let payload = record.payload.clone();
        let mut join: JoinHandle<_> =
            tokio::spawn(async move { handler.handle(ctx, &payload).await });

        let budget = (deadline - self.clock.now())
            .to_std()
            .unwrap_or(Duration::ZERO);

        match tokio::time::timeout(budget, &mut join).await {
            Ok(Ok(result)) => Outcome::from(result),
            Ok(Err(join_err)) if join_err.is_panic() => {
                Outcome::failure(format!("handler panicked: {}", panic_message(join_err)))
            }
            Ok(Err(join_err)) => Outcome::failure(format!("handler cancelled: {join_err}")),
            Err(_) => {
                join.abort();
                Outcome::failure(DEADLINE_EXCEEDED)
            }
        }
    }

    async fn commit(&self, record: TaskRecord, outcome: Outcome) -> Result<Step> {
        let now = self.clock.now();
        let id = record.id;
        let worker = self.worker;

        let (to, step, apply): (TaskState, Step, crate::queue::Mutation) =
            match self.decider.decide(&record, &outcome) {
                Decision::Complete => (
                    TaskState::Completed,
                    Step::Completed(id),
                    mutation(move |r| {
                        r.check_lease(worker)?;
                        r.mark_completed(now);
                        Ok(())
                    }),
                ),
                Decision::Retry { delay, error } => (
                    TaskState::Retry,
                    Step::Retried(id),
                    mutation(move |r| {
                        r.check_lease(worker)?;
                        r.schedule_retry(delay, error, now);
                        Ok(())
                    }),
                ),
                Decision::Archive { error } => (
                    TaskState::Archived,
                    Step::Archived(id),
                    mutation(move |r| {
                        r.check_lease(worker)?;
                        r.mark_archived(error, now);
                        Ok(())
                    }),
                ),
            };

        match self
            .store
            .move_task(id, TaskState::Active, to, now, apply)
            .await
        {
            Ok(moved) => {
                match to {
                    TaskState::Completed => tracing::info!(
                        task_id = %id,
                        task_type = %moved.task_type,
                        worker = %worker,
                        "task completed"
                    ),
                    _ => tracing::warn!(
                        task_id = %id,
                        task_type = %moved.task_type,
                        worker = %worker,
                        to = %to,
                        retry_count = moved.retry_count,
                        error = moved.last_error.as_deref().unwrap_or_default(),
                        "task failed"
                    ),
                }
                Ok(step)
            }
            // reclaim が先に反映されている (lease 不一致 or もう active にいない)
            Err(e) if e.is_lost_race() || matches!(e, SpindleError::Conflict(_)) => {
                tracing::warn!(task_id = %id, worker = %worker, error = %e, "dropping result, lease lost");
                Ok(Step::LeaseLost(id))
            }
            Err(e) => Err(e),
        }
    }
}

fn panic_message(err: tokio::task::JoinError) -> String {
    let payload = err.into_panic();
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// Worker pool handle.
/// - `request_shutdown` で claim を止める (実行中の handler は走り切る)
/// - `shutdown_and_join` で `shutdown_timeout` まで待ち、残りは abort
pub struct WorkerPool {
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
    workers: Vec<WorkerId>,
    shutdown_timeout: Duration,
}

impl WorkerPool {
    /// Spawn `n` executors sharing one queue selector.
    pub fn spawn(engine: &Engine, n: usize) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let selector = Arc::new(engine.queue_selector());
        let idle_backoff = engine.config.idle_backoff();

        let mut joins = Vec::with_capacity(n);
        let mut workers = Vec::with_capacity(n);
        for _ in 0..n {
            let executor = Executor::new(engine, engine.ids.generate_worker_id(), Arc::clone(&selector));
            workers.push(executor.worker_id());
            let rx = shutdown_rx.clone();
            joins.push(tokio::spawn(executor_loop(executor, idle_backoff, rx)));
        }
        tracing::info!(concurrency = n, "worker pool started");

        Self {
            shutdown_tx,
            joins,
            workers,
            shutdown_timeout: engine.config.shutdown_timeout(),
        }
    }

    pub fn workers(&self) -> &[WorkerId] {
        &self.workers
    }

    /// Stop claiming new tasks.
    pub fn request_shutdown(&self) {
        // receivers may already be gone
        let _ = self.shutdown_tx.send(true);
    }

    /// Stop claiming and wait for in-flight tasks up to the shutdown timeout.
    /// Tasks still running after that stay active until their lease expires.
    pub async fn shutdown_and_join(mut self) {
        self.request_shutdown();
        let joins = &mut self.joins;
        let drained = tokio::time::timeout(self.shutdown_timeout, async {
            for join in joins.iter_mut() {
                let _ = join.await;
            }
        })
        .await;

        if drained.is_err() {
            tracing::warn!(
                timeout = ?self.shutdown_timeout,
                "worker pool did not drain in time, aborting executors"
            );
            for join in &self.joins {
                join.abort();
            }
        }
        tracing::info!("worker pool stopped");
    }
}

async fn executor_loop(executor: Executor, idle_backoff: Duration, mut shutdown: watch::Receiver<bool>) {
    let backoff = loop_backoff(idle_backoff);
    let mut failures: u32 = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }
        let wait = match executor.run_once().await {
            Ok(Step::Idle) => {
                failures = 0;
                idle_backoff
            }
            Ok(_) => {
                failures = 0;
                continue;
            }
            Err(e) => {
                let wait = backoff.backoff(failures);
                failures = failures.saturating_add(1);
                tracing::error!(worker = %executor.worker_id(), error = %e, retry_in = ?wait, "executor step failed");
                wait
            }
        };
        if sleep_or_shutdown(wait, &mut shutdown).await {
            break;
        }
    }
    tracing::debug!(worker = %executor.worker_id(), "executor stopped");
}
