//! Scheduler - 期限の来た遅延タスクの昇格と、期限切れ lease の回収
//!
//! # フロー (sweep 一回分)
//! 1. scheduled → pending (process_at <= now のもの)
//! 2. retry → pending
//! 3. lease が切れた active → retry / archived ("lease expired")
//!
//! 別の mover に負けた (`NotFoundInState`) 場合は何もしない。

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;

use super::{loop_backoff, sleep_or_shutdown};
use crate::domain::{Decider, Decision, Outcome, TaskId};
use crate::error::{Result, SpindleError};
use crate::ports::Clock;
use crate::queue::{QueueStore, TaskRecord, TaskState, mutation};

pub const LEASE_EXPIRED: &str = "lease expired";

/// Due ids fetched per `peek_due` call.
const PROMOTE_BATCH: usize = 100;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub promoted: usize,
    pub reclaimed_to_retry: usize,
    pub reclaimed_to_archived: usize,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Clone)]
pub struct Scheduler {
    store: Arc<dyn QueueStore>,
    clock: Arc<dyn Clock>,
    decider: Arc<dyn Decider>,
    poll_interval: Duration,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn QueueStore>,
        clock: Arc<dyn Clock>,
        decider: Arc<dyn Decider>,
        poll_interval: Duration,
    ) -> Self {
        Self {
            store,
            clock,
            decider,
            poll_interval,
        }
    }

    pub async fn sweep(&self) -> Result<SweepReport> {
        let now = self.clock.now();
        let mut report = SweepReport::default();

        for state in [TaskState::Scheduled, TaskState::Retry] {
            loop {
                let due = self.store.peek_due(state, now, PROMOTE_BATCH).await?;
                let batch_len = due.len();
                let mut moved = 0;
                for id in due {
                    if self.promote(id, state, now).await? {
                        moved += 1;
                    }
                }
                report.promoted += moved;
                // 一件も動かせなかったら次の sweep に回す
                if batch_len < PROMOTE_BATCH || moved == 0 {
                    break;
                }
            }
        }

        for record in self.store.reclaim_expired_leases(now).await? {
            match self.reclaim(record, now).await? {
                Some(TaskState::Retry) => report.reclaimed_to_retry += 1,
                Some(TaskState::Archived) => report.reclaimed_to_archived += 1,
                _ => {}
            }
        }

        if !report.is_empty() {
            tracing::debug!(
                promoted = report.promoted,
                reclaimed_to_retry = report.reclaimed_to_retry,
                reclaimed_to_archived = report.reclaimed_to_archived,
                "scheduler sweep"
            );
        }
        Ok(report)
    }

    async fn promote(&self, id: TaskId, from: TaskState, now: DateTime<Utc>) -> Result<bool> {
        let result = self
            .store
            .move_task(id, from, TaskState::Pending, now, mutation(|_| Ok(())))
            .await;
        match result {
            Ok(_) => {
                tracing::debug!(task_id = %id, from = %from, "promoted task to pending");
                Ok(true)
            }
            Err(e) if lost_race(&e) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Move one orphaned active record to retry or archived.
    async fn reclaim(
        &self,
        record: TaskRecord,
        now: DateTime<Utc>,
    ) -> Result<Option<TaskState>> {
        let outcome = Outcome::failure(LEASE_EXPIRED);
        let (to, error, delay) = match self.decider.decide(&record, &outcome) {
            Decision::Retry { delay, error } => (TaskState::Retry, error, Some(delay)),
            Decision::Archive { error } => (TaskState::Archived, error, None),
            Decision::Complete => return Ok(None),
        };

        let seen = record.lease;
        let result = self
            .store
            .move_task(
                record.id,
                TaskState::Active,
                to,
                now,
                mutation(move |r| {
                    // worker が先に commit していないこと (同じ lease のまま期限切れ)
                    if r.lease != seen || !r.lease_expired(now) {
                        return Err(SpindleError::Conflict(format!(
                            "lease on {} changed before reclaim",
                            r.id
                        )));
                    }
                    match delay {
                        Some(delay) => r.schedule_retry(delay, error, now),
                        None => r.mark_archived(error, now),
                    }
                    Ok(())
                }),
            )
            .await;

        match result {
            Ok(moved) => {
                tracing::warn!(
                    task_id = %moved.id,
                    queue = %moved.queue,
                    to = %to,
                    retry_count = moved.retry_count,
                    "reclaimed task with expired lease"
                );
                Ok(Some(to))
            }
            Err(e) if lost_race(&e) => Ok(None),
            Err(e) => Err(e),
        }
    }

    /// Sweep every `poll_interval` until shutdown. Store errors back off
    /// exponentially.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let backoff = loop_backoff(self.poll_interval);
        let mut failures: u32 = 0;

        tracing::info!(interval = ?self.poll_interval, "scheduler started");
        loop {
            let wait = match self.sweep().await {
                Ok(_) => {
                    failures = 0;
                    self.poll_interval
                }
                Err(e) => {
                    let wait = backoff.backoff(failures);
                    failures = failures.saturating_add(1);
                    tracing::error!(error = %e, retry_in = ?wait, "scheduler sweep failed");
                    wait
                }
            };
            if sleep_or_shutdown(wait, &mut shutdown).await {
                break;
            }
        }
        tracing::info!("scheduler stopped");
    }
}

/// Another mover got there first, or a guard in the mutation refused.
fn lost_race(err: &SpindleError) -> bool {
    err.is_lost_race() || matches!(err, SpindleError::NotFound(_) | SpindleError::Conflict(_))
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use chrono::TimeDelta;
    use ulid::Ulid;

    use super::*;
    use crate::domain::{DefaultDecider, EnqueueOptions, WorkerId};
    use crate::ports::ManualClock;
    use crate::queue::tests::{new_record, t0};
    use crate::queue::{Claim, InMemoryQueueStore, RetryPolicy};

    struct Fixture {
        store: Arc<InMemoryQueueStore>,
        clock: Arc<ManualClock>,
        scheduler: Scheduler,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryQueueStore::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let decider = Arc::new(DefaultDecider::new(
            RetryPolicy::default().with_jitter(Duration::ZERO),
        ));
        let scheduler = Scheduler::new(
            store.clone(),
            clock.clone(),
            decider,
            Duration::from_secs(5),
        );
        Fixture {
            store,
            clock,
            scheduler,
        }
    }

    impl Fixture {
        async fn enqueue(&self, opts: EnqueueOptions) -> TaskId {
            let record = new_record("default", opts, self.clock.now());
            let id = record.id;
            self.store.enqueue(record).await.unwrap();
            id
        }

        async fn claim(&self, lease: Duration) -> TaskRecord {
            let worker = WorkerId::from_ulid(Ulid::new());
            match self
                .store
                .claim_one("default", worker, lease, self.clock.now())
                .await
                .unwrap()
            {
                Claim::Claimed(r) => r,
                Claim::Empty => panic!("nothing to claim"),
            }
        }
    }

    #[tokio::test]
    async fn promotes_only_due_tasks() {
        let f = fixture();
        let soon = f
            .enqueue(EnqueueOptions::new().process_in(TimeDelta::seconds(2)))
            .await;
        f.enqueue(EnqueueOptions::new().process_in(TimeDelta::seconds(60)))
            .await;

        assert!(f.scheduler.sweep().await.unwrap().is_empty());

        f.clock.advance(Duration::from_secs(2));
        let report = f.scheduler.sweep().await.unwrap();

        assert_eq!(report.promoted, 1);
        assert_eq!(f.store.get(soon).await.unwrap().state, TaskState::Pending);
        assert_eq!(f.store.counts("default").await.unwrap().scheduled, 1);
    }

    #[tokio::test]
    async fn promotes_more_than_one_batch() {
        let f = fixture();
        for _ in 0..(PROMOTE_BATCH + 5) {
            f.enqueue(EnqueueOptions::new().process_in(TimeDelta::seconds(1)))
                .await;
        }
        f.clock.advance(Duration::from_secs(1));

        let report = f.scheduler.sweep().await.unwrap();
        assert_eq!(report.promoted, PROMOTE_BATCH + 5);
    }

    #[tokio::test]
    async fn expired_lease_goes_to_retry_with_reason() {
        let f = fixture();
        f.enqueue(EnqueueOptions::new().max_retry(3)).await;
        let task = f.claim(Duration::from_secs(30)).await;

        f.clock.advance(Duration::from_secs(30));
        let report = f.scheduler.sweep().await.unwrap();

        assert_eq!(report.reclaimed_to_retry, 1);
        let record = f.store.get(task.id).await.unwrap();
        assert_eq!(record.state, TaskState::Retry);
        assert_eq!(record.retry_count, 1);
        assert_eq!(record.last_error.as_deref(), Some(LEASE_EXPIRED));
        assert!(record.lease.is_none());
        assert!(record.process_at > f.clock.now());
    }

    #[tokio::test]
    async fn expired_lease_without_retries_is_archived() {
        let f = fixture();
        f.enqueue(EnqueueOptions::new().max_retry(0)).await;
        let task = f.claim(Duration::from_secs(1)).await;

        f.clock.advance(Duration::from_secs(5));
        let report = f.scheduler.sweep().await.unwrap();

        assert_eq!(report.reclaimed_to_archived, 1);
        let record = f.store.get(task.id).await.unwrap();
        assert_eq!(record.state, TaskState::Archived);
        assert_eq!(record.last_error.as_deref(), Some(LEASE_EXPIRED));
    }

    #[tokio::test]
    async fn live_lease_is_left_alone() {
        let f = fixture();
        f.enqueue(EnqueueOptions::new()).await;
        let task = f.claim(Duration::from_secs(30)).await;

        f.clock.advance(Duration::from_secs(29));
        assert!(f.scheduler.sweep().await.unwrap().is_empty());
        assert_eq!(f.store.get(task.id).await.unwrap().state, TaskState::Active);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sweeps_move_each_task_once() {
        const SWEEPERS: usize = 4;
        const ORPHANS: usize = 20;
        let due = PROMOTE_BATCH * 3 + 7;

        let f = fixture();
        let mut orphans = Vec::new();
        for _ in 0..ORPHANS {
            f.enqueue(EnqueueOptions::new().max_retry(3)).await;
            orphans.push(f.claim(Duration::from_secs(1)).await.id);
        }
        let mut scheduled = Vec::new();
        for _ in 0..due {
            scheduled.push(
                f.enqueue(EnqueueOptions::new().process_in(TimeDelta::seconds(1)))
                    .await,
            );
        }
        f.clock.advance(Duration::from_secs(2));

        let barrier = Arc::new(tokio::sync::Barrier::new(SWEEPERS));
        let handles: Vec<_> = (0..SWEEPERS)
            .map(|_| {
                let scheduler = f.scheduler.clone();
                let barrier = barrier.clone();
                tokio::spawn(async move {
                    barrier.wait().await;
                    scheduler.sweep().await
                })
            })
            .collect();

        let mut total = SweepReport::default();
        for handle in handles {
            let report = handle.await.unwrap().unwrap();
            total.promoted += report.promoted;
            total.reclaimed_to_retry += report.reclaimed_to_retry;
            total.reclaimed_to_archived += report.reclaimed_to_archived;
        }

        assert_eq!(total.promoted, due);
        assert_eq!(total.reclaimed_to_retry, ORPHANS);
        assert_eq!(total.reclaimed_to_archived, 0);

        let counts = f.store.counts("default").await.unwrap();
        assert_eq!(counts.pending, due);
        assert_eq!(counts.retry, ORPHANS);
        assert_eq!(counts.active, 0);
        assert_eq!(counts.scheduled, 0);
        assert_eq!(counts.total(), due + ORPHANS);

        for id in scheduled {
            assert_eq!(f.store.get(id).await.unwrap().state, TaskState::Pending);
        }
        for id in orphans {
            let record = f.store.get(id).await.unwrap();
            assert_eq!(record.state, TaskState::Retry);
            // 一回だけ reclaim されている
            assert_eq!(record.retry_count, 1);
        }
    }

    #[tokio::test]
    async fn run_stops_on_shutdown() {
        let f = fixture();
        let (tx, rx) = watch::channel(false);
        let scheduler = f.scheduler.clone();
        let join = tokio::spawn(async move { scheduler.run(rx).await });

        tx.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(5), join)
            .await
            .unwrap()
            .unwrap();
    }
}
