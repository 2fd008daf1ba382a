//! In-memory queue store.
//!
//! One `StateSet` per (queue, state) plus an id -> record map. Every
//! primitive runs under a single async mutex and never awaits while holding
//! it, so each call is atomic with respect to every other call.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use super::state_set::StateSet;
use super::{Claim, Mutation, Pagination, QueueStore, TaskRecord, TaskState};
use crate::domain::{TaskId, WorkerId};
use crate::error::{Result, SpindleError};
use crate::observability::QueueCounts;

/// Sets of one logical queue.
#[derive(Debug, Default, Clone)]
struct QueueSets {
    pending: StateSet,
    scheduled: StateSet,
    active: StateSet,
    retry: StateSet,
    archived: StateSet,
    completed: StateSet,
}

impl QueueSets {
    fn set(&self, state: TaskState) -> &StateSet {
        match state {
            TaskState::Pending => &self.pending,
            TaskState::Scheduled => &self.scheduled,
            TaskState::Active => &self.active,
            TaskState::Retry => &self.retry,
            TaskState::Archived => &self.archived,
            TaskState::Completed => &self.completed,
        }
    }

    fn set_mut(&mut self, state: TaskState) -> &mut StateSet {
        match state {
            TaskState::Pending => &mut self.pending,
            TaskState::Scheduled => &mut self.scheduled,
            TaskState::Active => &mut self.active,
            TaskState::Retry => &mut self.retry,
            TaskState::Archived => &mut self.archived,
            TaskState::Completed => &mut self.completed,
        }
    }
}

/// Serializable image of the whole store (used by the file backend).
#[derive(Debug, Default, Serialize, Deserialize)]
pub(super) struct Snapshot {
    pub(super) next_seq: i64,
    pub(super) entries: Vec<SnapshotEntry>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(super) struct SnapshotEntry {
    pub(super) score: i64,
    pub(super) record: TaskRecord,
}

#[derive(Debug, Default, Clone)]
pub(super) struct MemoryState {
    records: HashMap<TaskId, TaskRecord>,
    queues: BTreeMap<String, QueueSets>,

    /// Monotonic insertion counter; the score of pending entries (FIFO).
    next_seq: i64,
}

fn micros(at: DateTime<Utc>) -> i64 {
    at.timestamp_micros()
}

impl MemoryState {
    /// Score of a record in the set named by its current state.
    fn score_for(&mut self, record: &TaskRecord) -> i64 {
        match record.state {
            TaskState::Pending => {
                let seq = self.next_seq;
                self.next_seq += 1;
                seq
            }
            TaskState::Scheduled | TaskState::Retry => micros(record.process_at),
            TaskState::Active => record
                .lease
                .map(|lease| micros(lease.expires_at))
                .unwrap_or(i64::MIN),
            TaskState::Archived | TaskState::Completed => {
                record.expires_at().map(micros).unwrap_or(i64::MAX)
            }
        }
    }

    fn insert(&mut self, record: TaskRecord) {
        let score = self.score_for(&record);
        self.insert_with_score(record, score);
    }

    fn insert_with_score(&mut self, record: TaskRecord, score: i64) {
        self.queues
            .entry(record.queue.clone())
            .or_default()
            .set_mut(record.state)
            .insert(record.id, score);
        self.records.insert(record.id, record);
    }

    fn unlink(&mut self, record: &TaskRecord) {
        if let Some(sets) = self.queues.get_mut(&record.queue) {
            sets.set_mut(record.state).remove(record.id);
        }
    }

    pub(super) fn enqueue(&mut self, record: TaskRecord) -> Result<()> {
        if self.records.contains_key(&record.id) {
            return Err(SpindleError::DuplicateId(record.id));
        }
        match record.state {
            TaskState::Pending => {}
            TaskState::Scheduled if record.process_at > record.enqueued_at => {}
            TaskState::Scheduled => {
                return Err(SpindleError::Validation(format!(
                    "scheduled task {} has process_at {} not after enqueue time",
                    record.id, record.process_at
                )));
            }
            other => {
                return Err(SpindleError::Validation(format!(
                    "tasks cannot be enqueued as {other}"
                )));
            }
        }
        self.insert(record);
        Ok(())
    }

    pub(super) fn move_task(
        &mut self,
        id: TaskId,
        from: TaskState,
        to: TaskState,
        now: DateTime<Utc>,
        mutate: Mutation,
    ) -> Result<TaskRecord> {
        let current = self.records.get(&id).ok_or(SpindleError::NotFound(id))?;
        if current.state != from {
            return Err(SpindleError::NotFoundInState { id, expected: from });
        }
        if !from.can_transition_to(to) {
            return Err(SpindleError::InvalidTransition { id, from, to });
        }

        // Mutate a copy; nothing is touched unless every check passes.
        let mut updated = current.clone();
        mutate(&mut updated)?;
        updated.id = id;
        updated.queue = current.queue.clone();
        updated.state = to;

        if to.is_delayed() && updated.process_at <= now {
            return Err(SpindleError::InvalidTransition { id, from, to });
        }
        if to == TaskState::Active && updated.lease.is_none() {
            return Err(SpindleError::InvalidTransition { id, from, to });
        }
        if to != TaskState::Active {
            updated.lease = None;
        }

        let previous = current.clone();
        self.unlink(&previous);
        self.insert(updated.clone());
        Ok(updated)
    }

    fn peek_due(&self, state: TaskState, now: DateTime<Utc>, limit: usize) -> Vec<TaskId> {
        let cutoff = micros(now);
        let mut due: Vec<(i64, TaskId)> = self
            .queues
            .values()
            .flat_map(|sets| sets.set(state).up_to(cutoff))
            .filter(|(_, id)| {
                self.records
                    .get(id)
                    .is_some_and(|r| r.process_at <= now)
            })
            .collect();
        due.sort_unstable();
        due.into_iter().take(limit).map(|(_, id)| id).collect()
    }

    pub(super) fn claim_one(
        &mut self,
        queue: &str,
        worker: WorkerId,
        lease_duration: Duration,
        now: DateTime<Utc>,
    ) -> Claim {
        let Some(sets) = self.queues.get_mut(queue) else {
            return Claim::Empty;
        };
        let Some(id) = sets.pending.pop_first() else {
            return Claim::Empty;
        };
        let Some(mut record) = self.records.remove(&id) else {
            return Claim::Empty;
        };
        record.state = TaskState::Active;
        record.claim(worker, lease_duration, now);
        self.insert(record.clone());
        Claim::Claimed(record)
    }

    fn expired_leases(&self, now: DateTime<Utc>) -> Vec<TaskRecord> {
        let cutoff = micros(now);
        self.queues
            .values()
            .flat_map(|sets| sets.active.up_to(cutoff))
            .filter_map(|(_, id)| self.records.get(&id))
            .filter(|r| r.lease_expired(now))
            .cloned()
            .collect()
    }

    pub(super) fn sweep_expired(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = micros(now);
        let expired: Vec<TaskId> = self
            .queues
            .values()
            .flat_map(|sets| {
                sets.completed
                    .iter()
                    .chain(sets.archived.iter())
                    .filter(move |(score, _)| *score < cutoff)
            })
            .map(|(_, id)| id)
            .collect();

        for id in &expired {
            if let Some(record) = self.records.remove(id) {
                self.unlink(&record);
            }
        }
        expired.len()
    }

    fn list(&self, queue: &str, state: TaskState, page: Pagination) -> Vec<TaskRecord> {
        let Some(sets) = self.queues.get(queue) else {
            return Vec::new();
        };
        sets.set(state)
            .iter()
            .skip(page.start())
            .take(page.size)
            .filter_map(|(_, id)| self.records.get(&id).cloned())
            .collect()
    }

    pub(super) fn delete(&mut self, id: TaskId) -> Result<TaskRecord> {
        let record = self.records.get(&id).ok_or(SpindleError::NotFound(id))?;
        if record.state == TaskState::Active {
            return Err(SpindleError::Conflict(format!(
                "task {id} is active and cannot be deleted"
            )));
        }
        let record = record.clone();
        self.unlink(&record);
        self.records.remove(&id);
        Ok(record)
    }

    fn counts(&self, queue: &str) -> QueueCounts {
        let mut counts = QueueCounts::new(queue);
        if let Some(sets) = self.queues.get(queue) {
            counts.pending = sets.pending.len();
            counts.scheduled = sets.scheduled.len();
            counts.active = sets.active.len();
            counts.retry = sets.retry.len();
            counts.archived = sets.archived.len();
            counts.completed = sets.completed.len();
        }
        counts
    }

    fn snapshot(&self) -> Snapshot {
        let entries = self
            .queues
            .values()
            .flat_map(|sets| TaskState::ALL.into_iter().flat_map(move |s| sets.set(s).iter()))
            .filter_map(|(score, id)| {
                self.records.get(&id).map(|record| SnapshotEntry {
                    score,
                    record: record.clone(),
                })
            })
            .collect();
        Snapshot {
            next_seq: self.next_seq,
            entries,
        }
    }

    fn restore(snapshot: Snapshot) -> Self {
        let mut state = MemoryState {
            next_seq: snapshot.next_seq,
            ..Default::default()
        };
        for entry in snapshot.entries {
            state.insert_with_score(entry.record, entry.score);
        }
        state
    }
}

/// In-memory `QueueStore`. Not durable on its own; see `FileQueueStore`.
#[derive(Debug, Default)]
pub struct InMemoryQueueStore {
    state: Mutex<MemoryState>,
}

impl InMemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub(super) fn from_snapshot(snapshot: Snapshot) -> Self {
        Self {
            state: Mutex::new(MemoryState::restore(snapshot)),
        }
    }

    /// Apply `op` to a staged copy, hand its snapshot to `persist`, and only
    /// then make the copy current. If `op` or `persist` fails the live state
    /// is unchanged. Unchanged results (`changed == false`) skip `persist`.
    pub(super) async fn apply_durably<T, P, Fut>(
        &self,
        op: impl FnOnce(&mut MemoryState) -> Result<T>,
        changed: impl FnOnce(&T) -> bool,
        persist: P,
    ) -> Result<T>
    where
        P: FnOnce(Snapshot) -> Fut,
        Fut: Future<Output = Result<()>>,
    {
        let mut state = self.state.lock().await;
        let mut staged = state.clone();
        let value = op(&mut staged)?;
        if changed(&value) {
            persist(staged.snapshot()).await?;
            *state = staged;
        }
        Ok(value)
    }
}

#[async_trait]
impl QueueStore for InMemoryQueueStore {
    async fn enqueue(&self, record: TaskRecord) -> Result<()> {
        self.state.lock().await.enqueue(record)
    }

    async fn move_task(
        &self,
        id: TaskId,
        from: TaskState,
        to: TaskState,
        now: DateTime<Utc>,
        mutate: Mutation,
    ) -> Result<TaskRecord> {
        self.state.lock().await.move_task(id, from, to, now, mutate)
    }

    async fn peek_due(
        &self,
        state: TaskState,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TaskId>> {
        if !state.is_delayed() {
            return Err(SpindleError::Validation(format!(
                "peek_due only applies to delayed sets, got {state}"
            )));
        }
        Ok(self.state.lock().await.peek_due(state, now, limit))
    }

    async fn claim_one(
        &self,
        queue: &str,
        worker: WorkerId,
        lease_duration: Duration,
        now: DateTime<Utc>,
    ) -> Result<Claim> {
        Ok(self
            .state
            .lock()
            .await
            .claim_one(queue, worker, lease_duration, now))
    }

    async fn reclaim_expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<TaskRecord>> {
        Ok(self.state.lock().await.expired_leases(now))
    }

    async fn get(&self, id: TaskId) -> Result<TaskRecord> {
        self.state
            .lock()
            .await
            .records
            .get(&id)
            .cloned()
            .ok_or(SpindleError::NotFound(id))
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        Ok(self.state.lock().await.sweep_expired(now))
    }

    async fn list(
        &self,
        queue: &str,
        state: TaskState,
        page: Pagination,
    ) -> Result<Vec<TaskRecord>> {
        Ok(self.state.lock().await.list(queue, state, page))
    }

    async fn delete(&self, id: TaskId) -> Result<TaskRecord> {
        self.state.lock().await.delete(id)
    }

    async fn counts(&self, queue: &str) -> Result<QueueCounts> {
        Ok(self.state.lock().await.counts(queue))
    }

    async fn queues(&self) -> Result<Vec<String>> {
        Ok(self.state.lock().await.queues.keys().cloned().collect())
    }

    async fn ping(&self) -> Result<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::TimeDelta;

    use super::*;
    use crate::domain::EnqueueOptions;
    use crate::queue::mutation;
    use crate::queue::tests::{new_record, t0};
    use ulid::Ulid;

    const LEASE: Duration = Duration::from_secs(30);

    fn worker() -> WorkerId {
        WorkerId::from_ulid(Ulid::new())
    }

    async fn enqueue(store: &InMemoryQueueStore, queue: &str, opts: EnqueueOptions) -> TaskId {
        let record = new_record(queue, opts, t0());
        let id = record.id;
        store.enqueue(record).await.unwrap();
        id
    }

    async fn claimed(store: &InMemoryQueueStore, queue: &str, now: DateTime<Utc>) -> TaskRecord {
        match store.claim_one(queue, worker(), LEASE, now).await.unwrap() {
            Claim::Claimed(record) => record,
            Claim::Empty => panic!("expected a claim"),
        }
    }

    #[tokio::test]
    async fn enqueue_and_counts() {
        let store = InMemoryQueueStore::new();
        enqueue(&store, "default", EnqueueOptions::new()).await;
        enqueue(&store, "default", EnqueueOptions::new().process_in(TimeDelta::seconds(5))).await;

        let counts = store.counts("default").await.unwrap();
        assert_eq!(counts.pending, 1);
        assert_eq!(counts.scheduled, 1);
        assert_eq!(counts.total(), 2);
        assert_eq!(store.queues().await.unwrap(), vec!["default".to_string()]);
    }

    #[tokio::test]
    async fn duplicate_id_is_rejected() {
        let store = InMemoryQueueStore::new();
        let record = new_record("default", EnqueueOptions::new(), t0());
        store.enqueue(record.clone()).await.unwrap();

        let err = store.enqueue(record).await.unwrap_err();
        assert!(matches!(err, SpindleError::DuplicateId(_)));
    }

    #[tokio::test]
    async fn claim_is_fifo_and_attaches_lease() {
        let store = InMemoryQueueStore::new();
        let first = enqueue(&store, "default", EnqueueOptions::new()).await;
        let second = enqueue(&store, "default", EnqueueOptions::new()).await;

        let a = claimed(&store, "default", t0()).await;
        let b = claimed(&store, "default", t0()).await;

        assert_eq!((a.id, b.id), (first, second));
        assert_eq!(a.state, TaskState::Active);
        assert_eq!(a.lease.unwrap().expires_at, t0() + TimeDelta::seconds(30));
        assert_eq!(
            store.claim_one("default", worker(), LEASE, t0()).await.unwrap(),
            Claim::Empty
        );
        assert_eq!(
            store.claim_one("missing", worker(), LEASE, t0()).await.unwrap(),
            Claim::Empty
        );
    }

    #[tokio::test]
    async fn scheduled_tasks_are_not_claimable() {
        let store = InMemoryQueueStore::new();
        enqueue(&store, "default", EnqueueOptions::new().process_in(TimeDelta::seconds(2))).await;

        assert_eq!(
            store.claim_one("default", worker(), LEASE, t0()).await.unwrap(),
            Claim::Empty
        );
    }

    #[tokio::test]
    async fn peek_due_respects_process_at() {
        let store = InMemoryQueueStore::new();
        let soon = enqueue(&store, "a", EnqueueOptions::new().process_in(TimeDelta::seconds(1))).await;
        let later = enqueue(&store, "b", EnqueueOptions::new().process_in(TimeDelta::seconds(9))).await;

        let due = store
            .peek_due(TaskState::Scheduled, t0() + TimeDelta::seconds(1), 100)
            .await
            .unwrap();
        assert_eq!(due, vec![soon]);

        let due = store
            .peek_due(TaskState::Scheduled, t0() + TimeDelta::seconds(10), 100)
            .await
            .unwrap();
        assert_eq!(due, vec![soon, later]);

        // peeking does not remove
        assert_eq!(store.counts("a").await.unwrap().scheduled, 1);
        assert!(store.peek_due(TaskState::Pending, t0(), 1).await.is_err());
    }

    #[tokio::test]
    async fn move_checks_source_state() {
        let store = InMemoryQueueStore::new();
        let id = enqueue(&store, "default", EnqueueOptions::new()).await;

        let err = store
            .move_task(id, TaskState::Scheduled, TaskState::Pending, t0(), mutation(|_| Ok(())))
            .await
            .unwrap_err();
        assert!(err.is_lost_race());

        let err = store
            .move_task(
                TaskId::from_ulid(Ulid::new()),
                TaskState::Pending,
                TaskState::Archived,
                t0(),
                mutation(|_| Ok(())),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, SpindleError::NotFound(_)));
    }

    #[tokio::test]
    async fn move_rejects_edges_outside_the_state_machine() {
        let store = InMemoryQueueStore::new();
        let id = enqueue(&store, "default", EnqueueOptions::new()).await;

        let err = store
            .move_task(id, TaskState::Pending, TaskState::Completed, t0(), mutation(|_| Ok(())))
            .await
            .unwrap_err();
        assert!(matches!(err, SpindleError::InvalidTransition { .. }));
    }

    #[tokio::test]
    async fn move_into_retry_requires_future_process_at() {
        let store = InMemoryQueueStore::new();
        enqueue(&store, "default", EnqueueOptions::new()).await;
        let task = claimed(&store, "default", t0()).await;

        let err = store
            .move_task(task.id, TaskState::Active, TaskState::Retry, t0(), mutation(|_| Ok(())))
            .await
            .unwrap_err();
        assert!(matches!(err, SpindleError::InvalidTransition { .. }));
        assert_eq!(store.get(task.id).await.unwrap().state, TaskState::Active);

        let moved = store
            .move_task(
                task.id,
                TaskState::Active,
                TaskState::Retry,
                t0(),
                mutation(|r| {
                    r.schedule_retry(Duration::from_secs(1), "boom".into(), t0());
                    Ok(())
                }),
            )
            .await
            .unwrap();
        assert_eq!(moved.state, TaskState::Retry);
        assert_eq!(moved.retry_count, 1);
        assert!(moved.lease.is_none());
    }

    #[tokio::test]
    async fn failing_mutation_leaves_record_untouched() {
        let store = InMemoryQueueStore::new();
        let id = enqueue(&store, "default", EnqueueOptions::new()).await;

        let err = store
            .move_task(
                id,
                TaskState::Pending,
                TaskState::Archived,
                t0(),
                mutation(|r| {
                    r.last_error = Some("should not stick".into());
                    Err(SpindleError::Conflict("nope".into()))
                }),
            )
            .await
            .unwrap_err();
        assert!(err.is_conflict());

        let record = store.get(id).await.unwrap();
        assert_eq!(record.state, TaskState::Pending);
        assert_eq!(record.last_error, None);
        assert_eq!(store.counts("default").await.unwrap().pending, 1);
    }

    #[tokio::test]
    async fn expired_leases_are_reported() {
        let store = InMemoryQueueStore::new();
        enqueue(&store, "default", EnqueueOptions::new()).await;
        let task = claimed(&store, "default", t0()).await;

        assert!(store.reclaim_expired_leases(t0()).await.unwrap().is_empty());

        let expired = store
            .reclaim_expired_leases(t0() + TimeDelta::seconds(30))
            .await
            .unwrap();
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].id, task.id);
    }

    #[tokio::test]
    async fn sweep_removes_records_past_retention() {
        let store = InMemoryQueueStore::new();
        enqueue(
            &store,
            "default",
            EnqueueOptions::new().retention(Duration::from_secs(60)),
        )
        .await;
        let task = claimed(&store, "default", t0()).await;
        store
            .move_task(
                task.id,
                TaskState::Active,
                TaskState::Completed,
                t0(),
                mutation(|r| {
                    r.mark_completed(t0());
                    Ok(())
                }),
            )
            .await
            .unwrap();

        assert_eq!(store.sweep_expired(t0() + TimeDelta::seconds(60)).await.unwrap(), 0);
        assert_eq!(store.sweep_expired(t0() + TimeDelta::seconds(61)).await.unwrap(), 1);
        assert!(matches!(
            store.get(task.id).await.unwrap_err(),
            SpindleError::NotFound(_)
        ));
        assert_eq!(store.counts("default").await.unwrap().total(), 0);
    }

    #[tokio::test]
    async fn list_pages_through_a_set() {
        let store = InMemoryQueueStore::new();
        let mut ids = Vec::new();
        for _ in 0..5 {
            ids.push(enqueue(&store, "default", EnqueueOptions::new()).await);
        }

        let page0 = store
            .list("default", TaskState::Pending, Pagination::new(2, 0))
            .await
            .unwrap();
        let page2 = store
            .list("default", TaskState::Pending, Pagination::new(2, 2))
            .await
            .unwrap();

        assert_eq!(page0.iter().map(|r| r.id).collect::<Vec<_>>(), ids[..2]);
        assert_eq!(page2.iter().map(|r| r.id).collect::<Vec<_>>(), ids[4..]);
    }

    #[tokio::test]
    async fn delete_refuses_active_tasks() {
        let store = InMemoryQueueStore::new();
        let pending = enqueue(&store, "default", EnqueueOptions::new()).await;
        enqueue(&store, "default", EnqueueOptions::new()).await;

        store.delete(pending).await.unwrap();
        let active = claimed(&store, "default", t0()).await;

        assert!(store.delete(active.id).await.unwrap_err().is_conflict());
    }

    #[tokio::test]
    async fn snapshot_restores_sets_and_order() {
        let store = InMemoryQueueStore::new();
        let first = enqueue(&store, "default", EnqueueOptions::new()).await;
        let second = enqueue(&store, "default", EnqueueOptions::new()).await;
        enqueue(&store, "default", EnqueueOptions::new().process_in(TimeDelta::seconds(5))).await;

        let restored = InMemoryQueueStore::from_snapshot(store.state.lock().await.snapshot());

        assert_eq!(restored.counts("default").await.unwrap().scheduled, 1);
        assert_eq!(claimed(&restored, "default", t0()).await.id, first);
        assert_eq!(claimed(&restored, "default", t0()).await.id, second);

        // sequence continues after restore: new entries go to the back
        enqueue(&restored, "default", EnqueueOptions::new()).await;
        assert_eq!(restored.counts("default").await.unwrap().pending, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_claims_hand_out_a_task_once() {
        let store = Arc::new(InMemoryQueueStore::new());
        let id = enqueue(&store, "default", EnqueueOptions::new()).await;

        let mut joins = Vec::new();
        for _ in 0..32 {
            let store = Arc::clone(&store);
            joins.push(tokio::spawn(async move {
                store.claim_one("default", worker(), LEASE, t0()).await.unwrap()
            }));
        }

        let mut winners = Vec::new();
        for join in joins {
            if let Claim::Claimed(record) = join.await.unwrap() {
                winners.push(record.id);
            }
        }
        assert_eq!(winners, vec![id]);
    }
}
