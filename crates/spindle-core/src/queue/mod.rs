//! Queue module: the store port, state machine, retry policy and backends.

mod file;
mod memory;
mod record;
mod retry;
mod state;
mod state_set;

pub use file::FileQueueStore;
pub use memory::InMemoryQueueStore;
pub use record::{Lease, TaskInfo, TaskRecord, shift};
pub use retry::RetryPolicy;
pub use state::TaskState;

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::{TaskId, WorkerId};
use crate::error::Result;
use crate::observability::QueueCounts;

/// Edit applied to a record inside `move_task`, under the store's atomicity.
///
/// Returning an error aborts the move and leaves the record untouched.
pub type Mutation = Box<dyn FnOnce(&mut TaskRecord) -> Result<()> + Send>;

/// Helper to box a mutation closure.
pub fn mutation<F>(f: F) -> Mutation
where
    F: FnOnce(&mut TaskRecord) -> Result<()> + Send + 'static,
{
    Box::new(f)
}

/// Result of `claim_one`. `Empty` is a normal signal, not a fault.
#[derive(Debug, Clone, PartialEq)]
pub enum Claim {
    Claimed(TaskRecord),
    Empty,
}

/// Page request for list operations (page numbers start at zero).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub size: usize,
    pub page: usize,
}

impl Pagination {
    pub fn new(size: usize, page: usize) -> Self {
        Self { size, page }
    }

    pub fn start(&self) -> usize {
        self.size.saturating_mul(self.page)
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self { size: 20, page: 0 }
    }
}

/// Queue store port.
///
/// Every method is a single atomic step against the store. Producer,
/// Scheduler, Worker Pool and Inspector coordinate only through these; two
/// callers racing on the same task are serialized here, and the loser sees
/// `NotFoundInState` (or `Claim::Empty`).
///
/// The store is clock-free: callers pass `now`.
#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Insert a new record into the set named by `record.state`.
    async fn enqueue(&self, record: TaskRecord) -> Result<()>;

    /// Atomically move `id` from `from` to `to`, applying `mutate` in between.
    async fn move_task(
        &self,
        id: TaskId,
        from: TaskState,
        to: TaskState,
        now: DateTime<Utc>,
        mutate: Mutation,
    ) -> Result<TaskRecord>;

    /// Ids in a delayed set whose process_at <= now, earliest first.
    async fn peek_due(&self, state: TaskState, now: DateTime<Utc>, limit: usize)
    -> Result<Vec<TaskId>>;

    /// Pop the head of `queue`'s pending set into active under a lease.
    async fn claim_one(
        &self,
        queue: &str,
        worker: WorkerId,
        lease_duration: Duration,
        now: DateTime<Utc>,
    ) -> Result<Claim>;

    /// Active records whose lease expired at or before `now`.
    async fn reclaim_expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<TaskRecord>>;

    async fn get(&self, id: TaskId) -> Result<TaskRecord>;

    /// Delete terminal records whose retention elapsed. Returns how many.
    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize>;

    /// One page of a (queue, state) set, in set order.
    async fn list(
        &self,
        queue: &str,
        state: TaskState,
        page: Pagination,
    ) -> Result<Vec<TaskRecord>>;

    /// Remove a record that is not active.
    async fn delete(&self, id: TaskId) -> Result<TaskRecord>;

    async fn counts(&self, queue: &str) -> Result<QueueCounts>;

    async fn queues(&self) -> Result<Vec<String>>;

    async fn ping(&self) -> Result<()>;
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::{EnqueueOptions, TaskType};
    use chrono::TimeZone;
    use ulid::Ulid;

    pub(crate) fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    pub(crate) fn new_record(queue: &str, opts: EnqueueOptions, now: DateTime<Utc>) -> TaskRecord {
        TaskRecord::new(
            TaskId::from_ulid(Ulid::new()),
            TaskType::new("test"),
            b"{}".to_vec(),
            opts.queue(queue).resolve(now).unwrap(),
            now,
        )
    }

    pub(crate) fn record_with_retries(retry_count: u32, max_retry: u32) -> TaskRecord {
        let mut r = new_record("default", EnqueueOptions::new().max_retry(max_retry), t0());
        r.retry_count = retry_count;
        r
    }

    #[test]
    fn pagination_start_index() {
        assert_eq!(Pagination::default().start(), 0);
        assert_eq!(Pagination::new(10, 3).start(), 30);
    }
}
