//! Task record: identity, payload and scheduling metadata.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use super::TaskState;
use crate::domain::{ResolvedOptions, TaskId, TaskType, WorkerId};

/// Exclusive, time-bounded claim a worker holds on an active task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lease {
    pub owner: WorkerId,
    pub expires_at: DateTime<Utc>,
}

/// The single source of truth for one task.
///
/// Design:
/// - State-sets in the store hold `TaskId`s only; the record carries `state`
///   so a lookup never has to scan the sets.
/// - Only the store mutates `state`. Everything else goes through `move`
///   mutations, which edit the metadata fields below.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub task_type: TaskType,
    pub payload: Vec<u8>,
    pub queue: String,
    pub state: TaskState,

    pub enqueued_at: DateTime<Utc>,

    /// Earliest time the task may be dispatched.
    pub process_at: DateTime<Utc>,

    /// Hard execution cutoff; also caps the lease.
    pub deadline: Option<DateTime<Utc>>,

    /// Per-task execution timeout; falls back to the engine default.
    pub timeout: Option<Duration>,

    pub max_retry: u32,
    pub retry_count: u32,

    /// How long a terminal record stays queryable.
    pub retention: Duration,

    pub last_failed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub completed_at: Option<DateTime<Utc>>,
    pub archived_at: Option<DateTime<Utc>>,

    /// Present only while `state == Active`.
    pub lease: Option<Lease>,
}

/// What the Producer and Inspector hand back to callers.
pub type TaskInfo = TaskRecord;

impl TaskRecord {
    /// Build a fresh record; the initial state is Scheduled when process_at
    /// lies after `now`, Pending otherwise.
    pub fn new(
        id: TaskId,
        task_type: TaskType,
        payload: Vec<u8>,
        options: ResolvedOptions,
        now: DateTime<Utc>,
    ) -> Self {
        let state = if options.process_at > now {
            TaskState::Scheduled
        } else {
            TaskState::Pending
        };
        Self {
            id,
            task_type,
            payload,
            queue: options.queue,
            state,
            enqueued_at: now,
            process_at: options.process_at,
            deadline: options.deadline,
            timeout: options.timeout,
            max_retry: options.max_retry,
            retry_count: 0,
            retention: options.retention,
            last_failed_at: None,
            last_error: None,
            completed_at: None,
            archived_at: None,
            lease: None,
        }
    }

    /// Attach a lease. Expiry is `now + (timeout or default)`, capped by the
    /// deadline.
    pub fn claim(&mut self, owner: WorkerId, default_timeout: Duration, now: DateTime<Utc>) {
        let timeout = self.timeout.unwrap_or(default_timeout);
        let mut expires_at = shift(now, timeout);
        if let Some(deadline) = self.deadline {
            expires_at = expires_at.min(deadline);
        }
        self.lease = Some(Lease { owner, expires_at });
    }

    pub fn mark_completed(&mut self, now: DateTime<Utc>) {
        self.lease = None;
        self.completed_at = Some(now);
    }

    pub fn mark_archived(&mut self, error: String, now: DateTime<Utc>) {
        self.lease = None;
        self.last_error = Some(error);
        self.last_failed_at = Some(now);
        self.archived_at = Some(now);
    }

    /// Record a failure and push process_at out by `delay`.
    pub fn schedule_retry(&mut self, delay: Duration, error: String, now: DateTime<Utc>) {
        self.lease = None;
        self.retry_count = (self.retry_count + 1).min(self.max_retry);
        self.process_at = shift(now, delay);
        self.last_error = Some(error);
        self.last_failed_at = Some(now);
    }

    /// Make the task dispatchable right away.
    pub fn requeue(&mut self, now: DateTime<Utc>) {
        self.lease = None;
        self.process_at = now;
    }

    /// Guard for commits: fails unless `owner` still holds the lease.
    pub fn check_lease(&self, owner: WorkerId) -> crate::error::Result<()> {
        match self.lease {
            Some(lease) if lease.owner == owner => Ok(()),
            _ => Err(crate::error::SpindleError::Conflict(format!(
                "lease on {} is no longer held by {owner}",
                self.id
            ))),
        }
    }

    pub fn lease_expired(&self, now: DateTime<Utc>) -> bool {
        self.lease.is_some_and(|lease| lease.expires_at <= now)
    }

    /// Active with an expired lease, not yet reclaimed.
    pub fn is_orphaned(&self, now: DateTime<Utc>) -> bool {
        self.state == TaskState::Active && self.lease_expired(now)
    }

    /// When the retention sweep may delete this record.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        let finished_at = match self.state {
            TaskState::Completed => self.completed_at?,
            TaskState::Archived => self.archived_at?,
            _ => return None,
        };
        Some(shift(finished_at, self.retention))
    }
}

/// `at + d`, saturating at the largest representable time.
pub fn shift(at: DateTime<Utc>, d: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(d)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
