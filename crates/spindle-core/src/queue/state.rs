//! Task state machine for the queue.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The state-set a task currently belongs to.
///
/// State transitions:
/// - Scheduled -> Pending (delay elapsed, or run_now)
/// - Pending -> Active -> Completed
/// - Pending -> Active -> Retry -> Pending (loop while retries remain)
/// - Pending -> Active -> Archived (retries exhausted or unrecoverable)
/// - Active -> Pending (lease released without an attempt being charged)
/// - Pending | Scheduled | Retry -> Archived (cancel)
/// - Archived -> Pending (run_now on an archived task)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Eligible for claim now.
    Pending,

    /// Waiting for its first process_at.
    Scheduled,

    /// Claimed by a worker under a lease.
    Active,

    /// Waiting for a backoff delay after a failure.
    Retry,

    /// Failed permanently. Kept for inspection until retention elapses.
    Archived,

    /// Succeeded. Kept for inspection until retention elapses.
    Completed,
}

impl TaskState {
    pub const ALL: [TaskState; 6] = [
        TaskState::Pending,
        TaskState::Scheduled,
        TaskState::Active,
        TaskState::Retry,
        TaskState::Archived,
        TaskState::Completed,
    ];

    /// Is this a terminal state (only the retention sweep touches it)?
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskState::Completed | TaskState::Archived)
    }

    /// Does this set hold tasks waiting for their process_at?
    pub fn is_delayed(self) -> bool {
        matches!(self, TaskState::Scheduled | TaskState::Retry)
    }

    pub fn can_transition_to(self, to: TaskState) -> bool {
        use TaskState::*;
        matches!(
            (self, to),
            (Scheduled, Pending)
                | (Retry, Pending)
                | (Pending, Active)
                | (Active, Completed)
                | (Active, Retry)
                | (Active, Archived)
                | (Active, Pending)
                | (Pending, Archived)
                | (Scheduled, Archived)
                | (Retry, Archived)
                | (Archived, Pending)
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskState::Pending => "pending",
            TaskState::Scheduled => "scheduled",
            TaskState::Active => "active",
            TaskState::Retry => "retry",
            TaskState::Archived => "archived",
            TaskState::Completed => "completed",
        }
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
