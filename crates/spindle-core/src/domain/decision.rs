//! Decision model: where a task goes after an attempt ends.
//!
//! The Decider is a pure function of the record and the outcome. Applying
//! the decision (the store `move`) is the caller's job.

use std::time::Duration;

use super::Outcome;
use crate::queue::{RetryPolicy, TaskRecord};

#[derive(Debug, Clone, PartialEq)]
pub enum Decision {
    /// active -> completed
    Complete,

    /// active -> retry, with `retry_count + 1`.
    Retry { delay: Duration, error: String },

    /// active -> archived (retries exhausted or unrecoverable).
    Archive { error: String },
}

pub trait Decider: Send + Sync {
    fn decide(&self, task: &TaskRecord, outcome: &Outcome) -> Decision;
}

/// Retry-count based decider with exponential backoff.
///
/// - Success completes.
/// - Unrecoverable archives regardless of remaining retries.
/// - Failure retries while `retry_count < max_retry`, then archives.
#[derive(Debug, Clone)]
pub struct DefaultDecider {
    retry_policy: RetryPolicy,
}

impl DefaultDecider {
    pub fn new(retry_policy: RetryPolicy) -> Self {
        Self { retry_policy }
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }
}

impl Decider for DefaultDecider {
    fn decide(&self, task: &TaskRecord, outcome: &Outcome) -> Decision {
        use super::OutcomeKind;

        match outcome.kind {
            OutcomeKind::Success => Decision::Complete,
            OutcomeKind::Unrecoverable => Decision::Archive {
                error: outcome.reason_or_default(),
            },
            OutcomeKind::Failure if task.retry_count >= task.max_retry => Decision::Archive {
                error: outcome.reason_or_default(),
            },
            OutcomeKind::Failure => Decision::Retry {
                delay: self.retry_policy.delay_with_jitter(task.retry_count),
                error: outcome.reason_or_default(),
            },
        }
    }
}
