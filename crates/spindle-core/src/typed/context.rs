use chrono::{DateTime, Utc};

use crate::domain::{TaskId, TaskType};
use crate::queue::TaskRecord;

/// What a handler knows about the attempt it is running.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskContext {
    pub task_id: TaskId,
    pub task_type: TaskType,
    pub queue: String,

    /// Failures recorded before this attempt.
    pub retry_count: u32,
    pub max_retry: u32,

    /// Lease expiry. The handler is aborted once this passes.
    pub deadline: DateTime<Utc>,
}

impl TaskContext {
    pub(crate) fn for_attempt(record: &TaskRecord, deadline: DateTime<Utc>) -> Self {
        Self {
            task_id: record.id,
            task_type: record.task_type.clone(),
            queue: record.queue.clone(),
            retry_count: record.retry_count,
            max_retry: record.max_retry,
            deadline,
        }
    }

    /// No further retry follows if this attempt fails.
    pub fn is_last_attempt(&self) -> bool {
        self.retry_count >= self.max_retry
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;
    use crate::queue::tests::{record_with_retries, t0};

    #[rstest]
    #[case::first_of_many(0, 3, false)]
    #[case::one_left(2, 3, false)]
    #[case::final_retry(3, 3, true)]
    #[case::no_retries(0, 0, true)]
    fn last_attempt_follows_retry_budget(
        #[case] retry_count: u32,
        #[case] max_retry: u32,
        #[case] expected: bool,
    ) {
        let record = record_with_retries(retry_count, max_retry);
        let ctx = TaskContext::for_attempt(&record, t0());

        assert_eq!(ctx.retry_count, retry_count);
        assert_eq!(ctx.is_last_attempt(), expected);
    }
}
