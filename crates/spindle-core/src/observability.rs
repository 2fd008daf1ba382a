use serde::{Deserialize, Serialize};

/// Per-state sizes of one queue.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueCounts {
    pub queue: String,
    pub pending: usize,
    pub scheduled: usize,
    pub active: usize,
    pub retry: usize,
    pub archived: usize,
    pub completed: usize,
}

impl QueueCounts {
    pub fn new(queue: impl Into<String>) -> Self {
        Self {
            queue: queue.into(),
            ..Default::default()
        }
    }

    pub fn total(&self) -> usize {
        self.pending + self.scheduled + self.active + self.retry + self.archived + self.completed
    }

    /// Tasks that have not reached a terminal state yet.
    pub fn in_flight(&self) -> usize {
        self.pending + self.scheduled + self.active + self.retry
    }
}
