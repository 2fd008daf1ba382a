//! Inspector - 読み取りクエリと管理操作
//!
//! 管理操作 (cancel / run_now / delete) は store の `move_task` / `delete`
//! 一回で完結する。worker や scheduler と競合した場合は負けた側が Conflict を
//! 受け取る。

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::status::TaskStatusView;
use crate::domain::{TaskId, TaskType};
use crate::error::{Result, SpindleError};
use crate::observability::QueueCounts;
use crate::ports::Clock;
use crate::queue::{Pagination, QueueStore, TaskInfo, TaskRecord, TaskState, mutation};

pub const CANCELED: &str = "canceled";

/// One row of a listing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskSummary {
    pub id: TaskId,
    pub task_type: TaskType,
    pub queue: String,
    pub state: TaskState,
    pub process_at: DateTime<Utc>,
    pub retry_count: u32,
    pub max_retry: u32,
    pub last_error: Option<String>,
}

impl From<&TaskRecord> for TaskSummary {
    fn from(record: &TaskRecord) -> Self {
        Self {
            id: record.id,
            task_type: record.task_type.clone(),
            queue: record.queue.clone(),
            state: record.state,
            process_at: record.process_at,
            retry_count: record.retry_count,
            max_retry: record.max_retry,
            last_error: record.last_error.clone(),
        }
    }
}

#[derive(Clone)]
pub struct Inspector {
    store: Arc<dyn QueueStore>,
    clock: Arc<dyn Clock>,
}

impl Inspector {
    pub fn new(store: Arc<dyn QueueStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Full record of `id`. A task that lives in another queue is NotFound.
    pub async fn get_task_info(&self, queue: &str, id: TaskId) -> Result<TaskInfo> {
        let record = self.store.get(id).await?;
        if record.queue != queue {
            return Err(SpindleError::NotFound(id));
        }
        Ok(record)
    }

    pub async fn list(
        &self,
        queue: &str,
        state: TaskState,
        page: Pagination,
    ) -> Result<Vec<TaskSummary>> {
        let records = self.store.list(queue, state, page).await?;
        Ok(records.iter().map(TaskSummary::from).collect())
    }

    pub fn pages(&self, queue: impl Into<String>, state: TaskState, size: usize) -> TaskPager {
        TaskPager {
            store: Arc::clone(&self.store),
            queue: queue.into(),
            state,
            size: size.max(1),
            page: 0,
            done: false,
        }
    }

    /// pending / scheduled / retry -> archived. Active and terminal tasks
    /// cannot be canceled.
    pub async fn cancel(&self, id: TaskId) -> Result<TaskInfo> {
        let record = self.store.get(id).await?;
        match record.state {
            TaskState::Pending | TaskState::Scheduled | TaskState::Retry => {}
            TaskState::Active => {
                return Err(SpindleError::Conflict(format!(
                    "task {id} is active and cannot be canceled"
                )));
            }
            state => {
                return Err(SpindleError::Conflict(format!(
                    "task {id} is already {state}"
                )));
            }
        }

        let now = self.clock.now();
        let archived = self
            .store
            .move_task(
                id,
                record.state,
                TaskState::Archived,
                now,
                mutation(move |r| {
                    r.mark_archived(CANCELED.to_string(), now);
                    Ok(())
                }),
            )
            .await?;
        tracing::info!(task_id = %id, from = %record.state, "canceled task");
        Ok(archived)
    }

    /// scheduled / retry / archived -> pending, due now.
    pub async fn run_now(&self, id: TaskId) -> Result<TaskInfo> {
        let record = self.store.get(id).await?;
        if !matches!(
            record.state,
            TaskState::Scheduled | TaskState::Retry | TaskState::Archived
        ) {
            return Err(SpindleError::Conflict(format!(
                "task {id} is {} and cannot be run now",
                record.state
            )));
        }

        let now = self.clock.now();
        let pending = self
            .store
            .move_task(
                id,
                record.state,
                TaskState::Pending,
                now,
                mutation(move |r| {
                    r.requeue(now);
                    r.archived_at = None;
                    Ok(())
                }),
            )
            .await?;
        tracing::info!(task_id = %id, from = %record.state, "forced task to pending");
        Ok(pending)
    }

    pub async fn delete(&self, id: TaskId) -> Result<TaskInfo> {
        let deleted = self.store.delete(id).await?;
        tracing::info!(task_id = %id, state = %deleted.state, "deleted task");
        Ok(deleted)
    }

    pub async fn counts(&self, queue: &str) -> Result<QueueCounts> {
        self.store.counts(queue).await
    }

    pub async fn queues(&self) -> Result<Vec<String>> {
        self.store.queues().await
    }

    pub async fn status(&self, id: TaskId) -> Result<TaskStatusView> {
        let record = self.store.get(id).await?;
        Ok(TaskStatusView::from_record(&record, self.clock.now()))
    }
}

/// Lazy pager over one (queue, state) set. `reset` starts over.
pub struct TaskPager {
    store: Arc<dyn QueueStore>,
    queue: String,
    state: TaskState,
    size: usize,
    page: usize,
    done: bool,
}

impl TaskPager {
    /// Next non-empty page, or None once the set is exhausted.
    pub async fn next_page(&mut self) -> Result<Option<Vec<TaskSummary>>> {
        if self.done {
            return Ok(None);
        }
        let records = self
            .store
            .list(&self.queue, self.state, Pagination::new(self.size, self.page))
            .await?;
        if records.len() < self.size {
            self.done = true;
        }
        if records.is_empty() {
            return Ok(None);
        }
        self.page += 1;
        Ok(Some(records.iter().map(TaskSummary::from).collect()))
    }

    pub fn reset(&mut self) {
        self.page = 0;
        self.done = false;
    }
}
