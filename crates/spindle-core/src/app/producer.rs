//! Producer - タスクの投入
//!
//! 検証はすべて store に触る前に行う。失敗した enqueue は何も残さない。

use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;

use super::status::{EnqueueRequest, EnqueueResponse};
use crate::domain::{EnqueueOptions, TaskType};
use crate::error::{Result, SpindleError};
use crate::ports::{Clock, IdGenerator};
use crate::queue::{QueueStore, TaskInfo, TaskRecord};
use crate::typed::{PayloadCodec, Task};

#[derive(Clone)]
pub struct Producer {
    store: Arc<dyn QueueStore>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl Producer {
    pub fn new(
        store: Arc<dyn QueueStore>,
        clock: Arc<dyn Clock>,
        ids: Arc<dyn IdGenerator>,
    ) -> Self {
        Self { store, clock, ids }
    }

    pub async fn enqueue(
        &self,
        task_type: impl Into<TaskType>,
        payload: impl Into<Vec<u8>>,
        options: EnqueueOptions,
    ) -> Result<TaskInfo> {
        let task_type = task_type.into();
        task_type.validate().map_err(SpindleError::Validation)?;

        let now = self.clock.now();
        let resolved = options.resolve(now)?;
        let id = resolved
            .task_id
            .unwrap_or_else(|| self.ids.generate_task_id());

        let record = TaskRecord::new(id, task_type, payload.into(), resolved, now);
        self.store.enqueue(record.clone()).await?;

        tracing::info!(
            task_id = %record.id,
            task_type = %record.task_type,
            queue = %record.queue,
            state = %record.state,
            process_at = %record.process_at,
            "enqueued task"
        );
        Ok(record)
    }

    /// Typed enqueue: the payload is `task` encoded as JSON.
    pub async fn enqueue_task<T: Task>(&self, task: &T, options: EnqueueOptions) -> Result<TaskInfo> {
        let payload = PayloadCodec::encode(task)?;
        self.enqueue(T::task_type(), payload, options).await
    }

    /// Enqueue from the web-layer request shape.
    pub async fn submit(&self, request: EnqueueRequest) -> Result<EnqueueResponse> {
        let payload = serde_json::to_vec(&request.payload)
            .map_err(|e| SpindleError::Validation(format!("payload: {e}")))?;

        let mut options = EnqueueOptions::new();
        if let Some(queue) = request.queue {
            options = options.queue(queue);
        }
        if let Some(ms) = request.delay_ms {
            let delay = TimeDelta::try_milliseconds(ms)
                .ok_or_else(|| SpindleError::Validation(format!("delay_ms out of range: {ms}")))?;
            options = options.process_in(delay);
        }
        if let Some(n) = request.max_retry {
            options = options.max_retry(n);
        }
        if let Some(secs) = request.retention_secs {
            options = options.retention(Duration::from_secs(secs));
        }

        let info = self.enqueue(request.task_type, payload, options).await?;
        Ok(EnqueueResponse {
            id: info.id,
            task_type: info.task_type,
        })
    }
}
