//! Durable queue store: the in-memory sets plus a JSON snapshot on disk.
//!
//! Every mutating primitive is applied to a staged copy of the sets, the
//! copy's snapshot is written, and only then does the copy become current.
//! A call that returned Ok survives a restart; a call that failed to persist
//! leaves neither the disk nor memory changed. The snapshot is written to a
//! sibling `.tmp` file and renamed over the old one.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use super::memory::{InMemoryQueueStore, Snapshot};
use super::{Claim, Mutation, Pagination, QueueStore, TaskRecord, TaskState};
use crate::domain::{TaskId, WorkerId};
use crate::error::{Result, SpindleError};
use crate::observability::QueueCounts;

#[derive(Debug)]
pub struct FileQueueStore {
    path: PathBuf,
    inner: InMemoryQueueStore,
}

impl FileQueueStore {
    /// Open the store at `path`, loading the snapshot if one exists.
    pub async fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let snapshot = match tokio::fs::read(&path).await {
            Ok(bytes) => serde_json::from_slice::<Snapshot>(&bytes).map_err(|e| {
                SpindleError::StoreUnavailable(format!(
                    "corrupt snapshot {}: {e}",
                    path.display()
                ))
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Snapshot::default(),
            Err(e) => return Err(e.into()),
        };

        tracing::info!(
            path = %path.display(),
            tasks = snapshot.entries.len(),
            "opened file queue store"
        );

        Ok(Self {
            path,
            inner: InMemoryQueueStore::from_snapshot(snapshot),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn persist(&self, snapshot: Snapshot) -> Result<()> {
        let bytes = serde_json::to_vec(&snapshot)
            .map_err(|e| SpindleError::StoreUnavailable(format!("encode snapshot: {e}")))?;

        let mut tmp = self.path.clone().into_os_string();
        tmp.push(".tmp");
        let tmp = PathBuf::from(tmp);

        tokio::fs::write(&tmp, &bytes).await?;
        tokio::fs::rename(&tmp, &self.path).await?;
        Ok(())
    }
}

#[async_trait]
impl QueueStore for FileQueueStore {
    async fn enqueue(&self, record: TaskRecord) -> Result<()> {
        self.inner
            .apply_durably(|s| s.enqueue(record), |_| true, |snap| self.persist(snap))
            .await
    }

    async fn move_task(
        &self,
        id: TaskId,
        from: TaskState,
        to: TaskState,
        now: DateTime<Utc>,
        mutate: Mutation,
    ) -> Result<TaskRecord> {
        self.inner
            .apply_durably(
                |s| s.move_task(id, from, to, now, mutate),
                |_| true,
                |snap| self.persist(snap),
            )
            .await
    }

    async fn peek_due(
        &self,
        state: TaskState,
        now: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<TaskId>> {
        self.inner.peek_due(state, now, limit).await
    }

    async fn claim_one(
        &self,
        queue: &str,
        worker: WorkerId,
        lease_duration: Duration,
        now: DateTime<Utc>,
    ) -> Result<Claim> {
        self.inner
            .apply_durably(
                |s| Ok(s.claim_one(queue, worker, lease_duration, now)),
                |claim| matches!(claim, Claim::Claimed(_)),
                |snap| self.persist(snap),
            )
            .await
    }

    async fn reclaim_expired_leases(&self, now: DateTime<Utc>) -> Result<Vec<TaskRecord>> {
        self.inner.reclaim_expired_leases(now).await
    }

    async fn get(&self, id: TaskId) -> Result<TaskRecord> {
        self.inner.get(id).await
    }

    async fn sweep_expired(&self, now: DateTime<Utc>) -> Result<usize> {
        self.inner
            .apply_durably(
                |s| Ok(s.sweep_expired(now)),
                |n| *n > 0,
                |snap| self.persist(snap),
            )
            .await
    }

    async fn list(
        &self,
        queue: &str,
        state: TaskState,
        page: Pagination,
    ) -> Result<Vec<TaskRecord>> {
        self.inner.list(queue, state, page).await
    }

    async fn delete(&self, id: TaskId) -> Result<TaskRecord> {
        self.inner
            .apply_durably(|s| s.delete(id), |_| true, |snap| self.persist(snap))
            .await
    }

    async fn counts(&self, queue: &str) -> Result<QueueCounts> {
        self.inner.counts(queue).await
    }

    async fn queues(&self) -> Result<Vec<String>> {
        self.inner.queues().await
    }

    async fn ping(&self) -> Result<()> {
        let parent = self
            .path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .unwrap_or(Path::new("."));
        tokio::fs::metadata(parent).await?;
        Ok(())
    }
}
