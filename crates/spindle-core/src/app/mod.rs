//! App - アプリケーション層
//!
//! store / clock / registry を組み合わせてエンジンの各コンポーネントを実装する。
//!
//! # 主要コンポーネント
//! - **EngineBuilder / Engine**: 構築とワイヤリング (明示的なコンテキスト)
//! - **Producer**: タスク投入
//! - **Scheduler**: 遅延タスクの昇格と lease 回収
//! - **Janitor**: retention 切れレコードの削除
//! - **WorkerPool / Executor**: claim → handle → decide → commit
//! - **Inspector**: 参照と管理操作

pub mod builder;
pub mod gc_loop;
pub mod inspector;
pub mod producer;
pub mod queue_select;
pub mod scheduler;
pub mod status;
pub mod worker_loop;

pub use self::builder::{BuildError, Engine, EngineBuilder, EngineHandle};
pub use self::gc_loop::Janitor;
pub use self::inspector::{Inspector, TaskPager, TaskSummary};
pub use self::producer::Producer;
pub use self::queue_select::QueueSelector;
pub use self::scheduler::{Scheduler, SweepReport};
pub use self::status::{EnqueueRequest, EnqueueResponse, TaskStatusView};
pub use self::worker_loop::{Executor, Step, WorkerPool};

use std::time::Duration;

use tokio::sync::watch;

use crate::queue::RetryPolicy;

/// Longest a background loop waits after repeated store errors.
const MAX_LOOP_BACKOFF: Duration = Duration::from_secs(60);

/// Error backoff for background loops: doubles from `interval`.
pub(crate) fn loop_backoff(interval: Duration) -> RetryPolicy {
    RetryPolicy {
        base_delay: interval,
        multiplier: 2.0,
        max_delay: interval.max(MAX_LOOP_BACKOFF),
        jitter: Duration::ZERO,
    }
}

/// Sleep for `wait`, returning early with `true` once shutdown is signalled
/// (or the sender is gone).
pub(crate) async fn sleep_or_shutdown(wait: Duration, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return true;
    }
    tokio::select! {
        _ = tokio::time::sleep(wait) => *shutdown.borrow(),
        changed = shutdown.changed() => changed.is_err() || *shutdown.borrow(),
    }
}
