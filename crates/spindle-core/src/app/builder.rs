//! EngineBuilder - エンジンの構築とワイヤリング
//!
//! # Fail-fast
//! - config は build() で検証する
//! - expect_tasks() で期待される task_type を登録しておくと、build() 時に
//!   「期待集合 ⊆ 登録済み集合」をチェックする
//! - store を開けなければ build() が失敗する (起動後の store エラーは各ループが
//!   ログを出してリトライする)

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;

use super::gc_loop::Janitor;
use super::inspector::Inspector;
use super::producer::Producer;
use super::queue_select::QueueSelector;
use super::scheduler::Scheduler;
use super::worker_loop::{Executor, WorkerPool};
use crate::config::{EngineConfig, StoreConfig};
use crate::domain::{Decider, DefaultDecider, TaskType};
use crate::error::SpindleError;
use crate::ports::{Clock, IdGenerator, SystemClock, UlidGenerator};
use crate::queue::{FileQueueStore, InMemoryQueueStore, QueueStore, RetryPolicy};
use crate::typed::{Handler, HandlerError, HandlerRegistry, Task, TaskContext, TaskHandler};

/// ```ignore
/// let engine = EngineBuilder::new(config)
///     .register::<DeliverEmail, _>(DeliverEmailHandler)?
///     .expect_tasks(&["email:deliver"])
///     .build()
///     .await?;
/// ```
pub struct EngineBuilder {
    config: EngineConfig,
    registry: HandlerRegistry,
    expected_tasks: Option<Vec<String>>,
    store: Option<Arc<dyn QueueStore>>,
    clock: Option<Arc<dyn Clock>>,
    decider: Option<Arc<dyn Decider>>,
}

#[derive(Debug, thiserror::Error)]
pub enum BuildError {
    #[error("Missing task types: {0:?}. These tasks were expected but not registered.")]
    MissingTaskTypes(Vec<String>),

    #[error(transparent)]
    Engine(#[from] SpindleError),
}

impl EngineBuilder {
    pub fn new(config: EngineConfig) -> Self {
        Self {
            config,
            registry: HandlerRegistry::new(),
            expected_tasks: None,
            store: None,
            clock: None,
            decider: None,
        }
    }

    pub fn register<T: Task, H: Handler<T> + 'static>(mut self, handler: H) -> Result<Self, SpindleError> {
        self.registry.register::<T, H>(handler)?;
        Ok(self)
    }

    pub fn register_fn<F, Fut>(mut self, task_type: impl Into<TaskType>, func: F) -> Result<Self, SpindleError>
    where
        F: Fn(TaskContext, Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), HandlerError>> + Send + 'static,
    {
        self.registry.register_fn(task_type, func)?;
        Ok(self)
    }

    pub fn register_handler(
        mut self,
        task_type: impl Into<TaskType>,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<Self, SpindleError> {
        self.registry.register_handler(task_type.into(), handler)?;
        Ok(self)
    }

    pub fn expect_tasks(mut self, task_types: &[&str]) -> Self {
        self.expected_tasks = Some(task_types.iter().map(|t| t.to_string()).collect());
        self
    }

    /// Use this store instead of opening the one named in the config.
    pub fn with_store(mut self, store: Arc<dyn QueueStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn with_decider(mut self, decider: Arc<dyn Decider>) -> Self {
        self.decider = Some(decider);
        self
    }

    pub async fn build(self) -> Result<Engine, BuildError> {
        self.config.validate()?;

        if let Some(expected_tasks) = &self.expected_tasks {
            let missing_tasks: Vec<String> = expected_tasks
                .iter()
                .filter(|t| !self.registry.contains(&TaskType::new(t.as_str())))
                .cloned()
                .collect();
            if !missing_tasks.is_empty() {
                return Err(BuildError::MissingTaskTypes(missing_tasks));
            }
        }

        let store: Arc<dyn QueueStore> = match self.store {
            Some(store) => store,
            None => match &self.config.store {
                StoreConfig::Memory => Arc::new(InMemoryQueueStore::new()),
                StoreConfig::File { path } => Arc::new(FileQueueStore::open(path).await?),
            },
        };
        store.ping().await?;

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let decider = self.decider.unwrap_or_else(|| {
            Arc::new(DefaultDecider::new(RetryPolicy::from(&self.config.retry)))
        });
        let ids: Arc<dyn IdGenerator> = Arc::new(UlidGenerator::new(Arc::clone(&clock)));

        tracing::info!(
            concurrency = self.config.concurrency,
            queues = ?self.config.queues,
            strict_priority = self.config.strict_priority,
            task_types = ?self.registry.registered_types(),
            "engine built"
        );

        Ok(Engine {
            store,
            clock,
            ids,
            decider,
            registry: Arc::new(self.registry),
            config: Arc::new(self.config),
        })
    }
}

/// Explicit engine context. Every component is built from it; nothing is
/// global. Cloning is cheap.
#[derive(Clone)]
pub struct Engine {
    pub(crate) store: Arc<dyn QueueStore>,
    pub(crate) clock: Arc<dyn Clock>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) decider: Arc<dyn Decider>,
    pub(crate) registry: Arc<HandlerRegistry>,
    pub(crate) config: Arc<EngineConfig>,
}

impl Engine {
    pub fn store(&self) -> &Arc<dyn QueueStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    pub fn producer(&self) -> Producer {
        Producer::new(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            Arc::clone(&self.ids),
        )
    }

    pub fn inspector(&self) -> Inspector {
        Inspector::new(Arc::clone(&self.store), Arc::clone(&self.clock))
    }

    pub fn scheduler(&self) -> Scheduler {
        Scheduler::new(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            Arc::clone(&self.decider),
            self.config.poll_interval(),
        )
    }

    pub fn janitor(&self) -> Janitor {
        Janitor::new(
            Arc::clone(&self.store),
            Arc::clone(&self.clock),
            self.config.janitor_interval(),
        )
    }

    pub fn queue_selector(&self) -> QueueSelector {
        QueueSelector::new(&self.config.queues, self.config.strict_priority)
    }

    /// A standalone executor with a fresh worker id, for driving
    /// claim-execute-commit steps by hand.
    pub fn executor(&self) -> Executor {
        Executor::new(
            self,
            self.ids.generate_worker_id(),
            Arc::new(self.queue_selector()),
        )
    }

    pub fn spawn_workers(&self, n: usize) -> WorkerPool {
        WorkerPool::spawn(self, n)
    }

    /// Start scheduler, janitor and `config.concurrency` executors.
    pub fn start(&self) -> EngineHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let scheduler = self.scheduler();
        let rx = shutdown_rx.clone();
        let scheduler = tokio::spawn(async move { scheduler.run(rx).await });

        let janitor = self.janitor();
        let janitor = tokio::spawn(async move { janitor.run(shutdown_rx).await });

        EngineHandle {
            shutdown_tx,
            background: vec![scheduler, janitor],
            pool: self.spawn_workers(self.config.concurrency),
        }
    }
}

/// Running engine. Dropping it without `shutdown` leaves the tasks running.
pub struct EngineHandle {
    shutdown_tx: watch::Sender<bool>,
    background: Vec<JoinHandle<()>>,
    pool: WorkerPool,
}

impl EngineHandle {
    /// Stop claiming, drain in-flight work, stop background loops.
    pub async fn shutdown(self) {
        self.pool.shutdown_and_join().await;
        let _ = self.shutdown_tx.send(true);
        for join in self.background {
            let _ = join.await;
        }
    }
}
