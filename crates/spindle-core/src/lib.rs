//! spindle-core
//!
//! Durable, delay-capable task queue engine.
//!
//! # モジュール構成
//! - **domain**: ドメインモデル（ids, task_type, options, outcome, decision）
//! - **queue**: QueueStore port、状態遷移、retry policy、in-memory / file backend
//! - **ports**: Clock, IdGenerator
//! - **typed**: handler 登録と型付き Task API（Task, Handler<T>, HandlerRegistry）
//! - **app**: EngineBuilder, Producer, Scheduler, Janitor, WorkerPool, Inspector
//! - **config** / **error** / **observability**

pub mod app;
pub mod config;
pub mod domain;
pub mod error;
pub mod observability;
pub mod ports;
pub mod queue;
pub mod typed;

pub use app::{Engine, EngineBuilder, EngineHandle, Inspector, Producer};
pub use config::EngineConfig;
pub use domain::{EnqueueOptions, TaskId, TaskType};
pub use error::{ErrorKind, Result, SpindleError};
pub use queue::{QueueStore, TaskInfo, TaskState};
pub use typed::{Handler, HandlerError, Task, TaskContext};
