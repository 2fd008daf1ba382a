//! Handler traits - Task を実行する Handler の定義
//!
//! - `TaskHandler`: object-safe。payload bytes を受け取る。registry に格納される形。
//! - `Handler<T>`: 型付き。`TypedHandler` が JSON decode して橋渡しする。
//! - `HandlerFn`: async closure を `TaskHandler` にするアダプタ。

use std::future::Future;
use std::marker::PhantomData;

use async_trait::async_trait;

use super::codec::PayloadCodec;
use super::context::TaskContext;
use super::task::Task;
use crate::domain::Outcome;

/// Handler failure. Never surfaces to producers; the worker turns it into
/// a retry or an archive.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum HandlerError {
    /// Retried while retries remain.
    #[error("{0}")]
    Failed(String),

    /// Archived immediately; retrying cannot help.
    #[error("skip retry: {0}")]
    SkipRetry(String),
}

impl HandlerError {
    pub fn failed(message: impl Into<String>) -> Self {
        HandlerError::Failed(message.into())
    }

    pub fn skip_retry(message: impl Into<String>) -> Self {
        HandlerError::SkipRetry(message.into())
    }
}

impl From<Result<(), HandlerError>> for Outcome {
    fn from(result: Result<(), HandlerError>) -> Self {
        match result {
            Ok(()) => Outcome::success(),
            Err(HandlerError::Failed(msg)) => Outcome::failure(msg),
            Err(HandlerError::SkipRetry(msg)) => Outcome::unrecoverable(msg),
        }
    }
}

#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, ctx: TaskContext, payload: &[u8]) -> Result<(), HandlerError>;
}

/// 型付き handler。`Handler<Deliver>` は `Deliver` しか受け取れない。
///
/// ```ignore
/// struct DeliverHandler;
///
/// #[async_trait]
/// impl Handler<Deliver> for DeliverHandler {
///     async fn handle(&self, ctx: TaskContext, task: Deliver) -> Result<(), HandlerError> {
///         send(task.user_id, &task.template_id).await.map_err(HandlerError::failed)
///     }
/// }
/// ```
#[async_trait]
pub trait Handler<T: Task>: Send + Sync {
    async fn handle(&self, ctx: TaskContext, task: T) -> Result<(), HandlerError>;
}

/// `Handler<T>` を `TaskHandler` に型消去するラッパー
pub struct TypedHandler<T: Task, H: Handler<T>> {
    handler: H,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Task, H: Handler<T>> TypedHandler<T, H> {
    pub fn new(handler: H) -> Self {
        Self {
            handler,
            _marker: PhantomData,
        }
    }
}

#[async_trait]
impl<T: Task, H: Handler<T>> TaskHandler for TypedHandler<T, H> {
    async fn handle(&self, ctx: TaskContext, payload: &[u8]) -> Result<(), HandlerError> {
        // 壊れた payload は何度やっても decode できない
        let task: T = PayloadCodec::decode(payload)
            .map_err(|e| HandlerError::SkipRetry(e.to_string()))?;
        self.handler.handle(ctx, task).await
    }
}

/// Async closure adapter.
pub struct HandlerFn<F> {
    func: F,
}

impl<F> HandlerFn<F> {
    pub fn new(func: F) -> Self {
        Self { func }
    }
}

#[async_trait]
impl<F, Fut> TaskHandler for HandlerFn<F>
where
    F: Fn(TaskContext, Vec<u8>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), HandlerError>> + Send,
{
    async fn handle(&self, ctx: TaskContext, payload: &[u8]) -> Result<(), HandlerError> {
        (self.func)(ctx, payload.to_vec()).await
    }
}

#[cfg(test)]
mod tests {
    use chrono::{TimeZone, Utc};
    use serde::{Deserialize, Serialize};
    use ulid::Ulid;

    use super::*;
    use crate::domain::{OutcomeKind, TaskId, TaskType};

    #[derive(Debug, Serialize, Deserialize)]
    struct Add {
        a: i32,
        b: i32,
    }

    impl Task for Add {
        const TYPE: &'static str = "math:add";
    }

    struct AddHandler;

    #[async_trait]
    impl Handler<Add> for AddHandler {
        async fn handle(&self, _ctx: TaskContext, task: Add) -> Result<(), HandlerError> {
            if task.a + task.b < 0 {
                return Err(HandlerError::failed("negative sum"));
            }
            Ok(())
        }
    }

    fn ctx() -> TaskContext {
        TaskContext {
            task_id: TaskId::from_ulid(Ulid::new()),
            task_type: TaskType::new(Add::TYPE),
            queue: "default".into(),
            retry_count: 0,
            max_retry: 3,
            deadline: Utc.with_ymd_and_hms(2024, 1, 1, 12, 30, 0).unwrap(),
        }
    }

    #[tokio::test]
    async fn typed_handler_decodes_payload() {
        let handler = TypedHandler::<Add, _>::new(AddHandler);

        assert_eq!(handler.handle(ctx(), br#"{"a":1,"b":2}"#).await, Ok(()));
        assert_eq!(
            handler.handle(ctx(), br#"{"a":-5,"b":2}"#).await,
            Err(HandlerError::failed("negative sum"))
        );
    }

    #[tokio::test]
    async fn undecodable_payload_skips_retry() {
        let handler = TypedHandler::<Add, _>::new(AddHandler);

        let err = handler.handle(ctx(), b"not json").await.unwrap_err();
        assert!(matches!(err, HandlerError::SkipRetry(_)));
    }

    #[tokio::test]
    async fn handler_fn_sees_context_and_payload() {
        let handler = HandlerFn::new(|ctx: TaskContext, payload: Vec<u8>| async move {
            assert_eq!(ctx.queue, "default");
            if payload.is_empty() {
                Err(HandlerError::skip_retry("empty"))
            } else {
                Ok(())
            }
        });

        assert!(handler.handle(ctx(), b"x").await.is_ok());
        assert!(handler.handle(ctx(), b"").await.is_err());
    }

    #[test]
    fn handler_results_fold_into_outcomes() {
        assert!(Outcome::from(Ok(())).is_success());
        assert_eq!(
            Outcome::from(Err(HandlerError::failed("x"))).kind,
            OutcomeKind::Failure
        );
        assert_eq!(
            Outcome::from(Err(HandlerError::skip_retry("x"))).kind,
            OutcomeKind::Unrecoverable
        );
    }
}
