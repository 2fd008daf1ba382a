//! HandlerRegistry - task_type から handler への対応表
//!
//! 型付き handler は `TypedHandler` で包んでから `Arc<dyn TaskHandler>` として
//! 格納する。同じ task_type の二重登録はエラー。

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;

use super::handler::{Handler, HandlerFn, TaskHandler, TypedHandler};
use super::task::Task;
use super::{HandlerError, TaskContext};
use crate::domain::TaskType;
use crate::error::{Result, SpindleError};

#[derive(Default, Clone)]
pub struct HandlerRegistry {
    handlers: HashMap<TaskType, Arc<dyn TaskHandler>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("task_types", &self.registered_types())
            .finish()
    }
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: Task, H: Handler<T> + 'static>(&mut self, handler: H) -> Result<()> {
        self.register_handler(T::task_type(), Arc::new(TypedHandler::new(handler)))
    }

    pub fn register_handler(
        &mut self,
        task_type: TaskType,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<()> {
        task_type.validate().map_err(SpindleError::Validation)?;
        if self.handlers.contains_key(&task_type) {
            return Err(SpindleError::DuplicateHandler(task_type));
        }
        self.handlers.insert(task_type, handler);
        Ok(())
    }

    /// Register an async closure over raw payload bytes.
    pub fn register_fn<F, Fut>(&mut self, task_type: impl Into<TaskType>, func: F) -> Result<()>
    where
        F: Fn(TaskContext, Vec<u8>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = std::result::Result<(), HandlerError>> + Send + 'static,
    {
        self.register_handler(task_type.into(), Arc::new(HandlerFn::new(func)))
    }

    pub fn get(&self, task_type: &TaskType) -> Option<Arc<dyn TaskHandler>> {
        self.handlers.get(task_type).cloned()
    }

    pub fn contains(&self, task_type: &TaskType) -> bool {
        self.handlers.contains_key(task_type)
    }

    /// Sorted, for stable output.
    pub fn registered_types(&self) -> Vec<TaskType> {
        let mut types: Vec<TaskType> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }
}
