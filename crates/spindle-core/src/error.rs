use thiserror::Error;

use crate::domain::{TaskId, TaskType};
use crate::queue::TaskState;

pub type Result<T> = std::result::Result<T, SpindleError>;

/// Operational classification of an engine error.
///
/// Callers branch on this rather than on individual variants:
/// - Validation: rejected before any mutation, fix the input.
/// - NotFound: unknown identity.
/// - Conflict: a state precondition did not hold (lost race, wrong state).
/// - Infrastructure: the store could not be reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    NotFound,
    Conflict,
    Infrastructure,
}

#[derive(Debug, Error)]
pub enum SpindleError {
    #[error("invalid options: {0}")]
    Validation(String),

    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("task id already exists: {0}")]
    DuplicateId(TaskId),

    #[error("task {id} is not in state {expected}")]
    NotFoundInState { id: TaskId, expected: TaskState },

    #[error("invalid transition {from} -> {to} for task {id}")]
    InvalidTransition {
        id: TaskId,
        from: TaskState,
        to: TaskState,
    },

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("duplicate handler for task_type={0}")]
    DuplicateHandler(TaskType),

    #[error("invalid config: {0}")]
    Config(String),
}

impl SpindleError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SpindleError::Validation(_)
            | SpindleError::Config(_)
            | SpindleError::DuplicateHandler(_) => ErrorKind::Validation,
            SpindleError::NotFound(_) => ErrorKind::NotFound,
            SpindleError::DuplicateId(_)
            | SpindleError::NotFoundInState { .. }
            | SpindleError::InvalidTransition { .. }
            | SpindleError::Conflict(_) => ErrorKind::Conflict,
            SpindleError::StoreUnavailable(_) => ErrorKind::Infrastructure,
        }
    }

    /// Lost a race against another mover. Loops treat this as a no-op.
    pub fn is_lost_race(&self) -> bool {
        matches!(self, SpindleError::NotFoundInState { .. })
    }

    pub fn is_conflict(&self) -> bool {
        self.kind() == ErrorKind::Conflict
    }
}

impl From<std::io::Error> for SpindleError {
    fn from(err: std::io::Error) -> Self {
        SpindleError::StoreUnavailable(err.to_string())
    }
}
