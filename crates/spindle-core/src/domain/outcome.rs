//! Outcome model: what happened when an executor ran a task.
//!
//! Handlers report `Result<(), HandlerError>`; the executor folds that,
//! timeouts, panics and missing handlers into one `Outcome` so the retry
//! decision has a single input shape.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OutcomeKind {
    /// Handler returned Ok.
    Success,
    /// Recoverable failure; retried while retries remain.
    Failure,
    /// Retrying cannot change the result; archive immediately.
    Unrecoverable,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Outcome {
    pub kind: OutcomeKind,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

impl Outcome {
    pub fn success() -> Self {
        Self {
            kind: OutcomeKind::Success,
            reason: None,
        }
    }

    pub fn failure(reason: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Failure,
            reason: Some(reason.into()),
        }
    }

    pub fn unrecoverable(reason: impl Into<String>) -> Self {
        Self {
            kind: OutcomeKind::Unrecoverable,
            reason: Some(reason.into()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.kind == OutcomeKind::Success
    }

    pub fn reason_or_default(&self) -> String {
        self.reason.clone().unwrap_or_else(|| "unknown error".to_string())
    }
}
