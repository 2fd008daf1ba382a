//! TaskType - the string tag that selects a handler.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Task type tag, e.g. `email:deliver`.
///
/// Construction does not validate; the Producer rejects empty or
/// whitespace-padded types before anything is stored (see `validate`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskType(String);

impl TaskType {
    pub fn new(value: impl Into<String>) -> Self {
        Self(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns a reason when the tag cannot be used for dispatch.
    pub fn validate(&self) -> Result<(), String> {
        if self.0.is_empty() {
            return Err("task type must not be empty".to_string());
        }
        if self.0.trim() != self.0 {
            return Err(format!(
                "task type must not have surrounding whitespace: {:?}",
                self.0
            ));
        }
        Ok(())
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskType {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for TaskType {
    fn from(value: String) -> Self {
        Self(value)
    }
}
