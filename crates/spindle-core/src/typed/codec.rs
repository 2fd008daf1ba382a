//! PayloadCodec - Task と payload bytes の相互変換 (JSON)

use super::task::Task;
use crate::error::SpindleError;

#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    #[error("encode {task_type}: {message}")]
    Encode {
        task_type: &'static str,
        message: String,
    },

    #[error("decode {task_type}: {message}")]
    Decode {
        task_type: &'static str,
        message: String,
    },
}

impl From<CodecError> for SpindleError {
    fn from(err: CodecError) -> Self {
        SpindleError::Validation(err.to_string())
    }
}

pub struct PayloadCodec;

impl PayloadCodec {
    pub fn encode<T: Task>(task: &T) -> Result<Vec<u8>, CodecError> {
        serde_json::to_vec(task).map_err(|e| CodecError::Encode {
            task_type: T::TYPE,
            message: e.to_string(),
        })
    }

    pub fn decode<T: Task>(payload: &[u8]) -> Result<T, CodecError> {
        serde_json::from_slice(payload).map_err(|e| CodecError::Decode {
            task_type: T::TYPE,
            message: e.to_string(),
        })
    }
}
