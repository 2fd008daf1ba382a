//! Status - web 層に渡す JSON 形
//!
//! `EnqueueRequest` / `EnqueueResponse` は enqueue API、`TaskStatusView` は
//! `GET /task/:id` 相当のレスポンス。

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{TaskId, TaskType};
use crate::queue::{TaskRecord, TaskState};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnqueueRequest {
    #[serde(rename = "type")]
    pub task_type: String,

    /// Encoded as JSON bytes before it reaches the store.
    #[serde(default)]
    pub payload: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub queue: Option<String>,

    /// Signed so a negative delay is rejected rather than clamped.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delay_ms: Option<i64>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_retry: Option<u32>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retention_secs: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnqueueResponse {
    pub id: TaskId,

    #[serde(rename = "type")]
    pub task_type: TaskType,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusView {
    pub id: TaskId,

    #[serde(rename = "type")]
    pub task_type: TaskType,

    /// Lossy UTF-8 rendering of the payload bytes.
    pub payload: String,
    pub queue: String,
    pub state: TaskState,
    pub max_retry: u32,
    pub retry_count: u32,

    /// Human form, e.g. `24h0m0s`.
    pub retention: String,

    pub last_failed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub is_orphaned: bool,
    pub next_process_at: DateTime<Utc>,
    pub deadline: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl TaskStatusView {
    pub fn from_record(record: &TaskRecord, now: DateTime<Utc>) -> Self {
        Self {
            id: record.id,
            task_type: record.task_type.clone(),
            payload: String::from_utf8_lossy(&record.payload).into_owned(),
            queue: record.queue.clone(),
            state: record.state,
            max_retry: record.max_retry,
            retry_count: record.retry_count,
            retention: format_duration(record.retention),
            last_failed_at: record.last_failed_at,
            last_error: record.last_error.clone(),
            is_orphaned: record.is_orphaned(now),
            next_process_at: record.process_at,
            deadline: record.deadline,
            completed_at: record.completed_at,
        }
    }
}

/// `1h2m3s` style. Sub-second values print as `ms`, `0s` for zero.
pub fn format_duration(d: Duration) -> String {
    if d.is_zero() {
        return "0s".to_string();
    }
    if d < Duration::from_secs(1) {
        return format!("{}ms", d.as_millis());
    }

    let total = d.as_secs();
    let (h, m, s) = (total / 3600, (total % 3600) / 60, total % 60);
    let millis = d.subsec_millis();
    let secs = if millis == 0 {
        format!("{s}s")
    } else {
        let frac = format!("{millis:03}");
        format!("{s}.{}s", frac.trim_end_matches('0'))
    };

    if h > 0 {
        format!("{h}h{m}m{secs}")
    } else if m > 0 {
        format!("{m}m{secs}")
    } else {
        secs
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::EnqueueOptions;
    use crate::queue::tests::{new_record, t0};
    use chrono::TimeDelta;
    use rstest::rstest;

    #[rstest]
    #[case(Duration::ZERO, "0s")]
    #[case(Duration::from_millis(250), "250ms")]
    #[case(Duration::from_secs(2), "2s")]
    #[case(Duration::from_millis(1500), "1.5s")]
    #[case(Duration::from_secs(90), "1m30s")]
    #[case(Duration::from_secs(24 * 3600), "24h0m0s")]
    #[case(Duration::from_secs(5 * 24 * 3600), "120h0m0s")]
    fn formats_like_go(#[case] d: Duration, #[case] expected: &str) {
        assert_eq!(format_duration(d), expected);
    }

    #[test]
    fn status_view_renders_record() {
        let mut record = new_record(
            "default",
            EnqueueOptions::new().process_in(TimeDelta::seconds(2)),
            t0(),
        );
        record.payload = br#"{"user_id":42}"#.to_vec();

        let view = TaskStatusView::from_record(&record, t0());
        assert_eq!(view.payload, r#"{"user_id":42}"#);
        assert_eq!(view.state, TaskState::Scheduled);
        assert_eq!(view.retention, "24h0m0s");
        assert_eq!(view.next_process_at, t0() + TimeDelta::seconds(2));
        assert!(!view.is_orphaned);

        let json = serde_json::to_value(&view).unwrap();
        assert_eq!(json["type"], "test");
        assert_eq!(json["state"], "scheduled");
    }

    #[test]
    fn enqueue_request_accepts_minimal_body() {
        let req: EnqueueRequest =
            serde_json::from_str(r#"{"type":"email:deliver","payload":{"user_id":42}}"#).unwrap();
        assert_eq!(req.task_type, "email:deliver");
        assert_eq!(req.queue, None);
        assert_eq!(req.payload["user_id"], 42);
    }
}
