//! Enqueue options and their validation.
//!
//! Options are resolved against "now" into concrete scheduling metadata
//! before the Producer touches the store. Every rejection happens here.

use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};

use super::TaskId;
use crate::config::{DEFAULT_MAX_RETRY, DEFAULT_QUEUE, DEFAULT_RETENTION};
use crate::error::{Result, SpindleError};

/// Scheduling options accepted by `Producer::enqueue`.
///
/// ```ignore
/// let opts = EnqueueOptions::new()
///     .queue("critical")
///     .process_in(TimeDelta::seconds(2))
///     .max_retry(3);
/// ```
#[derive(Debug, Clone, Default, PartialEq)]
pub struct EnqueueOptions {
    pub task_id: Option<TaskId>,
    pub queue: Option<String>,
    /// Signed so that a negative delay can be reported instead of clamped.
    pub process_in: Option<TimeDelta>,
    pub process_at: Option<DateTime<Utc>>,
    pub max_retry: Option<u32>,
    pub retention: Option<Duration>,
    pub deadline: Option<DateTime<Utc>>,
    pub timeout: Option<Duration>,
}

impl EnqueueOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn task_id(mut self, id: TaskId) -> Self {
        self.task_id = Some(id);
        self
    }

    pub fn queue(mut self, queue: impl Into<String>) -> Self {
        self.queue = Some(queue.into());
        self
    }

    pub fn process_in(mut self, delay: TimeDelta) -> Self {
        self.process_in = Some(delay);
        self
    }

    pub fn process_at(mut self, at: DateTime<Utc>) -> Self {
        self.process_at = Some(at);
        self
    }

    pub fn max_retry(mut self, n: u32) -> Self {
        self.max_retry = Some(n);
        self
    }

    pub fn retention(mut self, retention: Duration) -> Self {
        self.retention = Some(retention);
        self
    }

    pub fn deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Validate and fill defaults.
    pub fn resolve(&self, now: DateTime<Utc>) -> Result<ResolvedOptions> {
        let queue = self.queue.as_deref().unwrap_or(DEFAULT_QUEUE);
        validate_queue_name(queue)?;

        let process_at = match (self.process_in, self.process_at) {
            (Some(_), Some(_)) => {
                return Err(SpindleError::Validation(
                    "process_in and process_at are mutually exclusive".to_string(),
                ));
            }
            (Some(delay), None) if delay < TimeDelta::zero() => {
                return Err(SpindleError::Validation(format!(
                    "delay must not be negative: {delay}"
                )));
            }
            (Some(delay), None) => now
                .checked_add_signed(delay)
                .ok_or_else(|| SpindleError::Validation(format!("delay out of range: {delay}")))?,
            // A past process_at simply means "now".
            (None, Some(at)) => at.max(now),
            (None, None) => now,
        };

        if let Some(deadline) = self.deadline
            && deadline <= now
        {
            return Err(SpindleError::Validation(format!(
                "deadline must be in the future: {deadline}"
            )));
        }

        if self.timeout == Some(Duration::ZERO) {
            return Err(SpindleError::Validation(
                "timeout must be greater than zero".to_string(),
            ));
        }

        Ok(ResolvedOptions {
            task_id: self.task_id,
            queue: queue.to_string(),
            process_at,
            max_retry: self.max_retry.unwrap_or(DEFAULT_MAX_RETRY),
            retention: self.retention.unwrap_or(DEFAULT_RETENTION),
            deadline: self.deadline,
            timeout: self.timeout,
        })
    }
}

/// Options after validation, with defaults applied.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedOptions {
    pub task_id: Option<TaskId>,
    pub queue: String,
    pub process_at: DateTime<Utc>,
    pub max_retry: u32,
    pub retention: Duration,
    pub deadline: Option<DateTime<Utc>>,
    pub timeout: Option<Duration>,
}

pub fn validate_queue_name(queue: &str) -> Result<()> {
    if queue.trim().is_empty() {
        return Err(SpindleError::Validation(
            "queue name must not be empty".to_string(),
        ));
    }
    if queue.trim() != queue {
        return Err(SpindleError::Validation(format!(
            "queue name must not have surrounding whitespace: {queue:?}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rstest::rstest;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()
    }

    #[test]
    fn defaults_are_applied() {
        let resolved = EnqueueOptions::new().resolve(now()).unwrap();

        assert_eq!(resolved.queue, "default");
        assert_eq!(resolved.process_at, now());
        assert_eq!(resolved.max_retry, 25);
        assert_eq!(resolved.retention, Duration::from_secs(24 * 60 * 60));
        assert_eq!(resolved.deadline, None);
    }

    #[test]
    fn process_in_shifts_process_at() {
        let resolved = EnqueueOptions::new()
            .process_in(TimeDelta::seconds(2))
            .resolve(now())
            .unwrap();
        assert_eq!(resolved.process_at, now() + TimeDelta::seconds(2));
    }

    #[test]
    fn past_process_at_means_now() {
        let resolved = EnqueueOptions::new()
            .process_at(now() - TimeDelta::hours(1))
            .resolve(now())
            .unwrap();
        assert_eq!(resolved.process_at, now());
    }

    #[rstest]
    #[case::negative_delay(EnqueueOptions::new().process_in(TimeDelta::seconds(-1)))]
    #[case::both_delays(
        EnqueueOptions::new().process_in(TimeDelta::seconds(1)).process_at(now())
    )]
    #[case::empty_queue(EnqueueOptions::new().queue(""))]
    #[case::blank_queue(EnqueueOptions::new().queue("   "))]
    #[case::past_deadline(EnqueueOptions::new().deadline(now()))]
    #[case::zero_timeout(EnqueueOptions::new().timeout(Duration::ZERO))]
    fn invalid_options_are_rejected(#[case] opts: EnqueueOptions) {
        let err = opts.resolve(now()).unwrap_err();
        assert!(matches!(err, SpindleError::Validation(_)), "{err}");
    }
}
