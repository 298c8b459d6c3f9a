//! Batch job bookkeeping shared by the scheduler backends and the runner.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::types::DbId;

/// A claimed unit of work.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchJob {
    pub id: DbId,
    pub batch_id: DbId,
    pub payload: Value,
    /// Executions started so far, including the current one.
    pub attempts: i32,
}

/// Counters for one batch, returned after every state change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchProgress {
    pub batch_id: DbId,
    /// Correlation data supplied at creation (e.g. the audit id).
    pub metadata: Value,
    pub total: i64,
    /// Jobs that have finished at least one execution, successfully or not.
    pub executed: i64,
    pub succeeded: i64,
    /// Failed jobs still scheduled for another attempt.
    pub retrying: i64,
    pub dead: i64,
    /// Jobs claimed more than once, i.e. retried at least once.
    pub retried: i64,
}

impl BatchProgress {
    pub fn all_executed(&self) -> bool {
        self.executed >= self.total
    }

    pub fn all_succeeded(&self) -> bool {
        self.succeeded >= self.total
    }
}

/// The three batch callbacks. Each fires at most once per batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchCallback {
    /// Every job has executed at least once.
    Complete,
    /// Every job has succeeded.
    Success,
    /// A job exhausted its retries.
    Death,
}

impl BatchCallback {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Complete => "complete",
            Self::Success => "success",
            Self::Death => "death",
        }
    }
}

/// What happened to a job after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Will run again after the given delay.
    Retry(Duration),
    /// Retries exhausted; the job is dead-lettered.
    Dead,
}

/// Retry policy applied by the scheduler when a job fails.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_backoff: Duration,
    pub max_backoff: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(3600),
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    /// Decide the fate of a job that has just failed its `attempts`-th run.
    pub fn disposition(&self, attempts: i32) -> FailureDisposition {
        let retries_used = attempts.saturating_sub(1).max(0) as u32;
        if retries_used >= self.max_retries {
            FailureDisposition::Dead
        } else {
            FailureDisposition::Retry(self.backoff(retries_used))
        }
    }

    /// Delay before retry number `retry` (0-based), clamped to `max_backoff`.
    pub fn backoff(&self, retry: u32) -> Duration {
        let factor = self.multiplier.powi(retry.min(32) as i32);
        let ms = (self.base_backoff.as_millis() as f64 * factor) as u64;
        Duration::from_millis(ms).min(self.max_backoff)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            base_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(10),
            multiplier: 2.0,
        }
    }

    #[test]
    fn backoff_doubles_and_clamps() {
        let p = policy(10);
        let secs: Vec<u64> = (0..6).map(|r| p.backoff(r).as_secs()).collect();
        assert_eq!(secs, vec![1, 2, 4, 8, 10, 10]);
    }

    #[test]
    fn dead_after_max_retries() {
        let p = policy(2);
        assert_eq!(p.disposition(1), FailureDisposition::Retry(Duration::from_secs(1)));
        assert_eq!(p.disposition(2), FailureDisposition::Retry(Duration::from_secs(2)));
        assert_eq!(p.disposition(3), FailureDisposition::Dead);
    }

    #[test]
    fn zero_retries_dead_letters_immediately() {
        assert_eq!(policy(0).disposition(1), FailureDisposition::Dead);
    }

    #[test]
    fn progress_predicates() {
        let progress = BatchProgress {
            batch_id: 1,
            metadata: Value::Null,
            total: 3,
            executed: 3,
            succeeded: 2,
            retrying: 1,
            dead: 0,
            retried: 1,
        };
        assert!(progress.all_executed());
        assert!(!progress.all_succeeded());
    }
}
