use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{LazyLock, Mutex};
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Failure,
}

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct QueueMetricsSnapshot {
    pub total_success: u64,
    pub total_failure: u64,
    pub consecutive_failure: u64,
    pub total_passes: u64,
    pub last_success_ms: Option<u64>,
    pub last_failure_ms: Option<u64>,
    pub last_outcome: Option<AttemptOutcome>,
    pub last_mutation_id: Option<String>,
    pub last_table: Option<String>,
    pub last_attempts: Option<u32>,
    pub last_max_retries: Option<u32>,
    pub last_backoff_ms: Option<u64>,
    pub last_duration_ms: Option<u64>,
    pub last_error: Option<String>,
}

/// Details of a single remote attempt.
#[derive(Debug, Clone, Default, Serialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct AttemptMetadata {
    pub mutation_id: Option<String>,
    pub table: Option<String>,
    pub attempts: Option<u32>,
    pub max_retries: Option<u32>,
    pub backoff_ms: Option<u64>,
    pub duration_ms: Option<u64>,
    pub error: Option<String>,
}

#[derive(Default, Clone)]
struct LastAttempt {
    outcome: Option<AttemptOutcome>,
    metadata: AttemptMetadata,
}

struct QueueMetrics {
    success: AtomicU64,
    failure: AtomicU64,
    consecutive_failure: AtomicU64,
    passes: AtomicU64,
    last_success_ms: AtomicU64,
    last_failure_ms: AtomicU64,
    last: Mutex<LastAttempt>,
}

impl QueueMetrics {
    fn new() -> Self {
        Self {
            success: AtomicU64::new(0),
            failure: AtomicU64::new(0),
            consecutive_failure: AtomicU64::new(0),
            passes: AtomicU64::new(0),
            last_success_ms: AtomicU64::new(0),
            last_failure_ms: AtomicU64::new(0),
            last: Mutex::new(LastAttempt::default()),
        }
    }

    fn record(&self, outcome: AttemptOutcome, meta: &AttemptMetadata) {
        match outcome {
            AttemptOutcome::Success => {
                self.success.fetch_add(1, Ordering::Relaxed);
                self.last_success_ms
                    .store(current_unix_ms(), Ordering::Relaxed);
                self.consecutive_failure.store(0, Ordering::Relaxed);
            }
            AttemptOutcome::Failure => {
                self.failure.fetch_add(1, Ordering::Relaxed);
                self.last_failure_ms
                    .store(current_unix_ms(), Ordering::Relaxed);
                self.consecutive_failure.fetch_add(1, Ordering::Relaxed);
            }
        }

        if let Ok(mut guard) = self.last.lock() {
            guard.outcome = Some(outcome);
            guard.metadata = meta.clone();
        }
    }

    fn snapshot(&self) -> QueueMetricsSnapshot {
        let last = self
            .last
            .lock()
            .map(|guard| guard.clone())
            .unwrap_or_default();

        QueueMetricsSnapshot {
            total_success: self.success.load(Ordering::Relaxed),
            total_failure: self.failure.load(Ordering::Relaxed),
            consecutive_failure: self.consecutive_failure.load(Ordering::Relaxed),
            total_passes: self.passes.load(Ordering::Relaxed),
            last_success_ms: to_option(self.last_success_ms.load(Ordering::Relaxed)),
            last_failure_ms: to_option(self.last_failure_ms.load(Ordering::Relaxed)),
            last_outcome: last.outcome,
            last_mutation_id: last.metadata.mutation_id,
            last_table: last.metadata.table,
            last_attempts: last.metadata.attempts,
            last_max_retries: last.metadata.max_retries,
            last_backoff_ms: last.metadata.backoff_ms,
            last_duration_ms: last.metadata.duration_ms,
            last_error: last.metadata.error,
        }
    }
}

fn to_option(value: u64) -> Option<u64> {
    if value == 0 { None } else { Some(value) }
}

fn current_unix_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|duration| duration.as_millis() as u64)
        .unwrap_or(0)
}

static QUEUE_METRICS: LazyLock<QueueMetrics> = LazyLock::new(QueueMetrics::new);

pub fn record_attempt(outcome: AttemptOutcome, metadata: &AttemptMetadata) -> QueueMetricsSnapshot {
    QUEUE_METRICS.record(outcome, metadata);
    QUEUE_METRICS.snapshot()
}

pub fn record_pass() {
    QUEUE_METRICS.passes.fetch_add(1, Ordering::Relaxed);
}

pub fn snapshot() -> QueueMetricsSnapshot {
    QUEUE_METRICS.snapshot()
}

#[cfg(test)]
mod tests {
    use super::{AttemptMetadata, AttemptOutcome, record_attempt};

    // 他テストと共有するグローバルのため差分で検証する
    #[test]
    fn record_success_and_failure() {
        let before = super::snapshot();

        let meta = AttemptMetadata {
            mutation_id: Some("m-1".into()),
            table: Some("clients".into()),
            attempts: Some(1),
            max_retries: Some(3),
            duration_ms: Some(40),
            ..AttemptMetadata::default()
        };
        let after_success = record_attempt(AttemptOutcome::Success, &meta);
        assert!(after_success.total_success > before.total_success);
        assert_eq!(after_success.consecutive_failure, 0);
        assert!(after_success.last_success_ms.is_some());

        let failure = AttemptMetadata {
            mutation_id: Some("m-2".into()),
            backoff_ms: Some(2_000),
            error: Some("503".into()),
            ..AttemptMetadata::default()
        };
        let after_failure = record_attempt(AttemptOutcome::Failure, &failure);
        assert!(after_failure.total_failure > before.total_failure);
        assert!(after_failure.consecutive_failure >= 1);
        assert!(after_failure.last_failure_ms.is_some());
    }
}
