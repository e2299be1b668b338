use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Bounds on how many terminal entries the queue keeps around for stats.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    pub completed_max_age: Option<Duration>,
    pub completed_max_count: Option<u32>,
    pub failed_max_age: Option<Duration>,
}

impl RetentionPolicy {
    pub fn completed_older_than(age: Duration) -> Self {
        Self {
            completed_max_age: Some(age),
            ..Self::default()
        }
    }

    pub fn keep_latest_completed(count: u32) -> Self {
        Self {
            completed_max_count: Some(count),
            ..Self::default()
        }
    }

    pub fn is_noop(&self) -> bool {
        self.completed_max_age.is_none()
            && self.completed_max_count.is_none()
            && self.failed_max_age.is_none()
    }
}
