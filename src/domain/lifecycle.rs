//! Status transitions of a queued mutation.
//!
//! ```text
//! pending ──claim──▶ processing ──success──▶ completed
//!    ▲                   │
//!    └──retryable, attempts < max──┤
//!                        └──permanent or attempts == max──▶ failed ──retry_failed──▶ pending
//! ```
//!
//! Stores apply these decisions atomically; nothing here touches I/O.

use crate::domain::value_objects::MutationStatus;
use chrono::{DateTime, Utc};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureDisposition {
    /// Network, timeout or 5xx: worth another attempt after `retry_at`.
    Retryable { retry_at: DateTime<Utc> },
    /// Rejected by the remote (4xx, validation, constraint): retrying cannot succeed.
    Permanent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FailureTransition {
    pub status: MutationStatus,
    pub attempts: u32,
    pub next_attempt_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompletionTransition {
    Complete,
    /// Replay on an entry that is already completed.
    AlreadyCompleted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransitionError {
    pub from: MutationStatus,
    pub action: &'static str,
}

impl std::fmt::Display for TransitionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "cannot {} a mutation in status {}", self.action, self.from)
    }
}

impl std::error::Error for TransitionError {}

pub fn complete(status: MutationStatus) -> Result<CompletionTransition, TransitionError> {
    match status {
        MutationStatus::Processing => Ok(CompletionTransition::Complete),
        MutationStatus::Completed => Ok(CompletionTransition::AlreadyCompleted),
        from => Err(TransitionError {
            from,
            action: "complete",
        }),
    }
}

/// Outcome of a failed attempt. `attempts` is the count before this attempt is recorded.
pub fn fail(
    status: MutationStatus,
    attempts: u32,
    max_retries: u32,
    disposition: FailureDisposition,
) -> Result<FailureTransition, TransitionError> {
    if status != MutationStatus::Processing {
        return Err(TransitionError {
            from: status,
            action: "fail",
        });
    }

    let attempts = attempts.saturating_add(1).min(max_retries.max(1));
    let transition = match disposition {
        FailureDisposition::Retryable { retry_at } if attempts < max_retries => {
            FailureTransition {
                status: MutationStatus::Pending,
                attempts,
                next_attempt_at: Some(retry_at),
            }
        }
        _ => FailureTransition {
            status: MutationStatus::Failed,
            attempts,
            next_attempt_at: None,
        },
    };
    Ok(transition)
}
