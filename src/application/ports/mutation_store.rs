use crate::domain::entities::{MutationDraft, QueueStats, QueuedMutation};
use crate::domain::lifecycle::FailureDisposition;
use crate::domain::value_objects::{
    LeaseToken, MutationId, MutationStatus, RetentionPolicy, TableName,
};
use crate::shared::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FailureReport {
    pub error: String,
    pub disposition: FailureDisposition,
}

/// Durable, ordered storage of queued mutations.
///
/// Every status transition is atomic per entry; a failure to persist is returned, never swallowed.
#[async_trait]
pub trait MutationStore: Send + Sync {
    async fn enqueue(&self, draft: MutationDraft) -> Result<MutationId, AppError>;

    async fn get(&self, id: &MutationId) -> Result<Option<QueuedMutation>, AppError>;

    /// Pending entries in enqueue order, optionally for one table.
    async fn next_batch(
        &self,
        table: Option<&TableName>,
        limit: u32,
    ) -> Result<Vec<QueuedMutation>, AppError>;

    async fn pending_tables(&self) -> Result<Vec<TableName>, AppError>;

    /// Claims the entry for one processor. `None` when someone else holds it or it is not pending.
    async fn mark_processing(
        &self,
        id: &MutationId,
        lease_ttl: Duration,
    ) -> Result<Option<LeaseToken>, AppError>;

    /// `false` when the entry was already completed.
    ///
    /// Only the holder of `lease` may complete the entry; a stale holder gets `AppError::LeaseLost`.
    async fn mark_completed(&self, id: &MutationId, lease: &LeaseToken) -> Result<bool, AppError>;

    /// Records a failed attempt under `lease`. A stale holder gets `AppError::LeaseLost`.
    async fn mark_failed(
        &self,
        id: &MutationId,
        lease: &LeaseToken,
        failure: FailureReport,
    ) -> Result<MutationStatus, AppError>;

    async fn stats(&self) -> Result<QueueStats, AppError>;

    async fn retry_failed(&self) -> Result<u64, AppError>;

    async fn prune(&self, policy: &RetentionPolicy) -> Result<u64, AppError>;

    /// Returns processing entries whose lease ran out to pending without charging an attempt.
    async fn release_expired_leases(&self, now: DateTime<Utc>) -> Result<u64, AppError>;

    async fn list(
        &self,
        status: Option<MutationStatus>,
        limit: u32,
    ) -> Result<Vec<QueuedMutation>, AppError>;
}
