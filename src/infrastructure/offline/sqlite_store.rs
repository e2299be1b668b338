use super::mappers::{columns_from_draft, domain_mutation_from_row};
use super::rows::{MutationRow, StatusCountRow};
use crate::application::ports::mutation_store::{FailureReport, MutationStore};
use crate::domain::entities::{MutationDraft, QueueStats, QueuedMutation};
use crate::domain::lifecycle::{self, CompletionTransition};
use crate::domain::value_objects::{
    LeaseToken, MutationId, MutationStatus, RetentionPolicy, TableName,
};
use crate::shared::error::AppError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite};
use std::time::Duration;

const DEFAULT_MAX_RETRIES: u32 = 3;

pub struct SqliteMutationStore {
    pool: Pool<Sqlite>,
    default_max_retries: u32,
}

impl SqliteMutationStore {
    pub fn new(pool: Pool<Sqlite>) -> Self {
        Self {
            pool,
            default_max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_default_max_retries(mut self, max_retries: u32) -> Self {
        self.default_max_retries = max_retries.max(1);
        self
    }

    async fn fetch_row(&self, id: &MutationId) -> Result<Option<MutationRow>, AppError> {
        let row = sqlx::query_as::<_, MutationRow>(
            r#"
            SELECT * FROM mutation_queue
            WHERE id = ?1
            "#,
        )
        .bind(id.as_str())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row)
    }

    async fn fetch_status(&self, id: &MutationId) -> Result<MutationStatus, AppError> {
        let status: Option<String> =
            sqlx::query_scalar("SELECT status FROM mutation_queue WHERE id = ?1")
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await?;

        let status = status.ok_or_else(|| AppError::NotFound(format!("mutation {id}")))?;
        MutationStatus::try_from(status.as_str()).map_err(AppError::DeserializationError)
    }
}

#[async_trait]
impl MutationStore for SqliteMutationStore {
    async fn enqueue(&self, draft: MutationDraft) -> Result<MutationId, AppError> {
        draft.validate().map_err(AppError::ValidationError)?;
        let draft = draft.normalized();

        let id = MutationId::generate();
        let columns = columns_from_draft(&draft)?;
        let max_retries = draft.max_retries.unwrap_or(self.default_max_retries);
        let now = Utc::now().timestamp_millis();

        sqlx::query(
            r#"
            INSERT INTO mutation_queue (
                id, kind, table_name, payload, filters, conflict_key,
                status, attempts, max_retries, created_at, updated_at,
                invalidate_queries, optimistic_update
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, 'pending', 0, ?7, ?8, ?8, ?9, ?10)
            "#,
        )
        .bind(id.as_str())
        .bind(columns.kind)
        .bind(&columns.table_name)
        .bind(&columns.payload)
        .bind(&columns.filters)
        .bind(&columns.conflict_key)
        .bind(i64::from(max_retries))
        .bind(now)
        .bind(&columns.invalidate_queries)
        .bind(&columns.optimistic_update)
        .execute(&self.pool)
        .await
        .map_err(|err| AppError::Storage(format!("failed to persist mutation: {err}")))?;

        tracing::debug!(
            target: "mutation_queue::store",
            mutation_id = %id,
            table = %draft.table,
            kind = %draft.kind,
            "mutation enqueued"
        );

        Ok(id)
    }

    async fn get(&self, id: &MutationId) -> Result<Option<QueuedMutation>, AppError> {
        self.fetch_row(id)
            .await?
            .map(domain_mutation_from_row)
            .transpose()
    }

    async fn next_batch(
        &self,
        table: Option<&TableName>,
        limit: u32,
    ) -> Result<Vec<QueuedMutation>, AppError> {
        let rows = sqlx::query_as::<_, MutationRow>(
            r#"
            SELECT * FROM mutation_queue
            WHERE status = 'pending'
              AND (?1 IS NULL OR table_name = ?1)
            ORDER BY created_at ASC, seq ASC
            LIMIT ?2
            "#,
        )
        .bind(table.map(TableName::as_str))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(domain_mutation_from_row).collect()
    }

    async fn pending_tables(&self) -> Result<Vec<TableName>, AppError> {
        let names: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT DISTINCT table_name FROM mutation_queue
            WHERE status = 'pending'
            ORDER BY table_name ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        names
            .into_iter()
            .map(|name| TableName::new(name).map_err(AppError::DeserializationError))
            .collect()
    }

    async fn mark_processing(
        &self,
        id: &MutationId,
        lease_ttl: Duration,
    ) -> Result<Option<LeaseToken>, AppError> {
        let token = LeaseToken::generate();
        let now = Utc::now().timestamp_millis();
        let ttl_ms = i64::try_from(lease_ttl.as_millis()).unwrap_or(i64::MAX);
        let expires_at = now.saturating_add(ttl_ms);

        // 単一の条件付き UPDATE で取得を確定させる
        let result = sqlx::query(
            r#"
            UPDATE mutation_queue
            SET status = 'processing', lease_token = ?1, lease_expires_at = ?2, updated_at = ?3
            WHERE id = ?4
              AND (
                status = 'pending'
                OR (status = 'processing' AND lease_expires_at IS NOT NULL AND lease_expires_at <= ?3)
              )
            "#,
        )
        .bind(token.as_str())
        .bind(expires_at)
        .bind(now)
        .bind(id.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            Ok(Some(token))
        } else {
            Ok(None)
        }
    }

    async fn mark_completed(&self, id: &MutationId, lease: &LeaseToken) -> Result<bool, AppError> {
        let now = Utc::now().timestamp_millis();

        let result = sqlx::query(
            r#"
            UPDATE mutation_queue
            SET status = 'completed', completed_at = ?1, updated_at = ?1,
                lease_token = NULL, lease_expires_at = NULL,
                next_attempt_at = NULL, last_error = NULL
            WHERE id = ?2 AND status = 'processing' AND lease_token = ?3
            "#,
        )
        .bind(now)
        .bind(id.as_str())
        .bind(lease.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 1 {
            return Ok(true);
        }

        // 既に完了済みなら再実行は無視、それ以外はリースを失っている
        match lifecycle::complete(self.fetch_status(id).await?) {
            Ok(CompletionTransition::AlreadyCompleted) => Ok(false),
            Ok(CompletionTransition::Complete) | Err(_) => Err(AppError::LeaseLost(format!(
                "mutation {id} is no longer held by this lease"
            ))),
        }
    }

    async fn mark_failed(
        &self,
        id: &MutationId,
        lease: &LeaseToken,
        failure: FailureReport,
    ) -> Result<MutationStatus, AppError> {
        let current = self
            .get(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("mutation {id}")))?;

        if current.lease_token.as_ref() != Some(lease) {
            return Err(AppError::LeaseLost(format!(
                "mutation {id} is no longer held by this lease"
            )));
        }

        let transition = lifecycle::fail(
            current.status,
            current.attempts,
            current.max_retries,
            failure.disposition,
        )
        .map_err(|err| AppError::InvalidInput(err.to_string()))?;

        let now = Utc::now().timestamp_millis();
        let result = sqlx::query(
            r#"
            UPDATE mutation_queue
            SET status = ?1, attempts = ?2, next_attempt_at = ?3, last_error = ?4,
                lease_token = NULL, lease_expires_at = NULL, updated_at = ?5
            WHERE id = ?6 AND status = 'processing' AND attempts = ?7 AND lease_token = ?8
            "#,
        )
        .bind(transition.status.as_str())
        .bind(i64::from(transition.attempts))
        .bind(transition.next_attempt_at.map(|at| at.timestamp_millis()))
        .bind(&failure.error)
        .bind(now)
        .bind(id.as_str())
        .bind(i64::from(current.attempts))
        .bind(lease.as_str())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() != 1 {
            return Err(AppError::LeaseLost(format!(
                "mutation {id} changed while recording failure"
            )));
        }

        Ok(transition.status)
    }

    async fn stats(&self) -> Result<QueueStats, AppError> {
        let rows = sqlx::query_as::<_, StatusCountRow>(
            r#"
            SELECT status, COUNT(*) AS count
            FROM mutation_queue
            GROUP BY status
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let (mut pending, mut processing, mut completed, mut failed) = (0, 0, 0, 0);
        for row in rows {
            let count = u64::try_from(row.count).unwrap_or(0);
            match MutationStatus::try_from(row.status.as_str()) {
                Ok(MutationStatus::Pending) => pending = count,
                Ok(MutationStatus::Processing) => processing = count,
                Ok(MutationStatus::Completed) => completed = count,
                Ok(MutationStatus::Failed) => failed = count,
                Err(err) => return Err(AppError::DeserializationError(err)),
            }
        }

        Ok(QueueStats::from_counts(pending, processing, completed, failed))
    }

    async fn retry_failed(&self) -> Result<u64, AppError> {
        let now = Utc::now().timestamp_millis();
        let result = sqlx::query(
            r#"
            UPDATE mutation_queue
            SET status = 'pending', attempts = 0, last_error = NULL,
                next_attempt_at = NULL, lease_token = NULL, lease_expires_at = NULL,
                updated_at = ?1
            WHERE status = 'failed'
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn prune(&self, policy: &RetentionPolicy) -> Result<u64, AppError> {
        if policy.is_noop() {
            return Ok(0);
        }

        let now = Utc::now().timestamp_millis();
        let mut tx = self.pool.begin().await?;
        let mut removed = 0u64;

        if let Some(age) = policy.completed_max_age {
            let cutoff = now.saturating_sub(i64::try_from(age.as_millis()).unwrap_or(i64::MAX));
            removed += sqlx::query(
                r#"
                DELETE FROM mutation_queue
                WHERE status = 'completed' AND completed_at < ?1
                "#,
            )
            .bind(cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        if let Some(count) = policy.completed_max_count {
            removed += sqlx::query(
                r#"
                DELETE FROM mutation_queue
                WHERE status = 'completed'
                  AND seq NOT IN (
                    SELECT seq FROM mutation_queue
                    WHERE status = 'completed'
                    ORDER BY completed_at DESC, seq DESC
                    LIMIT ?1
                  )
                "#,
            )
            .bind(i64::from(count))
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        if let Some(age) = policy.failed_max_age {
            let cutoff = now.saturating_sub(i64::try_from(age.as_millis()).unwrap_or(i64::MAX));
            removed += sqlx::query(
                r#"
                DELETE FROM mutation_queue
                WHERE status = 'failed' AND updated_at < ?1
                "#,
            )
            .bind(cutoff)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        }

        tx.commit().await?;

        if removed > 0 {
            tracing::debug!(target: "mutation_queue::store", removed, "pruned terminal mutations");
        }
        Ok(removed)
    }

    async fn release_expired_leases(&self, now: DateTime<Utc>) -> Result<u64, AppError> {
        let now = now.timestamp_millis();
        let result = sqlx::query(
            r#"
            UPDATE mutation_queue
            SET status = 'pending', lease_token = NULL, lease_expires_at = NULL, updated_at = ?1
            WHERE status = 'processing'
              AND (lease_expires_at IS NULL OR lease_expires_at <= ?1)
            "#,
        )
        .bind(now)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn list(
        &self,
        status: Option<MutationStatus>,
        limit: u32,
    ) -> Result<Vec<QueuedMutation>, AppError> {
        let rows = sqlx::query_as::<_, MutationRow>(
            r#"
            SELECT * FROM mutation_queue
            WHERE (?1 IS NULL OR status = ?1)
            ORDER BY created_at ASC, seq ASC
            LIMIT ?2
            "#,
        )
        .bind(status.map(|status| status.as_str()))
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(domain_mutation_from_row).collect()
    }
}
