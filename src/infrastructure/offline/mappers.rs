use super::rows::MutationRow;
use crate::domain::entities::{MutationDraft, OptimisticUpdate, QueuedMutation};
use crate::domain::value_objects::{
    ConflictKey, LeaseToken, MutationId, MutationKind, MutationStatus, QueryKey, RecordPayload,
    RowFilters, TableName,
};
use crate::shared::error::AppError;
use chrono::{DateTime, TimeZone, Utc};

/// Serialized columns of a draft, ready to bind.
pub struct DraftColumns {
    pub kind: &'static str,
    pub table_name: String,
    pub payload: String,
    pub filters: String,
    pub conflict_key: Option<String>,
    pub invalidate_queries: String,
    pub optimistic_update: Option<String>,
}

pub fn columns_from_draft(draft: &MutationDraft) -> Result<DraftColumns, AppError> {
    Ok(DraftColumns {
        kind: draft.kind.as_str(),
        table_name: draft.table.as_str().to_string(),
        payload: serde_json::to_string(&draft.payload)
            .map_err(|err| AppError::SerializationError(err.to_string()))?,
        filters: serde_json::to_string(&draft.filters)
            .map_err(|err| AppError::SerializationError(err.to_string()))?,
        conflict_key: draft
            .conflict_key
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|err| AppError::SerializationError(err.to_string()))?,
        invalidate_queries: serde_json::to_string(&draft.invalidate_queries)
            .map_err(|err| AppError::SerializationError(err.to_string()))?,
        optimistic_update: draft
            .optimistic_update
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|err| AppError::SerializationError(err.to_string()))?,
    })
}

pub fn domain_mutation_from_row(row: MutationRow) -> Result<QueuedMutation, AppError> {
    let id = MutationId::new(row.id).map_err(AppError::DeserializationError)?;
    let kind = MutationKind::try_from(row.kind.as_str()).map_err(AppError::DeserializationError)?;
    let table = TableName::new(row.table_name).map_err(AppError::DeserializationError)?;
    let status =
        MutationStatus::try_from(row.status.as_str()).map_err(AppError::DeserializationError)?;

    let payload: RecordPayload = decode(&row.payload, "payload")?;
    let filters: RowFilters = decode(&row.filters, "filters")?;
    let conflict_key: Option<ConflictKey> = row
        .conflict_key
        .as_deref()
        .map(|raw| decode(raw, "conflict_key"))
        .transpose()?;
    let invalidate_queries: Vec<QueryKey> =
        decode(&row.invalidate_queries, "invalidate_queries")?;
    let optimistic_update: Option<OptimisticUpdate> = row
        .optimistic_update
        .as_deref()
        .map(|raw| decode(raw, "optimistic_update"))
        .transpose()?;

    Ok(QueuedMutation {
        id,
        kind,
        table,
        payload,
        filters,
        conflict_key,
        status,
        attempts: to_u32(row.attempts, "attempts")?,
        max_retries: to_u32(row.max_retries, "max_retries")?,
        created_at: millis_to_datetime(row.created_at)?,
        updated_at: millis_to_datetime(row.updated_at)?,
        next_attempt_at: row.next_attempt_at.map(millis_to_datetime).transpose()?,
        completed_at: row.completed_at.map(millis_to_datetime).transpose()?,
        last_error: row.last_error,
        lease_token: row.lease_token.map(LeaseToken::from_stored),
        lease_expires_at: row.lease_expires_at.map(millis_to_datetime).transpose()?,
        invalidate_queries,
        optimistic_update,
    })
}

pub fn millis_to_datetime(value: i64) -> Result<DateTime<Utc>, AppError> {
    Utc.timestamp_millis_opt(value)
        .single()
        .ok_or_else(|| AppError::DeserializationError(format!("Invalid timestamp: {value}")))
}

fn decode<T: serde::de::DeserializeOwned>(raw: &str, column: &str) -> Result<T, AppError> {
    serde_json::from_str(raw)
        .map_err(|err| AppError::DeserializationError(format!("Invalid {column}: {err}")))
}

fn to_u32(value: i64, column: &str) -> Result<u32, AppError> {
    u32::try_from(value)
        .map_err(|_| AppError::DeserializationError(format!("{column} out of range: {value}")))
}
