use super::optimistic_update::OptimisticUpdate;
use crate::domain::value_objects::{
    ConflictKey, LeaseToken, MutationId, MutationKind, MutationStatus, QueryKey, RecordPayload,
    RowFilters, TableName,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A write requested by application code, not yet assigned an id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MutationDraft {
    pub kind: MutationKind,
    pub table: TableName,
    pub payload: RecordPayload,
    pub filters: RowFilters,
    pub conflict_key: Option<ConflictKey>,
    pub max_retries: Option<u32>,
    pub invalidate_queries: Vec<QueryKey>,
    pub optimistic_update: Option<OptimisticUpdate>,
}

impl MutationDraft {
    fn base(kind: MutationKind, table: TableName) -> Self {
        Self {
            kind,
            table,
            payload: RecordPayload::empty(),
            filters: RowFilters::empty(),
            conflict_key: None,
            max_retries: None,
            invalidate_queries: Vec::new(),
            optimistic_update: None,
        }
    }

    pub fn insert(table: TableName, payload: RecordPayload) -> Self {
        Self {
            payload,
            ..Self::base(MutationKind::Insert, table)
        }
    }

    pub fn update(table: TableName, filters: RowFilters, payload: RecordPayload) -> Self {
        Self {
            payload,
            filters,
            ..Self::base(MutationKind::Update, table)
        }
    }

    pub fn delete(table: TableName, filters: RowFilters) -> Self {
        Self {
            filters,
            ..Self::base(MutationKind::Delete, table)
        }
    }

    pub fn upsert(table: TableName, payload: RecordPayload, conflict_key: ConflictKey) -> Self {
        Self {
            payload,
            conflict_key: Some(conflict_key),
            ..Self::base(MutationKind::Upsert, table)
        }
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }

    pub fn with_invalidations(mut self, keys: Vec<QueryKey>) -> Self {
        self.invalidate_queries = keys;
        self
    }

    pub fn with_optimistic_update(mut self, update: OptimisticUpdate) -> Self {
        self.optimistic_update = Some(update);
        self
    }

    pub fn validate(&self) -> Result<(), String> {
        if let Some(0) = self.max_retries {
            return Err("max_retries must be at least 1".to_string());
        }
        if self.kind.requires_filters() && self.filters.is_empty() {
            return Err(format!(
                "{} on `{}` requires at least one filter",
                self.kind, self.table
            ));
        }
        if self.kind.requires_payload() && self.payload.is_empty() {
            return Err(format!(
                "{} on `{}` requires a non-empty payload",
                self.kind, self.table
            ));
        }
        match (self.kind, &self.conflict_key) {
            (MutationKind::Upsert, None) => {
                return Err(format!("upsert on `{}` requires a conflict key", self.table));
            }
            (MutationKind::Upsert, Some(key)) => {
                if let Some(missing) = key
                    .columns()
                    .iter()
                    .find(|column| self.payload.get(column).is_none())
                {
                    return Err(format!(
                        "upsert payload is missing conflict key column `{missing}`"
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }

    /// Drops the parts a given kind ignores so they are never persisted.
    pub fn normalized(mut self) -> Self {
        match self.kind {
            MutationKind::Insert | MutationKind::Upsert => self.filters = RowFilters::empty(),
            MutationKind::Delete => self.payload = RecordPayload::empty(),
            MutationKind::Update => {}
        }
        if self.kind != MutationKind::Upsert {
            self.conflict_key = None;
        }
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueuedMutation {
    pub id: MutationId,
    pub kind: MutationKind,
    pub table: TableName,
    pub payload: RecordPayload,
    pub filters: RowFilters,
    pub conflict_key: Option<ConflictKey>,
    pub status: MutationStatus,
    pub attempts: u32,
    pub max_retries: u32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub next_attempt_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
    pub lease_token: Option<LeaseToken>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub invalidate_queries: Vec<QueryKey>,
    pub optimistic_update: Option<OptimisticUpdate>,
}

impl QueuedMutation {
    /// Whether the backoff window, if any, has elapsed.
    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_attempt_at.is_none_or(|at| at <= now)
    }

    pub fn retries_remaining(&self) -> u32 {
        self.max_retries.saturating_sub(self.attempts)
    }
}
