use super::queue_processor::{QueueProcessor, RemoteCall, affected_keys, dispatch};
use crate::application::ports::mutation_store::MutationStore;
use crate::application::ports::query_cache::QueryCache;
use crate::application::ports::remote_data::RemoteDataService;
use crate::domain::entities::{
    MutationDraft, MutationEffect, MutationOutcome, OptimisticResult, OptimisticUpdate,
};
use crate::domain::value_objects::{
    ConflictKey, MutationId, MutationKind, MutationStatus, QueryKey, RecordPayload, RowFilters,
    TableName,
};
use crate::infrastructure::connectivity::ConnectivityMonitor;
use crate::shared::error::AppError;
use serde_json::{Map, Value};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const TEMP_ID_COLUMN: &str = "id";

/// Per-call knobs for a queued write.
#[derive(Debug, Clone, Default)]
pub struct MutationOptions {
    pub invalidate_queries: Vec<QueryKey>,
    pub optimistic: Option<OptimisticUpdate>,
    pub max_retries: Option<u32>,
}

impl MutationOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn invalidate(mut self, key: QueryKey) -> Self {
        self.invalidate_queries.push(key);
        self
    }

    pub fn optimistic(mut self, update: OptimisticUpdate) -> Self {
        self.optimistic = Some(update);
        self
    }

    pub fn max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = Some(max_retries);
        self
    }
}

/// Entry point for application writes: enqueue, patch the cache, return at once.
pub struct MutationClient {
    store: Arc<dyn MutationStore>,
    remote: Arc<dyn RemoteDataService>,
    cache: Arc<dyn QueryCache>,
    processor: Arc<QueueProcessor>,
    connectivity: ConnectivityMonitor,
    request_timeout: Duration,
}

impl MutationClient {
    pub fn new(
        store: Arc<dyn MutationStore>,
        remote: Arc<dyn RemoteDataService>,
        cache: Arc<dyn QueryCache>,
        processor: Arc<QueueProcessor>,
        connectivity: ConnectivityMonitor,
    ) -> Self {
        let request_timeout = processor.config().request_timeout;
        Self {
            store,
            remote,
            cache,
            processor,
            connectivity,
            request_timeout,
        }
    }

    pub fn table(&self, name: &str) -> Result<TableMutations<'_>, AppError> {
        let table = TableName::new(name).map_err(AppError::ValidationError)?;
        Ok(TableMutations {
            client: self,
            table,
        })
    }

    async fn submit(&self, draft: MutationDraft) -> Result<MutationOutcome, AppError> {
        draft.validate().map_err(AppError::ValidationError)?;
        let draft = draft.normalized();
        let (record, temp_id) = synthesize_record(&draft);

        let mutation_id = match self.store.enqueue(draft.clone()).await {
            Ok(id) => id,
            Err(err) if err.is_store_failure() => {
                tracing::warn!(
                    target: "mutation_queue::facade",
                    table = %draft.table,
                    kind = %draft.kind,
                    error = %err,
                    "queue unavailable; sending mutation directly"
                );
                return self.apply_directly(draft).await;
            }
            Err(err) => return Err(err),
        };

        if let Some(update) = &draft.optimistic_update {
            self.apply_optimistic(&draft, update, &mutation_id, &record)
                .await;
        }

        if self.connectivity.is_online() {
            self.processor.request_processing();
        }

        tracing::debug!(
            target: "mutation_queue::facade",
            mutation_id = %mutation_id,
            table = %draft.table,
            kind = %draft.kind,
            "mutation queued"
        );

        Ok(MutationOutcome::Queued(OptimisticResult {
            mutation_id,
            table: draft.table,
            kind: draft.kind,
            record,
            temp_id,
        }))
    }

    async fn apply_optimistic(
        &self,
        draft: &MutationDraft,
        update: &OptimisticUpdate,
        mutation_id: &MutationId,
        record: &Value,
    ) {
        let effect = MutationEffect {
            kind: draft.kind,
            record,
            payload: &draft.payload,
            filters: &draft.filters,
            conflict_key: draft.conflict_key.as_ref(),
        };
        let patch = |current: Option<&Value>| update.patch(current, &effect);
        self.cache
            .apply_optimistic(update.query_key(), mutation_id, &patch)
            .await;

        // 楽観パッチ適用前に処理が終わっていた場合の後始末
        match self.store.get(mutation_id).await {
            Ok(Some(stored)) if stored.status == MutationStatus::Completed => {
                self.cache.invalidate(update.query_key()).await;
            }
            Ok(Some(stored)) if stored.status == MutationStatus::Failed => {
                self.cache.rollback(update.query_key(), mutation_id).await;
            }
            Ok(_) => {}
            Err(err) => {
                tracing::debug!(
                    target: "mutation_queue::facade",
                    mutation_id = %mutation_id,
                    error = %err,
                    "could not re-read mutation after optimistic patch"
                );
            }
        }
    }

    async fn apply_directly(&self, draft: MutationDraft) -> Result<MutationOutcome, AppError> {
        let record = dispatch(
            self.remote.as_ref(),
            RemoteCall {
                kind: draft.kind,
                table: &draft.table,
                payload: &draft.payload,
                filters: &draft.filters,
                conflict_key: draft.conflict_key.as_ref(),
            },
            self.request_timeout,
        )
        .await?;

        for key in affected_keys(&draft.invalidate_queries, draft.optimistic_update.as_ref()) {
            self.cache.invalidate(&key).await;
        }

        Ok(MutationOutcome::Applied {
            table: draft.table,
            kind: draft.kind,
            record,
        })
    }
}

/// Writes against one table.
pub struct TableMutations<'a> {
    client: &'a MutationClient,
    table: TableName,
}

impl TableMutations<'_> {
    pub fn table(&self) -> &TableName {
        &self.table
    }

    pub async fn insert(
        &self,
        payload: Value,
        options: MutationOptions,
    ) -> Result<MutationOutcome, AppError> {
        let payload = RecordPayload::new(payload).map_err(AppError::ValidationError)?;
        let draft = MutationDraft::insert(self.table.clone(), payload);
        self.client.submit(with_options(draft, options)).await
    }

    pub async fn update(
        &self,
        filters: RowFilters,
        payload: Value,
        options: MutationOptions,
    ) -> Result<MutationOutcome, AppError> {
        let payload = RecordPayload::new(payload).map_err(AppError::ValidationError)?;
        let draft = MutationDraft::update(self.table.clone(), filters, payload);
        self.client.submit(with_options(draft, options)).await
    }

    pub async fn remove(
        &self,
        filters: RowFilters,
        options: MutationOptions,
    ) -> Result<MutationOutcome, AppError> {
        let draft = MutationDraft::delete(self.table.clone(), filters);
        self.client.submit(with_options(draft, options)).await
    }

    pub async fn upsert(
        &self,
        payload: Value,
        conflict_key: ConflictKey,
        options: MutationOptions,
    ) -> Result<MutationOutcome, AppError> {
        let payload = RecordPayload::new(payload).map_err(AppError::ValidationError)?;
        let draft = MutationDraft::upsert(self.table.clone(), payload, conflict_key);
        self.client.submit(with_options(draft, options)).await
    }
}

fn with_options(mut draft: MutationDraft, options: MutationOptions) -> MutationDraft {
    draft.invalidate_queries = options.invalidate_queries;
    draft.optimistic_update = options.optimistic;
    draft.max_retries = options.max_retries;
    draft
}

/// Local stand-in for the row the remote will return.
fn synthesize_record(draft: &MutationDraft) -> (Value, Option<String>) {
    match draft.kind {
        MutationKind::Insert => {
            let mut row = draft.payload.as_map().clone();
            if row.contains_key(TEMP_ID_COLUMN) {
                return (Value::Object(row), None);
            }
            let temp_id = format!("temp_{}", Uuid::new_v4());
            row.insert(TEMP_ID_COLUMN.to_string(), Value::String(temp_id.clone()));
            (Value::Object(row), Some(temp_id))
        }
        MutationKind::Update => {
            let mut row: Map<String, Value> = draft
                .filters
                .iter()
                .map(|(column, value)| (column.clone(), value.clone()))
                .collect();
            for (column, value) in draft.payload.as_map() {
                row.insert(column.clone(), value.clone());
            }
            (Value::Object(row), None)
        }
        MutationKind::Delete => {
            let row: Map<String, Value> = draft
                .filters
                .iter()
                .map(|(column, value)| (column.clone(), value.clone()))
                .collect();
            (Value::Object(row), None)
        }
        MutationKind::Upsert => (draft.payload.to_value(), None),
    }
}
