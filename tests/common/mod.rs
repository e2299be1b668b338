#![allow(dead_code)]

use async_trait::async_trait;
use mutation_queue::{
    ConflictKey, ConnectionPool, ConnectivityMonitor, MemoryQueryCache, MutationId,
    MutationRuntime, MutationStatus, MutationStore, QueueProcessorConfig, RecordPayload,
    RemoteDataService, RemoteError, RetryPolicy, RowFilters, SqliteMutationStore, TableName,
};
use serde_json::{Value, json};
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// One observed remote call.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedCall {
    pub operation: &'static str,
    pub table: String,
    pub body: Value,
}

/// Remote fake that logs call boundaries and replays scripted failures.
#[derive(Default)]
pub struct RecordingRemote {
    events: Mutex<Vec<String>>,
    calls: Mutex<Vec<RecordedCall>>,
    failures: Mutex<VecDeque<RemoteError>>,
    latency: Duration,
}

impl RecordingRemote {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(latency: Duration) -> Self {
        Self {
            latency,
            ..Self::default()
        }
    }

    /// Queues errors returned by the next calls, in order.
    pub fn fail_next(&self, errors: impl IntoIterator<Item = RemoteError>) {
        self.failures.lock().unwrap().extend(errors);
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }

    async fn record(
        &self,
        operation: &'static str,
        table: &TableName,
        body: Value,
    ) -> Result<Value, RemoteError> {
        let label = body
            .get("label")
            .and_then(Value::as_str)
            .unwrap_or(operation)
            .to_string();
        self.events.lock().unwrap().push(format!("begin:{label}"));
        self.calls.lock().unwrap().push(RecordedCall {
            operation,
            table: table.to_string(),
            body: body.clone(),
        });

        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }

        let scripted = self.failures.lock().unwrap().pop_front();
        self.events.lock().unwrap().push(format!("end:{label}"));
        match scripted {
            Some(err) => Err(err),
            None => Ok(json!([body])),
        }
    }
}

#[async_trait]
impl RemoteDataService for RecordingRemote {
    async fn insert(&self, table: &TableName, payload: &RecordPayload) -> Result<Value, RemoteError> {
        self.record("insert", table, payload.to_value()).await
    }

    async fn update(
        &self,
        table: &TableName,
        filters: &RowFilters,
        payload: &RecordPayload,
    ) -> Result<Value, RemoteError> {
        let mut body = payload.to_value();
        if let Value::Object(map) = &mut body {
            for (column, value) in filters.iter() {
                map.entry(format!("filter:{column}")).or_insert(value.clone());
            }
        }
        self.record("update", table, body).await
    }

    async fn delete(&self, table: &TableName, filters: &RowFilters) -> Result<Value, RemoteError> {
        let body: serde_json::Map<String, Value> = filters
            .iter()
            .map(|(column, value)| (column.clone(), value.clone()))
            .collect();
        self.record("delete", table, Value::Object(body)).await
    }

    async fn upsert(
        &self,
        table: &TableName,
        payload: &RecordPayload,
        _conflict_key: &ConflictKey,
    ) -> Result<Value, RemoteError> {
        self.record("upsert", table, payload.to_value()).await
    }
}

pub struct TestContext {
    pub runtime: MutationRuntime,
    pub store: Arc<SqliteMutationStore>,
    pub remote: Arc<RecordingRemote>,
    pub cache: Arc<MemoryQueryCache>,
    pub pool: ConnectionPool,
}

impl TestContext {
    pub fn connectivity(&self) -> &ConnectivityMonitor {
        self.runtime.connectivity()
    }
}

/// Backoff of zero so retries are due on the very next pass.
pub fn immediate_retry_config() -> QueueProcessorConfig {
    QueueProcessorConfig {
        retry: RetryPolicy::new(Duration::ZERO, Duration::ZERO),
        ..QueueProcessorConfig::default()
    }
}

pub async fn setup(online: bool) -> TestContext {
    setup_with(online, RecordingRemote::new(), immediate_retry_config()).await
}

pub async fn setup_with(
    online: bool,
    remote: RecordingRemote,
    config: QueueProcessorConfig,
) -> TestContext {
    let pool = ConnectionPool::from_memory().await.expect("in-memory sqlite");
    pool.migrate().await.expect("migrations");
    build_context(pool, online, remote, config)
}

pub fn build_context(
    pool: ConnectionPool,
    online: bool,
    remote: RecordingRemote,
    config: QueueProcessorConfig,
) -> TestContext {
    let store = Arc::new(SqliteMutationStore::new(pool.get_pool().clone()));
    let remote = Arc::new(remote);
    let cache = Arc::new(MemoryQueryCache::new(300));
    let runtime = MutationRuntime::from_parts(
        store.clone(),
        remote.clone(),
        cache.clone(),
        ConnectivityMonitor::new(online),
        config,
    );

    TestContext {
        runtime,
        store,
        remote,
        cache,
        pool,
    }
}

pub async fn file_pool(dir: &tempfile::TempDir) -> ConnectionPool {
    let url = format!("sqlite:{}?mode=rwc", dir.path().join("queue.db").display());
    let pool = ConnectionPool::new(&url, 4).await.expect("file sqlite");
    pool.migrate().await.expect("migrations");
    pool
}

/// Polls until the entry reaches `status` or the deadline passes.
pub async fn wait_for_status(
    store: &dyn MutationStore,
    id: &MutationId,
    status: MutationStatus,
) -> bool {
    for _ in 0..100 {
        if let Ok(Some(entry)) = store.get(id).await
            && entry.status == status
        {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}

pub fn table(name: &str) -> TableName {
    TableName::new(name).expect("table name")
}
