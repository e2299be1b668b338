use crate::application::ports::mutation_store::{FailureReport, MutationStore};
use crate::application::ports::query_cache::QueryCache;
use crate::application::ports::remote_data::{RemoteDataService, RemoteError};
use crate::domain::entities::{OptimisticUpdate, QueuedMutation};
use crate::domain::lifecycle::FailureDisposition;
use crate::domain::value_objects::{
    ConflictKey, LeaseToken, MutationKind, MutationStatus, QueryKey, RecordPayload, RetentionPolicy,
    RetryPolicy, RowFilters, TableName,
};
use crate::infrastructure::connectivity::ConnectivityMonitor;
use crate::infrastructure::offline::metrics::{self, AttemptMetadata, AttemptOutcome};
use crate::shared::config::AppConfig;
use crate::shared::error::AppError;
use chrono::Utc;
use futures::future::join_all;
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{Mutex, Notify, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

#[derive(Debug, Clone)]
pub struct QueueProcessorConfig {
    pub batch_size: u32,
    pub lease_ttl: Duration,
    pub request_timeout: Duration,
    pub process_interval: Duration,
    pub retry: RetryPolicy,
    pub retention: RetentionPolicy,
}

impl QueueProcessorConfig {
    pub fn from_app_config(config: &AppConfig) -> Self {
        Self {
            batch_size: config.queue.batch_size,
            lease_ttl: config.queue.lease_ttl(),
            request_timeout: config.remote.request_timeout(),
            process_interval: config.queue.process_interval(),
            retry: RetryPolicy::new(
                Duration::from_millis(config.queue.backoff_base_ms),
                Duration::from_millis(config.queue.backoff_ceiling_ms),
            )
            .with_jitter(config.queue.backoff_jitter),
            retention: RetentionPolicy {
                completed_max_age: config
                    .retention
                    .completed_max_age_secs
                    .map(Duration::from_secs),
                completed_max_count: config.retention.completed_max_count,
                failed_max_age: config.retention.failed_max_age_secs.map(Duration::from_secs),
            },
        }
    }
}

impl Default for QueueProcessorConfig {
    fn default() -> Self {
        Self::from_app_config(&AppConfig::default())
    }
}

/// Summary of one processing pass.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PassReport {
    pub offline: bool,
    pub completed: u32,
    pub failed: u32,
    pub rescheduled: u32,
    /// Tables that stopped early on a backoff gate, a retryable failure or a lost claim.
    pub halted_tables: u32,
    /// Tables skipped because another pass was already draining them.
    pub busy_tables: u32,
    pub released_leases: u64,
}

impl PassReport {
    fn merge(&mut self, other: PassReport) {
        self.completed += other.completed;
        self.failed += other.failed;
        self.rescheduled += other.rescheduled;
        self.halted_tables += other.halted_tables;
        self.busy_tables += other.busy_tables;
    }
}

enum EntryOutcome {
    Completed,
    Failed,
    Rescheduled,
    NotDue,
    Contended,
}

/// Drains the queue against the remote service. At most one pass drains a given table at a time.
pub struct QueueProcessor {
    store: Arc<dyn MutationStore>,
    remote: Arc<dyn RemoteDataService>,
    cache: Arc<dyn QueryCache>,
    connectivity: ConnectivityMonitor,
    config: QueueProcessorConfig,
    table_locks: Mutex<HashMap<TableName, Arc<Mutex<()>>>>,
    wake: Notify,
}

impl QueueProcessor {
    pub fn new(
        store: Arc<dyn MutationStore>,
        remote: Arc<dyn RemoteDataService>,
        cache: Arc<dyn QueryCache>,
        connectivity: ConnectivityMonitor,
        config: QueueProcessorConfig,
    ) -> Self {
        Self {
            store,
            remote,
            cache,
            connectivity,
            config,
            table_locks: Mutex::new(HashMap::new()),
            wake: Notify::new(),
        }
    }

    pub fn config(&self) -> &QueueProcessorConfig {
        &self.config
    }

    /// Asks the background worker for a pass without waiting for it.
    pub fn request_processing(&self) {
        self.wake.notify_one();
    }

    pub async fn process_queue(&self) -> Result<PassReport, AppError> {
        if !self.connectivity.is_online() {
            tracing::debug!(target: "mutation_queue::processor", "offline; skipping pass");
            return Ok(PassReport {
                offline: true,
                ..PassReport::default()
            });
        }

        metrics::record_pass();
        let released = self.store.release_expired_leases(Utc::now()).await?;
        if released > 0 {
            tracing::warn!(
                target: "mutation_queue::processor",
                released,
                "released mutations left processing by an interrupted pass"
            );
        }

        let tables = self.store.pending_tables().await?;
        let results = join_all(tables.iter().map(|table| self.drain_table(table))).await;

        let mut report = PassReport {
            released_leases: released,
            ..PassReport::default()
        };
        let mut first_error = None;
        for (table, result) in tables.iter().zip(results) {
            match result {
                Ok(table_report) => report.merge(table_report),
                Err(err) => {
                    tracing::error!(
                        target: "mutation_queue::processor",
                        table = %table,
                        error = %err,
                        "table pass aborted"
                    );
                    first_error.get_or_insert(err);
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(report),
        }
    }

    pub async fn prune(&self) -> Result<u64, AppError> {
        self.store.prune(&self.config.retention).await
    }

    async fn table_lock(&self, table: &TableName) -> Arc<Mutex<()>> {
        let mut locks = self.table_locks.lock().await;
        Arc::clone(locks.entry(table.clone()).or_default())
    }

    async fn drain_table(&self, table: &TableName) -> Result<PassReport, AppError> {
        let mut report = PassReport::default();
        let lock = self.table_lock(table).await;
        let Ok(_guard) = lock.try_lock() else {
            report.busy_tables = 1;
            return Ok(report);
        };

        loop {
            let batch = self
                .store
                .next_batch(Some(table), self.config.batch_size)
                .await?;
            let exhausted = (batch.len() as u32) < self.config.batch_size;

            for mutation in batch {
                if !self.connectivity.is_online() {
                    report.halted_tables = 1;
                    return Ok(report);
                }
                match self.process_entry(&mutation).await? {
                    EntryOutcome::Completed => report.completed += 1,
                    EntryOutcome::Failed => report.failed += 1,
                    EntryOutcome::Rescheduled => {
                        report.rescheduled += 1;
                        report.halted_tables = 1;
                        return Ok(report);
                    }
                    EntryOutcome::NotDue | EntryOutcome::Contended => {
                        report.halted_tables = 1;
                        return Ok(report);
                    }
                }
            }

            if exhausted {
                return Ok(report);
            }
        }
    }

    async fn process_entry(&self, mutation: &QueuedMutation) -> Result<EntryOutcome, AppError> {
        if !mutation.is_due(Utc::now()) {
            return Ok(EntryOutcome::NotDue);
        }

        let Some(lease) = self
            .store
            .mark_processing(&mutation.id, self.config.lease_ttl)
            .await?
        else {
            tracing::debug!(
                target: "mutation_queue::processor",
                mutation_id = %mutation.id,
                "mutation claimed elsewhere"
            );
            return Ok(EntryOutcome::Contended);
        };

        let started = Instant::now();
        let result = dispatch(
            self.remote.as_ref(),
            RemoteCall {
                kind: mutation.kind,
                table: &mutation.table,
                payload: &mutation.payload,
                filters: &mutation.filters,
                conflict_key: mutation.conflict_key.as_ref(),
            },
            self.config.request_timeout,
        )
        .await;
        let duration_ms = started.elapsed().as_millis() as u64;

        match result {
            Ok(_) => {
                let transitioned = match self.store.mark_completed(&mutation.id, &lease).await {
                    Ok(transitioned) => transitioned,
                    Err(AppError::LeaseLost(reason)) => return Ok(lease_lost(mutation, &reason)),
                    Err(err) => return Err(err),
                };
                if transitioned {
                    for key in affected_keys(
                        &mutation.invalidate_queries,
                        mutation.optimistic_update.as_ref(),
                    ) {
                        self.cache.invalidate(&key).await;
                    }
                }

                metrics::record_attempt(
                    AttemptOutcome::Success,
                    &AttemptMetadata {
                        mutation_id: Some(mutation.id.to_string()),
                        table: Some(mutation.table.to_string()),
                        attempts: Some(mutation.attempts + 1),
                        max_retries: Some(mutation.max_retries),
                        duration_ms: Some(duration_ms),
                        ..AttemptMetadata::default()
                    },
                );
                tracing::debug!(
                    target: "mutation_queue::processor",
                    mutation_id = %mutation.id,
                    table = %mutation.table,
                    kind = %mutation.kind,
                    "mutation completed"
                );
                Ok(EntryOutcome::Completed)
            }
            Err(err) => self.record_failure(mutation, &lease, err, duration_ms).await,
        }
    }

    async fn record_failure(
        &self,
        mutation: &QueuedMutation,
        lease: &LeaseToken,
        err: RemoteError,
        duration_ms: u64,
    ) -> Result<EntryOutcome, AppError> {
        let backoff = self.config.retry.delay_for(mutation.attempts + 1);
        let disposition = if err.is_transient() {
            let delay = chrono::Duration::from_std(backoff).unwrap_or(chrono::Duration::zero());
            FailureDisposition::Retryable {
                retry_at: Utc::now() + delay,
            }
        } else {
            FailureDisposition::Permanent
        };

        let status = match self
            .store
            .mark_failed(
                &mutation.id,
                lease,
                FailureReport {
                    error: err.to_string(),
                    disposition,
                },
            )
            .await
        {
            Ok(status) => status,
            Err(AppError::LeaseLost(reason)) => return Ok(lease_lost(mutation, &reason)),
            Err(err) => return Err(err),
        };

        metrics::record_attempt(
            AttemptOutcome::Failure,
            &AttemptMetadata {
                mutation_id: Some(mutation.id.to_string()),
                table: Some(mutation.table.to_string()),
                attempts: Some(mutation.attempts + 1),
                max_retries: Some(mutation.max_retries),
                backoff_ms: (status == MutationStatus::Pending)
                    .then(|| backoff.as_millis() as u64),
                duration_ms: Some(duration_ms),
                error: Some(err.to_string()),
            },
        );

        if status == MutationStatus::Failed {
            if let Some(update) = &mutation.optimistic_update {
                self.cache.rollback(update.query_key(), &mutation.id).await;
            }
            tracing::warn!(
                target: "mutation_queue::processor",
                mutation_id = %mutation.id,
                table = %mutation.table,
                attempts = mutation.attempts + 1,
                error = %err,
                "mutation failed permanently"
            );
            return Ok(EntryOutcome::Failed);
        }

        tracing::info!(
            target: "mutation_queue::processor",
            mutation_id = %mutation.id,
            table = %mutation.table,
            attempts = mutation.attempts + 1,
            backoff_ms = backoff.as_millis() as u64,
            error = %err,
            "mutation rescheduled"
        );
        Ok(EntryOutcome::Rescheduled)
    }

    /// Starts the background loop: periodic ticks, reconnects and explicit requests each trigger a pass.
    pub fn spawn_worker(self: &Arc<Self>) -> WorkerHandle {
        let token = CancellationToken::new();
        let processor = Arc::clone(self);
        let shutdown = token.clone();
        let connectivity = self.connectivity.subscribe();
        let handle =
            tokio::spawn(async move { processor.run_worker(connectivity, shutdown).await });
        WorkerHandle { token, handle }
    }

    async fn run_worker(
        self: Arc<Self>,
        mut connectivity: watch::Receiver<bool>,
        shutdown: CancellationToken,
    ) {
        let mut interval = tokio::time::interval(self.config.process_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,
                _ = interval.tick() => {
                    self.run_pass_with_log("interval").await;
                    if let Err(err) = self.prune().await {
                        tracing::warn!(target: "mutation_queue::processor", error = %err, "prune failed");
                    }
                }
                changed = connectivity.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let online = *connectivity.borrow_and_update();
                    if online {
                        self.run_pass_with_log("reconnect").await;
                    }
                }
                _ = self.wake.notified() => {
                    self.run_pass_with_log("request").await;
                }
            }
        }

        tracing::debug!(target: "mutation_queue::processor", "worker stopped");
    }

    async fn run_pass_with_log(&self, trigger: &str) {
        match self.process_queue().await {
            Ok(report) if report.completed + report.failed + report.rescheduled > 0 => {
                tracing::info!(
                    target: "mutation_queue::processor",
                    trigger,
                    completed = report.completed,
                    failed = report.failed,
                    rescheduled = report.rescheduled,
                    "queue pass finished"
                );
            }
            Ok(_) => {}
            Err(err) => {
                tracing::error!(target: "mutation_queue::processor", trigger, error = %err, "queue pass failed");
            }
        }
    }
}

pub struct WorkerHandle {
    token: CancellationToken,
    handle: JoinHandle<()>,
}

impl WorkerHandle {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stops the loop after the pass in flight, if any, finishes.
    pub async fn shutdown(self) {
        self.token.cancel();
        if let Err(err) = self.handle.await {
            tracing::error!(target: "mutation_queue::processor", error = %err, "worker task panicked");
        }
    }
}

// 別プロセスが取り直した行には触らず、そのテーブルは次のパスへ回す
fn lease_lost(mutation: &QueuedMutation, reason: &str) -> EntryOutcome {
    tracing::warn!(
        target: "mutation_queue::processor",
        mutation_id = %mutation.id,
        table = %mutation.table,
        reason,
        "lease expired before the attempt was recorded"
    );
    EntryOutcome::Contended
}

pub(crate) struct RemoteCall<'a> {
    pub kind: MutationKind,
    pub table: &'a TableName,
    pub payload: &'a RecordPayload,
    pub filters: &'a RowFilters,
    pub conflict_key: Option<&'a ConflictKey>,
}

pub(crate) async fn dispatch(
    remote: &dyn RemoteDataService,
    call: RemoteCall<'_>,
    timeout: Duration,
) -> Result<Value, RemoteError> {
    let request = async {
        match call.kind {
            MutationKind::Insert => remote.insert(call.table, call.payload).await,
            MutationKind::Update => remote.update(call.table, call.filters, call.payload).await,
            MutationKind::Delete => remote.delete(call.table, call.filters).await,
            MutationKind::Upsert => match call.conflict_key {
                Some(key) => remote.upsert(call.table, call.payload, key).await,
                None => Err(RemoteError::permanent("upsert without a conflict key")),
            },
        }
    };

    tokio::time::timeout(timeout, request)
        .await
        .unwrap_or_else(|_| Err(RemoteError::timeout()))
}

/// Keys to invalidate once a mutation is confirmed, each listed once.
pub(crate) fn affected_keys(
    invalidate: &[QueryKey],
    optimistic: Option<&OptimisticUpdate>,
) -> Vec<QueryKey> {
    let mut keys: Vec<QueryKey> = Vec::with_capacity(invalidate.len() + 1);
    for key in invalidate.iter().chain(optimistic.map(OptimisticUpdate::query_key)) {
        if !keys.contains(key) {
            keys.push(key.clone());
        }
    }
    keys
}
