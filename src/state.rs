use crate::application::ports::mutation_store::MutationStore;
use crate::application::ports::query_cache::QueryCache;
use crate::application::ports::remote_data::RemoteDataService;
use crate::application::services::{
    MutationClient, QueueProcessor, QueueProcessorConfig, WorkerHandle,
};
use crate::infrastructure::cache::MemoryQueryCache;
use crate::infrastructure::connectivity::ConnectivityMonitor;
use crate::infrastructure::database::ConnectionPool;
use crate::infrastructure::offline::SqliteMutationStore;
use crate::infrastructure::offline::metrics::{self, QueueMetricsSnapshot};
use crate::infrastructure::remote::RestDataClient;
use crate::shared::config::AppConfig;
use crate::shared::error::AppError;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Wires the queue, processor, cache and facade together and owns the background worker.
pub struct MutationRuntime {
    pool: Option<ConnectionPool>,
    store: Arc<dyn MutationStore>,
    cache: Arc<MemoryQueryCache>,
    connectivity: ConnectivityMonitor,
    processor: Arc<QueueProcessor>,
    client: Arc<MutationClient>,
    worker: Mutex<Option<WorkerHandle>>,
}

impl MutationRuntime {
    /// Opens the database, applies migrations and starts the worker.
    pub async fn init(config: AppConfig) -> Result<Self, AppError> {
        config.validate().map_err(AppError::ConfigurationError)?;

        let pool = ConnectionPool::new(&config.database.url, config.database.max_connections)
            .await
            .map_err(|err| AppError::Database(format!("failed to open queue database: {err}")))?;
        pool.migrate().await?;

        let store: Arc<dyn MutationStore> = Arc::new(
            SqliteMutationStore::new(pool.get_pool().clone())
                .with_default_max_retries(config.queue.max_retries),
        );
        let remote: Arc<dyn RemoteDataService> = Arc::new(RestDataClient::new(&config.remote)?);
        let cache = Arc::new(MemoryQueryCache::new(config.cache.ttl_secs));
        let connectivity = ConnectivityMonitor::new(config.queue.start_online);

        let runtime = Self::from_parts(
            store,
            remote,
            cache,
            connectivity,
            QueueProcessorConfig::from_app_config(&config),
        )
        .with_pool(pool);
        runtime.start().await;

        tracing::info!(
            target: "mutation_queue::runtime",
            database = %config.database.url,
            remote = %config.remote.base_url,
            "mutation runtime started"
        );
        Ok(runtime)
    }

    /// Assembles a runtime from ready-made parts without starting the worker.
    pub fn from_parts(
        store: Arc<dyn MutationStore>,
        remote: Arc<dyn RemoteDataService>,
        cache: Arc<MemoryQueryCache>,
        connectivity: ConnectivityMonitor,
        config: QueueProcessorConfig,
    ) -> Self {
        let query_cache: Arc<dyn QueryCache> = cache.clone();
        let processor = Arc::new(QueueProcessor::new(
            Arc::clone(&store),
            Arc::clone(&remote),
            Arc::clone(&query_cache),
            connectivity.clone(),
            config,
        ));
        let client = Arc::new(MutationClient::new(
            Arc::clone(&store),
            remote,
            query_cache,
            Arc::clone(&processor),
            connectivity.clone(),
        ));

        Self {
            pool: None,
            store,
            cache,
            connectivity,
            processor,
            client,
            worker: Mutex::new(None),
        }
    }

    fn with_pool(mut self, pool: ConnectionPool) -> Self {
        self.pool = Some(pool);
        self
    }

    /// Starts the background worker if it is not already running.
    pub async fn start(&self) {
        let mut worker = self.worker.lock().await;
        if worker.is_none() {
            *worker = Some(self.processor.spawn_worker());
        }
    }

    /// Stops the worker and closes the database. Queued mutations stay on disk.
    pub async fn shutdown(&self) {
        if let Some(worker) = self.worker.lock().await.take() {
            worker.shutdown().await;
        }
        if let Some(pool) = &self.pool {
            pool.close().await;
        }
        tracing::info!(target: "mutation_queue::runtime", "mutation runtime stopped");
    }

    pub fn client(&self) -> Arc<MutationClient> {
        Arc::clone(&self.client)
    }

    pub fn processor(&self) -> Arc<QueueProcessor> {
        Arc::clone(&self.processor)
    }

    pub fn store(&self) -> Arc<dyn MutationStore> {
        Arc::clone(&self.store)
    }

    pub fn cache(&self) -> Arc<MemoryQueryCache> {
        Arc::clone(&self.cache)
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.connectivity
    }

    /// Attempt counters for this process, shared by every runtime in it.
    pub fn metrics(&self) -> QueueMetricsSnapshot {
        metrics::snapshot()
    }
}
