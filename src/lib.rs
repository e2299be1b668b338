//! Offline-tolerant mutation queue.
//!
//! Writes are persisted to a local SQLite queue, reflected in the read cache
//! optimistically, and replayed against the remote table API in per-table FIFO
//! order once connectivity allows.

pub mod application;
pub mod domain;
pub mod infrastructure;
pub mod shared;
pub mod state;

pub use application::ports::mutation_store::{FailureReport, MutationStore};
pub use application::ports::query_cache::{CacheState, CachedQuery, QueryCache};
pub use application::ports::remote_data::{RemoteDataService, RemoteError, RemoteErrorKind};
pub use application::services::{
    MutationClient, MutationOptions, PassReport, QueueProcessor, QueueProcessorConfig,
    TableMutations, WorkerHandle,
};
pub use domain::entities::{
    MutationDraft, MutationOutcome, OptimisticResult, OptimisticUpdate, QueueStats, QueuedMutation,
};
pub use domain::value_objects::{
    ConflictKey, LeaseToken, MutationId, MutationKind, MutationStatus, QueryKey, RecordPayload,
    RetentionPolicy, RetryPolicy, RowFilters, TableName,
};
pub use infrastructure::cache::MemoryQueryCache;
pub use infrastructure::connectivity::ConnectivityMonitor;
pub use infrastructure::database::ConnectionPool;
pub use infrastructure::offline::SqliteMutationStore;
pub use infrastructure::offline::metrics::{AttemptOutcome, QueueMetricsSnapshot};
pub use infrastructure::remote::RestDataClient;
pub use shared::{AppConfig, AppError, Result};
pub use state::MutationRuntime;

/// Installs the global `tracing` subscriber; `RUST_LOG` overrides the default filter.
pub fn init_logging() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "mutation_queue=debug,info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .try_init();
}
