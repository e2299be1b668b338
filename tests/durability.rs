mod common;

use common::{RecordingRemote, build_context, file_pool, immediate_retry_config, table};
use mutation_queue::{
    AppConfig, MutationDraft, MutationOptions, MutationRuntime, MutationStatus, MutationStore,
    RecordPayload, SqliteMutationStore,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

#[tokio::test]
async fn pending_mutations_survive_a_restart() {
    let dir = tempfile::tempdir().expect("tempdir");

    let id = {
        let ctx = build_context(
            file_pool(&dir).await,
            false,
            RecordingRemote::new(),
            immediate_retry_config(),
        );
        let outcome = ctx
            .runtime
            .client()
            .table("clients")
            .unwrap()
            .insert(json!({"name": "before restart"}), MutationOptions::new())
            .await
            .unwrap();
        let id = outcome.mutation_id().cloned().unwrap();
        ctx.pool.close().await;
        id
    };

    let ctx = build_context(
        file_pool(&dir).await,
        true,
        RecordingRemote::new(),
        immediate_retry_config(),
    );
    let restored = ctx.store.get(&id).await.unwrap().expect("persisted");
    assert_eq!(restored.status, MutationStatus::Pending);
    assert_eq!(restored.payload.get("name"), Some(&json!("before restart")));

    let report = ctx.runtime.processor().process_queue().await.unwrap();
    assert_eq!(report.completed, 1);
    assert_eq!(ctx.remote.calls().len(), 1);
    ctx.pool.close().await;
}

#[tokio::test]
async fn interrupted_processing_is_released_after_restart() {
    let dir = tempfile::tempdir().expect("tempdir");

    let id = {
        let pool = file_pool(&dir).await;
        let store = SqliteMutationStore::new(pool.get_pool().clone());
        let id = store
            .enqueue(MutationDraft::insert(
                table("clients"),
                RecordPayload::new(json!({"name": "crashed"})).unwrap(),
            ))
            .await
            .unwrap();
        // 処理中のままプロセスが落ちたことを再現する
        store.mark_processing(&id, Duration::ZERO).await.unwrap();
        pool.close().await;
        id
    };

    let ctx = build_context(
        file_pool(&dir).await,
        true,
        RecordingRemote::new(),
        immediate_retry_config(),
    );
    let report = ctx.runtime.processor().process_queue().await.unwrap();

    assert_eq!(report.released_leases, 1);
    assert_eq!(report.completed, 1);
    let entry = ctx.store.get(&id).await.unwrap().unwrap();
    assert_eq!(entry.status, MutationStatus::Completed);
    assert_eq!(entry.attempts, 0);
    ctx.pool.close().await;
}

#[tokio::test]
async fn concurrent_claims_from_two_processes_have_one_winner() {
    let dir = tempfile::tempdir().expect("tempdir");
    let first_pool = file_pool(&dir).await;
    let second_pool = file_pool(&dir).await;
    let first = Arc::new(SqliteMutationStore::new(first_pool.get_pool().clone()));
    let second = Arc::new(SqliteMutationStore::new(second_pool.get_pool().clone()));

    let mut ids = Vec::new();
    for index in 0..10 {
        ids.push(
            first
                .enqueue(MutationDraft::insert(
                    table("clients"),
                    RecordPayload::new(json!({"index": index})).unwrap(),
                ))
                .await
                .unwrap(),
        );
    }

    for id in ids {
        let (a, b) = tokio::join!(
            first.mark_processing(&id, Duration::from_secs(60)),
            second.mark_processing(&id, Duration::from_secs(60)),
        );
        let winners = [a.unwrap(), b.unwrap()]
            .into_iter()
            .filter(Option::is_some)
            .count();
        assert_eq!(winners, 1);
    }

    assert_eq!(second.stats().await.unwrap().processing, 10);
    first_pool.close().await;
    second_pool.close().await;
}

#[tokio::test]
async fn runtime_init_applies_migrations_and_shuts_down() {
    let dir = tempfile::tempdir().expect("tempdir");
    let mut config = AppConfig::default();
    config.database.url = format!(
        "sqlite:{}?mode=rwc",
        dir.path().join("nested").join("queue.db").display()
    );
    config.remote.base_url = "http://127.0.0.1:9".to_string();
    config.queue.start_online = false;

    let runtime = MutationRuntime::init(config).await.expect("runtime");
    let outcome = runtime
        .client()
        .table("clients")
        .unwrap()
        .insert(json!({"name": "x"}), MutationOptions::new())
        .await
        .unwrap();
    assert!(outcome.mutation_id().is_some());

    let stats = runtime.store().stats().await.unwrap();
    assert_eq!(stats.pending, 1);
    assert_eq!(stats.total, 1);

    runtime.shutdown().await;
    assert!(dir.path().join("nested").join("queue.db").exists());
}

#[tokio::test]
async fn runtime_init_rejects_invalid_config() {
    let mut config = AppConfig::default();
    config.queue.max_retries = 0;

    let err = MutationRuntime::init(config).await.err().expect("invalid config");
    assert!(matches!(err, mutation_queue::AppError::ConfigurationError(_)));
}
