mod common;

use common::{RecordingRemote, immediate_retry_config, setup, setup_with, table, wait_for_status};
use mutation_queue::{
    MutationDraft, MutationOptions, MutationOutcome, MutationStatus, MutationStore,
    OptimisticUpdate, QueryCache, QueryKey, RecordPayload, RemoteError, RowFilters,
};
use serde_json::json;
use std::time::Duration;

fn clients_key() -> QueryKey {
    QueryKey::new(["clients"]).expect("query key")
}

#[tokio::test]
async fn insert_completes_on_first_attempt_and_invalidates_once() {
    let ctx = setup(true).await;
    let key = clients_key();
    ctx.cache.set_confirmed(key.clone(), json!([])).await;

    let client = ctx.runtime.client();
    let outcome = client
        .table("T")
        .expect("table")
        .insert(
            json!({"name": "x"}),
            MutationOptions::new()
                .invalidate(key.clone())
                .optimistic(OptimisticUpdate::ApplyToList {
                    query_key: key.clone(),
                }),
        )
        .await
        .expect("insert");
    let id = outcome.mutation_id().cloned().expect("queued");

    let report = ctx.runtime.processor().process_queue().await.expect("pass");
    assert_eq!(report.completed, 1);

    let stats = ctx.store.stats().await.expect("stats");
    assert_eq!(stats.completed, 1);
    assert_eq!(stats.total, 1);
    assert_eq!(
        ctx.store.get(&id).await.unwrap().unwrap().status,
        MutationStatus::Completed
    );
    assert_eq!(ctx.cache.invalidation_count(&key).await, 1);
    assert!(ctx.cache.get(&key).await.is_none());

    let calls = ctx.remote.calls();
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].operation, "insert");
    assert_eq!(calls[0].table, "T");
    assert_eq!(calls[0].body, json!({"name": "x"}));

    // 2 回目のパスでは何も起きない
    ctx.runtime.processor().process_queue().await.expect("pass");
    assert_eq!(ctx.remote.calls().len(), 1);
    assert_eq!(ctx.cache.invalidation_count(&key).await, 1);
}

#[tokio::test]
async fn exhausted_transient_failures_end_in_failed() {
    let ctx = setup(true).await;
    ctx.remote.fail_next([
        RemoteError::from_status(503, "unavailable"),
        RemoteError::timeout(),
        RemoteError::transient("connection reset"),
    ]);

    let client = ctx.runtime.client();
    let outcome = client
        .table("clients")
        .expect("table")
        .update(
            RowFilters::eq("id", 1).expect("filters"),
            json!({"status": "active"}),
            MutationOptions::new().max_retries(3),
        )
        .await
        .expect("update");
    let id = outcome.mutation_id().cloned().expect("queued");

    let before = ctx.runtime.metrics();
    let processor = ctx.runtime.processor();
    for _ in 0..5 {
        processor.process_queue().await.expect("pass");
    }

    let entry = ctx.store.get(&id).await.unwrap().unwrap();
    assert_eq!(entry.status, MutationStatus::Failed);
    assert_eq!(entry.attempts, 3);
    assert_eq!(entry.last_error.as_deref(), Some("connection reset"));
    assert_eq!(ctx.remote.calls().len(), 3);

    // カウンタはプロセス全体で共有されるので差分だけ見る
    let after = ctx.runtime.metrics();
    assert!(after.total_failure >= before.total_failure + 3);
    assert!(after.total_passes >= before.total_passes + 5);

    let stats = ctx.store.stats().await.unwrap();
    assert_eq!(stats.failed, 1);
    assert!(stats.needs_attention());
}

#[tokio::test]
async fn reconnect_drains_queue_without_user_action() {
    let ctx = setup(false).await;
    ctx.runtime.start().await;

    let client = ctx.runtime.client();
    let outcome = client
        .table("clients")
        .expect("table")
        .insert(json!({"name": "offline"}), MutationOptions::new())
        .await
        .expect("insert");
    let id = outcome.mutation_id().cloned().expect("queued");

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(
        ctx.store.get(&id).await.unwrap().unwrap().status,
        MutationStatus::Pending
    );
    assert!(ctx.remote.calls().is_empty());

    ctx.connectivity().set_online(true);
    assert!(wait_for_status(ctx.store.as_ref(), &id, MutationStatus::Completed).await);
    assert_eq!(ctx.remote.calls().len(), 1);

    ctx.runtime.shutdown().await;
}

#[tokio::test]
async fn same_table_updates_are_serialized() {
    let ctx = setup_with(
        true,
        RecordingRemote::with_latency(Duration::from_millis(30)),
        immediate_retry_config(),
    )
    .await;

    let client = ctx.runtime.client();
    let table = client.table("clients").expect("table");
    for label in ["U1", "U2"] {
        table
            .update(
                RowFilters::eq("id", 1).expect("filters"),
                json!({"label": label}),
                MutationOptions::new(),
            )
            .await
            .expect("update");
    }

    // 同時に 2 パス走らせても順序は崩れない
    let processor = ctx.runtime.processor();
    let (first, second) = tokio::join!(processor.process_queue(), processor.process_queue());
    first.expect("pass");
    second.expect("pass");
    processor.process_queue().await.expect("pass");

    assert_eq!(
        ctx.remote.events(),
        vec!["begin:U1", "end:U1", "begin:U2", "end:U2"]
    );
}

#[tokio::test]
async fn transient_failure_keeps_later_entries_waiting() {
    let ctx = setup(true).await;
    ctx.remote
        .fail_next([RemoteError::from_status(502, "bad gateway")]);

    for label in ["A", "B", "C"] {
        ctx.store
            .enqueue(MutationDraft::insert(
                table("clients"),
                RecordPayload::new(json!({"label": label})).unwrap(),
            ))
            .await
            .unwrap();
    }

    let processor = ctx.runtime.processor();
    let report = processor.process_queue().await.unwrap();
    assert_eq!(report.rescheduled, 1);
    assert_eq!(report.completed, 0);

    let report = processor.process_queue().await.unwrap();
    assert_eq!(report.completed, 3);

    assert_eq!(
        ctx.remote.events(),
        vec!["begin:A", "end:A", "begin:A", "end:A", "begin:B", "end:B", "begin:C", "end:C"]
    );
}

#[tokio::test]
async fn permanent_failure_rolls_back_optimistic_row() {
    let ctx = setup(true).await;
    ctx.remote
        .fail_next([RemoteError::from_status(409, "duplicate key value")]);
    let key = clients_key();
    ctx.cache.set_confirmed(key.clone(), json!([{"id": 1, "name": "a"}])).await;

    let client = ctx.runtime.client();
    let outcome = client
        .table("clients")
        .unwrap()
        .insert(
            json!({"name": "b"}),
            MutationOptions::new().optimistic(OptimisticUpdate::ApplyToList {
                query_key: key.clone(),
            }),
        )
        .await
        .unwrap();
    assert_eq!(
        ctx.cache.get(&key).await.unwrap().value.as_array().map(Vec::len),
        Some(2)
    );

    let report = ctx.runtime.processor().process_queue().await.unwrap();
    assert_eq!(report.failed, 1);

    let entry = ctx
        .store
        .get(outcome.mutation_id().unwrap())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(entry.status, MutationStatus::Failed);
    assert_eq!(entry.attempts, 1);

    let cached = ctx.cache.get(&key).await.unwrap();
    assert!(!cached.is_optimistic());
    assert_eq!(cached.value, json!([{"id": 1, "name": "a"}]));
}

#[tokio::test]
async fn retry_failed_requeues_for_the_next_pass() {
    let ctx = setup(true).await;
    ctx.remote
        .fail_next([RemoteError::from_status(400, "bad request")]);

    let client = ctx.runtime.client();
    let outcome = client
        .table("clients")
        .unwrap()
        .remove(RowFilters::eq("id", 5).unwrap(), MutationOptions::new())
        .await
        .unwrap();
    let id = outcome.mutation_id().cloned().unwrap();

    let processor = ctx.runtime.processor();
    processor.process_queue().await.unwrap();
    assert_eq!(
        ctx.store.get(&id).await.unwrap().unwrap().status,
        MutationStatus::Failed
    );

    assert_eq!(ctx.store.retry_failed().await.unwrap(), 1);
    processor.process_queue().await.unwrap();

    let entry = ctx.store.get(&id).await.unwrap().unwrap();
    assert_eq!(entry.status, MutationStatus::Completed);
    assert_eq!(ctx.remote.calls().len(), 2);
    assert_eq!(ctx.remote.calls()[1].operation, "delete");
}

#[tokio::test]
async fn slow_remote_times_out_as_transient() {
    let mut config = immediate_retry_config();
    config.request_timeout = Duration::from_millis(20);
    let ctx = setup_with(
        true,
        RecordingRemote::with_latency(Duration::from_millis(200)),
        config,
    )
    .await;

    let id = ctx
        .store
        .enqueue(MutationDraft::insert(
            table("clients"),
            RecordPayload::new(json!({"name": "slow"})).unwrap(),
        ))
        .await
        .unwrap();

    let report = ctx.runtime.processor().process_queue().await.unwrap();
    assert_eq!(report.rescheduled, 1);

    let entry = ctx.store.get(&id).await.unwrap().unwrap();
    assert_eq!(entry.status, MutationStatus::Pending);
    assert_eq!(entry.attempts, 1);
    assert_eq!(entry.last_error.as_deref(), Some("request timed out"));
}

#[tokio::test]
async fn queued_outcome_is_returned_while_offline() {
    let ctx = setup(false).await;

    let outcome = ctx
        .runtime
        .client()
        .table("check_ins")
        .unwrap()
        .upsert(
            json!({"client_id": 1, "date": "2024-03-01", "steps": 9000}),
            mutation_queue::ConflictKey::new(["client_id", "date"]).unwrap(),
            MutationOptions::new(),
        )
        .await
        .unwrap();

    assert!(matches!(outcome, MutationOutcome::Queued(_)));
    assert!(!outcome.is_confirmed());
    assert_eq!(outcome.record()["steps"], json!(9000));

    let report = ctx.runtime.processor().process_queue().await.unwrap();
    assert!(report.offline);
    assert_eq!(ctx.store.stats().await.unwrap().pending, 1);
}
