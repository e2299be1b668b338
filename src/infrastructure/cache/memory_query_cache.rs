use crate::application::ports::query_cache::{CacheState, CachedQuery, PatchFn, QueryCache};
use crate::domain::value_objects::{MutationId, QueryKey};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{RwLock, broadcast};

const EVENT_CAPACITY: usize = 64;

/// Emitted whenever a prefix is invalidated, so readers can refetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidationEvent {
    pub prefix: QueryKey,
    pub dropped: usize,
}

struct CacheEntry {
    confirmed: Option<Value>,
    // 各ミューテーション適用後のビュー (適用順)
    layers: Vec<(MutationId, Value)>,
    expires_at: Instant,
}

impl CacheEntry {
    fn view(&self) -> Option<&Value> {
        self.layers
            .last()
            .map(|(_, value)| value)
            .or(self.confirmed.as_ref())
    }

    /// Optimistic entries stay until their mutations resolve.
    fn is_live(&self, now: Instant) -> bool {
        !self.layers.is_empty() || self.expires_at > now
    }

    fn snapshot(&self) -> Option<CachedQuery> {
        let value = self.view()?.clone();
        let state = if self.layers.is_empty() {
            CacheState::Confirmed
        } else {
            CacheState::OptimisticPending {
                pending: self.layers.iter().map(|(id, _)| id.clone()).collect(),
            }
        };
        Some(CachedQuery { value, state })
    }
}

/// メモリ上のクエリキャッシュ
pub struct MemoryQueryCache {
    entries: Arc<RwLock<HashMap<QueryKey, CacheEntry>>>,
    invalidations: Arc<RwLock<HashMap<QueryKey, usize>>>,
    events: broadcast::Sender<InvalidationEvent>,
    default_ttl: Duration,
}

impl MemoryQueryCache {
    pub fn new(default_ttl_seconds: u64) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            entries: Arc::new(RwLock::new(HashMap::new())),
            invalidations: Arc::new(RwLock::new(HashMap::new())),
            events,
            default_ttl: Duration::from_secs(default_ttl_seconds),
        }
    }

    /// How many times `prefix` has been passed to `invalidate`.
    pub async fn invalidation_count(&self, prefix: &QueryKey) -> usize {
        self.invalidations
            .read()
            .await
            .get(prefix)
            .copied()
            .unwrap_or(0)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<InvalidationEvent> {
        self.events.subscribe()
    }

    pub async fn cleanup_expired(&self) {
        let now = Instant::now();
        self.entries.write().await.retain(|_, entry| entry.is_live(now));
    }

    pub async fn size(&self) -> usize {
        self.entries.read().await.len()
    }
}

#[async_trait]
impl QueryCache for MemoryQueryCache {
    async fn get(&self, key: &QueryKey) -> Option<CachedQuery> {
        let entries = self.entries.read().await;
        let entry = entries.get(key)?;
        if !entry.is_live(Instant::now()) {
            return None;
        }
        entry.snapshot()
    }

    async fn set_confirmed(&self, key: QueryKey, value: Value) {
        let entry = CacheEntry {
            confirmed: Some(value),
            layers: Vec::new(),
            expires_at: Instant::now() + self.default_ttl,
        };
        self.entries.write().await.insert(key, entry);
    }

    async fn apply_optimistic(&self, key: &QueryKey, mutation_id: &MutationId, patch: PatchFn<'_>) {
        let now = Instant::now();
        let mut entries = self.entries.write().await;
        let entry = entries.entry(key.clone()).or_insert_with(|| CacheEntry {
            confirmed: None,
            layers: Vec::new(),
            expires_at: now,
        });
        if !entry.is_live(now) {
            entry.confirmed = None;
        }

        let next = patch(entry.view());
        entry.layers.push((mutation_id.clone(), next));
    }

    async fn rollback(&self, key: &QueryKey, mutation_id: &MutationId) {
        let mut entries = self.entries.write().await;
        let Some(entry) = entries.get_mut(key) else {
            return;
        };
        let Some(position) = entry.layers.iter().position(|(id, _)| id == mutation_id) else {
            return;
        };

        if position + 1 == entry.layers.len() {
            entry.layers.pop();
            if entry.layers.is_empty() && entry.confirmed.is_none() {
                entries.remove(key);
            }
        } else {
            // 後続の楽観ビューは再計算できないため破棄して再取得させる
            tracing::debug!(
                target: "mutation_queue::facade",
                query_key = %key,
                mutation_id = %mutation_id,
                "dropping optimistic view stacked on a rolled back mutation"
            );
            entries.remove(key);
        }
    }

    async fn invalidate(&self, prefix: &QueryKey) -> usize {
        let dropped = {
            let mut entries = self.entries.write().await;
            let before = entries.len();
            entries.retain(|key, _| !key.starts_with(prefix));
            before - entries.len()
        };

        *self
            .invalidations
            .write()
            .await
            .entry(prefix.clone())
            .or_insert(0) += 1;

        let _ = self.events.send(InvalidationEvent {
            prefix: prefix.clone(),
            dropped,
        });
        dropped
    }
}
