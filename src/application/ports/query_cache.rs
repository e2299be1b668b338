use crate::domain::value_objects::{MutationId, QueryKey};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum CacheState {
    /// Last authoritative fetch.
    Confirmed,
    /// Local guess layered over the confirmed value by unconfirmed mutations.
    OptimisticPending { pending: Vec<MutationId> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CachedQuery {
    pub value: Value,
    pub state: CacheState,
}

impl CachedQuery {
    pub fn is_optimistic(&self) -> bool {
        matches!(self.state, CacheState::OptimisticPending { .. })
    }
}

pub type PatchFn<'a> = &'a (dyn Fn(Option<&Value>) -> Value + Send + Sync);

/// Local read cache the facade patches optimistically and the processor invalidates.
#[async_trait]
pub trait QueryCache: Send + Sync {
    async fn get(&self, key: &QueryKey) -> Option<CachedQuery>;

    /// Stores an authoritative value, discarding any optimistic view.
    async fn set_confirmed(&self, key: QueryKey, value: Value);

    async fn apply_optimistic(&self, key: &QueryKey, mutation_id: &MutationId, patch: PatchFn<'_>);

    /// Withdraws `mutation_id`'s optimistic view under `key`.
    async fn rollback(&self, key: &QueryKey, mutation_id: &MutationId);

    /// Drops every entry whose key starts with `prefix`; returns how many were dropped.
    async fn invalidate(&self, prefix: &QueryKey) -> usize;
}
