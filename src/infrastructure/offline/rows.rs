use serde::{Deserialize, Serialize};
use sqlx::FromRow;

#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct MutationRow {
    pub seq: i64,
    pub id: String,
    pub kind: String,
    pub table_name: String,
    pub payload: String,
    pub filters: String,
    pub conflict_key: Option<String>,
    pub status: String,
    pub attempts: i64,
    pub max_retries: i64,
    pub created_at: i64,
    pub updated_at: i64,
    pub next_attempt_at: Option<i64>,
    pub completed_at: Option<i64>,
    pub last_error: Option<String>,
    pub lease_token: Option<String>,
    pub lease_expires_at: Option<i64>,
    pub invalidate_queries: String,
    pub optimistic_update: Option<String>,
}

#[derive(Debug, Clone, FromRow)]
pub struct StatusCountRow {
    pub status: String,
    pub count: i64,
}
