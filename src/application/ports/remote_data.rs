use crate::domain::value_objects::{ConflictKey, RecordPayload, RowFilters, TableName};
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemoteErrorKind {
    /// Timeout, unreachable network, 5xx, 408 or 429.
    Transient,
    /// The remote rejected the write; it will keep rejecting it.
    Permanent,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}")]
pub struct RemoteError {
    pub kind: RemoteErrorKind,
    pub status: Option<u16>,
    pub message: String,
}

impl RemoteError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::Transient,
            status: None,
            message: message.into(),
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            kind: RemoteErrorKind::Permanent,
            status: None,
            message: message.into(),
        }
    }

    pub fn timeout() -> Self {
        Self::transient("request timed out")
    }

    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        let kind = match status {
            408 | 429 => RemoteErrorKind::Transient,
            500..=599 => RemoteErrorKind::Transient,
            _ => RemoteErrorKind::Permanent,
        };
        let body = body.into();
        Self {
            kind,
            status: Some(status),
            message: if body.is_empty() {
                format!("remote returned status {status}")
            } else {
                format!("remote returned status {status}: {body}")
            },
        }
    }

    pub fn is_transient(&self) -> bool {
        self.kind == RemoteErrorKind::Transient
    }
}

/// Per-table write calls of the hosted data service.
#[async_trait]
pub trait RemoteDataService: Send + Sync {
    async fn insert(&self, table: &TableName, payload: &RecordPayload) -> Result<Value, RemoteError>;

    async fn update(
        &self,
        table: &TableName,
        filters: &RowFilters,
        payload: &RecordPayload,
    ) -> Result<Value, RemoteError>;

    async fn delete(&self, table: &TableName, filters: &RowFilters) -> Result<Value, RemoteError>;

    async fn upsert(
        &self,
        table: &TableName,
        payload: &RecordPayload,
        conflict_key: &ConflictKey,
    ) -> Result<Value, RemoteError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification() {
        assert!(RemoteError::from_status(503, "").is_transient());
        assert!(RemoteError::from_status(500, "boom").is_transient());
        assert!(RemoteError::from_status(429, "slow down").is_transient());
        assert!(RemoteError::from_status(408, "").is_transient());
        assert!(!RemoteError::from_status(400, "bad column").is_transient());
        assert!(!RemoteError::from_status(409, "duplicate key").is_transient());
        assert!(!RemoteError::from_status(403, "rls").is_transient());
        assert!(RemoteError::timeout().is_transient());
    }
}
