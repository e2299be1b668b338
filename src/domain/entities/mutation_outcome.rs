use crate::domain::value_objects::{MutationId, MutationKind, TableName};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Locally synthesized result returned as soon as a mutation is queued.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OptimisticResult {
    pub mutation_id: MutationId,
    pub table: TableName,
    pub kind: MutationKind,
    pub record: Value,
    pub temp_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum MutationOutcome {
    /// Persisted to the queue; the remote call happens later.
    Queued(OptimisticResult),
    /// The queue was unavailable and the remote call was made directly.
    Applied {
        table: TableName,
        kind: MutationKind,
        record: Value,
    },
}

impl MutationOutcome {
    pub fn record(&self) -> &Value {
        match self {
            MutationOutcome::Queued(result) => &result.record,
            MutationOutcome::Applied { record, .. } => record,
        }
    }

    pub fn mutation_id(&self) -> Option<&MutationId> {
        match self {
            MutationOutcome::Queued(result) => Some(&result.mutation_id),
            MutationOutcome::Applied { .. } => None,
        }
    }

    pub fn is_confirmed(&self) -> bool {
        matches!(self, MutationOutcome::Applied { .. })
    }
}
