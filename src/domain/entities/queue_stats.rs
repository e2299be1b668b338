use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueStats {
    pub pending: u64,
    pub processing: u64,
    pub completed: u64,
    pub failed: u64,
    pub total: u64,
}

impl QueueStats {
    pub fn from_counts(pending: u64, processing: u64, completed: u64, failed: u64) -> Self {
        Self {
            pending,
            processing,
            completed,
            failed,
            total: pending + processing + completed + failed,
        }
    }

    /// Writes the user has made that the remote has not confirmed yet.
    pub fn outstanding(&self) -> u64 {
        self.pending + self.processing
    }

    pub fn needs_attention(&self) -> bool {
        self.failed > 0
    }
}
