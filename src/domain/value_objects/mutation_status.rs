use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl MutationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationStatus::Pending => "pending",
            MutationStatus::Processing => "processing",
            MutationStatus::Completed => "completed",
            MutationStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, MutationStatus::Completed | MutationStatus::Failed)
    }
}

impl fmt::Display for MutationStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for MutationStatus {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "pending" => Ok(MutationStatus::Pending),
            "processing" => Ok(MutationStatus::Processing),
            "completed" => Ok(MutationStatus::Completed),
            "failed" => Ok(MutationStatus::Failed),
            other => Err(format!("Unknown mutation status: {other}")),
        }
    }
}
