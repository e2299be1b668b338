use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MutationKind {
    Insert,
    Update,
    Delete,
    Upsert,
}

impl MutationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            MutationKind::Insert => "insert",
            MutationKind::Update => "update",
            MutationKind::Delete => "delete",
            MutationKind::Upsert => "upsert",
        }
    }

    pub fn requires_filters(&self) -> bool {
        matches!(self, MutationKind::Update | MutationKind::Delete)
    }

    pub fn requires_payload(&self) -> bool {
        !matches!(self, MutationKind::Delete)
    }
}

impl fmt::Display for MutationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<&str> for MutationKind {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "insert" => Ok(MutationKind::Insert),
            "update" => Ok(MutationKind::Update),
            "delete" => Ok(MutationKind::Delete),
            "upsert" => Ok(MutationKind::Upsert),
            other => Err(format!("Unknown mutation kind: {other}")),
        }
    }
}
