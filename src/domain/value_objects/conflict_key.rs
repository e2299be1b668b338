use super::is_identifier;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Column set an upsert uses to decide between insert and update.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictKey(Vec<String>);

impl ConflictKey {
    pub fn new<I, S>(columns: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let columns: Vec<String> = columns.into_iter().map(Into::into).collect();
        if columns.is_empty() {
            return Err("Conflict key requires at least one column".to_string());
        }
        for (index, column) in columns.iter().enumerate() {
            if !is_identifier(column, &['_']) {
                return Err(format!("Invalid conflict key column `{column}`"));
            }
            if columns[..index].contains(column) {
                return Err(format!("Duplicate conflict key column `{column}`"));
            }
        }
        Ok(Self(columns))
    }

    pub fn columns(&self) -> &[String] {
        &self.0
    }

    /// PostgREST `on_conflict` form: `a,b`.
    pub fn to_csv(&self) -> String {
        self.0.join(",")
    }

    /// Two rows collide when every key column is present in both and equal.
    pub fn collides(&self, left: &Value, right: &Value) -> bool {
        self.0.iter().all(|column| match (left.get(column), right.get(column)) {
            (Some(a), Some(b)) => a == b,
            _ => false,
        })
    }
}
