use super::is_identifier;
use serde::{Deserialize, Serialize};
use std::fmt;

const MAX_TABLE_NAME_LEN: usize = 63;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TableName(String);

impl TableName {
    pub fn new(value: impl Into<String>) -> Result<Self, String> {
        let value = value.into();
        Self::validate(&value)?;
        Ok(Self(value))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(value: &str) -> Result<(), String> {
        if value.is_empty() {
            return Err("Table name cannot be empty".to_string());
        }
        if value.len() > MAX_TABLE_NAME_LEN {
            return Err(format!(
                "Table name must be at most {MAX_TABLE_NAME_LEN} bytes"
            ));
        }
        if !is_identifier(value, &['_', '.', '-']) {
            return Err(format!("Table name `{value}` contains invalid characters"));
        }
        Ok(())
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<TableName> for String {
    fn from(value: TableName) -> Self {
        value.0
    }
}

impl TryFrom<&str> for TableName {
    type Error = String;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}
