use super::is_identifier;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Equality predicates (`column = value`) selecting the rows an update or delete targets.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RowFilters(BTreeMap<String, Value>);

impl RowFilters {
    pub fn new(filters: BTreeMap<String, Value>) -> Result<Self, String> {
        for (column, value) in &filters {
            Self::validate_column(column)?;
            if value.is_array() || value.is_object() {
                return Err(format!(
                    "Filter on `{column}` must compare against a scalar value"
                ));
            }
        }
        Ok(Self(filters))
    }

    pub fn empty() -> Self {
        Self(BTreeMap::new())
    }

    pub fn eq(column: impl Into<String>, value: impl Into<Value>) -> Result<Self, String> {
        Self::empty().and(column, value)
    }

    pub fn and(mut self, column: impl Into<String>, value: impl Into<Value>) -> Result<Self, String> {
        let column = column.into();
        let value = value.into();
        Self::validate_column(&column)?;
        if value.is_array() || value.is_object() {
            return Err(format!(
                "Filter on `{column}` must compare against a scalar value"
            ));
        }
        self.0.insert(column, value);
        Ok(self)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Value)> {
        self.0.iter()
    }

    /// Whether `row` (a JSON object) satisfies every predicate.
    pub fn matches(&self, row: &Value) -> bool {
        let Some(fields) = row.as_object() else {
            return false;
        };
        self.0.iter().all(|(column, expected)| {
            fields
                .get(column)
                .map(|actual| scalar_eq(actual, expected))
                .unwrap_or(expected.is_null())
        })
    }

    fn validate_column(column: &str) -> Result<(), String> {
        if !is_identifier(column, &['_']) {
            return Err(format!("Invalid filter column `{column}`"));
        }
        Ok(())
    }
}

// 1 と 1.0 を同一視する
fn scalar_eq(actual: &Value, expected: &Value) -> bool {
    match (actual, expected) {
        (Value::Number(a), Value::Number(b)) => a.as_f64() == b.as_f64(),
        _ => actual == expected,
    }
}
