use crate::domain::value_objects::{
    ConflictKey, MutationKind, QueryKey, RecordPayload, RowFilters,
};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// How a mutation patches the local read cache before the remote confirms it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum OptimisticUpdate {
    /// The cached value is a list of rows; apply the mutation's effect to it.
    ApplyToList { query_key: QueryKey },
    /// Replace the cached value outright.
    Replace { query_key: QueryKey, value: Value },
}

/// The parts of a mutation an optimistic patch needs.
#[derive(Debug, Clone, Copy)]
pub struct MutationEffect<'a> {
    pub kind: MutationKind,
    pub record: &'a Value,
    pub payload: &'a RecordPayload,
    pub filters: &'a RowFilters,
    pub conflict_key: Option<&'a ConflictKey>,
}

impl OptimisticUpdate {
    pub fn query_key(&self) -> &QueryKey {
        match self {
            OptimisticUpdate::ApplyToList { query_key } => query_key,
            OptimisticUpdate::Replace { query_key, .. } => query_key,
        }
    }

    /// Computes the optimistic view from the value currently cached under the key.
    pub fn patch(&self, current: Option<&Value>, effect: &MutationEffect<'_>) -> Value {
        match self {
            OptimisticUpdate::Replace { value, .. } => value.clone(),
            OptimisticUpdate::ApplyToList { .. } => match current {
                Some(row @ Value::Object(_)) => patch_single(row.clone(), effect),
                Some(Value::Array(rows)) => Value::Array(patch_rows(rows.clone(), effect)),
                _ => Value::Array(patch_rows(Vec::new(), effect)),
            },
        }
    }
}

fn patch_rows(mut rows: Vec<Value>, effect: &MutationEffect<'_>) -> Vec<Value> {
    match effect.kind {
        MutationKind::Insert => rows.push(effect.record.clone()),
        MutationKind::Update => {
            for row in rows.iter_mut().filter(|row| effect.filters.matches(row)) {
                merge_into(row, effect.payload.as_map());
            }
        }
        MutationKind::Delete => rows.retain(|row| !effect.filters.matches(row)),
        MutationKind::Upsert => {
            let mut collided = false;
            if let Some(key) = effect.conflict_key {
                for row in rows.iter_mut().filter(|row| key.collides(row, effect.record)) {
                    merge_into(row, effect.payload.as_map());
                    collided = true;
                }
            }
            if !collided {
                rows.push(effect.record.clone());
            }
        }
    }
    rows
}

// 詳細クエリ (単一行) 向け
fn patch_single(mut row: Value, effect: &MutationEffect<'_>) -> Value {
    match effect.kind {
        MutationKind::Update if effect.filters.matches(&row) => {
            merge_into(&mut row, effect.payload.as_map());
            row
        }
        MutationKind::Delete if effect.filters.matches(&row) => Value::Null,
        MutationKind::Upsert
            if effect
                .conflict_key
                .is_some_and(|key| key.collides(&row, effect.record)) =>
        {
            merge_into(&mut row, effect.payload.as_map());
            row
        }
        _ => row,
    }
}

fn merge_into(row: &mut Value, fields: &Map<String, Value>) {
    if let Value::Object(target) = row {
        for (column, value) in fields {
            target.insert(column.clone(), value.clone());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn list_update() -> OptimisticUpdate {
        OptimisticUpdate::ApplyToList {
            query_key: QueryKey::new(["clients"]).unwrap(),
        }
    }

    #[test]
    fn insert_appends_the_optimistic_record() {
        let payload = RecordPayload::new(json!({"name": "x"})).unwrap();
        let record = json!({"id": "temp_1", "name": "x"});
        let filters = RowFilters::empty();
        let effect = MutationEffect {
            kind: MutationKind::Insert,
            record: &record,
            payload: &payload,
            filters: &filters,
            conflict_key: None,
        };

        let patched = list_update().patch(Some(&json!([{"id": 1, "name": "a"}])), &effect);
        assert_eq!(patched, json!([{"id": 1, "name": "a"}, {"id": "temp_1", "name": "x"}]));

        let from_empty = list_update().patch(None, &effect);
        assert_eq!(from_empty, json!([{"id": "temp_1", "name": "x"}]));
    }

    #[test]
    fn update_merges_only_matching_rows() {
        let payload = RecordPayload::new(json!({"status": "active"})).unwrap();
        let record = payload.to_value();
        let filters = RowFilters::eq("id", 2).unwrap();
        let effect = MutationEffect {
            kind: MutationKind::Update,
            record: &record,
            payload: &payload,
            filters: &filters,
            conflict_key: None,
        };

        let current = json!([{"id": 1, "status": "paused"}, {"id": 2, "status": "paused"}]);
        let patched = list_update().patch(Some(&current), &effect);
        assert_eq!(
            patched,
            json!([{"id": 1, "status": "paused"}, {"id": 2, "status": "active"}])
        );
    }

    #[test]
    fn delete_removes_matching_rows_and_single_rows() {
        let payload = RecordPayload::empty();
        let record = Value::Null;
        let filters = RowFilters::eq("id", 1).unwrap();
        let effect = MutationEffect {
            kind: MutationKind::Delete,
            record: &record,
            payload: &payload,
            filters: &filters,
            conflict_key: None,
        };

        let patched = list_update().patch(Some(&json!([{"id": 1}, {"id": 2}])), &effect);
        assert_eq!(patched, json!([{"id": 2}]));

        let detail = list_update().patch(Some(&json!({"id": 1})), &effect);
        assert_eq!(detail, Value::Null);
    }

    #[test]
    fn upsert_replaces_colliding_row_or_appends() {
        let key = ConflictKey::new(["client_id", "date"]).unwrap();
        let payload =
            RecordPayload::new(json!({"client_id": 1, "date": "2024-03-01", "steps": 99})).unwrap();
        let record = payload.to_value();
        let filters = RowFilters::empty();
        let effect = MutationEffect {
            kind: MutationKind::Upsert,
            record: &record,
            payload: &payload,
            filters: &filters,
            conflict_key: Some(&key),
        };

        let current = json!([{"client_id": 1, "date": "2024-03-01", "steps": 10}]);
        let patched = list_update().patch(Some(&current), &effect);
        assert_eq!(patched, json!([{"client_id": 1, "date": "2024-03-01", "steps": 99}]));

        let other_day = json!([{"client_id": 1, "date": "2024-02-28", "steps": 5}]);
        let patched = list_update().patch(Some(&other_day), &effect);
        assert_eq!(patched.as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn replace_ignores_current_value() {
        let update = OptimisticUpdate::Replace {
            query_key: QueryKey::new(["profile"]).unwrap(),
            value: json!({"name": "new"}),
        };
        let payload = RecordPayload::empty();
        let filters = RowFilters::empty();
        let effect = MutationEffect {
            kind: MutationKind::Update,
            record: &Value::Null,
            payload: &payload,
            filters: &filters,
            conflict_key: None,
        };
        assert_eq!(update.patch(Some(&json!({"name": "old"})), &effect), json!({"name": "new"}));
    }
}
