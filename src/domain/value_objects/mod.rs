pub mod conflict_key;
pub mod lease_token;
pub mod mutation_id;
pub mod mutation_kind;
pub mod mutation_status;
pub mod query_key;
pub mod record_payload;
pub mod retention_policy;
pub mod retry_policy;
pub mod row_filters;
pub mod table_name;

pub use conflict_key::ConflictKey;
pub use lease_token::LeaseToken;
pub use mutation_id::MutationId;
pub use mutation_kind::MutationKind;
pub use mutation_status::MutationStatus;
pub use query_key::QueryKey;
pub use record_payload::RecordPayload;
pub use retention_policy::RetentionPolicy;
pub use retry_policy::RetryPolicy;
pub use row_filters::RowFilters;
pub use table_name::TableName;

/// ASCII letters, digits and the given extra characters; must not start with a digit.
pub(crate) fn is_identifier(value: &str, extra: &[char]) -> bool {
    let mut chars = value.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || extra.contains(&c))
}
