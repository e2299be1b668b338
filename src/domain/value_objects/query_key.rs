use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of a cached read query, e.g. `["clients", "coach-42"]`.
///
/// Invalidation works on segment prefixes: `["clients"]` covers every key that starts with it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueryKey(Vec<String>);

impl QueryKey {
    pub fn new<I, S>(segments: I) -> Result<Self, String>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments.is_empty() {
            return Err("Query key requires at least one segment".to_string());
        }
        if segments.iter().any(|segment| segment.is_empty()) {
            return Err("Query key segments cannot be empty".to_string());
        }
        Ok(Self(segments))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn starts_with(&self, prefix: &QueryKey) -> bool {
        self.0.starts_with(&prefix.0)
    }
}

impl fmt::Display for QueryKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join(":"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prefix_matching_is_segment_based() {
        let list = QueryKey::new(["clients"]).unwrap();
        let detail = QueryKey::new(["clients", "42"]).unwrap();
        let other = QueryKey::new(["clients_archive"]).unwrap();

        assert!(detail.starts_with(&list));
        assert!(!other.starts_with(&list));
        assert!(!list.starts_with(&detail));
        assert_eq!(detail.to_string(), "clients:42");
    }

    #[test]
    fn rejects_empty_keys() {
        assert!(QueryKey::new(Vec::<String>::new()).is_err());
        assert!(QueryKey::new(["clients", ""]).is_err());
    }
}
