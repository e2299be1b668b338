use crate::application::ports::remote_data::{RemoteDataService, RemoteError};
use crate::domain::value_objects::{ConflictKey, RecordPayload, RowFilters, TableName};
use crate::shared::config::RemoteConfig;
use crate::shared::error::AppError;
use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::Value;

const RETURN_REPRESENTATION: &str = "return=representation";
const MERGE_DUPLICATES: &str = "resolution=merge-duplicates,return=representation";

impl RemoteError {
    /// Network-level failures are transient; anything that reached the server is classified by status.
    pub fn from_reqwest(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            return Self::timeout();
        }
        if let Some(status) = err.status() {
            return Self::from_status(status.as_u16(), err.to_string());
        }
        if err.is_connect() || err.is_request() || err.is_body() {
            return Self::transient(err.to_string());
        }
        if err.is_decode() || err.is_builder() {
            return Self::permanent(err.to_string());
        }
        Self::transient(err.to_string())
    }
}

/// PostgREST-style client for the hosted table API.
#[derive(Clone)]
pub struct RestDataClient {
    base_url: String,
    api_key: Option<String>,
    access_token: Option<String>,
    http: reqwest::Client,
}

impl RestDataClient {
    pub fn new(config: &RemoteConfig) -> Result<Self, AppError> {
        let trimmed = config.base_url.trim();
        if trimmed.is_empty() {
            return Err(AppError::ConfigurationError(
                "remote base_url is empty".to_string(),
            ));
        }

        let http = reqwest::Client::builder()
            .timeout(config.request_timeout())
            .build()
            .map_err(|err| AppError::ConfigurationError(err.to_string()))?;

        Ok(Self {
            base_url: trimmed.trim_end_matches('/').to_string(),
            api_key: config.api_key.clone().filter(|key| !key.trim().is_empty()),
            access_token: config
                .access_token
                .clone()
                .filter(|token| !token.trim().is_empty()),
            http,
        })
    }

    fn request(&self, method: Method, table: &TableName) -> reqwest::RequestBuilder {
        let url = format!("{}/rest/v1/{}", self.base_url, table.as_str());
        let mut builder = self.http.request(method, url);
        if let Some(key) = &self.api_key {
            builder = builder.header("apikey", key);
        }
        // ユーザートークンがなければ API キーで認可する
        if let Some(token) = self.access_token.as_ref().or(self.api_key.as_ref()) {
            builder = builder.header("Authorization", format!("Bearer {token}"));
        }
        builder
    }

    async fn send(&self, builder: reqwest::RequestBuilder) -> Result<Value, RemoteError> {
        let resp = builder
            .send()
            .await
            .map_err(|err| RemoteError::from_reqwest(&err))?;
        let status = resp.status();
        let body = resp
            .text()
            .await
            .map_err(|err| RemoteError::from_reqwest(&err))?;

        if !is_success(status) {
            return Err(RemoteError::from_status(status.as_u16(), body));
        }
        if body.trim().is_empty() {
            return Ok(Value::Null);
        }
        serde_json::from_str(&body)
            .map_err(|err| RemoteError::permanent(format!("malformed response body: {err}")))
    }
}

#[async_trait]
impl RemoteDataService for RestDataClient {
    async fn insert(&self, table: &TableName, payload: &RecordPayload) -> Result<Value, RemoteError> {
        let builder = self
            .request(Method::POST, table)
            .header("Prefer", RETURN_REPRESENTATION)
            .json(payload.as_map());
        self.send(builder).await
    }

    async fn update(
        &self,
        table: &TableName,
        filters: &RowFilters,
        payload: &RecordPayload,
    ) -> Result<Value, RemoteError> {
        let builder = self
            .request(Method::PATCH, table)
            .query(&filter_params(filters))
            .header("Prefer", RETURN_REPRESENTATION)
            .json(payload.as_map());
        self.send(builder).await
    }

    async fn delete(&self, table: &TableName, filters: &RowFilters) -> Result<Value, RemoteError> {
        let builder = self
            .request(Method::DELETE, table)
            .query(&filter_params(filters))
            .header("Prefer", RETURN_REPRESENTATION);
        self.send(builder).await
    }

    async fn upsert(
        &self,
        table: &TableName,
        payload: &RecordPayload,
        conflict_key: &ConflictKey,
    ) -> Result<Value, RemoteError> {
        let builder = self
            .request(Method::POST, table)
            .query(&[("on_conflict", conflict_key.to_csv())])
            .header("Prefer", MERGE_DUPLICATES)
            .json(payload.as_map());
        self.send(builder).await
    }
}

/// `column=eq.value` pairs; `null` becomes `is.null`.
pub fn filter_params(filters: &RowFilters) -> Vec<(String, String)> {
    filters
        .iter()
        .map(|(column, value)| {
            let operand = match value {
                Value::Null => "is.null".to_string(),
                Value::String(text) => format!("eq.{text}"),
                other => format!("eq.{other}"),
            };
            (column.clone(), operand)
        })
        .collect()
}

fn is_success(status: StatusCode) -> bool {
    status.is_success()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn filters_render_as_postgrest_equality() {
        let filters = RowFilters::eq("id", 42)
            .unwrap()
            .and("coach_id", "c-1")
            .unwrap()
            .and("archived_at", Value::Null)
            .unwrap()
            .and("active", true)
            .unwrap();

        let params = filter_params(&filters);
        assert_eq!(
            params,
            vec![
                ("active".to_string(), "eq.true".to_string()),
                ("archived_at".to_string(), "is.null".to_string()),
                ("coach_id".to_string(), "eq.c-1".to_string()),
                ("id".to_string(), "eq.42".to_string()),
            ]
        );
    }

    #[test]
    fn client_requires_base_url() {
        let config = RemoteConfig {
            base_url: "  ".into(),
            api_key: None,
            access_token: None,
            request_timeout_ms: 1_000,
        };
        assert!(matches!(
            RestDataClient::new(&config),
            Err(AppError::ConfigurationError(_))
        ));
    }

    #[test]
    fn client_trims_trailing_slash_and_blank_credentials() {
        let config = RemoteConfig {
            base_url: "https://db.example.com/".into(),
            api_key: Some(" ".into()),
            access_token: Some("token".into()),
            request_timeout_ms: 1_000,
        };
        let client = RestDataClient::new(&config).unwrap();
        assert_eq!(client.base_url, "https://db.example.com");
        assert!(client.api_key.is_none());
        assert_eq!(client.access_token.as_deref(), Some("token"));
    }

    #[tokio::test]
    async fn unreachable_host_is_transient() {
        let config = RemoteConfig {
            base_url: "http://127.0.0.1:9".into(),
            api_key: None,
            access_token: None,
            request_timeout_ms: 500,
        };
        let client = RestDataClient::new(&config).unwrap();
        let table = TableName::new("clients").unwrap();
        let payload = RecordPayload::new(json!({"name": "x"})).unwrap();

        let err = client.insert(&table, &payload).await.unwrap_err();
        assert!(err.is_transient());
    }
}
