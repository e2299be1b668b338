use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub remote: RemoteConfig,
    pub queue: QueueConfig,
    pub retention: RetentionConfig,
    pub cache: CacheConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connection_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteConfig {
    pub base_url: String,
    pub api_key: Option<String>,
    pub access_token: Option<String>,
    pub request_timeout_ms: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub max_retries: u32,
    pub backoff_base_ms: u64,
    pub backoff_ceiling_ms: u64,
    #[serde(default)]
    pub backoff_jitter: bool,
    pub process_interval_secs: u64,
    pub lease_ttl_secs: u64,
    pub batch_size: u32,
    pub start_online: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetentionConfig {
    pub completed_max_age_secs: Option<u64>,
    pub completed_max_count: Option<u32>,
    pub failed_max_age_secs: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    pub ttl_secs: u64,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: default_database_url(),
                max_connections: 5,
                connection_timeout: 30,
            },
            remote: RemoteConfig {
                base_url: "http://localhost:54321".to_string(),
                api_key: None,
                access_token: None,
                request_timeout_ms: 10_000,
            },
            queue: QueueConfig {
                max_retries: 3,
                backoff_base_ms: 1_000,
                backoff_ceiling_ms: 60_000,
                backoff_jitter: false,
                process_interval_secs: 30,
                lease_ttl_secs: 60,
                batch_size: 50,
                start_online: true,
            },
            retention: RetentionConfig {
                completed_max_age_secs: Some(7 * 24 * 60 * 60), // 7 days
                completed_max_count: Some(500),
                failed_max_age_secs: None,
            },
            cache: CacheConfig {
                ttl_secs: 300, // 5 minutes
            },
        }
    }
}

impl RemoteConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }
}

impl QueueConfig {
    pub fn process_interval(&self) -> Duration {
        Duration::from_secs(self.process_interval_secs)
    }

    pub fn lease_ttl(&self) -> Duration {
        Duration::from_secs(self.lease_ttl_secs)
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        let mut cfg = Self::default();

        if let Ok(v) = std::env::var("MUTATION_QUEUE_DATABASE_URL")
            && !v.trim().is_empty()
        {
            cfg.database.url = v.trim().to_string();
        }
        if let Ok(v) = std::env::var("MUTATION_QUEUE_DB_MAX_CONNECTIONS")
            && let Some(value) = parse_u32(&v)
        {
            cfg.database.max_connections = value;
        }

        // リモート接続設定
        if let Ok(v) = std::env::var("MUTATION_QUEUE_REMOTE_URL")
            && !v.trim().is_empty()
        {
            cfg.remote.base_url = v.trim().trim_end_matches('/').to_string();
        }
        if let Ok(v) = std::env::var("MUTATION_QUEUE_REMOTE_API_KEY") {
            cfg.remote.api_key = non_empty(v);
        }
        if let Ok(v) = std::env::var("MUTATION_QUEUE_REMOTE_ACCESS_TOKEN") {
            cfg.remote.access_token = non_empty(v);
        }
        if let Ok(v) = std::env::var("MUTATION_QUEUE_REQUEST_TIMEOUT_MS")
            && let Some(value) = parse_u64(&v)
        {
            cfg.remote.request_timeout_ms = value.max(1);
        }

        // キュー設定
        if let Ok(v) = std::env::var("MUTATION_QUEUE_MAX_RETRIES")
            && let Some(value) = parse_u32(&v)
        {
            cfg.queue.max_retries = value.max(1);
        }
        if let Ok(v) = std::env::var("MUTATION_QUEUE_BACKOFF_BASE_MS")
            && let Some(value) = parse_u64(&v)
        {
            cfg.queue.backoff_base_ms = value;
        }
        if let Ok(v) = std::env::var("MUTATION_QUEUE_BACKOFF_CEILING_MS")
            && let Some(value) = parse_u64(&v)
        {
            cfg.queue.backoff_ceiling_ms = value;
        }
        if let Ok(v) = std::env::var("MUTATION_QUEUE_BACKOFF_JITTER") {
            cfg.queue.backoff_jitter = parse_bool(&v, cfg.queue.backoff_jitter);
        }
        if let Ok(v) = std::env::var("MUTATION_QUEUE_PROCESS_INTERVAL_SECS")
            && let Some(value) = parse_u64(&v)
        {
            cfg.queue.process_interval_secs = value.max(1);
        }
        if let Ok(v) = std::env::var("MUTATION_QUEUE_LEASE_TTL_SECS")
            && let Some(value) = parse_u64(&v)
        {
            cfg.queue.lease_ttl_secs = value.max(1);
        }
        if let Ok(v) = std::env::var("MUTATION_QUEUE_BATCH_SIZE")
            && let Some(value) = parse_u32(&v)
        {
            cfg.queue.batch_size = value.max(1);
        }
        if let Ok(v) = std::env::var("MUTATION_QUEUE_START_ONLINE") {
            cfg.queue.start_online = parse_bool(&v, cfg.queue.start_online);
        }

        // 保持ポリシー (0 で無効化)
        if let Ok(v) = std::env::var("MUTATION_QUEUE_COMPLETED_MAX_AGE_SECS")
            && let Some(value) = parse_u64(&v)
        {
            cfg.retention.completed_max_age_secs = if value == 0 { None } else { Some(value) };
        }
        if let Ok(v) = std::env::var("MUTATION_QUEUE_COMPLETED_MAX_COUNT")
            && let Some(value) = parse_u32(&v)
        {
            cfg.retention.completed_max_count = if value == 0 { None } else { Some(value) };
        }
        if let Ok(v) = std::env::var("MUTATION_QUEUE_FAILED_MAX_AGE_SECS")
            && let Some(value) = parse_u64(&v)
        {
            cfg.retention.failed_max_age_secs = if value == 0 { None } else { Some(value) };
        }

        if let Ok(v) = std::env::var("MUTATION_QUEUE_CACHE_TTL_SECS")
            && let Some(value) = parse_u64(&v)
        {
            cfg.cache.ttl_secs = value.max(1);
        }

        cfg
    }

    pub fn validate(&self) -> Result<(), String> {
        if self.database.max_connections == 0 {
            return Err("Database max_connections must be greater than 0".to_string());
        }
        if self.remote.base_url.trim().is_empty() {
            return Err("Remote base_url must not be empty".to_string());
        }
        if self.remote.request_timeout_ms == 0 {
            return Err("Remote request_timeout_ms must be greater than 0".to_string());
        }
        if self.queue.max_retries == 0 {
            return Err("Queue max_retries must be greater than 0".to_string());
        }
        if self.queue.backoff_ceiling_ms < self.queue.backoff_base_ms {
            return Err("Queue backoff_ceiling_ms must not be below backoff_base_ms".to_string());
        }
        if self.queue.process_interval_secs == 0 {
            return Err("Queue process_interval_secs must be greater than 0".to_string());
        }
        if self.queue.lease_ttl_secs == 0 {
            return Err("Queue lease_ttl_secs must be greater than 0".to_string());
        }
        if self.queue.lease_ttl() < self.remote.request_timeout() {
            return Err("Queue lease_ttl_secs must cover remote request_timeout_ms".to_string());
        }
        if self.queue.batch_size == 0 {
            return Err("Queue batch_size must be greater than 0".to_string());
        }
        if self.cache.ttl_secs == 0 {
            return Err("Cache ttl_secs must be greater than 0".to_string());
        }
        Ok(())
    }
}

fn default_database_url() -> String {
    let dir = dirs::data_local_dir()
        .map(|dir| dir.join("mutation-queue"))
        .unwrap_or_else(|| PathBuf::from("./data"));
    format!("sqlite:{}?mode=rwc", dir.join("queue.db").display())
}

fn non_empty(value: String) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn parse_bool(s: &str, default: bool) -> bool {
    match s.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => true,
        "0" | "false" | "no" | "off" => false,
        _ => default,
    }
}

fn parse_u64(value: &str) -> Option<u64> {
    value.trim().parse::<u64>().ok()
}

fn parse_u32(value: &str) -> Option<u32> {
    value.trim().parse::<u32>().ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_is_valid() {
        let cfg = AppConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.queue.max_retries, 3);
        assert!(cfg.database.url.starts_with("sqlite:"));
    }

    #[test]
    fn validate_rejects_inverted_backoff_bounds() {
        let mut cfg = AppConfig::default();
        cfg.queue.backoff_base_ms = 10_000;
        cfg.queue.backoff_ceiling_ms = 1_000;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_retries() {
        let mut cfg = AppConfig::default();
        cfg.queue.max_retries = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn validate_rejects_lease_shorter_than_request_timeout() {
        let mut cfg = AppConfig::default();
        cfg.queue.lease_ttl_secs = 5;
        cfg.remote.request_timeout_ms = 10_000;
        assert!(cfg.validate().is_err());

        cfg.queue.lease_ttl_secs = 10;
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn parse_bool_falls_back_to_default() {
        assert!(parse_bool("YES", false));
        assert!(!parse_bool("off", true));
        assert!(parse_bool("maybe", true));
    }
}
