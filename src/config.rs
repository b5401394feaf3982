use crate::ebay::config::TradingConfig;
use crate::llm::LlmConfig;
use std::{env, str::FromStr};

/// Credential used when `API_KEYS` is unset. Only suitable for local development.
pub const DEFAULT_API_KEYS: &str = "demo@example.com:demo-key";

/// Process-wide settings, read once at startup and handed to [`crate::context::AppContext`].
///
/// Every value has a default; malformed values fall back to it rather than aborting startup.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub port: u16,
    pub database_url: String,
    pub database_max_connections: u32,
    pub body_limit: usize,
    pub bulk_background_threshold: usize,
    pub heartbeat_interval_secs: u64,
    pub queue_capacity: usize,
    pub job_retention_secs: u64,
    pub redis_url: Option<String>,
    pub idempotency_ttl_secs: u64,
    pub agent_max_steps: usize,
    pub api_keys: String,
    pub http: HttpSettings,
    pub marketplace: TradingConfig,
    pub llm: LlmConfig,
}

#[derive(Debug, Clone, Copy)]
pub struct HttpSettings {
    pub timeout_secs: u64,
    pub connect_timeout_secs: u64,
}

impl Default for HttpSettings {
    fn default() -> Self {
        Self {
            timeout_secs: 15,
            connect_timeout_secs: 5,
        }
    }
}

impl AppConfig {
    pub fn from_env() -> Self {
        dotenvy::dotenv().ok();

        Self {
            port: env_parse("PORT", 8000),
            database_url: env::var("DATABASE_URL")
                .ok()
                .filter(|v| !v.trim().is_empty())
                .unwrap_or_else(|| "sqlite://listings.db?mode=rwc".to_string()),
            database_max_connections: env_parse_positive("DATABASE_MAX_CONNECTIONS", 5),
            body_limit: env_parse_positive("REQUEST_MAX_BYTES", 256 * 1024),
            bulk_background_threshold: env_parse("BULK_BACKGROUND_THRESHOLD", 10),
            heartbeat_interval_secs: env_parse_positive("HEARTBEAT_INTERVAL_SECS", 30),
            queue_capacity: env_parse_positive("QUEUE_CAPACITY", 64),
            job_retention_secs: env_parse_positive("JOB_RETENTION_SECS", 3600),
            redis_url: env::var("REDIS_URL").ok().filter(|v| !v.trim().is_empty()),
            idempotency_ttl_secs: env_parse_positive("IDEMPOTENCY_TTL_SECS", 3600),
            agent_max_steps: env_parse_positive("AGENT_MAX_STEPS", 6),
            api_keys: env::var("API_KEYS").unwrap_or_else(|_| DEFAULT_API_KEYS.to_string()),
            http: HttpSettings {
                timeout_secs: env_parse_positive("HTTP_TIMEOUT_SECS", 15),
                connect_timeout_secs: env_parse_positive("HTTP_CONNECT_TIMEOUT_SECS", 5),
            },
            marketplace: TradingConfig::from_env(),
            llm: LlmConfig::from_env(),
        }
    }

    pub fn uses_default_api_keys(&self) -> bool {
        contains_default_key(&self.api_keys)
    }
}

fn contains_default_key(raw: &str) -> bool {
    raw.split(',').any(|entry| entry.trim() == DEFAULT_API_KEYS)
}

pub(crate) fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
        .unwrap_or(default)
}

pub(crate) fn env_parse_positive<T>(key: &str, default: T) -> T
where
    T: FromStr + PartialOrd + Default,
{
    env::var(key)
        .ok()
        .and_then(|value| value.trim().parse::<T>().ok())
        .filter(|value| *value > T::default())
        .unwrap_or(default)
}
