//! Environment-derived configuration.
//!
//! `.env` is loaded first (via `dotenvy`), then every knob is read from the
//! process environment with an explicit default. [`AppConfig::from_env`]
//! fails fast on missing secrets or unparseable values so a misconfigured
//! instance never starts serving.

use std::time::Duration;

#[derive(Debug)]
pub enum ConfigError {
    Missing(&'static str),
    Invalid { key: &'static str, reason: String },
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Missing(key) => write!(f, "missing required environment variable {key}"),
            ConfigError::Invalid { key, reason } => write!(f, "invalid value for {key}: {reason}"),
        }
    }
}

impl std::error::Error for ConfigError {}

/// Deployment environment tag; drives CORS strictness and HSTS.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EnvTag {
    Dev,
    Staging,
    Prod,
}

impl EnvTag {
    pub fn is_dev(&self) -> bool {
        matches!(self, EnvTag::Dev)
    }
}

impl std::str::FromStr for EnvTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "dev" | "development" | "local" => Ok(EnvTag::Dev),
            "staging" => Ok(EnvTag::Staging),
            "prod" | "production" => Ok(EnvTag::Prod),
            other => Err(format!("unknown environment tag: {other}")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct DbConfig {
    pub primary_url: String,
    pub replica_urls: Vec<String>,
    /// `round-robin` (default), `random`, or `weighted`.
    pub read_strategy: String,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
    pub statement_timeout: Duration,
}

#[derive(Debug, Clone)]
pub struct ObjectStoreConfig {
    pub endpoint: String,
    pub bucket: String,
    pub region: String,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
    pub presign_ttl: Duration,
}

#[derive(Debug, Clone)]
pub struct RateLimitConfig {
    pub per_minute: u64,
    pub per_hour: u64,
    pub per_day: u64,
}

#[derive(Debug, Clone)]
pub struct DispatchConfig {
    pub broker_url: String,
    pub exchange: String,
    pub confirm_timeout: Duration,
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub backpressure_wait: Duration,
    pub shards_per_priority: u32,
    pub compress_threshold: usize,
}

#[derive(Debug, Clone)]
pub struct StreamConfig {
    pub heartbeat: Duration,
    pub max_life: Duration,
    pub subscriber_buffer: usize,
}

#[derive(Debug, Clone)]
pub struct AppConfig {
    pub env: EnvTag,
    pub bind_addr: String,
    pub db: DbConfig,
    pub cache_url: Option<String>,
    pub dispatch: DispatchConfig,
    pub object_store: ObjectStoreConfig,
    pub token_secret: String,
    pub token_ttl: Duration,
    pub internal_api_key: String,
    pub allowed_origins: Vec<String>,
    pub rate_limit: RateLimitConfig,
    pub body_limit_bytes: usize,
    pub stream: StreamConfig,
}

fn required(key: &'static str) -> Result<String, ConfigError> {
    std::env::var(key).map_err(|_| ConfigError::Missing(key))
}

fn optional(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.is_empty())
}

fn parsed<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match optional(key) {
        Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::Invalid {
            key,
            reason: e.to_string(),
        }),
        None => Ok(default),
    }
}

fn comma_list(raw: Option<String>) -> Vec<String> {
    raw.map(|v| {
        v.split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect()
    })
    .unwrap_or_default()
}

impl AppConfig {
    /// Load the full configuration from the environment.
    ///
    /// Secrets are required; everything else has a default suitable for
    /// local development.
    pub fn from_env() -> Result<Self, ConfigError> {
        let _ = dotenvy::dotenv();

        let env: EnvTag = parsed("APP_ENV", EnvTag::Dev).unwrap_or(EnvTag::Dev);

        let config = Self {
            env,
            bind_addr: optional("BIND_ADDR").unwrap_or_else(|| "0.0.0.0:8080".into()),
            db: DbConfig {
                primary_url: required("DB_URL_PRIMARY")?,
                replica_urls: comma_list(optional("DB_URL_REPLICAS")),
                read_strategy: optional("DB_READ_STRATEGY").unwrap_or_else(|| "round-robin".into()),
                max_connections: parsed("DB_MAX_CONNECTIONS", 20)?,
                acquire_timeout: Duration::from_secs(parsed("DB_ACQUIRE_TIMEOUT_SECS", 5)?),
                statement_timeout: Duration::from_secs(parsed("DB_STATEMENT_TIMEOUT_SECS", 60)?),
            },
            cache_url: optional("CACHE_URL"),
            dispatch: DispatchConfig {
                broker_url: required("BROKER_URL")?,
                exchange: optional("BROKER_EXCHANGE").unwrap_or_else(|| "jobs.exchange".into()),
                confirm_timeout: Duration::from_secs(parsed("BROKER_CONFIRM_TIMEOUT_SECS", 30)?),
                max_attempts: parsed("BROKER_PUBLISH_ATTEMPTS", 3)?,
                initial_backoff: Duration::from_secs(1),
                max_backoff: Duration::from_secs(10),
                backpressure_wait: Duration::from_millis(parsed("BROKER_BACKPRESSURE_WAIT_MS", 1_000)?),
                shards_per_priority: parsed("BROKER_QUEUE_SHARDS", 4)?,
                compress_threshold: parsed("BROKER_COMPRESS_THRESHOLD_BYTES", 1_024)?,
            },
            object_store: ObjectStoreConfig {
                endpoint: required("OBJECT_STORE_ENDPOINT")?,
                bucket: optional("OBJECT_STORE_BUCKET").unwrap_or_else(|| "applygate".into()),
                region: optional("OBJECT_STORE_REGION").unwrap_or_else(|| "us-east-1".into()),
                access_key: optional("OBJECT_STORE_ACCESS_KEY"),
                secret_key: optional("OBJECT_STORE_SECRET_KEY"),
                presign_ttl: Duration::from_secs(parsed("UPLOAD_URL_TTL_SECS", 3_600)?),
            },
            token_secret: required("TOKEN_SECRET")?,
            token_ttl: Duration::from_secs(parsed("TOKEN_TTL_SECS", 86_400)?),
            internal_api_key: required("INTERNAL_API_KEY")?,
            allowed_origins: comma_list(optional("ALLOWED_ORIGINS")),
            rate_limit: RateLimitConfig {
                per_minute: parsed("RATE_LIMIT_PER_MINUTE", 60)?,
                per_hour: parsed("RATE_LIMIT_PER_HOUR", 1_000)?,
                per_day: parsed("RATE_LIMIT_PER_DAY", 5_000)?,
            },
            body_limit_bytes: parsed("MAX_BODY_BYTES", 10 * 1024 * 1024)?,
            stream: StreamConfig {
                heartbeat: Duration::from_secs(parsed("STREAM_HEARTBEAT_SECS", 30)?),
                max_life: Duration::from_secs(parsed("STREAM_MAX_LIFE_SECS", 600)?),
                subscriber_buffer: parsed("STREAM_SUBSCRIBER_BUFFER", 16)?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.token_secret.len() < 32 {
            return Err(ConfigError::Invalid {
                key: "TOKEN_SECRET",
                reason: "must be at least 32 bytes".into(),
            });
        }
        if !self.env.is_dev() && self.allowed_origins.is_empty() {
            return Err(ConfigError::Invalid {
                key: "ALLOWED_ORIGINS",
                reason: "required outside dev".into(),
            });
        }
        if self.rate_limit.per_minute == 0 {
            return Err(ConfigError::Invalid {
                key: "RATE_LIMIT_PER_MINUTE",
                reason: "must be positive".into(),
            });
        }
        if self.dispatch.shards_per_priority == 0 {
            return Err(ConfigError::Invalid {
                key: "BROKER_QUEUE_SHARDS",
                reason: "must be positive".into(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_tag_parses_aliases() {
        assert_eq!("dev".parse::<EnvTag>().unwrap(), EnvTag::Dev);
        assert_eq!("production".parse::<EnvTag>().unwrap(), EnvTag::Prod);
        assert!("qa".parse::<EnvTag>().is_err());
    }

    #[test]
    fn comma_list_trims_and_drops_empties() {
        let list = comma_list(Some("https://a.example, https://b.example ,,".into()));
        assert_eq!(list, vec!["https://a.example", "https://b.example"]);
        assert!(comma_list(None).is_empty());
    }

    #[test]
    fn validation_rejects_short_secret() {
        let config = AppConfig {
            env: EnvTag::Dev,
            bind_addr: "127.0.0.1:0".into(),
            db: DbConfig {
                primary_url: "postgres://localhost/app".into(),
                replica_urls: vec![],
                read_strategy: "round-robin".into(),
                max_connections: 5,
                acquire_timeout: Duration::from_secs(5),
                statement_timeout: Duration::from_secs(60),
            },
            cache_url: None,
            dispatch: DispatchConfig {
                broker_url: "amqp://localhost".into(),
                exchange: "jobs.exchange".into(),
                confirm_timeout: Duration::from_secs(30),
                max_attempts: 3,
                initial_backoff: Duration::from_secs(1),
                max_backoff: Duration::from_secs(10),
                backpressure_wait: Duration::from_secs(1),
                shards_per_priority: 4,
                compress_threshold: 1024,
            },
            object_store: ObjectStoreConfig {
                endpoint: "http://localhost:9000".into(),
                bucket: "applygate".into(),
                region: "us-east-1".into(),
                access_key: None,
                secret_key: None,
                presign_ttl: Duration::from_secs(3600),
            },
            token_secret: "short".into(),
            token_ttl: Duration::from_secs(86_400),
            internal_api_key: "internal".into(),
            allowed_origins: vec![],
            rate_limit: RateLimitConfig {
                per_minute: 60,
                per_hour: 1_000,
                per_day: 5_000,
            },
            body_limit_bytes: 10 << 20,
            stream: StreamConfig {
                heartbeat: Duration::from_secs(30),
                max_life: Duration::from_secs(600),
                subscriber_buffer: 16,
            },
        };
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Invalid { key: "TOKEN_SECRET", .. })
        ));
    }
}
