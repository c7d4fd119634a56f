//! Service configuration loaded from the environment.
//!
//! Every variable is optional; unset or blank values fall back to the
//! defaults below. A value that is present but cannot be parsed is an error.

use std::env;
use std::str::FromStr;
use std::time::Duration;

use thiserror::Error;

use copilot_ingestion::retry::MAX_RETRIES;
use copilot_ingestion::RetryPolicy;

use crate::processing::chunking::{DEFAULT_CHUNK_OVERLAP, DEFAULT_CHUNK_SIZE};

pub const DEFAULT_REDIS_URL: &str = "redis://localhost:6379/0";
pub const DEFAULT_PORT: u16 = 8001;
pub const DEFAULT_BATCH_SIZE: usize = 5;
pub const DEFAULT_BLOCK_MS: u64 = 5_000;
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 50 * 1024 * 1024;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("invalid value for environment variable {key}: {value:?}")]
    InvalidValue { key: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum QueueBackend {
    #[default]
    Redis,
    Memory,
}

impl FromStr for QueueBackend {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "redis" => Ok(Self::Redis),
            "memory" | "in-memory" | "in_memory" => Ok(Self::Memory),
            _ => Err(()),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub port: u16,
    pub redis_url: String,
    pub queue_backend: QueueBackend,
    pub consumer_name: String,
    pub batch_size: usize,
    pub block: Duration,
    pub max_retries: u32,
    /// `None` leaves abandoned entries pending until an operator steps in.
    /// Must exceed the longest retry backoff (30 s), or entries are taken
    /// from workers that are only waiting to retry.
    pub reclaim_after: Option<Duration>,
    pub chunk_size: usize,
    pub chunk_overlap: usize,
    pub max_upload_bytes: usize,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            port: DEFAULT_PORT,
            redis_url: DEFAULT_REDIS_URL.to_string(),
            queue_backend: QueueBackend::default(),
            consumer_name: default_consumer_name(DEFAULT_PORT),
            batch_size: DEFAULT_BATCH_SIZE,
            block: Duration::from_millis(DEFAULT_BLOCK_MS),
            max_retries: MAX_RETRIES,
            reclaim_after: None,
            chunk_size: DEFAULT_CHUNK_SIZE,
            chunk_overlap: DEFAULT_CHUNK_OVERLAP,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl Settings {
    /// Load settings from the process environment.
    ///
    /// Call `dotenvy::dotenv()` first if a `.env` file should be honored.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load settings through an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());
        let defaults = Self::default();

        let port = parse_or(&get, "KNOWLEDGE_SERVICE_PORT", defaults.port)?;
        let queue_backend = match get("QUEUE_BACKEND") {
            Some(value) => value.parse().map_err(|()| ConfigError::InvalidValue {
                key: "QUEUE_BACKEND",
                value,
            })?,
            None => defaults.queue_backend,
        };
        let reclaim_after = match get("INGEST_RECLAIM_IDLE_MS") {
            Some(value) => Some(Duration::from_millis(parse("INGEST_RECLAIM_IDLE_MS", value)?)),
            None => None,
        };
        let block_ms = parse_or(&get, "INGEST_BLOCK_MS", DEFAULT_BLOCK_MS)?;

        let settings = Self {
            port,
            redis_url: get("REDIS_URL").unwrap_or(defaults.redis_url),
            queue_backend,
            consumer_name: get("INGEST_CONSUMER_NAME")
                .unwrap_or_else(|| default_consumer_name(port)),
            batch_size: parse_or(&get, "INGEST_BATCH_SIZE", defaults.batch_size)?,
            block: Duration::from_millis(block_ms),
            max_retries: parse_or(&get, "INGEST_MAX_RETRIES", defaults.max_retries)?,
            reclaim_after,
            chunk_size: parse_or(&get, "CHUNK_SIZE", defaults.chunk_size)?,
            chunk_overlap: parse_or(&get, "CHUNK_OVERLAP", defaults.chunk_overlap)?,
            max_upload_bytes: parse_or(&get, "MAX_UPLOAD_BYTES", defaults.max_upload_bytes)?,
        };

        if settings.batch_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "INGEST_BATCH_SIZE",
                value: "0".to_string(),
            });
        }
        if settings.chunk_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "CHUNK_SIZE",
                value: "0".to_string(),
            });
        }
        if settings.chunk_overlap >= settings.chunk_size {
            return Err(ConfigError::InvalidValue {
                key: "CHUNK_OVERLAP",
                value: settings.chunk_overlap.to_string(),
            });
        }

        if let Some(reclaim_after) = settings.reclaim_after {
            if reclaim_after <= RetryPolicy::default().max_backoff {
                return Err(ConfigError::InvalidValue {
                    key: "INGEST_RECLAIM_IDLE_MS",
                    value: reclaim_after.as_millis().to_string(),
                });
            }
        }

        Ok(settings)
    }
}

fn default_consumer_name(port: u16) -> String {
    format!("knowledge-worker-{port}")
}

fn parse<T: FromStr>(key: &'static str, value: String) -> Result<T, ConfigError> {
    value
        .trim()
        .parse()
        .map_err(|_| ConfigError::InvalidValue { key, value })
}

fn parse_or<T, G>(get: &G, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    G: Fn(&str) -> Option<String>,
{
    match get(key) {
        Some(value) => parse(key, value),
        None => Ok(default),
    }
}
