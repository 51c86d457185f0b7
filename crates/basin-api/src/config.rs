//! Coordinator configuration.
//!
//! Loaded from environment variables at startup. Connection settings for the
//! bus, the object store, and the job store are required; the HTTP port, the
//! upload size cap, the job TTL, and the preview bound have defaults.

use basin_core::{Error, Result};

/// Default HTTP port.
pub const DEFAULT_API_PORT: u16 = 8080;
/// Default upload size cap: 100 MiB.
pub const DEFAULT_FILE_MAX_SIZE: u64 = 100 * 1024 * 1024;
/// Default job TTL in seconds.
pub const DEFAULT_JOB_TTL_SECONDS: u64 = 3600;
/// Default preview row bound.
pub const DEFAULT_PREVIEW_MAX_ROWS: usize = 10_000;

/// Message bus connection settings.
#[derive(Clone)]
pub struct QueueConfig {
    /// Broker host.
    pub host: String,
    /// Broker port.
    pub port: u16,
    /// Broker user.
    pub user: String,
    /// Broker password.
    pub password: String,
    /// The single queue name, e.g. `file.processing.queue`.
    pub queue_name: String,
}

impl std::fmt::Debug for QueueConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("user", &self.user)
            .field("password", &"[REDACTED]")
            .field("queue_name", &self.queue_name)
            .finish()
    }
}

/// Object store connection settings.
#[derive(Clone)]
pub struct StoreConfig {
    /// S3-compatible endpoint URL.
    pub endpoint: String,
    /// Access key.
    pub access_key: String,
    /// Secret key.
    pub secret_key: String,
    /// Staging bucket for raw uploads.
    pub uploads_bucket: String,
    /// Warehouse bucket for table data and query results.
    pub warehouse_bucket: String,
}

impl std::fmt::Debug for StoreConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoreConfig")
            .field("endpoint", &self.endpoint)
            .field("access_key", &self.access_key)
            .field("secret_key", &"[REDACTED]")
            .field("uploads_bucket", &self.uploads_bucket)
            .field("warehouse_bucket", &self.warehouse_bucket)
            .finish()
    }
}

/// Job store connection settings.
#[derive(Debug, Clone)]
pub struct JobStoreConfig {
    /// Redis-protocol host.
    pub host: String,
    /// Redis-protocol port.
    pub port: u16,
}

/// Configuration for the coordinator.
#[derive(Debug, Clone)]
pub struct Config {
    /// HTTP server port.
    pub api_port: u16,
    /// Maximum accepted upload size in bytes.
    pub file_max_size: u64,
    /// Job record TTL in seconds, reset on every write.
    pub job_ttl_seconds: u64,
    /// Preview row bound for query results.
    pub preview_max_rows: usize,
    /// Path prefix for table data inside the warehouse bucket.
    pub warehouse_path: String,
    /// Message bus settings.
    pub queue: QueueConfig,
    /// Object store settings.
    pub store: StoreConfig,
    /// Job store settings.
    pub jobstore: JobStoreConfig,
    /// Enables pretty logs; JSON otherwise.
    pub debug: bool,
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` when a required variable is missing or a
    /// value cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            api_port: env_u16("API_PORT")?.unwrap_or(DEFAULT_API_PORT),
            file_max_size: env_u64("FILE_MAX_SIZE")?.unwrap_or(DEFAULT_FILE_MAX_SIZE),
            job_ttl_seconds: env_u64("JOB_TTL_SECONDS")?.unwrap_or(DEFAULT_JOB_TTL_SECONDS),
            preview_max_rows: env_usize("PREVIEW_MAX_ROWS")?.unwrap_or(DEFAULT_PREVIEW_MAX_ROWS),
            warehouse_path: env_required("WAREHOUSE_PATH")?,
            queue: QueueConfig {
                host: env_required("QUEUE_HOST")?,
                port: parse_u16("QUEUE_PORT", &env_required("QUEUE_PORT")?)?,
                user: env_required("QUEUE_USER")?,
                password: env_required("QUEUE_PASS")?,
                queue_name: env_required("QUEUE_NAME")?,
            },
            store: StoreConfig {
                endpoint: env_required("STORE_ENDPOINT")?,
                access_key: env_required("STORE_ACCESS_KEY")?,
                secret_key: env_required("STORE_SECRET_KEY")?,
                uploads_bucket: env_required("STORE_UPLOADS_BUCKET")?,
                warehouse_bucket: env_required("STORE_WAREHOUSE_BUCKET")?,
            },
            jobstore: JobStoreConfig {
                host: env_required("JOBSTORE_HOST")?,
                port: parse_u16("JOBSTORE_PORT", &env_required("JOBSTORE_PORT")?)?,
            },
            debug: env_bool("BASIN_DEBUG")?.unwrap_or(false),
        })
    }

    /// Test configuration with in-memory-friendly defaults.
    #[must_use]
    pub fn for_tests() -> Self {
        Self {
            api_port: 0,
            file_max_size: DEFAULT_FILE_MAX_SIZE,
            job_ttl_seconds: DEFAULT_JOB_TTL_SECONDS,
            preview_max_rows: DEFAULT_PREVIEW_MAX_ROWS,
            warehouse_path: "wh".to_string(),
            queue: QueueConfig {
                host: "localhost".to_string(),
                port: 5672,
                user: "guest".to_string(),
                password: "guest".to_string(),
                queue_name: "file.processing.queue".to_string(),
            },
            store: StoreConfig {
                endpoint: "http://localhost:9000".to_string(),
                access_key: "test".to_string(),
                secret_key: "test".to_string(),
                uploads_bucket: "uploads".to_string(),
                warehouse_bucket: "warehouse".to_string(),
            },
            jobstore: JobStoreConfig {
                host: "localhost".to_string(),
                port: 6379,
            },
            debug: true,
        }
    }
}

pub(crate) fn env_string(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

pub(crate) fn env_required(name: &str) -> Result<String> {
    env_string(name)
        .ok_or_else(|| Error::InvalidInput(format!("required environment variable {name} is not set")))
}

pub(crate) fn parse_u16(name: &str, value: &str) -> Result<u16> {
    value
        .parse::<u16>()
        .map_err(|e| Error::InvalidInput(format!("{name} must be a u16: {e}")))
}

pub(crate) fn env_u16(name: &str) -> Result<Option<u16>> {
    env_string(name).map(|v| parse_u16(name, &v)).transpose()
}

pub(crate) fn env_u64(name: &str) -> Result<Option<u64>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<u64>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} must be a u64: {e}")))
}

pub(crate) fn env_usize(name: &str) -> Result<Option<usize>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    v.parse::<usize>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} must be a usize: {e}")))
}

pub(crate) fn env_bool(name: &str) -> Result<Option<bool>> {
    let Some(v) = env_string(name) else {
        return Ok(None);
    };
    match v.to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "y" => Ok(Some(true)),
        "false" | "0" | "no" | "n" => Ok(Some(false)),
        _ => Err(Error::InvalidInput(format!(
            "{name} must be a boolean (true/false/1/0)"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn secrets_are_redacted_in_debug_output() {
        let config = Config::for_tests();
        let rendered = format!("{config:?}");
        assert!(rendered.contains("[REDACTED]"));
        assert!(!rendered.contains("password: \"guest\""));
        assert!(!rendered.contains("secret_key: \"test\""));
    }

    #[test]
    fn parse_helpers_reject_garbage() {
        assert!(parse_u16("QUEUE_PORT", "not-a-port").is_err());
    }
}
