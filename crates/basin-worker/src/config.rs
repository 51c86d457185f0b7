//! Worker configuration loaded from environment variables.

use basin_core::{Error, Result};

/// Default query timeout in seconds.
pub const DEFAULT_QUERY_TIMEOUT_SECONDS: u64 = 30;
/// Default job TTL in seconds.
pub const DEFAULT_JOB_TTL_SECONDS: u64 = 3600;
/// Default preview row bound.
pub const DEFAULT_PREVIEW_MAX_ROWS: usize = 10_000;
/// Default port for the worker health/metrics endpoint.
pub const DEFAULT_METRICS_PORT: u16 = 9090;

/// Configuration for a worker instance.
#[derive(Clone)]
pub struct WorkerConfig {
    /// Broker host.
    pub queue_host: String,
    /// Broker port.
    pub queue_port: u16,
    /// Broker user.
    pub queue_user: String,
    /// Broker password.
    pub queue_password: String,
    /// The single queue name.
    pub queue_name: String,
    /// S3-compatible endpoint URL.
    pub store_endpoint: String,
    /// Object store access key.
    pub store_access_key: String,
    /// Object store secret key.
    pub store_secret_key: String,
    /// Staging bucket for raw uploads.
    pub uploads_bucket: String,
    /// Warehouse bucket for table data and query results.
    pub warehouse_bucket: String,
    /// Path prefix for table data inside the warehouse bucket.
    pub warehouse_path: String,
    /// Job store host.
    pub jobstore_host: String,
    /// Job store port.
    pub jobstore_port: u16,
    /// Job record TTL in seconds.
    pub job_ttl_seconds: u64,
    /// Preview row bound for query results.
    pub preview_max_rows: usize,
    /// Query execution deadline in seconds.
    pub query_timeout_seconds: u64,
    /// Port for the health/metrics endpoint.
    pub metrics_port: u16,
    /// Enables pretty logs; JSON otherwise.
    pub debug: bool,
}

impl std::fmt::Debug for WorkerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerConfig")
            .field("queue_host", &self.queue_host)
            .field("queue_port", &self.queue_port)
            .field("queue_name", &self.queue_name)
            .field("store_endpoint", &self.store_endpoint)
            .field("uploads_bucket", &self.uploads_bucket)
            .field("warehouse_bucket", &self.warehouse_bucket)
            .field("warehouse_path", &self.warehouse_path)
            .field("jobstore_host", &self.jobstore_host)
            .field("jobstore_port", &self.jobstore_port)
            .field("job_ttl_seconds", &self.job_ttl_seconds)
            .field("preview_max_rows", &self.preview_max_rows)
            .field("query_timeout_seconds", &self.query_timeout_seconds)
            .field("metrics_port", &self.metrics_port)
            .finish_non_exhaustive()
    }
}

impl WorkerConfig {
    /// Loads configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `Error::InvalidInput` when a required variable is missing or a
    /// value cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            queue_host: required("QUEUE_HOST")?,
            queue_port: parse_u16("QUEUE_PORT", &required("QUEUE_PORT")?)?,
            queue_user: required("QUEUE_USER")?,
            queue_password: required("QUEUE_PASS")?,
            queue_name: required("QUEUE_NAME")?,
            store_endpoint: required("STORE_ENDPOINT")?,
            store_access_key: required("STORE_ACCESS_KEY")?,
            store_secret_key: required("STORE_SECRET_KEY")?,
            uploads_bucket: required("STORE_UPLOADS_BUCKET")?,
            warehouse_bucket: required("STORE_WAREHOUSE_BUCKET")?,
            warehouse_path: required("WAREHOUSE_PATH")?,
            jobstore_host: required("JOBSTORE_HOST")?,
            jobstore_port: parse_u16("JOBSTORE_PORT", &required("JOBSTORE_PORT")?)?,
            job_ttl_seconds: optional_u64("JOB_TTL_SECONDS")?.unwrap_or(DEFAULT_JOB_TTL_SECONDS),
            preview_max_rows: optional_usize("PREVIEW_MAX_ROWS")?
                .unwrap_or(DEFAULT_PREVIEW_MAX_ROWS),
            query_timeout_seconds: optional_u64("QUERY_TIMEOUT_SECONDS")?
                .unwrap_or(DEFAULT_QUERY_TIMEOUT_SECONDS),
            metrics_port: optional_u16("WORKER_METRICS_PORT")?.unwrap_or(DEFAULT_METRICS_PORT),
            debug: optional_bool("BASIN_DEBUG")?.unwrap_or(false),
        })
    }
}

fn value(name: &str) -> Option<String> {
    std::env::var(name).ok().and_then(|v| {
        let trimmed = v.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn required(name: &str) -> Result<String> {
    value(name)
        .ok_or_else(|| Error::InvalidInput(format!("required environment variable {name} is not set")))
}

fn parse_u16(name: &str, raw: &str) -> Result<u16> {
    raw.parse::<u16>()
        .map_err(|e| Error::InvalidInput(format!("{name} must be a u16: {e}")))
}

fn optional_u16(name: &str) -> Result<Option<u16>> {
    value(name).map(|v| parse_u16(name, &v)).transpose()
}

fn optional_u64(name: &str) -> Result<Option<u64>> {
    let Some(v) = value(name) else {
        return Ok(None);
    };
    v.parse::<u64>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} must be a u64: {e}")))
}

fn optional_usize(name: &str) -> Result<Option<usize>> {
    let Some(v) = value(name) else {
        return Ok(None);
    };
    v.parse::<usize>()
        .map(Some)
        .map_err(|e| Error::InvalidInput(format!("{name} must be a usize: {e}")))
}

fn optional_bool(name: &str) -> Result<Option<bool>> {
    let Some(v) = value(name) else {
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
