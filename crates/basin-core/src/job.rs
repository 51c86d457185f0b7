//! The job model: the canonical unit of asynchronous work.
//!
//! A job is created by the coordinator with status `queued`, picked up by a
//! worker via the message bus, and driven to a terminal state. The record in
//! the job store is the single externally-visible view of that lifecycle; the
//! serialized form here is the wire contract for the status endpoints.
//!
//! Records are flat on the wire: kind-specific payload fields and result
//! fields sit alongside the lifecycle fields, absent ones omitted. Typed
//! accessors recover the kind-specific view and reject records that are
//! missing required fields for their kind.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// The kind of work a job describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobKind {
    /// CSV/JSON/parquet file ingestion into a table.
    Upload,
    /// Structured query execution.
    Query,
    /// Table schema retrieval.
    Schema,
}

impl JobKind {
    /// Returns the wire name of the kind.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Upload => "upload",
            Self::Query => "query",
            Self::Schema => "schema",
        }
    }
}

/// Job lifecycle status.
///
/// Transitions only move forward: `queued → processing → {completed, failed}`.
/// Terminal states are final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    /// Accepted by the coordinator, not yet picked up.
    Queued,
    /// A worker holds the delivery and is executing.
    Processing,
    /// Finished successfully.
    Completed,
    /// Finished with a deterministic error; `message` carries the detail.
    Failed,
}

impl JobStatus {
    /// Returns true for `completed` and `failed`.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }

    /// Returns true when moving from `self` to `next` is a forward transition.
    #[must_use]
    pub fn can_transition_to(self, next: Self) -> bool {
        match self {
            Self::Queued => next != Self::Queued,
            Self::Processing => next.is_terminal(),
            Self::Completed | Self::Failed => false,
        }
    }

    /// Returns the wire name of the status.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Queued => "queued",
            Self::Processing => "processing",
            Self::Completed => "completed",
            Self::Failed => "failed",
        }
    }

    /// Parses a wire status name, case-insensitively.
    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "queued" => Some(Self::Queued),
            "processing" => Some(Self::Processing),
            "completed" => Some(Self::Completed),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }
}

/// Result fields populated on completion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct JobResult {
    /// Warehouse location of the full columnar result, `None` for schema jobs.
    pub result_path: Option<String>,
    /// Result row count (column count for schema jobs).
    pub row_count: u64,
    /// Size of the result blob in bytes, zero when no blob was written.
    pub file_size_bytes: u64,
    /// Inline JSON preview of the result head.
    pub result_data: Option<serde_json::Value>,
}

/// A persisted job record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Opaque unique identifier assigned by the coordinator.
    pub id: String,
    /// The kind of work.
    pub kind: JobKind,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Human-readable progress or error detail.
    pub message: String,
    /// Creation timestamp.
    #[serde(with = "timestamp_format")]
    pub created_at: DateTime<Utc>,
    /// Timestamp of the last status write.
    #[serde(with = "timestamp_format")]
    pub updated_at: DateTime<Utc>,

    // Upload payload fields.
    /// User who submitted the upload, if known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Project (namespace) the job targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// Target table name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    /// Original file name of the upload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Staging-bucket path where the raw blob lives.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_path: Option<String>,
    /// Upload size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,

    // Query payload fields.
    /// Fully-qualified `project.table` source of a query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// The query specification, persisted as an opaque JSON string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_spec_json: Option<String>,

    // Result fields.
    /// Warehouse location of the full result blob.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_path: Option<String>,
    /// Result row count.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub row_count: Option<u64>,
    /// Size of the result blob in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size_bytes: Option<u64>,
    /// Inline JSON preview of the result head.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result_data: Option<serde_json::Value>,
}

impl Job {
    fn queued(id: impl Into<String>, kind: JobKind, message: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            kind,
            status: JobStatus::Queued,
            message: message.into(),
            created_at: now,
            updated_at: now,
            user: None,
            project: None,
            table: None,
            file_name: None,
            blob_path: None,
            file_size: None,
            source: None,
            query_spec_json: None,
            result_path: None,
            row_count: None,
            file_size_bytes: None,
            result_data: None,
        }
    }

    /// Creates a fresh `queued` upload record.
    #[must_use]
    pub fn upload(
        id: impl Into<String>,
        user: Option<String>,
        project: impl Into<String>,
        table: Option<String>,
        file_name: impl Into<String>,
        blob_path: impl Into<String>,
        file_size: u64,
    ) -> Self {
        let mut job = Self::queued(id, JobKind::Upload, "Upload queued for processing");
        job.user = user;
        job.project = Some(project.into());
        job.table = table;
        job.file_name = Some(file_name.into());
        job.blob_path = Some(blob_path.into());
        job.file_size = Some(file_size);
        job
    }

    /// Creates a fresh `queued` query record.
    #[must_use]
    pub fn query(
        id: impl Into<String>,
        source: impl Into<String>,
        query_spec_json: impl Into<String>,
    ) -> Self {
        let mut job = Self::queued(id, JobKind::Query, "Query job queued for processing");
        job.source = Some(source.into());
        job.query_spec_json = Some(query_spec_json.into());
        job
    }

    /// Creates a fresh `queued` schema-request record.
    #[must_use]
    pub fn schema(
        id: impl Into<String>,
        project: impl Into<String>,
        table: impl Into<String>,
    ) -> Self {
        let mut job = Self::queued(id, JobKind::Schema, "Schema request queued");
        job.project = Some(project.into());
        job.table = Some(table.into());
        job
    }

    /// Applies a partial update and bumps `updated_at`.
    pub fn apply(&mut self, update: &JobUpdate) {
        self.status = update.status;
        self.message.clone_from(&update.message);
        self.updated_at = Utc::now();
        if let Some(result) = &update.result {
            self.result_path.clone_from(&result.result_path);
            self.row_count = Some(result.row_count);
            self.file_size_bytes = Some(result.file_size_bytes);
            self.result_data.clone_from(&result.result_data);
        }
    }
}

/// A partial update applied by read-merge-write in the job store.
#[derive(Debug, Clone)]
pub struct JobUpdate {
    /// New status.
    pub status: JobStatus,
    /// New message.
    pub message: String,
    /// Result fields; only ever set together with `Completed`.
    pub result: Option<JobResult>,
}

impl JobUpdate {
    /// A `processing` update with the given message.
    #[must_use]
    pub fn processing(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Processing,
            message: message.into(),
            result: None,
        }
    }

    /// A `completed` update carrying result fields.
    #[must_use]
    pub fn completed(message: impl Into<String>, result: JobResult) -> Self {
        Self {
            status: JobStatus::Completed,
            message: message.into(),
            result: Some(result),
        }
    }

    /// A `completed` update without result fields (upload jobs embed the row
    /// count in the message).
    #[must_use]
    pub fn completed_bare(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Completed,
            message: message.into(),
            result: None,
        }
    }

    /// A terminal `failed` update.
    #[must_use]
    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: JobStatus::Failed,
            message: message.into(),
            result: None,
        }
    }
}

/// The message enqueued on the bus for each accepted submission.
///
/// Fields mirror the job record's payload; everything except `id` is optional
/// so that workers can decode partial or foreign messages and still surface a
/// terminal failure under the right id. Unknown fields are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobMessage {
    /// Job identifier; the worker writes all subsequent status under it.
    pub id: String,
    /// Routing discriminator; absent or unknown kinds fail the job.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<JobKind>,
    /// User who submitted the upload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    /// Project (namespace) the job targets.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    /// Target table name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub table: Option<String>,
    /// Original file name of the upload.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_name: Option<String>,
    /// Staging-bucket path of the raw upload blob.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub blob_path: Option<String>,
    /// Upload size in bytes.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file_size: Option<u64>,
    /// Fully-qualified `project.table` source of a query.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// The query specification as an opaque JSON string.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query_spec_json: Option<String>,
}

impl JobMessage {
    /// Builds the upload message for a job record.
    #[must_use]
    pub fn for_job(job: &Job) -> Self {
        Self {
            id: job.id.clone(),
            kind: Some(job.kind),
            user: job.user.clone(),
            project: job.project.clone(),
            table: job.table.clone(),
            file_name: job.file_name.clone(),
            blob_path: job.blob_path.clone(),
            file_size: job.file_size,
            source: job.source.clone(),
            query_spec_json: job.query_spec_json.clone(),
        }
    }

    fn require<'a>(&self, field: &'static str, value: Option<&'a str>) -> Result<&'a str> {
        value.ok_or_else(|| {
            Error::InvalidInput(format!("message for job {} is missing {field}", self.id))
        })
    }

    /// Returns the `(project, blob_path, file_name, table)` of an upload
    /// message.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when a required field is absent.
    pub fn upload_fields(&self) -> Result<(&str, &str, &str, Option<&str>)> {
        let project = self.require("project", self.project.as_deref())?;
        let blob_path = self.require("blob_path", self.blob_path.as_deref())?;
        let file_name = self.require("file_name", self.file_name.as_deref())?;
        Ok((project, blob_path, file_name, self.table.as_deref()))
    }

    /// Returns the `(source, query_spec_json)` of a query message.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when a required field is absent.
    pub fn query_fields(&self) -> Result<(&str, &str)> {
        let source = self.require("source", self.source.as_deref())?;
        let spec = self.require("query_spec_json", self.query_spec_json.as_deref())?;
        Ok((source, spec))
    }

    /// Returns the `(project, table)` of a schema message.
    ///
    /// # Errors
    ///
    /// Returns `InvalidInput` when a required field is absent.
    pub fn schema_fields(&self) -> Result<(&str, &str)> {
        let project = self.require("project", self.project.as_deref())?;
        let table = self.require("table", self.table.as_deref())?;
        Ok((project, table))
    }
}

/// Serde helpers for the `yyyy-MM-ddTHH:mm:ss` timestamp wire format.
pub mod timestamp_format {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{self, Deserialize, Deserializer, Serializer};

    const FORMAT: &str = "%Y-%m-%dT%H:%M:%S";

    /// Serializes a timestamp as `yyyy-MM-ddTHH:mm:ss`.
    ///
    /// # Errors
    ///
    /// Infallible in practice; the signature is dictated by serde.
    pub fn serialize<S>(value: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&value.format(FORMAT).to_string())
    }

    /// Deserializes a `yyyy-MM-ddTHH:mm:ss` timestamp.
    ///
    /// # Errors
    ///
    /// Returns an error when the string does not match the format.
    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        NaiveDateTime::parse_from_str(&raw, FORMAT)
            .map(|naive| naive.and_utc())
            .map_err(serde::de::Error::custom)
    }
}
