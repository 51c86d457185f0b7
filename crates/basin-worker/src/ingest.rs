//! Ingest executor: turns a staged upload into table rows.
//!
//! Downloads the blob to a transient local file, reads it into a relation
//! (header row, inferred types), and appends it to the target table, creating
//! the table on first contact. The temp directory is removed on success and
//! failure alike.

use std::path::Path;
use std::sync::Arc;

use basin_catalog::{reader, TableCatalog};
use basin_core::{paths, Error, JobMessage, JobStore, JobUpdate, Result, StorageBackend};

/// Executes upload jobs.
#[derive(Clone)]
pub struct IngestExecutor {
    uploads: Arc<dyn StorageBackend>,
    catalog: TableCatalog,
    jobs: Arc<dyn JobStore>,
}

impl IngestExecutor {
    /// Creates an executor over the staging backend and the catalog.
    #[must_use]
    pub fn new(
        uploads: Arc<dyn StorageBackend>,
        catalog: TableCatalog,
        jobs: Arc<dyn JobStore>,
    ) -> Self {
        Self {
            uploads,
            catalog,
            jobs,
        }
    }

    /// Processes one upload job end-to-end.
    ///
    /// # Errors
    ///
    /// Propagates transport errors for redelivery and deterministic errors
    /// for terminal failure; the dispatcher decides which is which.
    pub async fn process(&self, message: &JobMessage) -> Result<()> {
        tracing::info!(job_id = %message.id, "processing upload job");
        self.jobs
            .update(&message.id, &JobUpdate::processing("Started processing upload"))
            .await?;

        let (project, blob_path, file_name, table) = message.upload_fields()?;

        tracing::info!(job_id = %message.id, blob_path, "downloading upload blob");
        let bytes = self.uploads.get(blob_path).await?;

        // The reader dispatches on the file suffix, so the transient file
        // keeps the original name (final path component only).
        let safe_name = Path::new(file_name)
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "upload".to_string());

        let dir = tempfile::TempDir::new().map_err(|e| Error::Internal {
            message: format!("failed to create temp directory: {e}"),
        })?;
        let local = dir.path().join(&safe_name);
        std::fs::write(&local, &bytes).map_err(|e| Error::Internal {
            message: format!("failed to write temp file: {e}"),
        })?;

        let relation = reader::read_file(&local)?;
        tracing::info!(
            job_id = %message.id,
            rows = relation.row_count(),
            columns = relation.schema.fields().len(),
            "read upload into relation"
        );

        self.catalog.create_namespace_if_absent(project).await?;
        let table_name = paths::sanitize_table_name(table);
        let rows = self.catalog.append(project, &table_name, &relation).await?;

        let message_text =
            format!("Successfully processed {rows} rows into table {project}.{table_name}");
        self.jobs
            .update(&message.id, &JobUpdate::completed_bare(&message_text))
            .await?;

        tracing::info!(job_id = %message.id, rows, "upload job completed");
        Ok(())
    }
}
