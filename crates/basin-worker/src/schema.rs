//! Schema executor: emits a table's column list without scanning data.

use std::sync::Arc;

use basin_catalog::TableCatalog;
use basin_core::{JobMessage, JobResult, JobStore, JobUpdate, Result};

/// Executes schema-request jobs.
#[derive(Clone)]
pub struct SchemaExecutor {
    catalog: TableCatalog,
    jobs: Arc<dyn JobStore>,
}

impl SchemaExecutor {
    /// Creates an executor over the catalog.
    #[must_use]
    pub fn new(catalog: TableCatalog, jobs: Arc<dyn JobStore>) -> Self {
        Self { catalog, jobs }
    }

    /// Processes one schema request.
    ///
    /// The column list becomes the job's preview; `row_count` carries the
    /// column count, no result blob is written.
    ///
    /// # Errors
    ///
    /// Returns `NotFound` when the table does not exist; the dispatcher turns
    /// that into a terminal failure.
    pub async fn process(&self, message: &JobMessage) -> Result<()> {
        tracing::info!(job_id = %message.id, "processing schema request");
        self.jobs
            .update(
                &message.id,
                &JobUpdate::processing("Reading table schema from catalog metadata"),
            )
            .await?;

        let (project, table) = message.schema_fields()?;
        let columns = self.catalog.schema(project, table).await?;
        let count = columns.len() as u64;

        let preview = serde_json::to_value(&columns)?;
        let message_text =
            format!("Schema retrieved: {count} columns from table {project}.{table}");
        self.jobs
            .update(
                &message.id,
                &JobUpdate::completed(
                    &message_text,
                    JobResult {
                        result_path: None,
                        row_count: count,
                        file_size_bytes: 0,
                        result_data: Some(preview),
                    },
                ),
            )
            .await?;

        tracing::info!(job_id = %message.id, columns = count, "schema request completed");
        Ok(())
    }
}
