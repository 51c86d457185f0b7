//! The table catalog facade.
//!
//! Everything the coordinator and worker know about tables goes through this
//! type: namespace creation, existence checks, atomic appends, scans, and
//! schema reads. The facade owns the commit protocol; callers never touch
//! manifests directly.

use std::sync::Arc;

use arrow::array::ArrayRef;
use arrow::compute::cast;
use arrow::datatypes::Schema;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use datafusion::datasource::MemTable;
use datafusion::prelude::{DataFrame, SessionContext};
use uuid::Uuid;

use basin_core::paths;
use basin_core::{Error, Result, StorageBackend, WritePrecondition, WriteResult};

use crate::manifest::{ColumnSpec, DataFile, TableManifest};
use crate::reader::{batches_from_parquet, write_parquet, Relation};

/// Attempts before an append gives up on the manifest CAS race.
const COMMIT_ATTEMPTS: u32 = 5;

/// Facade over the warehouse bucket exposing transactional table semantics.
#[derive(Clone)]
pub struct TableCatalog {
    storage: Arc<dyn StorageBackend>,
    warehouse: String,
}

impl std::fmt::Debug for TableCatalog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TableCatalog")
            .field("warehouse", &self.warehouse)
            .finish_non_exhaustive()
    }
}

impl TableCatalog {
    /// Creates a facade over the given backend with a warehouse path prefix
    /// (conventionally `wh`).
    #[must_use]
    pub fn new(storage: Arc<dyn StorageBackend>, warehouse: impl Into<String>) -> Self {
        Self {
            storage,
            warehouse: warehouse.into(),
        }
    }

    /// Creates the namespace marker for a project if it is absent.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` on transport failure.
    pub async fn create_namespace_if_absent(&self, project: &str) -> Result<()> {
        let marker = paths::namespace_marker(&self.warehouse, project);
        match self
            .storage
            .put(&marker, Bytes::new(), WritePrecondition::DoesNotExist)
            .await?
        {
            WriteResult::Success { .. } => {
                tracing::info!(project, "created namespace");
            }
            WriteResult::PreconditionFailed => {}
        }
        Ok(())
    }

    /// Returns true when the table has been created.
    ///
    /// # Errors
    ///
    /// Returns `Error::Storage` on transport failure.
    pub async fn table_exists(&self, project: &str, table: &str) -> Result<bool> {
        let manifest = paths::table_manifest(&self.warehouse, project, table);
        Ok(self.storage.head(&manifest).await?.is_some())
    }

    /// Appends a relation to the table, creating it when absent.
    ///
    /// The data file is written first, then the manifest commit is attempted
    /// with compare-and-swap; a lost race re-reads the manifest and retries.
    /// Returns the number of appended rows.
    ///
    /// # Errors
    ///
    /// Returns `Error::SchemaMismatch` when the relation is incompatible with
    /// the existing table, `Error::Catalog` when the commit race cannot be
    /// won, or `Error::Storage` on transport failure.
    pub async fn append(&self, project: &str, table: &str, relation: &Relation) -> Result<u64> {
        let incoming: Vec<ColumnSpec> = relation
            .schema
            .fields()
            .iter()
            .map(|f| ColumnSpec::from_field(f))
            .collect();
        let row_count = relation.row_count();

        let part_id = Uuid::new_v4().to_string();
        let part_path = paths::table_part(&self.warehouse, project, table, &part_id);

        for attempt in 1..=COMMIT_ATTEMPTS {
            let existing = self.load_manifest_versioned(project, table).await?;

            let (mut manifest, precondition) = match existing {
                Some((manifest, version)) => (manifest, WritePrecondition::MatchesVersion(version)),
                None => (
                    TableManifest::new(incoming.clone()),
                    WritePrecondition::DoesNotExist,
                ),
            };

            if let Err(mismatch) = manifest.merge_schema(&incoming) {
                return Err(mismatch);
            }

            // Normalize to the (possibly widened) canonical schema before the
            // first byte of data is written, so every part file agrees.
            let canonical = manifest.arrow_schema();
            let aligned = align_batches(&canonical, &relation.batches)?;
            let encoded = write_parquet(&canonical, &aligned)?;
            let size_bytes = encoded.len() as u64;

            self.storage
                .put(&part_path, encoded, WritePrecondition::None)
                .await?;

            manifest.add_file(DataFile {
                path: part_path.clone(),
                row_count,
                size_bytes,
            });

            let payload = Bytes::from(serde_json::to_vec(&manifest)?);
            let manifest_path = paths::table_manifest(&self.warehouse, project, table);
            match self.storage.put(&manifest_path, payload, precondition).await? {
                WriteResult::Success { .. } => {
                    tracing::info!(
                        project,
                        table,
                        rows = row_count,
                        attempt,
                        "committed append"
                    );
                    return Ok(row_count);
                }
                WriteResult::PreconditionFailed => {
                    tracing::warn!(project, table, attempt, "lost manifest commit race, retrying");
                }
            }
        }

        // The part file never became visible; remove it best-effort.
        if let Err(e) = self.storage.delete(&part_path).await {
            tracing::warn!(error = %e, path = %part_path, "failed to clean up orphan part file");
        }
        Err(Error::catalog(format!(
            "append to {project}.{table} lost the commit race {COMMIT_ATTEMPTS} times"
        )))
    }

    /// Opens a lazily-evaluated scan of the table.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` when the table does not exist and
    /// `Error::Execution` when its data cannot be decoded.
    pub async fn scan(&self, project: &str, table: &str) -> Result<DataFrame> {
        let manifest = self
            .load_manifest(project, table)
            .await?
            .ok_or_else(|| Error::NotFound(format!("table not found: {project}.{table}")))?;

        let schema = manifest.arrow_schema();
        let mut batches = Vec::new();
        for file in &manifest.files {
            let bytes = self.storage.get(&file.path).await?;
            let part = batches_from_parquet(bytes)?;
            batches.extend(align_batches(&schema, &part.batches)?);
        }

        let provider = MemTable::try_new(schema, vec![batches])
            .map_err(|e| Error::execution(format!("failed to build scan: {e}")))?;
        let ctx = SessionContext::new();
        ctx.read_table(Arc::new(provider))
            .map_err(|e| Error::execution(format!("failed to open scan: {e}")))
    }

    /// Returns the table's declared columns without scanning data.
    ///
    /// # Errors
    ///
    /// Returns `Error::NotFound` when the table does not exist.
    pub async fn schema(&self, project: &str, table: &str) -> Result<Vec<ColumnSpec>> {
        let manifest = self
            .load_manifest(project, table)
            .await?
            .ok_or_else(|| Error::NotFound(format!("table not found: {project}.{table}")))?;
        Ok(manifest.schema)
    }

    async fn load_manifest(&self, project: &str, table: &str) -> Result<Option<TableManifest>> {
        Ok(self
            .load_manifest_versioned(project, table)
            .await?
            .map(|(manifest, _)| manifest))
    }

    /// Reads the manifest together with its CAS version token.
    ///
    /// The version is captured with `head` before the body is read: a write
    /// racing in between makes the token stale, which the commit detects.
    async fn load_manifest_versioned(
        &self,
        project: &str,
        table: &str,
    ) -> Result<Option<(TableManifest, String)>> {
        let path = paths::table_manifest(&self.warehouse, project, table);
        let Some(meta) = self.storage.head(&path).await? else {
            return Ok(None);
        };
        let bytes = self.storage.get(&path).await?;
        let manifest: TableManifest = serde_json::from_slice(&bytes).map_err(|e| {
            Error::catalog(format!("unreadable manifest for {project}.{table}: {e}"))
        })?;
        Ok(Some((manifest, meta.version)))
    }
}

/// Reorders and casts batches to the canonical schema.
fn align_batches(schema: &Arc<Schema>, batches: &[RecordBatch]) -> Result<Vec<RecordBatch>> {
    batches
        .iter()
        .map(|batch| {
            let columns = schema
                .fields()
                .iter()
                .map(|field| {
                    let index = batch.schema().index_of(field.name()).map_err(|_| {
                        Error::execution(format!("column '{}' missing from batch", field.name()))
                    })?;
                    let column = batch.column(index);
                    if column.data_type() == field.data_type() {
                        Ok(Arc::clone(column))
                    } else {
                        cast(column, field.data_type()).map_err(|e| {
                            Error::execution(format!(
                                "cannot cast column '{}' to {}: {e}",
                                field.name(),
                                field.data_type()
                            ))
                        })
                    }
                })
                .collect::<Result<Vec<ArrayRef>>>()?;

            RecordBatch::try_new(schema.clone(), columns)
                .map_err(|e| Error::execution(format!("failed to align batch: {e}")))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use basin_core::MemoryBackend;
    use std::io::Write;

    fn csv_relation(content: &str) -> Relation {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("data.csv");
        let mut file = std::fs::File::create(&path).unwrap();
        file.write_all(content.as_bytes()).unwrap();
        crate::reader::read_file(&path).unwrap()
    }

    fn catalog() -> TableCatalog {
        TableCatalog::new(Arc::new(MemoryBackend::new()), "wh")
    }

    #[tokio::test]
    async fn namespace_creation_is_idempotent() {
        let catalog = catalog();
        catalog.create_namespace_if_absent("p1").await.unwrap();
        catalog.create_namespace_if_absent("p1").await.unwrap();
    }

    #[tokio::test]
    async fn append_creates_then_appends() {
        let catalog = catalog();
        let relation = csv_relation("id,amount\n1,10.5\n2,11.0\n");

        assert!(!catalog.table_exists("p1", "t1").await.unwrap());
        let rows = catalog.append("p1", "t1", &relation).await.unwrap();
        assert_eq!(rows, 2);
        assert!(catalog.table_exists("p1", "t1").await.unwrap());

        let rows = catalog.append("p1", "t1", &relation).await.unwrap();
        assert_eq!(rows, 2);

        let df = catalog.scan("p1", "t1").await.unwrap();
        let count = df.count().await.unwrap();
        assert_eq!(count, 4);
    }

    #[tokio::test]
    async fn incompatible_append_is_schema_mismatch() {
        let catalog = catalog();
        catalog
            .append("p1", "t1", &csv_relation("id,amount\n1,10.5\n"))
            .await
            .unwrap();

        let err = catalog
            .append("p1", "t1", &csv_relation("id,region\n1,N\n"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { .. }));

        // The failed append committed nothing.
        let df = catalog.scan("p1", "t1").await.unwrap();
        assert_eq!(df.count().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn scan_of_missing_table_is_not_found() {
        let catalog = catalog();
        let err = catalog.scan("p1", "missing").await.unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn schema_reads_manifest_only() {
        let catalog = catalog();
        catalog
            .append("p1", "t1", &csv_relation("id,name,amount\n1,widget,9.5\n"))
            .await
            .unwrap();

        let columns = catalog.schema("p1", "t1").await.unwrap();
        let names: Vec<_> = columns.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["id", "name", "amount"]);
        assert_eq!(columns[0].data_type, "integer");
        assert_eq!(columns[2].data_type, "float");
    }

    #[tokio::test]
    async fn appends_with_reordered_columns_align() {
        let catalog = catalog();
        catalog
            .append("p1", "t1", &csv_relation("id,region\n1,N\n"))
            .await
            .unwrap();
        catalog
            .append("p1", "t1", &csv_relation("region,id\nS,2\n"))
            .await
            .unwrap();

        let df = catalog.scan("p1", "t1").await.unwrap();
        assert_eq!(df.count().await.unwrap(), 2);
    }
}
