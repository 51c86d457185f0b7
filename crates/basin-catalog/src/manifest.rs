//! Table manifests: the commit point for every append.
//!
//! A manifest lists the table's schema and its live data files. It is the
//! only mutable object per table; data files are immutable once written.
//! Compare-and-swap on the manifest key makes concurrent appends serialize:
//! the loser re-reads and retries against the fresh state.

use arrow::datatypes::{DataType, Field, Schema, TimeUnit};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use basin_core::{Error, Result};

/// Manifest format version written by this crate.
pub const MANIFEST_FORMAT_VERSION: u32 = 1;

/// A column in the table schema.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Column name.
    pub name: String,
    /// Simple type name: `integer`, `float`, `boolean`, `date`, `timestamp`,
    /// or `string`.
    #[serde(rename = "type")]
    pub data_type: String,
    /// Whether the column admits nulls.
    pub nullable: bool,
}

impl ColumnSpec {
    /// Derives a column spec from an Arrow field.
    #[must_use]
    pub fn from_field(field: &Field) -> Self {
        Self {
            name: field.name().clone(),
            data_type: simple_type_name(field.data_type()),
            nullable: field.is_nullable(),
        }
    }

    /// Returns the canonical Arrow field for this column.
    #[must_use]
    pub fn to_field(&self) -> Field {
        Field::new(&self.name, canonical_arrow_type(&self.data_type), self.nullable)
    }
}

/// An immutable data file belonging to a table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DataFile {
    /// Bucket-relative key of the parquet file.
    pub path: String,
    /// Rows in the file.
    pub row_count: u64,
    /// File size in bytes.
    pub size_bytes: u64,
}

/// The manifest of a table: schema plus live file list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableManifest {
    /// Manifest format version.
    pub format_version: u32,
    /// Table schema.
    pub schema: Vec<ColumnSpec>,
    /// Live data files in append order.
    pub files: Vec<DataFile>,
    /// Total rows across all files.
    pub row_count: u64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Timestamp of the last commit.
    pub updated_at: DateTime<Utc>,
}

impl TableManifest {
    /// Creates a manifest for a new table with the given schema.
    #[must_use]
    pub fn new(schema: Vec<ColumnSpec>) -> Self {
        let now = Utc::now();
        Self {
            format_version: MANIFEST_FORMAT_VERSION,
            schema,
            files: Vec::new(),
            row_count: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns the canonical Arrow schema for the table.
    #[must_use]
    pub fn arrow_schema(&self) -> Arc<Schema> {
        Arc::new(Schema::new(
            self.schema
                .iter()
                .map(ColumnSpec::to_field)
                .collect::<Vec<_>>(),
        ))
    }

    /// Checks that an incoming schema can be appended to this table and
    /// widens column nullability where the incoming data requires it.
    ///
    /// Compatibility means the same column names with the same simple types,
    /// in any order.
    ///
    /// # Errors
    ///
    /// Returns `Error::SchemaMismatch` describing the first incompatibility.
    pub fn merge_schema(&mut self, incoming: &[ColumnSpec]) -> Result<()> {
        if incoming.len() != self.schema.len() {
            return Err(Error::SchemaMismatch {
                message: format!(
                    "table has {} columns, append has {}",
                    self.schema.len(),
                    incoming.len()
                ),
            });
        }

        for column in incoming {
            let Some(existing) = self.schema.iter_mut().find(|c| c.name == column.name) else {
                return Err(Error::SchemaMismatch {
                    message: format!("append column '{}' does not exist in table", column.name),
                });
            };
            if existing.data_type != column.data_type {
                return Err(Error::SchemaMismatch {
                    message: format!(
                        "column '{}' has type {}, append has type {}",
                        column.name, existing.data_type, column.data_type
                    ),
                });
            }
            existing.nullable = existing.nullable || column.nullable;
        }
        Ok(())
    }

    /// Records a committed data file.
    pub fn add_file(&mut self, file: DataFile) {
        self.row_count += file.row_count;
        self.files.push(file);
        self.updated_at = Utc::now();
    }
}

/// Maps an Arrow type to the simple type vocabulary of the schema endpoint.
#[must_use]
pub fn simple_type_name(data_type: &DataType) -> String {
    match data_type {
        DataType::Int8
        | DataType::Int16
        | DataType::Int32
        | DataType::Int64
        | DataType::UInt8
        | DataType::UInt16
        | DataType::UInt32
        | DataType::UInt64 => "integer".to_string(),
        DataType::Float16 | DataType::Float32 | DataType::Float64 => "float".to_string(),
        DataType::Boolean => "boolean".to_string(),
        DataType::Date32 | DataType::Date64 => "date".to_string(),
        DataType::Timestamp(_, _) => "timestamp".to_string(),
        DataType::Utf8 | DataType::LargeUtf8 => "string".to_string(),
        other => format!("{other}").to_ascii_lowercase(),
    }
}

/// Maps a simple type name back to the canonical Arrow type used for storage.
#[must_use]
pub fn canonical_arrow_type(simple: &str) -> DataType {
    match simple {
        "integer" => DataType::Int64,
        "float" => DataType::Float64,
        "boolean" => DataType::Boolean,
        "date" => DataType::Date32,
        "timestamp" => DataType::Timestamp(TimeUnit::Microsecond, None),
        _ => DataType::Utf8,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spec(name: &str, data_type: &str, nullable: bool) -> ColumnSpec {
        ColumnSpec {
            name: name.to_string(),
            data_type: data_type.to_string(),
            nullable,
        }
    }

    #[test]
    fn field_roundtrip_through_simple_types() {
        let field = Field::new("amount", DataType::Int32, true);
        let column = ColumnSpec::from_field(&field);
        assert_eq!(column.data_type, "integer");
        // Canonicalized to the widest integer type.
        assert_eq!(column.to_field().data_type(), &DataType::Int64);
    }

    #[test]
    fn merge_accepts_matching_schema_in_any_order() {
        let mut manifest = TableManifest::new(vec![
            spec("id", "integer", false),
            spec("name", "string", true),
        ]);
        manifest
            .merge_schema(&[spec("name", "string", true), spec("id", "integer", false)])
            .expect("compatible schema");
    }

    #[test]
    fn merge_widens_nullability() {
        let mut manifest = TableManifest::new(vec![spec("id", "integer", false)]);
        manifest
            .merge_schema(&[spec("id", "integer", true)])
            .unwrap();
        assert!(manifest.schema[0].nullable);
    }

    #[test]
    fn merge_rejects_type_change() {
        let mut manifest = TableManifest::new(vec![spec("id", "integer", false)]);
        let err = manifest
            .merge_schema(&[spec("id", "string", false)])
            .unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { .. }));
        assert!(!err.is_transient());
    }

    #[test]
    fn merge_rejects_unknown_column() {
        let mut manifest = TableManifest::new(vec![spec("id", "integer", false)]);
        let err = manifest
            .merge_schema(&[spec("uid", "integer", false)])
            .unwrap_err();
        assert!(matches!(err, Error::SchemaMismatch { .. }));
    }

    #[test]
    fn add_file_accumulates_row_count() {
        let mut manifest = TableManifest::new(vec![spec("id", "integer", false)]);
        manifest.add_file(DataFile {
            path: "wh/p/t/data/part-a.parquet".into(),
            row_count: 15,
            size_bytes: 100,
        });
        manifest.add_file(DataFile {
            path: "wh/p/t/data/part-b.parquet".into(),
            row_count: 20,
            size_bytes: 120,
        });
        assert_eq!(manifest.row_count, 35);
        assert_eq!(manifest.files.len(), 2);
    }
}
