//! File readers for ingestion and parquet encoding helpers.
//!
//! The delimited-text reader infers a schema from the header row and a sample
//! of the data (integer, then float, then date, then string per column).
//! JSON uploads must be an array of flat objects; parquet uploads pass
//! through. Spreadsheet formats are rejected outright.

use std::fs::File;
use std::io::{BufReader, Cursor, Seek, SeekFrom};
use std::path::Path;
use std::sync::Arc;

use arrow::csv;
use arrow::datatypes::Schema;
use arrow::json;
use arrow::array::RecordBatchReader;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ArrowWriter;
use parquet::basic::Compression;
use parquet::file::properties::WriterProperties;

use basin_core::{Error, Result};

/// An in-memory relation: a schema plus its record batches.
#[derive(Debug, Clone)]
pub struct Relation {
    /// Schema shared by every batch.
    pub schema: Arc<Schema>,
    /// The data.
    pub batches: Vec<RecordBatch>,
}

impl Relation {
    /// Total rows across all batches.
    #[must_use]
    pub fn row_count(&self) -> u64 {
        self.batches.iter().map(|b| b.num_rows() as u64).sum()
    }
}

/// Reads a local file into a relation, dispatching on the file suffix.
///
/// # Errors
///
/// Returns `InvalidInput` for unsupported suffixes, unreadable content, or a
/// file with no data rows.
pub fn read_file(path: &Path) -> Result<Relation> {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    let relation = if name.ends_with(".csv") {
        read_csv(path)?
    } else if name.ends_with(".json") {
        read_json(path)?
    } else if name.ends_with(".parquet") {
        read_parquet(path)?
    } else if name.ends_with(".xlsx") || name.ends_with(".xls") {
        return Err(Error::InvalidInput(
            "XLSX/XLS file processing is not supported; convert to CSV format".to_string(),
        ));
    } else {
        return Err(Error::InvalidInput(format!("unsupported file type: {name}")));
    };

    if relation.row_count() == 0 {
        return Err(Error::InvalidInput(
            "file contains no data rows".to_string(),
        ));
    }
    Ok(relation)
}

fn read_csv(path: &Path) -> Result<Relation> {
    let mut file = File::open(path)
        .map_err(|e| Error::InvalidInput(format!("cannot open uploaded file: {e}")))?;

    let format = csv::reader::Format::default().with_header(true);
    let (schema, _) = format
        .infer_schema(&mut file, None)
        .map_err(|e| Error::InvalidInput(format!("could not read CSV header or rows: {e}")))?;
    file.seek(SeekFrom::Start(0))
        .map_err(|e| Error::InvalidInput(format!("cannot rewind uploaded file: {e}")))?;

    let schema = Arc::new(schema);
    let reader = csv::ReaderBuilder::new(schema.clone())
        .with_header(true)
        .build(file)
        .map_err(|e| Error::InvalidInput(format!("could not read CSV: {e}")))?;

    let batches = reader
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::InvalidInput(format!("could not parse CSV rows: {e}")))?;

    Ok(Relation { schema, batches })
}

fn read_json(path: &Path) -> Result<Relation> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| Error::InvalidInput(format!("cannot open uploaded file: {e}")))?;
    let value: serde_json::Value = serde_json::from_str(&raw)
        .map_err(|e| Error::InvalidInput(format!("could not parse JSON: {e}")))?;

    let rows = match value {
        serde_json::Value::Array(rows) => rows,
        object @ serde_json::Value::Object(_) => vec![object],
        _ => {
            return Err(Error::InvalidInput(
                "JSON upload must be an array of objects".to_string(),
            ));
        }
    };

    // The arrow JSON reader consumes newline-delimited records.
    let mut ndjson = String::new();
    for row in &rows {
        ndjson.push_str(&row.to_string());
        ndjson.push('\n');
    }

    let (schema, _) = json::reader::infer_json_schema(
        &mut BufReader::new(Cursor::new(ndjson.as_bytes())),
        None,
    )
    .map_err(|e| Error::InvalidInput(format!("could not infer JSON schema: {e}")))?;

    let schema = Arc::new(schema);
    let reader = json::ReaderBuilder::new(schema.clone())
        .build(BufReader::new(Cursor::new(ndjson.as_bytes())))
        .map_err(|e| Error::InvalidInput(format!("could not read JSON: {e}")))?;

    let batches = reader
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(|e| Error::InvalidInput(format!("could not parse JSON rows: {e}")))?;

    Ok(Relation { schema, batches })
}

fn read_parquet(path: &Path) -> Result<Relation> {
    let raw = std::fs::read(path)
        .map_err(|e| Error::InvalidInput(format!("cannot open uploaded file: {e}")))?;
    batches_from_parquet(Bytes::from(raw))
        .map_err(|e| Error::InvalidInput(format!("could not read parquet upload: {e}")))
}

/// Decodes a parquet byte buffer into a relation.
///
/// # Errors
///
/// Returns `Error::Execution` when the buffer is not valid parquet.
pub fn batches_from_parquet(bytes: Bytes) -> Result<Relation> {
    let builder = ParquetRecordBatchReaderBuilder::try_new(bytes)
        .map_err(|e| Error::execution(format!("parquet reader init failed: {e}")))?;
    let reader = builder
        .build()
        .map_err(|e| Error::execution(format!("parquet reader build failed: {e}")))?;

    let schema = reader.schema();
    let mut batches = Vec::new();
    for batch in reader {
        let batch =
            batch.map_err(|e| Error::execution(format!("parquet read batch failed: {e}")))?;
        batches.push(batch);
    }
    Ok(Relation { schema, batches })
}

/// Encodes record batches as a single snappy-compressed parquet buffer.
///
/// # Errors
///
/// Returns `Error::Execution` when encoding fails.
pub fn write_parquet(schema: &Arc<Schema>, batches: &[RecordBatch]) -> Result<Bytes> {
    let props = WriterProperties::builder()
        .set_compression(Compression::SNAPPY)
        .build();

    let mut cursor = Cursor::new(Vec::<u8>::new());
    let mut writer = ArrowWriter::try_new(&mut cursor, schema.clone(), Some(props))
        .map_err(|e| Error::execution(format!("parquet writer init failed: {e}")))?;
    for batch in batches {
        writer
            .write(batch)
            .map_err(|e| Error::execution(format!("parquet write failed: {e}")))?;
    }
    writer
        .close()
        .map_err(|e| Error::execution(format!("parquet close failed: {e}")))?;

    Ok(Bytes::from(cursor.into_inner()))
}
