//! Canonical object-store key layout.
//!
//! All path construction lives here so the coordinator, worker, and catalog
//! agree on where blobs land. Paths are bucket-relative and use `/` as the
//! separator.

use chrono::{DateTime, Utc};

/// Staging path for a raw upload: `uploads/<job_id>/<file_name>`.
#[must_use]
pub fn staging_upload(job_id: &str, file_name: &str) -> String {
    format!("uploads/{job_id}/{file_name}")
}

/// Table root inside the warehouse bucket: `<warehouse>/<project>/<table>`.
#[must_use]
pub fn table_root(warehouse: &str, project: &str, table: &str) -> String {
    format!("{warehouse}/{project}/{table}")
}

/// Manifest key for a table.
#[must_use]
pub fn table_manifest(warehouse: &str, project: &str, table: &str) -> String {
    format!("{}/manifest.json", table_root(warehouse, project, table))
}

/// Data file key for a table part.
#[must_use]
pub fn table_part(warehouse: &str, project: &str, table: &str, part_id: &str) -> String {
    format!(
        "{}/data/part-{part_id}.parquet",
        table_root(warehouse, project, table)
    )
}

/// Namespace marker key: `<warehouse>/<project>/.namespace`.
#[must_use]
pub fn namespace_marker(warehouse: &str, project: &str) -> String {
    format!("{warehouse}/{project}/.namespace")
}

/// Query result key:
/// `<warehouse>/<project>/queries/query_<yyyyMMdd_HHmmss>/result.parquet`.
#[must_use]
pub fn query_result(warehouse: &str, project: &str, at: &DateTime<Utc>) -> String {
    format!(
        "{warehouse}/{project}/queries/query_{}/result.parquet",
        at.format("%Y%m%d_%H%M%S")
    )
}

/// Sanitizes a table name to `[a-z0-9_]`, falling back to `default_table`
/// when nothing usable remains.
#[must_use]
pub fn sanitize_table_name(name: Option<&str>) -> String {
    let cleaned: String = name
        .unwrap_or("")
        .trim()
        .to_ascii_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();

    if cleaned.chars().all(|c| c == '_') {
        "default_table".to_string()
    } else {
        cleaned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn staging_path_format() {
        assert_eq!(
            staging_upload("abc-123", "sales.csv"),
            "uploads/abc-123/sales.csv"
        );
    }

    #[test]
    fn query_result_path_embeds_timestamp() {
        let at = Utc.with_ymd_and_hms(2026, 3, 14, 9, 26, 53).unwrap();
        assert_eq!(
            query_result("wh", "p1", &at),
            "wh/p1/queries/query_20260314_092653/result.parquet"
        );
    }

    #[test]
    fn table_keys() {
        assert_eq!(table_manifest("wh", "p1", "t1"), "wh/p1/t1/manifest.json");
        assert_eq!(
            table_part("wh", "p1", "t1", "0000"),
            "wh/p1/t1/data/part-0000.parquet"
        );
        assert_eq!(namespace_marker("wh", "p1"), "wh/p1/.namespace");
    }

    #[test]
    fn table_names_are_sanitized() {
        assert_eq!(sanitize_table_name(Some("Sales Data!")), "sales_data_");
        assert_eq!(sanitize_table_name(Some("t1")), "t1");
        assert_eq!(sanitize_table_name(Some("   ")), "default_table");
        assert_eq!(sanitize_table_name(None), "default_table");
    }
}
