//! Catalog integration tests: append/scan/schema across multiple commits.

use std::io::Write;
use std::sync::Arc;

use anyhow::Result;

use basin_catalog::{reader, TableCatalog};
use basin_core::MemoryBackend;

fn csv_relation(content: &str) -> Result<reader::Relation> {
    let dir = tempfile::TempDir::new()?;
    let path = dir.path().join("data.csv");
    let mut file = std::fs::File::create(&path)?;
    file.write_all(content.as_bytes())?;
    Ok(reader::read_file(&path)?)
}

#[tokio::test]
async fn three_appends_produce_one_logical_relation() -> Result<()> {
    let catalog = TableCatalog::new(Arc::new(MemoryBackend::new()), "wh");
    catalog.create_namespace_if_absent("p1").await?;

    for rows in [15_usize, 20, 25] {
        let mut csv = String::from("id,revenue\n");
        for i in 0..rows {
            csv.push_str(&format!("{i},{}\n", i * 7));
        }
        let relation = csv_relation(&csv)?;
        let appended = catalog.append("p1", "t2", &relation).await?;
        assert_eq!(appended, rows as u64);
    }

    let df = catalog.scan("p1", "t2").await?;
    assert_eq!(df.count().await?, 60);

    // Scanning reflects every append; the schema endpoint needs no data scan.
    let columns = catalog.schema("p1", "t2").await?;
    assert_eq!(columns.len(), 2);
    Ok(())
}

#[tokio::test]
async fn scan_row_count_grows_by_the_appended_amount() -> Result<()> {
    let catalog = TableCatalog::new(Arc::new(MemoryBackend::new()), "wh");
    let relation = csv_relation("id\n1\n2\n3\n")?;

    catalog.append("p1", "grow", &relation).await?;
    let before = catalog.scan("p1", "grow").await?.count().await?;

    catalog.append("p1", "grow", &relation).await?;
    let after = catalog.scan("p1", "grow").await?.count().await?;

    assert_eq!(after, before + 3);
    Ok(())
}

#[tokio::test]
async fn filters_prune_before_materialization() -> Result<()> {
    use datafusion::prelude::{ident, lit};

    let catalog = TableCatalog::new(Arc::new(MemoryBackend::new()), "wh");
    let relation = csv_relation("region,amount\nN,1\nS,2\nN,3\nS,4\n")?;
    catalog.append("p1", "t3", &relation).await?;

    let df = catalog.scan("p1", "t3").await?;
    let filtered = df.filter(ident("region").eq(lit("N")))?;
    assert_eq!(filtered.count().await?, 2);
    Ok(())
}
