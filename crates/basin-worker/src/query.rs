//! Query executor: runs structured specs against catalog tables.
//!
//! The plan is built in a fixed order (filters, projection/aggregation,
//! ordering, pagination), each stage a pure function over the prior relation.
//! The result is evaluated once: rows are counted from the collected batches,
//! the full result is written as a snappy-compressed parquet blob, and the
//! head is serialized as the inline JSON preview.

use std::sync::Arc;
use std::time::Duration;

use arrow::datatypes::Schema;
use arrow::record_batch::RecordBatch;
use chrono::Utc;
use datafusion::error::DataFusionError;
use datafusion::functions_aggregate::expr_fn::{avg, count, max, min, sum};
use datafusion::functions_aggregate::first_last::{first_value_udaf, last_value_udaf};
use datafusion::logical_expr::SortExpr;
use datafusion::prelude::{ident, lit, wildcard, DataFrame, Expr};
use datafusion::scalar::ScalarValue;
use tokio::time::timeout;

use basin_catalog::{reader, TableCatalog};
use basin_core::query::{FilterCondition, OrderBy, QuerySpec, SelectColumn};
use basin_core::{paths, Error, JobMessage, JobResult, JobStore, JobUpdate, Result, StorageBackend, WritePrecondition};

/// Executes query jobs.
#[derive(Clone)]
pub struct QueryExecutor {
    catalog: TableCatalog,
    warehouse: Arc<dyn StorageBackend>,
    warehouse_bucket: String,
    warehouse_path: String,
    jobs: Arc<dyn JobStore>,
    preview_max_rows: usize,
    query_timeout: Duration,
}

impl QueryExecutor {
    /// Creates an executor over the catalog and the warehouse backend.
    #[must_use]
    pub fn new(
        catalog: TableCatalog,
        warehouse: Arc<dyn StorageBackend>,
        warehouse_bucket: impl Into<String>,
        warehouse_path: impl Into<String>,
        jobs: Arc<dyn JobStore>,
        preview_max_rows: usize,
        query_timeout: Duration,
    ) -> Self {
        Self {
            catalog,
            warehouse,
            warehouse_bucket: warehouse_bucket.into(),
            warehouse_path: warehouse_path.into(),
            jobs,
            preview_max_rows,
            query_timeout,
        }
    }

    /// Processes one query job end-to-end.
    ///
    /// # Errors
    ///
    /// Propagates transport errors for redelivery and deterministic errors
    /// for terminal failure; the dispatcher decides which is which.
    pub async fn process(&self, message: &JobMessage) -> Result<()> {
        tracing::info!(job_id = %message.id, "processing query job");
        self.jobs
            .update(&message.id, &JobUpdate::processing("Started processing query"))
            .await?;

        let (_, spec_json) = message.query_fields()?;
        let spec: QuerySpec = serde_json::from_str(spec_json)
            .map_err(|e| Error::InvalidInput(format!("malformed query spec: {e}")))?;
        let (project, table) = split_source(&spec.source)?;

        let df = self.catalog.scan(project, table).await?;
        let df = apply_filters(df, &spec.filters)?;
        let df = apply_select(df, &spec)?;
        let df = apply_order(df, &spec.order_by)?;
        let df = apply_pagination(df, spec.offset, spec.limit)?;

        let plan_schema = df.schema().clone();
        let batches = timeout(self.query_timeout, df.collect())
            .await
            .map_err(|_| Error::Timeout {
                message: format!("query exceeded {}s", self.query_timeout.as_secs()),
            })?
            .map_err(|e| map_datafusion_error(&e))?;

        let row_count: u64 = batches.iter().map(|b| b.num_rows() as u64).sum();
        let schema: Arc<Schema> = batches
            .first()
            .map(RecordBatch::schema)
            .unwrap_or_else(|| Arc::new(Schema::from(&plan_schema)));

        let encoded = reader::write_parquet(&schema, &batches)?;
        let file_size_bytes = encoded.len() as u64;

        let relative = paths::query_result(&self.warehouse_path, project, &Utc::now());
        self.warehouse
            .put(&relative, encoded, WritePrecondition::None)
            .await?;
        let result_path = format!("{}/{relative}", self.warehouse_bucket);

        let preview_rows = usize::try_from(row_count)
            .unwrap_or(usize::MAX)
            .min(self.preview_max_rows);
        let preview = preview_json(&batches, preview_rows)?;

        let message_text =
            format!("Query completed: {row_count} rows, result stored at {result_path}");
        self.jobs
            .update(
                &message.id,
                &JobUpdate::completed(
                    &message_text,
                    JobResult {
                        result_path: Some(result_path),
                        row_count,
                        file_size_bytes,
                        result_data: Some(preview),
                    },
                ),
            )
            .await?;

        tracing::info!(job_id = %message.id, rows = row_count, "query job completed");
        Ok(())
    }
}

/// Splits `project.table` at the first dot.
fn split_source(source: &str) -> Result<(&str, &str)> {
    source
        .split_once('.')
        .filter(|(project, table)| !project.is_empty() && !table.is_empty())
        .ok_or_else(|| {
            Error::InvalidInput(format!(
                "source must be project.table, got '{source}'"
            ))
        })
}

/// Applies filter conditions by conjunction. Unknown operators are dropped
/// with a warning; they never fail the query.
fn apply_filters(mut df: DataFrame, filters: &[FilterCondition]) -> Result<DataFrame> {
    for filter in filters {
        match build_predicate(filter) {
            Some(predicate) => {
                df = df.filter(predicate).map_err(|e| map_datafusion_error(&e))?;
            }
            None => {
                tracing::warn!(
                    column = %filter.column,
                    operator = %filter.operator,
                    "unsupported filter operator, dropping filter"
                );
            }
        }
    }
    Ok(df)
}

fn build_predicate(filter: &FilterCondition) -> Option<Expr> {
    let column = ident(&filter.column);
    let value = filter.value.as_ref();

    match filter.operator.to_ascii_lowercase().as_str() {
        "=" | "==" => Some(column.eq(json_lit(value?))),
        "!=" | "<>" => Some(column.not_eq(json_lit(value?))),
        ">" => Some(column.gt(json_lit(value?))),
        "<" => Some(column.lt(json_lit(value?))),
        ">=" => Some(column.gt_eq(json_lit(value?))),
        "<=" => Some(column.lt_eq(json_lit(value?))),
        "like" => Some(column.like(json_lit(value?))),
        "in" => match value? {
            serde_json::Value::Array(values) => {
                Some(column.in_list(values.iter().map(json_lit).collect(), false))
            }
            _ => None,
        },
        "between" => Some(column.between(json_lit(value?), json_lit(filter.value2.as_ref()?))),
        "is_null" => Some(column.is_null()),
        "is_not_null" => Some(column.is_not_null()),
        _ => None,
    }
}

fn json_lit(value: &serde_json::Value) -> Expr {
    match value {
        serde_json::Value::Null => lit(ScalarValue::Null),
        serde_json::Value::Bool(b) => lit(*b),
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                lit(i)
            } else {
                lit(n.as_f64().unwrap_or(f64::NAN))
            }
        }
        serde_json::Value::String(s) => lit(s.clone()),
        other => lit(other.to_string()),
    }
}

/// Applies projection and aggregation.
///
/// When any select entry aggregates, the non-aggregated entries form the
/// implicit grouping key; aggregate outputs are named by their alias or
/// `agg(column)`. Without aggregation the entries project in order, with
/// alias renames. A bare `*` keeps the relation as-is.
fn apply_select(df: DataFrame, spec: &QuerySpec) -> Result<DataFrame> {
    if spec.select.is_empty() {
        return Ok(df);
    }
    if !spec.group_by.is_empty() {
        // Grouping is implied by the select shape; the explicit list is
        // accepted for compatibility.
        tracing::debug!(group_by = ?spec.group_by, "explicit group_by columns");
    }

    let star_only = spec.select.len() == 1
        && spec.select[0].column == "*"
        && spec.select[0]
            .aggregation
            .as_deref()
            .is_none_or(str::is_empty);
    if star_only {
        return Ok(df);
    }

    if spec.has_aggregation() {
        apply_aggregation(df, &spec.select)
    } else {
        let exprs = spec
            .select
            .iter()
            .map(|entry| {
                if entry.column == "*" {
                    wildcard()
                } else {
                    aliased(ident(&entry.column), entry.alias.as_deref())
                }
            })
            .collect::<Vec<_>>();
        df.select(exprs).map_err(|e| map_datafusion_error(&e))
    }
}

fn apply_aggregation(df: DataFrame, select: &[SelectColumn]) -> Result<DataFrame> {
    let mut group_exprs = Vec::new();
    let mut agg_exprs = Vec::new();
    // (output name, alias to apply in the final projection)
    let mut output: Vec<(String, Option<String>)> = Vec::new();

    for entry in select {
        let aggregation = entry
            .aggregation
            .as_deref()
            .filter(|a| !a.is_empty())
            .map(str::to_ascii_lowercase);

        match aggregation.as_deref().and_then(|a| build_aggregate(a, &entry.column)) {
            Some(expr) => {
                let name = entry.alias.clone().unwrap_or_else(|| {
                    format!(
                        "{}({})",
                        aggregation.as_deref().unwrap_or_default(),
                        entry.column
                    )
                });
                agg_exprs.push(expr.alias(&name));
                output.push((name, None));
            }
            None => {
                if let Some(unknown) = aggregation {
                    tracing::warn!(
                        aggregation = %unknown,
                        column = %entry.column,
                        "unsupported aggregation, treating as grouping column"
                    );
                }
                group_exprs.push(ident(&entry.column));
                output.push((entry.column.clone(), entry.alias.clone()));
            }
        }
    }

    let df = df
        .aggregate(group_exprs, agg_exprs)
        .map_err(|e| map_datafusion_error(&e))?;

    // Re-project so columns come out in the requested order with their
    // requested names.
    let exprs = output
        .into_iter()
        .map(|(name, alias)| aliased(ident(&name), alias.as_deref()))
        .collect::<Vec<_>>();
    df.select(exprs).map_err(|e| map_datafusion_error(&e))
}

fn build_aggregate(aggregation: &str, column: &str) -> Option<Expr> {
    let target = if column == "*" { lit(1_i64) } else { ident(column) };
    match aggregation {
        "sum" => Some(sum(target)),
        "avg" | "average" => Some(avg(target)),
        "count" => Some(count(target)),
        "min" => Some(min(target)),
        "max" => Some(max(target)),
        "first" => Some(first_value_udaf().call(vec![target])),
        "last" => Some(last_value_udaf().call(vec![target])),
        _ => None,
    }
}

fn aliased(expr: Expr, alias: Option<&str>) -> Expr {
    match alias.filter(|a| !a.is_empty()) {
        Some(alias) => expr.alias(alias),
        None => expr,
    }
}

/// Applies ordering directives. Direction is case-insensitive and defaults to
/// ascending; nulls sort first on ascending, last on descending.
fn apply_order(df: DataFrame, order_by: &[OrderBy]) -> Result<DataFrame> {
    if order_by.is_empty() {
        return Ok(df);
    }
    let sort_exprs: Vec<SortExpr> = order_by
        .iter()
        .map(|order| {
            let ascending = !order.is_descending();
            ident(&order.column).sort(ascending, ascending)
        })
        .collect();
    df.sort(sort_exprs).map_err(|e| map_datafusion_error(&e))
}

/// Applies `offset` then `limit`; both optional and non-negative.
fn apply_pagination(df: DataFrame, offset: Option<u64>, limit: Option<u64>) -> Result<DataFrame> {
    if offset.is_none() && limit.is_none() {
        return Ok(df);
    }
    let skip = usize::try_from(offset.unwrap_or(0)).unwrap_or(usize::MAX);
    let fetch = limit.map(|l| usize::try_from(l).unwrap_or(usize::MAX));
    df.limit(skip, fetch).map_err(|e| map_datafusion_error(&e))
}

/// Serializes the first `limit` rows as a JSON array of row objects keyed by
/// output column name.
fn preview_json(batches: &[RecordBatch], limit: usize) -> Result<serde_json::Value> {
    let mut remaining = limit;
    let mut head = Vec::new();
    for batch in batches {
        if remaining == 0 {
            break;
        }
        let take = batch.num_rows().min(remaining);
        if take > 0 {
            head.push(batch.slice(0, take));
            remaining -= take;
        }
    }
    if head.is_empty() {
        return Ok(serde_json::Value::Array(Vec::new()));
    }

    let mut writer = arrow::json::ArrayWriter::new(Vec::new());
    let refs: Vec<&RecordBatch> = head.iter().collect();
    writer
        .write_batches(&refs)
        .map_err(|e| Error::execution(format!("failed to serialize preview: {e}")))?;
    writer
        .finish()
        .map_err(|e| Error::execution(format!("failed to finalize preview: {e}")))?;

    let buffer = writer.into_inner();
    if buffer.is_empty() {
        return Ok(serde_json::Value::Array(Vec::new()));
    }
    serde_json::from_slice(&buffer)
        .map_err(|e| Error::execution(format!("preview is not valid JSON: {e}")))
}

/// Maps engine failures into the shared taxonomy: object store trouble is
/// transient, everything else is deterministic.
fn map_datafusion_error(error: &DataFusionError) -> Error {
    match error {
        DataFusionError::ObjectStore(_) => Error::storage(error.to_string()),
        _ => Error::execution(error.to_string()),
    }
}
