//! Query submission, status, and result download routes.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Path, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use bytes::Bytes;
use uuid::Uuid;

use basin_core::query::{is_known_aggregation, is_known_operator};
use basin_core::{paths, Job, JobKind, JobMessage, JobStatus, JobUpdate, QuerySpec};

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

/// Creates the query routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/query", post(submit_query))
        .route("/query/:id", get(get_query_status))
        .route("/query/:id/download", get(download_result))
}

/// POST /api/v1/query
///
/// Validates the spec shape, resolves a job-id source to its table, persists
/// the job, and enqueues it. Unknown operators and aggregations are accepted
/// here and dropped at execution time; they never fail the submission.
async fn submit_query(
    State(state): State<Arc<AppState>>,
    Json(mut spec): Json<QuerySpec>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    if spec.source.trim().is_empty() {
        return Err(ApiError::bad_request(
            "source is required (format: project.table)",
        ));
    }

    for entry in &spec.select {
        if entry.column.trim().is_empty() {
            return Err(ApiError::bad_request("select entries require a column"));
        }
        if let Some(aggregation) = entry.aggregation.as_deref() {
            if !aggregation.is_empty() && !is_known_aggregation(aggregation) {
                tracing::warn!(aggregation, "unknown aggregation in query spec");
            }
        }
    }
    for filter in &spec.filters {
        if filter.column.trim().is_empty() {
            return Err(ApiError::bad_request("filters require a column"));
        }
        if !is_known_operator(&filter.operator) {
            tracing::warn!(operator = %filter.operator, "unknown operator in query spec");
        }
    }

    spec.source = resolve_source(&state, &spec.source).await?;

    let id = Uuid::new_v4().to_string();
    let spec_json = serde_json::to_string(&spec)
        .map_err(|e| ApiError::internal(format!("failed to encode query spec: {e}")))?;

    tracing::info!(job_id = %id, source = %spec.source, "received query");

    let job = Job::query(&id, &spec.source, &spec_json);
    state.jobs.create(&job).await?;

    let message = serde_json::to_vec(&JobMessage::for_job(&job))
        .map_err(|e| ApiError::internal(format!("failed to encode job message: {e}")))?;
    if let Err(e) = state.bus.publish(Bytes::from(message)).await {
        if let Err(update_err) = state.jobs.update(&id, &JobUpdate::failed("bus_error")).await {
            tracing::error!(job_id = %id, error = %update_err, "failed to mark job failed after enqueue failure");
        }
        return Err(e.into());
    }

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({
            "id": id,
            "status": "queued",
            "check_status_at": format!("/api/v1/query/{id}"),
        })),
    ))
}

/// Rewrites a job-id source to the `project.table` its upload targeted.
async fn resolve_source(state: &AppState, source: &str) -> ApiResult<String> {
    if source.contains('.') {
        return Ok(source.to_string());
    }

    let job = state
        .jobs
        .get(source)
        .await?
        .filter(|job| job.kind == JobKind::Upload)
        .ok_or_else(|| {
            ApiError::bad_request(format!(
                "source '{source}' is neither project.table nor a known upload job id"
            ))
        })?;

    let project = job
        .project
        .as_deref()
        .ok_or_else(|| ApiError::bad_request("upload job has no project"))?;
    let table = paths::sanitize_table_name(job.table.as_deref());
    Ok(format!("{project}.{table}"))
}

/// GET /api/v1/query/{id}
async fn get_query_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<Job>> {
    let job = state
        .jobs
        .get(&id)
        .await?
        .filter(|job| job.kind != JobKind::Upload)
        .ok_or_else(|| ApiError::not_found("query job not found"))?;
    Ok(Json(job))
}

/// GET /api/v1/query/{id}/download
///
/// Streams the full columnar result once the job has completed.
async fn download_result(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Response> {
    let job = state
        .jobs
        .get(&id)
        .await?
        .filter(|job| job.kind == JobKind::Query)
        .ok_or_else(|| ApiError::not_found("query job not found"))?;

    if job.status != JobStatus::Completed {
        return Err(ApiError::not_found("query result is not available yet"));
    }
    let result_path = job
        .result_path
        .as_deref()
        .ok_or_else(|| ApiError::not_found("query produced no result blob"))?;

    // Recorded paths carry the bucket as their first segment.
    let relative = result_path
        .strip_prefix(&format!("{}/", state.config.store.warehouse_bucket))
        .unwrap_or(result_path);
    let bytes = state.warehouse.get(relative).await?;

    let file_name = relative.rsplit('/').next().unwrap_or("result.parquet");
    let mut response = Response::new(Body::from(bytes));
    response.headers_mut().insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/octet-stream"),
    );
    if let Ok(value) = HeaderValue::from_str(&format!("attachment; filename=\"{file_name}\"")) {
        response
            .headers_mut()
            .insert(header::CONTENT_DISPOSITION, value);
    }
    Ok(response)
}
