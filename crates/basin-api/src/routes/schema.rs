//! Schema request route.
//!
//! Schema reads go through the same asynchronous pipeline as queries: the
//! worker reads table metadata and publishes the column list as the job's
//! preview.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::get;
use axum::{Json, Router};
use bytes::Bytes;
use uuid::Uuid;

use basin_core::{Job, JobMessage, JobUpdate};

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

/// Creates the schema route.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new().route("/schema/:project/:table", get(request_schema))
}

/// GET /api/v1/schema/{project}/{table}
async fn request_schema(
    State(state): State<Arc<AppState>>,
    Path((project, table)): Path<(String, String)>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let id = Uuid::new_v4().to_string();
    tracing::info!(job_id = %id, project = %project, table = %table, "received schema request");

    let job = Job::schema(&id, &project, &table);
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
