//! Job status routes: polling, the internal status-update surface, and queue
//! stats.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Deserialize;

use basin_core::{JobStatus, JobUpdate};

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

/// Creates the job routes.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/jobs/:id", get(get_job))
        .route("/jobs/:id/status", post(update_job_status))
        .route("/queue/stats", get(queue_stats))
}

/// GET /api/v1/jobs/{id}
///
/// Serves all three job kinds; clients need not know the kind in advance.
async fn get_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Json<basin_core::Job>> {
    let job = state
        .jobs
        .get(&id)
        .await?
        .ok_or_else(|| ApiError::not_found("job not found"))?;
    Ok(Json(job))
}

#[derive(Debug, Deserialize)]
struct UpdateStatusRequest {
    status: String,
    #[serde(default)]
    message: Option<String>,
}

/// POST /api/v1/jobs/{id}/status
///
/// Internal surface for non-worker writers (monitoring tools, admin repair).
/// Idempotent: returns 200 even when the id is unknown.
async fn update_job_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<UpdateStatusRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    if body.status.trim().is_empty() {
        return Err(ApiError::bad_request("status is required"));
    }
    let status = JobStatus::parse(&body.status)
        .filter(|s| *s != JobStatus::Queued)
        .ok_or_else(|| {
            ApiError::bad_request("invalid status; allowed: processing, completed, failed")
        })?;

    let update = JobUpdate {
        status,
        message: body.message.unwrap_or_default(),
        result: None,
    };
    state.jobs.update(&id, &update).await?;

    Ok(Json(serde_json::json!({
        "id": id,
        "status": status.as_str(),
    })))
}

/// GET /api/v1/queue/stats
async fn queue_stats(
    State(state): State<Arc<AppState>>,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let stats = state.bus.stats().await?;
    Ok((
        StatusCode::OK,
        Json(serde_json::json!({
            "queue_name": stats.queue_name,
            "message_count": stats.message_count,
            "consumer_count": stats.consumer_count,
            "status": if stats.connected { "connected" } else { "disconnected" },
        })),
    ))
}
