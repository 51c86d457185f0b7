//! Upload submission route.
//!
//! Accepts a multipart form with a `file` part and `user`/`project`/`table`
//! fields, stages the blob, persists the job record, and enqueues the work
//! message, in that order: the record always exists before the message is
//! visible on the bus.

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use bytes::Bytes;
use uuid::Uuid;

use basin_core::{paths, Job, JobMessage, JobUpdate, WritePrecondition};

use crate::error::{ApiError, ApiResult};
use crate::server::AppState;

/// Creates the upload route with a body limit above the configured file cap,
/// leaving the precise cap to the handler so oversize uploads get a 400.
pub fn routes(file_max_size: u64) -> Router<Arc<AppState>> {
    let body_limit = usize::try_from(file_max_size)
        .unwrap_or(usize::MAX)
        .saturating_add(1024 * 1024);
    Router::new()
        .route("/upload", post(submit_upload))
        .layer(DefaultBodyLimit::max(body_limit))
}

#[derive(Debug, Default)]
struct UploadForm {
    file: Option<Bytes>,
    file_name: Option<String>,
    user: Option<String>,
    project: Option<String>,
    table: Option<String>,
}

async fn read_form(mut multipart: Multipart) -> ApiResult<UploadForm> {
    let mut form = UploadForm::default();

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::bad_request(format!("malformed multipart body: {e}")))?
    {
        match field.name() {
            Some("file") => {
                form.file_name = field.file_name().map(str::to_string);
                form.file = Some(field.bytes().await.map_err(|e| {
                    ApiError::bad_request(format!("failed to read file part: {e}"))
                })?);
            }
            Some("user") => form.user = Some(read_text(field).await?),
            Some("project") => form.project = Some(read_text(field).await?),
            Some("table") => form.table = Some(read_text(field).await?),
            Some("file_name") => form.file_name = Some(read_text(field).await?),
            _ => {}
        }
    }
    Ok(form)
}

async fn read_text(field: axum::extract::multipart::Field<'_>) -> ApiResult<String> {
    field
        .text()
        .await
        .map_err(|e| ApiError::bad_request(format!("failed to read form field: {e}")))
}

/// POST /api/v1/upload
///
/// Returns `202 {id, status: "queued"}`; polling `/api/v1/jobs/{id}` reveals
/// progress.
async fn submit_upload(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> ApiResult<(StatusCode, Json<serde_json::Value>)> {
    let form = read_form(multipart).await?;

    let Some(project) = form.project.filter(|p| !p.trim().is_empty()) else {
        return Err(ApiError::bad_request("project is required"));
    };
    let Some(file) = form.file else {
        return Err(ApiError::bad_request("file part is required"));
    };
    if file.len() as u64 > state.config.file_max_size {
        return Err(ApiError::bad_request(format!(
            "file exceeds the configured maximum of {} bytes",
            state.config.file_max_size
        )));
    }

    let id = Uuid::new_v4().to_string();
    let file_name = form
        .file_name
        .filter(|n| !n.trim().is_empty())
        .unwrap_or_else(|| "upload".to_string());
    let blob_path = paths::staging_upload(&id, &file_name);
    let file_size = file.len() as u64;

    tracing::info!(
        job_id = %id,
        project = %project,
        file_name = %file_name,
        file_size,
        "received upload"
    );

    state
        .uploads
        .put(&blob_path, file, WritePrecondition::None)
        .await?;

    let job = Job::upload(
        &id,
        form.user,
        &project,
        form.table,
        &file_name,
        &blob_path,
        file_size,
    );
    state.jobs.create(&job).await?;

    let message = serde_json::to_vec(&JobMessage::for_job(&job))
        .map_err(|e| ApiError::internal(format!("failed to encode job message: {e}")))?;
    if let Err(e) = state.bus.publish(Bytes::from(message)).await {
        // The record exists but no worker will ever see it; terminate it so
        // clients polling the id see a final state.
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
        })),
    ))
}
