//! Coordinator integration tests.
//!
//! Drives the complete request flow (HTTP, routes, job store, bus) against
//! in-memory collaborators.

use std::sync::Arc;

use anyhow::{Context, Result};
use axum::body::Body;
use axum::http::{header, Method, Request, StatusCode};
use bytes::Bytes;
use tower::ServiceExt;

use basin_api::config::Config;
use basin_api::server::{AppState, Server};
use basin_core::{
    Error, JobStatus, JobStore, MemoryBackend, MemoryBus, MemoryJobStore, MessageBus,
    StorageBackend, WritePrecondition,
};

const BOUNDARY: &str = "basin-test-boundary";

struct TestHarness {
    router: axum::Router,
    uploads: Arc<MemoryBackend>,
    warehouse: Arc<MemoryBackend>,
    jobs: Arc<MemoryJobStore>,
    bus: Arc<MemoryBus>,
}

fn harness_with_config(config: Config) -> TestHarness {
    let uploads = Arc::new(MemoryBackend::new());
    let warehouse = Arc::new(MemoryBackend::new());
    let jobs = Arc::new(MemoryJobStore::new(config.job_ttl_seconds));
    let bus = Arc::new(MemoryBus::new(config.queue.queue_name.clone()));

    let state = AppState::new(
        config,
        uploads.clone(),
        warehouse.clone(),
        jobs.clone(),
        bus.clone(),
    );
    TestHarness {
        router: Server::new(state).router(),
        uploads,
        warehouse,
        jobs,
        bus,
    }
}

fn harness() -> TestHarness {
    harness_with_config(Config::for_tests())
}

fn multipart_body(fields: &[(&str, &str)], file: Option<(&str, &[u8])>) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            format!("Content-Disposition: form-data; name=\"{name}\"\r\n\r\n").as_bytes(),
        );
        body.extend_from_slice(value.as_bytes());
        body.extend_from_slice(b"\r\n");
    }
    if let Some((file_name, content)) = file {
        body.extend_from_slice(format!("--{BOUNDARY}\r\n").as_bytes());
        body.extend_from_slice(
            format!(
                "Content-Disposition: form-data; name=\"file\"; filename=\"{file_name}\"\r\n\
                 Content-Type: text/csv\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(content);
        body.extend_from_slice(b"\r\n");
    }
    body.extend_from_slice(format!("--{BOUNDARY}--\r\n").as_bytes());
    body
}

async fn send(router: axum::Router, request: Request<Body>) -> Result<(StatusCode, serde_json::Value)> {
    let response = router.oneshot(request).await.context("send request")?;
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .context("read body")?;
    let value = if bytes.is_empty() {
        serde_json::Value::Null
    } else {
        serde_json::from_slice(&bytes).context("parse body")?
    };
    Ok((status, value))
}

fn upload_request(fields: &[(&str, &str)], file: Option<(&str, &[u8])>) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/api/v1/upload")
        .header(
            header::CONTENT_TYPE,
            format!("multipart/form-data; boundary={BOUNDARY}"),
        )
        .body(Body::from(multipart_body(fields, file)))
        .expect("build request")
}

fn json_request(method: Method, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(serde_json::to_vec(&body).expect("encode body")))
        .expect("build request")
}

fn get_request(uri: &str) -> Request<Body> {
    Request::builder()
        .method(Method::GET)
        .uri(uri)
        .body(Body::empty())
        .expect("build request")
}

#[tokio::test]
async fn health_and_ready_respond() -> Result<()> {
    let harness = harness();

    let (status, body) = send(harness.router.clone(), get_request("/health")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");

    let (status, body) = send(harness.router, get_request("/ready")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["ready"], true);
    Ok(())
}

#[tokio::test]
async fn upload_creates_job_before_the_message_is_visible() -> Result<()> {
    let harness = harness();
    let csv = b"id,name,amount\n1,widget,9.5\n2,gadget,3.0\n";

    let request = upload_request(
        &[("user", "alice"), ("project", "p1"), ("table", "t1")],
        Some(("sales.csv", csv)),
    );
    let (status, body) = send(harness.router, request).await?;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["status"], "queued");
    let id = body["id"].as_str().context("id in response")?;

    // Exactly one job record and one message, and the record exists with the
    // full payload before the message is consumed.
    let job = harness.jobs.get(id).await?.context("job persisted")?;
    assert_eq!(job.status, JobStatus::Queued);
    assert_eq!(job.project.as_deref(), Some("p1"));
    assert_eq!(job.file_size, Some(csv.len() as u64));

    let stats = harness.bus.stats().await?;
    assert_eq!(stats.message_count, 1);

    let delivery = harness.bus.receive().await?;
    let message: serde_json::Value = serde_json::from_slice(&delivery.body)?;
    assert_eq!(message["id"], id);
    assert_eq!(message["kind"], "upload");
    assert_eq!(message["blob_path"], format!("uploads/{id}/sales.csv"));
    delivery.ack().await?;

    // The blob itself landed in the staging bucket.
    let blob = harness.uploads.get(&format!("uploads/{id}/sales.csv")).await?;
    assert_eq!(blob, Bytes::from_static(csv));
    Ok(())
}

#[tokio::test]
async fn upload_without_project_is_rejected() -> Result<()> {
    let harness = harness();
    let request = upload_request(&[("user", "alice")], Some(("sales.csv", b"a,b\n1,2\n")));
    let (status, _) = send(harness.router, request).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(harness.bus.depth(), 0);
    assert!(harness.uploads.list("").await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn oversized_upload_is_rejected_with_400_and_no_job() -> Result<()> {
    let mut config = Config::for_tests();
    config.file_max_size = 16;
    let harness = harness_with_config(config);

    let request = upload_request(
        &[("project", "p1")],
        Some(("big.csv", b"id,name\n1,averylongrowthatfitsnomore\n")),
    );
    let (status, _) = send(harness.router, request).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    assert_eq!(harness.bus.depth(), 0);
    assert!(harness.uploads.list("").await?.is_empty());
    Ok(())
}

#[tokio::test]
async fn job_status_poll_returns_404_for_unknown_ids() -> Result<()> {
    let harness = harness();
    let (status, _) = send(harness.router, get_request("/api/v1/jobs/nope")).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    Ok(())
}

#[tokio::test]
async fn status_update_is_idempotent_and_validates_status() -> Result<()> {
    let harness = harness();

    // Unknown id still returns 200.
    let (status, body) = send(
        harness.router.clone(),
        json_request(
            Method::POST,
            "/api/v1/jobs/ghost/status",
            serde_json::json!({"status": "processing", "message": "picked up"}),
        ),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "processing");

    // Unknown status values are rejected.
    let (status, _) = send(
        harness.router.clone(),
        json_request(
            Method::POST,
            "/api/v1/jobs/ghost/status",
            serde_json::json!({"status": "sideways"}),
        ),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // `queued` is reserved for the coordinator's initial write.
    let (status, _) = send(
        harness.router.clone(),
        json_request(
            Method::POST,
            "/api/v1/jobs/ghost/status",
            serde_json::json!({"status": "queued"}),
        ),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // A known job actually changes.
    let job = basin_core::Job::query("q-1", "p1.t1", "{}");
    harness.jobs.create(&job).await?;
    let (status, _) = send(
        harness.router,
        json_request(
            Method::POST,
            "/api/v1/jobs/q-1/status",
            serde_json::json!({"status": "failed", "message": "stuck"}),
        ),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    let job = harness.jobs.get("q-1").await?.context("job present")?;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.message, "stuck");
    Ok(())
}

#[tokio::test]
async fn queue_stats_read_through_the_bus() -> Result<()> {
    let harness = harness();
    harness.bus.publish(Bytes::from_static(b"{}")).await?;

    let (status, body) = send(harness.router, get_request("/api/v1/queue/stats")).await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["queue_name"], "file.processing.queue");
    assert_eq!(body["message_count"], 1);
    assert_eq!(body["status"], "connected");
    Ok(())
}

#[tokio::test]
async fn query_submission_round_trips_through_the_store() -> Result<()> {
    let harness = harness();
    let spec = serde_json::json!({
        "source": "p1.sales",
        "select": [
            {"column": "region", "as": "r"},
            {"column": "revenue", "aggregation": "sum", "as": "total"}
        ],
        "filters": [{"column": "region", "operator": "=", "value": "N"}],
        "order_by": [{"column": "total", "direction": "desc"}],
        "limit": 100,
        "encoding": {"x": "region"}
    });

    let (status, body) = send(
        harness.router.clone(),
        json_request(Method::POST, "/api/v1/query", spec),
    )
    .await?;
    assert_eq!(status, StatusCode::ACCEPTED);
    let id = body["id"].as_str().context("id")?;
    assert_eq!(body["status"], "queued");
    assert_eq!(body["check_status_at"], format!("/api/v1/query/{id}"));

    let (status, record) = send(
        harness.router,
        get_request(&format!("/api/v1/query/{id}")),
    )
    .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(record["kind"], "query");
    assert_eq!(record["source"], "p1.sales");

    // The persisted spec carries the encoding passthrough verbatim.
    let spec_json = record["query_spec_json"].as_str().context("spec json")?;
    let stored: serde_json::Value = serde_json::from_str(spec_json)?;
    assert_eq!(stored["encoding"]["x"], "region");

    assert_eq!(harness.bus.depth(), 1);
    Ok(())
}

#[tokio::test]
async fn query_with_empty_source_is_rejected() -> Result<()> {
    let harness = harness();
    let (status, _) = send(
        harness.router,
        json_request(
            Method::POST,
            "/api/v1/query",
            serde_json::json!({"source": "", "select": [{"column": "*"}]}),
        ),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn query_source_can_be_an_upload_job_id() -> Result<()> {
    let harness = harness();

    let request = upload_request(
        &[("project", "p1"), ("table", "t9")],
        Some(("data.csv", b"a,b\n1,2\n")),
    );
    let (status, body) = send(harness.router.clone(), request).await?;
    assert_eq!(status, StatusCode::ACCEPTED);
    let upload_id = body["id"].as_str().context("upload id")?.to_string();

    let (status, body) = send(
        harness.router.clone(),
        json_request(
            Method::POST,
            "/api/v1/query",
            serde_json::json!({"source": upload_id, "select": [{"column": "*"}]}),
        ),
    )
    .await?;
    assert_eq!(status, StatusCode::ACCEPTED);
    let query_id = body["id"].as_str().context("query id")?;

    let job = harness.jobs.get(query_id).await?.context("query job")?;
    assert_eq!(job.source.as_deref(), Some("p1.t9"));
    Ok(())
}

#[tokio::test]
async fn unknown_job_id_source_is_rejected() -> Result<()> {
    let harness = harness();
    let (status, _) = send(
        harness.router,
        json_request(
            Method::POST,
            "/api/v1/query",
            serde_json::json!({"source": "no-such-job", "select": [{"column": "*"}]}),
        ),
    )
    .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn schema_request_is_accepted_and_enqueued() -> Result<()> {
    let harness = harness();
    let (status, body) = send(
        harness.router.clone(),
        get_request("/api/v1/schema/p1/t1"),
    )
    .await?;
    assert_eq!(status, StatusCode::ACCEPTED);
    let id = body["id"].as_str().context("id")?;
    assert_eq!(body["status"], "queued");

    let job = harness.jobs.get(id).await?.context("schema job")?;
    assert_eq!(job.project.as_deref(), Some("p1"));
    assert_eq!(job.table.as_deref(), Some("t1"));
    assert_eq!(harness.bus.depth(), 1);
    Ok(())
}

#[tokio::test]
async fn download_streams_completed_results_only() -> Result<()> {
    let harness = harness();

    let mut job = basin_core::Job::query("q-dl", "p1.t1", "{}");
    harness.jobs.create(&job).await?;

    // Not completed yet.
    let (status, _) = send(
        harness.router.clone(),
        get_request("/api/v1/query/q-dl/download"),
    )
    .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    harness
        .warehouse
        .put(
            "wh/p1/queries/query_x/result.parquet",
            Bytes::from_static(b"PAR1-bytes"),
            WritePrecondition::None,
        )
        .await?;
    job.apply(&basin_core::JobUpdate::completed(
        "Query completed: 1 rows",
        basin_core::JobResult {
            result_path: Some("warehouse/wh/p1/queries/query_x/result.parquet".into()),
            row_count: 1,
            file_size_bytes: 10,
            result_data: Some(serde_json::json!([])),
        },
    ));
    harness.jobs.create(&job).await?;

    let response = harness
        .router
        .oneshot(get_request("/api/v1/query/q-dl/download"))
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await?;
    assert_eq!(bytes.as_ref(), b"PAR1-bytes");
    Ok(())
}

/// A bus whose publishes always fail, for exercising the enqueue-failure
/// propagation path. Captures the attempted body so tests can recover the
/// job id that never reached the client.
#[derive(Debug, Default)]
struct DownBus {
    attempted: std::sync::Mutex<Option<Bytes>>,
}

#[async_trait::async_trait]
impl MessageBus for DownBus {
    async fn publish(&self, body: Bytes) -> basin_core::Result<()> {
        *self.attempted.lock().expect("lock") = Some(body);
        Err(Error::bus("broker unreachable"))
    }

    async fn receive(&self) -> basin_core::Result<basin_core::BusDelivery> {
        Err(Error::bus("broker unreachable"))
    }

    async fn stats(&self) -> basin_core::Result<basin_core::QueueStats> {
        Ok(basin_core::QueueStats {
            queue_name: "file.processing.queue".into(),
            message_count: 0,
            consumer_count: 0,
            connected: false,
        })
    }
}

#[tokio::test]
async fn enqueue_failure_marks_the_job_failed_before_500() -> Result<()> {
    let config = Config::for_tests();
    let jobs = Arc::new(MemoryJobStore::new(config.job_ttl_seconds));
    let bus = Arc::new(DownBus::default());
    let state = AppState::new(
        config,
        Arc::new(MemoryBackend::new()),
        Arc::new(MemoryBackend::new()),
        jobs.clone(),
        bus.clone(),
    );
    let router = Server::new(state).router();

    let (status, body) = send(
        router,
        json_request(
            Method::POST,
            "/api/v1/query",
            serde_json::json!({"source": "p1.t1", "select": [{"column": "*"}]}),
        ),
    )
    .await?;
    assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body["code"], "BUS_ERROR");

    // The id never reached the client; recover it from the attempted publish
    // and check the record was terminated, not left queued.
    let attempted = bus
        .attempted
        .lock()
        .expect("lock")
        .clone()
        .context("publish was attempted")?;
    let message: serde_json::Value = serde_json::from_slice(&attempted)?;
    let id = message["id"].as_str().context("id in message")?;

    let job = jobs.get(id).await?.context("job persisted")?;
    assert_eq!(job.status, JobStatus::Failed);
    assert_eq!(job.message, "bus_error");
    Ok(())
}
