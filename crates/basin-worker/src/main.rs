//! `basin-worker` binary entrypoint.
//!
//! Wires the executors at the composition root, exposes health and metrics,
//! and runs the dispatcher loop until the process is stopped.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::routing::get;
use axum::Router;

use basin_catalog::TableCatalog;
use basin_core::{init_logging, AmqpBus, LogFormat, ObjectStoreBackend, RedisJobStore};
use basin_worker::config::WorkerConfig;
use basin_worker::{Dispatcher, IngestExecutor, QueryExecutor, SchemaExecutor};

#[tokio::main]
async fn main() -> Result<()> {
    let config = WorkerConfig::from_env()?;
    init_logging(if config.debug {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    });
    let metrics_handle = basin_worker::metrics::init_metrics();

    tracing::info!(config = ?config, "starting worker");

    let uploads = Arc::new(ObjectStoreBackend::new(
        &config.store_endpoint,
        &config.store_access_key,
        &config.store_secret_key,
        &config.uploads_bucket,
    )?);
    let warehouse: Arc<ObjectStoreBackend> = Arc::new(ObjectStoreBackend::new(
        &config.store_endpoint,
        &config.store_access_key,
        &config.store_secret_key,
        &config.warehouse_bucket,
    )?);
    let jobs = Arc::new(RedisJobStore::connect(
        &config.jobstore_host,
        config.jobstore_port,
        config.job_ttl_seconds,
    )?);
    let bus = Arc::new(AmqpBus::new(
        &config.queue_host,
        config.queue_port,
        &config.queue_user,
        &config.queue_password,
        config.queue_name.clone(),
    ));

    let catalog = TableCatalog::new(warehouse.clone(), config.warehouse_path.clone());
    let ingest = IngestExecutor::new(uploads, catalog.clone(), jobs.clone());
    let query = QueryExecutor::new(
        catalog.clone(),
        warehouse,
        config.warehouse_bucket.clone(),
        config.warehouse_path.clone(),
        jobs.clone(),
        config.preview_max_rows,
        Duration::from_secs(config.query_timeout_seconds),
    );
    let schema = SchemaExecutor::new(catalog, jobs.clone());

    let dispatcher = Dispatcher::new(bus, jobs, ingest, query, schema);

    // Health and metrics surface, served next to the dispatcher loop.
    let health_addr = SocketAddr::from(([0, 0, 0, 0], config.metrics_port));
    let health_router = Router::new()
        .route("/health", get(|| async { "ok" }))
        .route(
            "/metrics",
            get(move || {
                let handle = metrics_handle.clone();
                async move { handle.render() }
            }),
        );
    tokio::spawn(async move {
        match tokio::net::TcpListener::bind(health_addr).await {
            Ok(listener) => {
                tracing::info!(%health_addr, "worker health endpoint listening");
                if let Err(e) = axum::serve(listener, health_router).await {
                    tracing::error!(error = %e, "health endpoint failed");
                }
            }
            Err(e) => tracing::error!(error = %e, "failed to bind health endpoint"),
        }
    });

    dispatcher.run().await?;
    Ok(())
}
