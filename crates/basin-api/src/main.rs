//! `basin-api` binary entrypoint.
//!
//! Loads configuration from environment variables, wires the collaborators at
//! the composition root, and starts the HTTP server.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

use std::sync::Arc;

use anyhow::Result;

use basin_api::config::Config;
use basin_api::server::{AppState, Server};
use basin_core::{
    init_logging, AmqpBus, LogFormat, ObjectStoreBackend, RedisJobStore,
};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::from_env()?;
    init_logging(if config.debug {
        LogFormat::Pretty
    } else {
        LogFormat::Json
    });

    tracing::info!(
        endpoint = %config.store.endpoint,
        uploads_bucket = %config.store.uploads_bucket,
        warehouse_bucket = %config.store.warehouse_bucket,
        "using object storage"
    );

    let uploads = Arc::new(ObjectStoreBackend::new(
        &config.store.endpoint,
        &config.store.access_key,
        &config.store.secret_key,
        &config.store.uploads_bucket,
    )?);
    let warehouse = Arc::new(ObjectStoreBackend::new(
        &config.store.endpoint,
        &config.store.access_key,
        &config.store.secret_key,
        &config.store.warehouse_bucket,
    )?);
    let jobs = Arc::new(RedisJobStore::connect(
        &config.jobstore.host,
        config.jobstore.port,
        config.job_ttl_seconds,
    )?);
    let bus = Arc::new(AmqpBus::new(
        &config.queue.host,
        config.queue.port,
        &config.queue.user,
        &config.queue.password,
        config.queue.queue_name.clone(),
    ));

    let state = AppState::new(config, uploads, warehouse, jobs, bus);
    Server::new(state).serve().await?;
    Ok(())
}
