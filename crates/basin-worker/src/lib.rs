//! # basin-worker
//!
//! Job dispatcher and execution engine for the Basin lakehouse.
//!
//! One dispatcher loop per worker instance consumes the single queue, routes
//! by job kind, and holds each delivery until the executor finishes. Ingest
//! appends uploads to catalog tables; query execution runs structured specs
//! through `DataFusion` and materializes parquet results plus JSON previews;
//! schema requests read table metadata only.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

pub mod config;
pub mod dispatcher;
pub mod ingest;
pub mod metrics;
pub mod query;
pub mod schema;

pub use config::WorkerConfig;
pub use dispatcher::Dispatcher;
pub use ingest::IngestExecutor;
pub use query::QueryExecutor;
pub use schema::SchemaExecutor;
