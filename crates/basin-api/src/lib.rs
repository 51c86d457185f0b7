//! # basin-api
//!
//! Coordinator HTTP surface for the Basin lakehouse.
//!
//! Accepts uploads, structured queries, and schema requests; persists a job
//! record; enqueues a work message; and answers status polls. Nothing here
//! blocks on execution: every submission returns a job id promptly and the
//! worker publishes terminal state through the job store.

#![forbid(unsafe_code)]
#![deny(rust_2018_idioms)]

pub mod config;
pub mod error;
pub mod routes;
pub mod server;

pub use config::Config;
pub use server::{AppState, Server};
