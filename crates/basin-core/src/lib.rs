//! # basin-core
//!
//! Core abstractions for the Basin lakehouse control plane.
//!
//! This crate provides the types and contracts shared by the coordinator and
//! the worker:
//!
//! - **Error Taxonomy**: shared error type with a transport-vs-deterministic
//!   category driving retry decisions
//! - **Job Model**: the canonical unit of asynchronous work and its lifecycle
//! - **Object Store Gateway**: abstract blob storage with conditional writes
//! - **Job Store**: TTL'd key-value persistence for job records
//! - **Message Bus**: durable queue with manual acknowledgment
//!
//! ## Crate Boundary
//!
//! `basin-core` is the only crate allowed to define shared primitives. The
//! coordinator and worker never talk to each other directly; every interaction
//! flows through the contracts defined here.

#![forbid(unsafe_code)]
#![deny(missing_docs)]
#![deny(rust_2018_idioms)]

pub mod bus;
pub mod error;
pub mod job;
pub mod jobstore;
pub mod observability;
pub mod paths;
pub mod query;
pub mod storage;

pub use bus::{AmqpBus, BusDelivery, MemoryBus, MessageBus, QueueStats};
pub use error::{Error, Result};
pub use job::{Job, JobKind, JobMessage, JobResult, JobStatus, JobUpdate};
pub use jobstore::{JobStore, MemoryJobStore, RedisJobStore};
pub use observability::{init_logging, LogFormat};
pub use query::{FilterCondition, OrderBy, QuerySpec, SelectColumn};
pub use storage::{
    MemoryBackend, ObjectMeta, ObjectStoreBackend, StorageBackend, WritePrecondition, WriteResult,
};
