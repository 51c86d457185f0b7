//! The dispatcher: consumes the queue, routes by kind, and settles each
//! delivery.
//!
//! Settlement policy: success acks; a transient failure nacks with requeue
//! and leaves the job in `processing` so a later attempt can succeed; a
//! deterministic failure writes the terminal `failed` status and nacks
//! without requeue. The failure category comes from the error tag, never
//! from message strings.

use std::sync::Arc;

use metrics::counter;

use basin_core::{BusDelivery, Error, JobKind, JobMessage, JobStore, JobUpdate, MessageBus};

use crate::ingest::IngestExecutor;
use crate::metrics as worker_metrics;
use crate::query::QueryExecutor;
use crate::schema::SchemaExecutor;

/// Error messages in job records are cut at this length.
const MAX_MESSAGE_LENGTH: usize = 500;

/// Routes deliveries to the executors and owns the ack/nack decision.
pub struct Dispatcher {
    bus: Arc<dyn MessageBus>,
    jobs: Arc<dyn JobStore>,
    ingest: IngestExecutor,
    query: QueryExecutor,
    schema: SchemaExecutor,
}

impl Dispatcher {
    /// Creates a dispatcher over the bus, the job store, and the executors.
    #[must_use]
    pub fn new(
        bus: Arc<dyn MessageBus>,
        jobs: Arc<dyn JobStore>,
        ingest: IngestExecutor,
        query: QueryExecutor,
        schema: SchemaExecutor,
    ) -> Self {
        Self {
            bus,
            jobs,
            ingest,
            query,
            schema,
        }
    }

    /// Consumes deliveries until the bus fails unrecoverably.
    ///
    /// # Errors
    ///
    /// Returns the bus error that ended the loop.
    pub async fn run(&self) -> basin_core::Result<()> {
        tracing::info!("dispatcher started");
        loop {
            self.poll_once().await?;
        }
    }

    /// Receives and settles exactly one delivery.
    ///
    /// # Errors
    ///
    /// Returns an error only when the bus itself fails; handler failures are
    /// settled on the delivery and never propagate.
    pub async fn poll_once(&self) -> basin_core::Result<()> {
        let delivery = self.bus.receive().await?;
        self.handle(delivery).await;
        Ok(())
    }

    async fn handle(&self, delivery: BusDelivery) {
        let value: serde_json::Value = match serde_json::from_slice(&delivery.body) {
            Ok(value) => value,
            Err(e) => {
                tracing::error!(error = %e, "discarding message with non-JSON body");
                counter!(worker_metrics::MESSAGES_UNPARSABLE).increment(1);
                settle_nack(delivery, false).await;
                return;
            }
        };

        let Some(id) = value.get("id").and_then(|v| v.as_str()).map(str::to_string) else {
            tracing::error!("discarding message without a job id");
            counter!(worker_metrics::MESSAGES_UNPARSABLE).increment(1);
            settle_nack(delivery, false).await;
            return;
        };

        let kind = value.get("kind").and_then(|v| v.as_str());
        let Some(kind) = kind.and_then(parse_kind) else {
            let label = kind.unwrap_or("<missing>");
            tracing::error!(job_id = %id, kind = label, "unknown job kind");
            self.mark_failed(&id, format!("unknown kind: {label}")).await;
            settle_nack(delivery, false).await;
            return;
        };

        let message: JobMessage = match serde_json::from_value(value) {
            Ok(message) => message,
            Err(e) => {
                tracing::error!(job_id = %id, error = %e, "job message failed to decode");
                counter!(worker_metrics::MESSAGES_UNPARSABLE).increment(1);
                self.mark_failed(&id, truncate(&format!("Failed to parse job message: {e}")))
                    .await;
                settle_nack(delivery, false).await;
                return;
            }
        };

        counter!(worker_metrics::JOBS_CONSUMED, "kind" => kind.as_str()).increment(1);
        tracing::info!(job_id = %id, kind = kind.as_str(), "routing job");

        let outcome = match kind {
            JobKind::Upload => self.ingest.process(&message).await,
            JobKind::Query => self.query.process(&message).await,
            JobKind::Schema => self.schema.process(&message).await,
        };

        match outcome {
            Ok(()) => {
                counter!(worker_metrics::JOBS_COMPLETED, "kind" => kind.as_str()).increment(1);
                if let Err(e) = delivery.ack().await {
                    tracing::error!(job_id = %id, error = %e, "failed to ack delivery");
                }
            }
            Err(error) if error.is_transient() => {
                // The job stays in `processing`; redelivery gives a later
                // attempt the chance to finish it.
                tracing::warn!(
                    job_id = %id,
                    error = %error,
                    "transient failure, requeueing delivery"
                );
                counter!(worker_metrics::JOBS_REQUEUED, "kind" => kind.as_str()).increment(1);
                settle_nack(delivery, true).await;
            }
            Err(error) => {
                let message_text = failure_message(kind, &error);
                tracing::error!(job_id = %id, error = %error, "job failed terminally");
                counter!(worker_metrics::JOBS_FAILED, "kind" => kind.as_str()).increment(1);
                self.mark_failed(&id, message_text).await;
                settle_nack(delivery, false).await;
            }
        }
    }

    async fn mark_failed(&self, id: &str, message: String) {
        if let Err(e) = self.jobs.update(id, &JobUpdate::failed(message)).await {
            tracing::error!(job_id = %id, error = %e, "failed to write terminal status");
        }
    }
}

fn parse_kind(kind: &str) -> Option<JobKind> {
    match kind.to_ascii_lowercase().as_str() {
        "upload" => Some(JobKind::Upload),
        "query" => Some(JobKind::Query),
        "schema" => Some(JobKind::Schema),
        _ => None,
    }
}

async fn settle_nack(delivery: BusDelivery, requeue: bool) {
    if let Err(e) = delivery.nack(requeue).await {
        tracing::error!(error = %e, requeue, "failed to nack delivery");
    }
}

/// Builds the terminal failure message: kind-specific prefix, the error with
/// its immediate cause when distinct, cut at 500 characters.
fn failure_message(kind: JobKind, error: &Error) -> String {
    let prefix = match kind {
        JobKind::Upload => "Upload failed: ",
        JobKind::Query => "Query failed: ",
        JobKind::Schema => "Failed to retrieve schema: ",
    };

    let mut detail = error.to_string();
    if let Some(cause) = std::error::Error::source(error) {
        let cause = cause.to_string();
        if !cause.is_empty() && cause != detail {
            detail = format!("{detail} - Cause: {cause}");
        }
    }

    truncate(&format!("{prefix}{detail}"))
}

fn truncate(message: &str) -> String {
    if message.len() > MAX_MESSAGE_LENGTH {
        let cut: String = message.chars().take(MAX_MESSAGE_LENGTH).collect();
        format!("{cut}...")
    } else {
        message.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn failure_messages_carry_kind_prefixes() {
        let error = Error::NotFound("table not found: p1.missing".into());
        let message = failure_message(JobKind::Query, &error);
        assert!(message.starts_with("Query failed: "));
        assert!(message.contains("not found"));

        let message = failure_message(JobKind::Schema, &error);
        assert!(message.starts_with("Failed to retrieve schema: "));
    }

    #[test]
    fn failure_messages_include_distinct_causes() {
        let io = std::io::Error::new(std::io::ErrorKind::ConnectionReset, "connection reset");
        let error = Error::storage_with_source("blob download failed", io);
        let message = failure_message(JobKind::Upload, &error);
        assert!(message.contains("blob download failed"));
        assert!(message.contains("Cause: connection reset"));
    }

    #[test]
    fn long_messages_are_truncated() {
        let error = Error::InvalidInput("x".repeat(2000));
        let message = failure_message(JobKind::Upload, &error);
        assert!(message.len() <= MAX_MESSAGE_LENGTH + 3);
        assert!(message.ends_with("..."));
    }

    #[test]
    fn kind_parsing_is_case_insensitive() {
        assert_eq!(parse_kind("Upload"), Some(JobKind::Upload));
        assert_eq!(parse_kind("QUERY"), Some(JobKind::Query));
        assert_eq!(parse_kind("export"), None);
    }
}
