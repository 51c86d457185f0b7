//! Worker metrics: dispatcher counters and the Prometheus recorder.

use std::sync::OnceLock;

use metrics::describe_counter;
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};

/// Messages consumed from the queue, labeled by kind.
pub const JOBS_CONSUMED: &str = "basin_worker_jobs_consumed_total";
/// Jobs that reached `completed`.
pub const JOBS_COMPLETED: &str = "basin_worker_jobs_completed_total";
/// Jobs that reached `failed`.
pub const JOBS_FAILED: &str = "basin_worker_jobs_failed_total";
/// Deliveries nacked with requeue after a transient failure.
pub const JOBS_REQUEUED: &str = "basin_worker_jobs_requeued_total";
/// Deliveries whose body could not be parsed.
pub const MESSAGES_UNPARSABLE: &str = "basin_worker_messages_unparsable_total";

static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// Installs the global Prometheus recorder and returns its render handle.
///
/// Safe to call multiple times; subsequent calls return the same handle.
///
/// # Panics
///
/// Panics if the recorder cannot be installed; the worker should not start
/// without metrics.
pub fn init_metrics() -> PrometheusHandle {
    PROMETHEUS_HANDLE
        .get_or_init(|| {
            let handle = PrometheusBuilder::new()
                .install_recorder()
                .unwrap_or_else(|e| panic!("failed to install prometheus recorder: {e}"));

            describe_counter!(JOBS_CONSUMED, "Messages consumed from the queue");
            describe_counter!(JOBS_COMPLETED, "Jobs that completed successfully");
            describe_counter!(JOBS_FAILED, "Jobs that failed terminally");
            describe_counter!(JOBS_REQUEUED, "Deliveries requeued after transient failures");
            describe_counter!(MESSAGES_UNPARSABLE, "Deliveries with unparsable bodies");

            handle
        })
        .clone()
}
