//! Application metrics for nodeflow.
//!
//! Recorded through the `metrics` facade; the embedding application installs
//! whichever recorder it wants. Without one, every call is a no-op.
//!
//! ## Metrics
//!
//! ### Counters
//! - `nodeflow_runs_total` - Workflow runs by status and mode
//! - `nodeflow_nodes_executed_total` - Node executions by node_type and status
//! - `nodeflow_node_retries_total` - Retry attempts by node_type
//! - `nodeflow_http_requests_total` - HTTP node requests by method and status
//! - `nodeflow_trigger_emits_total` - Runs started by trigger and webhook nodes
//!
//! ### Histograms
//! - `nodeflow_run_duration_seconds` - Workflow run duration
//! - `nodeflow_node_duration_seconds` - Node execution duration by node_type
//!
//! ### Gauges
//! - `nodeflow_active_runs` - Runs currently in progress
//! - `nodeflow_active_workflows` - Workflows with live triggers

use metrics::{counter, gauge, histogram};
use std::time::Duration;

// =============================================================================
// Run Metrics
// =============================================================================

/// Record a finished workflow run.
pub fn record_run(status: &str, mode: &str) {
    counter!(
        "nodeflow_runs_total",
        "status" => status.to_string(),
        "mode" => mode.to_string()
    )
    .increment(1);
}

/// Record workflow run duration.
pub fn record_run_duration(duration: Duration, workflow_name: &str) {
    histogram!(
        "nodeflow_run_duration_seconds",
        "workflow" => workflow_name.to_string()
    )
    .record(duration.as_secs_f64());
}

pub fn inc_active_runs() {
    gauge!("nodeflow_active_runs").increment(1.0);
}

pub fn dec_active_runs() {
    gauge!("nodeflow_active_runs").decrement(1.0);
}

// =============================================================================
// Node Metrics
// =============================================================================

/// Record a node execution.
pub fn record_node_execution(node_type: &str, status: &str) {
    counter!(
        "nodeflow_nodes_executed_total",
        "node_type" => node_type.to_string(),
        "status" => status.to_string()
    )
    .increment(1);
}

/// Record node execution duration.
pub fn record_node_duration(duration: Duration, node_type: &str) {
    histogram!(
        "nodeflow_node_duration_seconds",
        "node_type" => node_type.to_string()
    )
    .record(duration.as_secs_f64());
}

pub fn record_node_retry(node_type: &str) {
    counter!(
        "nodeflow_node_retries_total",
        "node_type" => node_type.to_string()
    )
    .increment(1);
}

// =============================================================================
// HTTP Node Metrics
// =============================================================================

/// Record an HTTP request made by the HTTP node.
pub fn record_http_request(method: &str, status_code: u16) {
    counter!(
        "nodeflow_http_requests_total",
        "method" => method.to_string(),
        "status" => status_code.to_string()
    )
    .increment(1);
}

/// Record HTTP request duration.
pub fn record_http_duration(duration: Duration, method: &str) {
    histogram!(
        "nodeflow_http_request_duration_seconds",
        "method" => method.to_string()
    )
    .record(duration.as_secs_f64());
}

// =============================================================================
// Trigger Metrics
// =============================================================================

pub fn record_trigger_emit(node_type: &str) {
    counter!(
        "nodeflow_trigger_emits_total",
        "node_type" => node_type.to_string()
    )
    .increment(1);
}

pub fn set_active_workflows(count: usize) {
    gauge!("nodeflow_active_workflows").set(count as f64);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_noop() {
        record_run("completed", "manual");
        record_run_duration(Duration::from_millis(5), "wf");
        inc_active_runs();
        dec_active_runs();
        record_node_execution("noOp", "success");
        record_node_retry("httpRequest");
        record_http_request("GET", 200);
        record_trigger_emit("interval");
        set_active_workflows(0);
    }
}
