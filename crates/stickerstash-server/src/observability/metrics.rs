//! Prometheus Metrics
//!
//! Metrics tracked:
//! - `stickerstash_items_placed_total` - counter of placed items by kind and placement
//! - `stickerstash_placement_failures_total` - counter of failed ingestions by kind and reason
//! - `stickerstash_probe_depth` - histogram of volumes probed per placement
//! - `stickerstash_ingest_duration_seconds` - histogram of ingestion times by kind
//! - `stickerstash_commands_total` - counter of bot commands
//! - `stickerstash_updates_total` - counter of received updates by kind

use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::time::Duration;

/// Holds the Prometheus handle used to render `/metrics`
#[derive(Clone)]
pub struct MetricsState {
    pub prometheus_handle: PrometheusHandle,
}

/// Install the Prometheus recorder and register metric descriptions.
pub fn init_metrics() -> Result<MetricsState, Box<dyn std::error::Error + Send + Sync>> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_metric_descriptions();

    Ok(MetricsState {
        prometheus_handle: handle,
    })
}

fn register_metric_descriptions() {
    describe_counter!(
        "stickerstash_items_placed_total",
        "Total number of items placed into collection volumes"
    );
    describe_counter!(
        "stickerstash_placement_failures_total",
        "Total number of ingestions that did not place an item"
    );
    describe_histogram!(
        "stickerstash_probe_depth",
        "Number of volumes inspected to place one item"
    );
    describe_histogram!(
        "stickerstash_ingest_duration_seconds",
        "Duration of a full ingestion in seconds"
    );
    describe_counter!(
        "stickerstash_commands_total",
        "Total number of bot commands handled"
    );
    describe_counter!(
        "stickerstash_updates_total",
        "Total number of updates received from the Bot API"
    );
}

pub fn record_item_placed(kind: &str, placement: &str, probes: u32) {
    counter!(
        "stickerstash_items_placed_total",
        "kind" => kind.to_string(),
        "placement" => placement.to_string()
    )
    .increment(1);
    histogram!("stickerstash_probe_depth").record(f64::from(probes));
}

pub fn record_placement_failure(kind: &str, reason: &str) {
    counter!(
        "stickerstash_placement_failures_total",
        "kind" => kind.to_string(),
        "reason" => reason.to_string()
    )
    .increment(1);
}

pub fn record_ingest_duration(kind: &str, duration: Duration) {
    histogram!(
        "stickerstash_ingest_duration_seconds",
        "kind" => kind.to_string()
    )
    .record(duration.as_secs_f64());
}

pub fn record_command(command: &str) {
    counter!("stickerstash_commands_total", "command" => command.to_string()).increment(1);
}

pub fn record_update(kind: &str) {
    counter!("stickerstash_updates_total", "kind" => kind.to_string()).increment(1);
}
