// External crates
use anyhow::{Context, Result};
use lazy_static::lazy_static;
use prometheus::{Counter, Encoder, Gauge, TextEncoder, register_counter, register_gauge};
use std::path::Path;
use std::time::Instant;
use tracing::instrument;

/// Helper to record a run duration gauge
pub fn observe_duration(gauge: &Gauge, start: Instant) {
    gauge.set(start.elapsed().as_secs_f64());
}

lazy_static! {
    // ======== Sync Loop Metrics ========

    /// Journal pages fetched
    pub static ref PAGES_FETCHED: Counter = register_counter!(
        "thorax_pages_fetched_total",
        "Journal search pages fetched by the sync loop"
    ).unwrap();

    /// Journal entries transformed and enqueued
    pub static ref ENTRIES_FORWARDED: Counter = register_counter!(
        "thorax_entries_forwarded_total",
        "Journal entries transformed and enqueued to the analytics sink"
    ).unwrap();

    pub static ref IDENTIFY_EVENTS: Counter = register_counter!(
        "thorax_identify_events_total",
        "Identify messages enqueued to the analytics sink"
    ).unwrap();

    pub static ref CHECKPOINT_WRITE_FAILURES: Counter = register_counter!(
        "thorax_checkpoint_write_failures_total",
        "Cursor checkpoints that failed to persist"
    ).unwrap();

    pub static ref TIMESTAMP_PARSE_FAILURES: Counter = register_counter!(
        "thorax_timestamp_parse_failures_total",
        "Entries forwarded without a timestamp because created_at did not parse"
    ).unwrap();

    /// Unix time of the last cursor reached
    pub static ref LAST_CURSOR_SECONDS: Gauge = register_gauge!(
        "thorax_last_cursor_timestamp_seconds",
        "Creation time of the last entry forwarded, as unix seconds"
    ).unwrap();

    // ======== Sink Metrics ========

    pub static ref EVENTS_DELIVERED: Counter = register_counter!(
        "thorax_events_delivered_total",
        "Analytics messages accepted by the collector"
    ).unwrap();

    pub static ref EVENTS_DELIVERY_FAILED: Counter = register_counter!(
        "thorax_events_delivery_failed_total",
        "Analytics messages in batches the collector did not accept"
    ).unwrap();

    // ======== Lifecycle Metrics ========

    pub static ref RUN_DURATION_SECONDS: Gauge = register_gauge!(
        "thorax_run_duration_seconds",
        "Wall clock duration of the last run (seconds)"
    ).unwrap();
}

/// Encode every registered metric in the Prometheus text format.
pub fn render() -> Result<String> {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    encoder
        .encode(&prometheus::gather(), &mut buffer)
        .context("Failed to encode prometheus metrics")?;
    String::from_utf8(buffer).context("Prometheus text output is not UTF-8")
}

/// Write the metrics to `path` for a node-exporter textfile collector.
///
/// The file is written next to its destination and renamed into place, so a
/// scrape never reads a partial file.
#[instrument(
    name = "thorax_metrics::write_textfile",
    target = "metrics::metrics",
    skip_all,
    level = "debug"
)]
pub fn write_textfile(path: &Path) -> Result<()> {
    let rendered = render()?;
    let tmp_path = path.with_extension("prom.tmp");

    std::fs::write(&tmp_path, rendered)
        .with_context(|| format!("Failed to write metrics to {}", tmp_path.display()))?;
    std::fs::rename(&tmp_path, path)
        .with_context(|| format!("Failed to move metrics into {}", path.display()))?;

    tracing::debug!(metrics_path = %path.display(), "Metrics textfile written");
    Ok(())
}
