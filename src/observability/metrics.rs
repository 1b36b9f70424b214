//! Prometheus metrics.
//!
//! All label values come from fixed vocabularies (phase state names, event
//! kinds, error categories), so label cardinality is bounded.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::PrometheusBuilder;

use crate::error::TrackerError;

/// Guard to prevent double-initialization of the metrics recorder.
static METRICS_INITIALIZED: AtomicBool = AtomicBool::new(false);

/// Initializes the global metrics recorder.
///
/// When `port` is `Some`, a Prometheus HTTP listener is started on
/// `127.0.0.1:<port>`. When `None`, the recorder is installed without an
/// HTTP endpoint. Before initialization every `record_*` call is a no-op.
///
/// # Errors
///
/// Returns `TrackerError::Io` if the recorder or HTTP listener cannot be
/// installed.
pub fn init_metrics(port: Option<u16>) -> Result<(), TrackerError> {
    if METRICS_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::debug!("metrics already initialized, skipping");
        return Ok(());
    }
    port.map_or_else(
        || PrometheusBuilder::new().install_recorder().map(|_| ()),
        |p| {
            PrometheusBuilder::new()
                .with_http_listener(([127, 0, 0, 1], p))
                .install()
        },
    )
    .map_err(|e| TrackerError::Io(std::io::Error::other(e.to_string())))?;

    describe_metrics();
    Ok(())
}

fn describe_metrics() {
    describe_counter!(
        "phase_tracker_phases_opened_total",
        "Phase contexts built and switched"
    );
    describe_counter!(
        "phase_tracker_phases_closed_total",
        "Phase contexts closed and unwound"
    );
    describe_histogram!(
        "phase_tracker_phase_duration_ms",
        "Time a phase context stayed open in milliseconds"
    );
    describe_gauge!("phase_tracker_phase_depth", "Current phase stack depth");
    describe_counter!(
        "phase_tracker_transactions_captured_total",
        "Changes captured by an open phase"
    );
    describe_counter!(
        "phase_tracker_transactions_applied_total",
        "Captured changes committed at unwind"
    );
    describe_counter!(
        "phase_tracker_transactions_reverted_total",
        "Captured changes restored at unwind"
    );
    describe_counter!("phase_tracker_events_posted_total", "Events posted");
    describe_counter!(
        "phase_tracker_unattributed_changes_total",
        "Changes applied with no capturing phase"
    );
    describe_counter!(
        "phase_tracker_tasks_skipped_total",
        "Scheduled tasks skipped because they were cancelled"
    );
    describe_counter!(
        "phase_tracker_packets_dropped_total",
        "Packets dropped before dispatch"
    );
    describe_counter!(
        "phase_tracker_usage_errors_total",
        "Broken call contracts by kind"
    );
    describe_counter!(
        "phase_tracker_errors_total",
        "Total number of errors by category"
    );
}

/// Records a phase context being opened.
pub fn record_phase_opened(state: &'static str, side: &'static str) {
    counter!("phase_tracker_phases_opened_total", "state" => state, "side" => side).increment(1);
}

/// Records a phase context being closed, with how long it was open.
pub fn record_phase_closed(state: &'static str, side: &'static str, elapsed: Duration) {
    counter!("phase_tracker_phases_closed_total", "state" => state, "side" => side).increment(1);
    histogram!("phase_tracker_phase_duration_ms", "state" => state)
        .record(elapsed.as_secs_f64() * 1000.0);
}

/// Sets the phase stack depth gauge.
#[allow(clippy::cast_precision_loss)]
pub fn set_phase_depth(side: &'static str, depth: usize) {
    gauge!("phase_tracker_phase_depth", "side" => side).set(depth as f64);
}

/// Records one captured change.
pub fn record_transaction_captured(kind: &'static str) {
    counter!("phase_tracker_transactions_captured_total", "kind" => kind).increment(1);
}

/// Records the settlement of a batch of captured changes.
pub fn record_transactions_settled(kind: &'static str, applied: usize, reverted: usize) {
    if applied > 0 {
        counter!("phase_tracker_transactions_applied_total", "kind" => kind)
            .increment(applied as u64);
    }
    if reverted > 0 {
        counter!("phase_tracker_transactions_reverted_total", "kind" => kind)
            .increment(reverted as u64);
    }
}

/// Records a posted event.
pub fn record_event_posted(kind: &'static str, cancelled: bool) {
    let outcome = if cancelled { "cancelled" } else { "passed" };
    counter!("phase_tracker_events_posted_total", "kind" => kind, "outcome" => outcome)
        .increment(1);
}

/// Records a change applied with no capturing phase.
pub fn record_unattributed_change(kind: &'static str) {
    counter!("phase_tracker_unattributed_changes_total", "kind" => kind).increment(1);
}

/// Records a cancelled scheduled task being skipped.
pub fn record_task_skipped() {
    counter!("phase_tracker_tasks_skipped_total").increment(1);
}

/// Records a dropped packet.
pub fn record_packet_dropped(reason: &'static str) {
    counter!("phase_tracker_packets_dropped_total", "reason" => reason).increment(1);
}

/// Records a broken call contract.
pub fn record_usage_error(kind: &'static str) {
    counter!("phase_tracker_usage_errors_total", "kind" => kind).increment(1);
}

/// Records an error by category.
pub fn record_error(category: &'static str) {
    counter!("phase_tracker_errors_total", "category" => category).increment(1);
}
