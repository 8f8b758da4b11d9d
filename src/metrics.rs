use std::time::Duration;
use tracing::trace;

// Counters are trace events on `listing_gate.metrics`. The Prometheus
// recorder only backs the /metrics endpoint.

pub fn inc_requests(route: &'static str) {
    trace!(target = "listing_gate.metrics", route, "requests_total_inc");
}

pub fn stage_elapsed(stage: &'static str, elapsed: Duration) {
    trace!(
        target = "listing_gate.metrics",
        stage,
        elapsed_ms = elapsed.as_millis() as u64,
        "stage_duration_ms"
    );
}

/// `outcome` is `bound`, `accepted` or an activation error code.
pub fn activation_result(outcome: &'static str) {
    trace!(target = "listing_gate.metrics", outcome, "activations_total_inc");
}

pub fn fallback_used(reason: &'static str) {
    trace!(target = "listing_gate.metrics", reason, "fallback_total_inc");
}
