use tracing::trace;

// Counters are emitted as trace events; the Prometheus recorder only renders `/metrics`.

pub fn inc_requests(route: &'static str) {
    trace!(target = "listing.metrics", route = route, "requests_total_inc");
}

pub fn tool_elapsed(tool: &str, elapsed_ms: u128) {
    trace!(
        target = "listing.metrics",
        tool = tool,
        elapsed_ms = elapsed_ms as u64,
        "tool_elapsed"
    );
}
