use ::metrics::Unit;
use std::time::Duration;

pub const BACKEND_REQUESTS_TOTAL: &str = "blackbox_report_backend_requests_total";
pub const BACKEND_REQUEST_DURATION: &str = "blackbox_report_backend_request_duration_seconds";
pub const CHUNK_FAILURES_TOTAL: &str = "blackbox_report_chunk_failures_total";
pub const DOWNTIME_INTERVALS_TOTAL: &str = "blackbox_report_downtime_intervals_total";

/// Record one request against the Prometheus backend
pub fn record_backend_request(endpoint: &str, success: bool, elapsed: Duration) {
    let status = if success { "success" } else { "failure" };

    ::metrics::counter!(
        BACKEND_REQUESTS_TOTAL,
        "endpoint" => endpoint.to_string(),
        "status" => status
    )
    .increment(1);

    ::metrics::histogram!(
        BACKEND_REQUEST_DURATION,
        "endpoint" => endpoint.to_string()
    )
    .record(elapsed.as_secs_f64());
}

/// Record a chunk whose range query failed; `mode` is `single` or `group`
pub fn record_chunk_failure(mode: &'static str) {
    ::metrics::counter!(CHUNK_FAILURES_TOTAL, "mode" => mode).increment(1);
}

/// Record the number of intervals a report returned
pub fn record_intervals(mode: &'static str, count: usize) {
    ::metrics::counter!(DOWNTIME_INTERVALS_TOTAL, "mode" => mode).increment(count as u64);
}

/// Initialize metrics system with descriptions for all metrics
pub fn init_metrics() {
    ::metrics::describe_counter!(
        BACKEND_REQUESTS_TOTAL,
        Unit::Count,
        "Requests sent to the Prometheus backend by endpoint and status"
    );

    ::metrics::describe_histogram!(
        BACKEND_REQUEST_DURATION,
        Unit::Seconds,
        "Latency of Prometheus backend requests in seconds"
    );

    ::metrics::describe_counter!(
        CHUNK_FAILURES_TOTAL,
        Unit::Count,
        "Chunk range queries that failed, by report mode"
    );

    ::metrics::describe_counter!(
        DOWNTIME_INTERVALS_TOTAL,
        Unit::Count,
        "Downtime intervals returned by reports, by report mode"
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recording_without_recorder_is_a_noop() {
        init_metrics();
        record_backend_request("/api/v1/query", true, Duration::from_millis(12));
        record_backend_request("/api/v1/query_range", false, Duration::from_secs(60));
        record_chunk_failure("group");
        record_intervals("single", 3);
    }
}
