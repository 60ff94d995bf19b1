//! Prometheus metrics exposition
//!
//! - `gateway_requests_total` (counter): labels `route`, `status`
//! - `gateway_request_duration_seconds` (histogram): label `route`
//! - `gateway_tier_attempts_total` (counter): labels `tier`, `outcome`
//! - `key_pool_credential_failures_total` (counter): label `kind`, emitted by the key pool

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};

/// Generation calls run from sub-second text answers to slow image renders.
const DURATION_BUCKETS: &[f64] = &[
    0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 20.0, 30.0, 60.0, 120.0,
];

fn builder() -> PrometheusBuilder {
    PrometheusBuilder::new()
        .set_buckets_for_metric(
            Matcher::Full("gateway_request_duration_seconds".to_string()),
            DURATION_BUCKETS,
        )
        .expect("histogram buckets are non-empty")
}

/// Install the Prometheus recorder and return a handle for rendering metrics.
pub fn install_recorder() -> PrometheusHandle {
    builder()
        .install_recorder()
        .expect("failed to install Prometheus recorder")
}

/// Record a completed API request.
pub fn record_request(route: &'static str, status: u16, duration_secs: f64) {
    metrics::counter!("gateway_requests_total", "route" => route, "status" => status.to_string())
        .increment(1);
    metrics::histogram!("gateway_request_duration_seconds", "route" => route).record(duration_secs);
}

/// Record one fallback tier attempt. `outcome` is "success", "skipped" or a failure kind.
pub fn record_tier_attempt(tier: &str, outcome: &'static str) {
    metrics::counter!("gateway_tier_attempts_total", "tier" => tier.to_string(), "outcome" => outcome)
        .increment(1);
}

#[cfg(test)]
mod tests {
    use super::*;
    use metrics_exporter_prometheus::PrometheusRecorder;

    fn isolated_recorder() -> (PrometheusRecorder, PrometheusHandle) {
        let recorder = builder().build_recorder();
        let handle = recorder.handle();
        (recorder, handle)
    }

    #[test]
    fn record_functions_do_not_panic_without_recorder() {
        record_request("images", 200, 0.5);
        record_tier_attempt("primary", "success");
    }

    #[test]
    fn record_request_renders_counter_and_histogram() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_request("images", 200, 4.2);
        record_request("text", 502, 0.3);

        let output = handle.render();
        assert!(output.contains("gateway_requests_total"));
        assert!(output.contains("route=\"images\""));
        assert!(output.contains("status=\"502\""));
        assert!(
            output.contains("gateway_request_duration_seconds_bucket"),
            "histogram must render _bucket lines"
        );
        assert!(output.contains("le=\"120\""));
    }

    #[test]
    fn tier_attempts_carry_tier_and_outcome() {
        let (recorder, handle) = isolated_recorder();
        let _guard = metrics::set_default_local_recorder(&recorder);

        record_tier_attempt("primary", "exhausted");
        record_tier_attempt("web", "skipped");

        let output = handle.render();
        assert!(output.contains("gateway_tier_attempts_total"));
        assert!(output.contains("tier=\"primary\""));
        assert!(output.contains("outcome=\"exhausted\""));
        assert!(output.contains("outcome=\"skipped\""));
    }
}
