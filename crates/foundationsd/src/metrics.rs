//! Prometheus metrics for foundationsd

use prometheus::{
    register_histogram_vec_with_registry, register_int_counter_vec_with_registry,
    register_int_counter_with_registry, Encoder, HistogramVec, IntCounter, IntCounterVec, Registry,
    TextEncoder,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct ServiceMetrics {
    pub http_requests_total: IntCounterVec,
    pub http_request_duration_seconds: HistogramVec,

    pub assessments_saved_total: IntCounter,
    pub idempotent_replays_total: IntCounter,
    pub analyses_saved_total: IntCounter,

    pub llm_requests_total: IntCounterVec,
    pub llm_latency_seconds: HistogramVec,
    pub impressions_total: IntCounterVec,
    pub feedback_total: IntCounter,
    pub rate_limit_violations_total: IntCounter,

    registry: Arc<Registry>,
}

impl ServiceMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let http_requests_total = register_int_counter_vec_with_registry!(
            "foundations_http_requests_total",
            "HTTP requests by route, method and status",
            &["route", "method", "status"],
            registry
        )?;

        let http_request_duration_seconds = register_histogram_vec_with_registry!(
            "foundations_http_request_duration_seconds",
            "HTTP request latency by route",
            &["route"],
            vec![0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 30.0],
            registry
        )?;

        let assessments_saved_total = register_int_counter_with_registry!(
            "foundations_assessments_saved_total",
            "Assessments durably saved",
            registry
        )?;

        let idempotent_replays_total = register_int_counter_with_registry!(
            "foundations_idempotent_replays_total",
            "Assessment saves answered from an earlier request with the same key",
            registry
        )?;

        let analyses_saved_total = register_int_counter_with_registry!(
            "foundations_analyses_saved_total",
            "Analyses saved",
            registry
        )?;

        let llm_requests_total = register_int_counter_vec_with_registry!(
            "foundations_llm_requests_total",
            "Upstream LLM requests by outcome",
            &["outcome"],
            registry
        )?;

        let llm_latency_seconds = register_histogram_vec_with_registry!(
            "foundations_llm_latency_seconds",
            "Upstream LLM latency by model",
            &["model"],
            vec![0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0, 60.0],
            registry
        )?;

        let impressions_total = register_int_counter_vec_with_registry!(
            "foundations_impressions_total",
            "Recorded prompt variant impressions",
            &["variant"],
            registry
        )?;

        let feedback_total = register_int_counter_with_registry!(
            "foundations_feedback_total",
            "Impression ratings received",
            registry
        )?;

        let rate_limit_violations_total = register_int_counter_with_registry!(
            "foundations_rate_limit_violations_total",
            "Requests rejected by the per-user LLM rate limit",
            registry
        )?;

        Ok(Self {
            http_requests_total,
            http_request_duration_seconds,
            assessments_saved_total,
            idempotent_replays_total,
            analyses_saved_total,
            llm_requests_total,
            llm_latency_seconds,
            impressions_total,
            feedback_total,
            rate_limit_violations_total,
            registry: Arc::new(registry),
        })
    }

    pub fn record_request(&self, route: &str, method: &str, status: u16, duration_secs: f64) {
        self.http_requests_total
            .with_label_values(&[route, method, &status.to_string()])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[route])
            .observe(duration_secs);
    }

    pub fn record_llm(&self, model: &str, success: bool, duration_secs: f64) {
        let outcome = if success { "success" } else { "error" };
        self.llm_requests_total.with_label_values(&[outcome]).inc();
        self.llm_latency_seconds
            .with_label_values(&[model])
            .observe(duration_secs);
    }

    pub fn record_impression(&self, variant_id: &str) {
        self.impressions_total.with_label_values(&[variant_id]).inc();
    }

    /// Prometheus text exposition
    pub fn export(&self) -> Result<String, prometheus::Error> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8_lossy(&buffer).into_owned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_export() {
        let metrics = ServiceMetrics::new().unwrap();
        metrics.assessments_saved_total.inc();
        metrics.record_request("/v1/assessments", "POST", 200, 0.01);
        metrics.record_llm("gpt-4o-mini", true, 1.2);

        let text = metrics.export().unwrap();
        assert!(text.contains("foundations_assessments_saved_total 1"));
        assert!(text.contains("foundations_http_requests_total"));
        assert!(text.contains("outcome=\"success\""));
    }

    #[test]
    fn test_registries_are_independent() {
        let a = ServiceMetrics::new().unwrap();
        let b = ServiceMetrics::new().unwrap();
        a.feedback_total.inc();
        assert_eq!(a.feedback_total.get(), 1);
        assert_eq!(b.feedback_total.get(), 0);
    }
}
