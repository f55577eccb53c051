use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder,
};

/// Prometheus registry shared by the HTTP layer and both services.
#[derive(Clone)]
pub struct ServiceMetrics {
    pub registry: Registry,
    /// Requests served, labeled by service, method and status code.
    pub http_requests_total: IntCounterVec,
    /// Request latency in seconds, labeled by service.
    pub http_request_duration: HistogramVec,
    /// Failed upstream calls by failure kind.
    pub upstream_failures_total: IntCounterVec,
    /// `refresh_if_stale` results: fresh, refreshed, joined, failed.
    pub cache_refreshes_total: IntCounterVec,
    /// Values admitted into a window, by category.
    pub window_admitted_total: IntCounterVec,
}

impl ServiceMetrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let http_requests_total = IntCounterVec::new(
            Opts::new("evalhub_http_requests_total", "Total HTTP requests served"),
            &["service", "method", "status"],
        )?;

        let http_request_duration = HistogramVec::new(
            HistogramOpts::new(
                "evalhub_http_request_duration_seconds",
                "HTTP request latency in seconds",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0,
            ]),
            &["service"],
        )?;

        let upstream_failures_total = IntCounterVec::new(
            Opts::new(
                "evalhub_upstream_failures_total",
                "Failed calls to the evaluation service",
            ),
            &["kind"],
        )?;

        let cache_refreshes_total = IntCounterVec::new(
            Opts::new(
                "evalhub_cache_refreshes_total",
                "Social cache refresh attempts by outcome",
            ),
            &["outcome"],
        )?;

        let window_admitted_total = IntCounterVec::new(
            Opts::new(
                "evalhub_window_admitted_total",
                "Numbers admitted into a sliding window",
            ),
            &["category"],
        )?;

        registry.register(Box::new(http_requests_total.clone()))?;
        registry.register(Box::new(http_request_duration.clone()))?;
        registry.register(Box::new(upstream_failures_total.clone()))?;
        registry.register(Box::new(cache_refreshes_total.clone()))?;
        registry.register(Box::new(window_admitted_total.clone()))?;

        Ok(Self {
            registry,
            http_requests_total,
            http_request_duration,
            upstream_failures_total,
            cache_refreshes_total,
            window_admitted_total,
        })
    }

    /// Encodes all registered metrics into Prometheus text exposition format.
    pub fn encode(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::error!("Failed to encode metrics: {}", e);
        }
        String::from_utf8(buffer).unwrap_or_default()
    }

    pub fn record_request(&self, service: &str, method: &str, status: u16, seconds: f64) {
        let status = status.to_string();
        self.http_requests_total
            .with_label_values(&[service, method, status.as_str()])
            .inc();
        self.http_request_duration
            .with_label_values(&[service])
            .observe(seconds);
    }

    pub fn record_upstream_failure(&self, kind: &str) {
        self.upstream_failures_total.with_label_values(&[kind]).inc();
    }

    pub fn record_refresh(&self, outcome: &str) {
        self.cache_refreshes_total.with_label_values(&[outcome]).inc();
    }

    pub fn record_admitted(&self, category: &str, count: usize) {
        self.window_admitted_total
            .with_label_values(&[category])
            .inc_by(count as u64);
    }
}

/// Body of `GET /health`.
pub fn health_body(service: &str) -> serde_json::Value {
    serde_json::json!({ "status": "ok", "service": service })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_show_up_in_exposition() {
        let metrics = ServiceMetrics::new().unwrap();
        metrics.record_request("numbers", "GET", 200, 0.01);
        metrics.record_refresh("refreshed");
        metrics.record_upstream_failure("timeout");
        metrics.record_admitted("p", 3);

        let text = metrics.encode();
        assert!(text.contains("evalhub_http_requests_total"));
        assert!(text.contains("outcome=\"refreshed\""));
        assert!(text.contains("kind=\"timeout\""));
        assert_eq!(
            metrics
                .window_admitted_total
                .with_label_values(&["p"])
                .get(),
            3
        );
    }

    #[test]
    fn health_names_the_service() {
        assert_eq!(health_body("social")["service"], "social");
    }
}
