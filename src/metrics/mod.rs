//! Prometheus metrics for the router
//!
//! Exposed on the API listener at `/metrics`.

use prometheus::{HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::sync::OnceLock;

/// Global metrics registry
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Get the global metrics instance
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}

/// Router metrics collection
pub struct Metrics {
    /// Registry for all metrics
    pub registry: Registry,

    // Node metrics
    /// Role probes by probe kind and result
    pub probes_total: IntCounterVec,
    /// Availability answers by status
    pub availability_total: IntCounterVec,
    /// Heartbeat table maintenance by action and result
    pub heartbeat_maintenance_total: IntCounterVec,
    /// Maintenance rounds skipped because the primary was ambiguous
    pub primary_anomalies_total: IntCounterVec,

    // HTTP metrics
    /// Requests by route and status code
    pub http_requests_total: IntCounterVec,
    /// Request latency histogram (in seconds)
    pub http_request_duration_seconds: HistogramVec,
}

impl Metrics {
    /// Create a new metrics collection
    pub fn new() -> Self {
        let registry = Registry::new();

        let probes_total = IntCounterVec::new(
            Opts::new("pgroute66_probes_total", "Total number of node role probes"),
            &["probe", "result"], // primary/standby, true/false/error
        )
        .expect("valid metric definition");

        let availability_total = IntCounterVec::new(
            Opts::new(
                "pgroute66_availability_total",
                "Total number of availability answers by status",
            ),
            &["status"], // ok, exceeded, unavailable, invalid
        )
        .expect("valid metric definition");

        let heartbeat_maintenance_total = IntCounterVec::new(
            Opts::new(
                "pgroute66_heartbeat_maintenance_total",
                "Total number of heartbeat table maintenance attempts",
            ),
            &["action", "result"], // create/update, ok/error/skipped
        )
        .expect("valid metric definition");

        let primary_anomalies_total = IntCounterVec::new(
            Opts::new(
                "pgroute66_primary_anomalies_total",
                "Maintenance rounds skipped because no single primary was found",
            ),
            &["kind"], // none, unreachable, multiple
        )
        .expect("valid metric definition");

        let http_requests_total = IntCounterVec::new(
            Opts::new("pgroute66_http_requests_total", "Total number of HTTP requests"),
            &["route", "code"],
        )
        .expect("valid metric definition");

        let http_request_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "pgroute66_http_request_duration_seconds",
                "HTTP request latency in seconds",
            )
            .buckets(vec![
                0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
            ]),
            &["route"],
        )
        .expect("valid metric definition");

        // Register all metrics
        for collector in [
            Box::new(probes_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(availability_total.clone()),
            Box::new(heartbeat_maintenance_total.clone()),
            Box::new(primary_anomalies_total.clone()),
            Box::new(http_requests_total.clone()),
            Box::new(http_request_duration_seconds.clone()),
        ] {
            registry
                .register(collector)
                .expect("metric registered once");
        }

        Self {
            registry,
            probes_total,
            availability_total,
            heartbeat_maintenance_total,
            primary_anomalies_total,
            http_requests_total,
            http_request_duration_seconds,
        }
    }

    /// Record a role probe result
    pub fn record_probe(&self, probe: &str, result: &str) {
        self.probes_total.with_label_values(&[probe, result]).inc();
    }

    /// Record an availability answer
    pub fn record_availability(&self, status: &str) {
        self.availability_total.with_label_values(&[status]).inc();
    }

    /// Record a heartbeat maintenance attempt
    pub fn record_heartbeat(&self, action: &str, result: &str) {
        self.heartbeat_maintenance_total
            .with_label_values(&[action, result])
            .inc();
    }

    /// Record a skipped maintenance round
    pub fn record_primary_anomaly(&self, kind: &str) {
        self.primary_anomalies_total.with_label_values(&[kind]).inc();
    }

    /// Record a served HTTP request
    pub fn record_request(&self, route: &str, code: u16, duration_secs: f64) {
        self.http_requests_total
            .with_label_values(&[route, &code.to_string()])
            .inc();
        self.http_request_duration_seconds
            .with_label_values(&[route])
            .observe(duration_secs);
    }

    /// Get metrics as Prometheus text format
    pub fn gather(&self) -> String {
        use prometheus::Encoder;
        let encoder = prometheus::TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
            tracing::warn!(error = %e, "Failed to encode metrics");
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}
