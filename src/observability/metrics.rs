//! Metrics collection and reporting

use axum::http::StatusCode;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Why the pipeline refused a request
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectReason {
    NotFound,
    Unauthorized,
    PayloadTooLarge,
    MaliciousInput,
    RateLimited,
    HandlerError,
}

impl RejectReason {
    const ALL: [RejectReason; 6] = [
        RejectReason::NotFound,
        RejectReason::Unauthorized,
        RejectReason::PayloadTooLarge,
        RejectReason::MaliciousInput,
        RejectReason::RateLimited,
        RejectReason::HandlerError,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RejectReason::NotFound => "not_found",
            RejectReason::Unauthorized => "unauthorized",
            RejectReason::PayloadTooLarge => "payload_too_large",
            RejectReason::MaliciousInput => "malicious_input",
            RejectReason::RateLimited => "rate_limited",
            RejectReason::HandlerError => "handler_error",
        }
    }

    fn index(&self) -> usize {
        *self as usize
    }
}

/// Snapshot of the counters
#[derive(Debug, Clone)]
pub struct SystemMetrics {
    /// Total requests dispatched
    pub total_requests: u64,

    /// Responses by status class (2xx, 3xx, 4xx, 5xx)
    pub responses_2xx: u64,
    pub responses_3xx: u64,
    pub responses_4xx: u64,
    pub responses_5xx: u64,

    /// Rate limiter outcomes
    pub rate_limit_admitted: u64,
    pub rate_limit_denied: u64,
    pub rate_limit_fail_open: u64,

    /// Average response time (ms)
    pub avg_response_time_ms: f64,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

/// Latency histogram buckets (in milliseconds)
const LATENCY_BUCKETS: &[f64] = &[1.0, 5.0, 10.0, 25.0, 50.0, 100.0, 250.0, 500.0, 1000.0, 2500.0, 5000.0];

/// Histogram for tracking latency distribution
#[derive(Debug, Clone)]
pub struct Histogram {
    buckets: Vec<(f64, Arc<AtomicU64>)>,
    sum: Arc<AtomicU64>,
    count: Arc<AtomicU64>,
}

impl Histogram {
    fn new(buckets: &[f64]) -> Self {
        let bucket_counters = buckets
            .iter()
            .map(|&b| (b, Arc::new(AtomicU64::new(0))))
            .collect();

        Self {
            buckets: bucket_counters,
            sum: Arc::new(AtomicU64::new(0)),
            count: Arc::new(AtomicU64::new(0)),
        }
    }

    fn observe(&self, value: f64) {
        self.sum.fetch_add(value as u64, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        // Cumulative: every bucket >= value is incremented
        for (bucket, counter) in &self.buckets {
            if value <= *bucket {
                counter.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    fn export_prometheus(&self, name: &str, help: &str) -> String {
        let mut output = String::new();

        output.push_str(&format!("# HELP {} {}\n", name, help));
        output.push_str(&format!("# TYPE {} histogram\n", name));

        for (bucket, counter) in &self.buckets {
            let count = counter.load(Ordering::Relaxed);
            output.push_str(&format!("{}_bucket{{le=\"{}\"}} {}\n", name, bucket, count));
        }

        let total_count = self.count.load(Ordering::Relaxed);
        output.push_str(&format!("{}_bucket{{le=\"+Inf\"}} {}\n", name, total_count));

        let sum = self.sum.load(Ordering::Relaxed) as f64;
        output.push_str(&format!("{}_sum {:.3}\n", name, sum));
        output.push_str(&format!("{}_count {}\n", name, total_count));

        output
    }
}

/// Metrics collector
pub struct MetricsCollector {
    start_time: Instant,
    total_requests: AtomicU64,
    total_response_time_ms: AtomicU64,
    status_classes: [AtomicU64; 4],
    rejections: [AtomicU64; 6],
    rate_limit_admitted: AtomicU64,
    rate_limit_denied: AtomicU64,
    rate_limit_fail_open: AtomicU64,
    request_latency: Histogram,
}

impl MetricsCollector {
    /// Create a new metrics collector
    pub fn new() -> Self {
        Self {
            start_time: Instant::now(),
            total_requests: AtomicU64::new(0),
            total_response_time_ms: AtomicU64::new(0),
            status_classes: Default::default(),
            rejections: Default::default(),
            rate_limit_admitted: AtomicU64::new(0),
            rate_limit_denied: AtomicU64::new(0),
            rate_limit_fail_open: AtomicU64::new(0),
            request_latency: Histogram::new(LATENCY_BUCKETS),
        }
    }

    /// Record a finished request
    pub fn record_request(&self, status: StatusCode, response_time: Duration) {
        self.total_requests.fetch_add(1, Ordering::Relaxed);
        let ms = response_time.as_millis() as u64;
        self.total_response_time_ms.fetch_add(ms, Ordering::Relaxed);
        self.request_latency.observe(ms as f64);

        let class = match status.as_u16() {
            200..=299 => Some(0),
            300..=399 => Some(1),
            400..=499 => Some(2),
            500..=599 => Some(3),
            _ => None,
        };
        if let Some(class) = class {
            self.status_classes[class].fetch_add(1, Ordering::Relaxed);
        }
    }

    /// Record a pipeline rejection
    pub fn record_rejection(&self, reason: RejectReason) {
        self.rejections[reason.index()].fetch_add(1, Ordering::Relaxed);
    }

    pub fn rejections(&self, reason: RejectReason) -> u64 {
        self.rejections[reason.index()].load(Ordering::Relaxed)
    }

    pub fn record_rate_limit_admitted(&self) {
        self.rate_limit_admitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limit_denied(&self) {
        self.rate_limit_denied.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_rate_limit_fail_open(&self) {
        self.rate_limit_fail_open.fetch_add(1, Ordering::Relaxed);
    }

    /// Get current metrics
    pub fn get_metrics(&self) -> SystemMetrics {
        let total_requests = self.total_requests.load(Ordering::Relaxed);
        let total_response_time = self.total_response_time_ms.load(Ordering::Relaxed);

        let avg_response_time_ms = if total_requests > 0 {
            total_response_time as f64 / total_requests as f64
        } else {
            0.0
        };

        SystemMetrics {
            total_requests,
            responses_2xx: self.status_classes[0].load(Ordering::Relaxed),
            responses_3xx: self.status_classes[1].load(Ordering::Relaxed),
            responses_4xx: self.status_classes[2].load(Ordering::Relaxed),
            responses_5xx: self.status_classes[3].load(Ordering::Relaxed),
            rate_limit_admitted: self.rate_limit_admitted.load(Ordering::Relaxed),
            rate_limit_denied: self.rate_limit_denied.load(Ordering::Relaxed),
            rate_limit_fail_open: self.rate_limit_fail_open.load(Ordering::Relaxed),
            avg_response_time_ms,
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    /// Export metrics in Prometheus text format
    pub fn export_prometheus(&self) -> String {
        let metrics = self.get_metrics();
        let mut output = String::new();

        output.push_str("# HELP gateway_requests_total Total number of requests dispatched\n");
        output.push_str("# TYPE gateway_requests_total counter\n");
        output.push_str(&format!("gateway_requests_total {}\n", metrics.total_requests));

        output.push_str("# HELP gateway_responses_total Responses by status class\n");
        output.push_str("# TYPE gateway_responses_total counter\n");
        for (class, value) in [
            ("2xx", metrics.responses_2xx),
            ("3xx", metrics.responses_3xx),
            ("4xx", metrics.responses_4xx),
            ("5xx", metrics.responses_5xx),
        ] {
            output.push_str(&format!("gateway_responses_total{{class=\"{}\"}} {}\n", class, value));
        }

        output.push_str("# HELP gateway_rejections_total Requests refused by the pipeline\n");
        output.push_str("# TYPE gateway_rejections_total counter\n");
        for reason in RejectReason::ALL {
            output.push_str(&format!(
                "gateway_rejections_total{{reason=\"{}\"}} {}\n",
                reason.as_str(),
                self.rejections(reason)
            ));
        }

        output.push_str("# HELP gateway_rate_limit_decisions_total Rate limiter outcomes\n");
        output.push_str("# TYPE gateway_rate_limit_decisions_total counter\n");
        for (outcome, value) in [
            ("admitted", metrics.rate_limit_admitted),
            ("denied", metrics.rate_limit_denied),
            ("fail_open", metrics.rate_limit_fail_open),
        ] {
            output.push_str(&format!(
                "gateway_rate_limit_decisions_total{{outcome=\"{}\"}} {}\n",
                outcome, value
            ));
        }

        output.push_str("# HELP gateway_uptime_seconds Uptime in seconds\n");
        output.push_str("# TYPE gateway_uptime_seconds gauge\n");
        output.push_str(&format!("gateway_uptime_seconds {}\n", metrics.uptime_secs));

        output.push_str(&self.request_latency.export_prometheus(
            "gateway_request_duration_milliseconds",
            "Request latency distribution",
        ));

        output
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_request_classes() {
        let metrics = MetricsCollector::new();
        metrics.record_request(StatusCode::OK, Duration::from_millis(10));
        metrics.record_request(StatusCode::TOO_MANY_REQUESTS, Duration::from_millis(20));
        metrics.record_request(StatusCode::INTERNAL_SERVER_ERROR, Duration::from_millis(30));

        let snapshot = metrics.get_metrics();
        assert_eq!(snapshot.total_requests, 3);
        assert_eq!(snapshot.responses_2xx, 1);
        assert_eq!(snapshot.responses_4xx, 1);
        assert_eq!(snapshot.responses_5xx, 1);
        assert_eq!(snapshot.avg_response_time_ms, 20.0);
    }

    #[test]
    fn test_rejections() {
        let metrics = MetricsCollector::new();
        metrics.record_rejection(RejectReason::RateLimited);
        metrics.record_rejection(RejectReason::RateLimited);
        metrics.record_rejection(RejectReason::NotFound);

        assert_eq!(metrics.rejections(RejectReason::RateLimited), 2);
        assert_eq!(metrics.rejections(RejectReason::NotFound), 1);
        assert_eq!(metrics.rejections(RejectReason::Unauthorized), 0);
    }

    #[test]
    fn test_prometheus_export() {
        let metrics = MetricsCollector::new();
        metrics.record_request(StatusCode::OK, Duration::from_millis(3));
        metrics.record_rate_limit_fail_open();
        metrics.record_rejection(RejectReason::MaliciousInput);

        let output = metrics.export_prometheus();
        assert!(output.contains("gateway_requests_total 1"));
        assert!(output.contains("gateway_rate_limit_decisions_total{outcome=\"fail_open\"} 1"));
        assert!(output.contains("gateway_rejections_total{reason=\"malicious_input\"} 1"));
        assert!(output.contains("gateway_request_duration_milliseconds_bucket{le=\"5\"} 1"));
    }
}
