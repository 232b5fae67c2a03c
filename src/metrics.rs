/// Metrics and monitoring for outgoing portal and vendor requests
///
/// Tracks request counts, per-status counts, latency and in-flight gauges
/// for each method/endpoint pair, plus session refresh failures labeled by
/// root cause (auth, captcha, transport, store)

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use chrono::{DateTime, Utc};
use serde::{Serialize, Deserialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EndpointMetrics {
    pub method: String,
    pub endpoint: String,
    pub total_requests: u64,
    pub failed_requests: u64,
    pub status_counts: HashMap<u16, u64>,
    pub in_flight: u64,
    pub total_latency_ms: u64,
    pub average_latency_ms: f64,
    pub last_success: Option<DateTime<Utc>>,
    pub last_failure: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

impl EndpointMetrics {
    fn new(method: &str, endpoint: &str) -> Self {
        Self {
            method: method.to_string(),
            endpoint: endpoint.to_string(),
            total_requests: 0,
            failed_requests: 0,
            status_counts: HashMap::new(),
            in_flight: 0,
            total_latency_ms: 0,
            average_latency_ms: 0.0,
            last_success: None,
            last_failure: None,
            last_error: None,
        }
    }

    fn record(&mut self, status: Option<u16>, latency: Duration, error: Option<&str>) {
        self.total_requests += 1;
        if let Some(code) = status {
            *self.status_counts.entry(code).or_insert(0) += 1;
        }
        let latency_ms = latency.as_millis() as u64;
        self.total_latency_ms += latency_ms;
        self.average_latency_ms = self.total_latency_ms as f64 / self.total_requests as f64;
        match error {
            None => self.last_success = Some(Utc::now()),
            Some(e) => {
                self.failed_requests += 1;
                self.last_failure = Some(Utc::now());
                self.last_error = Some(e.to_string());
            }
        }
    }
}

#[derive(Default)]
struct MetricsInner {
    endpoints: HashMap<String, EndpointMetrics>,
    refresh_failures: HashMap<String, u64>,
}

/// Global metrics tracker, shared across the HTTP client and the worker
#[derive(Clone)]
pub struct MetricsTracker {
    inner: Arc<Mutex<MetricsInner>>,
}

impl MetricsTracker {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MetricsInner::default())),
        }
    }

    fn key(method: &str, endpoint: &str) -> String {
        format!("{} {}", method, endpoint)
    }

    /// Bump the in-flight gauge before a request is issued.
    pub fn request_started(&self, method: &str, endpoint: &str) {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner
            .endpoints
            .entry(Self::key(method, endpoint))
            .or_insert_with(|| EndpointMetrics::new(method, endpoint));
        entry.in_flight += 1;
    }

    /// Record the completed call and drop the in-flight gauge. Must be
    /// called on failure paths too, or the gauge leaks.
    pub fn request_finished(
        &self,
        method: &str,
        endpoint: &str,
        status: Option<u16>,
        latency: Duration,
        error: Option<&str>,
    ) {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner
            .endpoints
            .entry(Self::key(method, endpoint))
            .or_insert_with(|| EndpointMetrics::new(method, endpoint));
        entry.in_flight = entry.in_flight.saturating_sub(1);
        entry.record(status, latency, error);

        if let Some(e) = error {
            log::warn!(
                "[{} {}] request failed after {}ms: {}",
                method,
                endpoint,
                latency.as_millis(),
                e
            );
        } else {
            log::debug!(
                "[{} {}] {} in {}ms",
                method,
                endpoint,
                status.map(|s| s.to_string()).unwrap_or_default(),
                latency.as_millis()
            );
        }
    }

    /// Count a failed session refresh under its root-cause label
    /// (auth, captcha, transport, store).
    pub fn record_refresh_failure(&self, label: &str) {
        let mut inner = self.inner.lock().unwrap();
        *inner.refresh_failures.entry(label.to_string()).or_insert(0) += 1;
        log::warn!("session refresh failure counted under '{}'", label);
    }

    pub fn endpoint_metrics(&self, method: &str, endpoint: &str) -> Option<EndpointMetrics> {
        let inner = self.inner.lock().unwrap();
        inner.endpoints.get(&Self::key(method, endpoint)).cloned()
    }

    pub fn refresh_failures(&self) -> HashMap<String, u64> {
        let inner = self.inner.lock().unwrap();
        inner.refresh_failures.clone()
    }

    pub fn snapshot(&self) -> Vec<EndpointMetrics> {
        let inner = self.inner.lock().unwrap();
        inner.endpoints.values().cloned().collect()
    }

    pub fn export_json(&self) -> serde_json::Value {
        let inner = self.inner.lock().unwrap();
        serde_json::json!({
            "endpoints": &inner.endpoints,
            "refresh_failures": &inner.refresh_failures,
        })
    }
}

impl Default for MetricsTracker {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_in_flight_gauge() {
        let tracker = MetricsTracker::new();
        tracker.request_started("POST", "/bas/users/page");
        tracker.request_started("POST", "/bas/users/page");

        let m = tracker.endpoint_metrics("POST", "/bas/users/page").unwrap();
        assert_eq!(m.in_flight, 2);

        tracker.request_finished(
            "POST",
            "/bas/users/page",
            Some(200),
            Duration::from_millis(40),
            None,
        );
        let m = tracker.endpoint_metrics("POST", "/bas/users/page").unwrap();
        assert_eq!(m.in_flight, 1);
        assert_eq!(m.total_requests, 1);
        assert_eq!(m.status_counts.get(&200), Some(&1));
    }

    #[test]
    fn test_failure_decrements_gauge() {
        let tracker = MetricsTracker::new();
        tracker.request_started("GET", "/login");
        tracker.request_finished(
            "GET",
            "/login",
            None,
            Duration::from_millis(10),
            Some("connection refused"),
        );

        let m = tracker.endpoint_metrics("GET", "/login").unwrap();
        assert_eq!(m.in_flight, 0);
        assert_eq!(m.failed_requests, 1);
        assert_eq!(m.last_error.as_deref(), Some("connection refused"));
        assert!(m.last_failure.is_some());
    }

    #[test]
    fn test_average_latency() {
        let tracker = MetricsTracker::new();
        tracker.request_started("GET", "/login");
        tracker.request_finished("GET", "/login", Some(200), Duration::from_millis(100), None);
        tracker.request_started("GET", "/login");
        tracker.request_finished("GET", "/login", Some(200), Duration::from_millis(200), None);

        let m = tracker.endpoint_metrics("GET", "/login").unwrap();
        assert!((m.average_latency_ms - 150.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_refresh_failure_labels() {
        let tracker = MetricsTracker::new();
        tracker.record_refresh_failure("captcha");
        tracker.record_refresh_failure("captcha");
        tracker.record_refresh_failure("auth");

        let failures = tracker.refresh_failures();
        assert_eq!(failures.get("captcha"), Some(&2));
        assert_eq!(failures.get("auth"), Some(&1));
        assert_eq!(failures.get("transport"), None);
    }
}
