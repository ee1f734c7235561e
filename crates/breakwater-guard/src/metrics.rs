//! Observability seam for circuit breaker state transitions.
//!
//! Breaker transitions are the only events this subsystem reports to
//! metrics infrastructure. The sink is a trait so deployments can plug in
//! their collector; the default emits structured tracing events.

use std::sync::Mutex;

/// Sink for named counters and gauges.
pub trait MetricsSink: Send + Sync + std::fmt::Debug {
    /// Increments a counter by one.
    fn counter(&self, name: &'static str, labels: &[(&'static str, &str)]);

    /// Sets a gauge to the given value.
    fn gauge(&self, name: &'static str, value: f64, labels: &[(&'static str, &str)]);
}

/// Default sink that emits tracing events.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl MetricsSink for TracingSink {
    fn counter(&self, name: &'static str, labels: &[(&'static str, &str)]) {
        tracing::debug!(metric = name, ?labels, "counter");
    }

    fn gauge(&self, name: &'static str, value: f64, labels: &[(&'static str, &str)]) {
        tracing::debug!(metric = name, value, ?labels, "gauge");
    }
}

/// Recording sink for asserting emitted metrics in tests.
#[derive(Debug, Default)]
pub struct RecordingSink {
    entries: Mutex<Vec<MetricEntry>>,
}

/// One recorded metric emission.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricEntry {
    /// Metric name.
    pub name: &'static str,
    /// Gauge value; `None` for counters.
    pub value: Option<f64>,
    /// Label pairs as owned strings.
    pub labels: Vec<(String, String)>,
}

impl RecordingSink {
    /// Creates an empty recording sink.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns all recorded entries.
    pub fn entries(&self) -> Vec<MetricEntry> {
        self.entries.lock().map(|e| e.clone()).unwrap_or_default()
    }

    /// Returns recorded gauge values for a metric name, in emission order.
    pub fn gauge_values(&self, name: &str) -> Vec<f64> {
        self.entries()
            .into_iter()
            .filter(|e| e.name == name)
            .filter_map(|e| e.value)
            .collect()
    }

    fn push(&self, entry: MetricEntry) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.push(entry);
        }
    }
}

impl MetricsSink for RecordingSink {
    fn counter(&self, name: &'static str, labels: &[(&'static str, &str)]) {
        self.push(MetricEntry { name, value: None, labels: owned_labels(labels) });
    }

    fn gauge(&self, name: &'static str, value: f64, labels: &[(&'static str, &str)]) {
        self.push(MetricEntry { name, value: Some(value), labels: owned_labels(labels) });
    }
}

fn owned_labels(labels: &[(&'static str, &str)]) -> Vec<(String, String)> {
    labels.iter().map(|(k, v)| ((*k).to_string(), (*v).to_string())).collect()
}
