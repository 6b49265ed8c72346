//! Per-request metrics for protocol traffic.
//!
//! The recorder is an append-only log; aggregation is a pure fold over a
//! snapshot and can run at any time. Summaries are serialised into the
//! evaluation result so protocol overhead can be compared against
//! local-agent baselines.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Mutex;

/// One wire exchange, success or failure.
#[derive(Debug, Clone, Serialize)]
pub struct RequestMetric {
    pub request_id: String,
    pub endpoint: String,
    pub method: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    pub latency_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub input_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output_tokens: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

/// Aggregate view over all recorded metrics.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct MetricsSummary {
    pub total_requests: usize,
    pub total_tokens: u64,
    pub total_latency_ms: u64,
    /// Arithmetic mean; `None` when nothing has been recorded.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avg_latency_ms: Option<f64>,
    pub error_count: usize,
}

/// Thread-safe append-only metric log.
///
/// Writers only ever push; aggregation copies the log under the lock and
/// folds outside it.
#[derive(Debug, Default)]
pub struct MetricsRecorder {
    entries: Mutex<Vec<RequestMetric>>,
}

impl MetricsRecorder {
    pub fn new() -> Self {
        MetricsRecorder {
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Append one metric.
    pub fn record(&self, metric: RequestMetric) {
        match self.entries.lock() {
            Ok(mut entries) => entries.push(metric),
            // A poisoned lock means a panicking writer; losing one metric
            // beats propagating the panic into protocol code.
            Err(poisoned) => poisoned.into_inner().push(metric),
        }
    }

    /// Copy of everything recorded so far.
    pub fn snapshot(&self) -> Vec<RequestMetric> {
        match self.entries.lock() {
            Ok(entries) => entries.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Fold the log into a [`MetricsSummary`].
    pub fn summary(&self) -> MetricsSummary {
        let entries = self.snapshot();
        let total_requests = entries.len();
        let total_tokens = entries
            .iter()
            .map(|m| m.input_tokens.unwrap_or(0) + m.output_tokens.unwrap_or(0))
            .sum();
        let total_latency_ms: u64 = entries.iter().map(|m| m.latency_ms).sum();
        let avg_latency_ms = if total_requests == 0 {
            None
        } else {
            Some(total_latency_ms as f64 / total_requests as f64)
        };
        let error_count = entries.iter().filter(|m| m.error.is_some()).count();

        MetricsSummary {
            total_requests,
            total_tokens,
            total_latency_ms,
            avg_latency_ms,
            error_count,
        }
    }
}
