//! In-process metrics for validation and certification
//!
//! Counters, gauges and histograms keyed by dotted names, exportable as
//! JSON or Prometheus text.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::RwLock;

/// Global metrics registry
pub struct MetricsRegistry {
    /// Counter metrics
    counters: RwLock<HashMap<String, Arc<AtomicU64>>>,

    /// Gauge metrics (current values)
    gauges: RwLock<HashMap<String, Arc<AtomicU64>>>,

    /// Histogram metrics (bucketed)
    histograms: RwLock<HashMap<String, Arc<Histogram>>>,

    /// Service start time
    start_time: Instant,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(HashMap::new()),
            gauges: RwLock::new(HashMap::new()),
            histograms: RwLock::new(HashMap::new()),
            start_time: Instant::now(),
        }
    }

    /// Increment a counter
    pub async fn inc_counter(&self, name: &str) {
        self.add_counter(name, 1).await;
    }

    /// Add to a counter
    async fn add_counter(&self, name: &str, value: u64) {
        let counters = self.counters.read().await;
        if let Some(counter) = counters.get(name) {
            counter.fetch_add(value, Ordering::Relaxed);
            return;
        }
        drop(counters);

        // Create new counter
        let mut counters = self.counters.write().await;
        let counter = counters
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(AtomicU64::new(0)));
        counter.fetch_add(value, Ordering::Relaxed);
    }

    /// Set a gauge value
    pub async fn set_gauge(&self, name: &str, value: u64) {
        let gauges = self.gauges.read().await;
        if let Some(gauge) = gauges.get(name) {
            gauge.store(value, Ordering::Relaxed);
            return;
        }
        drop(gauges);

        // Create new gauge
        let mut gauges = self.gauges.write().await;
        gauges.insert(name.to_string(), Arc::new(AtomicU64::new(value)));
    }

    /// Get a counter value
    pub async fn get_counter(&self, name: &str) -> u64 {
        let counters = self.counters.read().await;
        counters
            .get(name)
            .map(|c| c.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Get a gauge value
    pub async fn get_gauge(&self, name: &str) -> u64 {
        let gauges = self.gauges.read().await;
        gauges
            .get(name)
            .map(|g| g.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Record a histogram observation
    pub async fn observe_histogram(&self, name: &str, value: f64) {
        let histograms = self.histograms.read().await;
        if let Some(histogram) = histograms.get(name) {
            histogram.observe(value).await;
            return;
        }
        drop(histograms);

        // Create new histogram with default buckets
        let mut histograms = self.histograms.write().await;
        let histogram = histograms
            .entry(name.to_string())
            .or_insert_with(|| Arc::new(Histogram::default()));
        histogram.observe(value).await;
    }

    /// Get uptime in seconds
    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Get all metrics as JSON
    pub async fn to_json(&self) -> serde_json::Value {
        let counters = self.counters.read().await;
        let gauges = self.gauges.read().await;
        let histograms = self.histograms.read().await;

        let counter_values: HashMap<String, u64> = counters
            .iter()
            .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
            .collect();

        let gauge_values: HashMap<String, u64> = gauges
            .iter()
            .map(|(k, v)| (k.clone(), v.load(Ordering::Relaxed)))
            .collect();

        let mut histogram_values: HashMap<String, serde_json::Value> = HashMap::new();
        for (name, histogram) in histograms.iter() {
            histogram_values.insert(name.clone(), histogram.to_json().await);
        }

        serde_json::json!({
            "uptime_seconds": self.uptime_seconds(),
            "counters": counter_values,
            "gauges": gauge_values,
            "histograms": histogram_values,
        })
    }

    /// Export metrics in Prometheus format
    pub async fn to_prometheus(&self) -> String {
        let counters = self.counters.read().await;
        let gauges = self.gauges.read().await;
        let histograms = self.histograms.read().await;

        let mut output = String::new();

        // Uptime
        output.push_str("# HELP agritrace_uptime_seconds Time since service start\n");
        output.push_str("# TYPE agritrace_uptime_seconds gauge\n");
        output.push_str(&format!(
            "agritrace_uptime_seconds {}\n\n",
            self.uptime_seconds()
        ));

        // Sorted for stable scrapes
        let mut counters: Vec<_> = counters.iter().collect();
        counters.sort_by(|a, b| a.0.cmp(b.0));
        let mut gauges: Vec<_> = gauges.iter().collect();
        gauges.sort_by(|a, b| a.0.cmp(b.0));
        let mut histograms: Vec<_> = histograms.iter().collect();
        histograms.sort_by(|a, b| a.0.cmp(b.0));

        for (name, counter) in counters {
            let prometheus_name = name.replace(['.', '-'], "_");
            output.push_str(&format!("# TYPE {} counter\n", prometheus_name));
            output.push_str(&format!(
                "{} {}\n",
                prometheus_name,
                counter.load(Ordering::Relaxed)
            ));
        }

        for (name, gauge) in gauges {
            let prometheus_name = name.replace(['.', '-'], "_");
            output.push_str(&format!("# TYPE {} gauge\n", prometheus_name));
            output.push_str(&format!(
                "{} {}\n",
                prometheus_name,
                gauge.load(Ordering::Relaxed)
            ));
        }

        for (name, histogram) in histograms {
            output.push_str(&histogram.to_prometheus(name).await);
        }

        output
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Simple histogram implementation
pub struct Histogram {
    /// Bucket boundaries
    buckets: Vec<f64>,

    /// Count per bucket
    counts: RwLock<Vec<AtomicU64>>,

    /// Sum of all observations
    sum: AtomicU64,

    /// Total count of observations
    count: AtomicU64,
}

impl Histogram {
    pub fn new(buckets: Vec<f64>) -> Self {
        let counts = buckets.iter().map(|_| AtomicU64::new(0)).collect();
        Self {
            buckets,
            counts: RwLock::new(counts),
            sum: AtomicU64::new(0),
            count: AtomicU64::new(0),
        }
    }

    /// Record an observation
    pub async fn observe(&self, value: f64) {
        // Add to sum (store as bits)
        let bits = (value * 1000.0) as u64; // Store with millisecond precision
        self.sum.fetch_add(bits, Ordering::Relaxed);
        self.count.fetch_add(1, Ordering::Relaxed);

        // Increment appropriate bucket
        let counts = self.counts.read().await;
        for (i, bucket) in self.buckets.iter().enumerate() {
            if value <= *bucket {
                counts[i].fetch_add(1, Ordering::Relaxed);
                break;
            }
        }
    }

    /// Get histogram as JSON
    pub async fn to_json(&self) -> serde_json::Value {
        let counts = self.counts.read().await;
        let bucket_counts: Vec<u64> = counts.iter().map(|c| c.load(Ordering::Relaxed)).collect();

        serde_json::json!({
            "buckets": self.buckets,
            "counts": bucket_counts,
            "sum": self.sum.load(Ordering::Relaxed) as f64 / 1000.0,
            "count": self.count.load(Ordering::Relaxed),
        })
    }

    /// Export as Prometheus format
    pub async fn to_prometheus(&self, name: &str) -> String {
        let prometheus_name = name.replace(['.', '-'], "_");
        let mut output = String::new();

        output.push_str(&format!("# TYPE {} histogram\n", prometheus_name));

        let counts = self.counts.read().await;
        let mut cumulative = 0u64;

        for (i, bucket) in self.buckets.iter().enumerate() {
            cumulative += counts[i].load(Ordering::Relaxed);
            output.push_str(&format!(
                "{}_bucket{{le=\"{}\"}} {}\n",
                prometheus_name, bucket, cumulative
            ));
        }

        output.push_str(&format!(
            "{}_bucket{{le=\"+Inf\"}} {}\n",
            prometheus_name,
            self.count.load(Ordering::Relaxed)
        ));
        output.push_str(&format!(
            "{}_sum {}\n",
            prometheus_name,
            self.sum.load(Ordering::Relaxed) as f64 / 1000.0
        ));
        output.push_str(&format!(
            "{}_count {}\n",
            prometheus_name,
            self.count.load(Ordering::Relaxed)
        ));

        output
    }
}

impl Default for Histogram {
    fn default() -> Self {
        // Seconds; classifier calls run from tens of milliseconds to the timeout
        Self::new(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.0, 5.0, 10.0, 30.0])
    }
}

/// Metric names
pub mod metric_names {
    // Policy outcomes
    pub const VALIDATION_AUTO_APPROVE: &str = "validation.auto_approve";
    pub const VALIDATION_AUTO_REJECT: &str = "validation.auto_reject";
    pub const VALIDATION_FLAG_FOR_HUMAN: &str = "validation.flag_for_human";

    // Human review
    pub const REVIEW_APPROVED: &str = "review.approved";
    pub const REVIEW_REJECTED: &str = "review.rejected";
    pub const REVIEW_QUEUE_DEPTH: &str = "review.queue_depth";

    // Oracle
    pub const ORACLE_FALLBACK_NEUTRAL: &str = "oracle.fallback_neutral";
    pub const ORACLE_LATENCY: &str = "oracle.latency_seconds";

    // Ledger
    pub const LEDGER_IMAGES_RECORDED: &str = "ledger.images_recorded";
    pub const LEDGER_DUPLICATES: &str = "ledger.duplicates";
    pub const LEDGER_FAILURES: &str = "ledger.failures";

    // Certificates
    pub const CERTIFICATES_ISSUED: &str = "certificates.issued";
    pub const CERTIFICATES_PENDING: &str = "certificates.pending";

    pub const SUBMISSION_LATENCY: &str = "submission.latency_seconds";
}
