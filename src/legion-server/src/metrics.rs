//! Metrics collection and Prometheus export.
//!
//! Series are identified by name plus a rendered label set. Counters and
//! histograms are lock-free once a series exists; the maps themselves sit
//! behind tokio `RwLock`s.

use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::RwLock;

pub const HTTP_REQUESTS_TOTAL: &str = "http_requests_total";
pub const HTTP_REQUEST_DURATION: &str = "http_request_duration_seconds";
pub const HTTP_ERRORS_TOTAL: &str = "http_errors_total";
pub const LEGION_HEALTH: &str = "legion_health";
pub const LEGION_FAILURES_TOTAL: &str = "legion_failures_total";
pub const TOOL_INVOCATIONS_TOTAL: &str = "tool_invocations_total";

/// Latency buckets in seconds.
const DURATION_BUCKETS: &[f64] = &[0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0];

fn help(name: &str) -> &'static str {
    match name {
        HTTP_REQUESTS_TOTAL => "Total HTTP requests handled",
        HTTP_REQUEST_DURATION => "HTTP request latency",
        HTTP_ERRORS_TOTAL => "HTTP responses with a 4xx or 5xx status",
        LEGION_HEALTH => "1 when the legion listener is active, 0 otherwise",
        LEGION_FAILURES_TOTAL => "Operational failures recorded per legion",
        TOOL_INVOCATIONS_TOTAL => "Tool invocations by outcome",
        _ => "",
    }
}

/// A metric name plus its rendered labels, e.g. `{port="5001"}`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct SeriesKey {
    name: String,
    labels: String,
}

impl SeriesKey {
    fn new(name: &str, labels: &[(&str, &str)]) -> Self {
        Self {
            name: name.to_string(),
            labels: render_labels(labels),
        }
    }

    fn display(&self) -> String {
        format!("{}{}", self.name, self.labels)
    }
}

fn render_labels(labels: &[(&str, &str)]) -> String {
    if labels.is_empty() {
        return String::new();
    }
    let mut sorted = labels.to_vec();
    sorted.sort_by(|a, b| a.0.cmp(b.0));
    let body = sorted
        .iter()
        .map(|(k, v)| format!("{k}=\"{}\"", escape_label(v)))
        .collect::<Vec<_>>()
        .join(",");
    format!("{{{body}}}")
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// Add a label to an already rendered label set.
fn with_label(labels: &str, key: &str, value: &str) -> String {
    let extra = format!("{key}=\"{value}\"");
    match labels.strip_suffix('}') {
        Some(inner) => format!("{inner},{extra}}}"),
        None => format!("{{{extra}}}"),
    }
}

/// Metrics registry shared by every handler in a worker.
#[derive(Debug)]
pub struct Metrics {
    counters: RwLock<BTreeMap<SeriesKey, Counter>>,
    gauges: RwLock<BTreeMap<SeriesKey, Gauge>>,
    histograms: RwLock<BTreeMap<SeriesKey, Histogram>>,
    start_time: Instant,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            counters: RwLock::new(BTreeMap::new()),
            gauges: RwLock::new(BTreeMap::new()),
            histograms: RwLock::new(BTreeMap::new()),
            start_time: Instant::now(),
        }
    }

    // Counter operations

    pub async fn increment(&self, name: &str, labels: &[(&str, &str)]) {
        let key = SeriesKey::new(name, labels);
        if let Some(counter) = self.counters.read().await.get(&key) {
            counter.add(1);
            return;
        }
        self.counters.write().await.entry(key).or_default().add(1);
    }

    pub async fn counter_value(&self, name: &str, labels: &[(&str, &str)]) -> u64 {
        self.counters
            .read()
            .await
            .get(&SeriesKey::new(name, labels))
            .map(Counter::value)
            .unwrap_or(0)
    }

    // Gauge operations

    pub async fn gauge_set(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = SeriesKey::new(name, labels);
        self.gauges.write().await.entry(key).or_default().set(value);
    }

    pub async fn gauge_value(&self, name: &str, labels: &[(&str, &str)]) -> Option<f64> {
        self.gauges
            .read()
            .await
            .get(&SeriesKey::new(name, labels))
            .map(Gauge::value)
    }

    // Histogram operations

    pub async fn histogram_record(&self, name: &str, labels: &[(&str, &str)], value: f64) {
        let key = SeriesKey::new(name, labels);
        if let Some(histogram) = self.histograms.read().await.get(&key) {
            histogram.record(value);
            return;
        }
        self.histograms
            .write()
            .await
            .entry(key)
            .or_insert_with(|| Histogram::new(DURATION_BUCKETS))
            .record(value);
    }

    // Domain helpers

    /// Record one completed HTTP request.
    pub async fn record_request(&self, method: &str, path: &str, status: u16, duration: Duration) {
        let status = status.to_string();
        let labels = [("method", method), ("path", path), ("status", status.as_str())];
        self.increment(HTTP_REQUESTS_TOTAL, &labels).await;
        self.histogram_record(
            HTTP_REQUEST_DURATION,
            &[("method", method), ("path", path)],
            duration.as_secs_f64(),
        )
        .await;
        if status.starts_with('4') || status.starts_with('5') {
            self.increment(HTTP_ERRORS_TOTAL, &labels).await;
        }
    }

    pub async fn set_legion_health(&self, port: u16, active: bool) {
        let port = port.to_string();
        self.gauge_set(LEGION_HEALTH, &[("port", &port)], if active { 1.0 } else { 0.0 })
            .await;
    }

    pub async fn record_legion_failure(&self, port: u16) {
        let port = port.to_string();
        self.increment(LEGION_FAILURES_TOTAL, &[("port", &port)]).await;
    }

    pub async fn record_tool(&self, tool: &str, outcome: &str) {
        self.increment(TOOL_INVOCATIONS_TOTAL, &[("tool", tool), ("outcome", outcome)])
            .await;
    }

    // Export

    /// Point-in-time copy of every series.
    pub async fn snapshot(&self) -> MetricsSnapshot {
        let counters = self.counters.read().await;
        let gauges = self.gauges.read().await;
        let histograms = self.histograms.read().await;

        MetricsSnapshot {
            uptime_secs: self.start_time.elapsed().as_secs(),
            counters: counters.iter().map(|(k, v)| (k.display(), v.value())).collect(),
            gauges: gauges.iter().map(|(k, v)| (k.display(), v.value())).collect(),
            histograms: histograms
                .iter()
                .map(|(k, v)| (k.display(), v.summary()))
                .collect(),
        }
    }

    /// Render every series in the Prometheus text exposition format.
    pub async fn export_prometheus(&self) -> String {
        let counters = self.counters.read().await;
        let gauges = self.gauges.read().await;
        let histograms = self.histograms.read().await;
        let mut output = String::new();

        let mut last_name = "";
        for (key, counter) in counters.iter() {
            if key.name != last_name {
                write_header(&mut output, &key.name, "counter");
                last_name = &key.name;
            }
            let _ = writeln!(output, "{} {}", key.display(), counter.value());
        }

        last_name = "";
        for (key, gauge) in gauges.iter() {
            if key.name != last_name {
                write_header(&mut output, &key.name, "gauge");
                last_name = &key.name;
            }
            let _ = writeln!(output, "{} {}", key.display(), gauge.value());
        }

        last_name = "";
        for (key, histogram) in histograms.iter() {
            if key.name != last_name {
                write_header(&mut output, &key.name, "histogram");
                last_name = &key.name;
            }
            for (bound, count) in histogram.cumulative() {
                let labels = with_label(&key.labels, "le", &bound.to_string());
                let _ = writeln!(output, "{}_bucket{labels} {count}", key.name);
            }
            let inf = with_label(&key.labels, "le", "+Inf");
            let summary = histogram.summary();
            let _ = writeln!(output, "{}_bucket{inf} {}", key.name, summary.count);
            let _ = writeln!(output, "{}_sum{} {}", key.name, key.labels, summary.sum);
            let _ = writeln!(output, "{}_count{} {}", key.name, key.labels, summary.count);
        }

        output
    }
}

fn write_header(output: &mut String, name: &str, kind: &str) {
    let help = help(name);
    if !help.is_empty() {
        let _ = writeln!(output, "# HELP {name} {help}");
    }
    let _ = writeln!(output, "# TYPE {name} {kind}");
}

/// Serializable view used by diagnostics.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub uptime_secs: u64,
    pub counters: BTreeMap<String, u64>,
    pub gauges: BTreeMap<String, f64>,
    pub histograms: BTreeMap<String, HistogramSummary>,
}

/// A monotonically increasing counter.
#[derive(Debug, Default)]
pub struct Counter {
    value: AtomicU64,
}

impl Counter {
    pub fn add(&self, n: u64) {
        self.value.fetch_add(n, Ordering::Relaxed);
    }

    pub fn value(&self) -> u64 {
        self.value.load(Ordering::Relaxed)
    }
}

/// A gauge stored as the bit pattern of an `f64`.
#[derive(Debug, Default)]
pub struct Gauge {
    bits: AtomicU64,
}

impl Gauge {
    pub fn set(&self, value: f64) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }

    pub fn value(&self) -> f64 {
        f64::from_bits(self.bits.load(Ordering::Relaxed))
    }
}

/// A fixed-bucket histogram.
#[derive(Debug)]
pub struct Histogram {
    buckets: &'static [f64],
    counts: Vec<AtomicU64>,
    count: AtomicU64,
    /// Sum in microseconds so it can be accumulated atomically.
    sum_micros: AtomicU64,
}

impl Histogram {
    pub fn new(buckets: &'static [f64]) -> Self {
        Self {
            buckets,
            counts: buckets.iter().map(|_| AtomicU64::new(0)).collect(),
            count: AtomicU64::new(0),
            sum_micros: AtomicU64::new(0),
        }
    }

    pub fn record(&self, value: f64) {
        self.count.fetch_add(1, Ordering::Relaxed);
        self.sum_micros
            .fetch_add((value.max(0.0) * 1_000_000.0) as u64, Ordering::Relaxed);
        // Stored per bucket; cumulative() folds them into Prometheus `le` counts.
        if let Some(index) = self.buckets.iter().position(|bound| value <= *bound) {
            self.counts[index].fetch_add(1, Ordering::Relaxed);
        }
    }

    /// `(upper bound, observations <= bound)` pairs.
    pub fn cumulative(&self) -> Vec<(f64, u64)> {
        let mut running = 0;
        self.buckets
            .iter()
            .zip(&self.counts)
            .map(|(bound, count)| {
                running += count.load(Ordering::Relaxed);
                (*bound, running)
            })
            .collect()
    }

    pub fn summary(&self) -> HistogramSummary {
        let count = self.count.load(Ordering::Relaxed);
        let sum = self.sum_micros.load(Ordering::Relaxed) as f64 / 1_000_000.0;
        HistogramSummary {
            count,
            sum,
            mean: if count > 0 { sum / count as f64 } else { 0.0 },
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct HistogramSummary {
    pub count: u64,
    pub sum: f64,
    pub mean: f64,
}
