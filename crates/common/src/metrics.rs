use std::sync::{Arc, OnceLock};

use prometheus::{
    CounterVec, Encoder, GaugeVec, HistogramOpts, HistogramVec, Opts, Registry, TextEncoder,
};

#[derive(Clone, Debug)]
pub struct MetricsRegistry {
    inner: Arc<MetricsInner>,
}

#[derive(Debug)]
struct MetricsInner {
    registry: Registry,
    fetch_partitions_read: CounterVec,
    fetch_bytes_read: CounterVec,
    fetch_wait_seconds: HistogramVec,
    open_batches: CounterVec,
    open_batch_failures: CounterVec,
    excluded_workers: GaugeVec,
}

impl MetricsRegistry {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(MetricsInner::new()),
        }
    }

    /// Aggregate merge recorded once per pipeline instance, on iterator exhaustion.
    pub fn record_fetch(&self, shuffle_key: &str, partitions: u64, wait_secs: f64) {
        let labels = [shuffle_key];
        self.inner
            .fetch_partitions_read
            .with_label_values(&labels)
            .inc_by(partitions as f64);
        self.inner
            .fetch_wait_seconds
            .with_label_values(&labels)
            .observe(wait_secs.max(0.0));
    }

    /// Byte total for one partition stream, recorded when the stream drains.
    pub fn add_fetch_bytes(&self, shuffle_key: &str, bytes: u64) {
        self.inner
            .fetch_bytes_read
            .with_label_values(&[shuffle_key])
            .inc_by(bytes as f64);
    }

    pub fn record_open_batches(&self, shuffle_key: &str, sent: u64, failed: u64) {
        let labels = [shuffle_key];
        self.inner
            .open_batches
            .with_label_values(&labels)
            .inc_by(sent as f64);
        self.inner
            .open_batch_failures
            .with_label_values(&labels)
            .inc_by(failed as f64);
    }

    pub fn set_excluded_workers(&self, count: u64) {
        self.inner
            .excluded_workers
            .with_label_values(&["fetch"])
            .set(count as f64);
    }

    pub fn render_prometheus(&self) -> String {
        let metric_families = self.inner.registry.gather();
        let mut out = Vec::new();
        let enc = TextEncoder::new();
        if enc.encode(&metric_families, &mut out).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&out).to_string()
    }
}

impl Default for MetricsRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl MetricsInner {
    fn new() -> Self {
        let registry = Registry::new();

        let fetch_partitions_read = counter_vec(
            &registry,
            "rsf_fetch_partitions_read_total",
            "Shuffle partitions delivered to consumers",
            &["shuffle_key"],
        );
        let fetch_bytes_read = counter_vec(
            &registry,
            "rsf_fetch_bytes_read_total",
            "Shuffle bytes read from remote workers",
            &["shuffle_key"],
        );
        let fetch_wait_seconds = histogram_vec(
            &registry,
            "rsf_fetch_wait_seconds",
            "Time consumers spent waiting for partition streams",
            &["shuffle_key"],
        );
        let open_batches = counter_vec(
            &registry,
            "rsf_open_batches_total",
            "Batched open-stream round trips sent",
            &["shuffle_key"],
        );
        let open_batch_failures = counter_vec(
            &registry,
            "rsf_open_batch_failures_total",
            "Batched open-stream round trips that failed whole",
            &["shuffle_key"],
        );
        let excluded_workers = gauge_vec(
            &registry,
            "rsf_excluded_workers",
            "Worker addresses currently excluded from location selection",
            &["scope"],
        );

        Self {
            registry,
            fetch_partitions_read,
            fetch_bytes_read,
            fetch_wait_seconds,
            open_batches,
            open_batch_failures,
            excluded_workers,
        }
    }
}

fn counter_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> CounterVec {
    let c = CounterVec::new(Opts::new(name, help), labels).expect("counter vec");
    registry
        .register(Box::new(c.clone()))
        .expect("register counter");
    c
}

fn gauge_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> GaugeVec {
    let g = GaugeVec::new(Opts::new(name, help), labels).expect("gauge vec");
    registry
        .register(Box::new(g.clone()))
        .expect("register gauge");
    g
}

fn histogram_vec(registry: &Registry, name: &str, help: &str, labels: &[&str]) -> HistogramVec {
    let h = HistogramVec::new(HistogramOpts::new(name, help), labels).expect("histogram vec");
    registry
        .register(Box::new(h.clone()))
        .expect("register histogram");
    h
}

static GLOBAL_METRICS: OnceLock<MetricsRegistry> = OnceLock::new();

pub fn global_metrics() -> &'static MetricsRegistry {
    GLOBAL_METRICS.get_or_init(MetricsRegistry::new)
}
