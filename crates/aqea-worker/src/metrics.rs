//! Prometheus metrics for worker observability (spec §7, §8).

use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct ErrorKindLabel(pub String);

impl prometheus_client::encoding::EncodeLabelSet for ErrorKindLabel {
    fn encode(
        &self,
        mut encoder: prometheus_client::encoding::LabelSetEncoder,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("kind", self.0.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct WorkerMetrics {
    pub entries_processed: Counter,
    pub batch_size_current: Gauge,
    pub current_rate: Gauge<f64, AtomicU64>,
    pub soft_errors: Family<ErrorKindLabel, Counter>,
    pub hard_errors: Counter,
    pub registry: Arc<Registry>,
}

impl WorkerMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let entries_processed = Counter::default();
        registry.register(
            "aqea_worker_entries_processed_total",
            "AQEA entries converted and flushed by this worker",
            entries_processed.clone(),
        );

        let batch_size_current = Gauge::default();
        registry.register(
            "aqea_worker_batch_size_current",
            "Current batch size after backpressure adjustment",
            batch_size_current.clone(),
        );

        let current_rate = Gauge::<f64, AtomicU64>::default();
        registry.register(
            "aqea_worker_entries_per_minute",
            "EWMA entry processing rate (alpha=0.3)",
            current_rate.clone(),
        );

        let soft_errors = Family::<ErrorKindLabel, Counter>::default();
        registry.register(
            "aqea_worker_soft_errors_total",
            "Skipped records by error kind (spec §7)",
            soft_errors.clone(),
        );

        let hard_errors = Counter::default();
        registry.register(
            "aqea_worker_hard_errors_total",
            "Fatal errors that terminated the worker process",
            hard_errors.clone(),
        );

        Self {
            entries_processed,
            batch_size_current,
            current_rate,
            soft_errors,
            hard_errors,
            registry: Arc::new(registry),
        }
    }

    /// Encode all metrics as Prometheus text format.
    pub fn encode(&self) -> String {
        let mut buf = String::new();
        encode(&mut buf, &self.registry).unwrap();
        buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_creates_all_metrics() {
        let metrics = WorkerMetrics::new();
        let output = metrics.encode();

        assert!(output.contains("aqea_worker_entries_processed_total"));
        assert!(output.contains("aqea_worker_batch_size_current"));
        assert!(output.contains("aqea_worker_entries_per_minute"));
        assert!(output.contains("aqea_worker_soft_errors_total"));
        assert!(output.contains("aqea_worker_hard_errors_total"));
    }

    #[test]
    fn encode_produces_valid_prometheus_text() {
        let metrics = WorkerMetrics::new();
        let output = metrics.encode();

        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
        assert!(output.contains("# TYPE aqea_worker_batch_size_current gauge"));
        assert!(output.contains("# TYPE aqea_worker_entries_processed_total counter"));
    }

    #[test]
    fn gauge_set_reflected_in_encode() {
        let metrics = WorkerMetrics::new();
        metrics.batch_size_current.set(50);

        let output = metrics.encode();
        assert!(
            output.contains("aqea_worker_batch_size_current 50"),
            "Expected gauge value 50 in output: {output}"
        );
    }

    #[test]
    fn counter_inc_reflected_in_encode() {
        let metrics = WorkerMetrics::new();
        metrics.entries_processed.inc_by(5);

        let output = metrics.encode();
        assert!(
            output.contains("aqea_worker_entries_processed_total_total 5"),
            "Expected counter value 5 in output: {output}"
        );
    }

    #[test]
    fn family_counter_with_labels() {
        let metrics = WorkerMetrics::new();
        metrics
            .soft_errors
            .get_or_create(&ErrorKindLabel("empty_lemma".to_string()))
            .inc();
        metrics
            .soft_errors
            .get_or_create(&ErrorKindLabel("upstream_4xx".to_string()))
            .inc();
        metrics
            .soft_errors
            .get_or_create(&ErrorKindLabel("upstream_4xx".to_string()))
            .inc();

        let output = metrics.encode();
        assert!(output.contains("kind=\"empty_lemma\""));
        assert!(output.contains("kind=\"upstream_4xx\""));
    }

    #[test]
    fn float_gauge_tracks_rate() {
        let metrics = WorkerMetrics::new();
        metrics.current_rate.set(42.5);

        let output = metrics.encode();
        assert!(
            output.contains("aqea_worker_entries_per_minute 42.5"),
            "Expected float gauge in output: {output}"
        );
    }
}
