//! Prometheus metrics for master observability (spec §7, §8).

use std::sync::Arc;

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::counter::Counter;
use prometheus_client::metrics::family::Family;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
pub struct WorkUnitStatusLabel(pub String);

impl prometheus_client::encoding::EncodeLabelSet for WorkUnitStatusLabel {
    fn encode(
        &self,
        mut encoder: prometheus_client::encoding::LabelSetEncoder,
    ) -> Result<(), std::fmt::Error> {
        use prometheus_client::encoding::EncodeLabel;
        ("status", self.0.as_str()).encode(encoder.encode_label())?;
        Ok(())
    }
}

#[derive(Clone)]
pub struct MasterMetrics {
    pub work_units_by_status: Family<WorkUnitStatusLabel, Gauge>,
    pub workers_online: Gauge,
    pub entries_processed: Counter,
    pub soft_errors: Counter,
    pub hard_errors: Counter,
    pub reassignments: Counter,
    pub registry: Arc<Registry>,
}

impl MasterMetrics {
    pub fn new() -> Self {
        let mut registry = Registry::default();

        let work_units_by_status = Family::<WorkUnitStatusLabel, Gauge>::default();
        registry.register(
            "aqea_master_work_units",
            "Work units by lifecycle status",
            work_units_by_status.clone(),
        );

        let workers_online = Gauge::default();
        registry.register(
            "aqea_master_workers_online",
            "Workers whose last heartbeat is within the liveness timeout",
            workers_online.clone(),
        );

        let entries_processed = Counter::default();
        registry.register(
            "aqea_master_entries_processed_total",
            "Entries processed across all completed progress reports",
            entries_processed.clone(),
        );

        let soft_errors = Counter::default();
        registry.register(
            "aqea_master_soft_errors_total",
            "Soft errors reported by workers (spec §7)",
            soft_errors.clone(),
        );

        let hard_errors = Counter::default();
        registry.register(
            "aqea_master_hard_errors_total",
            "Unrecoverable master-side errors",
            hard_errors.clone(),
        );

        let reassignments = Counter::default();
        registry.register(
            "aqea_master_reassignments_total",
            "Work units returned to pending by the liveness sweep",
            reassignments.clone(),
        );

        Self {
            work_units_by_status,
            workers_online,
            entries_processed,
            soft_errors,
            hard_errors,
            reassignments,
            registry: Arc::new(registry),
        }
    }

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
        let metrics = MasterMetrics::new();
        let output = metrics.encode();

        assert!(output.contains("aqea_master_work_units"));
        assert!(output.contains("aqea_master_workers_online"));
        assert!(output.contains("aqea_master_entries_processed_total"));
        assert!(output.contains("aqea_master_soft_errors_total"));
        assert!(output.contains("aqea_master_hard_errors_total"));
        assert!(output.contains("aqea_master_reassignments_total"));
    }

    #[test]
    fn work_units_by_status_labels() {
        let metrics = MasterMetrics::new();
        metrics
            .work_units_by_status
            .get_or_create(&WorkUnitStatusLabel("pending".to_string()))
            .set(4);
        metrics
            .work_units_by_status
            .get_or_create(&WorkUnitStatusLabel("completed".to_string()))
            .set(2);

        let output = metrics.encode();
        assert!(output.contains("status=\"pending\""));
        assert!(output.contains("status=\"completed\""));
    }
}
