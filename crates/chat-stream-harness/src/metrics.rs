use dashmap::DashMap;
use tracing::info;

use crate::generator::{GenerationMetrics, TokenStopReason};
use crate::model::{ModelPricing, VendorId};

/// Metrics of one finished run, recorded together with the model pricing.
#[derive(Clone, Debug, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MetricsRecord {
    pub run_id: uuid::Uuid,
    pub vendor_id: VendorId,
    pub model_id: String,
    /// Streaming context name the run belonged to.
    pub context_name: String,
    pub metrics: Option<GenerationMetrics>,
    pub pricing: Option<ModelPricing>,
    pub stop_reason: Option<TokenStopReason>,
}

/// Destination for per-run metrics.
///
/// Shared by every run of a harness; implementations must accept concurrent
/// appends.
pub trait MetricsSink: Send + Sync {
    fn record(&self, record: MetricsRecord);
}

/// Keeps one record per run in memory.
#[derive(Debug, Default)]
pub struct InMemoryMetricsSink {
    records: DashMap<uuid::Uuid, MetricsRecord>,
}

impl InMemoryMetricsSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the record of `run_id`, if it finished.
    pub fn get(&self, run_id: &uuid::Uuid) -> Option<MetricsRecord> {
        self.records.get(run_id).map(|entry| entry.value().clone())
    }

    /// Number of recorded runs.
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Snapshot of every recorded run, in no particular order.
    pub fn records(&self) -> Vec<MetricsRecord> {
        self.records
            .iter()
            .map(|entry| entry.value().clone())
            .collect()
    }
}

impl MetricsSink for InMemoryMetricsSink {
    fn record(&self, record: MetricsRecord) {
        self.records.insert(record.run_id, record);
    }
}

/// Emits each record as a structured `tracing` event.
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingMetricsSink;

impl MetricsSink for TracingMetricsSink {
    fn record(&self, record: MetricsRecord) {
        let metrics = record.metrics.unwrap_or_default();
        info!(
            run_id = %record.run_id,
            vendor = %record.vendor_id,
            model = %record.model_id,
            context = %record.context_name,
            tokens_in = metrics.tokens_in,
            tokens_out = metrics.tokens_out,
            dt_all_ms = metrics.dt_all_ms,
            v_tout_inner = metrics.v_tout_inner,
            stop_reason = ?record.stop_reason,
            priced = record.pricing.is_some(),
            "generation metrics"
        );
    }
}
