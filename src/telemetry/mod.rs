//! Telemetry (§10): point-in-time counters/gauges for the scheduler,
//! queue, saga engine, and sandbox manager, exported through a pluggable
//! [`MetricsExporter`] (file snapshot always available, OTLP additive
//! under the `metrics` feature), plus a tamper-evident audit log.
//! Adapted from the source codebase's `metrics::CompositeExporter` pattern.

pub mod audit;
pub mod file;

#[cfg(feature = "metrics")]
pub mod otlp;

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::config::TelemetryConfig;
use crate::types::TelemetryError;

/// Point-in-time snapshot of orchestrator-wide counters and gauges.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    pub timestamp: u64,
    pub router: RouterMetrics,
    pub queue: QueueMetrics,
    pub worker_pool: WorkerPoolMetrics,
    pub saga: SagaMetrics,
    pub sandbox: SandboxMetrics,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RouterMetrics {
    pub tasks_routed: u64,
    pub tasks_rejected_backpressure: u64,
    pub preemptions_issued: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QueueMetrics {
    pub entries_appended: u64,
    pub entries_acked: u64,
    pub entries_reclaimed: u64,
    pub pending_depth: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerPoolMetrics {
    pub active_claims: u64,
    pub heartbeat_timeouts: u64,
    pub current_pool_sizes: std::collections::HashMap<String, u32>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SagaMetrics {
    pub sagas_started: u64,
    pub sagas_succeeded: u64,
    pub sagas_compensated: u64,
    pub sagas_failed: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SandboxMetrics {
    pub jobs_run: u64,
    pub jobs_timed_out: u64,
    pub policy_violations: u64,
}

#[async_trait]
pub trait MetricsExporter: Send + Sync {
    async fn export(&self, snapshot: &MetricsSnapshot) -> Result<(), TelemetryError>;
    async fn shutdown(&self) -> Result<(), TelemetryError>;
}

/// Combines multiple exporters; a failure in one backend is logged but
/// does not block the others, mirroring the source codebase's composite
/// exporter semantics.
pub struct CompositeExporter {
    exporters: Vec<Arc<dyn MetricsExporter>>,
}

impl CompositeExporter {
    pub fn new(exporters: Vec<Arc<dyn MetricsExporter>>) -> Self {
        Self { exporters }
    }
}

#[async_trait]
impl MetricsExporter for CompositeExporter {
    async fn export(&self, snapshot: &MetricsSnapshot) -> Result<(), TelemetryError> {
        let mut last_error = None;
        for exporter in &self.exporters {
            if let Err(e) = exporter.export(snapshot).await {
                tracing::warn!("metrics exporter failed: {e}");
                last_error = Some(e);
            }
        }
        if self.exporters.len() == 1 {
            if let Some(e) = last_error {
                return Err(e);
            }
        }
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), TelemetryError> {
        for exporter in &self.exporters {
            let _ = exporter.shutdown().await;
        }
        Ok(())
    }
}

/// Builds the configured exporter set (file always, OTLP additive under
/// the `metrics` feature).
pub fn create_exporter(config: &TelemetryConfig) -> Result<Arc<dyn MetricsExporter>, TelemetryError> {
    let mut exporters: Vec<Arc<dyn MetricsExporter>> = Vec::new();

    if let Some(file_cfg) = &config.file {
        exporters.push(Arc::new(file::FileExporter::new(file_cfg.clone())?));
    }

    #[cfg(feature = "metrics")]
    if let Some(otlp_cfg) = &config.otlp {
        exporters.push(Arc::new(otlp::OtlpExporter::new(
            otlp_cfg.clone(),
            &config.service_name,
            config.export_interval,
        )?));
    }

    #[cfg(not(feature = "metrics"))]
    if config.otlp.is_some() {
        tracing::warn!("OTLP telemetry configured but the `metrics` feature is not enabled; ignoring");
    }

    if exporters.is_empty() {
        return Err(TelemetryError::ExporterError("no telemetry exporters configured".to_string()));
    }

    if exporters.len() == 1 {
        Ok(exporters.remove(0))
    } else {
        Ok(Arc::new(CompositeExporter::new(exporters)))
    }
}
