//! OpenTelemetry OTLP metrics exporter: records the orchestrator's
//! snapshot fields as gauge instruments and exports them to any
//! OTLP-compatible collector. Adapted from the source codebase's
//! `metrics::otlp::OtlpExporter`.

use std::time::Duration;

use async_trait::async_trait;
use opentelemetry::metrics::{Gauge, MeterProvider};
use opentelemetry_otlp::WithExportConfig;
use opentelemetry_sdk::metrics::SdkMeterProvider;

use super::{MetricsExporter, MetricsSnapshot};
use crate::config::{OtlpConfig, OtlpProtocol};
use crate::types::TelemetryError;

struct Instruments {
    router_tasks_routed: Gauge<f64>,
    router_tasks_rejected: Gauge<f64>,
    router_preemptions_issued: Gauge<f64>,
    queue_entries_appended: Gauge<f64>,
    queue_entries_acked: Gauge<f64>,
    queue_entries_reclaimed: Gauge<f64>,
    queue_pending_depth: Gauge<f64>,
    pool_active_claims: Gauge<f64>,
    pool_heartbeat_timeouts: Gauge<f64>,
    saga_started: Gauge<f64>,
    saga_succeeded: Gauge<f64>,
    saga_compensated: Gauge<f64>,
    saga_failed: Gauge<f64>,
    sandbox_jobs_run: Gauge<f64>,
    sandbox_jobs_timed_out: Gauge<f64>,
    sandbox_policy_violations: Gauge<f64>,
}

pub struct OtlpExporter {
    provider: SdkMeterProvider,
    instruments: Instruments,
}

impl OtlpExporter {
    pub fn new(config: OtlpConfig, service_name: &str, export_interval: Duration) -> Result<Self, TelemetryError> {
        use opentelemetry::KeyValue;
        use opentelemetry_otlp::MetricExporter;
        use opentelemetry_sdk::metrics::PeriodicReader;
        use opentelemetry_sdk::Resource;

        let timeout = Duration::from_secs(config.timeout_seconds);

        let metric_exporter = match config.protocol {
            OtlpProtocol::Grpc => MetricExporter::builder()
                .with_tonic()
                .with_endpoint(&config.endpoint)
                .with_timeout(timeout)
                .build()
                .map_err(|e| TelemetryError::ExporterError(format!("building gRPC OTLP exporter: {e}")))?,
            OtlpProtocol::HttpBinary | OtlpProtocol::HttpJson => MetricExporter::builder()
                .with_http()
                .with_endpoint(&config.endpoint)
                .with_timeout(timeout)
                .build()
                .map_err(|e| TelemetryError::ExporterError(format!("building HTTP OTLP exporter: {e}")))?,
        };

        let reader = PeriodicReader::builder(metric_exporter)
            .with_interval(export_interval)
            .build();

        let resource = Resource::builder()
            .with_service_name(service_name.to_string())
            .with_attribute(KeyValue::new("service.namespace", "mcp-orchestrator"))
            .build();

        let provider = SdkMeterProvider::builder()
            .with_reader(reader)
            .with_resource(resource)
            .build();

        let meter = provider.meter("mcp_orchestrator");

        let instruments = Instruments {
            router_tasks_routed: meter.f64_gauge("router.tasks_routed").build(),
            router_tasks_rejected: meter.f64_gauge("router.tasks_rejected_backpressure").build(),
            router_preemptions_issued: meter.f64_gauge("router.preemptions_issued").build(),
            queue_entries_appended: meter.f64_gauge("queue.entries_appended").build(),
            queue_entries_acked: meter.f64_gauge("queue.entries_acked").build(),
            queue_entries_reclaimed: meter.f64_gauge("queue.entries_reclaimed").build(),
            queue_pending_depth: meter.f64_gauge("queue.pending_depth").build(),
            pool_active_claims: meter.f64_gauge("worker_pool.active_claims").build(),
            pool_heartbeat_timeouts: meter.f64_gauge("worker_pool.heartbeat_timeouts").build(),
            saga_started: meter.f64_gauge("saga.sagas_started").build(),
            saga_succeeded: meter.f64_gauge("saga.sagas_succeeded").build(),
            saga_compensated: meter.f64_gauge("saga.sagas_compensated").build(),
            saga_failed: meter.f64_gauge("saga.sagas_failed").build(),
            sandbox_jobs_run: meter.f64_gauge("sandbox.jobs_run").build(),
            sandbox_jobs_timed_out: meter.f64_gauge("sandbox.jobs_timed_out").build(),
            sandbox_policy_violations: meter.f64_gauge("sandbox.policy_violations").build(),
        };

        tracing::info!(endpoint = %config.endpoint, protocol = ?config.protocol, "OTLP metrics exporter initialized");

        Ok(Self { provider, instruments })
    }
}

#[async_trait]
impl MetricsExporter for OtlpExporter {
    async fn export(&self, snapshot: &MetricsSnapshot) -> Result<(), TelemetryError> {
        let i = &self.instruments;

        i.router_tasks_routed.record(snapshot.router.tasks_routed as f64, &[]);
        i.router_tasks_rejected
            .record(snapshot.router.tasks_rejected_backpressure as f64, &[]);
        i.router_preemptions_issued
            .record(snapshot.router.preemptions_issued as f64, &[]);

        i.queue_entries_appended.record(snapshot.queue.entries_appended as f64, &[]);
        i.queue_entries_acked.record(snapshot.queue.entries_acked as f64, &[]);
        i.queue_entries_reclaimed.record(snapshot.queue.entries_reclaimed as f64, &[]);
        i.queue_pending_depth.record(snapshot.queue.pending_depth as f64, &[]);

        i.pool_active_claims.record(snapshot.worker_pool.active_claims as f64, &[]);
        i.pool_heartbeat_timeouts
            .record(snapshot.worker_pool.heartbeat_timeouts as f64, &[]);

        i.saga_started.record(snapshot.saga.sagas_started as f64, &[]);
        i.saga_succeeded.record(snapshot.saga.sagas_succeeded as f64, &[]);
        i.saga_compensated.record(snapshot.saga.sagas_compensated as f64, &[]);
        i.saga_failed.record(snapshot.saga.sagas_failed as f64, &[]);

        i.sandbox_jobs_run.record(snapshot.sandbox.jobs_run as f64, &[]);
        i.sandbox_jobs_timed_out.record(snapshot.sandbox.jobs_timed_out as f64, &[]);
        i.sandbox_policy_violations
            .record(snapshot.sandbox.policy_violations as f64, &[]);

        tracing::trace!("recorded metrics snapshot to OTLP gauges");
        Ok(())
    }

    async fn shutdown(&self) -> Result<(), TelemetryError> {
        self.provider
            .shutdown()
            .map_err(|e| TelemetryError::ExporterError(format!("OTLP meter provider shutdown failed: {e}")))
    }
}
