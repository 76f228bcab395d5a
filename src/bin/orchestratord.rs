//! `orchestratord`: the orchestrator's server binary. Loads configuration,
//! wires a minimal example method catalog, and serves JSON-RPC until
//! interrupted.
//!
//! Embedders implementing real capability handlers and saga step bodies
//! should link `mcp_orchestrator` as a library and call
//! [`mcp_orchestrator::Orchestrator::new`] directly rather than run this
//! binary as-is; it exists to exercise the full wiring path end to end.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use clap::Parser;
use tracing::{info, Level};
use tracing_subscriber::EnvFilter;

use mcp_orchestrator::config::{LogFormat, OrchestratorConfig};
use mcp_orchestrator::registry::MethodDescriptor;
use mcp_orchestrator::saga::{InMemorySagaStore, StepExecutor};
use mcp_orchestrator::sandbox::NativeSandboxBackend;
use mcp_orchestrator::types::{Capability, Priority, QueueEntry, ResultStatus, TaskId, TaskResult};
use mcp_orchestrator::worker_pool::WorkerHandler;
use mcp_orchestrator::{CapabilityHandler, Orchestrator};

#[derive(Parser)]
#[command(name = "orchestratord")]
#[command(about = "MCP Orchestrator server")]
struct Cli {
    /// Configuration file path (TOML). Falls back to built-in defaults plus
    /// `ORCHESTRATOR_*` environment overrides when absent.
    #[arg(short, long)]
    config: Option<PathBuf>,
}

/// Echoes `params` back as the task result. Registered against the
/// `reasoning` capability so the server has at least one runnable method
/// out of the box.
struct EchoHandler;

#[async_trait]
impl WorkerHandler for EchoHandler {
    async fn handle(&self, entry: &QueueEntry) -> TaskResult {
        TaskResult {
            task_id: entry.task_id,
            status: ResultStatus::Ok,
            payload: Some(entry.payload.clone()),
            error_code: None,
            error_message: None,
            completed_at: chrono::Utc::now(),
            trace_id: mcp_orchestrator::types::CorrelationId::new(),
        }
    }
}

/// No-op saga step executor: every step succeeds immediately. Real
/// deployments supply an executor that dispatches `action_key` to whatever
/// worker-side registry performs the actual work.
struct NoopStepExecutor;

#[async_trait]
impl StepExecutor for NoopStepExecutor {
    async fn execute(
        &self,
        _key: &str,
        _saga_id: TaskId,
        _step_name: &str,
        _attempt: u32,
        params: &serde_json::Value,
    ) -> Result<serde_json::Value, String> {
        Ok(params.clone())
    }
}

fn init_tracing(config: &mcp_orchestrator::config::LoggingConfig) {
    let level = config.level.parse::<Level>().unwrap_or(Level::INFO);
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level.to_string()));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter);
    match config.format {
        LogFormat::Json => subscriber.json().init(),
        LogFormat::Pretty => subscriber.init(),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = OrchestratorConfig::load(cli.config.as_deref()).context("loading configuration")?;
    init_tracing(&config.logging);

    let registry_seed = MethodDescriptor {
        method: "example.echo".to_string(),
        api_version: "v1".to_string(),
        params_schema: serde_json::json!({ "type": "object" }),
        default_priority: Priority::Normal,
        capability: Capability::Reasoning,
        saga_definition: None,
    };

    let sandbox = Arc::new(NativeSandboxBackend::new(config.sandbox.clone()));
    let orchestrator = Orchestrator::new(
        config.clone(),
        Arc::new(NoopStepExecutor),
        Arc::new(InMemorySagaStore::default()),
        sandbox,
        vec![CapabilityHandler {
            capability: Capability::Reasoning,
            handler: Arc::new(EchoHandler),
            min: 1,
            max: 4,
        }],
    )
    .await
    .context("constructing orchestrator")?;

    orchestrator
        .registry
        .register(registry_seed)
        .await
        .context("registering example.echo method")?;

    let orchestrator = Arc::new(orchestrator);
    orchestrator.spawn_background_tasks();

    #[cfg(feature = "http-api")]
    {
        let handle = mcp_orchestrator::transport::serve(orchestrator.clone(), &config.transport)
            .await
            .context("starting HTTP transport")?;
        info!(addr = %handle.local_addr, "orchestratord ready");
    }

    tokio::signal::ctrl_c().await.context("waiting for shutdown signal")?;
    info!("received shutdown signal");
    orchestrator.shutdown().await.context("shutting down orchestrator")?;

    Ok(())
}
