//! MCP Orchestrator core: JSON-RPC task dispatch with priority routing and
//! preemption, a durable Redis-Streams-style queue, a worker pool manager,
//! a saga engine with compensation, a sandbox manager, an autoscaler, a
//! recovery supervisor, and telemetry/audit.

pub mod autoscaler;
pub mod config;
pub mod crypto;
pub mod prelude;
pub mod queue;
pub mod recovery;
pub mod registry;
pub mod router;
pub mod saga;
pub mod sandbox;
pub mod secrets;
pub mod telemetry;
pub mod types;

#[cfg(feature = "http-api")]
pub mod transport;

pub mod worker_pool;

pub use config::OrchestratorConfig;
pub use types::*;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::RwLock;
use tracing::{info, warn};

use autoscaler::Autoscaler;
use queue::{DurableQueue, InMemoryQueue, RedisStreamQueue};
use recovery::{DlqSink, InMemoryDlq, RecoverySupervisor};
use registry::TaskRegistry;
use router::{PermissiveTenantPolicy, PriorityRouter, TenantPolicy};
use saga::{SagaEngine, SagaStore, StepExecutor};
use sandbox::SandboxBackend;
use telemetry::MetricsExporter;
use telemetry::audit::AuditLog;
use worker_pool::{WorkerHandler, WorkerPoolManager};

/// How long a completed `capability_dispatch_loop` iteration that found no
/// work should back off before polling the priority streams again.
const DISPATCH_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// Keyed deduplication store for `Task.idempotency_key` (§6.1, §8 property
/// 12): the first submission of a key reserves it against its own
/// `task_id`; later submissions of the same key within `retention` get that
/// `task_id` back instead of being routed again.
struct IdempotencyStore {
    entries: DashMap<String, (TaskId, DateTime<Utc>)>,
}

impl IdempotencyStore {
    fn new() -> Self {
        Self { entries: DashMap::new() }
    }

    /// Returns the previously reserved `task_id` for `key` if one is still
    /// within `retention`, otherwise reserves `key` for `task_id` and
    /// returns `None`.
    fn check_or_reserve(&self, key: &str, task_id: TaskId, retention: Duration) -> Option<TaskId> {
        use dashmap::mapref::entry::Entry;

        match self.entries.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let (existing_id, first_seen) = *occupied.get();
                let age = Utc::now() - first_seen;
                if age <= chrono::Duration::from_std(retention).unwrap_or_default() {
                    Some(existing_id)
                } else {
                    occupied.insert((task_id, Utc::now()));
                    None
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert((task_id, Utc::now()));
                None
            }
        }
    }

    /// Releases a reservation made by `check_or_reserve` so a submission
    /// that failed before completing can be retried under the same key.
    fn release(&self, key: &str) {
        self.entries.remove(key);
    }
}

/// Carries the idempotency key alongside a failed submission so the caller
/// can release the reservation `submit_task` made before delegating here.
struct SubmitError {
    error: OrchestratorError,
    idempotency_key: Option<String>,
}

/// A capability's worker pool, ready to be registered with the
/// [`WorkerPoolManager`] during [`Orchestrator::new`].
pub struct CapabilityHandler {
    pub capability: Capability,
    pub handler: Arc<dyn WorkerHandler>,
    pub min: u32,
    pub max: u32,
}

/// Composition root wiring every component named in the architecture (§4)
/// together. Capability-specific work (the actual reasoning/codegen/ml
/// call a [`WorkerHandler`] performs, and the saga step bodies a
/// [`StepExecutor`] performs) is supplied by the embedder — the
/// orchestrator core treats both as opaque external I/O.
#[derive(Clone)]
pub struct Orchestrator {
    config: Arc<RwLock<OrchestratorConfig>>,
    pub registry: Arc<TaskRegistry>,
    pub router: Arc<PriorityRouter>,
    pub queue: Arc<dyn DurableQueue>,
    pub worker_pool: Arc<WorkerPoolManager>,
    pub saga_engine: Arc<SagaEngine>,
    pub saga_store: Arc<dyn SagaStore>,
    pub sandbox: Arc<dyn SandboxBackend>,
    pub autoscaler: Arc<Autoscaler>,
    pub recovery: Arc<RecoverySupervisor>,
    pub metrics: Arc<dyn MetricsExporter>,
    pub audit: Arc<AuditLog>,
    idempotency: Arc<IdempotencyStore>,
}

impl Orchestrator {
    /// Builds every component from `config`, registering `handlers` with
    /// the worker pool and wiring `step_executor` into the saga engine.
    pub async fn new(
        config: OrchestratorConfig,
        step_executor: Arc<dyn StepExecutor>,
        saga_store: Arc<dyn SagaStore>,
        sandbox: Arc<dyn SandboxBackend>,
        handlers: Vec<CapabilityHandler>,
    ) -> Result<Self, OrchestratorError> {
        let queue: Arc<dyn DurableQueue> = match &config.queue.backend {
            config::QueueBackend::Memory => Arc::new(InMemoryQueue::new()),
            config::QueueBackend::Redis { url_secret_key } => {
                let secrets = config
                    .secrets
                    .as_ref()
                    .ok_or_else(|| ConfigError::MissingField("secrets".to_string()))?;
                let store = secrets::new_secret_store(secrets, "orchestrator")
                    .await
                    .map_err(|e| OrchestratorError::Internal(format!("secret store init: {e}")))?;
                let url = store
                    .get_secret(url_secret_key)
                    .await
                    .map_err(|e| OrchestratorError::Internal(format!("resolving {url_secret_key}: {e}")))?;
                Arc::new(
                    RedisStreamQueue::connect(url.value(), config.queue.stream_maxlen)
                        .await
                        .map_err(OrchestratorError::Queue)?,
                )
            }
        };

        let worker_pool = Arc::new(WorkerPoolManager::new(queue.clone(), config.worker_pool.clone()));
        for h in handlers {
            worker_pool.register_capability(h.capability, h.handler, h.min, h.max);
        }

        let tenant_policy: Arc<dyn TenantPolicy> = Arc::new(PermissiveTenantPolicy);
        let router = Arc::new(PriorityRouter::new(
            queue.clone(),
            worker_pool.clone(),
            tenant_policy,
            config.router.clone(),
        ));

        let registry = Arc::new(TaskRegistry::new());

        let saga_engine = Arc::new(SagaEngine::new(step_executor, saga_store.clone(), config.saga.clone()));

        let autoscaler = Arc::new(Autoscaler::new(worker_pool.clone(), config.autoscaler.clone()));

        let dlq: Arc<dyn DlqSink> = Arc::new(InMemoryDlq::default());
        let recovery = Arc::new(RecoverySupervisor::new(
            queue.clone(),
            dlq,
            saga_engine.clone(),
            config.recovery.clone(),
        ));

        let metrics = telemetry::create_exporter(&config.telemetry)?;
        let audit = Arc::new(AuditLog::new());
        let idempotency = Arc::new(IdempotencyStore::new());

        Ok(Self {
            config: Arc::new(RwLock::new(config)),
            registry,
            router,
            queue,
            worker_pool,
            saga_engine,
            saga_store,
            sandbox,
            autoscaler,
            recovery,
            metrics,
            audit,
            idempotency,
        })
    }

    pub async fn get_config(&self) -> OrchestratorConfig {
        self.config.read().await.clone()
    }

    /// Validates and routes a task (§4.2 → §4.3), auditing the submission
    /// and starting its saga if the method is registered with one. If
    /// `task.idempotency_key` matches a still-retained prior submission,
    /// returns that submission's `task_id` without re-validating, routing,
    /// or re-starting a saga (§6.1, §8 property 12).
    pub async fn submit_task(&self, task: Task) -> Result<TaskId, OrchestratorError> {
        let retention = self.get_config().await.saga.idempotency_retention;
        if let Some(key) = task.idempotency_key.as_deref() {
            if let Some(existing) = self.idempotency.check_or_reserve(key, task.task_id, retention) {
                return Ok(existing);
            }
        }

        match self.submit_task_inner(task).await {
            Ok(task_id) => Ok(task_id),
            Err(e) => {
                // Submission failed after a reservation was made: release it
                // so a retry under the same key isn't silently deduplicated
                // against a task that never actually got routed.
                if let Some(key) = e.idempotency_key.as_deref() {
                    self.idempotency.release(key);
                }
                Err(e.error)
            }
        }
    }

    async fn submit_task_inner(&self, task: Task) -> Result<TaskId, SubmitError> {
        let idempotency_key = task.idempotency_key.clone();
        let wrap = |key: &Option<String>, e: OrchestratorError| SubmitError {
            error: e,
            idempotency_key: key.clone(),
        };

        let validated = self
            .registry
            .validate(&task.method, None, &task.params)
            .await
            .map_err(|e| wrap(&idempotency_key, OrchestratorError::Registry(e)))?;

        let mut task = task;
        task.priority_class = task.priority_class.min(validated.default_priority);
        let task_id = task.task_id;

        let entry_id = self
            .router
            .route(&task, validated.capability, 0)
            .await
            .map_err(|e| wrap(&idempotency_key, OrchestratorError::Router(e)))?;

        self.audit.append(AuditEvent::new(
            task.submitter_id.clone(),
            task.task_id.to_string(),
            "task.submit",
            serde_json::json!({ "method": task.method, "entry_id": entry_id.0 }),
        ));

        if let Some(definition_id) = validated.saga_definition {
            self.saga_engine
                .start(task.task_id, definition_id)
                .await
                .map_err(|e| wrap(&idempotency_key, OrchestratorError::Saga(e)))?;
        }

        Ok(task_id)
    }

    /// Spawns the autoscaler sampling loop, the recovery scan loop, the
    /// periodic metrics export loop, and one per-capability dispatch loop
    /// per current worker slot as detached background tasks. Returns
    /// immediately; the tasks run for the lifetime of the process.
    pub fn spawn_background_tasks(self: &Arc<Self>) {
        let this = self.clone();
        tokio::spawn(async move { this.recovery_loop().await });

        let this = self.clone();
        tokio::spawn(async move { this.metrics_loop().await });

        for capability in self.worker_pool.registered_capabilities() {
            let slots = self.worker_pool.current_size(&capability).max(1);
            for slot in 0..slots {
                let this = self.clone();
                let capability = capability.clone();
                tokio::spawn(async move { this.capability_dispatch_loop(capability, slot).await });
            }
        }
    }

    /// Repeatedly consults the priority router's fairness dial to choose
    /// which of a capability's priority streams to claim from next (§4.3,
    /// §8 property 3), backing off briefly when nothing is claimable.
    async fn capability_dispatch_loop(&self, capability: Capability, slot: u32) {
        let group = format!("{capability}-workers");
        let consumer_id = format!("{capability}-worker-{slot}");
        let fairness_n = self.router.fairness_n();

        loop {
            match self
                .worker_pool
                .dispatch_capability(&capability, &group, &consumer_id, fairness_n)
                .await
            {
                Ok(Some(_)) => continue,
                Ok(None) => tokio::time::sleep(DISPATCH_POLL_INTERVAL).await,
                Err(e) => {
                    warn!(capability = %capability, consumer_id, "dispatch failed: {e}");
                    tokio::time::sleep(DISPATCH_POLL_INTERVAL).await;
                }
            }
        }
    }

    async fn recovery_loop(&self) {
        let config = self.get_config().await;
        let mut ticker = tokio::time::interval(config.recovery.scan_interval);
        loop {
            ticker.tick().await;
            let results = self.recovery.resume_interrupted_sagas(self.saga_store.as_ref()).await;
            for result in results {
                if let Err(e) = result {
                    warn!("saga resumption failed: {e}");
                }
            }
        }
    }

    async fn metrics_loop(&self) {
        let config = self.get_config().await;
        if !config.telemetry.enabled {
            return;
        }
        let mut ticker = tokio::time::interval(config.telemetry.export_interval);
        loop {
            ticker.tick().await;
            let snapshot = telemetry::MetricsSnapshot::default();
            if let Err(e) = self.metrics.export(&snapshot).await {
                warn!("metrics export failed: {e}");
            }
        }
    }

    /// Graceful shutdown: flushes the metrics exporter and verifies the
    /// audit chain hasn't been tampered with since startup.
    pub async fn shutdown(&self) -> Result<(), OrchestratorError> {
        info!("shutting down orchestrator");
        self.audit.verify().map_err(OrchestratorError::Telemetry)?;
        self.metrics.shutdown().await.map_err(OrchestratorError::Telemetry)?;
        Ok(())
    }
}
