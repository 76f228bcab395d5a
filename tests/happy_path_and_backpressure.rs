//! S1 (happy path reasoning) and S6 (backpressure) from SPEC_FULL §8,
//! exercised as black-box tests over the in-memory queue: no external
//! Redis/Vault needed.

use std::sync::Arc;

use async_trait::async_trait;

use mcp_orchestrator::registry::MethodDescriptor;
use mcp_orchestrator::sandbox::SandboxError;
use mcp_orchestrator::saga::{InMemorySagaStore, StepExecutor};
use mcp_orchestrator::types::{
    Capability, CorrelationId, Priority, QueueEntry, ResultStatus, SandboxJob, SandboxOutcome,
    Task, TaskId, TaskResult, TenantId,
};
use mcp_orchestrator::{CapabilityHandler, Orchestrator, OrchestratorConfig};

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

struct UnusedSandbox;

#[async_trait]
impl mcp_orchestrator::sandbox::SandboxBackend for UnusedSandbox {
    async fn run(&self, _job: SandboxJob) -> Result<SandboxOutcome, SandboxError> {
        unreachable!("no test in this file submits a sandbox job")
    }
}

struct EchoHandler;

#[async_trait]
impl mcp_orchestrator::worker_pool::WorkerHandler for EchoHandler {
    async fn handle(&self, entry: &QueueEntry) -> TaskResult {
        TaskResult {
            task_id: entry.task_id,
            status: ResultStatus::Ok,
            payload: Some(entry.payload.clone()),
            error_code: None,
            error_message: None,
            completed_at: chrono::Utc::now(),
            trace_id: CorrelationId::new(),
        }
    }
}

async fn build_orchestrator() -> Arc<Orchestrator> {
    let config = OrchestratorConfig::default();
    let orchestrator = Orchestrator::new(
        config,
        Arc::new(NoopStepExecutor),
        Arc::new(InMemorySagaStore::default()),
        Arc::new(UnusedSandbox),
        vec![CapabilityHandler {
            capability: Capability::Reasoning,
            handler: Arc::new(EchoHandler),
            min: 1,
            max: 4,
        }],
    )
    .await
    .unwrap();

    orchestrator
        .registry
        .register(MethodDescriptor {
            method: "run_reasoning".to_string(),
            api_version: "v1".to_string(),
            params_schema: serde_json::json!({ "type": "object" }),
            default_priority: Priority::Critical,
            capability: Capability::Reasoning,
            saga_definition: None,
        })
        .await
        .unwrap();

    Arc::new(orchestrator)
}

fn task(method: &str, priority: Priority) -> Task {
    Task {
        task_id: TaskId::new(),
        method: method.to_string(),
        params: serde_json::json!({ "prompt": "P" }),
        priority_class: priority,
        submitted_at: chrono::Utc::now(),
        deadline: None,
        tenant_id: TenantId("tenant-a".to_string()),
        submitter_id: "user-1".to_string(),
        correlation_id: CorrelationId::new(),
        attempt: 1,
        idempotency_key: None,
    }
}

#[tokio::test]
async fn happy_path_reasoning_produces_exactly_one_result() {
    let orchestrator = build_orchestrator().await;

    orchestrator.submit_task(task("run_reasoning", Priority::Normal)).await.unwrap();

    let result = orchestrator
        .worker_pool
        .claim_and_process(&Capability::Reasoning, "reasoning:normal", "reasoning-workers", "worker-1", Priority::Normal)
        .await
        .unwrap()
        .expect("one entry should have been claimable");

    assert_eq!(result.status, ResultStatus::Ok);
    assert_eq!(result.payload, Some(serde_json::json!({ "prompt": "P" })));

    // A second claim attempt on the same stream finds nothing left to do.
    let second = orchestrator
        .worker_pool
        .claim_and_process(&Capability::Reasoning, "reasoning:normal", "reasoning-workers", "worker-1", Priority::Normal)
        .await
        .unwrap();
    assert!(second.is_none());
}

#[tokio::test]
async fn duplicate_idempotency_key_returns_first_task_id() {
    let orchestrator = build_orchestrator().await;

    let mut first = task("run_reasoning", Priority::Normal);
    first.idempotency_key = Some("retry-me".to_string());
    let first_id = first.task_id;

    let mut second = task("run_reasoning", Priority::Normal);
    second.idempotency_key = Some("retry-me".to_string());

    let returned_first = orchestrator.submit_task(first).await.unwrap();
    let returned_second = orchestrator.submit_task(second).await.unwrap();

    assert_eq!(returned_first, first_id);
    assert_eq!(returned_second, first_id);

    // Only one entry should have actually been routed to the queue.
    let result = orchestrator
        .worker_pool
        .claim_and_process(&Capability::Reasoning, "reasoning:normal", "reasoning-workers", "worker-1", Priority::Normal)
        .await
        .unwrap();
    assert!(result.is_some());
    let second_claim = orchestrator
        .worker_pool
        .claim_and_process(&Capability::Reasoning, "reasoning:normal", "reasoning-workers", "worker-1", Priority::Normal)
        .await
        .unwrap();
    assert!(second_claim.is_none());
}

#[tokio::test]
async fn expired_deadline_acks_without_invoking_handler() {
    let orchestrator = build_orchestrator().await;

    let mut expiring = task("run_reasoning", Priority::Normal);
    expiring.deadline = Some(chrono::Utc::now() - chrono::Duration::seconds(1));
    orchestrator.submit_task(expiring).await.unwrap();

    let result = orchestrator
        .worker_pool
        .claim_and_process(&Capability::Reasoning, "reasoning:normal", "reasoning-workers", "worker-1", Priority::Normal)
        .await
        .unwrap()
        .expect("an expired entry still yields a terminal result");

    assert_eq!(result.status, ResultStatus::DeadlineExpired);
    assert_eq!(result.error_code, Some(-32020));
}

#[tokio::test]
async fn low_priority_backpressure_rejects_while_critical_still_accepted() {
    use mcp_orchestrator::router::{PermissiveTenantPolicy, PriorityRouter};
    use mcp_orchestrator::queue::InMemoryQueue;
    use mcp_orchestrator::config::RouterConfig;
    use mcp_orchestrator::worker_pool::WorkerPoolManager;
    use mcp_orchestrator::config::WorkerPoolConfig;

    let queue: Arc<dyn mcp_orchestrator::queue::DurableQueue> = Arc::new(InMemoryQueue::new());
    let worker_pool = Arc::new(WorkerPoolManager::new(queue.clone(), WorkerPoolConfig::default()));
    worker_pool.register_capability(Capability::Codegen, Arc::new(EchoHandler), 1, 4);

    let mut router_config = RouterConfig::default();
    router_config.reject_threshold = 10;
    let router = PriorityRouter::new(queue, worker_pool, Arc::new(PermissiveTenantPolicy), router_config);

    let low_task = task("run_codegen", Priority::Low);
    let result = router.route(&low_task, Capability::Codegen, 10).await;
    assert!(matches!(result, Err(mcp_orchestrator::types::RouterError::Backpressure { .. })));

    let critical_task = task("run_codegen", Priority::Critical);
    let result = router.route(&critical_task, Capability::Codegen, 10).await;
    assert!(result.is_ok());
}
