//! Layered error types and the JSON-RPC error-code mapping (§7).

use thiserror::Error;

use super::TaskId;

/// Top-level error type threaded through every component.
#[derive(Error, Debug, Clone)]
pub enum OrchestratorError {
    #[error("registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("router error: {0}")]
    Router(#[from] RouterError),

    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    #[error("worker pool error: {0}")]
    WorkerPool(#[from] WorkerPoolError),

    #[error("saga error: {0}")]
    Saga(#[from] SagaError),

    #[error("sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("autoscaler error: {0}")]
    Autoscaler(#[from] AutoscalerError),

    #[error("recovery error: {0}")]
    Recovery(#[from] RecoveryError),

    #[error("telemetry error: {0}")]
    Telemetry(#[from] TelemetryError),

    #[error("configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("quota exceeded for tenant: {0}")]
    QuotaExceeded(String),

    #[error("task not found: {0}")]
    NotFound(TaskId),

    #[error("internal error: {0}")]
    Internal(String),
}

#[derive(Error, Debug, Clone)]
pub enum RegistryError {
    #[error("unknown method: {method} (api_version {api_version})")]
    UnknownMethod { method: String, api_version: String },

    #[error("schema compilation failed for {method}: {reason}")]
    SchemaCompilation { method: String, reason: String },

    #[error("parameter validation failed: {pointer}: {reason}")]
    ValidationFailed { pointer: String, reason: String },
}

#[derive(Error, Debug, Clone)]
pub enum RouterError {
    #[error("backpressure: queue depth for {capability}/{priority} exceeds reject_threshold")]
    Backpressure { capability: String, priority: String },

    #[error("capacity unavailable: pool {capability} is paused or saturated")]
    CapacityUnavailable { capability: String },

    #[error("preempt budget exhausted for task {task_id} (max_preempts reached)")]
    PreemptBudgetExhausted { task_id: TaskId },
}

#[derive(Error, Debug, Clone)]
pub enum QueueError {
    #[error("append failed after retries: {reason}")]
    AppendFailed { reason: String },

    #[error("claim not found: {entry_id}")]
    ClaimNotFound { entry_id: u64 },

    #[error("ack rejected: entry {entry_id} already acked or reclaimed")]
    AckRejected { entry_id: u64 },

    #[error("consumer group error: {0}")]
    ConsumerGroup(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
}

#[derive(Error, Debug, Clone)]
pub enum WorkerPoolError {
    #[error("no workers registered for capability: {0}")]
    NoWorkersForCapability(String),

    #[error("heartbeat timeout for consumer {consumer_id} on entry {entry_id}")]
    HeartbeatTimeout { consumer_id: String, entry_id: u64 },

    #[error("worker failed after {attempts} attempts: {reason}")]
    WorkerFailed { attempts: u32, reason: String },
}

#[derive(Error, Debug, Clone)]
pub enum SagaError {
    #[error("unknown saga definition: {0}")]
    UnknownDefinition(String),

    #[error("step {step} failed: {reason}")]
    StepFailed { step: String, reason: String },

    #[error("compensation failed and is unrecoverable for saga {saga_id}: {reason}")]
    CompensationFailed { saga_id: TaskId, reason: String },

    #[error("idempotency conflict for key {key}: already applied")]
    IdempotencyConflict { key: String },

    #[error("invalid saga definition: {0}")]
    InvalidDefinition(String),
}

#[derive(Error, Debug, Clone)]
pub enum SandboxError {
    #[error("policy violation: {0}")]
    PolicyViolation(String),

    #[error("execution timed out after {wallclock_seconds}s")]
    Timeout { wallclock_seconds: u64 },

    #[error("resource exhausted: {0}")]
    ResourceExhausted(String),

    #[error("launch failed: {0}")]
    LaunchFailed(String),

    #[error("backend unavailable: {0}")]
    BackendUnavailable(String),
}

#[derive(Error, Debug, Clone)]
pub enum AutoscalerError {
    #[error("bounds violated: min {min} > max {max}")]
    InvalidBounds { min: u32, max: u32 },

    #[error("cooldown active, {remaining_secs}s remaining")]
    CooldownActive { remaining_secs: u64 },
}

#[derive(Error, Debug, Clone)]
pub enum RecoveryError {
    #[error("dlq promotion failed for entry {entry_id}: {reason}")]
    DlqPromotionFailed { entry_id: u64, reason: String },

    #[error("saga resumption failed for {saga_id}: {reason}")]
    ResumptionFailed { saga_id: TaskId, reason: String },
}

#[derive(Error, Debug, Clone)]
pub enum TelemetryError {
    #[error("audit chain verification failed at record {0}")]
    ChainBroken(String),

    #[error("exporter error: {0}")]
    ExporterError(String),
}

#[derive(Error, Debug, Clone)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required field: {0}")]
    MissingField(String),

    #[error("failed to parse configuration: {0}")]
    ParseError(String),
}

/// A standard-taxonomy JSON-RPC error code and canonical name (§7).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RpcErrorCode {
    pub code: i64,
    pub name: &'static str,
}

impl OrchestratorError {
    /// Maps a component error onto the wire error-code taxonomy defined in §7.
    ///
    /// `InvalidRequest`/`MethodNotFound`/`InvalidParams` are produced directly by
    /// the transport layer during envelope parsing and registry validation, not
    /// through this conversion — those never construct an `OrchestratorError`.
    pub fn rpc_code(&self) -> RpcErrorCode {
        match self {
            OrchestratorError::Unauthorized(_) => RpcErrorCode { code: -32001, name: "unauthorized" },
            OrchestratorError::QuotaExceeded(_) => RpcErrorCode { code: -32002, name: "quota_exceeded" },
            OrchestratorError::Queue(QueueError::AppendFailed { .. })
            | OrchestratorError::Queue(QueueError::BackendUnavailable(_)) => {
                RpcErrorCode { code: -32003, name: "queue_unavailable" }
            }
            OrchestratorError::Router(RouterError::CapacityUnavailable { .. }) => {
                RpcErrorCode { code: -32004, name: "capacity_unavailable" }
            }
            OrchestratorError::Router(RouterError::Backpressure { .. }) => {
                RpcErrorCode { code: -32010, name: "backpressure" }
            }
            OrchestratorError::Recovery(_) => RpcErrorCode { code: -32020, name: "deadline_expired" },
            OrchestratorError::WorkerPool(WorkerPoolError::WorkerFailed { .. }) => {
                RpcErrorCode { code: -32030, name: "worker_failed" }
            }
            OrchestratorError::Saga(SagaError::CompensationFailed { .. }) => {
                RpcErrorCode { code: -32040, name: "saga_compensation_failed" }
            }
            OrchestratorError::Sandbox(SandboxError::PolicyViolation(_)) => {
                RpcErrorCode { code: -32050, name: "sandbox_policy_violation" }
            }
            OrchestratorError::Sandbox(SandboxError::Timeout { .. }) => {
                RpcErrorCode { code: -32051, name: "sandbox_timeout" }
            }
            OrchestratorError::Sandbox(SandboxError::ResourceExhausted(_)) => {
                RpcErrorCode { code: -32052, name: "sandbox_resource_exhausted" }
            }
            OrchestratorError::NotFound(_) => RpcErrorCode { code: -32060, name: "not_found" },
            _ => RpcErrorCode { code: -32603, name: "internal" },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unauthorized_maps_to_32001() {
        let err = OrchestratorError::Unauthorized("missing token".into());
        assert_eq!(err.rpc_code().code, -32001);
    }

    #[test]
    fn saga_compensation_failure_maps_to_32040() {
        let err = OrchestratorError::Saga(SagaError::CompensationFailed {
            saga_id: TaskId::new(),
            reason: "step rollback unsupported".into(),
        });
        assert_eq!(err.rpc_code().code, -32040);
    }

    #[test]
    fn unmapped_error_falls_back_to_internal() {
        let err = OrchestratorError::Internal("unexpected".into());
        assert_eq!(err.rpc_code().code, -32603);
        assert_eq!(err.rpc_code().name, "internal");
    }
}
