//! Data model records (§3): `Task`, `QueueEntry`, `Claim`, `Saga`, `SandboxJob`,
//! `TaskResult`, `AuditEvent`, and their lifecycle status enums.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use super::{Capability, CorrelationId, DefinitionId, EntryId, JobId, Priority, TaskId, TenantId};

/// A unit of work submitted through the JSON-RPC API.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub task_id: TaskId,
    pub method: String,
    pub params: serde_json::Value,
    pub priority_class: Priority,
    pub submitted_at: DateTime<Utc>,
    pub deadline: Option<DateTime<Utc>>,
    pub tenant_id: TenantId,
    pub submitter_id: String,
    pub correlation_id: CorrelationId,
    /// Monotonically increasing per reclaim; starts at 1 on first claim.
    pub attempt: u32,
    pub idempotency_key: Option<String>,
}

impl Task {
    /// Whether `deadline` has already elapsed relative to `now`.
    pub fn is_deadline_expired(&self, now: DateTime<Utc>) -> bool {
        self.deadline.map(|d| now > d).unwrap_or(false)
    }
}

/// Status of a `Task` as observed through the public `status()` API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Accepted,
    Enqueued,
    Claimed,
    Processing,
    Ok,
    Error,
    Timeout,
    Cancelled,
    Compensated,
    DeadlineExpired,
}

/// A durable record appended to a priority stream (§3, §4.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueEntry {
    pub entry_id: EntryId,
    pub task_id: TaskId,
    pub priority_class: Priority,
    pub capability: Capability,
    pub payload: serde_json::Value,
    pub enqueued_at: DateTime<Utc>,
    pub consumer_group: String,
    pub attempt: u32,
    pub deadline: Option<DateTime<Utc>>,
}

impl QueueEntry {
    /// Whether `deadline` has already elapsed relative to `now`.
    pub fn is_deadline_expired(&self, now: DateTime<Utc>) -> bool {
        self.deadline.map(|d| now > d).unwrap_or(false)
    }
}

/// Status of a `Claim` on a `QueueEntry`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Pending,
    Acked,
    Reclaimed,
}

/// An entry delivered to a specific consumer (§3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Claim {
    pub entry_id: EntryId,
    pub consumer_id: String,
    pub claimed_at: DateTime<Utc>,
    pub last_heartbeat: DateTime<Utc>,
    pub attempt: u32,
    pub status: ClaimStatus,
}

impl Claim {
    pub fn idle_duration(&self, now: DateTime<Utc>) -> chrono::Duration {
        now - self.last_heartbeat
    }
}

/// Classification of a saga step, governing how it participates in compensation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepClassification {
    /// Has no side effects; never needs compensation.
    ReadOnly,
    /// Has side effects and supplies a compensating action.
    Compensatable,
    /// Terminal step; no step may follow it in the definition.
    Final,
}

/// Status of an individual saga step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    Pending,
    Running,
    Succeeded,
    Failed,
    Compensating,
    Compensated,
}

/// A single step within a saga definition (§4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SagaStepRecord {
    pub name: String,
    pub classification: StepClassification,
    pub status: StepStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub result_ref: Option<serde_json::Value>,
    pub error: Option<String>,
}

/// Overall status of a saga aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStatus {
    Running,
    Compensating,
    Succeeded,
    Compensated,
    Failed,
}

impl SagaStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SagaStatus::Succeeded | SagaStatus::Compensated | SagaStatus::Failed
        )
    }
}

/// A durable workflow aggregate (§3, §4.6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Saga {
    pub saga_id: TaskId,
    pub definition_id: DefinitionId,
    pub current_step: usize,
    pub status: SagaStatus,
    pub steps: Vec<SagaStepRecord>,
    pub checkpoints: HashMap<String, serde_json::Value>,
}

impl Saga {
    pub fn new(saga_id: TaskId, definition_id: DefinitionId, steps: Vec<SagaStepRecord>) -> Self {
        Self {
            saga_id,
            definition_id,
            current_step: 0,
            status: SagaStatus::Running,
            steps,
            checkpoints: HashMap::new(),
        }
    }
}

/// Network egress policy for a sandbox job.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum NetworkPolicy {
    #[default]
    None,
    Allowlist(Vec<String>),
}

/// Resource caps enforced on a sandbox job (§6.4).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceLimits {
    pub cpu_cores: u32,
    pub memory_bytes: u64,
    pub wallclock_seconds: u64,
    pub pids: u32,
    pub tmpfs_bytes: u64,
    pub output_bytes_cap: usize,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            cpu_cores: 1,
            memory_bytes: 512 * 1024 * 1024,
            wallclock_seconds: 30,
            pids: 64,
            tmpfs_bytes: 64 * 1024 * 1024,
            output_bytes_cap: 1024 * 1024,
        }
    }
}

/// Terminal status of a sandbox execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxStatus {
    Created,
    Starting,
    Running,
    Exited,
    Timeout,
    Killed,
    PolicyViolation,
    Collected,
}

/// A request to execute untrusted code in an isolated executor (§3, §4.7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxJob {
    pub job_id: JobId,
    pub task_id: TaskId,
    pub image_tag: String,
    pub entry_command: Vec<String>,
    pub env: HashMap<String, String>,
    pub resource_limits: ResourceLimits,
    pub network_policy: NetworkPolicy,
    pub input_artifacts: Vec<String>,
}

/// Result of a completed (or terminated) sandbox execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxOutcome {
    pub job_id: JobId,
    pub status: SandboxStatus,
    pub exit_code: Option<i32>,
    pub stdout: String,
    pub stdout_truncated: bool,
    pub stderr: String,
    pub stderr_truncated: bool,
    pub collected_artifacts: Vec<String>,
}

/// Stable, terminal, immutable outcome record for a `Task` (§3, §7).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Ok,
    Error,
    Timeout,
    Cancelled,
    Compensated,
    DeadlineExpired,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub status: ResultStatus,
    pub payload: Option<serde_json::Value>,
    pub error_code: Option<i64>,
    pub error_message: Option<String>,
    pub completed_at: DateTime<Utc>,
    pub trace_id: CorrelationId,
}

/// Append-only security/lifecycle record (§3, §4.10).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub event_id: super::AuditId,
    pub ts: DateTime<Utc>,
    pub actor: String,
    pub subject: String,
    pub action: String,
    pub details: serde_json::Value,
    pub correlation_id: Option<CorrelationId>,
}

impl AuditEvent {
    pub fn new(actor: impl Into<String>, subject: impl Into<String>, action: impl Into<String>, details: serde_json::Value) -> Self {
        Self {
            event_id: super::AuditId::new(),
            ts: Utc::now(),
            actor: actor.into(),
            subject: subject.into(),
            action: action.into(),
            details,
            correlation_id: None,
        }
    }

    pub fn with_correlation(mut self, correlation_id: CorrelationId) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deadline_expired_detects_past_deadline() {
        let now = Utc::now();
        let task = Task {
            task_id: TaskId::new(),
            method: "run_reasoning".into(),
            params: serde_json::json!({}),
            priority_class: Priority::Normal,
            submitted_at: now - chrono::Duration::seconds(10),
            deadline: Some(now - chrono::Duration::seconds(1)),
            tenant_id: TenantId("t1".into()),
            submitter_id: "s1".into(),
            correlation_id: CorrelationId::new(),
            attempt: 1,
            idempotency_key: None,
        };
        assert!(task.is_deadline_expired(now));
    }

    #[test]
    fn deadline_none_never_expires() {
        let now = Utc::now();
        let task = Task {
            task_id: TaskId::new(),
            method: "run_reasoning".into(),
            params: serde_json::json!({}),
            priority_class: Priority::Normal,
            submitted_at: now,
            deadline: None,
            tenant_id: TenantId("t1".into()),
            submitter_id: "s1".into(),
            correlation_id: CorrelationId::new(),
            attempt: 1,
            idempotency_key: None,
        };
        assert!(!task.is_deadline_expired(now));
    }

    #[test]
    fn queue_entry_deadline_expired_detects_past_deadline() {
        let now = Utc::now();
        let entry = QueueEntry {
            entry_id: EntryId(0),
            task_id: TaskId::new(),
            priority_class: Priority::Normal,
            capability: Capability::Reasoning,
            payload: serde_json::json!({}),
            enqueued_at: now - chrono::Duration::seconds(10),
            consumer_group: "reasoning-workers".into(),
            attempt: 1,
            deadline: Some(now - chrono::Duration::seconds(1)),
        };
        assert!(entry.is_deadline_expired(now));
    }

    #[test]
    fn saga_status_terminal_classification() {
        assert!(SagaStatus::Succeeded.is_terminal());
        assert!(SagaStatus::Compensated.is_terminal());
        assert!(SagaStatus::Failed.is_terminal());
        assert!(!SagaStatus::Running.is_terminal());
        assert!(!SagaStatus::Compensating.is_terminal());
    }
}
