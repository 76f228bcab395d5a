//! Method dispatch table (§6, §4.11): maps a JSON-RPC method name onto the
//! Orchestrator's task-submission and control-plane operations.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::{json, Value};

use super::jsonrpc::{JsonRpcRequest, JsonRpcResponse, RequestId};
use crate::types::{Capability, CorrelationId, EntryId, Priority, Task, TaskId, TenantId};
use crate::Orchestrator;

pub async fn dispatch(orchestrator: &Arc<Orchestrator>, request: JsonRpcRequest) -> JsonRpcResponse {
    let id = request.id.clone();
    match request.method.as_str() {
        "run_task" | "run_saga" | "run_sandbox" => run_task(orchestrator, id, request).await,
        "status" => status(orchestrator, id).await,
        "analytics" => analytics(orchestrator, id, request).await,
        "control.scale" => control_scale(orchestrator, id, request).await,
        "control.pause" => control_pause(orchestrator, id, request, true).await,
        "control.resume" => control_pause(orchestrator, id, request, false).await,
        "control.reclaim" => control_reclaim(orchestrator, id, request).await,
        "control.dlq_list" => control_dlq_list(orchestrator, id).await,
        "control.dlq_replay" => control_dlq_replay(orchestrator, id, request).await,
        "inject.task" => inject_task(orchestrator, id, request).await,
        other => JsonRpcResponse::method_not_found(id, other),
    }
}

#[derive(Deserialize)]
struct RunTaskParams {
    method: String,
    params: Value,
    #[serde(default)]
    priority: Priority,
    tenant_id: String,
    submitter_id: String,
    #[serde(default)]
    idempotency_key: Option<String>,
    #[serde(default)]
    deadline: Option<chrono::DateTime<chrono::Utc>>,
}

async fn run_task(orchestrator: &Arc<Orchestrator>, id: Option<RequestId>, request: JsonRpcRequest) -> JsonRpcResponse {
    let parsed: RunTaskParams = match serde_json::from_value(request.params) {
        Ok(p) => p,
        Err(e) => return JsonRpcResponse::invalid_params(id, e.to_string()),
    };

    let task = Task {
        task_id: TaskId::new(),
        method: parsed.method,
        params: parsed.params,
        priority_class: parsed.priority,
        submitted_at: chrono::Utc::now(),
        deadline: parsed.deadline,
        tenant_id: TenantId(parsed.tenant_id),
        submitter_id: parsed.submitter_id,
        correlation_id: CorrelationId::new(),
        attempt: 1,
        idempotency_key: parsed.idempotency_key,
    };

    match orchestrator.submit_task(task).await {
        Ok(task_id) => JsonRpcResponse::ok(id, json!({ "task_id": task_id.to_string(), "status": "accepted" })),
        Err(e) => JsonRpcResponse::from_orchestrator_error(id, &e),
    }
}

async fn status(orchestrator: &Arc<Orchestrator>, id: Option<RequestId>) -> JsonRpcResponse {
    let capabilities: Vec<Value> = orchestrator
        .worker_pool
        .registered_capabilities()
        .into_iter()
        .map(|cap| {
            json!({
                "capability": cap.to_string(),
                "pool_size": orchestrator.worker_pool.current_size(&cap),
                "paused": orchestrator.worker_pool.is_paused(&cap),
            })
        })
        .collect();

    JsonRpcResponse::ok(
        id,
        json!({
            "pools": capabilities,
            "dlq_depth": orchestrator.recovery.dlq_list().await.len(),
            "audit_entries": orchestrator.audit.len(),
        }),
    )
}

#[derive(Deserialize)]
struct AnalyticsParams {
    #[serde(default = "default_window_seconds")]
    window_seconds: u64,
}

fn default_window_seconds() -> u64 {
    3600
}

async fn analytics(orchestrator: &Arc<Orchestrator>, id: Option<RequestId>, request: JsonRpcRequest) -> JsonRpcResponse {
    let parsed: AnalyticsParams = match serde_json::from_value(request.params) {
        Ok(p) => p,
        Err(_) => AnalyticsParams { window_seconds: default_window_seconds() },
    };
    JsonRpcResponse::ok(
        id,
        json!({
            "window_seconds": parsed.window_seconds,
            "dlq_depth": orchestrator.recovery.dlq_list().await.len(),
        }),
    )
}

#[derive(Deserialize)]
struct ScaleParams {
    pool: Capability,
    absolute: u32,
    min: u32,
    max: u32,
    #[serde(default)]
    reason: Option<String>,
}

async fn control_scale(orchestrator: &Arc<Orchestrator>, id: Option<RequestId>, request: JsonRpcRequest) -> JsonRpcResponse {
    let parsed: ScaleParams = match serde_json::from_value(request.params) {
        Ok(p) => p,
        Err(e) => return JsonRpcResponse::invalid_params(id, e.to_string()),
    };
    match orchestrator.autoscaler.manual_scale(&parsed.pool, parsed.absolute, parsed.min, parsed.max) {
        Ok(()) => {
            orchestrator.audit.append(crate::types::AuditEvent::new(
                "operator",
                parsed.pool.to_string(),
                "control.scale",
                json!({ "to": parsed.absolute, "reason": parsed.reason }),
            ));
            JsonRpcResponse::ok(id, json!({ "pool": parsed.pool.to_string(), "size": parsed.absolute }))
        }
        Err(e) => JsonRpcResponse::from_orchestrator_error(id, &crate::types::OrchestratorError::Autoscaler(e)),
    }
}

#[derive(Deserialize)]
struct PoolParams {
    pool: Capability,
}

async fn control_pause(
    orchestrator: &Arc<Orchestrator>,
    id: Option<RequestId>,
    request: JsonRpcRequest,
    pause: bool,
) -> JsonRpcResponse {
    let parsed: PoolParams = match serde_json::from_value(request.params) {
        Ok(p) => p,
        Err(e) => return JsonRpcResponse::invalid_params(id, e.to_string()),
    };
    if pause {
        orchestrator.worker_pool.pause(&parsed.pool);
    } else {
        orchestrator.worker_pool.resume(&parsed.pool);
    }
    orchestrator.audit.append(crate::types::AuditEvent::new(
        "operator",
        parsed.pool.to_string(),
        if pause { "control.pause" } else { "control.resume" },
        json!({}),
    ));
    JsonRpcResponse::ok(id, json!({ "pool": parsed.pool.to_string(), "paused": pause }))
}

#[derive(Deserialize)]
struct ReclaimParams {
    stream: String,
    group: String,
    min_idle_ms: u64,
    #[serde(default = "default_recovery_consumer")]
    consumer: String,
}

fn default_recovery_consumer() -> String {
    "operator-reclaim".to_string()
}

async fn control_reclaim(orchestrator: &Arc<Orchestrator>, id: Option<RequestId>, request: JsonRpcRequest) -> JsonRpcResponse {
    let parsed: ReclaimParams = match serde_json::from_value(request.params) {
        Ok(p) => p,
        Err(e) => return JsonRpcResponse::invalid_params(id, e.to_string()),
    };
    match orchestrator
        .recovery
        .scan_once(&parsed.stream, &parsed.group, &parsed.consumer, parsed.min_idle_ms)
        .await
    {
        Ok(report) => JsonRpcResponse::ok(id, json!({ "reclaimed": report.reclaimed, "dead_lettered": report.dead_lettered })),
        Err(e) => JsonRpcResponse::from_orchestrator_error(id, &crate::types::OrchestratorError::Recovery(e)),
    }
}

async fn control_dlq_list(orchestrator: &Arc<Orchestrator>, id: Option<RequestId>) -> JsonRpcResponse {
    let entries = orchestrator.recovery.dlq_list().await;
    let out: Vec<Value> = entries
        .into_iter()
        .map(|(stream, entry)| json!({ "stream": stream, "entry_id": entry.entry_id.0, "task_id": entry.task_id.to_string(), "attempt": entry.attempt }))
        .collect();
    JsonRpcResponse::ok(id, json!({ "entries": out }))
}

#[derive(Deserialize)]
struct DlqReplayParams {
    entry_id: u64,
}

async fn control_dlq_replay(orchestrator: &Arc<Orchestrator>, id: Option<RequestId>, request: JsonRpcRequest) -> JsonRpcResponse {
    let parsed: DlqReplayParams = match serde_json::from_value(request.params) {
        Ok(p) => p,
        Err(e) => return JsonRpcResponse::invalid_params(id, e.to_string()),
    };
    match orchestrator.recovery.dlq_replay(EntryId(parsed.entry_id)).await {
        Ok(new_entry_id) => JsonRpcResponse::ok(id, json!({ "entry_id": new_entry_id.0 })),
        Err(e) => JsonRpcResponse::from_orchestrator_error(id, &crate::types::OrchestratorError::Recovery(e)),
    }
}

async fn inject_task(orchestrator: &Arc<Orchestrator>, id: Option<RequestId>, request: JsonRpcRequest) -> JsonRpcResponse {
    // Operator-submitted tasks bypass tenant priority clipping by request
    // construction alone: the submitter is always `operator`, which the
    // default `PermissiveTenantPolicy` already allows any priority for.
    // A stricter `TenantPolicy` deployment should special-case this submitter.
    run_task(orchestrator, id, request).await
}
