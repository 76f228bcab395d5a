//! Priority Router (§4.3): classifies an accepted task into a priority
//! class, enqueues it on the durable stream for its `(capability,
//! priority_class)`, and issues preemption signals when a higher-priority
//! arrival should displace a busy low-priority worker.

pub mod priority_queue;

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{info, warn};

use crate::config::RouterConfig;
use crate::queue::DurableQueue;
use crate::types::{Capability, EntryId, Priority, QueueEntry, RouterError, Task, TenantId};
use priority_queue::{PreemptionCandidate, PreemptionQueue};

/// Implemented by the Worker Pool Manager so the router can ask "is anyone
/// in this capability pool busy with something preemptable, and if so,
/// signal them" without the router depending on pool internals.
#[async_trait::async_trait]
pub trait PreemptSink: Send + Sync {
    async fn signal_preempt(&self, capability: &Capability, consumer_id: &str);
}

/// Per-tenant policy consulted when clipping requested priority (§4.3).
pub trait TenantPolicy: Send + Sync {
    /// Maximum priority class this tenant may request.
    fn max_priority(&self, tenant_id: &TenantId) -> Priority;
}

/// A tenant policy that permits any tenant to request any priority class.
/// Suitable as the default until an operator wires a real policy provider.
pub struct PermissiveTenantPolicy;

impl TenantPolicy for PermissiveTenantPolicy {
    fn max_priority(&self, _tenant_id: &TenantId) -> Priority {
        Priority::Critical
    }
}

pub struct PriorityRouter {
    queue: Arc<dyn DurableQueue>,
    preempt_sink: Arc<dyn PreemptSink>,
    tenant_policy: Arc<dyn TenantPolicy>,
    config: RouterConfig,
    preemption_candidates: Mutex<std::collections::HashMap<Capability, PreemptionQueue>>,
}

pub fn stream_name(capability: &Capability, priority: Priority) -> String {
    format!("{capability}:{priority}")
}

impl PriorityRouter {
    pub fn new(
        queue: Arc<dyn DurableQueue>,
        preempt_sink: Arc<dyn PreemptSink>,
        tenant_policy: Arc<dyn TenantPolicy>,
        config: RouterConfig,
    ) -> Self {
        Self {
            queue,
            preempt_sink,
            tenant_policy,
            config,
            preemption_candidates: Mutex::new(std::collections::HashMap::new()),
        }
    }

    /// Clips `requested` to the tenant's permitted ceiling (§4.3).
    pub fn classify(&self, requested: Priority, tenant_id: &TenantId) -> Priority {
        let ceiling = self.tenant_policy.max_priority(tenant_id);
        requested.min(ceiling)
    }

    /// The configured weighted strict-priority fairness ratio (§4.3).
    pub fn fairness_n(&self) -> u32 {
        self.config.fairness_n
    }

    /// Routes a validated task: classify, backpressure-check, enqueue, and
    /// preempt if the arrival is `critical`/`high` and a `low` worker is busy.
    pub async fn route(
        &self,
        task: &Task,
        capability: Capability,
        queue_depth_hint: u64,
    ) -> Result<EntryId, RouterError> {
        let priority = self.classify(task.priority_class, &task.tenant_id);

        if priority == Priority::Low && queue_depth_hint >= self.config.reject_threshold {
            return Err(RouterError::Backpressure {
                capability: capability.to_string(),
                priority: priority.to_string(),
            });
        }

        let stream = stream_name(&capability, priority);
        let entry = QueueEntry {
            entry_id: EntryId(0),
            task_id: task.task_id,
            priority_class: priority,
            capability: capability.clone(),
            payload: task.params.clone(),
            enqueued_at: task.submitted_at,
            consumer_group: format!("{capability}-workers"),
            attempt: task.attempt,
            deadline: task.deadline,
        };

        let entry_id = self
            .queue
            .append(&stream, entry)
            .await
            .map_err(|_| RouterError::CapacityUnavailable {
                capability: capability.to_string(),
            })?;

        if priority.is_preemption_eligible() {
            self.maybe_preempt(&capability, priority).await;
        }

        Ok(entry_id)
    }

    /// Registers a worker as a preemption candidate while it holds a `low`
    /// (non-preemption-eligible) claim, so a later high-priority arrival
    /// can find it.
    pub fn register_busy_worker(
        &self,
        capability: Capability,
        candidate: PreemptionCandidate,
    ) {
        self.preemption_candidates
            .lock()
            .entry(capability)
            .or_default()
            .push(candidate);
    }

    pub fn forget_busy_worker(&self, capability: &Capability, consumer_id: &str) {
        if let Some(q) = self.preemption_candidates.lock().get_mut(capability) {
            q.remove(consumer_id);
        }
    }

    async fn maybe_preempt(&self, capability: &Capability, arriving_priority: Priority) {
        let target = {
            let mut candidates = self.preemption_candidates.lock();
            candidates
                .get_mut(capability)
                .and_then(|q| q.pop_best_target(arriving_priority))
        };

        if let Some(target) = target {
            info!(
                capability = %capability,
                consumer_id = %target.consumer_id,
                "issuing preempt signal"
            );
            self.preempt_sink
                .signal_preempt(capability, &target.consumer_id)
                .await;
        } else {
            warn!(capability = %capability, "no preemptable worker found for high-priority arrival");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryQueue;
    use crate::types::{CorrelationId, TaskId};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingSink(AtomicUsize);

    #[async_trait::async_trait]
    impl PreemptSink for CountingSink {
        async fn signal_preempt(&self, _capability: &Capability, _consumer_id: &str) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn task(priority: Priority) -> Task {
        Task {
            task_id: TaskId::new(),
            method: "run_codegen".into(),
            params: serde_json::json!({}),
            priority_class: priority,
            submitted_at: chrono::Utc::now(),
            deadline: None,
            tenant_id: TenantId("t1".into()),
            submitter_id: "s1".into(),
            correlation_id: CorrelationId::new(),
            attempt: 1,
            idempotency_key: None,
        }
    }

    #[tokio::test]
    async fn routes_and_enqueues() {
        let queue = Arc::new(InMemoryQueue::new());
        let sink = Arc::new(CountingSink(AtomicUsize::new(0)));
        let router = PriorityRouter::new(
            queue.clone(),
            sink.clone(),
            Arc::new(PermissiveTenantPolicy),
            RouterConfig::default(),
        );
        let entry_id = router
            .route(&task(Priority::Normal), Capability::Codegen, 0)
            .await
            .unwrap();
        assert_eq!(entry_id.0, 1);
    }

    #[tokio::test]
    async fn critical_arrival_preempts_registered_low_worker() {
        let queue = Arc::new(InMemoryQueue::new());
        let sink = Arc::new(CountingSink(AtomicUsize::new(0)));
        let router = PriorityRouter::new(
            queue.clone(),
            sink.clone(),
            Arc::new(PermissiveTenantPolicy),
            RouterConfig::default(),
        );
        router.register_busy_worker(
            Capability::Codegen,
            PreemptionCandidate {
                consumer_id: "w1".into(),
                priority: Priority::Low,
                claimed_at: chrono::Utc::now(),
            },
        );
        router
            .route(&task(Priority::Critical), Capability::Codegen, 0)
            .await
            .unwrap();
        assert_eq!(sink.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn low_priority_rejected_past_reject_threshold() {
        let queue = Arc::new(InMemoryQueue::new());
        let sink = Arc::new(CountingSink(AtomicUsize::new(0)));
        let mut config = RouterConfig::default();
        config.reject_threshold = 10;
        let router = PriorityRouter::new(queue, sink, Arc::new(PermissiveTenantPolicy), config);
        let err = router
            .route(&task(Priority::Low), Capability::Codegen, 10)
            .await;
        assert!(matches!(err, Err(RouterError::Backpressure { .. })));
    }

    #[tokio::test]
    async fn critical_priority_still_accepted_past_reject_threshold() {
        let queue = Arc::new(InMemoryQueue::new());
        let sink = Arc::new(CountingSink(AtomicUsize::new(0)));
        let mut config = RouterConfig::default();
        config.reject_threshold = 10;
        let router = PriorityRouter::new(queue, sink, Arc::new(PermissiveTenantPolicy), config);
        router
            .route(&task(Priority::Critical), Capability::Codegen, 999)
            .await
            .unwrap();
    }
}
