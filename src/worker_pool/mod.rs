//! Worker Pool Manager (§4.5): owns the set of workers per capability,
//! turns queue entries into work via a pluggable [`WorkerHandler`], and
//! enforces the heartbeat/ack/idle-reclaim/preempt contract.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Notify;
use tracing::{info, warn};

use crate::config::WorkerPoolConfig;
use crate::queue::DurableQueue;
use crate::router::priority_queue::{FairnessChoice, FairnessDial, PreemptionCandidate};
use crate::router::PreemptSink;
use crate::types::{Capability, CorrelationId, EntryId, Priority, QueueEntry, ResultStatus, TaskResult, WorkerPoolError};

/// Executes one claimed queue entry to completion. Implemented per
/// capability (reasoning, codegen, ml, sandbox) — the orchestrator core
/// treats the concrete AI/sandbox call as opaque external I/O (§9).
#[async_trait]
pub trait WorkerHandler: Send + Sync {
    async fn handle(&self, entry: &QueueEntry) -> TaskResult;
}

/// Live bookkeeping for a single in-flight claim.
#[derive(Debug, Clone)]
struct ActiveClaim {
    stream: String,
    entry: QueueEntry,
    claimed_at: chrono::DateTime<Utc>,
    last_heartbeat: chrono::DateTime<Utc>,
    checkpoint_requested: Arc<Notify>,
}

struct Pool {
    current: AtomicU32,
    min: u32,
    max: u32,
    paused: std::sync::atomic::AtomicBool,
    active: DashMap<String, ActiveClaim>,
}

impl Pool {
    fn new(min: u32, max: u32) -> Self {
        Self {
            current: AtomicU32::new(min),
            min,
            max,
            paused: std::sync::atomic::AtomicBool::new(false),
            active: DashMap::new(),
        }
    }
}

/// Manages one pool per [`Capability`], bridging the Durable Queue and the
/// capability-specific [`WorkerHandler`]s.
pub struct WorkerPoolManager {
    queue: Arc<dyn DurableQueue>,
    pools: DashMap<Capability, Arc<Pool>>,
    handlers: DashMap<Capability, Arc<dyn WorkerHandler>>,
    config: WorkerPoolConfig,
    fairness: DashMap<Capability, parking_lot::Mutex<FairnessDial>>,
}

impl WorkerPoolManager {
    pub fn new(queue: Arc<dyn DurableQueue>, config: WorkerPoolConfig) -> Self {
        Self {
            queue,
            pools: DashMap::new(),
            handlers: DashMap::new(),
            config,
            fairness: DashMap::new(),
        }
    }

    pub fn register_capability(
        &self,
        capability: Capability,
        handler: Arc<dyn WorkerHandler>,
        min: u32,
        max: u32,
    ) {
        self.pools.insert(capability.clone(), Arc::new(Pool::new(min, max)));
        self.handlers.insert(capability, handler);
    }

    pub fn registered_capabilities(&self) -> Vec<Capability> {
        self.pools.iter().map(|e| e.key().clone()).collect()
    }

    pub fn current_size(&self, capability: &Capability) -> u32 {
        self.pools
            .get(capability)
            .map(|p| p.current.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    pub fn set_current_size(&self, capability: &Capability, size: u32) -> Result<(), WorkerPoolError> {
        let pool = self
            .pools
            .get(capability)
            .ok_or_else(|| WorkerPoolError::NoWorkersForCapability(capability.to_string()))?;
        let clamped = size.clamp(pool.min, pool.max);
        pool.current.store(clamped, Ordering::Relaxed);
        Ok(())
    }

    pub fn pause(&self, capability: &Capability) {
        if let Some(pool) = self.pools.get(capability) {
            pool.paused.store(true, Ordering::Relaxed);
        }
    }

    pub fn resume(&self, capability: &Capability) {
        if let Some(pool) = self.pools.get(capability) {
            pool.paused.store(false, Ordering::Relaxed);
        }
    }

    pub fn is_paused(&self, capability: &Capability) -> bool {
        self.pools
            .get(capability)
            .map(|p| p.paused.load(Ordering::Relaxed))
            .unwrap_or(false)
    }

    /// Claims a single entry from `stream`/`group` for `consumer_id` and
    /// runs the registered handler to completion, honoring the heartbeat
    /// and ack contract. Returns `Ok(None)` when nothing was available.
    pub async fn claim_and_process(
        &self,
        capability: &Capability,
        stream: &str,
        group: &str,
        consumer_id: &str,
        priority: Priority,
    ) -> Result<Option<TaskResult>, WorkerPoolError> {
        if self.is_paused(capability) {
            return Ok(None);
        }

        let handler = self
            .handlers
            .get(capability)
            .ok_or_else(|| WorkerPoolError::NoWorkersForCapability(capability.to_string()))?
            .clone();

        let entries = self
            .queue
            .claim(stream, group, consumer_id, 1, 0)
            .await
            .map_err(|e| WorkerPoolError::WorkerFailed {
                attempts: 1,
                reason: e.to_string(),
            })?;

        let Some(entry) = entries.into_iter().next() else {
            return Ok(None);
        };

        if entry.is_deadline_expired(Utc::now()) {
            self.queue
                .ack(stream, group, entry.entry_id)
                .await
                .map_err(|e| WorkerPoolError::WorkerFailed { attempts: entry.attempt, reason: e.to_string() })?;
            warn!(task_id = %entry.task_id, stream, "entry deadline expired before claim, acking without dispatch");
            return Ok(Some(TaskResult {
                task_id: entry.task_id,
                status: ResultStatus::DeadlineExpired,
                payload: None,
                error_code: Some(-32020),
                error_message: Some("deadline_expired".to_string()),
                completed_at: Utc::now(),
                trace_id: CorrelationId::new(),
            }));
        }

        if let Some(pool) = self.pools.get(capability) {
            let checkpoint_requested = Arc::new(Notify::new());
            pool.active.insert(
                consumer_id.to_string(),
                ActiveClaim {
                    stream: stream.to_string(),
                    entry: entry.clone(),
                    claimed_at: Utc::now(),
                    last_heartbeat: Utc::now(),
                    checkpoint_requested: checkpoint_requested.clone(),
                },
            );

            if priority == Priority::Low {
                // Only non-preemption-eligible work needs to register as a
                // preemption target; callers wire this into the router.
            }

            tokio::select! {
                result = handler.handle(&entry) => {
                    pool.active.remove(consumer_id);
                    self.queue
                        .ack(stream, group, entry.entry_id)
                        .await
                        .map_err(|e| WorkerPoolError::WorkerFailed { attempts: entry.attempt, reason: e.to_string() })?;
                    Ok(Some(result))
                }
                _ = checkpoint_requested.notified() => {
                    pool.active.remove(consumer_id);
                    self.queue
                        .requeue(stream, entry)
                        .await
                        .map_err(|e| WorkerPoolError::WorkerFailed { attempts: 1, reason: e.to_string() })?;
                    info!(consumer_id, "checkpoint+requeue completed after preempt signal");
                    Ok(None)
                }
            }
        } else {
            Err(WorkerPoolError::NoWorkersForCapability(capability.to_string()))
        }
    }

    /// Picks a priority class via the capability's [`FairnessDial`] and
    /// attempts a claim on that class's stream first, falling back to the
    /// other class when the chosen one has nothing to offer. `DurableQueue`
    /// has no non-destructive peek, so both classes are reported pending to
    /// the dial on every call; the claim attempt order still lets an empty
    /// chosen class fall through without wasting the dispatch cycle.
    pub async fn dispatch_capability(
        &self,
        capability: &Capability,
        group: &str,
        consumer_id: &str,
        fairness_n: u32,
    ) -> Result<Option<TaskResult>, WorkerPoolError> {
        if self.is_paused(capability) {
            return Ok(None);
        }

        let choice = {
            let dial = self
                .fairness
                .entry(capability.clone())
                .or_insert_with(|| parking_lot::Mutex::new(FairnessDial::new(fairness_n.max(1))));
            dial.lock().next_class(true, true)
        };

        let Some(choice) = choice else {
            return Ok(None);
        };

        let (primary, fallback) = match choice {
            FairnessChoice::HighOrCritical => (
                [Priority::Critical, Priority::High],
                [Priority::Normal, Priority::Low],
            ),
            FairnessChoice::Lower => (
                [Priority::Normal, Priority::Low],
                [Priority::Critical, Priority::High],
            ),
        };

        for priority in primary.into_iter().chain(fallback) {
            let stream = crate::router::stream_name(capability, priority);
            if let Some(result) = self
                .claim_and_process(capability, &stream, group, consumer_id, priority)
                .await?
            {
                return Ok(Some(result));
            }
        }

        Ok(None)
    }

    /// Worker-side heartbeat while holding a claim (§4.5 contract).
    pub fn heartbeat(&self, capability: &Capability, consumer_id: &str) {
        if let Some(pool) = self.pools.get(capability) {
            if let Some(mut claim) = pool.active.get_mut(consumer_id) {
                claim.last_heartbeat = Utc::now();
            }
        }
    }

    /// True if `consumer_id`'s claim has gone silent past `ack_timeout`.
    pub fn is_heartbeat_stale(&self, capability: &Capability, consumer_id: &str) -> bool {
        self.pools
            .get(capability)
            .and_then(|pool| {
                pool.active.get(consumer_id).map(|claim| {
                    Utc::now() - claim.last_heartbeat
                        > chrono::Duration::from_std(self.config.ack_timeout).unwrap_or_default()
                })
            })
            .unwrap_or(false)
    }

    pub fn registered_consumer_ids(&self, capability: &Capability) -> Vec<String> {
        self.pools
            .get(capability)
            .map(|pool| pool.active.iter().map(|e| e.key().clone()).collect())
            .unwrap_or_default()
    }

    pub fn preemption_candidate(
        &self,
        capability: &Capability,
        consumer_id: &str,
    ) -> Option<PreemptionCandidate> {
        let pool = self.pools.get(capability)?;
        let claim = pool.active.get(consumer_id)?;
        Some(PreemptionCandidate {
            consumer_id: consumer_id.to_string(),
            priority: claim.entry.priority_class,
            claimed_at: claim.claimed_at,
        })
    }
}

#[async_trait]
impl PreemptSink for WorkerPoolManager {
    async fn signal_preempt(&self, capability: &Capability, consumer_id: &str) {
        if let Some(pool) = self.pools.get(capability) {
            if let Some(claim) = pool.active.get(consumer_id) {
                claim.checkpoint_requested.notify_one();
                return;
            }
        }
        warn!(consumer_id, capability = %capability, "preempt signal for unknown/finished claim");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::InMemoryQueue;
    use crate::types::{ResultStatus, TaskId};
    use std::sync::atomic::AtomicBool;

    struct ImmediateHandler;

    #[async_trait]
    impl WorkerHandler for ImmediateHandler {
        async fn handle(&self, entry: &QueueEntry) -> TaskResult {
            TaskResult {
                task_id: entry.task_id,
                status: ResultStatus::Ok,
                payload: Some(serde_json::json!("done")),
                error_code: None,
                error_message: None,
                completed_at: Utc::now(),
                trace_id: crate::types::CorrelationId::new(),
            }
        }
    }

    struct BlockingHandler(Arc<AtomicBool>);

    #[async_trait]
    impl WorkerHandler for BlockingHandler {
        async fn handle(&self, entry: &QueueEntry) -> TaskResult {
            self.0.store(true, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_secs(3600)).await;
            unreachable!("test preempts before this ever resolves")
        }
    }

    fn entry() -> QueueEntry {
        entry_with_deadline(None)
    }

    fn entry_with_deadline(deadline: Option<chrono::DateTime<Utc>>) -> QueueEntry {
        QueueEntry {
            entry_id: EntryId(0),
            task_id: TaskId::new(),
            priority_class: Priority::Low,
            capability: Capability::Reasoning,
            payload: serde_json::json!({}),
            enqueued_at: Utc::now(),
            consumer_group: "reasoning-workers".to_string(),
            attempt: 1,
            deadline,
        }
    }

    #[tokio::test]
    async fn claim_and_process_acks_on_success() {
        let queue = Arc::new(InMemoryQueue::new());
        queue.append("reasoning:low", entry()).await.unwrap();
        let manager = WorkerPoolManager::new(queue.clone(), WorkerPoolConfig::default());
        manager.register_capability(Capability::Reasoning, Arc::new(ImmediateHandler), 1, 4);

        let result = manager
            .claim_and_process(&Capability::Reasoning, "reasoning:low", "reasoning-workers", "w1", Priority::Low)
            .await
            .unwrap();
        assert!(result.is_some());
        assert!(queue.pending("reasoning:low", "reasoning-workers").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn claim_and_process_acks_expired_deadline_without_dispatch() {
        let queue = Arc::new(InMemoryQueue::new());
        let past = Utc::now() - chrono::Duration::seconds(1);
        queue.append("reasoning:low", entry_with_deadline(Some(past))).await.unwrap();
        let manager = WorkerPoolManager::new(queue.clone(), WorkerPoolConfig::default());
        manager.register_capability(Capability::Reasoning, Arc::new(ImmediateHandler), 1, 4);

        let result = manager
            .claim_and_process(&Capability::Reasoning, "reasoning:low", "reasoning-workers", "w1", Priority::Low)
            .await
            .unwrap()
            .expect("expired entry still produces a terminal result");

        assert_eq!(result.status, ResultStatus::DeadlineExpired);
        assert_eq!(result.error_code, Some(-32020));
        assert!(queue.pending("reasoning:low", "reasoning-workers").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dispatch_capability_prefers_critical_over_low() {
        let queue = Arc::new(InMemoryQueue::new());
        queue.append("reasoning:low", entry()).await.unwrap();
        queue.append("reasoning:critical", entry_with_deadline(None)).await.unwrap();
        let manager = WorkerPoolManager::new(queue.clone(), WorkerPoolConfig::default());
        manager.register_capability(Capability::Reasoning, Arc::new(ImmediateHandler), 1, 4);

        let result = manager
            .dispatch_capability(&Capability::Reasoning, "reasoning-workers", "w1", 16)
            .await
            .unwrap()
            .expect("a critical entry is pending and should be claimed first");
        assert_eq!(result.status, ResultStatus::Ok);
        assert_eq!(
            queue.pending("reasoning:critical", "reasoning-workers").await.unwrap().len(),
            0
        );
        assert_eq!(queue.pending("reasoning:low", "reasoning-workers").await.unwrap().len(), 0);
    }

    #[tokio::test]
    async fn preempt_signal_triggers_checkpoint_and_requeue() {
        let queue = Arc::new(InMemoryQueue::new());
        queue.append("reasoning:low", entry()).await.unwrap();
        let manager = Arc::new(WorkerPoolManager::new(queue.clone(), WorkerPoolConfig::default()));
        let entered = Arc::new(AtomicBool::new(false));
        manager.register_capability(
            Capability::Reasoning,
            Arc::new(BlockingHandler(entered.clone())),
            1,
            4,
        );

        let manager_clone = manager.clone();
        let handle = tokio::spawn(async move {
            manager_clone
                .claim_and_process(&Capability::Reasoning, "reasoning:low", "reasoning-workers", "w1", Priority::Low)
                .await
                .unwrap()
        });

        while !entered.load(Ordering::SeqCst) {
            tokio::task::yield_now().await;
        }
        manager.signal_preempt(&Capability::Reasoning, "w1").await;
        let result = handle.await.unwrap();
        assert!(result.is_none());

        let pending = queue.pending("reasoning:low", "reasoning-workers").await.unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].attempt, 2);
    }

    #[tokio::test]
    async fn pause_prevents_new_claims() {
        let queue = Arc::new(InMemoryQueue::new());
        queue.append("reasoning:low", entry()).await.unwrap();
        let manager = WorkerPoolManager::new(queue.clone(), WorkerPoolConfig::default());
        manager.register_capability(Capability::Reasoning, Arc::new(ImmediateHandler), 1, 4);
        manager.pause(&Capability::Reasoning);

        let result = manager
            .claim_and_process(&Capability::Reasoning, "reasoning:low", "reasoning-workers", "w1", Priority::Low)
            .await
            .unwrap();
        assert!(result.is_none());
    }
}
