//! Recovery Supervisor (§4.9): periodically scans each stream's pending
//! entry list for claims that have gone idle past `idle_reclaim`, reclaims
//! them for redelivery, promotes entries that have exhausted
//! `max_attempts` to a dead-letter queue, and resumes non-terminal sagas
//! from their last checkpoint. Adapted from the source codebase's
//! replay-from-journal recovery idiom (`reasoning/journal.rs`'s
//! `DurableJournal::replay_from`), generalized from per-agent journal
//! replay to per-stream pending-entry reclamation.

use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, warn};

use crate::config::RecoveryConfig;
use crate::queue::DurableQueue;
use crate::saga::SagaEngine;
use crate::types::{EntryId, QueueEntry, RecoveryError};

/// Holds entries that exhausted `max_attempts` for operator inspection and
/// manual replay (`control.dlq_list` / `control.dlq_replay`, §4.11).
#[async_trait::async_trait]
pub trait DlqSink: Send + Sync {
    async fn push(&self, stream: String, entry: QueueEntry);
    async fn list(&self) -> Vec<(String, QueueEntry)>;
    async fn take(&self, entry_id: EntryId) -> Option<(String, QueueEntry)>;
}

#[derive(Default)]
pub struct InMemoryDlq {
    entries: DashMap<EntryId, (String, QueueEntry)>,
}

#[async_trait::async_trait]
impl DlqSink for InMemoryDlq {
    async fn push(&self, stream: String, entry: QueueEntry) {
        self.entries.insert(entry.entry_id, (stream, entry));
    }

    async fn list(&self) -> Vec<(String, QueueEntry)> {
        self.entries.iter().map(|e| e.value().clone()).collect()
    }

    async fn take(&self, entry_id: EntryId) -> Option<(String, QueueEntry)> {
        self.entries.remove(&entry_id).map(|(_, v)| v)
    }
}

/// Outcome of one scan pass over a single `(stream, group)`.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanReport {
    pub reclaimed: u32,
    pub dead_lettered: u32,
}

pub struct RecoverySupervisor {
    queue: Arc<dyn DurableQueue>,
    dlq: Arc<dyn DlqSink>,
    saga_engine: Arc<SagaEngine>,
    config: RecoveryConfig,
}

impl RecoverySupervisor {
    pub fn new(
        queue: Arc<dyn DurableQueue>,
        dlq: Arc<dyn DlqSink>,
        saga_engine: Arc<SagaEngine>,
        config: RecoveryConfig,
    ) -> Self {
        Self {
            queue,
            dlq,
            saga_engine,
            config,
        }
    }

    /// Scans `(stream, group)`'s pending list once: entries idle past
    /// `idle_reclaim_ms` are either reclaimed for redelivery under
    /// `recovery_consumer`, or — once `max_attempts` is exhausted — acked
    /// out of the stream and pushed to the dead-letter sink (§4.9 property:
    /// no entry is redelivered forever).
    pub async fn scan_once(
        &self,
        stream: &str,
        group: &str,
        recovery_consumer: &str,
        idle_reclaim_ms: u64,
    ) -> Result<ScanReport, RecoveryError> {
        let pending = self
            .queue
            .pending(stream, group)
            .await
            .map_err(|e| RecoveryError::DlqPromotionFailed { entry_id: 0, reason: e.to_string() })?;

        let mut report = ScanReport::default();
        let idle_enough: Vec<EntryId> = pending
            .iter()
            .filter(|p| p.idle_ms >= idle_reclaim_ms)
            .map(|p| p.entry_id)
            .collect();

        if idle_enough.is_empty() {
            return Ok(report);
        }

        let to_dead_letter: Vec<EntryId> = pending
            .iter()
            .filter(|p| p.idle_ms >= idle_reclaim_ms && p.attempt >= self.config.max_attempts)
            .map(|p| p.entry_id)
            .collect();
        let to_reclaim: Vec<EntryId> = idle_enough
            .into_iter()
            .filter(|id| !to_dead_letter.contains(id))
            .collect();

        if !to_reclaim.is_empty() {
            let reclaimed = self
                .queue
                .reclaim(stream, group, recovery_consumer, idle_reclaim_ms, &to_reclaim)
                .await
                .map_err(|e| RecoveryError::DlqPromotionFailed { entry_id: 0, reason: e.to_string() })?;
            report.reclaimed = reclaimed.len() as u32;
            info!(stream, group, count = report.reclaimed, "reclaimed idle entries");
        }

        for entry_id in to_dead_letter {
            let claimed = self
                .queue
                .reclaim(stream, group, recovery_consumer, 0, &[entry_id])
                .await
                .map_err(|e| RecoveryError::DlqPromotionFailed { entry_id: entry_id.0, reason: e.to_string() })?;
            let Some(entry) = claimed.into_iter().next() else {
                continue;
            };
            self.queue
                .ack(stream, group, entry_id)
                .await
                .map_err(|e| RecoveryError::DlqPromotionFailed { entry_id: entry_id.0, reason: e.to_string() })?;
            warn!(stream, entry_id = %entry_id, attempts = entry.attempt, "promoting entry to dead-letter queue");
            self.dlq.push(stream.to_string(), entry).await;
            report.dead_lettered += 1;
        }

        Ok(report)
    }

    /// Resumes every non-terminal saga from its last checkpoint. Intended
    /// to run once at process startup and again on each scan tick, so a
    /// saga interrupted by a crash makes progress without operator action.
    pub async fn resume_interrupted_sagas(&self, store: &dyn crate::saga::SagaStore) -> Vec<Result<(), RecoveryError>> {
        let mut results = Vec::new();
        for saga in store.list_non_terminal().await {
            let saga_id = saga.saga_id;
            let outcome = self
                .saga_engine
                .resume(saga_id)
                .await
                .map(|_| ())
                .map_err(|e| RecoveryError::ResumptionFailed { saga_id, reason: e.to_string() });
            results.push(outcome);
        }
        results
    }

    pub async fn dlq_list(&self) -> Vec<(String, QueueEntry)> {
        self.dlq.list().await
    }

    /// Re-appends a dead-lettered entry to its original stream with a reset
    /// attempt counter (`control.dlq_replay`, §4.11).
    pub async fn dlq_replay(&self, entry_id: EntryId) -> Result<EntryId, RecoveryError> {
        let Some((stream, mut entry)) = self.dlq.take(entry_id).await else {
            return Err(RecoveryError::DlqPromotionFailed {
                entry_id: entry_id.0,
                reason: "no such dead-lettered entry".to_string(),
            });
        };
        entry.attempt = 1;
        self.queue
            .append(&stream, entry)
            .await
            .map_err(|e| RecoveryError::DlqPromotionFailed { entry_id: entry_id.0, reason: e.to_string() })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SagaConfig;
    use crate::queue::InMemoryQueue;
    use crate::saga::InMemorySagaStore;
    use crate::types::{Capability, Priority, TaskId};
    use async_trait::async_trait;

    struct NoopExecutor;
    #[async_trait]
    impl crate::saga::StepExecutor for NoopExecutor {
        async fn execute(
            &self,
            _key: &str,
            _saga_id: TaskId,
            _step_name: &str,
            _attempt: u32,
            _params: &serde_json::Value,
        ) -> Result<serde_json::Value, String> {
            Ok(serde_json::json!("ok"))
        }
    }

    fn entry(attempt: u32) -> QueueEntry {
        QueueEntry {
            entry_id: EntryId(0),
            task_id: TaskId::new(),
            priority_class: Priority::Normal,
            capability: Capability::Reasoning,
            payload: serde_json::json!({}),
            enqueued_at: chrono::Utc::now(),
            consumer_group: "reasoning-workers".to_string(),
            attempt,
            deadline: None,
        }
    }

    fn supervisor(queue: Arc<dyn DurableQueue>, config: RecoveryConfig) -> RecoverySupervisor {
        let saga_engine = Arc::new(SagaEngine::new(
            Arc::new(NoopExecutor),
            Arc::new(InMemorySagaStore::default()),
            SagaConfig::default(),
        ));
        RecoverySupervisor::new(queue, Arc::new(InMemoryDlq::default()), saga_engine, config)
    }

    #[tokio::test]
    async fn idle_entry_below_max_attempts_is_reclaimed() {
        let queue = Arc::new(InMemoryQueue::new());
        queue.append("reasoning:normal", entry(1)).await.unwrap();
        queue.claim("reasoning:normal", "g1", "c1", 10, 0).await.unwrap();

        let mut config = RecoveryConfig::default();
        config.max_attempts = 5;
        let supervisor = supervisor(queue.clone(), config);

        let report = supervisor.scan_once("reasoning:normal", "g1", "recovery", 0).await.unwrap();
        assert_eq!(report.reclaimed, 1);
        assert_eq!(report.dead_lettered, 0);
    }

    #[tokio::test]
    async fn entry_past_max_attempts_is_dead_lettered() {
        let queue = Arc::new(InMemoryQueue::new());
        queue.append("reasoning:normal", entry(5)).await.unwrap();
        queue.claim("reasoning:normal", "g1", "c1", 10, 0).await.unwrap();

        let mut config = RecoveryConfig::default();
        config.max_attempts = 5;
        let supervisor = supervisor(queue.clone(), config);

        let report = supervisor.scan_once("reasoning:normal", "g1", "recovery", 0).await.unwrap();
        assert_eq!(report.dead_lettered, 1);
        assert_eq!(supervisor.dlq_list().await.len(), 1);
        assert!(queue.pending("reasoning:normal", "g1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn dlq_replay_resets_attempt_and_reenters_stream() {
        let queue = Arc::new(InMemoryQueue::new());
        queue.append("reasoning:normal", entry(5)).await.unwrap();
        queue.claim("reasoning:normal", "g1", "c1", 10, 0).await.unwrap();

        let mut config = RecoveryConfig::default();
        config.max_attempts = 5;
        let supervisor = supervisor(queue.clone(), config);
        supervisor.scan_once("reasoning:normal", "g1", "recovery", 0).await.unwrap();

        let dead = supervisor.dlq_list().await;
        let (_, dead_entry) = &dead[0];
        supervisor.dlq_replay(dead_entry.entry_id).await.unwrap();

        let redelivered = queue.claim("reasoning:normal", "g1", "c2", 10, 0).await.unwrap();
        assert_eq!(redelivered.len(), 1);
        assert_eq!(redelivered[0].attempt, 1);
    }
}
