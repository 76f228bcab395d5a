//! Durable Queue (§4.4): ordered, persistent, consumer-group-based delivery
//! per `(capability, priority_class)` stream. This is the at-least-once
//! backbone; everything above it (router, worker pool, recovery) talks to
//! streams only through the [`DurableQueue`] trait.

pub mod memory;
pub mod redis_stream;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::types::{EntryId, QueueEntry, QueueError};

pub use memory::InMemoryQueue;
pub use redis_stream::RedisStreamQueue;

/// A pending (unacked) entry as reported by `pending()`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingEntry {
    pub entry_id: EntryId,
    pub consumer_id: String,
    pub idle_ms: u64,
    pub attempt: u32,
}

/// Ordered, append-only, consumer-group-aware stream abstraction.
///
/// Every method is scoped to a single `stream` name; callers are expected to
/// name streams `"{capability}:{priority_class}"` so that each stream holds
/// entries of a single priority class, keeping FIFO-within-class trivial.
#[async_trait]
pub trait DurableQueue: Send + Sync {
    /// Atomically appends `entry` to `stream`, returning its monotonically
    /// increasing `entry_id`. Retried by the caller with exponential backoff
    /// on transient failure; persistent failure surfaces as
    /// `QueueError::AppendFailed` (§4.4 edge case, maps to `-32003`).
    async fn append(&self, stream: &str, entry: QueueEntry) -> Result<EntryId, QueueError>;

    /// Reads up to `count` entries not yet delivered to `group`, blocking up
    /// to `block_ms` if nothing is immediately available (long-poll).
    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<QueueEntry>, QueueError>;

    /// Marks `entry_id` processed for `group`. May trim the stream subject
    /// to retention policy; never trims an unacked entry.
    async fn ack(&self, stream: &str, group: &str, entry_id: EntryId) -> Result<(), QueueError>;

    /// Lists the pending (claimed, unacked) set for `(stream, group)`.
    async fn pending(&self, stream: &str, group: &str) -> Result<Vec<PendingEntry>, QueueError>;

    /// Transfers ownership of `ids` idle at least `min_idle_ms` to
    /// `new_consumer`, incrementing `attempt`. Forbidden for entries whose
    /// owning consumer is still live and within the idle threshold.
    async fn reclaim(
        &self,
        stream: &str,
        group: &str,
        new_consumer: &str,
        min_idle_ms: u64,
        ids: &[EntryId],
    ) -> Result<Vec<QueueEntry>, QueueError>;

    /// Ensures `group` exists on `stream`, creating it (and the stream, if
    /// absent) starting from the beginning of the log.
    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), QueueError>;

    /// Re-appends `entry` to its origin stream with `attempt` incremented —
    /// the preemption "checkpoint + requeue" primitive (§4.3).
    async fn requeue(&self, stream: &str, mut entry: QueueEntry) -> Result<EntryId, QueueError> {
        entry.attempt += 1;
        self.append(stream, entry).await
    }
}
