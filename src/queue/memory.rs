//! In-memory `DurableQueue` implementation used by tests and the local/dev
//! deployment profile. State does not survive a process restart — callers
//! wanting durability across crashes must configure the Redis backend.

use std::collections::{HashMap, VecDeque};

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;

use super::{DurableQueue, PendingEntry};
use crate::types::{EntryId, QueueEntry, QueueError};

struct InFlight {
    entry: QueueEntry,
    consumer_id: String,
    claimed_at: chrono::DateTime<Utc>,
}

struct Stream {
    next_id: u64,
    log: HashMap<u64, QueueEntry>,
    backlog: VecDeque<u64>,
    groups: HashMap<String, Group>,
}

#[derive(Default)]
struct Group {
    last_delivered: u64,
    in_flight: HashMap<u64, InFlight>,
}

impl Stream {
    fn new() -> Self {
        Self {
            next_id: 1,
            log: HashMap::new(),
            backlog: VecDeque::new(),
            groups: HashMap::new(),
        }
    }
}

#[derive(Default)]
pub struct InMemoryQueue {
    streams: Mutex<HashMap<String, Stream>>,
}

impl InMemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl DurableQueue for InMemoryQueue {
    async fn append(&self, stream: &str, mut entry: QueueEntry) -> Result<EntryId, QueueError> {
        let mut streams = self.streams.lock();
        let s = streams.entry(stream.to_string()).or_insert_with(Stream::new);
        let id = s.next_id;
        s.next_id += 1;
        entry.entry_id = EntryId(id);
        s.backlog.push_back(id);
        s.log.insert(id, entry);
        Ok(EntryId(id))
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        _block_ms: u64,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        let mut streams = self.streams.lock();
        let s = streams
            .entry(stream.to_string())
            .or_insert_with(Stream::new);
        let g = s.groups.entry(group.to_string()).or_default();

        let mut delivered = Vec::with_capacity(count);
        let mut cursor = g.last_delivered;
        let ids: Vec<u64> = s
            .backlog
            .iter()
            .copied()
            .filter(|id| *id > cursor)
            .take(count)
            .collect();

        for id in ids {
            if let Some(entry) = s.log.get(&id).cloned() {
                cursor = id;
                g.in_flight.insert(
                    id,
                    InFlight {
                        entry: entry.clone(),
                        consumer_id: consumer.to_string(),
                        claimed_at: Utc::now(),
                    },
                );
                delivered.push(entry);
            }
        }
        g.last_delivered = cursor;
        Ok(delivered)
    }

    async fn ack(&self, stream: &str, group: &str, entry_id: EntryId) -> Result<(), QueueError> {
        let mut streams = self.streams.lock();
        let s = streams
            .get_mut(stream)
            .ok_or_else(|| QueueError::AckRejected { entry_id: entry_id.0 })?;
        let g = s
            .groups
            .get_mut(group)
            .ok_or_else(|| QueueError::AckRejected { entry_id: entry_id.0 })?;
        g.in_flight
            .remove(&entry_id.0)
            .ok_or(QueueError::AckRejected { entry_id: entry_id.0 })?;
        Ok(())
    }

    async fn pending(&self, stream: &str, group: &str) -> Result<Vec<PendingEntry>, QueueError> {
        let streams = self.streams.lock();
        let Some(s) = streams.get(stream) else {
            return Ok(Vec::new());
        };
        let Some(g) = s.groups.get(group) else {
            return Ok(Vec::new());
        };
        let now = Utc::now();
        Ok(g
            .in_flight
            .values()
            .map(|f| PendingEntry {
                entry_id: f.entry.entry_id,
                consumer_id: f.consumer_id.clone(),
                idle_ms: (now - f.claimed_at).num_milliseconds().max(0) as u64,
                attempt: f.entry.attempt,
            })
            .collect())
    }

    async fn reclaim(
        &self,
        stream: &str,
        group: &str,
        new_consumer: &str,
        min_idle_ms: u64,
        ids: &[EntryId],
    ) -> Result<Vec<QueueEntry>, QueueError> {
        let mut streams = self.streams.lock();
        let s = streams
            .get_mut(stream)
            .ok_or_else(|| QueueError::ConsumerGroup(format!("unknown stream {stream}")))?;
        let g = s
            .groups
            .get_mut(group)
            .ok_or_else(|| QueueError::ConsumerGroup(format!("unknown group {group}")))?;

        let now = Utc::now();
        let mut reclaimed = Vec::new();
        for id in ids {
            if let Some(flight) = g.in_flight.get_mut(&id.0) {
                let idle = (now - flight.claimed_at).num_milliseconds().max(0) as u64;
                if idle < min_idle_ms {
                    continue;
                }
                flight.consumer_id = new_consumer.to_string();
                flight.claimed_at = now;
                flight.entry.attempt += 1;
                reclaimed.push(flight.entry.clone());
            }
        }
        Ok(reclaimed)
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), QueueError> {
        let mut streams = self.streams.lock();
        let s = streams
            .entry(stream.to_string())
            .or_insert_with(Stream::new);
        s.groups.entry(group.to_string()).or_default();
        Ok(())
    }
}
