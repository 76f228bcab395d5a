//! Redis Streams-backed `DurableQueue` (§4.4). Maps the trait directly onto
//! `XADD`/`XREADGROUP`/`XACK`/`XPENDING`/`XCLAIM`/`XGROUP CREATE`, the same
//! primitives the spec's "Redis-Streams-based durable queue" names.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use super::{DurableQueue, PendingEntry};
use crate::types::{EntryId, QueueEntry, QueueError};

const FIELD_PAYLOAD: &str = "payload";

pub struct RedisStreamQueue {
    conn: ConnectionManager,
    maxlen_approx: u64,
}

impl RedisStreamQueue {
    pub async fn connect(redis_url: &str, maxlen_approx: u64) -> Result<Self, QueueError> {
        let client = redis::Client::open(redis_url)
            .map_err(|e| QueueError::BackendUnavailable(e.to_string()))?;
        let conn = client
            .get_connection_manager()
            .await
            .map_err(|e| QueueError::BackendUnavailable(e.to_string()))?;
        Ok(Self { conn, maxlen_approx })
    }

    fn encode(entry: &QueueEntry) -> Result<String, QueueError> {
        serde_json::to_string(entry).map_err(|e| QueueError::AppendFailed { reason: e.to_string() })
    }

    fn decode(redis_id: &str, raw: &str) -> Result<QueueEntry, QueueError> {
        let mut entry: QueueEntry =
            serde_json::from_str(raw).map_err(|e| QueueError::ConsumerGroup(e.to_string()))?;
        if let Some(seq) = redis_id.split('-').next() {
            if let Ok(n) = seq.parse::<u64>() {
                entry.entry_id = EntryId(n);
            }
        }
        Ok(entry)
    }
}

#[async_trait]
impl DurableQueue for RedisStreamQueue {
    async fn append(&self, stream: &str, entry: QueueEntry) -> Result<EntryId, QueueError> {
        let mut conn = self.conn.clone();
        let payload = Self::encode(&entry)?;
        let redis_id: String = redis::cmd("XADD")
            .arg(stream)
            .arg("MAXLEN")
            .arg("~")
            .arg(self.maxlen_approx)
            .arg("*")
            .arg(FIELD_PAYLOAD)
            .arg(payload)
            .query_async(&mut conn)
            .await
            .map_err(|e| QueueError::AppendFailed { reason: e.to_string() })?;
        let seq = redis_id
            .split('-')
            .next()
            .and_then(|s| s.parse::<u64>().ok())
            .unwrap_or(0);
        Ok(EntryId(seq))
    }

    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        count: usize,
        block_ms: u64,
    ) -> Result<Vec<QueueEntry>, QueueError> {
        let mut conn = self.conn.clone();
        self.ensure_group(stream, group).await?;

        let reply: redis::streams::StreamReadReply = conn
            .xread_options(
                &[stream],
                &[">"],
                &redis::streams::StreamReadOptions::default()
                    .group(group, consumer)
                    .count(count)
                    .block(block_ms as usize),
            )
            .await
            .map_err(|e| QueueError::BackendUnavailable(e.to_string()))?;

        let mut entries = Vec::new();
        for stream_key in reply.keys {
            for id in stream_key.ids {
                if let Some(raw) = id.map.get(FIELD_PAYLOAD).and_then(|v| {
                    if let redis::Value::BulkString(bytes) = v {
                        String::from_utf8(bytes.clone()).ok()
                    } else {
                        None
                    }
                }) {
                    entries.push(Self::decode(&id.id, &raw)?);
                }
            }
        }
        Ok(entries)
    }

    async fn ack(&self, stream: &str, group: &str, entry_id: EntryId) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let redis_id = format!("{}-0", entry_id.0);
        let acked: i64 = conn
            .xack(stream, group, &[redis_id])
            .await
            .map_err(|e| QueueError::BackendUnavailable(e.to_string()))?;
        if acked == 0 {
            return Err(QueueError::AckRejected { entry_id: entry_id.0 });
        }
        Ok(())
    }

    async fn pending(&self, stream: &str, group: &str) -> Result<Vec<PendingEntry>, QueueError> {
        let mut conn = self.conn.clone();
        let reply: redis::streams::StreamPendingCountReply = conn
            .xpending_count(stream, group, "-", "+", 1000)
            .await
            .map_err(|e| QueueError::BackendUnavailable(e.to_string()))?;

        Ok(reply
            .ids
            .into_iter()
            .map(|p| {
                let seq = p.id.split('-').next().and_then(|s| s.parse::<u64>().ok()).unwrap_or(0);
                PendingEntry {
                    entry_id: EntryId(seq),
                    consumer_id: p.consumer,
                    idle_ms: p.time_since_delivered as u64,
                    attempt: p.times_delivered as u32,
                }
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
        let mut conn = self.conn.clone();
        let redis_ids: Vec<String> = ids.iter().map(|id| format!("{}-0", id.0)).collect();

        let reply: redis::streams::StreamClaimReply = conn
            .xclaim(stream, group, new_consumer, min_idle_ms, &redis_ids)
            .await
            .map_err(|e| QueueError::BackendUnavailable(e.to_string()))?;

        let mut entries = Vec::new();
        for id in reply.ids {
            if let Some(raw) = id.map.get(FIELD_PAYLOAD).and_then(|v| {
                if let redis::Value::BulkString(bytes) = v {
                    String::from_utf8(bytes.clone()).ok()
                } else {
                    None
                }
            }) {
                let mut decoded = Self::decode(&id.id, &raw)?;
                decoded.attempt += 1;
                entries.push(decoded);
            }
        }
        Ok(entries)
    }

    async fn ensure_group(&self, stream: &str, group: &str) -> Result<(), QueueError> {
        let mut conn = self.conn.clone();
        let result: redis::RedisResult<()> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream)
            .arg(group)
            .arg("$")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.to_string().contains("BUSYGROUP") => Ok(()),
            Err(e) => Err(QueueError::BackendUnavailable(e.to_string())),
        }
    }
}
