//! Redis Streams queue of new-image notifications.
//!
//! Producers append a notification per source object; ingest workers read
//! them through a consumer group and acknowledge only after the pyramid is
//! fully published. An entry left unacknowledged for longer than the
//! reclaim idle time, by a failed build or a crashed worker, is claimed
//! again by the next consumer that asks.

use chrono::{DateTime, Utc};
use redis::{aio::MultiplexedConnection, streams::*, AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::{Result, StorageError};

pub const DEFAULT_STREAM_KEY: &str = "pyramid:ingest";
pub const DEFAULT_CONSUMER_GROUP: &str = "pyramid-builders";

/// Idle time after which a pending entry is handed to another claim.
pub const DEFAULT_RECLAIM_IDLE_MS: usize = 60_000;

/// A new source image is available.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestNotification {
    pub id: Uuid,
    /// Location of the source object (local path or object key).
    pub source: String,
    /// When the object appeared; used for the fallback image key.
    pub event_time: DateTime<Utc>,
    /// Publish metadata only, no tiles.
    #[serde(default)]
    pub metadata_only: bool,
}

impl IngestNotification {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            event_time: Utc::now(),
            metadata_only: false,
        }
    }
}

/// A notification claimed from the stream, with the entry id to acknowledge.
#[derive(Debug, Clone, PartialEq)]
pub struct ClaimedNotification {
    pub entry_id: String,
    pub notification: IngestNotification,
}

/// Redis Streams ingest queue.
pub struct IngestQueue {
    conn: MultiplexedConnection,
    stream_key: String,
    group: String,
    block_ms: usize,
    reclaim_idle_ms: usize,
}

impl IngestQueue {
    /// Connect to Redis and make sure the stream and consumer group exist.
    pub async fn connect(redis_url: &str, stream_key: &str, group: &str) -> Result<Self> {
        let client = Client::open(redis_url)
            .map_err(|e| StorageError::Queue(format!("Redis connection failed: {}", e)))?;

        let mut conn = client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StorageError::Queue(format!("Redis connection failed: {}", e)))?;

        // Fails with BUSYGROUP when the group already exists. Starting at 0
        // delivers entries published before the group was created.
        let _: std::result::Result<(), _> = redis::cmd("XGROUP")
            .arg("CREATE")
            .arg(stream_key)
            .arg(group)
            .arg("0")
            .arg("MKSTREAM")
            .query_async(&mut conn)
            .await;

        Ok(Self {
            conn,
            stream_key: stream_key.to_string(),
            group: group.to_string(),
            block_ms: 5000,
            reclaim_idle_ms: DEFAULT_RECLAIM_IDLE_MS,
        })
    }

    /// How long a claim waits for new entries before returning `None`.
    pub fn with_block_ms(mut self, block_ms: usize) -> Self {
        self.block_ms = block_ms;
        self
    }

    /// How long an entry stays pending before it is claimed again.
    pub fn with_reclaim_idle_ms(mut self, reclaim_idle_ms: usize) -> Self {
        self.reclaim_idle_ms = reclaim_idle_ms;
        self
    }

    /// Append a notification to the stream.
    pub async fn publish(&mut self, notification: &IngestNotification) -> Result<String> {
        let json = serde_json::to_string(notification)?;

        let entry_id: String = redis::cmd("XADD")
            .arg(&self.stream_key)
            .arg("*")
            .arg("id")
            .arg(notification.id.to_string())
            .arg("data")
            .arg(&json)
            .query_async(&mut self.conn)
            .await
            .map_err(|e| StorageError::Queue(format!("Publish failed: {}", e)))?;

        debug!(entry_id = %entry_id, source = %notification.source, "Published notification");
        Ok(entry_id)
    }

    /// Claim the next notification for `consumer`.
    ///
    /// Pending entries idle for longer than the reclaim time come first,
    /// whichever consumer they were delivered to; then new entries.
    /// Entries that cannot be parsed are acknowledged and skipped.
    pub async fn claim_next(&mut self, consumer: &str) -> Result<Option<ClaimedNotification>> {
        if let Some(claimed) = self.reclaim_stale(consumer).await? {
            return Ok(Some(claimed));
        }

        let opts = StreamReadOptions::default()
            .group(&self.group, consumer)
            .count(1)
            .block(self.block_ms);

        let reply: StreamReadReply = self
            .conn
            .xread_options(&[&self.stream_key], &[">"], &opts)
            .await
            .map_err(|e| StorageError::Queue(format!("Read failed: {}", e)))?;

        let entries: Vec<StreamId> = reply.keys.into_iter().flat_map(|k| k.ids).collect();
        self.first_valid(entries).await
    }

    /// Take over one pending entry that has been idle past the reclaim time.
    async fn reclaim_stale(&mut self, consumer: &str) -> Result<Option<ClaimedNotification>> {
        let reply: StreamAutoClaimReply = self
            .conn
            .xautoclaim_options(
                &self.stream_key,
                &self.group,
                consumer,
                self.reclaim_idle_ms,
                "0-0",
                StreamAutoClaimOptions::default().count(1),
            )
            .await
            .map_err(|e| StorageError::Queue(format!("XAUTOCLAIM failed: {}", e)))?;

        let claimed = self.first_valid(reply.claimed).await?;
        if let Some(c) = &claimed {
            warn!(entry_id = %c.entry_id, source = %c.notification.source, "Reclaimed stale notification");
        }
        Ok(claimed)
    }

    async fn first_valid(&mut self, entries: Vec<StreamId>) -> Result<Option<ClaimedNotification>> {
        for entry in entries {
            match parse_entry(&entry) {
                Some(notification) => {
                    return Ok(Some(ClaimedNotification {
                        entry_id: entry.id,
                        notification,
                    }))
                }
                None => {
                    warn!(entry_id = %entry.id, "Dropping malformed notification");
                    self.acknowledge(&entry.id).await?;
                }
            }
        }
        Ok(None)
    }

    /// Acknowledge and delete a processed entry.
    pub async fn acknowledge(&mut self, entry_id: &str) -> Result<()> {
        let _: i64 = self
            .conn
            .xack(&self.stream_key, &self.group, &[entry_id])
            .await
            .map_err(|e| StorageError::Queue(format!("XACK failed: {}", e)))?;
        let _: i64 = self
            .conn
            .xdel(&self.stream_key, &[entry_id])
            .await
            .map_err(|e| StorageError::Queue(format!("XDEL failed: {}", e)))?;
        Ok(())
    }

    /// Number of entries currently in the stream.
    pub async fn depth(&mut self) -> Result<u64> {
        let len: u64 = self
            .conn
            .xlen(&self.stream_key)
            .await
            .map_err(|e| StorageError::Queue(format!("XLEN failed: {}", e)))?;
        Ok(len)
    }
}

/// Decode the `data` field of a stream entry.
fn parse_entry(entry: &StreamId) -> Option<IngestNotification> {
    entry
        .map
        .get("data")
        .and_then(|v| redis::from_redis_value::<Vec<u8>>(v).ok())
        .and_then(|bytes| serde_json::from_slice(&bytes).ok())
}
