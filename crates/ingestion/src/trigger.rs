//! Event-driven ingestion.
//!
//! A notification names a new source object. The daemon claims one
//! notification at a time, resolves the object to a byte stream, builds
//! the pyramid on a blocking thread and acknowledges the notification only
//! once the build completed. A failed or interrupted build leaves the
//! notification unacknowledged so it is delivered again; rebuilding the
//! same image key overwrites the same objects.

use async_trait::async_trait;
use metrics::counter;
use pyramid_common::ImageKey;
use raster::{decode_bytes, PixelCameraModel, RasterSource};
use std::collections::{HashMap, VecDeque};
use std::future::Future;
use std::io::{Cursor, Read};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use storage::{BlobStore, IngestNotification, IngestQueue};
use tracing::{debug, error, info, instrument};

use crate::builder::PyramidBuilder;
use crate::report::BuildReport;
use crate::{IngestionError, Result};

/// A delivered notification and the receipt used to acknowledge it.
#[derive(Debug, Clone, PartialEq)]
pub struct IngestEvent {
    pub receipt: String,
    pub notification: IngestNotification,
}

/// Source of ingest notifications with explicit acknowledgement.
#[async_trait]
pub trait EventSource: Send {
    /// Next notification, or `None` when nothing arrived within the poll window.
    async fn receive(&mut self) -> Result<Option<IngestEvent>>;

    async fn acknowledge(&mut self, event: &IngestEvent) -> Result<()>;
}

/// Notifications held in memory, for tests and one-shot runs.
#[derive(Debug, Default)]
pub struct InMemoryEventSource {
    pending: VecDeque<IngestEvent>,
    in_flight: HashMap<String, IngestEvent>,
    acknowledged: Vec<String>,
    next_receipt: u64,
}

impl InMemoryEventSource {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a notification and return its receipt.
    pub fn push(&mut self, notification: IngestNotification) -> String {
        self.next_receipt += 1;
        let receipt = format!("mem-{}", self.next_receipt);
        self.pending.push_back(IngestEvent {
            receipt: receipt.clone(),
            notification,
        });
        receipt
    }

    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    pub fn in_flight_len(&self) -> usize {
        self.in_flight.len()
    }

    pub fn acknowledged(&self) -> &[String] {
        &self.acknowledged
    }

    /// Return every unacknowledged delivery to the queue.
    pub fn redeliver_unacknowledged(&mut self) -> usize {
        let mut events: Vec<IngestEvent> = self.in_flight.drain().map(|(_, e)| e).collect();
        events.sort_by(|a, b| a.receipt.cmp(&b.receipt));
        let count = events.len();
        self.pending.extend(events);
        count
    }
}

#[async_trait]
impl EventSource for InMemoryEventSource {
    async fn receive(&mut self) -> Result<Option<IngestEvent>> {
        let event = self.pending.pop_front();
        if let Some(event) = &event {
            self.in_flight.insert(event.receipt.clone(), event.clone());
        }
        Ok(event)
    }

    async fn acknowledge(&mut self, event: &IngestEvent) -> Result<()> {
        if self.in_flight.remove(&event.receipt).is_none() {
            return Err(IngestionError::Event(format!(
                "unknown receipt {}",
                event.receipt
            )));
        }
        self.acknowledged.push(event.receipt.clone());
        Ok(())
    }
}

/// Consumer-group reader over the Redis ingest stream.
pub struct RedisEventSource {
    queue: IngestQueue,
    consumer: String,
}

impl RedisEventSource {
    pub fn new(queue: IngestQueue, consumer: impl Into<String>) -> Self {
        Self {
            queue,
            consumer: consumer.into(),
        }
    }
}

#[async_trait]
impl EventSource for RedisEventSource {
    async fn receive(&mut self) -> Result<Option<IngestEvent>> {
        let claimed = self.queue.claim_next(&self.consumer).await?;
        Ok(claimed.map(|c| IngestEvent {
            receipt: c.entry_id,
            notification: c.notification,
        }))
    }

    async fn acknowledge(&mut self, event: &IngestEvent) -> Result<()> {
        self.queue.acknowledge(&event.receipt).await?;
        Ok(())
    }
}

/// Turns a notification into a readable byte stream.
pub trait SourceResolver: Send + Sync {
    fn open(&self, notification: &IngestNotification) -> Result<Box<dyn Read + Send>>;
}

/// Sources are local files, relative to `root` unless absolute.
#[derive(Debug, Clone)]
pub struct LocalFileResolver {
    root: PathBuf,
}

impl LocalFileResolver {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl SourceResolver for LocalFileResolver {
    fn open(&self, notification: &IngestNotification) -> Result<Box<dyn Read + Send>> {
        let path = self.root.join(&notification.source);
        let file = std::fs::File::open(&path)?;
        Ok(Box::new(file))
    }
}

/// Sources are objects in a blob store.
pub struct BlobSourceResolver<B> {
    store: B,
}

impl<B: BlobStore> BlobSourceResolver<B> {
    pub fn new(store: B) -> Self {
        Self { store }
    }
}

impl<B: BlobStore> SourceResolver for BlobSourceResolver<B> {
    fn open(&self, notification: &IngestNotification) -> Result<Box<dyn Read + Send>> {
        let bytes = self.store.get(&notification.source)?;
        Ok(Box::new(Cursor::new(bytes)))
    }
}

/// Decode the notified object and build its pyramid.
///
/// The image key falls back to the object name and notification time.
pub fn build_notification(
    builder: &PyramidBuilder,
    resolver: &dyn SourceResolver,
    notification: &IngestNotification,
) -> Result<BuildReport> {
    let key = ImageKey::fallback(&notification.source, notification.event_time)?;
    let mut bytes = Vec::new();
    resolver.open(notification)?.read_to_end(&mut bytes)?;
    let raster = decode_bytes(&bytes)
        .map_err(|e| IngestionError::Decode(format!("{}: {}", notification.source, e)))?;
    let source: Arc<dyn RasterSource> = Arc::new(raster);
    let metadata = serde_json::json!({ "source": notification.source });

    if notification.metadata_only {
        builder.build_metadata_only(&key, source, &PixelCameraModel, metadata)
    } else {
        builder.build(&key, source, &PixelCameraModel, metadata)
    }
}

/// What one poll of the daemon did.
#[derive(Debug)]
pub enum Processed {
    Idle,
    Built(BuildReport),
    Failed { receipt: String, error: String },
}

/// Polls an [`EventSource`] and builds one image at a time.
pub struct IngestDaemon<E> {
    events: E,
    builder: Arc<PyramidBuilder>,
    resolver: Arc<dyn SourceResolver>,
    idle_backoff: Duration,
}

impl<E: EventSource> IngestDaemon<E> {
    pub fn new(events: E, builder: Arc<PyramidBuilder>, resolver: Arc<dyn SourceResolver>) -> Self {
        Self {
            events,
            builder,
            resolver,
            idle_backoff: Duration::from_secs(1),
        }
    }

    pub fn with_idle_backoff(mut self, backoff: Duration) -> Self {
        self.idle_backoff = backoff;
        self
    }

    pub fn events(&self) -> &E {
        &self.events
    }

    pub fn events_mut(&mut self) -> &mut E {
        &mut self.events
    }

    /// Claim and process at most one notification.
    ///
    /// Build failures are logged and reported, never returned; only event
    /// source errors are.
    #[instrument(skip(self))]
    pub async fn run_once(&mut self) -> Result<Processed> {
        let Some(event) = self.events.receive().await? else {
            return Ok(Processed::Idle);
        };
        debug!(receipt = %event.receipt, source = %event.notification.source, "Claimed notification");

        let builder = Arc::clone(&self.builder);
        let resolver = Arc::clone(&self.resolver);
        let notification = event.notification.clone();
        let outcome = tokio::task::spawn_blocking(move || {
            build_notification(&builder, resolver.as_ref(), &notification)
        })
        .await
        .map_err(|e| IngestionError::WorkerPool(format!("build task failed: {}", e)))
        .and_then(|result| result);

        match outcome {
            Ok(report) => {
                self.events.acknowledge(&event).await?;
                counter!("pyramid_ingest_builds_total", "status" => "success").increment(1);
                info!(
                    image = %report.image,
                    source = %event.notification.source,
                    tiles = report.tiles_published(),
                    "Notification processed"
                );
                Ok(Processed::Built(report))
            }
            Err(e) => {
                counter!("pyramid_ingest_builds_total", "status" => "failed").increment(1);
                error!(
                    source = %event.notification.source,
                    receipt = %event.receipt,
                    error = %e,
                    "Build failed; notification left for redelivery"
                );
                Ok(Processed::Failed {
                    receipt: event.receipt,
                    error: e.to_string(),
                })
            }
        }
    }

    /// Process notifications until `shutdown` resolves.
    pub async fn run<F>(&mut self, shutdown: F) -> Result<()>
    where
        F: Future<Output = ()>,
    {
        tokio::pin!(shutdown);
        let backoff = self.idle_backoff;
        info!("Ingest daemon started");

        loop {
            tokio::select! {
                _ = &mut shutdown => {
                    info!("Ingest daemon stopping");
                    return Ok(());
                }
                result = self.run_once() => match result {
                    Ok(Processed::Idle) => tokio::time::sleep(backoff).await,
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "Event source error");
                        tokio::time::sleep(backoff).await;
                    }
                }
            }
        }
    }
}
