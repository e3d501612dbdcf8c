//! Segment sink - responsibility and behavior
//!
//! Takes already-transformed analytics messages and forwards them to the
//! Segment batch API from a background worker, so the sync loop never waits
//! on analytics network I/O.
//!
//! Key responsibilities:
//! - Validate messages at enqueue time and reject bad input immediately.
//! - Hand accepted messages to the worker over a bounded mpsc channel.
//! - Batch messages, flushing when `batch_size` is reached or every
//! `flush_interval_ms`, whichever comes first.
//! - Drain and flush everything buffered when closed.
//!
//! Transmission failures are logged and counted. There is no retry: the
//! cursor has already moved past those entries, so a failed batch is lost
//! for this run.

// Local crates
use crate::{
    helpers::load_config::SegmentConfig,
    metrics::metrics,
    sink::{
        analytics::{AnalyticsSink, DeliveryStats},
        models::{Batch, Envelope, Identify, LibraryContext, MAX_BATCH_BYTES, Message, SinkError, Track},
        transport::{BatchTransport, HttpBatchTransport},
    },
};

// External crates
use chrono::Utc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::instrument;

type Sealed = (Envelope, usize);

/// Segment sink
///
/// Owns the background worker delivering batches. Enqueueing waits only for
/// room in the handoff channel, never for the network.
#[derive(Debug)]
pub struct SegmentSink {
    sender: Option<mpsc::Sender<Sealed>>,
    shutdown_tx: Option<oneshot::Sender<()>>,
    worker_handle: Option<JoinHandle<DeliveryStats>>,
    library: LibraryContext,
}

impl SegmentSink {
    /// Create a sink delivering to the Segment HTTP API.
    pub fn new(config: &SegmentConfig) -> Result<Self, SinkError> {
        let transport = HttpBatchTransport::new(config)?;
        Ok(Self::with_transport(config, transport))
    }

    /// Create a sink with a custom transport, spawning the background worker.
    #[instrument(
        name = "thorax_sink::create",
        target = "sink::segment::SegmentSink",
        skip_all,
        level = "debug"
    )]
    pub fn with_transport<T>(config: &SegmentConfig, transport: T) -> Self
    where
        T: BatchTransport + Send + Sync + 'static,
    {
        let batch_size = config.batch_size.max(1);
        let flush_interval = Duration::from_millis(config.flush_interval_ms.max(1));

        tracing::debug!(
            batch_size,
            flush_interval = ?flush_interval,
            "Spawning Segment sink worker"
        );
        let (tx, rx) = mpsc::channel(batch_size);
        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let handle = tokio::spawn(run_worker(
            transport,
            batch_size,
            flush_interval,
            rx,
            shutdown_rx,
        ));

        Self {
            sender: Some(tx),
            shutdown_tx: Some(shutdown_tx),
            worker_handle: Some(handle),
            library: LibraryContext::default(),
        }
    }

    async fn enqueue(&self, message: Message) -> Result<(), SinkError> {
        let sender = self.sender.as_ref().ok_or(SinkError::Closed)?;
        let sealed = Envelope::seal(message, &self.library)?;
        sender.send(sealed).await.map_err(|_| SinkError::Closed)
    }
}

impl AnalyticsSink for SegmentSink {
    async fn track(&self, track: Track) -> Result<(), SinkError> {
        self.enqueue(Message::Track(track)).await
    }

    async fn identify(&self, identify: Identify) -> Result<(), SinkError> {
        self.enqueue(Message::Identify(identify)).await
    }

    /// Stop accepting messages, then wait for the worker to flush everything
    /// it still holds.
    #[instrument(
        name = "thorax_sink::close",
        target = "sink::segment::SegmentSink",
        skip_all,
        level = "debug"
    )]
    async fn close(&mut self) -> DeliveryStats {
        tracing::debug!("Closing Segment sink");
        drop(self.sender.take());
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }

        let stats = match self.worker_handle.take() {
            Some(handle) => match handle.await {
                Ok(stats) => stats,
                Err(e) => {
                    tracing::error!(error = %e, "Segment sink worker terminated abnormally");
                    DeliveryStats::default()
                }
            },
            None => DeliveryStats::default(),
        };

        tracing::info!(
            delivered = stats.delivered,
            failed = stats.failed,
            batches = stats.batches,
            "Segment sink closed"
        );
        stats
    }
}

/// Background worker loop, owns the pending batch.
async fn run_worker<T: BatchTransport>(
    transport: T,
    batch_size: usize,
    flush_interval: Duration,
    mut rx: mpsc::Receiver<Sealed>,
    mut shutdown_rx: oneshot::Receiver<()>,
) -> DeliveryStats {
    let mut pending: Vec<Sealed> = Vec::with_capacity(batch_size);
    let mut stats = DeliveryStats::default();
    let mut ticker = tokio::time::interval(flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            maybe_message = rx.recv() => {
                match maybe_message {
                    Some(sealed) => {
                        pending.push(sealed);
                        if pending.len() >= batch_size {
                            flush(&transport, &mut pending, &mut stats).await;
                        }
                    }
                    None => {
                        tracing::debug!("Segment sink channel closed, flushing remaining messages");
                        flush(&transport, &mut pending, &mut stats).await;
                        return stats;
                    }
                }
            }

            _ = ticker.tick() => {
                if !pending.is_empty() {
                    flush(&transport, &mut pending, &mut stats).await;
                }
            }

            // A dropped sink resolves this too, which also drains
            _ = &mut shutdown_rx => {
                tracing::debug!("Shutdown received by Segment sink worker, draining channel");
                while let Ok(sealed) = rx.try_recv() {
                    pending.push(sealed);
                    if pending.len() >= batch_size {
                        flush(&transport, &mut pending, &mut stats).await;
                    }
                }
                flush(&transport, &mut pending, &mut stats).await;
                return stats;
            }
        }
    }
}

async fn flush<T: BatchTransport>(
    transport: &T,
    pending: &mut Vec<Sealed>,
    stats: &mut DeliveryStats,
) {
    if pending.is_empty() {
        return;
    }

    for chunk in split_by_size(std::mem::take(pending), MAX_BATCH_BYTES) {
        let count = chunk.len() as u64;
        let batch = Batch {
            batch: chunk,
            sent_at: Utc::now(),
        };

        stats.batches += 1;
        match transport.send_batch(&batch).await {
            Ok(()) => {
                stats.delivered += count;
                metrics::EVENTS_DELIVERED.inc_by(count as f64);
                tracing::debug!(messages = count, "Analytics batch delivered");
            }
            Err(e) => {
                stats.failed += count;
                metrics::EVENTS_DELIVERY_FAILED.inc_by(count as f64);
                tracing::error!(error = %e, messages = count, "Failed to deliver analytics batch");
            }
        }
    }
}

/// Split sealed messages into request bodies no larger than `limit` bytes.
fn split_by_size(messages: Vec<Sealed>, limit: usize) -> Vec<Vec<Envelope>> {
    // Envelope overhead of the batch body itself
    const BODY_OVERHEAD: usize = 64;

    let mut chunks = Vec::new();
    let mut current = Vec::new();
    let mut current_size = BODY_OVERHEAD;

    for (envelope, size) in messages {
        if !current.is_empty() && current_size + size + 1 > limit {
            chunks.push(std::mem::take(&mut current));
            current_size = BODY_OVERHEAD;
        }
        current_size += size + 1;
        current.push(envelope);
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}
