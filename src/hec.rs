//! Batched delivery to the Splunk HTTP Event Collector.
//!
//! Records are handed to a single background worker over a bounded
//! channel. The worker owns the buffer and flushes it either when a
//! periodic tick fires or when the buffered count reaches the batch
//! size limit, whichever comes first. Because the one worker awaits
//! each flush inline, flushes can never overlap; a tick that falls due
//! during a slow send is skipped, not queued. The channel bound keeps
//! intake capped even while the worker is stuck inside a slow flush,
//! so a stalled endpoint sheds records instead of growing memory.

use crate::client::{DeliveryOutcome, EventCollectorClient, HecTransport};
use crate::error::Result;
use crate::format::{FormatterOptions, SplunkJsonFormatter};
use crate::record::LogRecord;
use crate::sink::LogSink;
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, timeout, Duration, Instant, MissedTickBehavior};

pub const DEFAULT_BATCH_INTERVAL: Duration = Duration::from_secs(5);
pub const DEFAULT_BATCH_SIZE_LIMIT: usize = 100;
pub const DEFAULT_QUEUE_SIZE_LIMIT: usize = 10_000;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Immutable configuration for an [`EventCollectorSink`], fixed at
/// construction.
#[derive(Clone, Debug)]
pub struct EventCollectorConfig {
    /// Collector base URL, e.g. `https://splunk:8088`. A host that
    /// already embeds the collector path is used verbatim.
    pub host: String,
    pub token: String,
    pub batch_interval: Duration,
    pub batch_size_limit: usize,
    /// Undelivered records beyond this limit are dropped (newest
    /// first). The bound applies both to the channel feeding the worker
    /// and to the worker's own retry buffer, so it holds even while a
    /// flush is in flight.
    pub queue_size_limit: usize,
    /// Flush immediately on the first buffered record instead of
    /// waiting out the first full period, cutting cold-start latency.
    pub eager_first_flush: bool,
    pub format: FormatterOptions,
}

impl EventCollectorConfig {
    pub fn new(host: impl Into<String>, token: impl Into<String>) -> Self {
        EventCollectorConfig {
            host: host.into(),
            token: token.into(),
            batch_interval: DEFAULT_BATCH_INTERVAL,
            batch_size_limit: DEFAULT_BATCH_SIZE_LIMIT,
            queue_size_limit: DEFAULT_QUEUE_SIZE_LIMIT,
            eager_first_flush: false,
            format: FormatterOptions::default(),
        }
    }
}

/// Sink that batches records and ships them to the HTTP Event Collector.
///
/// Overflow policy: **drop-newest**. When `queue_size_limit` records
/// are already awaiting delivery an incoming record is discarded,
/// bounding memory without starving partially built batches of their
/// oldest members. Dropped records are counted and surfaced via
/// diagnostics only; `emit` itself never fails and never blocks on the
/// network.
pub struct EventCollectorSink {
    sender: Mutex<Option<mpsc::Sender<LogRecord>>>,
    worker: Mutex<Option<JoinHandle<()>>>,
    queue_size_limit: usize,
    /// Records accepted into the delivery pipeline.
    pub enqueued: Arc<AtomicU64>,
    /// Records shed by the overflow policy or emitted after close.
    pub dropped: Arc<AtomicU64>,
}

impl EventCollectorSink {
    /// Build the sink with a real HTTP client for the configured host.
    ///
    /// Must be called within a tokio runtime; the worker task is spawned
    /// here.
    pub fn new(config: EventCollectorConfig) -> Result<Self> {
        let client = EventCollectorClient::new(&config.host, &config.token)?;
        Ok(Self::with_transport(config, Arc::new(client)))
    }

    /// Build the sink over an arbitrary transport. This is the seam the
    /// tests use to inject fault-scripted deliveries.
    pub fn with_transport(config: EventCollectorConfig, transport: Arc<dyn HecTransport>) -> Self {
        let dropped = Arc::new(AtomicU64::new(0));
        let queue_size_limit = config.queue_size_limit.max(1);
        let (tx, rx) = mpsc::channel(queue_size_limit);

        let worker = Worker {
            buffer: VecDeque::new(),
            formatter: SplunkJsonFormatter::new(&config.format),
            transport,
            batch_size_limit: config.batch_size_limit.max(1),
            queue_size_limit,
            dropped: Arc::clone(&dropped),
        };
        let batch_interval = config.batch_interval.max(Duration::from_millis(10));
        let handle = tokio::spawn(worker.run(rx, batch_interval, config.eager_first_flush));

        EventCollectorSink {
            sender: Mutex::new(Some(tx)),
            worker: Mutex::new(Some(handle)),
            queue_size_limit,
            enqueued: Arc::new(AtomicU64::new(0)),
            dropped,
        }
    }
}

#[async_trait]
impl LogSink for EventCollectorSink {
    async fn emit(&self, record: LogRecord) -> Result<()> {
        let guard = self.sender.lock().await;
        if let Some(sender) = guard.as_ref() {
            match sender.try_send(record) {
                Ok(()) => {
                    self.enqueued.fetch_add(1, Ordering::Relaxed);
                    return Ok(());
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                    tracing::warn!(
                        limit = self.queue_size_limit,
                        "event collector channel full; dropping incoming record"
                    );
                    return Ok(());
                }
                Err(mpsc::error::TrySendError::Closed(_)) => {}
            }
        }
        self.dropped.fetch_add(1, Ordering::Relaxed);
        tracing::debug!("record emitted after close; dropped");
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        // Dropping the sender ends the worker's receive loop, which then
        // drains the channel and performs one final best-effort flush.
        self.sender.lock().await.take();
        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            if timeout(CLOSE_TIMEOUT, handle).await.is_err() {
                tracing::warn!("timed out waiting for final event collector flush");
            }
        }
        Ok(())
    }
}

struct Worker {
    buffer: VecDeque<LogRecord>,
    formatter: SplunkJsonFormatter,
    transport: Arc<dyn HecTransport>,
    batch_size_limit: usize,
    queue_size_limit: usize,
    dropped: Arc<AtomicU64>,
}

impl Worker {
    async fn run(
        mut self,
        mut rx: mpsc::Receiver<LogRecord>,
        batch_interval: Duration,
        eager_first_flush: bool,
    ) {
        let mut eager_pending = eager_first_flush;
        let mut ticker = interval_at(Instant::now() + batch_interval, batch_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                maybe = rx.recv() => match maybe {
                    Some(record) => {
                        self.buffer_record(record);
                        if self.buffer.len() >= self.batch_size_limit
                            || (eager_pending && !self.buffer.is_empty())
                        {
                            eager_pending = false;
                            self.flush().await;
                        }
                    }
                    None => break,
                },
                _ = ticker.tick() => {
                    if !self.buffer.is_empty() {
                        self.flush().await;
                    }
                }
            }
        }

        // Shutdown: pick up whatever is still in the channel, then one
        // final synchronous best-effort flush. Failures are swallowed,
        // the sink is going away.
        while let Ok(record) = rx.try_recv() {
            self.buffer_record(record);
        }
        self.final_flush().await;
    }

    fn buffer_record(&mut self, record: LogRecord) {
        if self.buffer.len() >= self.queue_size_limit {
            self.dropped.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                limit = self.queue_size_limit,
                "event collector buffer full; dropping incoming record"
            );
        } else {
            self.buffer.push_back(record);
        }
    }

    /// Concatenated envelopes, no delimiter: the collector accepts
    /// back-to-back JSON objects, so the stream-framing line breaks are
    /// stripped.
    fn payload_for(&self, batch: &[LogRecord]) -> String {
        let mut payload = String::new();
        for record in batch {
            let envelope = self.formatter.format(record);
            payload.push_str(envelope.trim_end_matches('\n'));
        }
        payload
    }

    async fn flush(&mut self) {
        while !self.buffer.is_empty() {
            let take = self.batch_size_limit.min(self.buffer.len());
            let batch: Vec<LogRecord> = self.buffer.drain(..take).collect();
            let payload = self.payload_for(&batch);
            match self.transport.send(payload).await {
                DeliveryOutcome::Accepted => {}
                DeliveryOutcome::RejectedPermanently(status) => {
                    tracing::warn!(
                        status,
                        discarded = batch.len(),
                        "event collector rejected batch permanently; discarded"
                    );
                }
                DeliveryOutcome::RejectedTransiently(reason) => {
                    tracing::warn!(
                        %reason,
                        requeued = batch.len(),
                        "transient delivery failure; batch requeued for next flush"
                    );
                    // Back to the tail, still bounded by the queue limit
                    // so a persistently failing endpoint sheds load.
                    for record in batch {
                        self.buffer_record(record);
                    }
                    return;
                }
            }
        }
    }

    async fn final_flush(&mut self) {
        while !self.buffer.is_empty() {
            let take = self.batch_size_limit.min(self.buffer.len());
            let batch: Vec<LogRecord> = self.buffer.drain(..take).collect();
            let payload = self.payload_for(&batch);
            let _ = self.transport.send(payload).await;
        }
    }
}
