//! Raw-TCP delivery of formatted envelopes.
//!
//! A dedicated worker task exclusively owns the socket; nothing else
//! ever touches it, so writes are never interleaved. Producers hand the
//! worker formatted strings through a bounded drop-oldest queue and are
//! never blocked by a dead endpoint.

use crate::backoff::ExponentialBackoff;
use crate::error::{Result, SinkError};
use crate::format::{FormatterOptions, SplunkJsonFormatter};
use crate::queue::FixedSizeQueue;
use crate::record::LogRecord;
use crate::sink::LogSink;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::{sleep, timeout, Duration};

pub const DEFAULT_MAX_QUEUE_SIZE: usize = 10_000;

const CLOSE_TIMEOUT: Duration = Duration::from_secs(10);

/// Addressing and queue sizing for a [`TcpSink`]. Immutable once built.
#[derive(Debug, Clone)]
pub struct TcpConnectionInfo {
    pub host: String,
    pub port: u16,
    /// Entries queued beyond this limit evict the oldest queued entry.
    pub max_queue_size: usize,
}

impl TcpConnectionInfo {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        TcpConnectionInfo {
            host: host.into(),
            port,
            max_queue_size: DEFAULT_MAX_QUEUE_SIZE,
        }
    }

    pub fn with_max_queue_size(mut self, max_queue_size: usize) -> Self {
        self.max_queue_size = max_queue_size;
        self
    }

    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Invoked on connect and write failures. Purely informational; the
/// writer retries regardless.
pub type FailureHandler = Arc<dyn Fn(&SinkError) + Send + Sync>;

fn default_failure_handler() -> FailureHandler {
    Arc::new(|err| tracing::warn!(error = %err, "tcp delivery failure"))
}

/// Queues strings for a dedicated worker to write to a TCP socket,
/// reconnecting per the backoff policy whenever the session drops.
///
/// While disconnected the worker stops pulling from the queue, so under
/// a long outage the drop-oldest policy sheds the stalest entries.
/// A write that fails keeps its entry and resends it on the next
/// connection: at-least-once, with duplicates possible when a partial
/// write is ambiguous.
pub struct TcpSocketWriter {
    queue: Arc<FixedSizeQueue<String>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl TcpSocketWriter {
    /// Spawn the writer's worker task. Must be called within a tokio
    /// runtime.
    pub fn new(
        info: &TcpConnectionInfo,
        backoff: ExponentialBackoff,
        on_failure: FailureHandler,
    ) -> Self {
        let queue = Arc::new(FixedSizeQueue::new(info.max_queue_size));
        let handle = tokio::spawn(run_worker(
            Arc::clone(&queue),
            info.addr(),
            backoff,
            on_failure,
        ));
        TcpSocketWriter {
            queue,
            worker: Mutex::new(Some(handle)),
        }
    }

    /// Queue one formatted entry. Never blocks; a full queue evicts its
    /// oldest entry and an entry offered after close is discarded.
    pub fn enqueue(&self, entry: String) {
        if !self.queue.push(entry) {
            tracing::debug!("tcp writer closed; entry discarded");
        }
    }

    /// Entries evicted by the drop-oldest policy so far.
    pub fn dropped(&self) -> u64 {
        self.queue.dropped()
    }

    /// Stop intake, drain the queue onto the socket best-effort, and
    /// join the worker within a bounded timeout. Idempotent.
    pub async fn close(&self) {
        self.queue.close();
        let handle = self.worker.lock().await.take();
        if let Some(handle) = handle {
            if timeout(CLOSE_TIMEOUT, handle).await.is_err() {
                tracing::warn!("timed out waiting for tcp writer drain");
            }
        }
    }
}

/// Connect with exponential backoff until a connection lands or the
/// queue is closed. Both the backoff sleep and the retry loop observe
/// shutdown.
async fn connect_with_backoff(
    addr: &str,
    backoff: &mut ExponentialBackoff,
    queue: &FixedSizeQueue<String>,
    on_failure: &FailureHandler,
) -> Option<TcpStream> {
    loop {
        let delay = backoff.next_delay();
        if !delay.is_zero() {
            tokio::select! {
                _ = sleep(delay) => {}
                _ = queue.wait_closed() => return None,
            }
        }
        if queue.is_closed() {
            return None;
        }
        match TcpStream::connect(addr).await {
            Ok(stream) => {
                let _ = stream.set_nodelay(true);
                return Some(stream);
            }
            Err(err) => on_failure(&SinkError::Connect {
                addr: addr.to_string(),
                source: err,
            }),
        }
    }
}

async fn run_worker(
    queue: Arc<FixedSizeQueue<String>>,
    addr: String,
    mut backoff: ExponentialBackoff,
    on_failure: FailureHandler,
) {
    let mut pending: Option<String> = None;

    'connect: loop {
        let Some(mut stream) =
            connect_with_backoff(&addr, &mut backoff, &queue, &on_failure).await
        else {
            break 'connect;
        };
        backoff.reset();

        loop {
            let entry = match pending.take() {
                Some(entry) => entry,
                None => match queue.pop().await {
                    Some(entry) => entry,
                    None => {
                        // Queue closed and fully drained.
                        let _ = stream.shutdown().await;
                        return;
                    }
                },
            };
            if let Err(err) = stream.write_all(entry.as_bytes()).await {
                on_failure(&SinkError::Send {
                    transport: "tcp",
                    message: err.to_string(),
                });
                if queue.is_closed() {
                    // Terminating: drain errors are reported, not
                    // retried. Keep draining what's left.
                    continue;
                }
                // Same entry again after reconnecting: at-least-once.
                pending = Some(entry);
                continue 'connect;
            }
        }
    }

    // Shutdown arrived before a connection was ever established; the
    // queued entries have nowhere to go.
    let mut discarded = if pending.is_some() { 1u64 } else { 0 };
    while queue.try_pop().is_some() {
        discarded += 1;
    }
    if discarded > 0 {
        tracing::warn!(
            discarded,
            "tcp writer closed before connecting; queued entries discarded"
        );
    }
}

/// Sink that formats records into envelopes and streams them over TCP.
/// The newline terminating each envelope is the only framing.
pub struct TcpSink {
    formatter: SplunkJsonFormatter,
    writer: TcpSocketWriter,
}

impl TcpSink {
    pub fn new(info: &TcpConnectionInfo, options: &FormatterOptions) -> Self {
        Self::with_policy(
            info,
            options,
            ExponentialBackoff::default(),
            default_failure_handler(),
        )
    }

    /// Construct with an explicit reconnection policy and failure
    /// callback; tests use this to inject fast backoff and observe
    /// faults deterministically.
    pub fn with_policy(
        info: &TcpConnectionInfo,
        options: &FormatterOptions,
        backoff: ExponentialBackoff,
        on_failure: FailureHandler,
    ) -> Self {
        TcpSink {
            formatter: SplunkJsonFormatter::new(options),
            writer: TcpSocketWriter::new(info, backoff, on_failure),
        }
    }

    pub fn writer(&self) -> &TcpSocketWriter {
        &self.writer
    }
}

#[async_trait]
impl LogSink for TcpSink {
    async fn emit(&self, record: LogRecord) -> Result<()> {
        self.writer.enqueue(self.formatter.format(&record));
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.writer.close().await;
        Ok(())
    }
}
