use crate::error::Result;
use crate::record::LogRecord;
use async_trait::async_trait;

/// The narrow capability every transport implements: accept one record,
/// and shut down.
///
/// `emit` takes ownership of the record; queue-backed sinks hand it to a
/// background worker and return without touching the network, so a dead
/// remote endpoint never blocks the caller. Delivery failures surface as
/// diagnostics, not errors, except on the datagram path where a send
/// falls through to the caller after one reconnect attempt.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Hand one record to the sink for delivery.
    async fn emit(&self, record: LogRecord) -> Result<()>;

    /// Stop accepting records and make a bounded-time, best-effort
    /// attempt to flush what remains. Idempotent; the default is a no-op.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}
