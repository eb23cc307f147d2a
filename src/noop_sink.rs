use crate::error::Result;
use crate::record::LogRecord;
use crate::sink::LogSink;
use async_trait::async_trait;

/// A sink that simply drops all records.
///
/// Useful for measuring the overhead of record construction and
/// formatting without any network I/O, and for tests that don't care
/// about delivery.
#[derive(Clone, Default)]
pub struct NoopSink;

#[async_trait]
impl LogSink for NoopSink {
    async fn emit(&self, _record: LogRecord) -> Result<()> {
        Ok(())
    }
}
