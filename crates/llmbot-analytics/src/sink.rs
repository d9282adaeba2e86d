use async_trait::async_trait;

use crate::error::SinkError;
use crate::record::EventRecord;

/// A durable destination for analytics records.
///
/// A failed write is reported once and never retried by the sink itself.
#[async_trait]
pub trait EventSink: Send + Sync {
    /// Short name used in log lines.
    fn name(&self) -> &'static str;

    async fn write(&self, record: &EventRecord) -> Result<(), SinkError>;
}
