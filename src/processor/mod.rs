//! Record processors for the producer side.
//!
//! There is exactly one production processor, the JetStream publisher in
//! [`nats`]. The trait exists so the scanner can be exercised against an
//! in-memory queue in tests.

pub mod nats;

use async_trait::async_trait;

use crate::error::QueueResult;
use crate::types::ScannedFile;

/// Sink for scanned-file records.
#[async_trait]
pub trait Processor: Send + Sync {
    /// Durably enqueue one record. On success the record is accepted by the
    /// broker; on failure the caller may retry (the scanner retries on the
    /// next walk by not caching the file).
    async fn process(&self, file: ScannedFile) -> QueueResult<()>;
}
