use async_trait::async_trait;
use thiserror::Error;

use strim_events::{NormalizedEvent, Platform};

/// Failure taxonomy shared by all ingestion adapters.
///
/// `Fatal` stops the adapter permanently (the tenant continues on its other
/// platforms); `Transient` is retried inside the adapter's own backoff budget
/// before it escalates.
#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("fatal adapter failure: {0}")]
    Fatal(String),
    #[error("transient adapter failure: {0}")]
    Transient(String),
}

impl AdapterError {
    pub fn fatal(detail: impl Into<String>) -> Self {
        Self::Fatal(detail.into())
    }

    pub fn transient(detail: impl Into<String>) -> Self {
        Self::Transient(detail.into())
    }

    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal(_))
    }
}

/// Common contract every platform ingestion adapter implements.
///
/// The scheduler drives the adapter from one lifecycle task: `connect` once,
/// then `next_batch` in a loop until a stop signal or a fatal error, then
/// `close`. Dropping an in-flight `next_batch` future (stop raced against a
/// read) must leave the adapter in a state where `close` still cleans up.
#[async_trait]
pub trait IngestAdapter: Send {
    /// Platform this adapter ingests from.
    fn platform(&self) -> Platform;

    /// Tenant that owns this adapter instance.
    fn tenant_id(&self) -> &str;

    /// Establishes the underlying session. Idempotent: calling `connect` on a
    /// connected adapter is a no-op.
    async fn connect(&mut self) -> Result<(), AdapterError>;

    /// Produces the next batch of normalized events, blocking on transport
    /// reads or poll delays. An empty batch is a valid idle signal, not an
    /// error.
    async fn next_batch(&mut self) -> Result<Vec<NormalizedEvent>, AdapterError>;

    /// Closes the underlying transport. Safe to call on a never-connected or
    /// already-closed adapter.
    async fn close(&mut self);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unit_adapter_error_classification() {
        assert!(AdapterError::fatal("quota exhausted").is_fatal());
        assert!(!AdapterError::transient("read timeout").is_fatal());
        let rendered = AdapterError::fatal("unavailable").to_string();
        assert!(rendered.contains("fatal adapter failure"));
    }
}
