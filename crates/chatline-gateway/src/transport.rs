use async_trait::async_trait;
use bytes::Bytes;

use crate::error::TransportResult;

/// Delivers payloads to live connections.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Push one payload to one connection.
    async fn push(&self, connection_id: &str, payload: Bytes) -> TransportResult<()>;
}
