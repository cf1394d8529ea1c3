use std::collections::{HashMap, HashSet};
use std::sync::RwLock;

use async_trait::async_trait;
use bytes::Bytes;
use tracing::debug;

use crate::error::{TransportError, TransportResult};
use crate::transport::Transport;

/// In-memory transport that records every push per connection.
///
/// Connections can be marked gone or failing to simulate gateway errors.
#[derive(Debug, Default)]
pub struct InMemoryTransport {
    inboxes: RwLock<HashMap<String, Vec<Bytes>>>,
    gone: RwLock<HashSet<String>>,
    failing: RwLock<HashSet<String>>,
}

impl InMemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `connection_id` as gone on every later push.
    pub fn mark_gone(&self, connection_id: impl Into<String>) {
        self.gone
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(connection_id.into());
    }

    /// Fail every later push to `connection_id` with a non-gone error.
    pub fn mark_failing(&self, connection_id: impl Into<String>) {
        self.failing
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .insert(connection_id.into());
    }

    /// Payloads received by `connection_id`, in push order.
    pub fn received(&self, connection_id: &str) -> Vec<Bytes> {
        self.inboxes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .get(connection_id)
            .cloned()
            .unwrap_or_default()
    }

    /// Total number of successful pushes.
    pub fn push_count(&self) -> usize {
        self.inboxes
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .values()
            .map(Vec::len)
            .sum()
    }
}

#[async_trait]
impl Transport for InMemoryTransport {
    async fn push(&self, connection_id: &str, payload: Bytes) -> TransportResult<()> {
        if self
            .gone
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(connection_id)
        {
            return Err(TransportError::Gone {
                connection_id: connection_id.to_string(),
            });
        }
        if self
            .failing
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .contains(connection_id)
        {
            return Err(TransportError::Failed {
                connection_id: connection_id.to_string(),
                reason: "simulated failure".into(),
            });
        }

        debug!(connection = connection_id, bytes = payload.len(), "push recorded");
        self.inboxes
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .entry(connection_id.to_string())
            .or_default()
            .push(payload);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn records_pushes_in_order() {
        let transport = InMemoryTransport::new();
        transport.push("a", Bytes::from_static(b"1")).await.unwrap();
        transport.push("a", Bytes::from_static(b"2")).await.unwrap();
        transport.push("b", Bytes::from_static(b"3")).await.unwrap();

        assert_eq!(
            transport.received("a"),
            vec![Bytes::from_static(b"1"), Bytes::from_static(b"2")]
        );
        assert_eq!(transport.push_count(), 3);
        assert!(transport.received("zzz").is_empty());
    }

    #[tokio::test]
    async fn simulated_errors() {
        let transport = InMemoryTransport::new();
        transport.mark_gone("g");
        transport.mark_failing("f");

        let gone = transport.push("g", Bytes::new()).await.unwrap_err();
        assert!(gone.is_gone());
        assert_eq!(gone.connection_id(), "g");

        let failed = transport.push("f", Bytes::new()).await.unwrap_err();
        assert!(matches!(failed, TransportError::Failed { .. }));
        assert_eq!(transport.push_count(), 0);
    }
}
