//! Delivery stage: pushes each event to every connection on its channel.
//!
//! Pushes run concurrently, bounded by a semaphore. Connections the gateway
//! reports as gone are removed from the registry once the fan-out is done;
//! other push failures are recorded and the connection is kept.

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chatline_gateway::{Transport, TransportError};
use chatline_types::ChatEvent;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

use crate::error::PipelineResult;
use crate::registry::ConnectionRegistry;
use crate::stage::{ProcessingOutcome, Stage};

/// Per-connection results of one fan-out. Each list is sorted.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: Vec<String>,
    /// Connections reported gone; removed from the registry.
    pub gone: Vec<String>,
    /// Connections whose push failed for another reason; kept.
    pub failed: Vec<String>,
}

pub struct DeliveryStage {
    registry: ConnectionRegistry,
    transport: Arc<dyn Transport>,
    concurrency: usize,
}

impl DeliveryStage {
    pub fn new(registry: ConnectionRegistry, transport: Arc<dyn Transport>, concurrency: usize) -> Self {
        Self {
            registry,
            transport,
            concurrency: concurrency.max(1),
        }
    }

    /// Push `event` to its channel's connections and prune the gone ones.
    ///
    /// Fails only when the connection list cannot be read.
    pub async fn deliver(&self, event: &ChatEvent) -> PipelineResult<DeliveryReport> {
        let payload = Bytes::from(event.to_wire().to_bytes()?);
        let targets = self.registry.connections_for_channel(&event.channel_id).await?;

        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let mut pushes = JoinSet::new();
        for connection_id in targets {
            let transport = Arc::clone(&self.transport);
            let semaphore = Arc::clone(&semaphore);
            let payload = payload.clone();
            pushes.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                let result = transport.push(&connection_id, payload).await;
                (connection_id, result)
            });
        }

        let mut report = DeliveryReport::default();
        while let Some(joined) = pushes.join_next().await {
            match joined {
                Ok((connection_id, Ok(()))) => report.delivered.push(connection_id),
                Ok((connection_id, Err(TransportError::Gone { .. }))) => {
                    debug!(connection = %connection_id, "connection gone");
                    report.gone.push(connection_id);
                }
                Ok((connection_id, Err(e))) => {
                    warn!(connection = %connection_id, error = %e, "push failed; keeping connection");
                    report.failed.push(connection_id);
                }
                Err(e) => error!(error = %e, "push task aborted"),
            }
        }

        for connection_id in &report.gone {
            if let Err(e) = self.registry.remove(connection_id).await {
                warn!(connection = %connection_id, error = %e, "could not remove gone connection");
            }
        }

        report.delivered.sort();
        report.gone.sort();
        report.failed.sort();
        info!(
            channel = %event.channel_id,
            id = %event.id,
            delivered = report.delivered.len(),
            gone = report.gone.len(),
            failed = report.failed.len(),
            "event delivered"
        );
        Ok(report)
    }
}

#[async_trait]
impl Stage for DeliveryStage {
    fn name(&self) -> &str {
        "delivery"
    }

    async fn process(&self, event: &ChatEvent) -> PipelineResult<ProcessingOutcome> {
        self.deliver(event).await?;
        Ok(ProcessingOutcome::Processed)
    }
}
