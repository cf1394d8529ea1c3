//! Process-level wiring: repositories are built once and shared by `Arc`.

use std::sync::Arc;

use chatline_gateway::Transport;
use chatline_store::{InMemoryRepository, LogRepository, Repository, StoreResult, TableSchema};
use chatline_types::Clock;
use tracing::info;

use crate::config::PipelineConfig;
use crate::dispatcher::Dispatcher;
use crate::guard::IdempotencyGuard;
use crate::messages::ChannelMessages;
use crate::registry::ConnectionRegistry;
use crate::stages::{DeliveryStage, ResponderStage, ResponseGenerator};

/// The four tables the pipeline uses.
#[derive(Clone)]
pub struct Repositories {
    pub events: Arc<dyn Repository>,
    pub connections: Arc<dyn Repository>,
    pub responder_idempotency: Arc<dyn Repository>,
    pub delivery_idempotency: Arc<dyn Repository>,
    /// The same tables again when they are log-backed; empty otherwise.
    pub logs: Vec<Arc<LogRepository>>,
}

impl Repositories {
    pub fn in_memory(config: &PipelineConfig) -> Self {
        let open = |schema: TableSchema| -> Arc<dyn Repository> {
            Arc::new(InMemoryRepository::new(schema))
        };
        Self {
            events: open(config.events_schema()),
            connections: open(config.connections_schema()),
            responder_idempotency: open(config.responder_idempotency_schema()),
            delivery_idempotency: open(config.delivery_idempotency_schema()),
            logs: Vec::new(),
        }
    }

    /// Open (or create) one log file per table under `config.data_dir`.
    pub fn open_logs(config: &PipelineConfig) -> StoreResult<Self> {
        let open = |schema: TableSchema| -> StoreResult<Arc<LogRepository>> {
            let path = config.data_dir.join(format!("{}.log", schema.name));
            Ok(Arc::new(LogRepository::open(&path, schema)?))
        };
        let events = open(config.events_schema())?;
        let connections = open(config.connections_schema())?;
        let responder_idempotency = open(config.responder_idempotency_schema())?;
        let delivery_idempotency = open(config.delivery_idempotency_schema())?;
        let repos = Self {
            logs: vec![
                Arc::clone(&events),
                Arc::clone(&connections),
                Arc::clone(&responder_idempotency),
                Arc::clone(&delivery_idempotency),
            ],
            events,
            connections,
            responder_idempotency,
            delivery_idempotency,
        };
        info!(data_dir = %config.data_dir.display(), "tables opened");
        Ok(repos)
    }

    /// Rewrite every log-backed table down to its live items.
    pub fn compact(&self) -> StoreResult<()> {
        for log in &self.logs {
            log.compact()?;
        }
        Ok(())
    }
}

/// A ready-to-run pipeline: write path, registry, and dispatcher sharing
/// the same repositories.
pub struct Pipeline {
    pub messages: ChannelMessages,
    pub registry: ConnectionRegistry,
    pub dispatcher: Dispatcher,
}

impl Pipeline {
    /// Wire the responder and delivery stages, in that order.
    pub fn build(
        config: &PipelineConfig,
        repos: &Repositories,
        transport: Arc<dyn Transport>,
        generator: Arc<dyn ResponseGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let messages = ChannelMessages::new(Arc::clone(&repos.events), Arc::clone(&clock));
        let registry = ConnectionRegistry::new(Arc::clone(&repos.connections), Arc::clone(&clock));

        let responder = ResponderStage::new(messages.clone(), generator, Arc::clone(&clock))
            .with_sender_id(&config.assistant_sender_id);
        let delivery = DeliveryStage::new(registry.clone(), transport, config.delivery_concurrency);

        let dispatcher = Dispatcher::new(config.idempotency_window_secs)
            .with_stage(
                responder,
                IdempotencyGuard::new(
                    Arc::clone(&repos.responder_idempotency),
                    "responder",
                    Arc::clone(&clock),
                ),
            )
            .with_stage(
                delivery,
                IdempotencyGuard::new(
                    Arc::clone(&repos.delivery_idempotency),
                    "delivery",
                    clock,
                ),
            );

        Self {
            messages,
            registry,
            dispatcher,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chatline_gateway::InMemoryTransport;
    use chatline_types::{ManualClock, NewMessage};

    use crate::stages::EchoGenerator;

    #[tokio::test]
    async fn log_tables_persist_between_pipelines() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            data_dir: dir.path().join("data"),
            ..Default::default()
        };
        let clock = Arc::new(ManualClock::new(100));

        {
            let repos = Repositories::open_logs(&config).unwrap();
            let pipeline = Pipeline::build(
                &config,
                &repos,
                Arc::new(InMemoryTransport::new()),
                Arc::new(EchoGenerator),
                clock.clone(),
            );
            pipeline
                .messages
                .send("c1", NewMessage::user("m1", "u1", "hi"))
                .await
                .unwrap();
            pipeline.registry.add("conn-1", Some("c1")).await.unwrap();
        }

        assert!(dir.path().join("data/chat_events.log").exists());
        let repos = Repositories::open_logs(&config).unwrap();
        let pipeline = Pipeline::build(
            &config,
            &repos,
            Arc::new(InMemoryTransport::new()),
            Arc::new(EchoGenerator),
            clock,
        );
        assert_eq!(pipeline.messages.list("c1").await.unwrap().len(), 1);
        assert_eq!(
            pipeline.registry.connections_for_channel("c1").await.unwrap(),
            ["conn-1"]
        );
        assert_eq!(pipeline.dispatcher.stage_names(), ["responder", "delivery"]);
    }

    #[tokio::test]
    async fn purge_then_compact_shrinks_idempotency_logs() {
        let dir = tempfile::tempdir().unwrap();
        let config = PipelineConfig {
            data_dir: dir.path().to_path_buf(),
            idempotency_window_secs: 60,
            ..Default::default()
        };
        let clock = Arc::new(ManualClock::new(1_000));
        let repos = Repositories::open_logs(&config).unwrap();
        let pipeline = Pipeline::build(
            &config,
            &repos,
            Arc::new(InMemoryTransport::new()),
            Arc::new(EchoGenerator),
            clock.clone(),
        );
        let event = chatline_types::ChatEvent::new(
            "m1",
            "c1",
            1_000,
            "u1",
            chatline_types::Role::User,
            "hi",
        );
        let record = crate::record::StreamRecord::insert(&event).unwrap().to_json();
        pipeline.dispatcher.dispatch(&[record]).await.unwrap();

        let log = dir.path().join("chat_delivery_idempotency.log");
        let before = std::fs::metadata(&log).unwrap().len();
        assert!(before > 0);

        clock.advance(61);
        assert_eq!(pipeline.dispatcher.purge_expired().await.unwrap(), 2);
        repos.compact().unwrap();
        assert_eq!(std::fs::metadata(&log).unwrap().len(), 0);
        assert!(repos.delivery_idempotency.get_list().await.unwrap().is_empty());

        assert!(Repositories::in_memory(&config).compact().is_ok());
    }
}
