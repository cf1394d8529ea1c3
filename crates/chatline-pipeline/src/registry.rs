use std::sync::Arc;

use chatline_store::{CreateOutcome, Item, Key, Repository, StoreError, StoreResult};
use chatline_types::{Clock, Connection};
use tracing::{debug, info, warn};

const CHANNEL_ID: &str = "channelId";

/// Repository-backed list of live connections.
///
/// This is only a reference list: the transport handles live in the
/// gateway. Delivery reaches a connection only once it is associated with
/// a channel.
#[derive(Clone)]
pub struct ConnectionRegistry {
    repo: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
}

impl ConnectionRegistry {
    pub fn new(repo: Arc<dyn Repository>, clock: Arc<dyn Clock>) -> Self {
        Self { repo, clock }
    }

    /// Record a new connection. Adding an id that is already present keeps
    /// the stored record, joining it to `channel` when one is given.
    pub async fn add(&self, connection_id: &str, channel: Option<&str>) -> StoreResult<Connection> {
        let mut connection = Connection::new(connection_id, self.clock.now_secs());
        if let Some(channel) = channel {
            connection = connection.in_channel(channel);
        }
        let item = Item::from_serialize(&connection)
            .map_err(|e| StoreError::storage(&self.repo.schema().name, "add", e))?;

        match self.repo.create(item).await? {
            CreateOutcome::Created(_) => {
                info!(connection = connection_id, channel = ?channel, "connection added");
                Ok(connection)
            }
            CreateOutcome::AlreadyExists(existing) => {
                debug!(connection = connection_id, "connection already registered");
                let mut stored = self.decode(existing).unwrap_or(connection);
                if let Some(channel) = channel {
                    self.join(connection_id, channel).await?;
                    stored.channel_id = Some(channel.to_string());
                }
                Ok(stored)
            }
        }
    }

    /// Forget a connection. Removing an unknown id is not an error.
    pub async fn remove(&self, connection_id: &str) -> StoreResult<()> {
        self.repo.delete(&Key::partition(connection_id)).await?;
        debug!(connection = connection_id, "connection removed");
        Ok(())
    }

    /// Associate an existing connection with `channel`.
    pub async fn join(&self, connection_id: &str, channel: &str) -> StoreResult<()> {
        self.repo
            .update(Item::new().with(CHANNEL_ID, channel), &Key::partition(connection_id))
            .await?;
        info!(connection = connection_id, channel, "connection joined channel");
        Ok(())
    }

    pub async fn list(&self) -> StoreResult<Vec<Connection>> {
        let items = self.repo.get_list().await?;
        Ok(items.into_iter().filter_map(|item| self.decode(item)).collect())
    }

    /// Ids of every registered connection.
    pub async fn list_connections(&self) -> StoreResult<Vec<String>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .map(|c| c.connection_id)
            .collect())
    }

    /// Ids of the connections that receive events for `channel`.
    pub async fn connections_for_channel(&self, channel: &str) -> StoreResult<Vec<String>> {
        Ok(self
            .list()
            .await?
            .into_iter()
            .filter(|c| c.subscribes_to(channel))
            .map(|c| c.connection_id)
            .collect())
    }

    fn decode(&self, item: Item) -> Option<Connection> {
        match item.to_typed::<Connection>() {
            Ok(connection) => Some(connection),
            Err(e) => {
                warn!(table = %self.repo.schema().name, error = %e, "skipping unreadable connection record");
                None
            }
        }
    }
}
