//! Duplicate suppression for stream processing.
//!
//! A guard remembers which event ids a stage has already handled, for a
//! bounded window. Records live in their own table keyed by
//! `"{scope}#{event_id}"` with an `expiration` attribute in unix seconds;
//! an expired record counts as absent.
//!
//! The check and the mark are separate calls, so two concurrent
//! invocations for the same event can both pass the check. Duplicate
//! suppression holds when invocations for one event are serialized.
//!
//! Expired records are not removed on read; [`IdempotencyGuard::purge_expired`]
//! sweeps them out of the table.

use std::sync::Arc;

use chatline_store::{CreateOutcome, GetOptions, Item, Key, Repository, StoreResult};
use chatline_types::Clock;
use tracing::{debug, info};

const EXPIRATION: &str = "expiration";

#[derive(Clone)]
pub struct IdempotencyGuard {
    repo: Arc<dyn Repository>,
    scope: String,
    clock: Arc<dyn Clock>,
}

impl IdempotencyGuard {
    pub fn new(repo: Arc<dyn Repository>, scope: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self {
            repo,
            scope: scope.into(),
            clock,
        }
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    fn record_id(&self, event_id: &str) -> String {
        format!("{}#{}", self.scope, event_id)
    }

    /// Whether `event_id` was marked and the mark has not expired.
    pub async fn already_processed(&self, event_id: &str) -> StoreResult<bool> {
        let key = Key::partition(self.record_id(event_id));
        let Some(record) = self.repo.get_by_key(&key, &GetOptions::optional()).await? else {
            return Ok(false);
        };
        match record.get_i64(EXPIRATION) {
            Some(expiration) => Ok(expiration > self.clock.now_secs()),
            // A record without an expiry never lapses.
            None => Ok(true),
        }
    }

    /// Remember `event_id` for `window_secs` from now. Re-marking an
    /// existing (possibly expired) record refreshes its expiry.
    pub async fn mark_processed(&self, event_id: &str, window_secs: i64) -> StoreResult<()> {
        let id = self.record_id(event_id);
        let expiration = self.clock.now_secs().saturating_add(window_secs);
        let record = Item::new()
            .with(self.repo.schema().partition_key.clone(), id.clone())
            .with(EXPIRATION, expiration);

        match self.repo.create(record).await? {
            CreateOutcome::Created(_) => {}
            CreateOutcome::AlreadyExists(_) => {
                self.repo
                    .update(Item::new().with(EXPIRATION, expiration), &Key::partition(id.clone()))
                    .await?;
            }
        }
        debug!(scope = %self.scope, record = %id, expiration, "event marked processed");
        Ok(())
    }

    /// Delete this scope's records whose expiry has passed. Returns how many
    /// were removed.
    pub async fn purge_expired(&self) -> StoreResult<usize> {
        let now = self.clock.now_secs();
        let prefix = self.record_id("");
        let partition_key = self.repo.schema().partition_key.clone();

        let mut purged = 0;
        for record in self.repo.get_list().await? {
            let Some(id) = record.get_str(&partition_key) else {
                continue;
            };
            if !id.starts_with(&prefix) {
                continue;
            }
            if matches!(record.get_i64(EXPIRATION), Some(expiration) if expiration <= now) {
                self.repo.delete(&Key::partition(id.to_string())).await?;
                purged += 1;
            }
        }
        if purged > 0 {
            info!(scope = %self.scope, purged, "expired idempotency records purged");
        }
        Ok(purged)
    }
}

impl std::fmt::Debug for IdempotencyGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdempotencyGuard")
            .field("scope", &self.scope)
            .field("table", &self.repo.schema().name)
            .finish()
    }
}
