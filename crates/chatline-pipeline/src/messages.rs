//! Write and read paths for channel messages.

use std::sync::Arc;

use chatline_store::{CreateOutcome, Filter, Item, Key, Repository};
use chatline_types::{ChatEvent, Clock, NewMessage};
use tracing::{debug, info, warn};

use crate::error::{PipelineError, PipelineResult};

/// How many consecutive timestamps `append` tries before giving up.
pub const MAX_TS_ATTEMPTS: u32 = 8;

/// Result of appending an event to its channel.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Appended {
    Created(ChatEvent),
    /// An event with the same id was already stored; it is returned as is.
    Existing(ChatEvent),
}

impl Appended {
    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }

    pub fn event(&self) -> &ChatEvent {
        match self {
            Self::Created(event) | Self::Existing(event) => event,
        }
    }

    pub fn into_event(self) -> ChatEvent {
        match self {
            Self::Created(event) | Self::Existing(event) => event,
        }
    }
}

/// Channel message service over the events table.
#[derive(Clone)]
pub struct ChannelMessages {
    repo: Arc<dyn Repository>,
    clock: Arc<dyn Clock>,
}

impl ChannelMessages {
    pub fn new(repo: Arc<dyn Repository>, clock: Arc<dyn Clock>) -> Self {
        Self { repo, clock }
    }

    /// Store a client message in `channel`, stamped with the current time.
    ///
    /// Idempotent on `message.id`: repeating a send returns the event stored
    /// by the first one.
    pub async fn send(&self, channel: &str, message: NewMessage) -> PipelineResult<ChatEvent> {
        if channel.trim().is_empty() {
            return Err(PipelineError::InvalidMessage("channel must not be empty".into()));
        }
        if message.id.trim().is_empty() {
            return Err(PipelineError::InvalidMessage("id must not be empty".into()));
        }
        if message.sender_id.trim().is_empty() {
            return Err(PipelineError::InvalidMessage("senderId must not be empty".into()));
        }

        let event = message.into_event(channel, self.clock.now_secs());
        let appended = self.append(event).await?;
        if appended.is_created() {
            info!(channel, id = %appended.event().id, ts = appended.event().ts, "message stored");
        } else {
            debug!(channel, id = %appended.event().id, "duplicate send; returning stored message");
        }
        Ok(appended.into_event())
    }

    /// Every event in `channel`, oldest first.
    pub async fn list(&self, channel: &str) -> PipelineResult<Vec<ChatEvent>> {
        let items = self
            .repo
            .query(&Key::partition(channel), &Filter::new(), None)
            .await?;
        Ok(items
            .into_iter()
            .filter_map(|item| match ChatEvent::try_from(item.into_map()) {
                Ok(event) => Some(event),
                Err(e) => {
                    warn!(channel, error = %e, "skipping unreadable stored event");
                    None
                }
            })
            .collect())
    }

    /// Insert `event`, moving it to the next free timestamp when another
    /// event already holds `(channel_id, ts)`.
    pub async fn append(&self, event: ChatEvent) -> PipelineResult<Appended> {
        if !chatline_types::is_representable(event.ts) {
            return Err(PipelineError::TimestampOutOfRange {
                channel: event.channel_id,
                ts: event.ts,
            });
        }
        let mut event = event;
        for attempt in 1..=MAX_TS_ATTEMPTS {
            let item = Item::from_serialize(&event)?;
            match self.repo.create(item).await? {
                CreateOutcome::Created(_) => return Ok(Appended::Created(event)),
                CreateOutcome::AlreadyExists(stored) => {
                    let stored = ChatEvent::try_from(stored.into_map())?;
                    if stored.id == event.id {
                        return Ok(Appended::Existing(stored));
                    }
                    debug!(
                        channel = %event.channel_id,
                        ts = event.ts,
                        holder = %stored.id,
                        attempt,
                        "timestamp taken; moving to the next second"
                    );
                    let next = PipelineError::next_ts(&event.channel_id, event.ts)?;
                    event = event.with_ts(next);
                }
            }
        }
        Err(PipelineError::TimestampExhausted {
            channel: event.channel_id,
            attempts: MAX_TS_ATTEMPTS,
        })
    }
}
