//! Responder stage: answers every user-authored message with an assistant
//! reply written back into the same channel.

use std::sync::Arc;

use async_trait::async_trait;
use chatline_types::{ChatEvent, Clock, Role};
use tracing::{debug, info};

use crate::error::{PipelineError, PipelineResult};
use crate::messages::{Appended, ChannelMessages};
use crate::stage::{ProcessingOutcome, Stage};

/// Sender id stamped on assistant replies unless configured otherwise.
pub const DEFAULT_ASSISTANT_SENDER: &str = "assistant-llm";

/// Produces the text of an assistant reply.
#[async_trait]
pub trait ResponseGenerator: Send + Sync {
    async fn generate(&self, prompt: &ChatEvent) -> PipelineResult<String>;
}

/// Replies with `"AI Response to: {content}"`.
#[derive(Clone, Copy, Debug, Default)]
pub struct EchoGenerator;

#[async_trait]
impl ResponseGenerator for EchoGenerator {
    async fn generate(&self, prompt: &ChatEvent) -> PipelineResult<String> {
        Ok(format!("AI Response to: {}", prompt.content))
    }
}

pub struct ResponderStage {
    messages: ChannelMessages,
    generator: Arc<dyn ResponseGenerator>,
    clock: Arc<dyn Clock>,
    sender_id: String,
}

impl ResponderStage {
    pub fn new(
        messages: ChannelMessages,
        generator: Arc<dyn ResponseGenerator>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            messages,
            generator,
            clock,
            sender_id: DEFAULT_ASSISTANT_SENDER.to_string(),
        }
    }

    pub fn with_sender_id(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_id = sender_id.into();
        self
    }

    /// Write the reply to `event`. Returns `None` when the event was not
    /// authored by a user.
    ///
    /// The reply is stamped no earlier than one second after the prompt so
    /// it always sorts after it.
    pub async fn respond(&self, event: &ChatEvent) -> PipelineResult<Option<ChatEvent>> {
        if !event.is_user_authored() {
            debug!(id = %event.id, role = %event.role, "not a user message; no reply");
            return Ok(None);
        }

        let content = self.generator.generate(event).await?;
        let ts = self
            .clock
            .now_secs()
            .max(PipelineError::next_ts(&event.channel_id, event.ts)?);
        let reply = ChatEvent::new(
            ChatEvent::generate_id(),
            &event.channel_id,
            ts,
            &self.sender_id,
            Role::Assistant,
            content,
        );

        let reply = match self.messages.append(reply).await? {
            Appended::Created(reply) | Appended::Existing(reply) => reply,
        };
        info!(
            channel = %event.channel_id,
            prompt = %event.id,
            reply = %reply.id,
            ts = reply.ts,
            "assistant reply written"
        );
        Ok(Some(reply))
    }
}

#[async_trait]
impl Stage for ResponderStage {
    fn name(&self) -> &str {
        "responder"
    }

    async fn process(&self, event: &ChatEvent) -> PipelineResult<ProcessingOutcome> {
        Ok(match self.respond(event).await? {
            Some(_) => ProcessingOutcome::Processed,
            None => ProcessingOutcome::SkippedNotApplicable,
        })
    }
}
