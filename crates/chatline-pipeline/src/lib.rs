//! Stream pipeline for chatline.
//!
//! Chat events written to the events table show up on its change stream.
//! The [`Dispatcher`] feeds every inserted event through two stages:
//!
//! - [`ResponderStage`] writes an assistant reply to each user message
//! - [`DeliveryStage`] pushes the event to every connection on its channel
//!
//! Upstream delivery is at-least-once. Each stage sits behind its own
//! [`IdempotencyGuard`], so a redelivered record runs each stage at most
//! once within the idempotency window.

pub mod config;
pub mod dispatcher;
pub mod error;
pub mod guard;
pub mod messages;
pub mod record;
pub mod registry;
pub mod runtime;
pub mod stage;
pub mod stages;

#[cfg(test)]
pub(crate) mod testing;

pub use config::{PipelineConfig, TableConfig};
pub use dispatcher::{BatchReport, Dispatcher, RecordDisposition, RecordReport, StageReport};
pub use error::{ConfigError, ConfigResult, DispatchError, PipelineError, PipelineResult};
pub use guard::IdempotencyGuard;
pub use messages::{Appended, ChannelMessages, MAX_TS_ATTEMPTS};
pub use record::{parse_batch, EventName, StreamRecord};
pub use registry::ConnectionRegistry;
pub use runtime::{Pipeline, Repositories};
pub use stage::{ProcessingOutcome, Stage};
pub use stages::{
    DeliveryReport, DeliveryStage, EchoGenerator, ResponderStage, ResponseGenerator,
};
