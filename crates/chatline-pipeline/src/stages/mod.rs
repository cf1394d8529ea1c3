//! Built-in pipeline stages.

pub mod delivery;
pub mod responder;

pub use delivery::{DeliveryReport, DeliveryStage};
pub use responder::{EchoGenerator, ResponderStage, ResponseGenerator};
