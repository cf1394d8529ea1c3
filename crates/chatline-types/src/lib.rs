//! Foundation types for chatline.
//!
//! Every other chatline crate depends on `chatline-types`.
//!
//! # Key Types
//!
//! - [`ChatEvent`] -- one immutable message in a channel
//! - [`Role`] -- who authored a message (user, assistant, system)
//! - [`NewMessage`] -- a client-supplied write request
//! - [`WirePayload`] -- the JSON envelope pushed to subscribers
//! - [`Connection`] -- a live subscriber handle
//! - [`Clock`] -- injectable wall clock in unix seconds

pub mod connection;
pub mod error;
pub mod event;
pub mod time;

pub use connection::Connection;
pub use error::DecodeError;
pub use event::{ChatEvent, NewMessage, Role, WirePayload, DEFAULT_CONTENT_TYPE};
pub use time::{is_representable, iso8601, max_timestamp, Clock, ManualClock, SystemClock};
