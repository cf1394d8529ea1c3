//! Push transport for chatline.
//!
//! A [`Transport`] sends one payload to one live connection. The gateway
//! reports unreachable connections as [`TransportError::Gone`] so callers can
//! prune them.

pub mod error;
pub mod http;
pub mod memory;
pub mod transport;

pub use error::{TransportError, TransportResult};
pub use http::HttpGatewayTransport;
pub use memory::InMemoryTransport;
pub use transport::Transport;
