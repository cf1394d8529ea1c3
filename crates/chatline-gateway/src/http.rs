//! Gateway management API client.
//!
//! Pushes are `POST {endpoint}/@connections/{connection_id}` with the raw
//! payload as the body. The connection id is percent-encoded as a single
//! path segment. The gateway answers `410 Gone` for connections it no
//! longer holds.

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{Client, StatusCode, Url};
use tracing::{debug, warn};

use crate::error::{TransportError, TransportResult};
use crate::transport::Transport;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// [`Transport`] over the gateway's HTTP management API.
#[derive(Debug, Clone)]
pub struct HttpGatewayTransport {
    client: Client,
    endpoint: Url,
}

impl HttpGatewayTransport {
    pub fn new(endpoint: &str) -> TransportResult<Self> {
        Self::with_timeout(endpoint, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(endpoint: &str, timeout: Duration) -> TransportResult<Self> {
        let invalid = |reason: String| TransportError::Failed {
            connection_id: String::new(),
            reason,
        };
        let endpoint = Url::parse(endpoint.trim_end_matches('/'))
            .map_err(|e| invalid(format!("invalid gateway endpoint {endpoint:?}: {e}")))?;
        if endpoint.cannot_be_a_base() {
            return Err(invalid(format!("gateway endpoint {endpoint} has no path")));
        }
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| invalid(format!("building HTTP client: {e}")))?;
        Ok(Self { client, endpoint })
    }

    pub fn endpoint(&self) -> &str {
        self.endpoint.as_str().trim_end_matches('/')
    }

    fn connection_url(&self, connection_id: &str) -> TransportResult<Url> {
        let mut url = self.endpoint.clone();
        url.path_segments_mut()
            .map_err(|()| TransportError::Failed {
                connection_id: connection_id.to_string(),
                reason: format!("gateway endpoint {} has no path", self.endpoint),
            })?
            .pop_if_empty()
            .push("@connections")
            .push(connection_id);
        Ok(url)
    }
}

#[async_trait]
impl Transport for HttpGatewayTransport {
    async fn push(&self, connection_id: &str, payload: Bytes) -> TransportResult<()> {
        let resp = self
            .client
            .post(self.connection_url(connection_id)?)
            .body(payload)
            .send()
            .await
            .map_err(|e| TransportError::Failed {
                connection_id: connection_id.to_string(),
                reason: e.to_string(),
            })?;

        let status = resp.status();
        if status.is_success() {
            debug!(connection = connection_id, %status, "pushed");
            return Ok(());
        }
        if status == StatusCode::GONE {
            return Err(TransportError::Gone {
                connection_id: connection_id.to_string(),
            });
        }

        let text = resp.text().await.unwrap_or_default();
        warn!(connection = connection_id, %status, body = %text, "gateway rejected push");
        Err(TransportError::Failed {
            connection_id: connection_id.to_string(),
            reason: format!("gateway returned {status}"),
        })
    }
}
