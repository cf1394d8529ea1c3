use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransportError {
    /// The gateway no longer knows the connection.
    #[error("connection {connection_id} is gone")]
    Gone { connection_id: String },

    #[error("push to {connection_id} failed: {reason}")]
    Failed {
        connection_id: String,
        reason: String,
    },
}

impl TransportError {
    pub fn connection_id(&self) -> &str {
        match self {
            Self::Gone { connection_id } | Self::Failed { connection_id, .. } => connection_id,
        }
    }

    pub fn is_gone(&self) -> bool {
        matches!(self, Self::Gone { .. })
    }
}

pub type TransportResult<T> = Result<T, TransportError>;
