use std::error::Error as StdError;

/// Errors from repository operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The backend failed. Carries the original cause; callers treat this
    /// as retryable.
    #[error("storage error on table '{table}' during {operation}: {source}")]
    Storage {
        table: String,
        operation: &'static str,
        #[source]
        source: Box<dyn StdError + Send + Sync>,
    },

    /// The requested key is absent.
    #[error("object {key} was not found in table '{table}'")]
    NotFound { table: String, key: String },

    /// A key is missing, has the wrong shape, or does not fit the schema.
    #[error("invalid key: {0}")]
    InvalidKey(String),
}

impl StoreError {
    pub fn storage(
        table: impl Into<String>,
        operation: &'static str,
        source: impl Into<Box<dyn StdError + Send + Sync>>,
    ) -> Self {
        Self::Storage {
            table: table.into(),
            operation,
            source: source.into(),
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

/// Result alias for repository operations.
pub type StoreResult<T> = Result<T, StoreError>;
