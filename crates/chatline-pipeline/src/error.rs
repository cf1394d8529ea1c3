use std::path::PathBuf;

use chatline_store::StoreError;
use chatline_types::DecodeError;
use thiserror::Error;

use crate::dispatcher::BatchReport;

/// Errors raised while a stage processes one event.
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("response generation failed: {0}")]
    Generator(String),

    #[error("payload encoding failed: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("stored event is unreadable: {0}")]
    Decode(#[from] DecodeError),

    /// Every candidate timestamp in the channel was already taken.
    #[error("no free timestamp in channel {channel} after {attempts} attempts")]
    TimestampExhausted { channel: String, attempts: u32 },

    /// Moving past `ts` would leave the representable calendar range.
    #[error("timestamp {ts} in channel {channel} has no successor")]
    TimestampOutOfRange { channel: String, ts: i64 },

    #[error("invalid message: {0}")]
    InvalidMessage(String),
}

impl PipelineError {
    pub fn generator(message: impl Into<String>) -> Self {
        Self::Generator(message.into())
    }

    /// The second after `ts`, or [`Self::TimestampOutOfRange`] when there is
    /// none a calendar date can be derived for.
    pub(crate) fn next_ts(channel: &str, ts: i64) -> PipelineResult<i64> {
        ts.checked_add(1)
            .filter(|next| chatline_types::is_representable(*next))
            .ok_or_else(|| Self::TimestampOutOfRange {
                channel: channel.to_string(),
                ts,
            })
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors that make a whole batch unprocessable.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// The batch envelope itself could not be read.
    #[error("malformed batch: {0}")]
    MalformedBatch(#[from] DecodeError),

    /// A stage failed; the batch must be redelivered. The report covers
    /// every record up to and including the failing one.
    #[error("record {record} failed in stage '{stage}': {reason}")]
    StageFailed {
        record: usize,
        stage: String,
        reason: String,
        report: BatchReport,
    },
}

impl DispatchError {
    /// The partial report, when stages ran before the failure.
    pub fn report(&self) -> Option<&BatchReport> {
        match self {
            Self::StageFailed { report, .. } => Some(report),
            Self::MalformedBatch(_) => None,
        }
    }
}

/// Errors loading or validating [`PipelineConfig`](crate::PipelineConfig).
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("invalid config: {0}")]
    Invalid(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;
