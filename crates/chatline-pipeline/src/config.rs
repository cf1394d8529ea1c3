use std::path::{Path, PathBuf};

use chatline_store::TableSchema;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, ConfigResult};

/// Key layout of one table.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableConfig {
    pub name: String,
    pub partition_key: String,
    #[serde(default)]
    pub sort_key: Option<String>,
    #[serde(default)]
    pub idempotency_key: Option<String>,
}

impl TableConfig {
    pub fn new(name: impl Into<String>, partition_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partition_key: partition_key.into(),
            sort_key: None,
            idempotency_key: None,
        }
    }

    pub fn schema(&self) -> TableSchema {
        let mut schema = TableSchema::new(&self.name, &self.partition_key);
        if let Some(sort_key) = &self.sort_key {
            schema = schema.with_sort_key(sort_key);
        }
        if let Some(attribute) = &self.idempotency_key {
            schema = schema.with_idempotency_key(attribute);
        }
        schema
    }
}

/// Configuration for the delivery pipeline and its tables.
///
/// Every field has a default, so a config file only needs to name what it
/// changes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub events_table: TableConfig,
    pub connections_table: TableConfig,
    pub responder_idempotency_table: String,
    pub delivery_idempotency_table: String,
    /// How long a processed event id is remembered.
    pub idempotency_window_secs: i64,
    /// Base URL of the gateway management API. Without one, pushes go to an
    /// in-memory transport.
    pub gateway_endpoint: Option<String>,
    /// Maximum concurrent pushes per delivered event.
    pub delivery_concurrency: usize,
    pub assistant_sender_id: String,
    /// Directory for the log-structured table files.
    pub data_dir: PathBuf,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            events_table: TableConfig {
                name: "chat_events".into(),
                partition_key: "channelId".into(),
                sort_key: Some("ts".into()),
                idempotency_key: Some("id".into()),
            },
            connections_table: TableConfig::new("connections", "connectionId"),
            responder_idempotency_table: "chat_agent_idempotency".into(),
            delivery_idempotency_table: "chat_delivery_idempotency".into(),
            idempotency_window_secs: 3600,
            gateway_endpoint: None,
            delivery_concurrency: 16,
            assistant_sender_id: "assistant-llm".into(),
            data_dir: PathBuf::from("./data"),
        }
    }
}

impl PipelineConfig {
    pub fn from_toml_str(input: &str) -> ConfigResult<Self> {
        let config: Self = toml::from_str(input)?;
        config.validate()?;
        Ok(config)
    }

    /// Read and validate a TOML config file.
    pub fn load(path: &Path) -> ConfigResult<Self> {
        let input = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&input)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        let tables = [
            ("events_table", &self.events_table.name),
            ("connections_table", &self.connections_table.name),
            ("responder_idempotency_table", &self.responder_idempotency_table),
            ("delivery_idempotency_table", &self.delivery_idempotency_table),
        ];
        for (field, name) in tables {
            if name.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("{field} must not be empty")));
            }
        }
        if self.events_table.sort_key.is_none() {
            return Err(ConfigError::Invalid(
                "events_table needs a sort key to order messages".into(),
            ));
        }
        if self.idempotency_window_secs <= 0 {
            return Err(ConfigError::Invalid(
                "idempotency_window_secs must be positive".into(),
            ));
        }
        if self.delivery_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "delivery_concurrency must be positive".into(),
            ));
        }
        Ok(())
    }

    pub fn events_schema(&self) -> TableSchema {
        self.events_table.schema()
    }

    pub fn connections_schema(&self) -> TableSchema {
        self.connections_table.schema()
    }

    pub fn responder_idempotency_schema(&self) -> TableSchema {
        idempotency_schema(&self.responder_idempotency_table)
    }

    pub fn delivery_idempotency_schema(&self) -> TableSchema {
        idempotency_schema(&self.delivery_idempotency_table)
    }
}

fn idempotency_schema(name: &str) -> TableSchema {
    TableSchema::new(name, "id")
}
