use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{StoreError, StoreResult};
use crate::item::{Item, Key, KeyValue};

/// Shape of one table: its name, key attributes, and create behaviour.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct TableSchema {
    pub name: String,
    pub partition_key: String,
    #[serde(default)]
    pub sort_key: Option<String>,
    /// Attribute that must be unique within a partition. `create` refuses a
    /// second item carrying the same value.
    #[serde(default)]
    pub idempotency_key: Option<String>,
    /// Assign a random partition key when `create` receives an item
    /// without one.
    #[serde(default)]
    pub key_auto_assign: bool,
}

impl TableSchema {
    pub fn new(name: impl Into<String>, partition_key: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            partition_key: partition_key.into(),
            sort_key: None,
            idempotency_key: None,
            key_auto_assign: false,
        }
    }

    pub fn with_sort_key(mut self, sort_key: impl Into<String>) -> Self {
        self.sort_key = Some(sort_key.into());
        self
    }

    pub fn with_idempotency_key(mut self, attribute: impl Into<String>) -> Self {
        self.idempotency_key = Some(attribute.into());
        self
    }

    pub fn with_key_auto_assign(mut self, enabled: bool) -> Self {
        self.key_auto_assign = enabled;
        self
    }

    pub fn is_key_attribute(&self, name: &str) -> bool {
        name == self.partition_key || self.sort_key.as_deref() == Some(name)
    }

    /// Whether `key` names exactly one item (as opposed to a partition).
    pub fn is_full_key(&self, key: &Key) -> bool {
        self.sort_key.is_none() || key.sort.is_some()
    }

    /// Reject keys that carry a sort value the table does not have.
    pub fn validate_key(&self, key: &Key) -> StoreResult<()> {
        if key.sort.is_some() && self.sort_key.is_none() {
            return Err(StoreError::InvalidKey(format!(
                "table '{}' has no sort key but one was supplied",
                self.name
            )));
        }
        Ok(())
    }

    /// Extract the full primary key of an item.
    pub fn key_of(&self, item: &Item) -> StoreResult<Key> {
        let partition = self.key_attribute(item, &self.partition_key)?;
        let sort = match &self.sort_key {
            Some(name) => Some(self.key_attribute(item, name)?),
            None => None,
        };
        Ok(Key { partition, sort })
    }

    fn key_attribute(&self, item: &Item, name: &str) -> StoreResult<KeyValue> {
        let value = item.get(name).filter(|v| !v.is_null()).ok_or_else(|| {
            StoreError::InvalidKey(format!(
                "missing key attribute '{name}' for table '{}'",
                self.name
            ))
        })?;
        KeyValue::from_json(value).ok_or_else(|| {
            StoreError::InvalidKey(format!(
                "key attribute '{name}' must be a string or integer, got {value}"
            ))
        })
    }
}

/// Equality predicates applied to items after the key lookup.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Filter(Vec<(String, Value)>);

impl Filter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn eq(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.push((name.into(), value.into()));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn matches(&self, item: &Item) -> bool {
        self.0
            .iter()
            .all(|(name, value)| item.get(name) == Some(value))
    }
}

/// Options for [`Repository::get_by_key`](crate::Repository::get_by_key).
#[derive(Clone, Debug)]
pub struct GetOptions {
    /// Return `StoreError::NotFound` instead of `Ok(None)` on a miss.
    pub raise_not_found: bool,
    pub filter: Filter,
    /// Maximum number of matches considered by a partition scan.
    pub limit: Option<usize>,
}

impl Default for GetOptions {
    fn default() -> Self {
        Self {
            raise_not_found: true,
            filter: Filter::new(),
            limit: Some(1),
        }
    }
}

impl GetOptions {
    /// Misses come back as `Ok(None)`.
    pub fn optional() -> Self {
        Self {
            raise_not_found: false,
            ..Self::default()
        }
    }

    pub fn with_filter(mut self, filter: Filter) -> Self {
        self.filter = filter;
        self
    }

    pub fn with_limit(mut self, limit: Option<usize>) -> Self {
        self.limit = limit;
        self
    }
}

/// Result of a conditional create.
#[derive(Clone, Debug, PartialEq)]
pub enum CreateOutcome {
    /// The item was written; carries the stored form (with any assigned key).
    Created(Item),
    /// An item with the same primary key or idempotency value was already
    /// stored; carries that item untouched.
    AlreadyExists(Item),
}

impl CreateOutcome {
    pub fn is_created(&self) -> bool {
        matches!(self, Self::Created(_))
    }

    pub fn item(&self) -> &Item {
        match self {
            Self::Created(item) | Self::AlreadyExists(item) => item,
        }
    }

    pub fn into_item(self) -> Item {
        match self {
            Self::Created(item) | Self::AlreadyExists(item) => item,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn events_schema() -> TableSchema {
        TableSchema::new("chat_events", "channelId")
            .with_sort_key("ts")
            .with_idempotency_key("id")
    }

    #[test]
    fn key_of_extracts_partition_and_sort() {
        let item = Item::new().with("channelId", "c1").with("ts", 100);
        assert_eq!(events_schema().key_of(&item).unwrap(), Key::new("c1", 100));
    }

    #[test]
    fn key_of_requires_sort_key() {
        let item = Item::new().with("channelId", "c1");
        assert!(matches!(
            events_schema().key_of(&item),
            Err(StoreError::InvalidKey(_))
        ));
    }

    #[test]
    fn key_of_rejects_float_key() {
        let item = Item::new().with("channelId", "c1").with("ts", 1.5);
        assert!(events_schema().key_of(&item).is_err());
    }

    #[test]
    fn validate_rejects_sort_on_hash_only_table() {
        let schema = TableSchema::new("connections", "connectionId");
        assert!(schema.validate_key(&Key::new("a", 1)).is_err());
        assert!(schema.validate_key(&Key::partition("a")).is_ok());
        assert!(schema.is_full_key(&Key::partition("a")));
    }

    #[test]
    fn filter_matches_all_predicates() {
        let item = Item::new().with("id", "m1").with("role", "user");
        assert!(Filter::new().matches(&item));
        assert!(Filter::new().eq("id", "m1").eq("role", "user").matches(&item));
        assert!(!Filter::new().eq("id", "m1").eq("role", "assistant").matches(&item));
        assert!(!Filter::new().eq("missing", 1).matches(&item));
    }

    #[test]
    fn default_get_options_raise_and_take_one() {
        let options = GetOptions::default();
        assert!(options.raise_not_found);
        assert_eq!(options.limit, Some(1));
        assert!(!GetOptions::optional().raise_not_found);
    }
}
