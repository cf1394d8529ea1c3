//! Table state shared by the in-memory and log-structured backends.

use std::collections::BTreeMap;

use tracing::warn;

use crate::error::{StoreError, StoreResult};
use crate::item::{Item, Key, KeyValue};
use crate::schema::{Filter, GetOptions, TableSchema};

type Partition = BTreeMap<Option<KeyValue>, Item>;

/// Decision reached by [`Table::prepare_create`] before anything is written.
pub(crate) enum PreparedCreate {
    Insert(Key, Item),
    Existing(Item),
}

/// A partitioned table: partition value -> sort value -> item.
///
/// Hash-only tables store each item under a `None` sort value.
pub(crate) struct Table {
    schema: TableSchema,
    partitions: BTreeMap<KeyValue, Partition>,
}

impl Table {
    pub(crate) fn new(schema: TableSchema) -> Self {
        Self {
            schema,
            partitions: BTreeMap::new(),
        }
    }

    pub(crate) fn schema(&self) -> &TableSchema {
        &self.schema
    }

    pub(crate) fn len(&self) -> usize {
        self.partitions.values().map(BTreeMap::len).sum()
    }

    /// Assign a key if allowed, then check the primary key and idempotency
    /// value for collisions.
    pub(crate) fn prepare_create(&self, mut item: Item) -> StoreResult<PreparedCreate> {
        if self.schema.key_auto_assign && !item.contains(&self.schema.partition_key) {
            item.insert(
                self.schema.partition_key.clone(),
                uuid::Uuid::new_v4().to_string(),
            );
        }
        let key = self.schema.key_of(&item)?;

        if let Some(existing) = self.get(&key) {
            return Ok(PreparedCreate::Existing(existing.clone()));
        }

        if let Some(attribute) = &self.schema.idempotency_key {
            if let Some(value) = item.get(attribute).filter(|v| !v.is_null()) {
                let duplicate = self.partitions.get(&key.partition).and_then(|partition| {
                    partition
                        .values()
                        .find(|stored| stored.get(attribute) == Some(value))
                });
                if let Some(existing) = duplicate {
                    return Ok(PreparedCreate::Existing(existing.clone()));
                }
            }
        }

        Ok(PreparedCreate::Insert(key, item))
    }

    pub(crate) fn put(&mut self, key: Key, item: Item) {
        self.partitions
            .entry(key.partition)
            .or_default()
            .insert(key.sort, item);
    }

    pub(crate) fn get(&self, key: &Key) -> Option<&Item> {
        self.partitions.get(&key.partition)?.get(&key.sort)
    }

    pub(crate) fn lookup(&self, key: &Key, options: &GetOptions) -> StoreResult<Option<Item>> {
        self.schema.validate_key(key)?;

        let found = if self.schema.is_full_key(key) {
            self.get(key)
                .filter(|item| options.filter.matches(item))
                .cloned()
        } else {
            self.scan(key, &options.filter, options.limit)
                .into_iter()
                .next()
        };

        match found {
            Some(item) => Ok(Some(item)),
            None if options.raise_not_found => Err(self.not_found(key)),
            None => Ok(None),
        }
    }

    /// Partition scan in ascending sort order. A key with a sort value
    /// narrows the scan to that single item.
    pub(crate) fn scan(&self, key: &Key, filter: &Filter, limit: Option<usize>) -> Vec<Item> {
        let Some(partition) = self.partitions.get(&key.partition) else {
            return Vec::new();
        };
        let matches = partition
            .iter()
            .filter(|(sort, _)| key.sort.is_none() || **sort == key.sort)
            .map(|(_, item)| item)
            .filter(|item| filter.matches(item))
            .cloned();
        match limit {
            Some(limit) => matches.take(limit).collect(),
            None => matches.collect(),
        }
    }

    pub(crate) fn list(&self) -> Vec<Item> {
        self.partitions
            .values()
            .flat_map(BTreeMap::values)
            .cloned()
            .collect()
    }

    /// Merge `params` into the stored item, skipping key attributes.
    ///
    /// Returns `Ok(None)` when nothing is left to update.
    pub(crate) fn prepare_update(&self, key: &Key, params: &Item) -> StoreResult<Option<Item>> {
        self.schema.validate_key(key)?;
        if !self.schema.is_full_key(key) {
            return Err(StoreError::InvalidKey(format!(
                "update on table '{}' needs the full primary key",
                self.schema.name
            )));
        }

        let changes: Vec<(&String, &serde_json::Value)> = params
            .iter()
            .filter(|(name, _)| !self.schema.is_key_attribute(name))
            .collect();
        if changes.is_empty() {
            warn!(table = %self.schema.name, %key, "no fields to update (all fields are key attributes)");
            return Ok(None);
        }

        let mut merged = self.get(key).cloned().ok_or_else(|| self.not_found(key))?;
        for (name, value) in changes {
            merged.insert(name.clone(), value.clone());
        }
        Ok(Some(merged))
    }

    pub(crate) fn remove(&mut self, key: &Key) -> Option<Item> {
        let partition = self.partitions.get_mut(&key.partition)?;
        let removed = partition.remove(&key.sort);
        if partition.is_empty() {
            self.partitions.remove(&key.partition);
        }
        removed
    }

    pub(crate) fn not_found(&self, key: &Key) -> StoreError {
        StoreError::NotFound {
            table: self.schema.name.clone(),
            key: key.to_string(),
        }
    }
}
