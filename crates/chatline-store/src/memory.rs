use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use tracing::debug;

use crate::error::{StoreError, StoreResult};
use crate::item::{Item, Key};
use crate::schema::{CreateOutcome, Filter, GetOptions, TableSchema};
use crate::table::{PreparedCreate, Table};
use crate::traits::Repository;

/// In-memory, `BTreeMap`-based repository.
///
/// Intended for tests and embedding. The table lives behind a `RwLock`;
/// items are cloned on read and write. Conditional creates are atomic
/// because the collision check and the insert happen under one write lock.
pub struct InMemoryRepository {
    schema: TableSchema,
    table: RwLock<Table>,
}

impl InMemoryRepository {
    pub fn new(schema: TableSchema) -> Self {
        Self {
            table: RwLock::new(Table::new(schema.clone())),
            schema,
        }
    }

    /// Number of items currently stored.
    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.read("len")?.len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    fn read(&self, operation: &'static str) -> StoreResult<RwLockReadGuard<'_, Table>> {
        self.table
            .read()
            .map_err(|e| StoreError::storage(&self.schema.name, operation, e.to_string()))
    }

    fn write(&self, operation: &'static str) -> StoreResult<RwLockWriteGuard<'_, Table>> {
        self.table
            .write()
            .map_err(|e| StoreError::storage(&self.schema.name, operation, e.to_string()))
    }
}

#[async_trait]
impl Repository for InMemoryRepository {
    fn schema(&self) -> &TableSchema {
        &self.schema
    }

    async fn create(&self, item: Item) -> StoreResult<CreateOutcome> {
        let mut table = self.write("create")?;
        match table.prepare_create(item)? {
            PreparedCreate::Insert(key, item) => {
                debug!(table = %self.schema.name, %key, "item created");
                table.put(key, item.clone());
                Ok(CreateOutcome::Created(item))
            }
            PreparedCreate::Existing(existing) => Ok(CreateOutcome::AlreadyExists(existing)),
        }
    }

    async fn get_by_key(&self, key: &Key, options: &GetOptions) -> StoreResult<Option<Item>> {
        self.read("get_by_key")?.lookup(key, options)
    }

    async fn query(
        &self,
        key: &Key,
        filter: &Filter,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Item>> {
        self.schema.validate_key(key)?;
        Ok(self.read("query")?.scan(key, filter, limit))
    }

    async fn get_list(&self) -> StoreResult<Vec<Item>> {
        Ok(self.read("get_list")?.list())
    }

    async fn update(&self, params: Item, key: &Key) -> StoreResult<()> {
        let mut table = self.write("update")?;
        if let Some(merged) = table.prepare_update(key, &params)? {
            table.put(key.clone(), merged);
        }
        Ok(())
    }

    async fn delete(&self, key: &Key) -> StoreResult<()> {
        self.schema.validate_key(key)?;
        if self.write("delete")?.remove(key).is_some() {
            debug!(table = %self.schema.name, %key, "item deleted");
        }
        Ok(())
    }
}

impl std::fmt::Debug for InMemoryRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryRepository")
            .field("table", &self.schema.name)
            .field("item_count", &self.len().unwrap_or_default())
            .finish()
    }
}
