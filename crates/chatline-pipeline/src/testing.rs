//! Test doubles shared by the pipeline's unit tests.

use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chatline_store::{
    CreateOutcome, Filter, GetOptions, InMemoryRepository, Item, Key, Repository, StoreError,
    StoreResult, TableSchema,
};

/// Which repository operation should fail.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Fault {
    Create,
    GetList,
    Delete,
}

/// An in-memory table whose operations can be made to fail on demand.
pub(crate) struct FaultyRepository {
    inner: InMemoryRepository,
    create: AtomicBool,
    get_list: AtomicBool,
    delete: AtomicBool,
}

impl FaultyRepository {
    pub(crate) fn new(schema: TableSchema) -> Self {
        Self {
            inner: InMemoryRepository::new(schema),
            create: AtomicBool::new(false),
            get_list: AtomicBool::new(false),
            delete: AtomicBool::new(false),
        }
    }

    pub(crate) fn set_failing(&self, fault: Fault, failing: bool) {
        self.flag(fault).store(failing, Ordering::SeqCst);
    }

    fn flag(&self, fault: Fault) -> &AtomicBool {
        match fault {
            Fault::Create => &self.create,
            Fault::GetList => &self.get_list,
            Fault::Delete => &self.delete,
        }
    }

    fn check(&self, fault: Fault, operation: &'static str) -> StoreResult<()> {
        if self.flag(fault).load(Ordering::SeqCst) {
            return Err(StoreError::storage(
                &self.inner.schema().name,
                operation,
                "injected fault",
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl Repository for FaultyRepository {
    fn schema(&self) -> &TableSchema {
        self.inner.schema()
    }

    async fn create(&self, item: Item) -> StoreResult<CreateOutcome> {
        self.check(Fault::Create, "create")?;
        self.inner.create(item).await
    }

    async fn get_by_key(&self, key: &Key, options: &GetOptions) -> StoreResult<Option<Item>> {
        self.inner.get_by_key(key, options).await
    }

    async fn query(
        &self,
        key: &Key,
        filter: &Filter,
        limit: Option<usize>,
    ) -> StoreResult<Vec<Item>> {
        self.inner.query(key, filter, limit).await
    }

    async fn get_list(&self) -> StoreResult<Vec<Item>> {
        self.check(Fault::GetList, "get_list")?;
        self.inner.get_list().await
    }

    async fn update(&self, params: Item, key: &Key) -> StoreResult<()> {
        self.inner.update(params, key).await
    }

    async fn delete(&self, key: &Key) -> StoreResult<()> {
        self.check(Fault::Delete, "delete")?;
        self.inner.delete(key).await
    }
}
