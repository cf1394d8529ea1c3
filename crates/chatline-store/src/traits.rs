use async_trait::async_trait;

use crate::error::StoreResult;
use crate::item::{Item, Key};
use crate::schema::{CreateOutcome, Filter, GetOptions, TableSchema};

/// Partitioned key-value repository.
///
/// All implementations must satisfy these invariants:
/// - `create` is conditional: it never overwrites an existing primary key,
///   and it refuses a second item with the same idempotency value within a
///   partition. Both cases return [`CreateOutcome::AlreadyExists`].
/// - Key attributes are immutable: `update` ignores them.
/// - `delete` of an absent key succeeds.
/// - Every backend fault is reported as `StoreError::Storage` with the
///   original cause attached.
/// - Implementations are safe to share across tasks; construct once per
///   process and hand out `Arc`s.
#[async_trait]
pub trait Repository: Send + Sync {
    /// The table this repository serves.
    fn schema(&self) -> &TableSchema;

    /// Store a new item, assigning a partition key first when the schema
    /// allows and the item has none.
    async fn create(&self, item: Item) -> StoreResult<CreateOutcome>;

    /// Look up one item.
    ///
    /// A full primary key performs a point lookup. A partition-only key on a
    /// table with a sort key scans the partition in ascending sort order,
    /// applies `options.filter`, and returns the first match.
    ///
    /// Misses return `StoreError::NotFound` unless
    /// `options.raise_not_found` is `false`.
    async fn get_by_key(&self, key: &Key, options: &GetOptions) -> StoreResult<Option<Item>>;

    /// Every item in a partition matching `filter`, ascending by sort key,
    /// truncated to `limit` matches when given.
    async fn query(&self, key: &Key, filter: &Filter, limit: Option<usize>)
        -> StoreResult<Vec<Item>>;

    /// Full-table scan. No ordering or size contract.
    async fn get_list(&self) -> StoreResult<Vec<Item>>;

    /// Set the non-key attributes in `params` on the item at `key`.
    ///
    /// Returns `StoreError::NotFound` if the item does not exist. An update
    /// in which every attribute is a key attribute is a logged no-op.
    async fn update(&self, params: Item, key: &Key) -> StoreResult<()>;

    /// Remove the item at `key`. Absent keys are not an error.
    async fn delete(&self, key: &Key) -> StoreResult<()>;
}
