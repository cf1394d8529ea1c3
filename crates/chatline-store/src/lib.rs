//! Partitioned key-value repository for chatline.
//!
//! Every table the pipeline touches (chat events, connections, idempotency
//! records) is reached through the same [`Repository`] contract, so the
//! pipeline stages never know which backend they run against.
//!
//! # Storage Backends
//!
//! - [`InMemoryRepository`] -- `BTreeMap`-based table for tests and embedding
//! - [`LogRepository`] -- in-memory table made durable by a CRC-framed
//!   mutation log, replayed on open
//!
//! # Design Rules
//!
//! 1. Keys are typed ([`Key`]) and validated against the [`TableSchema`] at
//!    the boundary.
//! 2. `create` never overwrites: collisions come back as
//!    [`CreateOutcome::AlreadyExists`] carrying the stored item.
//! 3. `delete` is idempotent.
//! 4. Backend faults surface as [`StoreError::Storage`] with the original
//!    cause attached; absent keys on read surface as [`StoreError::NotFound`].

pub mod error;
pub mod item;
pub mod log;
pub mod memory;
pub mod schema;
mod table;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use item::{Item, Key, KeyValue};
pub use log::{LogRepository, SyncMode};
pub use memory::InMemoryRepository;
pub use schema::{CreateOutcome, Filter, GetOptions, TableSchema};
pub use traits::Repository;
