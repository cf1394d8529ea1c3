//! Log-structured repository.
//!
//! The table is held in memory and made durable by an append-only mutation
//! log. On-disk frame format:
//!
//! ```text
//! [4 bytes: payload length (little-endian u32)]
//! [4 bytes: CRC32 of payload (little-endian u32)]
//! [N bytes: payload (JSON-encoded Mutation)]
//! ```
//!
//! Opening a log replays every valid frame. Frames that fail the CRC check
//! are skipped; a truncated tail ends recovery and is cut off before new
//! frames are appended.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::item::{Item, Key};
use crate::schema::{CreateOutcome, Filter, GetOptions, TableSchema};
use crate::table::{PreparedCreate, Table};
use crate::traits::Repository;

/// Header size: 4 bytes length + 4 bytes CRC.
const HEADER_SIZE: usize = 8;

/// Flush/sync strategy for the log.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum SyncMode {
    /// `fsync` after every mutation.
    EveryWrite,
    /// Flush to the OS after every mutation and let it decide when to sync.
    #[default]
    OsDefault,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "lowercase")]
enum Mutation {
    Put { key: Key, item: Item },
    Delete { key: Key },
}

/// Durable repository backed by a CRC-framed mutation log.
pub struct LogRepository {
    schema: TableSchema,
    path: PathBuf,
    sync_mode: SyncMode,
    table: RwLock<Table>,
    writer: Mutex<BufWriter<File>>,
}

impl LogRepository {
    /// Open (or create) the log at `path` and replay it.
    pub fn open(path: &Path, schema: TableSchema) -> StoreResult<Self> {
        Self::open_with(path, schema, SyncMode::default())
    }

    pub fn open_with(path: &Path, schema: TableSchema, sync_mode: SyncMode) -> StoreResult<Self> {
        let io_err = |e: io::Error| StoreError::storage(&schema.name, "open", e);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        let file = OpenOptions::new()
            .create(true)
            .read(true)
            .append(true)
            .open(path)
            .map_err(io_err)?;

        let mut table = Table::new(schema.clone());
        let (mutations, valid_end) = recover(path).map_err(io_err)?;
        let file_len = file.metadata().map_err(io_err)?.len();
        if file_len > valid_end {
            warn!(
                table = %schema.name,
                valid_end,
                discarded = file_len - valid_end,
                "truncating torn log tail"
            );
            file.set_len(valid_end).map_err(io_err)?;
        }
        let replayed = mutations.len();
        for mutation in mutations {
            match mutation {
                Mutation::Put { key, item } => table.put(key, item),
                Mutation::Delete { key } => {
                    table.remove(&key);
                }
            }
        }

        info!(table = %schema.name, path = %path.display(), replayed, items = table.len(), "log repository opened");

        Ok(Self {
            schema,
            path: path.to_path_buf(),
            sync_mode,
            table: RwLock::new(table),
            writer: Mutex::new(BufWriter::new(file)),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of live items.
    pub fn len(&self) -> StoreResult<usize> {
        Ok(self.read("len")?.len())
    }

    pub fn is_empty(&self) -> StoreResult<bool> {
        Ok(self.len()? == 0)
    }

    /// Rewrite the log as one `put` per live item, dropping history.
    ///
    /// The new log is written to a temporary file in the same directory and
    /// renamed over the old one.
    pub fn compact(&self) -> StoreResult<()> {
        let table = self.read("compact")?;
        let mut writer = self.lock_writer("compact")?;
        let io_err = |e: io::Error| StoreError::storage(&self.schema.name, "compact", e);

        let dir = self.path.parent().unwrap_or_else(|| Path::new("."));
        let mut tmp = tempfile::NamedTempFile::new_in(dir).map_err(io_err)?;
        {
            let mut out = BufWriter::new(tmp.as_file_mut());
            for item in table.list() {
                let key = self.schema.key_of(&item)?;
                write_frame(&mut out, &encode(&self.schema, &Mutation::Put { key, item })?)
                    .map_err(io_err)?;
            }
            out.flush().map_err(io_err)?;
        }
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&self.path)
            .map_err(|e| StoreError::storage(&self.schema.name, "compact", e.error))?;

        let file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(io_err)?;
        *writer = BufWriter::new(file);

        debug!(table = %self.schema.name, items = table.len(), "log compacted");
        Ok(())
    }

    fn append(&self, mutation: &Mutation, operation: &'static str) -> StoreResult<()> {
        let payload = encode(&self.schema, mutation)?;
        let mut writer = self.lock_writer(operation)?;
        let io_err = |e: io::Error| StoreError::storage(&self.schema.name, operation, e);

        write_frame(&mut *writer, &payload).map_err(io_err)?;
        writer.flush().map_err(io_err)?;
        if self.sync_mode == SyncMode::EveryWrite {
            writer.get_ref().sync_all().map_err(io_err)?;
        }
        Ok(())
    }

    fn lock_writer(
        &self,
        operation: &'static str,
    ) -> StoreResult<std::sync::MutexGuard<'_, BufWriter<File>>> {
        self.writer
            .lock()
            .map_err(|e| StoreError::storage(&self.schema.name, operation, e.to_string()))
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

fn encode(schema: &TableSchema, mutation: &Mutation) -> StoreResult<Vec<u8>> {
    serde_json::to_vec(mutation).map_err(|e| StoreError::storage(&schema.name, "encode", e))
}

fn write_frame(out: &mut impl Write, payload: &[u8]) -> io::Result<()> {
    let length = u32::try_from(payload.len())
        .map_err(|_| io::Error::new(io::ErrorKind::InvalidInput, "log frame too large"))?;
    out.write_all(&length.to_le_bytes())?;
    out.write_all(&crc32fast::hash(payload).to_le_bytes())?;
    out.write_all(payload)
}

/// Read every valid mutation from the log, front to back.
///
/// Also returns the offset just past the last complete frame; anything
/// after it is a torn write.
fn recover(path: &Path) -> io::Result<(Vec<Mutation>, u64)> {
    let mut data = Vec::new();
    BufReader::new(File::open(path)?).read_to_end(&mut data)?;

    let mut mutations = Vec::new();
    let mut offset = 0usize;
    let mut valid_end = 0usize;
    while offset + HEADER_SIZE <= data.len() {
        let header = &data[offset..offset + HEADER_SIZE];
        let length = u32::from_le_bytes([header[0], header[1], header[2], header[3]]) as usize;
        let expected_crc = u32::from_le_bytes([header[4], header[5], header[6], header[7]]);

        let start = offset + HEADER_SIZE;
        if length == 0 || start + length > data.len() {
            warn!(offset, length, "truncated log frame; stopping recovery");
            break;
        }
        let payload = &data[start..start + length];
        offset = start + length;
        valid_end = offset;

        let actual_crc = crc32fast::hash(payload);
        if actual_crc != expected_crc {
            warn!(offset, expected = expected_crc, actual = actual_crc, "CRC mismatch; skipping frame");
            continue;
        }
        match serde_json::from_slice::<Mutation>(payload) {
            Ok(mutation) => mutations.push(mutation),
            Err(e) => warn!(offset, error = %e, "undecodable log frame; skipping"),
        }
    }
    Ok((mutations, valid_end as u64))
}

#[async_trait]
impl Repository for LogRepository {
    fn schema(&self) -> &TableSchema {
        &self.schema
    }

    async fn create(&self, item: Item) -> StoreResult<CreateOutcome> {
        let mut table = self.write("create")?;
        match table.prepare_create(item)? {
            PreparedCreate::Insert(key, item) => {
                let mutation = Mutation::Put {
                    key: key.clone(),
                    item: item.clone(),
                };
                self.append(&mutation, "create")?;
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
            self.append(
                &Mutation::Put {
                    key: key.clone(),
                    item: merged.clone(),
                },
                "update",
            )?;
            table.put(key.clone(), merged);
        }
        Ok(())
    }

    async fn delete(&self, key: &Key) -> StoreResult<()> {
        self.schema.validate_key(key)?;
        let mut table = self.write("delete")?;
        if table.get(key).is_none() {
            return Ok(());
        }
        self.append(&Mutation::Delete { key: key.clone() }, "delete")?;
        table.remove(key);
        Ok(())
    }
}

impl std::fmt::Debug for LogRepository {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogRepository")
            .field("table", &self.schema.name)
            .field("path", &self.path)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::{Seek, SeekFrom};

    fn schema() -> TableSchema {
        TableSchema::new("connections", "connectionId")
    }

    fn conn(id: &str) -> Item {
        Item::new().with("connectionId", id).with("connectedAt", 1)
    }

    #[tokio::test]
    async fn survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connections.log");
        {
            let repo = LogRepository::open(&path, schema()).unwrap();
            repo.create(conn("a")).await.unwrap();
            repo.create(conn("b")).await.unwrap();
            repo.update(Item::new().with("channelId", "c1"), &Key::partition("a"))
                .await
                .unwrap();
            repo.delete(&Key::partition("b")).await.unwrap();
        }

        let repo = LogRepository::open(&path, schema()).unwrap();
        assert_eq!(repo.len().unwrap(), 1);
        let a = repo
            .get_by_key(&Key::partition("a"), &GetOptions::default())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(a.get_str("channelId"), Some("c1"));
    }

    #[tokio::test]
    async fn existing_item_is_not_logged_again() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connections.log");
        let repo = LogRepository::open(&path, schema()).unwrap();
        repo.create(conn("a")).await.unwrap();
        let size = fs::metadata(&path).unwrap().len();

        let outcome = repo.create(conn("a")).await.unwrap();
        assert!(!outcome.is_created());
        repo.delete(&Key::partition("missing")).await.unwrap();
        assert_eq!(fs::metadata(&path).unwrap().len(), size);
    }

    #[tokio::test]
    async fn corrupt_frame_is_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connections.log");
        {
            let repo = LogRepository::open(&path, schema()).unwrap();
            repo.create(conn("a")).await.unwrap();
            repo.create(conn("b")).await.unwrap();
        }
        {
            let mut file = OpenOptions::new().read(true).write(true).open(&path).unwrap();
            file.seek(SeekFrom::Start(HEADER_SIZE as u64)).unwrap();
            let mut byte = [0u8; 1];
            file.read_exact(&mut byte).unwrap();
            byte[0] ^= 0xFF;
            file.seek(SeekFrom::Start(HEADER_SIZE as u64)).unwrap();
            file.write_all(&byte).unwrap();
        }

        let repo = LogRepository::open(&path, schema()).unwrap();
        let ids: Vec<String> = repo
            .get_list()
            .await
            .unwrap()
            .iter()
            .filter_map(|i| i.get_str("connectionId").map(String::from))
            .collect();
        assert_eq!(ids, ["b"]);
    }

    #[tokio::test]
    async fn truncated_tail_stops_recovery() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connections.log");
        {
            let repo = LogRepository::open(&path, schema()).unwrap();
            repo.create(conn("a")).await.unwrap();
            repo.create(conn("b")).await.unwrap();
        }
        let len = fs::metadata(&path).unwrap().len();
        OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(len - 3)
            .unwrap();

        let repo = LogRepository::open(&path, schema()).unwrap();
        assert_eq!(repo.len().unwrap(), 1);
    }

    #[tokio::test]
    async fn writes_after_torn_tail_survive_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connections.log");
        {
            let repo = LogRepository::open(&path, schema()).unwrap();
            repo.create(conn("a")).await.unwrap();
            repo.create(conn("b")).await.unwrap();
        }
        let len = fs::metadata(&path).unwrap().len();
        OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(len - 3)
            .unwrap();

        {
            let repo = LogRepository::open(&path, schema()).unwrap();
            repo.create(conn("c")).await.unwrap();
        }

        let repo = LogRepository::open(&path, schema()).unwrap();
        let mut ids: Vec<String> = repo
            .get_list()
            .await
            .unwrap()
            .iter()
            .filter_map(|i| i.get_str("connectionId").map(String::from))
            .collect();
        ids.sort();
        assert_eq!(ids, ["a", "c"]);
    }

    #[tokio::test]
    async fn compact_keeps_live_items_only() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("connections.log");
        let repo = LogRepository::open_with(&path, schema(), SyncMode::EveryWrite).unwrap();
        for id in ["a", "b", "c"] {
            repo.create(conn(id)).await.unwrap();
        }
        repo.delete(&Key::partition("b")).await.unwrap();
        let before = fs::metadata(&path).unwrap().len();

        repo.compact().unwrap();
        assert!(fs::metadata(&path).unwrap().len() < before);

        repo.create(conn("d")).await.unwrap();
        drop(repo);

        let reopened = LogRepository::open(&path, schema()).unwrap();
        assert_eq!(reopened.len().unwrap(), 3);
    }
}
