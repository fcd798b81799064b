//! # Block List
//!
//! Durable set of blocked source addresses, one `BlockRecord` per address.
//!
//! The gate (`contains`) runs before any scoring; the blocking path inserts
//! with compare-and-insert semantics, so re-blocking an address is a no-op.
//! Both go through the same store, and an insertion is visible to the next
//! gate check in the same process.
//!
//! ## Backends
//! - **`MemoryBlockStore`**: process-local, for tests and embedding.
//! - **`FileBlockStore`**: JSON array on disk. Reads go to the file every
//!   time. Every insertion is a serialized read-modify-write: re-read the
//!   file, add the record, write a temp file, rename over the original.
//!
//! ## Missing vs. broken
//! A missing block file is an empty block list and is logged as such. An
//! unreadable or unparseable file is `StoreUnavailable`, never silently
//! "nothing blocked".
//!
//! Copyright (c) 2026 CIPS Corps. All rights reserved.

use std::collections::HashMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::{BlockRecord, ShieldError, ShieldResult};

/// Storage seam for the block list.
pub trait BlockStore: Send + Sync {
    /// Whether the address is blocked.
    fn contains(&self, source_ip: &IpAddr) -> ShieldResult<bool>;

    /// Insert the record unless its address is already present.
    ///
    /// Returns `true` if a new record was written. Atomic per address.
    fn insert_if_absent(&self, record: BlockRecord) -> ShieldResult<bool>;

    /// All records, oldest block first.
    fn records(&self) -> ShieldResult<Vec<BlockRecord>>;
}

fn sorted_records(map: &HashMap<IpAddr, BlockRecord>) -> Vec<BlockRecord> {
    let mut records: Vec<BlockRecord> = map.values().cloned().collect();
    records.sort_by(|a, b| {
        a.blocked_at
            .cmp(&b.blocked_at)
            .then_with(|| a.source_ip.cmp(&b.source_ip))
    });
    records
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct MemoryBlockStore {
    records: RwLock<HashMap<IpAddr, BlockRecord>>,
}

impl MemoryBlockStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl BlockStore for MemoryBlockStore {
    fn contains(&self, source_ip: &IpAddr) -> ShieldResult<bool> {
        Ok(self.records.read().contains_key(source_ip))
    }

    fn insert_if_absent(&self, record: BlockRecord) -> ShieldResult<bool> {
        let mut records = self.records.write();
        if records.contains_key(&record.source_ip) {
            return Ok(false);
        }
        records.insert(record.source_ip, record);
        Ok(true)
    }

    fn records(&self) -> ShieldResult<Vec<BlockRecord>> {
        Ok(sorted_records(&self.records.read()))
    }
}

// ---------------------------------------------------------------------------
// Flat-file backend
// ---------------------------------------------------------------------------

/// Block list persisted as a JSON array.
///
/// The file is the only copy: every gate check and listing re-reads it, so
/// blocks written by another writer are seen immediately and a file that
/// turns unreadable surfaces as `StoreUnavailable`. The lock serializes the
/// read-modify-write cycle of inserts against concurrent readers.
#[derive(Debug)]
pub struct FileBlockStore {
    path: PathBuf,
    lock: RwLock<()>,
}

impl FileBlockStore {
    /// Open the block list at `path`. A missing file starts an empty list.
    pub fn open(path: &Path) -> ShieldResult<Self> {
        match read_block_file(path)? {
            Some(records) => log::info!(
                "[BLOCKLIST] Loaded {} block records from {}",
                records.len(),
                path.display()
            ),
            None => log::info!(
                "[BLOCKLIST] No block file at {}, starting with an empty list",
                path.display()
            ),
        }
        Ok(Self {
            path: path.to_path_buf(),
            lock: RwLock::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> ShieldResult<HashMap<IpAddr, BlockRecord>> {
        Ok(read_block_file(&self.path)?.unwrap_or_default())
    }
}

impl BlockStore for FileBlockStore {
    fn contains(&self, source_ip: &IpAddr) -> ShieldResult<bool> {
        let _guard = self.lock.read();
        Ok(self.load()?.contains_key(source_ip))
    }

    fn insert_if_absent(&self, record: BlockRecord) -> ShieldResult<bool> {
        let _guard = self.lock.write();

        // Re-read under the write lock so records from an earlier run or
        // another writer are kept by our rewrite.
        let mut records = self.load()?;
        if records.contains_key(&record.source_ip) {
            return Ok(false);
        }

        let source_ip = record.source_ip;
        records.insert(source_ip, record);
        write_block_file(&self.path, &records)?;

        log::info!("[BLOCKLIST] Persisted block for {} to {}", source_ip, self.path.display());
        Ok(true)
    }

    fn records(&self) -> ShieldResult<Vec<BlockRecord>> {
        let _guard = self.lock.read();
        Ok(sorted_records(&self.load()?))
    }
}

/// Read the block file. `Ok(None)` means the file does not exist.
fn read_block_file(path: &Path) -> ShieldResult<Option<HashMap<IpAddr, BlockRecord>>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(e) => {
            return Err(ShieldError::StoreUnavailable(format!(
                "cannot read {}: {}",
                path.display(),
                e
            )))
        }
    };

    if content.trim().is_empty() {
        return Ok(Some(HashMap::new()));
    }

    let records: Vec<BlockRecord> = serde_json::from_str(&content).map_err(|e| {
        ShieldError::StoreUnavailable(format!("corrupt block file {}: {}", path.display(), e))
    })?;

    let mut map = HashMap::with_capacity(records.len());
    for record in records {
        if map.contains_key(&record.source_ip) {
            log::warn!(
                "[BLOCKLIST] Duplicate record for {} in {}, keeping the first",
                record.source_ip,
                path.display()
            );
            continue;
        }
        map.insert(record.source_ip, record);
    }
    Ok(Some(map))
}

/// Write all records to a temp file and rename it over `path`.
fn write_block_file(path: &Path, records: &HashMap<IpAddr, BlockRecord>) -> ShieldResult<()> {
    let store_err = |e: std::io::Error| {
        ShieldError::StoreUnavailable(format!("cannot write {}: {}", path.display(), e))
    };

    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() && !parent.exists() {
            std::fs::create_dir_all(parent).map_err(store_err)?;
        }
    }

    let json = serde_json::to_string_pretty(&sorted_records(records))?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    std::fs::write(&tmp, json).map_err(store_err)?;
    std::fs::rename(&tmp, path).map_err(store_err)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;
    use std::sync::Arc;

    fn ip(last: u8) -> IpAddr {
        IpAddr::V4(Ipv4Addr::new(198, 51, 100, last))
    }

    fn test_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join("login_shield_test_blocklist").join(name);
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    fn test_memory_insert_is_idempotent() {
        let store = MemoryBlockStore::new();
        assert!(store.insert_if_absent(BlockRecord::new(ip(1), "first")).unwrap());
        assert!(!store.insert_if_absent(BlockRecord::new(ip(1), "second")).unwrap());
        let records = store.records().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].reason, "first");
    }

    #[test]
    fn test_memory_gate_sees_insert() {
        let store = MemoryBlockStore::new();
        assert!(!store.contains(&ip(2)).unwrap());
        store.insert_if_absent(BlockRecord::new(ip(2), "r")).unwrap();
        assert!(store.contains(&ip(2)).unwrap());
    }

    #[test]
    fn test_file_missing_is_empty() {
        let dir = test_dir("missing");
        let store = FileBlockStore::open(&dir.join("blocked.json")).unwrap();
        assert!(store.records().unwrap().is_empty());
        assert!(!store.contains(&ip(1)).unwrap());
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_file_corrupt_is_store_error() {
        let dir = test_dir("corrupt");
        let path = dir.join("blocked.json");
        std::fs::write(&path, "ip_address,blocked_at\n1.2.3.4,now").unwrap();
        assert!(matches!(
            FileBlockStore::open(&path),
            Err(ShieldError::StoreUnavailable(_))
        ));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_file_persists_across_reopen() {
        let dir = test_dir("reopen");
        let path = dir.join("blocked.json");

        let store = FileBlockStore::open(&path).unwrap();
        assert!(store.insert_if_absent(BlockRecord::new(ip(3), "High risk login detected")).unwrap());
        assert!(store.contains(&ip(3)).unwrap());
        drop(store);

        let reopened = FileBlockStore::open(&path).unwrap();
        assert!(reopened.contains(&ip(3)).unwrap());
        assert_eq!(reopened.records().unwrap()[0].reason, "High risk login detected");
        assert!(!reopened.insert_if_absent(BlockRecord::new(ip(3), "again")).unwrap());
        assert_eq!(reopened.records().unwrap().len(), 1);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_file_merges_external_writes() {
        let dir = test_dir("merge");
        let path = dir.join("blocked.json");

        let a = FileBlockStore::open(&path).unwrap();
        let b = FileBlockStore::open(&path).unwrap();
        a.insert_if_absent(BlockRecord::new(ip(4), "a")).unwrap();
        b.insert_if_absent(BlockRecord::new(ip(5), "b")).unwrap();

        let reopened = FileBlockStore::open(&path).unwrap();
        assert!(reopened.contains(&ip(4)).unwrap());
        assert!(reopened.contains(&ip(5)).unwrap());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_file_gate_sees_other_writer() {
        let dir = test_dir("other_writer");
        let path = dir.join("blocked.json");

        let a = FileBlockStore::open(&path).unwrap();
        let b = FileBlockStore::open(&path).unwrap();
        assert!(a.insert_if_absent(BlockRecord::new(ip(9), "a")).unwrap());

        assert!(b.contains(&ip(9)).unwrap());
        assert_eq!(b.records().unwrap().len(), 1);
        assert!(!b.insert_if_absent(BlockRecord::new(ip(9), "b")).unwrap());

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_file_corrupted_after_open_is_store_error() {
        let dir = test_dir("corrupt_later");
        let path = dir.join("blocked.json");

        let store = FileBlockStore::open(&path).unwrap();
        store.insert_if_absent(BlockRecord::new(ip(10), "r")).unwrap();
        std::fs::write(&path, "garbage").unwrap();

        assert!(matches!(
            store.contains(&ip(10)),
            Err(ShieldError::StoreUnavailable(_))
        ));
        assert!(matches!(store.records(), Err(ShieldError::StoreUnavailable(_))));
        assert!(matches!(
            store.insert_if_absent(BlockRecord::new(ip(11), "r")),
            Err(ShieldError::StoreUnavailable(_))
        ));

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_file_concurrent_inserts_lose_nothing() {
        let dir = test_dir("concurrent");
        let path = dir.join("blocked.json");
        let store = Arc::new(FileBlockStore::open(&path).unwrap());

        std::thread::scope(|scope| {
            for i in 0..20u8 {
                let store = Arc::clone(&store);
                scope.spawn(move || {
                    // Every address is inserted twice to race on duplicates too.
                    store.insert_if_absent(BlockRecord::new(ip(i), "race")).unwrap();
                    store.insert_if_absent(BlockRecord::new(ip(i), "race")).unwrap();
                });
            }
        });

        assert_eq!(store.records().unwrap().len(), 20);
        let reopened = FileBlockStore::open(&path).unwrap();
        assert_eq!(reopened.records().unwrap().len(), 20);

        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn test_file_written_as_json_array() {
        let dir = test_dir("format");
        let path = dir.join("nested").join("blocked.json");
        let store = FileBlockStore::open(&path).unwrap();
        store.insert_if_absent(BlockRecord::new(ip(7), "r")).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        let parsed: serde_json::Value = serde_json::from_str(&content).unwrap();
        assert_eq!(parsed[0]["ip_address"], "198.51.100.7");

        let _ = std::fs::remove_dir_all(&dir);
    }
}
