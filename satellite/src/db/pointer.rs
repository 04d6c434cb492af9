use std::ops::Bound;
use std::path::Path;
use std::sync::Arc;

use redb::{ReadableDatabase, ReadableTable};

use super::tables::POINTERS;
use super::{DbHandle, PointerDb, put_json};
use crate::error::Result;
use crate::metainfo::Pointer;

/// redb-backed segment metadata store.
#[derive(Clone)]
pub struct PointerStore {
    handle: Arc<DbHandle>,
}

impl PointerStore {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let handle = Arc::new(DbHandle::open("pointer database", path)?);
        handle.write(|txn| {
            txn.open_table(POINTERS)?;
            Ok(())
        })?;
        Ok(Self { handle })
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }
}

impl PointerDb for PointerStore {
    fn put(&self, path: &str, pointer: &Pointer) -> Result<()> {
        self.handle.write(|txn| put_json(txn, POINTERS, path, pointer))
    }

    fn get(&self, path: &str) -> Result<Option<Pointer>> {
        self.handle.read_json(POINTERS, path)
    }

    fn delete(&self, path: &str) -> Result<bool> {
        self.handle.write(|txn| {
            let mut table = txn.open_table(POINTERS)?;
            let removed = table.remove(path)?.is_some();
            Ok(removed)
        })
    }

    fn list(&self, start_after: Option<&str>, limit: usize) -> Result<Vec<(String, Pointer)>> {
        let db = self.handle.get()?;
        let txn = db.begin_read()?;
        let table = txn.open_table(POINTERS)?;
        let start = match start_after {
            Some(key) => Bound::Excluded(key),
            None => Bound::Unbounded,
        };

        let mut entries = Vec::new();
        for entry in table.range::<&str>((start, Bound::Unbounded))?.take(limit) {
            let (key, raw) = entry?;
            entries.push((key.value().to_string(), serde_json::from_slice(raw.value())?));
        }
        Ok(entries)
    }

    fn close(&self) -> Result<()> {
        self.handle.close();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metainfo::Pointer;
    use tempfile::TempDir;

    #[test]
    fn test_list_pages_in_path_order() {
        let dir = TempDir::new().unwrap();
        let store = PointerStore::open(dir.path().join("pointers.redb")).unwrap();
        for path in ["p/l/b/c", "p/l/b/a", "p/l/b/b"] {
            store.put(path, &Pointer::inline(vec![1, 2, 3], None)).unwrap();
        }

        let first = store.list(None, 2).unwrap();
        let keys: Vec<_> = first.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(keys, ["p/l/b/a", "p/l/b/b"]);

        let rest = store.list(Some("p/l/b/b"), 10).unwrap();
        assert_eq!(rest.len(), 1);
        assert_eq!(rest[0].0, "p/l/b/c");
    }

    #[test]
    fn test_delete_reports_presence() {
        let dir = TempDir::new().unwrap();
        let store = PointerStore::open(dir.path().join("pointers.redb")).unwrap();
        store.put("x", &Pointer::inline(vec![], None)).unwrap();
        assert!(store.delete("x").unwrap());
        assert!(!store.delete("x").unwrap());
        assert!(store.get("x").unwrap().is_none());
    }
}
