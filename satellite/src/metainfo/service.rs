use std::sync::Arc;

use slog::Logger;
use uuid::Uuid;

use super::{Pointer, SegmentIndex, SegmentPath};
use crate::db::PointerDb;
use crate::error::{Result, SatelliteError};

/// Typed access to the pointer database.
pub struct MetainfoService {
    logger: Logger,
    db: Arc<dyn PointerDb>,
}

impl MetainfoService {
    pub fn new(logger: Logger, db: Arc<dyn PointerDb>) -> Self {
        Self { logger, db }
    }

    pub fn db(&self) -> &Arc<dyn PointerDb> {
        &self.db
    }

    pub fn put(&self, path: &SegmentPath, pointer: &Pointer) -> Result<()> {
        self.db.put(&path.to_string(), pointer)
    }

    pub fn get(&self, path: &SegmentPath) -> Result<Pointer> {
        self.db
            .get(&path.to_string())?
            .ok_or_else(|| SatelliteError::NotFound(format!("segment {path}")))
    }

    /// Removes a segment and returns what was stored.
    pub fn delete(&self, path: &SegmentPath) -> Result<Pointer> {
        let key = path.to_string();
        let pointer = self
            .db
            .get(&key)?
            .ok_or_else(|| SatelliteError::NotFound(format!("segment {path}")))?;
        self.db.delete(&key)?;
        slog::trace!(self.logger, "Segment deleted"; "path" => &key);
        Ok(pointer)
    }

    /// Keys of all objects in a bucket, in key order.
    pub fn list_objects(&self, project_id: Uuid, bucket: &str) -> Result<Vec<String>> {
        let prefix = format!("{project_id}/{}/{bucket}/", SegmentIndex::Last);
        let mut objects = Vec::new();
        let mut start_after = prefix.clone();
        loop {
            let page = self.db.list(Some(&start_after), 1000)?;
            let Some((last, _)) = page.last() else {
                break;
            };
            let next = last.clone();
            let mut past_prefix = false;
            for (key, _) in &page {
                match key.strip_prefix(&prefix) {
                    Some(object) => objects.push(object.to_string()),
                    None => {
                        past_prefix = true;
                        break;
                    }
                }
            }
            if past_prefix {
                break;
            }
            start_after = next;
        }
        Ok(objects)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::PointerStore;
    use tempfile::TempDir;

    #[test]
    fn test_list_objects_stays_inside_bucket() {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(PointerStore::open(dir.path().join("pointers.redb")).unwrap());
        let service = MetainfoService::new(Logger::root(slog::Discard, slog::o!()), db);
        let project = Uuid::new_v4();

        for (bucket, object) in [("a", "x"), ("a", "y/z"), ("b", "x")] {
            let path = SegmentPath::new(project, SegmentIndex::Last, bucket, object);
            service.put(&path, &Pointer::inline(vec![1], None)).unwrap();
        }
        let middle = SegmentPath::new(project, SegmentIndex::Index(0), "a", "x");
        service.put(&middle, &Pointer::inline(vec![1], None)).unwrap();

        assert_eq!(service.list_objects(project, "a").unwrap(), ["x", "y/z"]);
        assert_eq!(service.list_objects(project, "b").unwrap(), ["x"]);
        assert!(service.list_objects(project, "c").unwrap().is_empty());
    }

    #[test]
    fn test_delete_missing_segment_is_not_found() {
        let dir = TempDir::new().unwrap();
        let db = Arc::new(PointerStore::open(dir.path().join("pointers.redb")).unwrap());
        let service = MetainfoService::new(Logger::root(slog::Discard, slog::o!()), db);
        let path = SegmentPath::new(Uuid::new_v4(), SegmentIndex::Last, "a", "missing");
        assert!(matches!(service.delete(&path), Err(SatelliteError::NotFound(_))));
    }
}
