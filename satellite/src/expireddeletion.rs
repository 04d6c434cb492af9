use std::sync::Arc;

use async_trait::async_trait;
use slog::Logger;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::ExpiredDeletionConfig;
use crate::cycle::Cycle;
use crate::error::{Result, SatelliteError};
use crate::lifecycle::Service;
use crate::metainfo::{MetainfoService, Observer, Pointer, SegmentLoop, SegmentPath};
use crate::time::unix_now;

/// Deletes segments whose expiration has passed.
pub struct ExpiredDeletion {
    logger: Logger,
    cycle: Cycle,
    segments: Arc<SegmentLoop>,
    metainfo: Arc<MetainfoService>,
    enabled: bool,
}

impl ExpiredDeletion {
    pub fn new(
        logger: Logger,
        segments: Arc<SegmentLoop>,
        metainfo: Arc<MetainfoService>,
        config: &ExpiredDeletionConfig,
    ) -> Self {
        Self {
            logger,
            cycle: Cycle::new(config.interval),
            segments,
            metainfo,
            enabled: config.enabled,
        }
    }

    pub fn cycle(&self) -> &Cycle {
        &self.cycle
    }

    /// Returns the number of segments deleted.
    pub async fn delete_expired(&self, cancel: &CancellationToken) -> Result<usize> {
        let observer = Arc::new(ExpiredCollector {
            now: unix_now(),
            expired: Mutex::new(Vec::new()),
        });
        self.segments.join(cancel, observer.clone()).await?;

        let expired = std::mem::take(&mut *observer.expired.lock().await);
        let mut deleted = 0;
        for path in expired {
            match self.metainfo.delete(&path) {
                Ok(_) => deleted += 1,
                // Removed by someone else in the meantime.
                Err(SatelliteError::NotFound(_)) => {}
                Err(e) => return Err(e),
            }
        }
        if deleted > 0 {
            slog::info!(self.logger, "Deleted expired segments"; "count" => deleted);
        }
        Ok(deleted)
    }
}

#[async_trait]
impl Service for ExpiredDeletion {
    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        if !self.enabled {
            cancel.cancelled().await;
            return Ok(());
        }
        let token = &cancel;
        self.cycle
            .run(cancel.clone(), move || async move {
                self.delete_expired(token).await.map(|_| ())
            })
            .await
    }

    async fn close(&self) -> Result<()> {
        self.cycle.close().await;
        Ok(())
    }
}

struct ExpiredCollector {
    now: u64,
    expired: Mutex<Vec<SegmentPath>>,
}

impl ExpiredCollector {
    async fn check(&self, path: &SegmentPath, pointer: &Pointer) {
        if pointer.is_expired(self.now) {
            self.expired.lock().await.push(path.clone());
        }
    }
}

#[async_trait]
impl Observer for ExpiredCollector {
    async fn remote_segment(&self, path: &SegmentPath, pointer: &Pointer) -> Result<()> {
        self.check(path, pointer).await;
        Ok(())
    }

    async fn inline_segment(&self, path: &SegmentPath, pointer: &Pointer) -> Result<()> {
        self.check(path, pointer).await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::LoopConfig;
    use crate::db::PointerStore;
    use crate::metainfo::SegmentIndex;
    use std::time::Duration;
    use tempfile::TempDir;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_only_expired_segments_are_deleted() {
        let dir = TempDir::new().unwrap();
        let logger = Logger::root(slog::Discard, slog::o!());
        let db = Arc::new(PointerStore::open(dir.path().join("pointers.redb")).unwrap());
        let metainfo = Arc::new(MetainfoService::new(logger.clone(), db.clone()));
        let project = Uuid::new_v4();
        let expired = SegmentPath::new(project, SegmentIndex::Last, "b", "old");
        let fresh = SegmentPath::new(project, SegmentIndex::Last, "b", "new");
        metainfo.put(&expired, &Pointer::inline(vec![1], Some(1))).unwrap();
        metainfo
            .put(&fresh, &Pointer::inline(vec![1], Some(unix_now() + 3600)))
            .unwrap();

        let segments = Arc::new(SegmentLoop::new(
            logger.clone(),
            db,
            LoopConfig {
                coalesce_duration: Duration::from_millis(1),
                list_limit: 1,
            },
        ));
        let cancel = CancellationToken::new();
        let runner = {
            let (segments, cancel) = (segments.clone(), cancel.clone());
            tokio::spawn(async move { segments.run(cancel).await })
        };

        let chore = ExpiredDeletion::new(logger, segments, metainfo.clone(), &ExpiredDeletionConfig::default());
        assert_eq!(chore.delete_expired(&cancel).await.unwrap(), 1);
        assert!(metainfo.get(&expired).is_err());
        assert!(metainfo.get(&fresh).is_ok());

        cancel.cancel();
        let _ = runner.await;
    }
}
