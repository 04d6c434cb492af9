use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use slog::Logger;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Action, BandwidthRollup};
use crate::db::OrdersDb;
use crate::error::{Result, SatelliteError};

/// Write-back buffer for allocated bandwidth.
///
/// Every role that hands out orders owns its own cache over the shared master
/// database. Buffered rollups are written back once `batch_size` distinct
/// project/action pairs accumulate, on [`RollupsWriteCache::flush`], and on
/// [`RollupsWriteCache::close_and_flush`].
pub struct RollupsWriteCache {
    logger: Logger,
    db: Arc<dyn OrdersDb>,
    batch_size: usize,
    pending: Mutex<HashMap<(Uuid, Action), u64>>,
    closed: AtomicBool,
}

impl RollupsWriteCache {
    pub fn new(logger: Logger, db: Arc<dyn OrdersDb>, batch_size: usize) -> Self {
        Self {
            logger,
            db,
            batch_size: batch_size.max(1),
            pending: Mutex::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    pub async fn update_bucket_bandwidth(
        &self,
        project_id: Uuid,
        action: Action,
        bytes: u64,
    ) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SatelliteError::Closed("rollups write cache".to_string()));
        }
        let mut pending = self.pending.lock().await;
        let total = pending.entry((project_id, action)).or_insert(0);
        *total = total.saturating_add(bytes);
        if pending.len() >= self.batch_size {
            let batch = drain(&mut pending);
            drop(pending);
            self.write_back(batch)?;
        }
        Ok(())
    }

    /// Number of buffered project/action pairs.
    pub async fn current_size(&self) -> usize {
        self.pending.lock().await.len()
    }

    /// Writes every buffered rollup to the master database.
    pub async fn flush(&self) -> Result<()> {
        let batch = drain(&mut *self.pending.lock().await);
        self.write_back(batch)
    }

    /// Stops accepting updates and flushes what is buffered. Later calls are no-ops.
    pub async fn close_and_flush(&self) -> Result<()> {
        if self.closed.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.flush().await
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn write_back(&self, batch: Vec<BandwidthRollup>) -> Result<()> {
        if batch.is_empty() {
            return Ok(());
        }
        let count = batch.len();
        self.db.update_bandwidth_rollups(&batch).inspect_err(|e| {
            slog::error!(self.logger, "Failed to write back bandwidth rollups"; "rollups" => count, "error" => %e);
        })?;
        slog::debug!(self.logger, "Wrote back bandwidth rollups"; "rollups" => count);
        Ok(())
    }
}

fn drain(pending: &mut HashMap<(Uuid, Action), u64>) -> Vec<BandwidthRollup> {
    pending
        .drain()
        .map(|((project_id, action), bytes)| BandwidthRollup {
            project_id,
            action,
            bytes,
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{SatelliteDb, SatelliteStore};
    use tempfile::TempDir;

    fn cache(db: &SatelliteStore, batch_size: usize) -> RollupsWriteCache {
        RollupsWriteCache::new(
            Logger::root(slog::Discard, slog::o!()),
            db.orders(),
            batch_size,
        )
    }

    #[tokio::test]
    async fn test_batch_size_triggers_write_back() {
        let dir = TempDir::new().unwrap();
        let db = SatelliteStore::open(dir.path().join("master.redb")).unwrap();
        let cache = cache(&db, 2);
        let (a, b) = (Uuid::new_v4(), Uuid::new_v4());

        cache.update_bucket_bandwidth(a, Action::Get, 10).await.unwrap();
        cache.update_bucket_bandwidth(a, Action::Get, 5).await.unwrap();
        assert_eq!(cache.current_size().await, 1);
        assert_eq!(db.orders().bandwidth_total(&a, Action::Get).unwrap(), 0);

        cache.update_bucket_bandwidth(b, Action::Put, 1).await.unwrap();
        assert_eq!(cache.current_size().await, 0);
        assert_eq!(db.orders().bandwidth_total(&a, Action::Get).unwrap(), 15);
        assert_eq!(db.orders().bandwidth_total(&b, Action::Put).unwrap(), 1);
    }

    #[tokio::test]
    async fn test_close_and_flush_persists_and_rejects_later_updates() {
        let dir = TempDir::new().unwrap();
        let db = SatelliteStore::open(dir.path().join("master.redb")).unwrap();
        let cache = cache(&db, 100);
        let project = Uuid::new_v4();

        cache.update_bucket_bandwidth(project, Action::GetRepair, 7).await.unwrap();
        cache.close_and_flush().await.unwrap();
        cache.close_and_flush().await.unwrap();

        assert_eq!(
            db.orders().bandwidth_total(&project, Action::GetRepair).unwrap(),
            7
        );
        assert!(matches!(
            cache.update_bucket_bandwidth(project, Action::Get, 1).await,
            Err(SatelliteError::Closed(_))
        ));
    }
}
