use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use slog::Logger;
use tokio_util::sync::CancellationToken;

use crate::config::DowntimeConfig;
use crate::cycle::Cycle;
use crate::error::Result;
use crate::lifecycle::Service;
use crate::overlay::OverlayService;

/// Looks for storage nodes that stopped checking in.
pub struct DetectionChore {
    logger: Logger,
    cycle: Cycle,
    overlay: Arc<OverlayService>,
    last_offline: AtomicU64,
}

impl DetectionChore {
    pub fn new(logger: Logger, overlay: Arc<OverlayService>, config: &DowntimeConfig) -> Self {
        Self {
            logger,
            cycle: Cycle::new(config.detection_interval),
            overlay,
            last_offline: AtomicU64::new(0),
        }
    }

    pub fn cycle(&self) -> &Cycle {
        &self.cycle
    }

    /// Offline nodes seen by the last pass.
    pub fn last_offline(&self) -> u64 {
        self.last_offline.load(Ordering::Relaxed)
    }

    pub async fn detect(&self) -> Result<()> {
        let offline = self.overlay.offline_nodes()?;
        for node in &offline {
            slog::debug!(self.logger, "Node offline"; "node" => %node.id, "last_contact" => node.last_contact_success);
        }
        self.last_offline.store(offline.len() as u64, Ordering::Relaxed);
        Ok(())
    }
}

#[async_trait]
impl Service for DetectionChore {
    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        self.cycle.run(cancel, move || self.detect()).await
    }

    async fn close(&self) -> Result<()> {
        self.cycle.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GracefulExitConfig, NodeSelectionConfig};
    use crate::db::{SatelliteDb, SatelliteStore};
    use crate::identity::NodeId;
    use crate::overlay::NodeDossier;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_counts_nodes_past_online_window() {
        let dir = TempDir::new().unwrap();
        let db = SatelliteStore::open(dir.path().join("master.redb")).unwrap();
        let logger = Logger::root(slog::Discard, slog::o!());
        let stale = NodeDossier {
            id: NodeId([5; 32]),
            address: "127.0.0.1:1".to_string(),
            created_at: 1,
            last_contact_success: 1,
            last_contact_failure: 0,
            free_disk: 0,
            audit: Default::default(),
            disqualified: None,
            exit: Default::default(),
        };
        db.overlay().upsert_node(&stale).unwrap();
        let overlay = Arc::new(OverlayService::new(
            logger.clone(),
            db.overlay(),
            NodeSelectionConfig::default(),
            GracefulExitConfig::default(),
        ));

        let chore = DetectionChore::new(logger, overlay, &DowntimeConfig::default());
        chore.detect().await.unwrap();
        assert_eq!(chore.last_offline(), 1);
    }
}
