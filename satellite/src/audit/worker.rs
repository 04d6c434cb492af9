use std::sync::Arc;

use async_trait::async_trait;
use slog::Logger;
use tokio_util::sync::CancellationToken;

use super::Queue;
use crate::config::AuditConfig;
use crate::cycle::Cycle;
use crate::error::{Result, SatelliteError};
use crate::identity::NodeId;
use crate::lifecycle::Service;
use crate::metainfo::{MetainfoService, SegmentPath};
use crate::orders::OrdersService;
use crate::overlay::OverlayService;

/// Per-node outcome of auditing one segment.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Report {
    pub successes: Vec<NodeId>,
    pub fails: Vec<NodeId>,
    pub offlines: Vec<NodeId>,
}

impl Report {
    pub fn is_empty(&self) -> bool {
        self.successes.is_empty() && self.fails.is_empty() && self.offlines.is_empty()
    }
}

/// Applies audit reports to node reputation.
pub struct Reporter {
    logger: Logger,
    overlay: Arc<OverlayService>,
}

impl Reporter {
    pub fn new(logger: Logger, overlay: Arc<OverlayService>) -> Self {
        Self { logger, overlay }
    }

    /// Records every outcome in the report. Returns the first error after
    /// attempting all nodes.
    pub fn record(&self, report: &Report) -> Result<()> {
        let mut first_err = None;
        let outcomes = report
            .successes
            .iter()
            .map(|id| (id, Some(true)))
            .chain(report.fails.iter().map(|id| (id, Some(false))))
            .chain(report.offlines.iter().map(|id| (id, None)));
        for (id, success) in outcomes {
            let result = match success {
                Some(success) => self.overlay.update_audit(id, success).map(|_| ()),
                None => self.overlay.update_contact_failure(id),
            };
            if let Err(e) = result {
                slog::warn!(self.logger, "Failed to record audit outcome"; "node" => %id, "error" => %e);
                first_err.get_or_insert(e);
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

/// Drains the audit queue.
pub struct Worker {
    logger: Logger,
    cycle: Cycle,
    queue: Arc<Queue>,
    metainfo: Arc<MetainfoService>,
    overlay: Arc<OverlayService>,
    orders: Arc<OrdersService>,
    reporter: Reporter,
    concurrency: usize,
}

impl Worker {
    pub fn new(
        logger: Logger,
        queue: Arc<Queue>,
        metainfo: Arc<MetainfoService>,
        overlay: Arc<OverlayService>,
        orders: Arc<OrdersService>,
        config: &AuditConfig,
    ) -> Self {
        Self {
            reporter: Reporter::new(logger.clone(), overlay.clone()),
            logger,
            cycle: Cycle::new(config.queue_interval),
            queue,
            metainfo,
            overlay,
            orders,
            concurrency: config.worker_concurrency.max(1),
        }
    }

    pub fn cycle(&self) -> &Cycle {
        &self.cycle
    }

    /// Audits up to `worker_concurrency` queued segments.
    pub async fn process(&self) -> Result<()> {
        for _ in 0..self.concurrency {
            let Some(path) = self.queue.next().await else {
                break;
            };
            match self.verify(&path).await {
                Ok(report) => {
                    if let Err(e) = self.reporter.record(&report) {
                        slog::warn!(self.logger, "Audit report incomplete"; "path" => &path, "error" => %e);
                    }
                }
                Err(e) => {
                    slog::warn!(self.logger, "Audit failed"; "path" => &path, "error" => %e);
                }
            }
        }
        Ok(())
    }

    /// Requests one share from every piece holder of the segment.
    pub async fn verify(&self, path: &str) -> Result<Report> {
        let segment: SegmentPath = path.parse()?;
        let pointer = match self.metainfo.get(&segment) {
            Ok(pointer) => pointer,
            // Deleted since it was sampled.
            Err(SatelliteError::NotFound(_)) => return Ok(Report::default()),
            Err(e) => return Err(e),
        };
        let Some(redundancy) = pointer.redundancy() else {
            return Ok(Report::default());
        };

        let mut report = Report::default();
        for piece in pointer.pieces() {
            self.orders
                .create_audit_order_limit(
                    segment.project_id,
                    &pointer,
                    piece,
                    redundancy.erasure_share_size,
                )
                .await?;
            match self.overlay.get(&piece.node_id) {
                Ok(node) if node.disqualified.is_some() => {}
                Ok(node) if self.overlay.is_online(&node) => report.successes.push(piece.node_id),
                Ok(_) => report.offlines.push(piece.node_id),
                Err(SatelliteError::NotFound(_)) => report.fails.push(piece.node_id),
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }
}

#[async_trait]
impl Service for Worker {
    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        self.cycle.run(cancel, move || self.process()).await
    }

    async fn close(&self) -> Result<()> {
        self.cycle.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{GracefulExitConfig, NodeSelectionConfig, RsConfig};
    use crate::db::{PointerStore, SatelliteDb, SatelliteStore};
    use crate::metainfo::{Piece, Pointer, SegmentIndex};
    use crate::orders::RollupsWriteCache;
    use crate::overlay::CheckInInfo;
    use std::time::Duration;
    use tempfile::TempDir;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_worker_credits_online_nodes() {
        let dir = TempDir::new().unwrap();
        let logger = Logger::root(slog::Discard, slog::o!());
        let db = SatelliteStore::open(dir.path().join("master.redb")).unwrap();
        let pointers = Arc::new(PointerStore::open(dir.path().join("pointers.redb")).unwrap());
        let overlay = Arc::new(OverlayService::new(
            logger.clone(),
            db.overlay(),
            NodeSelectionConfig::default(),
            GracefulExitConfig::default(),
        ));
        overlay
            .update_check_in(&CheckInInfo {
                id: NodeId([1; 32]),
                address: "127.0.0.1:9001".to_string(),
                free_disk: 0,
            })
            .unwrap();

        let metainfo = Arc::new(MetainfoService::new(logger.clone(), pointers));
        let path = SegmentPath::new(Uuid::new_v4(), SegmentIndex::Last, "b", "o");
        let pieces = vec![
            Piece { number: 0, node_id: NodeId([1; 32]) },
            Piece { number: 1, node_id: NodeId([2; 32]) },
        ];
        let rs = RsConfig {
            erasure_share_size: 256,
            min: 1,
            repair: 1,
            success: 2,
            total: 2,
        };
        metainfo.put(&path, &Pointer::remote(rs, pieces, 512, None)).unwrap();

        let cache = Arc::new(RollupsWriteCache::new(logger.clone(), db.orders(), 100));
        let orders = Arc::new(OrdersService::new(
            logger.clone(),
            NodeId([9; 32]),
            cache,
            None,
            Duration::from_secs(60),
        ));
        let queue = Arc::new(Queue::new());
        queue.swap(vec![path.to_string(), "not a path".to_string()]).await;
        let worker = Worker::new(
            logger,
            queue.clone(),
            metainfo,
            overlay.clone(),
            orders,
            &AuditConfig::default(),
        );

        let report = worker.verify(&path.to_string()).await.unwrap();
        assert_eq!(report.successes, vec![NodeId([1; 32])]);
        assert_eq!(report.fails, vec![NodeId([2; 32])]);

        worker.process().await.unwrap();
        assert!(queue.is_empty().await);
        let audit = overlay.get(&NodeId([1; 32])).unwrap().audit;
        assert_eq!(audit.success_count, 1);
        assert_eq!(audit.total_count, 1);
    }
}
