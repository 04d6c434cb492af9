use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use slog::Logger;
use tokio_util::sync::CancellationToken;

use super::InjuredSegment;
use crate::config::RepairerConfig;
use crate::cycle::Cycle;
use crate::db::RepairQueue;
use crate::error::{Result, SatelliteError};
use crate::identity::NodeId;
use crate::lifecycle::Service;
use crate::metainfo::{MetainfoService, Piece, SegmentPath};
use crate::orders::OrdersService;
use crate::overlay::OverlayService;

/// Outcome of one repair attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RepairOutcome {
    Repaired { replaced: usize },
    /// The segment was deleted or became healthy before we got to it.
    NothingToDo,
    /// Fewer healthy pieces than needed to reconstruct.
    Irreparable,
}

/// Drains the repair queue, replacing pieces held by unreliable nodes.
pub struct Repairer {
    logger: Logger,
    cycle: Cycle,
    queue: Arc<dyn RepairQueue>,
    metainfo: Arc<MetainfoService>,
    overlay: Arc<OverlayService>,
    orders: Arc<OrdersService>,
    config: RepairerConfig,
    repaired: AtomicU64,
}

impl Repairer {
    pub fn new(
        logger: Logger,
        queue: Arc<dyn RepairQueue>,
        metainfo: Arc<MetainfoService>,
        overlay: Arc<OverlayService>,
        orders: Arc<OrdersService>,
        config: RepairerConfig,
    ) -> Self {
        Self {
            logger,
            cycle: Cycle::new(config.interval),
            queue,
            metainfo,
            overlay,
            orders,
            config,
            repaired: AtomicU64::new(0),
        }
    }

    pub fn cycle(&self) -> &Cycle {
        &self.cycle
    }

    /// Segments repaired since start.
    pub fn repaired(&self) -> u64 {
        self.repaired.load(Ordering::Relaxed)
    }

    /// Processes up to `max_repair` queued segments. A failed attempt leaves the
    /// segment queued and ends the pass.
    pub async fn process_queue(&self) -> Result<()> {
        for _ in 0..self.config.max_repair.max(1) {
            let Some(segment) = self.queue.select()? else {
                break;
            };
            match tokio::time::timeout(self.config.timeout, self.repair(&segment)).await {
                Ok(Ok(outcome)) => {
                    if let RepairOutcome::Repaired { replaced } = outcome {
                        self.repaired.fetch_add(1, Ordering::Relaxed);
                        slog::info!(self.logger, "Segment repaired"; "path" => &segment.path, "replaced" => replaced);
                    }
                    if outcome == RepairOutcome::Irreparable {
                        slog::warn!(self.logger, "Segment is irreparable"; "path" => &segment.path);
                    }
                    self.queue.delete(&segment.path)?;
                }
                Ok(Err(e)) => {
                    slog::warn!(self.logger, "Repair failed"; "path" => &segment.path, "error" => %e);
                    break;
                }
                Err(_) => {
                    slog::warn!(self.logger, "Repair timed out"; "path" => &segment.path);
                    break;
                }
            }
        }
        Ok(())
    }

    async fn repair(&self, segment: &InjuredSegment) -> Result<RepairOutcome> {
        let path: SegmentPath = segment.path.parse()?;
        let mut pointer = match self.metainfo.get(&path) {
            Ok(pointer) => pointer,
            Err(SatelliteError::NotFound(_)) => return Ok(RepairOutcome::NothingToDo),
            Err(e) => return Err(e),
        };
        let Some(redundancy) = pointer.redundancy().copied() else {
            return Ok(RepairOutcome::NothingToDo);
        };

        let holders: Vec<NodeId> = pointer.pieces().iter().map(|p| p.node_id).collect();
        let reliable: HashSet<NodeId> = self.overlay.known_reliable(&holders)?.into_iter().collect();
        let healthy: Vec<Piece> = pointer
            .pieces()
            .iter()
            .filter(|p| reliable.contains(&p.node_id))
            .copied()
            .collect();

        if healthy.len() < redundancy.min {
            return Ok(RepairOutcome::Irreparable);
        }
        if healthy.len() > redundancy.repair {
            return Ok(RepairOutcome::NothingToDo);
        }

        let used: HashSet<u16> = healthy.iter().map(|p| p.number).collect();
        let free_numbers: Vec<u16> = (0..redundancy.total as u16)
            .filter(|n| !used.contains(n))
            .collect();
        let needed = redundancy
            .success
            .saturating_sub(healthy.len())
            .max(1)
            .min(free_numbers.len());

        let new_nodes = self.overlay.select_storage_nodes(needed, &holders)?;
        let replacements: Vec<Piece> = new_nodes
            .iter()
            .zip(free_numbers)
            .map(|(node, number)| Piece {
                number,
                node_id: node.id,
            })
            .collect();

        self.orders
            .create_get_repair_order_limits(path.project_id, &pointer, &healthy)
            .await?;
        self.orders
            .create_put_repair_order_limits(path.project_id, &pointer, &replacements)
            .await?;

        let replaced = replacements.len();
        let mut pieces = healthy;
        pieces.extend(replacements);
        pieces.sort_by_key(|p| p.number);
        if let crate::metainfo::Segment::Remote { pieces: stored, .. } = &mut pointer.segment {
            *stored = pieces;
        }
        self.metainfo.put(&path, &pointer)?;
        Ok(RepairOutcome::Repaired { replaced })
    }
}

#[async_trait]
impl Service for Repairer {
    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        self.cycle.run(cancel, move || self.process_queue()).await
    }

    async fn close(&self) -> Result<()> {
        self.cycle.close().await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{
        GracefulExitConfig, LoopConfig, NodeSelectionConfig, RsConfig,
    };
    use crate::db::{PointerStore, SatelliteDb, SatelliteStore};
    use crate::metainfo::{Pointer, SegmentIndex, SegmentLoop};
    use crate::orders::RollupsWriteCache;
    use crate::overlay::CheckInInfo;
    use crate::repair::Checker;
    use std::time::Duration;
    use tempfile::TempDir;
    use uuid::Uuid;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_checker_queues_and_repairer_replaces_lost_pieces() {
        let dir = TempDir::new().unwrap();
        let logger = Logger::root(slog::Discard, slog::o!());
        let db = SatelliteStore::open(dir.path().join("master.redb")).unwrap();
        let pointers = Arc::new(PointerStore::open(dir.path().join("pointers.redb")).unwrap());

        let overlay = Arc::new(OverlayService::new(
            logger.clone(),
            db.overlay(),
            NodeSelectionConfig {
                audit_count: 0,
                minimum_disk_space: 0,
                ..NodeSelectionConfig::default()
            },
            GracefulExitConfig::default(),
        ));
        // Nodes 1..=6 are online; 7 and 8 never checked in.
        for n in 1..=6u8 {
            overlay
                .update_check_in(&CheckInInfo {
                    id: NodeId([n; 32]),
                    address: format!("127.0.0.1:{}", 9000 + u16::from(n)),
                    free_disk: u64::MAX,
                })
                .unwrap();
        }

        let rs = RsConfig {
            erasure_share_size: 256,
            min: 1,
            repair: 2,
            success: 3,
            total: 4,
        };
        let pieces = vec![
            Piece { number: 0, node_id: NodeId([1; 32]) },
            Piece { number: 1, node_id: NodeId([2; 32]) },
            Piece { number: 2, node_id: NodeId([7; 32]) },
            Piece { number: 3, node_id: NodeId([8; 32]) },
        ];
        let path = SegmentPath::new(Uuid::new_v4(), SegmentIndex::Last, "bucket", "obj");
        let metainfo = Arc::new(MetainfoService::new(logger.clone(), pointers.clone()));
        metainfo
            .put(&path, &Pointer::remote(rs, pieces, 4096, None))
            .unwrap();

        let segments = Arc::new(SegmentLoop::new(
            logger.clone(),
            pointers,
            LoopConfig {
                coalesce_duration: Duration::from_millis(10),
                list_limit: 10,
            },
        ));
        let cancel = CancellationToken::new();
        let runner = {
            let segments = segments.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { segments.run(cancel).await })
        };

        let queue = db.repair_queue();
        let checker = Checker::new(
            logger.clone(),
            Cycle::new(Duration::from_secs(3600)),
            segments,
            overlay.clone(),
            queue.clone(),
        );
        let stats = checker.identify_injured_segments(&cancel).await.unwrap();
        assert_eq!(stats.remote_segments_needing_repair, 1);
        assert_eq!(queue.count().unwrap(), 1);

        let cache = Arc::new(RollupsWriteCache::new(logger.clone(), db.orders(), 100));
        let orders = Arc::new(OrdersService::new(
            logger.clone(),
            NodeId([42; 32]),
            cache,
            None,
            Duration::from_secs(60),
        ));
        let repairer = Repairer::new(
            logger,
            queue.clone(),
            metainfo.clone(),
            overlay.clone(),
            orders,
            RepairerConfig::default(),
        );
        repairer.process_queue().await.unwrap();

        assert_eq!(repairer.repaired(), 1);
        assert_eq!(queue.count().unwrap(), 0);
        let repaired = metainfo.get(&path).unwrap();
        let holders: Vec<NodeId> = repaired.pieces().iter().map(|p| p.node_id).collect();
        assert_eq!(holders.len(), 3);
        assert_eq!(overlay.known_reliable(&holders).unwrap().len(), 3);

        cancel.cancel();
        let _ = runner.await;
    }
}
