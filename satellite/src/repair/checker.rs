use std::collections::HashSet;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use slog::Logger;
use tokio_util::sync::CancellationToken;

use super::InjuredSegment;
use crate::cycle::Cycle;
use crate::db::RepairQueue;
use crate::error::Result;
use crate::identity::NodeId;
use crate::lifecycle::Service;
use crate::metainfo::{Observer, Pointer, SegmentLoop, SegmentPath};
use crate::overlay::OverlayService;
use crate::time::unix_now;

/// Counters of the most recent checker pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct CheckerStats {
    pub remote_segments_checked: u64,
    pub remote_segments_needing_repair: u64,
    pub newly_queued: u64,
    pub irreparable: u64,
}

/// Scans every remote segment and queues those at or below their repair
/// threshold.
pub struct Checker {
    logger: Logger,
    cycle: Cycle,
    segments: Arc<SegmentLoop>,
    overlay: Arc<OverlayService>,
    queue: Arc<dyn RepairQueue>,
    last: std::sync::Mutex<CheckerStats>,
}

impl Checker {
    pub fn new(
        logger: Logger,
        cycle: Cycle,
        segments: Arc<SegmentLoop>,
        overlay: Arc<OverlayService>,
        queue: Arc<dyn RepairQueue>,
    ) -> Self {
        Self {
            logger,
            cycle,
            segments,
            overlay,
            queue,
            last: std::sync::Mutex::new(CheckerStats::default()),
        }
    }

    pub fn cycle(&self) -> &Cycle {
        &self.cycle
    }

    /// Statistics of the last completed pass.
    pub fn last_stats(&self) -> CheckerStats {
        match self.last.lock() {
            Ok(stats) => *stats,
            Err(poisoned) => *poisoned.into_inner(),
        }
    }

    /// Runs one pass over all segments.
    pub async fn identify_injured_segments(&self, cancel: &CancellationToken) -> Result<CheckerStats> {
        let reliable = self.overlay.reliable()?;
        let observer = Arc::new(CheckerObserver {
            reliable,
            queue: self.queue.clone(),
            checked: AtomicU64::new(0),
            needing_repair: AtomicU64::new(0),
            newly_queued: AtomicU64::new(0),
            irreparable: AtomicU64::new(0),
        });
        self.segments.join(cancel, observer.clone()).await?;

        let stats = CheckerStats {
            remote_segments_checked: observer.checked.load(Ordering::Relaxed),
            remote_segments_needing_repair: observer.needing_repair.load(Ordering::Relaxed),
            newly_queued: observer.newly_queued.load(Ordering::Relaxed),
            irreparable: observer.irreparable.load(Ordering::Relaxed),
        };
        match self.last.lock() {
            Ok(mut last) => *last = stats,
            Err(poisoned) => *poisoned.into_inner() = stats,
        }
        slog::info!(self.logger, "Checker pass finished";
            "checked" => stats.remote_segments_checked,
            "needing_repair" => stats.remote_segments_needing_repair,
            "irreparable" => stats.irreparable);
        Ok(stats)
    }
}

#[async_trait]
impl Service for Checker {
    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let token = &cancel;
        self.cycle
            .run(cancel.clone(), move || async move {
                self.identify_injured_segments(token).await.map(|_| ())
            })
            .await
    }

    async fn close(&self) -> Result<()> {
        self.cycle.close().await;
        Ok(())
    }
}

struct CheckerObserver {
    reliable: HashSet<NodeId>,
    queue: Arc<dyn RepairQueue>,
    checked: AtomicU64,
    needing_repair: AtomicU64,
    newly_queued: AtomicU64,
    irreparable: AtomicU64,
}

#[async_trait]
impl Observer for CheckerObserver {
    async fn remote_segment(&self, path: &SegmentPath, pointer: &Pointer) -> Result<()> {
        self.checked.fetch_add(1, Ordering::Relaxed);
        let Some(redundancy) = pointer.redundancy() else {
            return Ok(());
        };

        let lost_pieces: Vec<u16> = pointer
            .pieces()
            .iter()
            .filter(|p| !self.reliable.contains(&p.node_id))
            .map(|p| p.number)
            .collect();
        let healthy = pointer.pieces().len() - lost_pieces.len();

        if healthy < redundancy.min {
            self.irreparable.fetch_add(1, Ordering::Relaxed);
            return Ok(());
        }
        if healthy <= redundancy.repair && !lost_pieces.is_empty() {
            self.needing_repair.fetch_add(1, Ordering::Relaxed);
            let inserted = self.queue.insert(&InjuredSegment {
                path: path.to_string(),
                lost_pieces,
                inserted_at: unix_now(),
            })?;
            if inserted {
                self.newly_queued.fetch_add(1, Ordering::Relaxed);
            }
        }
        Ok(())
    }
}
