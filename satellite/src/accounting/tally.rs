use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use slog::Logger;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use super::{LiveAccountingCache, StorageTally};
use crate::cycle::Cycle;
use crate::db::AccountingDb;
use crate::error::Result;
use crate::lifecycle::Service;
use crate::metainfo::{Observer, Pointer, SegmentLoop, SegmentPath};
use crate::time::unix_now;

/// Periodically sums stored bytes per project and persists the totals.
pub struct Tally {
    logger: Logger,
    cycle: Cycle,
    segments: Arc<SegmentLoop>,
    accounting: Arc<dyn AccountingDb>,
    live: Arc<LiveAccountingCache>,
}

impl Tally {
    pub fn new(
        logger: Logger,
        cycle: Cycle,
        segments: Arc<SegmentLoop>,
        accounting: Arc<dyn AccountingDb>,
        live: Arc<LiveAccountingCache>,
    ) -> Self {
        Self {
            logger,
            cycle,
            segments,
            accounting,
            live,
        }
    }

    pub fn cycle(&self) -> &Cycle {
        &self.cycle
    }

    /// Runs one tally pass.
    pub async fn tally(&self, cancel: &CancellationToken) -> Result<()> {
        let observer = Arc::new(TallyObserver::default());
        self.segments.join(cancel, observer.clone()).await?;

        let interval_end = unix_now();
        let tallies: Vec<StorageTally> = observer
            .projects
            .lock()
            .await
            .drain()
            .map(|(_, mut tally)| {
                tally.interval_end = interval_end;
                tally
            })
            .collect();

        self.accounting.save_tallies(&tallies)?;
        self.live.reset_totals().await?;
        slog::debug!(self.logger, "Tally saved"; "projects" => tallies.len());
        Ok(())
    }
}

#[async_trait]
impl Service for Tally {
    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let token = &cancel;
        self.cycle.run(cancel.clone(), move || self.tally(token)).await
    }

    async fn close(&self) -> Result<()> {
        self.cycle.close().await;
        Ok(())
    }
}

#[derive(Default)]
struct TallyObserver {
    projects: Mutex<HashMap<Uuid, StorageTally>>,
}

impl TallyObserver {
    async fn add(&self, path: &SegmentPath, pointer: &Pointer) {
        let mut projects = self.projects.lock().await;
        let tally = projects
            .entry(path.project_id)
            .or_insert_with(|| StorageTally {
                project_id: path.project_id,
                ..StorageTally::default()
            });
        tally.inline_bytes += pointer.inline_size();
        tally.remote_bytes += pointer.remote_size();
    }
}

#[async_trait]
impl Observer for TallyObserver {
    async fn remote_segment(&self, path: &SegmentPath, pointer: &Pointer) -> Result<()> {
        self.add(path, pointer).await;
        Ok(())
    }

    async fn inline_segment(&self, path: &SegmentPath, pointer: &Pointer) -> Result<()> {
        self.add(path, pointer).await;
        Ok(())
    }

    async fn object(&self, path: &SegmentPath, _pointer: &Pointer) -> Result<()> {
        let mut projects = self.projects.lock().await;
        if let Some(tally) = projects.get_mut(&path.project_id) {
            tally.object_count += 1;
        }
        Ok(())
    }
}
