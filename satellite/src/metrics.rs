use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use slog::Logger;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::config::MetricsConfig;
use crate::cycle::Cycle;
use crate::error::Result;
use crate::lifecycle::Service;
use crate::metainfo::{Observer, Pointer, SegmentLoop, SegmentPath};

/// Segment and object counts of one pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct SegmentCounts {
    pub remote_segments: u64,
    pub inline_segments: u64,
    pub objects: u64,
}

/// Periodically counts what the pointer database holds.
pub struct MetricsChore {
    logger: Logger,
    cycle: Cycle,
    segments: Arc<SegmentLoop>,
    last: Mutex<SegmentCounts>,
}

impl MetricsChore {
    pub fn new(logger: Logger, segments: Arc<SegmentLoop>, config: &MetricsConfig) -> Self {
        Self {
            logger,
            cycle: Cycle::new(config.chore_interval),
            segments,
            last: Mutex::new(SegmentCounts::default()),
        }
    }

    pub fn cycle(&self) -> &Cycle {
        &self.cycle
    }

    pub async fn last_counts(&self) -> SegmentCounts {
        *self.last.lock().await
    }

    pub async fn count(&self, cancel: &CancellationToken) -> Result<SegmentCounts> {
        let counter = Arc::new(Counter::default());
        self.segments.join(cancel, counter.clone()).await?;
        let counts = SegmentCounts {
            remote_segments: counter.remote.load(Ordering::Relaxed),
            inline_segments: counter.inline.load(Ordering::Relaxed),
            objects: counter.objects.load(Ordering::Relaxed),
        };
        *self.last.lock().await = counts;
        slog::info!(self.logger, "Segment counts";
            "remote" => counts.remote_segments,
            "inline" => counts.inline_segments,
            "objects" => counts.objects);
        Ok(counts)
    }
}

#[async_trait]
impl Service for MetricsChore {
    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let token = &cancel;
        self.cycle
            .run(cancel.clone(), move || async move { self.count(token).await.map(|_| ()) })
            .await
    }

    async fn close(&self) -> Result<()> {
        self.cycle.close().await;
        Ok(())
    }
}

#[derive(Default)]
struct Counter {
    remote: AtomicU64,
    inline: AtomicU64,
    objects: AtomicU64,
}

#[async_trait]
impl Observer for Counter {
    async fn remote_segment(&self, _path: &SegmentPath, _pointer: &Pointer) -> Result<()> {
        self.remote.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn inline_segment(&self, _path: &SegmentPath, _pointer: &Pointer) -> Result<()> {
        self.inline.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }

    async fn object(&self, _path: &SegmentPath, _pointer: &Pointer) -> Result<()> {
        self.objects.fetch_add(1, Ordering::Relaxed);
        Ok(())
    }
}
