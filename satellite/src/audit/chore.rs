use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use async_trait::async_trait;
use rand::Rng;
use rand::seq::SliceRandom;
use slog::Logger;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use super::Queue;
use crate::config::AuditConfig;
use crate::cycle::Cycle;
use crate::error::Result;
use crate::identity::NodeId;
use crate::lifecycle::Service;
use crate::metainfo::{Observer, Pointer, SegmentLoop, SegmentPath};

/// Fills the audit queue with a per-node sample of remote segments.
pub struct Chore {
    logger: Logger,
    cycle: Cycle,
    queue: Arc<Queue>,
    segments: Arc<SegmentLoop>,
    slots: usize,
}

impl Chore {
    pub fn new(logger: Logger, queue: Arc<Queue>, segments: Arc<SegmentLoop>, config: &AuditConfig) -> Self {
        Self {
            logger,
            cycle: Cycle::new(config.chore_interval),
            queue,
            segments,
            slots: config.slots.max(1),
        }
    }

    pub fn cycle(&self) -> &Cycle {
        &self.cycle
    }

    /// Samples segments in one loop pass and swaps them into the queue.
    pub async fn fill_queue(&self, cancel: &CancellationToken) -> Result<usize> {
        let observer = Arc::new(SampleObserver {
            slots: self.slots,
            reservoirs: Mutex::new(HashMap::new()),
        });
        self.segments.join(cancel, observer.clone()).await?;

        let reservoirs = std::mem::take(&mut *observer.reservoirs.lock().await);
        let mut seen = HashSet::new();
        let mut paths: Vec<String> = reservoirs
            .into_values()
            .flat_map(|r| r.paths)
            .filter(|p| seen.insert(p.clone()))
            .collect();
        paths.shuffle(&mut rand::thread_rng());

        let count = paths.len();
        self.queue.swap(paths).await;
        slog::debug!(self.logger, "Audit queue filled"; "segments" => count);
        Ok(count)
    }
}

#[async_trait]
impl Service for Chore {
    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let token = &cancel;
        self.cycle
            .run(cancel.clone(), move || async move {
                self.fill_queue(token).await.map(|_| ())
            })
            .await
    }

    async fn close(&self) -> Result<()> {
        self.cycle.close().await;
        Ok(())
    }
}

#[derive(Default)]
struct Reservoir {
    paths: Vec<String>,
    seen: u64,
}

impl Reservoir {
    fn sample<R: Rng>(&mut self, rng: &mut R, slots: usize, path: &str) {
        self.seen += 1;
        if self.paths.len() < slots {
            self.paths.push(path.to_string());
            return;
        }
        let pick = rng.gen_range(0..self.seen);
        if (pick as usize) < slots {
            self.paths[pick as usize] = path.to_string();
        }
    }
}

struct SampleObserver {
    slots: usize,
    reservoirs: Mutex<HashMap<NodeId, Reservoir>>,
}

#[async_trait]
impl Observer for SampleObserver {
    async fn remote_segment(&self, path: &SegmentPath, pointer: &Pointer) -> Result<()> {
        let key = path.to_string();
        let mut reservoirs = self.reservoirs.lock().await;
        let mut rng = rand::thread_rng();
        for piece in pointer.pieces() {
            reservoirs
                .entry(piece.node_id)
                .or_default()
                .sample(&mut rng, self.slots, &key);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;
    use rand::rngs::StdRng;

    #[test]
    fn test_reservoir_keeps_at_most_slots() {
        let mut rng = StdRng::seed_from_u64(7);
        let mut reservoir = Reservoir::default();
        for i in 0..100 {
            reservoir.sample(&mut rng, 3, &format!("p{i}"));
        }
        assert_eq!(reservoir.paths.len(), 3);
        assert_eq!(reservoir.seen, 100);
    }
}
