use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use super::RollupsWriteCache;
use crate::cycle::Cycle;
use crate::error::Result;
use crate::lifecycle::Service;

/// Flushes a rollup write cache on every cycle.
pub struct FlushChore {
    cycle: Cycle,
    cache: Arc<RollupsWriteCache>,
}

impl FlushChore {
    pub fn new(cycle: Cycle, cache: Arc<RollupsWriteCache>) -> Self {
        Self { cycle, cache }
    }

    pub fn cycle(&self) -> &Cycle {
        &self.cycle
    }
}

#[async_trait]
impl Service for FlushChore {
    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let cache = &self.cache;
        self.cycle.run(cancel, move || cache.flush()).await
    }

    async fn close(&self) -> Result<()> {
        self.cycle.close().await;
        Ok(())
    }
}
