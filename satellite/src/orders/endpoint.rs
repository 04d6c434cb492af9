use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};

use slog::Logger;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::OrderLimit;
use crate::error::{Result, SatelliteError};
use crate::identity::NodeId;
use crate::time::unix_now;

/// Accepts settlements from storage nodes for orders this satellite issued.
pub struct OrdersEndpoint {
    logger: Logger,
    satellite_id: NodeId,
    settled: Mutex<HashSet<Uuid>>,
    settled_bytes: AtomicU64,
}

impl OrdersEndpoint {
    pub fn new(logger: Logger, satellite_id: NodeId) -> Self {
        Self {
            logger,
            satellite_id,
            settled: Mutex::new(HashSet::new()),
            settled_bytes: AtomicU64::new(0),
        }
    }

    /// Settles `amount` bytes against `limit`. Each serial settles at most once.
    pub async fn settle(&self, limit: &OrderLimit, amount: u64) -> Result<()> {
        if limit.satellite_id != self.satellite_id {
            return Err(SatelliteError::InvalidArgument(
                "order limit issued by another satellite".to_string(),
            ));
        }
        if limit.expires_at < unix_now() {
            return Err(SatelliteError::InvalidArgument(format!(
                "order {} expired",
                limit.serial
            )));
        }
        if amount > limit.limit {
            return Err(SatelliteError::InvalidArgument(format!(
                "settled {amount} bytes but limit is {}",
                limit.limit
            )));
        }
        if !self.settled.lock().await.insert(limit.serial) {
            return Err(SatelliteError::InvalidArgument(format!(
                "order {} already settled",
                limit.serial
            )));
        }

        self.settled_bytes.fetch_add(amount, Ordering::Relaxed);
        slog::debug!(self.logger, "Order settled"; "serial" => %limit.serial, "node" => %limit.node_id, "action" => limit.action.as_str(), "amount" => amount);
        Ok(())
    }

    pub fn settled_bytes(&self) -> u64 {
        self.settled_bytes.load(Ordering::Relaxed)
    }
}
