//! Live usage cache.
//!
//! Tracks storage written since the last tally and recently allocated bandwidth,
//! so limit checks see uploads before the next tally run persists them.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::LiveAccountingConfig;
use crate::error::{Result, SatelliteError};

#[derive(Default)]
struct StorageDelta {
    inline: i64,
    remote: i64,
}

struct BandwidthEntry {
    bytes: u64,
    updated: Instant,
}

pub struct LiveAccountingCache {
    storage: Mutex<HashMap<Uuid, StorageDelta>>,
    bandwidth: Mutex<HashMap<Uuid, BandwidthEntry>>,
    bandwidth_ttl: Duration,
    closed: AtomicBool,
}

impl LiveAccountingCache {
    /// Opens the cache backend named by `config.storage_backend`.
    pub fn open(config: &LiveAccountingConfig) -> Result<Arc<Self>> {
        match config.storage_backend.as_str() {
            "" | "memory" => Ok(Arc::new(Self {
                storage: Mutex::new(HashMap::new()),
                bandwidth: Mutex::new(HashMap::new()),
                bandwidth_ttl: config.bandwidth_cache_ttl,
                closed: AtomicBool::new(false),
            })),
            other => Err(SatelliteError::UnsupportedBackend(format!(
                "live accounting backend {other:?}"
            ))),
        }
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(SatelliteError::Closed("live accounting cache".to_string()));
        }
        Ok(())
    }

    /// Adds (or, for deletes, subtracts) bytes written since the last tally.
    pub async fn add_project_storage_usage(
        &self,
        project_id: Uuid,
        inline: i64,
        remote: i64,
    ) -> Result<()> {
        self.ensure_open()?;
        let mut storage = self.storage.lock().await;
        let delta = storage.entry(project_id).or_default();
        delta.inline = delta.inline.saturating_add(inline);
        delta.remote = delta.remote.saturating_add(remote);
        Ok(())
    }

    /// Storage delta since the last tally.
    pub async fn get_project_storage_usage(&self, project_id: &Uuid) -> Result<i64> {
        self.ensure_open()?;
        let storage = self.storage.lock().await;
        Ok(storage
            .get(project_id)
            .map(|d| d.inline.saturating_add(d.remote))
            .unwrap_or(0))
    }

    /// Clears storage deltas after a tally persisted fresh totals.
    pub async fn reset_totals(&self) -> Result<()> {
        self.ensure_open()?;
        self.storage.lock().await.clear();
        Ok(())
    }

    pub async fn add_project_bandwidth(&self, project_id: Uuid, bytes: u64) -> Result<()> {
        self.ensure_open()?;
        let mut bandwidth = self.bandwidth.lock().await;
        let now = Instant::now();
        let entry = bandwidth.entry(project_id).or_insert(BandwidthEntry {
            bytes: 0,
            updated: now,
        });
        if now.duration_since(entry.updated) > self.bandwidth_ttl {
            entry.bytes = 0;
        }
        entry.bytes = entry.bytes.saturating_add(bytes);
        entry.updated = now;
        Ok(())
    }

    /// Recently allocated bandwidth; entries older than the TTL count as zero.
    pub async fn get_project_bandwidth(&self, project_id: &Uuid) -> Result<u64> {
        self.ensure_open()?;
        let bandwidth = self.bandwidth.lock().await;
        Ok(bandwidth
            .get(project_id)
            .filter(|e| e.updated.elapsed() <= self.bandwidth_ttl)
            .map(|e| e.bytes)
            .unwrap_or(0))
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Idempotent.
    pub fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}
