//! Garbage collection: builds a bloom filter of the pieces each storage node
//! should keep. Nodes delete pieces not in their filter that are older than the
//! filter's creation time.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use slog::Logger;
use tokio::sync::Mutex;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::config::GarbageCollectionConfig;
use crate::cycle::Cycle;
use crate::error::{Result, SatelliteError};
use crate::identity::NodeId;
use crate::lifecycle::Service;
use crate::metainfo::{Observer, Pointer, SegmentLoop, SegmentPath};
use crate::time::unix_now;

const MAX_HASH_COUNT: u32 = 32;

/// Identifier of one piece as stored on a node.
pub fn piece_id(path: &SegmentPath, node_id: &NodeId, number: u16) -> [u8; 32] {
    let mut hasher = blake3::Hasher::new();
    hasher.update(path.to_string().as_bytes());
    hasher.update(node_id.as_bytes());
    hasher.update(&number.to_be_bytes());
    *hasher.finalize().as_bytes()
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BloomFilter {
    bits: Vec<u64>,
    hash_count: u32,
}

impl BloomFilter {
    /// Sizes the filter for `expected` elements at the given false positive rate.
    pub fn new(expected: usize, false_positive_rate: f64) -> Self {
        let n = expected.max(1) as f64;
        let ln2 = std::f64::consts::LN_2;
        let bit_count = (-(n * false_positive_rate.ln()) / (ln2 * ln2)).ceil().max(64.0) as usize;
        let hash_count = ((bit_count as f64 / n) * ln2).round().clamp(1.0, MAX_HASH_COUNT as f64) as u32;
        Self {
            bits: vec![0; bit_count.div_ceil(64)],
            hash_count,
        }
    }

    pub fn hash_count(&self) -> u32 {
        self.hash_count
    }

    /// Size of the filter in bytes.
    pub fn size(&self) -> usize {
        self.bits.len() * 8
    }

    pub fn add(&mut self, id: &[u8; 32]) {
        for bit in self.positions(id) {
            self.bits[bit / 64] |= 1 << (bit % 64);
        }
    }

    pub fn contains(&self, id: &[u8; 32]) -> bool {
        self.positions(id)
            .all(|bit| self.bits[bit / 64] & (1 << (bit % 64)) != 0)
    }

    fn positions(&self, id: &[u8; 32]) -> impl Iterator<Item = usize> + use<> {
        let digest = blake3::hash(id);
        let bytes = digest.as_bytes();
        let mut first = [0u8; 8];
        let mut second = [0u8; 8];
        first.copy_from_slice(&bytes[..8]);
        second.copy_from_slice(&bytes[8..16]);
        let h1 = u64::from_le_bytes(first);
        let h2 = u64::from_le_bytes(second) | 1;
        let len = (self.bits.len() * 64) as u64;
        (0..u64::from(self.hash_count)).map(move |i| (h1.wrapping_add(i.wrapping_mul(h2)) % len) as usize)
    }
}

/// Retain request for one storage node.
#[derive(Clone, Debug)]
pub struct RetainInfo {
    pub filter: BloomFilter,
    pub count: usize,
    pub created_before: u64,
}

pub struct GarbageCollection {
    logger: Logger,
    cycle: Cycle,
    segments: Arc<SegmentLoop>,
    config: GarbageCollectionConfig,
    last: Mutex<HashMap<NodeId, RetainInfo>>,
}

impl GarbageCollection {
    pub fn new(logger: Logger, segments: Arc<SegmentLoop>, config: GarbageCollectionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            logger,
            cycle: Cycle::new(config.interval),
            segments,
            config,
            last: Mutex::new(HashMap::new()),
        })
    }

    pub fn cycle(&self) -> &Cycle {
        &self.cycle
    }

    /// Retain requests produced by the last pass.
    pub async fn last_retain_infos(&self) -> HashMap<NodeId, RetainInfo> {
        self.last.lock().await.clone()
    }

    /// Builds retain filters for every node and hands them out.
    pub async fn collect(&self, cancel: &CancellationToken) -> Result<usize> {
        if !self.config.enabled {
            return Ok(0);
        }
        let observer = Arc::new(PieceTracker {
            created_before: unix_now(),
            initial_pieces: self.config.initial_pieces,
            false_positive_rate: self.config.false_positive_rate,
            infos: Mutex::new(HashMap::new()),
        });
        self.segments.join(cancel, observer.clone()).await?;
        let infos = std::mem::take(&mut *observer.infos.lock().await);

        self.send(&infos).await?;
        let nodes = infos.len();
        *self.last.lock().await = infos;
        Ok(nodes)
    }

    async fn send(&self, infos: &HashMap<NodeId, RetainInfo>) -> Result<()> {
        let mut sends = JoinSet::new();
        for (node, info) in infos {
            if sends.len() >= self.config.concurrent_sends {
                if let Some(result) = sends.join_next().await {
                    result.map_err(|e| SatelliteError::Task(e.to_string()))?;
                }
            }
            let logger = self.logger.clone();
            let node = *node;
            let (count, size) = (info.count, info.filter.size());
            sends.spawn(async move {
                slog::debug!(logger, "Retain filter ready"; "node" => %node, "pieces" => count, "bytes" => size);
            });
        }
        while let Some(result) = sends.join_next().await {
            result.map_err(|e| SatelliteError::Task(e.to_string()))?;
        }
        Ok(())
    }
}

#[async_trait]
impl Service for GarbageCollection {
    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        if !self.config.enabled {
            slog::info!(self.logger, "Garbage collection disabled");
            cancel.cancelled().await;
            return Ok(());
        }
        let token = &cancel;
        self.cycle
            .run(cancel.clone(), move || async move {
                self.collect(token).await.map(|_| ())
            })
            .await
    }

    async fn close(&self) -> Result<()> {
        self.cycle.close().await;
        Ok(())
    }
}

struct PieceTracker {
    created_before: u64,
    initial_pieces: usize,
    false_positive_rate: f64,
    infos: Mutex<HashMap<NodeId, RetainInfo>>,
}

#[async_trait]
impl Observer for PieceTracker {
    async fn remote_segment(&self, path: &SegmentPath, pointer: &Pointer) -> Result<()> {
        let mut infos = self.infos.lock().await;
        for piece in pointer.pieces() {
            let info = infos.entry(piece.node_id).or_insert_with(|| RetainInfo {
                filter: BloomFilter::new(self.initial_pieces, self.false_positive_rate),
                count: 0,
                created_before: self.created_before,
            });
            info.filter.add(&piece_id(path, &piece.node_id, piece.number));
            info.count += 1;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_contains_added_ids() {
        let mut filter = BloomFilter::new(100, 0.01);
        let ids: Vec<[u8; 32]> = (0..100u8).map(|i| *blake3::hash(&[i]).as_bytes()).collect();
        for id in &ids {
            filter.add(id);
        }
        assert!(ids.iter().all(|id| filter.contains(id)));
    }

    #[test]
    fn test_false_positive_rate_is_roughly_honoured() {
        let mut filter = BloomFilter::new(1000, 0.05);
        for i in 0..1000u32 {
            filter.add(blake3::hash(&i.to_le_bytes()).as_bytes());
        }
        let false_positives = (1000..11_000u32)
            .filter(|i| filter.contains(blake3::hash(&i.to_le_bytes()).as_bytes()))
            .count();
        assert!(false_positives < 1000, "{false_positives} false positives");
    }

    #[test]
    fn test_rejects_invalid_rate() {
        let logger = Logger::root(slog::Discard, slog::o!());
        let dir = tempfile::TempDir::new().unwrap();
        let db = Arc::new(crate::db::PointerStore::open(dir.path().join("p.redb")).unwrap());
        let segments = Arc::new(SegmentLoop::new(logger.clone(), db, Default::default()));
        let config = GarbageCollectionConfig {
            false_positive_rate: 1.5,
            ..GarbageCollectionConfig::default()
        };
        assert!(GarbageCollection::new(logger, segments, config).is_err());
    }
}
