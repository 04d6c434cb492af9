//! Segment operations exposed to uplinks: limits are enforced here and every
//! accepted write updates the live usage cache.

use std::collections::HashSet;
use std::sync::Arc;

use slog::Logger;
use uuid::Uuid;

use super::{MetainfoService, Pointer, SegmentIndex, SegmentPath};
use crate::accounting::ProjectUsage;
use crate::config::{MetainfoConfig, RsConfig};
use crate::error::{Result, SatelliteError};
use crate::identity::NodeId;
use crate::orders::{OrderLimit, OrdersService};
use crate::overlay::OverlayService;

/// Where to upload the pieces of a new remote segment.
#[derive(Clone, Debug)]
pub struct SegmentUpload {
    pub redundancy: RsConfig,
    pub limits: Vec<OrderLimit>,
}

pub struct Endpoint {
    logger: Logger,
    metainfo: Arc<MetainfoService>,
    orders: Arc<OrdersService>,
    overlay: Arc<OverlayService>,
    usage: Arc<ProjectUsage>,
    config: MetainfoConfig,
}

impl Endpoint {
    pub fn new(
        logger: Logger,
        metainfo: Arc<MetainfoService>,
        orders: Arc<OrdersService>,
        overlay: Arc<OverlayService>,
        usage: Arc<ProjectUsage>,
        config: MetainfoConfig,
    ) -> Self {
        Self {
            logger,
            metainfo,
            orders,
            overlay,
            usage,
            config,
        }
    }

    fn validate_location(&self, bucket: &str, object: &str) -> Result<()> {
        if bucket.is_empty() || bucket.contains('/') {
            return Err(SatelliteError::InvalidArgument(format!(
                "invalid bucket name {bucket:?}"
            )));
        }
        if object.is_empty() {
            return Err(SatelliteError::InvalidArgument("empty object key".to_string()));
        }
        Ok(())
    }

    async fn ensure_storage_available(&self, project_id: &Uuid) -> Result<()> {
        if self.usage.exceeds_storage_usage(project_id).await? {
            return Err(SatelliteError::UsageLimitExceeded(format!(
                "project {project_id} exceeded its storage limit"
            )));
        }
        Ok(())
    }

    /// Selects storage nodes for a new remote segment and hands out put orders.
    pub async fn create_segment(
        &self,
        project_id: Uuid,
        bucket: &str,
        object: &str,
        size: u64,
    ) -> Result<SegmentUpload> {
        self.validate_location(bucket, object)?;
        if size > self.config.max_segment_size {
            return Err(SatelliteError::InvalidArgument(format!(
                "segment size {size} exceeds maximum {}",
                self.config.max_segment_size
            )));
        }
        self.ensure_storage_available(&project_id).await?;

        let redundancy = self.config.rs;
        redundancy.validate()?;
        let nodes = self.overlay.select_storage_nodes(redundancy.total, &[])?;
        let ids: Vec<NodeId> = nodes.iter().map(|n| n.id).collect();
        let piece_size = size.div_ceil(redundancy.min as u64);
        let limits = self
            .orders
            .create_put_order_limits(project_id, &ids, piece_size)
            .await?;
        Ok(SegmentUpload { redundancy, limits })
    }

    /// Stores the pointer of an uploaded remote segment.
    pub async fn commit_segment(&self, path: &SegmentPath, pointer: Pointer) -> Result<()> {
        self.validate_location(&path.bucket, &path.object)?;
        self.validate_pointer(&pointer)?;
        if pointer.size < self.config.min_remote_segment_size && pointer.is_remote() {
            return Err(SatelliteError::InvalidArgument(format!(
                "remote segment of {} bytes is below the minimum of {}",
                pointer.size, self.config.min_remote_segment_size
            )));
        }
        self.ensure_storage_available(&path.project_id).await?;

        self.metainfo.put(path, &pointer)?;
        self.usage
            .live()
            .add_project_storage_usage(
                path.project_id,
                pointer.inline_size() as i64,
                pointer.remote_size() as i64,
            )
            .await?;
        slog::debug!(self.logger, "Segment committed"; "path" => %path, "size" => pointer.size);
        Ok(())
    }

    /// Stores a small segment directly in the pointer database.
    pub async fn put_inline_segment(
        &self,
        path: &SegmentPath,
        data: Vec<u8>,
        expires_at: Option<u64>,
        metadata: Vec<u8>,
    ) -> Result<()> {
        if data.len() as u64 > self.config.max_inline_segment_size {
            return Err(SatelliteError::InvalidArgument(format!(
                "inline segment of {} bytes exceeds maximum {}",
                data.len(),
                self.config.max_inline_segment_size
            )));
        }
        let mut pointer = Pointer::inline(data, expires_at);
        pointer.metadata = metadata;
        self.commit_segment(path, pointer).await
    }

    /// Returns the pointer and, for remote segments, get orders for every piece.
    pub async fn download_segment(
        &self,
        path: &SegmentPath,
    ) -> Result<(Pointer, Vec<OrderLimit>)> {
        if self.usage.exceeds_bandwidth_usage(&path.project_id).await? {
            return Err(SatelliteError::UsageLimitExceeded(format!(
                "project {} exceeded its bandwidth limit",
                path.project_id
            )));
        }
        let pointer = self.metainfo.get(path)?;
        let limits = if pointer.is_remote() {
            self.orders
                .create_get_order_limits(path.project_id, &pointer)
                .await?
        } else {
            Vec::new()
        };
        Ok((pointer, limits))
    }

    /// Deletes every segment of an object, last segment first.
    pub async fn delete_object(&self, project_id: Uuid, bucket: &str, object: &str) -> Result<()> {
        self.validate_location(bucket, object)?;
        let last = SegmentPath::new(project_id, SegmentIndex::Last, bucket, object);
        self.delete_segment(&last).await?;

        let mut index = 0;
        loop {
            let path = SegmentPath::new(project_id, SegmentIndex::Index(index), bucket, object);
            match self.delete_segment(&path).await {
                Ok(()) => index += 1,
                Err(SatelliteError::NotFound(_)) => break,
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    async fn delete_segment(&self, path: &SegmentPath) -> Result<()> {
        let pointer = self.metainfo.delete(path)?;
        self.usage
            .live()
            .add_project_storage_usage(
                path.project_id,
                -(pointer.inline_size() as i64),
                -(pointer.remote_size() as i64),
            )
            .await
    }

    fn validate_pointer(&self, pointer: &Pointer) -> Result<()> {
        if pointer.size > self.config.max_segment_size {
            return Err(SatelliteError::InvalidArgument(format!(
                "segment size {} exceeds maximum {}",
                pointer.size, self.config.max_segment_size
            )));
        }
        if pointer.metadata.len() as u64 > self.config.max_metadata_size {
            return Err(SatelliteError::InvalidArgument(format!(
                "metadata of {} bytes exceeds maximum {}",
                pointer.metadata.len(),
                self.config.max_metadata_size
            )));
        }
        if let Some(redundancy) = pointer.redundancy() {
            redundancy.validate()?;
            let pieces = pointer.pieces();
            if pieces.len() < redundancy.success {
                return Err(SatelliteError::InvalidArgument(format!(
                    "segment has {} pieces but needs {}",
                    pieces.len(),
                    redundancy.success
                )));
            }
            let mut numbers = HashSet::new();
            if !pieces.iter().all(|p| numbers.insert(p.number)) {
                return Err(SatelliteError::InvalidArgument(
                    "duplicate piece numbers".to_string(),
                ));
            }
        }
        Ok(())
    }
}
