use std::sync::Arc;
use std::time::Duration;

use slog::Logger;
use uuid::Uuid;

use super::{Action, OrderLimit, RollupsWriteCache};
use crate::accounting::LiveAccountingCache;
use crate::error::{Result, SatelliteError};
use crate::identity::NodeId;
use crate::metainfo::{Piece, Pointer};
use crate::time::unix_now;

/// Hands out order limits and records the allocated bandwidth.
pub struct OrdersService {
    logger: Logger,
    satellite_id: NodeId,
    cache: Arc<RollupsWriteCache>,
    live: Option<Arc<LiveAccountingCache>>,
    expiration: Duration,
}

impl OrdersService {
    pub fn new(
        logger: Logger,
        satellite_id: NodeId,
        cache: Arc<RollupsWriteCache>,
        live: Option<Arc<LiveAccountingCache>>,
        expiration: Duration,
    ) -> Self {
        Self {
            logger,
            satellite_id,
            cache,
            live,
            expiration,
        }
    }

    pub fn cache(&self) -> &Arc<RollupsWriteCache> {
        &self.cache
    }

    /// Limits for downloading a remote segment from every piece holder.
    pub async fn create_get_order_limits(
        &self,
        project_id: Uuid,
        pointer: &Pointer,
    ) -> Result<Vec<OrderLimit>> {
        let piece_size = piece_size(pointer)?;
        let targets = pointer.pieces().iter().map(|p| (p.node_id, p.number));
        let limits = self.limits(Action::Get, targets, piece_size);
        self.record(project_id, Action::Get, pointer.size).await?;
        Ok(limits)
    }

    /// Limits for uploading one piece to each of `nodes`.
    pub async fn create_put_order_limits(
        &self,
        project_id: Uuid,
        nodes: &[NodeId],
        piece_size: u64,
    ) -> Result<Vec<OrderLimit>> {
        let targets = nodes.iter().enumerate().map(|(i, id)| (*id, i as u16));
        let limits = self.limits(Action::Put, targets, piece_size);
        self.record(project_id, Action::Put, piece_size * nodes.len() as u64)
            .await?;
        Ok(limits)
    }

    /// Limit for auditing one piece of a segment.
    pub async fn create_audit_order_limit(
        &self,
        project_id: Uuid,
        pointer: &Pointer,
        piece: &Piece,
        share_size: u64,
    ) -> Result<OrderLimit> {
        let limit = self.order_limit(Action::GetAudit, piece.node_id, piece.number, share_size);
        self.record(project_id, Action::GetAudit, share_size).await?;
        slog::trace!(self.logger, "Created audit order limit"; "node" => %piece.node_id, "size" => pointer.size);
        Ok(limit)
    }

    /// Limits for downloading the healthy pieces of a segment under repair.
    pub async fn create_get_repair_order_limits(
        &self,
        project_id: Uuid,
        pointer: &Pointer,
        healthy: &[Piece],
    ) -> Result<Vec<OrderLimit>> {
        let piece_size = piece_size(pointer)?;
        let targets = healthy.iter().map(|p| (p.node_id, p.number));
        let limits = self.limits(Action::GetRepair, targets, piece_size);
        self.record(project_id, Action::GetRepair, piece_size * healthy.len() as u64)
            .await?;
        Ok(limits)
    }

    /// Limits for uploading replacement pieces to new nodes.
    pub async fn create_put_repair_order_limits(
        &self,
        project_id: Uuid,
        pointer: &Pointer,
        replacements: &[Piece],
    ) -> Result<Vec<OrderLimit>> {
        let piece_size = piece_size(pointer)?;
        let targets = replacements.iter().map(|p| (p.node_id, p.number));
        let limits = self.limits(Action::PutRepair, targets, piece_size);
        self.record(
            project_id,
            Action::PutRepair,
            piece_size * replacements.len() as u64,
        )
        .await?;
        Ok(limits)
    }

    fn limits(
        &self,
        action: Action,
        targets: impl Iterator<Item = (NodeId, u16)>,
        limit: u64,
    ) -> Vec<OrderLimit> {
        targets
            .map(|(node_id, number)| self.order_limit(action, node_id, number, limit))
            .collect()
    }

    fn order_limit(&self, action: Action, node_id: NodeId, piece_number: u16, limit: u64) -> OrderLimit {
        OrderLimit {
            serial: Uuid::new_v4(),
            satellite_id: self.satellite_id,
            node_id,
            piece_number,
            action,
            limit,
            expires_at: unix_now() + self.expiration.as_secs(),
        }
    }

    async fn record(&self, project_id: Uuid, action: Action, bytes: u64) -> Result<()> {
        self.cache
            .update_bucket_bandwidth(project_id, action, bytes)
            .await?;
        if action == Action::Get {
            if let Some(live) = &self.live {
                live.add_project_bandwidth(project_id, bytes).await?;
            }
        }
        Ok(())
    }
}

/// Size of one erasure share stream of a remote segment.
fn piece_size(pointer: &Pointer) -> Result<u64> {
    let rs = pointer
        .redundancy()
        .ok_or_else(|| SatelliteError::InvalidArgument("inline segments have no pieces".to_string()))?;
    let min = rs.min.max(1) as u64;
    Ok(pointer.size.div_ceil(min))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{LiveAccountingConfig, RsConfig};
    use crate::db::{SatelliteDb, SatelliteStore};
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_get_limits_cover_every_piece_and_record_bandwidth() {
        let dir = TempDir::new().unwrap();
        let db = SatelliteStore::open(dir.path().join("master.redb")).unwrap();
        let logger = Logger::root(slog::Discard, slog::o!());
        let cache = Arc::new(RollupsWriteCache::new(logger.clone(), db.orders(), 100));
        let live = LiveAccountingCache::open(&LiveAccountingConfig::default()).unwrap();
        let service = OrdersService::new(
            logger,
            NodeId([1; 32]),
            cache.clone(),
            Some(live.clone()),
            Duration::from_secs(60),
        );

        let rs = RsConfig {
            min: 2,
            repair: 3,
            success: 4,
            total: 4,
            ..RsConfig::default()
        };
        let pieces = (0..4)
            .map(|n| Piece {
                number: n,
                node_id: NodeId([n as u8 + 10; 32]),
            })
            .collect();
        let pointer = Pointer::remote(rs, pieces, 1001, None);
        let project = Uuid::new_v4();

        let limits = service.create_get_order_limits(project, &pointer).await.unwrap();
        assert_eq!(limits.len(), 4);
        assert!(limits.iter().all(|l| l.limit == 501 && l.action == Action::Get));

        assert_eq!(live.get_project_bandwidth(&project).await.unwrap(), 1001);
        cache.flush().await.unwrap();
        assert_eq!(db.orders().bandwidth_total(&project, Action::Get).unwrap(), 1001);
    }

    #[test]
    fn test_inline_pointer_has_no_piece_size() {
        assert!(piece_size(&Pointer::inline(vec![1], None)).is_err());
    }
}
