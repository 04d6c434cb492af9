use std::sync::Arc;

use async_trait::async_trait;
use slog::{Logger, o};
use tokio_util::sync::CancellationToken;

use super::PeerBase;
use crate::config::Config;
use crate::cycle::Cycle;
use crate::db::{PointerDb, SatelliteDb};
use crate::error::Result;
use crate::identity::FullIdentity;
use crate::lifecycle::Service;
use crate::metainfo::MetainfoService;
use crate::orders::{FlushChore, OrdersService, RollupsWriteCache};
use crate::overlay::OverlayService;
use crate::repair::Repairer;
use crate::revocation::RevocationDb;
use crate::version::VersionInfo;

/// Repairer role: drains the repair queue.
pub struct RepairerPeer {
    base: PeerBase,

    pub overlay: Arc<OverlayService>,
    pub metainfo: Arc<MetainfoService>,
    pub orders: Arc<OrdersService>,
    pub repairer: Arc<Repairer>,
}

impl RepairerPeer {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        logger: Logger,
        identity: Arc<FullIdentity>,
        db: Arc<dyn SatelliteDb>,
        pointer_db: Arc<dyn PointerDb>,
        revocation: Arc<RevocationDb>,
        rollups: Arc<RollupsWriteCache>,
        version_info: VersionInfo,
        config: &Config,
    ) -> Result<Self> {
        let mut base = PeerBase::new(
            "repairer",
            logger.clone(),
            identity.clone(),
            version_info,
            config.version.clone(),
            Some(revocation),
        );

        let overlay = Arc::new(OverlayService::new(
            logger.new(o!("component" => "overlay")),
            db.overlay(),
            config.overlay.node.clone(),
            config.graceful_exit.clone(),
        ));
        let metainfo = Arc::new(MetainfoService::new(
            logger.new(o!("component" => "metainfo")),
            pointer_db,
        ));
        let orders = Arc::new(OrdersService::new(
            logger.new(o!("component" => "orders")),
            identity.id(),
            rollups.clone(),
            None,
            config.orders.expiration,
        ));
        base.add(
            "orders:flush",
            Arc::new(FlushChore::new(Cycle::new(config.orders.flush_interval), rollups)),
        );

        let repairer = Arc::new(Repairer::new(
            logger.new(o!("component" => "repairer")),
            db.repair_queue(),
            metainfo.clone(),
            overlay.clone(),
            orders.clone(),
            config.repairer.clone(),
        ));
        base.add("repair:repairer", repairer.clone());

        Ok(Self {
            base,
            overlay,
            metainfo,
            orders,
            repairer,
        })
    }
}

#[async_trait]
impl Service for RepairerPeer {
    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        self.base.run(&cancel).await
    }

    async fn close(&self) -> Result<()> {
        self.base.close().await
    }
}
