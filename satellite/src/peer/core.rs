//! Core role: metadata loops, repair checking, audits, accounting and chores.

use std::sync::Arc;

use async_trait::async_trait;
use slog::{Logger, o};
use tokio_util::sync::CancellationToken;

use super::PeerBase;
use crate::accounting::{LiveAccountingCache, Tally};
use crate::audit;
use crate::config::Config;
use crate::cycle::Cycle;
use crate::db::{PointerDb, SatelliteDb};
use crate::downtime::DetectionChore;
use crate::error::Result;
use crate::expireddeletion::ExpiredDeletion;
use crate::identity::FullIdentity;
use crate::lifecycle::Service;
use crate::metainfo::{MetainfoService, SegmentLoop};
use crate::metrics::MetricsChore;
use crate::orders::{FlushChore, OrdersService, RollupsWriteCache};
use crate::overlay::OverlayService;
use crate::repair::Checker;
use crate::revocation::RevocationDb;
use crate::version::VersionInfo;

#[derive(Clone)]
pub struct AuditHandles {
    pub queue: Arc<audit::Queue>,
    pub chore: Arc<audit::Chore>,
    pub worker: Arc<audit::Worker>,
}

pub struct Core {
    base: PeerBase,

    pub overlay: Arc<OverlayService>,
    pub metainfo: Arc<MetainfoService>,
    pub segment_loop: Arc<SegmentLoop>,
    pub orders: Arc<OrdersService>,
    pub checker: Arc<Checker>,
    pub audit: AuditHandles,
    pub tally: Arc<Tally>,
    pub live_accounting: Arc<LiveAccountingCache>,
    pub expired_deletion: Arc<ExpiredDeletion>,
    pub metrics: Arc<MetricsChore>,
    pub downtime: Arc<DetectionChore>,
}

impl Core {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        logger: Logger,
        identity: Arc<FullIdentity>,
        db: Arc<dyn SatelliteDb>,
        pointer_db: Arc<dyn PointerDb>,
        revocation: Arc<RevocationDb>,
        rollups: Arc<RollupsWriteCache>,
        live_accounting: Arc<LiveAccountingCache>,
        version_info: VersionInfo,
        config: &Config,
    ) -> Result<Self> {
        let mut base = PeerBase::new(
            "core",
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
            pointer_db.clone(),
        ));
        let segment_loop = Arc::new(SegmentLoop::new(
            logger.new(o!("component" => "segment-loop")),
            pointer_db,
            config.metainfo.segment_loop.clone(),
        ));
        base.add("metainfo:segment-loop", segment_loop.clone());

        let orders = Arc::new(OrdersService::new(
            logger.new(o!("component" => "orders")),
            identity.id(),
            rollups.clone(),
            Some(live_accounting.clone()),
            config.orders.expiration,
        ));
        base.add(
            "orders:flush",
            Arc::new(FlushChore::new(Cycle::new(config.orders.flush_interval), rollups)),
        );

        let checker = Arc::new(Checker::new(
            logger.new(o!("component" => "repair-checker")),
            Cycle::new(config.checker.interval),
            segment_loop.clone(),
            overlay.clone(),
            db.repair_queue(),
        ));
        base.add("repair:checker", checker.clone());

        let audit_queue = Arc::new(audit::Queue::new());
        let audit_chore = Arc::new(audit::Chore::new(
            logger.new(o!("component" => "audit-chore")),
            audit_queue.clone(),
            segment_loop.clone(),
            &config.audit,
        ));
        base.add("audit:chore", audit_chore.clone());
        let audit_worker = Arc::new(audit::Worker::new(
            logger.new(o!("component" => "audit-worker")),
            audit_queue.clone(),
            metainfo.clone(),
            overlay.clone(),
            orders.clone(),
            &config.audit,
        ));
        base.add("audit:worker", audit_worker.clone());

        let tally = Arc::new(Tally::new(
            logger.new(o!("component" => "tally")),
            Cycle::new(config.tally.interval),
            segment_loop.clone(),
            db.accounting(),
            live_accounting.clone(),
        ));
        base.add("accounting:tally", tally.clone());

        let expired_deletion = Arc::new(ExpiredDeletion::new(
            logger.new(o!("component" => "expired-deletion")),
            segment_loop.clone(),
            metainfo.clone(),
            &config.expired_deletion,
        ));
        base.add("expired-deletion", expired_deletion.clone());

        let metrics = Arc::new(MetricsChore::new(
            logger.new(o!("component" => "metrics")),
            segment_loop.clone(),
            &config.metrics,
        ));
        base.add("metrics", metrics.clone());

        let downtime = Arc::new(DetectionChore::new(
            logger.new(o!("component" => "downtime")),
            overlay.clone(),
            &config.downtime,
        ));
        base.add("downtime:detection", downtime.clone());

        slog::debug!(logger, "Core constructed"; "services" => ?base.service_names());
        Ok(Self {
            base,
            overlay,
            metainfo,
            segment_loop,
            orders,
            checker,
            audit: AuditHandles {
                queue: audit_queue,
                chore: audit_chore,
                worker: audit_worker,
            },
            tally,
            live_accounting,
            expired_deletion,
            metrics,
            downtime,
        })
    }

    pub fn identity(&self) -> &Arc<FullIdentity> {
        self.base.identity()
    }
}

#[async_trait]
impl Service for Core {
    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        self.base.run(&cancel).await
    }

    async fn close(&self) -> Result<()> {
        self.base.close().await
    }
}
