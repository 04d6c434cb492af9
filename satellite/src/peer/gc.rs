use std::sync::Arc;

use async_trait::async_trait;
use slog::{Logger, o};
use tokio_util::sync::CancellationToken;

use super::PeerBase;
use crate::config::Config;
use crate::db::PointerDb;
use crate::error::Result;
use crate::gc::GarbageCollection;
use crate::identity::FullIdentity;
use crate::lifecycle::Service;
use crate::metainfo::SegmentLoop;
use crate::revocation::RevocationDb;
use crate::version::VersionInfo;

/// Garbage collection role. Runs its own segment loop so retain passes do not
/// slow down the core's chores.
pub struct GarbageCollector {
    base: PeerBase,

    pub segment_loop: Arc<SegmentLoop>,
    pub garbage_collection: Arc<GarbageCollection>,
}

impl GarbageCollector {
    pub fn new(
        logger: Logger,
        identity: Arc<FullIdentity>,
        pointer_db: Arc<dyn PointerDb>,
        revocation: Arc<RevocationDb>,
        version_info: VersionInfo,
        config: &Config,
    ) -> Result<Self> {
        let mut base = PeerBase::new(
            "gc",
            logger.clone(),
            identity,
            version_info,
            config.version.clone(),
            Some(revocation),
        );
        let segment_loop = Arc::new(SegmentLoop::new(
            logger.new(o!("component" => "segment-loop")),
            pointer_db,
            config.metainfo.segment_loop.clone(),
        ));
        base.add("metainfo:segment-loop", segment_loop.clone());

        let garbage_collection = Arc::new(GarbageCollection::new(
            logger.new(o!("component" => "garbage-collection")),
            segment_loop.clone(),
            config.garbage_collection.clone(),
        )?);
        base.add("gc:retain", garbage_collection.clone());

        Ok(Self {
            base,
            segment_loop,
            garbage_collection,
        })
    }
}

#[async_trait]
impl Service for GarbageCollector {
    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        self.base.run(&cancel).await
    }

    async fn close(&self) -> Result<()> {
        self.base.close().await
    }
}
