use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use slog::{Logger, o};
use tokio_util::sync::CancellationToken;

use super::PeerBase;
use crate::config::Config;
use crate::db::SatelliteDb;
use crate::error::Result;
use crate::identity::FullIdentity;
use crate::lifecycle::Service;
use crate::server;
use crate::version::VersionInfo;
use crate::web::WebServer;

/// Admin role: the operator HTTP interface. Holds no revocation store.
pub struct Admin {
    base: PeerBase,
    pub server: Arc<WebServer>,
}

impl Admin {
    pub fn new(
        logger: Logger,
        identity: Arc<FullIdentity>,
        db: Arc<dyn SatelliteDb>,
        version_info: VersionInfo,
        config: &Config,
    ) -> Result<Self> {
        let mut base = PeerBase::new(
            "admin",
            logger.clone(),
            identity,
            version_info,
            config.version.clone(),
            None,
        );
        let server = Arc::new(WebServer::bind(
            "admin server",
            logger.new(o!("component" => "admin-server")),
            &config.admin.address,
            server::admin_router(db.console(), &config.admin.auth_token),
        )?);
        base.add("admin:server", server.clone());
        Ok(Self { base, server })
    }

    pub fn addr(&self) -> SocketAddr {
        self.server.addr()
    }
}

#[async_trait]
impl Service for Admin {
    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        self.base.run(&cancel).await
    }

    async fn close(&self) -> Result<()> {
        self.base.close().await
    }
}
