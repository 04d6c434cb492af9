//! The five satellite roles.
//!
//! Each role wires its services at construction and only starts them in `run`.
//! Construction may bind listeners so addresses are known early, but spawns no
//! tasks. Resources handed in by the caller (databases, revocation store, write
//! caches, the live accounting cache) are owned by the caller and are not closed
//! by the role.

pub mod admin;
pub mod api;
pub mod core;
pub mod gc;
pub mod repairer;

use std::sync::Arc;

use slog::Logger;
use tokio_util::sync::CancellationToken;

use crate::config::VersionConfig;
use crate::error::Result;
use crate::identity::FullIdentity;
use crate::lifecycle::{Group, Lifecycle, Service};
use crate::revocation::RevocationDb;
use crate::version::{self, VersionInfo};

pub use admin::Admin;
pub use api::Api;
pub use self::core::Core;
pub use gc::GarbageCollector;
pub use repairer::RepairerPeer;

/// Run/close plumbing shared by the roles.
pub(crate) struct PeerBase {
    logger: Logger,
    identity: Arc<FullIdentity>,
    lifecycle: Lifecycle,
    version: version::Checker,
    revocation: Option<Arc<RevocationDb>>,
    services: Group,
}

impl PeerBase {
    pub(crate) fn new(
        name: &str,
        logger: Logger,
        identity: Arc<FullIdentity>,
        version_info: VersionInfo,
        version_config: VersionConfig,
        revocation: Option<Arc<RevocationDb>>,
    ) -> Self {
        Self {
            services: Group::new(logger.clone()),
            logger,
            identity,
            lifecycle: Lifecycle::new(name),
            version: version::Checker::new(version_info, version_config),
            revocation,
        }
    }

    pub(crate) fn add(&mut self, name: &str, service: Arc<dyn Service>) {
        self.services.add(name, service);
    }

    pub(crate) fn identity(&self) -> &Arc<FullIdentity> {
        &self.identity
    }

    pub(crate) fn service_names(&self) -> Vec<String> {
        self.services.names().map(str::to_string).collect()
    }

    /// Checks version and revocation, then runs every service until `cancel`
    /// fires, a service fails, or the role is closed.
    pub(crate) async fn run(&self, cancel: &CancellationToken) -> Result<()> {
        let guard = self.lifecycle.start(cancel)?;
        self.version.check_version()?;
        if let Some(revocation) = &self.revocation {
            revocation.check(&self.identity.id())?;
        }
        slog::info!(self.logger, "Role running";
            "role" => self.lifecycle.name(), "services" => self.services.len());
        let result = self.services.run(guard.token()).await;
        slog::info!(self.logger, "Role stopped"; "role" => self.lifecycle.name());
        result
    }

    /// Stops a running role and closes its services. Later calls are no-ops.
    pub(crate) async fn close(&self) -> Result<()> {
        if !self.lifecycle.stop().await {
            return Ok(());
        }
        self.services.close().await
    }
}
