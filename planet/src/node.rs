//! Composite satellite node.
//!
//! A [`Satellite`] owns the five roles of one node plus the node's teardown
//! list, and re-exposes the handles callers usually want directly, grouped by
//! subsystem. Every handle is shared with the role that owns it; the satellite
//! never constructs a second copy.
//!
//! ```text
//!   Satellite::run(cancel)
//!     └── Group(core, api, repairer, admin, gc)   one scope, first error wins
//!
//!   Satellite::close()
//!     ├── api.close  core.close  repairer.close  admin.close  gc.close
//!     └── teardown.close   (caches, revocation stores, live accounting, databases)
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use slog::{Logger, o};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use satellite::accounting::{LiveAccountingCache, ProjectUsage, Tally};
use satellite::console::{Authorization, CreateUser, Project, ProjectInfo, User};
use satellite::contact::ContactService;
use satellite::db::RepairQueue;
use satellite::downtime::DetectionChore;
use satellite::error::errs;
use satellite::expireddeletion::ExpiredDeletion;
use satellite::gc::GarbageCollection;
use satellite::identity::FullIdentity;
use satellite::lifecycle::{Group, Lifecycle};
use satellite::mail::MailService;
use satellite::metainfo::{self, MetainfoService, SegmentLoop};
use satellite::metrics::MetricsChore;
use satellite::orders::{OrdersEndpoint, OrdersService};
use satellite::overlay::OverlayService;
use satellite::peer::api::ConsoleHandles;
use satellite::peer::core::AuditHandles;
use satellite::peer::{Admin, Api, Core, GarbageCollector, RepairerPeer};
use satellite::repair::{Checker, Repairer};
use satellite::version::VersionInfo;
use satellite::web::WebServer;
use satellite::{Config, NodeId, NodeUrl, Result, Service};

use crate::factory::{self, RoleContext, Roles};
use crate::reconfigure::Reconfigure;
use crate::resources::{self, SharedResources};
use crate::teardown::Teardown;

/// Owned by the API role.
#[derive(Clone)]
pub struct ContactHandles {
    pub service: Arc<ContactService>,
}

/// Owned by the API role.
#[derive(Clone)]
pub struct OverlayHandles {
    pub service: Arc<OverlayService>,
}

/// Service and endpoint are owned by the API role, the segment loop by the core.
#[derive(Clone)]
pub struct MetainfoHandles {
    pub service: Arc<MetainfoService>,
    pub endpoint: Arc<metainfo::Endpoint>,
    pub segment_loop: Arc<SegmentLoop>,
}

/// Owned by the API role.
#[derive(Clone)]
pub struct OrdersHandles {
    pub service: Arc<OrdersService>,
    pub endpoint: Arc<OrdersEndpoint>,
}

/// Checker owned by the core, repairer by the repairer role. The queue is a
/// view on the master database.
#[derive(Clone)]
pub struct RepairHandles {
    pub checker: Arc<Checker>,
    pub repairer: Arc<Repairer>,
    pub queue: Arc<dyn RepairQueue>,
}

/// Tally owned by the core, project usage by the API role.
#[derive(Clone)]
pub struct AccountingHandles {
    pub tally: Arc<Tally>,
    pub project_usage: Arc<ProjectUsage>,
}

/// One satellite node: five roles under a single lifecycle.
pub struct Satellite {
    name: String,
    index: usize,
    logger: Logger,
    identity: Arc<FullIdentity>,
    config: Arc<Config>,
    storage_dir: PathBuf,

    lifecycle: Lifecycle,
    roles: Group,
    teardown: Teardown,

    pub core: Arc<Core>,
    pub api: Arc<Api>,
    pub repairer: Arc<RepairerPeer>,
    pub admin: Arc<Admin>,
    pub gc: Arc<GarbageCollector>,

    pub databases: SharedResources,

    pub contact: ContactHandles,
    pub overlay: OverlayHandles,
    pub metainfo: MetainfoHandles,
    pub orders: OrdersHandles,
    pub repair: RepairHandles,
    /// Owned by the core.
    pub audit: AuditHandles,
    /// Owned by the GC role.
    pub garbage_collection: Arc<GarbageCollection>,
    /// Owned by the core.
    pub expired_deletion: Arc<ExpiredDeletion>,
    pub accounting: AccountingHandles,
    /// Opened with the core, shared with the API role.
    pub live_accounting: Arc<LiveAccountingCache>,
    /// Owned by the API role.
    pub console: ConsoleHandles,
    /// Owned by the API role.
    pub marketing: Arc<WebServer>,
    /// Owned by the API role.
    pub mail: Arc<MailService>,
    /// Owned by the core.
    pub metrics: Arc<MetricsChore>,
    /// Owned by the core.
    pub downtime: Arc<DetectionChore>,
}

impl Satellite {
    /// Opens the node's stores and constructs every role. Nothing runs until
    /// [`Satellite::run`].
    ///
    /// When any step fails, everything opened so far is released before the
    /// error is returned.
    pub async fn new(
        logger: &Logger,
        index: usize,
        identity: Arc<FullIdentity>,
        config: Config,
        storage_dir: PathBuf,
        reconfigure: &Reconfigure,
        version: VersionInfo,
    ) -> Result<Self> {
        let name = format!("satellite{index}");
        let logger = logger.new(o!("satellite" => name.clone()));
        let mut teardown = Teardown::new(logger.clone());

        let built = construct(
            &logger,
            index,
            &identity,
            &config,
            &storage_dir,
            reconfigure,
            &version,
            &mut teardown,
        );
        let (databases, roles) = match built {
            Ok(built) => built,
            Err(err) => {
                slog::error!(logger, "Failed to construct satellite"; "error" => %err);
                if let Err(close_err) = teardown.close().await {
                    slog::warn!(logger, "Failed to release resources of failed satellite"; "error" => %close_err);
                }
                return Err(err);
            }
        };

        let Roles {
            core,
            api,
            repairer,
            admin,
            gc,
        } = roles;

        let mut group = Group::new(logger.clone());
        group.add("core", core.clone());
        group.add("api", api.clone());
        group.add("repairer", repairer.clone());
        group.add("admin", admin.clone());
        group.add("gc", gc.clone());

        slog::info!(logger, "Satellite constructed";
            "id" => %identity.id(), "addr" => %api.addr(), "dir" => %storage_dir.display());

        Ok(Self {
            contact: ContactHandles {
                service: api.contact.clone(),
            },
            overlay: OverlayHandles {
                service: api.overlay.clone(),
            },
            metainfo: MetainfoHandles {
                service: api.metainfo.service.clone(),
                endpoint: api.metainfo.endpoint.clone(),
                segment_loop: core.segment_loop.clone(),
            },
            orders: OrdersHandles {
                service: api.orders.service.clone(),
                endpoint: api.orders.endpoint.clone(),
            },
            repair: RepairHandles {
                checker: core.checker.clone(),
                repairer: repairer.repairer.clone(),
                queue: databases.db.repair_queue(),
            },
            audit: core.audit.clone(),
            garbage_collection: gc.garbage_collection.clone(),
            expired_deletion: core.expired_deletion.clone(),
            accounting: AccountingHandles {
                tally: core.tally.clone(),
                project_usage: api.project_usage.clone(),
            },
            live_accounting: core.live_accounting.clone(),
            console: api.console.clone(),
            marketing: api.marketing.clone(),
            mail: api.mail.clone(),
            metrics: core.metrics.clone(),
            downtime: core.downtime.clone(),

            lifecycle: Lifecycle::new(name.clone()),
            roles: group,
            teardown,
            name,
            index,
            logger,
            identity,
            config: Arc::new(config),
            storage_dir,
            core,
            api,
            repairer,
            admin,
            gc,
            databases,
        })
    }

    /// `satellite{index}`.
    pub fn label(&self) -> &str {
        &self.name
    }

    pub fn index(&self) -> usize {
        self.index
    }

    pub fn id(&self) -> NodeId {
        self.identity.id()
    }

    pub fn identity(&self) -> &Arc<FullIdentity> {
        &self.identity
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn storage_dir(&self) -> &Path {
        &self.storage_dir
    }

    /// Public address of the API role.
    pub fn addr(&self) -> String {
        self.api.addr().to_string()
    }

    pub fn private_addr(&self) -> String {
        self.api.private_addr().to_string()
    }

    pub fn node_url(&self) -> NodeUrl {
        NodeUrl {
            id: self.id(),
            address: self.addr(),
        }
    }

    /// `<id>@<addr>`.
    pub fn url(&self) -> String {
        self.node_url().to_string()
    }

    /// Runs all roles until `cancel` fires, the node is closed, or a role fails.
    /// The first genuine role error cancels the siblings and is returned once
    /// every role has stopped.
    pub async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let guard = self.lifecycle.start(&cancel)?;
        slog::info!(self.logger, "Satellite running"; "url" => self.url());
        let result = self.roles.run(guard.token()).await;
        match &result {
            Ok(()) => slog::info!(self.logger, "Satellite stopped"),
            Err(err) => slog::error!(self.logger, "Satellite stopped with error"; "error" => %err),
        }
        result
    }

    /// Stops a running node, closes every role, then releases the teardown
    /// list. All errors are reported together. Later calls return `Ok`.
    pub async fn close(&self) -> Result<()> {
        if !self.lifecycle.stop().await {
            return Ok(());
        }

        let roles: [(&str, Arc<dyn Service>); 5] = [
            ("api", self.api.clone()),
            ("core", self.core.clone()),
            ("repairer", self.repairer.clone()),
            ("admin", self.admin.clone()),
            ("gc", self.gc.clone()),
        ];
        let mut results = Vec::with_capacity(roles.len() + 1);
        for (role, service) in roles {
            let result = service.close().await;
            if let Err(err) = &result {
                slog::warn!(self.logger, "Role close failed"; "role" => role, "error" => %err);
            }
            results.push(result);
        }
        results.push(self.teardown.close().await);

        slog::info!(self.logger, "Satellite closed");
        errs::combine(results)
    }

    /// Registers, activates and sets up billing for a user whose password is
    /// their full name.
    pub async fn add_user(&self, new_user: CreateUser, max_projects: usize) -> Result<User> {
        let console = &self.console.service;
        let reg_token = console.create_reg_token(max_projects)?;

        let new_user = CreateUser {
            password: new_user.full_name.clone(),
            ..new_user
        };
        let user = console.create_user(new_user, &reg_token.secret).await?;

        let activation_token = console.generate_activation_token(user.id, &user.email).await?;
        console.activate_account(&activation_token)?;

        let auth = self.authenticated_context(user.id).await?;
        console.payments().setup_account(&auth)?;
        Ok(auth.user)
    }

    pub async fn add_project(&self, owner_id: Uuid, name: &str) -> Result<Project> {
        let auth = self.authenticated_context(owner_id).await?;
        self.console.service.create_project(
            &auth,
            ProjectInfo {
                name: name.to_string(),
                description: String::new(),
            },
        )
    }

    /// Signs in as `user_id` with the full-name password set by
    /// [`Satellite::add_user`].
    pub async fn authenticated_context(&self, user_id: Uuid) -> Result<Authorization> {
        let console = &self.console.service;
        let user = console.get_user(user_id)?;
        let token = console.token(&user.email, &user.full_name).await?;
        console.authorize(&token)
    }
}

impl fmt::Debug for Satellite {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Satellite")
            .field("name", &self.name)
            .field("id", &self.id())
            .field("addr", &self.addr())
            .field("storage_dir", &self.storage_dir)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl Service for Satellite {
    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        Satellite::run(self, cancel).await
    }

    async fn close(&self) -> Result<()> {
        Satellite::close(self).await
    }
}

#[allow(clippy::too_many_arguments)]
fn construct(
    logger: &Logger,
    index: usize,
    identity: &Arc<FullIdentity>,
    config: &Config,
    storage_dir: &Path,
    reconfigure: &Reconfigure,
    version: &VersionInfo,
    teardown: &mut Teardown,
) -> Result<(SharedResources, Roles)> {
    std::fs::create_dir_all(storage_dir)?;
    let databases =
        resources::open_shared_resources(logger, index, storage_dir, reconfigure, teardown)?;
    let ctx = RoleContext {
        logger,
        index,
        identity,
        resources: &databases,
        config,
        version,
    };
    let roles = factory::build_roles(&ctx, teardown)?;
    Ok((databases, roles))
}
