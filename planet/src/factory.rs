//! Role factories.
//!
//! Each factory opens the per-role resources its role needs, registers them
//! with the satellite's teardown list and constructs the role. Core, API and
//! repairer get their own revocation store handle and rollup write cache; GC
//! gets a revocation store; admin gets neither. The live accounting cache is
//! opened with the core and handed to the API explicitly.

use std::sync::Arc;

use slog::{Logger, o};

use satellite::accounting::LiveAccountingCache;
use satellite::identity::FullIdentity;
use satellite::orders::RollupsWriteCache;
use satellite::peer::{Admin, Api, Core, GarbageCollector, RepairerPeer};
use satellite::revocation::RevocationDb;
use satellite::version::VersionInfo;
use satellite::{Config, Result};

use crate::resources::SharedResources;
use crate::teardown::Teardown;

/// The five roles of one satellite.
pub struct Roles {
    pub core: Arc<Core>,
    pub api: Arc<Api>,
    pub repairer: Arc<RepairerPeer>,
    pub admin: Arc<Admin>,
    pub gc: Arc<GarbageCollector>,
}

/// Everything a factory needs besides the teardown list.
pub struct RoleContext<'a> {
    pub logger: &'a Logger,
    pub index: usize,
    pub identity: &'a Arc<FullIdentity>,
    pub resources: &'a SharedResources,
    pub config: &'a Config,
    pub version: &'a VersionInfo,
}

impl RoleContext<'_> {
    /// Logger of one role, e.g. `satellite-api0`.
    pub fn role_logger(&self, role: &str) -> Logger {
        self.logger
            .new(o!("peer" => format!("satellite-{role}{}", self.index)))
    }
}

/// Builds all roles in dependency order: core, master database migration,
/// API, repairer, admin, GC.
///
/// On error the caller releases everything registered with `teardown`.
pub fn build_roles(ctx: &RoleContext<'_>, teardown: &mut Teardown) -> Result<Roles> {
    let (core, live_accounting) = new_core(ctx, teardown)?;
    ctx.resources.db.migrate_to_latest()?;
    let api = new_api(ctx, live_accounting, teardown)?;
    let repairer = new_repairer(ctx, teardown)?;
    let admin = new_admin(ctx)?;
    let gc = new_gc(ctx, teardown)?;

    slog::debug!(ctx.logger, "Constructed roles"; "index" => ctx.index);
    Ok(Roles {
        core: Arc::new(core),
        api: Arc::new(api),
        repairer: Arc::new(repairer),
        admin: Arc::new(admin),
        gc: Arc::new(gc),
    })
}

pub fn new_core(
    ctx: &RoleContext<'_>,
    teardown: &mut Teardown,
) -> Result<(Core, Arc<LiveAccountingCache>)> {
    let logger = ctx.role_logger("core");
    let revocation = open_revocation(ctx, "core", teardown)?;
    let rollups = open_rollups(ctx, &logger, "core", teardown);

    let live_accounting = LiveAccountingCache::open(&ctx.config.live_accounting)?;
    {
        let live_accounting = live_accounting.clone();
        teardown.add_sync("live accounting", move || live_accounting.close());
    }

    let core = Core::new(
        logger,
        ctx.identity.clone(),
        ctx.resources.db.clone(),
        ctx.resources.pointer_db.clone(),
        revocation,
        rollups,
        live_accounting.clone(),
        ctx.version.clone(),
        ctx.config,
    )?;
    Ok((core, live_accounting))
}

pub fn new_api(
    ctx: &RoleContext<'_>,
    live_accounting: Arc<LiveAccountingCache>,
    teardown: &mut Teardown,
) -> Result<Api> {
    let logger = ctx.role_logger("api");
    let revocation = open_revocation(ctx, "api", teardown)?;
    let rollups = open_rollups(ctx, &logger, "api", teardown);
    Api::new(
        logger,
        ctx.identity.clone(),
        ctx.resources.db.clone(),
        ctx.resources.pointer_db.clone(),
        revocation,
        rollups,
        live_accounting,
        ctx.version.clone(),
        ctx.config,
    )
}

pub fn new_repairer(ctx: &RoleContext<'_>, teardown: &mut Teardown) -> Result<RepairerPeer> {
    let logger = ctx.role_logger("repairer");
    let revocation = open_revocation(ctx, "repairer", teardown)?;
    let rollups = open_rollups(ctx, &logger, "repairer", teardown);
    RepairerPeer::new(
        logger,
        ctx.identity.clone(),
        ctx.resources.db.clone(),
        ctx.resources.pointer_db.clone(),
        revocation,
        rollups,
        ctx.version.clone(),
        ctx.config,
    )
}

pub fn new_admin(ctx: &RoleContext<'_>) -> Result<Admin> {
    Admin::new(
        ctx.role_logger("admin"),
        ctx.identity.clone(),
        ctx.resources.db.clone(),
        ctx.version.clone(),
        ctx.config,
    )
}

pub fn new_gc(ctx: &RoleContext<'_>, teardown: &mut Teardown) -> Result<GarbageCollector> {
    let revocation = open_revocation(ctx, "gc", teardown)?;
    GarbageCollector::new(
        ctx.role_logger("gc"),
        ctx.identity.clone(),
        ctx.resources.pointer_db.clone(),
        revocation,
        ctx.version.clone(),
        ctx.config,
    )
}

fn open_revocation(
    ctx: &RoleContext<'_>,
    role: &str,
    teardown: &mut Teardown,
) -> Result<Arc<RevocationDb>> {
    let revocation = Arc::new(RevocationDb::open(&ctx.config.server.revocation_db_url)?);
    let registered = revocation.clone();
    teardown.add_sync(format!("{role} revocation store"), move || registered.close());
    Ok(revocation)
}

fn open_rollups(
    ctx: &RoleContext<'_>,
    logger: &Logger,
    role: &str,
    teardown: &mut Teardown,
) -> Arc<RollupsWriteCache> {
    let rollups = Arc::new(RollupsWriteCache::new(
        logger.new(o!("component" => "rollups-write-cache")),
        ctx.resources.db.orders(),
        ctx.config.orders.flush_batch_size,
    ));
    let registered = rollups.clone();
    teardown.add(format!("{role} rollups write cache"), move || async move {
        registered.close_and_flush().await
    });
    rollups
}
