//! API role: public and private listeners, contact, overlay, metainfo and
//! orders endpoints, console, marketing and mail.

use std::net::SocketAddr;
use std::sync::Arc;

use async_trait::async_trait;
use slog::{Logger, o};
use tokio_util::sync::CancellationToken;

use super::PeerBase;
use crate::accounting::{LiveAccountingCache, ProjectUsage};
use crate::config::Config;
use crate::console;
use crate::console::payments::PaymentsService;
use crate::contact::ContactService;
use crate::cycle::Cycle;
use crate::db::{PointerDb, SatelliteDb};
use crate::error::{Result, SatelliteError};
use crate::identity::{FullIdentity, NodeId, NodeUrl};
use crate::lifecycle::Service;
use crate::mail::MailService;
use crate::metainfo::{self, MetainfoService};
use crate::orders::{FlushChore, OrdersEndpoint, OrdersService, RollupsWriteCache};
use crate::overlay::OverlayService;
use crate::revocation::RevocationDb;
use crate::server;
use crate::version::VersionInfo;
use crate::web::WebServer;

#[derive(Clone)]
pub struct MetainfoHandles {
    pub service: Arc<MetainfoService>,
    pub endpoint: Arc<metainfo::Endpoint>,
}

#[derive(Clone)]
pub struct OrdersHandles {
    pub service: Arc<OrdersService>,
    pub endpoint: Arc<OrdersEndpoint>,
    pub flush: Arc<FlushChore>,
}

#[derive(Clone)]
pub struct ConsoleHandles {
    pub service: Arc<console::Service>,
    pub listener: Arc<WebServer>,
}

pub struct Api {
    base: PeerBase,
    public: Arc<WebServer>,
    private: Arc<WebServer>,
    local: NodeUrl,

    pub contact: Arc<ContactService>,
    pub overlay: Arc<OverlayService>,
    pub metainfo: MetainfoHandles,
    pub orders: OrdersHandles,
    pub project_usage: Arc<ProjectUsage>,
    pub console: ConsoleHandles,
    pub marketing: Arc<WebServer>,
    pub mail: Arc<MailService>,
}

impl Api {
    /// Binds every listener. Nothing is served until `run`.
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
            "api",
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

        // The public listener is bound first: its address is the node's contact
        // address unless an external one is configured.
        let public_listener = std::net::TcpListener::bind(&config.server.address).map_err(|e| {
            SatelliteError::Config(format!(
                "public server: failed to bind {}: {e}",
                config.server.address
            ))
        })?;
        let public_addr = public_listener.local_addr()?;
        let local = NodeUrl {
            id: identity.id(),
            address: if config.contact.external_address.is_empty() {
                public_addr.to_string()
            } else {
                config.contact.external_address.clone()
            },
        };
        let contact = Arc::new(ContactService::new(
            logger.new(o!("component" => "contact")),
            local.clone(),
            overlay.clone(),
        ));
        let public = Arc::new(WebServer::from_listener(
            "public server",
            logger.new(o!("component" => "public-server")),
            public_listener,
            server::public_router(contact.clone()),
        )?);
        base.add("server:public", public.clone());
        let private = Arc::new(WebServer::bind(
            "private server",
            logger.new(o!("component" => "private-server")),
            &config.server.private_address,
            server::private_router(contact.clone()),
        )?);
        base.add("server:private", private.clone());

        let metainfo_service = Arc::new(MetainfoService::new(
            logger.new(o!("component" => "metainfo")),
            pointer_db,
        ));
        let orders_service = Arc::new(OrdersService::new(
            logger.new(o!("component" => "orders")),
            identity.id(),
            rollups.clone(),
            Some(live_accounting.clone()),
            config.orders.expiration,
        ));
        let orders_endpoint = Arc::new(OrdersEndpoint::new(
            logger.new(o!("component" => "orders-endpoint")),
            identity.id(),
        ));
        let flush = Arc::new(FlushChore::new(Cycle::new(config.orders.flush_interval), rollups));
        base.add("orders:flush", flush.clone());

        let project_usage = Arc::new(ProjectUsage::new(
            db.accounting(),
            db.orders(),
            live_accounting,
            config.metainfo.project_limits.clone(),
        ));
        let metainfo_endpoint = Arc::new(metainfo::Endpoint::new(
            logger.new(o!("component" => "metainfo-endpoint")),
            metainfo_service.clone(),
            orders_service.clone(),
            overlay.clone(),
            project_usage.clone(),
            config.metainfo.clone(),
        ));

        let mail = Arc::new(MailService::new(
            logger.new(o!("component" => "mail")),
            &config.mail,
        )?);
        let payments = PaymentsService::new(
            logger.new(o!("component" => "payments")),
            db.console(),
            config.payments.clone(),
        );
        let console_service = Arc::new(console::Service::new(
            logger.new(o!("component" => "console")),
            db.console(),
            mail.clone(),
            payments,
            config.console.clone(),
        ));
        let console_listener = Arc::new(WebServer::bind(
            "console web",
            logger.new(o!("component" => "console-web")),
            &config.console.address,
            console::web::router(console_service.clone()),
        )?);
        base.add("console:web", console_listener.clone());

        let marketing = Arc::new(WebServer::bind(
            "marketing web",
            logger.new(o!("component" => "marketing-web")),
            &config.marketing.address,
            server::marketing_router(),
        )?);
        base.add("marketing:web", marketing.clone());

        Ok(Self {
            base,
            public,
            private,
            local,
            contact,
            overlay,
            metainfo: MetainfoHandles {
                service: metainfo_service,
                endpoint: metainfo_endpoint,
            },
            orders: OrdersHandles {
                service: orders_service,
                endpoint: orders_endpoint,
                flush,
            },
            project_usage,
            console: ConsoleHandles {
                service: console_service,
                listener: console_listener,
            },
            marketing,
            mail,
        })
    }

    pub fn id(&self) -> NodeId {
        self.base.identity().id()
    }

    pub fn addr(&self) -> SocketAddr {
        self.public.addr()
    }

    pub fn private_addr(&self) -> SocketAddr {
        self.private.addr()
    }

    pub fn local(&self) -> &NodeUrl {
        &self.local
    }
}

#[async_trait]
impl Service for Api {
    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        self.base.run(&cancel).await
    }

    async fn close(&self) -> Result<()> {
        self.base.close().await
    }
}
