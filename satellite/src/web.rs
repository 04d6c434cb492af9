//! HTTP listeners shared by the roles.
//!
//! Sockets are bound when the server is constructed so their addresses are known
//! before anything runs; requests are only served once [`Service::run`] starts.

use std::net::SocketAddr;

use async_trait::async_trait;
use axum::Router;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use slog::Logger;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;

use crate::console::ConsoleError;
use crate::error::{Result, SatelliteError};
use crate::lifecycle::Service;

pub struct WebServer {
    name: String,
    logger: Logger,
    addr: SocketAddr,
    listener: Mutex<Option<std::net::TcpListener>>,
    router: Router,
}

impl WebServer {
    pub fn bind(name: impl Into<String>, logger: Logger, address: &str, router: Router) -> Result<Self> {
        let name = name.into();
        let listener = std::net::TcpListener::bind(address).map_err(|e| {
            SatelliteError::Config(format!("{name}: failed to bind {address}: {e}"))
        })?;
        Self::from_listener(name, logger, listener, router)
    }

    /// Wraps an already bound socket.
    pub fn from_listener(
        name: impl Into<String>,
        logger: Logger,
        listener: std::net::TcpListener,
        router: Router,
    ) -> Result<Self> {
        let name = name.into();
        listener.set_nonblocking(true)?;
        let addr = listener.local_addr()?;
        slog::debug!(logger, "Listener bound"; "server" => &name, "addr" => %addr);
        Ok(Self {
            name,
            logger,
            addr,
            listener: Mutex::new(Some(listener)),
            router,
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// Releases the socket if it was never served.
    pub async fn release(&self) {
        self.listener.lock().await.take();
    }
}

#[async_trait]
impl Service for WebServer {
    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let listener = self
            .listener
            .lock()
            .await
            .take()
            .ok_or_else(|| SatelliteError::Closed(self.name.clone()))?;
        let listener = tokio::net::TcpListener::from_std(listener)?;
        slog::info!(self.logger, "Serving"; "server" => &self.name, "addr" => %self.addr);
        axum::serve(listener, self.router.clone())
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await?;
        Ok(())
    }

    async fn close(&self) -> Result<()> {
        self.release().await;
        Ok(())
    }
}

/// Maps satellite errors onto HTTP responses.
pub struct HttpError(pub SatelliteError);

impl From<SatelliteError> for HttpError {
    fn from(err: SatelliteError) -> Self {
        Self(err)
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            SatelliteError::NotFound(_) => StatusCode::NOT_FOUND,
            SatelliteError::InvalidArgument(_) => StatusCode::BAD_REQUEST,
            SatelliteError::UsageLimitExceeded(_) => StatusCode::TOO_MANY_REQUESTS,
            SatelliteError::Console(err) => match err {
                ConsoleError::InvalidCredentials
                | ConsoleError::InvalidToken(_)
                | ConsoleError::TokenExpired => StatusCode::UNAUTHORIZED,
                ConsoleError::InactiveAccount => StatusCode::FORBIDDEN,
                ConsoleError::EmailUsed(_) => StatusCode::CONFLICT,
                _ => StatusCode::BAD_REQUEST,
            },
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.0.to_string()).into_response()
    }
}

/// Token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &axum::http::HeaderMap) -> Option<&str> {
    headers
        .get(axum::http::header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::routing::get;

    #[tokio::test]
    async fn test_address_known_before_run_and_close_releases() {
        let logger = Logger::root(slog::Discard, slog::o!());
        let router = Router::new().route("/health", get(|| async { "ok" }));
        let server = WebServer::bind("test", logger, "127.0.0.1:0", router).unwrap();
        let addr = server.addr();
        assert_ne!(addr.port(), 0);

        server.release().await;
        let cancel = CancellationToken::new();
        assert!(matches!(server.run(cancel).await, Err(SatelliteError::Closed(_))));
        std::net::TcpListener::bind(addr).unwrap();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_serves_until_cancelled() {
        let logger = Logger::root(slog::Discard, slog::o!());
        let router = Router::new().route("/health", get(|| async { "ok" }));
        let server = std::sync::Arc::new(WebServer::bind("test", logger, "127.0.0.1:0", router).unwrap());
        let cancel = CancellationToken::new();
        let handle = {
            let (server, cancel) = (server.clone(), cancel.clone());
            tokio::spawn(async move { server.run(cancel).await })
        };

        let stream = tokio::net::TcpStream::connect(server.addr()).await;
        assert!(stream.is_ok());
        drop(stream);

        cancel.cancel();
        handle.await.unwrap().unwrap();
    }
}
