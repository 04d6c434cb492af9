//! Per-satellite ownership list of resources to release on close.
//!
//! Resources are registered the moment they are opened, so a satellite whose
//! construction fails halfway can still release everything it acquired.
//! [`Teardown::close`] releases them in reverse registration order, keeps going
//! past failures and reports every error at once.

use std::future::Future;
use std::pin::Pin;

use slog::Logger;
use tokio::sync::Mutex;

use satellite::Result;
use satellite::error::errs;

type CloseFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;
type Closer = Box<dyn FnOnce() -> CloseFuture + Send>;

pub struct Teardown {
    logger: Logger,
    entries: Mutex<Vec<(String, Closer)>>,
}

impl Teardown {
    pub fn new(logger: Logger) -> Self {
        Self {
            logger,
            entries: Mutex::new(Vec::new()),
        }
    }

    /// Registers `close` to run when the list is closed.
    pub fn add<F, Fut>(&mut self, name: impl Into<String>, close: F)
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = Result<()>> + Send + 'static,
    {
        let closer: Closer = Box::new(move || Box::pin(close()));
        self.entries.get_mut().push((name.into(), closer));
    }

    /// Registers a synchronous close.
    pub fn add_sync<F>(&mut self, name: impl Into<String>, close: F)
    where
        F: FnOnce() -> Result<()> + Send + 'static,
    {
        self.add(name, move || async move { close() });
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.lock().await.is_empty()
    }

    /// Releases every registered resource, newest first. Later calls find the
    /// list empty and return `Ok`.
    pub async fn close(&self) -> Result<()> {
        let entries = std::mem::take(&mut *self.entries.lock().await);
        let mut results = Vec::with_capacity(entries.len());
        for (name, close) in entries.into_iter().rev() {
            let result = close().await;
            match &result {
                Ok(()) => slog::debug!(self.logger, "Released resource"; "resource" => &name),
                Err(err) => {
                    slog::warn!(self.logger, "Failed to release resource"; "resource" => &name, "error" => %err)
                }
            }
            results.push(result);
        }
        errs::combine(results)
    }
}
