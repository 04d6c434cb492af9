//! Service supervision.
//!
//! Every long-running piece of a role implements [`Service`]. A role collects its
//! services into a [`Group`], which runs them concurrently under one cancellation
//! scope:
//!
//! ```text
//!   Group::run(cancel)
//!     ├── scope = cancel.child_token()
//!     ├── spawn service_0.run(scope) ... service_n.run(scope)
//!     ├── first genuine error  ──> scope.cancel()
//!     └── wait for all, return first genuine error (cancellations are clean exits)
//! ```
//!
//! [`Lifecycle`] guards a role's `run`/`close` pair: `run` at most once, `close`
//! effective at most once, and `close` during `run` cancels and waits for `run`
//! to return before resources are released.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use slog::Logger;
use tokio::sync::watch;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SatelliteError, errs};

/// A runnable, closeable unit of work.
#[async_trait]
pub trait Service: Send + Sync {
    /// Runs until `cancel` fires or a genuine error occurs. Returning
    /// [`SatelliteError::Canceled`] after cancellation is a clean exit.
    async fn run(&self, cancel: CancellationToken) -> Result<()>;

    /// Releases resources owned by the service.
    async fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// Named services run and closed together.
pub struct Group {
    logger: Logger,
    services: Vec<(String, Arc<dyn Service>)>,
}

impl Group {
    pub fn new(logger: Logger) -> Self {
        Self {
            logger,
            services: Vec::new(),
        }
    }

    pub fn add(&mut self, name: impl Into<String>, service: Arc<dyn Service>) {
        self.services.push((name.into(), service));
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.services.iter().map(|(name, _)| name.as_str())
    }
}

#[async_trait]
impl Service for Group {
    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let scope = cancel.child_token();
        let mut tasks = JoinSet::new();

        for (name, service) in &self.services {
            let name = name.clone();
            let service = Arc::clone(service);
            let token = scope.clone();
            tasks.spawn(async move {
                let result = errs::ignore_canceled(service.run(token).await);
                (name, result)
            });
        }

        let mut first_error: Option<SatelliteError> = None;
        while let Some(joined) = tasks.join_next().await {
            let (name, result) = match joined {
                Ok(pair) => pair,
                Err(e) => (
                    "<join>".to_string(),
                    Err(SatelliteError::Task(e.to_string())),
                ),
            };
            match result {
                Ok(()) => {
                    slog::debug!(self.logger, "Service stopped"; "service" => &name);
                }
                Err(err) => {
                    if first_error.is_none() {
                        slog::error!(self.logger, "Service failed, canceling siblings"; "service" => &name, "error" => %err);
                        scope.cancel();
                        first_error = Some(err);
                    } else {
                        slog::warn!(self.logger, "Service failed after cancellation"; "service" => &name, "error" => %err);
                    }
                }
            }
        }

        match first_error {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    /// Closes every service in reverse registration order, collecting all errors.
    async fn close(&self) -> Result<()> {
        let mut results = Vec::with_capacity(self.services.len());
        for (name, service) in self.services.iter().rev() {
            let result = service.close().await;
            if let Err(err) = &result {
                slog::warn!(self.logger, "Service close failed"; "service" => name, "error" => %err);
            }
            results.push(result);
        }
        errs::combine(results)
    }
}

/// Run/close state machine shared by all roles.
pub struct Lifecycle {
    name: String,
    started: AtomicBool,
    closed: AtomicBool,
    stop: CancellationToken,
    running: watch::Sender<bool>,
}

impl Lifecycle {
    pub fn new(name: impl Into<String>) -> Self {
        let (running, _) = watch::channel(false);
        Self {
            name: name.into(),
            started: AtomicBool::new(false),
            closed: AtomicBool::new(false),
            stop: CancellationToken::new(),
            running,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Marks the role as running and returns a guard whose token fires on either
    /// the caller's `cancel` or [`Lifecycle::stop`].
    pub fn start(&self, cancel: &CancellationToken) -> Result<RunGuard<'_>> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(SatelliteError::AlreadyStarted(self.name.clone()));
        }
        // Publish `running` before checking `closed` so a concurrent stop either
        // sees us running or we see it closed.
        self.running.send_replace(true);
        if self.closed.load(Ordering::SeqCst) {
            self.running.send_replace(false);
            return Err(SatelliteError::Closed(self.name.clone()));
        }

        let token = self.stop.child_token();
        let linked = token.clone();
        let external = cancel.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = external.cancelled() => linked.cancel(),
                _ = linked.cancelled() => {}
            }
        });

        Ok(RunGuard {
            token,
            lifecycle: self,
        })
    }

    /// Cancels an in-flight run and waits for it to return. Returns `false` when
    /// the lifecycle was already stopped.
    pub async fn stop(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.stop.cancel();
        let mut running = self.running.subscribe();
        let _ = running.wait_for(|running| !*running).await;
        true
    }
}

/// Held for the duration of a role's `run`.
pub struct RunGuard<'a> {
    token: CancellationToken,
    lifecycle: &'a Lifecycle,
}

impl RunGuard<'_> {
    pub fn token(&self) -> CancellationToken {
        self.token.clone()
    }
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.token.cancel();
        self.lifecycle.running.send_replace(false);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    struct WaitForCancel;

    #[async_trait]
    impl Service for WaitForCancel {
        async fn run(&self, cancel: CancellationToken) -> Result<()> {
            cancel.cancelled().await;
            Err(SatelliteError::Canceled)
        }
    }

    struct FailAfter(Duration);

    #[async_trait]
    impl Service for FailAfter {
        async fn run(&self, _cancel: CancellationToken) -> Result<()> {
            tokio::time::sleep(self.0).await;
            Err(SatelliteError::Task("boom".to_string()))
        }
    }

    struct CountingClose {
        closes: Arc<AtomicUsize>,
        fail: bool,
    }

    #[async_trait]
    impl Service for CountingClose {
        async fn run(&self, _cancel: CancellationToken) -> Result<()> {
            Ok(())
        }

        async fn close(&self) -> Result<()> {
            self.closes.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(SatelliteError::Closed("counting".to_string()))
            } else {
                Ok(())
            }
        }
    }

    fn logger() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_group_cancel_is_clean_exit() {
        let mut group = Group::new(logger());
        group.add("a", Arc::new(WaitForCancel));
        group.add("b", Arc::new(WaitForCancel));

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let result = tokio::time::timeout(Duration::from_secs(5), group.run(cancel)).await;
        assert!(result.expect("group should stop").is_ok());
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_group_first_error_cancels_siblings() {
        let mut group = Group::new(logger());
        group.add("waiter", Arc::new(WaitForCancel));
        group.add("failing", Arc::new(FailAfter(Duration::from_millis(10))));

        let cancel = CancellationToken::new();
        let result = tokio::time::timeout(Duration::from_secs(5), group.run(cancel.clone()))
            .await
            .expect("siblings should be canceled");

        assert!(matches!(result, Err(SatelliteError::Task(msg)) if msg == "boom"));
        // The caller's token is untouched; only the group scope was canceled.
        assert!(!cancel.is_cancelled());
    }

    #[tokio::test]
    async fn test_group_close_calls_everyone_and_combines() {
        let closes = Arc::new(AtomicUsize::new(0));
        let mut group = Group::new(logger());
        for fail in [true, false, true] {
            group.add(
                "svc",
                Arc::new(CountingClose {
                    closes: closes.clone(),
                    fail,
                }),
            );
        }

        let err = group.close().await.unwrap_err();
        assert_eq!(closes.load(Ordering::SeqCst), 3);
        assert!(matches!(err, SatelliteError::Combined(c) if c.errors().len() == 2));
    }

    #[tokio::test]
    async fn test_lifecycle_rejects_second_start() {
        let lifecycle = Lifecycle::new("core");
        let cancel = CancellationToken::new();
        let guard = lifecycle.start(&cancel).unwrap();
        assert!(matches!(
            lifecycle.start(&cancel),
            Err(SatelliteError::AlreadyStarted(_))
        ));
        drop(guard);
    }

    #[tokio::test]
    async fn test_lifecycle_start_after_stop_is_closed() {
        let lifecycle = Lifecycle::new("api");
        assert!(lifecycle.stop().await);
        assert!(!lifecycle.stop().await);
        assert!(matches!(
            lifecycle.start(&CancellationToken::new()),
            Err(SatelliteError::Closed(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_lifecycle_stop_waits_for_run() {
        let lifecycle = Arc::new(Lifecycle::new("gc"));
        let finished = Arc::new(AtomicBool::new(false));

        let runner = {
            let lifecycle = lifecycle.clone();
            let finished = finished.clone();
            tokio::spawn(async move {
                let guard = lifecycle.start(&CancellationToken::new()).unwrap();
                guard.token().cancelled().await;
                tokio::time::sleep(Duration::from_millis(20)).await;
                finished.store(true, Ordering::SeqCst);
                drop(guard);
            })
        };

        // Let the runner take the guard.
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(lifecycle.stop().await);
        assert!(finished.load(Ordering::SeqCst));
        runner.await.unwrap();
    }

    #[tokio::test]
    async fn test_external_cancel_reaches_guard_token() {
        let lifecycle = Lifecycle::new("repairer");
        let cancel = CancellationToken::new();
        let guard = lifecycle.start(&cancel).unwrap();
        let token = guard.token();
        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(5), token.cancelled())
            .await
            .expect("external cancellation should propagate");
    }
}
