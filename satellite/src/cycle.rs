//! Interval loop used by every chore.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::{Mutex, mpsc, oneshot};
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::error::{Result, SatelliteError};

enum Control {
    Trigger(Option<oneshot::Sender<Result<()>>>),
    Pause,
    Restart,
}

/// Runs a function once per interval until canceled.
///
/// Besides the timer, a cycle can be driven from outside: [`Cycle::trigger_wait`]
/// forces one iteration and waits for it, [`Cycle::pause`] and [`Cycle::restart`]
/// suspend and resume the timer. Requests sent before [`Cycle::run`] are
/// queued until the loop starts; [`Cycle::close`] fails them.
pub struct Cycle {
    interval: Duration,
    control: mpsc::UnboundedSender<Control>,
    inbox: Mutex<Option<mpsc::UnboundedReceiver<Control>>>,
    closed: AtomicBool,
}

impl Cycle {
    pub fn new(interval: Duration) -> Self {
        let (control, inbox) = mpsc::unbounded_channel();
        Self {
            interval: interval.max(Duration::from_millis(1)),
            control,
            inbox: Mutex::new(Some(inbox)),
            closed: AtomicBool::new(false),
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Runs `f` immediately and then on every tick. Returns
    /// [`SatelliteError::Canceled`] once `cancel` fires, or the first error of `f`.
    /// An error from an iteration requested by [`Cycle::trigger_wait`] goes to
    /// the waiter, and the loop returns it as [`SatelliteError::Task`].
    pub async fn run<F, Fut>(&self, cancel: CancellationToken, mut f: F) -> Result<()>
    where
        F: FnMut() -> Fut + Send,
        Fut: Future<Output = Result<()>> + Send,
    {
        let taken = self.inbox.lock().await.take();
        let mut inbox = match taken {
            Some(inbox) => inbox,
            None if self.is_closed() => return Err(SatelliteError::Closed("cycle".to_string())),
            None => return Err(SatelliteError::AlreadyStarted("cycle".to_string())),
        };

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut paused = false;

        loop {
            tokio::select! {
                biased;

                _ = cancel.cancelled() => return Err(SatelliteError::Canceled),

                control = inbox.recv() => match control {
                    Some(Control::Trigger(None)) => f().await?,
                    Some(Control::Trigger(Some(done))) => {
                        // The waiter gets the iteration's own error.
                        if let Err(err) = f().await {
                            let message = err.to_string();
                            let _ = done.send(Err(err));
                            return Err(SatelliteError::Task(format!(
                                "triggered iteration failed: {message}"
                            )));
                        }
                        let _ = done.send(Ok(()));
                    }
                    Some(Control::Pause) => paused = true,
                    Some(Control::Restart) => {
                        paused = false;
                        ticker.reset();
                    }
                    None => return Err(SatelliteError::Canceled),
                },

                _ = ticker.tick(), if !paused => {
                    f().await?;
                }
            }
        }
    }

    /// Requests one iteration without waiting for it.
    pub fn trigger(&self) {
        let _ = self.control.send(Control::Trigger(None));
    }

    /// Requests one iteration and waits until it completed, returning the
    /// iteration's result. Fails with [`SatelliteError::Closed`] if the loop
    /// stops or the cycle is closed before the iteration runs.
    pub async fn trigger_wait(&self) -> Result<()> {
        if self.is_closed() {
            return Err(SatelliteError::Closed("cycle".to_string()));
        }
        let (done, completed) = oneshot::channel();
        self.control
            .send(Control::Trigger(Some(done)))
            .map_err(|_| SatelliteError::Closed("cycle".to_string()))?;
        completed
            .await
            .map_err(|_| SatelliteError::Closed("cycle".to_string()))?
    }

    pub fn pause(&self) {
        let _ = self.control.send(Control::Pause);
    }

    pub fn restart(&self) {
        let _ = self.control.send(Control::Restart);
    }

    /// Drops requests still queued for a loop that never started and rejects
    /// later runs and triggers.
    pub async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.inbox.lock().await.take();
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::AtomicUsize;

    #[tokio::test(flavor = "multi_thread")]
    async fn test_trigger_wait_runs_one_iteration() {
        let cycle = Arc::new(Cycle::new(Duration::from_secs(3600)));
        let count = Arc::new(AtomicUsize::new(0));
        let cancel = CancellationToken::new();
        // Queued ahead of the first tick so only triggers drive the loop.
        cycle.pause();

        let task = {
            let cycle = cycle.clone();
            let count = count.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move {
                cycle
                    .run(cancel, move || {
                        let count = count.clone();
                        async move {
                            count.fetch_add(1, Ordering::SeqCst);
                            Ok(())
                        }
                    })
                    .await
            })
        };

        cycle.trigger_wait().await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 1);
        cycle.trigger_wait().await.unwrap();
        assert_eq!(count.load(Ordering::SeqCst), 2);

        cancel.cancel();
        assert!(matches!(task.await.unwrap(), Err(SatelliteError::Canceled)));
    }

    #[tokio::test]
    async fn test_error_stops_cycle() {
        let cycle = Cycle::new(Duration::from_millis(5));
        let result = cycle
            .run(CancellationToken::new(), || async {
                Err(SatelliteError::Task("fail".to_string()))
            })
            .await;
        assert!(matches!(result, Err(SatelliteError::Task(_))));
    }

    #[tokio::test]
    async fn test_run_twice_is_rejected() {
        let cycle = Cycle::new(Duration::from_millis(5));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let _ = cycle.run(cancel.clone(), || async { Ok(()) }).await;
        assert!(matches!(
            cycle.run(cancel, || async { Ok(()) }).await,
            Err(SatelliteError::AlreadyStarted(_))
        ));
    }

    #[tokio::test]
    async fn test_trigger_after_stop_fails() {
        let cycle = Cycle::new(Duration::from_millis(5));
        let cancel = CancellationToken::new();
        cancel.cancel();
        let _ = cycle.run(cancel, || async { Ok(()) }).await;
        assert!(cycle.trigger_wait().await.is_err());
    }

    #[tokio::test]
    async fn test_trigger_wait_on_closed_cycle_fails() {
        let cycle = Cycle::new(Duration::from_secs(3600));
        cycle.close().await;

        let result = tokio::time::timeout(Duration::from_secs(1), cycle.trigger_wait())
            .await
            .expect("trigger_wait did not return");
        assert!(matches!(result, Err(SatelliteError::Closed(_))));
        assert!(matches!(
            cycle.run(CancellationToken::new(), || async { Ok(()) }).await,
            Err(SatelliteError::Closed(_))
        ));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_close_fails_queued_trigger() {
        let cycle = Arc::new(Cycle::new(Duration::from_secs(3600)));
        let waiter = {
            let cycle = cycle.clone();
            tokio::spawn(async move { cycle.trigger_wait().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;

        cycle.close().await;
        let result = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("queued trigger was not released")
            .unwrap();
        assert!(matches!(result, Err(SatelliteError::Closed(_))));
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_trigger_wait_returns_iteration_error() {
        let cycle = Arc::new(Cycle::new(Duration::from_secs(3600)));
        cycle.pause();
        let task = {
            let cycle = cycle.clone();
            tokio::spawn(async move {
                cycle
                    .run(CancellationToken::new(), || async {
                        Err(SatelliteError::NotFound("segment".to_string()))
                    })
                    .await
            })
        };

        // Paused before the loop starts, so the trigger drives the only iteration.
        let result = cycle.trigger_wait().await;
        assert!(matches!(result, Err(SatelliteError::NotFound(_))));
        assert!(matches!(task.await.unwrap(), Err(SatelliteError::Task(_))));
    }
}
