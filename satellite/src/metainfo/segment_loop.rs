//! Shared iteration over the pointer database.
//!
//! Chores that need to visit every segment join the loop with an [`Observer`]
//! instead of listing the database themselves. Joins that arrive within the
//! coalesce window share one pass over the database:
//!
//! ```text
//!   join(checker) ─┐
//!   join(tally)  ──┼── wait coalesce_duration ── list pages ── observer callbacks
//!   join(audit)  ──┘                                          │
//!                                   each join resolves when the pass completes
//! ```
//!
//! An observer error detaches only that observer. A listing error is fatal: every
//! waiting join fails and [`SegmentLoop`]'s `run` returns the error.

use std::sync::Arc;

use async_trait::async_trait;
use slog::Logger;
use tokio::sync::{Mutex, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

use super::{Pointer, SegmentPath};
use crate::config::LoopConfig;
use crate::db::PointerDb;
use crate::error::{Result, SatelliteError};
use crate::lifecycle::Service;

/// Callbacks for one pass over all segments.
#[async_trait]
pub trait Observer: Send + Sync {
    async fn remote_segment(&self, path: &SegmentPath, pointer: &Pointer) -> Result<()>;

    async fn inline_segment(&self, _path: &SegmentPath, _pointer: &Pointer) -> Result<()> {
        Ok(())
    }

    /// Called for every last segment, in addition to the segment callback.
    async fn object(&self, _path: &SegmentPath, _pointer: &Pointer) -> Result<()> {
        Ok(())
    }
}

struct Join {
    observer: Arc<dyn Observer>,
    done: oneshot::Sender<Result<()>>,
}

impl Join {
    fn finish(self, result: Result<()>) {
        let _ = self.done.send(result);
    }
}

pub struct SegmentLoop {
    logger: Logger,
    db: Arc<dyn PointerDb>,
    config: LoopConfig,
    joins: mpsc::UnboundedSender<Join>,
    inbox: Mutex<Option<mpsc::UnboundedReceiver<Join>>>,
}

impl SegmentLoop {
    pub fn new(logger: Logger, db: Arc<dyn PointerDb>, config: LoopConfig) -> Self {
        let (joins, inbox) = mpsc::unbounded_channel();
        Self {
            logger,
            db,
            config,
            joins,
            inbox: Mutex::new(Some(inbox)),
        }
    }

    /// Registers `observer` for the next pass and waits until the pass finished.
    pub async fn join(&self, cancel: &CancellationToken, observer: Arc<dyn Observer>) -> Result<()> {
        let (done, finished) = oneshot::channel();
        self.joins
            .send(Join { observer, done })
            .map_err(|_| SatelliteError::Closed("segment loop".to_string()))?;

        tokio::select! {
            _ = cancel.cancelled() => Err(SatelliteError::Canceled),
            result = finished => match result {
                Ok(result) => result,
                Err(_) => Err(SatelliteError::Closed("segment loop".to_string())),
            },
        }
    }

    async fn iterate(&self, cancel: &CancellationToken, joins: &mut Vec<Join>) -> Result<()> {
        let mut start_after: Option<String> = None;
        let mut visited = 0usize;

        loop {
            if cancel.is_cancelled() {
                return Err(SatelliteError::Canceled);
            }
            let page = self
                .db
                .list(start_after.as_deref(), self.config.list_limit.max(1))?;
            let Some((last, _)) = page.last() else {
                break;
            };
            let next = last.clone();

            for (raw_path, pointer) in &page {
                let path: SegmentPath = match raw_path.parse() {
                    Ok(path) => path,
                    Err(e) => {
                        slog::warn!(self.logger, "Skipping unparsable segment path"; "path" => raw_path, "error" => %e);
                        continue;
                    }
                };
                visited += 1;

                let mut i = 0;
                while i < joins.len() {
                    let result = visit(joins[i].observer.as_ref(), &path, pointer).await;
                    match result {
                        Ok(()) => i += 1,
                        Err(e) => {
                            slog::debug!(self.logger, "Observer left the segment loop"; "error" => %e);
                            joins.swap_remove(i).finish(Err(e));
                        }
                    }
                }
                if joins.is_empty() {
                    return Ok(());
                }
            }

            if page.len() < self.config.list_limit.max(1) {
                break;
            }
            start_after = Some(next);
        }

        slog::debug!(self.logger, "Segment loop pass finished"; "segments" => visited, "observers" => joins.len());
        Ok(())
    }
}

async fn visit(observer: &dyn Observer, path: &SegmentPath, pointer: &Pointer) -> Result<()> {
    if pointer.is_remote() {
        observer.remote_segment(path, pointer).await?;
    } else {
        observer.inline_segment(path, pointer).await?;
    }
    if path.is_last() {
        observer.object(path, pointer).await?;
    }
    Ok(())
}

#[async_trait]
impl Service for SegmentLoop {
    async fn run(&self, cancel: CancellationToken) -> Result<()> {
        let mut inbox = self
            .inbox
            .lock()
            .await
            .take()
            .ok_or_else(|| SatelliteError::AlreadyStarted("segment loop".to_string()))?;

        loop {
            let first = tokio::select! {
                _ = cancel.cancelled() => return Err(SatelliteError::Canceled),
                join = inbox.recv() => match join {
                    Some(join) => join,
                    None => return Err(SatelliteError::Canceled),
                },
            };

            let mut joins = vec![first];
            let coalesce = tokio::time::sleep(self.config.coalesce_duration);
            tokio::pin!(coalesce);
            loop {
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        for join in joins {
                            join.finish(Err(SatelliteError::Canceled));
                        }
                        return Err(SatelliteError::Canceled);
                    }
                    _ = &mut coalesce => break,
                    join = inbox.recv() => match join {
                        Some(join) => joins.push(join),
                        None => break,
                    },
                }
            }

            match self.iterate(&cancel, &mut joins).await {
                Ok(()) => {
                    for join in joins {
                        join.finish(Ok(()));
                    }
                }
                Err(err) => {
                    let canceled = err.is_canceled();
                    for join in joins {
                        join.finish(Err(if canceled {
                            SatelliteError::Canceled
                        } else {
                            SatelliteError::Task(format!("segment loop failed: {err}"))
                        }));
                    }
                    if !canceled {
                        slog::error!(self.logger, "Segment loop listing failed"; "error" => %err);
                    }
                    return Err(err);
                }
            }
        }
    }
}
