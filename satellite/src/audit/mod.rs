//! Segment audits: the chore samples segments into the queue, the worker drains
//! it and reports outcomes to the overlay.

use std::collections::VecDeque;

use tokio::sync::Mutex;

pub mod chore;
pub mod worker;

pub use chore::Chore;
pub use worker::{Report, Reporter, Worker};

/// Segment paths waiting to be audited.
#[derive(Default)]
pub struct Queue {
    paths: Mutex<VecDeque<String>>,
}

impl Queue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the pending paths with a fresh sample.
    pub async fn swap(&self, paths: Vec<String>) {
        *self.paths.lock().await = paths.into();
    }

    pub async fn next(&self) -> Option<String> {
        self.paths.lock().await.pop_front()
    }

    pub async fn len(&self) -> usize {
        self.paths.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.paths.lock().await.is_empty()
    }
}
