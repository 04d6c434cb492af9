//! Storage and bandwidth accounting.

pub mod live;
pub mod projectusage;
pub mod tally;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

pub use live::LiveAccountingCache;
pub use projectusage::ProjectUsage;
pub use tally::Tally;

/// Bytes stored by one project as of `interval_end`.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageTally {
    pub project_id: Uuid,
    pub inline_bytes: u64,
    pub remote_bytes: u64,
    pub object_count: u64,
    pub interval_end: u64,
}

impl StorageTally {
    pub fn total_bytes(&self) -> u64 {
        self.inline_bytes.saturating_add(self.remote_bytes)
    }
}
