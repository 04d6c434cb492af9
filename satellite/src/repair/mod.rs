//! Segment repair: the checker finds segments with too few healthy pieces and
//! queues them, the repairer replaces the lost pieces.

pub mod checker;
pub mod repairer;

use serde::{Deserialize, Serialize};

pub use checker::Checker;
pub use repairer::Repairer;

/// A segment waiting for repair.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct InjuredSegment {
    pub path: String,
    /// Piece numbers held by nodes that are no longer reliable.
    pub lost_pieces: Vec<u16>,
    pub inserted_at: u64,
}
