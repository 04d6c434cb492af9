//! Bandwidth orders.
//!
//! Order limits are handed out by [`OrdersService`] when a segment is read or
//! written. The allocated bandwidth is buffered per project in a
//! [`RollupsWriteCache`] and written back to the master database in batches.

pub mod cache;
pub mod chore;
pub mod endpoint;
pub mod service;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::identity::NodeId;

pub use cache::RollupsWriteCache;
pub use chore::FlushChore;
pub use endpoint::OrdersEndpoint;
pub use service::OrdersService;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Put,
    Get,
    GetAudit,
    GetRepair,
    PutRepair,
    Delete,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Put => "put",
            Action::Get => "get",
            Action::GetAudit => "get_audit",
            Action::GetRepair => "get_repair",
            Action::PutRepair => "put_repair",
            Action::Delete => "delete",
        }
    }
}

/// Bandwidth allocated to one project for one action.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BandwidthRollup {
    pub project_id: Uuid,
    pub action: Action,
    pub bytes: u64,
}

/// Permission for one storage node to transfer up to `limit` bytes of a piece.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLimit {
    pub serial: Uuid,
    pub satellite_id: NodeId,
    pub node_id: NodeId,
    pub piece_number: u16,
    pub action: Action,
    pub limit: u64,
    pub expires_at: u64,
}
