use std::sync::Arc;

use uuid::Uuid;

use super::LiveAccountingCache;
use crate::config::ProjectLimitConfig;
use crate::db::{AccountingDb, OrdersDb};
use crate::error::Result;
use crate::orders::Action;

/// Usage of a project compared against its limit.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct UsageCheck {
    pub used: u64,
    pub limit: u64,
}

impl UsageCheck {
    pub fn exceeded(&self) -> bool {
        self.used >= self.limit
    }
}

/// Combines persisted tallies and rollups with the live cache to answer limit
/// checks.
pub struct ProjectUsage {
    accounting: Arc<dyn AccountingDb>,
    orders: Arc<dyn OrdersDb>,
    live: Arc<LiveAccountingCache>,
    limits: ProjectLimitConfig,
}

impl ProjectUsage {
    pub fn new(
        accounting: Arc<dyn AccountingDb>,
        orders: Arc<dyn OrdersDb>,
        live: Arc<LiveAccountingCache>,
        limits: ProjectLimitConfig,
    ) -> Self {
        Self {
            accounting,
            orders,
            live,
            limits,
        }
    }

    pub fn live(&self) -> &Arc<LiveAccountingCache> {
        &self.live
    }

    pub async fn storage_usage(&self, project_id: &Uuid) -> Result<UsageCheck> {
        let tallied = self
            .accounting
            .project_tally(project_id)?
            .map(|t| t.total_bytes())
            .unwrap_or(0);
        let delta = self.live.get_project_storage_usage(project_id).await?;
        let used = if delta >= 0 {
            tallied.saturating_add(delta as u64)
        } else {
            tallied.saturating_sub(delta.unsigned_abs())
        };
        Ok(UsageCheck {
            used,
            limit: self.limits.default_max_usage,
        })
    }

    pub async fn bandwidth_usage(&self, project_id: &Uuid) -> Result<UsageCheck> {
        let settled = self.orders.bandwidth_total(project_id, Action::Get)?;
        let recent = self.live.get_project_bandwidth(project_id).await?;
        Ok(UsageCheck {
            used: settled.saturating_add(recent),
            limit: self.limits.default_max_bandwidth,
        })
    }

    pub async fn exceeds_storage_usage(&self, project_id: &Uuid) -> Result<bool> {
        Ok(self.storage_usage(project_id).await?.exceeded())
    }

    pub async fn exceeds_bandwidth_usage(&self, project_id: &Uuid) -> Result<bool> {
        Ok(self.bandwidth_usage(project_id).await?.exceeded())
    }
}
