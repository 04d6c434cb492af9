//! Storage node registry: check-ins, reliability, node selection and graceful
//! exit eligibility.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use rand::seq::SliceRandom;
use serde::{Deserialize, Serialize};
use slog::Logger;

use crate::config::{GracefulExitConfig, NodeSelectionConfig};
use crate::db::OverlayDb;
use crate::error::{Result, SatelliteError};
use crate::identity::NodeId;
use crate::time::{older_than, unix_now};

/// Nodes whose audit success ratio falls below this are disqualified once they
/// have `MIN_AUDITS_FOR_DISQUALIFICATION` audits on record.
const AUDIT_DISQUALIFICATION_RATIO: f64 = 0.6;
const MIN_AUDITS_FOR_DISQUALIFICATION: u64 = 5;

const SECONDS_PER_MONTH: u64 = 30 * 24 * 3600;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditStats {
    pub success_count: u64,
    pub total_count: u64,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ExitStatus {
    pub initiated_at: Option<u64>,
    pub finished_at: Option<u64>,
}

/// Everything the satellite knows about one storage node.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct NodeDossier {
    pub id: NodeId,
    pub address: String,
    pub created_at: u64,
    pub last_contact_success: u64,
    pub last_contact_failure: u64,
    pub free_disk: u64,
    pub audit: AuditStats,
    pub disqualified: Option<u64>,
    pub exit: ExitStatus,
}

impl NodeDossier {
    pub fn is_vetted(&self, config: &NodeSelectionConfig) -> bool {
        self.audit.success_count >= config.audit_count
    }

    pub fn is_exiting(&self) -> bool {
        self.exit.initiated_at.is_some()
    }
}

/// Node information reported at check-in.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CheckInInfo {
    pub id: NodeId,
    pub address: String,
    pub free_disk: u64,
}

pub struct OverlayService {
    logger: Logger,
    db: Arc<dyn OverlayDb>,
    selection: NodeSelectionConfig,
    graceful_exit: GracefulExitConfig,
}

impl OverlayService {
    pub fn new(
        logger: Logger,
        db: Arc<dyn OverlayDb>,
        selection: NodeSelectionConfig,
        graceful_exit: GracefulExitConfig,
    ) -> Self {
        Self {
            logger,
            db,
            selection,
            graceful_exit,
        }
    }

    pub fn get(&self, id: &NodeId) -> Result<NodeDossier> {
        self.db
            .get_node(id)?
            .ok_or_else(|| SatelliteError::NotFound(format!("node {id}")))
    }

    /// Records a successful contact, creating the node on first check-in.
    pub fn update_check_in(&self, info: &CheckInInfo) -> Result<NodeDossier> {
        let now = unix_now();
        let mut address = Some(info.address.clone());
        let free_disk = info.free_disk;
        let updated = self.db.update_node(&info.id, &mut |node| {
            if let Some(address) = address.take() {
                node.address = address;
            }
            node.free_disk = free_disk;
            node.last_contact_success = now;
        })?;
        if let Some(node) = updated {
            return Ok(node);
        }

        let node = NodeDossier {
            id: info.id,
            address: info.address.clone(),
            created_at: now,
            last_contact_success: now,
            last_contact_failure: 0,
            free_disk: info.free_disk,
            audit: AuditStats::default(),
            disqualified: None,
            exit: ExitStatus::default(),
        };
        self.db.upsert_node(&node)?;
        slog::info!(self.logger, "New storage node checked in"; "node" => %info.id, "address" => &info.address);
        Ok(node)
    }

    pub fn update_contact_failure(&self, id: &NodeId) -> Result<()> {
        let now = unix_now();
        self.db
            .update_node(id, &mut |node| node.last_contact_failure = now)?
            .ok_or_else(|| SatelliteError::NotFound(format!("node {id}")))?;
        Ok(())
    }

    pub fn is_online(&self, node: &NodeDossier) -> bool {
        !older_than(node.last_contact_success, self.selection.online_window)
    }

    fn is_reliable(&self, node: &NodeDossier) -> bool {
        node.disqualified.is_none() && self.is_online(node)
    }

    /// IDs of all reliable nodes.
    pub fn reliable(&self) -> Result<HashSet<NodeId>> {
        Ok(self
            .db
            .all_nodes()?
            .into_iter()
            .filter(|n| self.is_reliable(n))
            .map(|n| n.id)
            .collect())
    }

    /// Subset of `ids` that is currently reliable.
    pub fn known_reliable(&self, ids: &[NodeId]) -> Result<Vec<NodeId>> {
        let mut reliable = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(node) = self.db.get_node(id)? {
                if self.is_reliable(&node) {
                    reliable.push(*id);
                }
            }
        }
        Ok(reliable)
    }

    /// Nodes that are registered but have not checked in within the online window.
    pub fn offline_nodes(&self) -> Result<Vec<NodeDossier>> {
        Ok(self
            .db
            .all_nodes()?
            .into_iter()
            .filter(|n| n.disqualified.is_none() && !self.is_online(n))
            .collect())
    }

    /// Picks `count` distinct nodes for new pieces, mixing in at most
    /// `new_node_fraction` unvetted nodes.
    pub fn select_storage_nodes(
        &self,
        count: usize,
        excluded: &[NodeId],
    ) -> Result<Vec<NodeDossier>> {
        let excluded: HashSet<_> = excluded.iter().copied().collect();
        let (mut vetted, mut new): (Vec<_>, Vec<_>) = self
            .db
            .all_nodes()?
            .into_iter()
            .filter(|n| {
                self.is_reliable(n)
                    && !n.is_exiting()
                    && n.free_disk >= self.selection.minimum_disk_space
                    && !excluded.contains(&n.id)
            })
            .partition(|n| n.is_vetted(&self.selection));

        let mut rng = rand::thread_rng();
        vetted.shuffle(&mut rng);
        new.shuffle(&mut rng);

        let new_count = (((count as f64) * self.selection.new_node_fraction) as usize).min(count);
        let mut selected: Vec<NodeDossier> = new.drain(..new_count.min(new.len())).collect();
        let remaining = count - selected.len();
        selected.extend(vetted.drain(..remaining.min(vetted.len())));
        // Fill from unvetted nodes when there are not enough vetted ones.
        let remaining = count - selected.len();
        selected.extend(new.drain(..remaining.min(new.len())));

        if selected.len() < count {
            return Err(SatelliteError::NotFound(format!(
                "not enough storage nodes: requested {count}, found {}",
                selected.len()
            )));
        }
        Ok(selected)
    }

    /// Records an audit outcome and disqualifies nodes that fail too often.
    pub fn update_audit(&self, id: &NodeId, success: bool) -> Result<NodeDossier> {
        let now = unix_now();
        let node = self
            .db
            .update_node(id, &mut |node| {
                node.audit.total_count += 1;
                if success {
                    node.audit.success_count += 1;
                }
                let ratio = node.audit.success_count as f64 / node.audit.total_count as f64;
                if node.disqualified.is_none()
                    && node.audit.total_count >= MIN_AUDITS_FOR_DISQUALIFICATION
                    && ratio < AUDIT_DISQUALIFICATION_RATIO
                {
                    node.disqualified = Some(now);
                }
            })?
            .ok_or_else(|| SatelliteError::NotFound(format!("node {id}")))?;
        if node.disqualified == Some(now) && !success {
            slog::warn!(self.logger, "Node disqualified"; "node" => %id, "audits" => node.audit.total_count);
        }
        Ok(node)
    }

    /// Starts graceful exit for an eligible node.
    pub fn initiate_graceful_exit(&self, id: &NodeId) -> Result<NodeDossier> {
        if !self.graceful_exit.enabled {
            return Err(SatelliteError::InvalidArgument(
                "graceful exit is disabled".to_string(),
            ));
        }
        let node = self.get(id)?;
        let min_age = Duration::from_secs(
            u64::from(self.graceful_exit.node_min_age_in_months) * SECONDS_PER_MONTH,
        );
        if !older_than(node.created_at, min_age) && !min_age.is_zero() {
            return Err(SatelliteError::InvalidArgument(format!(
                "node {id} is too young for graceful exit"
            )));
        }
        if node.disqualified.is_some() {
            return Err(SatelliteError::InvalidArgument(format!(
                "node {id} is disqualified"
            )));
        }

        let now = unix_now();
        let node = self
            .db
            .update_node(id, &mut |node| {
                node.exit.initiated_at.get_or_insert(now);
            })?
            .ok_or_else(|| SatelliteError::NotFound(format!("node {id}")))?;
        slog::info!(self.logger, "Graceful exit initiated"; "node" => %id);
        Ok(node)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{SatelliteDb, SatelliteStore};
    use tempfile::TempDir;

    fn new_overlay(dir: &TempDir, selection: NodeSelectionConfig, exit: GracefulExitConfig) -> OverlayService {
        let db = SatelliteStore::open(dir.path().join("master.redb")).unwrap();
        OverlayService::new(Logger::root(slog::Discard, slog::o!()), db.overlay(), selection, exit)
    }

    fn check_in(overlay: &OverlayService, n: u8) -> NodeId {
        let id = NodeId([n; 32]);
        overlay
            .update_check_in(&CheckInInfo {
                id,
                address: format!("127.0.0.1:{}", 9000 + n as u16),
                free_disk: u64::MAX,
            })
            .unwrap();
        id
    }

    fn selection() -> NodeSelectionConfig {
        NodeSelectionConfig {
            audit_count: 0,
            minimum_disk_space: 0,
            ..NodeSelectionConfig::default()
        }
    }

    #[test]
    fn test_check_in_registers_reliable_node() {
        let dir = TempDir::new().unwrap();
        let overlay = new_overlay(&dir, selection(), GracefulExitConfig::default());
        let id = check_in(&overlay, 1);
        assert!(overlay.reliable().unwrap().contains(&id));
        assert_eq!(overlay.known_reliable(&[id, NodeId([2; 32])]).unwrap(), vec![id]);
    }

    #[test]
    fn test_selection_excludes_and_reports_shortage() {
        let dir = TempDir::new().unwrap();
        let overlay = new_overlay(&dir, selection(), GracefulExitConfig::default());
        let ids: Vec<_> = (1..=4).map(|n| check_in(&overlay, n)).collect();

        let selected = overlay.select_storage_nodes(3, &ids[..1]).unwrap();
        assert_eq!(selected.len(), 3);
        assert!(selected.iter().all(|n| n.id != ids[0]));
        assert!(overlay.select_storage_nodes(4, &ids[..1]).is_err());
    }

    #[test]
    fn test_failed_audits_disqualify() {
        let dir = TempDir::new().unwrap();
        let overlay = new_overlay(&dir, selection(), GracefulExitConfig::default());
        let id = check_in(&overlay, 1);
        for _ in 0..MIN_AUDITS_FOR_DISQUALIFICATION {
            overlay.update_audit(&id, false).unwrap();
        }
        assert!(overlay.get(&id).unwrap().disqualified.is_some());
        assert!(overlay.reliable().unwrap().is_empty());
    }

    #[test]
    fn test_graceful_exit_requires_age() {
        let dir = TempDir::new().unwrap();
        let overlay = new_overlay(&dir, selection(), GracefulExitConfig::default());
        let id = check_in(&overlay, 1);
        assert!(overlay.initiate_graceful_exit(&id).is_err());

        let dir = TempDir::new().unwrap();
        let overlay = new_overlay(
            &dir,
            selection(),
            GracefulExitConfig {
                enabled: true,
                node_min_age_in_months: 0,
            },
        );
        let id = check_in(&overlay, 1);
        let node = overlay.initiate_graceful_exit(&id).unwrap();
        assert!(node.is_exiting());
    }
}
