use std::sync::Arc;

use slog::Logger;

use crate::error::{Result, SatelliteError};
use crate::identity::NodeUrl;
use crate::overlay::{CheckInInfo, NodeDossier, OverlayService};

/// Receives storage node check-ins and knows how the satellite is reached.
pub struct ContactService {
    logger: Logger,
    local: NodeUrl,
    overlay: Arc<OverlayService>,
}

impl ContactService {
    pub fn new(logger: Logger, local: NodeUrl, overlay: Arc<OverlayService>) -> Self {
        Self {
            logger,
            local,
            overlay,
        }
    }

    /// How storage nodes and uplinks dial this satellite.
    pub fn local(&self) -> &NodeUrl {
        &self.local
    }

    pub fn check_in(&self, info: &CheckInInfo) -> Result<NodeDossier> {
        if info.id.is_zero() {
            return Err(SatelliteError::InvalidArgument("empty node id".to_string()));
        }
        if info.address.trim().is_empty() {
            return Err(SatelliteError::InvalidArgument(format!(
                "node {} reported no address",
                info.id
            )));
        }
        let node = self.overlay.update_check_in(info)?;
        slog::debug!(self.logger, "Check-in"; "node" => %info.id, "address" => &info.address);
        Ok(node)
    }
}
