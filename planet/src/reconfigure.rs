//! Extension points applied while a planet provisions satellites.

use std::sync::Arc;

use slog::Logger;

use satellite::db::{PointerDb, SatelliteDb};
use satellite::{Config, Result};

/// Replaces the master database of satellite `index` after the default one opened.
pub type SatelliteDbHook =
    Arc<dyn Fn(&Logger, usize, Arc<dyn SatelliteDb>) -> Result<Arc<dyn SatelliteDb>> + Send + Sync>;

/// Replaces the pointer database of satellite `index` after the default one opened.
pub type PointerDbHook =
    Arc<dyn Fn(&Logger, usize, Arc<dyn PointerDb>) -> Result<Arc<dyn PointerDb>> + Send + Sync>;

/// Mutates the configuration of satellite `index` after all defaults were applied.
pub type ConfigHook = Arc<dyn Fn(&Logger, usize, &mut Config) + Send + Sync>;

/// Optional hooks that let callers alter satellites at provisioning time.
///
/// A database hook receives the freshly opened store and returns the handle the
/// satellite should use, usually a wrapper around it. When a hook fails, the
/// store it was given is closed before the error is returned.
#[derive(Clone, Default)]
pub struct Reconfigure {
    pub satellite_db: Option<SatelliteDbHook>,
    pub satellite_pointer_db: Option<PointerDbHook>,
    pub satellite: Option<ConfigHook>,
}

impl std::fmt::Debug for Reconfigure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reconfigure")
            .field("satellite_db", &self.satellite_db.is_some())
            .field("satellite_pointer_db", &self.satellite_pointer_db.is_some())
            .field("satellite", &self.satellite.is_some())
            .finish()
    }
}
