//! Planet configuration and per-satellite config defaulting.
//!
//! A [`PlanetConfig`] describes a local network: how many satellites to start,
//! how many storage nodes the network is sized for, and where ports and storage
//! directories come from. [`PlanetConfig::satellite_config`] turns it into one
//! complete [`satellite::Config`] per satellite index.
//!
//! # Example TOML
//!
//! ```toml
//! satellite_count = 2
//! storage_node_count = 10
//! base_port = 20000
//! port_gap = 10
//! storage_dir = "/tmp/planet"
//! identity_seed = 42
//!
//! [satellite.console]
//! auth_token_secret = "local-secret"
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml, Yaml},
};
use serde::{Deserialize, Serialize};
use slog::Logger;

use satellite::config::RsConfig;
use satellite::memory;
use satellite::{Config, Result, SatelliteError};

use crate::reconfigure::Reconfigure;

/// Interval used by every chore of a planet satellite. Tests drive chores with
/// `trigger_wait` instead of waiting for it.
pub const TEST_INTERVAL: Duration = Duration::from_secs(15);

/// bcrypt's lowest accepted cost.
pub const TEST_PASSWORD_COST: u32 = 4;

const LOOPBACK: &str = "127.0.0.1";

/// Port offsets inside one satellite's port block.
const PUBLIC_PORT_OFFSET: u16 = 0;
const PRIVATE_PORT_OFFSET: u16 = 1;
const ADMIN_PORT_OFFSET: u16 = 2;
const CONSOLE_PORT_OFFSET: u16 = 3;
const MARKETING_PORT_OFFSET: u16 = 4;

/// Configuration of a local satellite network.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PlanetConfig {
    /// Satellites provisioned by `planet run`.
    pub satellite_count: usize,

    /// Storage nodes the network is sized for. Drives the redundancy thresholds.
    pub storage_node_count: usize,

    /// First port of satellite 0. `0` binds every listener to an ephemeral port.
    pub base_port: u16,

    /// Ports reserved per satellite when `base_port` is set.
    pub port_gap: u16,

    /// Root of the per-satellite directories. A temporary directory when unset.
    pub storage_dir: Option<PathBuf>,

    /// Seed for deterministic identities. Fresh random identities when unset.
    pub identity_seed: Option<u64>,

    /// Template every satellite config starts from.
    pub satellite: Config,
}

impl Default for PlanetConfig {
    fn default() -> Self {
        Self {
            satellite_count: 1,
            storage_node_count: 0,
            base_port: 0,
            port_gap: 10,
            storage_dir: None,
            identity_seed: None,
            satellite: Config::default(),
        }
    }
}

impl PlanetConfig {
    /// Loads configuration from a TOML or YAML file, layered over the defaults.
    ///
    /// Environment variables with the `PLANET_` prefix override file values;
    /// nested fields use a double underscore: `PLANET_SATELLITE__TALLY__INTERVAL=...`.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut figment = Figment::new().merge(Serialized::defaults(PlanetConfig::default()));

        figment = match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => figment.merge(Toml::file(path)),
            Some("yaml") | Some("yml") => figment.merge(Yaml::file(path)),
            other => {
                return Err(SatelliteError::Config(format!(
                    "unsupported config file format: {other:?}. Use .toml, .yaml, or .yml"
                )));
            }
        };

        figment
            .merge(Env::prefixed("PLANET_").split("__"))
            .extract()
            .map_err(|e| SatelliteError::Config(e.to_string()))
    }

    /// Replaces the satellite template with a standalone satellite config file
    /// (loaded with [`Config::from_path`]). Per-index defaulting still applies
    /// on top of it.
    pub fn with_satellite_template<P: AsRef<Path>>(mut self, path: P) -> Result<Self> {
        self.satellite = Config::from_path(path)?;
        Ok(self)
    }

    /// Builds the full configuration of satellite `index`, storing its state
    /// under `storage_dir`. The reconfigure hook, if any, runs last.
    pub fn satellite_config(
        &self,
        logger: &Logger,
        index: usize,
        storage_dir: &Path,
        reconfigure: &Reconfigure,
    ) -> Result<Config> {
        let mut config = self.satellite.clone();

        config.server.address = self.listen_address(index, PUBLIC_PORT_OFFSET)?;
        config.server.private_address = self.listen_address(index, PRIVATE_PORT_OFFSET)?;
        config.server.revocation_db_url =
            format!("dir://{}", storage_dir.join("revocations").display());
        config.admin.address = self.listen_address(index, ADMIN_PORT_OFFSET)?;
        config.console.address = self.listen_address(index, CONSOLE_PORT_OFFSET)?;
        config.marketing.address = self.listen_address(index, MARKETING_PORT_OFFSET)?;
        config.contact.external_address = String::new();

        config.metainfo.rs = redundancy(self.storage_node_count, config.metainfo.rs);
        config.metainfo.segment_loop.coalesce_duration = Duration::from_secs(1);

        config.overlay.node.audit_count = 0;
        config.overlay.node.new_node_fraction = 0.0;
        config.overlay.node.online_window = Duration::from_secs(60);
        config.overlay.node.minimum_disk_space = 100 * memory::MB;

        config.orders.flush_interval = TEST_INTERVAL;
        config.checker.interval = TEST_INTERVAL;
        config.repairer.interval = TEST_INTERVAL;
        config.repairer.timeout = Duration::from_secs(60);
        config.audit.chore_interval = TEST_INTERVAL;
        config.audit.queue_interval = TEST_INTERVAL;
        config.garbage_collection.interval = TEST_INTERVAL;
        config.garbage_collection.initial_pieces = 10;
        config.expired_deletion.interval = TEST_INTERVAL;
        config.tally.interval = TEST_INTERVAL;
        config.metrics.chore_interval = TEST_INTERVAL;
        config.downtime.detection_interval = TEST_INTERVAL;

        config.console.password_cost = TEST_PASSWORD_COST;
        if config.console.auth_token_secret.is_empty() {
            config.console.auth_token_secret = format!("planet-console-secret-{index}");
        }
        config.mail.auth_type = "simulate".to_string();

        if let Some(hook) = &reconfigure.satellite {
            hook(logger, index, &mut config);
        }
        Ok(config)
    }

    fn listen_address(&self, index: usize, offset: u16) -> Result<String> {
        if self.base_port == 0 {
            return Ok(format!("{LOOPBACK}:0"));
        }
        let port = u64::from(self.base_port)
            + index as u64 * u64::from(self.port_gap)
            + u64::from(offset);
        let port = u16::try_from(port).map_err(|_| {
            SatelliteError::Config(format!(
                "satellite {index}: port {port} out of range (base {}, gap {})",
                self.base_port, self.port_gap
            ))
        })?;
        Ok(format!("{LOOPBACK}:{port}"))
    }
}

/// Redundancy thresholds for a network of `storage_nodes` nodes: 1/5, 2/5, 3/5
/// and 4/5 of the node count, each at least 1.
pub fn redundancy(storage_nodes: usize, template: RsConfig) -> RsConfig {
    let share = |fifths: usize| (storage_nodes * fifths / 5).max(1);
    RsConfig {
        erasure_share_size: template.erasure_share_size,
        min: share(1),
        repair: share(2),
        success: share(3),
        total: share(4),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write;
    use std::sync::Arc;

    use super::*;

    fn discard() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    #[test]
    fn test_redundancy_is_at_least_one() {
        for n in 0..64 {
            let rs = redundancy(n, RsConfig::default());
            assert!(rs.min >= 1 && rs.repair >= 1 && rs.success >= 1 && rs.total >= 1);
            rs.validate().unwrap();
        }
    }

    #[test]
    fn test_redundancy_fifths() {
        let rs = redundancy(10, RsConfig::default());
        assert_eq!((rs.min, rs.repair, rs.success, rs.total), (2, 4, 6, 8));

        let rs = redundancy(0, RsConfig::default());
        assert_eq!((rs.min, rs.repair, rs.success, rs.total), (1, 1, 1, 1));
    }

    #[test]
    fn test_ephemeral_ports_by_default() {
        let planet = PlanetConfig::default();
        let dir = tempfile::tempdir().unwrap();
        let config = planet
            .satellite_config(&discard(), 3, dir.path(), &Reconfigure::default())
            .unwrap();
        assert_eq!(config.server.address, "127.0.0.1:0");
        assert_eq!(config.admin.address, "127.0.0.1:0");
        assert!(config.server.revocation_db_url.starts_with("dir://"));
        assert_eq!(config.console.password_cost, TEST_PASSWORD_COST);
    }

    #[test]
    fn test_port_blocks_do_not_overlap() {
        let planet = PlanetConfig {
            base_port: 20000,
            port_gap: 10,
            ..Default::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let first = planet
            .satellite_config(&discard(), 0, dir.path(), &Reconfigure::default())
            .unwrap();
        let second = planet
            .satellite_config(&discard(), 1, dir.path(), &Reconfigure::default())
            .unwrap();

        assert_eq!(first.server.address, "127.0.0.1:20000");
        assert_eq!(first.marketing.address, "127.0.0.1:20004");
        assert_eq!(second.server.address, "127.0.0.1:20010");
        assert_eq!(second.server.private_address, "127.0.0.1:20011");
    }

    #[test]
    fn test_port_overflow_is_config_error() {
        let planet = PlanetConfig {
            base_port: 65530,
            port_gap: 10,
            ..Default::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let err = planet
            .satellite_config(&discard(), 1, dir.path(), &Reconfigure::default())
            .unwrap_err();
        assert!(matches!(err, SatelliteError::Config(_)));
    }

    #[test]
    fn test_reconfigure_hook_runs_last() {
        let reconfigure = Reconfigure {
            satellite: Some(Arc::new(|_: &Logger, index: usize, config: &mut Config| {
                config.console.password_cost = 5 + index as u32;
            })),
            ..Default::default()
        };
        let dir = tempfile::tempdir().unwrap();
        let config = PlanetConfig::default()
            .satellite_config(&discard(), 2, dir.path(), &reconfigure)
            .unwrap();
        assert_eq!(config.console.password_cost, 7);
    }

    #[test]
    fn test_from_path_toml() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "satellite_count = 3\nstorage_node_count = 10\n\n[satellite.admin]\nauth_token = \"secret\"").unwrap();

        let config = PlanetConfig::from_path(file.path()).unwrap();
        assert_eq!(config.satellite_count, 3);
        assert_eq!(config.storage_node_count, 10);
        assert_eq!(config.satellite.admin.auth_token, "secret");
        assert_eq!(config.base_port, 0);
    }

    #[test]
    fn test_satellite_template_feeds_defaulting() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "[admin]\nauth_token = \"from-template\"").unwrap();

        let config = PlanetConfig::default()
            .with_satellite_template(file.path())
            .unwrap();
        assert_eq!(config.satellite.admin.auth_token, "from-template");

        let dir = tempfile::tempdir().unwrap();
        let satellite = config
            .satellite_config(&discard(), 0, dir.path(), &Reconfigure::default())
            .unwrap();
        assert_eq!(satellite.admin.auth_token, "from-template");
        assert!(satellite.server.address.starts_with("127.0.0.1:"));
    }

    #[test]
    fn test_satellite_template_rejects_unknown_format() {
        let file = tempfile::Builder::new().suffix(".ini").tempfile().unwrap();
        let err = PlanetConfig::default()
            .with_satellite_template(file.path())
            .unwrap_err();
        assert!(matches!(err, SatelliteError::Config(_)));
    }
}
