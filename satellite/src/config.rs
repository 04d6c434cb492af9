//! Satellite configuration.
//!
//! One [`Config`] value carries a field group per subsystem. It is resolved fully
//! before any role is constructed and shared read-only (`Arc<Config>`) with every
//! role afterwards.
//!
//! # Example TOML
//!
//! ```toml
//! [server]
//! address = "0.0.0.0:7777"
//! private_address = "127.0.0.1:7778"
//! revocation_db_url = "dir:///var/lib/satellite/revocations"
//!
//! [metainfo.rs]
//! min = 29
//! repair = 35
//! success = 80
//! total = 110
//!
//! [console]
//! address = "0.0.0.0:10100"
//! auth_token_secret = "change-me"
//! ```

use std::path::Path;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml, Yaml},
};
use serde::{Deserialize, Serialize};

use crate::error::{Result, SatelliteError};
use crate::memory;

/// Complete satellite configuration.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub admin: AdminConfig,
    pub contact: ContactConfig,
    pub overlay: OverlayConfig,
    pub metainfo: MetainfoConfig,
    pub orders: OrdersConfig,
    pub checker: CheckerConfig,
    pub repairer: RepairerConfig,
    pub audit: AuditConfig,
    pub garbage_collection: GarbageCollectionConfig,
    pub expired_deletion: ExpiredDeletionConfig,
    pub tally: TallyConfig,
    pub live_accounting: LiveAccountingConfig,
    pub payments: PaymentsConfig,
    pub mail: MailConfig,
    pub console: ConsoleConfig,
    pub marketing: MarketingConfig,
    pub version: VersionConfig,
    pub graceful_exit: GracefulExitConfig,
    pub metrics: MetricsConfig,
    pub downtime: DowntimeConfig,
}

impl Config {
    /// Loads configuration from a TOML or YAML file, layered over the defaults.
    ///
    /// Environment variables with the `SATELLITE_` prefix override file values;
    /// nested fields use a double underscore: `SATELLITE_SERVER__ADDRESS=...`.
    pub fn from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let mut figment = Figment::new().merge(Serialized::defaults(Config::default()));

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
            .merge(Env::prefixed("SATELLITE_").split("__"))
            .extract()
            .map_err(|e| SatelliteError::Config(e.to_string()))
    }
}

/// Public and private API listeners plus the revocation store location.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub address: String,
    pub private_address: String,
    /// `dir://<path>` of the revocation store. Each role opens its own handle.
    pub revocation_db_url: String,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:7777".to_string(),
            private_address: "127.0.0.1:7778".to_string(),
            revocation_db_url: "dir://revocations".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AdminConfig {
    pub address: String,
    /// Token expected in the `Authorization` header. Empty disables the interface routes.
    pub auth_token: String,
}

impl Default for AdminConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:7779".to_string(),
            auth_token: String::new(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ContactConfig {
    pub external_address: String,
    pub timeout: Duration,
}

impl Default for ContactConfig {
    fn default() -> Self {
        Self {
            external_address: String::new(),
            timeout: Duration::from_secs(600),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct NodeSelectionConfig {
    /// Minimum successful audits before a node counts as vetted.
    pub audit_count: u64,
    /// Fraction of selected nodes that may be unvetted.
    pub new_node_fraction: f64,
    /// A node is online when it checked in within this window.
    pub online_window: Duration,
    pub minimum_disk_space: u64,
}

impl Default for NodeSelectionConfig {
    fn default() -> Self {
        Self {
            audit_count: 100,
            new_node_fraction: 0.05,
            online_window: Duration::from_secs(4 * 3600),
            minimum_disk_space: 500 * memory::GB,
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct OverlayConfig {
    pub node: NodeSelectionConfig,
}

/// Erasure coding thresholds for new remote segments.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RsConfig {
    pub erasure_share_size: u64,
    pub min: usize,
    pub repair: usize,
    pub success: usize,
    pub total: usize,
}

impl Default for RsConfig {
    fn default() -> Self {
        Self {
            erasure_share_size: 256 * memory::B,
            min: 29,
            repair: 35,
            success: 80,
            total: 110,
        }
    }
}

impl RsConfig {
    /// Checks `1 <= min <= repair <= success <= total`.
    pub fn validate(&self) -> Result<()> {
        let ordered = self.min >= 1
            && self.min <= self.repair
            && self.repair <= self.success
            && self.success <= self.total;
        if !ordered {
            return Err(SatelliteError::Config(format!(
                "invalid redundancy scheme {}/{}/{}/{}",
                self.min, self.repair, self.success, self.total
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LoopConfig {
    /// How long the segment loop waits for more observers before iterating.
    pub coalesce_duration: Duration,
    pub list_limit: usize,
}

impl Default for LoopConfig {
    fn default() -> Self {
        Self {
            coalesce_duration: Duration::from_secs(5),
            list_limit: 10_000,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectLimitConfig {
    pub max_buckets: usize,
    pub default_max_usage: u64,
    pub default_max_bandwidth: u64,
}

impl Default for ProjectLimitConfig {
    fn default() -> Self {
        Self {
            max_buckets: 100,
            default_max_usage: 50 * memory::GB,
            default_max_bandwidth: 50 * memory::GB,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MetainfoConfig {
    pub min_remote_segment_size: u64,
    pub max_inline_segment_size: u64,
    pub max_segment_size: u64,
    pub max_metadata_size: u64,
    pub rs: RsConfig,
    #[serde(rename = "loop")]
    pub segment_loop: LoopConfig,
    pub project_limits: ProjectLimitConfig,
}

impl Default for MetainfoConfig {
    fn default() -> Self {
        Self {
            min_remote_segment_size: memory::KIB,
            max_inline_segment_size: 4 * memory::KIB,
            max_segment_size: 64 * memory::MIB,
            max_metadata_size: 2 * memory::KIB,
            rs: RsConfig::default(),
            segment_loop: LoopConfig::default(),
            project_limits: ProjectLimitConfig::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct OrdersConfig {
    pub expiration: Duration,
    /// Buffered rollup entries that trigger a write-back to the master database.
    pub flush_batch_size: usize,
    pub flush_interval: Duration,
}

impl Default for OrdersConfig {
    fn default() -> Self {
        Self {
            expiration: Duration::from_secs(7 * 24 * 3600),
            flush_batch_size: 1000,
            flush_interval: Duration::from_secs(60),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct CheckerConfig {
    pub interval: Duration,
    pub reliability_cache_staleness: Duration,
}

impl Default for CheckerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            reliability_cache_staleness: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct RepairerConfig {
    /// Segments processed per repairer cycle.
    pub max_repair: usize,
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for RepairerConfig {
    fn default() -> Self {
        Self {
            max_repair: 5,
            interval: Duration::from_secs(5 * 60),
            timeout: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct AuditConfig {
    pub chore_interval: Duration,
    pub queue_interval: Duration,
    /// Segments sampled per chore cycle.
    pub slots: usize,
    pub worker_concurrency: usize,
}

impl Default for AuditConfig {
    fn default() -> Self {
        Self {
            chore_interval: Duration::from_secs(5 * 60),
            queue_interval: Duration::from_secs(60),
            slots: 1,
            worker_concurrency: 2,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GarbageCollectionConfig {
    pub interval: Duration,
    pub enabled: bool,
    pub initial_pieces: usize,
    /// Target false positive rate of the per-node retain filters; must be in (0, 1).
    pub false_positive_rate: f64,
    pub concurrent_sends: usize,
}

impl Default for GarbageCollectionConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 24 * 3600),
            enabled: true,
            initial_pieces: 400_000,
            false_positive_rate: 0.1,
            concurrent_sends: 1,
        }
    }
}

impl GarbageCollectionConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.false_positive_rate > 0.0 && self.false_positive_rate < 1.0) {
            return Err(SatelliteError::Config(format!(
                "garbage collection false positive rate {} must be in (0, 1)",
                self.false_positive_rate
            )));
        }
        if self.concurrent_sends == 0 {
            return Err(SatelliteError::Config(
                "garbage collection needs at least one concurrent send".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ExpiredDeletionConfig {
    pub interval: Duration,
    pub enabled: bool,
}

impl Default for ExpiredDeletionConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            enabled: true,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct TallyConfig {
    pub interval: Duration,
}

impl Default for TallyConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct LiveAccountingConfig {
    /// Backend of the live usage cache. Only `memory` is built in.
    pub storage_backend: String,
    pub bandwidth_cache_ttl: Duration,
}

impl Default for LiveAccountingConfig {
    fn default() -> Self {
        Self {
            storage_backend: "memory".to_string(),
            bandwidth_cache_ttl: Duration::from_secs(5 * 60),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct PaymentsConfig {
    pub storage_tb_price: String,
    pub egress_tb_price: String,
    pub object_price: String,
    /// Coupon duration in billing periods.
    pub coupon_duration: u32,
    /// Coupon value in cents.
    pub coupon_value: i64,
}

impl Default for PaymentsConfig {
    fn default() -> Self {
        Self {
            storage_tb_price: "10".to_string(),
            egress_tb_price: "45".to_string(),
            object_price: "0.0000022".to_string(),
            coupon_duration: 2,
            coupon_value: 275,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub smtp_server_address: String,
    pub from: String,
    /// `simulate` records messages instead of sending them.
    pub auth_type: String,
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            smtp_server_address: String::new(),
            from: String::new(),
            auth_type: "simulate".to_string(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsoleConfig {
    pub address: String,
    pub external_address: String,
    pub auth_token_secret: String,
    pub password_cost: u32,
    pub token_expiration: Duration,
    pub default_project_limit: usize,
}

impl Default for ConsoleConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:10100".to_string(),
            external_address: String::new(),
            auth_token_secret: String::new(),
            password_cost: bcrypt::DEFAULT_COST,
            token_expiration: Duration::from_secs(24 * 3600),
            default_project_limit: 3,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MarketingConfig {
    pub address: String,
}

impl Default for MarketingConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1:8090".to_string(),
        }
    }
}

#[derive(Clone, Debug, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct VersionConfig {
    /// Minimum accepted build version; empty accepts any.
    pub minimum: String,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct GracefulExitConfig {
    pub enabled: bool,
    pub node_min_age_in_months: u32,
}

impl Default for GracefulExitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            node_min_age_in_months: 6,
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct MetricsConfig {
    pub chore_interval: Duration,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            chore_interval: Duration::from_secs(24 * 3600),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct DowntimeConfig {
    pub detection_interval: Duration,
}

impl Default for DowntimeConfig {
    fn default() -> Self {
        Self {
            detection_interval: Duration::from_secs(3600),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn test_default_rs_is_valid() {
        assert!(RsConfig::default().validate().is_ok());
    }

    #[test]
    fn test_rs_validation_rejects_unordered() {
        let rs = RsConfig {
            min: 3,
            repair: 2,
            success: 4,
            total: 5,
            ..RsConfig::default()
        };
        assert!(rs.validate().is_err());

        let zero = RsConfig {
            min: 0,
            ..RsConfig::default()
        };
        assert!(zero.validate().is_err());
    }

    #[test]
    fn test_gc_validation() {
        assert!(GarbageCollectionConfig::default().validate().is_ok());
        let bad = GarbageCollectionConfig {
            false_positive_rate: 1.5,
            ..GarbageCollectionConfig::default()
        };
        assert!(bad.validate().is_err());
    }

    #[test]
    fn test_from_toml_file_overrides_defaults() {
        let mut file = NamedTempFile::with_suffix(".toml").unwrap();
        writeln!(
            file,
            r#"
[server]
address = "127.0.0.1:9999"

[metainfo.rs]
min = 1
repair = 2
success = 3
total = 4

[console]
auth_token_secret = "secret"
"#
        )
        .unwrap();

        let config = Config::from_path(file.path()).unwrap();
        assert_eq!(config.server.address, "127.0.0.1:9999");
        assert_eq!(config.metainfo.rs.total, 4);
        assert_eq!(config.console.auth_token_secret, "secret");
        // Untouched groups keep their defaults.
        assert_eq!(config.live_accounting.storage_backend, "memory");
    }

    #[test]
    fn test_unsupported_extension() {
        let file = NamedTempFile::with_suffix(".ini").unwrap();
        assert!(matches!(
            Config::from_path(file.path()),
            Err(SatelliteError::Config(_))
        ));
    }
}
