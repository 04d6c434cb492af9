//! Build version metadata and the minimum-version check every role performs
//! before it starts serving.

use serde::{Deserialize, Serialize};

use crate::config::VersionConfig;
use crate::error::{Result, SatelliteError};

/// Version information of the running build.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionInfo {
    pub version: String,
    pub commit_hash: String,
    pub timestamp: u64,
    pub release: bool,
}

impl VersionInfo {
    /// Version info for this crate's build.
    pub fn current() -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            commit_hash: String::new(),
            timestamp: 0,
            release: false,
        }
    }
}

/// Parses `major.minor.patch`, ignoring a leading `v` and any pre-release suffix.
fn parse_semver(version: &str) -> Option<(u64, u64, u64)> {
    let version = version.trim().trim_start_matches('v');
    let core = version.split(['-', '+']).next()?;
    let mut parts = core.split('.').map(|p| p.parse::<u64>().ok());
    let major = parts.next()??;
    let minor = parts.next().unwrap_or(Some(0))?;
    let patch = parts.next().unwrap_or(Some(0))?;
    Some((major, minor, patch))
}

/// Compares the running build against the configured minimum version.
#[derive(Clone, Debug)]
pub struct Checker {
    info: VersionInfo,
    config: VersionConfig,
}

impl Checker {
    pub fn new(info: VersionInfo, config: VersionConfig) -> Self {
        Self { info, config }
    }

    pub fn info(&self) -> &VersionInfo {
        &self.info
    }

    /// Fails when the build is older than `config.minimum`. An empty minimum
    /// accepts every build.
    pub fn check_version(&self) -> Result<()> {
        if self.config.minimum.is_empty() {
            return Ok(());
        }
        let minimum = parse_semver(&self.config.minimum).ok_or_else(|| {
            SatelliteError::Config(format!("invalid minimum version {:?}", self.config.minimum))
        })?;
        let running = parse_semver(&self.info.version)
            .ok_or_else(|| SatelliteError::Version(format!("unparsable version {:?}", self.info.version)))?;
        if running < minimum {
            return Err(SatelliteError::Version(format!(
                "running {} but at least {} is required",
                self.info.version, self.config.minimum
            )));
        }
        Ok(())
    }
}
