//! Batch provisioning of satellites.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use slog::Logger;
use tempfile::TempDir;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

use satellite::error::errs;
use satellite::identity::{self, FullIdentity};
use satellite::version::VersionInfo;
use satellite::{Result, SatelliteError};

use crate::config::PlanetConfig;
use crate::reconfigure::Reconfigure;
use crate::node::Satellite;

/// A local network of satellites sharing one storage root.
///
/// Satellites are constructed one at a time and all of them are constructed
/// before any runs. Whatever was constructed stays registered, so
/// [`Planet::shutdown`] releases it even after a failed
/// [`Planet::new_satellites`].
pub struct Planet {
    logger: Logger,
    config: PlanetConfig,
    reconfigure: Reconfigure,
    version: VersionInfo,
    storage_root: PathBuf,
    // Removed on drop when no storage dir was configured.
    _temp_dir: Option<TempDir>,

    satellites: Vec<Arc<Satellite>>,
    cancel: CancellationToken,
    runs: JoinSet<(String, Result<()>)>,
    started: usize,
}

impl Planet {
    pub fn new(logger: Logger, config: PlanetConfig, reconfigure: Reconfigure) -> Result<Self> {
        let (storage_root, temp_dir) = match &config.storage_dir {
            Some(dir) => {
                std::fs::create_dir_all(dir)?;
                (dir.clone(), None)
            }
            None => {
                let temp_dir = tempfile::Builder::new().prefix("planet-").tempdir()?;
                (temp_dir.path().to_path_buf(), Some(temp_dir))
            }
        };
        slog::info!(logger, "Planet created"; "storage_root" => %storage_root.display());

        Ok(Self {
            logger,
            config,
            reconfigure,
            version: VersionInfo::current(),
            storage_root,
            _temp_dir: temp_dir,
            satellites: Vec::new(),
            cancel: CancellationToken::new(),
            runs: JoinSet::new(),
            started: 0,
        })
    }

    /// Overrides the version every role reports to its version check.
    pub fn with_version(mut self, version: VersionInfo) -> Self {
        self.version = version;
        self
    }

    pub fn config(&self) -> &PlanetConfig {
        &self.config
    }

    pub fn storage_root(&self) -> &Path {
        &self.storage_root
    }

    pub fn satellites(&self) -> &[Arc<Satellite>] {
        &self.satellites
    }

    /// Constructs `count` more satellites, named after their index. Stops at
    /// the first failure and returns it; satellites built before it are kept.
    pub async fn new_satellites(&mut self, count: usize) -> Result<Vec<Arc<Satellite>>> {
        let first = self.satellites.len();
        let mut identities = self.identities(first, count).into_iter();
        let mut created = Vec::with_capacity(count);

        for index in first..first + count {
            let identity = identities.next().ok_or_else(|| {
                SatelliteError::Config(format!("no identity for satellite {index}"))
            })?;
            let storage_dir = self.storage_root.join(format!("satellite{index}"));
            let config =
                self.config
                    .satellite_config(&self.logger, index, &storage_dir, &self.reconfigure)?;

            let satellite = Satellite::new(
                &self.logger,
                index,
                Arc::new(identity),
                config,
                storage_dir,
                &self.reconfigure,
                self.version.clone(),
            )
            .await?;
            let satellite = Arc::new(satellite);
            self.satellites.push(satellite.clone());
            created.push(satellite);
        }
        Ok(created)
    }

    fn identities(&self, first: usize, count: usize) -> Vec<FullIdentity> {
        match self.config.identity_seed {
            Some(seed) => identity::deterministic_identities(seed, first + count)
                .into_iter()
                .skip(first)
                .collect(),
            None => {
                let mut rng = rand::thread_rng();
                (0..count).map(|_| FullIdentity::generate(&mut rng)).collect()
            }
        }
    }

    /// Runs every satellite not yet started.
    pub fn start(&mut self) {
        for satellite in &self.satellites[self.started..] {
            let satellite = satellite.clone();
            let cancel = self.cancel.child_token();
            self.runs.spawn(async move {
                let result = satellite.run(cancel).await;
                (satellite.label().to_string(), result)
            });
        }
        slog::info!(self.logger, "Planet started"; "satellites" => self.satellites.len() - self.started);
        self.started = self.satellites.len();
    }

    /// Waits for the next satellite run to return. `None` when nothing runs.
    pub async fn wait_any(&mut self) -> Option<(String, Result<()>)> {
        let joined = self.runs.join_next().await?;
        Some(joined.unwrap_or_else(|e| ("<join>".to_string(), Err(SatelliteError::Task(e.to_string())))))
    }

    /// Cancels every run, waits for all of them, then closes every satellite.
    /// Run and close errors are reported together.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.cancel.cancel();

        let mut results = Vec::new();
        while let Some((name, result)) = self.wait_any().await {
            let result = errs::ignore_canceled(result);
            if let Err(err) = &result {
                slog::warn!(self.logger, "Satellite run failed"; "satellite" => &name, "error" => %err);
            }
            results.push(result);
        }

        for satellite in self.satellites.iter().rev() {
            results.push(satellite.close().await);
        }

        slog::info!(self.logger, "Planet shut down"; "satellites" => self.satellites.len());
        errs::combine(results)
    }
}
