//! Revoked node identities.
//!
//! The store lives in a directory addressed as `dir://<path>`; each revoked ID is
//! one empty file named after its hex form. Roles open their own handle on the
//! same directory.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Result, SatelliteError};
use crate::identity::NodeId;

const DIR_SCHEME: &str = "dir://";

pub struct RevocationDb {
    dir: PathBuf,
    closed: AtomicBool,
}

impl RevocationDb {
    pub fn open(url: &str) -> Result<Self> {
        let Some(path) = url.strip_prefix(DIR_SCHEME) else {
            return Err(SatelliteError::UnsupportedBackend(format!(
                "revocation store {url:?}"
            )));
        };
        if path.is_empty() {
            return Err(SatelliteError::Config(
                "revocation store url has no path".to_string(),
            ));
        }
        let dir = PathBuf::from(path);
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            closed: AtomicBool::new(false),
        })
    }

    pub fn url(&self) -> String {
        format!("{DIR_SCHEME}{}", self.dir.display())
    }

    fn ensure_open(&self) -> Result<()> {
        if self.closed.load(Ordering::Acquire) {
            return Err(SatelliteError::Closed("revocation store".to_string()));
        }
        Ok(())
    }

    pub fn revoke(&self, id: &NodeId) -> Result<()> {
        self.ensure_open()?;
        std::fs::write(self.dir.join(id.to_string()), [])?;
        Ok(())
    }

    pub fn is_revoked(&self, id: &NodeId) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.dir.join(id.to_string()).exists())
    }

    /// Fails with [`SatelliteError::Revoked`] when `id` is revoked.
    pub fn check(&self, id: &NodeId) -> Result<()> {
        if self.is_revoked(id)? {
            return Err(SatelliteError::Revoked(id.to_string()));
        }
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub fn close(&self) -> Result<()> {
        self.closed.store(true, Ordering::Release);
        Ok(())
    }
}
