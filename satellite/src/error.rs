//! Satellite error types.

use std::fmt;

use thiserror::Error;

use crate::console::ConsoleError;

/// Result alias used across the satellite crates.
pub type Result<T> = std::result::Result<T, SatelliteError>;

/// Errors that can occur while constructing, running or closing satellite roles.
#[derive(Debug, Error)]
pub enum SatelliteError {
    /// Database error from redb.
    #[error("Storage error: {0}")]
    Storage(#[from] redb::Error),

    /// Row encoding/decoding error.
    #[error("Codec error: {0}")]
    Codec(#[from] serde_json::Error),

    /// Filesystem or socket error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Password hashing error.
    #[error("Password hash error: {0}")]
    Bcrypt(#[from] bcrypt::BcryptError),

    /// Console workflow error.
    #[error(transparent)]
    Console(#[from] ConsoleError),

    /// Invalid or inconsistent configuration.
    #[error("Configuration error: {0}")]
    Config(String),

    /// A backend URL or scheme this build cannot open.
    #[error("Unsupported backend: {0}")]
    UnsupportedBackend(String),

    /// A request violated a size or format constraint.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// A project ran out of storage or bandwidth allowance.
    #[error("Usage limit exceeded: {0}")]
    UsageLimitExceeded(String),

    /// Requested entity does not exist.
    #[error("Not found: {0}")]
    NotFound(String),

    /// The resource was already closed.
    #[error("{0} is closed")]
    Closed(String),

    /// `run` was invoked more than once.
    #[error("{0} already started")]
    AlreadyStarted(String),

    /// The surrounding cancellation scope was cancelled.
    #[error("operation canceled")]
    Canceled,

    /// The running build is older than the configured minimum.
    #[error("Version check failed: {0}")]
    Version(String),

    /// The node identity is listed in the revocation store.
    #[error("Identity revoked: {0}")]
    Revoked(String),

    /// A spawned task panicked or was aborted.
    #[error("Task failed: {0}")]
    Task(String),

    /// Several independent failures, e.g. from a teardown fan-out.
    #[error("{0}")]
    Combined(CombinedError),

    /// Anyhow error.
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

macro_rules! storage_error_from {
    ($($ty:ty),* $(,)?) => {
        $(
            impl From<$ty> for SatelliteError {
                fn from(err: $ty) -> Self {
                    SatelliteError::Storage(redb::Error::from(err))
                }
            }
        )*
    };
}

storage_error_from!(
    redb::DatabaseError,
    redb::TransactionError,
    redb::TableError,
    redb::StorageError,
    redb::CommitError,
);

impl SatelliteError {
    /// Returns true when the error only reports cancellation.
    pub fn is_canceled(&self) -> bool {
        match self {
            SatelliteError::Canceled => true,
            SatelliteError::Combined(combined) => combined.0.iter().all(|e| e.is_canceled()),
            _ => false,
        }
    }
}

/// A list of errors collected without short-circuiting.
#[derive(Debug)]
pub struct CombinedError(pub Vec<SatelliteError>);

impl CombinedError {
    /// The collected errors in the order they occurred.
    pub fn errors(&self) -> &[SatelliteError] {
        &self.0
    }
}

impl fmt::Display for CombinedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} errors occurred:", self.0.len())?;
        for err in &self.0 {
            write!(f, "\n\t* {err}")?;
        }
        Ok(())
    }
}

/// Helpers for aggregating and filtering errors.
pub mod errs {
    use super::{CombinedError, Result, SatelliteError};

    /// Combines results into one. No errors yields `Ok`, a single error is returned
    /// as is, several become [`SatelliteError::Combined`].
    pub fn combine<I>(results: I) -> Result<()>
    where
        I: IntoIterator<Item = Result<()>>,
    {
        let mut errors: Vec<SatelliteError> = results.into_iter().filter_map(|r| r.err()).collect();
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(SatelliteError::Combined(CombinedError(errors))),
        }
    }

    /// Treats cancellation as a clean exit.
    pub fn ignore_canceled(result: Result<()>) -> Result<()> {
        match result {
            Err(err) if err.is_canceled() => Ok(()),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::errs::{combine, ignore_canceled};
    use super::*;

    #[test]
    fn test_combine_empty_is_ok() {
        assert!(combine(Vec::new()).is_ok());
        assert!(combine(vec![Ok(()), Ok(())]).is_ok());
    }

    #[test]
    fn test_combine_single_error_is_unwrapped() {
        let err = combine(vec![Ok(()), Err(SatelliteError::Config("bad".into()))]).unwrap_err();
        assert!(matches!(err, SatelliteError::Config(msg) if msg == "bad"));
    }

    #[test]
    fn test_combine_keeps_every_error() {
        let err = combine(vec![
            Err(SatelliteError::Closed("api".into())),
            Ok(()),
            Err(SatelliteError::NotFound("gc".into())),
        ])
        .unwrap_err();

        match err {
            SatelliteError::Combined(combined) => {
                assert_eq!(combined.errors().len(), 2);
                let text = combined.to_string();
                assert!(text.contains("api is closed"));
                assert!(text.contains("Not found: gc"));
            }
            other => panic!("expected combined error, got {other}"),
        }
    }

    #[test]
    fn test_ignore_canceled() {
        assert!(ignore_canceled(Err(SatelliteError::Canceled)).is_ok());
        assert!(ignore_canceled(Err(SatelliteError::Combined(CombinedError(vec![
            SatelliteError::Canceled,
            SatelliteError::Canceled,
        ]))))
        .is_ok());
        assert!(ignore_canceled(Err(SatelliteError::Task("boom".into()))).is_err());
    }
}
