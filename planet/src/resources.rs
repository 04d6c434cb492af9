//! Stores shared by every role of one satellite.

use std::path::Path;
use std::sync::Arc;

use slog::Logger;

use satellite::Result;
use satellite::db::{PointerDb, PointerStore, SatelliteDb, SatelliteStore};

use crate::reconfigure::Reconfigure;
use crate::teardown::Teardown;

pub const MASTER_DB_FILE: &str = "master.redb";
pub const POINTER_DB_FILE: &str = "pointers.redb";

/// The master and pointer databases of one satellite. Both are owned by the
/// satellite's teardown list; roles only borrow them.
#[derive(Clone)]
pub struct SharedResources {
    pub db: Arc<dyn SatelliteDb>,
    pub pointer_db: Arc<dyn PointerDb>,
}

/// Opens the master and pointer databases under `storage_dir`, applies the
/// database hooks and registers each store with `teardown` as soon as it is
/// usable.
pub fn open_shared_resources(
    logger: &Logger,
    index: usize,
    storage_dir: &Path,
    reconfigure: &Reconfigure,
    teardown: &mut Teardown,
) -> Result<SharedResources> {
    let opened: Arc<dyn SatelliteDb> = Arc::new(SatelliteStore::open(storage_dir.join(MASTER_DB_FILE))?);
    let db = match &reconfigure.satellite_db {
        Some(hook) => match hook(logger, index, opened.clone()) {
            Ok(db) => db,
            Err(err) => {
                release("master database", logger, opened.close());
                return Err(err);
            }
        },
        None => opened,
    };
    {
        let db = db.clone();
        teardown.add_sync("master database", move || db.close());
    }

    let opened: Arc<dyn PointerDb> = Arc::new(PointerStore::open(storage_dir.join(POINTER_DB_FILE))?);
    let pointer_db = match &reconfigure.satellite_pointer_db {
        Some(hook) => match hook(logger, index, opened.clone()) {
            Ok(db) => db,
            Err(err) => {
                release("pointer database", logger, opened.close());
                return Err(err);
            }
        },
        None => opened,
    };
    {
        let pointer_db = pointer_db.clone();
        teardown.add_sync("pointer database", move || pointer_db.close());
    }

    slog::debug!(logger, "Opened shared resources"; "dir" => %storage_dir.display());
    Ok(SharedResources { db, pointer_db })
}

fn release(name: &str, logger: &Logger, result: Result<()>) {
    if let Err(err) = result {
        slog::warn!(logger, "Failed to close store after hook error"; "store" => name, "error" => %err);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use satellite::SatelliteError;

    use super::*;

    fn discard() -> Logger {
        Logger::root(slog::Discard, slog::o!())
    }

    #[tokio::test]
    async fn test_registers_both_stores() {
        let dir = tempfile::tempdir().unwrap();
        let mut teardown = Teardown::new(discard());
        let resources =
            open_shared_resources(&discard(), 0, dir.path(), &Reconfigure::default(), &mut teardown)
                .unwrap();
        assert_eq!(teardown.len().await, 2);

        resources.db.migrate_to_latest().unwrap();
        teardown.close().await.unwrap();
        assert!(resources.db.console().get_user_by_email("x@example.com").is_err());
    }

    #[tokio::test]
    async fn test_failing_pointer_hook_closes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let captured: Arc<std::sync::Mutex<Option<Arc<dyn PointerDb>>>> = Arc::default();
        let reconfigure = Reconfigure {
            satellite_pointer_db: Some({
                let captured = captured.clone();
                Arc::new(
                    move |_: &Logger, _: usize, db: Arc<dyn PointerDb>| -> Result<Arc<dyn PointerDb>> {
                        *captured.lock().unwrap() = Some(db);
                        Err(SatelliteError::Config("pointer hook failed".into()))
                    },
                )
            }),
            ..Default::default()
        };

        let mut teardown = Teardown::new(discard());
        let err = open_shared_resources(&discard(), 0, dir.path(), &reconfigure, &mut teardown)
            .err()
            .unwrap();
        assert!(matches!(err, SatelliteError::Config(_)));

        // The pointer store was closed by the failed hook; the master store is
        // still registered.
        let pointer = captured.lock().unwrap().take().unwrap();
        assert!(pointer.get("any").is_err());
        assert_eq!(teardown.len().await, 1);
        teardown.close().await.unwrap();
    }
}
