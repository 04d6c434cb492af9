//! Persistence for the satellite.
//!
//! Two redb files back a node: the master database ([`SatelliteDb`]) holding
//! console, accounting, orders, overlay and repair state, and the pointer database
//! ([`PointerDb`]) holding segment metadata. Both are opened once per node and shared
//! by every role through `Arc<dyn ...>` handles, so tests can substitute either one.

pub mod pointer;
pub mod store;
pub mod tables;

use std::path::Path;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use serde::Serialize;
use serde::de::DeserializeOwned;
use uuid::Uuid;

use crate::accounting::StorageTally;
use crate::console::payments::PaymentAccount;
use crate::console::{Project, RegistrationToken, User};
use crate::error::{Result, SatelliteError};
use crate::identity::NodeId;
use crate::metainfo::Pointer;
use crate::orders::{Action, BandwidthRollup};
use crate::overlay::NodeDossier;
use crate::repair::InjuredSegment;

pub use pointer::PointerStore;
pub use store::SatelliteStore;

/// Master database of a satellite.
pub trait SatelliteDb: Send + Sync {
    fn console(&self) -> Arc<dyn ConsoleDb>;
    fn orders(&self) -> Arc<dyn OrdersDb>;
    fn repair_queue(&self) -> Arc<dyn RepairQueue>;
    fn accounting(&self) -> Arc<dyn AccountingDb>;
    fn overlay(&self) -> Arc<dyn OverlayDb>;

    /// Brings the schema up to the latest version.
    fn migrate_to_latest(&self) -> Result<()>;

    /// Releases the database. Later calls are no-ops; later reads fail with
    /// [`SatelliteError::Closed`].
    fn close(&self) -> Result<()>;
}

/// Users, registration tokens, projects and payment accounts.
pub trait ConsoleDb: Send + Sync {
    fn insert_registration_token(&self, token: &RegistrationToken) -> Result<()>;
    fn get_registration_token(&self, secret: &str) -> Result<Option<RegistrationToken>>;
    fn update_registration_token(&self, token: &RegistrationToken) -> Result<()>;

    /// Inserts a user and its email index entry in one transaction.
    fn insert_user(&self, user: &User) -> Result<()>;
    fn update_user(&self, user: &User) -> Result<()>;
    fn get_user(&self, id: &Uuid) -> Result<Option<User>>;
    fn get_user_by_email(&self, email: &str) -> Result<Option<User>>;

    fn insert_project(&self, project: &Project) -> Result<()>;
    fn get_project(&self, id: &Uuid) -> Result<Option<Project>>;
    fn projects_by_owner(&self, owner_id: &Uuid) -> Result<Vec<Project>>;

    fn insert_payment_account(&self, account: &PaymentAccount) -> Result<()>;
    fn get_payment_account(&self, user_id: &Uuid) -> Result<Option<PaymentAccount>>;
}

/// Settled bandwidth per project and action.
pub trait OrdersDb: Send + Sync {
    /// Adds every rollup to the stored totals.
    fn update_bandwidth_rollups(&self, rollups: &[BandwidthRollup]) -> Result<()>;
    fn bandwidth_total(&self, project_id: &Uuid, action: Action) -> Result<u64>;
}

/// Segments waiting for repair, keyed by segment path.
pub trait RepairQueue: Send + Sync {
    /// Returns `false` when the segment was already queued.
    fn insert(&self, segment: &InjuredSegment) -> Result<bool>;
    /// Oldest queued segment, or `None` when the queue is empty.
    fn select(&self) -> Result<Option<InjuredSegment>>;
    fn delete(&self, path: &str) -> Result<()>;
    fn count(&self) -> Result<usize>;
}

/// Stored-bytes tallies.
pub trait AccountingDb: Send + Sync {
    fn save_tallies(&self, tallies: &[StorageTally]) -> Result<()>;
    fn project_tally(&self, project_id: &Uuid) -> Result<Option<StorageTally>>;
}

/// Storage node registry.
pub trait OverlayDb: Send + Sync {
    fn upsert_node(&self, node: &NodeDossier) -> Result<()>;
    fn get_node(&self, id: &NodeId) -> Result<Option<NodeDossier>>;
    /// Applies `update` to a stored node inside one write transaction.
    fn update_node(
        &self,
        id: &NodeId,
        update: &mut (dyn FnMut(&mut NodeDossier) + Send),
    ) -> Result<Option<NodeDossier>>;
    fn all_nodes(&self) -> Result<Vec<NodeDossier>>;
}

/// Segment metadata keyed by segment path.
pub trait PointerDb: Send + Sync {
    fn put(&self, path: &str, pointer: &Pointer) -> Result<()>;
    fn get(&self, path: &str) -> Result<Option<Pointer>>;
    /// Returns `true` when a pointer was removed.
    fn delete(&self, path: &str) -> Result<bool>;
    /// Up to `limit` entries ordered by path, starting after `start_after`.
    fn list(&self, start_after: Option<&str>, limit: usize) -> Result<Vec<(String, Pointer)>>;
    fn close(&self) -> Result<()>;
}

/// A redb database that can be released while other handles still point at it.
pub(crate) struct DbHandle {
    name: &'static str,
    db: ArcSwapOption<Database>,
}

impl DbHandle {
    /// Opens the file at `path`, creating it when missing.
    pub(crate) fn open<P: AsRef<Path>>(name: &'static str, path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        let db = if path.exists() {
            Database::open(path)?
        } else {
            Database::create(path)?
        };
        Ok(Self {
            name,
            db: ArcSwapOption::from_pointee(db),
        })
    }

    pub(crate) fn get(&self) -> Result<Arc<Database>> {
        self.db
            .load_full()
            .ok_or_else(|| SatelliteError::Closed(self.name.to_string()))
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.db.load().is_none()
    }

    pub(crate) fn close(&self) {
        self.db.store(None);
    }

    pub(crate) fn write<T>(&self, f: impl FnOnce(&WriteTransaction) -> Result<T>) -> Result<T> {
        let db = self.get()?;
        let txn = db.begin_write()?;
        let out = f(&txn)?;
        txn.commit()?;
        Ok(out)
    }

    pub(crate) fn read_json<T: DeserializeOwned>(
        &self,
        table: TableDefinition<&str, &[u8]>,
        key: &str,
    ) -> Result<Option<T>> {
        let db = self.get()?;
        let txn = db.begin_read()?;
        let table = txn.open_table(table)?;
        let value = match table.get(key)? {
            Some(raw) => Some(serde_json::from_slice(raw.value())?),
            None => None,
        };
        Ok(value)
    }
}

pub(crate) fn put_json<T: Serialize>(
    txn: &WriteTransaction,
    table: TableDefinition<&str, &[u8]>,
    key: &str,
    value: &T,
) -> Result<()> {
    let bytes = serde_json::to_vec(value)?;
    let mut table = txn.open_table(table)?;
    table.insert(key, bytes.as_slice())?;
    Ok(())
}

pub(crate) fn get_json<T: DeserializeOwned>(
    txn: &WriteTransaction,
    table: TableDefinition<&str, &[u8]>,
    key: &str,
) -> Result<Option<T>> {
    let table = txn.open_table(table)?;
    let value = match table.get(key)? {
        Some(raw) => Some(serde_json::from_slice(raw.value())?),
        None => None,
    };
    Ok(value)
}
