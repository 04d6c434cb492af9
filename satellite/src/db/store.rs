use std::path::Path;
use std::sync::Arc;

use redb::{ReadableDatabase, ReadableTable, ReadableTableMetadata, WriteTransaction};
use uuid::Uuid;

use super::tables::{
    BANDWIDTH_ROLLUPS, META, NODES, PAYMENT_ACCOUNTS, PROJECTS, REGISTRATION_TOKENS, REPAIR_QUEUE,
    STORAGE_TALLIES, USER_EMAILS, USERS,
};
use super::{
    AccountingDb, ConsoleDb, DbHandle, OrdersDb, OverlayDb, RepairQueue, SatelliteDb, get_json,
    put_json,
};
use crate::accounting::StorageTally;
use crate::console::payments::PaymentAccount;
use crate::console::{ConsoleError, Project, RegistrationToken, User};
use crate::error::{Result, SatelliteError};
use crate::identity::NodeId;
use crate::orders::{Action, BandwidthRollup};
use crate::overlay::NodeDossier;
use crate::repair::InjuredSegment;

const SCHEMA_VERSION_KEY: &str = "schema_version";

type Migration = fn(&WriteTransaction) -> Result<()>;

/// Ordered schema steps; step `i` upgrades version `i` to `i + 1`.
const MIGRATIONS: &[(&str, Migration)] = &[
    ("create master tables", create_tables),
    ("index users by normalized email", normalize_email_index),
];

/// [`SatelliteStore`] is the redb-backed master database.
///
/// All sub-stores share one [`DbHandle`], so closing the store invalidates every
/// handle previously returned by [`SatelliteDb::console`] and friends.
///
/// # Examples
///
/// ```rust,ignore
/// let store = SatelliteStore::open(dir.join("master.redb"))?;
/// store.migrate_to_latest()?;
/// let user = store.console().get_user(&user_id)?;
/// ```
#[derive(Clone)]
pub struct SatelliteStore {
    handle: Arc<DbHandle>,
}

impl SatelliteStore {
    /// Opens the master database, creating the file and tables when missing.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let handle = Arc::new(DbHandle::open("master database", path)?);
        handle.write(create_tables)?;
        Ok(Self { handle })
    }

    /// Current schema version, 0 for a database that was never migrated.
    pub fn schema_version(&self) -> Result<u32> {
        Ok(self
            .handle
            .read_json::<u32>(META, SCHEMA_VERSION_KEY)?
            .unwrap_or(0))
    }

    pub fn latest_schema_version() -> u32 {
        MIGRATIONS.len() as u32
    }

    pub fn is_closed(&self) -> bool {
        self.handle.is_closed()
    }
}

impl SatelliteDb for SatelliteStore {
    fn console(&self) -> Arc<dyn ConsoleDb> {
        Arc::new(ConsoleStore(self.handle.clone()))
    }

    fn orders(&self) -> Arc<dyn OrdersDb> {
        Arc::new(OrdersStore(self.handle.clone()))
    }

    fn repair_queue(&self) -> Arc<dyn RepairQueue> {
        Arc::new(RepairQueueStore(self.handle.clone()))
    }

    fn accounting(&self) -> Arc<dyn AccountingDb> {
        Arc::new(AccountingStore(self.handle.clone()))
    }

    fn overlay(&self) -> Arc<dyn OverlayDb> {
        Arc::new(OverlayStore(self.handle.clone()))
    }

    fn migrate_to_latest(&self) -> Result<()> {
        self.handle.write(|txn| {
            let current: u32 = get_json(txn, META, SCHEMA_VERSION_KEY)?.unwrap_or(0);
            let latest = MIGRATIONS.len() as u32;
            if current > latest {
                return Err(SatelliteError::Config(format!(
                    "master database schema version {current} is newer than supported {latest}"
                )));
            }
            for (_, step) in &MIGRATIONS[current as usize..] {
                step(txn)?;
            }
            put_json(txn, META, SCHEMA_VERSION_KEY, &latest)
        })
    }

    fn close(&self) -> Result<()> {
        self.handle.close();
        Ok(())
    }
}

fn create_tables(txn: &WriteTransaction) -> Result<()> {
    txn.open_table(META)?;
    txn.open_table(USERS)?;
    txn.open_table(USER_EMAILS)?;
    txn.open_table(REGISTRATION_TOKENS)?;
    txn.open_table(PROJECTS)?;
    txn.open_table(PAYMENT_ACCOUNTS)?;
    txn.open_table(BANDWIDTH_ROLLUPS)?;
    txn.open_table(REPAIR_QUEUE)?;
    txn.open_table(STORAGE_TALLIES)?;
    txn.open_table(NODES)?;
    Ok(())
}

/// Rebuilds the email index with lowercased keys.
fn normalize_email_index(txn: &WriteTransaction) -> Result<()> {
    let users: Vec<User> = {
        let table = txn.open_table(USERS)?;
        let mut users = Vec::new();
        for entry in table.iter()? {
            let (_, raw) = entry?;
            users.push(serde_json::from_slice(raw.value())?);
        }
        users
    };
    let mut emails = txn.open_table(USER_EMAILS)?;
    emails.retain(|_, _| false)?;
    for user in users {
        let id = user.id.to_string();
        emails.insert(normalize_email(&user.email).as_str(), id.as_bytes())?;
    }
    Ok(())
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

struct ConsoleStore(Arc<DbHandle>);

impl ConsoleDb for ConsoleStore {
    fn insert_registration_token(&self, token: &RegistrationToken) -> Result<()> {
        self.0
            .write(|txn| put_json(txn, REGISTRATION_TOKENS, &token.secret, token))
    }

    fn get_registration_token(&self, secret: &str) -> Result<Option<RegistrationToken>> {
        self.0.read_json(REGISTRATION_TOKENS, secret)
    }

    fn update_registration_token(&self, token: &RegistrationToken) -> Result<()> {
        self.0.write(|txn| {
            let existing: Option<RegistrationToken> =
                get_json(txn, REGISTRATION_TOKENS, &token.secret)?;
            if existing.is_none() {
                return Err(SatelliteError::NotFound("registration token".to_string()));
            }
            put_json(txn, REGISTRATION_TOKENS, &token.secret, token)
        })
    }

    fn insert_user(&self, user: &User) -> Result<()> {
        let id = user.id.to_string();
        let email = normalize_email(&user.email);
        self.0.write(|txn| {
            {
                let mut emails = txn.open_table(USER_EMAILS)?;
                if emails.get(email.as_str())?.is_some() {
                    return Err(ConsoleError::EmailUsed(email.clone()).into());
                }
                emails.insert(email.as_str(), id.as_bytes())?;
            }
            put_json(txn, USERS, &id, user)
        })
    }

    fn update_user(&self, user: &User) -> Result<()> {
        let id = user.id.to_string();
        self.0.write(|txn| {
            let existing: Option<User> = get_json(txn, USERS, &id)?;
            if existing.is_none() {
                return Err(SatelliteError::NotFound(format!("user {id}")));
            }
            put_json(txn, USERS, &id, user)
        })
    }

    fn get_user(&self, id: &Uuid) -> Result<Option<User>> {
        self.0.read_json(USERS, &id.to_string())
    }

    fn get_user_by_email(&self, email: &str) -> Result<Option<User>> {
        let db = self.0.get()?;
        let txn = db.begin_read()?;
        let emails = txn.open_table(USER_EMAILS)?;
        let id = match emails.get(normalize_email(email).as_str())? {
            Some(raw) => String::from_utf8_lossy(raw.value()).into_owned(),
            None => return Ok(None),
        };
        let users = txn.open_table(USERS)?;
        let user = match users.get(id.as_str())? {
            Some(raw) => Some(serde_json::from_slice(raw.value())?),
            None => None,
        };
        Ok(user)
    }

    fn insert_project(&self, project: &Project) -> Result<()> {
        self.0
            .write(|txn| put_json(txn, PROJECTS, &project.id.to_string(), project))
    }

    fn get_project(&self, id: &Uuid) -> Result<Option<Project>> {
        self.0.read_json(PROJECTS, &id.to_string())
    }

    fn projects_by_owner(&self, owner_id: &Uuid) -> Result<Vec<Project>> {
        let db = self.0.get()?;
        let txn = db.begin_read()?;
        let table = txn.open_table(PROJECTS)?;
        let mut projects = Vec::new();
        for entry in table.iter()? {
            let (_, raw) = entry?;
            let project: Project = serde_json::from_slice(raw.value())?;
            if project.owner_id == *owner_id {
                projects.push(project);
            }
        }
        projects.sort_by_key(|p| p.created_at);
        Ok(projects)
    }

    fn insert_payment_account(&self, account: &PaymentAccount) -> Result<()> {
        self.0.write(|txn| {
            put_json(
                txn,
                PAYMENT_ACCOUNTS,
                &account.user_id.to_string(),
                account,
            )
        })
    }

    fn get_payment_account(&self, user_id: &Uuid) -> Result<Option<PaymentAccount>> {
        self.0.read_json(PAYMENT_ACCOUNTS, &user_id.to_string())
    }
}

struct OrdersStore(Arc<DbHandle>);

fn rollup_key(project_id: &Uuid, action: Action) -> String {
    format!("{project_id}/{}", action.as_str())
}

impl OrdersDb for OrdersStore {
    fn update_bandwidth_rollups(&self, rollups: &[BandwidthRollup]) -> Result<()> {
        if rollups.is_empty() {
            return Ok(());
        }
        self.0.write(|txn| {
            for rollup in rollups {
                let key = rollup_key(&rollup.project_id, rollup.action);
                let total: u64 = get_json(txn, BANDWIDTH_ROLLUPS, &key)?.unwrap_or(0);
                put_json(
                    txn,
                    BANDWIDTH_ROLLUPS,
                    &key,
                    &total.saturating_add(rollup.bytes),
                )?;
            }
            Ok(())
        })
    }

    fn bandwidth_total(&self, project_id: &Uuid, action: Action) -> Result<u64> {
        Ok(self
            .0
            .read_json(BANDWIDTH_ROLLUPS, &rollup_key(project_id, action))?
            .unwrap_or(0))
    }
}

struct RepairQueueStore(Arc<DbHandle>);

impl RepairQueue for RepairQueueStore {
    fn insert(&self, segment: &InjuredSegment) -> Result<bool> {
        self.0.write(|txn| {
            let existing: Option<InjuredSegment> = get_json(txn, REPAIR_QUEUE, &segment.path)?;
            match existing {
                Some(mut queued) => {
                    // Keep the original insertion time, refresh the lost pieces.
                    queued.lost_pieces = segment.lost_pieces.clone();
                    put_json(txn, REPAIR_QUEUE, &segment.path, &queued)?;
                    Ok(false)
                }
                None => {
                    put_json(txn, REPAIR_QUEUE, &segment.path, segment)?;
                    Ok(true)
                }
            }
        })
    }

    fn select(&self) -> Result<Option<InjuredSegment>> {
        let db = self.0.get()?;
        let txn = db.begin_read()?;
        let table = txn.open_table(REPAIR_QUEUE)?;
        let mut oldest: Option<InjuredSegment> = None;
        for entry in table.iter()? {
            let (_, raw) = entry?;
            let segment: InjuredSegment = serde_json::from_slice(raw.value())?;
            let older = oldest
                .as_ref()
                .is_none_or(|o| segment.inserted_at < o.inserted_at);
            if older {
                oldest = Some(segment);
            }
        }
        Ok(oldest)
    }

    fn delete(&self, path: &str) -> Result<()> {
        self.0.write(|txn| {
            let mut table = txn.open_table(REPAIR_QUEUE)?;
            table.remove(path)?;
            Ok(())
        })
    }

    fn count(&self) -> Result<usize> {
        let db = self.0.get()?;
        let txn = db.begin_read()?;
        let table = txn.open_table(REPAIR_QUEUE)?;
        Ok(table.len()? as usize)
    }
}

struct AccountingStore(Arc<DbHandle>);

impl AccountingDb for AccountingStore {
    fn save_tallies(&self, tallies: &[StorageTally]) -> Result<()> {
        self.0.write(|txn| {
            for tally in tallies {
                put_json(txn, STORAGE_TALLIES, &tally.project_id.to_string(), tally)?;
            }
            Ok(())
        })
    }

    fn project_tally(&self, project_id: &Uuid) -> Result<Option<StorageTally>> {
        self.0.read_json(STORAGE_TALLIES, &project_id.to_string())
    }
}

struct OverlayStore(Arc<DbHandle>);

impl OverlayDb for OverlayStore {
    fn upsert_node(&self, node: &NodeDossier) -> Result<()> {
        self.0
            .write(|txn| put_json(txn, NODES, &node.id.to_string(), node))
    }

    fn get_node(&self, id: &NodeId) -> Result<Option<NodeDossier>> {
        self.0.read_json(NODES, &id.to_string())
    }

    fn update_node(
        &self,
        id: &NodeId,
        update: &mut (dyn FnMut(&mut NodeDossier) + Send),
    ) -> Result<Option<NodeDossier>> {
        let key = id.to_string();
        self.0.write(|txn| {
            let Some(mut node) = get_json::<NodeDossier>(txn, NODES, &key)? else {
                return Ok(None);
            };
            update(&mut node);
            put_json(txn, NODES, &key, &node)?;
            Ok(Some(node))
        })
    }

    fn all_nodes(&self) -> Result<Vec<NodeDossier>> {
        let db = self.0.get()?;
        let txn = db.begin_read()?;
        let table = txn.open_table(NODES)?;
        let mut nodes = Vec::new();
        for entry in table.iter()? {
            let (_, raw) = entry?;
            nodes.push(serde_json::from_slice(raw.value())?);
        }
        Ok(nodes)
    }
}
