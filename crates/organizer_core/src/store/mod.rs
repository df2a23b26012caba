//! Store files: one SQLite database holding an item tree.
//!
//! # Responsibility
//! - Create, open, save, copy and close store files.
//! - Mirror the item tree shape in memory.
//! - Route every connection use through the store's handle queue.
//!
//! # Invariants
//! - An open store owns exactly one connection, parked in its handle queue
//!   whenever no operation is running.
//! - Unsaved edits live in the connection's open session transaction;
//!   closing without saving discards them.
//! - The in-memory tree mirrors the `items` table after every operation.
//!
//! # See also
//! - `crate::session` for registry, events and alarm refresh around these
//!   operations.

mod history;
mod items;

pub use history::{HistoryGroup, HistoryJournal};

use crate::db::migrations::{current_user_version, latest_version};
use crate::db::{begin_session, commit_session, open_db, open_db_read_only, DbError};
use crate::extension::compatibility::{read_manifest, write_manifest, CompatibilitySet};
use crate::lock::HandleQueue;
use crate::model::item::{Item, ItemId};
use crate::model::rule::RuleError;
use crate::repo::history_repo::max_group;
use crate::repo::item_repo::{
    all_rules_json, delete_item_statements, delete_rules_statements, item_body, item_rules_json,
    load_items,
};
use crate::repo::store_repo::{
    copy_contents, read_properties, set_last_alarm_search, write_properties, StoreProperties,
};
use history::JournalRecord;
use log::{debug, error, info, warn};
use rusqlite::Connection;
use std::collections::{BTreeSet, HashMap};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Result type of store operations.
pub type StoreResult<T> = Result<T, StoreError>;

/// Errors surfaced by store operations.
#[derive(Debug)]
pub enum StoreError {
    /// The path is already registered as an open store.
    AlreadyOpen(PathBuf),
    /// The file cannot be created at the path.
    AccessDenied {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The file exists but cannot be opened for writing.
    NotAccessible {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The file is not a store, or its compatibility manifest does not match
    /// the running set.
    NotValid { path: PathBuf, reason: String },
    /// No open store is registered at the path.
    NotOpen(PathBuf),
    ItemNotFound(ItemId),
    /// The id set is not closed under children, or cannot be emptied
    /// leaves-first.
    UndeletableItems(Vec<ItemId>),
    /// A lease was leaked and the connection cannot be recovered.
    HandleLost(PathBuf),
    Rule(RuleError),
    Db(DbError),
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl Display for StoreError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::AlreadyOpen(path) => write!(f, "store already open: {}", path.display()),
            Self::AccessDenied { path, source } => {
                write!(f, "cannot create store at {}: {source}", path.display())
            }
            Self::NotAccessible { path, source } => {
                write!(f, "store is not writable: {}: {source}", path.display())
            }
            Self::NotValid { path, reason } => {
                write!(f, "not a compatible store: {}: {reason}", path.display())
            }
            Self::NotOpen(path) => write!(f, "store is not open: {}", path.display()),
            Self::ItemNotFound(id) => write!(f, "item not found: {id}"),
            Self::UndeletableItems(ids) => {
                write!(f, "items cannot be deleted without their children: {} left", ids.len())
            }
            Self::HandleLost(path) => {
                write!(f, "store connection handle was not returned: {}", path.display())
            }
            Self::Rule(err) => write!(f, "{err}"),
            Self::Db(err) => write!(f, "{err}"),
            Self::Io { path, source } => write!(f, "{}: {source}", path.display()),
        }
    }
}

impl Error for StoreError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::AccessDenied { source, .. } => Some(source),
            Self::NotAccessible { source, .. } => Some(source),
            Self::Io { source, .. } => Some(source),
            Self::Rule(err) => Some(err),
            Self::Db(err) => Some(err),
            Self::AlreadyOpen(_)
            | Self::NotValid { .. }
            | Self::NotOpen(_)
            | Self::ItemNotFound(_)
            | Self::UndeletableItems(_)
            | Self::HandleLost(_) => None,
        }
    }
}

impl From<DbError> for StoreError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<RuleError> for StoreError {
    fn from(value: RuleError) -> Self {
        Self::Rule(value)
    }
}

/// Resolves `path` to the key used by the open-store registry.
///
/// The parent directory is canonicalized so different spellings of one file
/// map to the same key; the file itself may not exist yet.
pub fn normalize_path(path: &Path) -> PathBuf {
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => {
            let parent = if parent.as_os_str().is_empty() {
                Path::new(".")
            } else {
                parent
            };
            match parent.canonicalize() {
                Ok(parent) => parent.join(name),
                Err(_) => path.to_path_buf(),
            }
        }
        _ => path.to_path_buf(),
    }
}

/// One open store file.
pub struct Store {
    path: PathBuf,
    handle: HandleQueue<Connection>,
    items: HashMap<ItemId, Item>,
    history: HistoryJournal,
    last_alarm_search: Option<i64>,
    modified: bool,
}

impl std::fmt::Debug for Store {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Store")
            .field("path", &self.path)
            .field("items", &self.items.len())
            .field("history_limit", &self.history.limit())
            .field("modified", &self.modified)
            .finish()
    }
}

impl Store {
    /// Initializes a new store file at `path`, replacing any existing file.
    pub(crate) fn create(
        path: &Path,
        compatibility: &CompatibilitySet,
        history_limit: u32,
    ) -> StoreResult<()> {
        let started_at = Instant::now();
        truncate_file(path)?;

        let mut conn = open_db(path)?;
        initialize(
            &mut conn,
            compatibility,
            StoreProperties {
                history_limit,
                last_alarm_search: None,
            },
        )?;
        conn.close().map_err(|(_, err)| DbError::from(err))?;

        info!(
            "event=store_create module=store status=ok duration_ms={}",
            started_at.elapsed().as_millis()
        );
        Ok(())
    }

    /// Opens an existing store file and loads its item tree.
    pub(crate) fn open(path: &Path, compatibility: &CompatibilitySet) -> StoreResult<Self> {
        let started_at = Instant::now();
        OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .map_err(|source| StoreError::NotAccessible {
                path: path.to_path_buf(),
                source,
            })?;

        if let Err(reason) = probe_compatibility(path, compatibility) {
            warn!("event=store_open module=store status=error error_code=not_valid reason={reason}");
            return Err(StoreError::NotValid {
                path: path.to_path_buf(),
                reason,
            });
        }

        let conn = open_db(path)?;
        let properties = read_properties(&conn)?;
        let history = HistoryJournal::new(properties.history_limit);
        // Leftover groups from a process that ended before closing.
        history.prune(&conn)?;
        let items = load_items(&conn)?;
        begin_session(&conn)?;

        info!(
            "event=store_open module=store status=ok items={} duration_ms={}",
            items.len(),
            started_at.elapsed().as_millis()
        );
        Ok(Self {
            path: path.to_path_buf(),
            handle: HandleQueue::new(conn),
            items: items.into_iter().map(|item| (item.id, item)).collect(),
            history,
            last_alarm_search: properties.last_alarm_search,
            modified: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Whether edits were made since the last open or save.
    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn history_limit(&self) -> u32 {
        self.history.limit()
    }

    /// Alarm search watermark read from the file at open time.
    pub fn persisted_alarm_search(&self) -> Option<i64> {
        self.last_alarm_search
    }

    pub fn item(&self, id: ItemId) -> Option<&Item> {
        self.items.get(&id)
    }

    pub fn contains_item(&self, id: ItemId) -> bool {
        self.items.contains_key(&id)
    }

    pub fn item_count(&self) -> usize {
        self.items.len()
    }

    /// Every item id, in no particular order.
    pub fn item_ids(&self) -> Vec<ItemId> {
        self.items.keys().copied().collect()
    }

    /// Children of `parent` (`None` for root items) ordered by position.
    pub fn children(&self, parent: Option<ItemId>) -> Vec<ItemId> {
        let mut children = self
            .items
            .values()
            .filter(|item| item.parent == parent)
            .map(|item| (item.position, item.id))
            .collect::<Vec<_>>();
        children.sort();
        children.into_iter().map(|(_, id)| id).collect()
    }

    /// Commits unsaved edits, normalizes history and stores the alarm
    /// watermark.
    pub(crate) fn save(&mut self, alarm_watermark: Option<i64>) -> StoreResult<()> {
        let started_at = Instant::now();
        let conn = self.handle.acquire();
        self.history.commit(&conn)?;
        if let Some(time) = alarm_watermark {
            set_last_alarm_search(&conn, time)?;
        }
        commit_session(&conn)?;
        HandleQueue::release(conn);

        if let Some(time) = alarm_watermark {
            self.last_alarm_search = Some(time);
        }
        self.modified = false;
        info!(
            "event=store_save module=store status=ok duration_ms={}",
            started_at.elapsed().as_millis()
        );
        Ok(())
    }

    /// Writes the current content, saved or not, to a new file.
    pub(crate) fn save_copy(
        &self,
        destination: &Path,
        alarm_watermark: Option<i64>,
    ) -> StoreResult<()> {
        let started_at = Instant::now();
        truncate_file(destination)?;

        let conn = self.handle.acquire();
        let mut target = open_db(destination)?;
        let properties = StoreProperties {
            history_limit: self.history.limit(),
            last_alarm_search: alarm_watermark.or(self.last_alarm_search),
        };
        write_properties(&target, &properties)?;
        copy_contents(&conn, &mut target)?;
        HandleQueue::release(conn);
        target.close().map_err(|(_, err)| DbError::from(err))?;

        info!(
            "event=store_copy module=store status=ok duration_ms={}",
            started_at.elapsed().as_millis()
        );
        Ok(())
    }

    /// Drops the item tree and releases the connection, discarding unsaved
    /// edits.
    ///
    /// History pruning is left to the returned `ClosedStore` so it can run
    /// after the store is deregistered.
    pub(crate) fn close(self) -> StoreResult<ClosedStore> {
        let Store {
            path,
            handle,
            mut items,
            history,
            ..
        } = self;

        let all = items.keys().copied().collect::<BTreeSet<_>>();
        match leaves_first(&items, all) {
            Ok(order) => {
                for id in order {
                    items.remove(&id);
                }
            }
            Err(stuck) => {
                error!(
                    "event=store_close module=store status=error error_code=tree_cycle items={}",
                    stuck.len()
                );
                items.clear();
            }
        }

        let conn = handle
            .into_inner()
            .ok_or_else(|| StoreError::HandleLost(path.clone()))?;
        if !conn.is_autocommit() {
            conn.execute_batch("ROLLBACK;")?;
        }
        conn.close().map_err(|(_, err)| DbError::from(err))?;
        debug!("event=store_close module=store status=ok");

        Ok(ClosedStore { path, history })
    }

    /// Deletes the items in `ids`, children strictly before parents.
    ///
    /// Every id must exist and every child of an id must itself be in `ids`.
    /// Returns the ids in deletion order.
    pub(crate) fn delete_items(
        &mut self,
        ids: &[ItemId],
        group: HistoryGroup,
    ) -> StoreResult<Vec<ItemId>> {
        let pending = ids.iter().copied().collect::<BTreeSet<_>>();
        if let Some(missing) = pending.iter().find(|id| !self.items.contains_key(id)) {
            return Err(StoreError::ItemNotFound(*missing));
        }
        let orphaned = self
            .items
            .values()
            .filter(|item| {
                item.parent.is_some_and(|parent| pending.contains(&parent))
                    && !pending.contains(&item.id)
            })
            .map(|item| item.id)
            .collect::<Vec<_>>();
        if !orphaned.is_empty() {
            return Err(StoreError::UndeletableItems(orphaned));
        }

        let order = leaves_first(&self.items, pending).map_err(StoreError::UndeletableItems)?;

        let conn = self.handle.acquire();
        let result = delete_rows(&conn, &self.history, &self.items, &order, group);
        HandleQueue::release(conn);

        match result {
            Ok(()) => {
                for id in &order {
                    self.items.remove(id);
                }
                self.modified = true;
                Ok(order)
            }
            Err(err) => {
                error!(
                    "event=items_delete module=store status=error error_code=delete_failed error={err}"
                );
                self.reload_items()?;
                Err(err)
            }
        }
    }

    /// Reads every stored rule array.
    pub(crate) fn rule_lists(&self) -> StoreResult<Vec<(ItemId, String)>> {
        let conn = self.handle.acquire();
        let lists = all_rules_json(&conn)?;
        Ok(lists)
    }

    /// Highest history group id recorded in the file.
    pub(crate) fn max_history_group(&self) -> StoreResult<i64> {
        let conn = self.handle.acquire();
        Ok(max_group(&conn)?)
    }

    fn reload_items(&mut self) -> StoreResult<()> {
        let conn = self.handle.acquire();
        let items = load_items(&conn)?;
        HandleQueue::release(conn);
        self.items = items.into_iter().map(|item| (item.id, item)).collect();
        Ok(())
    }
}

/// A store whose connection is closed but whose history is not pruned yet.
#[derive(Debug)]
pub(crate) struct ClosedStore {
    path: PathBuf,
    history: HistoryJournal,
}

impl ClosedStore {
    /// Prunes history through a fresh connection.
    pub(crate) fn prune_history(self) -> StoreResult<()> {
        let conn = open_db(&self.path)?;
        self.history.prune(&conn)?;
        conn.close().map_err(|(_, err)| DbError::from(err))?;
        Ok(())
    }
}

/// Creates or empties the file at `path`.
fn truncate_file(path: &Path) -> StoreResult<()> {
    OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(path)
        .map_err(|source| match source.kind() {
            ErrorKind::PermissionDenied | ErrorKind::NotFound => StoreError::AccessDenied {
                path: path.to_path_buf(),
                source,
            },
            _ => StoreError::Io {
                path: path.to_path_buf(),
                source,
            },
        })?;
    Ok(())
}

fn initialize(
    conn: &mut Connection,
    compatibility: &CompatibilitySet,
    properties: StoreProperties,
) -> StoreResult<()> {
    let tx = conn.transaction()?;
    write_properties(&tx, &properties)?;
    write_manifest(&tx, compatibility)?;
    tx.commit()?;
    Ok(())
}

/// Checks schema version and manifest through a read-only connection.
fn probe_compatibility(path: &Path, compatibility: &CompatibilitySet) -> Result<(), String> {
    let conn = open_db_read_only(path).map_err(|err| err.to_string())?;
    let version = current_user_version(&conn).map_err(|err| err.to_string())?;
    if version == 0 || version > latest_version() {
        return Err(format!("unsupported schema version {version}"));
    }
    read_properties(&conn).map_err(|err| err.to_string())?;
    let manifest = read_manifest(&conn).map_err(|err| err.to_string())?;
    if !compatibility.matches(&manifest) {
        return Err("compatibility manifest mismatch".to_string());
    }
    Ok(())
}

fn delete_rows(
    conn: &Connection,
    history: &HistoryJournal,
    items: &HashMap<ItemId, Item>,
    order: &[ItemId],
    group: HistoryGroup,
) -> StoreResult<()> {
    for id in order {
        let item = items.get(id).ok_or(StoreError::ItemNotFound(*id))?;
        let body = item_body(conn, *id)?.unwrap_or_default();
        if let Some(rules) = item_rules_json(conn, *id)? {
            let (redo, undo) = delete_rules_statements(*id, &rules);
            history.record(
                conn,
                group,
                JournalRecord {
                    item: *id,
                    action: "rules_delete",
                    description: "Delete item rules",
                    redo,
                    undo,
                },
            )?;
        }
        let (redo, undo) = delete_item_statements(item, &body);
        history.record(
            conn,
            group,
            JournalRecord {
                item: *id,
                action: "item_delete",
                description: "Delete item",
                redo,
                undo,
            },
        )?;
    }
    Ok(())
}

/// Orders `pending` so that every item comes after all of its children.
///
/// Repeatedly takes the pending items that have no remaining children.
/// Returns the ids that could not be ordered when a pass makes no progress.
fn leaves_first(
    items: &HashMap<ItemId, Item>,
    mut pending: BTreeSet<ItemId>,
) -> Result<Vec<ItemId>, Vec<ItemId>> {
    let mut child_counts = HashMap::<ItemId, usize>::new();
    for item in items.values() {
        if let Some(parent) = item.parent {
            *child_counts.entry(parent).or_default() += 1;
        }
    }

    let mut order = Vec::with_capacity(pending.len());
    while !pending.is_empty() {
        let leaves = pending
            .iter()
            .copied()
            .filter(|id| child_counts.get(id).copied().unwrap_or(0) == 0)
            .collect::<Vec<_>>();
        if leaves.is_empty() {
            return Err(pending.into_iter().collect());
        }
        for id in leaves {
            pending.remove(&id);
            if let Some(parent) = items.get(&id).and_then(|item| item.parent) {
                if let Some(count) = child_counts.get_mut(&parent) {
                    *count = count.saturating_sub(1);
                }
            }
            order.push(id);
        }
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::{leaves_first, normalize_path};
    use crate::model::item::Item;
    use std::collections::{BTreeSet, HashMap};

    #[test]
    fn leaves_first_orders_children_before_parents() {
        let root = Item::new(None, 0);
        let child = Item::new(Some(root.id), 0);
        let grandchild = Item::new(Some(child.id), 0);
        let sibling = Item::new(None, 1);
        let items = [root, child, grandchild, sibling]
            .into_iter()
            .map(|item| (item.id, item))
            .collect::<HashMap<_, _>>();

        let order = leaves_first(
            &items,
            BTreeSet::from([root.id, grandchild.id, child.id]),
        )
        .unwrap();
        let position = |id| order.iter().position(|other| *other == id).unwrap();
        assert_eq!(order.len(), 3);
        assert!(position(grandchild.id) < position(child.id));
        assert!(position(child.id) < position(root.id));
    }

    #[test]
    fn leaves_first_reports_items_with_children_outside_the_set() {
        let root = Item::new(None, 0);
        let child = Item::new(Some(root.id), 0);
        let items = [root, child]
            .into_iter()
            .map(|item| (item.id, item))
            .collect::<HashMap<_, _>>();

        let stuck = leaves_first(&items, BTreeSet::from([root.id])).unwrap_err();
        assert_eq!(stuck, vec![root.id]);
    }

    #[test]
    fn normalize_path_resolves_parent_spelling() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("nested");
        std::fs::create_dir(&nested).unwrap();
        let direct = normalize_path(&nested.join("a.organizer"));
        let dotted = normalize_path(&nested.join("..").join("nested").join("a.organizer"));
        assert_eq!(direct, dotted);
    }
}
