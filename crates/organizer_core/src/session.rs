//! Gate-protected state: open-store registry, history groups and alarms.
//!
//! # Responsibility
//! - Track open stores by normalized path and route every store operation
//!   through that registry.
//! - Publish store and item notifications.
//! - Re-run the alarm search after changes that may move the next alarm.
//!
//! # Invariants
//! - A `Session` is only reachable through `ExclusiveGate::acquire`, so
//!   every method runs as one whole logical operation.
//! - A path is tracked at most once.
//! - History group ids grow monotonically across all open stores.
//!
//! # See also
//! - `crate::alarm::scheduler` for the alarm half of `impl Session`.
//! - `crate::organizer::Organizer` for the owning handle.

use crate::alarm::scheduler::AlarmScheduler;
use crate::config::{Clock, CoreConfig, SystemClock};
use crate::events::{
    AlarmCleared, EventBus, ItemsDeleted, StoreClosed, StoreCopied, StoreCreated, StoreOpened,
};
use crate::extension::compatibility::CompatibilitySet;
use crate::lock::ExclusiveGate;
use crate::model::item::ItemId;
use crate::model::occurrence::Occurrence;
use crate::model::rule::Rule;
use crate::occurrence::accumulator::OccurrenceAccumulator;
use crate::occurrence::collect_store_occurrences;
use crate::occurrence::resolver::ResolverRegistry;
use crate::store::{normalize_path, HistoryGroup, Store, StoreError, StoreResult};
use log::{info, warn};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Weak};

/// Collaborators fixed at startup.
pub struct Environment {
    pub config: CoreConfig,
    /// Active components every opened store must match.
    pub compatibility: CompatibilitySet,
    pub resolvers: ResolverRegistry,
    pub clock: Arc<dyn Clock>,
    pub events: EventBus,
}

impl Environment {
    /// Builds an environment with the built-in rule resolvers and the system
    /// clock.
    pub fn new(config: CoreConfig, compatibility: CompatibilitySet) -> Self {
        Self {
            config,
            compatibility,
            resolvers: ResolverRegistry::with_basic_rules(),
            clock: Arc::new(SystemClock),
            events: EventBus::new(),
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_resolvers(mut self, resolvers: ResolverRegistry) -> Self {
        self.resolvers = resolvers;
        self
    }

    /// Current time in unix seconds.
    pub fn now(&self) -> i64 {
        self.clock.now()
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new(CoreConfig::default(), CompatibilitySet::for_current_core())
    }
}

impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Environment")
            .field("config", &self.config)
            .field("compatibility", &self.compatibility)
            .field("resolvers", &self.resolvers)
            .field("events", &self.events)
            .finish()
    }
}

/// State reached by holding the exclusive gate.
#[derive(Debug)]
pub struct Session {
    pub(crate) env: Arc<Environment>,
    pub(crate) stores: BTreeMap<PathBuf, Store>,
    pub(crate) scheduler: AlarmScheduler,
    last_group: i64,
}

impl Session {
    pub(crate) fn new(env: Arc<Environment>, gate: Weak<ExclusiveGate<Session>>) -> Self {
        Self {
            env,
            stores: BTreeMap::new(),
            scheduler: AlarmScheduler::new(gate),
            last_group: 0,
        }
    }

    pub fn environment(&self) -> &Environment {
        &self.env
    }

    /// Allocates a history group id for the edits of one user action.
    pub fn begin_history_group(&mut self) -> HistoryGroup {
        self.last_group += 1;
        HistoryGroup::new(self.last_group)
    }

    /// Creates an empty store file at `path` and returns its normalized
    /// path. The store is not opened.
    pub fn create_store(&mut self, path: impl AsRef<Path>) -> StoreResult<PathBuf> {
        let path = normalize_path(path.as_ref());
        if self.stores.contains_key(&path) {
            return Err(StoreError::AlreadyOpen(path));
        }
        Store::create(
            &path,
            &self.env.compatibility,
            self.env.config.default_history_limit,
        )?;
        self.env.events.store_created.publish(&StoreCreated {
            path: path.clone(),
        });
        Ok(path)
    }

    /// Opens and registers the store at `path`.
    pub fn open_store(&mut self, path: impl AsRef<Path>) -> StoreResult<PathBuf> {
        let path = normalize_path(path.as_ref());
        if self.stores.contains_key(&path) {
            return Err(StoreError::AlreadyOpen(path));
        }
        let store = Store::open(&path, &self.env.compatibility)?;
        self.last_group = self.last_group.max(store.max_history_group()?);

        let watermark = store
            .persisted_alarm_search()
            .unwrap_or_else(|| self.env.now());
        self.scheduler.book.set_watermark(&path, watermark);
        self.stores.insert(path.clone(), store);

        self.env.events.store_opened.publish(&StoreOpened {
            path: path.clone(),
        });
        self.refresh_alarms();
        Ok(path)
    }

    /// Commits unsaved edits and persists the alarm watermark.
    ///
    /// Dismissed alarms of the store are dropped once saved.
    pub fn save_store(&mut self, path: impl AsRef<Path>) -> StoreResult<()> {
        let path = normalize_path(path.as_ref());
        let watermark = self.scheduler.book.watermark(&path);
        self.store_mut(&path)?.save(watermark)?;
        self.scheduler.book.prune_dismissed(&path);
        Ok(())
    }

    /// Writes the current content of an open store to `destination`.
    pub fn save_store_copy(
        &mut self,
        path: impl AsRef<Path>,
        destination: impl AsRef<Path>,
    ) -> StoreResult<PathBuf> {
        let source = normalize_path(path.as_ref());
        let destination = normalize_path(destination.as_ref());
        if self.stores.contains_key(&destination) {
            return Err(StoreError::AlreadyOpen(destination));
        }
        let watermark = self.scheduler.book.watermark(&source);
        self.store(&source)?.save_copy(&destination, watermark)?;

        self.env.events.store_copied.publish(&StoreCopied {
            source,
            destination: destination.clone(),
        });
        Ok(destination)
    }

    /// Closes the store at `path`, discarding unsaved edits.
    ///
    /// Alarms of the store are cleared. History pruning failures are only
    /// logged; the next open prunes again.
    pub fn close_store(&mut self, path: impl AsRef<Path>) -> StoreResult<()> {
        let path = normalize_path(path.as_ref());
        let store = self
            .stores
            .remove(&path)
            .ok_or_else(|| StoreError::NotOpen(path.clone()))?;
        let closed = store.close();

        for record in self.scheduler.book.forget_store(&path) {
            self.env
                .events
                .alarm_cleared
                .publish(&AlarmCleared { alarm: record.id });
        }
        self.env.events.store_closed.publish(&StoreClosed {
            path: path.clone(),
        });
        self.refresh_alarms();

        if let Err(err) = closed?.prune_history() {
            warn!("event=history_prune module=session status=error error={err}");
        }
        info!("event=store_close module=session status=ok");
        Ok(())
    }

    /// Deletes `ids` from the store at `path`, children before parents.
    pub fn delete_items(
        &mut self,
        path: impl AsRef<Path>,
        ids: &[ItemId],
        group: HistoryGroup,
    ) -> StoreResult<Vec<ItemId>> {
        let path = normalize_path(path.as_ref());
        let deleted = self.store_mut(&path)?.delete_items(ids, group)?;

        for record in self.scheduler.book.forget_items(&path, &deleted) {
            self.env
                .events
                .alarm_cleared
                .publish(&AlarmCleared { alarm: record.id });
        }
        self.env.events.items_deleted.publish(&ItemsDeleted {
            store: path,
            items: deleted.clone(),
        });
        self.refresh_alarms();
        Ok(deleted)
    }

    /// Appends an item under `parent`, or at the root when `None`.
    pub fn create_item(
        &mut self,
        path: impl AsRef<Path>,
        parent: Option<ItemId>,
        text: &str,
        group: HistoryGroup,
    ) -> StoreResult<ItemId> {
        let path = normalize_path(path.as_ref());
        self.store_mut(&path)?.create_item(parent, text, group)
    }

    pub fn update_item_text(
        &mut self,
        path: impl AsRef<Path>,
        id: ItemId,
        text: &str,
        group: HistoryGroup,
    ) -> StoreResult<()> {
        let path = normalize_path(path.as_ref());
        self.store_mut(&path)?.update_item_text(id, text, group)
    }

    /// Replaces the rule list of an item.
    pub fn update_item_rules(
        &mut self,
        path: impl AsRef<Path>,
        id: ItemId,
        rules: &[Rule],
        group: HistoryGroup,
    ) -> StoreResult<()> {
        let path = normalize_path(path.as_ref());
        self.store_mut(&path)?.update_item_rules(id, rules, group)?;
        self.refresh_alarms();
        Ok(())
    }

    pub fn item_text(&self, path: impl AsRef<Path>, id: ItemId) -> StoreResult<String> {
        let path = normalize_path(path.as_ref());
        self.store(&path)?.item_text(id)
    }

    pub fn item_rules(&self, path: impl AsRef<Path>, id: ItemId) -> StoreResult<Vec<Rule>> {
        let path = normalize_path(path.as_ref());
        self.store(&path)?.item_rules(id)
    }

    /// Reverts the newest history group; `false` when nothing is left.
    pub fn undo(&mut self, path: impl AsRef<Path>) -> StoreResult<bool> {
        let path = normalize_path(path.as_ref());
        let changed = self.store_mut(&path)?.undo()?;
        if changed {
            self.after_replay(&path);
        }
        Ok(changed)
    }

    /// Reapplies the oldest undone group; `false` when nothing is left.
    pub fn redo(&mut self, path: impl AsRef<Path>) -> StoreResult<bool> {
        let path = normalize_path(path.as_ref());
        let changed = self.store_mut(&path)?.redo()?;
        if changed {
            self.after_replay(&path);
        }
        Ok(changed)
    }

    /// Clears alarms of items a replay removed, then searches again.
    fn after_replay(&mut self, path: &Path) {
        if let Some(store) = self.stores.get(path) {
            let cleared = self
                .scheduler
                .book
                .forget_missing_items(path, |item| store.contains_item(item));
            for record in cleared {
                self.env
                    .events
                    .alarm_cleared
                    .publish(&AlarmCleared { alarm: record.id });
            }
        }
        self.refresh_alarms();
    }

    /// Occurrences of every open store intersecting `[min_t, max_t]`,
    /// directly or through their alarm.
    ///
    /// Active and snoozed alarms are added after all stores contributed,
    /// regardless of the window.
    pub fn get_occurrences(&self, min_t: i64, max_t: i64) -> StoreResult<Vec<Occurrence>> {
        let mut acc = OccurrenceAccumulator::new(min_t, max_t);
        for store in self.stores.values() {
            collect_store_occurrences(store, &self.env.resolvers, &mut acc)?;
        }
        for record in self.scheduler.book.live_records() {
            let live = self
                .stores
                .get(&record.store)
                .is_some_and(|store| store.contains_item(record.item));
            if live {
                acc.update(record.to_occurrence(), true);
            }
        }
        Ok(acc.into_occurrences())
    }

    /// Open store at `path`.
    pub fn store(&self, path: impl AsRef<Path>) -> StoreResult<&Store> {
        let path = normalize_path(path.as_ref());
        self.stores.get(&path).ok_or(StoreError::NotOpen(path))
    }

    fn store_mut(&mut self, path: &Path) -> StoreResult<&mut Store> {
        self.stores
            .get_mut(path)
            .ok_or_else(|| StoreError::NotOpen(path.to_path_buf()))
    }

    pub fn is_open(&self, path: impl AsRef<Path>) -> bool {
        self.stores.contains_key(&normalize_path(path.as_ref()))
    }

    /// Normalized paths of the open stores, sorted.
    pub fn open_stores(&self) -> Vec<PathBuf> {
        self.stores.keys().cloned().collect()
    }
}
