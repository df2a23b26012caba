//! Alarm state owned by the scheduler.
//!
//! # Invariants
//! - Watermarks never move backward.
//! - Every record refers to a store that was open when it was activated;
//!   records of closed stores are forgotten.

use crate::model::item::ItemId;
use crate::model::occurrence::{AlarmId, Occurrence};
use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AlarmStatus {
    /// Found by the last search and waiting for the timer.
    Pending,
    /// Fired and not yet handled.
    Active,
    /// Fires again at `until`.
    Snoozed { until: i64 },
    Dismissed,
}

/// One alarm instance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AlarmRecord {
    pub id: AlarmId,
    pub store: PathBuf,
    pub item: ItemId,
    pub start: i64,
    pub end: Option<i64>,
    /// Original alarm time of the occurrence.
    pub alarm: i64,
    pub status: AlarmStatus,
}

impl AlarmRecord {
    /// Wraps an occurrence found by an alarm search; `None` without an alarm.
    pub fn pending(occurrence: Occurrence) -> Option<Self> {
        let alarm = occurrence.alarm?;
        Some(Self {
            id: occurrence.alarm_id.unwrap_or_else(Uuid::new_v4),
            store: occurrence.store,
            item: occurrence.item,
            start: occurrence.start,
            end: occurrence.end,
            alarm,
            status: AlarmStatus::Pending,
        })
    }

    /// Occurrence view used for forced insertion into window queries.
    ///
    /// Snoozed alarms report their snooze time as the alarm.
    pub fn to_occurrence(&self) -> Occurrence {
        let alarm = match self.status {
            AlarmStatus::Snoozed { until } => until,
            _ => self.alarm,
        };
        Occurrence {
            store: self.store.clone(),
            item: self.item,
            start: self.start,
            end: self.end,
            alarm: Some(alarm),
            alarm_id: Some(self.id),
        }
    }
}

/// Watermarks and activated alarms across open stores.
#[derive(Debug, Clone, Default)]
pub struct AlarmBook {
    watermarks: HashMap<PathBuf, i64>,
    records: BTreeMap<AlarmId, AlarmRecord>,
}

impl AlarmBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Time of the last completed search for `store`.
    pub fn watermark(&self, store: &Path) -> Option<i64> {
        self.watermarks.get(store).copied()
    }

    pub(crate) fn set_watermark(&mut self, store: &Path, time: i64) {
        self.watermarks.insert(store.to_path_buf(), time);
    }

    /// Moves the watermark of `store` forward to `time`.
    pub(crate) fn advance_watermark(&mut self, store: &Path, time: i64) {
        let watermark = self.watermarks.entry(store.to_path_buf()).or_insert(time);
        *watermark = (*watermark).max(time);
    }

    pub fn get(&self, id: AlarmId) -> Option<&AlarmRecord> {
        self.records.get(&id)
    }

    pub(crate) fn get_mut(&mut self, id: AlarmId) -> Option<&mut AlarmRecord> {
        self.records.get_mut(&id)
    }

    pub(crate) fn upsert(&mut self, record: AlarmRecord) {
        self.records.insert(record.id, record);
    }

    pub(crate) fn remove(&mut self, id: AlarmId) -> Option<AlarmRecord> {
        self.records.remove(&id)
    }

    /// Records that are active or snoozed.
    pub fn live_records(&self) -> impl Iterator<Item = &AlarmRecord> {
        self.records.values().filter(|record| {
            matches!(
                record.status,
                AlarmStatus::Active | AlarmStatus::Snoozed { .. }
            )
        })
    }

    pub fn active_records(&self) -> impl Iterator<Item = &AlarmRecord> {
        self.records
            .values()
            .filter(|record| record.status == AlarmStatus::Active)
    }

    /// Snoozed records whose snooze expired at or before `now`.
    pub fn overdue_snoozes(&self, now: i64) -> Vec<AlarmRecord> {
        self.records
            .values()
            .filter(|record| matches!(record.status, AlarmStatus::Snoozed { until } if until <= now))
            .cloned()
            .collect()
    }

    /// Snoozed records still waiting, with their wake-up time.
    pub fn future_snoozes(&self, now: i64) -> Vec<(i64, AlarmRecord)> {
        self.records
            .values()
            .filter_map(|record| match record.status {
                AlarmStatus::Snoozed { until } if until > now => Some((until, record.clone())),
                _ => None,
            })
            .collect()
    }

    /// Drops the watermark and every record of `store`; returns the live
    /// records removed.
    pub(crate) fn forget_store(&mut self, store: &Path) -> Vec<AlarmRecord> {
        self.watermarks.remove(store);
        self.remove_where(|record| record.store.as_path() == store)
    }

    /// Drops records of deleted items; returns the live records removed.
    pub(crate) fn forget_items(&mut self, store: &Path, items: &[ItemId]) -> Vec<AlarmRecord> {
        self.remove_where(|record| record.store.as_path() == store && items.contains(&record.item))
    }

    /// Drops records of `store` whose item fails `exists`; returns the live
    /// records removed.
    pub(crate) fn forget_missing_items(
        &mut self,
        store: &Path,
        exists: impl Fn(ItemId) -> bool,
    ) -> Vec<AlarmRecord> {
        self.remove_where(|record| record.store.as_path() == store && !exists(record.item))
    }

    /// Drops dismissed records of `store`.
    pub(crate) fn prune_dismissed(&mut self, store: &Path) {
        self.records.retain(|_, record| {
            record.store.as_path() != store || record.status != AlarmStatus::Dismissed
        });
    }

    fn remove_where(&mut self, predicate: impl Fn(&AlarmRecord) -> bool) -> Vec<AlarmRecord> {
        let ids = self
            .records
            .values()
            .filter(|record| predicate(record))
            .map(|record| record.id)
            .collect::<Vec<_>>();
        ids.into_iter()
            .filter_map(|id| self.records.remove(&id))
            .filter(|record| {
                matches!(
                    record.status,
                    AlarmStatus::Active | AlarmStatus::Snoozed { .. }
                )
            })
            .collect()
    }
}
