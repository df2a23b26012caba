//! Computed occurrence records.
//!
//! Occurrences are transient: they are produced on demand from rule lists and
//! never written to storage.

use crate::model::item::ItemId;
use std::path::PathBuf;
use uuid::Uuid;

/// Identifier of one activated alarm instance.
pub type AlarmId = Uuid;

/// One concrete instantiation of a rule in time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Occurrence {
    /// Path of the open store the item belongs to.
    pub store: PathBuf,
    pub item: ItemId,
    /// Unix epoch seconds.
    pub start: i64,
    /// Unix epoch seconds, `>= start` when set.
    pub end: Option<i64>,
    /// Alarm timestamp, unix epoch seconds.
    pub alarm: Option<i64>,
    /// Set only for alarms the scheduler has activated or snoozed.
    pub alarm_id: Option<AlarmId>,
}

impl Occurrence {
    pub fn new(
        store: impl Into<PathBuf>,
        item: ItemId,
        start: i64,
        end: Option<i64>,
        alarm: Option<i64>,
    ) -> Self {
        Self {
            store: store.into(),
            item,
            start,
            end,
            alarm,
            alarm_id: None,
        }
    }

    /// End of the occurrence interval; a missing end collapses to `start`.
    pub fn effective_end(&self) -> i64 {
        self.end.unwrap_or(self.start)
    }

    /// Whether both records describe the same occurrence, ignoring alarm
    /// fields.
    pub fn same_slot(&self, other: &Occurrence) -> bool {
        self.item == other.item
            && self.start == other.start
            && self.end == other.end
            && self.store == other.store
    }
}
