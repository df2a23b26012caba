//! Grouped redo/undo journal of one store.
//!
//! # Responsibility
//! - Apply a mutation and record its redo/undo pair in one step.
//! - Revert and reapply whole groups.
//! - Enforce the per-store retention limit.
//!
//! # Invariants
//! - Entries of one group are undone in reverse insertion order and redone
//!   in insertion order.
//! - Recording a new entry discards every undone entry.
//! - Retention counts groups, so pruning never splits a group.

use crate::db::DbResult;
use crate::model::item::ItemId;
use crate::repo::history_repo::{
    discard_undone, earliest_undone_group, group_entries, insert_entry, latest_done_group,
    promote_pending, prune_groups, set_group_status, HistoryEntry, HistoryStatus,
    RecordedStatement,
};
use log::debug;
use rusqlite::Connection;

/// Identifier shared by history entries that undo and redo together.
///
/// Groups are plain ids handed out by `Session::begin_history_group`. Every
/// edit passed the same group joins one undo step, even when the gate was
/// released in between.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct HistoryGroup(i64);

impl HistoryGroup {
    pub(crate) fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn id(self) -> i64 {
        self.0
    }
}

/// One mutation to apply and journal.
#[derive(Debug, Clone)]
pub(crate) struct JournalRecord<'a> {
    pub item: ItemId,
    pub action: &'a str,
    pub description: &'a str,
    pub redo: RecordedStatement,
    pub undo: RecordedStatement,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryJournal {
    limit: u32,
}

impl HistoryJournal {
    pub fn new(limit: u32) -> Self {
        Self { limit }
    }

    /// Number of groups kept after pruning.
    pub fn limit(&self) -> u32 {
        self.limit
    }

    /// Executes `record.redo` and appends the pair as a pending entry.
    pub(crate) fn record(
        &self,
        conn: &Connection,
        group: HistoryGroup,
        record: JournalRecord<'_>,
    ) -> DbResult<()> {
        record.redo.execute(conn)?;
        discard_undone(conn)?;
        insert_entry(
            conn,
            &HistoryEntry {
                group: group.id(),
                item: record.item,
                action: record.action.to_string(),
                description: record.description.to_string(),
                redo: record.redo,
                undo: record.undo,
                status: HistoryStatus::Pending,
            },
        )
    }

    /// Reverts the newest group that is not undone yet.
    ///
    /// Returns the reverted group id, or `None` when nothing can be undone.
    pub fn undo(&self, conn: &Connection) -> DbResult<Option<i64>> {
        let Some(group) = latest_done_group(conn)? else {
            return Ok(None);
        };
        let entries = group_entries(conn, group)?;
        for entry in entries.iter().rev() {
            entry.undo.execute(conn)?;
        }
        set_group_status(conn, group, HistoryStatus::Undone)?;
        debug!(
            "event=history_undo module=store status=ok group={group} entries={}",
            entries.len()
        );
        Ok(Some(group))
    }

    /// Reapplies the oldest undone group.
    pub fn redo(&self, conn: &Connection) -> DbResult<Option<i64>> {
        let Some(group) = earliest_undone_group(conn)? else {
            return Ok(None);
        };
        let entries = group_entries(conn, group)?;
        for entry in &entries {
            entry.redo.execute(conn)?;
        }
        set_group_status(conn, group, HistoryStatus::Pending)?;
        debug!(
            "event=history_redo module=store status=ok group={group} entries={}",
            entries.len()
        );
        Ok(Some(group))
    }

    /// Promotes pending entries to committed and prunes old groups.
    pub fn commit(&self, conn: &Connection) -> DbResult<()> {
        promote_pending(conn)?;
        self.prune(conn)
    }

    /// Deletes groups beyond the retention limit.
    pub fn prune(&self, conn: &Connection) -> DbResult<()> {
        let removed = prune_groups(conn, self.limit)?;
        if removed > 0 {
            debug!(
                "event=history_prune module=store status=ok removed={removed} limit={}",
                self.limit
            );
        }
        Ok(())
    }
}
