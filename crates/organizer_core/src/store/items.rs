//! Item editing and history replay on an open store.

use super::history::{HistoryGroup, HistoryJournal, JournalRecord};
use super::{Store, StoreError, StoreResult};
use crate::lock::HandleQueue;
use crate::model::item::{Item, ItemId};
use crate::model::rule::{rules_from_json, rules_to_json, Rule};
use crate::repo::item_repo::{
    insert_item_statements, insert_rules_statements, item_body, item_rules_json,
    update_body_statements, update_rules_statements,
};
use log::error;
use rusqlite::Connection;

impl Store {
    /// Appends a new item after the last child of `parent`.
    pub(crate) fn create_item(
        &mut self,
        parent: Option<ItemId>,
        text: &str,
        group: HistoryGroup,
    ) -> StoreResult<ItemId> {
        if let Some(parent) = parent {
            if !self.items.contains_key(&parent) {
                return Err(StoreError::ItemNotFound(parent));
            }
        }
        let position = self
            .items
            .values()
            .filter(|item| item.parent == parent)
            .map(|item| item.position + 1)
            .max()
            .unwrap_or(0);
        let item = Item::new(parent, position);

        let conn = self.handle.acquire();
        let result = record_new_item(&conn, &self.history, &item, text, group);
        HandleQueue::release(conn);
        if let Err(err) = result {
            error!(
                "event=item_create module=store status=error error_code=insert_failed error={err}"
            );
            // The item row may already be written.
            self.reload_items()?;
            return Err(err);
        }

        self.items.insert(item.id, item);
        self.modified = true;
        Ok(item.id)
    }

    pub fn item_text(&self, id: ItemId) -> StoreResult<String> {
        let conn = self.handle.acquire();
        item_body(&conn, id)?.ok_or(StoreError::ItemNotFound(id))
    }

    pub(crate) fn update_item_text(
        &mut self,
        id: ItemId,
        text: &str,
        group: HistoryGroup,
    ) -> StoreResult<()> {
        let conn = self.handle.acquire();
        let old = item_body(&conn, id)?.ok_or(StoreError::ItemNotFound(id))?;
        let (redo, undo) = update_body_statements(id, &old, text);
        self.history.record(
            &conn,
            group,
            JournalRecord {
                item: id,
                action: "item_update_text",
                description: "Edit item text",
                redo,
                undo,
            },
        )?;
        HandleQueue::release(conn);
        self.modified = true;
        Ok(())
    }

    /// Decoded rule list of one item; an item without a rule row has none.
    pub fn item_rules(&self, id: ItemId) -> StoreResult<Vec<Rule>> {
        if !self.items.contains_key(&id) {
            return Err(StoreError::ItemNotFound(id));
        }
        let conn = self.handle.acquire();
        match item_rules_json(&conn, id)? {
            Some(json) => Ok(rules_from_json(&json)?),
            None => Ok(Vec::new()),
        }
    }

    pub(crate) fn update_item_rules(
        &mut self,
        id: ItemId,
        rules: &[Rule],
        group: HistoryGroup,
    ) -> StoreResult<()> {
        if !self.items.contains_key(&id) {
            return Err(StoreError::ItemNotFound(id));
        }
        let encoded = rules_to_json(rules)?;

        let conn = self.handle.acquire();
        let (redo, undo) = match item_rules_json(&conn, id)? {
            Some(old) => update_rules_statements(id, &old, &encoded),
            None => insert_rules_statements(id, &encoded),
        };
        self.history.record(
            &conn,
            group,
            JournalRecord {
                item: id,
                action: "rules_update",
                description: "Edit item rules",
                redo,
                undo,
            },
        )?;
        HandleQueue::release(conn);
        self.modified = true;
        Ok(())
    }

    /// Reverts the newest history group. Returns `false` if there is none.
    pub(crate) fn undo(&mut self) -> StoreResult<bool> {
        let conn = self.handle.acquire();
        let reverted = self.history.undo(&conn)?;
        HandleQueue::release(conn);
        self.after_replay(reverted.is_some())
    }

    /// Reapplies the oldest undone history group. Returns `false` if there is
    /// none.
    pub(crate) fn redo(&mut self) -> StoreResult<bool> {
        let conn = self.handle.acquire();
        let reapplied = self.history.redo(&conn)?;
        HandleQueue::release(conn);
        self.after_replay(reapplied.is_some())
    }

    fn after_replay(&mut self, changed: bool) -> StoreResult<bool> {
        if changed {
            self.reload_items()?;
            self.modified = true;
        }
        Ok(changed)
    }
}

/// Journals the item row and its empty rule list.
fn record_new_item(
    conn: &Connection,
    history: &HistoryJournal,
    item: &Item,
    text: &str,
    group: HistoryGroup,
) -> StoreResult<()> {
    let (redo, undo) = insert_item_statements(item, text);
    history.record(
        conn,
        group,
        JournalRecord {
            item: item.id,
            action: "item_insert",
            description: "Insert item",
            redo,
            undo,
        },
    )?;
    let (redo, undo) = insert_rules_statements(item.id, &rules_to_json(&[])?);
    history.record(
        conn,
        group,
        JournalRecord {
            item: item.id,
            action: "rules_insert",
            description: "Insert item rules",
            redo,
            undo,
        },
    )?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use crate::extension::compatibility::CompatibilitySet;
    use crate::store::{HistoryGroup, Store};

    #[test]
    fn failed_rule_insert_keeps_item_map_in_sync() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("items.organizer");
        let compatibility = CompatibilitySet::for_current_core();
        Store::create(&path, &compatibility, 10).unwrap();
        let mut store = Store::open(&path, &compatibility).unwrap();

        let conn = store.handle.acquire();
        conn.execute_batch(
            "CREATE TEMP TRIGGER reject_rules BEFORE INSERT ON rules
             BEGIN SELECT RAISE(ABORT, 'rules rejected'); END;",
        )
        .unwrap();
        drop(conn);

        assert!(store.create_item(None, "half", HistoryGroup::new(1)).is_err());
        // The item row landed before the rule insert failed.
        assert_eq!(store.item_count(), 1);
        let id = store.item_ids()[0];
        assert!(store.contains_item(id));
        assert_eq!(store.item_text(id).unwrap(), "half");
    }
}
