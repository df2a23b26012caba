//! Item and rule table access.
//!
//! # Responsibility
//! - Read the item tree shape, item bodies and rule arrays.
//! - Build the redo/undo statement pairs that mutate items and rules.
//!
//! # Invariants
//! - Mutations go through `RecordedStatement` so every change can be
//!   replayed by the history journal.
//! - Sibling listing is deterministic: `sort_order ASC, item_uuid ASC`.

use crate::db::{DbError, DbResult};
use crate::model::item::{Item, ItemId};
use crate::repo::history_repo::RecordedStatement;
use rusqlite::{Connection, OptionalExtension, Row};
use serde_json::json;
use uuid::Uuid;

const INSERT_ITEM_SQL: &str =
    "INSERT INTO items (item_uuid, parent_uuid, sort_order, body) VALUES (?1, ?2, ?3, ?4);";
const DELETE_ITEM_SQL: &str = "DELETE FROM items WHERE item_uuid = ?1;";
const UPDATE_BODY_SQL: &str = "UPDATE items SET body = ?2 WHERE item_uuid = ?1;";
const INSERT_RULES_SQL: &str = "INSERT INTO rules (item_uuid, rules) VALUES (?1, ?2);";
const DELETE_RULES_SQL: &str = "DELETE FROM rules WHERE item_uuid = ?1;";
const UPDATE_RULES_SQL: &str = "UPDATE rules SET rules = ?2 WHERE item_uuid = ?1;";

/// Loads the shape of the whole item tree.
pub fn load_items(conn: &Connection) -> DbResult<Vec<Item>> {
    let mut stmt = conn.prepare(
        "SELECT item_uuid, parent_uuid, sort_order
         FROM items
         ORDER BY sort_order ASC, item_uuid ASC;",
    )?;
    let mut rows = stmt.query([])?;
    let mut items = Vec::new();
    while let Some(row) = rows.next()? {
        items.push(parse_item_row(row)?);
    }
    Ok(items)
}

fn parse_item_row(row: &Row<'_>) -> DbResult<Item> {
    let id = parse_uuid(&row.get::<_, String>(0)?)?;
    let parent = row
        .get::<_, Option<String>>(1)?
        .map(|value| parse_uuid(&value))
        .transpose()?;
    Ok(Item {
        id,
        parent,
        position: row.get(2)?,
    })
}

pub(crate) fn parse_uuid(value: &str) -> DbResult<Uuid> {
    Uuid::parse_str(value).map_err(|err| DbError::InvalidData(format!("item id `{value}`: {err}")))
}

/// Reads one item body.
pub fn item_body(conn: &Connection, id: ItemId) -> DbResult<Option<String>> {
    let body = conn
        .query_row(
            "SELECT body FROM items WHERE item_uuid = ?1;",
            [id.to_string()],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(body)
}

/// Reads the raw rule array stored for one item.
pub fn item_rules_json(conn: &Connection, id: ItemId) -> DbResult<Option<String>> {
    let rules = conn
        .query_row(
            "SELECT rules FROM rules WHERE item_uuid = ?1;",
            [id.to_string()],
            |row| row.get::<_, String>(0),
        )
        .optional()?;
    Ok(rules)
}

/// Reads every stored rule array, keyed by item id.
pub fn all_rules_json(conn: &Connection) -> DbResult<Vec<(ItemId, String)>> {
    let mut stmt = conn.prepare("SELECT item_uuid, rules FROM rules ORDER BY item_uuid ASC;")?;
    let mut rows = stmt.query([])?;
    let mut lists = Vec::new();
    while let Some(row) = rows.next()? {
        let id = parse_uuid(&row.get::<_, String>(0)?)?;
        lists.push((id, row.get::<_, String>(1)?));
    }
    Ok(lists)
}

/// `(redo, undo)` pair inserting one item row.
pub fn insert_item_statements(
    item: &Item,
    body: &str,
) -> (RecordedStatement, RecordedStatement) {
    (
        insert_item_statement(item, body),
        RecordedStatement::new(DELETE_ITEM_SQL, vec![json!(item.id.to_string())]),
    )
}

/// `(redo, undo)` pair deleting one item row whose current body is `body`.
pub fn delete_item_statements(
    item: &Item,
    body: &str,
) -> (RecordedStatement, RecordedStatement) {
    (
        RecordedStatement::new(DELETE_ITEM_SQL, vec![json!(item.id.to_string())]),
        insert_item_statement(item, body),
    )
}

fn insert_item_statement(item: &Item, body: &str) -> RecordedStatement {
    RecordedStatement::new(
        INSERT_ITEM_SQL,
        vec![
            json!(item.id.to_string()),
            json!(item.parent.map(|parent| parent.to_string())),
            json!(item.position),
            json!(body),
        ],
    )
}

/// `(redo, undo)` pair replacing an item body.
pub fn update_body_statements(
    id: ItemId,
    old_body: &str,
    new_body: &str,
) -> (RecordedStatement, RecordedStatement) {
    (
        RecordedStatement::new(UPDATE_BODY_SQL, vec![json!(id.to_string()), json!(new_body)]),
        RecordedStatement::new(UPDATE_BODY_SQL, vec![json!(id.to_string()), json!(old_body)]),
    )
}

/// `(redo, undo)` pair inserting an item's rule row.
pub fn insert_rules_statements(id: ItemId, rules: &str) -> (RecordedStatement, RecordedStatement) {
    (
        RecordedStatement::new(INSERT_RULES_SQL, vec![json!(id.to_string()), json!(rules)]),
        RecordedStatement::new(DELETE_RULES_SQL, vec![json!(id.to_string())]),
    )
}

/// `(redo, undo)` pair deleting an item's rule row.
pub fn delete_rules_statements(id: ItemId, rules: &str) -> (RecordedStatement, RecordedStatement) {
    let (insert, delete) = insert_rules_statements(id, rules);
    (delete, insert)
}

/// `(redo, undo)` pair replacing an item's rule array.
pub fn update_rules_statements(
    id: ItemId,
    old_rules: &str,
    new_rules: &str,
) -> (RecordedStatement, RecordedStatement) {
    (
        RecordedStatement::new(UPDATE_RULES_SQL, vec![json!(id.to_string()), json!(new_rules)]),
        RecordedStatement::new(UPDATE_RULES_SQL, vec![json!(id.to_string()), json!(old_rules)]),
    )
}

#[cfg(test)]
mod tests {
    use super::{
        all_rules_json, delete_item_statements, insert_item_statements, insert_rules_statements,
        item_body, item_rules_json, load_items, update_body_statements,
    };
    use crate::db::open_db_in_memory;
    use crate::model::item::Item;

    #[test]
    fn statement_pairs_revert_each_other() {
        let conn = open_db_in_memory().unwrap();
        let root = Item::new(None, 0);
        let child = Item::new(Some(root.id), 0);

        for (item, body) in [(&root, "root"), (&child, "child")] {
            let (redo, _) = insert_item_statements(item, body);
            redo.execute(&conn).unwrap();
        }
        let (redo, _) = insert_rules_statements(child.id, "[]");
        redo.execute(&conn).unwrap();

        let mut loaded = load_items(&conn).unwrap();
        loaded.sort_by_key(|item| item.parent.is_some());
        assert_eq!(loaded, vec![root, child]);
        assert_eq!(item_rules_json(&conn, child.id).unwrap().as_deref(), Some("[]"));
        assert_eq!(all_rules_json(&conn).unwrap().len(), 1);

        let (redo, undo) = update_body_statements(child.id, "child", "edited");
        redo.execute(&conn).unwrap();
        assert_eq!(item_body(&conn, child.id).unwrap().as_deref(), Some("edited"));
        undo.execute(&conn).unwrap();
        assert_eq!(item_body(&conn, child.id).unwrap().as_deref(), Some("child"));

        let (redo, undo) = delete_item_statements(&child, "child");
        redo.execute(&conn).unwrap();
        assert_eq!(item_body(&conn, child.id).unwrap(), None);
        undo.execute(&conn).unwrap();
        assert_eq!(load_items(&conn).unwrap().len(), 2);
    }
}
