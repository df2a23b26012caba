//! Store-level properties and whole-store copy.
//!
//! # Invariants
//! - `properties` holds exactly one row (`property_id = 1`).
//! - A copy never writes to the source connection.

use crate::db::DbResult;
use rusqlite::{params, Connection};

/// Store-wide settings persisted in `properties`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoreProperties {
    pub history_limit: u32,
    /// Unix seconds of the last alarm search, if any was ever saved.
    pub last_alarm_search: Option<i64>,
}

/// Inserts or replaces the single properties row.
pub fn write_properties(conn: &Connection, properties: &StoreProperties) -> DbResult<()> {
    conn.execute(
        "INSERT OR REPLACE INTO properties (property_id, history_limit, last_alarm_search)
         VALUES (1, ?1, ?2);",
        params![properties.history_limit, properties.last_alarm_search],
    )?;
    Ok(())
}

pub fn read_properties(conn: &Connection) -> DbResult<StoreProperties> {
    let properties = conn.query_row(
        "SELECT history_limit, last_alarm_search FROM properties WHERE property_id = 1;",
        [],
        |row| {
            Ok(StoreProperties {
                history_limit: row.get(0)?,
                last_alarm_search: row.get(1)?,
            })
        },
    )?;
    Ok(properties)
}

pub fn set_last_alarm_search(conn: &Connection, time: i64) -> DbResult<()> {
    conn.execute(
        "UPDATE properties SET last_alarm_search = ?1 WHERE property_id = 1;",
        [time],
    )?;
    Ok(())
}

/// Copies compatibility, items, rules and history rows from `src` into an
/// empty, migrated `dst`.
///
/// `src` may carry an open transaction; its uncommitted rows are copied as
/// seen by that connection. Pending history is written as committed.
pub fn copy_contents(src: &Connection, dst: &mut Connection) -> DbResult<()> {
    let tx = dst.transaction()?;

    {
        let mut read = src.prepare(
            "SELECT component_type, name, version FROM compatibility ORDER BY entry_id ASC;",
        )?;
        let mut write = tx.prepare(
            "INSERT INTO compatibility (component_type, name, version) VALUES (?1, ?2, ?3);",
        )?;
        let mut rows = read.query([])?;
        while let Some(row) = rows.next()? {
            write.execute(params![
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?
            ])?;
        }
    }

    {
        let mut read = src.prepare("SELECT item_uuid, parent_uuid, sort_order, body FROM items;")?;
        let mut write = tx.prepare(
            "INSERT INTO items (item_uuid, parent_uuid, sort_order, body) VALUES (?1, ?2, ?3, ?4);",
        )?;
        let mut rows = read.query([])?;
        while let Some(row) = rows.next()? {
            write.execute(params![
                row.get::<_, String>(0)?,
                row.get::<_, Option<String>>(1)?,
                row.get::<_, i64>(2)?,
                row.get::<_, String>(3)?
            ])?;
        }
    }

    {
        let mut read = src.prepare("SELECT item_uuid, rules FROM rules;")?;
        let mut write = tx.prepare("INSERT INTO rules (item_uuid, rules) VALUES (?1, ?2);")?;
        let mut rows = read.query([])?;
        while let Some(row) = rows.next()? {
            write.execute(params![row.get::<_, String>(0)?, row.get::<_, String>(1)?])?;
        }
    }

    {
        let mut read = src.prepare(
            "SELECT group_id, item_uuid, action, description,
                    redo_sql, redo_params, undo_sql, undo_params, status
             FROM history
             ORDER BY history_id ASC;",
        )?;
        let mut write = tx.prepare(
            "INSERT INTO history (
                group_id, item_uuid, action, description,
                redo_sql, redo_params, undo_sql, undo_params, status
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8,
                      CASE ?9 WHEN 'pending' THEN 'committed' ELSE ?9 END);",
        )?;
        let mut rows = read.query([])?;
        while let Some(row) = rows.next()? {
            write.execute(params![
                row.get::<_, i64>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, String>(8)?
            ])?;
        }
    }

    tx.commit()?;
    Ok(())
}
