//! History table access.
//!
//! # Responsibility
//! - Persist redo/undo statement pairs grouped by history group id.
//! - Promote, mark and prune entries by status.
//! - Replay recorded statements against a store connection.
//!
//! # Invariants
//! - Entries sharing a group id are always pruned, undone and redone
//!   together.
//! - Recorded parameters are JSON scalars only (null, bool, number, string).

use crate::db::{DbError, DbResult};
use crate::model::item::ItemId;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection};
use serde_json::Value as JsonValue;
use uuid::Uuid;

/// One parameterized SQL statement kept for replay.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedStatement {
    pub sql: String,
    pub params: Vec<JsonValue>,
}

impl RecordedStatement {
    pub fn new(sql: impl Into<String>, params: Vec<JsonValue>) -> Self {
        Self {
            sql: sql.into(),
            params,
        }
    }

    /// Executes the statement on `conn`.
    pub fn execute(&self, conn: &Connection) -> DbResult<usize> {
        let values = self
            .params
            .iter()
            .map(json_to_sql)
            .collect::<DbResult<Vec<_>>>()?;
        let changed = conn.execute(&self.sql, params_from_iter(values))?;
        Ok(changed)
    }

    fn encoded_params(&self) -> DbResult<String> {
        serde_json::to_string(&self.params).map_err(|err| DbError::InvalidData(err.to_string()))
    }

    fn decode(sql: String, params: &str) -> DbResult<Self> {
        let params = serde_json::from_str::<Vec<JsonValue>>(params)
            .map_err(|err| DbError::InvalidData(format!("history params: {err}")))?;
        Ok(Self { sql, params })
    }
}

fn json_to_sql(value: &JsonValue) -> DbResult<SqlValue> {
    match value {
        JsonValue::Null => Ok(SqlValue::Null),
        JsonValue::Bool(flag) => Ok(SqlValue::Integer(i64::from(*flag))),
        JsonValue::Number(number) => {
            if let Some(integer) = number.as_i64() {
                Ok(SqlValue::Integer(integer))
            } else if let Some(real) = number.as_f64() {
                Ok(SqlValue::Real(real))
            } else {
                Err(DbError::InvalidData(format!(
                    "unsupported numeric parameter {number}"
                )))
            }
        }
        JsonValue::String(text) => Ok(SqlValue::Text(text.clone())),
        JsonValue::Array(_) | JsonValue::Object(_) => Err(DbError::InvalidData(
            "structured values cannot be bound as statement parameters".to_string(),
        )),
    }
}

/// Lifecycle status of one history entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HistoryStatus {
    /// Applied since the last save.
    Pending,
    /// Applied and saved.
    Committed,
    /// Reverted; eligible for redo until a new group is inserted.
    Undone,
}

impl HistoryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Committed => "committed",
            Self::Undone => "undone",
        }
    }

    fn parse(value: &str) -> DbResult<Self> {
        match value {
            "pending" => Ok(Self::Pending),
            "committed" => Ok(Self::Committed),
            "undone" => Ok(Self::Undone),
            other => Err(DbError::InvalidData(format!(
                "unknown history status `{other}`"
            ))),
        }
    }
}

/// One persisted history row.
#[derive(Debug, Clone, PartialEq)]
pub struct HistoryEntry {
    pub group: i64,
    pub item: ItemId,
    pub action: String,
    pub description: String,
    pub redo: RecordedStatement,
    pub undo: RecordedStatement,
    pub status: HistoryStatus,
}

/// Appends one entry.
pub fn insert_entry(conn: &Connection, entry: &HistoryEntry) -> DbResult<()> {
    conn.execute(
        "INSERT INTO history (
            group_id, item_uuid, action, description,
            redo_sql, redo_params, undo_sql, undo_params, status
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9);",
        params![
            entry.group,
            entry.item.to_string(),
            entry.action,
            entry.description,
            entry.redo.sql,
            entry.redo.encoded_params()?,
            entry.undo.sql,
            entry.undo.encoded_params()?,
            entry.status.as_str(),
        ],
    )?;
    Ok(())
}

/// Lists entries of one group in insertion order.
pub fn group_entries(conn: &Connection, group: i64) -> DbResult<Vec<HistoryEntry>> {
    let mut stmt = conn.prepare(
        "SELECT group_id, item_uuid, action, description,
                redo_sql, redo_params, undo_sql, undo_params, status
         FROM history
         WHERE group_id = ?1
         ORDER BY history_id ASC;",
    )?;
    let rows = stmt.query_map([group], |row| {
        Ok((
            row.get::<_, i64>(0)?,
            row.get::<_, String>(1)?,
            row.get::<_, String>(2)?,
            row.get::<_, String>(3)?,
            row.get::<_, String>(4)?,
            row.get::<_, String>(5)?,
            row.get::<_, String>(6)?,
            row.get::<_, String>(7)?,
            row.get::<_, String>(8)?,
        ))
    })?;

    let mut entries = Vec::new();
    for row in rows {
        let (group, item, action, description, redo_sql, redo_params, undo_sql, undo_params, status) =
            row?;
        let item = Uuid::parse_str(&item)
            .map_err(|err| DbError::InvalidData(format!("history item `{item}`: {err}")))?;
        entries.push(HistoryEntry {
            group,
            item,
            action,
            description,
            redo: RecordedStatement::decode(redo_sql, &redo_params)?,
            undo: RecordedStatement::decode(undo_sql, &undo_params)?,
            status: HistoryStatus::parse(&status)?,
        });
    }
    Ok(entries)
}

/// Newest group that has not been undone.
pub fn latest_done_group(conn: &Connection) -> DbResult<Option<i64>> {
    let group = conn
        .query_row(
            "SELECT MAX(group_id) FROM history WHERE status != 'undone';",
            [],
            |row| row.get::<_, Option<i64>>(0),
        )?;
    Ok(group)
}

/// Oldest undone group, the next one to redo.
pub fn earliest_undone_group(conn: &Connection) -> DbResult<Option<i64>> {
    let group = conn
        .query_row(
            "SELECT MIN(group_id) FROM history WHERE status = 'undone';",
            [],
            |row| row.get::<_, Option<i64>>(0),
        )?;
    Ok(group)
}

/// Highest group id ever recorded, `0` for an empty table.
pub fn max_group(conn: &Connection) -> DbResult<i64> {
    let group = conn.query_row("SELECT COALESCE(MAX(group_id), 0) FROM history;", [], |row| {
        row.get::<_, i64>(0)
    })?;
    Ok(group)
}

/// Sets the status of every entry of `group`.
pub fn set_group_status(conn: &Connection, group: i64, status: HistoryStatus) -> DbResult<()> {
    conn.execute(
        "UPDATE history SET status = ?2 WHERE group_id = ?1;",
        params![group, status.as_str()],
    )?;
    Ok(())
}

/// Promotes every pending entry to committed.
pub fn promote_pending(conn: &Connection) -> DbResult<usize> {
    let changed = conn.execute(
        "UPDATE history SET status = 'committed' WHERE status = 'pending';",
        [],
    )?;
    Ok(changed)
}

/// Drops undone entries; they can no longer be redone.
pub fn discard_undone(conn: &Connection) -> DbResult<usize> {
    let removed = conn.execute("DELETE FROM history WHERE status = 'undone';", [])?;
    Ok(removed)
}

/// Keeps the newest `limit` groups and deletes the rest.
pub fn prune_groups(conn: &Connection, limit: u32) -> DbResult<usize> {
    let removed = conn.execute(
        "DELETE FROM history
         WHERE group_id NOT IN (
             SELECT DISTINCT group_id FROM history ORDER BY group_id DESC LIMIT ?1
         );",
        [i64::from(limit)],
    )?;
    Ok(removed)
}

/// Counts distinct groups currently stored.
pub fn count_groups(conn: &Connection) -> DbResult<u32> {
    let count = conn.query_row(
        "SELECT COUNT(DISTINCT group_id) FROM history;",
        [],
        |row| row.get::<_, u32>(0),
    )?;
    Ok(count)
}
