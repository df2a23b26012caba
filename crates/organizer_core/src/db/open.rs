//! Connection bootstrap utilities for SQLite store files.
//!
//! # Responsibility
//! - Open file, read-only probe, or in-memory SQLite connections.
//! - Configure connection pragmas required by store behavior.
//! - Trigger schema migrations before returning a writable connection.
//! - Manage the long-running session transaction that holds unsaved edits.
//!
//! # Invariants
//! - Writable connections have migrations fully applied.
//! - Probe connections never write.

use super::migrations::apply_migrations;
use super::DbResult;
use log::{error, info};
use rusqlite::{Connection, OpenFlags};
use std::path::Path;
use std::time::{Duration, Instant};

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Opens a store file and applies all pending migrations.
///
/// # Side effects
/// - Creates the file when it does not exist.
/// - Emits `db_open` logging events with duration and status.
pub fn open_db(path: impl AsRef<Path>) -> DbResult<Connection> {
    open_logged("file", || Connection::open(path.as_ref()), true)
}

/// Opens an in-memory database and applies all pending migrations.
pub fn open_db_in_memory() -> DbResult<Connection> {
    open_logged("memory", Connection::open_in_memory, true)
}

/// Opens an existing store file read-only, without migrations.
///
/// Used to probe compatibility metadata before a store is registered.
pub fn open_db_read_only(path: impl AsRef<Path>) -> DbResult<Connection> {
    open_logged(
        "probe",
        || Connection::open_with_flags(path.as_ref(), OpenFlags::SQLITE_OPEN_READ_ONLY),
        false,
    )
}

/// Starts the transaction that accumulates unsaved store edits.
pub fn begin_session(conn: &Connection) -> DbResult<()> {
    conn.execute_batch("BEGIN DEFERRED;")?;
    Ok(())
}

/// Commits accumulated edits and immediately starts a new session.
pub fn commit_session(conn: &Connection) -> DbResult<()> {
    if !conn.is_autocommit() {
        conn.execute_batch("COMMIT;")?;
    }
    begin_session(conn)
}

fn open_logged(
    mode: &'static str,
    open: impl FnOnce() -> rusqlite::Result<Connection>,
    migrate: bool,
) -> DbResult<Connection> {
    let started_at = Instant::now();
    info!("event=db_open module=db status=start mode={mode}");

    let mut conn = match open() {
        Ok(conn) => conn,
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_open_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            return Err(err.into());
        }
    };

    match bootstrap_connection(&mut conn, migrate) {
        Ok(()) => {
            info!(
                "event=db_open module=db status=ok mode={mode} duration_ms={}",
                started_at.elapsed().as_millis()
            );
            Ok(conn)
        }
        Err(err) => {
            error!(
                "event=db_open module=db status=error mode={mode} duration_ms={} error_code=db_bootstrap_failed error={}",
                started_at.elapsed().as_millis(),
                err
            );
            Err(err)
        }
    }
}

fn bootstrap_connection(conn: &mut Connection, migrate: bool) -> DbResult<()> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    if migrate {
        apply_migrations(conn)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::{begin_session, commit_session, open_db, open_db_in_memory, open_db_read_only};
    use crate::db::migrations::{current_user_version, latest_version};

    #[test]
    fn in_memory_connection_is_migrated() {
        let conn = open_db_in_memory().unwrap();
        assert_eq!(current_user_version(&conn).unwrap(), latest_version());
    }

    #[test]
    fn session_transaction_hides_edits_until_commit() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("session.organizer");
        let conn = open_db(&path).unwrap();
        begin_session(&conn).unwrap();
        conn.execute(
            "INSERT INTO items (item_uuid, parent_uuid, sort_order) VALUES ('a', NULL, 0);",
            [],
        )
        .unwrap();

        let probe = open_db_read_only(&path).unwrap();
        let visible: i64 = probe
            .query_row("SELECT COUNT(*) FROM items;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(visible, 0);
        drop(probe);

        commit_session(&conn).unwrap();
        assert!(!conn.is_autocommit());

        let probe = open_db_read_only(&path).unwrap();
        let visible: i64 = probe
            .query_row("SELECT COUNT(*) FROM items;", [], |row| row.get(0))
            .unwrap();
        assert_eq!(visible, 1);
    }

    #[test]
    fn read_only_probe_rejects_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        assert!(open_db_read_only(dir.path().join("missing.organizer")).is_err());
    }
}
