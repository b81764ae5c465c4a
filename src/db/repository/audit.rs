use rusqlite::{params, Connection};

use crate::db::DatabaseError;

/// A row from the `audit_log` table.
#[cfg(test)]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditLogRow {
    pub id: i64,
    pub timestamp: String,
    pub action: String,
    pub username: String,
    pub details: String,
}

/// Insert one audit entry. Returns the new row id.
pub fn insert_audit_entry(
    conn: &Connection,
    timestamp: &str,
    action: &str,
    username: &str,
    details: &str,
) -> Result<i64, DatabaseError> {
    conn.execute(
        "INSERT INTO audit_log (timestamp, action, username, details) VALUES (?1, ?2, ?3, ?4)",
        params![timestamp, action, username, details],
    )?;
    Ok(conn.last_insert_rowid())
}

/// Delete entries whose timestamp sorts before `cutoff` (RFC 3339, UTC).
pub fn prune_audit_log(conn: &Connection, cutoff: &str) -> Result<usize, DatabaseError> {
    let deleted = conn.execute(
        "DELETE FROM audit_log WHERE timestamp < ?1",
        params![cutoff],
    )?;
    Ok(deleted)
}

/// Most recent entries first.
#[cfg(test)]
pub fn recent_audit_entries(
    conn: &Connection,
    limit: u32,
) -> Result<Vec<AuditLogRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, timestamp, action, username, details FROM audit_log
         ORDER BY id DESC LIMIT ?1",
    )?;
    let rows = stmt
        .query_map(params![limit], |row| {
            Ok(AuditLogRow {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                action: row.get(2)?,
                username: row.get(3)?,
                details: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

/// Entries recorded for one actor, most recent first.
#[cfg(test)]
pub fn audit_entries_for_user(
    conn: &Connection,
    username: &str,
) -> Result<Vec<AuditLogRow>, DatabaseError> {
    let mut stmt = conn.prepare(
        "SELECT id, timestamp, action, username, details FROM audit_log
         WHERE username = ?1 ORDER BY id DESC",
    )?;
    let rows = stmt
        .query_map(params![username], |row| {
            Ok(AuditLogRow {
                id: row.get(0)?,
                timestamp: row.get(1)?,
                action: row.get(2)?,
                username: row.get(3)?,
                details: row.get(4)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;

    #[test]
    fn insert_and_read_back() {
        let conn = open_memory_database().unwrap();
        insert_audit_entry(&conn, "2026-01-01T00:00:00.000Z", "GET /api/tasks", "alice", "{}").unwrap();
        insert_audit_entry(&conn, "2026-01-02T00:00:00.000Z", "POST /api/tasks", "Anonymous", "{}").unwrap();

        let rows = recent_audit_entries(&conn, 10).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].action, "POST /api/tasks");

        let alice = audit_entries_for_user(&conn, "alice").unwrap();
        assert_eq!(alice.len(), 1);
        assert_eq!(alice[0].action, "GET /api/tasks");
    }

    #[test]
    fn prune_removes_only_older_entries() {
        let conn = open_memory_database().unwrap();
        insert_audit_entry(&conn, "2025-01-01T00:00:00.000Z", "GET /old", "a", "{}").unwrap();
        insert_audit_entry(&conn, "2026-06-01T00:00:00.000Z", "GET /new", "a", "{}").unwrap();

        let removed = prune_audit_log(&conn, "2026-01-01T00:00:00.000Z").unwrap();
        assert_eq!(removed, 1);
        let rows = recent_audit_entries(&conn, 10).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].action, "GET /new");
    }
}
