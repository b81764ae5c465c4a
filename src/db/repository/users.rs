use rusqlite::{params, Connection, OptionalExtension};

use crate::db::DatabaseError;

/// A row from the `users` table.
#[derive(Debug, Clone)]
pub struct UserRow {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub password_hash: Vec<u8>,
    pub password_salt: Vec<u8>,
    pub role: String,
    pub created_at: String,
}

/// Fields needed to create a user.
#[derive(Debug, Clone)]
pub struct NewUserRow<'a> {
    pub username: &'a str,
    pub email: &'a str,
    pub password_hash: &'a [u8],
    pub password_salt: &'a [u8],
    pub role: &'a str,
    pub created_at: &'a str,
}

/// Insert a user. Duplicate username or email → `ConstraintViolation`.
pub fn insert_user(conn: &Connection, user: &NewUserRow<'_>) -> Result<i64, DatabaseError> {
    let result = conn.execute(
        "INSERT INTO users (username, email, password_hash, password_salt, role, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            user.username,
            user.email,
            user.password_hash,
            user.password_salt,
            user.role,
            user.created_at,
        ],
    );
    match result {
        Ok(_) => Ok(conn.last_insert_rowid()),
        Err(rusqlite::Error::SqliteFailure(e, msg))
            if e.code == rusqlite::ErrorCode::ConstraintViolation =>
        {
            Err(DatabaseError::ConstraintViolation(
                msg.unwrap_or_else(|| "users".to_string()),
            ))
        }
        Err(e) => Err(e.into()),
    }
}

/// Whether a user with this username or email already exists.
pub fn user_exists(conn: &Connection, username: &str, email: &str) -> Result<bool, DatabaseError> {
    let count: i64 = conn.query_row(
        "SELECT COUNT(*) FROM users WHERE username = ?1 OR email = ?2",
        params![username, email],
        |row| row.get(0),
    )?;
    Ok(count > 0)
}

/// Look up a user by username.
pub fn get_user_by_username(
    conn: &Connection,
    username: &str,
) -> Result<Option<UserRow>, DatabaseError> {
    let row = conn
        .query_row(
            "SELECT id, username, email, password_hash, password_salt, role, created_at
             FROM users WHERE username = ?1",
            params![username],
            |row| {
                Ok(UserRow {
                    id: row.get(0)?,
                    username: row.get(1)?,
                    email: row.get(2)?,
                    password_hash: row.get(3)?,
                    password_salt: row.get(4)?,
                    role: row.get(5)?,
                    created_at: row.get(6)?,
                })
            },
        )
        .optional()?;
    Ok(row)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::open_memory_database;

    fn sample<'a>(username: &'a str, email: &'a str) -> NewUserRow<'a> {
        NewUserRow {
            username,
            email,
            password_hash: b"hash",
            password_salt: b"salt",
            role: "User",
            created_at: "2026-01-01T00:00:00.000Z",
        }
    }

    #[test]
    fn insert_then_lookup() {
        let conn = open_memory_database().unwrap();
        let id = insert_user(&conn, &sample("alice", "alice@example.com")).unwrap();
        let user = get_user_by_username(&conn, "alice").unwrap().unwrap();
        assert_eq!(user.id, id);
        assert_eq!(user.email, "alice@example.com");
        assert_eq!(user.password_hash, b"hash");
        assert!(get_user_by_username(&conn, "bob").unwrap().is_none());
    }

    #[test]
    fn duplicate_username_is_constraint_violation() {
        let conn = open_memory_database().unwrap();
        insert_user(&conn, &sample("alice", "alice@example.com")).unwrap();
        let err = insert_user(&conn, &sample("alice", "other@example.com")).unwrap_err();
        assert!(matches!(err, DatabaseError::ConstraintViolation(_)));
    }

    #[test]
    fn exists_matches_username_or_email() {
        let conn = open_memory_database().unwrap();
        insert_user(&conn, &sample("alice", "alice@example.com")).unwrap();
        assert!(user_exists(&conn, "alice", "x@example.com").unwrap());
        assert!(user_exists(&conn, "zed", "alice@example.com").unwrap());
        assert!(!user_exists(&conn, "zed", "zed@example.com").unwrap());
    }
}
