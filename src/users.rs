//! User directory: registration and credential checks.
//!
//! Passwords are stored as PBKDF2-HMAC-SHA256 digests with a per-user
//! random salt. Verification compares digests in constant time and
//! performs a full derivation even for unknown usernames, so response
//! timing does not reveal whether an account exists.

use chrono::{SecondsFormat, Utc};
use pbkdf2::pbkdf2_hmac;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use zeroize::Zeroizing;

use crate::db::{self, Database, DatabaseError, NewUserRow, UserRow};
use crate::token::DEFAULT_ROLE;

pub const DEFAULT_PBKDF2_ITERATIONS: u32 = 600_000;
pub const HASH_LENGTH: usize = 32;
pub const SALT_LENGTH: usize = 16;
pub const MIN_PASSWORD_LENGTH: usize = 8;
const MAX_USERNAME_LENGTH: usize = 64;

#[derive(Debug, thiserror::Error)]
pub enum UserError {
    #[error("Username or e-mail already in use")]
    AlreadyExists,
    #[error("Invalid registration: {0}")]
    InvalidInput(String),
    #[error(transparent)]
    Storage(#[from] DatabaseError),
}

/// Public view of a stored user. Never carries password material.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct User {
    pub id: i64,
    pub username: String,
    pub email: String,
    pub role: String,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            username: row.username,
            email: row.email,
            role: row.role,
        }
    }
}

#[derive(Debug, Clone)]
pub struct UserDirectory {
    db: Database,
    iterations: u32,
}

impl UserDirectory {
    pub fn new(db: Database, iterations: u32) -> Self {
        Self {
            db,
            iterations: iterations.max(1),
        }
    }

    /// Create an account. Duplicate username or e-mail → `AlreadyExists`.
    pub async fn register(
        &self,
        username: &str,
        email: &str,
        password: &str,
    ) -> Result<User, UserError> {
        validate_registration(username, email, password)?;

        let username = username.trim().to_string();
        let email = email.trim().to_string();
        let salt = generate_salt();
        let hash = derive(password, &salt, self.iterations);
        let created_at = Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true);

        let result = self
            .db
            .call(move |conn| {
                if db::user_exists(conn, &username, &email)? {
                    return Ok(None);
                }
                let id = db::insert_user(
                    conn,
                    &NewUserRow {
                        username: &username,
                        email: &email,
                        password_hash: hash.as_slice(),
                        password_salt: &salt,
                        role: DEFAULT_ROLE,
                        created_at: &created_at,
                    },
                )?;
                Ok(Some(User {
                    id,
                    username,
                    email,
                    role: DEFAULT_ROLE.to_string(),
                }))
            })
            .await;

        match result {
            Ok(Some(user)) => {
                tracing::info!(user_id = user.id, username = %user.username, "User registered");
                Ok(user)
            }
            Ok(None) | Err(DatabaseError::ConstraintViolation(_)) => Err(UserError::AlreadyExists),
            Err(e) => Err(e.into()),
        }
    }

    /// Check credentials. `Ok(None)` for unknown user or wrong password.
    pub async fn authenticate(
        &self,
        username: &str,
        password: &str,
    ) -> Result<Option<User>, UserError> {
        let lookup = username.to_string();
        let row = self
            .db
            .call(move |conn| db::get_user_by_username(conn, &lookup))
            .await?;

        let Some(row) = row else {
            // Burn the same derivation cost as a real check.
            let _ = derive(password, &[0u8; SALT_LENGTH], self.iterations);
            return Ok(None);
        };

        let candidate = derive(password, &row.password_salt, self.iterations);
        if candidate.as_slice().ct_eq(&row.password_hash).unwrap_u8() == 1 {
            Ok(Some(row.into()))
        } else {
            Ok(None)
        }
    }
}

fn validate_registration(username: &str, email: &str, password: &str) -> Result<(), UserError> {
    let username = username.trim();
    if username.is_empty() || username.len() > MAX_USERNAME_LENGTH {
        return Err(UserError::InvalidInput(format!(
            "username must be 1-{MAX_USERNAME_LENGTH} characters"
        )));
    }
    let email = email.trim();
    if !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
        return Err(UserError::InvalidInput("e-mail address is malformed".into()));
    }
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(UserError::InvalidInput(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    Ok(())
}

fn derive(password: &str, salt: &[u8], iterations: u32) -> Zeroizing<[u8; HASH_LENGTH]> {
    let mut out = Zeroizing::new([0u8; HASH_LENGTH]);
    pbkdf2_hmac::<Sha256>(password.as_bytes(), salt, iterations, &mut out[..]);
    out
}

fn generate_salt() -> [u8; SALT_LENGTH] {
    let mut salt = [0u8; SALT_LENGTH];
    rand::thread_rng().fill_bytes(&mut salt);
    salt
}
