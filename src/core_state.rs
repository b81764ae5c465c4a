//! Transport-agnostic application state.
//!
//! `CoreState` is built once at startup and shared behind an `Arc` by the
//! router, every middleware, and the background maintenance task. Nothing
//! in here is reconfigured after construction.

use std::sync::Arc;

use crate::audit::{AuditSink, AuditSinkError, SqliteAuditSink};
use crate::config::{ConfigurationError, Settings};
use crate::db::{self, Database};
use crate::login_attempts::LoginAttemptTracker;
use crate::token::TokenIssuer;
use crate::users::UserDirectory;

// ═══════════════════════════════════════════════════════════
// CoreState
// ═══════════════════════════════════════════════════════════

pub struct CoreState {
    pub settings: Settings,
    /// Failed-login bookkeeping, keyed by username.
    pub attempts: LoginAttemptTracker,
    pub tokens: TokenIssuer,
    pub users: UserDirectory,
    /// Destination for request audit entries.
    audit_sink: Arc<dyn AuditSink>,
    /// Durable audit table, used for retention pruning.
    audit_store: SqliteAuditSink,
}

impl CoreState {
    /// Build state over `db`, auditing into the same database.
    ///
    /// Fails when the signing secret is missing; the process must not serve.
    pub fn new(settings: Settings, db: Database) -> Result<Self, CoreError> {
        let store = SqliteAuditSink::new(db.clone());
        let sink: Arc<dyn AuditSink> = Arc::new(store.clone());
        Self::assemble(settings, db, store, sink)
    }

    /// Build state with an explicit audit sink (in-memory sinks in tests).
    pub fn with_audit_sink(
        settings: Settings,
        db: Database,
        sink: Arc<dyn AuditSink>,
    ) -> Result<Self, CoreError> {
        let store = SqliteAuditSink::new(db.clone());
        Self::assemble(settings, db, store, sink)
    }

    fn assemble(
        settings: Settings,
        db: Database,
        audit_store: SqliteAuditSink,
        audit_sink: Arc<dyn AuditSink>,
    ) -> Result<Self, CoreError> {
        let tokens = TokenIssuer::new(settings.require_jwt_secret()?)?;
        let attempts = LoginAttemptTracker::new(settings.lockout);
        let users = UserDirectory::new(db, settings.password_hash_iterations);

        Ok(Self {
            settings,
            attempts,
            tokens,
            users,
            audit_sink,
            audit_store,
        })
    }

    pub fn audit_sink(&self) -> Arc<dyn AuditSink> {
        Arc::clone(&self.audit_sink)
    }

    /// Apply the configured audit retention. Returns rows removed.
    pub async fn prune_audit_log(&self) -> Result<usize, AuditSinkError> {
        self.audit_store
            .prune_older_than(self.settings.audit_retention_days)
            .await
    }
}

/// Errors from CoreState construction.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
    #[error("Database error: {0}")]
    Database(#[from] db::DatabaseError),
}
