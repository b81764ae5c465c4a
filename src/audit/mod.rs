//! Request audit trail.
//!
//! One [`AuditEntry`] is produced per audited request, after the response
//! status is final, and handed to an [`AuditSink`]. Entries are immutable:
//! fields are set at construction and only exposed through accessors.

mod memory;
mod sqlite;

pub use memory::MemoryAuditSink;
pub use sqlite::SqliteAuditSink;

use std::collections::BTreeMap;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use crate::db::DatabaseError;

/// Actor recorded when no principal is attached to the request.
pub const ANONYMOUS_ACTOR: &str = "Anonymous";

#[derive(Debug, thiserror::Error)]
pub enum AuditSinkError {
    #[error("Audit storage error: {0}")]
    Storage(#[from] DatabaseError),
    #[error("Audit details could not be serialized: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("Audit sink unavailable: {0}")]
    Unavailable(String),
}

/// Durable, append-only destination for audit entries.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: AuditEntry) -> Result<(), AuditSinkError>;
}

// ═══════════════════════════════════════════════════════════
// Entry
// ═══════════════════════════════════════════════════════════

/// Snapshot of the inbound request taken before the handler runs.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct RequestDetails {
    pub headers: BTreeMap<String, String>,
    pub query_parameters: BTreeMap<String, String>,
}

/// Final outcome of the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct ResponseDetails {
    pub status_code: u16,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct Details<'a> {
    request: &'a RequestDetails,
    response: &'a ResponseDetails,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuditEntry {
    action: String,
    actor: String,
    timestamp: DateTime<Utc>,
    request: RequestDetails,
    response: ResponseDetails,
}

impl AuditEntry {
    pub fn new(
        action: impl Into<String>,
        actor: impl Into<String>,
        request: RequestDetails,
        response: ResponseDetails,
    ) -> Self {
        Self::with_timestamp(action, actor, Utc::now(), request, response)
    }

    pub fn with_timestamp(
        action: impl Into<String>,
        actor: impl Into<String>,
        timestamp: DateTime<Utc>,
        request: RequestDetails,
        response: ResponseDetails,
    ) -> Self {
        Self {
            action: action.into(),
            actor: actor.into(),
            timestamp,
            request,
            response,
        }
    }

    /// `"<METHOD> <PATH>"`.
    pub fn action(&self) -> &str {
        &self.action
    }

    /// Authenticated user name or [`ANONYMOUS_ACTOR`].
    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn request(&self) -> &RequestDetails {
        &self.request
    }

    pub fn response(&self) -> &ResponseDetails {
        &self.response
    }

    /// Storage form of the timestamp; sorts lexicographically.
    pub fn timestamp_rfc3339(&self) -> String {
        self.timestamp.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    /// Indented JSON: `{"Request":{"Headers":…,"QueryParameters":…},"Response":{"StatusCode":…}}`.
    pub fn details_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&Details {
            request: &self.request,
            response: &self.response,
        })
    }
}
