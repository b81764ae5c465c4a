use async_trait::async_trait;
use chrono::{Duration, SecondsFormat, Utc};

use super::{AuditEntry, AuditSink, AuditSinkError};
use crate::db::{self, Database};

/// Audit sink backed by the `audit_log` table.
#[derive(Debug, Clone)]
pub struct SqliteAuditSink {
    db: Database,
}

impl SqliteAuditSink {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Delete entries older than `retention_days`. Returns rows removed.
    pub async fn prune_older_than(&self, retention_days: i64) -> Result<usize, AuditSinkError> {
        let cutoff = (Utc::now() - Duration::days(retention_days))
            .to_rfc3339_opts(SecondsFormat::Millis, true);
        let removed = self
            .db
            .call(move |conn| db::prune_audit_log(conn, &cutoff))
            .await?;
        if removed > 0 {
            tracing::info!(removed, retention_days, "Pruned audit log");
        }
        Ok(removed)
    }
}

#[async_trait]
impl AuditSink for SqliteAuditSink {
    async fn append(&self, entry: AuditEntry) -> Result<(), AuditSinkError> {
        let details = entry.details_json()?;
        let timestamp = entry.timestamp_rfc3339();
        let action = entry.action().to_string();
        let actor = entry.actor().to_string();

        self.db
            .call(move |conn| {
                db::insert_audit_entry(conn, &timestamp, &action, &actor, &details)
            })
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::{RequestDetails, ResponseDetails};
    use crate::db::AuditLogRow;

    impl SqliteAuditSink {
        /// Most recent entries first.
        async fn recent(&self, limit: u32) -> Result<Vec<AuditLogRow>, AuditSinkError> {
            Ok(self
                .db
                .call(move |conn| db::recent_audit_entries(conn, limit))
                .await?)
        }

        /// Everything recorded for one actor, most recent first.
        async fn for_actor(&self, actor: &str) -> Result<Vec<AuditLogRow>, AuditSinkError> {
            let actor = actor.to_string();
            Ok(self
                .db
                .call(move |conn| db::audit_entries_for_user(conn, &actor))
                .await?)
        }
    }

    #[tokio::test]
    async fn append_persists_details() {
        let sink = SqliteAuditSink::new(Database::open_in_memory().unwrap());
        let mut request = RequestDetails::default();
        request.query_parameters.insert("page".into(), "2".into());

        sink.append(AuditEntry::new(
            "GET /api/tasks",
            "alice",
            request,
            ResponseDetails { status_code: 404 },
        ))
        .await
        .unwrap();

        let rows = sink.recent(10).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].action, "GET /api/tasks");
        assert_eq!(rows[0].username, "alice");
        let details: serde_json::Value = serde_json::from_str(&rows[0].details).unwrap();
        assert_eq!(details["Response"]["StatusCode"], 404);
        assert_eq!(details["Request"]["QueryParameters"]["page"], "2");

        assert_eq!(sink.for_actor("alice").await.unwrap().len(), 1);
        assert!(sink.for_actor("bob").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn prune_keeps_fresh_entries() {
        let sink = SqliteAuditSink::new(Database::open_in_memory().unwrap());
        sink.append(AuditEntry::new(
            "GET /",
            "alice",
            RequestDetails::default(),
            ResponseDetails { status_code: 200 },
        ))
        .await
        .unwrap();

        assert_eq!(sink.prune_older_than(90).await.unwrap(), 0);
        assert_eq!(sink.recent(10).await.unwrap().len(), 1);
    }
}
