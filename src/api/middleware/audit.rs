//! Request audit stage.
//!
//! Records one [`AuditEntry`] per non-excluded request once the final
//! status is known. A handler that fails or panics is still audited with
//! the status the client will see. Sink failures are logged and dropped;
//! they never change the response.
//!
//! The entry is held by a [`PendingEntry`] while downstream runs. If the
//! request future is dropped first (client disconnect, outer timeout),
//! the guard still writes the entry with status 499.

use std::collections::BTreeMap;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::{HeaderMap, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use futures_util::FutureExt;
use tokio::task::JoinHandle;

use crate::api::error::ApiError;
use crate::api::middleware::errors::panic_message;
use crate::api::types::Principal;
use crate::audit::{AuditEntry, AuditSink, RequestDetails, ResponseDetails, ANONYMOUS_ACTOR};
use crate::config::AuditSettings;

/// Status recorded when the request is dropped before a response exists.
pub const CLIENT_CLOSED_REQUEST: u16 = 499;

/// Audit configuration and destination, fixed when the router is built.
#[derive(Clone)]
pub struct AuditStage {
    settings: Arc<AuditSettings>,
    sink: Arc<dyn AuditSink>,
}

impl AuditStage {
    pub fn new(settings: AuditSettings, sink: Arc<dyn AuditSink>) -> Self {
        Self {
            settings: Arc::new(settings),
            sink,
        }
    }

    /// Segment-aware, case-insensitive prefix match: `/health` covers
    /// `/health` and `/health/live` but not `/healthz`.
    pub fn is_excluded(&self, path: &str) -> bool {
        let path = path.to_ascii_lowercase();
        self.settings.excluded_paths.iter().any(|prefix| {
            let prefix = prefix.trim_end_matches('/').to_ascii_lowercase();
            if prefix.is_empty() {
                return false;
            }
            path == prefix
                || path
                    .strip_prefix(&prefix)
                    .is_some_and(|rest| rest.starts_with('/'))
        })
    }

    fn should_audit(&self, path: &str) -> bool {
        self.settings.enabled && !self.is_excluded(path)
    }
}

pub async fn record(State(stage): State<AuditStage>, req: Request<Body>, next: Next) -> Response {
    if !stage.should_audit(req.uri().path()) {
        return next.run(req).await;
    }

    let action = format!("{} {}", req.method(), req.uri().path());
    let actor = req
        .extensions()
        .get::<Principal>()
        .map(|p| p.username.clone())
        .unwrap_or_else(|| ANONYMOUS_ACTOR.to_string());
    let request = RequestDetails {
        headers: snapshot_headers(req.headers()),
        query_parameters: snapshot_query(&req),
    };
    let mut pending = PendingEntry::new(Arc::clone(&stage.sink), action, actor, request);

    let response = match AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Ok(response) => response,
        Err(payload) => ApiError::Panicked(panic_message(payload.as_ref())).into_response(),
    };

    // The write runs on its own task, so dropping this future while it is
    // awaited does not lose the entry.
    if let Some(write) = pending.complete(response.status().as_u16()) {
        if let Err(e) = write.await {
            tracing::warn!(error = %e, "Audit write task failed");
        }
    }

    response
}

/// Audit data captured before downstream runs. Written exactly once:
/// by [`PendingEntry::complete`], or on drop with [`CLIENT_CLOSED_REQUEST`].
struct PendingEntry {
    sink: Arc<dyn AuditSink>,
    captured: Option<(String, String, RequestDetails)>,
}

impl PendingEntry {
    fn new(sink: Arc<dyn AuditSink>, action: String, actor: String, request: RequestDetails) -> Self {
        Self {
            sink,
            captured: Some((action, actor, request)),
        }
    }

    /// Hand the entry to a write task. `None` if already written or no
    /// runtime is available.
    fn complete(&mut self, status_code: u16) -> Option<JoinHandle<()>> {
        let (action, actor, request) = self.captured.take()?;
        let entry = AuditEntry::new(action, actor, request, ResponseDetails { status_code });
        let sink = Arc::clone(&self.sink);

        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => Some(runtime.spawn(async move {
                if let Err(e) = sink.append(entry).await {
                    tracing::warn!(error = %e, "Failed to write audit entry");
                }
            })),
            Err(_) => {
                tracing::warn!(action = %entry.action(), "No runtime to write audit entry");
                None
            }
        }
    }
}

impl Drop for PendingEntry {
    fn drop(&mut self) {
        if self.captured.is_some() {
            tracing::debug!("Request dropped before completion; auditing as client closed");
            let _ = self.complete(CLIENT_CLOSED_REQUEST);
        }
    }
}

/// Header name → values joined with `", "`.
fn snapshot_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
    let mut out: BTreeMap<String, String> = BTreeMap::new();
    for (name, value) in headers {
        let value = String::from_utf8_lossy(value.as_bytes());
        out.entry(name.as_str().to_string())
            .and_modify(|joined| {
                joined.push_str(", ");
                joined.push_str(&value);
            })
            .or_insert_with(|| value.into_owned());
    }
    out
}

/// Decoded query key → values joined with `","`.
fn snapshot_query(req: &Request<Body>) -> BTreeMap<String, String> {
    let pairs = Query::<Vec<(String, String)>>::try_from_uri(req.uri())
        .map(|Query(pairs)| pairs)
        .unwrap_or_default();

    let mut out: BTreeMap<String, String> = BTreeMap::new();
    for (key, value) in pairs {
        out.entry(key)
            .and_modify(|joined| {
                joined.push(',');
                joined.push_str(&value);
            })
            .or_insert(value);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::MemoryAuditSink;
    use axum::http::HeaderValue;

    fn stage(excluded: &[&str]) -> AuditStage {
        AuditStage::new(
            AuditSettings {
                enabled: true,
                excluded_paths: excluded.iter().map(|s| s.to_string()).collect(),
            },
            Arc::new(MemoryAuditSink::new()),
        )
    }

    #[test]
    fn exclusion_is_segment_aware_and_case_insensitive() {
        let stage = stage(&["/swagger", "/health/"]);
        assert!(stage.is_excluded("/swagger"));
        assert!(stage.is_excluded("/Swagger/index.html"));
        assert!(stage.is_excluded("/HEALTH"));
        assert!(stage.is_excluded("/health/live"));
        assert!(!stage.is_excluded("/healthz"));
        assert!(!stage.is_excluded("/api/health"));
    }

    #[test]
    fn disabled_stage_audits_nothing() {
        let stage = AuditStage::new(
            AuditSettings {
                enabled: false,
                excluded_paths: Vec::new(),
            },
            Arc::new(MemoryAuditSink::new()),
        );
        assert!(!stage.should_audit("/api/tasks"));
    }

    #[test]
    fn repeated_headers_are_joined() {
        let mut headers = HeaderMap::new();
        headers.append("accept", HeaderValue::from_static("text/html"));
        headers.append("accept", HeaderValue::from_static("application/json"));
        headers.insert("authorization", HeaderValue::from_static("Bearer test-token"));

        let snapshot = snapshot_headers(&headers);
        assert_eq!(snapshot["accept"], "text/html, application/json");
        assert_eq!(snapshot["authorization"], "Bearer test-token");
    }

    #[test]
    fn query_values_are_decoded_and_joined() {
        let req = Request::builder()
            .uri("/api/tasks?status=completed&priority=high&tag=a&tag=b%20c")
            .body(Body::empty())
            .unwrap();
        let snapshot = snapshot_query(&req);
        assert_eq!(snapshot["status"], "completed");
        assert_eq!(snapshot["priority"], "high");
        assert_eq!(snapshot["tag"], "a,b c");
    }

    fn pending(sink: &Arc<MemoryAuditSink>) -> PendingEntry {
        PendingEntry::new(
            sink.clone(),
            "GET /api/tasks".into(),
            ANONYMOUS_ACTOR.into(),
            RequestDetails::default(),
        )
    }

    #[tokio::test]
    async fn dropped_entry_is_written_as_client_closed() {
        let sink = Arc::new(MemoryAuditSink::new());
        drop(pending(&sink));
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let entries = sink.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].action(), "GET /api/tasks");
        assert_eq!(entries[0].response().status_code, CLIENT_CLOSED_REQUEST);
    }

    #[tokio::test]
    async fn completed_entry_is_written_once() {
        let sink = Arc::new(MemoryAuditSink::new());
        let mut entry = pending(&sink);
        entry.complete(201).unwrap().await.unwrap();
        assert!(entry.complete(500).is_none());
        drop(entry);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let entries = sink.entries();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].response().status_code, 201);
    }
}
