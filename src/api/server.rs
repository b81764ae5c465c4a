//! API server lifecycle: starts/stops the axum HTTP server and the
//! background maintenance task that keeps in-memory state bounded.
//!
//! bind → spawn server task + maintenance task → return handle with
//! shutdown channel.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::task::JoinHandle;

use crate::api::router::build_router;
use crate::api::types::ApiContext;
use crate::core_state::CoreState;

/// How often idle attempt records and rate windows are swept.
const MAINTENANCE_INTERVAL: Duration = Duration::from_secs(60);

/// Attempt records untouched for this long are dropped unless still locked.
const IDLE_ATTEMPT_TTL: Duration = Duration::from_secs(60 * 60);

/// How often the audit retention policy is applied.
const AUDIT_PRUNE_INTERVAL: Duration = Duration::from_secs(60 * 60);

#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("Failed to bind API server on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("API server task failed: {0}")]
    Task(String),
}

/// Handle to a running API server.
pub struct ApiServer {
    pub addr: SocketAddr,
    shutdown_tx: Option<oneshot::Sender<()>>,
    server_task: JoinHandle<()>,
    maintenance_task: JoinHandle<()>,
}

impl ApiServer {
    /// Ask the server to stop accepting connections and drain.
    pub fn shutdown(&mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
            tracing::info!("API server shutdown signal sent");
        }
        self.maintenance_task.abort();
    }

    /// Wait until the server task has exited.
    pub async fn stopped(self) -> Result<(), ServerError> {
        self.maintenance_task.abort();
        self.server_task
            .await
            .map_err(|e| ServerError::Task(e.to_string()))
    }
}

/// Start the API server on `addr`. Port 0 picks an ephemeral port.
pub async fn start_server_on(
    core: Arc<CoreState>,
    addr: SocketAddr,
) -> Result<ApiServer, ServerError> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;
    let addr = listener
        .local_addr()
        .map_err(|source| ServerError::Bind { addr, source })?;

    let ctx = ApiContext::new(core);
    let app = build_router(ctx.clone());

    let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();

    let server_task = tokio::spawn(async move {
        let shutdown_signal = async move {
            let _ = shutdown_rx.await;
            tracing::info!("API server received shutdown signal");
        };

        tracing::info!(%addr, "API server started");

        if let Err(e) = axum::serve(
            listener,
            app.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .with_graceful_shutdown(shutdown_signal)
        .await
        {
            tracing::error!("API server error: {e}");
        }

        tracing::info!("API server stopped");
    });

    let maintenance_task = tokio::spawn(maintenance_loop(ctx));

    Ok(ApiServer {
        addr,
        shutdown_tx: Some(shutdown_tx),
        server_task,
        maintenance_task,
    })
}

async fn maintenance_loop(ctx: ApiContext) {
    let mut sweep = tokio::time::interval(MAINTENANCE_INTERVAL);
    let mut audit_prune = tokio::time::interval(AUDIT_PRUNE_INTERVAL);

    loop {
        tokio::select! {
            _ = sweep.tick() => sweep_idle_state(&ctx),
            _ = audit_prune.tick() => {
                if let Err(e) = ctx.core.prune_audit_log().await {
                    tracing::warn!(error = %e, "Audit log pruning failed");
                }
            }
        }
    }
}

fn sweep_idle_state(ctx: &ApiContext) {
    let attempts = ctx.core.attempts.prune_idle(IDLE_ATTEMPT_TTL);
    let clients = match ctx.rate_limiter.lock() {
        Ok(mut limiter) => limiter.prune(),
        Err(_) => {
            tracing::warn!("Rate limiter lock poisoned; skipping sweep");
            0
        }
    };
    if attempts > 0 || clients > 0 {
        tracing::debug!(attempts, clients, "Swept idle state");
    }
}
