//! Shared types for the API layer.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::async_trait;
use axum::extract::FromRequestParts;
use axum::http::request::Parts;

use crate::api::error::ApiError;
use crate::core_state::CoreState;
use crate::token::TokenClaims;

const RATE_WINDOW: Duration = Duration::from_secs(60);

// ═══════════════════════════════════════════════════════════
// API context: shared state for the router
// ═══════════════════════════════════════════════════════════

/// Shared context for all API routes and middleware.
/// Wraps `CoreState` plus API-specific bookkeeping.
#[derive(Clone)]
pub struct ApiContext {
    pub core: Arc<CoreState>,
    pub rate_limiter: Arc<Mutex<RateLimiter>>,
}

impl ApiContext {
    pub fn new(core: Arc<CoreState>) -> Self {
        let per_minute = core.settings.rate_limit_per_minute;
        Self {
            core,
            rate_limiter: Arc::new(Mutex::new(RateLimiter::new(per_minute))),
        }
    }
}

// ═══════════════════════════════════════════════════════════
// Principal: injected by the identity middleware
// ═══════════════════════════════════════════════════════════

/// Caller identity established from a valid bearer token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    pub subject: String,
    pub username: String,
    pub role: String,
}

impl From<TokenClaims> for Principal {
    fn from(claims: TokenClaims) -> Self {
        Self {
            subject: claims.subject,
            username: claims.username,
            role: claims.role,
        }
    }
}

/// Handlers that take a `Principal` require authentication.
#[async_trait]
impl<S> FromRequestParts<S> for Principal
where
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<Principal>()
            .cloned()
            .ok_or(ApiError::Unauthorized)
    }
}

// ═══════════════════════════════════════════════════════════
// Rate limiter: sliding window per client
// ═══════════════════════════════════════════════════════════

/// Sliding one-minute window of request timestamps per client key.
pub struct RateLimiter {
    windows: HashMap<String, Vec<Instant>>,
    per_minute: u32,
}

impl RateLimiter {
    pub fn new(per_minute: u32) -> Self {
        Self {
            windows: HashMap::new(),
            per_minute,
        }
    }

    /// Admit one request for `key`, or `Err(retry_after_secs)`.
    /// A limit of zero disables limiting.
    pub fn check(&mut self, key: &str) -> Result<(), u64> {
        self.check_at(key, Instant::now())
    }

    pub fn check_at(&mut self, key: &str, now: Instant) -> Result<(), u64> {
        if self.per_minute == 0 {
            return Ok(());
        }
        let entries = self.windows.entry(key.to_string()).or_default();
        entries.retain(|ts| now.duration_since(*ts) < RATE_WINDOW);

        if entries.len() as u32 >= self.per_minute {
            let oldest = entries.first().copied().unwrap_or(now);
            let wait = RATE_WINDOW.saturating_sub(now.duration_since(oldest));
            return Err(wait.as_secs().max(1));
        }

        entries.push(now);
        Ok(())
    }

    /// Drop clients with no requests inside the window.
    pub fn prune(&mut self) -> usize {
        self.prune_at(Instant::now())
    }

    pub fn prune_at(&mut self, now: Instant) -> usize {
        let before = self.windows.len();
        self.windows
            .retain(|_, entries| entries.iter().any(|ts| now.duration_since(*ts) < RATE_WINDOW));
        before - self.windows.len()
    }

    pub fn tracked_clients(&self) -> usize {
        self.windows.len()
    }
}
