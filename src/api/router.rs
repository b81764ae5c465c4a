//! API router.
//!
//! Returns a composable `Router` that can be mounted on any axum server.
//!
//! Middleware stack (outermost → innermost):
//! Security headers → Error normalization → Identity → Audit → Rate limit → Handler

use std::sync::Arc;

use axum::http::{header, HeaderValue, Uri};
use axum::routing::{get, post};
use axum::Router;
use tower_http::set_header::SetResponseHeaderLayer;

use crate::api::endpoints;
use crate::api::error::ApiError;
use crate::api::middleware;
use crate::api::middleware::audit::AuditStage;
use crate::api::types::ApiContext;
use crate::core_state::CoreState;

/// Build the API router with the full middleware stack.
///
/// Middleware reads `ApiContext` from request extensions (injected as the
/// outermost layer). Handlers use `State<ApiContext>`.
pub fn api_router(core: Arc<CoreState>) -> Router {
    build_router(ApiContext::new(core))
}

/// Build router from a pre-constructed `ApiContext`.
pub fn build_router(ctx: ApiContext) -> Router {
    let routes = Router::new()
        .route("/health", get(endpoints::health::check))
        .route("/api/users/register", post(endpoints::users::register))
        .route("/api/users/login", post(endpoints::users::login))
        .route("/api/users/me", get(endpoints::users::me))
        .fallback(fallback);

    with_stack(routes, ctx)
}

/// Wrap `routes` in the middleware stack.
///
/// Layers are applied from innermost to outermost; `Extension` must be
/// last so every middleware can see `ApiContext`.
pub(crate) fn with_stack(routes: Router<ApiContext>, ctx: ApiContext) -> Router {
    let audit = AuditStage::new(ctx.core.settings.audit.clone(), ctx.core.audit_sink());

    routes
        .with_state(ctx.clone())
        .layer(axum::middleware::from_fn(middleware::rate::limit))
        .layer(axum::middleware::from_fn_with_state(
            audit,
            middleware::audit::record,
        ))
        .layer(axum::middleware::from_fn(middleware::identity::identify))
        .layer(axum::middleware::from_fn(middleware::errors::normalize))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static("max-age=2592000"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::REFERRER_POLICY,
            HeaderValue::from_static("no-referrer"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_XSS_PROTECTION,
            HeaderValue::from_static("1; mode=block"),
        ))
        .layer(SetResponseHeaderLayer::if_not_present(
            header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(axum::Extension(ctx))
}

async fn fallback(uri: Uri) -> ApiError {
    ApiError::NotFound(format!("No route for {}", uri.path()))
}
