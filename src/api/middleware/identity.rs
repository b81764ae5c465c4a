//! Bearer token identification.
//!
//! Lenient: a valid `Authorization: Bearer <token>` attaches a
//! [`Principal`] to the request; anything else passes through anonymous.
//! Endpoints that need a caller extract `Principal` and reject with 401.

use axum::body::Body;
use axum::http::{header, HeaderMap, Request};
use axum::middleware::Next;
use axum::response::Response;

use crate::api::types::{ApiContext, Principal};

pub async fn identify(mut req: Request<Body>, next: Next) -> Response {
    let principal = match (req.extensions().get::<ApiContext>(), bearer_token(req.headers())) {
        (Some(ctx), Some(token)) => match ctx.core.tokens.verify(token) {
            Ok(claims) => Some(Principal::from(claims)),
            Err(e) => {
                tracing::debug!(error = %e, "Ignoring unusable bearer token");
                None
            }
        },
        _ => None,
    };

    if let Some(principal) = principal {
        req.extensions_mut().insert(principal);
    }
    next.run(req).await
}

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}
