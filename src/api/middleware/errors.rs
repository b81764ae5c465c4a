//! Error normalization boundary.
//!
//! Outermost stage of the stack. Whatever happens downstream, the client
//! gets a response: handler errors, framework rejections and panics are
//! all rendered as the same JSON envelope. `stackTrace` is only included
//! when the service runs in the development posture.

use std::any::Any;
use std::panic::AssertUnwindSafe;

use axum::body::{to_bytes, Body};
use axum::http::{header, HeaderValue, Request};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::FutureExt;

use crate::api::error::{ApiError, ErrorEnvelope, ErrorReport};
use crate::api::types::ApiContext;

/// Largest rejection body read back for the log.
const MAX_REJECTION_BODY: usize = 16 * 1024;

pub async fn normalize(req: Request<Body>, next: Next) -> Response {
    let development = req
        .extensions()
        .get::<ApiContext>()
        .map(|ctx| ctx.core.settings.environment.is_development())
        .unwrap_or(false);
    let action = format!("{} {}", req.method(), req.uri().path());

    let response = match AssertUnwindSafe(next.run(req)).catch_unwind().await {
        Ok(response) => response,
        Err(payload) => ApiError::Panicked(panic_message(payload.as_ref())).into_response(),
    };

    render(response, development, &action).await
}

async fn render(response: Response, development: bool, action: &str) -> Response {
    let existing = response.extensions().get::<ErrorReport>().cloned();
    let report = match existing {
        Some(report) => report,
        None if response.status().is_client_error() || response.status().is_server_error() => {
            let (parts, body) = response.into_parts();
            let detail = match to_bytes(body, MAX_REJECTION_BODY).await {
                Ok(bytes) if !bytes.is_empty() => String::from_utf8_lossy(&bytes).into_owned(),
                _ => parts.status.to_string(),
            };
            let report = ErrorReport::from_status(parts.status, detail);
            return envelope(Response::from_parts(parts, Body::empty()), report, development, action);
        }
        None => return response,
    };

    envelope(response, report, development, action)
}

fn envelope(response: Response, report: ErrorReport, development: bool, action: &str) -> Response {
    if report.status.is_server_error() {
        tracing::error!(
            action,
            status = report.status.as_u16(),
            detail = %report.detail,
            "Request failed"
        );
    } else {
        tracing::warn!(
            action,
            status = report.status.as_u16(),
            detail = %report.detail,
            "Request rejected"
        );
    }

    let body = ErrorEnvelope {
        error: report.message.clone(),
        status_code: report.status.as_u16(),
        stack_trace: development.then(|| report.detail.clone()),
    };

    let (mut parts, _) = response.into_parts();
    parts.status = report.status;
    parts.headers.remove(header::CONTENT_LENGTH);
    parts
        .headers
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
    parts.extensions.insert(report);

    let (_, json_body) = Json(body).into_response().into_parts();
    Response::from_parts(parts, json_body)
}

/// Best-effort text of a panic payload.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::StatusCode;
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    async fn ok() -> &'static str {
        "fine"
    }

    async fn not_found() -> Result<&'static str, ApiError> {
        Err(ApiError::NotFound("Task 7 not found".into()))
    }

    async fn boom() -> &'static str {
        panic!("handler exploded")
    }

    async fn plain_teapot() -> (StatusCode, &'static str) {
        (StatusCode::IM_A_TEAPOT, "short and stout")
    }

    fn app() -> Router {
        Router::new()
            .route("/ok", get(ok))
            .route("/missing", get(not_found))
            .route("/boom", get(boom))
            .route("/teapot", get(plain_teapot))
            .layer(axum::middleware::from_fn(normalize))
    }

    async fn json_of(response: Response) -> serde_json::Value {
        let body = to_bytes(response.into_body(), 4096).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    fn get_req(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn success_passes_through() {
        let response = app().oneshot(get_req("/ok")).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"fine");
    }

    #[tokio::test]
    async fn api_error_becomes_envelope() {
        let response = app().oneshot(get_req("/missing")).await.unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert_eq!(
            response.headers().get(header::CONTENT_TYPE).unwrap(),
            "application/json"
        );
        let json = json_of(response).await;
        assert_eq!(json["error"], "Task 7 not found");
        assert_eq!(json["statusCode"], 404);
        // Production posture when no context is installed.
        assert!(json.get("stackTrace").is_none());
    }

    #[tokio::test]
    async fn panic_becomes_generic_500() {
        let response = app().oneshot(get_req("/boom")).await.unwrap();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let json = json_of(response).await;
        assert_eq!(json["statusCode"], 500);
        assert_eq!(json["error"], crate::api::error::INTERNAL_ERROR_MESSAGE);
        assert!(json.get("stackTrace").is_none());
    }

    #[tokio::test]
    async fn bare_error_status_is_wrapped() {
        let response = app().oneshot(get_req("/teapot")).await.unwrap();
        assert_eq!(response.status(), StatusCode::IM_A_TEAPOT);
        let json = json_of(response).await;
        assert_eq!(json["statusCode"], 418);
        assert_eq!(json["error"], "I'm a teapot");
    }

    #[test]
    fn panic_message_reads_both_payload_kinds() {
        let payload: Box<dyn Any + Send> = Box::new("static");
        assert_eq!(panic_message(payload.as_ref()), "static");
        let payload: Box<dyn Any + Send> = Box::new(String::from("owned"));
        assert_eq!(panic_message(payload.as_ref()), "owned");
        let payload: Box<dyn Any + Send> = Box::new(42u8);
        assert_eq!(panic_message(payload.as_ref()), "non-string panic payload");
    }
}
