//! Account endpoints.
//!
//! `POST /api/users/register`: open, creates an account
//! `POST /api/users/login`: open, throttled per username, returns a bearer token
//! `GET  /api/users/me`: bearer required, echoes the caller's claims

use axum::extract::State;
use axum::Json;
use serde::{Deserialize, Serialize};

use crate::api::error::ApiError;
use crate::api::types::{ApiContext, Principal};

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    #[serde(alias = "passwordHash")]
    pub password: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterResponse {
    pub message: &'static str,
    pub user_id: i64,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
}

#[derive(Debug, Serialize)]
pub struct MeResponse {
    pub id: String,
    pub username: String,
    pub role: String,
}

pub async fn register(
    State(ctx): State<ApiContext>,
    Json(request): Json<RegisterRequest>,
) -> Result<Json<RegisterResponse>, ApiError> {
    let user = ctx
        .core
        .users
        .register(&request.username, &request.email, &request.password)
        .await?;

    Ok(Json(RegisterResponse {
        message: "User registered successfully",
        user_id: user.id,
    }))
}

/// Credential check guarded by the login attempt tracker.
///
/// A locked-out username is refused with 403 after the configured delay,
/// without touching the credential store. A wrong password counts as a
/// failure; a successful login clears the record.
pub async fn login(
    State(ctx): State<ApiContext>,
    Json(request): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, ApiError> {
    let attempts = &ctx.core.attempts;
    let identity = request.username.as_str();

    if attempts.is_blocked(identity) {
        tokio::time::sleep(attempts.policy().lockout_delay).await;
        tracing::warn!(username = identity, "Login refused: identity locked out");
        return Err(ApiError::LockedOut);
    }

    let Some(user) = ctx
        .core
        .users
        .authenticate(identity, &request.password)
        .await?
    else {
        let failures = attempts.record_failure(identity);
        tracing::info!(username = identity, failures, "Login failed");
        return Err(ApiError::InvalidCredentials);
    };

    attempts.reset(identity);
    let token = ctx
        .core
        .tokens
        .issue(&user.id.to_string(), &user.username, Some(&user.role))?;

    tracing::info!(user_id = user.id, username = %user.username, "Login succeeded");
    Ok(Json(LoginResponse { token }))
}

pub async fn me(principal: Principal) -> Json<MeResponse> {
    Json(MeResponse {
        id: principal.subject,
        username: principal.username,
        role: principal.role,
    })
}
