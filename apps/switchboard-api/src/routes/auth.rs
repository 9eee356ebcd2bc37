//! Auth routes: signup, login, and logout over a session cookie.

use axum::extract::State;
use axum::http::header::SET_COOKIE;
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use utoipa::ToSchema;

use crate::error::{ApiError, ApiErrorBody, FieldError};
use crate::identity::extract::{clear_session_cookie, session_cookie, session_token};
use crate::identity::Identity;
use crate::AppState;

/// Minimum password length accepted at signup.
const MIN_PASSWORD_LEN: usize = 8;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/auth/signup", post(signup))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
}

// ---------------------------------------------------------------------------
// POST /api/v1/auth/signup
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct SignupRequest {
    pub email: String,
    pub username: String,
    pub password: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/signup",
    tag = "Auth",
    request_body = SignupRequest,
    responses(
        (status = 201, description = "Account created and session started", body = Identity),
        (status = 400, description = "Validation failed", body = ApiErrorBody),
        (status = 409, description = "Email already registered", body = ApiErrorBody),
    ),
)]
pub async fn signup(
    State(state): State<AppState>,
    Json(body): Json<SignupRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let mut errors: Vec<FieldError> = Vec::new();

    let email = body.email.trim().to_string();
    if email.len() < 3 || !email.contains('@') {
        errors.push(FieldError {
            field: "email".into(),
            message: "Invalid email address".into(),
        });
    }

    let username = body.username.trim().to_string();
    if username.is_empty() || username.chars().count() > 64 {
        errors.push(FieldError {
            field: "username".into(),
            message: "Username must be 1-64 characters".into(),
        });
    }

    if body.password.len() < MIN_PASSWORD_LEN {
        errors.push(FieldError {
            field: "password".into(),
            message: format!("Password must be at least {MIN_PASSWORD_LEN} characters"),
        });
    }

    if !errors.is_empty() {
        return Err(ApiError::validation(errors));
    }

    let identity = state
        .identity
        .register_identity(&email, &username, &body.password)
        .await?;
    let token = state.identity.create_session(&identity).await?;

    Ok((
        StatusCode::CREATED,
        [(SET_COOKIE, session_cookie(&state.config.session_cookie, &token))],
        Json(identity),
    ))
}

// ---------------------------------------------------------------------------
// POST /api/v1/auth/login
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginRequest {
    pub email: String,
    pub password: String,
}

#[utoipa::path(
    post,
    path = "/api/v1/auth/login",
    tag = "Auth",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Session started", body = Identity),
        (status = 401, description = "Wrong email or password", body = ApiErrorBody),
    ),
)]
pub async fn login(
    State(state): State<AppState>,
    Json(body): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = state
        .identity
        .verify_credential(&body.email, &body.password)
        .await?
        .ok_or_else(|| {
            tracing::debug!("login rejected");
            ApiError::unauthorized("Invalid email or password")
        })?;

    // Earlier sessions stay valid; each device keeps its own.
    let token = state.identity.create_session(&identity).await?;
    tracing::info!(user_id = %identity.id, "session created");

    Ok((
        [(SET_COOKIE, session_cookie(&state.config.session_cookie, &token))],
        Json(identity),
    ))
}

// ---------------------------------------------------------------------------
// POST /api/v1/auth/logout
// ---------------------------------------------------------------------------

#[utoipa::path(
    post,
    path = "/api/v1/auth/logout",
    tag = "Auth",
    responses((status = 204, description = "Session ended")),
)]
pub async fn logout(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    if let Some(token) = session_token(&headers, &state.config.session_cookie) {
        state.identity.destroy_session(&token).await?;
    }

    Ok((
        StatusCode::NO_CONTENT,
        [(SET_COOKIE, clear_session_cookie(&state.config.session_cookie))],
    ))
}
