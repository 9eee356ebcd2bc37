use axum::routing::get;
use axum::{Json, Router};

use crate::error::ApiErrorBody;
use crate::identity::extract::AuthUser;
use crate::identity::Identity;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new().route("/users/@me", get(get_me))
}

/// `GET /api/v1/users/@me`: the identity behind the session cookie.
#[utoipa::path(
    get,
    path = "/api/v1/users/@me",
    tag = "Users",
    responses(
        (status = 200, description = "Current user", body = Identity),
        (status = 401, description = "No valid session", body = ApiErrorBody),
    ),
)]
pub async fn get_me(auth: AuthUser) -> Json<Identity> {
    Json(auth.identity)
}
