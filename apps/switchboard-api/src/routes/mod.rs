pub mod auth;
pub mod health;
pub mod users;

use axum::Router;
use utoipa::OpenApi;

use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(crate::hub::server::router())
        .nest("/api/v1", auth::router().merge(users::router()))
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        auth::signup,
        auth::login,
        auth::logout,
        users::get_me,
    ),
    components(
        schemas(
            crate::error::ApiErrorBody,
            crate::error::ApiErrorDetail,
            crate::error::FieldError,
            crate::identity::Identity,
            health::HealthResponse,
            auth::SignupRequest,
            auth::LoginRequest,
        )
    ),
    tags(
        (name = "Health", description = "Health check"),
        (name = "Auth", description = "Signup, login, and logout"),
        (name = "Users", description = "Current user"),
    )
)]
pub struct ApiDoc;
