//! Session cookie handling and the authenticated-user extractor.

use axum::extract::FromRequestParts;
use axum::http::header::COOKIE;
use axum::http::request::Parts;
use axum::http::HeaderMap;

use super::{admit, Identity};
use crate::error::ApiError;
use crate::AppState;

/// Pull the named cookie out of every `Cookie` header on the request.
pub fn session_token(headers: &HeaderMap, cookie_name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == cookie_name)
        .map(|(_, value)| value.trim_matches('"').to_string())
        .filter(|value| !value.is_empty())
}

/// `Set-Cookie` value that stores a session token.
pub fn session_cookie(cookie_name: &str, token: &str) -> String {
    format!("{cookie_name}={token}; Path=/; HttpOnly; SameSite=Lax")
}

/// `Set-Cookie` value that clears the session cookie.
pub fn clear_session_cookie(cookie_name: &str) -> String {
    format!("{cookie_name}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0")
}

/// Authenticated user resolved from the session cookie.
#[derive(Debug, Clone)]
pub struct AuthUser {
    pub identity: Identity,
    pub token: String,
}

impl FromRequestParts<AppState> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let token = session_token(&parts.headers, &state.config.session_cookie);
        let identity = admit(state.identity.as_ref(), token.as_deref()).await?;
        Ok(AuthUser {
            identity,
            // admit() only succeeds with a token present.
            token: token.unwrap_or_default(),
        })
    }
}
