//! Identity resolution: who a session token belongs to, and whether a
//! connection may be admitted at all.

pub mod extract;
pub mod memory;
pub mod password;

use async_trait::async_trait;
use serde::Serialize;
use utoipa::ToSchema;

use crate::error::ApiError;

/// A verified user, as resolved from a session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, ToSchema)]
pub struct Identity {
    pub id: String,
    pub email: String,
    pub display_name: String,
}

/// The credential store seen through the only operations the server needs.
///
/// Backed by [`memory::MemoryIdentityStore`] by default; a database-backed
/// implementation can be dropped in without touching the hub.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Look up the identity behind a session token.
    async fn resolve(&self, token: &str) -> Result<Option<Identity>, ApiError>;

    /// Check an email/secret pair. Email comparison is case-insensitive.
    async fn verify_credential(&self, email: &str, secret: &str)
        -> Result<Option<Identity>, ApiError>;

    /// Start a new session. Existing sessions of the same identity stay valid.
    async fn create_session(&self, identity: &Identity) -> Result<String, ApiError>;

    /// Invalidate a session. Unknown tokens are ignored.
    async fn destroy_session(&self, token: &str) -> Result<(), ApiError>;

    /// Create a new identity. Fails with `409` when the email is taken.
    async fn register_identity(
        &self,
        email: &str,
        display_name: &str,
        secret: &str,
    ) -> Result<Identity, ApiError>;
}

/// Why a connection was refused before it reached the hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdmissionDenied {
    /// No session token was presented.
    MissingToken,
    /// The token is unknown, expired, or could not be checked.
    Unauthenticated,
}

impl std::fmt::Display for AdmissionDenied {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::MissingToken => f.write_str("missing session"),
            Self::Unauthenticated => f.write_str("session not authenticated"),
        }
    }
}

impl From<AdmissionDenied> for ApiError {
    fn from(denied: AdmissionDenied) -> Self {
        match denied {
            AdmissionDenied::MissingToken => ApiError::unauthorized("Missing session"),
            AdmissionDenied::Unauthenticated => ApiError::unauthorized("Invalid or expired session"),
        }
    }
}

/// Resolve a session token into an identity, or deny admission.
///
/// Store failures are reported as [`AdmissionDenied::Unauthenticated`]; a
/// partially resolved identity is never returned.
pub async fn admit(
    resolver: &dyn IdentityResolver,
    token: Option<&str>,
) -> Result<Identity, AdmissionDenied> {
    let token = token
        .filter(|t| !t.is_empty())
        .ok_or(AdmissionDenied::MissingToken)?;

    match resolver.resolve(token).await {
        Ok(Some(identity)) => Ok(identity),
        Ok(None) => Err(AdmissionDenied::Unauthenticated),
        Err(err) => {
            tracing::warn!(%err, "session lookup failed");
            Err(AdmissionDenied::Unauthenticated)
        }
    }
}
