use async_trait::async_trait;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use switchboard_common::id::{prefix, prefixed_ulid};
use switchboard_common::token::generate_session_token;

use super::password::{hash_password, verify_password};
use super::{Identity, IdentityResolver};
use crate::error::ApiError;

/// A stored user: the public identity plus its credential hash.
#[derive(Debug, Clone)]
struct UserRecord {
    identity: Identity,
    password_hash: String,
}

/// In-process credential store.
///
/// Users are keyed by lowercased email; sessions map a token to that key.
/// Both maps are sharded, so concurrent admissions don't contend on a single
/// lock.
pub struct MemoryIdentityStore {
    users: DashMap<String, UserRecord>,
    sessions: DashMap<String, String>,
}

impl MemoryIdentityStore {
    pub fn new() -> Self {
        Self {
            users: DashMap::new(),
            sessions: DashMap::new(),
        }
    }

    /// Number of live sessions held by an email.
    #[cfg(test)]
    pub fn session_count(&self, email: &str) -> usize {
        let key = email_key(email);
        self.sessions.iter().filter(|s| *s.value() == key).count()
    }
}

impl Default for MemoryIdentityStore {
    fn default() -> Self {
        Self::new()
    }
}

fn email_key(email: &str) -> String {
    email.trim().to_lowercase()
}

#[async_trait]
impl IdentityResolver for MemoryIdentityStore {
    async fn resolve(&self, token: &str) -> Result<Option<Identity>, ApiError> {
        let Some(key) = self.sessions.get(token).map(|k| k.value().clone()) else {
            return Ok(None);
        };
        Ok(self.users.get(&key).map(|u| u.identity.clone()))
    }

    async fn verify_credential(
        &self,
        email: &str,
        secret: &str,
    ) -> Result<Option<Identity>, ApiError> {
        // Clone out of the shard before hashing.
        let Some(record) = self.users.get(&email_key(email)).map(|u| u.value().clone()) else {
            return Ok(None);
        };
        if verify_password(secret, &record.password_hash) {
            Ok(Some(record.identity))
        } else {
            Ok(None)
        }
    }

    async fn create_session(&self, identity: &Identity) -> Result<String, ApiError> {
        let key = email_key(&identity.email);
        if !self.users.contains_key(&key) {
            return Err(ApiError::unauthorized("Unknown user"));
        }
        let token = generate_session_token();
        self.sessions.insert(token.clone(), key);
        Ok(token)
    }

    async fn destroy_session(&self, token: &str) -> Result<(), ApiError> {
        self.sessions.remove(token);
        Ok(())
    }

    async fn register_identity(
        &self,
        email: &str,
        display_name: &str,
        secret: &str,
    ) -> Result<Identity, ApiError> {
        let password_hash = hash_password(secret)?;
        let email = email.trim();

        match self.users.entry(email_key(email)) {
            Entry::Occupied(_) => Err(ApiError::conflict("Email is already registered")),
            Entry::Vacant(slot) => {
                let identity = Identity {
                    id: prefixed_ulid(prefix::USER),
                    email: email.to_string(),
                    display_name: display_name.to_string(),
                };
                slot.insert(UserRecord {
                    identity: identity.clone(),
                    password_hash,
                });
                tracing::info!(user_id = %identity.id, email = %identity.email, "identity registered");
                Ok(identity)
            }
        }
    }
}
