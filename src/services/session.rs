//! Session gate
//!
//! Authenticated / unauthenticated state for the staff console.
//!
//! A successful login stores a session row and hands out a token of the form
//! `<id>.<signature>`, where the signature is HMAC-SHA256 over the id. The
//! signature is checked before the database is consulted, so forged tokens
//! never cost a query.

use crate::db::repositories::SessionRepository;
use crate::models::Session;
use crate::services::password::verify_password;
use anyhow::Context;
use chrono::Duration;
use data_encoding::HEXLOWER;
use hmac::{Hmac, Mac};
use sha2::Sha256;
use std::sync::Arc;
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

/// Default session lifetime in hours
pub const DEFAULT_SESSION_HOURS: i64 = 8;

/// Error types for session operations
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Username or password did not match
    #[error("Invalid username or password")]
    InvalidCredentials,

    /// Internal error
    #[error("Backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

/// The single staff login
#[derive(Clone)]
pub struct StaffCredential {
    pub username: String,
    /// Argon2 PHC string
    pub password_hash: String,
}

impl std::fmt::Debug for StaffCredential {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StaffCredential")
            .field("username", &self.username)
            .field("password_hash", &"<redacted>")
            .finish()
    }
}

/// A freshly created session and the token that proves it
#[derive(Debug, Clone)]
pub struct IssuedSession {
    pub token: String,
    pub session: Session,
}

/// Session gate for the staff console
pub struct SessionGate {
    repo: Arc<dyn SessionRepository>,
    credential: StaffCredential,
    signing_key: Vec<u8>,
    lifetime: Duration,
}

impl SessionGate {
    /// Create a session gate with the default lifetime
    pub fn new(
        repo: Arc<dyn SessionRepository>,
        credential: StaffCredential,
        signing_key: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            repo,
            credential,
            signing_key: signing_key.into(),
            lifetime: Duration::hours(DEFAULT_SESSION_HOURS),
        }
    }

    /// Override the session lifetime
    pub fn with_lifetime(mut self, lifetime: Duration) -> Self {
        self.lifetime = lifetime;
        self
    }

    /// Session lifetime, also used as the cookie `Max-Age`
    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Log in with the staff credential
    ///
    /// # Errors
    ///
    /// - `InvalidCredentials` if the username or password does not match
    /// - `Backend` if the stored hash is malformed or the session cannot be saved
    pub async fn login(&self, username: &str, password: &str) -> Result<IssuedSession, SessionError> {
        // The hash is verified even for an unknown username so both failures
        // take the same time.
        let password_ok = verify_password(password, &self.credential.password_hash)
            .context("Failed to verify password")?;

        if username != self.credential.username || !password_ok {
            tracing::warn!("Staff login failed for user '{}'", username);
            return Err(SessionError::InvalidCredentials);
        }

        let session = Session::new(Uuid::new_v4().simple().to_string(), self.lifetime);
        let session = self
            .repo
            .create(&session)
            .await
            .context("Failed to create session")?;

        tracing::info!("Staff login succeeded, session expires at {}", session.expires_at);

        Ok(IssuedSession {
            token: self.sign(&session.id)?,
            session,
        })
    }

    /// Invalidate a session. Unknown or forged tokens are ignored.
    pub async fn logout(&self, token: &str) -> Result<(), SessionError> {
        if let Some(id) = self.verify(token) {
            self.repo
                .delete(id)
                .await
                .context("Failed to delete session")?;
            tracing::info!("Staff session ended");
        }
        Ok(())
    }

    /// Resolve a token to its live session
    ///
    /// Returns `None` for forged, unknown or expired tokens. An expired row
    /// found here is deleted.
    pub async fn current(&self, token: &str) -> Result<Option<Session>, SessionError> {
        let Some(id) = self.verify(token) else {
            return Ok(None);
        };

        let session = match self
            .repo
            .get_by_id(id)
            .await
            .context("Failed to get session")?
        {
            Some(session) => session,
            None => return Ok(None),
        };

        if session.is_expired() {
            if let Err(e) = self.repo.delete(id).await {
                tracing::warn!("Failed to delete expired session: {}", e);
            }
            return Ok(None);
        }

        Ok(Some(session))
    }

    /// Check whether a token belongs to a live session
    pub async fn is_authenticated(&self, token: &str) -> Result<bool, SessionError> {
        Ok(self.current(token).await?.is_some())
    }

    /// Delete all expired sessions
    pub async fn purge_expired(&self) -> Result<u64, SessionError> {
        let removed = self
            .repo
            .delete_expired()
            .await
            .context("Failed to delete expired sessions")?;
        if removed > 0 {
            tracing::debug!("Purged {} expired sessions", removed);
        }
        Ok(removed)
    }

    fn mac(&self) -> anyhow::Result<HmacSha256> {
        HmacSha256::new_from_slice(&self.signing_key)
            .map_err(|e| anyhow::anyhow!("Invalid session signing key: {}", e))
    }

    fn sign(&self, id: &str) -> anyhow::Result<String> {
        let mut mac = self.mac()?;
        mac.update(id.as_bytes());
        let signature = HEXLOWER.encode(&mac.finalize().into_bytes());
        Ok(format!("{}.{}", id, signature))
    }

    /// Return the session id if the token's signature is genuine
    fn verify<'t>(&self, token: &'t str) -> Option<&'t str> {
        let (id, signature) = token.trim().rsplit_once('.')?;
        if id.is_empty() {
            return None;
        }
        let signature = HEXLOWER.decode(signature.as_bytes()).ok()?;

        let mut mac = self.mac().ok()?;
        mac.update(id.as_bytes());
        mac.verify_slice(&signature).ok()?;
        Some(id)
    }
}
