//! Session model

use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

/// Staff console session
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// Session ID (unsigned part of the token)
    pub id: String,
    /// Expiration timestamp
    pub expires_at: DateTime<Utc>,
    /// Creation timestamp
    pub created_at: DateTime<Utc>,
}

impl Session {
    /// Create a session starting now and lasting `lifetime`.
    ///
    /// A lifetime past the end of the representable range saturates.
    pub fn new(id: String, lifetime: Duration) -> Self {
        let now = Utc::now().trunc_subsecs(6);
        Self {
            id,
            expires_at: now
                .checked_add_signed(lifetime)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
            created_at: now,
        }
    }

    /// Check if the session has expired
    pub fn is_expired(&self) -> bool {
        self.is_expired_at(Utc::now())
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Remaining lifetime in whole seconds, zero once expired
    pub fn remaining_seconds(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds().max(0)
    }
}
