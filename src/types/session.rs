//! Authenticated session for one broker.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::DEFAULT_SESSION_TTL_SECS;

/// Tokens and expiry produced by a successful code exchange.
///
/// Serialized with the camelCase field names of the `broker_auth` record;
/// `expires_at` is epoch milliseconds.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub access_token: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
    /// Absolute expiry, epoch milliseconds.
    pub expires_at: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub client_id: Option<String>,
}

impl Session {
    /// New session expiring `ttl_secs` after `now`.
    ///
    /// A missing or non-positive TTL falls back to
    /// [`DEFAULT_SESSION_TTL_SECS`].
    pub fn new(access_token: impl Into<String>, now: DateTime<Utc>, ttl_secs: Option<i64>) -> Self {
        let ttl = ttl_secs
            .filter(|t| *t > 0)
            .unwrap_or(DEFAULT_SESSION_TTL_SECS);
        Self {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: (now + Duration::seconds(ttl)).timestamp_millis(),
            user_id: None,
            client_id: None,
        }
    }

    pub fn with_refresh_token(mut self, token: Option<String>) -> Self {
        self.refresh_token = token.filter(|t| !t.is_empty());
        self
    }

    pub fn with_user_id(mut self, user_id: Option<String>) -> Self {
        self.user_id = user_id.filter(|u| !u.is_empty());
        self
    }

    pub fn with_client_id(mut self, client_id: Option<String>) -> Self {
        self.client_id = client_id.filter(|c| !c.is_empty());
        self
    }

    /// `now < expires_at`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now.timestamp_millis() < self.expires_at
    }

    /// Expiry as a timestamp, if representable.
    pub fn expires_at_utc(&self) -> Option<DateTime<Utc>> {
        DateTime::from_timestamp_millis(self.expires_at)
    }
}

impl fmt::Debug for Session {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Session")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .field("user_id", &self.user_id)
            .field("client_id", &self.client_id)
            .finish()
    }
}
