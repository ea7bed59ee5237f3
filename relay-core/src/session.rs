//! Caller session model and resolution
//!
//! A [`Session`] is created by the identity layer at login and is only read
//! by the gateway, except after a successful refresh where it is replaced
//! wholesale by [`Session::refreshed`].

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{AuthFailure, RelayError, Result};
use crate::refresh::RefreshResult;

/// The caller's authenticated state as held by the session store
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    /// Bearer credential presented to the backend
    #[serde(default)]
    pub access_token: String,

    /// Unix timestamp (seconds). `None` means the token never expires here.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub access_token_expires_at: Option<i64>,

    /// Absent for sessions that cannot be refreshed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub refresh_token: Option<String>,
}

impl Session {
    pub fn new(access_token: impl Into<String>) -> Self {
        Self {
            access_token: access_token.into(),
            access_token_expires_at: None,
            refresh_token: None,
        }
    }

    pub fn with_expiry(mut self, expires_at: i64) -> Self {
        self.access_token_expires_at = Some(expires_at);
        self
    }

    pub fn with_refresh_token(mut self, refresh_token: impl Into<String>) -> Self {
        self.refresh_token = Some(refresh_token.into());
        self
    }

    /// True when the access token must be refreshed before use.
    ///
    /// With a leeway of zero this is exactly `expires_at < now`.
    pub fn needs_refresh(&self, now: i64, leeway_secs: i64) -> bool {
        match self.access_token_expires_at {
            Some(expires_at) => expires_at < now.saturating_add(leeway_secs),
            None => false,
        }
    }

    /// Replacement session after a successful refresh.
    ///
    /// Keeps the current refresh token when the provider did not rotate it.
    pub fn refreshed(self, result: RefreshResult) -> Session {
        Session {
            access_token: result.access_token,
            access_token_expires_at: result.access_token_expires_at,
            refresh_token: result.refresh_token.or(self.refresh_token),
        }
    }

    /// Short, non-reversible identifier for log lines
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.access_token.as_bytes());
        hex::encode(&digest[..6])
    }
}

/// Turn whatever the store produced into a usable session.
///
/// Missing sessions and sessions without an access token are reported the
/// same way to the caller.
pub fn resolve_session(loaded: Option<Session>) -> Result<Session> {
    match loaded {
        None => Err(RelayError::unauthenticated(AuthFailure::NoSession)),
        Some(session) if session.access_token.is_empty() => {
            Err(RelayError::unauthenticated(AuthFailure::MissingAccessToken))
        }
        Some(session) => Ok(session),
    }
}

/// Current Unix time in seconds
pub fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}
