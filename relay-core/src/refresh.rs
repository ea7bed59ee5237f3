//! Access token refresh against the identity provider
//!
//! One `grant_type=refresh_token` exchange per call, no retry. Callers that
//! need a usable session go through [`TokenRefresher::refresh_session`],
//! which folds every failure into `Unauthenticated` so a stale token is
//! never forwarded.

use serde::Deserialize;
use url::Url;

use crate::error::{AuthFailure, RelayError, Result, Upstream, UpstreamFailureKind};
use crate::session::Session;

/// Outcome of one token exchange
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RefreshResult {
    pub access_token: String,
    pub access_token_expires_at: Option<i64>,
    /// Present only when the provider rotated the refresh token
    pub refresh_token: Option<String>,
}

/// Token endpoint response
#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    expires_in: Option<i64>,
    #[serde(default)]
    expires_at: Option<i64>,
    #[serde(default)]
    refresh_token: Option<String>,
}

impl TokenResponse {
    fn into_result(self, now: i64) -> RefreshResult {
        let access_token_expires_at = self
            .expires_at
            .or_else(|| self.expires_in.map(|secs| now.saturating_add(secs)));

        RefreshResult {
            access_token: self.access_token,
            access_token_expires_at,
            refresh_token: self.refresh_token.filter(|t| !t.is_empty()),
        }
    }
}

/// Default token endpoint for an issuer: `<issuer>/oauth/token`
pub fn token_endpoint(issuer_base_url: &Url) -> std::result::Result<Url, url::ParseError> {
    let mut base = issuer_base_url.clone();
    if !base.path().ends_with('/') {
        let path = format!("{}/", base.path());
        base.set_path(&path);
    }
    base.join("oauth/token")
}

/// Exchanges refresh tokens for new access tokens
#[derive(Debug, Clone)]
pub struct TokenRefresher {
    http: reqwest::Client,
    token_url: Url,
    client_id: String,
    client_secret: String,
}

impl TokenRefresher {
    /// The client is shared with the rest of the gateway; its timeout
    /// bounds the exchange.
    pub fn new(
        http: reqwest::Client,
        token_url: Url,
        client_id: impl Into<String>,
        client_secret: impl Into<String>,
    ) -> Self {
        Self {
            http,
            token_url,
            client_id: client_id.into(),
            client_secret: client_secret.into(),
        }
    }

    pub fn token_url(&self) -> &Url {
        &self.token_url
    }

    /// Perform one token exchange.
    ///
    /// # Errors
    ///
    /// `UpstreamFailure` on transport errors, timeouts, non-2xx responses
    /// and undecodable or empty token responses.
    pub async fn refresh(&self, refresh_token: &str, now: i64) -> Result<RefreshResult> {
        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", refresh_token),
        ];

        let response = self
            .http
            .post(self.token_url.clone())
            .form(&params)
            .send()
            .await
            .map_err(|e| RelayError::from_reqwest(Upstream::IdentityProvider, &e))?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(RelayError::UpstreamFailure {
                upstream: Upstream::IdentityProvider,
                kind: UpstreamFailureKind::Status(status.as_u16()),
                detail,
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| RelayError::from_reqwest(Upstream::IdentityProvider, &e))?;

        if token.access_token.is_empty() {
            return Err(RelayError::UpstreamFailure {
                upstream: Upstream::IdentityProvider,
                kind: UpstreamFailureKind::Decode,
                detail: "token response carried an empty access_token".to_string(),
            });
        }

        Ok(token.into_result(now))
    }

    /// Refresh `session` and return its replacement.
    ///
    /// Every failure, including a session with no refresh token, is reported
    /// as `Unauthenticated`. The underlying cause is logged.
    pub async fn refresh_session(&self, session: Session, now: i64) -> Result<Session> {
        let Some(refresh_token) = session.refresh_token.clone() else {
            tracing::info!(
                session = %session.fingerprint(),
                "Access token expired and session has no refresh token"
            );
            return Err(RelayError::unauthenticated(AuthFailure::RefreshFailed));
        };

        match self.refresh(&refresh_token, now).await {
            Ok(result) => {
                let next = session.refreshed(result);
                tracing::debug!(
                    session = %next.fingerprint(),
                    expires_at = ?next.access_token_expires_at,
                    "Access token refreshed"
                );
                Ok(next)
            }
            Err(e) => {
                tracing::warn!(
                    session = %session.fingerprint(),
                    code = e.error_code(),
                    error = %e,
                    "Token refresh failed"
                );
                Err(RelayError::unauthenticated(AuthFailure::RefreshFailed))
            }
        }
    }
}
