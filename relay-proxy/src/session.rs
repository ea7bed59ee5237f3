//! Session stores
//!
//! The gateway never creates sessions; it reads the one the identity layer
//! issued and replaces it after a refresh. Both operations go through
//! [`SessionStore`] so the storage backend stays outside the pipeline.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use axum::http::header::SET_COOKIE;
use axum::http::HeaderMap;
use axum::response::IntoResponse;
use axum_extra::extract::cookie::{Cookie, CookieJar, Key, SameSite, SignedCookieJar};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use relay_core::{RelayError, Result, Session, Upstream, UpstreamFailureKind};
use sha2::{Digest, Sha512};

/// Storage backend for caller sessions
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Backend name
    fn name(&self) -> &str;

    /// Read the caller's current session. `Ok(None)` when there is none.
    async fn load(&self, headers: &HeaderMap) -> Result<Option<Session>>;

    /// Replace the caller's session.
    ///
    /// Returns headers that must be attached to the outgoing response for
    /// the write to take effect on the client (e.g. `Set-Cookie`).
    async fn save(&self, headers: &HeaderMap, session: &Session) -> Result<HeaderMap>;
}

fn store_error(kind: UpstreamFailureKind, detail: impl Into<String>) -> RelayError {
    RelayError::UpstreamFailure {
        upstream: Upstream::SessionStore,
        kind,
        detail: detail.into(),
    }
}

/// Session held entirely in a signed cookie
///
/// The cookie value is base64url-encoded JSON, signed with an HMAC key
/// derived from the configured secret. Tampered or undecodable cookies read
/// as no session.
pub struct CookieSessionStore {
    key: Key,
    cookie_name: String,
    secure: bool,
}

impl CookieSessionStore {
    pub fn new(secret: &[u8], cookie_name: impl Into<String>, secure: bool) -> Self {
        let digest = Sha512::digest(secret);
        Self {
            key: Key::from(digest.as_slice()),
            cookie_name: cookie_name.into(),
            secure,
        }
    }

    pub fn cookie_name(&self) -> &str {
        &self.cookie_name
    }

    /// Cookie payload for `session`
    pub fn encode(session: &Session) -> Result<String> {
        let json = serde_json::to_vec(session)
            .map_err(|e| store_error(UpstreamFailureKind::Decode, e.to_string()))?;
        Ok(URL_SAFE_NO_PAD.encode(json))
    }

    /// Session from a cookie payload, if it decodes
    pub fn decode(value: &str) -> Option<Session> {
        let json = URL_SAFE_NO_PAD.decode(value).ok()?;
        serde_json::from_slice(&json).ok()
    }

    /// Signed `Set-Cookie` headers carrying `session`
    pub fn set_cookie_headers(&self, session: &Session) -> Result<HeaderMap> {
        let cookie = Cookie::build((self.cookie_name.clone(), Self::encode(session)?))
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax)
            .path("/")
            .build();

        let response = SignedCookieJar::<Key>::new(self.key.clone())
            .add(cookie)
            .into_response();

        let mut headers = HeaderMap::new();
        for value in response.headers().get_all(SET_COOKIE) {
            headers.append(SET_COOKIE, value.clone());
        }
        Ok(headers)
    }
}

#[async_trait]
impl SessionStore for CookieSessionStore {
    fn name(&self) -> &str {
        "cookie"
    }

    async fn load(&self, headers: &HeaderMap) -> Result<Option<Session>> {
        let jar = SignedCookieJar::<Key>::from_headers(headers, self.key.clone());
        let Some(cookie) = jar.get(&self.cookie_name) else {
            if CookieJar::from_headers(headers).get(&self.cookie_name).is_some() {
                tracing::debug!(cookie = %self.cookie_name, "Session cookie failed signature check");
            }
            return Ok(None);
        };

        let session = Self::decode(cookie.value());
        if session.is_none() {
            tracing::debug!(cookie = %self.cookie_name, "Session cookie payload did not decode");
        }
        Ok(session)
    }

    async fn save(&self, _headers: &HeaderMap, session: &Session) -> Result<HeaderMap> {
        self.set_cookie_headers(session)
    }
}

/// In-process sessions keyed by the session cookie's value
///
/// Writes replace the stored session in one step under the lock, so a
/// concurrent reader sees either the old or the new session.
pub struct MemorySessionStore {
    cookie_name: String,
    sessions: Mutex<HashMap<String, Session>>,
}

impl MemorySessionStore {
    pub fn new(cookie_name: impl Into<String>) -> Self {
        Self {
            cookie_name: cookie_name.into(),
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Register a session under `session_id`
    pub fn insert(&self, session_id: impl Into<String>, session: Session) {
        self.sessions().insert(session_id.into(), session);
    }

    /// Current session stored under `session_id`
    pub fn get(&self, session_id: &str) -> Option<Session> {
        self.sessions().get(session_id).cloned()
    }

    /// Every write is a single map insert, so a poisoned map is still whole
    fn sessions(&self) -> MutexGuard<'_, HashMap<String, Session>> {
        self.sessions.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn session_id(&self, headers: &HeaderMap) -> Option<String> {
        CookieJar::from_headers(headers)
            .get(&self.cookie_name)
            .map(|c| c.value().to_string())
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn load(&self, headers: &HeaderMap) -> Result<Option<Session>> {
        let Some(id) = self.session_id(headers) else {
            return Ok(None);
        };
        Ok(self.get(&id))
    }

    async fn save(&self, headers: &HeaderMap, session: &Session) -> Result<HeaderMap> {
        let id = self
            .session_id(headers)
            .ok_or_else(|| store_error(UpstreamFailureKind::Transport, "request has no session id"))?;
        self.insert(id, session.clone());
        Ok(HeaderMap::new())
    }
}
