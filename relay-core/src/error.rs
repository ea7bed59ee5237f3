//! Error types for relay operations
//!
//! The gateway has a small, closed error taxonomy. Every
//! variant maps to a fixed HTTP status and a fixed public message, so the
//! caller always receives `{"error": "..."}` and never a raw upstream error.
//!
//! | variant           | status  | public message                          |
//! |-------------------|---------|-----------------------------------------|
//! | `Unauthenticated` | 401     | `Not authenticated; session not set.`   |
//! | `MalformedRoute`  | 400/413 | `Malformed slug.` / `Endpoint formatted incorrectly.` / `Request body too large.` |
//! | `UpstreamFailure` | 500/504 | `Upstream request failed.` / `Upstream request timed out.` |
//!
//! # Example
//!
//! ```rust
//! use relay_core::error::{RelayError, RouteFault};
//!
//! let err = RelayError::MalformedRoute(RouteFault::Slug);
//! assert_eq!(err.http_status_code(), 400);
//! assert_eq!(err.public_message(), "Malformed slug.");
//! ```

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for relay operations
pub type Result<T> = std::result::Result<T, RelayError>;

/// Why a request was treated as unauthenticated.
///
/// Only used for logging. All reasons produce the same response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// No session cookie, or the cookie failed verification
    NoSession,
    /// A session exists but carries no access token
    MissingAccessToken,
    /// The access token expired and could not be refreshed
    RefreshFailed,
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            AuthFailure::NoSession => "no session",
            AuthFailure::MissingAccessToken => "session has no access token",
            AuthFailure::RefreshFailed => "token refresh failed",
        };
        f.write_str(s)
    }
}

/// Which part of the routing input was unusable
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RouteFault {
    /// Wildcard capture missing, empty, or not a clean list of segments
    Slug,
    /// A query parameter was not a single plain string
    Query,
    /// Inbound body exceeded the configured limit
    BodyTooLarge,
    /// Inbound body could not be read
    Body,
}

/// Which outbound call failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upstream {
    IdentityProvider,
    Backend,
    SessionStore,
}

impl fmt::Display for Upstream {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Upstream::IdentityProvider => f.write_str("identity provider"),
            Upstream::Backend => f.write_str("backend"),
            Upstream::SessionStore => f.write_str("session store"),
        }
    }
}

/// How an outbound call failed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpstreamFailureKind {
    /// Connection, TLS or protocol error
    Transport,
    /// No response within the configured timeout
    Timeout,
    /// Response arrived but with a non-success status
    Status(u16),
    /// Response body could not be decoded
    Decode,
}

/// Errors that can occur while relaying a request
#[derive(Error, Debug)]
pub enum RelayError {
    /// No usable credentials for this caller
    #[error("Not authenticated: {reason}")]
    Unauthenticated { reason: AuthFailure },

    /// Routing input could not be turned into a backend path
    #[error("Malformed route: {0:?}")]
    MalformedRoute(RouteFault),

    /// A call to a collaborator (backend, identity provider, session store) failed
    #[error("Upstream {upstream} failed ({kind:?}): {detail}")]
    UpstreamFailure {
        upstream: Upstream,
        kind: UpstreamFailureKind,
        detail: String,
    },
}

impl RelayError {
    pub fn unauthenticated(reason: AuthFailure) -> Self {
        RelayError::Unauthenticated { reason }
    }

    /// Build an upstream failure from a reqwest error, classifying timeouts.
    pub fn from_reqwest(upstream: Upstream, err: &reqwest::Error) -> Self {
        let kind = if err.is_timeout() {
            UpstreamFailureKind::Timeout
        } else if err.is_decode() {
            UpstreamFailureKind::Decode
        } else if let Some(status) = err.status() {
            UpstreamFailureKind::Status(status.as_u16())
        } else {
            UpstreamFailureKind::Transport
        };

        RelayError::UpstreamFailure {
            upstream,
            kind,
            detail: err.to_string(),
        }
    }

    /// The message sent to the caller. Never contains internal detail.
    pub fn public_message(&self) -> &'static str {
        match self {
            RelayError::Unauthenticated { .. } => "Not authenticated; session not set.",
            RelayError::MalformedRoute(RouteFault::Slug) => "Malformed slug.",
            RelayError::MalformedRoute(RouteFault::Query) => "Endpoint formatted incorrectly.",
            RelayError::MalformedRoute(RouteFault::BodyTooLarge) => "Request body too large.",
            RelayError::MalformedRoute(RouteFault::Body) => "Request body could not be read.",
            RelayError::UpstreamFailure {
                kind: UpstreamFailureKind::Timeout,
                ..
            } => "Upstream request timed out.",
            RelayError::UpstreamFailure { .. } => "Upstream request failed.",
        }
    }

    /// Returns the HTTP status code for this error
    pub fn http_status_code(&self) -> u16 {
        match self {
            RelayError::Unauthenticated { .. } => 401,
            RelayError::MalformedRoute(RouteFault::BodyTooLarge) => 413,
            RelayError::MalformedRoute(_) => 400,
            RelayError::UpstreamFailure {
                kind: UpstreamFailureKind::Timeout,
                ..
            } => 504,
            RelayError::UpstreamFailure { .. } => 500,
        }
    }

    /// Returns the stable error code for this error
    ///
    /// Used in logs and stats, not in the response body.
    pub fn error_code(&self) -> &'static str {
        match self {
            RelayError::Unauthenticated { .. } => "UNAUTHENTICATED",
            RelayError::MalformedRoute(_) => "MALFORMED_ROUTE",
            RelayError::UpstreamFailure {
                kind: UpstreamFailureKind::Timeout,
                ..
            } => "UPSTREAM_TIMEOUT",
            RelayError::UpstreamFailure { .. } => "UPSTREAM_FAILURE",
        }
    }

    /// Returns true if this error is a client error (4xx equivalent)
    pub fn is_client_error(&self) -> bool {
        matches!(self.http_status_code(), 400..=499)
    }

    /// The JSON body sent to the caller
    pub fn to_body(&self) -> ErrorBody {
        ErrorBody {
            error: self.public_message().to_string(),
        }
    }
}

/// The only error shape ever serialized to a caller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthenticated_reasons_share_response() {
        let reasons = [
            AuthFailure::NoSession,
            AuthFailure::MissingAccessToken,
            AuthFailure::RefreshFailed,
        ];

        for reason in reasons {
            let err = RelayError::unauthenticated(reason);
            assert_eq!(err.http_status_code(), 401);
            assert_eq!(err.public_message(), "Not authenticated; session not set.");
            assert_eq!(err.error_code(), "UNAUTHENTICATED");
        }
    }

    #[test]
    fn test_route_fault_messages() {
        let slug = RelayError::MalformedRoute(RouteFault::Slug);
        let query = RelayError::MalformedRoute(RouteFault::Query);

        assert_eq!(slug.public_message(), "Malformed slug.");
        assert_eq!(query.public_message(), "Endpoint formatted incorrectly.");
        assert!(slug.is_client_error());
        assert!(query.is_client_error());
    }

    #[test]
    fn test_body_faults() {
        let too_large = RelayError::MalformedRoute(RouteFault::BodyTooLarge);
        let unreadable = RelayError::MalformedRoute(RouteFault::Body);

        assert_eq!(too_large.http_status_code(), 413);
        assert_eq!(too_large.public_message(), "Request body too large.");
        assert_eq!(unreadable.http_status_code(), 400);
        assert_eq!(unreadable.public_message(), "Request body could not be read.");
        assert!(too_large.is_client_error());
    }

    #[test]
    fn test_upstream_timeout_is_gateway_timeout() {
        let err = RelayError::UpstreamFailure {
            upstream: Upstream::Backend,
            kind: UpstreamFailureKind::Timeout,
            detail: "operation timed out".to_string(),
        };

        assert_eq!(err.http_status_code(), 504);
        assert_eq!(err.error_code(), "UPSTREAM_TIMEOUT");
        assert!(!err.is_client_error());
    }

    #[test]
    fn test_upstream_detail_not_in_body() {
        let err = RelayError::UpstreamFailure {
            upstream: Upstream::Backend,
            kind: UpstreamFailureKind::Transport,
            detail: "connection refused (os error 111) at 10.0.0.4:443".to_string(),
        };

        let body = serde_json::to_value(err.to_body()).unwrap();
        assert_eq!(err.http_status_code(), 500);
        assert_eq!(body, serde_json::json!({"error": "Upstream request failed."}));
    }
}
