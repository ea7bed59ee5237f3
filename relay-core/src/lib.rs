//! Relay Core - the request pipeline of the authenticated forwarding gateway
//!
//! Three stages run once per inbound request:
//!
//! ```text
//!  inbound ──► Session Resolver ──► Token Refresher ──► Request Forwarder ──► relay
//!                 │  401               │  401 (refresh      │  400 / 500 / 504
//!                 ▼                    ▼   failed)          ▼
//!            session::resolve_session  refresh::TokenRefresher  route::RouteDescriptor
//! ```
//!
//! This crate holds the transport-independent parts: the [`Session`] model,
//! wildcard capture parsing and backend URL construction, the token
//! exchange, and the closed [`RelayError`] taxonomy. The axum gateway in
//! `relay-proxy` wires them to HTTP.

pub mod error;
pub mod refresh;
pub mod route;
pub mod session;

pub use error::{AuthFailure, ErrorBody, RelayError, Result, RouteFault, Upstream, UpstreamFailureKind};
pub use refresh::{token_endpoint, RefreshResult, TokenRefresher};
pub use route::{RouteCapture, RouteDescriptor};
pub use session::{now_unix, resolve_session, Session};
