//! The relay handler: resolve session, derive route, refresh, forward

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{rejection::BytesRejection, State},
    http::{header::CONTENT_TYPE, HeaderMap, HeaderValue, Method, StatusCode, Uri},
    response::{IntoResponse, Json, Response},
};
use relay_core::{
    now_unix, resolve_session, RelayError, Result, RouteCapture, RouteDescriptor, RouteFault,
    Session, Upstream, UpstreamFailureKind,
};
use tracing::Instrument;
use url::Url;

use crate::config::Mount;
use crate::ProxyState;

/// Bytes of a body shown in verbose dumps
const BODY_PREVIEW_LIMIT: usize = 512;

/// Per-mount handler state
pub struct MountContext {
    pub proxy: Arc<ProxyState>,
    pub mount: Mount,
}

/// Relay one inbound request to the mount's backend
pub async fn relay(
    State(ctx): State<Arc<MountContext>>,
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Response {
    let request_id = uuid::Uuid::new_v4();
    let span = tracing::info_span!(
        "relay",
        %request_id,
        mount = %ctx.mount.prefix,
        %method
    );

    async move {
        ctx.proxy.stats.record_request();

        // Headers the session store needs on the response, even on failure
        let mut persisted = HeaderMap::new();
        let outcome = match body.map_err(body_error) {
            Ok(body) => run(&ctx, method, &uri, &headers, body, &mut persisted).await,
            Err(err) => Err(err),
        };

        let mut response = match outcome {
            Ok(response) => {
                ctx.proxy.stats.record_forwarded();
                response
            }
            Err(err) => {
                ctx.proxy.stats.record_error(&err);
                if err.is_client_error() {
                    tracing::info!(code = err.error_code(), error = %err, "Request rejected");
                } else {
                    tracing::error!(code = err.error_code(), error = %err, "Request failed");
                }
                error_response(&err)
            }
        };

        for (name, value) in persisted.iter() {
            response.headers_mut().append(name.clone(), value.clone());
        }
        response
    }
    .instrument(span)
    .await
}

async fn run(
    ctx: &MountContext,
    method: Method,
    uri: &Uri,
    headers: &HeaderMap,
    body: Bytes,
    persisted: &mut HeaderMap,
) -> Result<Response> {
    let state = &ctx.proxy;

    let loaded = state.sessions.load(headers).await?;
    let mut session = resolve_session(loaded)?;

    let capture = RouteCapture::parse(ctx.mount.capture(uri.path()));
    let route = RouteDescriptor::from_parts(capture, uri.query(), method, body)?;
    let url = route.backend_url(&ctx.mount.backend_base_url)?;

    let now = now_unix();
    if session.needs_refresh(now, state.config.refresh_leeway_secs) {
        session = state.refresher.refresh_session(session, now).await?;

        // The new token is persisted before it is ever sent to the backend
        let written = state.sessions.save(headers, &session).await?;
        for (name, value) in written.iter() {
            persisted.append(name.clone(), value.clone());
        }
        state.stats.record_refreshed();
        tracing::info!(session = %session.fingerprint(), "Session refreshed and persisted");
    }

    forward(state, &ctx.mount, &session, route, url).await
}

/// Send the request to the backend with gateway-computed headers only.
async fn forward(
    state: &ProxyState,
    mount: &Mount,
    session: &Session,
    route: RouteDescriptor,
    url: Url,
) -> Result<Response> {
    if state.config.verbose {
        tracing::info!(
            method = %route.method,
            url = %url,
            body_bytes = route.body.as_ref().map_or(0, |b| b.len()),
            body = %preview(route.body.as_deref().unwrap_or_default()),
            "Forwarding request"
        );
    }

    let mut request = state
        .http
        .request(route.method, url.clone())
        .bearer_auth(&session.access_token);

    if let Some(api_key) = &mount.api_key {
        request = request.header(mount.api_key_header.clone(), api_key);
    }

    if let Some(body) = route.body {
        // Only a body that is actually JSON gets labelled as such
        if serde_json::from_slice::<serde::de::IgnoredAny>(&body).is_ok() {
            request = request.header(CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }
        request = request.body(body);
    }

    let response = request
        .send()
        .await
        .map_err(|e| RelayError::from_reqwest(Upstream::Backend, &e))?;

    relay_response(state, response).await
}

/// Relay status and body. JSON is re-emitted as JSON, other content raw.
async fn relay_response(state: &ProxyState, response: reqwest::Response) -> Result<Response> {
    let status = response.status();
    let content_type = response.headers().get(CONTENT_TYPE).cloned();
    let body = response
        .bytes()
        .await
        .map_err(|e| RelayError::from_reqwest(Upstream::Backend, &e))?;

    if state.config.verbose {
        tracing::info!(
            status = status.as_u16(),
            content_type = ?content_type,
            body_bytes = body.len(),
            body = %preview(&body),
            "Backend responded"
        );
    }

    if body.is_empty() {
        return Ok(status.into_response());
    }

    match content_type {
        Some(ct) if is_json(&ct) => {
            let value = parse_json(&body)?;
            Ok((status, Json(value)).into_response())
        }
        Some(ct) => {
            let mut response = (status, body).into_response();
            response.headers_mut().insert(CONTENT_TYPE, ct);
            Ok(response)
        }
        None => match serde_json::from_slice::<serde_json::Value>(&body) {
            Ok(value) => Ok((status, Json(value)).into_response()),
            Err(_) => Ok((status, body).into_response()),
        },
    }
}

/// An inbound body that could not be buffered, typically over the size limit
fn body_error(rejection: BytesRejection) -> RelayError {
    if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
        RelayError::MalformedRoute(RouteFault::BodyTooLarge)
    } else {
        RelayError::MalformedRoute(RouteFault::Body)
    }
}

fn parse_json(body: &[u8]) -> Result<serde_json::Value> {
    serde_json::from_slice(body).map_err(|e| RelayError::UpstreamFailure {
        upstream: Upstream::Backend,
        kind: UpstreamFailureKind::Decode,
        detail: e.to_string(),
    })
}

fn is_json(content_type: &HeaderValue) -> bool {
    let Ok(value) = content_type.to_str() else {
        return false;
    };
    let mime = value.split(';').next().unwrap_or("").trim().to_ascii_lowercase();
    mime == "application/json" || mime.ends_with("+json")
}

fn preview(body: &[u8]) -> String {
    let end = body.len().min(BODY_PREVIEW_LIMIT);
    String::from_utf8_lossy(&body[..end]).into_owned()
}

/// `{"error": "..."}` with the taxonomy's status code
pub fn error_response(err: &RelayError) -> Response {
    let status =
        StatusCode::from_u16(err.http_status_code()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, Json(err.to_body())).into_response()
}
