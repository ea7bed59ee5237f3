//! Router assembly, health and stats

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use axum::{
    extract::{DefaultBodyLimit, State},
    response::Json,
    routing::{any, get},
    Router,
};
use relay_core::RelayError;
use serde::Serialize;
use tower_http::trace::TraceLayer;

use crate::gateway::{self, MountContext};
use crate::ProxyState;

/// Request counters, owned by the proxy state
#[derive(Debug, Default)]
pub struct ProxyStats {
    requests_total: AtomicU64,
    forwarded: AtomicU64,
    refreshed: AtomicU64,
    unauthenticated: AtomicU64,
    malformed: AtomicU64,
    upstream_failed: AtomicU64,
}

impl ProxyStats {
    pub fn record_request(&self) {
        self.requests_total.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_forwarded(&self) {
        self.forwarded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_refreshed(&self) {
        self.refreshed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_error(&self, err: &RelayError) {
        let counter = match err {
            RelayError::Unauthenticated { .. } => &self.unauthenticated,
            RelayError::MalformedRoute(_) => &self.malformed,
            RelayError::UpstreamFailure { .. } => &self.upstream_failed,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsResponse {
        StatsResponse {
            requests_total: self.requests_total.load(Ordering::Relaxed),
            forwarded: self.forwarded.load(Ordering::Relaxed),
            refreshed: self.refreshed.load(Ordering::Relaxed),
            unauthenticated: self.unauthenticated.load(Ordering::Relaxed),
            malformed: self.malformed.load(Ordering::Relaxed),
            upstream_failed: self.upstream_failed.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsResponse {
    pub requests_total: u64,
    pub forwarded: u64,
    pub refreshed: u64,
    pub unauthenticated: u64,
    pub malformed: u64,
    pub upstream_failed: u64,
}

#[derive(Serialize)]
struct HealthResponse {
    status: String,
    service: String,
    version: String,
}

/// Create the proxy router: health, stats and the relay routes of each mount
pub fn create_router(state: Arc<ProxyState>) -> Router {
    let mut router = Router::new()
        .route("/health", get(health))
        .route("/stats", get(stats))
        .with_state(Arc::clone(&state));

    for mount in &state.config.mounts {
        let base = mount.route_path();
        let ctx = Arc::new(MountContext {
            proxy: Arc::clone(&state),
            mount: mount.clone(),
        });

        // `/*slug` never matches an empty tail, so `/{prefix}/` is routed explicitly
        router = router.merge(
            Router::new()
                .route(&base, any(gateway::relay))
                .route(&format!("{}/", base), any(gateway::relay))
                .route(&format!("{}/*slug", base), any(gateway::relay))
                .layer(DefaultBodyLimit::max(state.config.max_body_bytes))
                .with_state(ctx),
        );
    }

    router.layer(TraceLayer::new_for_http())
}

/// Health check
async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        service: "relay-proxy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    })
}

/// Stats endpoint
async fn stats(State(state): State<Arc<ProxyState>>) -> Json<StatsResponse> {
    Json(state.stats.snapshot())
}

#[cfg(test)]
mod tests {
    use super::*;

    use relay_core::{AuthFailure, RouteFault, Upstream, UpstreamFailureKind};

    #[test]
    fn test_stats_classify_errors() {
        let stats = ProxyStats::default();
        stats.record_request();
        stats.record_request();
        stats.record_request();
        stats.record_error(&RelayError::unauthenticated(AuthFailure::NoSession));
        stats.record_error(&RelayError::MalformedRoute(RouteFault::Query));
        stats.record_error(&RelayError::UpstreamFailure {
            upstream: Upstream::Backend,
            kind: UpstreamFailureKind::Timeout,
            detail: String::new(),
        });

        assert_eq!(
            stats.snapshot(),
            StatsResponse {
                requests_total: 3,
                forwarded: 0,
                refreshed: 0,
                unauthenticated: 1,
                malformed: 1,
                upstream_failed: 1,
            }
        );
    }
}
