//! Liveness and readiness probes

use crate::error::Result;
use axum::{extract::State, http::StatusCode, routing::get, Router};
use std::sync::Arc;

/// A component that can report whether it is ready to serve
pub trait ReadinessCheck: Send + Sync {
    /// Name shown in probe output
    fn component(&self) -> &'static str;

    fn check(&self) -> Result<()>;
}

type Checks = Arc<Vec<Arc<dyn ReadinessCheck>>>;

/// Router serving `/healthz` and `/readyz`
pub fn probe_router(checks: Vec<Arc<dyn ReadinessCheck>>) -> Router {
    Router::new()
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .with_state(Arc::new(checks))
}

async fn healthz() -> &'static str {
    "ok"
}

async fn readyz(State(checks): State<Checks>) -> (StatusCode, String) {
    let failures: Vec<String> = checks
        .iter()
        .filter_map(|check| {
            check
                .check()
                .err()
                .map(|e| format!("[-]{} failed: {}", check.component(), e))
        })
        .collect();

    if failures.is_empty() {
        (StatusCode::OK, "ok".to_string())
    } else {
        tracing::debug!(?failures, "Readiness check failed");
        (StatusCode::SERVICE_UNAVAILABLE, failures.join("\n"))
    }
}
