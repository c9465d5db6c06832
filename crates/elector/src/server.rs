//! HTTP surfaces: the election API and the metrics endpoint

use crate::{
    error::{ElectorError, Result},
    metrics::PrometheusMetrics,
    official::Official,
};
use axum::{
    extract::State,
    http::{
        header::{CACHE_CONTROL, CONNECTION, CONTENT_TYPE},
        StatusCode,
    },
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse, Response,
    },
    routing::get,
    Router,
};
use futures::StreamExt;
use std::{net::SocketAddr, sync::Arc};
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;
use tracing::{error, info, Instrument};

/// Router serving the current leader on `/` and a live feed on `/sse`
pub fn election_router(official: Arc<Official>) -> Router {
    Router::new()
        .route("/", get(leader))
        .route("/sse", get(leader_events))
        .with_state(official)
        .layer(TraceLayer::new_for_http())
}

async fn leader(State(official): State<Arc<Official>>) -> Response {
    match serde_json::to_vec(&official.snapshot()) {
        Ok(body) => (
            [(CONTENT_TYPE, "application/json"), (CACHE_CONTROL, "no-cache")],
            body,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to marshal election result");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

async fn leader_events(State(official): State<Arc<Official>>) -> impl IntoResponse {
    let events = official
        .subscribe()
        .map(|view| Event::default().json_data(&view));

    (
        [(CACHE_CONTROL, "no-cache"), (CONNECTION, "keep-alive")],
        Sse::new(events).keep_alive(KeepAlive::default()),
    )
}

/// Router serving Prometheus metrics on `/metrics`
pub fn metrics_router(metrics: Arc<PrometheusMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(metrics)
}

async fn render_metrics(State(metrics): State<Arc<PrometheusMetrics>>) -> Response {
    match metrics.render() {
        Ok(text) => (
            [(CONTENT_TYPE, "text/plain; version=0.0.4")],
            text,
        )
            .into_response(),
        Err(e) => {
            error!(error = %e, "Failed to render metrics");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

/// Bind `addr` for a server named `name`
pub async fn bind(name: &'static str, addr: SocketAddr) -> Result<TcpListener> {
    let listener = TcpListener::bind(addr).await.map_err(|e| {
        error!(error = %e, %addr, "Unable to bind {} server", name);
        ElectorError::Io(e)
    })?;
    Ok(listener)
}

/// Serve `router` on `listener` until `cancel` fires
pub async fn serve(
    name: &'static str,
    listener: TcpListener,
    router: Router,
    cancel: CancellationToken,
) -> Result<()> {
    let span = tracing::info_span!("server", component = "Server", server = name);
    async move {
        info!(address = ?listener.local_addr().ok(), "Starting {} server", name);
        axum::serve(listener, router)
            .with_graceful_shutdown(async move { cancel.cancelled().await })
            .await?;
        info!("{} server stopped", name);
        Ok::<(), ElectorError>(())
    }
    .instrument(span)
    .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::MetricsSink;
    use axum::body::Body;
    use chrono::{TimeZone, Utc};
    use elector_types::ResultEvent;
    use http::Request;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

    fn event(holder: &str) -> ResultEvent {
        ResultEvent {
            holder_identity: holder.to_string(),
            observed_at: Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap(),
        }
    }

    async fn get_path(router: Router, path: &str) -> Response {
        router
            .oneshot(Request::get(path).body(Body::empty()).unwrap())
            .await
            .unwrap()
    }

    async fn next_chunk(body: &mut Body) -> String {
        let frame = tokio::time::timeout(Duration::from_secs(1), body.frame())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        String::from_utf8(frame.into_data().unwrap().to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_leader_before_any_result() {
        let response = get_path(election_router(Arc::new(Official::new())), "/").await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(&body[..], b"{}");
    }

    #[tokio::test]
    async fn test_leader_returns_current_view() {
        let official = Arc::new(Official::new());
        official.publish(&event("app-0"));

        let response = get_path(election_router(official), "/").await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "application/json");
        assert_eq!(response.headers()[CACHE_CONTROL], "no-cache");
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let json: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(
            json,
            serde_json::json!({"name": "app-0", "last_update": "2024-03-01T12:00:00Z"})
        );
    }

    #[tokio::test]
    async fn test_sse_sends_current_view_then_updates() {
        let official = Arc::new(Official::new());
        official.publish(&event("app-0"));

        let response = get_path(election_router(official.clone()), "/sse").await;
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(response.headers()[CONTENT_TYPE], "text/event-stream");
        assert_eq!(response.headers()[CACHE_CONTROL], "no-cache");

        let mut body = response.into_body();
        assert_eq!(
            next_chunk(&mut body).await,
            "data: {\"name\":\"app-0\",\"last_update\":\"2024-03-01T12:00:00Z\"}\n\n"
        );

        for holder in ["app-1", "app-2"] {
            official.publish(&event(holder));
            let chunk = next_chunk(&mut body).await;
            assert!(chunk.starts_with("data: "));
            assert!(chunk.contains(&format!("\"name\":\"{}\"", holder)));
            assert!(chunk.ends_with("\n\n"));
        }

        drop(body);
        assert_eq!(official.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_bind_conflict_is_io_error() {
        let taken = bind("election", SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let addr = taken.local_addr().unwrap();

        let err = bind("probe", addr).await.unwrap_err();
        assert!(matches!(err, ElectorError::Io(_)));
    }

    #[tokio::test]
    async fn test_serve_stops_on_cancel() {
        let listener = bind("election", SocketAddr::from(([127, 0, 0, 1], 0)))
            .await
            .unwrap();
        let cancel = CancellationToken::new();
        let task = tokio::spawn(serve(
            "election",
            listener,
            election_router(Arc::new(Official::new())),
            cancel.clone(),
        ));

        cancel.cancel();
        let outcome = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert!(outcome.is_ok());
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let metrics = Arc::new(PrometheusMetrics::new().unwrap());
        metrics.election_won();

        let response = get_path(metrics_router(metrics), "/metrics").await;

        assert_eq!(response.status(), StatusCode::OK);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("elector_elections_won 1"));
    }
}
