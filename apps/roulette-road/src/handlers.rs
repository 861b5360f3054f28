use axum::{
    extract::State,
    http::header,
    response::{IntoResponse, Json},
};
use metrics_exporter_prometheus::PrometheusHandle;
use serde::Serialize;

use crate::matchmaker::LobbyStats;
use crate::router::SignalRouter;

#[derive(Clone)]
pub struct AppState {
    pub router: SignalRouter,
    pub metrics: Option<PrometheusHandle>,
}

#[derive(Debug, Serialize)]
pub struct HealthStatus {
    status: &'static str,
}

/// GET /health
pub async fn health_check() -> Json<HealthStatus> {
    Json(HealthStatus { status: "ok" })
}

/// GET /hello
pub async fn hello() -> &'static str {
    "this is hello endpoint"
}

/// GET /stats - current lobby occupancy
pub async fn stats_handler(State(state): State<AppState>) -> Json<LobbyStats> {
    Json(state.router.matchmaker().stats())
}

/// GET /metrics - Prometheus exposition
pub async fn metrics_handler(State(state): State<AppState>) -> impl IntoResponse {
    let body = state
        .metrics
        .as_ref()
        .map(PrometheusHandle::render)
        .unwrap_or_default();
    ([(header::CONTENT_TYPE, "text/plain; version=0.0.4")], body)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::matchmaker::{MatchConfig, Matchmaker};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};

    async fn get(path: &str) -> String {
        let state = AppState {
            router: SignalRouter::new(Matchmaker::new(MatchConfig::default())),
            metrics: None,
        };
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, crate::build_router(state)).await.unwrap();
        });

        let mut stream = tokio::net::TcpStream::connect(addr).await.unwrap();
        let request = format!("GET {path} HTTP/1.1\r\nHost: {addr}\r\nConnection: close\r\n\r\n");
        stream.write_all(request.as_bytes()).await.unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).await.unwrap();
        response
    }

    #[test_timeout::tokio_timeout_test]
    async fn hello_answers_plain_text() {
        let response = get("/hello").await;
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.ends_with("this is hello endpoint"), "{response}");
    }

    #[test_timeout::tokio_timeout_test]
    async fn health_reports_ok() {
        let response = get("/health").await;
        assert!(response.starts_with("HTTP/1.1 200"), "{response}");
        assert!(response.ends_with(r#"{"status":"ok"}"#), "{response}");
    }
}
