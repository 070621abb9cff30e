//! HTTP reverse proxy for CLI
//!
//! Forwards every request to an upstream server and logs the incoming side
//! of each exchange with [`Logger::serve`]. Response bodies are streamed
//! back as they arrive; the logger records them on the way through.

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::StatusCode,
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::any,
    Router,
};
use reqwest::Client;
use std::convert::Infallible;
use std::net::SocketAddr;
use tracing::{debug, error, info};
use wiretap_core::{BoxError, Logger, RemoteAddr};

/// Largest request body forwarded upstream
const MAX_FORWARDED_BODY: usize = 10 * 1024 * 1024;

/// Headers that belong to a single connection and are not forwarded
const HOP_BY_HOP: &[&str] = &[
    "connection",
    "host",
    "keep-alive",
    "proxy-connection",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// State shared across proxy handlers
#[derive(Clone)]
pub struct ProxyState {
    /// Upstream base URL
    pub upstream_url: String,
    /// HTTP client for making requests to the upstream server
    pub client: Client,
}

/// Build the proxy router with traffic logging
pub fn router(logger: Logger, state: ProxyState) -> Router {
    Router::new()
        .route("/", any(proxy_handler))
        .route("/*path", any(proxy_handler))
        .with_state(state)
        .layer(middleware::from_fn_with_state(logger, log_traffic))
}

/// Run the HTTP proxy
pub async fn run_http_proxy(
    logger: Logger,
    upstream_url: String,
    listen_port: u16,
) -> Result<(), BoxError> {
    let client = Client::builder()
        .build()
        .map_err(|e| format!("Failed to create HTTP client: {e}"))?;

    let state = ProxyState {
        upstream_url: upstream_url.clone(),
        client,
    };
    let app = router(logger, state);

    let addr = format!("127.0.0.1:{}", listen_port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| format!("Failed to bind to {}: {e}", addr))?;

    info!("Listening on http://{} -> {}", addr, upstream_url);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .map_err(|e| format!("Server error: {e}"))?;

    Ok(())
}

/// Middleware printing each exchange
async fn log_traffic(
    State(logger): State<Logger>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
    mut req: Request,
    next: Next,
) -> Response {
    if let Some(ConnectInfo(addr)) = connect_info {
        req.extensions_mut().insert(RemoteAddr(addr));
    }

    let served = logger
        .serve(req, |req| async move {
            Ok::<_, Infallible>(next.run(req.map(Body::new)).await)
        })
        .await;

    match served {
        Ok(resp) => resp.map(Body::new),
        Err(never) => match never {},
    }
}

/// Forward a request to the upstream server
async fn proxy_handler(State(state): State<ProxyState>, req: Request) -> Response {
    let method = req.method().clone();
    let headers = req.headers().clone();
    let path_and_query = req
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str().to_string())
        .unwrap_or_else(|| "/".to_string());

    let upstream_url = format!(
        "{}{}",
        state.upstream_url.trim_end_matches('/'),
        path_and_query
    );
    debug!("Proxying {} {}", method, upstream_url);

    let body_bytes = match axum::body::to_bytes(req.into_body(), MAX_FORWARDED_BODY).await {
        Ok(bytes) => bytes,
        Err(e) => {
            error!("Failed to read request body: {}", e);
            return (StatusCode::BAD_REQUEST, "Failed to read request body").into_response();
        }
    };

    let mut upstream_req = state.client.request(method, &upstream_url);
    for (name, value) in headers.iter() {
        if HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        upstream_req = upstream_req.header(name.clone(), value.clone());
    }
    if !body_bytes.is_empty() {
        upstream_req = upstream_req.body(body_bytes);
    }

    let upstream_response = match upstream_req.send().await {
        Ok(resp) => resp,
        Err(e) => {
            error!("Upstream request failed: {}", e);
            return (
                StatusCode::BAD_GATEWAY,
                format!("Upstream request failed: {}", e),
            )
                .into_response();
        }
    };

    let mut response = Response::builder().status(upstream_response.status());
    for (name, value) in upstream_response.headers().iter() {
        if HOP_BY_HOP.contains(&name.as_str()) {
            continue;
        }
        response = response.header(name.clone(), value.clone());
    }

    response
        .body(Body::from_stream(upstream_response.bytes_stream()))
        .unwrap_or_else(|_| StatusCode::INTERNAL_SERVER_ERROR.into_response())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hop_by_hop_names_are_lowercase() {
        assert!(HOP_BY_HOP.iter().all(|h| h.chars().all(|c| !c.is_ascii_uppercase())));
        assert!(HOP_BY_HOP.contains(&"transfer-encoding"));
    }

    #[tokio::test]
    async fn test_upstream_unreachable() {
        let state = ProxyState {
            upstream_url: "http://127.0.0.1:9".to_string(),
            client: Client::new(),
        };
        let req = Request::builder()
            .uri("/ping")
            .body(Body::empty())
            .unwrap();

        let resp = proxy_handler(State(state), req).await;
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }
}
