//! Reference application: an Axum router served over a `ServerHandle`.
//!
//! # Responsibilities
//! - Build the default Axum Router (health endpoint, request IDs, tracing)
//! - Accept connections from the handle until it stops accepting
//! - Serve each connection with hyper (HTTP/1.1 and HTTP/2)
//! - Ask each open connection to finish gracefully once accepting stops
//!
//! Request semantics are opaque to the warden; any `Router` can be served.

use axum::{extract::Request, response::IntoResponse, routing::get, Json, Router};
use hyper::body::Incoming;
use hyper_util::{
    rt::{TokioExecutor, TokioIo},
    server::conn::auto,
};
use std::time::Duration;
use tower::{Service, ServiceBuilder};
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::net::ServerHandle;

/// Pause after a failed accept so descriptor exhaustion does not spin.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Per-request deadline of the default router.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Router with `GET /healthz` and the standard middleware stack.
pub fn default_router() -> Router {
    with_middleware(Router::new().route("/healthz", get(healthz)))
}

/// Wrap `router` with request IDs, tracing and a request timeout.
#[allow(deprecated)]
pub fn with_middleware(router: Router) -> Router {
    router.layer(
        ServiceBuilder::new()
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
            .layer(TraceLayer::new_for_http())
            .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
            .layer(PropagateRequestIdLayer::x_request_id()),
    )
}

async fn healthz() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

/// Serve `router` on `handle` until it stops accepting.
///
/// Returns once the accept loop has ended and the listening socket is
/// released; in-flight connections keep running on their own tasks and
/// finish (or are abandoned) under the shutdown coordinator's grace period.
pub async fn serve(handle: ServerHandle, router: Router) -> std::io::Result<()> {
    let stop = handle.control().stop_token();
    tracing::info!(address = %handle.local_addr(), "HTTP server starting");

    loop {
        let (stream, peer_addr, permit) = match handle.accept().await {
            Ok(Some(accepted)) => accepted,
            Ok(None) => break,
            Err(e) => {
                tracing::warn!(error = %e, "Accept failed");
                tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                continue;
            }
        };

        let router = router.clone();
        let stop = stop.clone();

        tokio::spawn(async move {
            let service = hyper::service::service_fn(move |request: Request<Incoming>| {
                router.clone().call(request)
            });

            let builder = auto::Builder::new(TokioExecutor::new());
            let conn = builder.serve_connection_with_upgrades(TokioIo::new(stream), service);
            tokio::pin!(conn);

            let mut closing = false;
            let result = loop {
                tokio::select! {
                    result = conn.as_mut() => break result,
                    _ = stop.cancelled(), if !closing => {
                        closing = true;
                        conn.as_mut().graceful_shutdown();
                    }
                }
            };

            if let Err(e) = result {
                tracing::debug!(
                    peer_addr = %peer_addr,
                    connection_id = %permit.connection_id(),
                    error = %e,
                    "Connection ended with error"
                );
            }
            drop(permit);
        });
    }

    tracing::info!(
        active_connections = handle.control().active_connections(),
        "HTTP server stopped accepting"
    );
    drop(handle);
    Ok(())
}
