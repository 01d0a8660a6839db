//! HTTP server for the BuddyLens API.
//!
//! Wires the protected API routes behind the session middleware, adds the
//! unauthenticated health check, and runs `axum::serve` on a spawned task
//! that stops when its cancellation token fires.

use crate::db::pool::DbPool;
use crate::services::api::api_routes;
use crate::services::auth::auth_middleware;
use crate::services::claim_arbiter::ClaimArbiter;
use axum::extract::State;
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{middleware, Json, Router};
use serde_json::json;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;

/// Shared state for the axum routes.
#[derive(Clone)]
pub struct AppState {
    pub db: DbPool,
    pub arbiter: ClaimArbiter,
}

/// Handle to control the running server.
pub struct ServerHandle {
    cancel_token: CancellationToken,
    local_addr: SocketAddr,
    task: JoinHandle<()>,
}

impl ServerHandle {
    /// Address the listener is bound to.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Stop accepting connections and wait for in-flight requests to finish.
    pub async fn shutdown(self) {
        log::info!("[server] Stopping server on {}", self.local_addr);
        self.cancel_token.cancel();
        if let Err(e) = self.task.await {
            log::error!("[server] Server task failed: {}", e);
        }
    }
}

/// Build the full router.
///
/// 1. `/api/health` (unprotected)
/// 2. Protected API routes behind the session middleware
pub fn build_router(state: AppState) -> Router {
    let protected = api_routes()
        .route_layer(middleware::from_fn_with_state(
            state.db.clone(),
            auth_middleware,
        ))
        .with_state(state.clone());

    Router::new()
        .route("/api/health", get(health))
        .with_state(state)
        .merge(protected)
        .layer(cors_layer())
}

fn cors_layer() -> CorsLayer {
    CorsLayer::new()
        .allow_methods([
            Method::GET,
            Method::POST,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
        ])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(Duration::from_secs(60 * 60))
}

/// GET /api/health: report store reachability.
async fn health(State(state): State<AppState>) -> Response {
    match sqlx::query_scalar::<_, i64>("SELECT 1")
        .fetch_one(&state.db)
        .await
    {
        Ok(_) => Json(json!({ "status": "ok" })).into_response(),
        Err(e) => {
            log::error!("[server] Health check failed: {}", e);
            (
                StatusCode::SERVICE_UNAVAILABLE,
                Json(json!({ "status": "unavailable" })),
            )
                .into_response()
        }
    }
}

/// Bind `addr` and start serving on a background task.
///
/// Returns an error if the address is unavailable.
pub async fn start_server(addr: SocketAddr, state: AppState) -> Result<ServerHandle, String> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .map_err(|e| format!("Failed to bind to {}: {}", addr, e))?;
    let local_addr = listener
        .local_addr()
        .map_err(|e| format!("Failed to read bound address: {}", e))?;

    let cancel_token = CancellationToken::new();
    let cancel_clone = cancel_token.clone();
    let app = build_router(state);

    log::info!("[server] Server starting on http://{}", local_addr);

    let task = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            cancel_clone.cancelled().await;
        });

        if let Err(e) = server.await {
            log::error!("[server] Server error: {}", e);
        }

        log::info!("[server] Server stopped");
    });

    Ok(ServerHandle {
        cancel_token,
        local_addr,
        task,
    })
}
