//! HTTP server setup.
//!
//! Builds the axum router over shared application state (the connection pool
//! and cache client, injected at construction) and runs it with graceful
//! shutdown on SIGINT/SIGTERM.

use crate::cache::Cache;
use crate::db::{ConnectionPool, PgConnector};
use crate::error::{DbError, DbResult};
use crate::http::handlers;
use axum::Router;
use axum::routing::get;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tower_http::trace::TraceLayer;
use tracing::info;

/// Shared application state, one instance per server.
pub struct AppState {
    pub pool: ConnectionPool<PgConnector>,
    pub cache: Cache,
}

/// Build the application router.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route(
            "/api/{table}",
            get(handlers::list_rows).post(handlers::create_row),
        )
        .route(
            "/api/{table}/{id}",
            get(handlers::get_row)
                .put(handlers::update_row)
                .delete(handlers::delete_row),
        )
        .route(
            "/api/post_tags/{post_id}/{tag_id}",
            get(handlers::get_post_tag).delete(handlers::delete_post_tag),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Run the HTTP server until a shutdown signal arrives, then close the pool.
pub async fn serve(state: Arc<AppState>, bind_addr: &str) -> DbResult<()> {
    let app = router(Arc::clone(&state));

    let listener = TcpListener::bind(bind_addr).await.map_err(|e| {
        DbError::connection(format!("failed to bind to {}: {}", bind_addr, e))
    })?;

    info!(addr = %bind_addr, "HTTP server listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(wait_for_signal())
        .await
        .map_err(|e| DbError::internal(format!("HTTP server error: {}", e)))?;

    info!("HTTP server stopped, closing database connections");
    state.pool.close().await;

    Ok(())
}

/// Wait for a shutdown signal (SIGINT or SIGTERM).
async fn wait_for_signal() {
    let ctrl_c = signal::ctrl_c();

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("received SIGINT"),
        _ = terminate => info!("received SIGTERM"),
    }
}
