//! HTTP surface
//!
//! One upload endpoint backed by the shared [`BackgroundRemover`](crate::remover::BackgroundRemover)
//! plus a health probe. CORS is open to every origin.

pub mod error;
pub mod routes;
pub mod state;

pub use self::error::ApiError;
pub use self::routes::{HEALTH_PATH, REMOVE_BACKGROUND_PATH};
pub use self::state::AppState;

use crate::config::ServerConfig;
use axum::{
    extract::DefaultBodyLimit,
    http::Method,
    routing::{get, post},
    Router,
};
use std::future::Future;
use tokio::net::TcpListener;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::{error, info};

/// Build the application router
pub fn build_router(state: AppState, config: &ServerConfig) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::POST])
        .allow_headers(Any);

    Router::new()
        .route(
            REMOVE_BACKGROUND_PATH,
            post(routes::remove_background).layer(DefaultBodyLimit::max(config.max_upload_bytes)),
        )
        .route(HEALTH_PATH, get(routes::health))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serve `router` on `listener` until `shutdown` resolves
///
/// In-flight requests are allowed to finish before this returns.
///
/// # Errors
/// - Listener address or accept loop I/O failures
pub async fn serve<F>(listener: TcpListener, router: Router, shutdown: F) -> crate::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let addr = listener.local_addr()?;
    info!("Background removal API is available on http://{addr}{REMOVE_BACKGROUND_PATH}");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("Server stopped");
    Ok(())
}

/// Resolves on Ctrl-C, or SIGTERM on Unix
pub async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl-C: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            },
            Err(e) => {
                error!("Failed to listen for SIGTERM: {e}");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }
    info!("Shutdown signal received");
}
