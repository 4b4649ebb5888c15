use axum::{routing::get, Router};
use tokio::sync::watch;
use tower_http::trace::TraceLayer;

use crate::state::SharedState;

use super::api::{get_batch, get_status, list_service_batches, tail_current};

/// Builds the HTTP router over the shared daemon state.
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .route("/status", get(get_status))
        .route("/logs/:service", get(list_service_batches))
        .route("/logs/:service/batch/:id", get(get_batch))
        .route("/logs/:service/tail", get(tail_current))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Start the web server and serve until the shutdown signal flips to `true`.
pub async fn run_server(
    state: SharedState,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Result<(), std::io::Error> {
    let listen = state.config.listen.clone();
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&listen).await?;
    tracing::info!("Web server listening on {}", listen);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            let _ = shutdown_rx.wait_for(|&v| v).await;
            tracing::info!("Web server shutting down gracefully");
        })
        .await
}
