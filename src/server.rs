//! HTTP front-end: wires the engine into an axum router.

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tracing::info;

use crate::pipeline::Engine;
use crate::routes;

pub fn router(engine: Arc<Engine>) -> Router {
    Router::new()
        .route("/api/add", post(routes::add))
        .route("/api/match", post(routes::match_song))
        .route("/health", get(|| async { "healthy" }))
        .with_state(engine)
}

/// Bind `addr` and serve the API until the process is stopped.
pub async fn serve(addr: &str, engine: Arc<Engine>) -> anyhow::Result<()> {
    let listener = TcpListener::bind(addr).await?;
    info!(%addr, "serving fingerprint API");

    axum::serve(listener, router(engine)).await?;
    Ok(())
}
