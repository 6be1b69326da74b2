//! Proxy server setup and initialization

use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{routing::any, Router};
use tokio::net::TcpListener;

use super::handler::proxy_handler;
use super::state::ProxyState;

/// Every path and method goes through the proxy handler
pub fn router(state: ProxyState) -> Router {
    Router::new()
        .route("/", any(proxy_handler))
        .route("/*path", any(proxy_handler))
        .with_state(state)
}

/// Start the proxy server
pub async fn start_proxy(
    bind_addr: SocketAddr,
    state: ProxyState,
    shutdown_rx: tokio::sync::oneshot::Receiver<()>,
) -> Result<()> {
    for route in state.routes().iter() {
        tracing::debug!(route = ?route, "Route loaded");
    }

    tracing::info!("Starting proxy on {}", bind_addr);

    let listener = TcpListener::bind(bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", bind_addr))?;

    tracing::info!("Proxy listening on {}", bind_addr);

    serve(listener, state, async move {
        shutdown_rx.await.ok();
    })
    .await?;

    tracing::info!("Proxy server shut down gracefully");
    Ok(())
}

/// Serve on an already bound listener until `shutdown` resolves
pub async fn serve(
    listener: TcpListener,
    state: ProxyState,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await
        .context("Server error")
}
