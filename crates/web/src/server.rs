//! Status API server

use crate::routes::status_router;
use meshwatch_common::MeshProvider;
use std::future::Future;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::info;

/// Bind `addr` and serve until `shutdown` resolves
pub async fn serve<F>(
    addr: SocketAddr,
    provider: Arc<dyn MeshProvider>,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = TcpListener::bind(addr).await?;
    serve_listener(listener, provider, shutdown).await
}

/// Serve on an already bound listener.
///
/// Once `shutdown` resolves no new connections are accepted; in-flight
/// requests run to completion before this returns.
pub async fn serve_listener<F>(
    listener: TcpListener,
    provider: Arc<dyn MeshProvider>,
    shutdown: F,
) -> anyhow::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    info!("Starting HTTP server on {}", listener.local_addr()?);

    axum::serve(listener, status_router(provider))
        .with_graceful_shutdown(shutdown)
        .await?;

    info!("HTTP server stopped");
    Ok(())
}
