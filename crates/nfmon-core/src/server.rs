//! HTTP serving shared by the collectors, the sampler, the prober and the admin API

use axum::Router;
use std::future::IntoFuture;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Bind a listener, so that port conflicts surface before any task is spawned
pub async fn bind(host: IpAddr, port: u16) -> io::Result<TcpListener> {
    TcpListener::bind(SocketAddr::new(host, port)).await
}

/// Serve `router` until `token` is cancelled
///
/// In-flight requests get `grace` to finish after cancellation; the server is
/// dropped once the grace period elapses.
pub async fn serve_until_cancelled(
    listener: TcpListener,
    router: Router,
    token: CancellationToken,
    grace: Duration,
    name: &str,
) -> io::Result<()> {
    let shutdown = token.clone();
    let server = axum::serve(listener, router)
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .into_future();
    tokio::pin!(server);

    tokio::select! {
        result = &mut server => return result,
        _ = token.cancelled() => {}
    }

    match tokio::time::timeout(grace, server).await {
        Ok(result) => {
            debug!(server = %name, "Server drained");
            result
        }
        Err(_) => {
            warn!(
                server = %name,
                grace_ms = grace.as_millis() as u64,
                "Server did not drain within grace period, dropping connections"
            );
            Ok(())
        }
    }
}
