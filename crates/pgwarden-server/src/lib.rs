// ABOUTME: Webhook listener for pgwarden, letting external schedulers trigger backups and dumps over HTTP.
// ABOUTME: Handlers re-invoke the pgwarden binary's own subcommands through a launcher trait.

pub mod api;
pub mod app_state;
pub mod launcher;
pub mod routes;

use std::future::Future;
use std::net::SocketAddr;

use tracing::info;

pub use app_state::{AppState, SharedState};
pub use launcher::{CommandLauncher, LaunchError, SelfLauncher};
pub use routes::create_router;

/// Bind `addr` and serve the webhook routes until `shutdown` resolves.
pub async fn serve<F>(addr: SocketAddr, state: SharedState, shutdown: F) -> std::io::Result<()>
where
    F: Future<Output = ()> + Send + 'static,
{
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(%addr, "webhook listener started");
    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown)
        .await?;
    info!("webhook listener stopped");
    Ok(())
}
