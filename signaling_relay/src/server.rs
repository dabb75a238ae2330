//! Binding and serving the relay

use crate::config::Config;
use crate::handler::router;
use crate::state::ServerState;
use crate::sweep::spawn_sweeper;
use std::future::Future;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{info, warn};

/// Serve the relay on an already bound listener until `shutdown` resolves
pub async fn serve(
    listener: TcpListener,
    state: ServerState,
    sweep_interval: Duration,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    let sweeper = spawn_sweeper(state.clone(), sweep_interval);
    let result = axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown)
        .await;
    sweeper.abort();
    result
}

/// Bind to the configured address and serve until Ctrl-C
pub async fn run(config: Config) -> anyhow::Result<()> {
    let listener = TcpListener::bind(config.addr()).await?;
    let addr = listener.local_addr()?;
    info!("signaling relay listening on ws://{addr}");
    info!("health check: http://{addr}/health");
    info!("statistics: http://{addr}/stats");

    serve(
        listener,
        ServerState::new(),
        config.sweep_interval(),
        shutdown_signal(),
    )
    .await?;
    info!("signaling relay stopped");
    Ok(())
}

async fn shutdown_signal() {
    match tokio::signal::ctrl_c().await {
        Ok(()) => info!("shutdown requested"),
        Err(e) => {
            warn!("cannot listen for Ctrl-C, running until killed: {e}");
            std::future::pending::<()>().await;
        }
    }
}
