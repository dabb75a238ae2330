//! Signaling relay binary

use clap::Parser;
use signaling_relay::{Config, run};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("signaling_relay=info")),
        )
        .init();

    run(Config::parse()).await
}
