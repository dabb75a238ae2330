//! Command-line and environment configuration

use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

/// WebRTC signaling relay
#[derive(Parser, Debug, Clone)]
#[command(name = "signaling-relay")]
#[command(about = "Relays WebRTC signaling between hardware devices and parent apps")]
pub struct Config {
    /// Port to listen on
    #[arg(short, long, env = "PORT", default_value_t = 8080)]
    pub port: u16,

    /// Address to bind to
    #[arg(long, env = "HOST", default_value = "0.0.0.0")]
    pub host: IpAddr,

    /// Seconds between liveness sweeps
    #[arg(
        long,
        env = "SWEEP_INTERVAL_SECS",
        default_value_t = 60,
        value_parser = clap::value_parser!(u64).range(1..)
    )]
    pub sweep_interval_secs: u64,
}

impl Config {
    /// Socket address to bind the listener to
    pub fn addr(&self) -> SocketAddr {
        SocketAddr::new(self.host, self.port)
    }

    /// Period of the liveness sweep
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_secs(self.sweep_interval_secs)
    }
}
