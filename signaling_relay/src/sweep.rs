//! Periodic eviction of connections whose close was never observed

use crate::state::ServerState;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info};

/// Default period between sweeps
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Spawn a task running [`ServerState::sweep_closed`] every `period`
pub fn spawn_sweeper(state: ServerState, period: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick completes immediately.
        ticker.tick().await;
        loop {
            ticker.tick().await;
            match state.sweep_closed() {
                0 => debug!("liveness sweep found nothing to evict"),
                evicted => info!(evicted, "liveness sweep evicted closed connections"),
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::ClientType;
    use tokio::sync::mpsc;

    #[tokio::test(start_paused = true)]
    async fn evicts_closed_clients_each_period() {
        let state = ServerState::new();
        let (tx, rx) = mpsc::unbounded_channel();
        let device = state.add_client(tx);
        state
            .register(&device, ClientType::HardwareDevice, "D1".into())
            .unwrap();
        drop(rx);

        let sweeper = spawn_sweeper(state.clone(), Duration::from_secs(60));

        tokio::time::sleep(Duration::from_secs(30)).await;
        assert_eq!(state.client_count(), 1);
        assert_eq!(state.room_count(), 1);

        tokio::time::sleep(Duration::from_secs(31)).await;
        tokio::task::yield_now().await;
        assert_eq!(state.client_count(), 0);
        assert_eq!(state.room_count(), 0);

        sweeper.abort();
    }
}
