use crate::app::{CheckoutOrchestrator, SweepReport};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::error;

/// Runs a single recovery sweep; failures are logged and swallowed.
pub async fn sweep_once(checkout: &CheckoutOrchestrator) -> Option<SweepReport> {
    match checkout.sweep().await {
        Ok(report) => Some(report),
        Err(e) => {
            error!("Recovery sweep failed: {}", e);
            None
        }
    }
}

/// Spawns the periodic sweep that finishes paid orders, reconciles stalled
/// payment requests and expires abandoned pending orders.
pub fn spawn_recovery_sweep(checkout: Arc<CheckoutOrchestrator>, every: Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // First tick completes immediately
        ticker.tick().await;
        loop {
            ticker.tick().await;
            sweep_once(&checkout).await;
        }
    })
}
