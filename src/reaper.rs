use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;

/// One pass of the expiry sweep. Returns how many bookings were cancelled.
pub async fn sweep_expired(engine: &Engine) -> usize {
    let now = engine.now();
    let mut cancelled = 0;
    for id in engine.collect_expired_pending(now).await {
        match engine.expire(id).await {
            Ok(_) => {
                info!(%id, "cancelled expired booking");
                cancelled += 1;
            }
            // An operator got there first.
            Err(e) => debug!(%id, "expiry sweep skip: {e}"),
        }
    }
    cancelled
}

/// Opt-in background task that cancels pending bookings past their
/// deadline. Without it, expiry only changes the display status.
pub async fn run_expiry_sweeper(engine: Arc<Engine>, every: Duration) {
    let mut interval = tokio::time::interval(every);
    loop {
        interval.tick().await;
        sweep_expired(&engine).await;
    }
}

/// Compact the journal once enough appends have piled up.
pub async fn compact_if_needed(engine: &Engine, threshold: u64) -> bool {
    let appends = engine.wal_appends_since_compact().await;
    if appends < threshold {
        return false;
    }
    match engine.compact_wal().await {
        Ok(()) => {
            info!(appends, "journal compacted past threshold");
            true
        }
        Err(e) => {
            warn!("journal compaction failed: {e}");
            false
        }
    }
}

pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        compact_if_needed(&engine, threshold).await;
    }
}
