use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use crate::engine::Engine;

/// Background task that rewrites the WAL as a minimal snapshot of live state
/// once enough appends have accumulated since the last compaction.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(30));
    loop {
        interval.tick().await;
        let pending = engine.wal_appends_since_compact().await;
        if pending < threshold {
            debug!("compactor idle: {pending}/{threshold} appends");
            continue;
        }
        match engine.compact_wal().await {
            Ok(()) => info!("compacted WAL after {pending} appends"),
            Err(e) => warn!("WAL compaction failed: {e}"),
        }
    }
}
