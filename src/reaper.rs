use std::sync::Arc;
use std::time::Duration;

use tracing::info;

use crate::engine::{today, Engine};

/// Background task that retires day registers once they fall behind the
/// retention horizon. The WAL keeps their events until the next compaction,
/// so a crash in between just means the reaper retires them again.
pub async fn run_reaper(engine: Arc<Engine>, retention_days: i64) {
    let mut interval = tokio::time::interval(Duration::from_secs(3600));
    loop {
        interval.tick().await;
        let stale = engine.collect_stale_days(today(), retention_days);
        for date in stale {
            engine.drop_day(date).await;
            info!("retired day register {date}");
        }
    }
}

/// Background task that compacts the WAL once enough appends accumulate.
pub async fn run_compactor(engine: Arc<Engine>, threshold: u64) {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    loop {
        interval.tick().await;
        if engine.wal_appends_since_compact().await >= threshold {
            match engine.compact_wal().await {
                Ok(()) => info!("WAL compacted"),
                Err(e) => tracing::warn!("WAL compaction failed: {e}"),
            }
        }
    }
}
