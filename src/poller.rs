//! Fixed-interval poll loop.
//!
//! One aggregation at startup, then a tick every poll interval: refresh the
//! cache, then hand the fresh aggregate to the snapshot writer and the
//! paper-trading engine as detached tasks. The loop never awaits downstream
//! work, and skipped ticks coalesce instead of piling up behind a slow cycle.

use crate::cache::RateCache;
use crate::paper::PaperEngine;
use crate::store::Store;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info};

pub fn spawn_poll_loop(
    cache: Arc<RateCache>,
    store: Arc<Store>,
    engine: Arc<PaperEngine>,
    interval_secs: u64,
) {
    tokio::spawn(async move {
        info!(interval_secs, "poll loop starting");

        let mut ticker = interval(Duration::from_secs(interval_secs));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            // the first tick completes immediately, giving the startup poll
            ticker.tick().await;

            let agg = cache.refresh().await;
            if agg.spreads.is_empty() {
                info!("aggregate empty this tick (primary venue down?)");
            }

            let writer_store = Arc::clone(&store);
            let writer_agg = Arc::clone(&agg);
            tokio::spawn(async move {
                match writer_store.save_rates(&writer_agg.all_rates).await {
                    Ok(count) => tracing::debug!(count, "rate batch persisted"),
                    Err(e) => error!(error = %e, "rate persistence failed"),
                }
            });

            let cycle_engine = Arc::clone(&engine);
            let cycle_agg = Arc::clone(&agg);
            tokio::spawn(async move {
                cycle_engine.run_all(&cycle_agg).await;
            });
        }
    });
}
