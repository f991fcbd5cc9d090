// src/core/tasks/expiry.rs

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::core::metrics::{CACHE_ENTRIES, EXPIRED_ENTRIES_TOTAL};
use crate::core::storage::ProviderCache;

/// A task that periodically drops expired entries from the provider cache and
/// refreshes the per-namespace entry gauges.
pub struct ExpiryTask {
    cache: Arc<ProviderCache>,
    interval: Duration,
}

impl ExpiryTask {
    pub fn new(cache: Arc<ProviderCache>, interval: Duration) -> Self {
        Self { cache, interval }
    }

    /// The main run loop for the expiry task.
    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        info!("Cache expiry task started.");
        let mut interval = tokio::time::interval(self.interval);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    purge_and_report(&self.cache);
                }
                _ = shutdown_rx.recv() => {
                    info!("Cache expiry task shutting down.");
                    return;
                }
            }
        }
    }
}

/// Runs one purge cycle. Returns the number of entries removed.
pub fn purge_and_report(cache: &ProviderCache) -> usize {
    let purged = cache.purge_expired();
    if purged > 0 {
        EXPIRED_ENTRIES_TOTAL.inc_by(purged as f64);
        info!("Purged {} expired cache entries.", purged);
    } else {
        debug!("Expiry cycle complete. No entries to purge.");
    }

    for (namespace, count) in cache.entry_counts() {
        let label = namespace.to_string();
        CACHE_ENTRIES
            .with_label_values(&[label.as_str()])
            .set(count as f64);
    }
    purged
}
