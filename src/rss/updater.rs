//! Background feed updater.
//!
//! Runs a reconciliation pass on a fixed interval.

use tokio::task::JoinHandle;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{error, info};

use crate::rss::reconciler::Reconciler;

/// Default pass interval in seconds (5 minutes).
pub const DEFAULT_UPDATE_INTERVAL_SECS: u64 = 300;

/// Periodic reconciliation driver.
pub struct RssUpdater {
    reconciler: Reconciler,
    update_interval: Duration,
}

impl RssUpdater {
    /// Create a new updater with the default interval.
    pub fn new(reconciler: Reconciler) -> Self {
        Self {
            reconciler,
            update_interval: Duration::from_secs(DEFAULT_UPDATE_INTERVAL_SECS),
        }
    }

    /// Create a new updater with a custom interval.
    pub fn with_interval(reconciler: Reconciler, interval_secs: u64) -> Self {
        Self {
            reconciler,
            update_interval: Duration::from_secs(interval_secs),
        }
    }

    /// Run the updater loop.
    ///
    /// The first pass starts immediately. A pass that overruns the interval
    /// delays the next one instead of triggering a burst.
    pub async fn run(&self) {
        info!(
            "RSS updater started (interval: {} seconds)",
            self.update_interval.as_secs()
        );

        let mut timer = interval(self.update_interval);
        timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            timer.tick().await;
            if let Err(e) = self.reconciler.run_pass().await {
                error!("Reconciliation pass failed: {}", e);
            }
        }
    }
}

/// Spawn the updater as a background task.
pub fn start_rss_updater(reconciler: Reconciler, interval_secs: u64) -> JoinHandle<()> {
    let updater = RssUpdater::with_interval(reconciler, interval_secs);
    tokio::spawn(async move {
        updater.run().await;
    })
}
