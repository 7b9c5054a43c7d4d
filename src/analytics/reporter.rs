use std::sync::Arc;
use std::time::Duration;

use tokio::time::{interval, MissedTickBehavior};
use tracing::debug;

use crate::protection::anti_clone::AccessMonitor;
use crate::protection::rate_limiter::RateLimiter;

/// How often expired rate windows and old access history are pruned.
const CLEANUP_INTERVAL: Duration = Duration::from_secs(60);

/// Periodic housekeeping for the request gate: prunes access history and
/// elapsed rate windows, and writes the aggregate access report.
pub struct AccessReporter {
    monitor: Arc<AccessMonitor>,
    rate_limiter: Arc<RateLimiter>,
    report_interval: Duration,
}

impl AccessReporter {
    pub fn new(
        monitor: Arc<AccessMonitor>,
        rate_limiter: Arc<RateLimiter>,
        report_interval_secs: u64,
    ) -> Self {
        Self {
            monitor,
            rate_limiter,
            report_interval: Duration::from_secs(report_interval_secs.max(1)),
        }
    }

    /// Run the reporter loop forever.
    pub async fn run(&self) {
        let mut cleanup_interval = interval(CLEANUP_INTERVAL);
        cleanup_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut report_interval = interval(self.report_interval);
        report_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // The first tick fires immediately; skip it so the first report
        // covers a full interval.
        report_interval.tick().await;

        loop {
            tokio::select! {
                _ = cleanup_interval.tick() => {
                    self.cleanup();
                }

                _ = report_interval.tick() => {
                    self.monitor.cleanup();
                    self.monitor.report();
                }
            }
        }
    }

    fn cleanup(&self) {
        let windows = self.rate_limiter.cleanup();
        let ips = self.monitor.cleanup();
        if windows > 0 || ips > 0 {
            debug!(rate_windows = windows, idle_ips = ips, "Gate state pruned");
        }
    }
}
