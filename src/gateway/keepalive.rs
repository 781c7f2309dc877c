//! Keepalive Scheduler
//!
//! Pings the remote endpoint on a fixed interval. An IO failure is fatal
//! immediately; timeouts are tolerated until `threshold` of them happen in a
//! row. Either way `on_failure` runs once and the task stops.
//!
//! Dropping the `KeepaliveTask` aborts the ping loop, so no ping can be
//! issued after the owning connection is torn down.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use super::remote::RemoteEndpoint;
use crate::ssh::PingResult;

pub struct KeepaliveTask {
    task: JoinHandle<()>,
}

impl KeepaliveTask {
    /// Start probing. Returns `None` when `interval` is zero (keepalive disabled).
    pub fn spawn<F>(
        endpoint: Arc<dyn RemoteEndpoint>,
        interval: Duration,
        threshold: u32,
        label: String,
        on_failure: F,
    ) -> Option<Self>
    where
        F: FnOnce(String) + Send + 'static,
    {
        if interval.is_zero() {
            debug!("Keepalive disabled for {}", label);
            return None;
        }
        let threshold = threshold.max(1);

        let task = tokio::spawn(async move {
            info!(
                "Keepalive started for {} (interval={:?}, threshold={})",
                label, interval, threshold
            );
            let mut ticker = interval_at(Instant::now() + interval, interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            let mut failures = 0u32;

            let reason = loop {
                ticker.tick().await;

                match endpoint.ping().await {
                    PingResult::Ok => {
                        if failures > 0 {
                            debug!("Keepalive recovered for {}", label);
                        }
                        failures = 0;
                    }
                    PingResult::IoError => {
                        error!("Keepalive IO error on {}", label);
                        break "Keepalive failed: connection lost".to_string();
                    }
                    PingResult::Timeout => {
                        failures += 1;
                        warn!(
                            "Keepalive timeout on {} ({}/{})",
                            label, failures, threshold
                        );
                        if failures >= threshold {
                            break format!(
                                "Keepalive failed: no response after {} attempts",
                                failures
                            );
                        }
                    }
                }
            };

            on_failure(reason);
        });

        Some(Self { task })
    }
}

impl Drop for KeepaliveTask {
    fn drop(&mut self) {
        self.task.abort();
    }
}
