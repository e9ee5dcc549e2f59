//! Sweeper.
//!
//! Once a second a random shard is polled for its dead-entry fraction.
//! When enough of the sample is dead a full sweep reclaims expired and
//! cleared entries eagerly instead of waiting for per-key traffic to
//! trip over them.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cache::{Cache, SweepOptions, SweepPollOptions};

pub struct Sweeper {
    shutdown_token: CancellationToken,
    cache: Arc<Cache>,
    interval: Duration,
    /// Dead fraction that triggers a full sweep.
    threshold: f64,
}

impl Sweeper {
    pub fn new(
        shutdown_token: CancellationToken,
        cache: Arc<Cache>,
        interval: Duration,
        threshold: f64,
    ) -> Sweeper {
        Sweeper {
            shutdown_token,
            cache,
            interval,
            threshold,
        }
    }

    /// Runs the poll loop until shutdown.
    pub async fn run(self) {
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = self.shutdown_token.cancelled() => break,
                _ = interval.tick() => {}
            }
            let fraction = self.cache.sweep_poll(&SweepPollOptions::default());
            if fraction < self.threshold {
                continue;
            }
            let cache = self.cache.clone();
            let result =
                tokio::task::spawn_blocking(move || cache.sweep(&SweepOptions::default())).await;
            if let Ok((swept, kept)) = result {
                debug!(
                    component = "sweeper",
                    event = "sweep_done",
                    swept = swept,
                    kept = kept,
                    "sweep finished"
                );
            }
        }
    }
}
