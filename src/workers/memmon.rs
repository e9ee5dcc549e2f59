//! Memory monitor.
//!
//! Samples the process RSS once a second and toggles the shared low
//! memory flag against the configured limit. Store paths pass the flag
//! through as `lowmem`, which makes the cache run one eviction per
//! freshly inserted bucket until usage falls back under the limit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use sysinfo::{Pid, ProcessRefreshKind, RefreshKind, System};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

pub struct MemoryMonitor {
    shutdown_token: CancellationToken,
    lowmem: Arc<AtomicBool>,
    /// RSS limit in bytes; zero disables monitoring.
    limit: u64,
    interval: Duration,
}

impl MemoryMonitor {
    pub fn new(
        shutdown_token: CancellationToken,
        lowmem: Arc<AtomicBool>,
        limit: u64,
        interval: Duration,
    ) -> MemoryMonitor {
        MemoryMonitor {
            shutdown_token,
            lowmem,
            limit,
            interval,
        }
    }

    /// Runs the sampling loop until shutdown.
    pub async fn run(self) {
        if self.limit == 0 {
            return;
        }
        let pid = Pid::from_u32(std::process::id());
        let refresh =
            RefreshKind::new().with_processes(ProcessRefreshKind::new().with_memory());
        let mut system = System::new_with_specifics(refresh);
        let mut interval = tokio::time::interval(self.interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                _ = self.shutdown_token.cancelled() => break,
                _ = interval.tick() => {}
            }
            system.refresh_processes_specifics(ProcessRefreshKind::new().with_memory());
            let Some(process) = system.process(pid) else {
                continue;
            };
            let rss = process.memory();
            let was_low = self.lowmem.load(Ordering::Relaxed);
            if !was_low && rss > self.limit {
                self.lowmem.store(true, Ordering::Relaxed);
                warn!(
                    component = "memmon",
                    event = "lowmem_on",
                    rss = rss,
                    limit = self.limit,
                    "low memory mode on"
                );
            } else if was_low && rss < self.limit {
                self.lowmem.store(false, Ordering::Relaxed);
                info!(
                    component = "memmon",
                    event = "lowmem_off",
                    rss = rss,
                    limit = self.limit,
                    "low memory mode off"
                );
            }
        }
    }
}
