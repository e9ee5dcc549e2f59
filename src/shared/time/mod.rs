//! Cached clock to keep timestamp reads off the syscall path.

use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use tokio_util::sync::CancellationToken;

static NOW_NANOS: AtomicI64 = AtomicI64::new(0);

fn clock_nanos() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or(Duration::ZERO)
        .as_nanos() as i64
}

/// Starts the clock ticker.
/// Refreshes the cached timestamp at the given resolution until the
/// returned token is cancelled.
pub fn start(resolution: Duration) -> CancellationToken {
    NOW_NANOS.store(clock_nanos(), Ordering::Relaxed);

    let token = CancellationToken::new();
    let token_clone = token.clone();

    tokio::task::spawn(async move {
        let mut interval = tokio::time::interval(resolution);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    NOW_NANOS.store(clock_nanos(), Ordering::Relaxed);
                }
                _ = token_clone.cancelled() => {
                    break;
                }
            }
        }
    });

    token
}

/// Returns the current time in Unix nanoseconds.
/// Reads the cached value when the ticker is running, otherwise falls
/// back to a direct clock read.
pub fn now_nanos() -> i64 {
    let cached = NOW_NANOS.load(Ordering::Relaxed);
    if cached != 0 {
        cached
    } else {
        clock_nanos()
    }
}

/// Returns the seconds elapsed since the given Unix-nanosecond timestamp.
pub fn secs_since(nanos: i64) -> i64 {
    (now_nanos() - nanos) / 1_000_000_000
}
