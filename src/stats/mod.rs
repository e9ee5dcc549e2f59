//! Server counters.
//!
//! Hot-path counters accumulate per connection and fold into the global
//! relaxed atomics at flush boundaries, so command handling never touches
//! shared cache lines.

use std::sync::atomic::{AtomicU64, Ordering};

/// Global counters, folded into from per-connection deltas.
#[derive(Default)]
pub struct Stats {
    pub cmd_get: AtomicU64,
    pub cmd_set: AtomicU64,
    pub get_hits: AtomicU64,
    pub get_misses: AtomicU64,
    pub delete_hits: AtomicU64,
    pub delete_misses: AtomicU64,
    pub auth_cmds: AtomicU64,
    pub auth_errors: AtomicU64,
    pub store_no_memory: AtomicU64,
    /// Entries evicted for any reason.
    pub evictions: AtomicU64,
    /// Currently open connections.
    pub conns: AtomicU64,
    /// Connections ever accepted.
    pub total_conns: AtomicU64,
}

impl Stats {
    pub fn conn_opened(&self) {
        self.conns.fetch_add(1, Ordering::Relaxed);
        self.total_conns.fetch_add(1, Ordering::Relaxed);
    }

    pub fn conn_closed(&self) {
        self.conns.fetch_sub(1, Ordering::Relaxed);
    }
}

/// Per-connection counter deltas.
#[derive(Default)]
pub struct ConnStats {
    pub cmd_get: u64,
    pub cmd_set: u64,
    pub get_hits: u64,
    pub get_misses: u64,
    pub delete_hits: u64,
    pub delete_misses: u64,
    pub auth_cmds: u64,
    pub auth_errors: u64,
    pub store_no_memory: u64,
}

impl ConnStats {
    /// Folds the deltas into the globals and resets them.
    pub fn fold_into(&mut self, stats: &Stats) {
        fn add(global: &AtomicU64, local: &mut u64) {
            if *local > 0 {
                global.fetch_add(*local, Ordering::Relaxed);
                *local = 0;
            }
        }
        add(&stats.cmd_get, &mut self.cmd_get);
        add(&stats.cmd_set, &mut self.cmd_set);
        add(&stats.get_hits, &mut self.get_hits);
        add(&stats.get_misses, &mut self.get_misses);
        add(&stats.delete_hits, &mut self.delete_hits);
        add(&stats.delete_misses, &mut self.delete_misses);
        add(&stats.auth_cmds, &mut self.auth_cmds);
        add(&stats.auth_errors, &mut self.auth_errors);
        add(&stats.store_no_memory, &mut self.store_no_memory);
    }
}
