//! Shard spinlock.
//!
//! A pointer-sized atomic with three states: `FREE`, `EXCLUSIVE` (held by
//! a single-op caller), and any other value, which is the token of the
//! batch holding it. Batch acquisition is re-entrant for the same token;
//! batches release every shard they hold at end-of-batch.

use std::hint;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

pub(crate) const FREE: usize = 0;
pub(crate) const EXCLUSIVE: usize = usize::MAX;

/// Spins this many times before yielding the thread.
const SPINS_BEFORE_YIELD: usize = 64;

static NEXT_TOKEN: AtomicUsize = AtomicUsize::new(1);

/// Allocates a fresh batch token, never `FREE` or `EXCLUSIVE`.
pub(crate) fn next_token() -> usize {
    loop {
        let token = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
        if token != FREE && token != EXCLUSIVE {
            return token;
        }
    }
}

pub(crate) struct ShardLock(AtomicUsize);

impl ShardLock {
    pub(crate) fn new() -> ShardLock {
        ShardLock(AtomicUsize::new(FREE))
    }

    /// Acquires for a batch. Returns `true` when the lock was newly taken
    /// and `false` when this batch already holds it.
    pub(crate) fn acquire_batch(&self, token: usize) -> bool {
        let mut spins = 0;
        loop {
            match self
                .0
                .compare_exchange_weak(FREE, token, Ordering::Acquire, Ordering::Relaxed)
            {
                Ok(_) => return true,
                Err(held) if held == token => return false,
                Err(_) => {
                    spins += 1;
                    if spins < SPINS_BEFORE_YIELD {
                        hint::spin_loop();
                    } else {
                        spins = 0;
                        thread::yield_now();
                    }
                }
            }
        }
    }

    /// Acquires exclusively for a single operation.
    pub(crate) fn acquire_exclusive(&self) {
        let mut spins = 0;
        while self
            .0
            .compare_exchange_weak(FREE, EXCLUSIVE, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            spins += 1;
            if spins < SPINS_BEFORE_YIELD {
                hint::spin_loop();
            } else {
                spins = 0;
                thread::yield_now();
            }
        }
    }

    pub(crate) fn release(&self) {
        self.0.store(FREE, Ordering::Release);
    }
}
