//! Shard: one lockable unit of the cache.

use std::cell::UnsafeCell;

use super::lock::ShardLock;
use super::map::Map;

/// Everything behind the shard lock.
pub(crate) struct ShardState {
    /// Compare-and-swap counter, strictly increasing per shard.
    pub(crate) cas: u64,
    /// Entries whose access time predates this are logically absent.
    pub(crate) clear_time: i64,
    /// Map-live buckets already counted out by a clear.
    pub(crate) clear_count: usize,
    pub(crate) map: Map,
}

pub(crate) struct Shard {
    pub(crate) lock: ShardLock,
    state: UnsafeCell<ShardState>,
}

// The UnsafeCell is only reached through the shard lock protocol.
unsafe impl Sync for Shard {}
unsafe impl Send for Shard {}

impl Shard {
    pub(crate) fn new(cap: usize, loadfactor: f64) -> Shard {
        Shard {
            lock: ShardLock::new(),
            state: UnsafeCell::new(ShardState {
                cas: 1,
                clear_time: 0,
                clear_count: 0,
                map: Map::new(cap, loadfactor),
            }),
        }
    }

    /// Mutable access to the shard state.
    ///
    /// SAFETY: the caller must hold this shard's lock (exclusive or via a
    /// batch token) for the lifetime of the returned borrow.
    #[allow(clippy::mut_from_ref)]
    pub(crate) unsafe fn state_mut(&self) -> &mut ShardState {
        &mut *self.state.get()
    }
}

impl ShardState {
    /// Live entries: map occupancy minus buckets voided by a clear.
    pub(crate) fn live_count(&self) -> usize {
        self.map.count - self.clear_count
    }
}
