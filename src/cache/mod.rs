//! Sharded caching engine: flat entry blocks in Robin-Hood tables behind
//! per-shard spinlocks, with batches for multi-op isolation.

pub mod batch;
#[allow(clippy::module_inception)]
pub mod cache;
pub mod entry;
pub mod lock;
pub mod map;
pub mod shard;
pub mod sixpack;

#[cfg(test)]
mod cache_test;
#[cfg(test)]
mod entry_test;

// Re-export the public surface
pub use batch::Batch;
pub use cache::{
    Cache, ClearOptions, CountOptions, DeleteOptions, EvictedFn, IterAction, IterOptions,
    LoadOptions, Options, SizeOptions, Status, StoreOptions, SweepOptions, SweepPollOptions,
    Update, HOUR, MICROSECOND, MILLISECOND, MINUTE, NANOSECOND, SECOND,
};
pub use entry::{EntryView, EvictReason};
