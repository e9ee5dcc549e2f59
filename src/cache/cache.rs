//! The caching engine: a fixed array of independent shards, each holding a
//! Robin-Hood table of flat entry blocks behind a spinlock.
//!
//! Every operation addresses one shard: the high half of the 64-bit key
//! hash selects the shard, the low half is the map hash. Single operations
//! lock the shard exclusively for their duration; a [`Batch`] locks shards
//! as it touches them and releases them all at the end, giving atomic
//! read-modify-write per key and cross-shard isolation.

use std::sync::Arc;

use xxhash_rust::xxh3::xxh3_64_with_seed;

use crate::rand;
use crate::time;

use super::batch::Batch;
use super::entry::{add_clamp, EntryBlock, EntryView, EvictReason};
use super::map::{clip_hash, Insert, INIT_CAP};
use super::shard::{Shard, ShardState};

/// Nanoseconds per unit, for ttl and expiration math.
pub const NANOSECOND: i64 = 1;
pub const MICROSECOND: i64 = 1_000;
pub const MILLISECOND: i64 = 1_000_000;
pub const SECOND: i64 = 1_000_000_000;
pub const MINUTE: i64 = 60 * SECOND;
pub const HOUR: i64 = 60 * MINUTE;

const DEF_SHARDS: usize = 4096;
const DEF_LOADFACTOR: u8 = 75;
const MIN_LOADFACTOR: u8 = 55;
const MAX_LOADFACTOR: u8 = 95;
const DEF_POLLSIZE: usize = 20;

/// Outcome of a cache operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// A new entry was inserted.
    Inserted,
    /// An existing entry was replaced.
    Replaced,
    /// The entry exists; the operation declined to replace it (cas/nx).
    Found,
    /// No such entry.
    NotFound,
    /// The entry was deleted.
    Deleted,
    /// A scan visited every bucket.
    Finished,
    /// The operation was canceled by a callback or stopped early.
    Canceled,
    /// Out of memory.
    NoMem,
}

/// Eviction notifier, invoked under the shard lock. Must not re-enter the
/// cache on the same shard.
pub type EvictedFn = Arc<dyn Fn(EvictReason, &EntryView<'_>) + Send + Sync>;

/// Cache construction options.
#[derive(Default)]
pub struct Options {
    /// Number of shards, default 4096.
    pub nshards: usize,
    /// Map load factor percent, default 75, clamped to 55..=95.
    pub loadfactor: u8,
    /// Hash seed.
    pub seed: u64,
    /// Enable the compare-and-swap tag on entries.
    pub usecas: bool,
    /// Disable sixpack key compression.
    pub nosixpack: bool,
    /// Disable all eviction.
    pub noevict: bool,
    /// Allow map shrinking after deletes.
    pub allowshrink: bool,
    /// Eviction notifier.
    pub evicted: Option<EvictedFn>,
}

#[derive(Default, Clone)]
pub struct StoreOptions {
    /// Operation time; zero means read the clock.
    pub time: i64,
    /// Absolute expiration in nanoseconds; zero means no expiration.
    pub expires: i64,
    /// Time-to-live in nanoseconds; used when `expires` is zero.
    pub ttl: i64,
    /// Expected tag for the cas operation.
    pub cas: u64,
    /// Opaque client flags.
    pub flags: u32,
    /// Inherit the existing entry's expiration when it is still alive.
    pub keepttl: bool,
    /// Perform the compare-and-swap operation.
    pub casop: bool,
    /// Only store when the key is absent.
    pub nx: bool,
    /// Only store when the key is present.
    pub xx: bool,
    /// The system is low on memory; run one auto-eviction per fresh insert.
    pub lowmem: bool,
}

#[derive(Default, Clone)]
pub struct LoadOptions {
    pub time: i64,
    /// Do not refresh the entry access time.
    pub notouch: bool,
}

#[derive(Default, Clone)]
pub struct DeleteOptions {
    pub time: i64,
}

#[derive(Default, Clone)]
pub struct IterOptions {
    pub time: i64,
    /// Restrict to one shard index.
    pub oneshard: Option<usize>,
}

#[derive(Default, Clone)]
pub struct SweepOptions {
    pub time: i64,
    pub oneshard: Option<usize>,
}

#[derive(Default, Clone)]
pub struct ClearOptions {
    pub time: i64,
    pub oneshard: Option<usize>,
}

#[derive(Default, Clone)]
pub struct CountOptions {
    pub oneshard: Option<usize>,
}

#[derive(Default, Clone)]
pub struct SizeOptions {
    pub oneshard: Option<usize>,
    /// Omit the structural overhead, count entry blocks only.
    pub entries_only: bool,
}

#[derive(Default, Clone)]
pub struct SweepPollOptions {
    pub time: i64,
    /// Buckets to sample, default 20.
    pub pollsize: usize,
}

/// Replacement requested by a load callback.
pub struct Update {
    pub value: Vec<u8>,
    pub flags: u32,
    pub expires: i64,
}

/// What an iteration callback wants next.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IterAction {
    Continue,
    Stop,
    Delete,
    DeleteStop,
}

pub(crate) type StoreGuard<'x> = &'x mut dyn FnMut(&EntryView<'_>) -> bool;
pub(crate) type LoadRead<'x> = &'x mut dyn FnMut(&EntryView<'_>) -> Option<Update>;
pub(crate) type IterVisit<'x> = &'x mut dyn FnMut(&EntryView<'_>) -> IterAction;

pub struct Cache {
    usecas: bool,
    nosixpack: bool,
    noevict: bool,
    allowshrink: bool,
    seed: u64,
    evicted: Option<EvictedFn>,
    pub(crate) shards: Vec<Shard>,
}

impl Cache {
    /// Builds a new cache. See [`Options`] for all knobs.
    pub fn new(opts: Options) -> Cache {
        let nshards = if opts.nshards == 0 {
            DEF_SHARDS
        } else {
            opts.nshards
        };
        let loadfactor = if opts.loadfactor == 0 {
            DEF_LOADFACTOR
        } else {
            opts.loadfactor.clamp(MIN_LOADFACTOR, MAX_LOADFACTOR)
        };
        let lf = loadfactor as f64 / 100.0;
        let shards = (0..nshards).map(|_| Shard::new(INIT_CAP, lf)).collect();
        Cache {
            usecas: opts.usecas,
            nosixpack: opts.nosixpack,
            noevict: opts.noevict,
            allowshrink: opts.allowshrink,
            seed: opts.seed,
            evicted: opts.evicted,
            shards,
        }
    }

    /// Number of shards.
    pub fn nshards(&self) -> usize {
        self.shards.len()
    }

    /// Begins a batch bound to this cache. Shards lock as the batch
    /// touches them and release when the batch ends (or drops).
    pub fn begin(&self) -> Batch<'_> {
        Batch::new(self)
    }

    fn hash64(&self, key: &[u8]) -> u64 {
        xxh3_64_with_seed(key, self.seed)
    }

    fn shard_index(&self, hash: u64) -> usize {
        ((hash >> 32) as usize) % self.shards.len()
    }

    /// Runs `f` on the shard state with the shard locked. A batch keeps
    /// the lock until it ends; a single op releases before returning.
    pub(crate) fn with_shard<R>(
        &self,
        idx: usize,
        batch: Option<&mut Batch<'_>>,
        f: impl FnOnce(&Cache, &mut ShardState) -> R,
    ) -> R {
        let usebatch = match batch {
            Some(b) => {
                if self.shards[idx].lock.acquire_batch(b.token()) {
                    b.push_locked(idx);
                }
                true
            }
            None => {
                self.shards[idx].lock.acquire_exclusive();
                false
            }
        };
        // SAFETY: the shard lock is held for the duration of `f`.
        let state = unsafe { self.shards[idx].state_mut() };
        let r = f(self, state);
        if !usebatch {
            self.shards[idx].lock.release();
        }
        r
    }

    fn notify_evicted(&self, shard: usize, reason: EvictReason, now: i64, entry: &EntryBlock) {
        if let Some(evicted) = &self.evicted {
            evicted(reason, &entry.view(shard, now));
        }
    }

    /// Removes the entry at `bucket`, firing the eviction notifier.
    fn evict_at(
        &self,
        state: &mut ShardState,
        shard: usize,
        bucket: usize,
        reason: EvictReason,
        now: i64,
    ) {
        let entry = state.map.remove_at(bucket);
        self.notify_evicted(shard, reason, now, &entry);
        if reason == EvictReason::Cleared {
            state.clear_count -= 1;
        }
    }

    /// 2-random eviction: scan forward from the insert position for up to
    /// two live candidates whose stored hash differs from the incoming
    /// key's, then evict the one with the older access time. A dead entry
    /// found along the way is evicted instead, immediately.
    fn auto_evict(&self, state: &mut ShardState, shard: usize, hash: u32, now: i64) {
        let hash = clip_hash(hash);
        let n = state.map.nbuckets();
        let mut cand = [0usize; 2];
        let mut cand_time = [0i64; 2];
        let mut count = 0;
        let mut i = 1;
        while i < n && count < 2 {
            let j = (i + hash as usize) & (n - 1);
            let (reason, bucket_hash, entry_time) = {
                match &state.map.buckets[j].entry {
                    None => {
                        i += 1;
                        continue;
                    }
                    Some(entry) => (
                        entry.alive(now, state.clear_time),
                        state.map.buckets[j].hash,
                        entry.time(),
                    ),
                }
            };
            if let Some(reason) = reason {
                self.evict_at(state, shard, j, reason, now);
                return;
            }
            if bucket_hash == hash {
                i += 1;
                continue;
            }
            cand[count] = j;
            cand_time[count] = entry_time;
            count += 1;
            i += 1;
        }
        let choose = match count {
            0 => return,
            1 => 0,
            _ => usize::from(cand_time[0] >= cand_time[1]),
        };
        self.evict_at(state, shard, cand[choose], EvictReason::LowMem, now);
    }

    fn op_now(time: i64) -> i64 {
        if time > 0 {
            time
        } else {
            time::now_nanos()
        }
    }

    // ---- store ----------------------------------------------------------

    /// Inserts or replaces an entry.
    pub fn store(&self, key: &[u8], value: &[u8], opts: &StoreOptions) -> Status {
        self.store_impl(None, key, value, opts, None)
    }

    /// Like [`Cache::store`], with a pre-replace guard: the guard sees the
    /// existing entry and may return `false` to keep it (`Canceled`).
    pub fn store_with<F>(&self, key: &[u8], value: &[u8], opts: &StoreOptions, mut guard: F) -> Status
    where
        F: FnMut(&EntryView<'_>) -> bool,
    {
        self.store_impl(None, key, value, opts, Some(&mut guard))
    }

    pub(crate) fn store_impl(
        &self,
        batch: Option<&mut Batch<'_>>,
        key: &[u8],
        value: &[u8],
        opts: &StoreOptions,
        guard: Option<StoreGuard<'_>>,
    ) -> Status {
        let hash = self.hash64(key);
        let idx = self.shard_index(hash);
        self.with_shard(idx, batch, |cache, state| {
            cache.store_op(state, idx, key, value, hash as u32, opts, guard)
        })
    }

    fn store_op(
        &self,
        state: &mut ShardState,
        shard: usize,
        key: &[u8],
        value: &[u8],
        hash: u32,
        opts: &StoreOptions,
        mut guard: Option<StoreGuard<'_>>,
    ) -> Status {
        let count_before = state.map.count;
        let now = Self::op_now(opts.time);
        let mut expires = if opts.expires > 0 {
            opts.expires
        } else if opts.ttl > 0 {
            add_clamp(now, opts.ttl)
        } else {
            0
        };
        if opts.keepttl {
            if let Some(old) = state.map.get_entry(key, clip_hash(hash)) {
                if old.alive(now, state.clear_time).is_none() {
                    expires = old.expires();
                }
            }
        }
        state.cas += 1;
        let mut entry = EntryBlock::new(
            key,
            value,
            expires,
            opts.flags,
            state.cas,
            self.usecas,
            !self.nosixpack,
        );
        entry.set_time(now);
        if opts.lowmem && self.noevict {
            return Status::NoMem;
        }
        let mut old = match state.map.insert(entry, hash) {
            Insert::Inserted => None,
            Insert::Replaced(old) => Some(old),
        };
        if let Some(existing) = &old {
            if let Some(reason) = existing.alive(now, state.clear_time) {
                // The old entry is dead; this is a fresh insert that also
                // evicts.
                self.notify_evicted(shard, reason, now, existing);
                if reason == EvictReason::Cleared {
                    state.clear_count -= 1;
                }
                old = None;
            }
        }
        match old {
            Some(existing) => {
                let mut put_back = None;
                if opts.casop {
                    if !self.usecas || opts.cas != existing.cas() {
                        put_back = Some(Status::Found);
                    }
                } else if opts.nx {
                    put_back = Some(Status::Found);
                }
                if put_back.is_none() {
                    if let Some(guard) = guard.as_mut() {
                        if !guard(&existing.view(shard, now)) {
                            put_back = Some(Status::Canceled);
                        }
                    }
                }
                if let Some(status) = put_back {
                    // Roll back: the bucket swap frees no space and takes
                    // none, so this reinsert can never resize.
                    match state.map.insert(existing, hash) {
                        Insert::Replaced(_new_entry) => {}
                        Insert::Inserted => debug_assert!(false, "rollback must replace"),
                    }
                    return status;
                }
                Status::Replaced
            }
            None => {
                if opts.xx || opts.casop {
                    // The key was absent; undo the insert.
                    let fresh = state.map.delete(key, hash);
                    debug_assert!(fresh.is_some());
                    return Status::NotFound;
                }
                if opts.lowmem && state.map.count > count_before {
                    self.auto_evict(state, shard, hash, now);
                }
                Status::Inserted
            }
        }
    }

    // ---- load -----------------------------------------------------------

    /// Looks up an entry and refreshes its access time.
    pub fn load(&self, key: &[u8], opts: &LoadOptions) -> Status {
        self.load_impl(None, key, opts, None)
    }

    /// Like [`Cache::load`], with a reader callback. The reader may return
    /// an [`Update`] to replace the entry value in place.
    pub fn load_with<F>(&self, key: &[u8], opts: &LoadOptions, mut read: F) -> Status
    where
        F: FnMut(&EntryView<'_>) -> Option<Update>,
    {
        self.load_impl(None, key, opts, Some(&mut read))
    }

    pub(crate) fn load_impl(
        &self,
        batch: Option<&mut Batch<'_>>,
        key: &[u8],
        opts: &LoadOptions,
        read: Option<LoadRead<'_>>,
    ) -> Status {
        let hash = self.hash64(key);
        let idx = self.shard_index(hash);
        self.with_shard(idx, batch, |cache, state| {
            cache.load_op(state, idx, key, hash as u32, opts, read)
        })
    }

    fn load_op(
        &self,
        state: &mut ShardState,
        shard: usize,
        key: &[u8],
        hash: u32,
        opts: &LoadOptions,
        read: Option<LoadRead<'_>>,
    ) -> Status {
        let now = Self::op_now(opts.time);
        let Some(bidx) = state.map.get_bucket(key, clip_hash(hash)) else {
            return Status::NotFound;
        };
        let reason = state.map.buckets[bidx]
            .entry
            .as_ref()
            .and_then(|entry| entry.alive(now, state.clear_time));
        if let Some(reason) = reason {
            self.evict_at(state, shard, bidx, reason, now);
            return Status::NotFound;
        }
        if !opts.notouch {
            if let Some(entry) = state.map.buckets[bidx].entry.as_mut() {
                entry.set_time(now);
            }
        }
        if let Some(read) = read {
            let update = match &state.map.buckets[bidx].entry {
                Some(entry) => read(&entry.view(shard, now)),
                None => None,
            };
            if let Some(update) = update {
                state.cas += 1;
                let mut entry = EntryBlock::new(
                    key,
                    &update.value,
                    update.expires,
                    update.flags,
                    state.cas,
                    self.usecas,
                    !self.nosixpack,
                );
                entry.set_time(now);
                state.map.replace_entry_at(bidx, entry);
            }
        }
        Status::Found
    }

    // ---- delete ---------------------------------------------------------

    /// Deletes an entry.
    pub fn delete(&self, key: &[u8], opts: &DeleteOptions) -> Status {
        self.delete_impl(None, key, opts, None)
    }

    /// Like [`Cache::delete`], with a pre-delete guard; returning `false`
    /// keeps the entry (`Canceled`).
    pub fn delete_with<F>(&self, key: &[u8], opts: &DeleteOptions, mut guard: F) -> Status
    where
        F: FnMut(&EntryView<'_>) -> bool,
    {
        self.delete_impl(None, key, opts, Some(&mut guard))
    }

    pub(crate) fn delete_impl(
        &self,
        batch: Option<&mut Batch<'_>>,
        key: &[u8],
        opts: &DeleteOptions,
        guard: Option<StoreGuard<'_>>,
    ) -> Status {
        let hash = self.hash64(key);
        let idx = self.shard_index(hash);
        self.with_shard(idx, batch, |cache, state| {
            cache.delete_op(state, idx, key, hash as u32, opts, guard)
        })
    }

    fn delete_op(
        &self,
        state: &mut ShardState,
        shard: usize,
        key: &[u8],
        hash: u32,
        opts: &DeleteOptions,
        mut guard: Option<StoreGuard<'_>>,
    ) -> Status {
        let now = Self::op_now(opts.time);
        let Some(entry) = state.map.delete(key, hash) else {
            return Status::NotFound;
        };
        if let Some(reason) = entry.alive(now, state.clear_time) {
            self.notify_evicted(shard, reason, now, &entry);
            if reason == EvictReason::Cleared {
                state.clear_count -= 1;
            }
            state.map.try_shrink(false, self.allowshrink);
            return Status::NotFound;
        }
        if let Some(guard) = guard.as_mut() {
            if !guard(&entry.view(shard, now)) {
                // Reinsert into the bucket the delete just freed; no
                // allocation can occur.
                match state.map.insert(entry, hash) {
                    Insert::Inserted => {}
                    Insert::Replaced(_) => debug_assert!(false, "reinsert must not replace"),
                }
                return Status::Canceled;
            }
        }
        state.map.try_shrink(false, self.allowshrink);
        Status::Deleted
    }

    // ---- scans ----------------------------------------------------------

    /// Visits every logically-live entry, shard by shard. The callback
    /// steers with [`IterAction`].
    pub fn iter<F>(&self, opts: &IterOptions, mut visit: F) -> Status
    where
        F: FnMut(&EntryView<'_>) -> IterAction,
    {
        self.iter_impl(None, opts, &mut visit)
    }

    pub(crate) fn iter_impl(
        &self,
        mut batch: Option<&mut Batch<'_>>,
        opts: &IterOptions,
        visit: IterVisit<'_>,
    ) -> Status {
        let now = Self::op_now(opts.time);
        if let Some(idx) = opts.oneshard {
            if idx >= self.shards.len() {
                return Status::Finished;
            }
            return self.with_shard(idx, batch.take(), |cache, state| {
                cache.iter_op(state, idx, now, visit)
            });
        }
        for idx in 0..self.shards.len() {
            let status = self.with_shard(idx, batch.as_deref_mut(), |cache, state| {
                cache.iter_op(state, idx, now, &mut *visit)
            });
            if status != Status::Finished {
                return status;
            }
        }
        Status::Finished
    }

    fn iter_op(
        &self,
        state: &mut ShardState,
        shard: usize,
        now: i64,
        visit: IterVisit<'_>,
    ) -> Status {
        let mut status = Status::Finished;
        let mut i = 0;
        while i < state.map.nbuckets() {
            let action = match &state.map.buckets[i].entry {
                None => None,
                Some(entry) if entry.alive(now, state.clear_time).is_some() => None,
                Some(entry) => Some(visit(&entry.view(shard, now))),
            };
            match action {
                None | Some(IterAction::Continue) => i += 1,
                Some(IterAction::Stop) => {
                    status = Status::Canceled;
                    break;
                }
                Some(IterAction::Delete) => {
                    // Deleting backward-shifts followers into this bucket;
                    // recheck the same index.
                    state.map.remove_at(i);
                }
                Some(IterAction::DeleteStop) => {
                    state.map.remove_at(i);
                    status = Status::Canceled;
                    break;
                }
            }
        }
        state.map.try_shrink(true, self.allowshrink);
        status
    }

    /// Removes every dead entry, returning `(swept, kept)`.
    pub fn sweep(&self, opts: &SweepOptions) -> (usize, usize) {
        self.sweep_impl(None, opts)
    }

    pub(crate) fn sweep_impl(
        &self,
        mut batch: Option<&mut Batch<'_>>,
        opts: &SweepOptions,
    ) -> (usize, usize) {
        let now = Self::op_now(opts.time);
        let mut swept = 0;
        let mut kept = 0;
        if let Some(idx) = opts.oneshard {
            if idx < self.shards.len() {
                self.with_shard(idx, batch.take(), |cache, state| {
                    cache.sweep_op(state, idx, now, &mut swept, &mut kept)
                });
            }
            return (swept, kept);
        }
        for idx in 0..self.shards.len() {
            self.with_shard(idx, batch.as_deref_mut(), |cache, state| {
                cache.sweep_op(state, idx, now, &mut swept, &mut kept)
            });
        }
        (swept, kept)
    }

    fn sweep_op(
        &self,
        state: &mut ShardState,
        shard: usize,
        now: i64,
        swept: &mut usize,
        kept: &mut usize,
    ) {
        let mut i = 0;
        while i < state.map.nbuckets() {
            let reason = match &state.map.buckets[i].entry {
                None => {
                    i += 1;
                    continue;
                }
                Some(entry) => entry.alive(now, state.clear_time),
            };
            match reason {
                None => {
                    *kept += 1;
                    i += 1;
                }
                Some(reason) => {
                    self.evict_at(state, shard, i, reason, now);
                    *swept += 1;
                }
            }
        }
        state.map.try_shrink(true, self.allowshrink);
    }

    /// Samples a random shard and returns the fraction of dead entries
    /// among up to `pollsize` sampled buckets.
    pub fn sweep_poll(&self, opts: &SweepPollOptions) -> f64 {
        let now = Self::op_now(opts.time);
        let pollsize = if opts.pollsize == 0 {
            DEF_POLLSIZE
        } else {
            opts.pollsize
        };
        let idx = rand::uniform(self.shards.len() as u64) as usize;
        self.with_shard(idx, None, |_, state| {
            let n = state.map.nbuckets();
            let start = rand::uniform(n as u64) as usize;
            let mut sampled = 0usize;
            let mut dead = 0usize;
            let mut i = 0;
            while i < n && sampled < pollsize {
                if let Some(entry) = &state.map.buckets[(start + i) % n].entry {
                    sampled += 1;
                    if entry.alive(now, state.clear_time).is_some() {
                        dead += 1;
                    }
                }
                i += 1;
            }
            if sampled == 0 {
                0.0
            } else {
                dead as f64 / sampled as f64
            }
        })
    }

    /// O(1) clear: advances each shard's clear timestamp; stale buckets
    /// are dropped lazily by later operations or eagerly by sweep.
    pub fn clear(&self, opts: &ClearOptions) {
        self.clear_impl(None, opts)
    }

    pub(crate) fn clear_impl(&self, mut batch: Option<&mut Batch<'_>>, opts: &ClearOptions) {
        let now = Self::op_now(opts.time);
        if let Some(idx) = opts.oneshard {
            if idx < self.shards.len() {
                self.with_shard(idx, batch.take(), |_, state| {
                    state.clear_time = now;
                    state.clear_count += state.map.count - state.clear_count;
                });
            }
            return;
        }
        for idx in 0..self.shards.len() {
            self.with_shard(idx, batch.as_deref_mut(), |_, state| {
                state.clear_time = now;
                state.clear_count += state.map.count - state.clear_count;
            });
        }
    }

    // ---- stats ----------------------------------------------------------

    /// Number of live entries.
    pub fn count(&self, opts: &CountOptions) -> usize {
        self.fold_shards(opts.oneshard, 0, |acc, state| acc + state.live_count())
    }

    /// Entries ever inserted.
    pub fn total(&self, opts: &CountOptions) -> u64 {
        self.fold_shards(opts.oneshard, 0, |acc, state| acc + state.map.total)
    }

    /// Memory size: entry blocks, plus shard and bucket structures unless
    /// `entries_only`.
    pub fn size(&self, opts: &SizeOptions) -> usize {
        let entries_only = opts.entries_only;
        self.fold_shards(opts.oneshard, 0, |acc, state| {
            let mut size = state.map.entsize;
            if !entries_only {
                size += std::mem::size_of::<Shard>();
                size += state.map.struct_size();
            }
            acc + size
        })
    }

    fn fold_shards<R: Copy>(
        &self,
        oneshard: Option<usize>,
        zero: R,
        mut f: impl FnMut(R, &ShardState) -> R,
    ) -> R {
        if let Some(idx) = oneshard {
            if idx >= self.shards.len() {
                return zero;
            }
            return self.with_shard(idx, None, |_, state| f(zero, state));
        }
        let mut acc = zero;
        for idx in 0..self.shards.len() {
            acc = self.with_shard(idx, None, |_, state| f(acc, state));
        }
        acc
    }
}
