//! Batch: a re-entrant lock scope over cache shards.
//!
//! A batch accumulates shard locks as its operations touch shards and
//! releases them all, in reverse acquisition order, when it ends. Within
//! a batch the same key can be read and written without re-acquiring the
//! shard, and every touched shard stays isolated from other callers until
//! the end.

use super::cache::{
    Cache, ClearOptions, DeleteOptions, IterAction, IterOptions, LoadOptions, Status,
    StoreOptions, SweepOptions, Update,
};
use super::entry::EntryView;
use super::lock;

pub struct Batch<'c> {
    cache: &'c Cache,
    token: usize,
    locked: Vec<usize>,
}

impl<'c> Batch<'c> {
    pub(crate) fn new(cache: &'c Cache) -> Batch<'c> {
        Batch {
            cache,
            token: lock::next_token(),
            locked: Vec::new(),
        }
    }

    pub(crate) fn token(&self) -> usize {
        self.token
    }

    pub(crate) fn push_locked(&mut self, idx: usize) {
        self.locked.push(idx);
    }

    /// Ends the batch, releasing every shard it locked.
    pub fn end(self) {}

    pub fn store(&mut self, key: &[u8], value: &[u8], opts: &StoreOptions) -> Status {
        let cache = self.cache;
        cache.store_impl(Some(self), key, value, opts, None)
    }

    pub fn store_with<F>(&mut self, key: &[u8], value: &[u8], opts: &StoreOptions, mut guard: F) -> Status
    where
        F: FnMut(&EntryView<'_>) -> bool,
    {
        let cache = self.cache;
        cache.store_impl(Some(self), key, value, opts, Some(&mut guard))
    }

    pub fn load(&mut self, key: &[u8], opts: &LoadOptions) -> Status {
        let cache = self.cache;
        cache.load_impl(Some(self), key, opts, None)
    }

    pub fn load_with<F>(&mut self, key: &[u8], opts: &LoadOptions, mut read: F) -> Status
    where
        F: FnMut(&EntryView<'_>) -> Option<Update>,
    {
        let cache = self.cache;
        cache.load_impl(Some(self), key, opts, Some(&mut read))
    }

    pub fn delete(&mut self, key: &[u8], opts: &DeleteOptions) -> Status {
        let cache = self.cache;
        cache.delete_impl(Some(self), key, opts, None)
    }

    pub fn delete_with<F>(&mut self, key: &[u8], opts: &DeleteOptions, mut guard: F) -> Status
    where
        F: FnMut(&EntryView<'_>) -> bool,
    {
        let cache = self.cache;
        cache.delete_impl(Some(self), key, opts, Some(&mut guard))
    }

    pub fn iter<F>(&mut self, opts: &IterOptions, mut visit: F) -> Status
    where
        F: FnMut(&EntryView<'_>) -> IterAction,
    {
        let cache = self.cache;
        cache.iter_impl(Some(self), opts, &mut visit)
    }

    pub fn sweep(&mut self, opts: &SweepOptions) -> (usize, usize) {
        let cache = self.cache;
        cache.sweep_impl(Some(self), opts)
    }

    pub fn clear(&mut self, opts: &ClearOptions) {
        let cache = self.cache;
        cache.clear_impl(Some(self), opts)
    }
}

impl Drop for Batch<'_> {
    fn drop(&mut self) {
        while let Some(idx) = self.locked.pop() {
            self.cache.shards[idx].lock.release();
        }
    }
}
