//! Robin-Hood open-addressing hash table of entry blocks.
//!
//! Buckets are fixed width: the owned entry block, a truncated 24-bit
//! stored hash, and a one-byte distance-to-initial-bucket. A `dib` of zero
//! means the bucket is empty. Probing walks forward from `hash & mask`;
//! an incoming bucket that out-distances the resident swaps with it and
//! keeps probing.

use super::entry::EntryBlock;

/// Initial number of buckets per map.
pub(crate) const INIT_CAP: usize = 64;

/// Shrink when occupancy falls to this fraction of the table.
pub(crate) const SHRINK_FACTOR: f64 = 0.10;

/// Bits of the hash kept in each bucket.
const HASH_BITS: u32 = 24;

pub(crate) fn clip_hash(hash: u32) -> u32 {
    hash & ((1 << HASH_BITS) - 1)
}

pub(crate) struct Bucket {
    pub(crate) entry: Option<EntryBlock>,
    pub(crate) hash: u32,
    pub(crate) dib: u8,
}

impl Bucket {
    fn empty() -> Bucket {
        Bucket {
            entry: None,
            hash: 0,
            dib: 0,
        }
    }
}

/// Outcome of a map insert.
pub(crate) enum Insert {
    Inserted,
    Replaced(EntryBlock),
}

pub(crate) struct Map {
    pub(crate) buckets: Vec<Bucket>,
    /// Initial capacity; shrinking never goes below it.
    cap: usize,
    pub(crate) count: usize,
    mask: usize,
    growat: usize,
    shrinkat: usize,
    loadfactor: f64,
    /// Entries ever inserted.
    pub(crate) total: u64,
    /// Memory size of all live entry blocks.
    pub(crate) entsize: usize,
}

impl Map {
    pub(crate) fn new(cap: usize, loadfactor: f64) -> Map {
        let mut map = Map {
            buckets: Vec::new(),
            cap,
            count: 0,
            mask: 0,
            growat: 0,
            shrinkat: 0,
            loadfactor,
            total: 0,
            entsize: 0,
        };
        map.rebuild_empty(cap);
        map
    }

    fn rebuild_empty(&mut self, nbuckets: usize) {
        self.buckets = (0..nbuckets).map(|_| Bucket::empty()).collect();
        self.mask = nbuckets - 1;
        self.growat = (nbuckets as f64 * self.loadfactor) as usize;
        self.shrinkat = (nbuckets as f64 * SHRINK_FACTOR) as usize;
    }

    pub(crate) fn nbuckets(&self) -> usize {
        self.buckets.len()
    }

    /// Memory taken by the bucket array itself.
    pub(crate) fn struct_size(&self) -> usize {
        self.buckets.len() * std::mem::size_of::<Bucket>()
    }

    /// Moves every entry into a table of `new_cap` buckets, preserving
    /// count and the initial capacity.
    fn resize(&mut self, new_cap: usize) {
        let old = std::mem::take(&mut self.buckets);
        self.rebuild_empty(new_cap);
        let mask = self.mask;
        for mut bucket in old {
            if bucket.dib == 0 {
                continue;
            }
            bucket.dib = 1;
            let mut i = (bucket.hash as usize) & mask;
            loop {
                if self.buckets[i].dib == 0 {
                    self.buckets[i] = bucket;
                    break;
                }
                if self.buckets[i].dib < bucket.dib {
                    std::mem::swap(&mut self.buckets[i], &mut bucket);
                }
                i = (i + 1) & mask;
                bucket.dib += 1;
            }
        }
    }

    /// Inserts an entry, replacing in place when a bucket with the same
    /// stored hash holds a byte-equal key. A replace swaps entry blocks
    /// without touching dib or count, so an insert-then-rollback sequence
    /// never changes the table shape.
    pub(crate) fn insert(&mut self, entry: EntryBlock, hash: u32) -> Insert {
        let hash = clip_hash(hash);
        if self.count >= self.growat {
            let n = self.buckets.len() * 2;
            self.resize(n);
        }
        self.entsize += entry.memsize();
        let mut floating = Bucket {
            entry: Some(entry),
            hash,
            dib: 1,
        };
        let mut i = (hash as usize) & self.mask;
        loop {
            if self.buckets[i].dib == 0 {
                self.buckets[i] = floating;
                self.count += 1;
                self.total += 1;
                return Insert::Inserted;
            }
            if self.buckets[i].hash == floating.hash {
                let equal = match (&self.buckets[i].entry, &floating.entry) {
                    (Some(a), Some(b)) => a.compare(b).is_eq(),
                    _ => false,
                };
                if equal {
                    let old = std::mem::replace(&mut self.buckets[i].entry, floating.entry);
                    let old = old.expect("occupied bucket holds an entry");
                    self.entsize -= old.memsize();
                    return Insert::Replaced(old);
                }
            }
            if self.buckets[i].dib < floating.dib {
                std::mem::swap(&mut self.buckets[i], &mut floating);
            }
            i = (i + 1) & self.mask;
            floating.dib += 1;
        }
    }

    /// Returns the bucket index holding `key`, or `None`. The Robin-Hood
    /// invariant guarantees a miss at the first empty bucket.
    pub(crate) fn get_bucket(&self, key: &[u8], hash: u32) -> Option<usize> {
        let hash = clip_hash(hash);
        let mut i = (hash as usize) & self.mask;
        loop {
            let bucket = &self.buckets[i];
            if bucket.dib == 0 {
                return None;
            }
            if bucket.hash == hash {
                if let Some(entry) = &bucket.entry {
                    if entry.key_eq(key) {
                        return Some(i);
                    }
                }
            }
            i = (i + 1) & self.mask;
        }
    }

    pub(crate) fn get_entry(&self, key: &[u8], hash: u32) -> Option<&EntryBlock> {
        self.get_bucket(key, hash)
            .and_then(|i| self.buckets[i].entry.as_ref())
    }

    /// Removes the bucket at `i` and backward-shifts the run after it:
    /// every follower with `dib > 1` moves one slot left with its dib
    /// decremented, until an empty or at-home bucket ends the run.
    pub(crate) fn remove_at(&mut self, i: usize) -> EntryBlock {
        let old = self.buckets[i]
            .entry
            .take()
            .expect("occupied bucket holds an entry");
        self.entsize -= old.memsize();
        let mut i = i;
        loop {
            let next = (i + 1) & self.mask;
            if self.buckets[next].dib <= 1 {
                self.buckets[i] = Bucket::empty();
                break;
            }
            let moved = Bucket {
                entry: self.buckets[next].entry.take(),
                hash: self.buckets[next].hash,
                dib: self.buckets[next].dib - 1,
            };
            self.buckets[i] = moved;
            i = next;
        }
        self.count -= 1;
        old
    }

    /// Deletes `key`, returning its entry block when present.
    pub(crate) fn delete(&mut self, key: &[u8], hash: u32) -> Option<EntryBlock> {
        self.get_bucket(key, hash).map(|i| self.remove_at(i))
    }

    /// Swaps the entry block at bucket `i`, keeping the accounting right.
    pub(crate) fn replace_entry_at(&mut self, i: usize, entry: EntryBlock) -> EntryBlock {
        self.entsize += entry.memsize();
        let old = std::mem::replace(&mut self.buckets[i].entry, Some(entry))
            .expect("occupied bucket holds an entry");
        self.entsize -= old.memsize();
        old
    }

    fn needs_shrink(&self, allow_shrink: bool) -> bool {
        allow_shrink && self.buckets.len() > self.cap && self.count <= self.shrinkat
    }

    /// Shrinks the table when allowed and warranted. After a multi-delete
    /// (iter, sweep) the target is the smallest sufficient power of two at
    /// or above the initial capacity; otherwise the table is halved.
    pub(crate) fn try_shrink(&mut self, multi: bool, allow_shrink: bool) {
        if !self.needs_shrink(allow_shrink) {
            return;
        }
        let cap = if multi {
            let mut cap = self.cap;
            let mut growat = (cap as f64 * self.loadfactor) as usize;
            while self.count >= growat {
                cap *= 2;
                growat = (cap as f64 * self.loadfactor) as usize;
            }
            cap
        } else {
            self.buckets.len() / 2
        };
        self.resize(cap);
    }
}
