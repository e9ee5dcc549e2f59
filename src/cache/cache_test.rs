//! Tests for the caching engine: store/load/delete semantics, ttl, cas,
//! clear, sweep, batches and low-memory eviction.

#[cfg(test)]
mod tests {
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use crate::cache::{
        Cache, ClearOptions, CountOptions, DeleteOptions, EvictReason, IterAction, IterOptions,
        LoadOptions, Options, Status, StoreOptions, SweepOptions, SweepPollOptions, Update,
        SECOND,
    };

    fn new_cache(opts: Options) -> Cache {
        Cache::new(opts)
    }

    fn small_cache() -> Cache {
        new_cache(Options {
            nshards: 4,
            allowshrink: true,
            ..Default::default()
        })
    }

    fn store_at(cache: &Cache, key: &[u8], val: &[u8], time: i64) -> Status {
        cache.store(
            key,
            val,
            &StoreOptions {
                time,
                ..Default::default()
            },
        )
    }

    fn load_value(cache: &Cache, key: &[u8], time: i64) -> Option<Vec<u8>> {
        let mut value = None;
        let status = cache.load_with(
            key,
            &LoadOptions {
                time,
                ..Default::default()
            },
            |view| {
                value = Some(view.value.to_vec());
                None
            },
        );
        match status {
            Status::Found => value,
            _ => None,
        }
    }

    #[test]
    fn test_store_load_delete_roundtrip() {
        let cache = small_cache();
        assert_eq!(store_at(&cache, b"hello", b"world", 100), Status::Inserted);
        assert_eq!(load_value(&cache, b"hello", 101).as_deref(), Some(&b"world"[..]));
        assert_eq!(
            cache.delete(b"hello", &DeleteOptions { time: 102 }),
            Status::Deleted
        );
        assert_eq!(load_value(&cache, b"hello", 103), None);
        assert_eq!(
            cache.delete(b"hello", &DeleteOptions { time: 104 }),
            Status::NotFound
        );
    }

    #[test]
    fn test_replace_returns_replaced() {
        let cache = small_cache();
        assert_eq!(store_at(&cache, b"k", b"v1", 100), Status::Inserted);
        assert_eq!(store_at(&cache, b"k", b"v2", 101), Status::Replaced);
        assert_eq!(load_value(&cache, b"k", 102).as_deref(), Some(&b"v2"[..]));
        assert_eq!(cache.count(&CountOptions::default()), 1);
    }

    #[test]
    fn test_ttl_expiration() {
        let cache = small_cache();
        let now = 100 * SECOND;
        let status = cache.store(
            b"k",
            b"v",
            &StoreOptions {
                time: now,
                ttl: SECOND,
                ..Default::default()
            },
        );
        assert_eq!(status, Status::Inserted);
        // Half a second later the entry is alive.
        assert_eq!(
            load_value(&cache, b"k", now + SECOND / 2).as_deref(),
            Some(&b"v"[..])
        );
        // Two seconds later it is gone and the bucket is dropped.
        assert_eq!(load_value(&cache, b"k", now + 2 * SECOND), None);
        assert_eq!(cache.count(&CountOptions::default()), 0);
    }

    #[test]
    fn test_expired_notifies_evicted() {
        let reasons: Arc<Mutex<Vec<EvictReason>>> = Arc::new(Mutex::new(Vec::new()));
        let seen = reasons.clone();
        let cache = new_cache(Options {
            nshards: 4,
            evicted: Some(Arc::new(move |reason, _view| {
                seen.lock().push(reason);
            })),
            ..Default::default()
        });
        let now = 100 * SECOND;
        cache.store(
            b"k",
            b"v",
            &StoreOptions {
                time: now,
                expires: now + SECOND,
                ..Default::default()
            },
        );
        assert_eq!(load_value(&cache, b"k", now + 2 * SECOND), None);
        assert_eq!(&*reasons.lock(), &[EvictReason::Expired]);
    }

    #[test]
    fn test_nx_xx() {
        let cache = small_cache();
        let nx = StoreOptions {
            time: 100,
            nx: true,
            ..Default::default()
        };
        let xx = StoreOptions {
            time: 100,
            xx: true,
            ..Default::default()
        };
        assert_eq!(cache.store(b"k", b"v1", &xx), Status::NotFound);
        assert_eq!(cache.store(b"k", b"v1", &nx), Status::Inserted);
        assert_eq!(cache.store(b"k", b"v2", &nx), Status::Found);
        assert_eq!(load_value(&cache, b"k", 101).as_deref(), Some(&b"v1"[..]));
        assert_eq!(cache.store(b"k", b"v3", &xx), Status::Replaced);
        assert_eq!(load_value(&cache, b"k", 102).as_deref(), Some(&b"v3"[..]));
    }

    #[test]
    fn test_cas_gate() {
        let cache = new_cache(Options {
            nshards: 1,
            usecas: true,
            ..Default::default()
        });
        assert_eq!(store_at(&cache, b"c", b"v0", 100), Status::Inserted);
        let mut cas = 0;
        cache.load_with(b"c", &LoadOptions { time: 101, ..Default::default() }, |view| {
            cas = view.cas;
            None
        });
        assert!(cas > 0);

        // Writer B replaces with the current tag.
        let status = cache.store(
            b"c",
            b"vB",
            &StoreOptions {
                time: 102,
                casop: true,
                cas,
                ..Default::default()
            },
        );
        assert_eq!(status, Status::Replaced);

        // Writer A still holds the stale tag and must lose; the value is
        // untouched by the failed attempt.
        let status = cache.store(
            b"c",
            b"vA",
            &StoreOptions {
                time: 103,
                casop: true,
                cas,
                ..Default::default()
            },
        );
        assert_eq!(status, Status::Found);
        assert_eq!(load_value(&cache, b"c", 104).as_deref(), Some(&b"vB"[..]));

        // The tag moved forward with the replace.
        let mut cas2 = 0;
        cache.load_with(b"c", &LoadOptions { time: 105, ..Default::default() }, |view| {
            cas2 = view.cas;
            None
        });
        assert!(cas2 > cas);

        // cas against a missing key reports not-found.
        let status = cache.store(
            b"missing",
            b"v",
            &StoreOptions {
                time: 106,
                casop: true,
                cas: 1,
                ..Default::default()
            },
        );
        assert_eq!(status, Status::NotFound);
    }

    #[test]
    fn test_store_guard_cancel() {
        let cache = small_cache();
        store_at(&cache, b"k", b"keep", 100);
        let status = cache.store_with(
            b"k",
            b"new",
            &StoreOptions {
                time: 101,
                ..Default::default()
            },
            |view| view.value != b"keep",
        );
        assert_eq!(status, Status::Canceled);
        assert_eq!(load_value(&cache, b"k", 102).as_deref(), Some(&b"keep"[..]));
    }

    #[test]
    fn test_delete_guard_cancel() {
        let cache = small_cache();
        store_at(&cache, b"k", b"v", 100);
        let status = cache.delete_with(b"k", &DeleteOptions { time: 101 }, |_| false);
        assert_eq!(status, Status::Canceled);
        assert_eq!(load_value(&cache, b"k", 102).as_deref(), Some(&b"v"[..]));
        let status = cache.delete_with(b"k", &DeleteOptions { time: 103 }, |_| true);
        assert_eq!(status, Status::Deleted);
    }

    #[test]
    fn test_keepttl() {
        let cache = small_cache();
        let now = 100 * SECOND;
        cache.store(
            b"k",
            b"v1",
            &StoreOptions {
                time: now,
                expires: now + 10 * SECOND,
                ..Default::default()
            },
        );
        // Plain replace drops the expiration.
        cache.store(
            b"k",
            b"v2",
            &StoreOptions {
                time: now + SECOND,
                keepttl: true,
                ..Default::default()
            },
        );
        // Past the original deadline the entry is gone only if keepttl
        // preserved it.
        assert_eq!(load_value(&cache, b"k", now + 11 * SECOND), None);
    }

    #[test]
    fn test_load_update() {
        let cache = small_cache();
        store_at(&cache, b"k", b"1", 100);
        let status = cache.load_with(
            b"k",
            &LoadOptions {
                time: 101,
                ..Default::default()
            },
            |_| {
                Some(Update {
                    value: b"2".to_vec(),
                    flags: 9,
                    expires: 0,
                })
            },
        );
        assert_eq!(status, Status::Found);
        let mut flags = 0;
        cache.load_with(b"k", &LoadOptions { time: 102, ..Default::default() }, |view| {
            flags = view.flags;
            assert_eq!(view.value, b"2");
            None
        });
        assert_eq!(flags, 9);
    }

    #[test]
    fn test_clear_is_observable() {
        let cache = small_cache();
        for i in 0..200 {
            let key = format!("key:{}", i);
            store_at(&cache, key.as_bytes(), b"v", 100);
        }
        assert_eq!(cache.count(&CountOptions::default()), 200);
        cache.clear(&ClearOptions {
            time: 200,
            ..Default::default()
        });
        assert_eq!(cache.count(&CountOptions::default()), 0);
        for i in 0..200 {
            let key = format!("key:{}", i);
            assert_eq!(load_value(&cache, key.as_bytes(), 300), None);
        }
    }

    #[test]
    fn test_store_over_cleared_is_fresh_insert() {
        let cache = small_cache();
        store_at(&cache, b"k", b"old", 100);
        cache.clear(&ClearOptions {
            time: 200,
            ..Default::default()
        });
        assert_eq!(store_at(&cache, b"k", b"new", 300), Status::Inserted);
        assert_eq!(cache.count(&CountOptions::default()), 1);
        assert_eq!(load_value(&cache, b"k", 301).as_deref(), Some(&b"new"[..]));
    }

    #[test]
    fn test_sweep_counts() {
        let cache = small_cache();
        let now = 100 * SECOND;
        for i in 0..50 {
            let key = format!("live:{}", i);
            store_at(&cache, key.as_bytes(), b"v", now);
        }
        for i in 0..30 {
            let key = format!("dying:{}", i);
            cache.store(
                key.as_bytes(),
                b"v",
                &StoreOptions {
                    time: now,
                    expires: now + SECOND,
                    ..Default::default()
                },
            );
        }
        let later = now + 2 * SECOND;
        let (swept, kept) = cache.sweep(&SweepOptions {
            time: later,
            ..Default::default()
        });
        assert_eq!(swept, 30);
        assert_eq!(kept, 50);
        assert_eq!(cache.count(&CountOptions::default()), 50);
    }

    #[test]
    fn test_sweep_poll_fraction() {
        let cache = new_cache(Options {
            nshards: 1,
            ..Default::default()
        });
        let now = 100 * SECOND;
        for i in 0..40 {
            let key = format!("k:{}", i);
            cache.store(
                key.as_bytes(),
                b"v",
                &StoreOptions {
                    time: now,
                    expires: now + SECOND,
                    ..Default::default()
                },
            );
        }
        let all_dead = cache.sweep_poll(&SweepPollOptions {
            time: now + 2 * SECOND,
            ..Default::default()
        });
        assert!((all_dead - 1.0).abs() < f64::EPSILON);
        let all_live = cache.sweep_poll(&SweepPollOptions {
            time: now,
            ..Default::default()
        });
        assert!(all_live.abs() < f64::EPSILON);
    }

    #[test]
    fn test_iter_visits_live_only() {
        let cache = small_cache();
        let now = 100 * SECOND;
        for i in 0..20 {
            let key = format!("live:{}", i);
            store_at(&cache, key.as_bytes(), b"v", now);
        }
        cache.store(
            b"dead",
            b"v",
            &StoreOptions {
                time: now,
                expires: now + 1,
                ..Default::default()
            },
        );
        let mut seen = 0;
        let status = cache.iter(
            &IterOptions {
                time: now + SECOND,
                ..Default::default()
            },
            |view| {
                assert!(view.key.starts_with(b"live:"));
                seen += 1;
                IterAction::Continue
            },
        );
        assert_eq!(status, Status::Finished);
        assert_eq!(seen, 20);
    }

    #[test]
    fn test_iter_delete_and_stop() {
        let cache = small_cache();
        for i in 0..10 {
            let key = format!("k:{}", i);
            store_at(&cache, key.as_bytes(), b"v", 100);
        }
        let status = cache.iter(&IterOptions { time: 101, ..Default::default() }, |_| {
            IterAction::Delete
        });
        assert_eq!(status, Status::Finished);
        assert_eq!(cache.count(&CountOptions::default()), 0);

        for i in 0..10 {
            let key = format!("k:{}", i);
            store_at(&cache, key.as_bytes(), b"v", 100);
        }
        let mut visited = 0;
        let status = cache.iter(&IterOptions { time: 101, ..Default::default() }, |_| {
            visited += 1;
            IterAction::Stop
        });
        assert_eq!(status, Status::Canceled);
        assert_eq!(visited, 1);
    }

    #[test]
    fn test_count_matches_live_keys() {
        let cache = small_cache();
        let mut live = std::collections::HashSet::new();
        for i in 0..300 {
            let key = format!("k:{}", i % 120);
            store_at(&cache, key.as_bytes(), b"v", 100 + i);
            live.insert(key);
        }
        for i in 0..60 {
            let key = format!("k:{}", i);
            cache.delete(key.as_bytes(), &DeleteOptions { time: 500 });
            live.remove(&key);
        }
        assert_eq!(cache.count(&CountOptions::default()), live.len());
        // Replaces reuse the bucket; only fresh inserts count toward total.
        assert_eq!(cache.total(&CountOptions::default()), 120);
    }

    #[test]
    fn test_lowmem_auto_evicts() {
        let evictions = Arc::new(AtomicUsize::new(0));
        let counter = evictions.clone();
        let cache = new_cache(Options {
            nshards: 1,
            evicted: Some(Arc::new(move |reason, _view| {
                assert_eq!(reason, EvictReason::LowMem);
                counter.fetch_add(1, Ordering::Relaxed);
            })),
            ..Default::default()
        });
        // Fill the single shard well past its initial capacity.
        for i in 0..40 {
            let key = format!("old:{}", i);
            store_at(&cache, key.as_bytes(), b"v", 100 + i as i64);
        }
        let before = cache.count(&CountOptions::default());
        let status = cache.store(
            b"fresh",
            b"v",
            &StoreOptions {
                time: 1_000,
                lowmem: true,
                ..Default::default()
            },
        );
        assert_eq!(status, Status::Inserted);
        // One insert plus one eviction: the live count must not grow.
        assert!(cache.count(&CountOptions::default()) <= before);
        assert_eq!(evictions.load(Ordering::Relaxed), 1);
        // The freshly stored key must never be the victim.
        assert!(load_value(&cache, b"fresh", 1_001).is_some());
    }

    #[test]
    fn test_lowmem_noevict_reports_nomem() {
        let cache = new_cache(Options {
            nshards: 1,
            noevict: true,
            ..Default::default()
        });
        let status = cache.store(
            b"k",
            b"v",
            &StoreOptions {
                time: 100,
                lowmem: true,
                ..Default::default()
            },
        );
        assert_eq!(status, Status::NoMem);
        assert_eq!(cache.count(&CountOptions::default()), 0);
    }

    #[test]
    fn test_batch_read_modify_write() {
        let cache = new_cache(Options {
            nshards: 2,
            ..Default::default()
        });
        store_at(&cache, b"counter", b"10", 100);
        let mut batch = cache.begin();
        let mut current = Vec::new();
        batch.load_with(
            b"counter",
            &LoadOptions {
                time: 101,
                ..Default::default()
            },
            |view| {
                current = view.value.to_vec();
                None
            },
        );
        let n: i64 = std::str::from_utf8(&current).unwrap().parse().unwrap();
        let next = (n + 1).to_string();
        let status = batch.store(
            b"counter",
            next.as_bytes(),
            &StoreOptions {
                time: 102,
                ..Default::default()
            },
        );
        assert_eq!(status, Status::Replaced);
        batch.end();
        assert_eq!(load_value(&cache, b"counter", 103).as_deref(), Some(&b"11"[..]));
    }

    #[test]
    fn test_batch_serializes_other_writers() {
        let cache = Arc::new(new_cache(Options {
            nshards: 1,
            ..Default::default()
        }));
        store_at(&cache, b"k", b"v", 100);

        let mut batch = cache.begin();
        batch.load(b"k", &LoadOptions { time: 101, ..Default::default() });

        let (tx, rx) = std::sync::mpsc::channel();
        std::thread::scope(|scope| {
            let other = cache.clone();
            scope.spawn(move || {
                // Blocks until the batch releases the shard.
                other.store(
                    b"k",
                    b"other",
                    &StoreOptions {
                        time: 102,
                        ..Default::default()
                    },
                );
                tx.send(()).unwrap();
            });
            assert!(
                rx.recv_timeout(Duration::from_millis(100)).is_err(),
                "writer must wait while the batch holds the shard"
            );
            batch.end();
            rx.recv_timeout(Duration::from_secs(5))
                .expect("writer must proceed after the batch ends");
        });
        assert_eq!(load_value(&cache, b"k", 103).as_deref(), Some(&b"other"[..]));
    }

    #[test]
    fn test_batch_reentrant_same_shard() {
        let cache = new_cache(Options {
            nshards: 1,
            ..Default::default()
        });
        let mut batch = cache.begin();
        for i in 0..10 {
            let key = format!("k:{}", i);
            let status = batch.store(
                key.as_bytes(),
                b"v",
                &StoreOptions {
                    time: 100,
                    ..Default::default()
                },
            );
            assert_eq!(status, Status::Inserted);
        }
        batch.end();
        assert_eq!(cache.count(&CountOptions::default()), 10);
    }

    #[test]
    fn test_batch_released_on_drop() {
        let cache = new_cache(Options {
            nshards: 1,
            ..Default::default()
        });
        {
            let mut batch = cache.begin();
            batch.store(b"k", b"v", &StoreOptions { time: 100, ..Default::default() });
            // Dropped without end().
        }
        assert_eq!(store_at(&cache, b"k", b"v2", 101), Status::Replaced);
    }

    #[test]
    fn test_oneshard_scans() {
        let cache = new_cache(Options {
            nshards: 8,
            ..Default::default()
        });
        for i in 0..100 {
            let key = format!("k:{}", i);
            store_at(&cache, key.as_bytes(), b"v", 100);
        }
        let mut per_shard = 0usize;
        for idx in 0..cache.nshards() {
            per_shard += cache.count(&CountOptions {
                oneshard: Some(idx),
            });
        }
        assert_eq!(per_shard, 100);
        // Out-of-range shard indexes are harmless.
        assert_eq!(cache.count(&CountOptions { oneshard: Some(999) }), 0);
    }

    #[test]
    fn test_size_reports_entries() {
        let cache = new_cache(Options {
            nshards: 2,
            ..Default::default()
        });
        let empty = cache.size(&crate::cache::SizeOptions {
            entries_only: true,
            ..Default::default()
        });
        assert_eq!(empty, 0);
        store_at(&cache, b"k", b"value", 100);
        let entries = cache.size(&crate::cache::SizeOptions {
            entries_only: true,
            ..Default::default()
        });
        assert!(entries > 0);
        let full = cache.size(&crate::cache::SizeOptions::default());
        assert!(full > entries, "structures add overhead");
    }
}
