//! Tests for the flat entry codec.

#[cfg(test)]
mod tests {
    use crate::cache::entry::{read_uvarint, write_uvarint, EntryBlock, EvictReason};

    fn block(key: &[u8], val: &[u8]) -> EntryBlock {
        EntryBlock::new(key, val, 0, 0, 0, false, true)
    }

    #[test]
    fn test_varint_roundtrip() {
        for x in [0u64, 1, 127, 128, 300, 16_383, 16_384, u32::MAX as u64, u64::MAX] {
            let mut buf = Vec::new();
            write_uvarint(&mut buf, x);
            let (got, n) = read_uvarint(&buf);
            assert_eq!(got, x);
            assert_eq!(n, buf.len());
        }
    }

    #[test]
    fn test_basic_fields() {
        let mut entry = EntryBlock::new(b"hello", b"world", 500, 7, 42, true, false);
        entry.set_time(99);
        assert_eq!(entry.time(), 99);
        assert_eq!(entry.expires(), 500);
        assert_eq!(entry.flags(), 7);
        assert_eq!(entry.cas(), 42);
        assert_eq!(entry.key().as_ref(), b"hello");
        assert_eq!(entry.value(), b"world");
    }

    #[test]
    fn test_optional_fields_absent() {
        let entry = block(b"key", b"val");
        assert_eq!(entry.expires(), 0);
        assert_eq!(entry.flags(), 0);
        assert_eq!(entry.cas(), 0, "cas disabled stores no tag");
        // hdr + time + varint(3) + key + varint(3) + val
        assert_eq!(entry.memsize(), 1 + 8 + 1 + entry.raw_key().len() + 1 + 3);
    }

    #[test]
    fn test_sixpack_applied() {
        let entry = block(b"user:42", b"v");
        assert!(entry.raw_key().len() < b"user:42".len());
        assert_eq!(entry.key().as_ref(), b"user:42");
        assert!(entry.key_eq(b"user:42"));
        assert!(!entry.key_eq(b"user:43"));
    }

    #[test]
    fn test_sixpack_skipped_for_odd_bytes() {
        // 'Z' is outside the sixpack alphabet; the raw key is stored.
        let entry = block(b"Zkey", b"v");
        assert_eq!(entry.raw_key(), b"Zkey");
        assert!(entry.key_eq(b"Zkey"));
    }

    #[test]
    fn test_sixpack_skipped_for_long_keys() {
        let key = vec![b'a'; 129];
        let entry = block(&key, b"v");
        assert_eq!(entry.raw_key(), &key[..]);
    }

    #[test]
    fn test_compare_mixed_pack_state() {
        // One side packed, one not; comparison must canonicalize.
        let packed = block(b"abc", b"v");
        let raw = EntryBlock::new(b"abc", b"v", 0, 0, 0, false, false);
        assert!(packed.compare(&raw).is_eq());
        let other = EntryBlock::new(b"abd", b"v", 0, 0, 0, false, false);
        assert!(packed.compare(&other).is_lt());
    }

    #[test]
    fn test_alive() {
        let mut entry = EntryBlock::new(b"k", b"v", 1_000, 0, 0, false, true);
        entry.set_time(100);
        assert_eq!(entry.alive(500, 0), None);
        assert_eq!(entry.alive(1_000, 0), Some(EvictReason::Expired));
        assert_eq!(entry.alive(500, 200), Some(EvictReason::Cleared));
        // Clear takes precedence over expiration.
        assert_eq!(entry.alive(2_000, 200), Some(EvictReason::Cleared));
    }

    #[test]
    fn test_empty_value() {
        let entry = block(b"k", b"");
        assert_eq!(entry.value(), b"");
    }

    #[test]
    fn test_large_value_varint() {
        let val = vec![0xABu8; 70_000];
        let entry = block(b"k", &val);
        assert_eq!(entry.value().len(), 70_000);
        assert_eq!(entry.value(), &val[..]);
    }
}
