//! Entry codec.
//!
//! A cache entry is a single contiguous byte block with every field packed
//! back to back, little-endian, no per-entry alignment:
//!
//! ```text
//! hdr:1 | time:8 | [expires:8]? | [flags:4]? | [cas:8]? |
//! varint(keylen) | key | varint(vallen) | val
//! ```
//!
//! The one-byte header states which optional fields are present:
//! bit 0 = expires, bit 1 = flags, bit 2 = cas, bit 3 = key is sixpacked.
//! The cas field is present cache-wide (when cas is enabled), never per
//! entry.

use std::borrow::Cow;
use std::cmp::Ordering;

use byteorder::{ByteOrder, LittleEndian};

use super::sixpack;

const HDR_EXPIRES: u8 = 1;
const HDR_FLAGS: u8 = 2;
const HDR_CAS: u8 = 4;
const HDR_SIXPACK: u8 = 8;

const TIME_SIZE: usize = 8;

/// Longest key eligible for sixpack compression.
const SIXPACK_MAX_KEY: usize = 128;

/// Why an entry is no longer logically present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EvictReason {
    /// The entry ttl has elapsed.
    Expired,
    /// The system is low on memory.
    LowMem,
    /// The shard was cleared.
    Cleared,
}

/// Writes `x` as an unsigned LEB128 varint.
pub(crate) fn write_uvarint(dst: &mut Vec<u8>, mut x: u64) {
    while x >= 128 {
        dst.push(x as u8 | 128);
        x >>= 7;
    }
    dst.push(x as u8);
}

/// Reads an unsigned LEB128 varint, returning the value and the number of
/// bytes consumed. The caller guarantees a complete encoding.
pub(crate) fn read_uvarint(data: &[u8]) -> (u64, usize) {
    if data[0] < 128 {
        return (data[0] as u64, 1);
    }
    let mut x = 0u64;
    let mut i = 0;
    while i < 10 {
        let b = data[i] as u64;
        x |= (b & 127) << (7 * i);
        if b < 128 {
            return (x, i + 1);
        }
        i += 1;
    }
    (x, i)
}

/// Decoded view of an entry, valid while the owning block is borrowed.
pub struct EntryView<'a> {
    pub shard: usize,
    pub time: i64,
    pub key: Cow<'a, [u8]>,
    pub value: &'a [u8],
    pub expires: i64,
    pub flags: u32,
    pub cas: u64,
}

/// One cache entry: the flat byte block and nothing else.
pub(crate) struct EntryBlock(Box<[u8]>);

impl EntryBlock {
    /// Builds a new entry block. Keys up to 128 bytes are sixpacked when
    /// enabled and every key byte is representable; failure to pack is
    /// silent and the raw key is stored instead.
    pub(crate) fn new(
        key: &[u8],
        value: &[u8],
        expires: i64,
        flags: u32,
        cas: u64,
        usecas: bool,
        usesixpack: bool,
    ) -> EntryBlock {
        let mut hdr = 0u8;
        let mut packed: Option<Vec<u8>> = None;
        if usesixpack && key.len() <= SIXPACK_MAX_KEY {
            if let Some(p) = sixpack::pack(key) {
                hdr |= HDR_SIXPACK;
                packed = Some(p);
            }
        }
        let stored_key: &[u8] = packed.as_deref().unwrap_or(key);
        if expires > 0 {
            hdr |= HDR_EXPIRES;
        }
        if flags > 0 {
            hdr |= HDR_FLAGS;
        }
        if usecas {
            hdr |= HDR_CAS;
        }

        let mut buf = Vec::with_capacity(
            1 + TIME_SIZE + 8 + 4 + 8 + 10 + stored_key.len() + 10 + value.len(),
        );
        buf.push(hdr);
        buf.extend_from_slice(&[0u8; TIME_SIZE]);
        if hdr & HDR_EXPIRES != 0 {
            let mut b = [0u8; 8];
            LittleEndian::write_i64(&mut b, expires);
            buf.extend_from_slice(&b);
        }
        if hdr & HDR_FLAGS != 0 {
            let mut b = [0u8; 4];
            LittleEndian::write_u32(&mut b, flags);
            buf.extend_from_slice(&b);
        }
        if hdr & HDR_CAS != 0 {
            let mut b = [0u8; 8];
            LittleEndian::write_u64(&mut b, cas);
            buf.extend_from_slice(&b);
        }
        write_uvarint(&mut buf, stored_key.len() as u64);
        buf.extend_from_slice(stored_key);
        write_uvarint(&mut buf, value.len() as u64);
        buf.extend_from_slice(value);
        EntryBlock(buf.into_boxed_slice())
    }

    fn hdr(&self) -> u8 {
        self.0[0]
    }

    /// Offset of the expires field, when present.
    fn expires_off(&self) -> usize {
        1 + TIME_SIZE
    }

    /// Offset of the varint key length.
    fn keylen_off(&self) -> usize {
        let hdr = self.hdr();
        let mut off = 1 + TIME_SIZE;
        if hdr & HDR_EXPIRES != 0 {
            off += 8;
        }
        if hdr & HDR_FLAGS != 0 {
            off += 4;
        }
        if hdr & HDR_CAS != 0 {
            off += 8;
        }
        off
    }

    /// Total memory size of the block.
    pub(crate) fn memsize(&self) -> usize {
        self.0.len()
    }

    /// The access time.
    pub(crate) fn time(&self) -> i64 {
        LittleEndian::read_i64(&self.0[1..1 + TIME_SIZE])
    }

    /// Sets the access time.
    pub(crate) fn set_time(&mut self, time: i64) {
        LittleEndian::write_i64(&mut self.0[1..1 + TIME_SIZE], time);
    }

    /// The expiration timestamp, zero when the entry never expires.
    pub(crate) fn expires(&self) -> i64 {
        if self.hdr() & HDR_EXPIRES != 0 {
            let off = self.expires_off();
            LittleEndian::read_i64(&self.0[off..off + 8])
        } else {
            0
        }
    }

    /// The opaque client flags.
    pub(crate) fn flags(&self) -> u32 {
        if self.hdr() & HDR_FLAGS != 0 {
            let mut off = 1 + TIME_SIZE;
            if self.hdr() & HDR_EXPIRES != 0 {
                off += 8;
            }
            LittleEndian::read_u32(&self.0[off..off + 4])
        } else {
            0
        }
    }

    /// The compare-and-swap tag, zero when cas is disabled.
    pub(crate) fn cas(&self) -> u64 {
        if self.hdr() & HDR_CAS != 0 {
            let mut off = 1 + TIME_SIZE;
            if self.hdr() & HDR_EXPIRES != 0 {
                off += 8;
            }
            if self.hdr() & HDR_FLAGS != 0 {
                off += 4;
            }
            LittleEndian::read_u64(&self.0[off..off + 8])
        } else {
            0
        }
    }

    fn sixpacked(&self) -> bool {
        self.hdr() & HDR_SIXPACK != 0
    }

    /// The stored key bytes, still packed when sixpack is in effect.
    pub(crate) fn raw_key(&self) -> &[u8] {
        let off = self.keylen_off();
        let (keylen, n) = read_uvarint(&self.0[off..]);
        &self.0[off + n..off + n + keylen as usize]
    }

    /// The original key bytes, decoded when sixpacked.
    pub(crate) fn key(&self) -> Cow<'_, [u8]> {
        let raw = self.raw_key();
        if self.sixpacked() {
            Cow::Owned(sixpack::unpack(raw))
        } else {
            Cow::Borrowed(raw)
        }
    }

    /// The value bytes.
    pub(crate) fn value(&self) -> &[u8] {
        let off = self.keylen_off();
        let (keylen, n) = read_uvarint(&self.0[off..]);
        let voff = off + n + keylen as usize;
        let (vallen, m) = read_uvarint(&self.0[voff..]);
        &self.0[voff + m..voff + m + vallen as usize]
    }

    /// Whether the stored key equals the given raw (unpacked) key.
    pub(crate) fn key_eq(&self, key: &[u8]) -> bool {
        if self.sixpacked() {
            self.key().as_ref() == key
        } else {
            self.raw_key() == key
        }
    }

    /// Compares two entries by original key bytes, shorter key first on a
    /// shared prefix. Raw comparison is valid only when both sides share
    /// the same sixpack state.
    pub(crate) fn compare(&self, other: &EntryBlock) -> Ordering {
        if self.sixpacked() == other.sixpacked() {
            let (a, b) = (self.raw_key(), other.raw_key());
            a.cmp(b)
        } else {
            self.key().as_ref().cmp(other.key().as_ref())
        }
    }

    /// Reason the entry is logically absent, if any. An entry is dead when
    /// its access time predates the shard clear or its ttl has elapsed.
    pub(crate) fn alive(&self, now: i64, clear_time: i64) -> Option<EvictReason> {
        alive_check(self.expires(), self.time(), now, clear_time)
    }

    /// Full decoded view of the entry.
    pub(crate) fn view(&self, shard: usize, now: i64) -> EntryView<'_> {
        EntryView {
            shard,
            time: now,
            key: self.key(),
            value: self.value(),
            expires: self.expires(),
            flags: self.flags(),
            cas: self.cas(),
        }
    }
}

/// Liveness check over already-extracted fields.
pub(crate) fn alive_check(
    expires: i64,
    time: i64,
    now: i64,
    clear_time: i64,
) -> Option<EvictReason> {
    if time < clear_time {
        Some(EvictReason::Cleared)
    } else if expires > 0 && expires <= now {
        Some(EvictReason::Expired)
    } else {
        None
    }
}

/// Adds two timestamps, clamping instead of overflowing.
pub(crate) fn add_clamp(a: i64, b: i64) -> i64 {
    a.saturating_add(b)
}
