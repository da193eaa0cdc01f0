//! Robin Hood open-addressing hash index, built entirely out of arena
//! allocations: the header, the bucket array, and every interned key all
//! live inside the same mapped file as the values they describe.
use crate::error::{DiskMapError, Result};
use crate::store::arena::Arena;
use crate::store::layout::{self, BucketDescriptor, IndexHeader, Offset};

/// FNV-1a offset basis.
const FNV_OFFSET_BASIS: u64 = 0xcbf29ce484222325;
/// FNV-1a prime.
const FNV_PRIME: u64 = 0x100000001b3;

/// Hash `key` together with its NUL terminator, FNV-1a style, collapsing
/// the one hash value that would otherwise collide with the empty-slot
/// marker.
///
/// The source's hash loop runs one iteration past the last content byte,
/// over the terminating NUL, before its `do/while` condition fails — this
/// mixes a fixed extra round into every hash and is reproduced here rather
/// than "corrected" away.
pub fn fnv1a(key: &[u8]) -> u64 {
    let mut hash = FNV_OFFSET_BASIS;
    for &byte in key.iter().chain(std::iter::once(&0u8)) {
        hash ^= byte as u64;
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    if hash == 0 {
        1
    } else {
        hash
    }
}

/// Handle to a hash index: just the arena offset of its [`IndexHeader`].
/// Cheap to copy, and safe to hold across operations that may grow the
/// arena since it never embeds a pointer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Index {
    header: Offset,
}

/// Maximum load factor before a `rehash` is triggered: `filled` may not
/// exceed `floor(0.9 * bucket_count)`.
const MAX_LOAD_NUM: u64 = 9;
const MAX_LOAD_DEN: u64 = 10;

impl Index {
    /// Allocate a new index with `bucket_count` buckets (must be a power
    /// of two, at least 2) each carrying a `payload_width`-byte value.
    pub fn create(arena: &mut Arena, bucket_count: u64, payload_width: u64) -> Result<Self> {
        debug_assert!(bucket_count >= 2 && bucket_count.is_power_of_two());

        let slot_size = layout::BUCKET_DESC_SIZE + payload_width;
        let buckets_bytes = slot_size
            .checked_mul(bucket_count)
            .ok_or(DiskMapError::Capacity { requested: bucket_count, limit: u64::MAX })?;

        let header = arena.allocate(layout::INDEX_HEADER_SIZE)?;
        let buckets = arena.allocate(buckets_bytes)?;

        let hdr = unsafe { arena.deref_mut::<IndexHeader>(header) };
        hdr.bucket_count = bucket_count;
        hdr.bucket_size = slot_size;
        hdr.filled = 0;
        hdr.max_dist = 0;
        hdr.buckets = buckets;

        tracing::debug!(bucket_count, payload_width, "index created");
        Ok(Index { header })
    }

    /// Wrap an existing index header offset, e.g. one recovered from a
    /// reopened arena or a multi-map parent's payload.
    pub fn at(header: Offset) -> Self {
        Index { header }
    }

    /// Offset of this index's header, usable as a stable handle (for
    /// example, stored as another index's payload to build a multi-map).
    pub fn header_offset(&self) -> Offset {
        self.header
    }

    fn header(&self, arena: &Arena) -> IndexHeader {
        unsafe { *arena.deref::<IndexHeader>(self.header) }
    }

    fn slot_size(&self, arena: &Arena) -> u64 {
        self.header(arena).bucket_size
    }

    /// Width of the fixed payload following each bucket's descriptor —
    /// `bucket_size` minus the descriptor itself.
    fn payload_width(&self, arena: &Arena) -> u64 {
        self.header(arena).bucket_size - layout::BUCKET_DESC_SIZE
    }

    fn slot_offset(&self, arena: &Arena, bucket_index: u64) -> Offset {
        let hdr = self.header(arena);
        hdr.buckets + bucket_index * self.slot_size(arena)
    }

    fn bucket(&self, arena: &Arena, bucket_index: u64) -> BucketDescriptor {
        unsafe { *arena.deref::<BucketDescriptor>(self.slot_offset(arena, bucket_index)) }
    }

    fn set_bucket(&self, arena: &mut Arena, bucket_index: u64, desc: BucketDescriptor) {
        let offset = self.slot_offset(arena, bucket_index);
        let slot = unsafe { arena.deref_mut::<BucketDescriptor>(offset) };
        *slot = desc;
    }

    /// Offset of bucket `bucket_index`'s payload bytes, immediately after
    /// its `BucketDescriptor`.
    fn payload_offset(&self, arena: &Arena, bucket_index: u64) -> Offset {
        self.slot_offset(arena, bucket_index) + layout::BUCKET_DESC_SIZE
    }

    /// Read-only view of bucket `bucket_index`'s fixed-width payload.
    ///
    /// # Safety
    /// `bucket_index` must be within `bucket_count` and the bucket must be
    /// filled; the returned slice borrows the mapping and is invalidated
    /// by any call that may grow the arena.
    pub unsafe fn value<'a>(&self, arena: &'a Arena, bucket_index: u64) -> Result<&'a [u8]> {
        arena.ensure_live()?;
        let width = self.payload_width(arena);
        let offset = self.payload_offset(arena, bucket_index);
        Ok(arena.bytes(offset, width as usize))
    }

    /// Mutable view of bucket `bucket_index`'s fixed-width payload.
    ///
    /// # Safety
    /// Same requirements as [`Index::value`].
    pub unsafe fn value_mut<'a>(
        &self,
        arena: &'a mut Arena,
        bucket_index: u64,
    ) -> Result<&'a mut [u8]> {
        arena.ensure_live()?;
        let width = self.payload_width(arena);
        let offset = self.payload_offset(arena, bucket_index);
        Ok(arena.bytes_mut(offset, width as usize))
    }

    fn key_matches(&self, arena: &Arena, key_handle: Offset, key: &[u8]) -> bool {
        if key_handle == layout::NONE {
            return false;
        }
        let len = key.len() + 1;
        if key_handle + len as u64 > arena.size() {
            return false;
        }
        let stored = unsafe { arena.bytes(key_handle, len) };
        stored[..key.len()] == *key && stored[key.len()] == 0
    }

    /// Intern `key` (plus a NUL terminator) as a fresh arena allocation.
    fn intern_key(&self, arena: &mut Arena, key: &[u8]) -> Result<Offset> {
        let handle = arena.allocate(key.len() as u64 + 1)?;
        let bytes = unsafe { arena.bytes_mut(handle, key.len() + 1) };
        bytes[..key.len()].copy_from_slice(key);
        bytes[key.len()] = 0;
        Ok(handle)
    }

    fn probe_distance(&self, arena: &Arena, bucket_index: u64, hash: u64) -> u64 {
        let bucket_count = self.header(arena).bucket_count;
        let home = hash & (bucket_count - 1);
        bucket_index.wrapping_sub(home) & (bucket_count - 1)
    }

    /// Look up `key`. Returns the bucket index holding it, if present.
    pub fn lookup(&self, arena: &Arena, key: &[u8]) -> Result<Option<u64>> {
        arena.ensure_live()?;
        let hdr = self.header(arena);
        let hash = fnv1a(key);
        let mask = hdr.bucket_count - 1;
        let mut pos = hash & mask;
        for dist in 0..=hdr.max_dist {
            let bucket = self.bucket(arena, pos);
            if bucket.hash == 0 {
                return Ok(None);
            }
            if bucket.hash == hash && self.key_matches(arena, bucket.key, key) {
                return Ok(Some(pos));
            }
            let stored_dist = self.probe_distance(arena, pos, bucket.hash);
            if stored_dist < dist {
                return Ok(None);
            }
            pos = (pos + 1) & mask;
        }
        Ok(None)
    }

    /// Insert `key` if absent. Returns the bucket index holding it, and
    /// whether this call actually claimed a new slot (`false` means the
    /// key already existed and no new slot or key allocation happened) —
    /// strict set semantics, per the fixed resolution of the source's
    /// ambiguous early-return behavior.
    pub fn insert(&self, arena: &mut Arena, key: &[u8]) -> Result<(u64, bool)> {
        if let Some(existing) = self.lookup(arena, key)? {
            return Ok((existing, false));
        }

        self.maybe_rehash(arena)?;

        let key_handle = self.intern_key(arena, key)?;
        let hash = fnv1a(key);
        let result = self.robin_hood_insert(arena, hash, key_handle)?;

        let hdr_offset = self.header;
        let hdr = unsafe { arena.deref_mut::<IndexHeader>(hdr_offset) };
        hdr.filled += 1;

        Ok((result, true))
    }

    /// Core Robin Hood displacement loop: walks forward from `hash`'s home
    /// bucket, swapping the carried record into any slot whose occupant
    /// has traveled a shorter distance than the record being placed. The
    /// bucket index first written to — whether by direct placement or the
    /// first swap — is the one returned, matching the source's `result`
    /// tracking.
    fn robin_hood_insert(&self, arena: &mut Arena, hash: u64, key_handle: Offset) -> Result<u64> {
        let hdr = self.header(arena);
        let mask = hdr.bucket_count - 1;

        let mut carry_hash = hash;
        let mut carry_key = key_handle;
        let mut pos = hash & mask;
        let mut dist: u64 = 0;
        let mut result: Option<u64> = None;
        let mut max_dist = hdr.max_dist;

        loop {
            let existing = self.bucket(arena, pos);
            if existing.hash == 0 {
                self.set_bucket(
                    arena,
                    pos,
                    BucketDescriptor { hash: carry_hash, key: carry_key },
                );
                if result.is_none() {
                    result = Some(pos);
                }
                if dist > max_dist {
                    max_dist = dist;
                }
                break;
            }

            let existing_dist = self.probe_distance(arena, pos, existing.hash);
            if existing_dist < dist {
                self.set_bucket(
                    arena,
                    pos,
                    BucketDescriptor { hash: carry_hash, key: carry_key },
                );
                if result.is_none() {
                    result = Some(pos);
                }
                if dist > max_dist {
                    max_dist = dist;
                }
                carry_hash = existing.hash;
                carry_key = existing.key;
                dist = existing_dist;
            }

            pos = (pos + 1) & mask;
            dist += 1;
        }

        let hdr_offset = self.header;
        let hdr = unsafe { arena.deref_mut::<IndexHeader>(hdr_offset) };
        hdr.max_dist = max_dist;

        Ok(result.expect("robin_hood_insert always places the carried record"))
    }

    fn maybe_rehash(&self, arena: &mut Arena) -> Result<()> {
        let hdr = self.header(arena);
        if hdr.filled + 1 > (hdr.bucket_count * MAX_LOAD_NUM) / MAX_LOAD_DEN {
            self.rehash(arena, hdr.bucket_count * 2)?;
        }
        Ok(())
    }

    /// Grow to `new_bucket_count` (must be a power of two larger than the
    /// current count) and reinsert every live entry.
    ///
    /// The old bucket array is left behind in the arena, overwritten with
    /// `0xFF` bytes so a stray read against a stale offset fails loudly
    /// rather than silently returning zeroed/garbage data — mirroring the
    /// source's rehash, which never reclaims the old array either (no
    /// `free`).
    pub fn rehash(&self, arena: &mut Arena, new_bucket_count: u64) -> Result<()> {
        debug_assert!(new_bucket_count.is_power_of_two() && new_bucket_count >= 2);

        let hdr = self.header(arena);
        let old_buckets = hdr.buckets;
        let old_count = hdr.bucket_count;
        let slot_size = hdr.bucket_size;

        let entries: Vec<(u64, Offset)> = (0..old_count)
            .map(|i| self.bucket(arena, i))
            .filter(|b| b.hash != 0)
            .map(|b| (b.hash, b.key))
            .collect();
        let old_values: Vec<Vec<u8>> = (0..old_count)
            .map(|i| {
                let bucket = self.bucket(arena, i);
                if bucket.hash == 0 {
                    Ok(Vec::new())
                } else {
                    unsafe { self.value(arena, i).map(|v| v.to_vec()) }
                }
            })
            .collect::<Result<Vec<_>>>()?;

        let new_bytes = slot_size
            .checked_mul(new_bucket_count)
            .ok_or(DiskMapError::Capacity { requested: new_bucket_count, limit: u64::MAX })?;
        let new_buckets = arena.allocate(new_bytes)?;

        {
            let hdr_offset = self.header;
            let hdr = unsafe { arena.deref_mut::<IndexHeader>(hdr_offset) };
            hdr.buckets = new_buckets;
            hdr.bucket_count = new_bucket_count;
            hdr.max_dist = 0;
        }

        for (i, (hash, key_handle)) in entries.iter().enumerate() {
            let bucket_index = self.robin_hood_insert(arena, *hash, *key_handle)?;
            let width = old_values[i].len();
            if width > 0 {
                let dst = unsafe { self.value_mut(arena, bucket_index)? };
                dst.copy_from_slice(&old_values[i]);
            }
        }

        let poison = unsafe { arena.bytes_mut(old_buckets, (slot_size * old_count) as usize) };
        poison.fill(0xFF);

        tracing::debug!(old_count, new_bucket_count, "index rehashed");
        Ok(())
    }

    /// Iterate over every filled bucket in ascending index order, yielding
    /// `(bucket_index, key_bytes)`. Mirrors the source's `HTFOREACH`/
    /// `ht_next` scan, which never wraps and simply skips empty slots.
    pub fn iter<'a>(&self, arena: &'a Arena) -> Result<IndexIter<'a>> {
        arena.ensure_live()?;
        Ok(IndexIter { index: *self, arena, next: 0, bucket_count: self.header(arena).bucket_count })
    }

    /// Number of filled buckets.
    pub fn len(&self, arena: &Arena) -> u64 {
        self.header(arena).filled
    }

    /// `true` if no key has been inserted yet.
    pub fn is_empty(&self, arena: &Arena) -> bool {
        self.len(arena) == 0
    }

    /// Insert `outer_key` into a multi-map rooted at `self`, creating a
    /// nested index (with `child_bucket_count` buckets and
    /// `child_payload_width`-byte values) the first time the key is seen.
    /// Returns the handle of the nested index either way.
    pub fn multimap_insert(
        &self,
        arena: &mut Arena,
        outer_key: &[u8],
        child_bucket_count: u64,
        child_payload_width: u64,
    ) -> Result<Index> {
        let (bucket_index, inserted) = self.insert(arena, outer_key)?;
        if inserted {
            let child = Index::create(arena, child_bucket_count, child_payload_width)?;
            let slot = unsafe { self.value_mut(arena, bucket_index)? };
            slot.copy_from_slice(&child.header_offset().to_ne_bytes());
            Ok(child)
        } else {
            self.child_at(arena, bucket_index)
        }
    }

    /// Reconstruct the nested `Index` handle stored as bucket
    /// `bucket_index`'s payload. Requires this index's payload width to be
    /// `size_of::<Offset>()`, i.e. that it was built as a multi-map level.
    pub fn child_at(&self, arena: &Arena, bucket_index: u64) -> Result<Index> {
        let bytes = unsafe { self.value(arena, bucket_index)? };
        let mut raw = [0u8; 8];
        raw.copy_from_slice(&bytes[..8]);
        Ok(Index::at(Offset::from_ne_bytes(raw)))
    }
}

/// Forward scan over an index's filled buckets.
pub struct IndexIter<'a> {
    index: Index,
    arena: &'a Arena,
    next: u64,
    bucket_count: u64,
}

impl<'a> Iterator for IndexIter<'a> {
    type Item = (u64, &'a [u8]);

    fn next(&mut self) -> Option<Self::Item> {
        while self.next < self.bucket_count {
            let i = self.next;
            self.next += 1;
            let bucket = self.index.bucket(self.arena, i);
            if bucket.hash != 0 {
                let len = bucket_key_len(self.arena, bucket.key);
                let key = unsafe { self.arena.bytes(bucket.key, len) };
                return Some((i, &key[..len.saturating_sub(1)]));
            }
        }
        None
    }
}

/// Length of a NUL-terminated key (including the terminator) stored at
/// `handle`.
fn bucket_key_len(arena: &Arena, handle: Offset) -> usize {
    let mut len = 0usize;
    loop {
        let byte = unsafe { arena.bytes(handle + len as u64, 1) }[0];
        len += 1;
        if byte == 0 {
            break;
        }
    }
    len
}
