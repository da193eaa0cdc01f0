//! `#[repr(C)]` structures that live in the memory-mapped file.
//!
//! Every cross-structure reference is an [`Offset`] — a byte position from
//! the start of the mapping — never a raw pointer. Fields are ordered
//! u64-first so `#[repr(C)]` introduces no implicit padding.

/// A byte offset from the base of the mapped region, used in place of an
/// address so remapping never invalidates a stored reference. `0` means
/// "none / absent".
pub type Offset = u64;

/// Sentinel value meaning "no handle".
pub const NONE: Offset = 0;

/// Size of the region header at offset 0.
pub const HEADER_SIZE: Offset = 16;

/// Offset of the head sentinel block, fixed rather than derived from an
/// in-memory handle's size (the source's approach made the on-disk layout
/// depend on host pointer width).
pub const SENTINEL_OFFSET: Offset = HEADER_SIZE;

/// Size of one block descriptor (`prev`, `next`).
pub const BLOCK_DESC_SIZE: Offset = 16;

/// Offset of the tail sentinel, immediately after the head sentinel.
pub const TAIL_SENTINEL_OFFSET: Offset = SENTINEL_OFFSET + BLOCK_DESC_SIZE;

/// Offset returned by the very first `allocate` call on a freshly created
/// arena: header, head sentinel, tail sentinel, then the first payload.
pub const FIRST_ALLOC_OFFSET: Offset = TAIL_SENTINEL_OFFSET + BLOCK_DESC_SIZE;

/// Allocations are aligned to 4-byte boundaries.
pub const ALLOC_ALIGN: Offset = 4;

/// Region header at offset 0 of the mapped file.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct RegionHeader {
    pub next_free: Offset,
    pub size: u64,
}

const _: () = assert!(std::mem::size_of::<RegionHeader>() == HEADER_SIZE as usize);

/// Precedes every allocation; threads allocations into a doubly-linked
/// chain in allocation order. A block's payload length is implicit — the
/// gap between this descriptor and its successor's.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct BlockDescriptor {
    pub prev: Offset,
    pub next: Offset,
}

const _: () = assert!(std::mem::size_of::<BlockDescriptor>() == BLOCK_DESC_SIZE as usize);

/// Header of a hash index, itself an arena allocation.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct IndexHeader {
    pub bucket_count: u64,
    /// `size_of::<BucketDescriptor>() + payload_width`, fixed at creation.
    pub bucket_size: u64,
    pub filled: u64,
    pub max_dist: u64,
    pub buckets: Offset,
}

pub const INDEX_HEADER_SIZE: Offset = std::mem::size_of::<IndexHeader>() as Offset;

/// One slot in the bucket array. `hash == 0` marks an empty slot (the hash
/// function never produces 0 for any input). The slot's payload bytes
/// follow this descriptor in-place.
#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct BucketDescriptor {
    pub hash: u64,
    pub key: Offset,
}

pub const BUCKET_DESC_SIZE: Offset = std::mem::size_of::<BucketDescriptor>() as Offset;

/// Round `offset` up to the next 4-byte boundary strictly greater than it,
/// matching the source's `((next >> 2) + 1) << 2` rounding.
pub fn align4(offset: Offset) -> Option<Offset> {
    (offset / ALLOC_ALIGN).checked_add(1)?.checked_mul(ALLOC_ALIGN)
}

/// Growth sizing policy: 1.5x the minimum required length, rounded up to
/// the next strictly greater multiple of 256.
pub fn round_growth(min_required: Offset) -> Option<Offset> {
    let scaled = min_required.checked_mul(3)?.checked_div(2)?;
    (scaled / 256).checked_add(1)?.checked_mul(256)
}
