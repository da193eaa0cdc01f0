//! Relocatable arena allocator over a growable memory-mapped file.
//!
//! Every allocation is identified by an [`Offset`] rather than a raw
//! pointer, so growing the mapping — which may move it to a new virtual
//! address — never invalidates anything a caller has stored. Raw pointers
//! obtained through [`Arena::bytes`]/[`Arena::deref`] are only valid until
//! the next call that may allocate or grow; the arena does not let one
//! outlive that window in its own API.
use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use memmap2::MmapMut;

use crate::error::{DiskMapError, Result};
use crate::store::layout::{self, BlockDescriptor, Offset, RegionHeader};

/// The memory-mapped file and the bump allocator on top of it.
///
/// `create`/`open` bind an `Arena` to a path; `allocate` hands back
/// `Offset`s; `grow` extends the backing file and remaps. Single-threaded
/// only — see the crate-level docs for the concurrency model.
pub struct Arena {
    file: File,
    mmap: MmapMut,
    path: PathBuf,
    poisoned: bool,
}

impl Arena {
    /// Create a new arena-backed file, initializing the region header and
    /// the head/tail sentinel blocks.
    ///
    /// `initial_size` is clamped up to at least
    /// [`layout::FIRST_ALLOC_OFFSET`] bytes — anything smaller couldn't
    /// hold the header and sentinels this function writes.
    pub fn create(path: impl AsRef<Path>, initial_size: u64) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&path)?;

        let mapped_size = initial_size.max(layout::FIRST_ALLOC_OFFSET);
        file.set_len(mapped_size)?;

        let mut mmap = unsafe { MmapMut::map_mut(&file)? };
        mmap.fill(0);

        let mut arena = Arena {
            file,
            mmap,
            path,
            poisoned: false,
        };
        arena.init_layout(mapped_size);
        arena.sync()?;

        tracing::debug!(path = %arena.path.display(), size = mapped_size, "arena created");
        Ok(arena)
    }

    /// Open a previously created arena file. The mapped length is whatever
    /// the file's current length is, which `create`/`grow` always keep in
    /// sync with the region header's `size` field.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let file = OpenOptions::new().read(true).write(true).open(&path)?;
        let mmap = unsafe { MmapMut::map_mut(&file)? };
        let arena = Arena {
            file,
            mmap,
            path,
            poisoned: false,
        };
        tracing::debug!(path = %arena.path.display(), size = arena.size(), "arena opened");
        Ok(arena)
    }

    fn init_layout(&mut self, size: u64) {
        {
            let header = unsafe { self.deref_mut::<RegionHeader>(0) };
            header.size = size;
            header.next_free = layout::TAIL_SENTINEL_OFFSET;
        }
        {
            let head = unsafe { self.deref_mut::<BlockDescriptor>(layout::SENTINEL_OFFSET) };
            head.prev = layout::NONE;
            head.next = layout::TAIL_SENTINEL_OFFSET;
        }
        {
            let tail = unsafe { self.deref_mut::<BlockDescriptor>(layout::TAIL_SENTINEL_OFFSET) };
            tail.prev = layout::SENTINEL_OFFSET;
            tail.next = layout::NONE;
        }
    }

    /// Path of the backing file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current mapped length in bytes.
    pub fn size(&self) -> u64 {
        self.mmap.len() as u64
    }

    pub(crate) fn ensure_live(&self) -> Result<()> {
        if self.poisoned {
            Err(DiskMapError::Poisoned)
        } else {
            Ok(())
        }
    }

    /// Reserve `size` bytes and return the offset of the usable payload
    /// (immediately after the new block's descriptor).
    ///
    /// Walks the block chain from `next_free` looking for a block whose
    /// gap to its successor already fits `size`, or for the tail sentinel,
    /// at which point the arena grows if the current mapping is too small.
    /// Without a `free` operation (see crate docs), the chain never
    /// develops a reusable gap, so this always resolves at the tail — the
    /// walk is kept general for fidelity to that search, not because the
    /// other branch is reachable today.
    pub fn allocate(&mut self, size: u64) -> Result<Offset> {
        self.ensure_live()?;
        match self.allocate_inner(size) {
            Ok(offset) => Ok(offset),
            Err(err) => {
                self.poisoned = true;
                Err(err)
            }
        }
    }

    fn allocate_inner(&mut self, size: u64) -> Result<Offset> {
        let needed = layout::BLOCK_DESC_SIZE
            .checked_add(size)
            .ok_or(DiskMapError::Capacity { requested: size, limit: u64::MAX })?;

        let mut pos = self.header().next_free;
        loop {
            let next = self.block(pos).next;
            if next == layout::NONE {
                break;
            }
            let gap = next - pos;
            if gap > needed {
                break;
            }
            pos = next;
        }

        let prev = self.block(pos).prev;
        let is_tail = self.block(pos).next == layout::NONE;
        if !is_tail {
            // Unreachable without a `free` operation: no gap ever opens up
            // inside the chain, so `next_free` always lands on the tail.
            unreachable!("allocate found a mid-chain gap but this arena never frees blocks");
        }

        let block_offset = pos;
        let raw_end = block_offset
            .checked_add(needed)
            .ok_or(DiskMapError::Capacity { requested: needed, limit: u64::MAX })?;
        let new_tail = layout::align4(raw_end)
            .ok_or(DiskMapError::Capacity { requested: raw_end, limit: u64::MAX })?;
        let required_end = new_tail
            .checked_add(layout::BLOCK_DESC_SIZE)
            .ok_or(DiskMapError::Capacity { requested: new_tail, limit: u64::MAX })?;

        if required_end >= self.size() {
            let target = layout::round_growth(required_end)
                .ok_or(DiskMapError::Capacity { requested: required_end, limit: u64::MAX })?;
            self.grow(target)?;
        }

        {
            let block = unsafe { self.deref_mut::<BlockDescriptor>(block_offset) };
            block.prev = prev;
            block.next = new_tail;
        }
        {
            let tail = unsafe { self.deref_mut::<BlockDescriptor>(new_tail) };
            tail.prev = block_offset;
            tail.next = layout::NONE;
        }
        {
            let prev_block = unsafe { self.deref_mut::<BlockDescriptor>(prev) };
            prev_block.next = block_offset;
        }
        {
            let header = unsafe { self.deref_mut::<RegionHeader>(0) };
            header.next_free = new_tail;
        }

        Ok(block_offset + layout::BLOCK_DESC_SIZE)
    }

    /// Extend the backing file and remap. The mapping may land at a new
    /// virtual address; only `Offset`s survive this call, never raw
    /// pointers derived from the old mapping.
    pub fn grow(&mut self, new_size: u64) -> Result<()> {
        self.ensure_live()?;
        match self.grow_inner(new_size) {
            Ok(()) => Ok(()),
            Err(err) => {
                self.poisoned = true;
                Err(err)
            }
        }
    }

    fn grow_inner(&mut self, new_size: u64) -> Result<()> {
        self.mmap.flush()?;
        self.file.set_len(new_size)?;
        let mmap = unsafe { MmapMut::map_mut(&self.file)? };
        self.mmap = mmap;
        let header = unsafe { self.deref_mut::<RegionHeader>(0) };
        header.size = new_size;
        tracing::debug!(new_size, "arena grown");
        Ok(())
    }

    /// Flush the mapping to disk.
    pub fn sync(&self) -> Result<()> {
        self.ensure_live()?;
        self.mmap.flush()?;
        Ok(())
    }

    /// Sync, then unmap and close.
    pub fn close(self) -> Result<()> {
        self.sync()
    }

    /// Unmap and close without syncing. Used by tests that want to discard
    /// unflushed writes.
    pub fn abandon(self) {
        drop(self);
    }

    /// Borrow `len` bytes starting at `offset`.
    ///
    /// # Safety
    /// `offset + len` must be within the current mapping. The returned
    /// slice is invalidated by any subsequent call that may allocate or
    /// grow.
    pub unsafe fn bytes(&self, offset: Offset, len: usize) -> &[u8] {
        std::slice::from_raw_parts(self.mmap.as_ptr().add(offset as usize), len)
    }

    /// Mutably borrow `len` bytes starting at `offset`.
    ///
    /// # Safety
    /// Same requirements as [`Arena::bytes`].
    pub unsafe fn bytes_mut(&mut self, offset: Offset, len: usize) -> &mut [u8] {
        std::slice::from_raw_parts_mut(self.mmap.as_mut_ptr().add(offset as usize), len)
    }

    /// Reinterpret the bytes at `offset` as `&T`.
    ///
    /// # Safety
    /// `offset` must point to a valid, initialized `T` within the mapping.
    pub unsafe fn deref<T>(&self, offset: Offset) -> &T {
        &*(self.mmap.as_ptr().add(offset as usize) as *const T)
    }

    /// Reinterpret the bytes at `offset` as `&mut T`.
    ///
    /// # Safety
    /// Same requirements as [`Arena::deref`].
    pub unsafe fn deref_mut<T>(&mut self, offset: Offset) -> &mut T {
        &mut *(self.mmap.as_mut_ptr().add(offset as usize) as *mut T)
    }

    fn header(&self) -> RegionHeader {
        unsafe { *self.deref::<RegionHeader>(0) }
    }

    fn block(&self, offset: Offset) -> BlockDescriptor {
        unsafe { *self.deref::<BlockDescriptor>(offset) }
    }
}
