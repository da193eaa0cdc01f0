//! Memory-mapped persistent hash map.
//!
//! [`Arena`] is a relocatable bump allocator over a growable `mmap`'d file:
//! every allocation is handed back as an [`Offset`], a byte position stable
//! across the remaps that growth causes, never a pointer. [`Index`] is a
//! Robin Hood open-addressing hash index built entirely out of `Arena`
//! allocations — its header, bucket array, and every interned key all live
//! inside the same mapped file as the values they describe. Nesting an
//! `Index` whose payload is another `Index`'s handle gives a multi-map.
//!
//! ```no_run
//! use diskmap::{Arena, Index};
//!
//! # fn main() -> diskmap::Result<()> {
//! let mut arena = Arena::create("example.map", 420)?;
//! let index = Index::create(&mut arena, 2, 8)?;
//! let (bucket, _) = index.insert(&mut arena, b"hello")?;
//! unsafe {
//!     index.value_mut(&mut arena, bucket)?.copy_from_slice(&42u64.to_ne_bytes());
//! }
//! arena.sync()?;
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod store;

pub use error::{DiskMapError, Result};
pub use store::{Arena, Index, IndexIter, Offset};
