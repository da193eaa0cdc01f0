//! Error types for the arena and hash index.
//!
//! Grounded on the layered `#[derive(thiserror::Error)]` style used
//! throughout the reference corpus: one flat enum, `#[from]` conversions
//! from the underlying I/O error, descriptive messages.

use thiserror::Error;

/// Result type returned by every fallible operation in this crate.
pub type Result<T> = std::result::Result<T, DiskMapError>;

/// Errors surfaced by the arena and hash index.
///
/// `Io` and `Capacity` correspond to the source's `IoError`/`CapacityError`
/// taxonomy. Lookup of an absent key is not represented here — it is a
/// normal `Option`/`bool` return, never an error.
#[derive(Error, Debug)]
pub enum DiskMapError {
    /// A filesystem or mmap operation failed.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// An offset, size, or growth target would overflow the arena's
    /// 64-bit address space.
    #[error("capacity exceeded: requested {requested} bytes, limit {limit}")]
    Capacity { requested: u64, limit: u64 },

    /// The arena suffered a fatal I/O or capacity error on a previous
    /// operation and must not be used further.
    #[error("arena is poisoned by a previous fatal error")]
    Poisoned,
}
