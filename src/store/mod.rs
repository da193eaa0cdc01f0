//! On-disk data structures: the arena allocator and the hash index built
//! on top of it.

pub mod arena;
pub mod index;
pub mod layout;

pub use arena::Arena;
pub use index::{Index, IndexIter};
pub use layout::Offset;
