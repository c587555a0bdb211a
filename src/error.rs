//! Error types for the allocators and the region providers.
//!
//! Conditions the allocators deliberately do not validate (double frees,
//! out-of-order stack frees, foreign pointers handed to a pool) are not
//! represented here; they are preconditions of the `unsafe` free methods.

use thiserror::Error;

/// An error returned by one of the sub-allocators.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
    /// A caller-supplied alignment (or, for the buddy allocator, the region
    /// length or minimum block size) is not a power of two, or cannot be
    /// satisfied by the region.
    #[error("alignment {0} is not a power of two or cannot be satisfied")]
    Alignment(usize),

    /// There is not enough space left in the region for the request.
    #[error("out of capacity: requested {requested} bytes, {remaining} remaining")]
    OutOfCapacity { requested: usize, remaining: usize },

    /// A pointer passed to `free` does not lie within the allocator's region,
    /// or does not lie on an allocation boundary.
    #[error("pointer {0:#x} is out of bounds for this allocator")]
    OutOfBounds(usize),

    /// A size does not fit the allocator's fixed constraints: a type too large
    /// or too aligned for a pool entry, or a buddy minimum block size that
    /// does not fit the region.
    #[error("invalid size {size}, limit is {limit}")]
    InvalidSize { size: usize, limit: usize },

    /// A pointer inside the buddy region that is not the start of a live
    /// block.
    #[error("pointer {0:#x} is not a live allocation")]
    UnknownPointer(usize),
}

/// An error acquiring a region from a provider.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionError {
    /// The alignment is not a power of two, or the provider cannot satisfy it.
    #[error("alignment {0} is not a power of two or is unsupported by the provider")]
    Alignment(usize),

    /// The alignment/size pair does not form a valid layout.
    #[error("invalid layout: {size} bytes aligned to {alignment}")]
    Layout { alignment: usize, size: usize },

    /// The underlying allocator returned no memory.
    #[error("out of memory acquiring {size} bytes")]
    OutOfMemory { size: usize },

    /// `mmap` failed.
    #[cfg(all(unix, feature = "use_libc"))]
    #[error("mmap failed: {0}")]
    Mmap(errno::Errno),
}
