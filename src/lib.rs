#![no_std]

//! Sub-allocators over a single pre-acquired memory region.
//!
//! Each allocator takes ownership of one [`Region`](region/trait.Region.html),
//! a fixed span of memory acquired up front (from the global heap, from
//! `mmap`, or borrowed from the caller), and carves it up with one strategy:
//!
//! - [`LinearAllocator`]: bump an offset forward; release everything at once.
//! - [`StackAllocator`]: like linear, but allocations can be freed in
//!   last-in, first-out order.
//! - [`PoolAllocator`]: equally sized entries, freed in any order.
//! - [`BuddyAllocator`]: power-of-two blocks that split and coalesce.
//!
//! None of them ever grows or returns memory piecemeal: when an allocator is
//! dropped its region is dropped, and that releases the memory. Use
//! `into_region` to get the region back instead.
//!
//! All allocators implement [`SubAllocator`], and [`LockedAllocator`] wraps
//! any of them in a spin lock so it can be shared between threads or serve as
//! a [`GlobalAlloc`](https://doc.rust-lang.org/core/alloc/trait.GlobalAlloc.html).
//!
//! ```
//! use region_alloc::{HeapRegion, PoolAllocator};
//!
//! let region = HeapRegion::new(16, 1024).unwrap();
//! let mut pool = PoolAllocator::new(region, 64, 16).unwrap();
//! let a = pool.allocate().unwrap();
//! let b = pool.allocate().unwrap();
//! assert_ne!(a, b);
//! unsafe {
//!     pool.free(a).unwrap();
//!     pool.free(b).unwrap();
//! }
//! assert!(pool.stats().0.is_valid());
//! ```

extern crate alloc;
#[cfg(test)]
extern crate std;

use core::alloc::Layout;
use core::ptr::NonNull;

pub mod align;
pub mod buddy;
pub mod error;
pub mod linear;
pub mod locked;
pub mod pool;
pub mod region;
pub mod stack;
#[cfg(all(unix, feature = "use_libc"))]
pub mod unix;

pub use crate::buddy::BuddyAllocator;
pub use crate::error::{AllocError, RegionError};
pub use crate::linear::LinearAllocator;
pub use crate::locked::LockedAllocator;
pub use crate::pool::PoolAllocator;
pub use crate::region::{HeapProvider, HeapRegion, Region, RegionProvider, SliceRegion};
pub use crate::stack::StackAllocator;
#[cfg(all(unix, feature = "use_libc"))]
pub use crate::unix::{MmapProvider, MmapRegion};

/// The alignment `allocate(size)` uses on linear and stack allocators unless
/// they were built with another.
pub const DEFAULT_ALIGNMENT: usize = 1;

/// The interface shared by all the sub-allocators, in terms of
/// [`Layout`](https://doc.rust-lang.org/core/alloc/struct.Layout.html).
///
/// This roughly corresponds to the `Allocator` trait in Rust nightly, but
/// takes `&mut self`; wrap an allocator in a
/// [`LockedAllocator`](locked/struct.LockedAllocator.html) to share it.
pub trait SubAllocator {
    /// Allocate memory fitting `layout`.
    fn allocate_layout(&mut self, layout: Layout) -> Result<NonNull<u8>, AllocError>;

    /// Give back memory from [`allocate_layout`](#tymethod.allocate_layout).
    ///
    /// Allocators that cannot free individually (linear) ignore this. The
    /// stack allocator only pops the allocation on top and leaks the rest.
    /// Frees that the allocator can detect are bad are logged and ignored.
    ///
    /// # Safety
    ///
    /// `ptr` must have come from this allocator with the same `layout`, must
    /// not have been freed already, and must not be used afterwards.
    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, layout: Layout);

    /// Total bytes managed.
    fn capacity(&self) -> usize;

    /// Bytes in use, including padding and rounding.
    fn used(&self) -> usize;

    fn remaining(&self) -> usize {
        self.capacity() - self.used()
    }
}
