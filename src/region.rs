//! Backing memory for the allocators.
//!
//! ## [`Region`](trait.Region.html)
//!
//! A `Region` is a contiguous, fixed-size span of bytes with a known base
//! alignment. Each allocator takes ownership of exactly one region and hands
//! it back (or drops it, releasing the memory) when it is done.
//!
//! ## [`RegionProvider`](trait.RegionProvider.html)
//!
//! `RegionProvider` is a simple trait interface meant to abstract over where
//! regions come from: the global heap ([`HeapProvider`]), or the OS directly
//! (`MmapProvider`, with the `use_libc` feature).
//!
//! ## [`SliceRegion`](struct.SliceRegion.html)
//!
//! `SliceRegion` borrows caller memory, such as an array on the stack, and
//! pretends it is a region. It is mainly useful for testing.

use alloc::alloc::{alloc_zeroed, dealloc};
use core::alloc::Layout;
use core::marker::PhantomData;
use core::ops::Range;
use core::ptr::NonNull;

use crate::align::{alignment_of_address, is_power_of_two};
use crate::error::RegionError;

/// A contiguous span of memory owned by (at most) one allocator.
///
/// # Safety
///
/// Implementors must guarantee that, for as long as the value is alive:
///
/// - `[as_ptr(), as_ptr() + len())` is valid for reads and writes, and no
///   other code accesses it;
/// - the span does not move, even if the `Region` value itself is moved;
/// - `alignment()` is a power of two and `as_ptr()` is aligned to it.
///
/// The memory is released, if at all, when the value is dropped.
pub unsafe trait Region {
    /// The first byte of the region.
    fn as_ptr(&self) -> NonNull<u8>;

    /// The length of the region, in bytes.
    fn len(&self) -> usize;

    /// A power of two that the base address is known to be aligned to.
    fn alignment(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The address range covered by this region.
    fn address_range(&self) -> Range<usize> {
        let start = self.as_ptr().as_ptr() as usize;
        start..start + self.len()
    }
}

/// A source of regions.
///
/// Releasing a region is dropping it, so each acquired region is released
/// exactly once.
pub trait RegionProvider {
    type Region: Region;

    /// Acquire a region of exactly `size` bytes whose base is aligned to
    /// `alignment`.
    fn acquire(&mut self, alignment: usize, size: usize) -> Result<Self::Region, RegionError>;
}

/// Zero-initialised memory from the global allocator.
pub struct HeapRegion {
    ptr: NonNull<u8>,
    layout: Layout,
}

// A HeapRegion owns its memory outright, so it can move between threads.
unsafe impl Send for HeapRegion {}

impl HeapRegion {
    /// Allocate `size` zeroed bytes aligned to `alignment`.
    ///
    /// A zero-sized region performs no allocation; its base is a dangling,
    /// suitably aligned pointer.
    pub fn new(alignment: usize, size: usize) -> Result<HeapRegion, RegionError> {
        if !is_power_of_two(alignment) {
            return Err(RegionError::Alignment(alignment));
        }
        let layout = Layout::from_size_align(size, alignment)
            .map_err(|_| RegionError::Layout { alignment, size })?;

        if size == 0 {
            // Alignment is non-zero, so this is never null.
            let ptr = NonNull::new(alignment as *mut u8).ok_or(RegionError::Layout {
                alignment,
                size,
            })?;
            return Ok(HeapRegion { ptr, layout });
        }

        let raw = unsafe { alloc_zeroed(layout) };
        let ptr = NonNull::new(raw).ok_or(RegionError::OutOfMemory { size })?;
        Ok(HeapRegion { ptr, layout })
    }
}

unsafe impl Region for HeapRegion {
    fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    fn len(&self) -> usize {
        self.layout.size()
    }

    fn alignment(&self) -> usize {
        self.layout.align()
    }
}

impl Drop for HeapRegion {
    fn drop(&mut self) {
        if self.layout.size() != 0 {
            unsafe { dealloc(self.ptr.as_ptr(), self.layout) };
        }
    }
}

/// Hands out [`HeapRegion`]s, keeping count of what it has handed out.
#[derive(Default, Debug)]
pub struct HeapProvider {
    // Just for tracking, not really needed
    pub acquisitions: usize,
    pub bytes: usize,
}

impl RegionProvider for HeapProvider {
    type Region = HeapRegion;

    fn acquire(&mut self, alignment: usize, size: usize) -> Result<HeapRegion, RegionError> {
        let region = HeapRegion::new(alignment, size)?;
        self.acquisitions += 1;
        self.bytes += size;
        Ok(region)
    }
}

/// A region over borrowed memory. Dropping it releases nothing.
pub struct SliceRegion<'a> {
    ptr: NonNull<u8>,
    len: usize,
    _borrow: PhantomData<&'a mut [u8]>,
}

unsafe impl<'a> Send for SliceRegion<'a> {}

impl<'a> SliceRegion<'a> {
    pub fn new(buffer: &'a mut [u8]) -> SliceRegion<'a> {
        let len = buffer.len();
        // A slice pointer is never null, even for an empty slice.
        let ptr = NonNull::from(buffer).cast::<u8>();
        SliceRegion {
            ptr,
            len,
            _borrow: PhantomData,
        }
    }
}

unsafe impl<'a> Region for SliceRegion<'a> {
    fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    fn len(&self) -> usize {
        self.len
    }

    fn alignment(&self) -> usize {
        alignment_of_address(self.ptr.as_ptr() as usize)
    }
}
