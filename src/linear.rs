//! A linear ("bump") allocator.
//!
//! Allocations are carved from the front of the region by advancing an
//! offset. There is no individual free; [`LinearAllocator::reset`] releases
//! everything at once.
//!
//! ```text
//!   ┌─────┬───┬─────┬──┬──────┬──────────────────────────┐
//!   │ A1  │pad│ A2  │  │  A3  │        free space        │
//!   └─────┴───┴─────┴──┴──────┴──────────────────────────┘
//!   ▲                         ▲                          ▲
//!   base                    offset                 base + len
//! ```

use core::alloc::Layout;
use core::cell::Cell;
use core::mem;
use core::ptr::{self, NonNull};

use crate::align::{align_forward, is_power_of_two};
use crate::error::AllocError;
use crate::region::Region;
use crate::{SubAllocator, DEFAULT_ALIGNMENT};

/// A bump allocator over a single region.
///
/// Allocation takes `&self`, so typed allocations can hand out references
/// that live as long as the allocator is borrowed; [`reset`](#method.reset)
/// takes `&mut self`, so no such reference survives a reset. Raw pointers
/// from [`allocate`](#method.allocate) are not tracked: using one after a
/// reset is the caller's mistake.
pub struct LinearAllocator<R: Region> {
    region: R,
    offset: Cell<usize>,
    default_alignment: usize,
}

impl<R: Region> LinearAllocator<R> {
    /// Create an allocator over `region` with [`DEFAULT_ALIGNMENT`] for
    /// untyped allocations.
    pub fn new(region: R) -> Self {
        log::debug!(
            "LinearAllocator over {:p}, {} bytes",
            region.as_ptr(),
            region.len()
        );
        LinearAllocator {
            region,
            offset: Cell::new(0),
            default_alignment: DEFAULT_ALIGNMENT,
        }
    }

    /// Create an allocator whose [`allocate`](#method.allocate) aligns to
    /// `alignment`.
    pub fn with_default_alignment(region: R, alignment: usize) -> Result<Self, AllocError> {
        if !is_power_of_two(alignment) {
            return Err(AllocError::Alignment(alignment));
        }
        let mut allocator = LinearAllocator::new(region);
        allocator.default_alignment = alignment;
        Ok(allocator)
    }

    /// Allocate `size` bytes at the default alignment.
    pub fn allocate(&self, size: usize) -> Result<NonNull<u8>, AllocError> {
        self.allocate_aligned(self.default_alignment, size)
    }

    /// Allocate `size` bytes whose address is a multiple of `alignment`.
    pub fn allocate_aligned(&self, alignment: usize, size: usize) -> Result<NonNull<u8>, AllocError> {
        let offset = self.offset.get();
        let current = self.base() + offset;
        let candidate = align_forward(alignment, current)?;
        let padding = candidate - current;

        let remaining = self.region.len() - offset;
        let needed = match padding.checked_add(size) {
            Some(n) if n <= remaining => n,
            _ => {
                log::debug!(
                    "LinearAllocator out of capacity: {} bytes (+{} padding), {} remaining",
                    size,
                    padding,
                    remaining
                );
                return Err(AllocError::OutOfCapacity {
                    requested: size,
                    remaining,
                });
            }
        };

        self.offset.set(offset + needed);
        // offset + padding <= len, so this stays inside the region.
        let ptr = unsafe { self.region.as_ptr().as_ptr().add(offset + padding) };
        Ok(unsafe { NonNull::new_unchecked(ptr) })
    }

    /// Move `value` into the region.
    ///
    /// Values are never dropped individually, so only types without drop
    /// glue are accepted.
    #[allow(clippy::mut_from_ref)]
    pub fn alloc<T: Copy>(&self, value: T) -> Result<&mut T, AllocError> {
        let ptr = self
            .allocate_aligned(mem::align_of::<T>(), mem::size_of::<T>())?
            .cast::<T>();
        unsafe {
            ptr.as_ptr().write(value);
            Ok(&mut *ptr.as_ptr())
        }
    }

    /// Copy `values` into the region.
    #[allow(clippy::mut_from_ref)]
    pub fn alloc_slice_copy<T: Copy>(&self, values: &[T]) -> Result<&mut [T], AllocError> {
        let layout = Layout::array::<T>(values.len()).map_err(|_| AllocError::OutOfCapacity {
            requested: usize::MAX,
            remaining: self.remaining(),
        })?;
        let ptr = self
            .allocate_aligned(layout.align(), layout.size())?
            .cast::<T>();
        unsafe {
            ptr::copy_nonoverlapping(values.as_ptr(), ptr.as_ptr(), values.len());
            Ok(core::slice::from_raw_parts_mut(ptr.as_ptr(), values.len()))
        }
    }

    /// Release every allocation at once.
    pub fn reset(&mut self) {
        self.offset.set(0);
    }

    pub fn capacity(&self) -> usize {
        self.region.len()
    }

    /// Bytes consumed so far, padding included.
    pub fn used(&self) -> usize {
        self.offset.get()
    }

    pub fn remaining(&self) -> usize {
        self.capacity() - self.used()
    }

    pub fn default_alignment(&self) -> usize {
        self.default_alignment
    }

    pub fn region(&self) -> &R {
        &self.region
    }

    /// Give the region back, untouched.
    pub fn into_region(self) -> R {
        self.region
    }

    fn base(&self) -> usize {
        self.region.as_ptr().as_ptr() as usize
    }
}

impl<R: Region> SubAllocator for LinearAllocator<R> {
    fn allocate_layout(&mut self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        self.allocate_aligned(layout.align(), layout.size())
    }

    /// Individual frees are ignored; memory comes back on reset.
    unsafe fn deallocate(&mut self, _ptr: NonNull<u8>, _layout: Layout) {}

    fn capacity(&self) -> usize {
        LinearAllocator::capacity(self)
    }

    fn used(&self) -> usize {
        LinearAllocator::used(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use crate::region::{HeapRegion, SliceRegion};
    use test_env_log::test;

    fn linear(size: usize) -> LinearAllocator<HeapRegion> {
        LinearAllocator::new(HeapRegion::new(16, size).unwrap())
    }

    #[test]
    fn test_bump_sequence() {
        let mut allocator = linear(128);
        assert_eq!(allocator.capacity(), 128);
        assert_eq!(allocator.used(), 0);

        for _ in 0..2 {
            allocator.allocate(13).unwrap();
            assert_eq!(allocator.used(), 13);
            allocator.allocate(13).unwrap();
            assert_eq!(allocator.used(), 26);
            allocator.allocate(37).unwrap();
            assert_eq!(allocator.used(), 63);

            assert_eq!(
                allocator.allocate(70),
                Err(AllocError::OutOfCapacity {
                    requested: 70,
                    remaining: 65
                })
            );
            // A failed allocation leaves the offset alone.
            assert_eq!(allocator.used(), 63);

            allocator.reset();
            assert_eq!(allocator.used(), 0);
        }
    }

    #[test]
    fn test_pointers_are_consecutive() {
        let allocator = linear(64);
        let base = allocator.region().as_ptr().as_ptr();
        let a = allocator.allocate(10).unwrap();
        let b = allocator.allocate(6).unwrap();
        assert_eq!(a.as_ptr(), base);
        assert_eq!(b.as_ptr(), unsafe { base.add(10) });
    }

    #[test]
    fn test_alignment_padding() {
        let allocator = linear(128);
        allocator.allocate_aligned(1, 10).unwrap();
        assert_eq!(allocator.used(), 10);

        let p = allocator.allocate_aligned(16, 20).unwrap();
        assert_eq!(p.as_ptr() as usize % 16, 0);
        assert_eq!(allocator.used(), 36);

        let p = allocator.allocate_aligned(4, 4).unwrap();
        assert_eq!(p.as_ptr() as usize % 4, 0);
        assert_eq!(allocator.used(), 40);

        let p = allocator.allocate_aligned(64, 1).unwrap();
        assert_eq!(p.as_ptr() as usize % 64, 0);
        assert!(allocator.used() <= allocator.capacity());
    }

    #[test]
    fn test_bad_alignment() {
        let allocator = linear(64);
        for &a in &[0usize, 3, 24] {
            assert_eq!(allocator.allocate_aligned(a, 8), Err(AllocError::Alignment(a)));
        }
        assert_eq!(allocator.used(), 0);
        assert!(LinearAllocator::with_default_alignment(HeapRegion::new(8, 8).unwrap(), 6).is_err());
    }

    #[test]
    fn test_default_alignment() {
        let region = HeapRegion::new(16, 64).unwrap();
        let allocator = LinearAllocator::with_default_alignment(region, 8).unwrap();
        assert_eq!(allocator.default_alignment(), 8);
        allocator.allocate(3).unwrap();
        let p = allocator.allocate(3).unwrap();
        assert_eq!(p.as_ptr() as usize % 8, 0);
        assert_eq!(allocator.used(), 11);
    }

    #[test]
    fn test_exact_fill() {
        let allocator = linear(32);
        allocator.allocate(32).unwrap();
        assert_eq!(allocator.remaining(), 0);
        assert!(allocator.allocate(1).is_err());
        // Zero-sized requests still fit at the very end.
        assert!(allocator.allocate(0).is_ok());
    }

    #[test]
    fn test_typed_values() {
        let allocator = linear(128);
        let a = allocator.alloc(3u64).unwrap();
        let b = allocator.alloc([1u16, 2, 3, 4, 5, 6]).unwrap();
        let c = allocator.alloc_slice_copy(&[7u32, 8, 9]).unwrap();
        *a += 1;
        b[5] = 60;
        assert_eq!(*a, 4);
        assert_eq!(*b, [1, 2, 3, 4, 5, 60]);
        assert_eq!(c, &[7, 8, 9]);
        assert_eq!(a as *mut u64 as usize % mem::align_of::<u64>(), 0);
        assert_eq!(c.as_ptr() as usize % mem::align_of::<u32>(), 0);
    }

    #[test]
    fn test_over_slice_region() {
        let mut buffer = [0u8; 48];
        let allocator = LinearAllocator::new(SliceRegion::new(&mut buffer));
        let slot = allocator.alloc_slice_copy(b"hello").unwrap();
        assert_eq!(slot, b"hello");
        let region = allocator.into_region();
        assert_eq!(region.len(), 48);
        drop(region);
        assert_eq!(&buffer[..5], b"hello");
    }

    #[test]
    fn test_move_keeps_state() {
        let allocator = linear(64);
        allocator.allocate(24).unwrap();
        let moved = allocator;
        assert_eq!(moved.used(), 24);
        assert_eq!(moved.capacity(), 64);
    }

    #[test]
    fn test_sub_allocator_layouts() {
        let mut allocator = linear(64);
        let p = allocator
            .allocate_layout(Layout::from_size_align(8, 8).unwrap())
            .unwrap();
        unsafe { allocator.deallocate(p, Layout::from_size_align(8, 8).unwrap()) };
        assert_eq!(SubAllocator::used(&allocator), 8);
        assert_eq!(SubAllocator::remaining(&allocator), 56);
    }
}
