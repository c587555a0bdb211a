//! A LIFO ("stack") allocator.
//!
//! Like the linear allocator, allocations advance an offset through the
//! region, but each one is preceded by a small header recording how many
//! bytes were skipped to reach it. Freeing the most recent allocation reads
//! that header and rewinds the offset exactly to where it was before.
//!
//! ```text
//!        padding (header included)
//!       ┌───────────────┐
//!   ────┬────────┬──────┬───────────────┬────
//!   ... │  pad   │header│    payload    │ ...
//!   ────┴────────┴──────┴───────────────┴────
//!       ▲               ▲               ▲
//!   old offset         ptr          new offset
//! ```

use core::alloc::Layout;
use core::mem;
use core::ptr::{self, NonNull};

use static_assertions::const_assert;

use crate::align::{align_forward, is_power_of_two};
use crate::error::AllocError;
use crate::region::Region;
use crate::{SubAllocator, DEFAULT_ALIGNMENT};

// The hidden header written just before each payload: the distance from the
// offset before the allocation to the payload itself.
#[derive(Copy, Clone)]
#[repr(C)]
struct StackHeader {
    padding: usize,
}

const HEADER_SIZE: usize = mem::size_of::<StackHeader>();
const HEADER_ALIGN: usize = mem::align_of::<StackHeader>();
const_assert!(HEADER_SIZE == mem::size_of::<usize>());
const_assert!(HEADER_SIZE % HEADER_ALIGN == 0);

/// A stack allocator over a single region.
///
/// Allocations must be freed in the reverse order they were made. [`free`]
/// does not check this: freeing anything but the most recent live allocation
/// corrupts the stack. Through [`SubAllocator::deallocate`], which knows the
/// size, only the top allocation is popped and anything else is leaked.
///
/// [`free`]: #method.free
pub struct StackAllocator<R: Region> {
    region: R,
    offset: usize,
    default_alignment: usize,
}

impl<R: Region> StackAllocator<R> {
    pub fn new(region: R) -> Self {
        log::debug!(
            "StackAllocator over {:p}, {} bytes",
            region.as_ptr(),
            region.len()
        );
        StackAllocator {
            region,
            offset: 0,
            default_alignment: DEFAULT_ALIGNMENT,
        }
    }

    pub fn with_default_alignment(region: R, alignment: usize) -> Result<Self, AllocError> {
        if !is_power_of_two(alignment) {
            return Err(AllocError::Alignment(alignment));
        }
        let mut allocator = StackAllocator::new(region);
        allocator.default_alignment = alignment;
        Ok(allocator)
    }

    /// Allocate `size` bytes at the default alignment (raised to the header's
    /// alignment).
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        self.allocate_aligned(self.default_alignment, size)
    }

    /// Allocate `size` bytes whose address is a multiple of `alignment`.
    ///
    /// The alignment is raised to at least the alignment of `usize`, since a
    /// header is stored right before the returned pointer.
    pub fn allocate_aligned(
        &mut self,
        alignment: usize,
        size: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        if !is_power_of_two(alignment) {
            return Err(AllocError::Alignment(alignment));
        }
        let alignment = alignment.max(HEADER_ALIGN);

        let current = self.base() + self.offset;
        let remaining = self.remaining();
        let out_of_capacity = AllocError::OutOfCapacity {
            requested: size,
            remaining,
        };

        let target = current.checked_add(HEADER_SIZE).ok_or(out_of_capacity)?;
        let candidate = align_forward(alignment, target)?;
        let padding = candidate - current;
        match padding.checked_add(size) {
            Some(needed) if needed <= remaining => {}
            _ => {
                log::debug!(
                    "StackAllocator out of capacity: {} bytes (+{} padding), {} remaining",
                    size,
                    padding,
                    remaining
                );
                return Err(out_of_capacity);
            }
        }

        // The header sits in the padding, directly before the payload, and is
        // aligned because the payload is.
        unsafe {
            let payload = self.region.as_ptr().as_ptr().add(self.offset + padding);
            let header = payload.sub(HEADER_SIZE) as *mut StackHeader;
            ptr::write(header, StackHeader { padding });
            self.offset += padding + size;
            Ok(NonNull::new_unchecked(payload))
        }
    }

    /// Move `value` onto the top of the stack.
    pub fn alloc<T>(&mut self, value: T) -> Result<NonNull<T>, AllocError> {
        let ptr = self
            .allocate_aligned(mem::align_of::<T>(), mem::size_of::<T>())?
            .cast::<T>();
        unsafe { ptr.as_ptr().write(value) };
        Ok(ptr)
    }

    /// Pop the allocation at `ptr`, rewinding the stack to where it was
    /// before that allocation was made.
    ///
    /// Pointers that cannot be a payload of this stack (outside the region's
    /// used part, or not header-aligned) are rejected with
    /// [`AllocError::OutOfBounds`] before anything is read.
    ///
    /// # Safety
    ///
    /// `ptr` must be the most recent allocation from this allocator that has
    /// not yet been freed, and must not be used afterwards.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) -> Result<(), AllocError> {
        let addr = ptr.as_ptr() as usize;
        let base = self.base();
        let in_bounds = addr >= base + HEADER_SIZE && addr <= base + self.offset;
        if !in_bounds || addr % HEADER_ALIGN != 0 {
            return Err(AllocError::OutOfBounds(addr));
        }

        let header = ptr.as_ptr().sub(HEADER_SIZE) as *const StackHeader;
        let padding = ptr::read(header).padding;
        debug_assert!(padding >= HEADER_SIZE, "corrupt stack header at {:#x}", addr);

        let payload_offset = addr - base;
        self.offset = payload_offset
            .checked_sub(padding)
            .ok_or(AllocError::OutOfBounds(addr))?;
        Ok(())
    }

    /// Drop the value at `ptr` in place, then pop it.
    ///
    /// # Safety
    ///
    /// As for [`free`](#method.free); `ptr` must also come from
    /// [`alloc`](#method.alloc) with the same `T`.
    pub unsafe fn free_value<T>(&mut self, ptr: NonNull<T>) -> Result<(), AllocError> {
        ptr::drop_in_place(ptr.as_ptr());
        self.free(ptr.cast())
    }

    /// Release every allocation at once.
    pub fn reset(&mut self) {
        self.offset = 0;
    }

    pub fn capacity(&self) -> usize {
        self.region.len()
    }

    /// Bytes consumed so far, headers and padding included.
    pub fn used(&self) -> usize {
        self.offset
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

    pub fn into_region(self) -> R {
        self.region
    }

    /// Size of the hidden header preceding every allocation.
    pub const fn header_size() -> usize {
        HEADER_SIZE
    }

    fn base(&self) -> usize {
        self.region.as_ptr().as_ptr() as usize
    }
}

impl<R: Region> SubAllocator for StackAllocator<R> {
    fn allocate_layout(&mut self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        self.allocate_aligned(layout.align(), layout.size())
    }

    /// Pops the allocation only if it is the top of the stack. Anything else
    /// is leaked until the stack unwinds below it or is reset, since callers
    /// of this interface (`GlobalAlloc::realloc` among them) free in any
    /// order.
    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, layout: Layout) {
        let end = (ptr.as_ptr() as usize).checked_add(layout.size());
        if end != Some(self.base() + self.offset) {
            log::warn!(
                "StackAllocator: leaking {:p} ({} bytes), not the top of the stack",
                ptr,
                layout.size()
            );
            return;
        }
        if let Err(err) = self.free(ptr) {
            log::warn!("StackAllocator: ignoring free of {:p}: {}", ptr, err);
        }
    }

    fn capacity(&self) -> usize {
        StackAllocator::capacity(self)
    }

    fn used(&self) -> usize {
        StackAllocator::used(self)
    }
}
