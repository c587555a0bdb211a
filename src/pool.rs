//! A fixed-size pool allocator.
//!
//! The region is cut into equal slots ("entries"). Free slots are threaded
//! into an intrusive singly-linked list: each free slot holds a pointer to
//! the next free slot in its first bytes, so the list needs no memory of its
//! own. Allocating pops the head; freeing pushes onto it. Both are O(1) and
//! may happen in any order.
//!
//! ```text
//!   free_head
//!      │
//!      ▼
//!   ┌──────┬──────┬──────┬──────┬──────┬──────┐
//!   │ next─┼──────┼─►next┼─┐    │      │ next─┼─► None
//!   └──────┴──────┴──────┴─┼────┴──────┴──────┘
//!     free   live   free   └───────────► free
//! ```

use alloc::vec;
use core::alloc::Layout;
use core::mem;
use core::ptr::{self, NonNull};

use static_assertions::const_assert;

use crate::align::{align_forward, is_power_of_two, padding_for};
use crate::error::AllocError;
use crate::region::Region;
use crate::SubAllocator;

/// The link stored in the first bytes of every free slot.
#[repr(C)]
struct FreeSlot {
    next: Option<NonNull<FreeSlot>>,
}

const LINK_SIZE: usize = mem::size_of::<FreeSlot>();
const LINK_ALIGN: usize = mem::align_of::<FreeSlot>();
// Option<NonNull<_>> uses the null niche, so a link is exactly one pointer.
const_assert!(LINK_SIZE == mem::size_of::<usize>());

impl FreeSlot {
    /// Write a link into the (free) slot at `ptr`.
    ///
    /// # Safety
    ///
    /// `ptr` must point to a slot of at least `LINK_SIZE` bytes, aligned to
    /// `LINK_ALIGN`, that no live allocation uses.
    unsafe fn write(ptr: NonNull<u8>, next: Option<NonNull<FreeSlot>>) -> NonNull<FreeSlot> {
        let slot = ptr.cast::<FreeSlot>();
        ptr::write(slot.as_ptr(), FreeSlot { next });
        slot
    }
}

/// Problems found walking the free list. All zero in a healthy pool.
#[derive(Default, Debug)]
pub struct Validity {
    /// Links pointing outside the slot area.
    ///
    /// This likely indicates corruption.
    pub out_of_bounds: usize,
    /// Links inside the slot area but not on a slot boundary.
    pub misaligned: usize,
    /// Slots reached more than once: a cycle, usually from a double free.
    pub duplicates: usize,
    /// Whether `live_count + free slots == entry_count` failed to hold.
    pub count_mismatch: bool,
}

impl Validity {
    /// Returns a boolean - a simple check if all cases are 0
    pub fn is_valid(&self) -> bool {
        self.out_of_bounds == 0
            && self.misaligned == 0
            && self.duplicates == 0
            && !self.count_mismatch
    }
}

impl From<Validity> for bool {
    fn from(v: Validity) -> bool {
        v.is_valid()
    }
}

#[derive(Default, Debug)]
pub struct Stats {
    /// Free slots reachable from the head.
    pub length: usize,
    /// Bytes in those slots.
    pub size: usize,
}

/// A pool of equally sized, equally aligned entries over a single region.
///
/// Double frees and frees of pointers that did not come from this pool are
/// not detected beyond a bounds check; see [`free`](#method.free).
pub struct PoolAllocator<R: Region> {
    region: R,
    // Bytes skipped at the front of the region to align the first slot.
    lead: usize,
    entry_size: usize,
    entry_alignment: usize,
    entry_count: usize,
    free_head: Option<NonNull<FreeSlot>>,
    live_count: usize,
}

// The pool owns its region, and every free-list link points into it.
unsafe impl<R: Region + Send> Send for PoolAllocator<R> {}

impl<R: Region> PoolAllocator<R> {
    /// Cut `region` into entries of `entry_size` bytes aligned to
    /// `entry_alignment`.
    ///
    /// Entries are grown to hold at least one free-list link and rounded up
    /// to their alignment. Bytes before the first aligned slot and after the
    /// last whole slot are left unused.
    pub fn new(region: R, entry_size: usize, entry_alignment: usize) -> Result<Self, AllocError> {
        if !is_power_of_two(entry_alignment) {
            return Err(AllocError::Alignment(entry_alignment));
        }
        let entry_alignment = entry_alignment.max(LINK_ALIGN);
        let entry_size = align_forward(entry_alignment, entry_size.max(LINK_SIZE))?;

        let base = region.as_ptr().as_ptr() as usize;
        let lead = padding_for(entry_alignment, base)?.min(region.len());
        let entry_count = (region.len() - lead) / entry_size;

        let mut pool = PoolAllocator {
            region,
            lead,
            entry_size,
            entry_alignment,
            entry_count,
            free_head: None,
            live_count: 0,
        };
        pool.thread_free_list();

        log::debug!(
            "PoolAllocator over {:p}: {} entries of {} bytes (align {})",
            pool.region.as_ptr(),
            entry_count,
            entry_size,
            entry_alignment
        );
        Ok(pool)
    }

    /// A pool whose entries fit exactly one `T`.
    pub fn for_type<T>(region: R) -> Result<Self, AllocError> {
        PoolAllocator::new(region, mem::size_of::<T>(), mem::align_of::<T>())
    }

    // Link every slot, so that the head is the lowest address and
    // allocations walk upwards.
    fn thread_free_list(&mut self) {
        let mut head = None;
        for i in (0..self.entry_count).rev() {
            let slot = self.slot_ptr(i);
            head = Some(unsafe { FreeSlot::write(slot, head) });
        }
        self.free_head = head;
    }

    fn slot_ptr(&self, index: usize) -> NonNull<u8> {
        debug_assert!(index < self.entry_count);
        unsafe {
            let ptr = self
                .region
                .as_ptr()
                .as_ptr()
                .add(self.lead + index * self.entry_size);
            NonNull::new_unchecked(ptr)
        }
    }

    /// Take one entry. Its bytes are zeroed.
    pub fn allocate(&mut self) -> Result<NonNull<u8>, AllocError> {
        let head = match self.free_head {
            Some(head) => head,
            None => {
                log::debug!("PoolAllocator out of capacity: {} entries live", self.live_count);
                return Err(AllocError::OutOfCapacity {
                    requested: self.entry_size,
                    remaining: 0,
                });
            }
        };

        unsafe {
            self.free_head = ptr::read(head.as_ptr()).next;
            // Don't leak the stale link into the caller's memory.
            ptr::write_bytes(head.as_ptr() as *mut u8, 0, self.entry_size);
        }
        self.live_count += 1;
        Ok(head.cast())
    }

    /// Move `value` into a fresh entry.
    pub fn alloc<T>(&mut self, value: T) -> Result<NonNull<T>, AllocError> {
        self.check_fits(mem::size_of::<T>(), mem::align_of::<T>())?;
        let ptr = self.allocate()?.cast::<T>();
        unsafe { ptr.as_ptr().write(value) };
        Ok(ptr)
    }

    fn check_fits(&self, size: usize, align: usize) -> Result<(), AllocError> {
        if size > self.entry_size {
            return Err(AllocError::InvalidSize {
                size,
                limit: self.entry_size,
            });
        }
        if align > self.entry_alignment {
            return Err(AllocError::InvalidSize {
                size: align,
                limit: self.entry_alignment,
            });
        }
        Ok(())
    }

    /// Return the entry at `ptr` to the pool.
    ///
    /// Pointers outside the slot area, or not on a slot boundary, are
    /// rejected with [`AllocError::OutOfBounds`].
    ///
    /// # Safety
    ///
    /// `ptr` must have come from [`allocate`](#method.allocate) on this pool
    /// and not have been freed since. A double free is not detected and will
    /// hand the same entry out twice.
    pub unsafe fn free(&mut self, ptr: NonNull<u8>) -> Result<(), AllocError> {
        let addr = ptr.as_ptr() as usize;
        if self.slot_index(addr).is_none() {
            return Err(AllocError::OutOfBounds(addr));
        }

        debug_assert!(self.live_count > 0, "free of {:#x} with no live entries", addr);
        self.free_head = Some(FreeSlot::write(ptr, self.free_head));
        self.live_count = self.live_count.saturating_sub(1);
        Ok(())
    }

    /// Drop the value at `ptr` in place, then free its entry.
    ///
    /// # Safety
    ///
    /// As for [`free`](#method.free); `ptr` must also come from
    /// [`alloc`](#method.alloc) with the same `T`.
    pub unsafe fn free_value<T>(&mut self, ptr: NonNull<T>) -> Result<(), AllocError> {
        let addr = ptr.as_ptr() as usize;
        if self.slot_index(addr).is_none() {
            return Err(AllocError::OutOfBounds(addr));
        }
        ptr::drop_in_place(ptr.as_ptr());
        self.free(ptr.cast())
    }

    // The index of the slot starting exactly at `addr`, if there is one.
    fn slot_index(&self, addr: usize) -> Option<usize> {
        let start = self.slots_start();
        let offset = addr.checked_sub(start)?;
        if offset % self.entry_size != 0 {
            return None;
        }
        let index = offset / self.entry_size;
        if index < self.entry_count {
            Some(index)
        } else {
            None
        }
    }

    fn slots_start(&self) -> usize {
        self.region.as_ptr().as_ptr() as usize + self.lead
    }

    /// Walk the free list and check it for corruption.
    ///
    /// The walk is bounded by the number of entries, so a cycle cannot hang
    /// it.
    pub fn stats(&self) -> (Validity, Stats) {
        let mut validity = Validity::default();
        let mut stats = Stats::default();
        let mut seen = vec![false; self.entry_count];

        let start = self.slots_start();
        let end = start + self.entry_count * self.entry_size;

        let mut next = self.free_head;
        let mut steps = 0;
        while let Some(slot) = next {
            if steps > self.entry_count {
                break;
            }
            steps += 1;

            let addr = slot.as_ptr() as usize;
            if addr < start || addr >= end {
                validity.out_of_bounds += 1;
                // Can't safely follow a link out of the region.
                break;
            }
            let index = match self.slot_index(addr) {
                Some(index) => index,
                None => {
                    validity.misaligned += 1;
                    break;
                }
            };
            if seen[index] {
                validity.duplicates += 1;
                break;
            }
            seen[index] = true;

            stats.length += 1;
            stats.size += self.entry_size;
            next = unsafe { ptr::read(slot.as_ptr()).next };
        }

        validity.count_mismatch = stats.length + self.live_count != self.entry_count;
        (validity, stats)
    }

    pub fn entry_size(&self) -> usize {
        self.entry_size
    }

    pub fn entry_alignment(&self) -> usize {
        self.entry_alignment
    }

    pub fn entry_count(&self) -> usize {
        self.entry_count
    }

    /// Entries currently handed out.
    pub fn live_count(&self) -> usize {
        self.live_count
    }

    pub fn free_count(&self) -> usize {
        self.entry_count - self.live_count
    }

    /// Bytes usable for entries (excludes leading and trailing slack).
    pub fn capacity(&self) -> usize {
        self.entry_count * self.entry_size
    }

    pub fn used(&self) -> usize {
        self.live_count * self.entry_size
    }

    pub fn remaining(&self) -> usize {
        self.capacity() - self.used()
    }

    pub fn region(&self) -> &R {
        &self.region
    }

    pub fn into_region(self) -> R {
        self.region
    }
}

impl<R: Region> SubAllocator for PoolAllocator<R> {
    fn allocate_layout(&mut self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        self.check_fits(layout.size(), layout.align())?;
        self.allocate()
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, _layout: Layout) {
        if let Err(err) = self.free(ptr) {
            log::warn!("PoolAllocator: ignoring free of {:p}: {}", ptr, err);
        }
    }

    fn capacity(&self) -> usize {
        PoolAllocator::capacity(self)
    }

    fn used(&self) -> usize {
        PoolAllocator::used(self)
    }
}
