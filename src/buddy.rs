//! A binary buddy allocator.
//!
//! The region (a power of two in length) starts out as one free block. A
//! block of order `k` is `min_block_size << k` bytes, always at an offset
//! that is a multiple of its own size. Allocation takes the smallest free
//! block that fits, halving it until it is just big enough and leaving the
//! unused halves on their order's free list. Freeing a block merges it with
//! its buddy (the other half of its parent) for as long as that buddy is
//! also free.
//!
//! ```text
//!   order 2  ┌───────────────────────────────────────────────┐
//!            │                      256                      │
//!            └───────────────────────────────────────────────┘
//!   order 1  ┌───────────────────────┬───────────────────────┐
//!            │          128          │          128          │
//!            └───────────────────────┴───────────────────────┘
//!   order 0  ┌───────────┬───────────┐
//!            │    64     │    64     │  buddy = offset ^ size
//!            └───────────┴───────────┘
//! ```
//!
//! Free lists and the order of every live block are kept in side tables
//! keyed by offset, not inside the region, so nothing is written into the
//! blocks themselves. Those tables live on the global heap: a
//! `BuddyAllocator` cannot itself serve as the global allocator.

use alloc::collections::{BTreeMap, BTreeSet};
use alloc::vec::Vec;
use core::alloc::Layout;
use core::mem;
use core::ptr::{self, NonNull};

use crate::align::{alignment_of_address, is_power_of_two};
use crate::error::AllocError;
use crate::region::Region;
use crate::SubAllocator;

/// Problems found checking the free lists. All zero in a healthy allocator.
#[derive(Default, Debug)]
pub struct Validity {
    /// Free blocks whose buddy is also free at the same order. These should
    /// have been coalesced.
    pub unmerged_buddies: usize,
    /// Blocks not aligned to their own size, or running past the region.
    pub misaligned: usize,
    /// Blocks (free or live) overlapping another block.
    ///
    /// This is really bad.
    pub overlaps: usize,
    /// Whether free bytes plus used bytes failed to add up to the capacity.
    pub accounting_mismatch: bool,
}

impl Validity {
    pub fn is_valid(&self) -> bool {
        self.unmerged_buddies == 0
            && self.misaligned == 0
            && self.overlaps == 0
            && !self.accounting_mismatch
    }
}

impl From<Validity> for bool {
    fn from(v: Validity) -> bool {
        v.is_valid()
    }
}

#[derive(Default, Debug)]
pub struct Stats {
    /// Number of free blocks, across all orders.
    pub length: usize,
    /// Bytes in free blocks.
    pub size: usize,
    /// Size of the largest free block, 0 if there is none.
    pub largest: usize,
}

/// A buddy allocator over a single power-of-two region.
pub struct BuddyAllocator<R: Region> {
    region: R,
    min_block_size: usize,
    max_order: usize,
    // Offsets of free blocks, indexed by order.
    free_lists: Vec<BTreeSet<usize>>,
    // Offset -> order of every live block.
    live: BTreeMap<usize, usize>,
    used: usize,
}

impl<R: Region> BuddyAllocator<R> {
    /// Manage `region` in blocks of at least `min_block_size` bytes.
    ///
    /// # Errors
    ///
    /// - [`AllocError::Alignment`] if the region length or `min_block_size`
    ///   is not a power of two;
    /// - [`AllocError::InvalidSize`] if the region is empty or smaller than
    ///   `min_block_size`.
    pub fn new(region: R, min_block_size: usize) -> Result<Self, AllocError> {
        let len = region.len();
        if !is_power_of_two(min_block_size) {
            return Err(AllocError::Alignment(min_block_size));
        }
        if len == 0 {
            return Err(AllocError::InvalidSize {
                size: 0,
                limit: min_block_size,
            });
        }
        if !is_power_of_two(len) {
            return Err(AllocError::Alignment(len));
        }
        if min_block_size > len {
            return Err(AllocError::InvalidSize {
                size: min_block_size,
                limit: len,
            });
        }

        let max_order = (len / min_block_size).trailing_zeros() as usize;
        let mut free_lists = Vec::with_capacity(max_order + 1);
        free_lists.resize_with(max_order + 1, BTreeSet::new);
        free_lists[max_order].insert(0);

        log::debug!(
            "BuddyAllocator over {:p}: {} bytes, min block {}, {} orders",
            region.as_ptr(),
            len,
            min_block_size,
            max_order + 1
        );

        Ok(BuddyAllocator {
            region,
            min_block_size,
            max_order,
            free_lists,
            live: BTreeMap::new(),
            used: 0,
        })
    }

    /// Size in bytes of a block of `order`.
    pub fn block_size(&self, order: usize) -> usize {
        self.min_block_size << order
    }

    /// The order of the smallest block holding `size` bytes, or `None` if
    /// even the whole region is too small.
    pub fn order_for(&self, size: usize) -> Option<usize> {
        let block = size.max(self.min_block_size).checked_next_power_of_two()?;
        let order = (block / self.min_block_size).trailing_zeros() as usize;
        if order > self.max_order {
            None
        } else {
            Some(order)
        }
    }

    /// Allocate a block of at least `size` bytes.
    ///
    /// Every block is aligned to its own size, up to the alignment of the
    /// region's base.
    pub fn allocate(&mut self, size: usize) -> Result<NonNull<u8>, AllocError> {
        self.allocate_aligned(1, size)
    }

    /// Allocate a block of at least `size` bytes whose address is a multiple
    /// of `alignment`.
    ///
    /// The block is made at least `alignment` bytes long, so that its own
    /// alignment suffices. Alignments beyond that of the region's base cannot
    /// be met and fail with [`AllocError::Alignment`].
    pub fn allocate_aligned(
        &mut self,
        alignment: usize,
        size: usize,
    ) -> Result<NonNull<u8>, AllocError> {
        if !is_power_of_two(alignment) || alignment > self.base_alignment() {
            return Err(AllocError::Alignment(alignment));
        }

        let target = match self.order_for(size.max(alignment)) {
            Some(order) => order,
            None => return Err(self.out_of_capacity(size)),
        };

        let mut order = match (target..=self.max_order).find(|&o| !self.free_lists[o].is_empty()) {
            Some(order) => order,
            None => return Err(self.out_of_capacity(size)),
        };

        let offset = match self.free_lists[order].iter().next().copied() {
            Some(offset) => offset,
            None => return Err(self.out_of_capacity(size)),
        };
        self.free_lists[order].remove(&offset);

        while order > target {
            order -= 1;
            let upper = offset + self.block_size(order);
            log::trace!("split order {} block at {:#x}", order + 1, offset);
            self.free_lists[order].insert(upper);
        }

        self.live.insert(offset, target);
        self.used += self.block_size(target);

        // offset + block size <= len, so the block lies inside the region.
        let ptr = unsafe { self.region.as_ptr().as_ptr().add(offset) };
        Ok(unsafe { NonNull::new_unchecked(ptr) })
    }

    /// Move `value` into a fresh block.
    pub fn alloc<T>(&mut self, value: T) -> Result<NonNull<T>, AllocError> {
        let ptr = self
            .allocate_aligned(mem::align_of::<T>(), mem::size_of::<T>())?
            .cast::<T>();
        unsafe { ptr.as_ptr().write(value) };
        Ok(ptr)
    }

    /// Return the block at `ptr`, merging it with its free buddies.
    ///
    /// The order of the block is looked up in the side table, so pointers
    /// this allocator did not hand out (or already took back) are reported
    /// rather than corrupting the free lists. The caller must still not use
    /// the memory afterwards.
    pub fn free(&mut self, ptr: NonNull<u8>) -> Result<(), AllocError> {
        let addr = ptr.as_ptr() as usize;
        if !self.region.address_range().contains(&addr) {
            return Err(AllocError::OutOfBounds(addr));
        }
        let mut offset = addr - self.base();
        let mut order = self
            .live
            .remove(&offset)
            .ok_or(AllocError::UnknownPointer(addr))?;
        self.used -= self.block_size(order);

        while order < self.max_order {
            let size = self.block_size(order);
            let buddy = offset ^ size;
            if !self.free_lists[order].remove(&buddy) {
                break;
            }
            log::trace!("merge order {} blocks {:#x} and {:#x}", order, offset, buddy);
            offset &= !size;
            order += 1;
        }

        self.free_lists[order].insert(offset);
        Ok(())
    }

    /// Drop the value at `ptr` in place, then free its block.
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`alloc`](#method.alloc) on this allocator with
    /// the same `T`, and must not have been freed.
    pub unsafe fn free_value<T>(&mut self, ptr: NonNull<T>) -> Result<(), AllocError> {
        let offset = (ptr.as_ptr() as usize).wrapping_sub(self.base());
        if !self.live.contains_key(&offset) {
            return Err(AllocError::UnknownPointer(ptr.as_ptr() as usize));
        }
        ptr::drop_in_place(ptr.as_ptr());
        self.free(ptr.cast())
    }

    /// Check the free lists for blocks that should have merged, misplaced
    /// blocks and overlaps, and total up the free space.
    pub fn stats(&self) -> (Validity, Stats) {
        let mut validity = Validity::default();
        let mut stats = Stats::default();
        let len = self.region.len();

        let mut spans: Vec<(usize, usize)> = Vec::with_capacity(self.live.len());
        for (order, list) in self.free_lists.iter().enumerate() {
            let size = self.block_size(order);
            for &offset in list {
                if offset % size != 0 || offset + size > len {
                    validity.misaligned += 1;
                }
                if order < self.max_order && offset & size == 0 && list.contains(&(offset ^ size)) {
                    validity.unmerged_buddies += 1;
                }
                stats.length += 1;
                stats.size += size;
                stats.largest = stats.largest.max(size);
                spans.push((offset, offset + size));
            }
        }
        for (&offset, &order) in &self.live {
            spans.push((offset, offset + self.block_size(order)));
        }

        spans.sort_unstable();
        validity.overlaps = spans.windows(2).filter(|w| w[0].1 > w[1].0).count();
        validity.accounting_mismatch = stats.size + self.used != len;

        (validity, stats)
    }

    /// Number of free blocks of `order`.
    pub fn free_blocks(&self, order: usize) -> usize {
        self.free_lists.get(order).map_or(0, BTreeSet::len)
    }

    /// Number of blocks currently handed out.
    pub fn live_blocks(&self) -> usize {
        self.live.len()
    }

    /// Size of the largest free block, if any.
    pub fn largest_free_block(&self) -> Option<usize> {
        (0..=self.max_order)
            .rev()
            .find(|&o| !self.free_lists[o].is_empty())
            .map(|o| self.block_size(o))
    }

    pub fn min_block_size(&self) -> usize {
        self.min_block_size
    }

    pub fn max_order(&self) -> usize {
        self.max_order
    }

    pub fn capacity(&self) -> usize {
        self.region.len()
    }

    /// Bytes in live blocks, rounding included.
    pub fn used(&self) -> usize {
        self.used
    }

    pub fn remaining(&self) -> usize {
        self.capacity() - self.used
    }

    pub fn region(&self) -> &R {
        &self.region
    }

    pub fn into_region(self) -> R {
        self.region
    }

    fn base(&self) -> usize {
        self.region.as_ptr().as_ptr() as usize
    }

    fn base_alignment(&self) -> usize {
        alignment_of_address(self.base()).max(self.region.alignment())
    }

    fn out_of_capacity(&self, size: usize) -> AllocError {
        log::debug!(
            "BuddyAllocator out of capacity: {} bytes, largest free block {:?}",
            size,
            self.largest_free_block()
        );
        AllocError::OutOfCapacity {
            requested: size,
            remaining: self.remaining(),
        }
    }
}

impl<R: Region> SubAllocator for BuddyAllocator<R> {
    fn allocate_layout(&mut self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        self.allocate_aligned(layout.align(), layout.size())
    }

    unsafe fn deallocate(&mut self, ptr: NonNull<u8>, _layout: Layout) {
        if let Err(err) = self.free(ptr) {
            log::warn!("BuddyAllocator: ignoring free of {:p}: {}", ptr, err);
        }
    }

    fn capacity(&self) -> usize {
        BuddyAllocator::capacity(self)
    }

    fn used(&self) -> usize {
        BuddyAllocator::used(self)
    }
}
