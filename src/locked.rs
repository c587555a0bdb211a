//! Sharing a sub-allocator between threads.
//!
//! ## [`LockedAllocator`](struct.LockedAllocator.html)
//!
//! The sub-allocators are single-threaded: every allocation takes `&mut self`.
//! A `LockedAllocator` wraps one in a spin lock, making it thread-safe, and
//! implements
//! [`core::alloc::GlobalAlloc`](https://doc.rust-lang.org/core/alloc/trait.GlobalAlloc.html)
//! on top of the [`SubAllocator`](../trait.SubAllocator.html) interface.
//!
//! A spin lock rather than an OS mutex keeps this usable without `std`. It
//! can be created empty in a `static` and have its allocator installed
//! later, once a region has been acquired.
//!
//! Installing one as the `#[global_allocator]` only works for allocators
//! that never touch the global heap while the lock is held. The buddy
//! allocator's side tables do, and so does `PoolAllocator::stats`; either
//! would spin forever on the lock. A stack allocator underneath leaks every
//! free that is not on top of the stack, including the old block of each
//! `realloc`.

use core::alloc::{GlobalAlloc, Layout};
use core::ptr::{null_mut, NonNull};

use spin::{Mutex, MutexGuard};

use crate::error::AllocError;
use crate::SubAllocator;

/// A spin-locked, optionally empty slot holding a sub-allocator.
pub struct LockedAllocator<A> {
    inner: Mutex<Option<A>>,
}

impl<A> Default for LockedAllocator<A> {
    fn default() -> Self {
        Self::empty()
    }
}

impl<A> LockedAllocator<A> {
    /// A lock with no allocator in it. Every allocation fails until one is
    /// [installed](#method.install).
    pub const fn empty() -> Self {
        LockedAllocator {
            inner: Mutex::new(None),
        }
    }

    pub fn new(allocator: A) -> Self {
        LockedAllocator {
            inner: Mutex::new(Some(allocator)),
        }
    }

    /// Put `allocator` in the lock, returning whatever was there before.
    ///
    /// Memory handed out by the previous allocator must no longer be freed
    /// through this lock.
    pub fn install(&self, allocator: A) -> Option<A> {
        self.inner.lock().replace(allocator)
    }

    /// Take the allocator out, leaving the lock empty.
    pub fn take(&self) -> Option<A> {
        self.inner.lock().take()
    }

    /// Lock and get at the slot directly.
    ///
    /// Allocation through this lock blocks (spins) while the guard is alive.
    pub fn lock(&self) -> MutexGuard<Option<A>> {
        self.inner.lock()
    }

    /// Run `f` against the allocator under the lock, if one is installed.
    pub fn with<T, F: FnOnce(&mut A) -> T>(&self, f: F) -> Option<T> {
        self.inner.lock().as_mut().map(f)
    }

    pub fn into_inner(self) -> Option<A> {
        self.inner.into_inner()
    }
}

impl<A: SubAllocator> LockedAllocator<A> {
    /// Allocate through the lock, reporting why an allocation failed.
    pub fn try_allocate(&self, layout: Layout) -> Result<NonNull<u8>, AllocError> {
        match self.inner.lock().as_mut() {
            Some(allocator) => allocator.allocate_layout(layout),
            None => Err(AllocError::OutOfCapacity {
                requested: layout.size(),
                remaining: 0,
            }),
        }
    }

    /// Bytes in use, or 0 if the lock is empty.
    pub fn used(&self) -> usize {
        self.with(|a| a.used()).unwrap_or(0)
    }

    /// Bytes still available, or 0 if the lock is empty.
    pub fn remaining(&self) -> usize {
        self.with(|a| a.remaining()).unwrap_or(0)
    }
}

unsafe impl<A: SubAllocator> GlobalAlloc for LockedAllocator<A> {
    unsafe fn alloc(&self, layout: Layout) -> *mut u8 {
        match self.try_allocate(layout) {
            Ok(ptr) => ptr.as_ptr(),
            Err(_) => null_mut(),
        }
    }

    unsafe fn dealloc(&self, ptr: *mut u8, layout: Layout) {
        let ptr = match NonNull::new(ptr) {
            Some(ptr) => ptr,
            None => return,
        };
        if let Some(allocator) = self.inner.lock().as_mut() {
            allocator.deallocate(ptr, layout);
        }
    }
}
