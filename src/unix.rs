//! Regions mapped directly from the OS with `mmap`.

use core::ptr::{null_mut, NonNull};

use crate::align::is_power_of_two;
use crate::error::RegionError;
use crate::region::{Region, RegionProvider};

/// An anonymous, private, read/write mapping. Unmapped on drop.
///
/// The base of a mapping is always page aligned.
pub struct MmapRegion {
    ptr: NonNull<u8>,
    len: usize,
    page_size: usize,
}

// The mapping is private to this value.
unsafe impl Send for MmapRegion {}

impl MmapRegion {
    /// Map `size` bytes of zeroed memory.
    pub fn new(size: usize) -> Result<MmapRegion, RegionError> {
        MmapRegion::with_alignment(1, size)
    }

    /// Map `size` bytes aligned to `alignment`, which must not exceed the
    /// page size.
    pub fn with_alignment(alignment: usize, size: usize) -> Result<MmapRegion, RegionError> {
        let page_size = sysconf::page::pagesize();
        if !is_power_of_two(alignment) || alignment > page_size {
            return Err(RegionError::Alignment(alignment));
        }

        if size == 0 {
            // mmap refuses zero-length mappings; a dangling page-aligned base
            // stands in for the empty region.
            let ptr = NonNull::new(page_size as *mut u8)
                .ok_or(RegionError::Layout { alignment, size })?;
            return Ok(MmapRegion {
                ptr,
                len: 0,
                page_size,
            });
        }

        let ptr = unsafe {
            libc::mmap(
                // Address we want the memory at. We don't care, so null it is.
                null_mut(),
                size,
                libc::PROT_WRITE | libc::PROT_READ,
                // MAP_ANON: no file backing. MAP_PRIVATE: not shared with any
                // other process.
                libc::MAP_ANON | libc::MAP_PRIVATE,
                -1,
                0,
            )
        };

        if ptr == libc::MAP_FAILED {
            let err = errno::errno();
            log::debug!("mmap of {} bytes failed: {}", size, err);
            return Err(RegionError::Mmap(err));
        }

        let ptr = NonNull::new(ptr as *mut u8).ok_or(RegionError::OutOfMemory { size })?;
        Ok(MmapRegion {
            ptr,
            len: size,
            page_size,
        })
    }

    /// Number of pages backing this mapping.
    pub fn pages(&self) -> usize {
        (self.len + self.page_size - 1) / self.page_size
    }
}

unsafe impl Region for MmapRegion {
    fn as_ptr(&self) -> NonNull<u8> {
        self.ptr
    }

    fn len(&self) -> usize {
        self.len
    }

    fn alignment(&self) -> usize {
        self.page_size
    }
}

impl Drop for MmapRegion {
    fn drop(&mut self) {
        if self.len == 0 {
            return;
        }
        let res = unsafe { libc::munmap(self.ptr.as_ptr() as *mut libc::c_void, self.len) };
        if res != 0 {
            log::warn!(
                "munmap of {:p} ({} bytes) failed: {}",
                self.ptr,
                self.len,
                errno::errno()
            );
        }
    }
}

/// Hands out [`MmapRegion`]s.
#[derive(Default, Debug)]
pub struct MmapProvider {
    // Just for tracking, not really needed
    pub pages: usize,
    pub acquisitions: usize,
}

impl RegionProvider for MmapProvider {
    type Region = MmapRegion;

    fn acquire(&mut self, alignment: usize, size: usize) -> Result<MmapRegion, RegionError> {
        let region = MmapRegion::with_alignment(alignment, size)?;
        self.pages += region.pages();
        self.acquisitions += 1;
        Ok(region)
    }
}
