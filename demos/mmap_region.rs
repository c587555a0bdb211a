//! A pool allocator over pages mapped straight from the OS, shared between
//! threads behind a spin lock.

use std::alloc::{GlobalAlloc, Layout};
use std::sync::Arc;
use std::thread;

use region_alloc::{LockedAllocator, MmapProvider, PoolAllocator, RegionProvider};

fn main() {
    env_logger::init();

    let mut provider = MmapProvider::default();
    let region = provider.acquire(64, 1 << 16).expect("mmap failed");
    println!(
        "Mapped {} pages in {} acquisition(s)",
        provider.pages, provider.acquisitions
    );

    let pool = PoolAllocator::new(region, 64, 64).expect("bad pool parameters");
    println!("{} entries of {} bytes", pool.entry_count(), pool.entry_size());
    let locked = Arc::new(LockedAllocator::new(pool));
    let layout = Layout::from_size_align(64, 64).unwrap();

    let handles: Vec<_> = (0..4)
        .map(|t| {
            let locked = Arc::clone(&locked);
            thread::spawn(move || {
                let mut count = 0;
                for _ in 0..1000 {
                    let p = unsafe { locked.alloc(layout) };
                    if p.is_null() {
                        continue;
                    }
                    unsafe {
                        p.write(t as u8);
                        locked.dealloc(p, layout);
                    }
                    count += 1;
                }
                count
            })
        })
        .collect();

    let total: usize = handles.into_iter().map(|h| h.join().unwrap()).sum();
    println!("{} allocations across threads", total);

    let pool = Arc::try_unwrap(locked)
        .ok()
        .and_then(LockedAllocator::into_inner)
        .expect("threads still hold the allocator");
    let (validity, stats) = pool.stats();
    println!("Free list: {:?}, valid: {}", stats, validity.is_valid());
    assert!(validity.is_valid());
}
