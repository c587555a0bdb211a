use core::ptr::NonNull;

use region_alloc::{AllocError, BuddyAllocator, HeapRegion, PoolAllocator, StackAllocator};

use rand::distributions::Distribution;
use rand::seq::SliceRandom;
use rand::{Rng, RngCore, SeedableRng};
use test_env_log::test;

const STEPS: usize = 1024 * 10;

fn seeded_rng() -> rand::rngs::StdRng {
    let seed: u64 = rand::thread_rng().next_u64();
    log::info!("Using seed {}", seed);
    rand::rngs::StdRng::seed_from_u64(seed)
}

// Fill the first and last byte of an allocation with a tag, so overlapping
// allocations show up as clobbered tags.
unsafe fn tag(ptr: NonNull<u8>, size: usize, value: u8) {
    ptr.as_ptr().write(value);
    ptr.as_ptr().add(size - 1).write(value);
}

unsafe fn check_tag(ptr: NonNull<u8>, size: usize, value: u8) {
    assert_eq!(ptr.as_ptr().read(), value);
    assert_eq!(ptr.as_ptr().add(size - 1).read(), value);
}

#[test]
fn test_pool_stress() {
    let mut rng = seeded_rng();
    let region = HeapRegion::new(16, 64 * 32).unwrap();
    let mut allocator = PoolAllocator::new(region, 32, 16).unwrap();
    assert_eq!(allocator.entry_count(), 64);

    // More slots than entries, so the pool runs dry now and then.
    let mut slots: [Option<(NonNull<u8>, u8)>; 96] = [None; 96];

    for step in 0..STEPS {
        let chosen = slots.choose_mut(&mut rng).unwrap();
        match *chosen {
            None => match allocator.allocate() {
                Ok(ptr) => {
                    let value = step as u8;
                    unsafe { tag(ptr, 32, value) };
                    *chosen = Some((ptr, value));
                }
                Err(err) => {
                    assert_eq!(allocator.free_count(), 0);
                    assert_eq!(
                        err,
                        AllocError::OutOfCapacity {
                            requested: 32,
                            remaining: 0
                        }
                    );
                }
            },
            Some((ptr, value)) => {
                unsafe {
                    check_tag(ptr, 32, value);
                    allocator.free(ptr).unwrap();
                }
                *chosen = None;
            }
        }

        let (validity, stats) = allocator.stats();
        if !validity.is_valid() {
            log::info!("Validity: {:?}, Stats: {:?}", validity, stats);
        }
        assert!(validity.is_valid());
        let live = slots.iter().filter(|s| s.is_some()).count();
        assert_eq!(allocator.live_count(), live);
        assert_eq!(stats.length, allocator.entry_count() - live);
        assert_eq!(stats.size + allocator.used(), allocator.capacity());
    }
}

#[test]
fn test_stack_stress() {
    let mut rng = seeded_rng();
    let region = HeapRegion::new(16, 4096).unwrap();
    let mut allocator = StackAllocator::new(region);
    let sizes = rand::distributions::Uniform::new_inclusive(1usize, 96);

    // (pointer, size, tag, used before the push)
    let mut stack: Vec<(NonNull<u8>, usize, u8, usize)> = Vec::new();

    for step in 0..STEPS {
        if stack.is_empty() || rng.gen_bool(0.55) {
            let size = sizes.sample(&mut rng);
            let &align = [1usize, 2, 4, 8, 16, 32].choose(&mut rng).unwrap();
            let before = allocator.used();
            match allocator.allocate_aligned(align, size) {
                Ok(ptr) => {
                    assert_eq!(ptr.as_ptr() as usize % align, 0);
                    let value = step as u8;
                    unsafe { tag(ptr, size, value) };
                    stack.push((ptr, size, value, before));
                }
                Err(AllocError::OutOfCapacity { requested, .. }) => {
                    assert_eq!(requested, size);
                    assert_eq!(allocator.used(), before);
                }
                Err(err) => panic!("unexpected error: {}", err),
            }
        } else if let Some((ptr, size, value, before)) = stack.pop() {
            unsafe {
                check_tag(ptr, size, value);
                allocator.free(ptr).unwrap();
            }
            // Popping restores exactly the offset before the push.
            assert_eq!(allocator.used(), before);
        }
        assert!(allocator.used() <= allocator.capacity());
    }

    while let Some((ptr, size, value, _)) = stack.pop() {
        unsafe {
            check_tag(ptr, size, value);
            allocator.free(ptr).unwrap();
        }
    }
    assert_eq!(allocator.used(), 0);
}

#[test]
fn test_buddy_stress() {
    let mut rng = seeded_rng();
    let region = HeapRegion::new(4096, 64 * 1024).unwrap();
    let mut allocator = BuddyAllocator::new(region, 16).unwrap();
    let range = rand::distributions::Uniform::new_inclusive(1usize, 40);

    // (pointer, requested size, tag, block size)
    let mut pointers: [Option<(NonNull<u8>, usize, u8, usize)>; 128] = [None; 128];
    let mut allocated_size: usize = 0;
    let mut freed_size: usize = 0;

    for step in 0..STEPS {
        let chosen = pointers.choose_mut(&mut rng).unwrap();
        match *chosen {
            None => {
                let size = range.sample(&mut rng) * range.sample(&mut rng);
                let &align = [1usize, 2, 4, 8, 16, 64].choose(&mut rng).unwrap();
                log::debug!("Allocating {}@{}", size, align);
                match allocator.allocate_aligned(align, size) {
                    Ok(ptr) => {
                        assert_eq!(ptr.as_ptr() as usize % align, 0);
                        let order = allocator.order_for(size.max(align)).unwrap();
                        let block = allocator.block_size(order);
                        let value = step as u8;
                        unsafe { tag(ptr, size, value) };
                        *chosen = Some((ptr, size, value, block));
                        allocated_size += block;
                    }
                    Err(AllocError::OutOfCapacity { .. }) => {
                        log::debug!("  out of capacity, {} remaining", allocator.remaining());
                    }
                    Err(err) => panic!("unexpected error: {}", err),
                }
            }
            Some((ptr, size, value, block)) => {
                log::debug!("Deallocating {:?} {}", ptr, size);
                unsafe { check_tag(ptr, size, value) };
                allocator.free(ptr).unwrap();
                *chosen = None;
                freed_size += block;
            }
        }

        let (validity, stats) = allocator.stats();
        log::trace!("Validity: {:?}, Stats: {:?}", validity, stats);
        assert!(validity.is_valid());
        assert_eq!(allocated_size - freed_size, allocator.used());
        assert_eq!(allocator.capacity() - stats.size, allocator.used());
    }

    for slot in pointers.iter_mut() {
        if let Some((ptr, ..)) = slot.take() {
            allocator.free(ptr).unwrap();
        }
    }
    // Everything coalesced back into the whole region.
    assert_eq!(allocator.free_blocks(allocator.max_order()), 1);
    assert_eq!(allocator.stats().1.length, 1);
}
