//! A short walk through each allocator, printing what happens.

use region_alloc::{
    BuddyAllocator, HeapRegion, LinearAllocator, PoolAllocator, SliceRegion, StackAllocator,
};

#[derive(Debug, Clone, Copy)]
struct Particle {
    position: [f32; 3],
    mass: f32,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::init();

    // A linear allocator over a buffer on the stack.
    let mut buffer = [0u8; 256];
    let mut linear = LinearAllocator::new(SliceRegion::new(&mut buffer));
    {
        let name = linear.alloc_slice_copy(b"region")?;
        let count = linear.alloc(42u32)?;
        println!(
            "linear: {:?} and {} in {} of {} bytes",
            std::str::from_utf8(name)?,
            count,
            linear.used(),
            linear.capacity()
        );
    }
    linear.reset();
    println!("linear: reset, {} bytes used", linear.used());

    // A stack: frees must come in reverse order.
    let mut stack = StackAllocator::new(HeapRegion::new(16, 1024)?);
    let a = stack.allocate_aligned(16, 100)?;
    let b = stack.alloc(Particle {
        position: [1.0, 2.0, 3.0],
        mass: 0.5,
    })?;
    println!("stack: two allocations, {} bytes used", stack.used());
    unsafe {
        println!("stack: popped {:?}", b.as_ptr().read());
        stack.free_value(b)?;
        stack.free(a)?;
    }
    println!("stack: empty again, {} bytes used", stack.used());

    // A pool of particles, freed in any order.
    let mut pool = PoolAllocator::for_type::<Particle>(HeapRegion::new(16, 4096)?)?;
    let particles = (0..10)
        .map(|i| {
            pool.alloc(Particle {
                position: [i as f32; 3],
                mass: 1.0,
            })
        })
        .collect::<Result<Vec<_>, _>>()?;
    for p in particles.iter().step_by(2) {
        unsafe { pool.free_value(*p)? };
    }
    let (validity, stats) = pool.stats();
    println!(
        "pool: {} of {} entries live; free list {:?}, valid: {}",
        pool.live_count(),
        pool.entry_count(),
        stats,
        validity.is_valid()
    );

    // A buddy allocator splitting and merging blocks.
    let mut buddy = BuddyAllocator::new(HeapRegion::new(4096, 4096)?, 64)?;
    let small = buddy.allocate(10)?;
    let large = buddy.allocate(1000)?;
    println!(
        "buddy: {} bytes used, largest free block {:?}",
        buddy.used(),
        buddy.largest_free_block()
    );
    buddy.free(small)?;
    buddy.free(large)?;
    let (validity, stats) = buddy.stats();
    println!("buddy: coalesced to {:?}, valid: {}", stats, validity.is_valid());

    Ok(())
}
