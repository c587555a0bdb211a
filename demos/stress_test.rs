//! Churn a buddy allocator with random object sizes and check its free lists
//! after every step.
//!
//! Runs in three phases: fill the region up to a target number of live
//! objects, churn (free or allocate at random) for a number of steps, then
//! drain everything and check that the region coalesced back into one block.
//!
//! USAGE: stress_test [STEPS] [LIVE_TARGET] [LOG2_REGION_SIZE]

use std::ptr::NonNull;

use region_alloc::{AllocError, BuddyAllocator, HeapRegion};

use rand::distributions::{Distribution, Uniform};
use rand::{Rng, RngCore, SeedableRng};

struct Params {
    steps: usize,
    live_target: usize,
    log2_region_size: usize,
}

impl Params {
    fn from_args() -> Params {
        let mut args = std::env::args().skip(1).map(|a| a.parse::<usize>().ok());
        let mut next = |default| args.next().flatten().unwrap_or(default);
        Params {
            steps: next(64 * 1024),
            live_target: next(1024),
            log2_region_size: next(24),
        }
    }
}

// An object is a run of u64s counting up from a seed, so any overlap with
// another object shows up as a broken count.
struct Object {
    ptr: NonNull<u64>,
    len: usize,
    seed: u64,
}

impl Object {
    fn fill(&self) {
        let words = unsafe { std::slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) };
        for (i, w) in words.iter_mut().enumerate() {
            *w = self.seed.wrapping_add(i as u64);
        }
    }

    fn intact(&self) -> bool {
        let words = unsafe { std::slice::from_raw_parts(self.ptr.as_ptr(), self.len) };
        words
            .iter()
            .enumerate()
            .all(|(i, &w)| w == self.seed.wrapping_add(i as u64))
    }
}

struct Heap<G: Rng> {
    buddy: BuddyAllocator<HeapRegion>,
    objects: Vec<Object>,
    words: Uniform<usize>,
    rng: G,
    failures: usize,
}

impl<G: Rng> Heap<G> {
    fn create(&mut self) {
        let len = self.words.sample(&mut self.rng);
        match self.buddy.allocate_aligned(8, len * 8) {
            Ok(ptr) => {
                let object = Object {
                    ptr: ptr.cast(),
                    len,
                    seed: self.rng.gen(),
                };
                object.fill();
                self.objects.push(object);
            }
            Err(AllocError::OutOfCapacity { .. }) => self.failures += 1,
            Err(err) => panic!("allocation of {} words failed: {}", len, err),
        }
    }

    fn destroy(&mut self) {
        if self.objects.is_empty() {
            return;
        }
        let ix = self.rng.gen_range(0, self.objects.len());
        let object = self.objects.swap_remove(ix);
        assert!(object.intact(), "object at {:p} was overwritten", object.ptr);
        self.buddy.free(object.ptr.cast()).unwrap();
    }

    fn check(&self) {
        let (validity, stats) = self.buddy.stats();
        if !validity.is_valid() {
            panic!("invalid free lists: {:?} ({:?})", validity, stats);
        }
    }

    fn report(&self, label: &str) {
        let (_, stats) = self.buddy.stats();
        println!(
            "{:>8}: {} live objects, {} / {} bytes used, {} failed allocations, free blocks {:?}",
            label,
            self.objects.len(),
            self.buddy.used(),
            self.buddy.capacity(),
            self.failures,
            stats
        );
    }
}

fn main() {
    env_logger::init();
    let params = Params::from_args();

    let seed: u64 = rand::thread_rng().next_u64();
    log::info!("Using seed {}", seed);

    let region = HeapRegion::new(4096, 1 << params.log2_region_size).expect("could not acquire region");
    let mut heap = Heap {
        buddy: BuddyAllocator::new(region, 16).expect("bad buddy parameters"),
        objects: Vec::new(),
        words: Uniform::new_inclusive(1, 512),
        rng: rand::rngs::StdRng::seed_from_u64(seed),
        failures: 0,
    };

    while heap.objects.len() < params.live_target && heap.failures == 0 {
        heap.create();
        heap.check();
    }
    heap.report("fill");

    for step in 1..=params.steps {
        // Lean towards the target population.
        let p_create = if heap.objects.len() < params.live_target { 0.6 } else { 0.4 };
        if heap.rng.gen_bool(p_create) {
            heap.create();
        } else {
            heap.destroy();
        }
        heap.check();
        if step % 8192 == 0 {
            heap.report(&format!("{}", step));
        }
    }

    while !heap.objects.is_empty() {
        heap.destroy();
    }
    heap.check();
    heap.report("drain");
    assert_eq!(heap.buddy.stats().1.length, 1);
}
