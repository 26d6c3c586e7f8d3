use std::alloc::{alloc_zeroed, dealloc, realloc, Layout};
use std::time::Instant;

use rallocator::Allocator;

const ROUNDS: usize = 20_000;
const INITIAL: usize = 64;
const GROWN: usize = 4096;

/// Runs `acquire_zero`/`resize`/`release` in a fixed cycle against this
/// crate's allocator, and prints the time it took.
fn bench_rallocator() -> std::time::Duration {
  let mut allocator = Allocator::new();
  let start = Instant::now();

  unsafe {
    for _ in 0..ROUNDS {
      let p = allocator.acquire_zero(INITIAL, 1);
      assert!(!p.is_null(), "rallocator ran out of memory");
      let p = allocator.resize(p, GROWN);
      assert!(!p.is_null(), "rallocator resize failed");
      allocator.release(p);
    }
  }

  start.elapsed()
}

/// Runs the same cycle against the platform's global allocator, as a
/// baseline comparison.
fn bench_system() -> std::time::Duration {
  let start = Instant::now();

  unsafe {
    for _ in 0..ROUNDS {
      let layout = Layout::array::<u8>(INITIAL).unwrap();
      let p = alloc_zeroed(layout);
      assert!(!p.is_null(), "system allocator ran out of memory");
      let grown_layout = Layout::array::<u8>(GROWN).unwrap();
      let p = realloc(p, layout, grown_layout.size());
      assert!(!p.is_null(), "system allocator resize failed");
      dealloc(p, grown_layout);
    }
  }

  start.elapsed()
}

fn main() {
  let rallocator_time = bench_rallocator();
  let system_time = bench_system();

  println!("rallocator: {ROUNDS} acquire_zero/resize/release cycles in {rallocator_time:?}");
  println!("system:     {ROUNDS} acquire_zero/resize/release cycles in {system_time:?}");
}
