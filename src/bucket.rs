//! Segregated free-list buckets.
//!
//! `FreeLists` holds 166 circular doubly-linked lists, one per size class
//! (see `size_class`). Each list is headed by a sentinel — rather than giving
//! every sentinel a real, block-shaped address to point at (the classic C
//! "dummy header" trick), a sentinel is addressed as `Link::Head(index)` and
//! its own next/prev live in two parallel arrays here. Real free blocks are
//! addressed as `Link::Node(address)`, with their next/prev words living
//! inside the block itself (`block::{read,write}_{next,prev}_link`). Either
//! kind of link is resolved through the same handful of helpers below, so
//! `insert`/`remove`/`first_fit` never need to special-case "is this the
//! sentinel?" beyond matching on `Link`.

use crate::block::{self, Link};
use crate::size_class::{bucket_index, NUM_BUCKETS, SMALL_CLASS_COUNT};

pub(crate) struct FreeLists {
  sentinel_next: [Link; NUM_BUCKETS],
  sentinel_prev: [Link; NUM_BUCKETS],
}

impl FreeLists {
  /// Initialises all 166 sentinels as empty (self-linked) lists.
  pub(crate) fn new() -> Self {
    let mut sentinel_next = [Link::Head(0); NUM_BUCKETS];
    let mut sentinel_prev = [Link::Head(0); NUM_BUCKETS];
    for i in 0..NUM_BUCKETS {
      sentinel_next[i] = Link::Head(i as u16);
      sentinel_prev[i] = Link::Head(i as u16);
    }
    Self { sentinel_next, sentinel_prev }
  }

  fn get_next(&self, link: Link) -> Link {
    match link {
      Link::Head(idx) => self.sentinel_next[idx as usize],
      Link::Node(addr) => unsafe { block::read_next_link(addr as *mut u8) },
    }
  }

  fn set_next(&mut self, link: Link, value: Link) {
    match link {
      Link::Head(idx) => self.sentinel_next[idx as usize] = value,
      Link::Node(addr) => unsafe { block::write_next_link(addr as *mut u8, value) },
    }
  }

  fn get_prev(&self, link: Link) -> Link {
    match link {
      Link::Head(idx) => self.sentinel_prev[idx as usize],
      Link::Node(addr) => unsafe { block::read_prev_link(addr as *mut u8) },
    }
  }

  fn set_prev(&mut self, link: Link, value: Link) {
    match link {
      Link::Head(idx) => self.sentinel_prev[idx as usize] = value,
      Link::Node(addr) => unsafe { block::write_prev_link(addr as *mut u8, value) },
    }
  }

  /// Splices `node` in between `before` and `after`, which must currently be
  /// adjacent (`before.next == after`, `after.prev == before`).
  fn link_between(&mut self, before: Link, node: Link, after: Link) {
    self.set_next(before, node);
    self.set_prev(node, before);
    self.set_next(node, after);
    self.set_prev(after, node);
  }

  /// Inserts the free block at `addr` (total size `size`) into its bucket,
  /// keeping the bucket sorted non-decreasing by size with ties broken
  /// oldest-first (new block goes after existing equal-sized ones). Sets the
  /// block's free bit. O(k) in the bucket's length, O(1) for the exact-size
  /// fast path.
  pub(crate) fn insert(&mut self, addr: usize, size: u64) {
    unsafe { block::set_free(addr as *mut u8, true) };

    let idx = bucket_index(size);
    let head = Link::Head(idx as u16);
    let node = Link::Node(addr);

    if idx < SMALL_CLASS_COUNT {
      // Every block in an exact-size bucket has the same size, so appending
      // at the tail is indistinguishable from a sorted, oldest-first insert
      // and cheaper.
      let tail = self.get_prev(head);
      self.link_between(tail, node, head);
      return;
    }

    let mut cursor = head;
    loop {
      let next = self.get_next(cursor);
      match next {
        Link::Head(_) => break,
        Link::Node(other) => {
          let other_size = unsafe { block::size_of_block(other as *mut u8) };
          if other_size <= size {
            cursor = next;
          } else {
            break;
          }
        }
      }
    }
    let after = self.get_next(cursor);
    self.link_between(cursor, node, after);
  }

  /// Unlinks the block at `addr` from whatever bucket it is currently in.
  /// O(1): the block's own `next`/`prev` links name its neighbours directly,
  /// with no need to know which bucket it lives in.
  pub(crate) fn remove(&mut self, addr: usize) {
    let node = Link::Node(addr);
    let prev = self.get_prev(node);
    let next = self.get_next(node);
    self.set_next(prev, next);
    self.set_prev(next, prev);
  }

  /// Finds and removes the first free block whose size is at least `size`,
  /// starting at `size`'s bucket and scanning forward through larger
  /// buckets on a miss. Each bucket is sorted ascending, so the first hit in
  /// any given bucket is the best fit within that bucket.
  pub(crate) fn first_fit(&mut self, size: u64) -> Option<usize> {
    let start = bucket_index(size);
    for idx in start..NUM_BUCKETS {
      let head = Link::Head(idx as u16);
      let mut cursor = self.get_next(head);
      while let Link::Node(addr) = cursor {
        let node_size = unsafe { block::size_of_block(addr as *mut u8) };
        if node_size >= size {
          self.remove(addr);
          return Some(addr);
        }
        cursor = self.get_next(Link::Node(addr));
      }
    }
    None
  }

  /// Total count of free blocks across every bucket. Test/diagnostic only.
  #[cfg(test)]
  pub(crate) fn total_free_blocks(&self) -> usize {
    let mut count = 0;
    for idx in 0..NUM_BUCKETS {
      let mut cursor = self.get_next(Link::Head(idx as u16));
      while let Link::Node(addr) = cursor {
        count += 1;
        cursor = self.get_next(Link::Node(addr));
      }
    }
    count
  }

  /// Collects the address of every free block across all buckets. Test-only:
  /// the invariant walker in `allocator` cross-checks this set against a
  /// physical walk of every mapping (invariant 2 — a block is free iff it
  /// appears in exactly one bucket's list).
  #[cfg(test)]
  pub(crate) fn free_addrs(&self) -> std::collections::HashSet<usize> {
    let mut addrs = std::collections::HashSet::new();
    for idx in 0..NUM_BUCKETS {
      let mut cursor = self.get_next(Link::Head(idx as u16));
      while let Link::Node(addr) = cursor {
        let fresh = addrs.insert(addr);
        assert!(fresh, "block at {addr:#x} appears in more than one bucket");
        cursor = self.get_next(Link::Node(addr));
      }
    }
    addrs
  }

  /// Asserts every bucket is sorted non-decreasing by size. Test-only,
  /// backs the bucket-ordering invariant check.
  #[cfg(test)]
  pub(crate) fn assert_sorted(&self) {
    for idx in 0..NUM_BUCKETS {
      let mut cursor = self.get_next(Link::Head(idx as u16));
      let mut last_size: Option<u64> = None;
      while let Link::Node(addr) = cursor {
        let size = unsafe { block::size_of_block(addr as *mut u8) };
        assert!(unsafe { block::is_free(addr as *mut u8) }, "block in bucket {idx} is not free");
        if let Some(last) = last_size {
          assert!(size >= last, "bucket {idx} is not sorted: {last} before {size}");
        }
        last_size = Some(size);
        cursor = self.get_next(Link::Node(addr));
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  fn new_backed_block(buf: &mut [u8], size: u64, mapping: u16) -> usize {
    let addr = buf.as_mut_ptr() as usize;
    unsafe {
      block::write_word0(addr as *mut u8, size, mapping, false);
      block::write_footer(addr as *mut u8, size);
    }
    addr
  }

  #[test]
  fn insert_then_first_fit_round_trips_a_single_block() {
    let mut buf = vec![0u8; 64];
    let addr = new_backed_block(&mut buf, 64, 0);
    let mut lists = FreeLists::new();

    lists.insert(addr, 64);
    assert_eq!(lists.total_free_blocks(), 1);

    let found = lists.first_fit(64).expect("should find the block");
    assert_eq!(found, addr);
    assert_eq!(lists.total_free_blocks(), 0);
  }

  #[test]
  fn first_fit_misses_when_nothing_is_large_enough() {
    let mut buf = vec![0u8; 32];
    let addr = new_backed_block(&mut buf, 32, 0);
    let mut lists = FreeLists::new();
    lists.insert(addr, 32);

    assert!(lists.first_fit(64).is_none());
    // The miss must not have removed the block.
    assert_eq!(lists.total_free_blocks(), 1);
  }

  #[test]
  fn first_fit_advances_to_the_next_bucket_on_a_size_miss() {
    // Two blocks of different exact-size classes; request something that
    // only the larger one satisfies.
    let mut small_buf = vec![0u8; 40];
    let mut big_buf = vec![0u8; 96];
    let small_addr = new_backed_block(&mut small_buf, 40, 0);
    let big_addr = new_backed_block(&mut big_buf, 96, 0);

    let mut lists = FreeLists::new();
    lists.insert(small_addr, 40);
    lists.insert(big_addr, 96);

    let found = lists.first_fit(80).expect("should skip the small bucket");
    assert_eq!(found, big_addr);
  }

  #[test]
  fn exact_bucket_insert_preserves_oldest_first_ordering() {
    // Three same-sized blocks inserted in sequence; removing via first_fit
    // repeatedly should return them in insertion order (oldest first).
    let mut bufs: Vec<Vec<u8>> = (0..3).map(|_| vec![0u8; 40]).collect();
    let addrs: Vec<usize> = bufs
      .iter_mut()
      .map(|b| new_backed_block(b, 40, 0))
      .collect();

    let mut lists = FreeLists::new();
    for &addr in &addrs {
      lists.insert(addr, 40);
    }

    for &expected in &addrs {
      let found = lists.first_fit(40).unwrap();
      assert_eq!(found, expected);
    }
  }

  #[test]
  fn large_bucket_insert_keeps_ascending_order_with_ties_after() {
    // All three land in the same power-of-two bucket (class covering
    // [1024, 2048)) but with different sizes; insertion order is scrambled.
    let sizes = [1536u64, 1040, 2040];
    let mut bufs: Vec<Vec<u8>> = sizes.iter().map(|&s| vec![0u8; s as usize]).collect();
    let addrs: Vec<usize> = bufs
      .iter_mut()
      .zip(sizes.iter())
      .map(|(b, &s)| new_backed_block(b, s, 0))
      .collect();

    let mut lists = FreeLists::new();
    for (&addr, &size) in addrs.iter().zip(sizes.iter()) {
      lists.insert(addr, size);
    }
    lists.assert_sorted();

    // Smallest (1040) must come out first from a first_fit(1040).
    let found = lists.first_fit(1040).unwrap();
    assert_eq!(found, addrs[1]);
  }

  #[test]
  fn remove_unlinks_without_disturbing_siblings() {
    let mut bufs: Vec<Vec<u8>> = (0..3).map(|_| vec![0u8; 40]).collect();
    let addrs: Vec<usize> = bufs
      .iter_mut()
      .map(|b| new_backed_block(b, 40, 0))
      .collect();

    let mut lists = FreeLists::new();
    for &addr in &addrs {
      lists.insert(addr, 40);
    }

    lists.remove(addrs[1]);
    assert_eq!(lists.total_free_blocks(), 2);

    // The remaining two should still be found via first_fit, in order.
    assert_eq!(lists.first_fit(40).unwrap(), addrs[0]);
    assert_eq!(lists.first_fit(40).unwrap(), addrs[2]);
  }
}
