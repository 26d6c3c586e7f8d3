//! The allocator facade: the four public operations.
//!
//! ```text
//!   acquire(n)                         release(p)
//!   ┌───────────────────────┐          ┌───────────────────────────┐
//!   │ align & size-check n  │          │ b := user_ptr_to_block(p) │
//!   │ first_fit(aligned)    │          │ insert b into its bucket  │
//!   │   miss -> fresh_carve │          │ coalesce with successor   │
//!   │ mark b allocated      │          │ coalesce with predecessor │
//!   │ return b + 8          │          └───────────────────────────┘
//!   └───────────────────────┘
//! ```
//!
//! `fresh_carve` pulls a new mapping from the page source, registers it (or
//! fuses it into the previous mapping if physically contiguous), and hands
//! the whole region to `split_coalesce::adjusted` as a single oversized
//! block — the same split machinery `resize`'s shrink-in-place path reuses.

use std::ptr;

use crate::block::{self, MAX_BLOCK_SIZE, MIN_ALLOC};
use crate::bucket::FreeLists;
use crate::error::{set_last_error, AllocError};
use crate::mapping::MappingRegistry;
use crate::page_source::{MmapPageSource, PageSource};
use crate::split_coalesce;

/// Pages are requested from the OS 32 at a time.
const MMAP_UNIT_PAGES: u64 = 32;

/// A segregated-free-list allocator over OS-provided pages.
///
/// Single-threaded. `P` is the page source, defaulted to the
/// real `mmap`-backed one; tests substitute `page_source::VecPageSource`.
pub struct Allocator<P: PageSource = MmapPageSource> {
  lists: FreeLists,
  mappings: MappingRegistry,
  page_source: P,
}

impl Allocator<MmapPageSource> {
  pub fn new() -> Self {
    Self::with_page_source(MmapPageSource::new())
  }
}

impl Default for Allocator<MmapPageSource> {
  fn default() -> Self {
    Self::new()
  }
}

impl<P: PageSource> Allocator<P> {
  /// Builds an allocator over a caller-supplied page source. The 166
  /// sentinels are self-linked at construction — there is no "uninitialised"
  /// state to guard against once the struct exists.
  pub(crate) fn with_page_source(page_source: P) -> Self {
    Self {
      lists: FreeLists::new(),
      mappings: MappingRegistry::new(),
      page_source,
    }
  }

  fn mmap_unit(&self) -> u64 {
    self.page_source.page_size() as u64 * MMAP_UNIT_PAGES
  }

  /// `aligned := max(MIN_ALLOC, roundup8(n) + 16)`, rejecting overflow and
  /// sizes that can't fit the header's 48-bit size field.
  fn sizing(n: u64) -> Option<u64> {
    let rounded = crate::align::roundup8(n)?;
    let total = rounded.checked_add(16)?;
    let total = total.max(MIN_ALLOC);
    if total >= MAX_BLOCK_SIZE {
      return None;
    }
    Some(total)
  }

  /// Pulls a fresh mapping from the page source, registers (or fuses) it,
  /// and carves the requested block out of its head.
  fn fresh_carve(&mut self, want: u64) -> Result<usize, AllocError> {
    let req = crate::align::roundup(want, self.mmap_unit()).ok_or(AllocError::InvalidArgument)?;
    if req >= MAX_BLOCK_SIZE {
      return Err(AllocError::InvalidArgument);
    }

    let (lo, hi) = self.page_source.map(req as usize).map_err(|_| AllocError::OutOfMemory)?;
    let mapping_index = self.mappings.register_or_fuse(lo, hi)?;

    unsafe {
      block::write_word0(lo as *mut u8, req, mapping_index, false);
      block::write_footer(lo as *mut u8, req);
    }

    Ok(split_coalesce::adjusted(&mut self.lists, lo, want))
  }

  /// Acquires a block of at least `n` bytes. Returns null on `n == 0`,
  /// arithmetic overflow, or out-of-memory; see `error::last_error` for
  /// which.
  ///
  /// # Safety
  /// The returned pointer is valid for `n` bytes until the matching
  /// `release`/`resize` call, and must not be read or written past that
  /// point. No other safety precondition applies to this call itself.
  pub unsafe fn acquire(&mut self, n: usize) -> *mut u8 {
    if n == 0 {
      set_last_error(AllocError::InvalidArgument);
      return ptr::null_mut();
    }

    let aligned = match Self::sizing(n as u64) {
      Some(a) => a,
      None => {
        set_last_error(AllocError::InvalidArgument);
        return ptr::null_mut();
      }
    };

    let addr = match self.lists.first_fit(aligned) {
      // `first_fit` only guarantees size >= aligned; re-split any leftover
      // slack off into a free tail, exactly as `fresh_carve` does for its
      // own carve, so a bucket hit never over-allocates the whole block.
      Some(addr) => split_coalesce::adjusted(&mut self.lists, addr, aligned),
      None => match self.fresh_carve(aligned) {
        Ok(addr) => addr,
        Err(err) => {
          set_last_error(err);
          return ptr::null_mut();
        }
      },
    };

    unsafe { block::set_free(addr as *mut u8, false) };
    unsafe { block::user_ptr(addr as *mut u8) }
  }

  /// Releases a block previously returned by `acquire`/`acquire_zero`/
  /// `resize`. A null pointer is a no-op.
  ///
  /// # Safety
  /// `p` must either be null or a pointer this allocator previously handed
  /// back and that has not already been released. Releasing a foreign
  /// pointer, double-releasing, or touching the payload after this call
  /// returns is a client contract violation with undefined behaviour — this
  /// allocator does not and cannot detect it.
  pub unsafe fn release(&mut self, p: *mut u8) {
    if p.is_null() {
      return;
    }

    let addr = unsafe { block::block_ptr(p) } as usize;
    let size = unsafe { block::size_of_block(addr as *mut u8) };
    let mapping_index = unsafe { block::mapping_of_block(addr as *mut u8) };

    self.lists.insert(addr, size);

    let mapping = self.mappings.get(mapping_index);
    let mut merged = addr;

    let next_addr = merged + unsafe { block::size_of_block(merged as *mut u8) } as usize;
    if next_addr < mapping.hi && unsafe { block::is_free(next_addr as *mut u8) } {
      merged = split_coalesce::coalesce(&mut self.lists, merged, next_addr);
    }

    if merged != mapping.lo {
      let (prev_addr, _) = unsafe { block::prev_block_addr(merged as *mut u8) };
      if unsafe { block::is_free(prev_addr as *mut u8) } {
        merged = split_coalesce::coalesce(&mut self.lists, prev_addr as usize, merged);
      }
    }
  }

  /// Acquires `num * size` zero-filled bytes. Rejects `num == 0` and
  /// multiplication overflow; a `size == 0` request falls through to
  /// `acquire(0)`, which is rejected the same way.
  ///
  /// # Safety
  /// Same contract as `acquire`.
  pub unsafe fn acquire_zero(&mut self, num: usize, size: usize) -> *mut u8 {
    if num == 0 {
      set_last_error(AllocError::InvalidArgument);
      return ptr::null_mut();
    }

    let total = match (num as u64).checked_mul(size as u64) {
      Some(total) => total,
      None => {
        set_last_error(AllocError::InvalidArgument);
        return ptr::null_mut();
      }
    };

    let p = unsafe { self.acquire(total as usize) };
    if p.is_null() {
      return p;
    }

    let addr = unsafe { block::block_ptr(p) } as usize;
    let payload_len = (unsafe { block::size_of_block(addr as *mut u8) } - 16) as usize;
    unsafe { ptr::write_bytes(p, 0, payload_len) };
    p
  }

  /// Resizes a block's payload to `n` bytes. `p == null` delegates to
  /// `acquire`; `n == 0` releases `p` and returns null. Shrinking splits the
  /// block in place; growing acquires a fresh block, copies the old payload
  /// over, and releases the original — but only once the new block is
  /// secured. On a failed grow the original block and its contents are left
  /// untouched and null is returned.
  ///
  /// # Safety
  /// Same contract as `acquire`/`release` together: `p` must be null or a
  /// live pointer from this allocator.
  pub unsafe fn resize(&mut self, p: *mut u8, n: usize) -> *mut u8 {
    if p.is_null() {
      return unsafe { self.acquire(n) };
    }
    if n == 0 {
      unsafe { self.release(p) };
      return ptr::null_mut();
    }

    let addr = unsafe { block::block_ptr(p) } as usize;
    let size = unsafe { block::size_of_block(addr as *mut u8) };
    let old_payload = (size - 16) as usize;

    if n <= old_payload {
      let want = match Self::sizing(n as u64) {
        Some(want) => want,
        None => {
          set_last_error(AllocError::InvalidArgument);
          return ptr::null_mut();
        }
      };
      split_coalesce::adjusted(&mut self.lists, addr, want);
      return p;
    }

    let q = unsafe { self.acquire(n) };
    if q.is_null() {
      return ptr::null_mut();
    }
    unsafe { ptr::copy_nonoverlapping(p, q, old_payload) };
    unsafe { self.release(p) };
    q
  }

  /// Walks every mapping's blocks physically and checks the invariants of
  /// spec §8 that no single module can see on its own: header/footer
  /// agreement, the 8-byte/`MIN_ALLOC` size constraints, each mapping's
  /// blocks summing to its byte length, no two physically adjacent blocks
  /// both free, and the bucket-vs-physical-walk free set agreeing exactly.
  /// Test-only; panics on the first violation found.
  #[cfg(test)]
  fn check_invariants(&self) {
    self.lists.assert_sorted();
    let bucket_free = self.lists.free_addrs();
    let mut walked_free = std::collections::HashSet::new();

    for (_, mapping) in self.mappings.iter() {
      let mut addr = mapping.lo;
      let mut sum = 0u64;
      let mut prev_free = false;
      while addr < mapping.hi {
        let (size, _mapping_idx, free) = unsafe { block::read_word0(addr as *mut u8) };
        let footer = unsafe { block::read_footer(addr as *mut u8, size) };
        assert_eq!(size, footer, "header/footer size mismatch at {addr:#x}");
        assert_eq!(size % 8, 0, "block size not a multiple of 8 at {addr:#x}");
        assert!(size >= MIN_ALLOC, "block smaller than MIN_ALLOC at {addr:#x}");
        assert!(
          !(prev_free && free),
          "two physically adjacent free blocks at {addr:#x} were not coalesced"
        );
        if free {
          walked_free.insert(addr);
        }
        sum += size;
        prev_free = free;
        addr += size as usize;
      }
      assert_eq!(addr, mapping.hi, "blocks overran mapping bound at {:#x}", mapping.hi);
      assert_eq!(sum, (mapping.hi - mapping.lo) as u64, "mapping block sizes do not sum to its length");
    }

    assert_eq!(bucket_free, walked_free, "bucket contents disagree with a physical walk of free blocks");
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::page_source::VecPageSource;

  const PAGE: usize = 4096;
  const MMAP_UNIT: usize = PAGE * 32;

  /// `units` counts whole mmap units (32 pages each) of backing storage —
  /// `fresh_carve` always requests a whole number of these, so anything
  /// smaller silently fails every mapping request.
  fn test_allocator(units: usize) -> Allocator<VecPageSource> {
    Allocator::with_page_source(VecPageSource::new(units * MMAP_UNIT, PAGE))
  }

  fn is_aligned(p: *mut u8, align: usize) -> bool {
    (p as usize) % align == 0
  }

  #[test]
  fn cold_allocator_carves_a_mapping_and_splits_off_a_free_tail() {
    let mut alloc = test_allocator(1);
    unsafe {
      let p = alloc.acquire(8);
      assert!(!p.is_null());
      assert!(is_aligned(p, 8));

      let block_addr = block::block_ptr(p) as usize;
      // roundup8(8) + 16 == 24, but MIN_ALLOC(32) is a floor.
      assert_eq!(block::size_of_block(block_addr as *mut u8), 32);

      // The mmap-unit-sized mapping minus the 32-byte head should now sit
      // as a single free block in the appropriate large bucket.
      assert_eq!(alloc.lists.total_free_blocks(), 1);
    }
    alloc.check_invariants();
  }

  #[test]
  fn acquire_then_release_then_acquire_reuses_the_same_pointer() {
    let mut alloc = test_allocator(1);
    unsafe {
      let p = alloc.acquire(8);
      assert!(!p.is_null());
      alloc.release(p);
      // Releasing should have fully coalesced the mapping back into one
      // block, which the next acquire(8) re-splits from the same base.
      assert_eq!(alloc.lists.total_free_blocks(), 1);
      let p2 = alloc.acquire(8);
      assert_eq!(p, p2);
      // The bucket hit must be re-split down to the requested size, not
      // handed out whole — otherwise the entire mapping is now "allocated"
      // for an 8-byte request and no free tail remains.
      assert_eq!(alloc.lists.total_free_blocks(), 1);
      assert_eq!(block::size_of_block(block::block_ptr(p2) as *mut u8), 32);
    }
    alloc.check_invariants();
  }

  #[test]
  fn two_allocations_then_both_released_fully_coalesce() {
    let mut alloc = test_allocator(2);
    unsafe {
      let p1 = alloc.acquire(1000);
      let p2 = alloc.acquire(1000);
      assert!(!p1.is_null() && !p2.is_null());

      alloc.release(p1);
      alloc.release(p2);

      assert_eq!(alloc.lists.total_free_blocks(), 1);
      let addr = alloc.lists.first_fit(1).unwrap();
      assert_eq!(block::size_of_block(addr as *mut u8) as usize, MMAP_UNIT);
      // first_fit just removed it from its bucket; put it back before the
      // invariant walk, which cross-checks bucket contents against a
      // physical scan of every mapping.
      alloc.lists.insert(addr, MMAP_UNIT as u64);
    }
    alloc.check_invariants();
  }

  #[test]
  fn acquire_zero_returns_a_fully_zeroed_buffer() {
    let mut alloc = test_allocator(1);
    unsafe {
      let p = alloc.acquire_zero(4, 1024);
      assert!(!p.is_null());
      let bytes = std::slice::from_raw_parts(p, 4096);
      assert!(bytes.iter().all(|&b| b == 0));
    }
  }

  #[test]
  fn resize_grow_preserves_original_bytes() {
    let mut alloc = test_allocator(1);
    unsafe {
      let p = alloc.acquire_zero(4, 1024);
      assert!(!p.is_null());
      let bytes = std::slice::from_raw_parts_mut(p, 4096);
      for (i, b) in bytes.iter_mut().enumerate() {
        *b = (i % 251) as u8;
      }

      let q = alloc.resize(p, 8192);
      assert!(!q.is_null());
      let grown = std::slice::from_raw_parts(q, 8192);
      for i in 0..4096 {
        assert_eq!(grown[i], (i % 251) as u8);
      }
    }
  }

  #[test]
  fn resize_shrink_is_in_place() {
    let mut alloc = test_allocator(1);
    unsafe {
      let p = alloc.acquire(4096);
      assert!(!p.is_null());
      let q = alloc.resize(p, 8);
      assert_eq!(p, q, "shrinking must never move the block");
    }
  }

  #[test]
  fn acquire_rejects_zero_size() {
    let mut alloc = test_allocator(1);
    unsafe {
      assert!(alloc.acquire(0).is_null());
    }
    assert_eq!(crate::error::last_error(), Some(AllocError::InvalidArgument));
  }

  #[test]
  fn acquire_rejects_size_overflow() {
    let mut alloc = test_allocator(1);
    unsafe {
      assert!(alloc.acquire(usize::MAX).is_null());
    }
    assert_eq!(crate::error::last_error(), Some(AllocError::InvalidArgument));
  }

  #[test]
  fn fresh_carve_rejects_a_want_whose_mmap_rounding_overflows_the_header_field() {
    // `sizing()` only bars `want >= MAX_BLOCK_SIZE`; rounding a borderline
    // `want` up to a whole mmap unit can still push it past that limit, and
    // that must be caught before the size is ever written into the header
    // (which would silently mask it) or the footer (which wouldn't).
    let mut alloc = test_allocator(1);
    let want = block::MAX_BLOCK_SIZE - 8;
    let result = alloc.fresh_carve(want);
    assert!(matches!(result, Err(AllocError::InvalidArgument)));
  }

  #[test]
  fn release_of_null_is_a_no_op() {
    let mut alloc = test_allocator(1);
    unsafe {
      alloc.release(ptr::null_mut());
    }
    // No panic, and the allocator is still pristine.
    assert_eq!(alloc.mappings.len(), 0);
  }

  #[test]
  fn resize_leaves_original_block_untouched_when_grow_fails() {
    // A single-unit backing store: the first allocation consumes the whole
    // unit's worth of page-source capacity even though most of it stays
    // free, so growing into a second mapping must fail.
    let mut alloc = test_allocator(1);
    unsafe {
      let p = alloc.acquire(64);
      assert!(!p.is_null());
      *(p as *mut u64) = 0xdead_beef_dead_beef;

      // This grow needs a whole fresh mapping the tiny backing store can't
      // supply.
      let q = alloc.resize(p, 10 * MMAP_UNIT);
      assert!(q.is_null());
      assert_eq!(*(p as *mut u64), 0xdead_beef_dead_beef);
    }
  }

  #[test]
  fn interleaved_acquire_and_release_preserve_every_invariant() {
    // A deterministic interleaving (not a pure LIFO/FIFO pattern) that
    // exercises splitting, coalescing with both neighbours, and bucket
    // reuse, checking the full invariant set after every single call.
    let mut alloc = test_allocator(8);
    let sizes = [16usize, 4000, 200, 64, 900, 32, 5000, 48, 1200, 8];
    let mut live: Vec<*mut u8> = Vec::new();

    unsafe {
      for (i, &size) in sizes.iter().cycle().take(60).enumerate() {
        let p = alloc.acquire(size);
        assert!(!p.is_null(), "acquire({size}) unexpectedly failed at step {i}");
        live.push(p);
        alloc.check_invariants();

        // Release every third outstanding allocation, oldest first, to mix
        // splitting (fresh acquires) with coalescing (frees) in one run.
        if i % 3 == 2 && !live.is_empty() {
          let victim = live.remove(0);
          alloc.release(victim);
          alloc.check_invariants();
        }
      }

      for p in live {
        alloc.release(p);
        alloc.check_invariants();
      }
    }
  }

  #[test]
  fn mapping_registry_exhaustion_surfaces_out_of_memory() {
    // A tiny synthetic page size keeps this scenario's backing store (one
    // mmap unit per mapping, 2^15 mappings) in the single-digit megabytes
    // instead of requiring real page-sized (4 KiB) units times 2^15 — the
    // registry-capacity behaviour being tested doesn't depend on the page
    // source's actual page size. `with_forced_gaps` makes every region
    // non-adjacent to the last, so each miss registers a brand new mapping
    // instead of fusing into the previous one. The request size (232) is
    // chosen so the carved block leaves less than MIN_ALLOC of slack in its
    // 256-byte mapping — no free tail is split off, so no earlier mapping's
    // leftovers can ever satisfy a later `first_fit` and every call is
    // forced to carve a fresh mapping.
    const TINY_PAGE: usize = 8;
    const TINY_UNIT: usize = TINY_PAGE * 32;
    const REQUEST: usize = 232;
    let mut alloc = Allocator::with_page_source(
      VecPageSource::new(crate::mapping::MAX_MAPPINGS * (TINY_UNIT + TINY_PAGE), TINY_PAGE)
        .with_forced_gaps(),
    );
    unsafe {
      for _ in 0..crate::mapping::MAX_MAPPINGS {
        let p = alloc.acquire(REQUEST);
        assert!(!p.is_null(), "acquire should succeed while the registry has room");
      }
      assert_eq!(alloc.mappings.len(), crate::mapping::MAX_MAPPINGS);
      assert_eq!(alloc.lists.total_free_blocks(), 0, "no tail should ever have been split off");

      let p = alloc.acquire(REQUEST);
      assert!(p.is_null(), "the registry is full, this acquire must fail");
      assert_eq!(crate::error::last_error(), Some(AllocError::OutOfMemory));
    }
  }
}
