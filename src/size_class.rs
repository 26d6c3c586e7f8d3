//! Size classing: the pure function mapping a block's total byte size to a
//! free-list bucket index.
//!
//! 166 classes cover the whole (assumed ≤ 48-bit) address space:
//!
//! ```text
//!   i in [0, 127]    exact size class,  s = 8*i
//!   i in [128, 165]  power-of-two range, s in [2^(i-121)*8, 2^(i-120)*8)
//! ```
//!
//! The second form is equivalent to `i = 121 + floor(log2(s / 8))`, valid once
//! `s >= 1024` (the first large class starts exactly where the last exact
//! class would have: `8 * 128 == 1024`).

/// Number of free-list buckets, indices `0..NUM_BUCKETS`.
pub(crate) const NUM_BUCKETS: usize = 166;

/// Number of exact-size (small) buckets: `0..SMALL_CLASS_COUNT`.
pub(crate) const SMALL_CLASS_COUNT: usize = 128;

/// Byte size at which exact classing gives way to power-of-two classing.
const SMALL_CLASS_LIMIT: u64 = 1024;

/// Maps a block's total size in bytes to its bucket index.
///
/// Total and pure for every `size > 0`. `size == 0` is never a valid block
/// size (the minimum allocation is well above zero) and is not handled here;
/// callers that might pass it are expected to have already rejected it.
pub(crate) fn bucket_index(size: u64) -> usize {
  debug_assert!(size > 0, "bucket_index is undefined for size 0");

  if size < SMALL_CLASS_LIMIT {
    (size / 8) as usize
  } else {
    // floor(log2(size / 8)), found via the bit length of size/8. This is the
    // closed-form equivalent of a linear top-bit scan starting from index 10
    // (2^10 == SMALL_CLASS_LIMIT).
    let scaled = size / 8;
    let log2 = 63 - scaled.leading_zeros() as usize;
    121 + log2
  }
}

/// The half-open byte range `[lo, hi)` a bucket index is documented to cover.
/// Used only by tests to check `bucket_index` against its own contract.
#[cfg(test)]
fn class_range(index: usize) -> (u64, Option<u64>) {
  if index < SMALL_CLASS_COUNT {
    let s = 8 * index as u64;
    (s, Some(s + 8))
  } else {
    let lo = 1u64 << (index - 121 + 3);
    let hi = 1u64 << (index - 120 + 3);
    (lo, Some(hi))
  }
}
