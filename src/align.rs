//! Alignment and rounding helpers shared by the block layout, free-list and
//! page-source modules.
//!
//! `align!` rounds a byte count up to the machine word size; it is kept for
//! parity with ad-hoc pointer-math call sites. The block engine itself never
//! rounds to *word* size — it rounds to 8 bytes (`roundup8`) or to a multiple
//! of the page-source's mmap unit (`roundup`) — both expressed as checked
//! functions since, unlike word alignment, these rounds sit directly on
//! `acquire`'s and `fresh_carve`'s overflow-rejection paths.

/// Calculates the machine word alignment for the given size.
///
/// # Examples
///
/// ```rust
/// use std::mem;
/// use rallocator::align;
///
/// match mem::size_of::<usize>() {
///     8 => assert_eq!(align!(13), 16), // 64 bit machine.
///     4 => assert_eq!(align!(11), 12), // 32 bit machine.
///     _ => {},
/// };
/// ```
#[macro_export]
macro_rules! align {
  ($value:expr) => {
    ($value + mem::size_of::<usize>() - 1) & !(mem::size_of::<usize>() - 1)
  };
}

/// Rounds `n` up to the next multiple of 8, or `None` on overflow.
///
/// Every managed block size is a multiple of 8; this is the single place
/// that rounding happens on the acquire path.
pub(crate) fn roundup8(n: u64) -> Option<u64> {
  roundup(n, 8)
}

/// Rounds `n` up to the next multiple of `unit`, or `None` on overflow.
///
/// `unit` is assumed to be a power of two (true of both 8 and any mmap unit
/// derived from a page size).
pub(crate) fn roundup(n: u64, unit: u64) -> Option<u64> {
  debug_assert!(unit.is_power_of_two());
  let mask = unit - 1;
  n.checked_add(mask).map(|sum| sum & !mask)
}
