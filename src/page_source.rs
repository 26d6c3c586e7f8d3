//! The page source: the abstract supplier of fresh, writable, page-aligned
//! memory the block engine carves mappings out of. Kept behind a trait so
//! the allocator can be constructed against a test double instead of the
//! real OS primitive.

use std::ptr;

/// A mapping request was rejected. Carries no data — `map`'s caller only
/// ever turns this into `AllocError::OutOfMemory`.
#[derive(Debug)]
pub struct PageSourceError;

/// Abstracts the OS-level source of fresh pages, so an `Allocator` can be
/// built over a custom source instead of the real `mmap` syscall.
pub trait PageSource {
  /// Returns a fresh, writable region of exactly `bytes` bytes. `bytes` is
  /// always a positive multiple of the page size (callers round up before
  /// calling). Regions may be returned in arbitrary address order.
  fn map(&mut self, bytes: usize) -> Result<(usize, usize), PageSourceError>;

  /// The underlying page size, in bytes.
  fn page_size(&self) -> usize;
}

/// Production page source: anonymous, private pages obtained via `mmap`.
///
/// This is the direct generalization of the teacher crate's use of
/// `libc::sbrk` — the same "one unsafe libc call, nothing fancier" posture,
/// applied to the syscall that actually gives mapping-bounded, freely
/// re-orderable regions (`sbrk` only ever grows one contiguous segment,
/// which can't model the reorderable, disjoint regions the mapping registry
/// needs).
pub struct MmapPageSource {
  page_size: usize,
}

impl MmapPageSource {
  pub(crate) fn new() -> Self {
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    debug_assert!(page_size > 0, "sysconf(_SC_PAGESIZE) should never fail");
    Self { page_size: page_size as usize }
  }
}

impl Default for MmapPageSource {
  fn default() -> Self {
    Self::new()
  }
}

impl PageSource for MmapPageSource {
  fn map(&mut self, bytes: usize) -> Result<(usize, usize), PageSourceError> {
    let region = unsafe {
      libc::mmap(
        ptr::null_mut(),
        bytes,
        libc::PROT_READ | libc::PROT_WRITE,
        libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
        -1,
        0,
      )
    };
    if region == libc::MAP_FAILED {
      return Err(PageSourceError);
    }
    let lo = region as usize;
    Ok((lo, lo + bytes))
  }

  fn page_size(&self) -> usize {
    self.page_size
  }
}

/// Test double backed by one large, pre-reserved `Vec<u8>` instead of real
/// `mmap` calls, so unit tests can run thousands of "mappings" without
/// touching the OS and can deliberately force non-adjacency (for the
/// mapping-registry-exhaustion scenario).
#[cfg(test)]
pub(crate) struct VecPageSource {
  backing: Vec<u8>,
  next_offset: usize,
  page_size: usize,
  force_gap: bool,
}

#[cfg(test)]
impl VecPageSource {
  pub(crate) fn new(capacity: usize, page_size: usize) -> Self {
    Self {
      backing: vec![0u8; capacity],
      next_offset: 0,
      page_size,
      force_gap: false,
    }
  }

  /// When set, every returned region leaves a one-page gap before it, so it
  /// never happens to be contiguous with the previous one.
  pub(crate) fn with_forced_gaps(mut self) -> Self {
    self.force_gap = true;
    self
  }
}

#[cfg(test)]
impl PageSource for VecPageSource {
  fn map(&mut self, bytes: usize) -> Result<(usize, usize), PageSourceError> {
    if self.force_gap {
      self.next_offset += self.page_size;
    }
    let lo_offset = self.next_offset;
    let hi_offset = lo_offset.checked_add(bytes).ok_or(PageSourceError)?;
    if hi_offset > self.backing.len() {
      return Err(PageSourceError);
    }
    self.next_offset = hi_offset;
    let base = self.backing.as_mut_ptr() as usize;
    Ok((base + lo_offset, base + hi_offset))
  }

  fn page_size(&self) -> usize {
    self.page_size
  }
}
