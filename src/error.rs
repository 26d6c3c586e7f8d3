//! Errno-style error channel.
//!
//! The facade never returns `Result` — every public operation returns a raw
//! pointer (null on failure), matching the classical C allocator interface.
//! The *reason* for a null return is instead left in a process-local "last
//! error" slot, the same shape as POSIX `errno`, so callers that care can
//! inspect it without threading a `Result` through every raw-pointer
//! signature.

use std::cell::Cell;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum AllocError {
  /// Size 0 passed to `acquire`, zero count passed to `acquire_zero`, or an
  /// arithmetic overflow while computing a block or mmap-unit size.
  InvalidArgument,
  /// The page source rejected a mapping request, or the mapping registry is
  /// at capacity.
  OutOfMemory,
}

thread_local! {
  static LAST_ERROR: Cell<Option<AllocError>> = const { Cell::new(None) };
}

pub(crate) fn set_last_error(err: AllocError) {
  LAST_ERROR.with(|cell| cell.set(Some(err)));
}

/// Returns the error from the most recently failed facade call on this
/// thread, if any. Mirrors reading `errno` after a failed libc call — it is
/// not cleared on success, only overwritten by the next failure.
pub fn last_error() -> Option<AllocError> {
  LAST_ERROR.with(|cell| cell.get())
}
