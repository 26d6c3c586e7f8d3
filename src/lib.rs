//! # rallocator - A Segregated Free-List Memory Allocator
//!
//! This crate provides a general-purpose dynamic memory allocator built on
//! top of OS-provided virtual memory (`mmap`). It manages freed blocks with
//! 166 segregated size-class free lists instead of a single bump pointer,
//! so memory returned via `release` can be reused by later calls instead of
//! only ever growing the heap.
//!
//! ## Overview
//!
//! ```text
//!   Segregated Free List Concept:
//!
//!   bucket 0   (size 8)    [ ]
//!   bucket 1   (size 16)   [ ]-[ ]
//!   ...
//!   bucket 127 (size 1016) [ ]
//!   bucket 128 ([1024,2048))   [ ]-[ ]-[ ]
//!   ...
//!   bucket 165 ([2^47,2^48))   [ ]
//!
//!   acquire(n): round n up to a block size, search its bucket and every
//!   larger one for the first block big enough, splitting off any leftover
//!   tail. A miss pulls a fresh mapping from the OS.
//!
//!   release(p): mark the block free, reinsert it into its bucket, then try
//!   to merge it with its physically adjacent neighbours.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   rallocator
//!   ├── align           - Rounding helpers (align!, roundup8, roundup)
//!   ├── size_class      - size -> bucket index mapping
//!   ├── block           - Block header/footer layout (internal)
//!   ├── bucket          - FreeLists: the 166 segregated free lists
//!   ├── mapping         - MappingRegistry: tracks OS-mapped regions
//!   ├── split_coalesce  - Block splitting and physical-neighbour merging
//!   ├── page_source     - PageSource trait + the real mmap-backed impl
//!   ├── error           - Errno-style last-error channel
//!   └── allocator       - Allocator: acquire/release/acquire_zero/resize
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rallocator::Allocator;
//!
//! fn main() {
//!     let mut allocator = Allocator::new();
//!
//!     unsafe {
//!         let p = allocator.acquire(64) as *mut u64;
//!         assert!(!p.is_null());
//!         *p = 42;
//!         allocator.release(p as *mut u8);
//!     }
//! }
//! ```
//!
//! ## How It Works
//!
//! Each mapping the allocator pulls from the OS is carved into blocks as
//! needed; each block carries a packed header and a footer inside its own
//! bytes, with no separate bookkeeping table:
//!
//! ```text
//!   Single Block:
//!   ┌────────┬────────┬────────┬──────────────────┬────────┐
//!   │ word0  │ next   │ prev   │   user payload    │ footer │
//!   │ packed │        │        │   (overlays       │  size  │
//!   │ meta   │        │        │    next/prev)     │        │
//!   └────────┴────────┴────────┴──────────────────-┴────────┘
//!            ▲
//!            └── Pointer returned to user (word0 + 8 bytes)
//! ```
//!
//! The `next`/`prev` words double as free-list sibling links while a block
//! is free, and as ordinary user-writable payload while it is allocated.
//!
//! ## Features
//!
//! - **Block reuse**: freed blocks are tracked and reused by later
//!   `acquire` calls instead of only growing the mapped region.
//! - **Best-fit within bucket**: each of the 166 buckets is kept sorted by
//!   size, so the first hit in a bucket is that bucket's smallest fit.
//! - **Coalescing**: adjacent free blocks are merged on release, bounded by
//!   a registry of the OS mappings they came from.
//! - **Direct OS interaction**: uses `mmap` for memory management.
//!
//! ## Limitations
//!
//! - **Single-threaded only**: no synchronization primitives; wrap an
//!   `Allocator` in your own mutex if you need to share one across threads.
//! - **No alignment beyond 8 bytes**: every block is 8-byte aligned; larger
//!   alignment requests are not supported.
//! - **No corruption detection**: a client that double-releases a pointer,
//!   releases a foreign pointer, or writes past its payload will corrupt
//!   allocator state silently.
//! - **Memory is never returned to the OS**: mappings grow but are never
//!   unmapped, even once entirely free.
//!
//! ## Safety
//!
//! This crate is inherently unsafe as it deals with raw memory management.
//! All allocation and deallocation operations require `unsafe` blocks.

pub mod align;
mod allocator;
mod block;
mod bucket;
mod error;
mod mapping;
mod page_source;
mod size_class;
mod split_coalesce;

pub use allocator::Allocator;
pub use error::{last_error, AllocError};
pub use page_source::{MmapPageSource, PageSource, PageSourceError};
