//! # segalloc - A Segregated Free-List Allocator
//!
//! This crate provides a general-purpose `malloc`/`free`/`realloc` style
//! allocator that manages one contiguous, growable heap. It needs nothing from
//! the operating system allocator: memory comes from a [`HeapSource`], either
//! a private [`Arena`] or the process program break ([`Sbrk`], via `sbrk(2)`).
//!
//! ## Overview
//!
//! Every block carries its size and state at both ends (boundary tags), so the
//! neighbors of any block can be found in O(1). Free blocks are kept in
//! segregated lists, one per size class:
//!
//! ```text
//!   Heap:
//!
//!   ┌─────┬──────────┬────────┬──────────────┬──────┬─────────────────┬─────┐
//!   │ pro │  alloc   │  free  │    alloc     │ free │      alloc      │ epi │
//!   └─────┴──────────┴────────┴──────────────┴──────┴─────────────────┴─────┘
//!                        ▲                       ▲
//!   Free lists:          │                       │
//!                        │                       │
//!   class 0 (..=32)   ───┼───────────────────────┘
//!   class 1 (..=64)   ───┘
//!   ...
//!   class 11 (32769..)
//! ```
//!
//! - **Allocation** takes the first fitting block from the smallest class that
//!   can hold the request, splitting off the rest when it can stand on its own.
//!   When nothing fits, the heap grows by at least one chunk.
//! - **Freeing** merges the block with any free neighbor right away, so two
//!   free blocks are never adjacent.
//! - **Resizing** grows in place into a free right neighbor when possible and
//!   only moves the data otherwise.
//!
//! ## Crate Structure
//!
//! ```text
//!   segalloc
//!   ├── align      - Alignment helpers (align!)
//!   ├── block      - Boundary tags and block navigation (internal)
//!   ├── check      - Heap walking and consistency checks
//!   ├── config     - Growth chunk configuration
//!   ├── error      - AllocError, IntegrityError
//!   ├── heap       - HeapSource, Arena, Sbrk
//!   ├── seglist    - Size classes and free lists (internal)
//!   └── segregated - SegAllocator implementation
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use segalloc::{Arena, Config, SegAllocator};
//!
//! let mut allocator = SegAllocator::new(Arena::default(), Config::default()).unwrap();
//!
//! let ptr = allocator.allocate(64);
//! assert!(!ptr.is_null());
//!
//! unsafe {
//!     ptr.write_bytes(0x2A, 64);
//!
//!     let ptr = allocator.resize(ptr, 256);
//!     assert_eq!(*ptr.add(63), 0x2A);
//!
//!     allocator.free(ptr);
//! }
//!
//! allocator.check().unwrap();
//! ```
//!
//! ## Block Layout
//!
//! ```text
//!   ┌──────────┬───────────────────────────────────┬──────────┐
//!   │  header  │             payload               │  footer  │
//!   │ size | a │  (next/prev free links when free) │ size | a │
//!   │  8 bytes │                                   │  8 bytes │
//!   └──────────┴───────────────────────────────────┴──────────┘
//!              ▲
//!              └── Pointer returned to user (8-byte aligned)
//! ```
//!
//! ## Limitations
//!
//! - **Single-threaded only**: No synchronization primitives
//! - **Never shrinks**: Freed memory is reused but never given back to the source
//! - **No pointer validation**: Freeing a pointer this allocator did not hand out
//!   is undefined behavior
//!
//! ## Safety
//!
//! Allocation is safe; `free`, `resize` and `usable_size` take raw pointers and
//! are `unsafe`, as their arguments must come from the same allocator.

pub mod align;
mod block;
mod check;
mod config;
mod error;
mod heap;
mod seglist;
mod segregated;

pub use block::{MIN_BLOCK_SIZE, OVERHEAD};
pub use check::{BlockInfo, Blocks, HeapStats};
pub use config::{Config, DEFAULT_CHUNK_SIZE};
pub use error::{AllocError, IntegrityError};
#[cfg(unix)]
pub use heap::Sbrk;
pub use heap::{Arena, DEFAULT_ARENA_CAPACITY, HeapSource};
pub use seglist::{NUM_CLASSES, class_bounds, class_of};
pub use segregated::SegAllocator;
