use thiserror::Error;

/// Why the allocator could not hand out memory.
///
/// None of these leave the heap in an inconsistent state: a failed request
/// changes nothing, and later requests that fit may still succeed.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum AllocError {
  /// The heap source could not supply `requested` more bytes.
  #[error("heap source could not supply {requested} more bytes")]
  OutOfMemory { requested: usize },

  /// The request is too large to describe as a block size.
  #[error("request of {requested} bytes overflows the block size")]
  Overflow { requested: usize },

  /// The source handed back memory that does not continue the heap.
  #[error("heap source returned {actual:#x}, expected the heap end at {expected:#x}")]
  Discontiguous { expected: usize, actual: usize },

  /// The first address from the source is not aligned to the block alignment.
  #[error("heap source base {addr:#x} is not 8-byte aligned")]
  Misaligned { addr: usize },
}

/// A heap invariant that [`SegAllocator::check`](crate::SegAllocator::check)
/// found broken. Offsets are block payload offsets from the heap base.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IntegrityError {
  #[error("prologue tags are damaged")]
  BadPrologue,

  #[error("epilogue at {offset} is not a zero-sized allocated tag")]
  BadEpilogue { offset: usize },

  #[error("block at {offset} is not aligned")]
  Misaligned { offset: usize },

  #[error("block at {offset} has invalid size {size}")]
  BadSize { offset: usize, size: usize },

  #[error("block at {offset} of size {size} runs past the heap end")]
  Overrun { offset: usize, size: usize },

  #[error("block at {offset}: header {header:#x} does not match footer {footer:#x}")]
  TagMismatch { offset: usize, header: u64, footer: u64 },

  #[error("free blocks at {offset} and {next} are adjacent")]
  AdjacentFree { offset: usize, next: usize },

  #[error("allocated block at {offset} is in free list {class}")]
  AllocatedInList { offset: usize, class: usize },

  #[error("block at {offset} of size {size} is in free list {class}")]
  WrongClass { offset: usize, size: usize, class: usize },

  #[error("free list {class} has a broken back link at {offset}")]
  BrokenLink { offset: usize, class: usize },

  #[error("free list entry {offset} is not a block of this heap or is listed twice")]
  StrayEntry { offset: usize },

  #[error("free block at {offset} is not in any free list")]
  Unlisted { offset: usize },
}
