//! Boundary-tagged blocks.
//!
//! ```text
//!   allocated block                     free block
//!   ┌──────────────┐ ◄─ header          ┌──────────────┐
//!   │  size  | 1   │                    │  size  | 0   │
//!   ├──────────────┤ ◄─ payload         ├──────────────┤
//!   │              │                    │  next free   │
//!   │   payload    │                    │  prev free   │
//!   │              │                    │  (unused)    │
//!   ├──────────────┤ ◄─ footer          ├──────────────┤
//!   │  size  | 1   │                    │  size  | 0   │
//!   └──────────────┘                    └──────────────┘
//! ```
//!
//! A block is named by the offset of its payload. Sizes cover the whole block,
//! header and footer included.

use std::fmt;

use crate::heap::Heap;

/// Size of a header, footer or free-list link.
pub const WSIZE: usize = 8;

/// Bytes of every block that are not payload.
pub const OVERHEAD: usize = 2 * WSIZE;

/// Smallest block that can hold both free-list links once freed.
pub const MIN_BLOCK_SIZE: usize = OVERHEAD + 2 * WSIZE;

const ALLOCATED: u64 = 0x1;
const FLAGS: u64 = 0x7;

/// A boundary tag: block size and allocated flag packed into one word.
///
/// Sizes are multiples of 8, so the low three bits are free for flags.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct Tag(u64);

impl Tag {
  /// The zero-sized, allocated marker that ends the heap.
  pub const EPILOGUE: Tag = Tag::encode(0, true);

  pub const fn encode(
    size: usize,
    allocated: bool,
  ) -> Self {
    debug_assert!(size as u64 & FLAGS == 0);
    Tag(size as u64 | if allocated { ALLOCATED } else { 0 })
  }

  pub const fn decode(self) -> (usize, bool) {
    (self.size(), self.is_allocated())
  }

  pub const fn size(self) -> usize {
    (self.0 & !FLAGS) as usize
  }

  pub const fn is_allocated(self) -> bool {
    self.0 & ALLOCATED != 0
  }

  pub const fn from_raw(word: u64) -> Self {
    Tag(word)
  }

  pub const fn into_raw(self) -> u64 {
    self.0
  }
}

impl fmt::Debug for Tag {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    let state = if self.is_allocated() { "allocated" } else { "free" };
    write!(f, "Tag({}, {})", self.size(), state)
  }
}

/// Handle to a block: the heap offset of its payload.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Block(usize);

impl Block {
  pub const fn from_payload(offset: usize) -> Self {
    Block(offset)
  }

  pub const fn payload(self) -> usize {
    self.0
  }

  pub const fn header(self) -> usize {
    self.0 - WSIZE
  }

  pub(crate) fn footer(
    self,
    heap: &Heap,
  ) -> usize {
    self.0 + self.size(heap) - OVERHEAD
  }

  pub(crate) fn tag(
    self,
    heap: &Heap,
  ) -> Tag {
    Tag::from_raw(heap.read_word(self.header()))
  }

  pub(crate) fn footer_tag(
    self,
    heap: &Heap,
  ) -> Tag {
    Tag::from_raw(heap.read_word(self.footer(heap)))
  }

  pub(crate) fn size(
    self,
    heap: &Heap,
  ) -> usize {
    self.tag(heap).size()
  }

  pub(crate) fn is_allocated(
    self,
    heap: &Heap,
  ) -> bool {
    self.tag(heap).is_allocated()
  }

  /// The block physically after this one. Not valid on the epilogue.
  pub(crate) fn next_physical(
    self,
    heap: &Heap,
  ) -> Block {
    Block(self.0 + self.size(heap))
  }

  /// The block physically before this one, found through its footer. Not
  /// valid on the prologue.
  pub(crate) fn prev_physical(
    self,
    heap: &Heap,
  ) -> Block {
    let prev_footer = Tag::from_raw(heap.read_word(self.0 - OVERHEAD));
    Block(self.0 - prev_footer.size())
  }

  /// Writes identical header and footer tags.
  pub(crate) fn set_tags(
    self,
    heap: &mut Heap,
    size: usize,
    allocated: bool,
  ) {
    let tag = Tag::encode(size, allocated).into_raw();
    heap.write_word(self.header(), tag);
    heap.write_word(self.0 + size - OVERHEAD, tag);
  }
}

/// A block known to be free, whose first payload words are list links.
///
/// Links are stored as payload offsets; offset 0 (the prologue header) is
/// never a payload and stands for "none".
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct FreeBlock(Block);

const NIL: u64 = 0;

impl FreeBlock {
  pub(crate) fn new(
    heap: &Heap,
    block: Block,
  ) -> Self {
    debug_assert!(!block.is_allocated(heap), "free view of allocated block {:?}", block);
    FreeBlock(block)
  }

  pub(crate) fn block(self) -> Block {
    self.0
  }

  pub(crate) fn size(
    self,
    heap: &Heap,
  ) -> usize {
    self.0.size(heap)
  }

  pub(crate) fn next(
    self,
    heap: &Heap,
  ) -> Option<FreeBlock> {
    Self::link(heap.read_word(self.0.payload()))
  }

  pub(crate) fn prev(
    self,
    heap: &Heap,
  ) -> Option<FreeBlock> {
    Self::link(heap.read_word(self.0.payload() + WSIZE))
  }

  pub(crate) fn set_next(
    self,
    heap: &mut Heap,
    next: Option<FreeBlock>,
  ) {
    heap.write_word(self.0.payload(), Self::raw_link(next));
  }

  pub(crate) fn set_prev(
    self,
    heap: &mut Heap,
    prev: Option<FreeBlock>,
  ) {
    heap.write_word(self.0.payload() + WSIZE, Self::raw_link(prev));
  }

  fn link(word: u64) -> Option<FreeBlock> {
    match word {
      NIL => None,
      offset => Some(FreeBlock(Block(offset as usize))),
    }
  }

  fn raw_link(link: Option<FreeBlock>) -> u64 {
    link.map_or(NIL, |free| free.0.payload() as u64)
  }
}
