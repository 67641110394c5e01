//! Segregated free lists.
//!
//! ```text
//!   class   sizes           list
//!   ┌────┐
//!   │  0 │  ..=32           ──► [32] ──► [32]
//!   │  1 │  33..=64         ──► [48]
//!   │  2 │  65..=128
//!   │ .. │
//!   │ 11 │  32769..         ──► [40960] ──► [65536]
//!   └────┘
//! ```
//!
//! Each list is doubly linked through the payloads of its free blocks, so
//! inserting at the head and unlinking any member are O(1).

use std::ops::RangeInclusive;

use crate::{
  block::{FreeBlock, MIN_BLOCK_SIZE},
  heap::Heap,
};

pub const NUM_CLASSES: usize = 12;

/// Inclusive upper bound of every class but the last, which is unbounded.
const CLASS_LIMITS: [usize; NUM_CLASSES - 1] =
  [32, 64, 128, 256, 512, 1024, 2048, 4096, 8192, 16384, 32768];

/// Maps a block size to its class.
pub fn class_of(size: usize) -> usize {
  CLASS_LIMITS
    .iter()
    .position(|&limit| size <= limit)
    .unwrap_or(NUM_CLASSES - 1)
}

/// Block sizes that belong to `class`.
pub fn class_bounds(class: usize) -> RangeInclusive<usize> {
  let lower = match class {
    0 => MIN_BLOCK_SIZE,
    _ => CLASS_LIMITS[class - 1] + 1,
  };
  let upper = CLASS_LIMITS.get(class).copied().unwrap_or(usize::MAX);

  lower..=upper
}

pub(crate) struct SegregatedLists {
  heads: [Option<FreeBlock>; NUM_CLASSES],
}

impl SegregatedLists {
  pub(crate) fn new() -> Self {
    Self {
      heads: [None; NUM_CLASSES],
    }
  }

  pub(crate) fn insert(
    &mut self,
    heap: &mut Heap,
    block: FreeBlock,
  ) {
    let class = class_of(block.size(heap));
    let head = self.heads[class];

    block.set_next(heap, head);
    block.set_prev(heap, None);
    if let Some(head) = head {
      head.set_prev(heap, Some(block));
    }

    self.heads[class] = Some(block);
  }

  /// Unlinks `block` from its class. The block's size must not have changed
  /// since it was inserted.
  pub(crate) fn remove(
    &mut self,
    heap: &mut Heap,
    block: FreeBlock,
  ) {
    let prev = block.prev(heap);
    let next = block.next(heap);

    match prev {
      Some(prev) => prev.set_next(heap, next),
      None => {
        let class = class_of(block.size(heap));
        debug_assert_eq!(self.heads[class], Some(block));
        self.heads[class] = next;
      }
    }

    if let Some(next) = next {
      next.set_prev(heap, prev);
    }
  }

  /// First block of at least `min_size` bytes, scanning upward from the class
  /// `min_size` falls in.
  pub(crate) fn find_fit(
    &self,
    heap: &Heap,
    min_size: usize,
  ) -> Option<FreeBlock> {
    (class_of(min_size)..NUM_CLASSES)
      .flat_map(|class| self.iter(heap, class))
      .find(|block| block.size(heap) >= min_size)
  }

  pub(crate) fn iter<'h>(
    &self,
    heap: &'h Heap,
    class: usize,
  ) -> ClassIter<'h> {
    ClassIter {
      heap,
      head: self.heads[class],
      last: None,
    }
  }
}

/// Walks one class list.
///
/// An entry's `next` link is only read when the following entry is asked
/// for, so a caller can stop at an entry it rejects without touching it.
pub(crate) struct ClassIter<'h> {
  heap: &'h Heap,
  head: Option<FreeBlock>,
  last: Option<FreeBlock>,
}

impl Iterator for ClassIter<'_> {
  type Item = FreeBlock;

  fn next(&mut self) -> Option<FreeBlock> {
    let block = match self.last {
      Some(last) => last.next(self.heap)?,
      None => self.head.take()?,
    };
    self.last = Some(block);
    Some(block)
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    block::{Block, Tag, WSIZE},
    heap::{Arena, HeapSource},
  };

  #[test]
  fn test_class_boundaries() {
    assert_eq!(class_of(MIN_BLOCK_SIZE), 0);
    assert_eq!(class_of(32), 0);
    assert_eq!(class_of(40), 1);
    assert_eq!(class_of(64), 1);
    assert_eq!(class_of(72), 2);
    assert_eq!(class_of(4096), 7);
    assert_eq!(class_of(4104), 8);
    assert_eq!(class_of(32768), 10);
    assert_eq!(class_of(32776), 11);
    assert_eq!(class_of(usize::MAX), 11);
  }

  #[test]
  fn test_classes_are_monotonic() {
    let mut last = 0;
    for size in (MIN_BLOCK_SIZE..=70_000).step_by(8) {
      let class = class_of(size);
      assert!(class >= last, "class of {size} dropped from {last} to {class}");
      assert!(class_bounds(class).contains(&size));
      last = class;
    }
    assert_eq!(last, NUM_CLASSES - 1);
  }

  #[test]
  fn test_class_bounds_tile() {
    for class in 1..NUM_CLASSES {
      assert_eq!(*class_bounds(class - 1).end() + 1, *class_bounds(class).start());
    }
    assert_eq!(*class_bounds(NUM_CLASSES - 1).end(), usize::MAX);
  }

  /// Lays out free blocks of the given sizes back to back (not coalesced;
  /// only the lists are exercised here).
  fn heap_with_blocks(
    arena: &mut Arena,
    sizes: &[usize],
  ) -> (Heap, Vec<FreeBlock>) {
    let len = 2 * WSIZE + sizes.iter().sum::<usize>() + WSIZE;
    let base = arena.extend(len).unwrap();
    let mut heap = Heap::new(base, len);

    heap.write_word(0, Tag::encode(16, true).into_raw());
    heap.write_word(8, Tag::encode(16, true).into_raw());
    heap.write_word(len - WSIZE, Tag::EPILOGUE.into_raw());

    let mut offset = 3 * WSIZE;
    let mut blocks = Vec::new();
    for &size in sizes {
      let block = Block::from_payload(offset);
      block.set_tags(&mut heap, size, false);
      blocks.push(FreeBlock::new(&heap, block));
      offset += size;
    }

    (heap, blocks)
  }

  fn members(
    lists: &SegregatedLists,
    heap: &Heap,
    class: usize,
  ) -> Vec<FreeBlock> {
    lists.iter(heap, class).collect()
  }

  #[test]
  fn test_insert_pushes_to_head() {
    let mut arena = Arena::new(4096);
    let (mut heap, blocks) = heap_with_blocks(&mut arena, &[48, 56, 40]);
    let mut lists = SegregatedLists::new();

    for &block in &blocks {
      lists.insert(&mut heap, block);
    }

    assert_eq!(members(&lists, &heap, 1), vec![blocks[2], blocks[1], blocks[0]]);
    assert_eq!(blocks[2].prev(&heap), None);
    assert_eq!(blocks[1].prev(&heap), Some(blocks[2]));
    assert_eq!(blocks[0].next(&heap), None);
  }

  #[test]
  fn test_remove_head_middle_tail() {
    let mut arena = Arena::new(4096);
    let (mut heap, blocks) = heap_with_blocks(&mut arena, &[48, 48, 48, 48]);
    let mut lists = SegregatedLists::new();

    for &block in &blocks {
      lists.insert(&mut heap, block);
    }
    // List order: 3, 2, 1, 0

    lists.remove(&mut heap, blocks[2]);
    assert_eq!(members(&lists, &heap, 1), vec![blocks[3], blocks[1], blocks[0]]);
    assert_eq!(blocks[1].prev(&heap), Some(blocks[3]));

    lists.remove(&mut heap, blocks[3]);
    assert_eq!(members(&lists, &heap, 1), vec![blocks[1], blocks[0]]);
    assert_eq!(blocks[1].prev(&heap), None);

    lists.remove(&mut heap, blocks[0]);
    assert_eq!(members(&lists, &heap, 1), vec![blocks[1]]);
    assert_eq!(blocks[1].next(&heap), None);

    lists.remove(&mut heap, blocks[1]);
    assert!(members(&lists, &heap, 1).is_empty());
  }

  #[test]
  fn test_find_fit_is_first_fit_within_class() {
    let mut arena = Arena::new(4096);
    let (mut heap, blocks) = heap_with_blocks(&mut arena, &[120, 80, 104]);
    let mut lists = SegregatedLists::new();

    for &block in &blocks {
      lists.insert(&mut heap, block);
    }
    // Class 2 order: 104, 80, 120

    assert_eq!(lists.find_fit(&heap, 96), Some(blocks[2]));
    assert_eq!(lists.find_fit(&heap, 112), Some(blocks[0]));
    assert_eq!(lists.find_fit(&heap, 72), Some(blocks[2]));
    assert_eq!(lists.find_fit(&heap, 128), None);
  }

  #[test]
  fn test_find_fit_scans_upward_only() {
    let mut arena = Arena::new(8192);
    let (mut heap, blocks) = heap_with_blocks(&mut arena, &[32, 2048]);
    let mut lists = SegregatedLists::new();

    for &block in &blocks {
      lists.insert(&mut heap, block);
    }

    assert_eq!(lists.find_fit(&heap, 32), Some(blocks[0]));
    assert_eq!(lists.find_fit(&heap, 40), Some(blocks[1]));
    assert_eq!(lists.find_fit(&heap, 2048), Some(blocks[1]));
    assert_eq!(lists.find_fit(&heap, 2056), None);
  }
}
