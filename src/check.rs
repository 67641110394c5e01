//! Heap walking and consistency checking.

use std::collections::BTreeSet;

use crate::{
  align::is_aligned,
  block::{Block, MIN_BLOCK_SIZE, Tag, WSIZE},
  error::IntegrityError,
  heap::{Heap, HeapSource},
  seglist::{NUM_CLASSES, class_bounds},
  segregated::{FIRST_BLOCK, SegAllocator},
};

/// One block as seen by a heap walk.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo {
  /// Payload offset from the heap base.
  pub offset: usize,
  /// Whole block size, tags included.
  pub size: usize,
  pub allocated: bool,
}

/// Totals gathered by [`SegAllocator::check`].
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
  pub heap_bytes: usize,
  pub allocated_blocks: usize,
  pub allocated_bytes: usize,
  pub free_blocks: usize,
  pub free_bytes: usize,
  pub largest_free: usize,
}

impl HeapStats {
  pub fn blocks(&self) -> usize {
    self.allocated_blocks + self.free_blocks
  }
}

/// Walks the blocks between the prologue and the epilogue, in address order.
pub struct Blocks<'h> {
  heap: &'h Heap,
  offset: usize,
}

impl Iterator for Blocks<'_> {
  type Item = BlockInfo;

  fn next(&mut self) -> Option<BlockInfo> {
    if self.offset > self.heap.len() || !is_aligned(self.offset) {
      return None;
    }

    let block = Block::from_payload(self.offset);
    let (size, allocated) = block.tag(self.heap).decode();
    if size == 0 {
      return None;
    }

    self.offset = self.offset.checked_add(size).unwrap_or(usize::MAX);
    Some(BlockInfo {
      offset: block.payload(),
      size,
      allocated,
    })
  }
}

impl<S: HeapSource> SegAllocator<S> {
  pub fn blocks(&self) -> Blocks<'_> {
    Blocks {
      heap: &self.heap,
      offset: FIRST_BLOCK,
    }
  }

  /// Verifies the block layout and the free lists against each other.
  ///
  /// Checks that the sentinels are intact, that every block is aligned,
  /// well-sized, inside the heap and carries matching tags, that no two free
  /// blocks touch, and that the free lists hold exactly the free blocks, each
  /// in the class of its size.
  pub fn check(&self) -> Result<HeapStats, IntegrityError> {
    let heap = &self.heap;
    let prologue = Tag::encode(2 * WSIZE, true).into_raw();
    if heap.read_word(0) != prologue || heap.read_word(WSIZE) != prologue {
      return Err(IntegrityError::BadPrologue);
    }

    let mut stats = HeapStats {
      heap_bytes: heap.len(),
      ..HeapStats::default()
    };
    let mut free = BTreeSet::new();
    let mut offset = FIRST_BLOCK;
    let mut prev_free: Option<usize> = None;

    loop {
      let block = Block::from_payload(offset);
      let tag = block.tag(heap);

      if tag.size() == 0 {
        if offset != heap.len() || tag != Tag::EPILOGUE {
          return Err(IntegrityError::BadEpilogue { offset });
        }
        break;
      }

      let size = tag.size();
      if !is_aligned(offset) {
        return Err(IntegrityError::Misaligned { offset });
      }
      if size < MIN_BLOCK_SIZE || !is_aligned(size) {
        return Err(IntegrityError::BadSize { offset, size });
      }
      if offset.checked_add(size).is_none_or(|end| end > heap.len()) {
        return Err(IntegrityError::Overrun { offset, size });
      }

      let footer = block.footer_tag(heap);
      if footer != tag {
        return Err(IntegrityError::TagMismatch {
          offset,
          header: tag.into_raw(),
          footer: footer.into_raw(),
        });
      }

      if tag.is_allocated() {
        stats.allocated_blocks += 1;
        stats.allocated_bytes += size;
        prev_free = None;
      } else {
        if let Some(prev) = prev_free {
          return Err(IntegrityError::AdjacentFree {
            offset: prev,
            next: offset,
          });
        }
        stats.free_blocks += 1;
        stats.free_bytes += size;
        stats.largest_free = stats.largest_free.max(size);
        free.insert(offset);
        prev_free = Some(offset);
      }

      offset += size;
    }

    for class in 0..NUM_CLASSES {
      let mut prev = None;

      for entry in self.lists.iter(heap, class) {
        let offset = entry.block().payload();

        // Entries must be blocks found by the walk before any of their links
        // are read; this also stops cycles.
        if !free.remove(&offset) {
          let in_heap = (FIRST_BLOCK..heap.len()).contains(&offset) && is_aligned(offset);
          return Err(if in_heap && entry.block().is_allocated(heap) {
            IntegrityError::AllocatedInList { offset, class }
          } else {
            IntegrityError::StrayEntry { offset }
          });
        }

        let size = entry.size(heap);
        if !class_bounds(class).contains(&size) {
          return Err(IntegrityError::WrongClass {
            offset,
            size,
            class,
          });
        }
        if entry.prev(heap) != prev {
          return Err(IntegrityError::BrokenLink { offset, class });
        }

        prev = Some(entry);
      }
    }

    if let Some(&offset) = free.first() {
      return Err(IntegrityError::Unlisted { offset });
    }

    debug_assert_eq!(stats.allocated_bytes + stats.free_bytes + 3 * WSIZE, stats.heap_bytes);
    Ok(stats)
  }
}
