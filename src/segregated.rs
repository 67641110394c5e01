use std::{cmp, ptr};

use log::{debug, info, trace, warn};

use crate::{
  align::{checked_align, is_aligned},
  block::{Block, FreeBlock, MIN_BLOCK_SIZE, OVERHEAD, Tag, WSIZE},
  config::Config,
  error::AllocError,
  heap::{Heap, HeapSource},
  seglist::SegregatedLists,
};

/// Prologue header + prologue footer + epilogue header.
const SENTINEL_BYTES: usize = 3 * WSIZE;

const PROLOGUE_SIZE: usize = 2 * WSIZE;

/// Payload offset of the first block after the prologue.
pub(crate) const FIRST_BLOCK: usize = SENTINEL_BYTES;

/// Block size needed to serve a request of `size` payload bytes.
fn adjusted_size(size: usize) -> Option<usize> {
  checked_align(size)?.checked_add(OVERHEAD)
}

/// A segregated-fit allocator over one contiguous heap.
///
/// The heap is obtained from a [`HeapSource`] and only ever grows. Free
/// blocks are kept in size-class lists and merged with free neighbors as soon
/// as they are released, so no two adjacent blocks are ever both free.
///
/// The allocator is single-threaded; share it across threads only behind
/// external synchronization.
pub struct SegAllocator<S: HeapSource> {
  source: S,
  pub(crate) heap: Heap,
  pub(crate) lists: SegregatedLists,
  config: Config,
}

impl<S: HeapSource> SegAllocator<S> {
  /// Lays down the prologue and epilogue and grows the heap by one chunk.
  pub fn new(
    mut source: S,
    config: Config,
  ) -> Result<Self, AllocError> {
    let base = source.extend(SENTINEL_BYTES).ok_or(AllocError::OutOfMemory {
      requested: SENTINEL_BYTES,
    })?;

    if !is_aligned(base.as_ptr() as usize) {
      return Err(AllocError::Misaligned {
        addr: base.as_ptr() as usize,
      });
    }

    let mut heap = Heap::new(base, SENTINEL_BYTES);
    let prologue = Tag::encode(PROLOGUE_SIZE, true).into_raw();
    heap.write_word(0, prologue);
    heap.write_word(WSIZE, prologue);
    heap.write_word(2 * WSIZE, Tag::EPILOGUE.into_raw());

    let mut allocator = Self {
      source,
      heap,
      lists: SegregatedLists::new(),
      config,
    };
    allocator.grow(config.chunk_size())?;

    info!(
      "heap initialized at {:?} with {} bytes",
      base,
      allocator.heap.len()
    );

    Ok(allocator)
  }

  /// Allocates at least `size` bytes, aligned to 8.
  ///
  /// Returns null if `size` is zero or the heap cannot grow enough.
  pub fn allocate(
    &mut self,
    size: usize,
  ) -> *mut u8 {
    match self.allocate_block(size) {
      Ok(Some(block)) => self.heap.ptr_at(block.payload()),
      Ok(None) => ptr::null_mut(),
      Err(err) => {
        debug!("allocate({size}) failed: {err}");
        ptr::null_mut()
      }
    }
  }

  /// Releases a block obtained from [`allocate`](Self::allocate) or
  /// [`resize`](Self::resize). Null is ignored.
  ///
  /// # Safety
  ///
  /// `address` must be null or a live pointer returned by this allocator.
  pub unsafe fn free(
    &mut self,
    address: *mut u8,
  ) {
    if address.is_null() {
      return;
    }

    let block = self.find_block(address);
    let size = block.size(&self.heap);
    block.set_tags(&mut self.heap, size, false);
    self.coalesce(block);
  }

  /// Resizes the block at `address` to hold at least `size` bytes.
  ///
  /// Null behaves as [`allocate`](Self::allocate) and a zero size as
  /// [`free`](Self::free), returning null. Shrinking keeps the block as it is;
  /// growing absorbs a free right neighbor when that is enough, otherwise the
  /// contents move to a new block. On failure null is returned and the old
  /// block is left untouched.
  ///
  /// # Safety
  ///
  /// `address` must be null or a live pointer returned by this allocator.
  pub unsafe fn resize(
    &mut self,
    address: *mut u8,
    size: usize,
  ) -> *mut u8 {
    unsafe {
      if address.is_null() {
        return self.allocate(size);
      }

      if size == 0 {
        self.free(address);
        return ptr::null_mut();
      }

      let Some(new_size) = adjusted_size(size) else {
        debug!("resize({address:?}, {size}) failed: request overflows");
        return ptr::null_mut();
      };

      let block = self.find_block(address);
      let current = block.size(&self.heap);

      if new_size <= current {
        return address;
      }

      let next = block.next_physical(&self.heap);
      let next_tag = next.tag(&self.heap);
      if !next_tag.is_allocated() && current + next_tag.size() >= new_size {
        let next = FreeBlock::new(&self.heap, next);
        self.lists.remove(&mut self.heap, next);
        block.set_tags(&mut self.heap, current + next_tag.size(), true);
        trace!("resized {:?} in place to {} bytes", block, current + next_tag.size());
        return address;
      }

      let new_address = match self.allocate_block(size) {
        Ok(Some(new_block)) => self.heap.ptr_at(new_block.payload()),
        Ok(None) => return ptr::null_mut(),
        Err(err) => {
          debug!("resize({address:?}, {size}) failed: {err}");
          return ptr::null_mut();
        }
      };

      let preserved = cmp::min(current - OVERHEAD, size);
      ptr::copy_nonoverlapping(address, new_address, preserved);
      self.free(address);

      new_address
    }
  }

  /// Payload bytes available at `address`, which may exceed the size that
  /// was requested. Zero for null.
  ///
  /// # Safety
  ///
  /// `address` must be null or a live pointer returned by this allocator.
  pub unsafe fn usable_size(
    &self,
    address: *const u8,
  ) -> usize {
    if address.is_null() {
      return 0;
    }
    self.find_block(address).size(&self.heap) - OVERHEAD
  }

  /// Bytes under management, sentinels included.
  pub fn heap_size(&self) -> usize {
    self.heap.len()
  }

  pub fn config(&self) -> &Config {
    &self.config
  }

  fn find_block(
    &self,
    address: *const u8,
  ) -> Block {
    Block::from_payload(self.heap.offset_of(address))
  }

  fn allocate_block(
    &mut self,
    size: usize,
  ) -> Result<Option<Block>, AllocError> {
    if size == 0 {
      return Ok(None);
    }

    let asize = adjusted_size(size)
      .ok_or(AllocError::Overflow { requested: size })?
      .max(MIN_BLOCK_SIZE);

    let fit = match self.lists.find_fit(&self.heap, asize) {
      Some(block) => block,
      // Nothing listed fits, so the freshly grown (and coalesced) block is
      // the only block a second search could return.
      None => self.grow(cmp::max(asize, self.config.chunk_size()))?,
    };

    Ok(Some(self.place(fit, asize)))
  }

  /// Appends at least `bytes` to the heap as one free block, merged with a
  /// free block that may end the old heap.
  fn grow(
    &mut self,
    bytes: usize,
  ) -> Result<FreeBlock, AllocError> {
    let size = checked_align(bytes).ok_or(AllocError::Overflow { requested: bytes })?;

    let start = self
      .source
      .extend(size)
      .ok_or(AllocError::OutOfMemory { requested: size })?;

    let expected = self.heap.end();
    if start.as_ptr() != expected {
      warn!("heap source is discontiguous: got {:?}, expected {:?}", start, expected);
      return Err(AllocError::Discontiguous {
        expected: expected as usize,
        actual: start.as_ptr() as usize,
      });
    }

    // The new block's header takes over the old epilogue word.
    let block = Block::from_payload(self.heap.len());
    self.heap.grow(size);
    block.set_tags(&mut self.heap, size, false);
    self
      .heap
      .write_word(self.heap.len() - WSIZE, Tag::EPILOGUE.into_raw());

    trace!("heap grown by {} bytes to {}", size, self.heap.len());

    Ok(self.coalesce(block))
  }

  /// Merges a just-freed block with its free neighbors and lists the result.
  fn coalesce(
    &mut self,
    block: Block,
  ) -> FreeBlock {
    let heap = &mut self.heap;

    let prev = block.prev_physical(heap);
    let next = block.next_physical(heap);
    let prev_tag = prev.tag(heap);
    let next_tag = next.tag(heap);
    let size = block.size(heap);

    let merged = match (prev_tag.is_allocated(), next_tag.is_allocated()) {
      (true, true) => block,
      (false, true) => {
        let prev_free = FreeBlock::new(heap, prev);
        self.lists.remove(heap, prev_free);
        prev.set_tags(heap, prev_tag.size() + size, false);
        prev
      }
      (true, false) => {
        let next_free = FreeBlock::new(heap, next);
        self.lists.remove(heap, next_free);
        block.set_tags(heap, size + next_tag.size(), false);
        block
      }
      (false, false) => {
        let prev_free = FreeBlock::new(heap, prev);
        let next_free = FreeBlock::new(heap, next);
        self.lists.remove(heap, prev_free);
        self.lists.remove(heap, next_free);
        prev.set_tags(heap, prev_tag.size() + size + next_tag.size(), false);
        prev
      }
    };

    let merged = FreeBlock::new(heap, merged);
    self.lists.insert(heap, merged);
    merged
  }

  /// Carves an `asize`-byte allocated block out of `block`, returning the
  /// remainder to the lists when it can stand as a block of its own.
  fn place(
    &mut self,
    block: FreeBlock,
    asize: usize,
  ) -> Block {
    let heap = &mut self.heap;
    let csize = block.size(heap);
    self.lists.remove(heap, block);

    let block = block.block();
    if csize - asize >= MIN_BLOCK_SIZE {
      block.set_tags(heap, asize, true);

      let remainder = block.next_physical(heap);
      remainder.set_tags(heap, csize - asize, false);
      let remainder = FreeBlock::new(heap, remainder);
      self.lists.insert(heap, remainder);

      trace!("split {} byte block at {:?}, {} bytes left free", csize, block, csize - asize);
    } else {
      block.set_tags(heap, csize, true);
    }

    block
  }
}
