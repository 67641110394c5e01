//! The managed region and the sources it grows from.
//!
//! ```text
//!   offset 0        8        16                                  len-8   len
//!   ┌────────┬────────┬──────────────────────────────────────────┬────────┐
//!   │ 16 / a │ 16 / a │  blocks ...                              │  0 / a │
//!   └────────┴────────┴──────────────────────────────────────────┴────────┘
//!    prologue header   ▲                                          epilogue
//!            prologue footer                                       header
//! ```

use std::ptr::{self, NonNull};

use crate::align::ALIGNMENT;

/// Default capacity of an [`Arena`]: 20 MiB.
pub const DEFAULT_ARENA_CAPACITY: usize = 20 * (1 << 20);

/// Something that can append bytes to the end of a contiguous region.
///
/// This mirrors `sbrk(2)`: `extend(n)` makes `n` more bytes available directly
/// after the previous end and returns the address of that previous end, or
/// `None` when no more memory is available. A source is never asked to shrink,
/// and the bytes it hands out are not assumed to be zeroed.
///
/// The first address a source returns must be aligned to
/// [`ALIGNMENT`](crate::align::ALIGNMENT).
pub trait HeapSource {
  fn extend(
    &mut self,
    increment: usize,
  ) -> Option<NonNull<u8>>;
}

impl<S: HeapSource + ?Sized> HeapSource for &mut S {
  fn extend(
    &mut self,
    increment: usize,
  ) -> Option<NonNull<u8>> {
    (**self).extend(increment)
  }
}

/// A fixed-capacity region carved out of one up-front allocation.
///
/// Behaves like a private program break: each `extend` moves the break
/// forward and fails once the capacity would be exceeded. Memory never moves,
/// so pointers handed out stay valid for the life of the arena.
pub struct Arena {
  start: NonNull<u64>,
  words: usize,
  brk: usize,
}

impl Arena {
  /// Creates an arena holding up to `capacity` bytes (rounded down to the
  /// alignment unit).
  pub fn new(capacity: usize) -> Self {
    let words = capacity / ALIGNMENT;
    let buffer: Box<[u64]> = vec![0u64; words].into_boxed_slice();
    let raw = Box::into_raw(buffer) as *mut u64;

    Self {
      // Box::into_raw never returns null; a zero-length box yields a dangling
      // but non-null pointer.
      start: NonNull::new(raw).unwrap_or(NonNull::dangling()),
      words,
      brk: 0,
    }
  }

  pub fn capacity(&self) -> usize {
    self.words * ALIGNMENT
  }

  /// Bytes handed out so far.
  pub fn used(&self) -> usize {
    self.brk
  }

  pub fn remaining(&self) -> usize {
    self.capacity() - self.brk
  }
}

impl Default for Arena {
  fn default() -> Self {
    Self::new(DEFAULT_ARENA_CAPACITY)
  }
}

impl HeapSource for Arena {
  fn extend(
    &mut self,
    increment: usize,
  ) -> Option<NonNull<u8>> {
    if increment > self.remaining() {
      return None;
    }

    let old_brk = self.start.cast::<u8>().as_ptr().wrapping_add(self.brk);
    self.brk += increment;

    NonNull::new(old_brk)
  }
}

impl Drop for Arena {
  fn drop(&mut self) {
    unsafe {
      let slice = ptr::slice_from_raw_parts_mut(self.start.as_ptr(), self.words);
      drop(Box::from_raw(slice));
    }
  }
}

/// The process program break, moved with `sbrk(2)`.
///
/// Only one allocator should own the break at a time, and nothing else in the
/// process may move it while that allocator is growing, otherwise growth is
/// reported as discontiguous and fails.
#[cfg(unix)]
pub struct Sbrk {
  _private: (),
}

#[cfg(unix)]
impl Sbrk {
  /// Pads the current program break up to the alignment unit.
  ///
  /// Returns `None` if the break cannot be queried or moved.
  pub fn new() -> Option<Self> {
    let current = Self::current_break()?;
    let misalignment = current.as_ptr() as usize % ALIGNMENT;

    if misalignment != 0 {
      let padding = (ALIGNMENT - misalignment) as libc::intptr_t;
      let address = unsafe { libc::sbrk(padding) };

      if address == usize::MAX as *mut libc::c_void {
        return None;
      }
    }

    Some(Self { _private: () })
  }

  /// The current program break, `sbrk(0)`.
  pub fn current_break() -> Option<NonNull<u8>> {
    let address = unsafe { libc::sbrk(0) };

    if address == usize::MAX as *mut libc::c_void {
      return None;
    }

    NonNull::new(address as *mut u8)
  }
}

#[cfg(unix)]
impl HeapSource for Sbrk {
  fn extend(
    &mut self,
    increment: usize,
  ) -> Option<NonNull<u8>> {
    let increment = libc::intptr_t::try_from(increment).ok()?;
    let address = unsafe { libc::sbrk(increment) };

    if address == usize::MAX as *mut libc::c_void {
      return None;
    }

    NonNull::new(address as *mut u8)
  }
}

/// Raw word access to the managed region.
///
/// Offsets are relative to the region base. Every access must lie inside
/// `0..len`; this holds as long as the block tags are intact and is checked
/// in debug builds.
pub(crate) struct Heap {
  base: NonNull<u8>,
  len: usize,
}

impl Heap {
  pub(crate) fn new(
    base: NonNull<u8>,
    len: usize,
  ) -> Self {
    Self { base, len }
  }

  pub(crate) fn len(&self) -> usize {
    self.len
  }

  /// Address one past the last managed byte.
  pub(crate) fn end(&self) -> *mut u8 {
    self.base.as_ptr().wrapping_add(self.len)
  }

  /// Accounts for `bytes` appended by the source.
  pub(crate) fn grow(
    &mut self,
    bytes: usize,
  ) {
    self.len += bytes;
  }

  pub(crate) fn ptr_at(
    &self,
    offset: usize,
  ) -> *mut u8 {
    debug_assert!(offset <= self.len, "offset {offset} outside heap of {} bytes", self.len);
    self.base.as_ptr().wrapping_add(offset)
  }

  /// Offset of an address that lies inside the region.
  pub(crate) fn offset_of(
    &self,
    address: *const u8,
  ) -> usize {
    let offset = (address as usize).wrapping_sub(self.base.as_ptr() as usize);
    debug_assert!(offset <= self.len, "address {address:?} outside heap");
    offset
  }

  pub(crate) fn read_word(
    &self,
    offset: usize,
  ) -> u64 {
    debug_assert!(offset + 8 <= self.len, "word read at {offset} past heap end {}", self.len);
    debug_assert!(offset % ALIGNMENT == 0);
    unsafe { ptr::read(self.ptr_at(offset) as *const u64) }
  }

  pub(crate) fn write_word(
    &mut self,
    offset: usize,
    value: u64,
  ) {
    debug_assert!(offset + 8 <= self.len, "word write at {offset} past heap end {}", self.len);
    debug_assert!(offset % ALIGNMENT == 0);
    unsafe { ptr::write(self.ptr_at(offset) as *mut u64, value) }
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_arena_extend() {
    let mut arena = Arena::new(64);

    let first = arena.extend(24).unwrap();
    assert_eq!(first.as_ptr() as usize % ALIGNMENT, 0);

    let second = arena.extend(32).unwrap();
    assert_eq!(second.as_ptr() as usize, first.as_ptr() as usize + 24);

    assert_eq!(arena.used(), 56);
    assert_eq!(arena.remaining(), 8);
  }

  #[test]
  fn test_arena_exhaustion() {
    let mut arena = Arena::new(32);

    assert!(arena.extend(40).is_none());
    assert_eq!(arena.used(), 0);

    assert!(arena.extend(32).is_some());
    assert!(arena.extend(8).is_none());

    // Zero-byte extensions report the current break.
    let brk = arena.extend(0).unwrap();
    assert_eq!(brk.as_ptr() as usize, arena.start.as_ptr() as usize + 32);
  }

  #[test]
  fn test_arena_capacity_rounds_down() {
    let arena = Arena::new(70);
    assert_eq!(arena.capacity(), 64);
  }

  #[test]
  fn test_heap_words() {
    let mut arena = Arena::new(64);
    let base = arena.extend(32).unwrap();
    let mut heap = Heap::new(base, 32);

    heap.write_word(8, 0xDEAD_BEEF);
    heap.write_word(24, 7);

    assert_eq!(heap.read_word(8), 0xDEAD_BEEF);
    assert_eq!(heap.read_word(24), 7);
    assert_eq!(heap.offset_of(heap.ptr_at(16)), 16);
    assert_eq!(heap.end() as usize, base.as_ptr() as usize + 32);
  }

  #[cfg(unix)]
  #[test]
  fn test_current_break() {
    assert!(Sbrk::current_break().is_some());
  }

  #[cfg(unix)]
  #[test]
  fn test_sbrk_allocator() {
    use crate::{AllocError, Config, SegAllocator};

    let Some(source) = Sbrk::new() else {
      return;
    };

    // Other threads may move the break between the allocator's extensions.
    match SegAllocator::new(source, Config::default()) {
      Ok(mut allocator) => {
        let p = allocator.allocate(100);
        assert!(!p.is_null());
        assert_eq!(p as usize % ALIGNMENT, 0);

        unsafe {
          p.write_bytes(0xAB, 100);
          assert_eq!(*p.add(99), 0xAB);
          allocator.free(p);
        }
        assert_eq!(allocator.check().unwrap().free_blocks, 1);
      }
      Err(err) => assert!(
        matches!(err, AllocError::Discontiguous { .. }),
        "unexpected error: {err}"
      ),
    }
  }
}
