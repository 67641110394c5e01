//! Property-based tests for the allocator.
//!
//! Uses proptest to generate random operation sequences and verifies the
//! heap invariants after every step.

use proptest::prelude::*;
use segalloc::{Arena, Config, NUM_CLASSES, OVERHEAD, SegAllocator, align, class_bounds, class_of};

#[derive(Debug, Clone)]
enum Op {
  Allocate(usize),
  Free(usize),
  Resize(usize, usize),
}

/// A live allocation: address, requested length and the byte it is filled with.
struct Live {
  ptr: *mut u8,
  len: usize,
  fill: u8,
}

/// Sizes skewed towards small requests, with the occasional large one.
fn request_size() -> impl Strategy<Value = usize> {
  prop_oneof![
    4 => 0usize..=64,
    3 => 65usize..=1024,
    2 => 1025usize..=8192,
    1 => 8193usize..=40_000,
  ]
}

fn op() -> impl Strategy<Value = Op> {
  prop_oneof![
    5 => request_size().prop_map(Op::Allocate),
    3 => any::<usize>().prop_map(Op::Free),
    2 => (any::<usize>(), request_size()).prop_map(|(slot, size)| Op::Resize(slot, size)),
  ]
}

fn fill(live: &Live) {
  unsafe { live.ptr.write_bytes(live.fill, live.len) };
}

fn intact(
  live: &Live,
  len: usize,
) -> bool {
  (0..len).all(|i| unsafe { *live.ptr.add(i) } == live.fill)
}

/// Replays `ops`, checking the heap after each one and a payload whenever it
/// is freed or resized, then frees whatever is left.
fn replay(ops: &[Op]) -> Result<(), TestCaseError> {
  let mut allocator = SegAllocator::new(Arena::new(16 << 20), Config::default()).unwrap();
  let mut live: Vec<Live> = Vec::new();

  for (step, op) in ops.iter().enumerate() {
    let fill_byte = (step % 251) as u8 + 1;

    match *op {
      Op::Allocate(size) => {
        let ptr = allocator.allocate(size);
        if size == 0 {
          prop_assert!(ptr.is_null());
          continue;
        }
        prop_assert!(!ptr.is_null(), "allocate({}) failed", size);
        prop_assert_eq!(ptr as usize % 8, 0);
        let usable = unsafe { allocator.usable_size(ptr) };
        prop_assert!(usable >= size);

        let entry = Live {
          ptr,
          len: size,
          fill: fill_byte,
        };
        fill(&entry);
        live.push(entry);
      }
      Op::Free(slot) => {
        if live.is_empty() {
          continue;
        }
        let entry = live.swap_remove(slot % live.len());
        prop_assert!(intact(&entry, entry.len));
        unsafe { allocator.free(entry.ptr) };
      }
      Op::Resize(slot, size) => {
        if live.is_empty() {
          continue;
        }
        let index = slot % live.len();
        let old = &live[index];
        let old_size = unsafe { allocator.usable_size(old.ptr) } + OVERHEAD;
        let blocks_before = allocator.blocks().count();

        let ptr = unsafe { allocator.resize(old.ptr, size) };

        if size == 0 {
          prop_assert!(ptr.is_null());
          live.swap_remove(index);
        } else {
          prop_assert!(!ptr.is_null(), "resize to {} failed", size);
          prop_assert_eq!(ptr as usize % 8, 0);

          if align!(size) + OVERHEAD <= old_size {
            prop_assert_eq!(ptr, old.ptr);
            prop_assert_eq!(allocator.blocks().count(), blocks_before);
          }

          let moved = Live {
            ptr,
            len: size,
            fill: old.fill,
          };
          prop_assert!(intact(&moved, old.len.min(size)));

          let entry = Live {
            ptr,
            len: size,
            fill: fill_byte,
          };
          fill(&entry);
          live[index] = entry;
        }
      }
    }

    let stats = allocator.check().map_err(|err| TestCaseError::fail(err.to_string()))?;
    prop_assert_eq!(stats.allocated_blocks, live.len());
  }

  for entry in live.drain(..) {
    prop_assert!(intact(&entry, entry.len));
    unsafe { allocator.free(entry.ptr) };
  }

  let stats = allocator.check().map_err(|err| TestCaseError::fail(err.to_string()))?;
  prop_assert_eq!(stats.allocated_blocks, 0);
  prop_assert_eq!(stats.free_blocks, 1);

  Ok(())
}

proptest! {
  /// Random operation sequences keep every heap invariant and every payload.
  #[test]
  fn random_operations_keep_heap_consistent(ops in prop::collection::vec(op(), 1..200)) {
    replay(&ops)?;
  }

  /// Every size maps to exactly the class whose bounds contain it.
  #[test]
  fn class_of_matches_bounds(size in 32usize..1_000_000) {
    let class = class_of(size);
    prop_assert!(class < NUM_CLASSES);
    prop_assert!(class_bounds(class).contains(&size));
  }

  /// Freeing everything in any order folds the heap back into one block.
  #[test]
  fn free_order_does_not_matter(
    sizes in prop::collection::vec(1usize..2048, 1..64),
    order in any::<u64>(),
  ) {
    let mut allocator = SegAllocator::new(Arena::new(1 << 20), Config::default()).unwrap();
    let mut ptrs: Vec<*mut u8> = sizes.iter().map(|&size| allocator.allocate(size)).collect();
    prop_assert!(ptrs.iter().all(|p| !p.is_null()));

    let mut state = order;
    while !ptrs.is_empty() {
      state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
      let index = (state >> 33) as usize % ptrs.len();
      unsafe { allocator.free(ptrs.swap_remove(index)) };
      allocator.check().map_err(|err| TestCaseError::fail(err.to_string()))?;
    }

    let stats = allocator.check().unwrap();
    prop_assert_eq!(stats.blocks(), 1);
    prop_assert_eq!(stats.free_bytes, stats.heap_bytes - 3 * 8);
  }
}
