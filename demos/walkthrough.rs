use std::{env, io::Read};

use anyhow::{Context, Result};
use segalloc::{Arena, Config, HeapSource, SegAllocator};

/// Waits until the user presses ENTER, when stepping is enabled.
/// Useful when you want to inspect memory state with tools like `pmap` or
/// `gdb` while the heap changes.
fn block_until_enter_pressed(step: bool) {
  if step {
    println!("\n>>> Press ENTER to continue...");
    let _ = std::io::stdin().bytes().next();
  }
}

/// Prints every block between the prologue and the epilogue.
fn print_heap<S: HeapSource>(
  label: &str,
  allocator: &SegAllocator<S>,
) {
  println!("[{label}] heap = {} bytes", allocator.heap_size());
  for block in allocator.blocks() {
    println!(
      "    {:>8}  {:>6} bytes  {}",
      block.offset,
      block.size,
      if block.allocated { "allocated" } else { "free" }
    );
  }
}

fn run<S: HeapSource>(
  source: S,
  step: bool,
) -> Result<()> {
  let mut allocator =
    SegAllocator::new(source, Config::from_env()).context("failed to initialize the heap")?;

  print_heap("start", &allocator);
  block_until_enter_pressed(step);

  unsafe {
    // --------------------------------------------------------------------
    // 1) Two allocations carve blocks off the front of the initial chunk.
    // --------------------------------------------------------------------
    let first = allocator.allocate(100);
    let second = allocator.allocate(200);
    println!("\n[1] allocate(100) = {first:?}, allocate(200) = {second:?}");

    first.cast::<u32>().write(0xDEADBEEF);
    println!("[1] Value written to first = 0x{:X}", first.cast::<u32>().read());
    print_heap("1", &allocator);
    block_until_enter_pressed(step);

    // --------------------------------------------------------------------
    // 2) Free the first block, then ask for less: the freed block is reused
    //    instead of growing the heap.
    // --------------------------------------------------------------------
    allocator.free(first);
    let third = allocator.allocate(90);
    println!(
      "\n[2] free(first); allocate(90) = {third:?} -> {}",
      if third == first {
        "reused the freed block"
      } else {
        "allocated somewhere else"
      }
    );
    print_heap("2", &allocator);
    block_until_enter_pressed(step);

    // --------------------------------------------------------------------
    // 3) Freeing neighbors merges them into one free block.
    // --------------------------------------------------------------------
    allocator.free(third);
    allocator.free(second);
    println!("\n[3] free(third); free(second)");
    print_heap("3", &allocator);
    block_until_enter_pressed(step);

    // --------------------------------------------------------------------
    // 4) Resize: grows in place while the right neighbor is free.
    // --------------------------------------------------------------------
    let data = allocator.allocate(16);
    data.write_bytes(0xAB, 16);
    let grown = allocator.resize(data, 64);
    println!(
      "\n[4] resize(data, 64) = {grown:?} ({}), first byte = 0x{:X}",
      if grown == data { "in place" } else { "moved" },
      grown.read()
    );
    print_heap("4", &allocator);
    block_until_enter_pressed(step);

    // --------------------------------------------------------------------
    // 5) A large request grows the heap; the new space merges with the free
    //    tail before it is used.
    // --------------------------------------------------------------------
    let big = allocator.allocate(64 * 1024);
    println!("\n[5] allocate(64 KiB) = {big:?}");
    print_heap("5", &allocator);
  }

  let stats = allocator.check().context("heap is inconsistent")?;
  println!("\n[6] {stats:?}");

  Ok(())
}

fn main() -> Result<()> {
  pretty_env_logger::init();

  let args: Vec<String> = env::args().skip(1).collect();
  let step = args.iter().any(|arg| arg == "--step");

  if args.iter().any(|arg| arg == "--sbrk") {
    #[cfg(unix)]
    {
      let source = segalloc::Sbrk::new().context("program break is unavailable")?;
      println!("program break = {:?}", segalloc::Sbrk::current_break());
      return run(source, step);
    }
    #[cfg(not(unix))]
    anyhow::bail!("--sbrk needs a unix target");
  }

  run(Arena::default(), step)
}
