use std::io::Read;

use tagalloc::{Arena, Heap, MmapArena, Ptr};

/// Waits until the user presses ENTER, unless `TAGALLOC_NO_PAUSE` is set.
/// Useful to inspect the process with `pmap` or `gdb` between steps.
fn block_until_enter_pressed() {
  if std::env::var_os("TAGALLOC_NO_PAUSE").is_some() {
    return;
  }
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

fn print_alloc(
  heap: &mut Heap<MmapArena>,
  label: &str,
  ptr: Ptr,
) {
  let (_, hi) = heap.arena().bounds();
  println!(
    "[{}] offset = {}, address = {:?}, usable = {} bytes, heap end = {} bytes",
    label,
    ptr.offset(),
    heap.as_mut_ptr(ptr),
    heap.usable_size(ptr),
    hi,
  );
}

fn print_heap(heap: &Heap<MmapArena>) {
  print!("{}", heap.dump());
  println!("{:?}", heap.stats());
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
  env_logger::init();

  // 64 MiB of address space, committed lazily as the heap grows.
  let arena = MmapArena::reserve(64 << 20)?;
  println!("PID = {}, arena base = {:?}", std::process::id(), arena.base());
  let mut heap = Heap::init(arena)?;
  print_heap(&heap);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 1) A small allocation fits in the initial block.
  // --------------------------------------------------------------------
  let first = heap.alloc(16)?.ok_or("no allocation")?;
  print_alloc(&mut heap, "1", first);
  heap.payload_mut(first)[..4].copy_from_slice(&0xDEADBEEFu32.to_ne_bytes());
  print_heap(&heap);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 2) The next one does not: the arena grows by a page and the new block
  //    is split.
  // --------------------------------------------------------------------
  let second = heap.alloc(100)?.ok_or("no allocation")?;
  print_alloc(&mut heap, "2", second);
  print_heap(&heap);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 3) Free the first block and allocate the same size again: the LIFO
  //    free list hands the same block back.
  // --------------------------------------------------------------------
  heap.free(first);
  let third = heap.alloc(16)?.ok_or("no allocation")?;
  print_alloc(&mut heap, "3", third);
  println!(
    "[3] third == first? {}",
    if third == first { "Yes, it reused the freed block" } else { "No" }
  );
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 4) Grow `second` in place into the free space that follows it.
  // --------------------------------------------------------------------
  let grown = heap.realloc(Some(second), 1000)?.ok_or("no allocation")?;
  print_alloc(&mut heap, "4", grown);
  println!("[4] moved? {}", grown != second);
  print_heap(&heap);
  block_until_enter_pressed();

  // --------------------------------------------------------------------
  // 5) Free everything: all blocks coalesce back into one.
  // --------------------------------------------------------------------
  heap.free(third);
  heap.free(grown);
  print_heap(&heap);

  match heap.check() {
    Ok(()) => println!("\n[5] heap is consistent"),
    Err(violations) => {
      for violation in violations {
        println!("[5] {}", violation);
      }
    }
  }

  Ok(())
}
