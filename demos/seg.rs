use std::io::Read;

use libc::sbrk;
use segalloc::{Sbrk, SegAllocator};

/// Waits until the user presses ENTER.
/// Useful when you want to inspect memory state with tools like `pmap`,
/// `htop`, `gdb`, or just visually track how allocations change the program
/// break.
fn block_until_enter_pressed() {
  println!("\n>>> Press ENTER to continue...");
  let _ = std::io::stdin().bytes().next();
}

/// Prints the current program break using `sbrk(0)`.
/// The program break is the upper boundary of the heap managed via brk/sbrk.
unsafe fn print_program_break(label: &str) {
  println!(
    "[{}] PID = {}, program break (sbrk(0)) = {:?}",
    label,
    std::process::id(),
    unsafe { sbrk(0) },
  );
}

fn main() {
  // A segregated-fit allocator over the real program break. The heap starts
  // with just its bucket table and epilogue and grows on demand.
  let mut allocator = SegAllocator::init(Sbrk::new()).expect("sbrk refused the initial heap");

  unsafe {
    // Initial heap state
    print_program_break("start");
    println!("heap under management: {} bytes", allocator.heap_size());
    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 1) Allocate 8 bytes for a u64. The payload is 16-aligned and the
    //    heap grows by one minimum block (16 bytes).
    // --------------------------------------------------------------------
    let first_block = allocator.allocate(8);
    println!("\n[1] Allocate 8 bytes at {:?}", first_block);
    println!("[1] addr % 16 = {}", first_block as usize % 16);

    let first_ptr = first_block as *mut u64;
    first_ptr.write(0xDEADBEEF);
    println!("[1] Value written to first_block = 0x{:X}", first_ptr.read());

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 2) Allocate 100 bytes, then free the first block. The 16-byte block
    //    lands in the smallest bucket, ready for reuse.
    // --------------------------------------------------------------------
    let second_block = allocator.allocate(100);
    println!("\n[2] Allocate 100 bytes at {:?}", second_block);

    allocator.free(first_block);
    println!("[2] Freed first_block; used bytes now {}", allocator.used_bytes());

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 3) Allocate 2 bytes and check whether the freed block was recycled.
    // --------------------------------------------------------------------
    let third_block = allocator.allocate(2);
    println!("\n[3] Allocate 2 bytes at {:?}", third_block);
    println!(
      "[3] third_block == first_block? {}",
      if third_block == first_block {
        "Yes, it reused the freed block"
      } else {
        "No, it allocated somewhere else"
      }
    );

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 4) Grow an allocation. The payload survives the move.
    // --------------------------------------------------------------------
    let grown = allocator.reallocate(third_block, 64);
    println!("\n[4] Reallocated 2 → 64 bytes: {:?} → {:?}", third_block, grown);

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 5) Allocate a large zeroed block to observe heap growth.
    // --------------------------------------------------------------------
    print_program_break("before large alloc");

    let big_block = allocator.zero_allocate(16 * 1024, 4);
    println!("\n[5] zero_allocate(16384, 4) = {:?}", big_block);

    print_program_break("after large alloc");
    println!("heap under management: {} bytes", allocator.heap_size());

    block_until_enter_pressed();

    // --------------------------------------------------------------------
    // 6) End of demo. Freed memory goes back to the buckets; the heap
    //    itself is reclaimed by the OS when the process exits.
    // --------------------------------------------------------------------
    allocator.free(second_block);
    allocator.free(grown);
    allocator.free(big_block);
    println!("\n[6] All blocks freed; used bytes now {}", allocator.used_bytes());
  }
}
