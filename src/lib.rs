//! # segalloc - A Segregated-Fit Memory Allocator Library
//!
//! This crate provides a general-purpose **segregated-fit allocator**
//! implementation in Rust that manages one contiguous heap grown on demand
//! through a brk-style primitive such as the `sbrk` system call.
//!
//! ## Overview
//!
//! Every free block is filed into one of ten size-class lists, so most
//! allocations are a short list scan away from a recyclable block:
//!
//! ```text
//!   Segregated-Fit Concept:
//!
//!   ┌──────────────────────────────────────────────────────────────────────┐
//!   │                          HEAP MEMORY                                 │
//!   │                                                                      │
//!   │   ┌──────┬──────────┬──────┬──────┬──────────────┬──────┬─────────┐  │
//!   │   │ used │   free   │ used │ free │     used     │ free │epilogue │  │
//!   │   └──────┴────▲─────┴──────┴──▲───┴──────────────┴──▲───┴─────────┘  │
//!   │               │               │                     │                │
//!   │   buckets:    │               │                     │                │
//!   │   [ 16 ]──────│───────────────┘                     │                │
//!   │   [ ≤32 ]─────┘                                     │                │
//!   │   [ ≤64 ]───────────────────────────────────────────┘                │
//!   │   [ ≤128 ] … [ >4096 ]                                               │
//!   │                                                                      │
//!   └──────────────────────────────────────────────────────────────────────┘
//!
//!   Free blocks are pushed LIFO onto their size class and taken first-fit.
//!   Neighbouring free blocks are always coalesced, so no two free blocks
//!   ever touch.
//! ```
//!
//! ## Crate Structure
//!
//! ```text
//!   segalloc
//!   ├── align      - Alignment macros (align!, align_to!)
//!   ├── block      - Boundary-tag primitives (internal)
//!   ├── brk        - Memory providers (Brk trait, Sbrk, FixedBrk)
//!   └── seg        - SegAllocator implementation
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use segalloc::{SegAllocator, Sbrk};
//!
//! fn main() {
//!     let mut allocator = SegAllocator::init(Sbrk::new()).unwrap();
//!
//!     unsafe {
//!         // Allocate memory for a u64 (payloads are always 16-aligned)
//!         let ptr = allocator.allocate(8) as *mut u64;
//!
//!         // Use the memory
//!         *ptr = 42;
//!         println!("Value: {}", *ptr);
//!
//!         // Free the memory
//!         allocator.free(ptr as *mut u8);
//!     }
//! }
//! ```
//!
//! ## How It Works
//!
//! Each block starts with a one-word boundary tag packing its size and two
//! flags; free blocks also carry their list links and a trailing footer:
//!
//! ```text
//!   Header word:
//!   ┌──────────────────────────────┬──────────┬──────┐
//!   │   block size in bytes [31:2] │ PREVFREE │ USED │
//!   └──────────────────────────────┴──────────┴──────┘
//!
//!   Used block:                      Free block:
//!   ┌────────┬───────────────┐      ┌────────┬──────┬──────┬───┬────────┐
//!   │ header │    payload    │      │ header │ next │ prev │ … │ footer │
//!   └────────┴───────────────┘      └────────┴──────┴──────┴───┴────────┘
//!            ▲
//!            └── Pointer returned to user (16-aligned)
//! ```
//!
//! The `PREVFREE` flag makes the footer unnecessary on used blocks — the
//! word is handed to the payload instead — while still allowing O(1)
//! backward coalescing across free neighbours. List links are signed word
//! offsets from the heap base rather than native pointers, halving their
//! footprint on 64-bit targets.
//!
//! When no free block fits, the heap grows: the old epilogue word becomes
//! the new block's header and, if the trailing block was free, the request
//! shrinks by its size and the two fuse in place.
//!
//! ## Features
//!
//! - **Block reuse**: freed blocks are recycled through ten size classes
//! - **Low fragmentation**: immediate bidirectional coalescing, splitting
//!   with a 16-byte minimum residual
//! - **Cheap growth**: trailing free blocks fuse with new heap memory
//! - **Pluggable provider**: `sbrk(2)` or an owned arena, behind one trait
//!
//! ## Limitations
//!
//! - **Single-threaded only**: no synchronization primitives
//! - **Heap never shrinks**: memory is recycled but not returned to the OS
//! - **First fit**: no best-fit or address-ordered placement
//! - **Unix-only with `Sbrk`**: requires `libc` and `sbrk` (POSIX systems);
//!   `FixedBrk` works anywhere
//!
//! ## Safety
//!
//! This crate is inherently unsafe as it deals with raw memory management.
//! All allocation and deallocation operations require `unsafe` blocks, and
//! callers carry the usual `malloc` obligations (no double-free, no use
//! after free, no overruns).

pub mod align;
mod block;
pub mod brk;
mod seg;

pub use brk::{Brk, FixedBrk, Sbrk};
pub use seg::{InitError, N_BUCKETS, SegAllocator};
