//! # Segregated-Fit Allocator
//!
//! A general-purpose heap allocator over a brk-style memory provider. It
//! keeps every free block in one of ten size-class lists and reuses them
//! first-fit, splitting and coalescing as blocks churn.
//!
//! ## Heap Layout
//!
//! ```text
//!   ┌──────────────┬─────┬─────────┬─────────┬─────┬─────────┬──────────┐
//!   │ bucket table │ pad │ block 0 │ block 1 │  …  │ block n │ epilogue │
//!   └──────────────┴─────┴─────────┴─────────┴─────┴─────────┴──────────┘
//!     10 list heads        ▲                                   ▲
//!                          heap_start                          1 word,
//!                          (offset base)                       size 0, USED
//! ```
//!
//! The bucket table is carved from the first provider request and lives at
//! the bottom of the heap. The padding places the first block header 12
//! bytes below a 16-byte boundary, so every payload (one word above its
//! header) comes out 16-aligned.
//!
//! ## Block Layout
//!
//! ```text
//!   header word:   [ size in bytes : 30 | PREVFREE : 1 | USED : 1 ]
//!
//!   used block:    [ header │ payload … ]
//!   free block:    [ header │ next │ prev │ … │ footer ]
//! ```
//!
//! Used blocks carry no footer — the word goes to the payload instead. That
//! is safe because backward navigation only ever happens across a *free*
//! neighbour, and the `PREVFREE` bit on each header says whether the block
//! before it is free. Free-list links are signed word offsets from
//! `heap_start`, with −1 as the absent-link sentinel, so a link costs four
//! bytes instead of a native pointer.
//!
//! ## Size Classes
//!
//! ```text
//!   bucket  0:          s = 16
//!   bucket  i (1..=8):  2^(i+3) < s ≤ 2^(i+4)     (32, 64, …, 4096)
//!   bucket  9:          s > 4096
//! ```
//!
//! Freed blocks are pushed LIFO onto their bucket. Allocation scans the
//! request's home bucket head-to-tail, then every larger bucket, and takes
//! the first block big enough — splitting off the residue when at least a
//! minimum block (16 bytes) remains.
//!
//! ## Growth
//!
//! When no fit exists the heap grows. The old epilogue word becomes the new
//! block's header, a fresh epilogue is written past the new memory, and the
//! new block is coalesced — so if the trailing block was free, the request
//! is first reduced by its size and the two fuse into exactly the block the
//! allocation needs.
//!
//! ## Safety
//!
//! The allocator hands out raw, uninitialized memory and trusts callers the
//! way `malloc` does:
//!
//! - pointers passed to [`free`](SegAllocator::free) or
//!   [`reallocate`](SegAllocator::reallocate) must have come from this
//!   allocator and must not be used afterwards;
//! - no double-free;
//! - a payload must not be written past its requested size.
//!
//! Violations are undefined behaviour. The allocator is single-threaded by
//! construction (`&mut self` everywhere, no interior mutability).

use std::{cmp, fmt, mem, ptr};

use log::debug;

use crate::align;
use crate::align::ALIGNMENT;
use crate::block::{Bt, NIL, Tag, WSIZE, Word};
use crate::brk::Brk;

/// Number of size-class buckets in the segregated free-list index.
pub const N_BUCKETS: usize = 10;

/// Smallest block: header, two link words, footer — 16 bytes.
const MIN_WORDS: usize = ALIGNMENT / WSIZE;

/// Largest request whose rounded block size still fits the header's 30-bit
/// size field.
const MAX_REQUEST: usize = Word::MAX as usize - 2 * ALIGNMENT;

/// Error returned when [`SegAllocator::init`] cannot obtain its initial
/// reservations from the memory provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InitError;

impl fmt::Display for InitError {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    f.write_str("memory provider refused the initial heap reservation")
  }
}

impl std::error::Error for InitError {}

/// A segregated-fit heap allocator over a brk-style provider.
///
/// Construction *is* initialization: [`init`](SegAllocator::init) performs
/// the initial provider reservations and returns the allocator, so the init
/// step cannot be re-entered or repeated on the same heap.
///
/// # Fields
///
/// * `heap_start` — first allocatable word; base for offset-encoded links
/// * `epilogue` — the size-0 `USED` sentinel terminating the heap
/// * `last` — the trailing block (its footer-plus-one is the epilogue)
/// * `buckets` — the ten list heads at the bottom of the heap
///
/// # Thread Safety
///
/// This allocator is **NOT** thread-safe. For multi-threaded usage,
/// external synchronization (e.g., a `Mutex`) is required.
pub struct SegAllocator<M: Brk> {
  /// The provider the heap grows through.
  mem: M,

  /// First allocatable word on the heap.
  heap_start: *mut Word,

  /// Current epilogue word.
  epilogue: *mut Word,

  /// Trailing block, or `None` while the heap holds no blocks.
  last: Option<Bt>,

  /// Bucket table living at the bottom of the heap.
  buckets: *mut Bt,
}

impl<M: Brk> SegAllocator<M> {
  /// Initializes a heap on the given provider.
  ///
  /// Reserves the bucket table, pads the heap so payloads come out
  /// 16-aligned, and installs the epilogue word. Fails if the provider
  /// cannot supply those first few bytes.
  pub fn init(mut mem: M) -> Result<Self, InitError> {
    let table_bytes = N_BUCKETS * mem::size_of::<Bt>();
    let table = mem.extend(table_bytes);
    if table.is_null() {
      return Err(InitError);
    }

    // The first block header will take over the epilogue word, and payloads
    // sit one word above their header, so the epilogue must land 12 bytes
    // below a 16-byte boundary.
    let after = table as usize + table_bytes;
    let pad = (3 * WSIZE).wrapping_sub(after) & (ALIGNMENT - 1);

    let raw = mem.extend(pad + WSIZE);
    if raw.is_null() {
      return Err(InitError);
    }
    debug_assert_eq!(after, raw as usize, "provider must grow contiguously");

    let epilogue = (raw as usize + pad) as *mut Word;
    let mut heap = Self {
      mem,
      heap_start: epilogue,
      epilogue,
      last: None,
      buckets: table as *mut Bt,
    };

    unsafe {
      *heap.epilogue = Tag::USED.bits();
      for index in 0..N_BUCKETS {
        heap.set_bucket(index, None);
      }
    }

    debug!("heap online: bucket table {:p}, epilogue {:p}", table, epilogue);
    Ok(heap)
  }

  /// Allocates `bytes` bytes and returns a 16-aligned payload pointer, or
  /// null when the request is zero, unrepresentable, or the provider is out
  /// of memory.
  ///
  /// # Request Rounding
  ///
  /// ```text
  ///   block size = round_up_16(header word + bytes)
  ///
  ///   allocate(1)  → 16-byte block    allocate(24) → 32-byte block
  ///   allocate(12) → 16-byte block    allocate(28) → 32-byte block
  /// ```
  ///
  /// # Safety
  ///
  /// The returned memory is uninitialized. The caller must not read it
  /// before writing, must not write past `bytes`, and must release it
  /// through this allocator only.
  pub unsafe fn allocate(
    &mut self,
    bytes: usize,
  ) -> *mut u8 {
    if bytes == 0 || bytes > MAX_REQUEST {
      return ptr::null_mut();
    }

    let blk_bytes = align!(WSIZE + bytes);
    let words = blk_bytes / WSIZE;

    unsafe {
      if let Some(block) = self.find_fit(words) {
        self.place(block, words);
        return block.payload();
      }

      // No fit anywhere. Grow the heap by the shortfall: if the trailing
      // block is free it will fuse with the new memory, so only the
      // difference must be requested.
      let mut grow = blk_bytes;
      if let Some(tail) = self.last {
        if tail.is_free() {
          debug_assert!(tail.size_bytes() < grow);
          grow -= tail.size_bytes();
        }
      }

      match self.extend_heap(grow) {
        Some(block) => {
          self.place(block, words);
          block.payload()
        }
        None => ptr::null_mut(),
      }
    }
  }

  /// Releases a payload previously returned by this allocator. Null is a
  /// no-op.
  ///
  /// The block is marked free, fused with any free neighbour, and pushed
  /// onto its bucket.
  ///
  /// # Safety
  ///
  /// `payload` must be null or a live pointer obtained from this allocator;
  /// it must not be used again afterwards.
  pub unsafe fn free(
    &mut self,
    payload: *mut u8,
  ) {
    if payload.is_null() {
      return;
    }

    unsafe {
      let block = Bt::from_payload(payload);
      let keep = block.tag() & Tag::PREVFREE;
      self.bt_make(block, block.size(), keep);

      let next_is_free = self.next_block(block).is_some_and(|n| n.is_free());
      if block.prev_free() || next_is_free {
        self.coalesce(block);
      } else {
        self.free_list_append(block);
      }
    }
  }

  /// Resizes an allocation, preserving its payload up to the common length.
  ///
  /// * `bytes == 0` frees `payload` and returns null.
  /// * a null `payload` behaves as [`allocate`](SegAllocator::allocate).
  /// * otherwise a new block is allocated, the payload copied, and the old
  ///   block freed. On failure null is returned and the old block stays
  ///   valid and untouched.
  ///
  /// # Safety
  ///
  /// Same contract as [`free`](SegAllocator::free) for `payload`; on
  /// success the old pointer must not be used again.
  pub unsafe fn reallocate(
    &mut self,
    payload: *mut u8,
    bytes: usize,
  ) -> *mut u8 {
    unsafe {
      if bytes == 0 {
        self.free(payload);
        return ptr::null_mut();
      }
      if payload.is_null() {
        return self.allocate(bytes);
      }

      let fresh = self.allocate(bytes);
      if fresh.is_null() {
        return ptr::null_mut();
      }

      // Payload capacity is the block minus its header word on both sides.
      let old_bytes = Bt::from_payload(payload).size_bytes() - WSIZE;
      let new_bytes = Bt::from_payload(fresh).size_bytes() - WSIZE;
      ptr::copy_nonoverlapping(payload, fresh, cmp::min(old_bytes, new_bytes));

      self.free(payload);
      fresh
    }
  }

  /// Allocates `n * size` bytes of zeroed memory.
  ///
  /// Returns null when the product overflows, is zero, or the allocation
  /// fails; the heap is untouched in every failure case.
  ///
  /// # Safety
  ///
  /// Same contract as [`allocate`](SegAllocator::allocate).
  pub unsafe fn zero_allocate(
    &mut self,
    n: usize,
    size: usize,
  ) -> *mut u8 {
    let Some(total) = n.checked_mul(size) else {
      return ptr::null_mut();
    };

    unsafe {
      let payload = self.allocate(total);
      if !payload.is_null() {
        let bytes = Bt::from_payload(payload).size_bytes() - WSIZE;
        ptr::write_bytes(payload, 0, bytes);
      }
      payload
    }
  }

  /// Total bytes currently under management, bucket table and padding
  /// included.
  pub fn heap_size(&self) -> usize {
    let (low, high) = self.mem.bounds();
    high as usize - low as usize
  }

  /// Sum of allocated block sizes, from a forward walk of the heap.
  pub fn used_bytes(&self) -> usize {
    let mut used = 0;

    unsafe {
      let mut block = Bt::new(self.heap_start);
      while block.raw() != self.epilogue {
        if block.is_used() {
          used += block.size_bytes();
        }
        block = Bt::new(block.past_end());
      }
    }

    used
  }

  /// The underlying memory provider.
  pub fn provider(&self) -> &M {
    &self.mem
  }

  // ---- boundary-tag writes -------------------------------------------------

  /// The single block-write primitive.
  ///
  /// Writes the header and keeps the neighbourhood consistent: a used block
  /// clears `PREVFREE` on its successor; a free block lays its footer and
  /// sets `PREVFREE` on its successor. The epilogue is never touched.
  unsafe fn bt_make(
    &mut self,
    block: Bt,
    words: usize,
    tag: Tag,
  ) {
    unsafe {
      block.write(words, tag);

      if tag.contains(Tag::USED) {
        if let Some(next) = self.next_block(block) {
          next.clear_prev_free();
        }
      } else {
        block.write_footer();
        if let Some(next) = self.next_block(block) {
          next.set_prev_free();
        }
      }
    }
  }

  /// The block after `block`, or `None` at the end of the heap.
  unsafe fn next_block(
    &self,
    block: Bt,
  ) -> Option<Bt> {
    let next = unsafe { block.past_end() };
    if next == self.epilogue { None } else { Some(Bt::new(next)) }
  }

  // ---- segregated free-list index ------------------------------------------

  /// Size class of a block of `words` words: bucket 0 holds exactly 16-byte
  /// blocks, each following bucket doubles the boundary, the final bucket
  /// takes everything larger.
  fn find_bucket(words: usize) -> usize {
    let bytes = words * WSIZE;
    let mut bound = ALIGNMENT;
    let mut index = 0;

    while index + 1 < N_BUCKETS && bytes > bound {
      bound <<= 1;
      index += 1;
    }

    index
  }

  /// LIFO insert at the head of the block's bucket.
  unsafe fn free_list_append(
    &mut self,
    block: Bt,
  ) {
    unsafe {
      let index = Self::find_bucket(block.size());
      let head = self.bucket(index);

      self.set_blink(block, None);
      self.set_flink(block, head);
      if let Some(head) = head {
        self.set_blink(head, Some(block));
      }
      self.set_bucket(index, Some(block));
    }
  }

  /// Unlinks the block from its bucket, whether it is the sole element, the
  /// head, in the middle, or the tail.
  unsafe fn free_list_delete(
    &mut self,
    block: Bt,
  ) {
    unsafe {
      let index = Self::find_bucket(block.size());
      let next = self.flink(block);
      let prev = self.blink(block);

      match prev {
        None => self.set_bucket(index, next),
        Some(prev) => self.set_flink(prev, next),
      }
      if let Some(next) = next {
        self.set_blink(next, prev);
      }
    }
  }

  /// Head of a bucket, or `None` when the slot holds the empty sentinel.
  unsafe fn bucket(
    &self,
    index: usize,
  ) -> Option<Bt> {
    let head = unsafe { *self.buckets.add(index) };
    if self.off_of(head) < 0 { None } else { Some(head) }
  }

  unsafe fn set_bucket(
    &mut self,
    index: usize,
    head: Option<Bt>,
  ) {
    let head = head.unwrap_or_else(|| self.nil());
    unsafe { *self.buckets.add(index) = head }
  }

  /// Forward link of a free block.
  unsafe fn flink(
    &self,
    block: Bt,
  ) -> Option<Bt> {
    self.at_off(unsafe { block.next_off() })
  }

  /// Backward link of a free block.
  unsafe fn blink(
    &self,
    block: Bt,
  ) -> Option<Bt> {
    self.at_off(unsafe { block.prev_off() })
  }

  unsafe fn set_flink(
    &mut self,
    block: Bt,
    to: Option<Bt>,
  ) {
    let off = to.map_or(NIL, |to| self.off_of(to));
    unsafe { block.set_next_off(off) }
  }

  unsafe fn set_blink(
    &mut self,
    block: Bt,
    to: Option<Bt>,
  ) {
    let off = to.map_or(NIL, |to| self.off_of(to));
    unsafe { block.set_prev_off(off) }
  }

  /// The empty-bucket sentinel: one word below the heap base, offset −1.
  fn nil(&self) -> Bt {
    Bt::new(self.heap_start.wrapping_sub(1))
  }

  /// Offset of a block from the heap base, in words.
  fn off_of(
    &self,
    block: Bt,
  ) -> Word {
    let delta = block.raw() as isize - self.heap_start as isize;
    (delta / WSIZE as isize) as Word
  }

  /// Block at a stored offset; negative offsets decode to `None`.
  fn at_off(
    &self,
    off: Word,
  ) -> Option<Bt> {
    if off < 0 {
      None
    } else {
      Some(Bt::new(self.heap_start.wrapping_add(off as usize)))
    }
  }

  // ---- allocation engine ---------------------------------------------------

  /// First-fit search: scan the request's home bucket head-to-tail, then
  /// every larger bucket, for the first block of at least `words` words.
  unsafe fn find_fit(
    &self,
    words: usize,
  ) -> Option<Bt> {
    unsafe {
      for index in Self::find_bucket(words)..N_BUCKETS {
        let mut cursor = self.bucket(index);
        while let Some(block) = cursor {
          if block.size() >= words {
            return Some(block);
          }
          cursor = self.flink(block);
        }
      }
    }

    None
  }

  /// Converts a free block into a `words`-word allocation.
  ///
  /// ```text
  ///   before:  [          free, size ≥ words           ]
  ///   after:   [ used, words ][ free residual ≥ 4 words ]
  /// ```
  ///
  /// The residual is split off only when it can hold a minimum block;
  /// otherwise the whole block is used and the slack becomes internal
  /// fragmentation. A residual split off the trailing block becomes the new
  /// trailing block.
  unsafe fn place(
    &mut self,
    block: Bt,
    words: usize,
  ) {
    unsafe {
      self.free_list_delete(block);

      let total = block.size();
      let keep = block.tag() & Tag::PREVFREE;

      if total - words >= MIN_WORDS {
        self.bt_make(block, words, Tag::USED | keep);

        let rest = Bt::new(block.past_end());
        self.bt_make(rest, total - words, Tag::empty());
        self.free_list_append(rest);

        if self.last == Some(block) {
          self.last = Some(rest);
        }
      } else {
        self.bt_make(block, total, Tag::USED | keep);
      }
    }
  }

  // ---- reclamation engine --------------------------------------------------

  /// Fuses a free block with its free neighbours and pushes the result onto
  /// its bucket. Returns the merged block, which may start at the previous
  /// neighbour's address.
  ///
  /// ```text
  ///   [ free prev ][ block ][ free next ]   →   [        one free block   ]
  /// ```
  unsafe fn coalesce(
    &mut self,
    block: Bt,
  ) -> Bt {
    unsafe {
      let mut merged = block;
      let mut words = block.size();

      let next = self.next_block(block).filter(|n| n.is_free());
      let prev = if block.prev_free() { Some(block.prev()) } else { None };

      // The merged block trails the heap if `block` already did, or if it
      // swallows the current trailing block.
      let trails = self.last == Some(block) || (next.is_some() && next == self.last);

      if let Some(next) = next {
        self.free_list_delete(next);
        words += next.size();
      }
      if let Some(prev) = prev {
        self.free_list_delete(prev);
        words += prev.size();
        merged = prev;
      }

      let keep = merged.tag() & Tag::PREVFREE;
      self.bt_make(merged, words, keep);
      self.free_list_append(merged);

      if trails {
        self.last = Some(merged);
      }

      merged
    }
  }

  // ---- heap extension ------------------------------------------------------

  /// Grows the heap by `bytes` (a multiple of the alignment) and returns the
  /// resulting free block, coalesced with the old trailing block when that
  /// was free.
  ///
  /// ```text
  ///   before:  … [ blocks ][ epilogue ]│ ← break
  ///   after:   … [ blocks ][ new free block ][ epilogue ]│ ← break
  ///                         ▲ header reuses the old epilogue word
  /// ```
  unsafe fn extend_heap(
    &mut self,
    bytes: usize,
  ) -> Option<Bt> {
    let raw = self.mem.extend(bytes);
    if raw.is_null() {
      return None;
    }
    debug_assert_eq!(self.epilogue as usize + WSIZE, raw as usize);
    debug!("growing heap by {} bytes", bytes);

    unsafe {
      let words = bytes / WSIZE;
      let block = Bt::new(self.epilogue);
      let keep = match self.last {
        Some(tail) if tail.is_free() => Tag::PREVFREE,
        _ => Tag::empty(),
      };

      self.epilogue = block.raw().add(words);
      *self.epilogue = Tag::USED.bits();

      self.bt_make(block, words, keep);
      self.last = Some(block);

      Some(self.coalesce(block))
    }
  }

  // ---- consistency checking ------------------------------------------------

  /// Asserts every heap invariant. Walks the blocks forward checking
  /// header/footer agreement, `PREVFREE` correctness, adjacency, alignment,
  /// and the trailing block; then walks every bucket checking membership,
  /// link consistency, and that the two walks saw the same free blocks.
  #[cfg(test)]
  fn check_heap(&self) {
    unsafe {
      let mut walked_free = 0;
      let mut prev_was_free = false;
      let mut trailing = None;

      let mut block = Bt::new(self.heap_start);
      while block.raw() != self.epilogue {
        let bytes = block.size_bytes();
        assert!(bytes >= ALIGNMENT, "undersized block at {:p}", block.raw());
        assert_eq!(0, bytes % ALIGNMENT, "ragged block size {}", bytes);
        assert_eq!(0, block.payload() as usize % ALIGNMENT);

        if block.raw() == self.heap_start {
          assert!(!block.prev_free(), "first block claims a previous one");
        } else {
          assert_eq!(prev_was_free, block.prev_free(), "stale PREVFREE at {:p}", block.raw());
        }

        if block.is_free() {
          assert_eq!(*block.raw(), *block.footer(), "footer mismatch at {:p}", block.raw());
          assert!(!prev_was_free, "adjacent free blocks at {:p}", block.raw());
          assert!(self.bucket_contains(block), "free block missing from its bucket");
          walked_free += 1;
        }

        prev_was_free = block.is_free();
        trailing = Some(block);
        block = Bt::new(block.past_end());
      }

      assert_eq!(self.last, trailing, "trailing block out of date");
      assert_eq!(Tag::USED.bits(), *self.epilogue, "corrupt epilogue");

      let mut listed_free = 0;
      for index in 0..N_BUCKETS {
        let mut prev = None;
        let mut cursor = self.bucket(index);

        while let Some(entry) = cursor {
          assert!(entry.is_free(), "used block in bucket {}", index);
          assert_eq!(index, Self::find_bucket(entry.size()), "block in wrong bucket");
          assert_eq!(prev, self.blink(entry), "broken backward link");

          listed_free += 1;
          prev = cursor;
          cursor = self.flink(entry);
        }
      }

      assert_eq!(walked_free, listed_free, "free-list membership mismatch");
    }
  }

  #[cfg(test)]
  unsafe fn bucket_contains(
    &self,
    block: Bt,
  ) -> bool {
    unsafe {
      let mut cursor = self.bucket(Self::find_bucket(block.size()));
      while let Some(entry) = cursor {
        if entry == block {
          return true;
        }
        cursor = self.flink(entry);
      }
    }

    false
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::brk::{Brk, FixedBrk, Sbrk};

  /// Provider wrapper counting how often the heap actually grows.
  struct Counting<M: Brk> {
    inner: M,
    extends: usize,
  }

  impl<M: Brk> Counting<M> {
    fn new(inner: M) -> Self {
      Self { inner, extends: 0 }
    }
  }

  impl<M: Brk> Brk for Counting<M> {
    fn extend(
      &mut self,
      incr: usize,
    ) -> *mut u8 {
      self.extends += 1;
      self.inner.extend(incr)
    }

    fn bounds(&self) -> (*const u8, *const u8) {
      self.inner.bounds()
    }
  }

  fn heap(capacity: usize) -> SegAllocator<FixedBrk> {
    SegAllocator::init(FixedBrk::with_capacity(capacity)).expect("arena init")
  }

  fn is_aligned(
    ptr: *mut u8,
    align: usize,
  ) -> bool {
    (ptr as usize) % align == 0
  }

  /// Forward walk of the heap as `(size_bytes, is_free)` pairs.
  fn blocks<M: Brk>(heap: &SegAllocator<M>) -> Vec<(usize, bool)> {
    let mut out = Vec::new();

    unsafe {
      let mut block = Bt::new(heap.heap_start);
      while block.raw() != heap.epilogue {
        out.push((block.size_bytes(), block.is_free()));
        block = Bt::new(block.past_end());
      }
    }

    out
  }

  fn fill(
    ptr: *mut u8,
    len: usize,
    seed: u8,
  ) {
    for i in 0..len {
      unsafe { ptr.add(i).write(seed.wrapping_add(i as u8)) }
    }
  }

  fn verify(
    ptr: *mut u8,
    len: usize,
    seed: u8,
  ) {
    for i in 0..len {
      let got = unsafe { ptr.add(i).read() };
      assert_eq!(seed.wrapping_add(i as u8), got, "payload corrupted at byte {}", i);
    }
  }

  #[test]
  fn init_fails_when_the_provider_cannot_reserve() {
    assert_eq!(Err(InitError), SegAllocator::init(FixedBrk::with_capacity(16)).map(|_| ()));

    // Room for the bucket table but not for padding plus epilogue.
    assert_eq!(Err(InitError), SegAllocator::init(FixedBrk::with_capacity(80)).map(|_| ()));
  }

  #[test]
  fn payloads_are_16_aligned() {
    let mut heap = heap(1 << 20);

    unsafe {
      for bytes in [1usize, 2, 3, 4, 8, 12, 13, 16, 24, 100, 1000, 4096] {
        let payload = heap.allocate(bytes);
        assert!(!payload.is_null());
        assert!(is_aligned(payload, ALIGNMENT), "{} bytes came back misaligned", bytes);
        heap.check_heap();
      }
    }
  }

  #[test]
  fn single_block_lifecycle() {
    let mut heap = heap(1 << 16);

    unsafe {
      let payload = heap.allocate(1);
      assert!(!payload.is_null());
      assert!(is_aligned(payload, ALIGNMENT));
      heap.check_heap();

      heap.free(payload);
      heap.check_heap();

      assert_eq!(vec![(16, true)], blocks(&heap));
      assert_eq!(0, heap.used_bytes());
    }
  }

  #[test]
  fn free_then_allocate_at_same_size_reuses_the_block() {
    let mut heap = heap(1 << 16);

    unsafe {
      let p = heap.allocate(32);
      let before = heap.heap_size();

      heap.free(p);
      let q = heap.allocate(32);

      assert_eq!(p, q);
      assert_eq!(before, heap.heap_size());
      heap.check_heap();
    }
  }

  #[test]
  fn freeing_between_used_neighbours_frees_exactly_one_block() {
    let mut heap = heap(1 << 16);

    unsafe {
      let a = heap.allocate(24);
      let b = heap.allocate(24);
      let c = heap.allocate(24);
      assert!(!a.is_null() && !b.is_null() && !c.is_null());

      heap.free(b);
      heap.check_heap();

      // 24 bytes round up to a 32-byte block; only that block is free.
      assert_eq!(vec![(32, false), (32, true), (32, false)], blocks(&heap));
    }
  }

  #[test]
  fn out_of_order_frees_coalesce_into_one_block() {
    let mut heap = heap(1 << 16);

    unsafe {
      let a = heap.allocate(24);
      let b = heap.allocate(24);
      let c = heap.allocate(24);

      heap.free(a);
      heap.check_heap();
      heap.free(c);
      heap.check_heap();
      heap.free(b);
      heap.check_heap();

      assert_eq!(vec![(96, true)], blocks(&heap));

      // The coalesced span serves the next request from its low end.
      let again = heap.allocate(24);
      assert_eq!(a, again);
      heap.check_heap();
    }
  }

  #[test]
  fn fit_splits_and_banks_the_residual() {
    let mut heap = heap(1 << 20);

    unsafe {
      let a = heap.allocate(1000);
      let b = heap.allocate(1000);
      assert!(!b.is_null());

      heap.free(a);
      heap.check_heap();

      let c = heap.allocate(500);
      assert_eq!(a, c);
      heap.check_heap();

      // a's 1008-byte block was split into 512 used + 496 free.
      assert_eq!(vec![(512, false), (496, true), (1008, false)], blocks(&heap));
    }
  }

  #[test]
  fn no_growth_when_a_fit_exists() {
    let mem = Counting::new(FixedBrk::with_capacity(1 << 20));
    let mut heap = SegAllocator::init(mem).expect("arena init");

    unsafe {
      let p = heap.allocate(100);
      heap.free(p);

      let grown = heap.provider().extends;
      let q = heap.allocate(50);

      assert!(!q.is_null());
      assert_eq!(grown, heap.provider().extends);
      heap.check_heap();
    }
  }

  #[test]
  fn extension_fuses_the_trailing_free_block() {
    let mem = Counting::new(FixedBrk::with_capacity(1 << 20));
    let mut heap = SegAllocator::init(mem).expect("arena init");

    unsafe {
      let p = heap.allocate(100);
      let q = heap.allocate(200);
      heap.free(q);
      heap.check_heap();

      // 200 rounds to a 208-byte trailing free block; a 1000-byte request
      // needs a 1008-byte block, so the heap grows by only the shortfall.
      let before = heap.heap_size();
      let grown = heap.provider().extends;

      let r = heap.allocate(1000);
      assert_eq!(q, r);
      assert_eq!(grown + 1, heap.provider().extends);
      assert_eq!(before + 800, heap.heap_size());
      heap.check_heap();

      heap.free(p);
      heap.free(r);
      heap.check_heap();
    }
  }

  #[test]
  fn reallocate_preserves_the_payload() {
    let mut heap = heap(1 << 20);

    unsafe {
      let p = heap.allocate(32);
      fill(p, 32, 0xAB);

      let q = heap.reallocate(p, 64);
      assert!(!q.is_null());
      verify(q, 32, 0xAB);
      heap.check_heap();

      // Shrinking keeps the front of the payload.
      fill(q, 64, 0x11);
      let r = heap.reallocate(q, 10);
      assert!(!r.is_null());
      verify(r, 10, 0x11);
      heap.check_heap();

      heap.free(r);
    }
  }

  #[test]
  fn reallocate_edge_contracts() {
    let mut heap = heap(1 << 16);

    unsafe {
      // Null input behaves as allocate.
      let p = heap.reallocate(ptr::null_mut(), 48);
      assert!(!p.is_null());

      // Zero size frees and returns null.
      assert!(heap.reallocate(p, 0).is_null());
      assert_eq!(0, heap.used_bytes());
      heap.check_heap();
    }
  }

  #[test]
  fn zero_allocate_returns_clean_memory() {
    let mut heap = heap(1 << 16);

    unsafe {
      // Dirty a block first so reuse would expose missing zeroing.
      let dirty = heap.allocate(128);
      fill(dirty, 128, 0xEE);
      heap.free(dirty);

      let p = heap.zero_allocate(16, 8);
      assert_eq!(dirty, p);
      for i in 0..128 {
        assert_eq!(0, p.add(i).read(), "byte {} not zeroed", i);
      }
      heap.check_heap();
    }
  }

  #[test]
  fn zero_allocate_rejects_overflow() {
    let mut heap = heap(1 << 16);

    unsafe {
      let before = heap.heap_size();
      assert!(heap.zero_allocate(usize::MAX, 2).is_null());
      assert!(heap.zero_allocate(0, 8).is_null());
      assert_eq!(before, heap.heap_size());
      heap.check_heap();
    }
  }

  #[test]
  fn zero_and_oversized_requests_return_null() {
    let mut heap = heap(1 << 16);

    unsafe {
      assert!(heap.allocate(0).is_null());
      assert!(heap.allocate(usize::MAX - 3).is_null());
      assert!(heap.allocate(Word::MAX as usize).is_null());

      // Out of memory: the arena is far smaller than this.
      let before = heap.heap_size();
      assert!(heap.allocate(1 << 20).is_null());
      assert_eq!(before, heap.heap_size());
      heap.check_heap();
    }
  }

  #[test]
  fn free_of_null_is_a_noop() {
    let mut heap = heap(1 << 16);

    unsafe {
      heap.free(ptr::null_mut());
      heap.check_heap();
    }
  }

  #[test]
  fn used_bytes_tracks_live_blocks() {
    let mut heap = heap(1 << 16);

    unsafe {
      assert_eq!(0, heap.used_bytes());

      let a = heap.allocate(24); // 32-byte block
      let b = heap.allocate(60); // 64-byte block
      assert_eq!(96, heap.used_bytes());

      heap.free(a);
      assert_eq!(64, heap.used_bytes());

      heap.free(b);
      assert_eq!(0, heap.used_bytes());
    }
  }

  #[test]
  fn scrambled_churn_collapses_to_a_single_free_block() {
    const N: usize = 64;
    let mut heap = heap(1 << 20);

    unsafe {
      let mut payloads = Vec::with_capacity(N);
      for i in 0..N {
        let bytes = 16 + (i * 80) % 4096;
        let payload = heap.allocate(bytes);
        assert!(!payload.is_null());

        fill(payload, bytes, i as u8);
        payloads.push((payload, bytes));
      }
      heap.check_heap();

      // Free in a scrambled order: 29 is coprime to 64, so this visits
      // every slot exactly once.
      for step in 0..N {
        let (payload, bytes) = payloads[(step * 29) % N];
        verify(payload, bytes, ((step * 29) % N) as u8);

        heap.free(payload);
        heap.check_heap();
      }

      let walk = blocks(&heap);
      assert_eq!(1, walk.len(), "churn left fragments: {:?}", walk);
      assert!(walk[0].1);
    }
  }

  #[test]
  fn mixed_workload_keeps_payloads_intact() {
    let mut heap = heap(1 << 20);
    let mut live: Vec<(*mut u8, usize, u8)> = Vec::new();
    let mut rng: u64 = 0x9E37_79B9_7F4A_7C15;

    unsafe {
      for round in 0..400u64 {
        rng = rng.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);

        if live.len() > 24 || (!live.is_empty() && rng % 3 == 0) {
          let victim = (rng >> 16) as usize % live.len();
          let (payload, bytes, seed) = live.swap_remove(victim);
          verify(payload, bytes, seed);
          heap.free(payload);
        } else {
          let bytes = 1 + (rng >> 8) as usize % 512;
          let payload = heap.allocate(bytes);
          assert!(!payload.is_null());

          let seed = round as u8;
          fill(payload, bytes, seed);
          live.push((payload, bytes, seed));
        }

        heap.check_heap();
      }

      for (payload, bytes, seed) in live {
        verify(payload, bytes, seed);
        heap.free(payload);
        heap.check_heap();
      }

      assert_eq!(0, heap.used_bytes());
    }
  }

  #[test]
  fn sbrk_end_to_end() {
    let mut heap = SegAllocator::init(Sbrk::new()).expect("program break init");

    unsafe {
      let p = heap.allocate(64);
      assert!(!p.is_null());
      assert!(is_aligned(p, ALIGNMENT));
      fill(p, 64, 0x5A);

      let q = heap.allocate(4096);
      assert!(!q.is_null());
      verify(p, 64, 0x5A);

      heap.free(p);
      heap.free(q);
      heap.check_heap();
    }
  }
}
