//! # tagalloc - An Explicit Free List Allocator
//!
//! This crate provides a boundary-tag **explicit free list allocator**: a
//! heap with `alloc`, `free` and `realloc` over one contiguous, growable
//! arena.
//!
//! ## Overview
//!
//! Every block starts with a one-word header holding its size and two tag
//! bits. Free blocks additionally hold free-list links and a footer copy of
//! the header:
//!
//! ```text
//!   Used block:                         Free block:
//!   ┌──────────────────────┐            ┌──────────────────────┐
//!   │ size | P | U=1       │ header     │ size | P | U=0       │ header
//!   ├──────────────────────┤            ├──────────────────────┤
//!   │                      │ ◄── Ptr    │ next                 │
//!   │       payload        │            │ prev                 │
//!   │                      │            │        ...           │
//!   │                      │            │ size | P | U=0       │ footer
//!   └──────────────────────┘            └──────────────────────┘
//!
//!   U = TAG_USED              this block is allocated
//!   P = TAG_PRECEDING_USED    the block right before it is allocated
//! ```
//!
//! Blocks are laid out back to back and the arena ends with a sentinel word
//! that is always tagged used:
//!
//! ```text
//!   ┌──────┬────────┬──────┬──────────────┬──────┬───┐
//!   │ used │  free  │ used │     free     │ used │ S │
//!   └──────┴────────┴──────┴──────────────┴──────┴───┘
//!   base                                   sentinel ┘
//! ```
//!
//! Freed blocks are pushed on the front of the free list (LIFO) and merged
//! with free neighbours right away, so two free blocks are never adjacent.
//! The `P` bit tells whether the block before is free, and if it is, its
//! footer gives its size. Allocation is first fit; when nothing fits the
//! arena grows by whole pages.
//!
//! ## Crate Structure
//!
//! ```text
//!   tagalloc
//!   ├── align      - Alignment macros (align!, align_to!)
//!   ├── arena      - Arena trait, VecArena and MmapArena
//!   ├── block      - Header encoding, Ptr and the Block view
//!   ├── free_list  - LIFO doubly-linked free list (internal)
//!   ├── coalesce   - Boundary-tag coalescing (internal)
//!   ├── grow       - Arena growth (internal)
//!   ├── heap       - Heap: init, alloc, free, realloc
//!   ├── check      - Heap walks, stats, dumps and the checker
//!   └── error      - ArenaError, AllocError, Violation
//! ```
//!
//! ## Quick Start
//!
//! ```rust
//! use tagalloc::{Heap, VecArena};
//!
//! let mut heap = Heap::init(VecArena::new(1 << 20)).unwrap();
//!
//! let ptr = heap.alloc(64).unwrap().unwrap();
//! heap.payload_mut(ptr)[..5].copy_from_slice(b"hello");
//!
//! let ptr = heap.realloc(Some(ptr), 4096).unwrap().unwrap();
//! assert_eq!(&heap.payload(ptr)[..5], b"hello");
//!
//! heap.free(ptr);
//! assert!(heap.check().is_ok());
//! ```
//!
//! ## Limitations
//!
//! - **Single-threaded only**: no synchronization; wrap the heap in a lock to
//!   share it
//! - **First fit**: the free list is unordered, so adversarial size mixes
//!   fragment the heap
//! - **Unchecked frees**: double frees and foreign pointers are not detected.
//!   They corrupt the heap's own bookkeeping but, since every access goes
//!   through bounds-checked offsets, never memory outside the arena
//! - **No shrinking**: the arena never gives memory back

pub mod align;
mod arena;
mod block;
mod check;
mod coalesce;
mod error;
mod free_list;
mod grow;
mod heap;

#[cfg(unix)]
pub use arena::MmapArena;
pub use arena::{Arena, DEFAULT_PAGE_SIZE, VecArena};
pub use block::{
  ALIGNMENT, Block, MIN_BLOCK_SIZE, Ptr, SizeAndTags, TAG_PRECEDING_USED, TAG_USED, WORD_SIZE, block_size_for,
};
pub use check::{Blocks, HeapDump, HeapStats};
pub use error::{AllocError, ArenaError, Violation};
pub use free_list::Iter as FreeListIter;
pub use heap::{Heap, MAX_REQUEST};
