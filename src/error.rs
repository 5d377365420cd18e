use std::io;

use thiserror::Error;

/// Failure of the arena to provide more memory.
#[derive(Error, Debug)]
pub enum ArenaError {
  #[error("arena exhausted: requested {requested} bytes, {available} available")]
  Exhausted { requested: usize, available: usize },

  #[error("could not map arena memory: {0}")]
  Map(#[source] io::Error),
}

#[derive(Error, Debug)]
pub enum AllocError {
  /// The arena could not supply the initial heap.
  #[error("heap initialization failed")]
  Init(#[source] ArenaError),

  /// The arena could not grow enough to satisfy a request. The heap is left
  /// as it was before the call.
  #[error("out of memory while allocating {requested} bytes")]
  OutOfMemory {
    requested: usize,
    #[source]
    source: Option<ArenaError>,
  },
}

/// An inconsistency found by [`Heap::check`](crate::Heap::check).
///
/// Offsets are header offsets from the start of the arena.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum Violation {
  #[error("block at {offset}: bad size {size}")]
  BadSize { offset: usize, size: usize },

  #[error("block at {offset}: size {size} runs past the heap end {end}")]
  OutOfBounds { offset: usize, size: usize, end: usize },

  #[error("free block at {offset}: footer {footer:#x} does not match header {header:#x}")]
  FooterMismatch { offset: usize, header: usize, footer: usize },

  #[error("block at {offset}: PRECEDING_USED is {tagged} but the preceding block is {actual}")]
  PrecedingTag { offset: usize, tagged: bool, actual: bool },

  #[error("free blocks at {first} and {second} are adjacent")]
  AdjacentFree { first: usize, second: usize },

  #[error("sentinel at {offset} is not tagged USED")]
  SentinelNotUsed { offset: usize },

  #[error("free list entry {offset} is not a free block")]
  ListNotFree { offset: usize },

  #[error("free list entry {offset}: prev link {found:?}, expected {expected:?}")]
  BrokenBackLink {
    offset: usize,
    expected: Option<usize>,
    found: Option<usize>,
  },

  #[error("free list visits {offset} more than once")]
  ListCycle { offset: usize },

  #[error("free block at {offset} is missing from the free list")]
  NotInList { offset: usize },
}
