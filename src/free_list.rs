//! Explicit free list: a doubly-linked, LIFO list threaded through the
//! payload area of free blocks.
//!
//! ```text
//!   head ─► ┌──────────────┐     ┌──────────────┐
//!           │ sizeAndTags  │     │ sizeAndTags  │
//!           │ next ────────┼───► │ next ─► NIL  │
//!   NIL ◄───┼─ prev        │ ◄───┼─ prev        │
//!           │     ...      │     │     ...      │
//!           │ footer       │     │ footer       │
//!           └──────────────┘     └──────────────┘
//! ```
//!
//! List order says nothing about size or address.

use crate::block::Words;

pub(crate) struct FreeList {
  head: Option<usize>,
}

impl FreeList {
  pub(crate) const fn new() -> Self {
    Self { head: None }
  }

  pub(crate) fn head(&self) -> Option<usize> {
    self.head
  }

  /// Pushes `block` to the front of the list. Tags are left alone.
  pub(crate) fn insert(
    &mut self,
    mem: &mut [u8],
    block: usize,
  ) {
    let old_head = self.head;

    mem.set_next_free(block, old_head);
    if let Some(old_head) = old_head {
      mem.set_prev_free(old_head, Some(block));
    }
    mem.set_prev_free(block, None);

    self.head = Some(block);
  }

  /// Unlinks `block`, which must currently be in the list.
  pub(crate) fn remove(
    &mut self,
    mem: &mut [u8],
    block: usize,
  ) {
    debug_assert!(!mem.tags(block).is_used(), "removing used block {} from the free list", block);

    let next = mem.next_free(block);
    let prev = mem.prev_free(block);

    if let Some(next) = next {
      mem.set_prev_free(next, prev);
    }

    if self.head == Some(block) {
      self.head = next;
    } else if let Some(prev) = prev {
      mem.set_next_free(prev, next);
    }
  }

  /// First fit: the first block in list order of at least `min_size` bytes.
  pub(crate) fn search(
    &self,
    mem: &[u8],
    min_size: usize,
  ) -> Option<usize> {
    self.iter(mem).find(|&block| mem.tags(block).size() >= min_size)
  }

  pub(crate) fn iter<'a>(
    &self,
    mem: &'a [u8],
  ) -> Iter<'a> {
    Iter {
      mem,
      cursor: self.head,
    }
  }
}

/// Header offsets of the free blocks, head first.
pub struct Iter<'a> {
  mem: &'a [u8],
  cursor: Option<usize>,
}

impl Iterator for Iter<'_> {
  type Item = usize;

  fn next(&mut self) -> Option<usize> {
    let block = self.cursor?;
    self.cursor = self.mem.next_free(block);
    Some(block)
  }
}
