use std::{fmt, mem, num::NonZeroUsize};

use crate::align;

/// Size of the header word (and of every other metadata word).
pub const WORD_SIZE: usize = mem::size_of::<usize>();

/// Alignment of every block and of every payload offset.
pub const ALIGNMENT: usize = 8;

/// Smallest block that can be freed again: header, `next`, `prev` and footer.
pub const MIN_BLOCK_SIZE: usize = align!(4 * WORD_SIZE);

/// Set when the block itself is allocated.
pub const TAG_USED: usize = 1;

/// Set when the block physically before this one is allocated.
pub const TAG_PRECEDING_USED: usize = 2;

const TAG_MASK: usize = ALIGNMENT - 1;

/// Encoded `next`/`prev` value meaning "no link".
pub(crate) const NIL: usize = usize::MAX;

/// A header or footer word: the block size in the high bits, tags in the low
/// three.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct SizeAndTags(usize);

impl SizeAndTags {
  pub const fn new(
    size: usize,
    used: bool,
    preceding_used: bool,
  ) -> Self {
    let mut word = size & !TAG_MASK;
    if used {
      word |= TAG_USED;
    }
    if preceding_used {
      word |= TAG_PRECEDING_USED;
    }
    Self(word)
  }

  pub const fn from_raw(word: usize) -> Self {
    Self(word)
  }

  pub const fn raw(self) -> usize {
    self.0
  }

  pub const fn size(self) -> usize {
    self.0 & !TAG_MASK
  }

  pub const fn is_used(self) -> bool {
    self.0 & TAG_USED != 0
  }

  pub const fn is_preceding_used(self) -> bool {
    self.0 & TAG_PRECEDING_USED != 0
  }

  pub const fn with_used(
    self,
    used: bool,
  ) -> Self {
    Self::new(self.size(), used, self.is_preceding_used())
  }

  pub const fn with_preceding_used(
    self,
    preceding_used: bool,
  ) -> Self {
    Self::new(self.size(), self.is_used(), preceding_used)
  }

  pub const fn with_size(
    self,
    size: usize,
  ) -> Self {
    Self::new(size, self.is_used(), self.is_preceding_used())
  }
}

impl fmt::Debug for SizeAndTags {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    write!(
      f,
      "{}{}{}",
      self.size(),
      if self.is_used() { "|U" } else { "" },
      if self.is_preceding_used() { "|P" } else { "" },
    )
  }
}

/// Handle to an allocation: the payload offset inside the arena.
///
/// The header sits one word below it. Offsets are never zero, since a payload
/// always follows a header.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct Ptr(NonZeroUsize);

impl Ptr {
  pub(crate) fn from_header(header: usize) -> Self {
    match NonZeroUsize::new(header + WORD_SIZE) {
      Some(offset) => Self(offset),
      None => unreachable!("header offset wraps around"),
    }
  }

  /// Offset of the first payload byte from the start of the arena.
  pub fn offset(self) -> usize {
    self.0.get()
  }

  pub(crate) fn header(self) -> usize {
    self.0.get() - WORD_SIZE
  }
}

/// Decoded view of one block, as found by an address-order walk.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Block {
  Free {
    offset: usize,
    tags: SizeAndTags,
    next: Option<usize>,
    prev: Option<usize>,
  },
  Used {
    offset: usize,
    tags: SizeAndTags,
  },
}

impl Block {
  /// Header offset.
  pub fn offset(&self) -> usize {
    match *self {
      Block::Free { offset, .. } | Block::Used { offset, .. } => offset,
    }
  }

  pub fn tags(&self) -> SizeAndTags {
    match *self {
      Block::Free { tags, .. } | Block::Used { tags, .. } => tags,
    }
  }

  pub fn size(&self) -> usize {
    self.tags().size()
  }

  pub fn is_free(&self) -> bool {
    matches!(self, Block::Free { .. })
  }

  /// Offset of the block that follows this one in memory.
  pub fn end(&self) -> usize {
    self.offset() + self.size()
  }
}

/// Block size needed to serve a request of `size` payload bytes.
pub const fn block_size_for(size: usize) -> usize {
  let size = size + WORD_SIZE;
  if size <= MIN_BLOCK_SIZE {
    MIN_BLOCK_SIZE
  } else {
    align!(size)
  }
}

pub(crate) const fn decode_link(word: usize) -> Option<usize> {
  if word == NIL { None } else { Some(word) }
}

pub(crate) const fn encode_link(link: Option<usize>) -> usize {
  match link {
    Some(offset) => offset,
    None => NIL,
  }
}

/// Word-level access to arena bytes, addressed by block header offsets.
///
/// Every access is bounds-checked by slice indexing.
pub(crate) trait Words {
  fn word(
    &self,
    offset: usize,
  ) -> usize;

  fn set_word(
    &mut self,
    offset: usize,
    value: usize,
  );

  fn tags(
    &self,
    block: usize,
  ) -> SizeAndTags {
    SizeAndTags::from_raw(self.word(block))
  }

  fn set_tags(
    &mut self,
    block: usize,
    tags: SizeAndTags,
  ) {
    self.set_word(block, tags.raw());
  }

  /// Writes `tags` to both the header and the footer of a free block.
  fn set_boundary_tags(
    &mut self,
    block: usize,
    tags: SizeAndTags,
  ) {
    self.set_word(block, tags.raw());
    self.set_word(block + tags.size() - WORD_SIZE, tags.raw());
  }

  fn next_free(
    &self,
    block: usize,
  ) -> Option<usize> {
    decode_link(self.word(block + WORD_SIZE))
  }

  fn set_next_free(
    &mut self,
    block: usize,
    next: Option<usize>,
  ) {
    self.set_word(block + WORD_SIZE, encode_link(next));
  }

  fn prev_free(
    &self,
    block: usize,
  ) -> Option<usize> {
    decode_link(self.word(block + 2 * WORD_SIZE))
  }

  fn set_prev_free(
    &mut self,
    block: usize,
    prev: Option<usize>,
  ) {
    self.set_word(block + 2 * WORD_SIZE, encode_link(prev));
  }

  /// Clears `PRECEDING_USED` on `block`, keeping its footer in sync if it is
  /// free. The sentinel is used and never gets a footer.
  fn mark_preceding_free(
    &mut self,
    block: usize,
  ) {
    let tags = self.tags(block).with_preceding_used(false);
    if tags.is_used() {
      self.set_tags(block, tags);
    } else {
      self.set_boundary_tags(block, tags);
    }
  }

  fn mark_preceding_used(
    &mut self,
    block: usize,
  ) {
    let tags = self.tags(block).with_preceding_used(true);
    if tags.is_used() {
      self.set_tags(block, tags);
    } else {
      self.set_boundary_tags(block, tags);
    }
  }
}

impl Words for [u8] {
  fn word(
    &self,
    offset: usize,
  ) -> usize {
    let mut bytes = [0; WORD_SIZE];
    bytes.copy_from_slice(&self[offset..offset + WORD_SIZE]);
    usize::from_ne_bytes(bytes)
  }

  fn set_word(
    &mut self,
    offset: usize,
    value: usize,
  ) {
    self[offset..offset + WORD_SIZE].copy_from_slice(&value.to_ne_bytes());
  }
}
