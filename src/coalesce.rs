use log::trace;

use crate::{
  block::{SizeAndTags, WORD_SIZE, Words},
  free_list::FreeList,
};

/// Merges the free block at `block`, already in `list`, with its free
/// neighbours in memory. Returns the header offset of the surviving block.
///
/// ```text
///   before:  [ used ][ free A ][ block ][ free B ][ used ]
///   after:   [ used ][          merged          ][ used ]
/// ```
///
/// Nothing is written when neither neighbour is free.
pub(crate) fn coalesce(
  mem: &mut [u8],
  list: &mut FreeList,
  block: usize,
) -> usize {
  let old_size = mem.tags(block).size();
  let mut new_size = old_size;

  let mut start = block;
  while !mem.tags(start).is_preceding_used() {
    // The footer of the preceding block is the word right before us.
    let size = SizeAndTags::from_raw(mem.word(start - WORD_SIZE)).size();
    start -= size;
    list.remove(mem, start);
    new_size += size;
  }

  let mut cursor = block + old_size;
  while !mem.tags(cursor).is_used() {
    let size = mem.tags(cursor).size();
    list.remove(mem, cursor);
    new_size += size;
    cursor += size;
  }

  if new_size != old_size {
    list.remove(mem, block);
    // Whatever precedes the merged block must be used, or it would be part of
    // it.
    mem.set_boundary_tags(start, SizeAndTags::new(new_size, false, true));
    list.insert(mem, start);

    trace!("coalesced {} into {}..{} ({} bytes)", block, start, start + new_size, new_size);
  }

  start
}
