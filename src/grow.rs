use log::debug;

use crate::{
  align_to,
  arena::Arena,
  block::{SizeAndTags, WORD_SIZE, Words},
  coalesce::coalesce,
  error::ArenaError,
  heap::Heap,
};

impl<A: Arena> Heap<A> {
  /// Grows the arena by at least `min_bytes`, rounded up to whole pages, and
  /// adds the new space to the free list as a single block.
  ///
  /// The old sentinel word becomes the header of the new block, which takes
  /// over its `PRECEDING_USED` bit, so a free block that ended at the old
  /// boundary is merged with the new space. A fresh sentinel is written at
  /// the new end.
  ///
  /// On error nothing has been written.
  pub(crate) fn request_more_space(
    &mut self,
    min_bytes: usize,
  ) -> Result<(), ArenaError> {
    let page_size = self.arena.page_size();
    let total = align_to!(min_bytes, page_size);

    let start = self.arena.extend(total)?;
    let block = start - WORD_SIZE;

    let mem = self.arena.as_mut_slice();
    let preceding_used = mem.tags(block).is_preceding_used();
    mem.set_boundary_tags(block, SizeAndTags::new(total, false, preceding_used));
    mem.set_tags(block + total, SizeAndTags::new(0, true, false));

    self.free_list.insert(mem, block);
    let merged = coalesce(mem, &mut self.free_list, block);

    debug!(
      "grew heap by {} bytes at {}; free block {} is now {} bytes",
      total,
      block,
      merged,
      mem.tags(merged).size()
    );
    Ok(())
  }
}
