use log::{debug, trace};

use crate::{
  align,
  arena::Arena,
  block::{MIN_BLOCK_SIZE, Ptr, SizeAndTags, WORD_SIZE, Words, block_size_for},
  coalesce::coalesce,
  error::AllocError,
  free_list::{self, FreeList},
};

/// Largest payload the heap will try to serve.
pub const MAX_REQUEST: usize = isize::MAX as usize - MIN_BLOCK_SIZE;

/// An explicit free-list allocator over an [`Arena`].
///
/// The heap owns its arena. Blocks are laid out back to back from the
/// arena's high bound at [`Heap::init`] time up to a sentinel word in the
/// last word of the arena.
pub struct Heap<A: Arena> {
  pub(crate) arena: A,
  pub(crate) base: usize,
  pub(crate) free_list: FreeList,
}

impl<A: Arena> Heap<A> {
  /// Claims space for one minimum-sized free block and the sentinel.
  pub fn init(mut arena: A) -> Result<Self, AllocError> {
    let (lo, hi) = arena.bounds();
    debug_assert_eq!(lo, 0, "arena offsets must start at 0");
    let padding = align!(hi) - hi;

    let start = arena
      .extend(padding + MIN_BLOCK_SIZE + WORD_SIZE)
      .map_err(AllocError::Init)?
      + padding;

    let mem = arena.as_mut_slice();
    mem.set_boundary_tags(start, SizeAndTags::new(MIN_BLOCK_SIZE, false, true));
    mem.set_tags(start + MIN_BLOCK_SIZE, SizeAndTags::new(0, true, false));

    let mut free_list = FreeList::new();
    free_list.insert(mem, start);

    debug!("heap initialized at {} with a {} byte free block", start, MIN_BLOCK_SIZE);

    Ok(Self {
      arena,
      base: start,
      free_list,
    })
  }

  /// Allocates a block with at least `size` payload bytes.
  ///
  /// Returns `Ok(None)` for `size == 0` without touching the heap. Grows the
  /// arena when no free block is large enough; if the arena cannot grow, the
  /// heap is left unchanged and [`AllocError::OutOfMemory`] is returned.
  pub fn alloc(
    &mut self,
    size: usize,
  ) -> Result<Option<Ptr>, AllocError> {
    if size == 0 {
      return Ok(None);
    }
    self.alloc_block(size).map(Some)
  }

  fn alloc_block(
    &mut self,
    size: usize,
  ) -> Result<Ptr, AllocError> {
    if size > MAX_REQUEST {
      return Err(AllocError::OutOfMemory {
        requested: size,
        source: None,
      });
    }

    let req = block_size_for(size);

    let block = match self.free_list.search(self.arena.as_slice(), req) {
      Some(block) => block,
      None => {
        self
          .request_more_space(req)
          .map_err(|source| AllocError::OutOfMemory {
            requested: size,
            source: Some(source),
          })?;

        // The new space covers `req` on its own, so one growth is enough.
        self
          .free_list
          .search(self.arena.as_slice(), req)
          .ok_or(AllocError::OutOfMemory {
            requested: size,
            source: None,
          })?
      }
    };

    self.place(block, req);

    let ptr = Ptr::from_header(block);
    trace!("alloc({}) -> {:?}, block {} bytes", size, ptr, self.block_size(block));
    Ok(ptr)
  }

  /// Turns the free block at `block` into a used block of `req` bytes,
  /// returning any surplus of at least `MIN_BLOCK_SIZE` to the free list.
  fn place(
    &mut self,
    block: usize,
    req: usize,
  ) {
    let mem = self.arena.as_mut_slice();
    let tags = mem.tags(block);
    let size = tags.size();

    self.free_list.remove(mem, block);

    if size - req >= MIN_BLOCK_SIZE {
      mem.set_tags(block, SizeAndTags::new(req, true, tags.is_preceding_used()));

      let rest = block + req;
      mem.set_boundary_tags(rest, SizeAndTags::new(size - req, false, true));
      self.free_list.insert(mem, rest);
    } else {
      mem.set_tags(block, tags.with_used(true));
      mem.mark_preceding_used(block + size);
    }
  }

  /// Releases the block behind `ptr` and merges it with free neighbours.
  ///
  /// `ptr` must come from this heap and must not have been freed already.
  /// This is not checked: a bad pointer corrupts the heap's bookkeeping (and
  /// may panic on an out-of-range offset) but never touches memory outside
  /// the arena.
  pub fn free(
    &mut self,
    ptr: Ptr,
  ) {
    let block = ptr.header();
    let mem = self.arena.as_mut_slice();

    let tags = mem.tags(block).with_used(false);
    mem.set_boundary_tags(block, tags);
    mem.mark_preceding_free(block + tags.size());

    self.free_list.insert(mem, block);
    coalesce(mem, &mut self.free_list, block);

    trace!("free({:?}), block {} bytes", ptr, tags.size());
  }

  /// Resizes the allocation behind `ptr` to at least `size` payload bytes.
  ///
  /// `None` behaves as [`alloc`](Self::alloc), `size == 0` as
  /// [`free`](Self::free) and returns `Ok(None)`. The returned pointer may
  /// differ from `ptr`; payload bytes up to the smaller of the two sizes are
  /// kept. On error the original allocation is still valid and unchanged.
  ///
  /// The same preconditions as for `free` apply to `ptr`.
  pub fn realloc(
    &mut self,
    ptr: Option<Ptr>,
    size: usize,
  ) -> Result<Option<Ptr>, AllocError> {
    let Some(ptr) = ptr else {
      return self.alloc(size);
    };
    if size == 0 {
      self.free(ptr);
      return Ok(None);
    }
    if size > MAX_REQUEST {
      return Err(AllocError::OutOfMemory {
        requested: size,
        source: None,
      });
    }

    let block = ptr.header();
    let req = block_size_for(size);
    let current = self.block_size(block);

    if req == current {
      return Ok(Some(ptr));
    }

    if req < current {
      self.shrink_in_place(block, req);
      return Ok(Some(ptr));
    }

    if self.grow_in_place(block, req) {
      trace!("realloc({:?}, {}) grew in place", ptr, size);
      return Ok(Some(ptr));
    }

    let new = self.alloc_block(size)?;
    let len = current - WORD_SIZE;
    self
      .arena
      .as_mut_slice()
      .copy_within(ptr.offset()..ptr.offset() + len, new.offset());
    self.free(ptr);

    trace!("realloc({:?}, {}) moved to {:?}", ptr, size, new);
    Ok(Some(new))
  }

  /// Absorbs the following block if it is free and large enough to bring
  /// `block` up to `req` bytes.
  fn grow_in_place(
    &mut self,
    block: usize,
    req: usize,
  ) -> bool {
    let mem = self.arena.as_mut_slice();
    let tags = mem.tags(block);
    let current = tags.size();
    let next = block + current;
    let next_tags = mem.tags(next);
    let extra = req - current;

    if next_tags.is_used() || next_tags.size() < extra {
      return false;
    }

    self.free_list.remove(mem, next);

    let rest_size = next_tags.size() - extra;
    if rest_size >= MIN_BLOCK_SIZE {
      mem.set_tags(block, tags.with_size(req));

      let rest = block + req;
      mem.set_boundary_tags(rest, SizeAndTags::new(rest_size, false, true));
      self.free_list.insert(mem, rest);
    } else {
      let merged = current + next_tags.size();
      mem.set_tags(block, tags.with_size(merged));
      mem.mark_preceding_used(block + merged);
    }

    true
  }

  /// Splits the tail off `block` when it leaves at least `MIN_BLOCK_SIZE`
  /// bytes. A smaller tail stays part of the block.
  fn shrink_in_place(
    &mut self,
    block: usize,
    req: usize,
  ) {
    let mem = self.arena.as_mut_slice();
    let tags = mem.tags(block);
    let rest_size = tags.size() - req;

    if rest_size < MIN_BLOCK_SIZE {
      return;
    }

    mem.set_tags(block, tags.with_size(req));

    let rest = block + req;
    mem.set_boundary_tags(rest, SizeAndTags::new(rest_size, false, true));
    mem.mark_preceding_free(rest + rest_size);

    self.free_list.insert(mem, rest);
    coalesce(mem, &mut self.free_list, rest);

    trace!("shrunk block {} to {} bytes", block, req);
  }

  /// Payload bytes available behind `ptr`; at least what was requested.
  pub fn usable_size(
    &self,
    ptr: Ptr,
  ) -> usize {
    self.block_size(ptr.header()) - WORD_SIZE
  }

  pub fn payload(
    &self,
    ptr: Ptr,
  ) -> &[u8] {
    let len = self.usable_size(ptr);
    &self.arena.as_slice()[ptr.offset()..ptr.offset() + len]
  }

  pub fn payload_mut(
    &mut self,
    ptr: Ptr,
  ) -> &mut [u8] {
    let len = self.usable_size(ptr);
    &mut self.arena.as_mut_slice()[ptr.offset()..ptr.offset() + len]
  }

  /// Raw address of the payload. Valid until the arena moves or the block is
  /// freed; [`MmapArena`](crate::MmapArena) never moves.
  pub fn as_mut_ptr(
    &mut self,
    ptr: Ptr,
  ) -> *mut u8 {
    self.payload_mut(ptr).as_mut_ptr()
  }

  pub fn arena(&self) -> &A {
    &self.arena
  }

  pub fn into_arena(self) -> A {
    self.arena
  }

  /// Header offsets of the free blocks, in list order.
  pub fn free_list(&self) -> free_list::Iter<'_> {
    self.free_list.iter(self.arena.as_slice())
  }

  pub(crate) fn block_size(
    &self,
    block: usize,
  ) -> usize {
    self.arena.as_slice().tags(block).size()
  }

  /// Offset of the sentinel word.
  pub(crate) fn sentinel(&self) -> usize {
    self.arena.bounds().1 - WORD_SIZE
  }
}
