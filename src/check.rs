//! Address-order heap walks: block views, statistics, dumps and the
//! consistency checker.

use std::{collections::BTreeSet, fmt};

use log::trace;

use crate::{
  arena::Arena,
  block::{Block, MIN_BLOCK_SIZE, WORD_SIZE, Words},
  error::Violation,
  heap::Heap,
};

/// Blocks in address order, from the heap base up to the sentinel.
///
/// The walk stops early at a block whose size would not advance it or would
/// run past the sentinel; [`Heap::check`] reports those.
pub struct Blocks<'a> {
  mem: &'a [u8],
  cursor: usize,
  sentinel: usize,
}

impl Iterator for Blocks<'_> {
  type Item = Block;

  fn next(&mut self) -> Option<Block> {
    if self.cursor >= self.sentinel {
      return None;
    }

    let offset = self.cursor;
    let tags = self.mem.tags(offset);
    let size = tags.size();
    if size < MIN_BLOCK_SIZE || offset + size > self.sentinel {
      self.cursor = self.sentinel;
      return None;
    }
    self.cursor += size;

    Some(if tags.is_used() {
      Block::Used { offset, tags }
    } else {
      Block::Free {
        offset,
        tags,
        next: self.mem.next_free(offset),
        prev: self.mem.prev_free(offset),
      }
    })
  }
}

/// Totals gathered from one address-order walk.
#[derive(Clone, Copy, PartialEq, Eq, Debug, Default)]
pub struct HeapStats {
  pub used_blocks: usize,
  pub free_blocks: usize,
  /// Bytes in used blocks, headers included.
  pub used_bytes: usize,
  /// Bytes in free blocks, headers and footers included.
  pub free_bytes: usize,
  pub largest_free: usize,
  /// Bytes from the heap base to the end of the arena, sentinel included.
  pub heap_bytes: usize,
}

impl<A: Arena> Heap<A> {
  pub fn blocks(&self) -> Blocks<'_> {
    Blocks {
      mem: self.arena.as_slice(),
      cursor: self.base,
      sentinel: self.sentinel(),
    }
  }

  pub fn stats(&self) -> HeapStats {
    let mut stats = HeapStats {
      heap_bytes: self.arena.bounds().1 - self.base,
      ..HeapStats::default()
    };

    for block in self.blocks() {
      if block.is_free() {
        stats.free_blocks += 1;
        stats.free_bytes += block.size();
        stats.largest_free = stats.largest_free.max(block.size());
      } else {
        stats.used_blocks += 1;
        stats.used_bytes += block.size();
      }
    }

    stats
  }

  /// Walks the heap and the free list and reports every inconsistency found.
  pub fn check(&self) -> Result<(), Vec<Violation>> {
    let mem = self.arena.as_slice();
    let sentinel = self.sentinel();
    let mut violations = Vec::new();
    let mut free = BTreeSet::new();

    let mut offset = self.base;
    // (header offset, used) of the block before `offset`.
    let mut preceding: Option<(usize, bool)> = None;
    let mut complete = true;

    while offset < sentinel {
      let tags = mem.tags(offset);
      let size = tags.size();

      if size < MIN_BLOCK_SIZE {
        violations.push(Violation::BadSize { offset, size });
        complete = false;
        break;
      }
      if offset + size > sentinel {
        violations.push(Violation::OutOfBounds {
          offset,
          size,
          end: sentinel,
        });
        complete = false;
        break;
      }

      let actual = preceding.map_or(true, |(_, used)| used);
      if tags.is_preceding_used() != actual {
        violations.push(Violation::PrecedingTag {
          offset,
          tagged: tags.is_preceding_used(),
          actual,
        });
      }

      if !tags.is_used() {
        let footer = mem.word(offset + size - WORD_SIZE);
        if footer != tags.raw() {
          violations.push(Violation::FooterMismatch {
            offset,
            header: tags.raw(),
            footer,
          });
        }
        if let Some((first, false)) = preceding {
          violations.push(Violation::AdjacentFree {
            first,
            second: offset,
          });
        }
        free.insert(offset);
      }

      preceding = Some((offset, tags.is_used()));
      offset += size;
    }

    if complete {
      let tags = mem.tags(sentinel);
      if !tags.is_used() {
        violations.push(Violation::SentinelNotUsed { offset: sentinel });
      }
      let actual = preceding.map_or(true, |(_, used)| used);
      if tags.is_preceding_used() != actual {
        violations.push(Violation::PrecedingTag {
          offset: sentinel,
          tagged: tags.is_preceding_used(),
          actual,
        });
      }
    }

    let mut listed = BTreeSet::new();
    let mut expected_prev = None;
    let mut cursor = self.free_list.head();
    while let Some(block) = cursor {
      // Links of anything but a known free block cannot be trusted.
      if !free.contains(&block) {
        violations.push(Violation::ListNotFree { offset: block });
        break;
      }
      if !listed.insert(block) {
        violations.push(Violation::ListCycle { offset: block });
        break;
      }

      let prev = mem.prev_free(block);
      if prev != expected_prev {
        violations.push(Violation::BrokenBackLink {
          offset: block,
          expected: expected_prev,
          found: prev,
        });
      }

      expected_prev = Some(block);
      cursor = mem.next_free(block);
    }

    for &block in free.difference(&listed) {
      violations.push(Violation::NotInList { offset: block });
    }

    if violations.is_empty() {
      Ok(())
    } else {
      Err(violations)
    }
  }

  /// Printable listing of the free-list head and every block.
  pub fn dump(&self) -> HeapDump<'_, A> {
    HeapDump { heap: self }
  }

  /// Emits [`dump`](Self::dump) at trace level.
  pub fn log_heap(&self) {
    trace!("{}", self.dump());
  }
}

pub struct HeapDump<'a, A: Arena> {
  heap: &'a Heap<A>,
}

impl<A: Arena> fmt::Display for HeapDump<'_, A> {
  fn fmt(
    &self,
    f: &mut fmt::Formatter<'_>,
  ) -> fmt::Result {
    writeln!(f, "free list head: {:?}", self.heap.free_list.head())?;

    for block in self.heap.blocks() {
      let tags = block.tags();
      write!(
        f,
        "{:>10}: {:>8} P{} U{}\t",
        block.offset(),
        tags.size(),
        tags.is_preceding_used() as u8,
        tags.is_used() as u8
      )?;

      match block {
        Block::Used { .. } => writeln!(f, "ALLOCATED")?,
        Block::Free { next, prev, .. } => writeln!(f, "FREE\tnext: {:?}, prev: {:?}", next, prev)?,
      }
    }

    let sentinel = self.heap.sentinel();
    writeln!(
      f,
      "{:>10}: sentinel {:?}",
      sentinel,
      self.heap.arena.as_slice().tags(sentinel)
    )
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::{
    arena::VecArena,
    block::{Ptr, SizeAndTags},
  };

  fn heap() -> Heap<VecArena> {
    let _ = env_logger::builder().is_test(true).try_init();
    Heap::init(VecArena::new(1 << 20)).unwrap()
  }

  /// used, free, used, free tail.
  fn mixed() -> (Heap<VecArena>, [Ptr; 3]) {
    let mut heap = heap();
    let a = heap.alloc(24).unwrap().unwrap();
    let b = heap.alloc(24).unwrap().unwrap();
    let c = heap.alloc(24).unwrap().unwrap();
    heap.free(b);
    (heap, [a, b, c])
  }

  fn write_word(
    heap: &mut Heap<VecArena>,
    offset: usize,
    value: usize,
  ) {
    heap.arena.as_mut_slice().set_word(offset, value);
  }

  #[test]
  fn test_clean_heap_passes() {
    let (heap, _) = mixed();

    heap.check().unwrap();
    heap.log_heap();
  }

  #[test]
  fn test_blocks_cover_heap() {
    let (heap, [a, b, c]) = mixed();

    let blocks: Vec<Block> = heap.blocks().collect();

    assert_eq!(blocks.len(), 4);
    assert_eq!(blocks[0].offset(), a.header());
    assert_eq!(blocks[1].offset(), b.header());
    assert_eq!(blocks[2].offset(), c.header());
    assert_eq!(
      blocks.iter().map(Block::is_free).collect::<Vec<_>>(),
      vec![false, true, false, true]
    );
    for pair in blocks.windows(2) {
      assert_eq!(pair[0].end(), pair[1].offset());
    }
    assert_eq!(blocks[3].end(), heap.sentinel());
  }

  #[test]
  fn test_stats() {
    let (heap, _) = mixed();

    let stats = heap.stats();

    assert_eq!(stats.used_blocks, 2);
    assert_eq!(stats.free_blocks, 2);
    assert_eq!(stats.used_bytes + stats.free_bytes + WORD_SIZE, stats.heap_bytes);
    assert!(stats.largest_free > MIN_BLOCK_SIZE);
  }

  #[test]
  fn test_detects_footer_mismatch() {
    let (mut heap, [_, b, _]) = mixed();
    let block = b.header();
    let size = heap.block_size(block);
    write_word(&mut heap, block + size - WORD_SIZE, 0);

    let violations = heap.check().unwrap_err();

    assert!(violations.contains(&Violation::FooterMismatch {
      offset: block,
      header: SizeAndTags::new(size, false, true).raw(),
      footer: 0,
    }));
  }

  #[test]
  fn test_detects_preceding_tag_desync() {
    let (mut heap, [_, _, c]) = mixed();
    let tags = heap.arena.as_slice().tags(c.header());
    write_word(&mut heap, c.header(), tags.with_preceding_used(true).raw());

    let violations = heap.check().unwrap_err();

    assert_eq!(violations, vec![Violation::PrecedingTag {
      offset: c.header(),
      tagged: true,
      actual: false,
    }]);
  }

  #[test]
  fn test_detects_adjacent_free_and_missing_list_entry() {
    let (mut heap, [_, b, c]) = mixed();
    // Mark `c` free behind the allocator's back.
    let size = heap.block_size(c.header());
    let tags = SizeAndTags::new(size, false, false);
    heap.arena.as_mut_slice().set_boundary_tags(c.header(), tags);

    let violations = heap.check().unwrap_err();

    assert!(violations.contains(&Violation::AdjacentFree {
      first: b.header(),
      second: c.header(),
    }));
    assert!(violations.contains(&Violation::NotInList { offset: c.header() }));
  }

  #[test]
  fn test_detects_list_entry_that_is_not_free() {
    let (mut heap, [a, ..]) = mixed();
    heap.free_list.insert(heap.arena.as_mut_slice(), a.header());

    let violations = heap.check().unwrap_err();

    assert_eq!(violations[0], Violation::ListNotFree { offset: a.header() });
  }

  #[test]
  fn test_detects_list_cycle() {
    let (mut heap, _) = mixed();
    let head = heap.free_list.head().unwrap();
    heap.arena.as_mut_slice().set_next_free(head, Some(head));

    let violations = heap.check().unwrap_err();

    assert!(violations.contains(&Violation::ListCycle { offset: head }));
  }

  #[test]
  fn test_detects_broken_back_link() {
    let (mut heap, _) = mixed();
    let head = heap.free_list.head().unwrap();
    let second = heap.free_list().nth(1).unwrap();
    heap.arena.as_mut_slice().set_prev_free(second, None);

    let violations = heap.check().unwrap_err();

    assert_eq!(violations, vec![Violation::BrokenBackLink {
      offset: second,
      expected: Some(head),
      found: None,
    }]);
  }

  #[test]
  fn test_detects_bad_size() {
    let (mut heap, [_, b, _]) = mixed();
    write_word(&mut heap, b.header(), 0);

    let violations = heap.check().unwrap_err();

    assert!(violations.contains(&Violation::BadSize {
      offset: b.header(),
      size: 0,
    }));
    assert_eq!(heap.blocks().count(), 1);
  }

  #[test]
  fn test_detects_block_running_past_end() {
    let (mut heap, [_, _, c]) = mixed();
    let sentinel = heap.sentinel();
    let size = sentinel - c.header() + MIN_BLOCK_SIZE;
    write_word(&mut heap, c.header(), SizeAndTags::new(size, true, false).raw());

    let violations = heap.check().unwrap_err();

    assert_eq!(violations[0], Violation::OutOfBounds {
      offset: c.header(),
      size,
      end: sentinel,
    });
    // The walk stopped short, so the sentinel was never judged.
    assert!(!violations.iter().any(|v| matches!(
      v,
      Violation::SentinelNotUsed { .. } | Violation::PrecedingTag { .. }
    )));
    assert_eq!(heap.blocks().count(), 2);
  }

  #[test]
  fn test_detects_sentinel_not_used() {
    let (mut heap, _) = mixed();
    let sentinel = heap.sentinel();
    write_word(&mut heap, sentinel, 0);

    let violations = heap.check().unwrap_err();

    assert!(violations.contains(&Violation::SentinelNotUsed { offset: sentinel }));
  }

  #[test]
  fn test_dump_lists_every_block() {
    let (heap, _) = mixed();

    let dump = heap.dump().to_string();

    assert!(dump.starts_with("free list head: Some("));
    assert_eq!(dump.matches("ALLOCATED").count(), 2);
    assert_eq!(dump.matches("FREE\t").count(), 2);
    assert!(dump.contains("sentinel"));
  }
}
