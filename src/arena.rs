//! Backing memory for a [`Heap`](crate::Heap).
//!
//! An arena is a contiguous region that only ever grows at its high end, the
//! same way `sbrk(2)` moves the program break. The heap addresses it through
//! byte offsets from the start of the region.

use std::{mem, slice};

use log::debug;

use crate::error::ArenaError;

/// Default growth granularity for [`VecArena`].
pub const DEFAULT_PAGE_SIZE: usize = 4096;

/// A contiguous, growable memory region.
pub trait Arena {
  /// Grows the region by exactly `bytes` and returns the offset of the first
  /// new byte (the previous high bound).
  fn extend(
    &mut self,
    bytes: usize,
  ) -> Result<usize, ArenaError>;

  /// Current `[low, high)` bounds, as offsets.
  ///
  /// `low` must be 0: the heap indexes [`as_slice`](Self::as_slice) with
  /// these offsets directly.
  fn bounds(&self) -> (usize, usize);

  /// Granularity used to round growth requests.
  fn page_size(&self) -> usize;

  /// The whole `[low, high)` region.
  fn as_slice(&self) -> &[u8];

  fn as_mut_slice(&mut self) -> &mut [u8];
}

/// Arena backed by a heap-allocated buffer with a fixed upper limit.
///
/// Storage is kept in `u64` units so that offset alignment and address
/// alignment agree. The buffer may move when it grows, so raw pointers into
/// it are only valid until the next [`Arena::extend`].
pub struct VecArena {
  words: Vec<u64>,
  len: usize,
  limit: usize,
  page_size: usize,
}

impl VecArena {
  pub fn new(limit: usize) -> Self {
    Self::with_page_size(limit, DEFAULT_PAGE_SIZE)
  }

  /// `page_size` must be a power of two no smaller than the block alignment.
  pub fn with_page_size(
    limit: usize,
    page_size: usize,
  ) -> Self {
    debug_assert!(page_size.is_power_of_two());
    Self {
      words: Vec::new(),
      len: 0,
      limit,
      page_size,
    }
  }

  pub fn limit(&self) -> usize {
    self.limit
  }
}

impl Arena for VecArena {
  fn extend(
    &mut self,
    bytes: usize,
  ) -> Result<usize, ArenaError> {
    let old = self.len;
    let new = old
      .checked_add(bytes)
      .filter(|&new| new <= self.limit)
      .ok_or_else(|| ArenaError::Exhausted {
        requested: bytes,
        available: self.limit - old,
      })?;

    let unit = mem::size_of::<u64>();
    self.words.resize(new.div_ceil(unit), 0);
    self.len = new;

    debug!("vec arena: {} -> {} bytes", old, new);
    Ok(old)
  }

  fn bounds(&self) -> (usize, usize) {
    (0, self.len)
  }

  fn page_size(&self) -> usize {
    self.page_size
  }

  fn as_slice(&self) -> &[u8] {
    // SAFETY: `words` holds at least `len` initialized bytes and `u8` has no
    // alignment requirement.
    unsafe { slice::from_raw_parts(self.words.as_ptr() as *const u8, self.len) }
  }

  fn as_mut_slice(&mut self) -> &mut [u8] {
    // SAFETY: as above; the borrow of `self` makes the slice unique.
    unsafe { slice::from_raw_parts_mut(self.words.as_mut_ptr() as *mut u8, self.len) }
  }
}

#[cfg(unix)]
pub use self::mmap::MmapArena;

#[cfg(unix)]
mod mmap {
  use std::{io, ptr, slice};

  use libc::{
    MAP_ANONYMOUS, MAP_FAILED, MAP_NORESERVE, MAP_PRIVATE, PROT_READ, PROT_WRITE, _SC_PAGESIZE, c_void,
    mmap, munmap, sysconf,
  };
  use log::debug;

  use super::Arena;
  use crate::{align_to, error::ArenaError};

  /// Arena over a reserved range of anonymous virtual memory.
  ///
  /// The whole range is mapped up front with `MAP_NORESERVE`, so pages are
  /// only committed once touched. A break offset inside the range plays the
  /// role of the program break. Addresses never move.
  pub struct MmapArena {
    base: *mut u8,
    reserved: usize,
    brk: usize,
    page_size: usize,
  }

  impl MmapArena {
    /// Reserves at least `limit` bytes (rounded up to whole pages).
    pub fn reserve(limit: usize) -> Result<Self, ArenaError> {
      // SAFETY: `sysconf` only reads a configuration value.
      let page_size = match unsafe { sysconf(_SC_PAGESIZE) } {
        size if size > 0 => size as usize,
        _ => return Err(ArenaError::Map(io::Error::last_os_error())),
      };

      let largest = !(page_size - 1);
      if limit > largest {
        return Err(ArenaError::Exhausted {
          requested: limit,
          available: largest,
        });
      }
      let reserved = align_to!(limit.max(1), page_size);

      // SAFETY: an anonymous private mapping at a kernel-chosen address
      // aliases no existing memory.
      let base = unsafe {
        mmap(
          ptr::null_mut(),
          reserved,
          PROT_READ | PROT_WRITE,
          MAP_PRIVATE | MAP_ANONYMOUS | MAP_NORESERVE,
          -1,
          0,
        )
      };

      if base == MAP_FAILED {
        return Err(ArenaError::Map(io::Error::last_os_error()));
      }

      debug!("mmap arena: reserved {} bytes at {:?}", reserved, base);

      Ok(Self {
        base: base as *mut u8,
        reserved,
        brk: 0,
        page_size,
      })
    }

    /// Address of offset zero.
    pub fn base(&self) -> *mut u8 {
      self.base
    }

    pub fn reserved(&self) -> usize {
      self.reserved
    }
  }

  impl Arena for MmapArena {
    fn extend(
      &mut self,
      bytes: usize,
    ) -> Result<usize, ArenaError> {
      let old = self.brk;
      let new = old
        .checked_add(bytes)
        .filter(|&new| new <= self.reserved)
        .ok_or_else(|| ArenaError::Exhausted {
          requested: bytes,
          available: self.reserved - old,
        })?;

      self.brk = new;
      debug!("mmap arena: break {} -> {} of {} bytes", old, new, self.reserved);
      Ok(old)
    }

    fn bounds(&self) -> (usize, usize) {
      (0, self.brk)
    }

    fn page_size(&self) -> usize {
      self.page_size
    }

    fn as_slice(&self) -> &[u8] {
      // SAFETY: `[base, base + brk)` lies inside the live mapping, which is
      // zero-filled on first touch.
      unsafe { slice::from_raw_parts(self.base, self.brk) }
    }

    fn as_mut_slice(&mut self) -> &mut [u8] {
      // SAFETY: as above; the mapping is private to this value.
      unsafe { slice::from_raw_parts_mut(self.base, self.brk) }
    }
  }

  impl Drop for MmapArena {
    fn drop(&mut self) {
      // SAFETY: `base` and `reserved` describe the mapping made in
      // `reserve`, and no slice into it outlives `self`.
      unsafe {
        munmap(self.base as *mut c_void, self.reserved);
      }
    }
  }
}
