use alloc::{
  alloc::{
    Allocator,
    Layout,
  },
  vec,
};
use core::ptr::NonNull;

use getset::{
  CopyGetters,
  Setters,
};
use tracing::warn;

use super::slot::{
  LinkWidth,
  SlotLayout,
  round_up,
};
use crate::{
  bitmap::Bitmap,
  config::Safety,
  error::{
    PoolError,
    PoolResult,
  },
};

/// One block of slots taken from the backing allocator.
///
/// The header lives in its own backing allocation so the slot storage stays
/// exactly `(capacity + padding) * stride` bytes. Chunks form two chains:
/// `prev` links every chunk for teardown, `free_prev`/`free_next` link the
/// chunks whose free list is non-empty.
#[derive(Debug, CopyGetters, Setters)]
pub(crate) struct Chunk {
  raw: NonNull<u8>,
  raw_layout: Layout,
  #[getset(get_copy = "pub(crate)")]
  base: NonNull<u8>,
  stride: usize,
  #[getset(get_copy = "pub(crate)")]
  capacity: usize,
  /// Slots handed out by bumping so far.
  #[getset(get_copy = "pub(crate)")]
  len: usize,
  link: LinkWidth,
  free_head: usize,
  #[getset(get_copy = "pub(crate)")]
  free_len: usize,
  /// Set bits mark free slots. Only kept when safety checks are on.
  free_map: Option<Bitmap>,
  #[getset(get_copy = "pub(crate)")]
  prev: Option<NonNull<Chunk>>,
  #[getset(get_copy = "pub(crate)", set = "pub(crate)")]
  free_prev: Option<NonNull<Chunk>>,
  #[getset(get_copy = "pub(crate)", set = "pub(crate)")]
  free_next: Option<NonNull<Chunk>>,
}

impl Chunk {
  /// Acquires storage for `capacity` slots and a header linking back to
  /// `prev`. Nothing stays allocated when this fails.
  pub(crate) fn try_new_in<A: Allocator>(
    allocator: &A,
    layout: &SlotLayout,
    capacity: usize,
    safety: Safety,
    prev: Option<NonNull<Chunk>>,
  ) -> PoolResult<NonNull<Chunk>> {
    let overflow = PoolError::SizeOverflow { count: capacity };
    let slots = capacity.checked_add(layout.padding()).ok_or(overflow)?;
    let bytes = slots.checked_mul(layout.stride()).ok_or(overflow)?;
    let raw_layout =
      Layout::from_size_align(bytes, layout.request_align()).map_err(|_| overflow)?;
    let failure = PoolError::BackingAllocationFailure { slots, bytes };

    let raw = allocator
      .allocate(raw_layout)
      .map_err(|_| failure)?
      .cast::<u8>();

    let free_map = match safety {
      Safety::Enabled => match Bitmap::try_new_in(allocator, capacity) {
        Ok(map) => Some(map),
        Err(_) => {
          // SAFETY: raw was just allocated with raw_layout
          unsafe { allocator.deallocate(raw, raw_layout) };
          return Err(failure);
        }
      },
      Safety::Disabled => None,
    };

    let header = match allocator.allocate(Layout::new::<Chunk>()) {
      Ok(header) => header.cast::<Chunk>(),
      Err(_) => {
        // SAFETY: both pieces were just allocated from allocator
        unsafe {
          if let Some(map) = free_map {
            map.release(allocator);
          }
          allocator.deallocate(raw, raw_layout);
        }
        return Err(failure);
      }
    };

    let link = LinkWidth::narrowest(capacity);
    // SAFETY: header is valid for writes of one Chunk
    unsafe {
      header.write(Chunk {
        raw,
        raw_layout,
        base: round_up(raw, layout.alignment()),
        stride: layout.stride(),
        capacity,
        len: 0,
        link,
        free_head: link.sentinel(),
        free_len: 0,
        free_map,
        prev,
        free_prev: None,
        free_next: None,
      });
    }
    Ok(header)
  }

  fn addr_of(&self, index: usize) -> usize {
    (self.base.as_ptr() as usize).wrapping_add(index.wrapping_mul(self.stride))
  }

  pub(crate) fn contains(&self, addr: usize) -> bool {
    let start = self.base.as_ptr() as usize;
    addr >= start && addr < start + self.capacity * self.stride
  }

  /// Slot index of `addr` and its distance past that slot's start.
  pub(crate) fn offset_of(&self, addr: usize) -> (usize, usize) {
    let offset = addr - self.base.as_ptr() as usize;
    (offset / self.stride, offset % self.stride)
  }

  pub(crate) fn slot(&self, index: usize) -> NonNull<u8> {
    debug_assert!(index <= self.capacity);
    // SAFETY: index <= capacity keeps the pointer within or one past the storage
    unsafe { self.base.add(index * self.stride) }
  }

  /// Next never-used slot, one past the end once the chunk is exhausted.
  pub(crate) fn cursor(&self) -> NonNull<u8> {
    self.slot(self.len)
  }

  pub(crate) fn bump(&mut self, slots: usize) -> Option<NonNull<u8>> {
    if self.capacity - self.len < slots {
      return None;
    }
    let slot = self.cursor();
    self.len += slots;
    Some(slot)
  }

  /// `None` when the chunk keeps no free map.
  pub(crate) fn is_free(&self, index: usize) -> Option<bool> {
    self.free_map.as_ref().and_then(|map| map.get(index).ok())
  }

  /// Threads slot `index` onto the free list.
  ///
  /// # Safety
  /// `index` must be below `capacity` and the slot must hold no live value
  /// the caller still needs.
  pub(crate) unsafe fn push_free(&mut self, index: usize) {
    debug_assert!(index < self.capacity);
    // SAFETY: slot is inside the storage and stride >= link.size()
    unsafe { self.link.write(self.slot(index), self.free_head) };
    self.free_head = index;
    self.free_len += 1;
    if let Some(map) = self.free_map.as_mut() {
      let _ = map.set(index);
    }
  }

  /// Takes the most recently freed slot.
  ///
  /// # Safety
  /// Every slot on the free list must still hold the link written by
  /// [`Chunk::push_free`].
  pub(crate) unsafe fn pop_free(&mut self) -> Option<NonNull<u8>> {
    if self.free_len == 0 {
      return None;
    }
    let index = self.free_head;
    if index >= self.len {
      warn!(
        index,
        len = self.len,
        "pool free list points past the bumped slots, dropping it"
      );
      self.forget_free_list();
      return None;
    }

    let slot = self.slot(index);
    // SAFETY: the slot is on the free list, so it holds a link
    let next = unsafe { self.link.read(slot) };
    self.free_len -= 1;
    self.free_head = if self.free_len == 0 {
      self.link.sentinel()
    } else {
      next
    };
    if let Some(map) = self.free_map.as_mut() {
      let _ = map.clear(index);
    }
    Some(slot)
  }

  fn forget_free_list(&mut self) {
    let mut index = self.free_head;
    for _ in 0..self.free_len {
      if index >= self.len {
        break;
      }
      if let Some(map) = self.free_map.as_mut() {
        let _ = map.clear(index);
      }
      // SAFETY: index < len, the slot lies in bumped storage
      index = unsafe { self.link.read(self.slot(index)) };
    }
    self.free_head = self.link.sentinel();
    self.free_len = 0;
  }

  /// Walks the free list, bounded by its recorded length.
  pub(crate) fn check_free_list(&self) -> PoolResult<()> {
    let mut seen = vec![false; self.len];
    let mut index = self.free_head;
    for _ in 0..self.free_len {
      let corrupt = PoolError::CorruptFreeList {
        addr: self.addr_of(index),
      };
      if index >= self.len || seen[index] || self.is_free(index) == Some(false) {
        return Err(corrupt);
      }
      seen[index] = true;
      // SAFETY: index < len, the slot lies in bumped storage
      index = unsafe { self.link.read(self.slot(index)) };
    }
    if index != self.link.sentinel() {
      return Err(PoolError::CorruptFreeList {
        addr: self.addr_of(index),
      });
    }
    if let Some(map) = self.free_map.as_ref() {
      if map.len() != self.capacity || map.count_ones() != self.free_len {
        return Err(PoolError::CorruptFreeList {
          addr: self.base.as_ptr() as usize,
        });
      }
    }
    Ok(())
  }

  /// Returns the chunk's storage, free map and header to `allocator` and
  /// hands back the previous chunk of the chain.
  ///
  /// # Safety
  /// `this` must come from [`Chunk::try_new_in`] with the same allocator and
  /// must not be used afterwards.
  pub(crate) unsafe fn release<A: Allocator>(
    this: NonNull<Chunk>,
    allocator: &A,
  ) -> Option<NonNull<Chunk>> {
    // SAFETY: this points to an initialised header that is about to be freed
    let chunk = unsafe { this.read() };
    // SAFETY: every piece was allocated by allocator with the recorded layout
    unsafe {
      if let Some(map) = chunk.free_map {
        map.release(allocator);
      }
      allocator.deallocate(chunk.raw, chunk.raw_layout);
      allocator.deallocate(this.cast(), Layout::new::<Chunk>());
    }
    chunk.prev
  }
}
