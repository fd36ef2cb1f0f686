//! Slot geometry: free-link encoding, stride, alignment and padding.
//!
//! A free slot stores the index of the next free slot of the same chunk in
//! its first `LinkWidth::size()` bytes. A live slot holds a `T`. Nothing else
//! tells the two apart, so only the free list may read links and only slots
//! off the free list are handed out as `T`.

use core::{
  mem,
  ptr::NonNull,
};

use getset::CopyGetters;

use crate::{
  config::{
    AllocationType,
    PoolConfig,
  },
  error::{
    PoolError,
    PoolResult,
  },
};

/// Integer type a free slot uses to point at the next free slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum LinkWidth {
  U8,
  U16,
  U32,
  Usize,
}

impl LinkWidth {
  const ALL: [LinkWidth; 4] = [LinkWidth::U8, LinkWidth::U16, LinkWidth::U32, LinkWidth::Usize];

  /// Narrowest width able to index `slots` slots and still spare a sentinel.
  pub fn narrowest(slots: usize) -> Self {
    Self::ALL
      .into_iter()
      .find(|width| slots <= width.max_slots())
      .unwrap_or(LinkWidth::Usize)
  }

  /// Widest width whose encoding fits in `bytes` bytes.
  pub fn widest_within(bytes: usize) -> Self {
    Self::ALL
      .into_iter()
      .rev()
      .find(|width| width.size() <= bytes)
      .unwrap_or(LinkWidth::U8)
  }

  pub const fn size(self) -> usize {
    match self {
      LinkWidth::U8 => mem::size_of::<u8>(),
      LinkWidth::U16 => mem::size_of::<u16>(),
      LinkWidth::U32 => mem::size_of::<u32>(),
      LinkWidth::Usize => mem::size_of::<usize>(),
    }
  }

  /// Value marking the end of a free list.
  pub const fn sentinel(self) -> usize {
    match self {
      LinkWidth::U8 => u8::MAX as usize,
      LinkWidth::U16 => u16::MAX as usize,
      LinkWidth::U32 => u32::MAX as usize,
      LinkWidth::Usize => usize::MAX,
    }
  }

  /// Largest slot count this width can index.
  pub const fn max_slots(self) -> usize {
    self.sentinel()
  }

  /// # Safety
  /// `slot` must be valid for reads of `self.size()` bytes.
  pub(crate) unsafe fn read(self, slot: NonNull<u8>) -> usize {
    let ptr = slot.as_ptr();
    // SAFETY: caller guarantees size() readable bytes; reads are unaligned
    unsafe {
      match self {
        LinkWidth::U8 => ptr.read() as usize,
        LinkWidth::U16 => ptr.cast::<u16>().read_unaligned() as usize,
        LinkWidth::U32 => ptr.cast::<u32>().read_unaligned() as usize,
        LinkWidth::Usize => ptr.cast::<usize>().read_unaligned(),
      }
    }
  }

  /// # Safety
  /// `slot` must be valid for writes of `self.size()` bytes and `value` must
  /// not exceed `self.sentinel()`.
  pub(crate) unsafe fn write(self, slot: NonNull<u8>, value: usize) {
    debug_assert!(value <= self.sentinel());
    let ptr = slot.as_ptr();
    // SAFETY: caller guarantees size() writable bytes; writes are unaligned
    unsafe {
      match self {
        LinkWidth::U8 => ptr.write(value as u8),
        LinkWidth::U16 => ptr.cast::<u16>().write_unaligned(value as u16),
        LinkWidth::U32 => ptr.cast::<u32>().write_unaligned(value as u32),
        LinkWidth::Usize => ptr.cast::<usize>().write_unaligned(value),
      }
    }
  }
}

/// Rounds `ptr` up to `alignment`, a power of two or `0` for "leave as is".
pub(crate) fn round_up(ptr: NonNull<u8>, alignment: usize) -> NonNull<u8> {
  if alignment == 0 {
    return ptr;
  }
  let mask = alignment - 1;
  let addr = ptr.as_ptr() as usize;
  let offset = ((addr + mask) & !mask) - addr;
  // SAFETY: chunks over-allocate padding that covers the offset
  unsafe { ptr.add(offset) }
}

/// Geometry shared by every chunk of one arena.
#[derive(Debug, Clone, Copy, PartialEq, Eq, CopyGetters)]
#[getset(get_copy = "pub(crate)")]
pub(crate) struct SlotLayout {
  /// Size of `T`.
  elem_size: usize,
  /// Bytes between consecutive slots.
  stride: usize,
  /// Link width selected by the configured capacity.
  link: LinkWidth,
  /// Round-up target for chunk bases, `0` when the backing allocator aligns.
  alignment: usize,
  /// Extra slots requested per chunk to absorb the round-up.
  padding: usize,
  /// Alignment requested from the backing allocator.
  request_align: usize,
  /// Largest chunk, in slots, whose links still fit inside one slot.
  max_run: usize,
}

impl SlotLayout {
  pub(crate) fn new<T>(config: &PoolConfig) -> Self {
    let elem_size = mem::size_of::<T>();
    let elem_align = mem::align_of::<T>();
    let link = LinkWidth::narrowest(config.capacity());
    let stride = elem_size.max(link.size()).next_multiple_of(elem_align);

    let (alignment, padding, request_align) = match config.allocation() {
      AllocationType::Aligned => {
        let native = config.native_align();
        let padding = if elem_align > native {
          (elem_align - native).div_ceil(stride)
        } else {
          0
        };
        (elem_align, padding, native)
      }
      AllocationType::Unaligned => (0, 0, config.native_align().max(elem_align)),
    };

    Self {
      elem_size,
      stride,
      link,
      alignment,
      padding,
      request_align,
      max_run: LinkWidth::widest_within(stride).max_slots(),
    }
  }

  /// Allocation mode this geometry actually behaves like. Aligned storage
  /// that needs no padding requests exactly what unaligned storage does.
  pub(crate) fn effective_allocation(&self) -> AllocationType {
    if self.padding == 0 {
      AllocationType::Unaligned
    } else {
      AllocationType::Aligned
    }
  }

  /// Slots occupied by `count` contiguous elements.
  pub(crate) fn slots_for(&self, count: usize) -> PoolResult<usize> {
    let bytes = count
      .checked_mul(self.elem_size)
      .ok_or(PoolError::SizeOverflow { count })?;
    Ok(bytes.div_ceil(self.stride))
  }
}
