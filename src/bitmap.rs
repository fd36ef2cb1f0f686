//! Fixed-size bitmap whose storage comes from a caller-supplied allocator.
//!
//! The bitmap does not keep the allocator around: chunks create it with the
//! arena's backing allocator and hand the same allocator back to
//! [`Bitmap::release`] at teardown.

use alloc::alloc::{
  Allocator,
  Layout,
};
use core::ptr::NonNull;

use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum BitmapError {
  #[error("bit {index} is outside a bitmap of {bits} bits")]
  OutOfBounds { index: usize, bits: usize },
  #[error("allocator refused bitmap storage")]
  AllocError,
  #[error("bitmap of {0} bits is too large")]
  InvalidSize(usize),
}

#[derive(Debug)]
pub struct Bitmap {
  map: NonNull<u8>,
  layout: Layout,
  bits: usize,
}

impl Bitmap {
  /// Allocates a zeroed bitmap holding `bits` bits.
  pub fn try_new_in<A: Allocator>(allocator: &A, bits: usize) -> Result<Self, BitmapError> {
    let bytes = bits.div_ceil(8).max(1);
    let layout = Layout::array::<u8>(bytes).map_err(|_| BitmapError::InvalidSize(bits))?;
    let ptr = allocator
      .allocate_zeroed(layout)
      .map_err(|_| BitmapError::AllocError)?;
    Ok(Self {
      map: ptr.cast(),
      layout,
      bits,
    })
  }

  pub(crate) fn len(&self) -> usize {
    self.bits
  }

  fn locate(&self, index: usize) -> Result<(usize, u8), BitmapError> {
    if index >= self.bits {
      return Err(BitmapError::OutOfBounds {
        index,
        bits: self.bits,
      });
    }
    Ok((index / 8, 1 << (index % 8)))
  }

  fn byte(&self, byte_index: usize) -> *mut u8 {
    // SAFETY: byte_index < layout.size(), checked by locate
    unsafe { self.map.as_ptr().add(byte_index) }
  }

  pub fn set(&mut self, index: usize) -> Result<(), BitmapError> {
    let (byte_index, mask) = self.locate(index)?;
    // SAFETY: in bounds and exclusively borrowed
    unsafe { *self.byte(byte_index) |= mask };
    Ok(())
  }

  pub fn get(&self, index: usize) -> Result<bool, BitmapError> {
    let (byte_index, mask) = self.locate(index)?;
    // SAFETY: in bounds, storage initialised by allocate_zeroed
    Ok(unsafe { *self.byte(byte_index) } & mask != 0)
  }

  pub fn clear(&mut self, index: usize) -> Result<(), BitmapError> {
    let (byte_index, mask) = self.locate(index)?;
    // SAFETY: in bounds and exclusively borrowed
    unsafe { *self.byte(byte_index) &= !mask };
    Ok(())
  }

  /// Number of set bits.
  pub fn count_ones(&self) -> usize {
    (0..self.layout.size())
      // SAFETY: every byte of the storage is in bounds and initialised
      .map(|i| unsafe { *self.byte(i) }.count_ones() as usize)
      .sum()
  }

  /// Returns the storage to `allocator`.
  ///
  /// # Safety
  /// `allocator` must be the allocator (or a clone sharing its memory) the
  /// bitmap was created with.
  pub unsafe fn release<A: Allocator>(self, allocator: &A) {
    // SAFETY: map was allocated by allocator with this layout
    unsafe { allocator.deallocate(self.map, self.layout) };
  }
}

#[cfg(test)]
mod tests {
  use alloc::alloc::Global;

  use super::*;

  #[test]
  fn set_get_clear() {
    let mut bitmap = Bitmap::try_new_in(&Global, 64).unwrap();
    assert!(bitmap.set(10).is_ok());
    assert!(bitmap.get(10).unwrap());
    assert!(!bitmap.get(11).unwrap());
    assert!(bitmap.clear(10).is_ok());
    assert!(!bitmap.get(10).unwrap());
    unsafe { bitmap.release(&Global) };
  }

  #[test]
  fn odd_sizes_round_up_storage() {
    let mut bitmap = Bitmap::try_new_in(&Global, 5).unwrap();
    assert_eq!(bitmap.len(), 5);
    assert!(bitmap.set(4).is_ok());
    assert_eq!(
      bitmap.set(5),
      Err(BitmapError::OutOfBounds { index: 5, bits: 5 })
    );
    assert_eq!(bitmap.count_ones(), 1);
    unsafe { bitmap.release(&Global) };
  }

  #[test]
  fn starts_zeroed() {
    let bitmap = Bitmap::try_new_in(&Global, 300).unwrap();
    assert_eq!(bitmap.count_ones(), 0);
    assert!((0..300).all(|i| !bitmap.get(i).unwrap()));
    unsafe { bitmap.release(&Global) };
  }
}
