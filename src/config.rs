//! Construction-time policy of a [`PoolArena`](crate::PoolArena).

use core::mem;

use getset::CopyGetters;

use crate::error::{
  PoolError,
  PoolResult,
};

/// How chunk storage is aligned for `T`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum AllocationType {
  /// Ask the backing allocator for `native_align` only and round the chunk
  /// base up to `align_of::<T>()` ourselves, over-allocating padding slots
  /// when the native alignment is not enough.
  #[default]
  Aligned,
  /// Ask the backing allocator for `T`'s alignment directly. No padding and
  /// no round-up.
  Unaligned,
}

/// Whether `deallocate` validates the pointers it is given.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum Safety {
  /// Ownership, slot boundary and double-free checks before every release.
  #[default]
  Enabled,
  /// No checks. Foreign pointers and double frees corrupt the free list.
  Disabled,
}

/// Policy shared by an arena and every arena rebound from it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, CopyGetters)]
pub struct PoolConfig {
  /// Slots per chunk.
  #[getset(get_copy = "pub")]
  capacity: usize,
  #[getset(get_copy = "pub")]
  allocation: AllocationType,
  #[getset(get_copy = "pub")]
  safety: Safety,
  /// Alignment requested from the backing allocator for chunk storage.
  #[getset(get_copy = "pub")]
  native_align: usize,
}

impl PoolConfig {
  pub const DEFAULT_CAPACITY: usize = 4096;
  pub const DEFAULT_NATIVE_ALIGN: usize = mem::align_of::<usize>();

  /// Default policy with a custom chunk capacity. Validation happens when
  /// the arena is built.
  pub const fn new(capacity: usize) -> Self {
    Self {
      capacity,
      allocation: AllocationType::Aligned,
      safety: Safety::Enabled,
      native_align: Self::DEFAULT_NATIVE_ALIGN,
    }
  }

  pub const fn with_allocation(mut self, allocation: AllocationType) -> Self {
    self.allocation = allocation;
    self
  }

  pub const fn with_safety(mut self, safety: Safety) -> Self {
    self.safety = safety;
    self
  }

  pub const fn with_native_align(mut self, native_align: usize) -> Self {
    self.native_align = native_align;
    self
  }

  pub fn is_safe(&self) -> bool {
    self.safety == Safety::Enabled
  }

  /// Rejects configurations no arena can be built from.
  pub fn validate(&self) -> PoolResult<()> {
    if self.capacity == 0 {
      return Err(PoolError::CapacityMisconfiguration);
    }
    if !self.native_align.is_power_of_two() {
      return Err(PoolError::InvalidAlignment(self.native_align));
    }
    Ok(())
  }
}

impl Default for PoolConfig {
  fn default() -> Self {
    Self::new(Self::DEFAULT_CAPACITY)
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn defaults() {
    let config = PoolConfig::default();
    assert_eq!(config.capacity(), 4096);
    assert_eq!(config.allocation(), AllocationType::Aligned);
    assert_eq!(config.safety(), Safety::Enabled);
    assert_eq!(config.native_align(), mem::align_of::<usize>());
    assert!(config.validate().is_ok());
  }

  #[test]
  fn zero_capacity_rejected() {
    assert_eq!(
      PoolConfig::new(0).validate(),
      Err(PoolError::CapacityMisconfiguration)
    );
  }

  #[test]
  fn odd_alignment_rejected() {
    let config = PoolConfig::new(8).with_native_align(12);
    assert_eq!(config.validate(), Err(PoolError::InvalidAlignment(12)));
    let config = PoolConfig::new(8).with_native_align(0);
    assert_eq!(config.validate(), Err(PoolError::InvalidAlignment(0)));
  }

  #[test]
  fn builder_overrides() {
    let config = PoolConfig::new(16)
      .with_allocation(AllocationType::Unaligned)
      .with_safety(Safety::Disabled)
      .with_native_align(1);
    assert_eq!(config.allocation(), AllocationType::Unaligned);
    assert!(!config.is_safe());
    assert_eq!(config.native_align(), 1);
    assert!(config.validate().is_ok());
  }
}
