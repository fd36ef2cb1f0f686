//! Errors reported by [`PoolArena`](crate::PoolArena) and its building blocks.

use thiserror::Error;

/// Failure modes of pool construction, allocation and deallocation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
  /// The backing allocator refused a chunk request.
  #[error("backing allocator could not provide {bytes} bytes for a chunk of {slots} slots")]
  BackingAllocationFailure { slots: usize, bytes: usize },

  /// A pointer handed to `deallocate` was not produced by this arena.
  #[error("pointer {addr:#x} is not owned by this arena")]
  OwnershipViolation { addr: usize },

  /// A slot was released while it was already on the free list.
  #[error("slot {addr:#x} is already free")]
  DoubleFree { addr: usize },

  /// The configured chunk capacity was zero.
  #[error("arena capacity must be at least one slot")]
  CapacityMisconfiguration,

  /// The configured native alignment is not a power of two.
  #[error("alignment {0} is not a power of two")]
  InvalidAlignment(usize),

  /// A run needs more slots than a single chunk can index.
  #[error("a run of {requested} slots exceeds the {max} slots one chunk can index")]
  RunTooLarge { requested: usize, max: usize },

  /// The byte size of a run or chunk does not fit in `usize`.
  #[error("byte size of {count} elements overflows the address space")]
  SizeOverflow { count: usize },

  /// [`PoolArena::verify`](crate::PoolArena::verify) found a broken free list.
  #[error("free list corrupted at {addr:#x}")]
  CorruptFreeList { addr: usize },
}

pub type PoolResult<T> = Result<T, PoolError>;
