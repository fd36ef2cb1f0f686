//! A fixed-slot pool allocator.
//!
//! [`PoolArena`] hands out slots for values of one type `T` from chunks it
//! acquires from a backing [`Allocator`](core::alloc::Allocator). New slots
//! are bumped out of the newest chunk; freed slots are threaded onto an
//! intrusive free list stored inside the slots themselves, using the
//! narrowest integer that can index a chunk so small types do not grow.
//! Memory returns to the backing allocator only when the arena is dropped.
//!
//! The arena can be used directly, through the [`SlotAllocator`] trait, or as
//! an [`Allocator`](core::alloc::Allocator) for `Box` and `Vec`.

#![feature(allocator_api)]
#![feature(dropck_eyepatch)]
#![allow(clippy::module_inception, clippy::mut_from_ref)]

extern crate alloc;

pub mod bitmap;
pub mod config;
pub mod error;
pub mod facade;
pub mod pool;

pub use config::{
  AllocationType,
  PoolConfig,
  Safety,
};
pub use error::{
  PoolError,
  PoolResult,
};
pub use facade::SlotAllocator;
pub use pool::{
  LinkWidth,
  PoolArena,
  PoolStats,
};
