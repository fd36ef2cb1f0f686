//! Allocator-shaped views of a [`PoolArena`].
//!
//! [`SlotAllocator`] is the typed contract containers program against:
//! allocate/deallocate runs of `Value`, construct/destroy in place, and
//! rebind to another element type with the same policy. The arena also
//! implements [`core::alloc::Allocator`], so `Box::new_in(value, &arena)` and
//! `Vec::new_in(&arena)` draw from the pool.

use alloc::alloc::{
  AllocError,
  Allocator,
  Layout,
};
use core::{
  mem,
  ptr::NonNull,
};

use crate::{
  error::PoolResult,
  pool::PoolArena,
};

/// Typed allocation capability with in-place construction and rebinding.
pub trait SlotAllocator {
  type Value;
  /// The same allocator, configured identically, for another element type.
  type Rebind<U>: SlotAllocator<Value = U>;

  fn allocate(
    &self,
    count: usize,
    hint: Option<NonNull<Self::Value>>,
  ) -> PoolResult<NonNull<Self::Value>>;

  /// # Safety
  /// `ptr` and `count` must describe a live run from [`Self::allocate`].
  unsafe fn deallocate(&self, ptr: NonNull<Self::Value>, count: usize) -> PoolResult<()>;

  /// Moves `value` into allocated, unconstructed storage.
  ///
  /// # Safety
  /// `ptr` must be valid for writes and hold no live value.
  unsafe fn construct(&self, ptr: NonNull<Self::Value>, value: Self::Value) {
    // SAFETY: forwarded from the caller
    unsafe { ptr.write(value) }
  }

  /// Runs the destructor of the value at `ptr`, leaving the storage
  /// allocated.
  ///
  /// # Safety
  /// `ptr` must hold a live value that is not used afterwards.
  unsafe fn destroy(&self, ptr: NonNull<Self::Value>) {
    // SAFETY: forwarded from the caller
    unsafe { ptr.drop_in_place() }
  }

  fn max_size(&self) -> usize;

  fn rebind<U>(&self) -> Self::Rebind<U>;
}

impl<T, A> SlotAllocator for PoolArena<T, A>
where
  A: Allocator + Clone,
{
  type Value = T;
  type Rebind<U> = PoolArena<U, A>;

  fn allocate(&self, count: usize, hint: Option<NonNull<T>>) -> PoolResult<NonNull<T>> {
    PoolArena::allocate(self, count, hint)
  }

  unsafe fn deallocate(&self, ptr: NonNull<T>, count: usize) -> PoolResult<()> {
    // SAFETY: forwarded from the caller
    unsafe { PoolArena::deallocate(self, ptr, count) }
  }

  fn max_size(&self) -> usize {
    PoolArena::max_size(self)
  }

  /// A fresh, empty arena for `U` sharing this arena's configuration and a
  /// clone of its backing allocator.
  fn rebind<U>(&self) -> PoolArena<U, A> {
    PoolArena::from_valid(self.allocator().clone(), *self.config())
  }
}

/// Arenas compare equal when storage from one could have come from the
/// other's policy: same capacity, safety and native alignment, and the same
/// effective allocation mode. Aligned storage that needs no padding behaves
/// exactly like unaligned storage and compares equal to it.
impl<T, U, A> PartialEq<PoolArena<U, A>> for PoolArena<T, A>
where
  A: Allocator,
{
  fn eq(&self, other: &PoolArena<U, A>) -> bool {
    let (lhs, rhs) = (self.config(), other.config());
    lhs.capacity() == rhs.capacity()
      && lhs.safety() == rhs.safety()
      && lhs.native_align() == rhs.native_align()
      && self.layout().effective_allocation() == other.layout().effective_allocation()
  }
}

unsafe impl<T, A> Allocator for PoolArena<T, A>
where
  A: Allocator,
{
  fn allocate(&self, layout: Layout) -> Result<NonNull<[u8]>, AllocError> {
    if layout.align() > mem::align_of::<T>() {
      return Err(AllocError);
    }
    if layout.size() == 0 {
      return Ok(NonNull::slice_from_raw_parts(NonNull::<T>::dangling().cast(), 0));
    }
    let elem = mem::size_of::<T>();
    if elem == 0 {
      return Err(AllocError);
    }
    let ptr = PoolArena::allocate(self, layout.size().div_ceil(elem), None).map_err(|_| AllocError)?;
    Ok(NonNull::slice_from_raw_parts(ptr.cast(), layout.size()))
  }

  unsafe fn deallocate(&self, ptr: NonNull<u8>, layout: Layout) {
    let elem = mem::size_of::<T>();
    if layout.size() == 0 || elem == 0 {
      return;
    }
    // SAFETY: the Allocator contract guarantees ptr came from allocate with layout
    if let Err(err) = unsafe { PoolArena::deallocate(self, ptr.cast(), layout.size().div_ceil(elem)) } {
      panic!("invalid PoolArena deallocation: {err}");
    }
  }
}

#[cfg(test)]
mod tests {
  use alloc::{
    alloc::Global,
    boxed::Box,
    vec::Vec,
  };

  use super::*;
  use crate::config::{
    AllocationType,
    PoolConfig,
    Safety,
  };

  #[test]
  fn construct_and_destroy_in_place() {
    let arena = PoolArena::<String>::new(4).unwrap();
    let ptr = SlotAllocator::allocate(&arena, 1, None).unwrap();
    unsafe {
      arena.construct(ptr, String::from("pooled"));
      assert_eq!(ptr.as_ref(), "pooled");
      arena.destroy(ptr);
      SlotAllocator::deallocate(&arena, ptr, 1).unwrap();
    }
    assert_eq!(arena.stats().live(), 0);
  }

  #[test]
  fn rebind_keeps_configuration() {
    let config = PoolConfig::new(32).with_safety(Safety::Disabled);
    let arena = PoolArena::<u64>::with_config(config).unwrap();
    let rebound: PoolArena<u16, Global> = arena.rebind::<u16>();
    assert_eq!(rebound.config(), arena.config());
    assert_eq!(rebound.chunk_count(), 0);
    assert!(arena == rebound);
  }

  #[test]
  fn equality_ignores_identity_not_policy() {
    let a = PoolArena::<u64>::new(16).unwrap();
    let b = PoolArena::<u64>::new(16).unwrap();
    let c = PoolArena::<u64>::new(32).unwrap();
    let d = PoolArena::<u64>::with_config(PoolConfig::new(16).with_safety(Safety::Disabled)).unwrap();
    assert!(a == b);
    assert!(a != c);
    assert!(a != d);
  }

  #[test]
  fn padding_free_aligned_equals_unaligned() {
    let aligned = PoolArena::<u32>::new(8).unwrap();
    let unaligned =
      PoolArena::<u32>::with_config(PoolConfig::new(8).with_allocation(AllocationType::Unaligned))
        .unwrap();
    assert_eq!(aligned.padding(), 0);
    assert!(aligned == unaligned);

    let padded = PoolArena::<u64>::with_config(PoolConfig::new(8).with_native_align(1)).unwrap();
    let plain = PoolArena::<u64>::with_config(
      PoolConfig::new(8)
        .with_native_align(1)
        .with_allocation(AllocationType::Unaligned),
    )
    .unwrap();
    assert!(padded.padding() > 0);
    assert!(padded != plain);
  }

  #[test]
  fn max_size_is_bounded_by_chunk_links() {
    let arena = PoolArena::<u8>::new(4).unwrap();
    assert_eq!(arena.slot_size(), 1);
    assert_eq!(SlotAllocator::max_size(&arena), u8::MAX as usize);

    let arena = PoolArena::<u64>::new(4).unwrap();
    assert_eq!(SlotAllocator::max_size(&arena), isize::MAX as usize / 8);

    let arena = PoolArena::<()>::new(4).unwrap();
    assert_eq!(SlotAllocator::max_size(&arena), usize::MAX);
  }

  #[test]
  fn boxes_live_in_the_pool() {
    let arena = PoolArena::<u64>::new(4).unwrap();
    let first = Box::new_in(7u64, &arena);
    let addr = &*first as *const u64;
    assert!(arena.contains(NonNull::from(&*first)));
    drop(first);
    let second = Box::new_in(9u64, &arena);
    assert_eq!(&*second as *const u64, addr);
    assert_eq!(*second, 9);
  }

  #[test]
  fn vectors_grow_through_runs() {
    let arena = PoolArena::<u32>::new(64).unwrap();
    let mut values = Vec::new_in(&arena);
    values.extend(0..40u32);
    assert_eq!(values.iter().sum::<u32>(), (0..40u32).sum::<u32>());
    assert!(arena.contains(NonNull::from(&values[0])));
    drop(values);
    arena.verify().unwrap();
    assert_eq!(arena.stats().live(), 0);
  }

  #[test]
  fn over_aligned_layouts_are_refused() {
    let arena = PoolArena::<u8>::new(16).unwrap();
    let layout = Layout::from_size_align(8, 8).unwrap();
    assert!(Allocator::allocate(&arena, layout).is_err());
  }

  #[test]
  #[should_panic(expected = "invalid PoolArena deallocation")]
  fn foreign_box_memory_panics() {
    let arena = PoolArena::<u64>::new(4).unwrap();
    let mut outside = 5u64;
    let layout = Layout::new::<u64>();
    unsafe { Allocator::deallocate(&arena, NonNull::from(&mut outside).cast(), layout) };
  }
}
