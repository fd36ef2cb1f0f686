//! Fixed-slot arena: bump allocation out of the newest chunk, reuse through
//! per-chunk intrusive free lists, growth by appending chunks.

use alloc::{
  alloc::{
    Allocator,
    Global,
  },
  collections::BTreeMap,
};
use core::{
  cell::UnsafeCell,
  fmt,
  marker::PhantomData,
  ptr::NonNull,
};

use getset::CopyGetters;
use tracing::{
  debug,
  trace,
  warn,
};

use super::{
  chunk::Chunk,
  slot::{
    LinkWidth,
    SlotLayout,
  },
};
use crate::{
  config::PoolConfig,
  error::{
    PoolError,
    PoolResult,
  },
};

/// Snapshot of an arena's slot accounting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, CopyGetters)]
#[getset(get_copy = "pub")]
pub struct PoolStats {
  /// Chunks currently owned.
  chunks: usize,
  /// Slots across all chunks, used or not.
  reserved: usize,
  /// Slots ever handed out by bumping.
  bumped: usize,
  /// Slots sitting on free lists.
  free: usize,
  /// Slots currently handed out.
  live: usize,
}

struct ArenaInner {
  /// Newest chunk. Bumping only ever happens here.
  head: Option<NonNull<Chunk>>,
  /// Chunks with free slots, most recently freed into first.
  free_chunks: Option<NonNull<Chunk>>,
  /// Every chunk keyed by the address of its first slot.
  by_base: BTreeMap<usize, NonNull<Chunk>>,
}

/// Pool of fixed-size slots for values of type `T`.
///
/// Slots are taken from chunks of `capacity` slots acquired from the backing
/// allocator `A`. A single-slot request reuses the most recently freed slot,
/// otherwise the request is bumped out of the newest chunk, and a new chunk
/// is acquired when that one is exhausted. Memory goes back to `A` only when
/// the arena is dropped.
///
/// The arena never runs `T`'s destructor: values still live when it is
/// dropped are forgotten. It is not `Sync`; share it between threads only
/// behind a lock, or give every thread its own arena.
pub struct PoolArena<T, A: Allocator = Global> {
  inner: UnsafeCell<ArenaInner>,
  allocator: A,
  config: PoolConfig,
  layout: SlotLayout,
  _marker: PhantomData<*const T>,
}

// SAFETY: the arena exclusively owns every chunk it points to and never
// shares them, so moving it moves sole ownership of the slots and the `T`s
// they may hold.
unsafe impl<T: Send, A: Allocator + Send> Send for PoolArena<T, A> {}

impl<T> PoolArena<T, Global> {
  pub fn new(capacity: usize) -> PoolResult<Self> {
    Self::new_in(Global, capacity)
  }

  pub fn with_config(config: PoolConfig) -> PoolResult<Self> {
    Self::with_config_in(Global, config)
  }
}

impl<T, A: Allocator> PoolArena<T, A> {
  pub fn new_in(allocator: A, capacity: usize) -> PoolResult<Self> {
    Self::with_config_in(allocator, PoolConfig::new(capacity))
  }

  /// Builds an empty arena. No memory is acquired until the first
  /// allocation.
  pub fn with_config_in(allocator: A, config: PoolConfig) -> PoolResult<Self> {
    config.validate()?;
    Ok(Self::from_valid(allocator, config))
  }

  pub(crate) fn from_valid(allocator: A, config: PoolConfig) -> Self {
    Self {
      inner: UnsafeCell::new(ArenaInner {
        head: None,
        free_chunks: None,
        by_base: BTreeMap::new(),
      }),
      allocator,
      layout: SlotLayout::new::<T>(&config),
      config,
      _marker: PhantomData,
    }
  }

  fn inner(&self) -> &ArenaInner {
    // SAFETY: mutable access only happens inside inner_mut callers, none of
    // which hand out references into inner
    unsafe { &*self.inner.get() }
  }

  unsafe fn inner_mut(&self) -> &mut ArenaInner {
    // SAFETY: callers ensure exclusive access
    unsafe { &mut *self.inner.get() }
  }

  pub fn config(&self) -> &PoolConfig {
    &self.config
  }

  pub(crate) fn layout(&self) -> &SlotLayout {
    &self.layout
  }

  pub fn allocator(&self) -> &A {
    &self.allocator
  }

  /// Bytes between two consecutive slots.
  pub fn slot_size(&self) -> usize {
    self.layout.stride()
  }

  /// Free-link encoding used by chunks of the configured capacity.
  pub fn link_width(&self) -> LinkWidth {
    self.layout.link()
  }

  /// Slots over-allocated per chunk to align its base.
  pub fn padding(&self) -> usize {
    self.layout.padding()
  }

  pub fn chunk_count(&self) -> usize {
    self.inner().by_base.len()
  }

  /// Next never-used slot of the newest chunk.
  pub fn cursor(&self) -> Option<NonNull<T>> {
    // SAFETY: head points to a live chunk owned by this arena
    self
      .inner()
      .head
      .map(|head| unsafe { head.as_ref() }.cursor().cast())
  }

  /// Largest element count a single `allocate` call can serve.
  pub fn max_size(&self) -> usize {
    let elem = self.layout.elem_size();
    if elem == 0 {
      return usize::MAX;
    }
    let by_address = isize::MAX as usize / elem;
    let by_chunk = self.layout.max_run().saturating_mul(self.layout.stride()) / elem;
    by_address.min(by_chunk)
  }

  /// Returns uninitialised storage for `count` contiguous `T`s.
  ///
  /// A request fitting in one slot takes the most recently freed slot if
  /// there is one. The rule is by slots, not elements: with a link-widened
  /// stride, `count > 1` small values can still fit one slot and reuse it. Anything else is bumped out of the newest chunk, growing
  /// the arena by a chunk of `max(capacity, slots)` slots when it does not
  /// fit. `hint` is accepted for allocator-interface parity and ignored.
  /// Zero-sized requests get a dangling pointer.
  pub fn allocate(&self, count: usize, hint: Option<NonNull<T>>) -> PoolResult<NonNull<T>> {
    let _ = hint;
    if count == 0 || self.layout.elem_size() == 0 {
      return Ok(NonNull::dangling());
    }
    let slots = self.layout.slots_for(count)?;

    // SAFETY: no reference into inner escapes this call
    let inner = unsafe { self.inner_mut() };
    if slots == 1 {
      // SAFETY: free lists only hold slots written by push_free
      if let Some(slot) = unsafe { inner.pop_free() } {
        return Ok(slot.cast());
      }
    }
    if let Some(slot) = inner.bump(slots) {
      return Ok(slot.cast());
    }

    let capacity = self.grow(inner, slots)?;
    inner
      .bump(slots)
      .map(NonNull::cast)
      .ok_or(PoolError::RunTooLarge {
        requested: slots,
        max: capacity,
      })
  }

  fn grow(&self, inner: &mut ArenaInner, slots: usize) -> PoolResult<usize> {
    let capacity = self.config.capacity().max(slots);
    if capacity > self.layout.max_run() {
      return Err(PoolError::RunTooLarge {
        requested: slots,
        max: self.layout.max_run(),
      });
    }
    trace!(slots, chunks = inner.by_base.len(), "pool exhausted, growing");

    let chunk = Chunk::try_new_in(
      &self.allocator,
      &self.layout,
      capacity,
      self.config.safety(),
      inner.head,
    )
    .inspect_err(|err| warn!(%err, capacity, "pool chunk acquisition failed"))?;
    inner.head = Some(chunk);
    // SAFETY: chunk was just built
    let base = unsafe { chunk.as_ref() }.base().as_ptr() as usize;
    inner.by_base.insert(base, chunk);
    debug!(
      capacity,
      padding = self.layout.padding(),
      stride = self.layout.stride(),
      chunks = inner.by_base.len(),
      "acquired pool chunk"
    );
    Ok(capacity)
  }

  /// Finds the chunk and first slot index of a run starting at `ptr`,
  /// applying the ownership checks when safety is enabled.
  fn locate(
    &self,
    inner: &ArenaInner,
    ptr: NonNull<u8>,
    slots: usize,
  ) -> PoolResult<(NonNull<Chunk>, usize)> {
    let addr = ptr.as_ptr() as usize;
    let violation = PoolError::OwnershipViolation { addr };
    let chunk = inner.find_chunk(addr).ok_or(violation)?;
    // SAFETY: find_chunk only yields live chunks
    let owner = unsafe { chunk.as_ref() };
    let (index, remainder) = owner.offset_of(addr);

    if self.config.is_safe() {
      if remainder != 0 || slots > owner.len() || index > owner.len() - slots {
        return Err(violation);
      }
      if let Some(taken) = (index..index + slots).find(|&i| owner.is_free(i) == Some(true)) {
        return Err(PoolError::DoubleFree {
          addr: owner.slot(taken).as_ptr() as usize,
        });
      }
    }
    Ok((chunk, index))
  }

  /// Returns `count` slots starting at `ptr` to the arena. Each slot goes
  /// onto the free list on its own; no destructor runs.
  ///
  /// With safety enabled the pointer must start a bumped slot of this arena
  /// and none of the slots may already be free, otherwise nothing changes
  /// and the violation is returned.
  ///
  /// # Safety
  /// `ptr` and `count` must describe a run obtained from
  /// [`PoolArena::allocate`] on this arena that has not been deallocated
  /// since. With safety disabled, breaking this corrupts the free list.
  pub unsafe fn deallocate(&self, ptr: NonNull<T>, count: usize) -> PoolResult<()> {
    if count == 0 || self.layout.elem_size() == 0 {
      return Ok(());
    }
    let slots = self.layout.slots_for(count)?;
    // SAFETY: no reference into inner escapes this call
    let inner = unsafe { self.inner_mut() };
    let (chunk, index) = self
      .locate(inner, ptr.cast(), slots)
      .inspect_err(|err| warn!(%err, count, "rejected pool deallocation"))?;
    // SAFETY: chunk owns the run, checked above or promised by the caller
    unsafe { inner.release_run(chunk, index, slots) };
    Ok(())
  }

  /// Allocates a slot and moves `value` into it.
  pub fn try_alloc(&self, value: T) -> PoolResult<NonNull<T>> {
    let ptr = self.allocate(1, None)?;
    // SAFETY: ptr is valid, aligned and unused storage for one T
    unsafe { ptr.write(value) };
    Ok(ptr)
  }

  pub fn alloc(&self, value: T) -> NonNull<T> {
    self
      .try_alloc(value)
      .unwrap_or_else(|err| panic!("Failed to allocate in PoolArena: {err}"))
  }

  /// Moves the value out of `ptr` and frees its slot.
  ///
  /// # Safety
  /// `ptr` must hold a live `T` placed by this arena.
  pub unsafe fn reclaim(&self, ptr: NonNull<T>) -> PoolResult<T> {
    if self.layout.elem_size() == 0 {
      // SAFETY: zero-sized reads only need a dangling, aligned pointer
      return Ok(unsafe { ptr.read() });
    }
    // SAFETY: no reference into inner escapes this call
    let inner = unsafe { self.inner_mut() };
    let (chunk, index) = self.locate(inner, ptr.cast(), 1)?;
    // SAFETY: caller guarantees a live T, read before the link overwrites it
    let value = unsafe { ptr.read() };
    // SAFETY: chunk owns the slot
    unsafe { inner.release_run(chunk, index, 1) };
    Ok(value)
  }

  /// Whether `ptr` points into storage owned by this arena.
  pub fn contains(&self, ptr: NonNull<T>) -> bool {
    self.inner().find_chunk(ptr.as_ptr() as usize).is_some()
  }

  pub fn stats(&self) -> PoolStats {
    let mut stats = PoolStats::default();
    for chunk in self.inner().chunks() {
      stats.chunks += 1;
      stats.reserved += chunk.capacity();
      stats.bumped += chunk.len();
      stats.free += chunk.free_len();
    }
    stats.live = stats.bumped.saturating_sub(stats.free);
    stats
  }

  /// Checks every free list and the list of chunks holding free slots.
  pub fn verify(&self) -> PoolResult<()> {
    let inner = self.inner();
    let mut with_free = 0;
    for chunk in inner.chunks() {
      chunk.check_free_list()?;
      if chunk.free_len() > 0 {
        with_free += 1;
      }
    }

    let mut listed = 0;
    let mut current = inner.free_chunks;
    while let Some(chunk) = current {
      // SAFETY: free_chunks only links live chunks
      let chunk = unsafe { chunk.as_ref() };
      if listed == inner.by_base.len() || chunk.free_len() == 0 {
        return Err(PoolError::CorruptFreeList {
          addr: chunk.base().as_ptr() as usize,
        });
      }
      listed += 1;
      current = chunk.free_next();
    }
    if listed != with_free {
      return Err(PoolError::CorruptFreeList { addr: 0 });
    }
    Ok(())
  }

  /// Releases every chunk and reports what the arena held at that point.
  pub fn teardown(self) -> PoolStats {
    let stats = self.stats();
    drop(self);
    stats
  }
}

impl ArenaInner {
  fn chunks(&self) -> impl Iterator<Item = &Chunk> + '_ {
    // SAFETY: the chain only links live chunks owned by this arena
    core::iter::successors(self.head.map(|head| unsafe { head.as_ref() }), |chunk| {
      chunk.prev().map(|prev| unsafe { prev.as_ref() })
    })
  }

  /// Owner of `addr`: the newest chunk if it holds it, otherwise the chunk
  /// with the highest base at or below `addr`.
  fn find_chunk(&self, addr: usize) -> Option<NonNull<Chunk>> {
    // SAFETY: head and every indexed chunk are live
    let owns = |chunk: &NonNull<Chunk>| unsafe { chunk.as_ref() }.contains(addr);
    if let Some(head) = self.head.filter(owns) {
      return Some(head);
    }
    self
      .by_base
      .range(..=addr)
      .next_back()
      .map(|(_, &chunk)| chunk)
      .filter(owns)
  }

  fn bump(&mut self, slots: usize) -> Option<NonNull<u8>> {
    let mut head = self.head?;
    // SAFETY: head is live and exclusively borrowed through self
    unsafe { head.as_mut() }.bump(slots)
  }

  unsafe fn pop_free(&mut self) -> Option<NonNull<u8>> {
    let mut front = self.free_chunks?;
    // SAFETY: front is a live chunk
    let chunk = unsafe { front.as_mut() };
    // SAFETY: forwarded from the caller
    let slot = unsafe { chunk.pop_free() };
    if chunk.free_len() == 0 {
      // SAFETY: front is linked at the head of free_chunks
      unsafe { self.unlink_free(front) };
    }
    slot
  }

  unsafe fn release_run(&mut self, mut chunk: NonNull<Chunk>, index: usize, slots: usize) {
    // SAFETY: chunk is live and exclusively borrowed through self
    let owner = unsafe { chunk.as_mut() };
    debug_assert!(index + slots <= owner.capacity());
    for i in index..index + slots {
      // SAFETY: i is inside the chunk and the caller gave the slot up
      unsafe { owner.push_free(i) };
    }
    // SAFETY: chunk is live
    unsafe { self.move_to_front(chunk) };
  }

  fn is_listed(&self, chunk: NonNull<Chunk>) -> bool {
    // SAFETY: chunk is live
    self.free_chunks == Some(chunk) || unsafe { chunk.as_ref() }.free_prev().is_some()
  }

  unsafe fn unlink_free(&mut self, mut chunk: NonNull<Chunk>) {
    // SAFETY: chunk and its neighbours are live chunks of this arena
    unsafe {
      let (prev, next) = (chunk.as_ref().free_prev(), chunk.as_ref().free_next());
      chunk.as_mut().set_free_prev(None).set_free_next(None);
      match prev {
        Some(mut prev) => {
          prev.as_mut().set_free_next(next);
        }
        None => self.free_chunks = next,
      }
      if let Some(mut next) = next {
        next.as_mut().set_free_prev(prev);
      }
    }
  }

  unsafe fn move_to_front(&mut self, mut chunk: NonNull<Chunk>) {
    if self.free_chunks == Some(chunk) {
      return;
    }
    if self.is_listed(chunk) {
      // SAFETY: chunk is linked in free_chunks
      unsafe { self.unlink_free(chunk) };
    }
    // SAFETY: chunk and the old front are live chunks of this arena
    unsafe {
      chunk
        .as_mut()
        .set_free_prev(None)
        .set_free_next(self.free_chunks);
      if let Some(mut front) = self.free_chunks {
        front.as_mut().set_free_prev(Some(chunk));
      }
    }
    self.free_chunks = Some(chunk);
  }
}

// SAFETY: dropping the arena only releases raw storage and never touches a `T`
unsafe impl<#[may_dangle] T, A: Allocator> Drop for PoolArena<T, A> {
  fn drop(&mut self) {
    let stats = self.stats();
    let inner = self.inner.get_mut();
    inner.free_chunks = None;
    inner.by_base.clear();
    let mut current = inner.head.take();
    while let Some(chunk) = current {
      // SAFETY: every chunk in the chain came from try_new_in with this allocator
      current = unsafe { Chunk::release(chunk, &self.allocator) };
    }
    debug!(
      chunks = stats.chunks(),
      live = stats.live(),
      "released pool arena"
    );
  }
}

impl<T, A: Allocator> fmt::Debug for PoolArena<T, A> {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    f.debug_struct("PoolArena")
      .field("config", &self.config)
      .field("slot_size", &self.slot_size())
      .field("stats", &self.stats())
      .finish()
  }
}

