//! Deallocation cost must not grow with the number of chunks.

use std::time::{
  Duration,
  Instant,
};

use pooled::{
  PoolArena,
  PoolConfig,
  Safety,
};

/// Fastest of three runs releasing `n` single-slot chunks oldest first.
fn release_oldest_first(n: usize) -> Duration {
  (0..3)
    .map(|_| {
      let arena =
        PoolArena::<u64>::with_config(PoolConfig::new(1).with_safety(Safety::Disabled)).unwrap();
      let slots: Vec<_> = (0..n).map(|_| arena.allocate(1, None).unwrap()).collect();
      assert_eq!(arena.chunk_count(), n);
      let start = Instant::now();
      for &slot in &slots {
        unsafe { arena.deallocate(slot, 1).unwrap() };
      }
      let elapsed = start.elapsed();
      assert_eq!(arena.stats().free(), n);
      elapsed
    })
    .min()
    .unwrap()
}

#[test]
fn releasing_old_chunks_stays_cheap() {
  let small = release_oldest_first(4_000);
  let large = release_oldest_first(16_000);
  let ratio = large.as_secs_f64() / small.as_secs_f64().max(1e-6);
  assert!(
    ratio < 10.0,
    "4x the chunks took {ratio:.1}x as long ({small:?} vs {large:?})"
  );
}
