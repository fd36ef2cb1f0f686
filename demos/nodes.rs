#![feature(allocator_api)]

use std::ptr::NonNull;

use pooled::{
  PoolArena,
  PoolConfig,
  PoolResult,
};

struct Node {
  value: u64,
  next: Option<NonNull<Node>>,
}

/// Singly linked stack whose nodes are slots of a pool.
struct Stack<'a> {
  arena: &'a PoolArena<Node>,
  head: Option<NonNull<Node>>,
  len: usize,
}

impl<'a> Stack<'a> {
  fn new(arena: &'a PoolArena<Node>) -> Self {
    Self {
      arena,
      head: None,
      len: 0,
    }
  }

  fn push(&mut self, value: u64) -> PoolResult<()> {
    let node = self.arena.try_alloc(Node {
      value,
      next: self.head,
    })?;
    self.head = Some(node);
    self.len += 1;
    Ok(())
  }

  fn pop(&mut self) -> PoolResult<Option<u64>> {
    let Some(head) = self.head else {
      return Ok(None);
    };
    let node = unsafe { self.arena.reclaim(head)? };
    self.head = node.next;
    self.len -= 1;
    Ok(Some(node.value))
  }

  fn sum(&self) -> u64 {
    let mut total = 0;
    let mut current = self.head;
    while let Some(node) = current {
      let node = unsafe { node.as_ref() };
      total += node.value;
      current = node.next;
    }
    total
  }
}

impl Drop for Stack<'_> {
  fn drop(&mut self) {
    while let Ok(Some(_)) = self.pop() {}
  }
}

fn main() -> PoolResult<()> {
  let arena = PoolArena::<Node>::with_config(PoolConfig::new(256))?;
  println!(
    "slot size {} bytes, links {:?}",
    arena.slot_size(),
    arena.link_width()
  );

  let mut stack = Stack::new(&arena);
  for value in 0..1000 {
    stack.push(value)?;
  }
  println!("pushed {} nodes, sum {}", stack.len, stack.sum());
  println!("after pushing: {:?}", arena.stats());

  for _ in 0..400 {
    stack.pop()?;
  }
  println!("after popping 400: {:?}", arena.stats());

  for value in 0..400 {
    stack.push(value * 2)?;
  }
  println!("after refilling: {:?}", arena.stats());
  arena.verify()?;
  drop(stack);

  let numbers = PoolArena::<u64>::new(64)?;
  let boxes: Vec<_> = (0..100u64).map(|i| Box::new_in(i * i, &numbers)).collect();
  let total: u64 = boxes.iter().map(|b| **b).sum();
  println!("{} boxed squares sum to {total}: {:?}", boxes.len(), numbers.stats());
  drop(boxes);

  let stats = numbers.teardown();
  println!("boxes released, {} slots still live", stats.live());
  let stats = arena.teardown();
  println!("released {} chunks, {} slots still live", stats.chunks(), stats.live());
  Ok(())
}
