mod arena;
mod chunk;
mod slot;

pub use arena::{
  PoolArena,
  PoolStats,
};
pub use slot::LinkWidth;
