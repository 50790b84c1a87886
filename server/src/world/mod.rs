//! Sharded world simulation for the zone role

pub mod map;
pub mod map_cache;
pub mod registry;
pub mod shard;

pub use map::{Map, Player};
pub use map_cache::MapCacheEntry;
pub use registry::{partition, ShardRegistry};
pub use shard::ShardHandle;
