//! Process-wide shard registry.
//!
//! Populated with every shard before any of them starts, then only read.
//! Map and player lookups scan the shards in id order under one read lock.

use crate::error::ServerError;
use crate::world::map::{Map, Player};
use crate::world::map_cache::{self, MapCacheEntry};
use crate::world::shard::ShardHandle;
use log::info;
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

/// Splits `items` into `groups` contiguous runs, keeping their order.
///
/// The first `len % groups` runs get one extra item, so sizes differ by at
/// most one and the largest run is `ceil(len / groups)`.
pub fn partition<T>(items: Vec<T>, groups: usize) -> Vec<Vec<T>> {
    let groups = groups.max(1);
    let base = items.len() / groups;
    let extra = items.len() % groups;

    let mut iter = items.into_iter();
    (0..groups)
        .map(|group| {
            let size = base + usize::from(group < extra);
            iter.by_ref().take(size).collect()
        })
        .collect()
}

#[derive(Default)]
pub struct ShardRegistry {
    shards: RwLock<BTreeMap<u32, Arc<ShardHandle>>>,
}

impl ShardRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Partitions `maps` over `shard_count` shards, registers all of them
    /// and then starts their threads
    pub fn start(
        maps: Vec<MapCacheEntry>,
        shard_count: usize,
        tick: Duration,
    ) -> Result<Arc<Self>, ServerError> {
        map_cache::check_unique_names(&maps)?;
        let total = maps.len();
        let groups = partition(maps, shard_count);
        info!(
            "Initializing {} shard(s) for {} map(s), at most {} per shard",
            groups.len(),
            total,
            groups.first().map_or(0, Vec::len)
        );

        let registry = Arc::new(ShardRegistry::new());
        for (id, group) in groups.into_iter().enumerate() {
            registry.insert(ShardHandle::new(id as u32, group, tick));
        }

        for shard in registry.shards() {
            if let Err(e) = shard.start() {
                for started in registry.shards() {
                    started.request_stop();
                }
                return Err(ServerError::Shard(shard.id(), e.to_string()));
            }
        }
        info!("Done initializing {} map(s) in {} shard(s)", total, registry.len());
        Ok(registry)
    }

    pub fn insert(&self, shard: ShardHandle) {
        self.shards.write().insert(shard.id(), Arc::new(shard));
    }

    pub fn len(&self) -> usize {
        self.shards.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn shard(&self, id: u32) -> Option<Arc<ShardHandle>> {
        self.shards.read().get(&id).cloned()
    }

    /// All shards in id order
    pub fn shards(&self) -> Vec<Arc<ShardHandle>> {
        self.shards.read().values().cloned().collect()
    }

    pub fn map_count(&self) -> usize {
        self.shards
            .read()
            .values()
            .map(|shard| shard.index().map_count())
            .sum()
    }

    /// Places `player` on the first shard owning `map_name`
    pub async fn add_player_to_map(&self, map_name: &str, player: Player) -> Option<Arc<Map>> {
        for shard in self.shards() {
            if let Some(map) = shard.add_player(map_name, player.clone()).await {
                return Some(map);
            }
        }
        None
    }

    pub async fn remove_player_from_map(&self, map_name: &str, player_name: &str) -> bool {
        for shard in self.shards() {
            if shard.remove_player(map_name, player_name).await {
                return true;
            }
        }
        false
    }

    /// Map the named player is currently on
    pub fn find_player(&self, name: &str) -> Option<Arc<Map>> {
        self.shards
            .read()
            .values()
            .find_map(|shard| shard.index().player_map(name))
    }

    pub fn get_map(&self, name: &str) -> Option<Arc<Map>> {
        self.shards
            .read()
            .values()
            .find_map(|shard| shard.index().map(name))
    }

    /// Routes a walk request to the shard holding the player
    pub fn move_player(&self, name: &str, x: u16, y: u16) -> bool {
        let shards = self.shards.read();
        shards
            .values()
            .find(|shard| shard.index().player_map(name).is_some())
            .map_or(false, |shard| shard.move_player(name, x, y))
    }

    /// Stops every shard and waits for its thread
    pub async fn stop_all(&self) {
        for shard in self.shards() {
            shard.stop().await;
        }
        info!("All shards stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn maps(count: usize) -> Vec<MapCacheEntry> {
        (0..count)
            .map(|i| MapCacheEntry::open(&format!("map{:03}", i), 4, 4))
            .collect()
    }

    #[test]
    fn test_partition_is_balanced_and_ordered() {
        let groups = partition((0..103).collect::<Vec<_>>(), 10);
        let sizes: Vec<usize> = groups.iter().map(Vec::len).collect();
        assert_eq!(sizes, vec![11, 11, 11, 10, 10, 10, 10, 10, 10, 10]);

        let flat: Vec<i32> = groups.into_iter().flatten().collect();
        assert_eq!(flat, (0..103).collect::<Vec<_>>());
    }

    #[test]
    fn test_partition_edge_cases() {
        let sizes = |len: usize, groups: usize| -> Vec<usize> {
            partition((0..len).collect::<Vec<_>>(), groups)
                .iter()
                .map(Vec::len)
                .collect()
        };
        assert_eq!(sizes(3, 5), vec![1, 1, 1, 0, 0]);
        assert_eq!(sizes(10, 5), vec![2, 2, 2, 2, 2]);
        assert_eq!(sizes(0, 2), vec![0, 0]);
        assert_eq!(sizes(4, 0), vec![4]);
    }

    #[test]
    fn test_duplicate_map_is_rejected_before_start() {
        let mut list = maps(3);
        list.push(MapCacheEntry::open("map001", 2, 2));
        let result = ShardRegistry::start(list, 2, Duration::from_millis(5));
        assert!(matches!(
            result,
            Err(ServerError::MapCache(crate::error::MapCacheError::MapInfo(_)))
        ));
    }

    #[tokio::test]
    async fn test_lookups_span_shards() {
        let registry = ShardRegistry::start(maps(7), 3, Duration::from_millis(5)).unwrap();
        assert_eq!(registry.len(), 3);
        assert_eq!(registry.map_count(), 7);

        // map006 lives on the last shard; the scan must get past the others
        let map = registry
            .add_player_to_map("map006", Player::new(1, 150000, "Tester"))
            .await
            .unwrap();
        assert_eq!(map.shard_id(), 2);
        assert_eq!(registry.get_map("map006").unwrap().shard_id(), 2);
        assert_eq!(registry.find_player("Tester").unwrap().name(), "map006");
        assert!(registry.move_player("Tester", 1, 1));

        assert!(registry
            .add_player_to_map("nowhere", Player::new(2, 2, "Lost"))
            .await
            .is_none());
        assert!(registry.find_player("Lost").is_none());

        assert!(registry.remove_player_from_map("map006", "Tester").await);
        assert!(!registry.remove_player_from_map("map006", "Tester").await);
        assert!(registry.find_player("Tester").is_none());

        registry.stop_all().await;
    }
}
