//! A map: immutable layout plus the entities currently on it.
//!
//! Contents are only written by the shard thread that owns the map; other
//! threads may read them through the registry.

use crate::world::map_cache::{MapCacheEntry, CELL_WALKABLE};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::time::Duration;

/// A player entity placed on a map
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub account_id: u32,
    pub character_id: u32,
    pub name: String,
    pub x: u16,
    pub y: u16,
    /// Cell the player is walking towards, if any
    pub destination: Option<(u16, u16)>,
}

impl Player {
    pub fn new(account_id: u32, character_id: u32, name: &str) -> Self {
        Player {
            account_id,
            character_id,
            name: name.to_string(),
            x: 0,
            y: 0,
            destination: None,
        }
    }
}

#[derive(Debug, Default)]
struct MapContents {
    players: HashMap<String, Player>,
    ticks: u64,
}

#[derive(Debug)]
pub struct Map {
    name: String,
    width: u16,
    height: u16,
    cells: Vec<u8>,
    shard_id: u32,
    contents: RwLock<MapContents>,
}

fn step_towards(from: u16, to: u16) -> u16 {
    match from.cmp(&to) {
        std::cmp::Ordering::Less => from + 1,
        std::cmp::Ordering::Greater => from - 1,
        std::cmp::Ordering::Equal => from,
    }
}

impl Map {
    pub fn new(shard_id: u32, entry: MapCacheEntry) -> Self {
        Map {
            name: entry.name,
            width: entry.width,
            height: entry.height,
            cells: entry.cells,
            shard_id,
            contents: RwLock::new(MapContents::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn width(&self) -> u16 {
        self.width
    }

    pub fn height(&self) -> u16 {
        self.height
    }

    pub fn shard_id(&self) -> u32 {
        self.shard_id
    }

    pub fn is_walkable(&self, x: u16, y: u16) -> bool {
        if x >= self.width || y >= self.height {
            return false;
        }
        let index = y as usize * self.width as usize + x as usize;
        self.cells
            .get(index)
            .map_or(false, |cell| cell & CELL_WALKABLE != 0)
    }

    /// First walkable cell scanning outward from the centre row
    pub fn spawn_point(&self) -> Option<(u16, u16)> {
        let (cx, cy) = (self.width / 2, self.height / 2);
        if self.is_walkable(cx, cy) {
            return Some((cx, cy));
        }
        (0..self.height)
            .flat_map(|y| (0..self.width).map(move |x| (x, y)))
            .find(|&(x, y)| self.is_walkable(x, y))
    }

    pub fn player_count(&self) -> usize {
        self.contents.read().players.len()
    }

    pub fn player(&self, name: &str) -> Option<Player> {
        self.contents.read().players.get(name).cloned()
    }

    pub fn has_player(&self, name: &str) -> bool {
        self.contents.read().players.contains_key(name)
    }

    pub fn ticks(&self) -> u64 {
        self.contents.read().ticks
    }

    /// Places `player` on its own cell if walkable, otherwise on the spawn point
    pub(crate) fn add_player(&self, mut player: Player) -> bool {
        if !self.is_walkable(player.x, player.y) {
            match self.spawn_point() {
                Some((x, y)) => {
                    player.x = x;
                    player.y = y;
                }
                None => return false,
            }
        }
        player.destination = None;
        self.contents.write().players.insert(player.name.clone(), player);
        true
    }

    pub(crate) fn remove_player(&self, name: &str) -> Option<Player> {
        self.contents.write().players.remove(name)
    }

    pub(crate) fn set_destination(&self, name: &str, x: u16, y: u16) -> bool {
        if !self.is_walkable(x, y) {
            return false;
        }
        match self.contents.write().players.get_mut(name) {
            Some(player) => {
                player.destination = Some((x, y));
                true
            }
            None => false,
        }
    }

    /// One simulation step: walking players advance a cell toward their
    /// destination and stop when the next cell is blocked
    pub(crate) fn update(&self, _elapsed: Duration) {
        let mut contents = self.contents.write();
        contents.ticks += 1;
        for player in contents.players.values_mut() {
            let Some((dx, dy)) = player.destination else {
                continue;
            };
            let next = (step_towards(player.x, dx), step_towards(player.y, dy));
            if !self.is_walkable(next.0, next.1) {
                player.destination = None;
                continue;
            }
            player.x = next.0;
            player.y = next.1;
            if (player.x, player.y) == (dx, dy) {
                player.destination = None;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map() -> Map {
        let mut entry = MapCacheEntry::open("prontera", 5, 5);
        // Wall across column 3 except the bottom row
        for y in 0..4 {
            entry.cells[y * 5 + 3] = 0;
        }
        Map::new(0, entry)
    }

    #[test]
    fn test_walkability_bounds() {
        let map = map();
        assert!(map.is_walkable(0, 0));
        assert!(!map.is_walkable(3, 0));
        assert!(map.is_walkable(3, 4));
        assert!(!map.is_walkable(5, 0));
        assert_eq!(map.spawn_point(), Some((2, 2)));
    }

    #[test]
    fn test_blocked_cell_is_moved_to_spawn() {
        let map = map();
        let mut player = Player::new(1, 150000, "Tester");
        player.x = 3;
        player.y = 1;
        assert!(map.add_player(player));
        let placed = map.player("Tester").unwrap();
        assert_eq!((placed.x, placed.y), (2, 2));
    }

    #[test]
    fn test_walking_stops_at_walls_and_destination() {
        let map = map();
        let mut player = Player::new(1, 150000, "Tester");
        player.x = 2;
        player.y = 2;
        map.add_player(player);
        assert!(!map.set_destination("Tester", 3, 2));
        assert!(map.set_destination("Tester", 0, 0));

        map.update(Duration::from_millis(50));
        map.update(Duration::from_millis(50));
        let walked = map.player("Tester").unwrap();
        assert_eq!((walked.x, walked.y), (0, 0));
        assert_eq!(walked.destination, None);

        assert!(map.set_destination("Tester", 4, 0));
        for _ in 0..5 {
            map.update(Duration::from_millis(50));
        }
        let blocked = map.player("Tester").unwrap();
        assert_eq!((blocked.x, blocked.y), (2, 0));
        assert_eq!(map.ticks(), 7);
    }

    #[test]
    fn test_remove_player() {
        let map = map();
        map.add_player(Player::new(1, 150000, "Tester"));
        assert!(map.has_player("Tester"));
        assert_eq!(map.remove_player("Tester").map(|p| p.account_id), Some(1));
        assert_eq!(map.player_count(), 0);
    }
}
