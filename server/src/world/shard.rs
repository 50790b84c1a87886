//! Map containers: each shard owns a disjoint set of maps and simulates
//! them on its own OS thread at a fixed tick.
//!
//! Other threads never touch shard state directly. Placement changes are
//! sent as [`ShardCommand`]s and applied by the shard thread at the start of
//! its next tick; reads go through the shard's index.

use crate::scheduler::TaskScheduler;
use crate::world::map::{Map, Player};
use crate::world::map_cache::MapCacheEntry;
use log::{debug, info, warn};
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};

const STATUS_INTERVAL: Duration = Duration::from_secs(60);

pub enum ShardCommand {
    AddPlayer {
        map_name: String,
        player: Player,
        reply: oneshot::Sender<Option<Arc<Map>>>,
    },
    RemovePlayer {
        map_name: String,
        player_name: String,
        reply: oneshot::Sender<bool>,
    },
    MovePlayer {
        player_name: String,
        x: u16,
        y: u16,
    },
}

/// Map and player lookup for one shard.
/// The map table is fixed at creation; the player table is written only by
/// the shard thread.
#[derive(Debug, Default)]
pub struct ShardIndex {
    maps: HashMap<String, Arc<Map>>,
    players: RwLock<HashMap<String, Arc<Map>>>,
}

impl ShardIndex {
    pub fn map(&self, name: &str) -> Option<Arc<Map>> {
        self.maps.get(name).cloned()
    }

    pub fn owns(&self, name: &str) -> bool {
        self.maps.contains_key(name)
    }

    pub fn player_map(&self, player_name: &str) -> Option<Arc<Map>> {
        self.players.read().get(player_name).cloned()
    }

    pub fn map_count(&self) -> usize {
        self.maps.len()
    }

    pub fn player_count(&self) -> usize {
        self.players.read().len()
    }

    pub fn map_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.maps.keys().cloned().collect();
        names.sort();
        names
    }
}

/// Handle to a shard, shared through the registry
pub struct ShardHandle {
    id: u32,
    index: Arc<ShardIndex>,
    commands: mpsc::UnboundedSender<ShardCommand>,
    running: Arc<AtomicBool>,
    ticks: Arc<AtomicU64>,
    pending: Mutex<Option<ShardWorker>>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

struct ShardWorker {
    id: u32,
    index: Arc<ShardIndex>,
    commands: mpsc::UnboundedReceiver<ShardCommand>,
    running: Arc<AtomicBool>,
    ticks: Arc<AtomicU64>,
    tick: Duration,
    scheduler: TaskScheduler,
}

impl ShardHandle {
    /// Builds a shard owning `entries`. The thread is not started yet.
    pub fn new(id: u32, entries: Vec<MapCacheEntry>, tick: Duration) -> Self {
        let maps = entries
            .into_iter()
            .map(|entry| {
                let map = Arc::new(Map::new(id, entry));
                (map.name().to_string(), map)
            })
            .collect();
        let index = Arc::new(ShardIndex {
            maps,
            players: RwLock::new(HashMap::new()),
        });
        let (commands, commands_rx) = mpsc::unbounded_channel();
        let running = Arc::new(AtomicBool::new(false));
        let ticks = Arc::new(AtomicU64::new(0));

        let worker = ShardWorker {
            id,
            index: Arc::clone(&index),
            commands: commands_rx,
            running: Arc::clone(&running),
            ticks: Arc::clone(&ticks),
            tick,
            scheduler: TaskScheduler::new(),
        };

        ShardHandle {
            id,
            index,
            commands,
            running,
            ticks,
            pending: Mutex::new(Some(worker)),
            thread: Mutex::new(None),
        }
    }

    pub fn id(&self) -> u32 {
        self.id
    }

    pub fn index(&self) -> &ShardIndex {
        &self.index
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn ticks(&self) -> u64 {
        self.ticks.load(Ordering::Relaxed)
    }

    /// Spawns the shard thread. Starting twice is a no-op.
    pub fn start(&self) -> io::Result<()> {
        let Some(worker) = self.pending.lock().take() else {
            return Ok(());
        };
        self.running.store(true, Ordering::Release);
        let handle = thread::Builder::new()
            .name(format!("shard-{}", self.id))
            .spawn(move || worker.run());
        match handle {
            Ok(handle) => {
                *self.thread.lock() = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.running.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    /// Tells the thread to exit after its current tick without waiting
    pub fn request_stop(&self) {
        self.running.store(false, Ordering::Release);
    }

    /// Stops the thread and waits for it to exit. The join runs on the
    /// blocking pool, never on an async worker.
    pub async fn stop(&self) {
        self.request_stop();
        let handle = self.thread.lock().take();
        let Some(handle) = handle else {
            return;
        };
        match tokio::task::spawn_blocking(move || handle.join()).await {
            Ok(Ok(())) => {}
            Ok(Err(_)) => warn!("Shard {} thread panicked", self.id),
            Err(e) => warn!("Shard {} join failed: {}", self.id, e),
        }
    }

    pub async fn add_player(&self, map_name: &str, player: Player) -> Option<Arc<Map>> {
        if !self.index.owns(map_name) {
            return None;
        }
        let (reply, reply_rx) = oneshot::channel();
        self.commands
            .send(ShardCommand::AddPlayer {
                map_name: map_name.to_string(),
                player,
                reply,
            })
            .ok()?;
        reply_rx.await.ok().flatten()
    }

    pub async fn remove_player(&self, map_name: &str, player_name: &str) -> bool {
        if !self.index.owns(map_name) {
            return false;
        }
        let (reply, reply_rx) = oneshot::channel();
        let sent = self.commands.send(ShardCommand::RemovePlayer {
            map_name: map_name.to_string(),
            player_name: player_name.to_string(),
            reply,
        });
        sent.is_ok() && reply_rx.await.unwrap_or(false)
    }

    pub fn move_player(&self, player_name: &str, x: u16, y: u16) -> bool {
        self.commands
            .send(ShardCommand::MovePlayer {
                player_name: player_name.to_string(),
                x,
                y,
            })
            .is_ok()
    }
}

impl ShardWorker {
    fn run(mut self) {
        info!(
            "Shard {} started with {} map(s), tick {:?}",
            self.id,
            self.index.map_count(),
            self.tick
        );

        let id = self.id;
        let index = Arc::clone(&self.index);
        self.scheduler.schedule_repeating(STATUS_INTERVAL, move |_| {
            debug!(
                "Shard {}: {} player(s) on {} map(s)",
                id,
                index.player_count(),
                index.map_count()
            );
        });

        let mut last = Instant::now();
        while self.running.load(Ordering::Acquire) {
            let started = Instant::now();
            let elapsed = started - last;
            last = started;

            self.drain_commands();
            self.scheduler.update(elapsed);
            for map in self.index.maps.values() {
                map.update(elapsed);
            }
            self.ticks.fetch_add(1, Ordering::Relaxed);

            let spent = started.elapsed();
            if spent < self.tick {
                thread::sleep(self.tick - spent);
            }
        }

        self.scheduler.begin_shutdown();
        self.scheduler.clear();
        // Callers waiting on replies see their channel close
        self.commands.close();
        info!(
            "Shard {} stopped after {} tick(s)",
            self.id,
            self.ticks.load(Ordering::Relaxed)
        );
    }

    fn drain_commands(&mut self) {
        while let Ok(command) = self.commands.try_recv() {
            self.apply(command);
        }
    }

    fn apply(&mut self, command: ShardCommand) {
        match command {
            ShardCommand::AddPlayer {
                map_name,
                player,
                reply,
            } => {
                let placed = self.add_player(&map_name, player);
                let _ = reply.send(placed);
            }
            ShardCommand::RemovePlayer {
                map_name,
                player_name,
                reply,
            } => {
                let removed = self.remove_player(&map_name, &player_name);
                let _ = reply.send(removed);
            }
            ShardCommand::MovePlayer { player_name, x, y } => {
                if let Some(map) = self.index.player_map(&player_name) {
                    if !map.set_destination(&player_name, x, y) {
                        debug!("Shard {}: {} cannot walk to {},{}", self.id, player_name, x, y);
                    }
                }
            }
        }
    }

    fn add_player(&mut self, map_name: &str, player: Player) -> Option<Arc<Map>> {
        let map = self.index.map(map_name)?;
        let name = player.name.clone();

        let mut players = self.index.players.write();
        if let Some(previous) = players.remove(&name) {
            previous.remove_player(&name);
        }
        if !map.add_player(player) {
            warn!("Shard {}: map {} has no walkable cell for {}", self.id, map_name, name);
            return None;
        }
        players.insert(name, Arc::clone(&map));
        Some(map)
    }

    fn remove_player(&mut self, map_name: &str, player_name: &str) -> bool {
        let Some(map) = self.index.map(map_name) else {
            return false;
        };
        if map.remove_player(player_name).is_none() {
            return false;
        }
        let mut players = self.index.players.write();
        if players
            .get(player_name)
            .map_or(false, |current| Arc::ptr_eq(current, &map))
        {
            players.remove(player_name);
        }
        true
    }
}

impl Drop for ShardHandle {
    // The thread detaches and exits on its next tick
    fn drop(&mut self) {
        self.request_stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn shard() -> ShardHandle {
        ShardHandle::new(
            3,
            vec![
                MapCacheEntry::open("prontera", 10, 10),
                MapCacheEntry::open("geffen", 10, 10),
            ],
            Duration::from_millis(5),
        )
    }

    #[tokio::test]
    async fn test_add_move_remove() {
        let shard = shard();
        shard.start().unwrap();
        assert!(shard.is_running());

        let map = shard
            .add_player("prontera", Player::new(1, 150000, "Tester"))
            .await
            .unwrap();
        assert_eq!(map.shard_id(), 3);
        assert_eq!(shard.index().player_map("Tester").unwrap().name(), "prontera");

        let placed = map.player("Tester").unwrap();
        assert!(shard.move_player("Tester", placed.x + 2, placed.y));
        let started = Instant::now();
        while map.player("Tester").unwrap().x != placed.x + 2 {
            assert!(started.elapsed() < Duration::from_secs(2));
            tokio::time::sleep(Duration::from_millis(5)).await;
        }

        assert!(!shard.remove_player("geffen", "Tester").await);
        assert!(shard.remove_player("prontera", "Tester").await);
        assert!(shard.index().player_map("Tester").is_none());

        shard.stop().await;
        assert!(!shard.is_running());
        assert!(shard.ticks() > 0);
    }

    #[tokio::test]
    async fn test_unowned_map_is_refused_without_thread() {
        let shard = shard();
        assert!(shard
            .add_player("payon", Player::new(1, 1, "Nobody"))
            .await
            .is_none());
        assert!(!shard.remove_player("payon", "Nobody").await);
    }

    #[tokio::test]
    async fn test_moving_between_maps_updates_index() {
        let shard = shard();
        shard.start().unwrap();

        let first = shard
            .add_player("prontera", Player::new(1, 1, "Tester"))
            .await
            .unwrap();
        let second = shard
            .add_player("geffen", Player::new(1, 1, "Tester"))
            .await
            .unwrap();

        assert!(!first.has_player("Tester"));
        assert!(second.has_player("Tester"));
        assert_eq!(shard.index().player_count(), 1);
        shard.stop().await;
    }

    #[tokio::test]
    async fn test_commands_after_stop_fail() {
        let shard = shard();
        shard.start().unwrap();
        shard.stop().await;
        assert!(shard
            .add_player("prontera", Player::new(1, 1, "Late"))
            .await
            .is_none());
    }

    #[tokio::test]
    async fn test_stop_does_not_park_the_runtime() {
        let shard = ShardHandle::new(
            1,
            vec![MapCacheEntry::open("prontera", 4, 4)],
            Duration::from_millis(300),
        );
        shard.start().unwrap();
        // Let the thread finish its first tick and go to sleep
        tokio::time::sleep(Duration::from_millis(20)).await;

        let order = Mutex::new(Vec::new());
        tokio::join!(
            async {
                shard.stop().await;
                order.lock().push("stopped");
            },
            async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                order.lock().push("timer");
            }
        );
        assert_eq!(*order.lock(), vec!["timer", "stopped"]);
        assert!(!shard.is_running());
    }

    #[test]
    fn test_drop_returns_without_waiting_for_tick() {
        let shard = ShardHandle::new(
            2,
            vec![MapCacheEntry::open("geffen", 4, 4)],
            Duration::from_millis(500),
        );
        shard.start().unwrap();
        thread::sleep(Duration::from_millis(20));

        let started = Instant::now();
        drop(shard);
        assert!(started.elapsed() < Duration::from_millis(250));
    }

    #[test]
    fn test_index_lists_maps() {
        let shard = shard();
        assert_eq!(shard.index().map_names(), vec!["geffen", "prontera"]);
        assert!(shard.index().owns("geffen"));
    }
}
