//! Entity store.
//!
//! The single owner of authoritative world state: players, items and the
//! id counter. All three live behind one mutex, so every public operation
//! is atomic with respect to every other one. Callers receive clones,
//! never references into the maps.

use std::{
    collections::HashMap,
    sync::{Mutex, MutexGuard},
};

use arena_shared::{
    math::Position,
    protocol::{ItemState, PlayerState, Score, Uid},
};

/// A logged-in player.
#[derive(Debug, Clone, PartialEq)]
pub struct Player {
    pub id: Uid,
    pub name: String,
    pub position: Position,
    pub score: Score,
    /// Set when position or score changed since the last sync broadcast.
    pub changed: bool,
}

impl Player {
    pub fn state(&self) -> PlayerState {
        PlayerState {
            id: self.id,
            position: self.position,
            score: self.score,
        }
    }
}

/// A collectible. Items never move.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Item {
    pub id: Uid,
    pub position: Position,
}

impl Item {
    pub fn state(&self) -> ItemState {
        ItemState {
            id: self.id,
            position: self.position,
        }
    }
}

/// Result of `EntityStore::resolve_collision`.
#[derive(Debug, Clone, PartialEq)]
pub enum CollisionOutcome {
    /// The strictly lower-scoring player was removed.
    Eliminated(Player),
    /// Equal scores; nobody is removed.
    Tie,
    /// At least one of the ids is not a live player.
    MissingPlayer,
}

#[derive(Debug, Default)]
struct WorldState {
    next_id: Uid,
    players: HashMap<Uid, Player>,
    items: HashMap<Uid, Item>,
}

impl WorldState {
    fn allocate_id(&mut self) -> Uid {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

/// Thread-safe authoritative world state.
#[derive(Debug, Default)]
pub struct EntityStore {
    inner: Mutex<WorldState>,
}

impl EntityStore {
    pub fn new() -> Self {
        Self::default()
    }

    // No operation leaves the state half-mutated before a panic point, so a
    // poisoned lock still guards consistent data.
    fn lock(&self) -> MutexGuard<'_, WorldState> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Next value of the id counter shared by players and items.
    pub fn allocate_id(&self) -> Uid {
        self.lock().allocate_id()
    }

    /// Inserts a new player at the origin with score 0.
    pub fn create_player(&self, name: &str) -> Player {
        let mut world = self.lock();
        let player = Player {
            id: world.allocate_id(),
            name: name.to_string(),
            position: Position::ORIGIN,
            score: 0,
            changed: false,
        };
        world.players.insert(player.id, player.clone());
        player
    }

    pub fn get_player(&self, id: Uid) -> Option<Player> {
        self.lock().players.get(&id).cloned()
    }

    /// Updates a player's position. Returns false if the player is absent.
    ///
    /// The dirty flag is only raised when the position actually differs.
    pub fn set_player_position(&self, id: Uid, position: Position) -> bool {
        let mut world = self.lock();
        let Some(player) = world.players.get_mut(&id) else {
            return false;
        };
        if player.position != position {
            player.position = position;
            player.changed = true;
        }
        true
    }

    pub fn remove_player(&self, id: Uid) -> Option<Player> {
        self.lock().players.remove(&id)
    }

    pub fn create_item(&self, position: Position) -> Item {
        let mut world = self.lock();
        let item = Item {
            id: world.allocate_id(),
            position,
        };
        world.items.insert(item.id, item);
        item
    }

    /// Creates an item only when at least one player exists, checked under
    /// the same lock as the insert.
    pub fn create_item_if_players(&self, position: Position) -> Option<Item> {
        let mut world = self.lock();
        if world.players.is_empty() {
            return None;
        }
        let item = Item {
            id: world.allocate_id(),
            position,
        };
        world.items.insert(item.id, item);
        Some(item)
    }

    /// Removes and returns the item. Of any number of concurrent callers for
    /// the same id, exactly one gets `Some`.
    pub fn take_item(&self, id: Uid) -> Option<Item> {
        self.lock().items.remove(&id)
    }

    /// Takes the item and credits the picker in one step.
    ///
    /// The item is consumed even if `player_id` is not a live player; the
    /// second tuple field reports whether a score was incremented.
    pub fn pick_up_item(&self, item_id: Uid, player_id: Uid) -> Option<(Item, bool)> {
        let mut world = self.lock();
        let item = world.items.remove(&item_id)?;
        let credited = match world.players.get_mut(&player_id) {
            Some(player) => {
                player.score += 1;
                player.changed = true;
                true
            }
            None => false,
        };
        Some((item, credited))
    }

    /// Compares both players' scores and removes the strictly lower one.
    ///
    /// Symmetric in its arguments.
    pub fn resolve_collision(&self, alpha: Uid, bravo: Uid) -> CollisionOutcome {
        let mut world = self.lock();
        let (Some(a), Some(b)) = (world.players.get(&alpha), world.players.get(&bravo)) else {
            return CollisionOutcome::MissingPlayer;
        };
        let loser = match a.score.cmp(&b.score) {
            std::cmp::Ordering::Equal => return CollisionOutcome::Tie,
            std::cmp::Ordering::Less => alpha,
            std::cmp::Ordering::Greater => bravo,
        };
        match world.players.remove(&loser) {
            Some(player) => CollisionOutcome::Eliminated(player),
            None => CollisionOutcome::MissingPlayer,
        }
    }

    /// Live items ordered by id.
    pub fn snapshot_items(&self) -> Vec<Item> {
        let mut items: Vec<Item> = self.lock().items.values().copied().collect();
        items.sort_by_key(|i| i.id);
        items
    }

    /// Live players ordered by id.
    pub fn players_snapshot(&self) -> Vec<Player> {
        let mut players: Vec<Player> = self.lock().players.values().cloned().collect();
        players.sort_by_key(|p| p.id);
        players
    }

    /// Collects every dirty player, clears their flags, and returns them
    /// ordered by id.
    pub fn drain_changed_players(&self) -> Vec<Player> {
        let mut world = self.lock();
        let mut drained: Vec<Player> = world
            .players
            .values_mut()
            .filter(|p| p.changed)
            .map(|p| {
                p.changed = false;
                p.clone()
            })
            .collect();
        drained.sort_by_key(|p| p.id);
        drained
    }

    pub fn player_count(&self) -> usize {
        self.lock().players.len()
    }

    pub fn item_count(&self) -> usize {
        self.lock().items.len()
    }
}
