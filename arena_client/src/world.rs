//! Client-side mirror of replicated state.
//!
//! Applies events the same way a rendering client would, minus the
//! rendering: items from `spawn`/`environment`/`delete_item`, other players
//! from `sync`/`delete_player`.

use std::collections::HashMap;

use arena_shared::{
    math::Position,
    protocol::{Event, PlayerState, Score, Uid},
};

#[derive(Debug, Default, Clone)]
pub struct WorldView {
    pub own_id: Option<Uid>,
    pub own_score: Score,
    /// Set once a `delete_player` names our own id.
    pub eliminated: bool,
    pub items: HashMap<Uid, Position>,
    pub others: HashMap<Uid, PlayerState>,
}

impl WorldView {
    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::Sync(p) => {
                for player in &p.players {
                    if Some(player.id) == self.own_id {
                        self.own_score = player.score;
                    } else {
                        self.others.insert(player.id, player.clone());
                    }
                }
            }
            Event::Spawn(p) => {
                self.items.insert(p.item.id, p.item.position);
            }
            Event::DeleteItem(p) => {
                self.items.remove(&p.item_id);
            }
            // Full list: drop what the server no longer has, add the rest.
            Event::Environment(p) => {
                self.items = p.items.iter().map(|i| (i.id, i.position)).collect();
            }
            Event::DeletePlayer(p) => {
                if Some(p.id) == self.own_id {
                    self.eliminated = true;
                } else {
                    self.others.remove(&p.id);
                }
            }
            Event::Pong(_) | Event::LoginResponse(_) => {}
        }
    }

    /// Closest known item to `from`.
    pub fn nearest_item(&self, from: Position) -> Option<(Uid, Position)> {
        self.items
            .iter()
            .map(|(id, pos)| (*id, *pos))
            .min_by(|a, b| from.distance_sq(a.1).total_cmp(&from.distance_sq(b.1)))
    }
}
