//! Periodic jobs.
//!
//! `RepeatingTask` runs a synchronous body on a fixed period until the
//! shutdown signal flips. The body goes through the same `EntityStore`
//! operations as the message handlers, so there is exactly one locking
//! discipline for world state.
//!
//! Tick bodies:
//! - `sync_tick`: batch every dirty player into one `sync` broadcast.
//! - `spawn_tick`: drop a new item somewhere in the spawn region.
//! - `environment_tick`: optional full item-list resync.

use std::time::Duration;

use arena_shared::{
    config::SpawnRegion,
    math::Position,
    protocol::{EnvironmentPayload, Event, SpawnPayload, SyncPayload},
};
use rand::Rng;
use tokio::{
    sync::watch,
    task::JoinHandle,
    time::{interval, MissedTickBehavior},
};
use tracing::{debug, error, info};

use crate::{
    outbound::{Outbound, OutboundExt},
    store::{EntityStore, Item},
};

/// A body executed on a fixed period in its own tokio task.
pub struct RepeatingTask {
    name: &'static str,
    handle: JoinHandle<()>,
}

impl RepeatingTask {
    /// Starts the task. The first execution happens one `period` after
    /// spawning. The task ends once `shutdown` holds `true` or its sender is
    /// dropped; a running body is never interrupted.
    pub fn spawn<F>(
        name: &'static str,
        period: Duration,
        mut shutdown: watch::Receiver<bool>,
        mut body: F,
    ) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            // Skip the first tick since it fires immediately.
            ticker.tick().await;

            loop {
                if *shutdown.borrow() {
                    break;
                }
                tokio::select! {
                    _ = ticker.tick() => body(),
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                    }
                }
            }
            debug!(task = name, "Repeating task stopped");
        });
        Self { name, handle }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    /// Waits for the task to finish.
    pub async fn join(self) {
        if let Err(e) = self.handle.await {
            error!(task = self.name, error = %e, "Repeating task panicked");
        }
    }
}

/// Broadcasts one `sync` for all players changed since the previous tick.
/// Returns the number of players included; zero means nothing was sent.
pub fn sync_tick(store: &EntityStore, out: &dyn Outbound) -> usize {
    let changed = store.drain_changed_players();
    if changed.is_empty() {
        return 0;
    }
    let players = changed.iter().map(|p| p.state()).collect::<Vec<_>>();
    let count = players.len();
    out.broadcast_event(&Event::Sync(SyncPayload { players }));
    count
}

/// Uniform point in the region's square at its fixed height.
pub fn random_position<R: Rng + ?Sized>(region: &SpawnRegion, rng: &mut R) -> Position {
    let h = region.half_extent;
    Position::new(rng.gen_range(-h..h), region.height, rng.gen_range(-h..h))
}

/// Creates and announces an item, unless the world has no players.
pub fn spawn_tick<R: Rng + ?Sized>(
    store: &EntityStore,
    out: &dyn Outbound,
    region: &SpawnRegion,
    rng: &mut R,
) -> Option<Item> {
    let position = random_position(region, rng);
    let item = store.create_item_if_players(position)?;
    info!(item_id = item.id, x = position.x, z = position.z, "<< Spawn");
    out.broadcast_event(&Event::Spawn(SpawnPayload { item: item.state() }));
    Some(item)
}

/// Broadcasts the full item list. Skipped when no players exist.
pub fn environment_tick(store: &EntityStore, out: &dyn Outbound) -> bool {
    if store.player_count() == 0 {
        return false;
    }
    let items = store.snapshot_items().iter().map(|i| i.state()).collect();
    out.broadcast_event(&Event::Environment(EnvironmentPayload { items }));
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::outbound::RecordingOutbound;
    use arena_shared::protocol::{ItemState, PlayerState};
    use rand::{rngs::StdRng, SeedableRng};
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    #[test]
    fn idle_sync_sends_nothing() {
        let store = EntityStore::new();
        let out = RecordingOutbound::new();
        store.create_player("Ann");
        assert_eq!(sync_tick(&store, &out), 0);
        assert!(out.is_empty());
    }

    #[test]
    fn sync_includes_changed_player_exactly_once() {
        let store = EntityStore::new();
        let out = RecordingOutbound::new();
        let ann = store.create_player("Ann");
        let _bob = store.create_player("Bob");
        store.set_player_position(ann.id, Position::new(1.0, 0.5, 2.0));

        assert_eq!(sync_tick(&store, &out), 1);
        assert_eq!(
            out.broadcasts(),
            vec![Event::Sync(SyncPayload {
                players: vec![PlayerState {
                    id: ann.id,
                    position: Position::new(1.0, 0.5, 2.0),
                    score: 0,
                }]
            })]
        );

        out.take();
        assert_eq!(sync_tick(&store, &out), 0);
        assert!(out.is_empty());
    }

    #[test]
    fn score_change_is_synced() {
        let store = EntityStore::new();
        let out = RecordingOutbound::new();
        let ann = store.create_player("Ann");
        let item = store.create_item(Position::ORIGIN);
        store.pick_up_item(item.id, ann.id);

        sync_tick(&store, &out);
        match out.broadcasts().as_slice() {
            [Event::Sync(SyncPayload { players })] => assert_eq!(players[0].score, 1),
            other => panic!("unexpected broadcasts {other:?}"),
        }
    }

    #[test]
    fn spawn_is_idle_without_players() {
        let store = EntityStore::new();
        let out = RecordingOutbound::new();
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..50 {
            assert!(spawn_tick(&store, &out, &SpawnRegion::default(), &mut rng).is_none());
        }
        assert_eq!(store.item_count(), 0);
        assert!(out.is_empty());
    }

    #[test]
    fn spawn_broadcasts_item_inside_region() {
        let store = EntityStore::new();
        let out = RecordingOutbound::new();
        let region = SpawnRegion::default();
        let mut rng = StdRng::seed_from_u64(42);
        store.create_player("Ann");

        let item = spawn_tick(&store, &out, &region, &mut rng).unwrap();
        assert_eq!(item.id, 1);
        assert_eq!(item.position.y, 0.5);
        assert_eq!(
            out.broadcasts(),
            vec![Event::Spawn(SpawnPayload {
                item: ItemState {
                    id: 1,
                    position: item.position
                }
            })]
        );

        for _ in 0..500 {
            let p = random_position(&region, &mut rng);
            assert!((-5.0..5.0).contains(&p.x), "x out of range: {}", p.x);
            assert!((-5.0..5.0).contains(&p.z), "z out of range: {}", p.z);
            assert_eq!(p.y, region.height);
        }
    }

    #[test]
    fn environment_resync_lists_live_items() {
        let store = EntityStore::new();
        let out = RecordingOutbound::new();
        assert!(!environment_tick(&store, &out));

        store.create_player("Ann");
        let item = store.create_item(Position::new(3.0, 0.5, -3.0));
        assert!(environment_tick(&store, &out));
        assert_eq!(
            out.broadcasts(),
            vec![Event::Environment(EnvironmentPayload {
                items: vec![item.state()]
            })]
        );
    }

    #[tokio::test]
    async fn repeating_task_runs_until_shutdown() {
        let (tx, rx) = watch::channel(false);
        let count = Arc::new(AtomicUsize::new(0));
        let task = {
            let count = count.clone();
            RepeatingTask::spawn("counter", Duration::from_millis(5), rx, move || {
                count.fetch_add(1, Ordering::SeqCst);
            })
        };
        assert_eq!(task.name(), "counter");

        tokio::time::sleep(Duration::from_millis(60)).await;
        tx.send(true).unwrap();
        task.join().await;

        let stopped_at = count.load(Ordering::SeqCst);
        assert!(stopped_at >= 2, "only {stopped_at} ticks ran");
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(count.load(Ordering::SeqCst), stopped_at);
    }

    #[tokio::test]
    async fn dropping_the_sender_stops_the_task() {
        let (tx, rx) = watch::channel(false);
        let task = RepeatingTask::spawn("noop", Duration::from_millis(5), rx, || {});
        drop(tx);
        task.join().await;
    }
}
